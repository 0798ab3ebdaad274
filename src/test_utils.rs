#[cfg(test)]
pub mod test_helpers {
    use crate::db::Database;
    use crate::project::{DATA_DIR, DB_FILE};
    use std::path::Path;
    use tempfile::TempDir;

    pub struct TestContext {
        pub db: Database,
        pub _temp_dir: TempDir,
    }

    impl TestContext {
        pub async fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();

            let data_dir = temp_dir.path().join(DATA_DIR);
            std::fs::create_dir_all(&data_dir).unwrap();

            let db = Database::open(&data_dir.join(DB_FILE)).await.unwrap();

            Self {
                db,
                _temp_dir: temp_dir,
            }
        }

        pub fn db(&self) -> &Database {
            &self.db
        }

        pub fn project_root(&self) -> &Path {
            self._temp_dir.path()
        }
    }
}
