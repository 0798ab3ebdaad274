pub mod models;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tokio::sync::{Mutex, MutexGuard};

/// Value persisted in `PRAGMA user_version` once every migration has run.
pub const SCHEMA_VERSION: i64 = 1;

const MIGRATION_V1: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'open',
        intent TEXT,
        description TEXT,
        plan TEXT,
        steps TEXT NOT NULL DEFAULT '[]',
        current_step INTEGER,
        discoveries TEXT NOT NULL DEFAULT '[]',
        decisions TEXT NOT NULL DEFAULT '[]',
        outcome TEXT,
        metadata TEXT,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        CHECK (length(title) > 0),
        CHECK (type IN ('epic', 'feature', 'bug', 'investigation', 'chore')),
        CHECK (status IN ('open', 'in_progress', 'completed', 'cancelled', 'deleted'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
    r#"
    CREATE TABLE IF NOT EXISTS task_relationships (
        id TEXT PRIMARY KEY,
        from_task_id TEXT NOT NULL,
        to_task_id TEXT NOT NULL,
        type TEXT NOT NULL,
        metadata TEXT,
        created_at DATETIME NOT NULL,
        FOREIGN KEY (from_task_id) REFERENCES tasks(id),
        FOREIGN KEY (to_task_id) REFERENCES tasks(id),
        UNIQUE (from_task_id, to_task_id, type),
        CHECK (from_task_id != to_task_id),
        CHECK (type IN ('parent_of', 'blocks', 'relates_to', 'duplicates', 'splits_from'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_relationships_from ON task_relationships(from_task_id, type)",
    "CREATE INDEX IF NOT EXISTS idx_relationships_to ON task_relationships(to_task_id, type)",
    // A task has at most one parent.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_relationships_single_parent
    ON task_relationships(to_task_id) WHERE type = 'parent_of'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS context_entries (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL,
        type TEXT NOT NULL,
        content TEXT NOT NULL,
        metadata TEXT,
        superseded_by TEXT,
        created_at DATETIME NOT NULL,
        FOREIGN KEY (task_id) REFERENCES tasks(id),
        FOREIGN KEY (superseded_by) REFERENCES context_entries(id),
        CHECK (type IN ('decision', 'attempt', 'blocker', 'note', 'reference', 'discovery'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_context_entries_task ON context_entries(task_id)",
    r#"
    CREATE TABLE IF NOT EXISTS progress_items (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL,
        content TEXT NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        created_at DATETIME NOT NULL,
        completed_at DATETIME,
        FOREIGN KEY (task_id) REFERENCES tasks(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_progress_items_task ON progress_items(task_id)",
];

/// Migration steps indexed by the version they upgrade to.
const MIGRATIONS: &[(i64, &[&str])] = &[(1, MIGRATION_V1)];

pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

/// Bring the schema up to [`SCHEMA_VERSION`]. Each step runs in its own
/// transaction together with the version bump, so reruns are no-ops.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current = schema_version(pool).await?;

    for (version, statements) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let mut tx = pool.begin().await?;
        for statement in statements.iter() {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        // PRAGMA does not accept bound parameters.
        sqlx::query(&format!("PRAGMA user_version = {}", version))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(version = *version, "Applied schema migration");
    }

    Ok(())
}

/// Store handle for one project database.
///
/// Owns the connection pool and an in-process write lock. Every operation
/// that reads state, validates it, and then writes holds the lock for the
/// whole sequence, so concurrent callers on the same handle cannot
/// interleave between the check and the write.
#[derive(Debug)]
pub struct Database {
    pool: SqlitePool,
    writes: Mutex<()>,
}

impl Database {
    /// Open (creating if missing) and migrate the database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = create_pool(db_path).await?;
        run_migrations(&pool).await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            writes: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    async fn migrated_pool(temp_dir: &TempDir) -> SqlitePool {
        let pool = create_pool(&temp_dir.path().join("test.db")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn insert_task(pool: &SqlitePool, id: &str) {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO tasks (id, title, type, created_at, updated_at) VALUES (?, ?, 'chore', ?, ?)",
        )
        .bind(id)
        .bind(format!("Task {}", id))
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_edge(pool: &SqlitePool, id: &str, from: &str, to: &str, kind: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_relationships (id, from_task_id, to_task_id, type, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(kind)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_create_pool_success() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = create_pool(&db_path).await;

        assert!(pool.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_run_migrations_creates_tables() {
        let temp_dir = TempDir::new().unwrap();
        let pool = migrated_pool(&temp_dir).await;

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();

        for expected in ["context_entries", "progress_items", "task_relationships", "tasks"] {
            assert!(tables.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_schema_version_marker() {
        let temp_dir = TempDir::new().unwrap();
        let pool = create_pool(&temp_dir.path().join("test.db")).await.unwrap();

        assert_eq!(schema_version(&pool).await.unwrap(), 0);
        run_migrations(&pool).await.unwrap();
        assert_eq!(schema_version(&pool).await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_run_migrations_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let pool = migrated_pool(&temp_dir).await;
        insert_task(&pool, "tkt-keep0001").await;

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(schema_version(&pool).await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_task_status_constraint() {
        let temp_dir = TempDir::new().unwrap();
        let pool = migrated_pool(&temp_dir).await;
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO tasks (id, title, type, status, created_at, updated_at) VALUES ('tkt-x', 'x', 'chore', 'todo', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_relationship_self_loop_constraint() {
        let temp_dir = TempDir::new().unwrap();
        let pool = migrated_pool(&temp_dir).await;
        insert_task(&pool, "tkt-a").await;

        assert!(insert_edge(&pool, "rel-1", "tkt-a", "tkt-a", "blocks").await.is_err());
    }

    #[tokio::test]
    async fn test_relationship_unique_triple() {
        let temp_dir = TempDir::new().unwrap();
        let pool = migrated_pool(&temp_dir).await;
        insert_task(&pool, "tkt-a").await;
        insert_task(&pool, "tkt-b").await;

        insert_edge(&pool, "rel-1", "tkt-a", "tkt-b", "blocks").await.unwrap();
        assert!(insert_edge(&pool, "rel-2", "tkt-a", "tkt-b", "blocks").await.is_err());
        insert_edge(&pool, "rel-3", "tkt-a", "tkt-b", "relates_to").await.unwrap();
    }

    #[tokio::test]
    async fn test_single_parent_index() {
        let temp_dir = TempDir::new().unwrap();
        let pool = migrated_pool(&temp_dir).await;
        for id in ["tkt-a", "tkt-b", "tkt-c"] {
            insert_task(&pool, id).await;
        }

        insert_edge(&pool, "rel-1", "tkt-a", "tkt-c", "parent_of").await.unwrap();
        assert!(insert_edge(&pool, "rel-2", "tkt-b", "tkt-c", "parent_of").await.is_err());
    }

    #[tokio::test]
    async fn test_relationship_foreign_key() {
        let temp_dir = TempDir::new().unwrap();
        let pool = migrated_pool(&temp_dir).await;
        insert_task(&pool, "tkt-a").await;

        assert!(insert_edge(&pool, "rel-1", "tkt-a", "tkt-ghost", "blocks").await.is_err());
    }

    #[tokio::test]
    async fn test_database_open_migrates() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(&temp_dir.path().join("arbeit.db")).await.unwrap();

        assert_eq!(schema_version(db.pool()).await.unwrap(), SCHEMA_VERSION);
        db.close().await;
    }
}
