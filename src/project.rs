use crate::db::Database;
use crate::error::{ArbeitError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const DATA_DIR: &str = ".arbeit";
pub const DB_FILE: &str = "arbeit.db";

/// Environment variable naming the project directory when `--dir` is absent.
pub const PROJECT_DIR_ENV: &str = "ARBEIT_PROJECT_DIR";

/// An opened project: its root directory and the store handle for it.
#[derive(Debug)]
pub struct ProjectContext {
    pub root: PathBuf,
    pub db_path: PathBuf,
    pub db: Database,
}

/// What `init_status` found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitStatus {
    pub root: PathBuf,
    pub data_dir_exists: bool,
    pub db_exists: bool,
}

impl InitStatus {
    pub fn is_initialized(&self) -> bool {
        self.data_dir_exists && self.db_exists
    }
}

/// Pick the project directory.
///
/// Search order:
/// 1. the explicit directory (`--dir`)
/// 2. `ARBEIT_PROJECT_DIR`
/// 3. the nearest ancestor of the working directory holding `.arbeit/`
/// 4. the working directory itself
pub fn resolve_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(PROJECT_DIR_ENV) {
        if !env_path.trim().is_empty() {
            tracing::debug!(dir = %env_path, "Using project directory from environment");
            return Ok(PathBuf::from(env_path));
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(find_project_root(&cwd).unwrap_or(cwd))
}

/// Nearest directory at or above `start` that contains `.arbeit/`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(DATA_DIR).is_dir())
        .map(Path::to_path_buf)
}

pub fn init_status(dir: &Path) -> InitStatus {
    let data_dir = dir.join(DATA_DIR);
    InitStatus {
        root: dir.to_path_buf(),
        data_dir_exists: data_dir.is_dir(),
        db_exists: data_dir.join(DB_FILE).is_file(),
    }
}

impl ProjectContext {
    /// Create `.arbeit/` and the database under `dir`. Safe to repeat.
    pub async fn init(dir: &Path) -> Result<Self> {
        let data_dir = dir.join(DATA_DIR);
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir)?;
        }

        let db_path = data_dir.join(DB_FILE);
        let db = Database::open(&db_path).await?;

        tracing::info!(root = %dir.display(), "Project initialized");

        Ok(Self {
            root: dir.to_path_buf(),
            db_path,
            db,
        })
    }

    /// Open an initialized project, failing with `NOT_INITIALIZED` otherwise.
    pub async fn open(dir: &Path) -> Result<Self> {
        let status = init_status(dir);
        if !status.is_initialized() {
            return Err(ArbeitError::NotInitialized(dir.display().to_string()));
        }

        let db_path = dir.join(DATA_DIR).join(DB_FILE);
        let db = Database::open(&db_path).await?;

        Ok(Self {
            root: dir.to_path_buf(),
            db_path,
            db,
        })
    }
}
