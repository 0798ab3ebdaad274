use crate::db::models::{encode_metadata, ContextEntry, ContextEntryRow, ContextType};
use crate::db::Database;
use crate::error::{ArbeitError, Result};
use crate::ids::{random_id, CONTEXT_PREFIX};
use crate::sql_constants::SELECT_CONTEXT;
use crate::tasks::TaskManager;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sqlx::SqliteConnection;

#[derive(Debug, Clone)]
pub struct NewContextEntry {
    pub context_type: ContextType,
    pub content: String,
    pub metadata: Option<Value>,
}

/// Replacement content for a stale entry.
#[derive(Debug, Clone)]
pub struct Supersede {
    pub content: String,
    /// Keeps the old entry's type when omitted.
    pub context_type: Option<ContextType>,
    /// `None` inherits the old metadata, `Some(None)` clears it.
    pub metadata: Option<Option<Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupersedeOutcome {
    pub entry: ContextEntry,
    pub superseded: ContextEntry,
}

pub struct ContextManager<'a> {
    db: &'a Database,
}

impl<'a> ContextManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn add_entry(&self, task_id: &str, input: NewContextEntry) -> Result<ContextEntry> {
        if input.content.trim().is_empty() {
            return Err(ArbeitError::InvalidInput("content must not be empty".to_string()));
        }

        let _guard = self.db.write_lock().await;
        TaskManager::new(self.db).get_live_task(task_id).await?;

        let mut conn = self.db.pool().acquire().await?;
        let id = insert_entry(
            &mut conn,
            task_id,
            input.context_type,
            &input.content,
            encode_metadata(input.metadata.as_ref())?,
        )
        .await?;

        crate::log_task_operation!("add_context", task_id, input.context_type.as_str());

        self.get_entry(&id).await
    }

    pub async fn get_entry(&self, id: &str) -> Result<ContextEntry> {
        let row = sqlx::query_as::<_, ContextEntryRow>(const_format::formatcp!(
            "{} WHERE id = ?",
            SELECT_CONTEXT
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| ArbeitError::EntryNotFound(id.to_string()))?;

        row.try_into()
    }

    /// Entries for a task, oldest first. Superseded entries are hidden
    /// unless `include_superseded` is set.
    pub async fn list_entries(
        &self,
        task_id: &str,
        include_superseded: bool,
    ) -> Result<Vec<ContextEntry>> {
        TaskManager::new(self.db).get_task(task_id).await?;

        let query = if include_superseded {
            const_format::formatcp!("{} WHERE task_id = ? ORDER BY rowid", SELECT_CONTEXT)
        } else {
            const_format::formatcp!(
                "{} WHERE task_id = ? AND superseded_by IS NULL ORDER BY rowid",
                SELECT_CONTEXT
            )
        };

        let rows = sqlx::query_as::<_, ContextEntryRow>(query)
            .bind(task_id)
            .fetch_all(self.db.pool())
            .await?;

        rows.into_iter().map(ContextEntry::try_from).collect()
    }

    /// Replace `entry_id` with a new entry on the same task.
    ///
    /// The old row is never edited beyond its forward pointer, and the
    /// pointer is set at most once.
    pub async fn supersede(&self, entry_id: &str, input: Supersede) -> Result<SupersedeOutcome> {
        if input.content.trim().is_empty() {
            return Err(ArbeitError::InvalidInput("content must not be empty".to_string()));
        }

        let _guard = self.db.write_lock().await;
        let old = self.get_entry(entry_id).await?;
        if old.superseded_by.is_some() {
            return Err(ArbeitError::AlreadySuperseded(entry_id.to_string()));
        }
        TaskManager::new(self.db).get_live_task(&old.task_id).await?;

        let metadata = match input.metadata {
            None => old.metadata.clone(),
            Some(explicit) => explicit,
        };
        let context_type = input.context_type.unwrap_or(old.context_type);

        let mut tx = self.db.pool().begin().await?;
        let new_id = insert_entry(
            &mut tx,
            &old.task_id,
            context_type,
            &input.content,
            encode_metadata(metadata.as_ref())?,
        )
        .await?;

        let result = sqlx::query(
            "UPDATE context_entries SET superseded_by = ? WHERE id = ? AND superseded_by IS NULL",
        )
        .bind(&new_id)
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ArbeitError::ContextSupersedeFailed(entry_id.to_string()));
        }
        tx.commit().await?;

        crate::log_task_operation!("supersede_context", old.task_id.as_str(), entry_id);

        Ok(SupersedeOutcome {
            entry: self.get_entry(&new_id).await?,
            superseded: self.get_entry(entry_id).await?,
        })
    }
}

async fn insert_entry(
    conn: &mut SqliteConnection,
    task_id: &str,
    context_type: ContextType,
    content: &str,
    metadata: Option<String>,
) -> Result<String> {
    let id = random_id(CONTEXT_PREFIX);
    let result = sqlx::query(
        r#"
        INSERT INTO context_entries (id, task_id, type, content, metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(task_id)
    .bind(context_type.as_str())
    .bind(content)
    .bind(metadata)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ArbeitError::ContextCreateFailed);
    }
    Ok(id)
}
