use crate::db::models::{ProgressItem, ProgressSummary};
use crate::db::Database;
use crate::error::{ArbeitError, Result};
use crate::ids::{random_id, PROGRESS_PREFIX};
use crate::sql_constants::SELECT_PROGRESS;
use crate::tasks::TaskManager;
use chrono::Utc;
use sqlx::QueryBuilder;
use std::collections::{HashMap, HashSet};

pub struct ProgressManager<'a> {
    db: &'a Database,
}

impl<'a> ProgressManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Add items in one transaction, optionally already completed.
    pub async fn add_items(
        &self,
        task_id: &str,
        items: &[String],
        completed: bool,
    ) -> Result<Vec<ProgressItem>> {
        let _guard = self.db.write_lock().await;
        TaskManager::new(self.db).get_live_task(task_id).await?;
        if items.is_empty() {
            return Err(ArbeitError::NoChangesMade("no progress items provided".to_string()));
        }
        if items.iter().any(|item| item.trim().is_empty()) {
            return Err(ArbeitError::InvalidInput(
                "progress items must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let completed_at = completed.then_some(now);
        let mut ids = Vec::with_capacity(items.len());

        let mut tx = self.db.pool().begin().await?;
        for content in items {
            let id = random_id(PROGRESS_PREFIX);
            sqlx::query(
                r#"
                INSERT INTO progress_items (id, task_id, content, completed, created_at, completed_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(task_id)
            .bind(content)
            .bind(completed)
            .bind(now)
            .bind(completed_at)
            .execute(&mut *tx)
            .await?;
            ids.push(id);
        }
        tx.commit().await?;

        crate::log_task_operation!("add_progress", task_id, ids.len());

        self.fetch_items(&ids).await
    }

    /// Complete items by id.
    ///
    /// Every id is checked before anything is written; missing ids are all
    /// reported together. Completing an item twice keeps its first
    /// `completed_at`.
    pub async fn complete_items(&self, item_ids: &[String]) -> Result<Vec<ProgressItem>> {
        if item_ids.is_empty() {
            return Err(ArbeitError::NoChangesMade(
                "no progress item ids provided".to_string(),
            ));
        }

        let _guard = self.db.write_lock().await;
        let existing: HashSet<String> = self
            .fetch_items(item_ids)
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();

        let mut missing: Vec<String> = Vec::new();
        for id in item_ids {
            if !existing.contains(id) && !missing.contains(id) {
                missing.push(id.clone());
            }
        }
        if !missing.is_empty() {
            return Err(ArbeitError::ItemNotFound(missing));
        }

        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;
        for id in item_ids {
            sqlx::query(
                "UPDATE progress_items SET completed = 1, completed_at = COALESCE(completed_at, ?) WHERE id = ?",
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(count = item_ids.len(), "Progress items completed");

        self.fetch_items(item_ids).await
    }

    pub async fn list_items(&self, task_id: &str) -> Result<Vec<ProgressItem>> {
        TaskManager::new(self.db).get_task(task_id).await?;
        let items = sqlx::query_as::<_, ProgressItem>(const_format::formatcp!(
            "{} WHERE task_id = ? ORDER BY rowid",
            SELECT_PROGRESS
        ))
        .bind(task_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(items)
    }

    pub async fn summary(&self, task_id: &str) -> Result<ProgressSummary> {
        let (completed, remaining) = self
            .list_items(task_id)
            .await?
            .into_iter()
            .partition(|item| item.completed);
        Ok(ProgressSummary {
            completed,
            remaining,
        })
    }

    /// Items by id in the order of `ids`, skipping unknown and repeated ids.
    async fn fetch_items(&self, ids: &[String]) -> Result<Vec<ProgressItem>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(SELECT_PROGRESS);
        builder.push(" WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");

        let mut by_id: HashMap<String, ProgressItem> = builder
            .build_query_as::<ProgressItem>()
            .fetch_all(self.db.pool())
            .await?
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}
