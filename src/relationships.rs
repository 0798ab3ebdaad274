//! Relationship validation and storage.
//!
//! Every write goes through [`RelationshipManager::validate`], which checks in
//! a fixed order and stops at the first failure:
//!
//! 1. the type is a known spelling (`INVALID_TYPE`)
//! 2. the endpoints differ (`CIRCULAR_DEPENDENCY`)
//! 3. normalization to the canonical triple
//! 4. both endpoints are live tasks (`TASK_NOT_FOUND`)
//! 5. the canonical triple is new (`RELATIONSHIP_EXISTS`)
//! 6. `parent_of`: no cycle, depth within bounds, single parent
//! 7. `blocks`: no cycle

use crate::db::models::{encode_metadata, Relationship, RelationshipRow, RelationshipType};
use crate::db::Database;
use crate::error::{ArbeitError, Result};
use crate::graph::{check_blocking, check_hierarchy, TaskGraph};
use crate::ids::{random_id, RELATIONSHIP_PREFIX};
use crate::normalize::{normalize, NormalizedRelationship, RelationshipInputType};
use crate::sql_constants::{
    CHECK_LIVE_TASK_EXISTS, CHECK_RELATIONSHIP_EXISTS, INSERT_RELATIONSHIP, SELECT_PARENT_ID,
    SELECT_RELATIONSHIP,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqliteConnection;

/// Insert one canonical edge on an open connection or transaction.
pub(crate) async fn insert_edge(
    conn: &mut SqliteConnection,
    from_task_id: &str,
    to_task_id: &str,
    relationship_type: RelationshipType,
    metadata: Option<String>,
    now: DateTime<Utc>,
) -> Result<String> {
    let id = random_id(RELATIONSHIP_PREFIX);
    let result = sqlx::query(INSERT_RELATIONSHIP)
        .bind(&id)
        .bind(from_task_id)
        .bind(to_task_id)
        .bind(relationship_type.as_str())
        .bind(metadata)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ArbeitError::RelationshipCreateFailed);
    }
    Ok(id)
}

/// Bump `updated_at` on the task whose `parent_id` or `blocked_by` an edge
/// of this type feeds. Other types leave both tasks untouched.
async fn touch_target(
    conn: &mut SqliteConnection,
    to_task_id: &str,
    relationship_type: RelationshipType,
    now: DateTime<Utc>,
) -> Result<()> {
    if matches!(
        relationship_type,
        RelationshipType::ParentOf | RelationshipType::Blocks
    ) {
        sqlx::query("UPDATE tasks SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(to_task_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub struct RelationshipManager<'a> {
    db: &'a Database,
}

impl<'a> RelationshipManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Validate a prospective edge and return its canonical form.
    pub async fn validate(
        &self,
        from_task_id: &str,
        to_task_id: &str,
        relationship_type: &str,
    ) -> Result<NormalizedRelationship> {
        let input: RelationshipInputType = relationship_type.parse()?;

        if from_task_id == to_task_id {
            return Err(ArbeitError::CircularDependency {
                from_task_id: from_task_id.to_string(),
                to_task_id: to_task_id.to_string(),
            });
        }

        let edge = normalize(from_task_id, to_task_id, input);

        for id in [&edge.from_task_id, &edge.to_task_id] {
            if !self.task_is_live(id).await? {
                return Err(ArbeitError::TaskNotFound(id.clone()));
            }
        }

        if self.relationship_exists(&edge).await? {
            return Err(ArbeitError::RelationshipExists {
                from_task_id: edge.from_task_id.clone(),
                to_task_id: edge.to_task_id.clone(),
                relationship_type: edge.relationship_type.to_string(),
            });
        }

        match edge.relationship_type {
            RelationshipType::ParentOf => {
                let graph = TaskGraph::load(self.db, RelationshipType::ParentOf).await?;
                check_hierarchy(&graph, &edge.from_task_id, &edge.to_task_id)?;

                let existing: Option<String> = sqlx::query_scalar(SELECT_PARENT_ID)
                    .bind(&edge.to_task_id)
                    .fetch_optional(self.db.pool())
                    .await?;
                if let Some(parent_id) = existing {
                    return Err(ArbeitError::MultipleParents {
                        task_id: edge.to_task_id.clone(),
                        parent_id,
                    });
                }
            },
            RelationshipType::Blocks => {
                let graph = TaskGraph::load(self.db, RelationshipType::Blocks).await?;
                check_blocking(&graph, &edge.from_task_id, &edge.to_task_id)?;
            },
            _ => {},
        }

        Ok(edge)
    }

    /// Validate and store an edge given in any spelling.
    pub async fn add_relationship(
        &self,
        from_task_id: &str,
        to_task_id: &str,
        relationship_type: &str,
        metadata: Option<Value>,
    ) -> Result<Relationship> {
        let _guard = self.db.write_lock().await;
        let edge = self
            .validate(from_task_id, to_task_id, relationship_type)
            .await
            .inspect_err(|e| {
                tracing::debug!(
                    from = from_task_id,
                    to = to_task_id,
                    relationship_type,
                    code = e.to_error_code(),
                    "Relationship rejected"
                );
            })?;

        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;
        let id = insert_edge(
            &mut tx,
            &edge.from_task_id,
            &edge.to_task_id,
            edge.relationship_type,
            encode_metadata(metadata.as_ref())?,
            now,
        )
        .await?;
        touch_target(&mut tx, &edge.to_task_id, edge.relationship_type, now).await?;
        tx.commit().await?;

        crate::log_task_operation!(
            "add_relationship",
            edge.from_task_id.as_str(),
            edge.relationship_type.as_str()
        );

        self.get_relationship(&id).await
    }

    /// Remove an edge given in any spelling. Returns whether a row was removed.
    pub async fn remove_relationship(
        &self,
        from_task_id: &str,
        to_task_id: &str,
        relationship_type: &str,
    ) -> Result<bool> {
        let input: RelationshipInputType = relationship_type.parse()?;
        let edge = normalize(from_task_id, to_task_id, input);

        let _guard = self.db.write_lock().await;
        let mut tx = self.db.pool().begin().await?;
        let result = sqlx::query(
            "DELETE FROM task_relationships WHERE from_task_id = ? AND to_task_id = ? AND type = ?",
        )
        .bind(&edge.from_task_id)
        .bind(&edge.to_task_id)
        .bind(edge.relationship_type.as_str())
        .execute(&mut *tx)
        .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            touch_target(&mut tx, &edge.to_task_id, edge.relationship_type, Utc::now()).await?;
        }
        tx.commit().await?;

        if removed {
            crate::log_task_operation!(
                "remove_relationship",
                edge.from_task_id.as_str(),
                edge.relationship_type.as_str()
            );
        }
        Ok(removed)
    }

    pub async fn get_relationship(&self, id: &str) -> Result<Relationship> {
        let row = sqlx::query_as::<_, RelationshipRow>(const_format::formatcp!(
            "{} WHERE id = ?",
            SELECT_RELATIONSHIP
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or(ArbeitError::RelationshipCreateFailed)?;

        row.try_into()
    }

    /// Every edge touching `task_id`, in either direction, oldest first.
    pub async fn relationships_for_task(&self, task_id: &str) -> Result<Vec<Relationship>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?)")
            .bind(task_id)
            .fetch_one(self.db.pool())
            .await?;
        if !exists {
            return Err(ArbeitError::TaskNotFound(task_id.to_string()));
        }

        let rows = sqlx::query_as::<_, RelationshipRow>(const_format::formatcp!(
            "{} WHERE from_task_id = ? OR to_task_id = ? ORDER BY rowid",
            SELECT_RELATIONSHIP
        ))
        .bind(task_id)
        .bind(task_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(Relationship::try_from).collect()
    }

    pub async fn relationship_exists(&self, edge: &NormalizedRelationship) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(CHECK_RELATIONSHIP_EXISTS)
            .bind(&edge.from_task_id)
            .bind(&edge.to_task_id)
            .bind(edge.relationship_type.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(exists)
    }

    async fn task_is_live(&self, id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(CHECK_LIVE_TASK_EXISTS)
            .bind(id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(exists)
    }
}
