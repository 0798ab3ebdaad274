use crate::db::models::{encode_metadata, RelationshipType, Task, TaskRow, TaskStatus, TaskType};
use crate::db::Database;
use crate::error::{ArbeitError, Result};
use crate::graph::{check_blocking, check_hierarchy, TaskGraph};
use crate::ids::{random_id, TASK_PREFIX};
use crate::lifecycle::{
    ensure_blockers_exist, ensure_unblocked, is_blank, missing_for_create, missing_for_transition,
    validate_blocker_list, CreateOutcome, TaskFields, TransitionOutcome,
};
use crate::relationships::insert_edge;
use crate::sql_constants::{
    CHECK_LIVE_TASK_EXISTS, COUNT_LIVE_CHILDREN, SELECT_BLOCKERS, SELECT_BLOCKERS_IN, SELECT_TASK,
    SELECT_TASK_BY_ID,
};
use crate::templates;
use chrono::Utc;
use serde_json::Value;
use sqlx::QueryBuilder;
use std::collections::HashMap;

/// Bound parameters per blocker lookup when hydrating a listing.
const HYDRATE_CHUNK: usize = 500;

/// Input for [`TaskManager::create_task`].
///
/// The type comes from `task_type`, or from `template` when no type is given.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub task_type: Option<TaskType>,
    pub template: Option<String>,
    pub status: Option<TaskStatus>,
    pub intent: Option<String>,
    pub description: Option<String>,
    pub plan: Option<String>,
    pub parent_id: Option<String>,
    pub blocked_by: Vec<String>,
    pub metadata: Option<Value>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            title: title.into(),
            task_type: Some(task_type),
            ..Default::default()
        }
    }

    pub fn from_template(title: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            template: Some(template.into()),
            ..Default::default()
        }
    }

    fn resolve_type(&self) -> Result<TaskType> {
        let from_template = match &self.template {
            Some(name) => Some(templates::template(name)?.task_type),
            None => None,
        };

        self.task_type.or(from_template).ok_or_else(|| {
            ArbeitError::InvalidType("a task needs either a type or a template".to_string())
        })
    }
}

/// Partial update for [`TaskManager::update_task`]. Omitted fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub intent: Option<String>,
    pub description: Option<String>,
    pub plan: Option<String>,
    /// `Some(None)` detaches the task from its parent.
    pub parent_id: Option<Option<String>>,
    /// Replaces the whole blocker list.
    pub blocked_by: Option<Vec<String>>,
    /// `Some(None)` clears the metadata.
    pub metadata: Option<Option<Value>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.task_type.is_none()
            && self.status.is_none()
            && self.intent.is_none()
            && self.description.is_none()
            && self.plan.is_none()
            && self.parent_id.is_none()
            && self.blocked_by.is_none()
            && self.metadata.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Empty means every status except `deleted`.
    pub statuses: Vec<TaskStatus>,
    pub task_type: Option<TaskType>,
    /// `Some(None)` restricts the listing to root tasks.
    pub parent_id: Option<Option<String>>,
}

pub struct TaskManager<'a> {
    db: &'a Database,
}

impl<'a> TaskManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create a task, its parent edge and its blocker edges in one transaction.
    ///
    /// Missing type-specific fields do not fail the call; they come back in
    /// [`CreateOutcome::missing_fields`].
    pub async fn create_task(&self, input: NewTask) -> Result<CreateOutcome> {
        let task_type = input.resolve_type()?;
        if input.title.trim().is_empty() {
            return Err(ArbeitError::InvalidInput("title must not be empty".to_string()));
        }
        let status = input.status.unwrap_or(TaskStatus::Open);
        if status == TaskStatus::Deleted {
            return Err(ArbeitError::InvalidStatus(
                "a task cannot be created as deleted".to_string(),
            ));
        }

        let id = random_id(TASK_PREFIX);
        validate_blocker_list(&id, &input.blocked_by)?;

        let _guard = self.db.write_lock().await;

        if let Some(parent_id) = &input.parent_id {
            if !self.task_is_live(parent_id).await? {
                return Err(ArbeitError::ParentNotFound(parent_id.clone()));
            }
        }
        ensure_blockers_exist(self.db, &input.blocked_by).await?;

        if let Some(parent_id) = &input.parent_id {
            let graph = TaskGraph::load(self.db, RelationshipType::ParentOf).await?;
            check_hierarchy(&graph, parent_id, &id)?;
        }
        if status == TaskStatus::Completed {
            ensure_unblocked(self.db, &input.blocked_by).await?;
        }

        let now = Utc::now();
        let metadata = encode_metadata(input.metadata.as_ref())?;
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (id, title, type, status, intent, description, plan, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&input.title)
        .bind(task_type.as_str())
        .bind(status.as_str())
        .bind(&input.intent)
        .bind(&input.description)
        .bind(&input.plan)
        .bind(metadata)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ArbeitError::TaskCreateFailed);
        }

        if let Some(parent_id) = &input.parent_id {
            insert_edge(&mut tx, parent_id, &id, RelationshipType::ParentOf, None, now).await?;
        }
        for blocker in &input.blocked_by {
            insert_edge(&mut tx, blocker, &id, RelationshipType::Blocks, None, now).await?;
        }
        tx.commit().await?;

        crate::log_task_operation!("create_task", id.as_str(), task_type.as_str());

        let task = self.get_task(&id).await?;
        let missing_fields = missing_for_create(&TaskFields::from(&task));
        let template = is_blank(task.plan.as_deref()).then(|| templates::template_for(task_type));

        Ok(CreateOutcome {
            task,
            missing_fields,
            template,
        })
    }

    /// Get a task by id. Soft-deleted tasks are still returned.
    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.find_task(id)
            .await?
            .ok_or_else(|| ArbeitError::TaskNotFound(id.to_string()))
    }

    pub async fn find_task(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(SELECT_TASK_BY_ID)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let blocked_by: Vec<String> = sqlx::query_scalar(SELECT_BLOCKERS)
            .bind(id)
            .fetch_all(self.db.pool())
            .await?;

        row.into_task(blocked_by).map(Some)
    }

    /// Get a task that may still be mutated; deleted tasks read as missing.
    pub async fn get_live_task(&self, id: &str) -> Result<Task> {
        match self.find_task(id).await? {
            Some(task) if !task.is_deleted() => Ok(task),
            _ => Err(ArbeitError::TaskNotFound(id.to_string())),
        }
    }

    pub async fn task_is_live(&self, id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(CHECK_LIVE_TASK_EXISTS)
            .bind(id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(exists)
    }

    /// Apply a patch, running the lifecycle checks for any status change.
    ///
    /// A status change into `in_progress` or `completed` with missing
    /// required fields is returned as [`TransitionOutcome::Rejected`] and
    /// nothing is written.
    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<TransitionOutcome> {
        if patch.is_empty() {
            return Err(ArbeitError::NoChangesMade(format!(
                "no fields to update for task {}",
                id
            )));
        }

        let _guard = self.db.write_lock().await;
        let task = self.get_live_task(id).await?;

        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ArbeitError::InvalidInput("title must not be empty".to_string()));
        }
        if patch.status == Some(TaskStatus::Deleted) {
            return Err(ArbeitError::InvalidStatus(
                "use task_delete to delete a task".to_string(),
            ));
        }
        if let Some(Some(parent_id)) = &patch.parent_id {
            if parent_id == id {
                return Err(ArbeitError::CircularDependency {
                    from_task_id: parent_id.clone(),
                    to_task_id: id.to_string(),
                });
            }
            if !self.task_is_live(parent_id).await? {
                return Err(ArbeitError::ParentNotFound(parent_id.clone()));
            }
        }
        if let Some(blockers) = &patch.blocked_by {
            validate_blocker_list(id, blockers)?;
            ensure_blockers_exist(self.db, blockers).await?;
        }

        let merged = merge(&task, &patch);
        let target = patch.status.filter(|status| *status != task.status);

        if target == Some(TaskStatus::Completed) {
            ensure_unblocked(self.db, &merged.blocked_by).await?;
        }
        if let Some(target) = target {
            let missing_fields = missing_for_transition(&TaskFields::from(&merged), target);
            if !missing_fields.is_empty() {
                tracing::debug!(
                    task_id = id,
                    status = %target,
                    missing = ?missing_fields,
                    "Status change rejected"
                );
                return Ok(TransitionOutcome::Rejected {
                    task,
                    missing_fields,
                });
            }
        }

        if let Some(parent) = &patch.parent_id {
            let mut graph = TaskGraph::load(self.db, RelationshipType::ParentOf).await?;
            graph.remove_incoming(id);
            if let Some(parent_id) = parent {
                check_hierarchy(&graph, parent_id, id)?;
            }
        }
        if let Some(blockers) = &patch.blocked_by {
            let mut graph = TaskGraph::load(self.db, RelationshipType::Blocks).await?;
            graph.remove_incoming(id);
            for blocker in blockers {
                check_blocking(&graph, blocker, id)?;
                graph.add_edge(blocker, id);
            }
        }

        let now = Utc::now();
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE tasks SET updated_at = ");
        builder.push_bind(now);

        if let Some(title) = &patch.title {
            builder.push(", title = ").push_bind(title.clone());
        }
        if let Some(task_type) = patch.task_type {
            builder.push(", type = ").push_bind(task_type.as_str());
        }
        if let Some(status) = patch.status {
            builder.push(", status = ").push_bind(status.as_str());
        }
        if let Some(intent) = &patch.intent {
            builder.push(", intent = ").push_bind(intent.clone());
        }
        if let Some(description) = &patch.description {
            builder.push(", description = ").push_bind(description.clone());
        }
        if let Some(plan) = &patch.plan {
            builder.push(", plan = ").push_bind(plan.clone());
        }
        if let Some(metadata) = &patch.metadata {
            builder
                .push(", metadata = ")
                .push_bind(encode_metadata(metadata.as_ref())?);
        }
        builder.push(" WHERE id = ").push_bind(id.to_string());

        let mut tx = self.db.pool().begin().await?;
        let result = builder.build().execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(ArbeitError::TaskUpdateFailed(id.to_string()));
        }

        if let Some(parent) = &patch.parent_id {
            sqlx::query("DELETE FROM task_relationships WHERE to_task_id = ? AND type = 'parent_of'")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if let Some(parent_id) = parent {
                insert_edge(&mut tx, parent_id, id, RelationshipType::ParentOf, None, now).await?;
            }
        }
        if let Some(blockers) = &patch.blocked_by {
            sqlx::query("DELETE FROM task_relationships WHERE to_task_id = ? AND type = 'blocks'")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            for blocker in blockers {
                insert_edge(&mut tx, blocker, id, RelationshipType::Blocks, None, now).await?;
            }
        }
        tx.commit().await?;

        crate::log_task_operation!("update_task", id);

        Ok(TransitionOutcome::Accepted {
            task: self.get_task(id).await?,
        })
    }

    /// Soft delete. Deleting an already deleted task succeeds without changes.
    pub async fn delete_task(&self, id: &str) -> Result<Task> {
        let _guard = self.db.write_lock().await;
        let task = self.get_task(id).await?;
        if task.is_deleted() {
            return Ok(task);
        }

        if self.task_has_children(id).await? {
            return Err(ArbeitError::HasChildren(id.to_string()));
        }

        let result = sqlx::query("UPDATE tasks SET status = 'deleted', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(ArbeitError::TaskDeleteFailed(id.to_string()));
        }

        crate::log_task_operation!("delete_task", id);

        self.get_task(id).await
    }

    /// Whether `id` has children that are not deleted.
    pub async fn task_has_children(&self, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(COUNT_LIVE_CHILDREN)
            .bind(id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count > 0)
    }

    /// List tasks in creation order. Deleted tasks only appear when the
    /// filter asks for them by status.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(SELECT_TASK);
        builder.push(" WHERE 1=1");

        if filter.statuses.is_empty() {
            builder.push(" AND t.status != 'deleted'");
        } else {
            builder.push(" AND t.status IN (");
            let mut separated = builder.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }

        if let Some(task_type) = filter.task_type {
            builder.push(" AND t.type = ").push_bind(task_type.as_str());
        }

        match &filter.parent_id {
            Some(Some(parent_id)) => {
                builder
                    .push(
                        " AND EXISTS (SELECT 1 FROM task_relationships pr \
                         WHERE pr.to_task_id = t.id AND pr.type = 'parent_of' AND pr.from_task_id = ",
                    )
                    .push_bind(parent_id.clone())
                    .push(")");
            },
            Some(None) => {
                builder.push(
                    " AND NOT EXISTS (SELECT 1 FROM task_relationships pr \
                     WHERE pr.to_task_id = t.id AND pr.type = 'parent_of')",
                );
            },
            None => {},
        }

        builder.push(" ORDER BY t.rowid");

        let rows = builder
            .build_query_as::<TaskRow>()
            .fetch_all(self.db.pool())
            .await?;
        self.hydrate(rows).await
    }

    /// Tasks that are `open` or `in_progress`.
    pub async fn active_tasks(&self, parent_id: Option<Option<String>>) -> Result<Vec<Task>> {
        self.list_tasks(&TaskFilter {
            statuses: vec![TaskStatus::Open, TaskStatus::InProgress],
            task_type: None,
            parent_id,
        })
        .await
    }

    pub async fn children_of(&self, id: &str) -> Result<Vec<Task>> {
        self.get_task(id).await?;
        self.list_tasks(&TaskFilter {
            parent_id: Some(Some(id.to_string())),
            ..Default::default()
        })
        .await
    }

    /// Ids of every live task below `id`, breadth-first.
    pub async fn descendants_of(&self, id: &str) -> Result<Vec<String>> {
        self.get_task(id).await?;
        let graph = TaskGraph::load(self.db, RelationshipType::ParentOf).await?;
        Ok(graph.descendants(id))
    }

    /// Ids of the parent chain above `id`, nearest first.
    pub async fn ancestors_of(&self, id: &str) -> Result<Vec<String>> {
        self.get_task(id).await?;
        let graph = TaskGraph::load(self.db, RelationshipType::ParentOf).await?;
        Ok(graph.ancestors(id))
    }

    /// Live tasks with at least one `open` or `in_progress` blocker.
    pub async fn blocked_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(SELECT_TASK);
        builder.push(
            " WHERE t.status != 'deleted' AND EXISTS (SELECT 1 FROM task_relationships r \
             JOIN tasks b ON b.id = r.from_task_id \
             WHERE r.to_task_id = t.id AND r.type = 'blocks' AND b.status IN ('open', 'in_progress'))",
        );
        if let Some(status) = status {
            builder.push(" AND t.status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY t.rowid");

        let rows = builder
            .build_query_as::<TaskRow>()
            .fetch_all(self.db.pool())
            .await?;
        self.hydrate(rows).await
    }

    /// Unresolved tasks that hold up at least one live task.
    pub async fn blocking_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(SELECT_TASK);
        builder.push(
            " WHERE t.status IN ('open', 'in_progress') AND EXISTS (SELECT 1 FROM task_relationships r \
             JOIN tasks d ON d.id = r.to_task_id \
             WHERE r.from_task_id = t.id AND r.type = 'blocks' AND d.status != 'deleted')",
        );
        if let Some(status) = status {
            builder.push(" AND t.status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY t.rowid");

        let rows = builder
            .build_query_as::<TaskRow>()
            .fetch_all(self.db.pool())
            .await?;
        self.hydrate(rows).await
    }

    /// The tasks named in `id`'s `blocked_by`, in list order.
    pub async fn blockers_of(&self, id: &str) -> Result<Vec<Task>> {
        let task = self.get_task(id).await?;
        self.fetch_many(&task.blocked_by).await
    }

    /// Live tasks that list `id` as a blocker.
    pub async fn dependents_of(&self, id: &str) -> Result<Vec<Task>> {
        self.get_task(id).await?;
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT r.to_task_id FROM task_relationships r JOIN tasks d ON d.id = r.to_task_id \
             WHERE r.from_task_id = ? AND r.type = 'blocks' AND d.status != 'deleted' ORDER BY r.rowid",
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await?;
        self.fetch_many(&ids).await
    }

    /// Fetch tasks by id, keeping the order of `ids` and skipping unknown ids.
    pub async fn fetch_many(&self, ids: &[String]) -> Result<Vec<Task>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(SELECT_TASK);
        builder.push(" WHERE t.id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<TaskRow>()
            .fetch_all(self.db.pool())
            .await?;
        let mut by_id: HashMap<String, Task> = self
            .hydrate(rows)
            .await?
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn hydrate(&self, rows: Vec<TaskRow>) -> Result<Vec<Task>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut blockers: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in rows.chunks(HYDRATE_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(SELECT_BLOCKERS_IN);
            let mut separated = builder.separated(", ");
            for row in chunk {
                separated.push_bind(row.id.as_str());
            }
            separated.push_unseparated(") ORDER BY rowid");

            let edges: Vec<(String, String)> = builder
                .build_query_as()
                .fetch_all(self.db.pool())
                .await?;
            for (blocked, blocker) in edges {
                blockers.entry(blocked).or_default().push(blocker);
            }
        }

        rows.into_iter()
            .map(|row| {
                let blocked_by = blockers.remove(&row.id).unwrap_or_default();
                row.into_task(blocked_by)
            })
            .collect()
    }
}

/// The task as it would look after `patch`, for validation only.
fn merge(task: &Task, patch: &TaskPatch) -> Task {
    let mut merged = task.clone();
    if let Some(title) = &patch.title {
        merged.title = title.clone();
    }
    if let Some(task_type) = patch.task_type {
        merged.task_type = task_type;
    }
    if let Some(status) = patch.status {
        merged.status = status;
    }
    if let Some(intent) = &patch.intent {
        merged.intent = Some(intent.clone());
    }
    if let Some(description) = &patch.description {
        merged.description = Some(description.clone());
    }
    if let Some(plan) = &patch.plan {
        merged.plan = Some(plan.clone());
    }
    if let Some(parent_id) = &patch.parent_id {
        merged.parent_id = parent_id.clone();
    }
    if let Some(blocked_by) = &patch.blocked_by {
        merged.blocked_by = blocked_by.clone();
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::TestContext;

    fn feature(title: &str) -> NewTask {
        NewTask {
            intent: Some("Why it matters".to_string()),
            description: Some("What it is".to_string()),
            plan: Some("- do it".to_string()),
            ..NewTask::new(title, TaskType::Feature)
        }
    }

    async fn create(manager: &TaskManager<'_>, input: NewTask) -> Task {
        manager.create_task(input).await.unwrap().task
    }

    #[tokio::test]
    async fn test_create_task_defaults() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());

        let outcome = manager.create_task(feature("Parser")).await.unwrap();
        let task = outcome.task;

        assert!(task.id.starts_with("tkt-"));
        assert_eq!(task.status, TaskStatus::Open);
        assert_eq!(task.task_type, TaskType::Feature);
        assert!(task.parent_id.is_none());
        assert!(task.blocked_by.is_empty());
        assert!(task.execution.steps.is_empty());
        assert!(outcome.missing_fields.is_empty());
        assert!(outcome.template.is_none());
    }

    #[tokio::test]
    async fn test_create_task_reports_missing_fields_and_template() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());

        let outcome = manager
            .create_task(NewTask::from_template("Flaky test", "bug"))
            .await
            .unwrap();

        assert_eq!(outcome.task.task_type, TaskType::Bug);
        assert_eq!(outcome.missing_fields, vec!["intent", "description", "plan"]);
        assert_eq!(outcome.template.map(|t| t.name), Some("bug"));
    }

    #[tokio::test]
    async fn test_create_task_rejects_bad_input() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());

        let err = manager
            .create_task(NewTask::from_template("x", "story"))
            .await
            .unwrap_err();
        assert_eq!(err.to_error_code(), "INVALID_TEMPLATE");

        let err = manager
            .create_task(NewTask {
                title: "untyped".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_error_code(), "INVALID_TYPE");

        let err = manager
            .create_task(NewTask::new("  ", TaskType::Chore))
            .await
            .unwrap_err();
        assert_eq!(err.to_error_code(), "INVALID_INPUT");

        let mut orphan = NewTask::new("orphan", TaskType::Chore);
        orphan.parent_id = Some("tkt-missing0".to_string());
        let err = manager.create_task(orphan).await.unwrap_err();
        assert_eq!(err.to_error_code(), "PARENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_create_task_blocker_validation() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let blocker = create(&manager, NewTask::new("blocker", TaskType::Chore)).await;

        let mut dup = NewTask::new("dup", TaskType::Chore);
        dup.blocked_by = vec![blocker.id.clone(), blocker.id.clone()];
        let err = manager.create_task(dup).await.unwrap_err();
        assert_eq!(err.to_error_code(), "DUPLICATE_BLOCKERS");

        let mut missing = NewTask::new("missing", TaskType::Chore);
        missing.blocked_by = vec!["tkt-nope0001".to_string(), "tkt-nope0002".to_string()];
        let err = manager.create_task(missing).await.unwrap_err();
        assert_eq!(err.to_error_code(), "BLOCKER_NOT_FOUND");
        assert!(err.to_string().contains("tkt-nope0001, tkt-nope0002"));

        let mut ok = NewTask::new("blocked", TaskType::Chore);
        ok.blocked_by = vec![blocker.id.clone()];
        let task = create(&manager, ok).await;
        assert_eq!(task.blocked_by, vec![blocker.id]);
    }

    #[tokio::test]
    async fn test_create_with_parent_respects_depth() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());

        let mut parent = create(&manager, NewTask::new("L0", TaskType::Epic)).await;
        for level in 1..=4 {
            let mut child = NewTask::new(format!("L{}", level), TaskType::Chore);
            child.parent_id = Some(parent.id.clone());
            parent = create(&manager, child).await;
        }

        let mut too_deep = NewTask::new("L5", TaskType::Chore);
        too_deep.parent_id = Some(parent.id.clone());
        let err = manager.create_task(too_deep).await.unwrap_err();
        assert_eq!(err.to_error_code(), "MAX_DEPTH_EXCEEDED");
    }

    #[tokio::test]
    async fn test_update_task_fields() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let task = create(&manager, NewTask::new("Draft", TaskType::Chore)).await;

        let outcome = manager
            .update_task(
                &task.id,
                TaskPatch {
                    title: Some("Final".to_string()),
                    plan: Some("- steps".to_string()),
                    metadata: Some(Some(serde_json::json!({"source": "review"}))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(outcome.is_accepted());
        let updated = outcome.task();
        assert_eq!(updated.title, "Final");
        assert_eq!(updated.plan.as_deref(), Some("- steps"));
        assert_eq!(updated.metadata.as_ref().unwrap()["source"], "review");
        assert!(updated.updated_at >= task.updated_at);
    }

    #[tokio::test]
    async fn test_update_task_empty_patch() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let task = create(&manager, NewTask::new("x", TaskType::Chore)).await;

        let err = manager.update_task(&task.id, TaskPatch::default()).await.unwrap_err();
        assert_eq!(err.to_error_code(), "NO_CHANGES_MADE");

        let err = manager
            .update_task(&task.id, TaskPatch::status(TaskStatus::Deleted))
            .await
            .unwrap_err();
        assert_eq!(err.to_error_code(), "INVALID_STATUS");
    }

    #[tokio::test]
    async fn test_status_change_rejected_when_fields_missing() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let task = create(&manager, NewTask::new("Bare bug", TaskType::Bug)).await;

        let outcome = manager
            .update_task(&task.id, TaskPatch::status(TaskStatus::InProgress))
            .await
            .unwrap();

        match &outcome {
            TransitionOutcome::Rejected {
                task: unchanged,
                missing_fields,
            } => {
                assert_eq!(unchanged.status, TaskStatus::Open);
                assert_eq!(missing_fields, &vec!["plan".to_string()]);
            },
            other => panic!("expected rejection, got {:?}", other),
        }

        // Nothing was written.
        let stored = manager.get_task(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Open);
        assert_eq!(stored.updated_at, task.updated_at);

        // Supplying the field in the same patch makes the transition valid.
        let outcome = manager
            .update_task(
                &task.id,
                TaskPatch {
                    status: Some(TaskStatus::InProgress),
                    plan: Some("- reproduce".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(outcome.is_accepted());
        assert_eq!(outcome.task().status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_blocker_gate_on_completion() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let blocker = create(&manager, feature("Blocker")).await;
        let mut input = feature("Blocked");
        input.blocked_by = vec![blocker.id.clone()];
        let blocked = create(&manager, input).await;

        let err = manager
            .update_task(&blocked.id, TaskPatch::status(TaskStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, ArbeitError::HasBlockers(ref ids) if ids == &vec![blocker.id.clone()]));

        manager
            .update_task(&blocker.id, TaskPatch::status(TaskStatus::Completed))
            .await
            .unwrap();
        let outcome = manager
            .update_task(&blocked.id, TaskPatch::status(TaskStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome.task().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_update_blockers_rejects_cycle() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let a = create(&manager, NewTask::new("a", TaskType::Chore)).await;
        let mut input = NewTask::new("b", TaskType::Chore);
        input.blocked_by = vec![a.id.clone()];
        let b = create(&manager, input).await;

        let patch = TaskPatch {
            blocked_by: Some(vec![b.id.clone()]),
            ..Default::default()
        };
        let err = manager.update_task(&a.id, patch).await.unwrap_err();
        assert_eq!(err.to_error_code(), "CIRCULAR_DEPENDENCY");

        let patch = TaskPatch {
            blocked_by: Some(vec![a.id.clone()]),
            ..Default::default()
        };
        let err = manager.update_task(&a.id, patch).await.unwrap_err();
        assert_eq!(err.to_error_code(), "INVALID_BLOCKER");

        let patch = TaskPatch {
            blocked_by: Some(Vec::new()),
            ..Default::default()
        };
        let cleared = manager.update_task(&b.id, patch).await.unwrap();
        assert!(cleared.task().blocked_by.is_empty());
    }

    #[tokio::test]
    async fn test_reparent_swaps_edge() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let first = create(&manager, NewTask::new("first", TaskType::Epic)).await;
        let second = create(&manager, NewTask::new("second", TaskType::Epic)).await;
        let mut input = NewTask::new("child", TaskType::Chore);
        input.parent_id = Some(first.id.clone());
        let child = create(&manager, input).await;

        let patch = TaskPatch {
            parent_id: Some(Some(second.id.clone())),
            ..Default::default()
        };
        let moved = manager.update_task(&child.id, patch).await.unwrap();
        assert_eq!(moved.task().parent_id.as_deref(), Some(second.id.as_str()));
        assert!(manager.children_of(&first.id).await.unwrap().is_empty());

        // Moving a parent under its own child closes a cycle.
        let patch = TaskPatch {
            parent_id: Some(Some(child.id.clone())),
            ..Default::default()
        };
        let err = manager.update_task(&second.id, patch).await.unwrap_err();
        assert_eq!(err.to_error_code(), "CIRCULAR_DEPENDENCY");

        let patch = TaskPatch {
            parent_id: Some(None),
            ..Default::default()
        };
        let detached = manager.update_task(&child.id, patch).await.unwrap();
        assert!(detached.task().parent_id.is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_visibility() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let keep = create(&manager, NewTask::new("keep", TaskType::Chore)).await;
        let gone = create(&manager, NewTask::new("gone", TaskType::Chore)).await;

        let deleted = manager.delete_task(&gone.id).await.unwrap();
        assert_eq!(deleted.status, TaskStatus::Deleted);

        let listed = manager.list_tasks(&TaskFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, keep.id);

        assert_eq!(manager.get_task(&gone.id).await.unwrap().status, TaskStatus::Deleted);

        // Idempotent.
        manager.delete_task(&gone.id).await.unwrap();

        let err = manager
            .update_task(&gone.id, TaskPatch::status(TaskStatus::Open))
            .await
            .unwrap_err();
        assert_eq!(err.to_error_code(), "TASK_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_delete_with_children_fails() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let parent = create(&manager, NewTask::new("parent", TaskType::Epic)).await;
        let mut input = NewTask::new("child", TaskType::Chore);
        input.parent_id = Some(parent.id.clone());
        let child = create(&manager, input).await;

        let err = manager.delete_task(&parent.id).await.unwrap_err();
        assert_eq!(err.to_error_code(), "HAS_CHILDREN");

        manager.delete_task(&child.id).await.unwrap();
        manager.delete_task(&parent.id).await.unwrap();

        let err = manager.delete_task("tkt-unknown1").await.unwrap_err();
        assert_eq!(err.to_error_code(), "TASK_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_filters() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let root = create(&manager, NewTask::new("root", TaskType::Epic)).await;
        let mut input = feature("child");
        input.parent_id = Some(root.id.clone());
        input.status = Some(TaskStatus::InProgress);
        let child = create(&manager, input).await;
        let mut input = NewTask::new("done", TaskType::Chore);
        input.status = Some(TaskStatus::Completed);
        create(&manager, input).await;

        let roots = manager
            .list_tasks(&TaskFilter {
                parent_id: Some(None),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(roots.len(), 2);

        let active = manager.active_tasks(None).await.unwrap();
        assert_eq!(active.len(), 2);

        let in_progress = manager
            .list_tasks(&TaskFilter {
                statuses: vec![TaskStatus::InProgress],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, child.id);

        let epics = manager
            .list_tasks(&TaskFilter {
                task_type: Some(TaskType::Epic),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(epics[0].id, root.id);
    }

    #[tokio::test]
    async fn test_hierarchy_queries() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let root = create(&manager, NewTask::new("root", TaskType::Epic)).await;
        let mut input = NewTask::new("mid", TaskType::Chore);
        input.parent_id = Some(root.id.clone());
        let mid = create(&manager, input).await;
        let mut input = NewTask::new("leaf", TaskType::Chore);
        input.parent_id = Some(mid.id.clone());
        let leaf = create(&manager, input).await;

        let children = manager.children_of(&root.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, mid.id);

        assert_eq!(
            manager.descendants_of(&root.id).await.unwrap(),
            vec![mid.id.clone(), leaf.id.clone()]
        );
        assert_eq!(
            manager.ancestors_of(&leaf.id).await.unwrap(),
            vec![mid.id.clone(), root.id.clone()]
        );

        let err = manager.children_of("tkt-missing1").await.unwrap_err();
        assert_eq!(err.to_error_code(), "TASK_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_blocked_and_blocking_queries() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let blocker = create(&manager, NewTask::new("blocker", TaskType::Chore)).await;
        let mut input = NewTask::new("blocked", TaskType::Chore);
        input.blocked_by = vec![blocker.id.clone()];
        let blocked = create(&manager, input).await;
        create(&manager, NewTask::new("free", TaskType::Chore)).await;

        let blocked_tasks = manager.blocked_tasks(None).await.unwrap();
        assert_eq!(blocked_tasks.len(), 1);
        assert_eq!(blocked_tasks[0].id, blocked.id);

        let blocking = manager.blocking_tasks(None).await.unwrap();
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].id, blocker.id);

        assert_eq!(manager.blockers_of(&blocked.id).await.unwrap()[0].id, blocker.id);
        assert_eq!(manager.dependents_of(&blocker.id).await.unwrap()[0].id, blocked.id);

        manager
            .update_task(&blocker.id, TaskPatch::status(TaskStatus::Cancelled))
            .await
            .unwrap();
        assert!(manager.blocked_tasks(None).await.unwrap().is_empty());
        assert!(manager.blocking_tasks(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listing_projects_blocked_by_per_task() {
        let ctx = TestContext::new().await;
        let manager = TaskManager::new(ctx.db());
        let first = create(&manager, NewTask::new("first", TaskType::Chore)).await;
        let second = create(&manager, NewTask::new("second", TaskType::Chore)).await;
        let mut input = NewTask::new("blocked", TaskType::Chore);
        input.blocked_by = vec![second.id.clone(), first.id.clone()];
        let blocked = create(&manager, input).await;

        let listed = manager.list_tasks(&TaskFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 3);
        let projected = listed.iter().find(|t| t.id == blocked.id).unwrap();
        assert_eq!(projected.blocked_by, vec![second.id.clone(), first.id.clone()]);
        assert!(listed
            .iter()
            .filter(|t| t.id != blocked.id)
            .all(|t| t.blocked_by.is_empty()));

        let fetched = manager
            .fetch_many(&[first.id.clone(), blocked.id.clone()])
            .await
            .unwrap();
        assert_eq!(fetched[0].id, first.id);
        assert!(fetched[0].blocked_by.is_empty());
        assert_eq!(fetched[1].blocked_by, vec![second.id, first.id]);
    }
}
