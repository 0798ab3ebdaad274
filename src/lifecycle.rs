//! Field completeness per task type and the blocker gates that guard status
//! transitions.

use crate::db::models::{Task, TaskStatus, TaskType};
use crate::db::Database;
use crate::error::{ArbeitError, Result};
use crate::templates::Template;
use serde::Serialize;
use sqlx::QueryBuilder;
use std::collections::HashSet;

/// The fields that decide whether a task is complete enough for a status.
#[derive(Debug, Clone, Copy)]
pub struct TaskFields<'a> {
    pub title: &'a str,
    pub task_type: TaskType,
    pub intent: Option<&'a str>,
    pub description: Option<&'a str>,
    pub plan: Option<&'a str>,
}

impl<'a> From<&'a Task> for TaskFields<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            title: &task.title,
            task_type: task.task_type,
            intent: task.intent.as_deref(),
            description: task.description.as_deref(),
            plan: task.plan.as_deref(),
        }
    }
}

pub(crate) fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Fields a new task of this type should carry. Advisory only.
pub fn missing_for_create(fields: &TaskFields<'_>) -> Vec<String> {
    let mut missing = Vec::new();
    if fields.title.trim().is_empty() {
        missing.push("title");
    }

    let needs_intent = !matches!(fields.task_type, TaskType::Investigation | TaskType::Chore);
    let needs_plan = fields.task_type != TaskType::Epic;

    if needs_intent && is_blank(fields.intent) {
        missing.push("intent");
    }
    if is_blank(fields.description) {
        missing.push("description");
    }
    if needs_plan && is_blank(fields.plan) {
        missing.push("plan");
    }

    missing.into_iter().map(String::from).collect()
}

/// Fields required before a task may enter `target`.
///
/// | type | in_progress | completed |
/// |---|---|---|
/// | epic | none | description |
/// | everything else | plan | description, plan |
pub fn missing_for_transition(fields: &TaskFields<'_>, target: TaskStatus) -> Vec<String> {
    let needs_plan = fields.task_type != TaskType::Epic;
    let mut missing = Vec::new();

    match target {
        TaskStatus::InProgress => {
            if needs_plan && is_blank(fields.plan) {
                missing.push("plan");
            }
        },
        TaskStatus::Completed => {
            if is_blank(fields.description) {
                missing.push("description");
            }
            if needs_plan && is_blank(fields.plan) {
                missing.push("plan");
            }
        },
        _ => {},
    }

    missing.into_iter().map(String::from).collect()
}

/// Reject a `blocked_by` list that names its own task or repeats an id.
pub fn validate_blocker_list(task_id: &str, blockers: &[String]) -> Result<()> {
    if blockers.iter().any(|b| b == task_id) {
        return Err(ArbeitError::InvalidBlocker(task_id.to_string()));
    }

    let mut seen = HashSet::new();
    let mut duplicates: Vec<String> = Vec::new();
    for blocker in blockers {
        if !seen.insert(blocker.as_str()) && !duplicates.contains(blocker) {
            duplicates.push(blocker.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(ArbeitError::DuplicateBlockers(duplicates));
    }

    Ok(())
}

/// Ids from `ids` that do not name a live task, in input order.
pub async fn missing_tasks(db: &Database, ids: &[String]) -> Result<Vec<String>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<sqlx::Sqlite> =
        QueryBuilder::new("SELECT id FROM tasks WHERE status != 'deleted' AND id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");

    let found: HashSet<String> = builder
        .build_query_scalar::<String>()
        .fetch_all(db.pool())
        .await?
        .into_iter()
        .collect();

    let mut missing: Vec<String> = Vec::new();
    for id in ids {
        if !found.contains(id) && !missing.contains(id) {
            missing.push(id.clone());
        }
    }
    Ok(missing)
}

/// Fail with `BLOCKER_NOT_FOUND` naming every blocker that is not a live task.
pub async fn ensure_blockers_exist(db: &Database, blockers: &[String]) -> Result<()> {
    let missing = missing_tasks(db, blockers).await?;
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ArbeitError::BlockerNotFound(missing))
    }
}

/// Blockers still `open` or `in_progress`. Deleted blockers are ignored.
pub async fn open_blockers(db: &Database, blockers: &[String]) -> Result<Vec<String>> {
    if blockers.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
        "SELECT id FROM tasks WHERE status IN ('open', 'in_progress') AND id IN (",
    );
    let mut separated = builder.separated(", ");
    for id in blockers {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");

    let open: HashSet<String> = builder
        .build_query_scalar::<String>()
        .fetch_all(db.pool())
        .await?
        .into_iter()
        .collect();

    Ok(blockers.iter().filter(|b| open.contains(*b)).cloned().collect())
}

/// The completion gate: every blocker must be resolved.
pub async fn ensure_unblocked(db: &Database, blockers: &[String]) -> Result<()> {
    let open = open_blockers(db, blockers).await?;
    if open.is_empty() {
        Ok(())
    } else {
        tracing::debug!(blockers = ?open, "Completion rejected by open blockers");
        Err(ArbeitError::HasBlockers(open))
    }
}

/// Result of a lifecycle update.
///
/// `Rejected` is an expected branch: the status change was refused, nothing
/// was written, and the caller is told which fields to fill in first.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Accepted {
        task: Task,
    },
    Rejected {
        task: Task,
        missing_fields: Vec<String>,
    },
}

impl TransitionOutcome {
    pub fn task(&self) -> &Task {
        match self {
            TransitionOutcome::Accepted { task } | TransitionOutcome::Rejected { task, .. } => task,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, TransitionOutcome::Accepted { .. })
    }

    pub fn missing_fields(&self) -> &[String] {
        match self {
            TransitionOutcome::Accepted { .. } => &[],
            TransitionOutcome::Rejected { missing_fields, .. } => missing_fields,
        }
    }
}

/// A freshly created task plus the advisory gaps it was created with.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub task: Task,
    pub missing_fields: Vec<String>,
    /// Plan skeleton for the task's type, offered while `plan` is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<&'static Template>,
}
