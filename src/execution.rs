//! Execution record of a task: ordered steps with a cursor, plus discovery
//! and decision logs.
//!
//! The mutations on [`Execution`] are pure; [`ExecutionManager`] loads the
//! record, applies one of them and writes it back under the store's write
//! lock.

use crate::db::models::{Decision, Discovery, Execution, Step, StepStatus, Task};
use crate::db::Database;
use crate::error::{ArbeitError, Result};
use crate::lifecycle::{ensure_unblocked, is_blank};
use crate::tasks::TaskManager;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewStep {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub details: Option<String>,
}

impl NewStep {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }
}

/// Field patch for one step. Omitted fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepPatch {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub details: Option<String>,
    pub status: Option<StepStatus>,
    pub notes: Option<String>,
}

impl StepPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.summary.is_none()
            && self.details.is_none()
            && self.status.is_none()
            && self.notes.is_none()
    }
}

fn step_not_found(step_id: i64) -> ArbeitError {
    ArbeitError::ItemNotFound(vec![format!("step {}", step_id)])
}

impl Execution {
    /// First step still `pending`, in list order.
    pub fn next_pending(&self) -> Option<i64> {
        self.steps
            .iter()
            .find(|step| step.status == StepStatus::Pending)
            .map(|step| step.id)
    }

    /// Append steps with ids continuing after the current maximum. Returns
    /// the new ids.
    pub fn add_steps(&mut self, steps: Vec<NewStep>) -> Vec<i64> {
        let mut next_id = self.steps.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        let mut added = Vec::with_capacity(steps.len());

        for step in steps {
            self.steps.push(Step {
                id: next_id,
                title: step.title,
                summary: step.summary,
                details: step.details,
                status: StepStatus::Pending,
                notes: None,
            });
            added.push(next_id);
            next_id += 1;
        }

        if self.current_step.is_none() {
            self.current_step = self.next_pending();
        }
        added
    }

    /// Complete `step_id`, or the current step when omitted, then move the
    /// cursor to the first pending step.
    ///
    /// An explicit `step_id` may name a finished step: a completed step stays
    /// completed and a skipped one becomes completed.
    pub fn complete_step(&mut self, step_id: Option<i64>, notes: Option<String>) -> Result<i64> {
        let target = step_id
            .or(self.current_step)
            .ok_or_else(|| ArbeitError::ItemNotFound(vec!["current step".to_string()]))?;

        let step = self
            .steps
            .iter_mut()
            .find(|step| step.id == target)
            .ok_or_else(|| step_not_found(target))?;

        step.status = StepStatus::Completed;
        if notes.is_some() {
            step.notes = notes;
        }

        self.current_step = self.next_pending();
        Ok(target)
    }

    /// Patch a step's fields.
    ///
    /// `completed` and `skipped` are terminal: a patch that would move a
    /// terminal step back to `pending` or `in_progress` fails with
    /// `INVALID_STATUS`. The cursor is never advanced here. If the patch
    /// finishes the step under the cursor, the cursor is cleared so it never
    /// names a finished step; the next `add_steps` or `complete_step` sets it
    /// again.
    pub fn update_step(&mut self, step_id: i64, patch: StepPatch) -> Result<()> {
        if patch.is_empty() {
            return Err(ArbeitError::NoChangesMade(format!(
                "no fields to update for step {}",
                step_id
            )));
        }

        let step = self
            .steps
            .iter_mut()
            .find(|step| step.id == step_id)
            .ok_or_else(|| step_not_found(step_id))?;

        if let Some(status) = patch.status {
            if step.status.is_terminal() && !status.is_terminal() {
                return Err(ArbeitError::InvalidStatus(format!(
                    "step {} is {} and cannot return to {}",
                    step_id, step.status, status
                )));
            }
            step.status = status;
        }
        if patch.title.is_some() {
            step.title = patch.title;
        }
        if patch.summary.is_some() {
            step.summary = patch.summary;
        }
        if patch.details.is_some() {
            step.details = patch.details;
        }
        if patch.notes.is_some() {
            step.notes = patch.notes;
        }

        if step.status.is_terminal() && self.current_step == Some(step_id) {
            self.current_step = None;
        }
        Ok(())
    }

    pub fn add_discovery(&mut self, content: String, now: DateTime<Utc>) -> i64 {
        let id = self.discoveries.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        self.discoveries.push(Discovery {
            id,
            content,
            created_at: now,
        });
        id
    }

    pub fn add_decision(
        &mut self,
        content: String,
        rationale: Option<String>,
        now: DateTime<Utc>,
    ) -> i64 {
        let id = self.decisions.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        self.decisions.push(Decision {
            id,
            content,
            rationale,
            created_at: now,
        });
        id
    }
}

pub struct ExecutionManager<'a> {
    db: &'a Database,
}

impl<'a> ExecutionManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn add_steps(&self, task_id: &str, steps: Vec<NewStep>) -> Result<Task> {
        if steps.is_empty() {
            return Err(ArbeitError::NoChangesMade("no steps provided".to_string()));
        }
        self.modify(task_id, "add_steps", |execution, _| {
            execution.add_steps(steps);
            Ok(())
        })
        .await
    }

    pub async fn complete_step(
        &self,
        task_id: &str,
        step_id: Option<i64>,
        notes: Option<String>,
    ) -> Result<Task> {
        self.modify(task_id, "complete_step", |execution, _| {
            execution.complete_step(step_id, notes).map(|_| ())
        })
        .await
    }

    pub async fn update_step(&self, task_id: &str, step_id: i64, patch: StepPatch) -> Result<Task> {
        self.modify(task_id, "update_step", |execution, _| {
            execution.update_step(step_id, patch)
        })
        .await
    }

    pub async fn add_discovery(&self, task_id: &str, content: String) -> Result<Task> {
        if content.trim().is_empty() {
            return Err(ArbeitError::InvalidInput("discovery content must not be empty".to_string()));
        }
        self.modify(task_id, "add_discovery", |execution, now| {
            execution.add_discovery(content, now);
            Ok(())
        })
        .await
    }

    pub async fn add_decision(
        &self,
        task_id: &str,
        content: String,
        rationale: Option<String>,
    ) -> Result<Task> {
        if content.trim().is_empty() {
            return Err(ArbeitError::InvalidInput("decision content must not be empty".to_string()));
        }
        self.modify(task_id, "add_decision", |execution, now| {
            execution.add_decision(content, rationale, now);
            Ok(())
        })
        .await
    }

    /// Record the outcome and mark the task completed in one write.
    ///
    /// Only the blocker gate applies here; field completeness is not
    /// re-checked.
    pub async fn complete_task(&self, task_id: &str, outcome: &str) -> Result<Task> {
        if is_blank(Some(outcome)) {
            return Err(ArbeitError::InvalidInput("outcome must not be empty".to_string()));
        }

        let _guard = self.db.write_lock().await;
        let tasks = TaskManager::new(self.db);
        let task = tasks.get_live_task(task_id).await?;

        if task.outcome.is_some() {
            return Err(ArbeitError::OutcomeAlreadySet(task_id.to_string()));
        }
        ensure_unblocked(self.db, &task.blocked_by).await?;

        let result = sqlx::query(
            "UPDATE tasks SET status = 'completed', outcome = ?, updated_at = ? WHERE id = ?",
        )
        .bind(outcome)
        .bind(Utc::now())
        .bind(task_id)
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(ArbeitError::TaskUpdateFailed(task_id.to_string()));
        }

        crate::log_task_operation!("complete_task", task_id);

        tasks.get_task(task_id).await
    }

    /// Load the execution record, apply `apply`, persist, and re-read the task.
    async fn modify<F>(&self, task_id: &str, operation: &str, apply: F) -> Result<Task>
    where
        F: FnOnce(&mut Execution, DateTime<Utc>) -> Result<()>,
    {
        let _guard = self.db.write_lock().await;
        let tasks = TaskManager::new(self.db);
        let mut execution = tasks.get_live_task(task_id).await?.execution;

        let now = Utc::now();
        apply(&mut execution, now)?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET steps = ?, current_step = ?, discoveries = ?, decisions = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(&execution.steps)?)
        .bind(execution.current_step)
        .bind(serde_json::to_string(&execution.discoveries)?)
        .bind(serde_json::to_string(&execution.decisions)?)
        .bind(now)
        .bind(task_id)
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(ArbeitError::TaskUpdateFailed(task_id.to_string()));
        }

        crate::log_task_operation!(operation, task_id);

        tasks.get_task(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{TaskStatus, TaskType};
    use crate::tasks::NewTask;
    use crate::test_utils::test_helpers::TestContext;

    fn three_steps() -> Vec<NewStep> {
        vec![
            NewStep::titled("one"),
            NewStep::titled("two"),
            NewStep::titled("three"),
        ]
    }

    #[test]
    fn test_add_steps_sets_cursor_and_ids() {
        let mut execution = Execution::default();
        assert_eq!(execution.add_steps(three_steps()), vec![1, 2, 3]);
        assert_eq!(execution.current_step, Some(1));

        assert_eq!(execution.add_steps(vec![NewStep::titled("four")]), vec![4]);
        assert_eq!(execution.current_step, Some(1));
    }

    #[test]
    fn test_step_ids_continue_from_max() {
        let mut execution = Execution::default();
        execution.add_steps(three_steps());
        execution.steps.retain(|s| s.id != 3);

        assert_eq!(execution.add_steps(vec![NewStep::default()]), vec![3]);
        execution.steps.retain(|s| s.id == 1);
        assert_eq!(execution.add_steps(vec![NewStep::default()]), vec![2]);
    }

    #[test]
    fn test_complete_step_auto_advances() {
        let mut execution = Execution::default();
        execution.add_steps(three_steps());

        execution.complete_step(None, Some("done".into())).unwrap();
        assert_eq!(execution.current_step, Some(2));
        assert_eq!(execution.steps[0].notes.as_deref(), Some("done"));

        execution.complete_step(Some(3), None).unwrap();
        assert_eq!(execution.current_step, Some(2));

        execution.complete_step(None, None).unwrap();
        assert_eq!(execution.current_step, None);
        assert!(execution.steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[test]
    fn test_complete_step_without_target() {
        let mut execution = Execution::default();
        let err = execution.complete_step(None, None).unwrap_err();
        assert_eq!(err.to_error_code(), "ITEM_NOT_FOUND");

        execution.add_steps(three_steps());
        let err = execution.complete_step(Some(9), None).unwrap_err();
        assert_eq!(err.to_error_code(), "ITEM_NOT_FOUND");
    }

    #[test]
    fn test_complete_step_preserves_notes_when_omitted() {
        let mut execution = Execution::default();
        execution.add_steps(vec![NewStep::titled("only")]);
        execution.steps[0].notes = Some("earlier".into());

        execution.complete_step(Some(1), None).unwrap();
        assert_eq!(execution.steps[0].notes.as_deref(), Some("earlier"));
    }

    #[test]
    fn test_update_step_leaves_cursor_for_other_steps() {
        let mut execution = Execution::default();
        execution.add_steps(three_steps());

        execution
            .update_step(
                2,
                StepPatch {
                    status: Some(StepStatus::Skipped),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(execution.current_step, Some(1));

        execution
            .update_step(
                1,
                StepPatch {
                    status: Some(StepStatus::InProgress),
                    summary: Some("working".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(execution.current_step, Some(1));
        assert_eq!(execution.steps[0].summary.as_deref(), Some("working"));
    }

    #[test]
    fn test_update_step_finishing_current_clears_cursor() {
        let mut execution = Execution::default();
        execution.add_steps(three_steps());

        execution
            .update_step(
                1,
                StepPatch {
                    status: Some(StepStatus::Skipped),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(execution.current_step, None);
        assert_eq!(execution.steps[0].status, StepStatus::Skipped);

        // Without a cursor there is nothing to complete implicitly, so the
        // skip cannot be overwritten.
        let err = execution.complete_step(None, None).unwrap_err();
        assert_eq!(err.to_error_code(), "ITEM_NOT_FOUND");
        assert_eq!(execution.steps[0].status, StepStatus::Skipped);

        execution.complete_step(Some(2), None).unwrap();
        assert_eq!(execution.current_step, Some(3));
        assert_eq!(execution.steps[0].status, StepStatus::Skipped);
    }

    #[test]
    fn test_add_steps_reseeds_cleared_cursor() {
        let mut execution = Execution::default();
        execution.add_steps(vec![NewStep::titled("one")]);
        execution
            .update_step(
                1,
                StepPatch {
                    status: Some(StepStatus::Completed),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(execution.current_step, None);

        execution.add_steps(vec![NewStep::titled("two")]);
        assert_eq!(execution.current_step, Some(2));
    }

    #[test]
    fn test_complete_step_on_finished_step() {
        let mut execution = Execution::default();
        execution.add_steps(three_steps());
        execution
            .update_step(
                2,
                StepPatch {
                    status: Some(StepStatus::Skipped),
                    ..Default::default()
                },
            )
            .unwrap();

        execution.complete_step(Some(2), Some("done after all".into())).unwrap();
        assert_eq!(execution.steps[1].status, StepStatus::Completed);
        assert_eq!(execution.current_step, Some(1));

        execution.complete_step(Some(1), None).unwrap();
        execution.complete_step(Some(1), Some("again".into())).unwrap();
        assert_eq!(execution.steps[0].status, StepStatus::Completed);
        assert_eq!(execution.steps[0].notes.as_deref(), Some("again"));
        assert_eq!(execution.current_step, Some(3));
    }

    #[test]
    fn test_update_step_cannot_reopen_terminal_step() {
        let mut execution = Execution::default();
        execution.add_steps(three_steps());
        execution.complete_step(Some(1), None).unwrap();

        let err = execution
            .update_step(
                1,
                StepPatch {
                    status: Some(StepStatus::Pending),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.to_error_code(), "INVALID_STATUS");

        // Notes on a finished step can still be edited.
        execution
            .update_step(
                1,
                StepPatch {
                    notes: Some("retro".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = execution.update_step(1, StepPatch::default()).unwrap_err();
        assert_eq!(err.to_error_code(), "NO_CHANGES_MADE");
    }

    #[test]
    fn test_log_ids_increment() {
        let mut execution = Execution::default();
        let now = Utc::now();
        assert_eq!(execution.add_discovery("a".into(), now), 1);
        assert_eq!(execution.add_discovery("b".into(), now), 2);
        assert_eq!(execution.add_decision("c".into(), Some("why".into()), now), 1);
        assert_eq!(execution.decisions[0].rationale.as_deref(), Some("why"));
    }

    #[tokio::test]
    async fn test_step_operations_persist() {
        let ctx = TestContext::new().await;
        let task = TaskManager::new(ctx.db())
            .create_task(NewTask::new("steps", TaskType::Chore))
            .await
            .unwrap()
            .task;
        let manager = ExecutionManager::new(ctx.db());

        let task = manager.add_steps(&task.id, three_steps()).await.unwrap();
        assert_eq!(task.execution.current_step, Some(1));

        let task = manager
            .complete_step(&task.id, None, Some("first".into()))
            .await
            .unwrap();
        assert_eq!(task.execution.current_step, Some(2));
        assert_eq!(task.execution.steps[0].status, StepStatus::Completed);

        let err = manager.add_steps(&task.id, Vec::new()).await.unwrap_err();
        assert_eq!(err.to_error_code(), "NO_CHANGES_MADE");

        let err = manager
            .complete_step("tkt-missing0", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.to_error_code(), "TASK_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_complete_task_rules() {
        let ctx = TestContext::new().await;
        let tasks = TaskManager::new(ctx.db());
        let blocker = tasks
            .create_task(NewTask::new("blocker", TaskType::Chore))
            .await
            .unwrap()
            .task;
        let mut input = NewTask::new("blocked", TaskType::Chore);
        input.blocked_by = vec![blocker.id.clone()];
        let blocked = tasks.create_task(input).await.unwrap().task;
        let manager = ExecutionManager::new(ctx.db());

        let err = manager.complete_task(&blocked.id, "shipped").await.unwrap_err();
        assert_eq!(err.to_error_code(), "HAS_BLOCKERS");

        let err = manager.complete_task(&blocker.id, "  ").await.unwrap_err();
        assert_eq!(err.to_error_code(), "INVALID_INPUT");

        // Missing description and plan do not stop outcome recording.
        let done = manager.complete_task(&blocker.id, "cleaned up").await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.outcome.as_deref(), Some("cleaned up"));

        let err = manager.complete_task(&blocker.id, "again").await.unwrap_err();
        assert_eq!(err.to_error_code(), "OUTCOME_ALREADY_SET");

        let done = manager.complete_task(&blocked.id, "shipped").await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
    }
}
