//! Shared helpers for integration tests.

use arbeit::db::models::{Task, TaskType};
use arbeit::project::ProjectContext;
use arbeit::tasks::{NewTask, TaskManager};
use assert_cmd::Command;
use tempfile::TempDir;

/// A `Command` for the `arbeit` binary with HOME pointed at `home`, so log
/// files never land in the real home directory.
#[allow(dead_code)]
pub fn arbeit_command(home: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_arbeit"));
    cmd.env("HOME", home.path())
        .env("USERPROFILE", home.path())
        .env_remove("ARBEIT_PROJECT_DIR")
        .env_remove("ARBEIT_LOG_LEVEL")
        .env_remove("RUST_LOG");
    cmd
}

/// A freshly initialized project in its own temp directory.
#[allow(dead_code)]
pub async fn project() -> (ProjectContext, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let ctx = ProjectContext::init(temp_dir.path()).await.unwrap();
    (ctx, temp_dir)
}

/// Create a task with every field a transition could ask for.
#[allow(dead_code)]
pub async fn ready_task(tasks: &TaskManager<'_>, title: &str, task_type: TaskType) -> Task {
    let mut input = NewTask::new(title, task_type);
    input.intent = Some(format!("why {}", title));
    input.description = Some(format!("what {}", title));
    input.plan = Some(format!("how {}", title));
    tasks.create_task(input).await.unwrap().task
}

/// Build `root -> L1 -> ... -> L{levels}` through `parent_id`.
#[allow(dead_code)]
pub async fn chain(tasks: &TaskManager<'_>, levels: usize) -> Vec<Task> {
    let mut chain = vec![ready_task(tasks, "root", TaskType::Epic).await];
    for level in 1..=levels {
        let mut input = NewTask::new(format!("L{}", level), TaskType::Chore);
        input.parent_id = chain.last().map(|t| t.id.clone());
        chain.push(tasks.create_task(input).await.unwrap().task);
    }
    chain
}
