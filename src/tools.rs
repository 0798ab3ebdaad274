//! Tool-call dispatcher.
//!
//! Every call takes a tool name plus a JSON object of arguments and returns a
//! [`ToolResponse`] envelope. Failures never escape as Rust errors: they are
//! folded into `{ "success": false, "error": { code, message, suggestions } }`
//! so an agent can read the code and retry.

use crate::context::{ContextManager, NewContextEntry, Supersede};
use crate::db::models::{ContextType, StepStatus, TaskStatus, TaskType};
use crate::db::Database;
use crate::error::{ArbeitError, ErrorResponse, Result};
use crate::execution::{ExecutionManager, NewStep, StepPatch};
use crate::progress::ProgressManager;
use crate::project::{init_status, ProjectContext};
use crate::relationships::RelationshipManager;
use crate::tasks::{NewTask, TaskFilter, TaskManager, TaskPatch};
use crate::templates;
use futures_util::future::{try_join_all, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub const TOOL_NAMES: &[&str] = &[
    "init",
    "task_create",
    "task_get",
    "task_update",
    "task_delete",
    "task_complete",
    "relationship",
    "context_add",
    "progress_add",
    "progress_complete",
    "query",
    "steps_add",
    "step_complete",
    "step_update",
    "discovery_add",
    "decision_add",
    "templates",
];

/// Sections `task_get` can attach next to the task.
pub const BRIEFING_SECTIONS: &[&str] = &[
    "relationships",
    "context",
    "context_all",
    "progress",
    "progress_summary",
    "parent",
    "children",
    "blocked_by",
    "blocking",
];

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl ToolResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn failure(error: &ArbeitError) -> Self {
        Self {
            success: false,
            data: None,
            warnings: Vec::new(),
            error: Some(error.to_error_response()),
        }
    }

    fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Error code of a failed call.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Routes tool calls for one project directory.
///
/// The store handle is opened on first use and kept for the life of the
/// dispatcher.
pub struct Dispatcher {
    root: PathBuf,
    project: Option<ProjectContext>,
}

impl Dispatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            project: None,
        }
    }

    /// Wrap an already opened project.
    pub fn with_project(project: ProjectContext) -> Self {
        Self {
            root: project.root.clone(),
            project: Some(project),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn call(&mut self, name: &str, args: Value) -> ToolResponse {
        crate::log_tool_call!(name);

        match self.dispatch(name, args).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(tool = name, code = e.to_error_code(), "Tool call failed: {}", e);
                ToolResponse::failure(&e)
            },
        }
    }

    async fn dispatch(&mut self, name: &str, args: Value) -> Result<ToolResponse> {
        match name {
            "init" => return self.init().await,
            "templates" => return handle_templates(parse_args(args)?),
            _ => {},
        }

        let db = self.db().await?;
        match name {
            "task_create" => handle_task_create(db, parse_args(args)?).await,
            "task_get" => handle_task_get(db, parse_args(args)?).await,
            "task_update" => handle_task_update(db, parse_args(args)?).await,
            "task_delete" => handle_task_delete(db, parse_args(args)?).await,
            "task_complete" => handle_task_complete(db, parse_args(args)?).await,
            "relationship" => handle_relationship(db, parse_args(args)?).await,
            "context_add" => handle_context_add(db, parse_args(args)?).await,
            "progress_add" => handle_progress_add(db, parse_args(args)?).await,
            "progress_complete" => handle_progress_complete(db, parse_args(args)?).await,
            "query" => handle_query(db, parse_args(args)?).await,
            "steps_add" => handle_steps_add(db, parse_args(args)?).await,
            "step_complete" => handle_step_complete(db, parse_args(args)?).await,
            "step_update" => handle_step_update(db, parse_args(args)?).await,
            "discovery_add" => handle_discovery_add(db, parse_args(args)?).await,
            "decision_add" => handle_decision_add(db, parse_args(args)?).await,
            _ => Err(ArbeitError::InvalidInput(format!(
                "unknown tool '{}', expected one of: {}",
                name,
                TOOL_NAMES.join(", ")
            ))),
        }
    }

    async fn db(&mut self) -> Result<&Database> {
        let project = match self.project.take() {
            Some(project) => project,
            None => ProjectContext::open(&self.root).await?,
        };
        Ok(&self.project.insert(project).db)
    }

    async fn init(&mut self) -> Result<ToolResponse> {
        let already_initialized = init_status(&self.root).is_initialized();
        let project = ProjectContext::init(&self.root).await?;
        let data = json!({
            "root": project.root,
            "db_path": project.db_path,
            "already_initialized": already_initialized,
        });
        self.project = Some(project);
        Ok(ToolResponse::ok(data))
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| ArbeitError::InvalidInput(format!("invalid arguments: {}", e)))
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn parse_opt<T>(value: Option<String>) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = ArbeitError>,
{
    value.map(|v| v.parse()).transpose()
}

fn to_data<T: Serialize>(value: &T) -> Result<ToolResponse> {
    Ok(ToolResponse::ok(serde_json::to_value(value)?))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskIdArgs {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskCreateArgs {
    title: String,
    #[serde(rename = "type")]
    task_type: Option<String>,
    template: Option<String>,
    status: Option<String>,
    intent: Option<String>,
    description: Option<String>,
    plan: Option<String>,
    parent_id: Option<String>,
    #[serde(default)]
    blocked_by: Vec<String>,
    metadata: Option<Value>,
}

async fn handle_task_create(db: &Database, args: TaskCreateArgs) -> Result<ToolResponse> {
    let input = NewTask {
        title: args.title,
        task_type: parse_opt::<TaskType>(args.task_type)?,
        template: args.template,
        status: parse_opt::<TaskStatus>(args.status)?,
        intent: args.intent,
        description: args.description,
        plan: args.plan,
        parent_id: args.parent_id,
        blocked_by: args.blocked_by,
        metadata: args.metadata,
    };

    let outcome = TaskManager::new(db).create_task(input).await?;
    let warnings = if outcome.missing_fields.is_empty() {
        Vec::new()
    } else {
        vec![format!(
            "Recommended fields are empty: {}",
            outcome.missing_fields.join(", ")
        )]
    };

    Ok(to_data(&outcome)?.with_warnings(warnings))
}

#[derive(Debug, Deserialize)]
struct TaskGetArgs {
    task_id: String,
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    briefing: bool,
}

async fn handle_task_get(db: &Database, args: TaskGetArgs) -> Result<ToolResponse> {
    let sections: Vec<&str> = if args.briefing {
        BRIEFING_SECTIONS.to_vec()
    } else {
        let mut sections = Vec::with_capacity(args.include.len());
        for name in &args.include {
            match BRIEFING_SECTIONS.iter().find(|s| **s == name.as_str()) {
                Some(section) => sections.push(*section),
                None => {
                    return Err(ArbeitError::InvalidInput(format!(
                        "unknown include section '{}', expected one of: {}",
                        name,
                        BRIEFING_SECTIONS.join(", ")
                    )))
                },
            }
        }
        sections
    };

    let task = TaskManager::new(db).get_task(&args.task_id).await?;
    let mut data = json!({ "task": task });

    let id = task.id.as_str();
    let parent_id = task.parent_id.as_deref();
    let pending: Vec<BoxFuture<'_, Result<(&'static str, Value)>>> = sections
        .into_iter()
        .map(|section| briefing_section(db, id, parent_id, section))
        .collect();

    for (name, value) in try_join_all(pending).await? {
        data[name] = value;
    }

    Ok(ToolResponse::ok(data))
}

fn briefing_section<'a>(
    db: &'a Database,
    id: &'a str,
    parent_id: Option<&'a str>,
    section: &'static str,
) -> BoxFuture<'a, Result<(&'static str, Value)>> {
    async move {
        let tasks = TaskManager::new(db);
        let value = match section {
            "relationships" => {
                serde_json::to_value(RelationshipManager::new(db).relationships_for_task(id).await?)?
            },
            "context" => serde_json::to_value(ContextManager::new(db).list_entries(id, false).await?)?,
            "context_all" => {
                serde_json::to_value(ContextManager::new(db).list_entries(id, true).await?)?
            },
            "progress" => serde_json::to_value(ProgressManager::new(db).list_items(id).await?)?,
            "progress_summary" => serde_json::to_value(ProgressManager::new(db).summary(id).await?)?,
            "parent" => match parent_id {
                Some(parent_id) => serde_json::to_value(tasks.get_task(parent_id).await?)?,
                None => Value::Null,
            },
            "children" => serde_json::to_value(tasks.children_of(id).await?)?,
            "blocked_by" => serde_json::to_value(tasks.blockers_of(id).await?)?,
            "blocking" => serde_json::to_value(tasks.dependents_of(id).await?)?,
            other => {
                return Err(ArbeitError::InvalidInput(format!(
                    "unknown include section '{}'",
                    other
                )))
            },
        };
        Ok((section, value))
    }
    .boxed()
}

#[derive(Debug, Deserialize)]
struct TaskUpdateArgs {
    task_id: String,
    title: Option<String>,
    #[serde(rename = "type")]
    task_type: Option<String>,
    status: Option<String>,
    intent: Option<String>,
    description: Option<String>,
    plan: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    parent_id: Option<Option<String>>,
    blocked_by: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    metadata: Option<Option<Value>>,
}

async fn handle_task_update(db: &Database, args: TaskUpdateArgs) -> Result<ToolResponse> {
    let patch = TaskPatch {
        title: args.title,
        task_type: parse_opt::<TaskType>(args.task_type)?,
        status: parse_opt::<TaskStatus>(args.status)?,
        intent: args.intent,
        description: args.description,
        plan: args.plan,
        parent_id: args.parent_id,
        blocked_by: args.blocked_by,
        metadata: args.metadata,
    };

    let outcome = TaskManager::new(db).update_task(&args.task_id, patch).await?;
    if outcome.is_accepted() {
        return to_data(outcome.task());
    }

    let missing_fields = outcome.missing_fields();
    let warning = format!(
        "Status change rejected, fill in first: {}",
        missing_fields.join(", ")
    );
    let data = json!({
        "task": outcome.task(),
        "status_change_rejected": true,
        "missing_fields": missing_fields,
    });
    Ok(ToolResponse::ok(data).with_warnings(vec![warning]))
}

async fn handle_task_delete(db: &Database, args: TaskIdArgs) -> Result<ToolResponse> {
    to_data(&TaskManager::new(db).delete_task(&args.task_id).await?)
}

#[derive(Debug, Deserialize)]
struct TaskCompleteArgs {
    task_id: String,
    outcome: String,
}

async fn handle_task_complete(db: &Database, args: TaskCompleteArgs) -> Result<ToolResponse> {
    let task = ExecutionManager::new(db)
        .complete_task(&args.task_id, &args.outcome)
        .await?;
    to_data(&task)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RelationshipAction {
    Add,
    Remove,
    List,
}

#[derive(Debug, Deserialize)]
struct RelationshipArgs {
    action: RelationshipAction,
    from_task_id: Option<String>,
    to_task_id: Option<String>,
    #[serde(rename = "type")]
    relationship_type: Option<String>,
    task_id: Option<String>,
    metadata: Option<Value>,
}

impl RelationshipArgs {
    fn edge(&self) -> Result<(&str, &str, &str)> {
        match (&self.from_task_id, &self.to_task_id, &self.relationship_type) {
            (Some(from), Some(to), Some(kind)) => Ok((from, to, kind)),
            _ => Err(ArbeitError::InvalidInput(
                "from_task_id, to_task_id and type are required".to_string(),
            )),
        }
    }
}

async fn handle_relationship(db: &Database, args: RelationshipArgs) -> Result<ToolResponse> {
    let manager = RelationshipManager::new(db);
    match args.action {
        RelationshipAction::Add => {
            let (from, to, kind) = args.edge()?;
            let relationship = manager
                .add_relationship(from, to, kind, args.metadata.clone())
                .await?;
            to_data(&relationship)
        },
        RelationshipAction::Remove => {
            let (from, to, kind) = args.edge()?;
            let removed = manager.remove_relationship(from, to, kind).await?;
            Ok(ToolResponse::ok(json!({ "removed": removed })))
        },
        RelationshipAction::List => {
            let task_id = args.task_id.as_deref().ok_or_else(|| {
                ArbeitError::InvalidInput("task_id is required to list relationships".to_string())
            })?;
            to_data(&manager.relationships_for_task(task_id).await?)
        },
    }
}

#[derive(Debug, Deserialize)]
struct ContextAddArgs {
    task_id: Option<String>,
    #[serde(rename = "type")]
    context_type: Option<String>,
    content: String,
    #[serde(default, deserialize_with = "double_option")]
    metadata: Option<Option<Value>>,
    supersede_entry_id: Option<String>,
}

async fn handle_context_add(db: &Database, args: ContextAddArgs) -> Result<ToolResponse> {
    let manager = ContextManager::new(db);
    let context_type = parse_opt::<ContextType>(args.context_type)?;

    if let Some(entry_id) = args.supersede_entry_id {
        if let Some(task_id) = &args.task_id {
            let old = manager.get_entry(&entry_id).await?;
            if &old.task_id != task_id {
                return Err(ArbeitError::InvalidInput(format!(
                    "entry {} belongs to task {}, not {}",
                    entry_id, old.task_id, task_id
                )));
            }
        }
        let outcome = manager
            .supersede(
                &entry_id,
                Supersede {
                    content: args.content,
                    context_type,
                    metadata: args.metadata,
                },
            )
            .await?;
        return to_data(&outcome);
    }

    let task_id = args
        .task_id
        .ok_or_else(|| ArbeitError::InvalidInput("task_id is required".to_string()))?;
    let context_type = context_type
        .ok_or_else(|| ArbeitError::InvalidInput("type is required".to_string()))?;
    let entry = manager
        .add_entry(
            &task_id,
            NewContextEntry {
                context_type,
                content: args.content,
                metadata: args.metadata.flatten(),
            },
        )
        .await?;
    to_data(&entry)
}

#[derive(Debug, Deserialize)]
struct ProgressAddArgs {
    task_id: String,
    items: Vec<String>,
    #[serde(default)]
    completed: bool,
}

async fn handle_progress_add(db: &Database, args: ProgressAddArgs) -> Result<ToolResponse> {
    let items = ProgressManager::new(db)
        .add_items(&args.task_id, &args.items, args.completed)
        .await?;
    to_data(&items)
}

#[derive(Debug, Deserialize)]
struct ProgressCompleteArgs {
    item_ids: Vec<String>,
}

async fn handle_progress_complete(
    db: &Database,
    args: ProgressCompleteArgs,
) -> Result<ToolResponse> {
    to_data(&ProgressManager::new(db).complete_items(&args.item_ids).await?)
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    query: String,
    task_id: Option<String>,
    status: Option<OneOrMany>,
    #[serde(rename = "type")]
    task_type: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    parent_id: Option<Option<String>>,
}

impl QueryArgs {
    fn task_id(&self) -> Result<&str> {
        self.task_id.as_deref().ok_or_else(|| {
            ArbeitError::TaskNotFound(format!("query '{}' needs a task_id", self.query))
        })
    }

    fn statuses(&self) -> Result<Vec<TaskStatus>> {
        match &self.status {
            None => Ok(Vec::new()),
            Some(OneOrMany::One(status)) => Ok(vec![status.parse()?]),
            Some(OneOrMany::Many(statuses)) => statuses.iter().map(|s| s.parse()).collect(),
        }
    }

    fn single_status(&self) -> Result<Option<TaskStatus>> {
        let mut statuses = self.statuses()?;
        if statuses.len() > 1 {
            return Err(ArbeitError::InvalidInput(format!(
                "query '{}' accepts a single status",
                self.query
            )));
        }
        Ok(statuses.pop())
    }
}

async fn handle_query(db: &Database, args: QueryArgs) -> Result<ToolResponse> {
    let tasks = TaskManager::new(db);
    match args.query.as_str() {
        "tasks" => {
            let filter = TaskFilter {
                statuses: args.statuses()?,
                task_type: parse_opt::<TaskType>(args.task_type.clone())?,
                parent_id: args.parent_id.clone(),
            };
            to_data(&tasks.list_tasks(&filter).await?)
        },
        "active_tasks" => to_data(&tasks.active_tasks(args.parent_id.clone()).await?),
        "blocked_tasks" => to_data(&tasks.blocked_tasks(args.single_status()?).await?),
        "blocking_tasks" => to_data(&tasks.blocking_tasks(args.single_status()?).await?),
        "children_of" => to_data(&tasks.children_of(args.task_id()?).await?),
        "descendants_of" => {
            let ids = tasks.descendants_of(args.task_id()?).await?;
            Ok(ToolResponse::ok(json!({ "task_ids": ids })))
        },
        "ancestors_of" => {
            let ids = tasks.ancestors_of(args.task_id()?).await?;
            Ok(ToolResponse::ok(json!({ "task_ids": ids })))
        },
        "blockers_of" => to_data(&tasks.blockers_of(args.task_id()?).await?),
        "dependents_of" => to_data(&tasks.dependents_of(args.task_id()?).await?),
        other => Err(ArbeitError::InvalidInput(format!(
            "unknown query '{}', expected one of: tasks, active_tasks, blocked_tasks, \
             blocking_tasks, children_of, descendants_of, ancestors_of, blockers_of, dependents_of",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepInput {
    Title(String),
    Full {
        title: Option<String>,
        summary: Option<String>,
        details: Option<String>,
    },
}

impl From<StepInput> for NewStep {
    fn from(input: StepInput) -> Self {
        match input {
            StepInput::Title(title) => NewStep::titled(title),
            StepInput::Full {
                title,
                summary,
                details,
            } => NewStep {
                title,
                summary,
                details,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct StepsAddArgs {
    task_id: String,
    steps: Vec<StepInput>,
}

async fn handle_steps_add(db: &Database, args: StepsAddArgs) -> Result<ToolResponse> {
    let steps = args.steps.into_iter().map(NewStep::from).collect();
    to_data(&ExecutionManager::new(db).add_steps(&args.task_id, steps).await?)
}

#[derive(Debug, Deserialize)]
struct StepCompleteArgs {
    task_id: String,
    step_id: Option<i64>,
    notes: Option<String>,
}

async fn handle_step_complete(db: &Database, args: StepCompleteArgs) -> Result<ToolResponse> {
    let task = ExecutionManager::new(db)
        .complete_step(&args.task_id, args.step_id, args.notes)
        .await?;
    to_data(&task)
}

#[derive(Debug, Deserialize)]
struct StepUpdateArgs {
    task_id: String,
    step_id: i64,
    title: Option<String>,
    summary: Option<String>,
    details: Option<String>,
    status: Option<String>,
    notes: Option<String>,
}

async fn handle_step_update(db: &Database, args: StepUpdateArgs) -> Result<ToolResponse> {
    let patch = StepPatch {
        title: args.title,
        summary: args.summary,
        details: args.details,
        status: parse_opt::<StepStatus>(args.status)?,
        notes: args.notes,
    };
    let task = ExecutionManager::new(db)
        .update_step(&args.task_id, args.step_id, patch)
        .await?;
    to_data(&task)
}

#[derive(Debug, Deserialize)]
struct DiscoveryArgs {
    task_id: String,
    content: String,
}

async fn handle_discovery_add(db: &Database, args: DiscoveryArgs) -> Result<ToolResponse> {
    let task = ExecutionManager::new(db)
        .add_discovery(&args.task_id, args.content)
        .await?;
    to_data(&task)
}

#[derive(Debug, Deserialize)]
struct DecisionArgs {
    task_id: String,
    content: String,
    rationale: Option<String>,
}

async fn handle_decision_add(db: &Database, args: DecisionArgs) -> Result<ToolResponse> {
    let task = ExecutionManager::new(db)
        .add_decision(&args.task_id, args.content, args.rationale)
        .await?;
    to_data(&task)
}

#[derive(Debug, Deserialize)]
struct TemplatesArgs {
    name: Option<String>,
}

fn handle_templates(args: TemplatesArgs) -> Result<ToolResponse> {
    match args.name {
        Some(name) => to_data(templates::template(&name)?),
        None => to_data(&templates::list_templates()),
    }
}
