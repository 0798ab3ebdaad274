use serde::Serialize;
use thiserror::Error;

const TASK_NOT_FOUND_SUGGESTIONS: &[&str] = &[
    "Use the `query` tool with query \"tasks\" to list valid task ids.",
    "If you only have a title, list tasks and match by title.",
];

#[derive(Error, Debug)]
pub enum ArbeitError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Arbeit is not initialized in {0}")]
    NotInitialized(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Parent task not found: {0}")]
    ParentNotFound(String),

    #[error("Context entry not found: {0}")]
    EntryNotFound(String),

    #[error("Items not found: {}", .0.join(", "))]
    ItemNotFound(Vec<String>),

    #[error("Blocking tasks not found: {}", .0.join(", "))]
    BlockerNotFound(Vec<String>),

    #[error("Relationship {from_task_id} -> {to_task_id} would create a cycle")]
    CircularDependency {
        from_task_id: String,
        to_task_id: String,
    },

    #[error("Hierarchy would reach depth {depth}, maximum is {max}")]
    MaxDepthExceeded { depth: usize, max: usize },

    #[error("Relationship already exists: {from_task_id} {relationship_type} {to_task_id}")]
    RelationshipExists {
        from_task_id: String,
        to_task_id: String,
        relationship_type: String,
    },

    #[error("Task {task_id} already has parent {parent_id}")]
    MultipleParents { task_id: String, parent_id: String },

    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("Task cannot block itself: {0}")]
    InvalidBlocker(String),

    #[error("blocked_by contains duplicate task ids: {}", .0.join(", "))]
    DuplicateBlockers(Vec<String>),

    #[error("Task is blocked by unfinished tasks: {}", .0.join(", "))]
    HasBlockers(Vec<String>),

    #[error("Task {0} has child tasks and cannot be deleted")]
    HasChildren(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Unknown template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No changes made: {0}")]
    NoChangesMade(String),

    #[error("Outcome already recorded for task {0}")]
    OutcomeAlreadySet(String),

    #[error("Context entry {0} is already superseded")]
    AlreadySuperseded(String),

    #[error("Failed to create task")]
    TaskCreateFailed,

    #[error("Failed to update task {0}")]
    TaskUpdateFailed(String),

    #[error("Failed to delete task {0}")]
    TaskDeleteFailed(String),

    #[error("Failed to create relationship")]
    RelationshipCreateFailed,

    #[error("Failed to create context entry")]
    ContextCreateFailed,

    #[error("Failed to supersede context entry {0}")]
    ContextSupersedeFailed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ArbeitError {
    pub fn to_error_code(&self) -> &'static str {
        match self {
            ArbeitError::DatabaseError(_) => "DATABASE_ERROR",
            ArbeitError::IoError(_) => "IO_ERROR",
            ArbeitError::JsonError(_) => "JSON_ERROR",
            ArbeitError::NotInitialized(_) => "NOT_INITIALIZED",
            ArbeitError::TaskNotFound(_) => "TASK_NOT_FOUND",
            ArbeitError::ParentNotFound(_) => "PARENT_NOT_FOUND",
            ArbeitError::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            ArbeitError::ItemNotFound(_) => "ITEM_NOT_FOUND",
            ArbeitError::BlockerNotFound(_) => "BLOCKER_NOT_FOUND",
            ArbeitError::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            ArbeitError::MaxDepthExceeded { .. } => "MAX_DEPTH_EXCEEDED",
            ArbeitError::RelationshipExists { .. } => "RELATIONSHIP_EXISTS",
            ArbeitError::MultipleParents { .. } => "MULTIPLE_PARENTS",
            ArbeitError::InvalidType(_) => "INVALID_TYPE",
            ArbeitError::InvalidBlocker(_) => "INVALID_BLOCKER",
            ArbeitError::DuplicateBlockers(_) => "DUPLICATE_BLOCKERS",
            ArbeitError::HasBlockers(_) => "HAS_BLOCKERS",
            ArbeitError::HasChildren(_) => "HAS_CHILDREN",
            ArbeitError::InvalidStatus(_) => "INVALID_STATUS",
            ArbeitError::InvalidTemplate(_) => "INVALID_TEMPLATE",
            ArbeitError::InvalidInput(_) => "INVALID_INPUT",
            ArbeitError::NoChangesMade(_) => "NO_CHANGES_MADE",
            ArbeitError::OutcomeAlreadySet(_) => "OUTCOME_ALREADY_SET",
            ArbeitError::AlreadySuperseded(_) => "ALREADY_SUPERSEDED",
            ArbeitError::TaskCreateFailed => "TASK_CREATE_FAILED",
            ArbeitError::TaskUpdateFailed(_) => "TASK_UPDATE_FAILED",
            ArbeitError::TaskDeleteFailed(_) => "TASK_DELETE_FAILED",
            ArbeitError::RelationshipCreateFailed => "RELATIONSHIP_CREATE_FAILED",
            ArbeitError::ContextCreateFailed => "CONTEXT_CREATE_FAILED",
            ArbeitError::ContextSupersedeFailed(_) => "CONTEXT_SUPERSEDE_FAILED",
        }
    }

    /// Hints an agent can act on to recover from this error.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            ArbeitError::NotInitialized(_) => {
                vec!["Run the `init` tool to initialize arbeit in this directory.".to_string()]
            },
            ArbeitError::TaskNotFound(_) => TASK_NOT_FOUND_SUGGESTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ArbeitError::ParentNotFound(_) => {
                vec!["Verify parent_id and try again.".to_string()]
            },
            ArbeitError::ItemNotFound(ids) => vec![
                format!("Missing ids: {}", ids.join(", ")),
                "Fetch valid ids with task_get and include [\"progress\"] or [\"steps\"].".to_string(),
            ],
            ArbeitError::BlockerNotFound(ids) => {
                vec![format!("Missing blocked_by IDs: {}", ids.join(", "))]
            },
            ArbeitError::CircularDependency { .. } => vec![
                "Inspect the hierarchy with ancestors_of / descendants_of before linking.".to_string(),
            ],
            ArbeitError::MaxDepthExceeded { .. } => vec![
                "Attach the task higher in the hierarchy; trees are limited to 4 levels below the root."
                    .to_string(),
            ],
            ArbeitError::MultipleParents { .. } => vec![
                "Remove the existing parent_of relationship or re-parent with task_update(parent_id)."
                    .to_string(),
            ],
            ArbeitError::InvalidBlocker(_) => {
                vec!["Remove the task id from blocked_by.".to_string()]
            },
            ArbeitError::DuplicateBlockers(_) => {
                vec!["Remove duplicate ids from blocked_by.".to_string()]
            },
            ArbeitError::HasBlockers(ids) => vec![format!(
                "Complete or cancel the blocking tasks first: {}",
                ids.join(", ")
            )],
            ArbeitError::HasChildren(_) => {
                vec!["Delete or re-parent the child tasks first.".to_string()]
            },
            ArbeitError::InvalidTemplate(_) => vec![format!(
                "Valid templates: {}",
                crate::templates::TEMPLATE_NAMES.join(", ")
            )],
            ArbeitError::AlreadySuperseded(_) => {
                vec!["Supersede the newest entry in the chain instead.".to_string()]
            },
            _ => Vec::new(),
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.to_error_code().to_string(),
            message: self.to_string(),
            suggestions: self.suggestions(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ArbeitError>;
