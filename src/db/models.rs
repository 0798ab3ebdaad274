use crate::error::{ArbeitError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Declares a closed set of snake_case string values stored as TEXT columns.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal, $err:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ArbeitError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ArbeitError::$err(format!("unknown {} '{}'", $label, other))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Kind of work a task represents; decides which fields it needs.
    TaskType, "task type", InvalidType {
        Epic => "epic",
        Feature => "feature",
        Bug => "bug",
        Investigation => "investigation",
        Chore => "chore",
    }
}

string_enum! {
    /// `Deleted` is a tombstone and never a valid target of a normal update.
    TaskStatus, "status", InvalidStatus {
        Open => "open",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
        Deleted => "deleted",
    }
}

string_enum! {
    StepStatus, "step status", InvalidStatus {
        Pending => "pending",
        InProgress => "in_progress",
        Completed => "completed",
        Skipped => "skipped",
    }
}

string_enum! {
    /// Canonical edge types. Inverse spellings live in [`crate::normalize`].
    RelationshipType, "relationship type", InvalidType {
        ParentOf => "parent_of",
        Blocks => "blocks",
        RelatesTo => "relates_to",
        Duplicates => "duplicates",
        SplitsFrom => "splits_from",
    }
}

string_enum! {
    ContextType, "context type", InvalidType {
        Decision => "decision",
        Attempt => "attempt",
        Blocker => "blocker",
        Note => "note",
        Reference => "reference",
        Discovery => "discovery",
    }
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    pub status: StepStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    pub id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    pub content: String,
    #[serde(default)]
    pub rationale: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Execution record embedded in a task: ordered steps, the step cursor, and
/// the append-only discovery and decision logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub steps: Vec<Step>,
    pub current_step: Option<i64>,
    pub discoveries: Vec<Discovery>,
    pub decisions: Vec<Decision>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub intent: Option<String>,
    pub description: Option<String>,
    pub plan: Option<String>,
    pub parent_id: Option<String>,
    pub blocked_by: Vec<String>,
    #[serde(flatten)]
    pub execution: Execution,
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_deleted(&self) -> bool {
        self.status == TaskStatus::Deleted
    }
}

/// Raw `tasks` row; JSON columns stay as text until [`TaskRow::into_task`].
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    #[sqlx(rename = "type")]
    pub task_type: String,
    pub status: String,
    pub intent: Option<String>,
    pub description: Option<String>,
    pub plan: Option<String>,
    pub parent_id: Option<String>,
    pub steps: String,
    pub current_step: Option<i64>,
    pub discoveries: String,
    pub decisions: String,
    pub outcome: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRow {
    pub fn into_task(self, blocked_by: Vec<String>) -> Result<Task> {
        Ok(Task {
            task_type: self.task_type.parse()?,
            status: self.status.parse()?,
            execution: Execution {
                steps: serde_json::from_str(&self.steps)?,
                current_step: self.current_step,
                discoveries: serde_json::from_str(&self.discoveries)?,
                decisions: serde_json::from_str(&self.decisions)?,
            },
            metadata: parse_metadata(self.metadata.as_deref())?,
            id: self.id,
            title: self.title,
            intent: self.intent,
            description: self.description,
            plan: self.plan,
            parent_id: self.parent_id,
            blocked_by,
            outcome: self.outcome,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from_task_id: String,
    pub to_task_id: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RelationshipRow {
    pub id: String,
    pub from_task_id: String,
    pub to_task_id: String,
    #[sqlx(rename = "type")]
    pub relationship_type: String,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RelationshipRow> for Relationship {
    type Error = ArbeitError;

    fn try_from(row: RelationshipRow) -> Result<Self> {
        Ok(Relationship {
            relationship_type: row.relationship_type.parse()?,
            metadata: parse_metadata(row.metadata.as_deref())?,
            id: row.id,
            from_task_id: row.from_task_id,
            to_task_id: row.to_task_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub id: String,
    pub task_id: String,
    #[serde(rename = "type")]
    pub context_type: ContextType,
    pub content: String,
    pub metadata: Option<Value>,
    pub superseded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ContextEntryRow {
    pub id: String,
    pub task_id: String,
    #[sqlx(rename = "type")]
    pub context_type: String,
    pub content: String,
    pub metadata: Option<String>,
    pub superseded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ContextEntryRow> for ContextEntry {
    type Error = ArbeitError;

    fn try_from(row: ContextEntryRow) -> Result<Self> {
        Ok(ContextEntry {
            context_type: row.context_type.parse()?,
            metadata: parse_metadata(row.metadata.as_deref())?,
            id: row.id,
            task_id: row.task_id,
            content: row.content,
            superseded_by: row.superseded_by,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProgressItem {
    pub id: String,
    pub task_id: String,
    pub content: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub completed: Vec<ProgressItem>,
    pub remaining: Vec<ProgressItem>,
}

/// Metadata column: NULL and the JSON literal `null` both read as `None`.
fn parse_metadata(raw: Option<&str>) -> Result<Option<Value>> {
    match raw {
        None => Ok(None),
        Some(text) => match serde_json::from_str::<Value>(text)? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        },
    }
}

pub(crate) fn encode_metadata(metadata: Option<&Value>) -> Result<Option<String>> {
    metadata.map(serde_json::to_string).transpose().map_err(Into::into)
}
