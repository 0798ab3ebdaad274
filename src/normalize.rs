//! Relationship normalization.
//!
//! Every edge is stored in exactly one canonical direction. Inverse spellings
//! (`child_of`, `blocked_by`, `duplicated_by`, `split_into`) are accepted at the
//! API boundary and rewritten here before any lookup or write.

use crate::db::models::RelationshipType;
use crate::error::{ArbeitError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A relationship type as a caller may spell it, canonical or inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipInputType {
    ParentOf,
    ChildOf,
    Blocks,
    BlockedBy,
    RelatesTo,
    Duplicates,
    DuplicatedBy,
    SplitsFrom,
    SplitInto,
}

impl RelationshipInputType {
    pub const ALL: [RelationshipInputType; 9] = [
        RelationshipInputType::ParentOf,
        RelationshipInputType::ChildOf,
        RelationshipInputType::Blocks,
        RelationshipInputType::BlockedBy,
        RelationshipInputType::RelatesTo,
        RelationshipInputType::Duplicates,
        RelationshipInputType::DuplicatedBy,
        RelationshipInputType::SplitsFrom,
        RelationshipInputType::SplitInto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipInputType::ParentOf => "parent_of",
            RelationshipInputType::ChildOf => "child_of",
            RelationshipInputType::Blocks => "blocks",
            RelationshipInputType::BlockedBy => "blocked_by",
            RelationshipInputType::RelatesTo => "relates_to",
            RelationshipInputType::Duplicates => "duplicates",
            RelationshipInputType::DuplicatedBy => "duplicated_by",
            RelationshipInputType::SplitsFrom => "splits_from",
            RelationshipInputType::SplitInto => "split_into",
        }
    }

    /// Canonical counterpart and whether the endpoints must be swapped.
    pub fn canonical(&self) -> (RelationshipType, bool) {
        match self {
            RelationshipInputType::ParentOf => (RelationshipType::ParentOf, false),
            RelationshipInputType::ChildOf => (RelationshipType::ParentOf, true),
            RelationshipInputType::Blocks => (RelationshipType::Blocks, false),
            RelationshipInputType::BlockedBy => (RelationshipType::Blocks, true),
            RelationshipInputType::RelatesTo => (RelationshipType::RelatesTo, false),
            RelationshipInputType::Duplicates => (RelationshipType::Duplicates, false),
            RelationshipInputType::DuplicatedBy => (RelationshipType::Duplicates, true),
            RelationshipInputType::SplitsFrom => (RelationshipType::SplitsFrom, false),
            RelationshipInputType::SplitInto => (RelationshipType::SplitsFrom, true),
        }
    }
}

impl From<RelationshipType> for RelationshipInputType {
    fn from(value: RelationshipType) -> Self {
        match value {
            RelationshipType::ParentOf => RelationshipInputType::ParentOf,
            RelationshipType::Blocks => RelationshipInputType::Blocks,
            RelationshipType::RelatesTo => RelationshipInputType::RelatesTo,
            RelationshipType::Duplicates => RelationshipInputType::Duplicates,
            RelationshipType::SplitsFrom => RelationshipInputType::SplitsFrom,
        }
    }
}

impl FromStr for RelationshipInputType {
    type Err = ArbeitError;

    fn from_str(s: &str) -> Result<Self> {
        RelationshipInputType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ArbeitError::InvalidType(format!("unknown relationship type '{}'", s)))
    }
}

impl fmt::Display for RelationshipInputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical `(from, to, type)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedRelationship {
    pub from_task_id: String,
    pub to_task_id: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
}

/// Map any spelling of an edge onto its canonical triple.
pub fn normalize(from: &str, to: &str, input: RelationshipInputType) -> NormalizedRelationship {
    let (relationship_type, swap) = input.canonical();
    let (from, to) = if swap { (to, from) } else { (from, to) };

    NormalizedRelationship {
        from_task_id: from.to_string(),
        to_task_id: to.to_string(),
        relationship_type,
    }
}
