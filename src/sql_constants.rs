//! Shared SQL column lists and fragments.
//!
//! Dynamic WHERE clauses are still built inline with `QueryBuilder`.

// ============================================================================
// Task Queries
// ============================================================================

/// Task columns, with `parent_id` projected from the `parent_of` edge.
pub const TASK_COLUMNS: &str = "t.id, t.title, t.type, t.status, t.intent, t.description, t.plan, \
     (SELECT r.from_task_id FROM task_relationships r \
      WHERE r.to_task_id = t.id AND r.type = 'parent_of') AS parent_id, \
     t.steps, t.current_step, t.discoveries, t.decisions, t.outcome, t.metadata, \
     t.created_at, t.updated_at";

/// Base SELECT for tasks, aliased as `t`. Add WHERE clauses as needed.
pub const SELECT_TASK: &str = const_format::formatcp!("SELECT {} FROM tasks t", TASK_COLUMNS);

pub const SELECT_TASK_BY_ID: &str = const_format::formatcp!("{} WHERE t.id = ?", SELECT_TASK);

/// Existence check that treats soft-deleted tasks as missing.
pub const CHECK_LIVE_TASK_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ? AND status != 'deleted')";

// ============================================================================
// Relationship Queries
// ============================================================================

pub const RELATIONSHIP_COLUMNS: &str =
    "id, from_task_id, to_task_id, type, metadata, created_at";

pub const SELECT_RELATIONSHIP: &str =
    const_format::formatcp!("SELECT {} FROM task_relationships", RELATIONSHIP_COLUMNS);

pub const CHECK_RELATIONSHIP_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM task_relationships \
     WHERE from_task_id = ? AND to_task_id = ? AND type = ?)";

/// Blockers of one task, in the order they were attached.
pub const SELECT_BLOCKERS: &str = "SELECT from_task_id FROM task_relationships \
     WHERE to_task_id = ? AND type = 'blocks' ORDER BY rowid";

/// `blocks` edges as `(blocked, blocker)`. Close the id list with
/// `") ORDER BY rowid"` to keep attachment order.
pub const SELECT_BLOCKERS_IN: &str = "SELECT to_task_id, from_task_id FROM task_relationships \
     WHERE type = 'blocks' AND to_task_id IN (";

/// Edges of one type whose endpoints are both live tasks.
pub const SELECT_LIVE_EDGES: &str = "SELECT r.from_task_id, r.to_task_id FROM task_relationships r \
     JOIN tasks f ON f.id = r.from_task_id \
     JOIN tasks t ON t.id = r.to_task_id \
     WHERE r.type = ? AND f.status != 'deleted' AND t.status != 'deleted' \
     ORDER BY r.rowid";

pub const SELECT_PARENT_ID: &str = "SELECT from_task_id FROM task_relationships \
     WHERE to_task_id = ? AND type = 'parent_of'";

pub const COUNT_LIVE_CHILDREN: &str = "SELECT COUNT(*) FROM task_relationships r \
     JOIN tasks c ON c.id = r.to_task_id \
     WHERE r.from_task_id = ? AND r.type = 'parent_of' AND c.status != 'deleted'";

pub const INSERT_RELATIONSHIP: &str = "INSERT INTO task_relationships \
     (id, from_task_id, to_task_id, type, metadata, created_at) VALUES (?, ?, ?, ?, ?, ?)";

// ============================================================================
// Context and Progress Queries
// ============================================================================

pub const CONTEXT_COLUMNS: &str =
    "id, task_id, type, content, metadata, superseded_by, created_at";

pub const SELECT_CONTEXT: &str =
    const_format::formatcp!("SELECT {} FROM context_entries", CONTEXT_COLUMNS);

pub const PROGRESS_COLUMNS: &str = "id, task_id, content, completed, created_at, completed_at";

pub const SELECT_PROGRESS: &str =
    const_format::formatcp!("SELECT {} FROM progress_items", PROGRESS_COLUMNS);
