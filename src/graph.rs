//! In-memory adjacency over one relationship type.
//!
//! Graphs are small (hundreds of tasks), so each validation loads the edge
//! set for the type it needs and answers reachability and depth questions
//! with plain breadth-first traversal.

use crate::db::models::RelationshipType;
use crate::db::Database;
use crate::error::{ArbeitError, Result};
use crate::sql_constants::SELECT_LIVE_EDGES;
use std::collections::{HashMap, HashSet, VecDeque};

/// Maximum number of `parent_of` hops between a root and its deepest descendant.
pub const MAX_HIERARCHY_DEPTH: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    forward: HashMap<String, Vec<String>>,
    backward: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    pub fn from_edges<I, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut graph = TaskGraph::default();
        for (from, to) in edges {
            let (from, to): (String, String) = (from.into(), to.into());
            graph.add_edge(&from, &to);
        }
        graph
    }

    /// Load every edge of `relationship_type` between live tasks.
    pub async fn load(db: &Database, relationship_type: RelationshipType) -> Result<Self> {
        let edges: Vec<(String, String)> = sqlx::query_as(SELECT_LIVE_EDGES)
            .bind(relationship_type.as_str())
            .fetch_all(db.pool())
            .await?;
        Ok(Self::from_edges(edges))
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        let targets = self.forward.entry(from.to_string()).or_default();
        if targets.iter().any(|t| t == to) {
            return;
        }
        targets.push(to.to_string());
        self.backward
            .entry(to.to_string())
            .or_default()
            .push(from.to_string());
    }

    pub fn remove_edge(&mut self, from: &str, to: &str) {
        if let Some(targets) = self.forward.get_mut(from) {
            targets.retain(|t| t != to);
        }
        if let Some(sources) = self.backward.get_mut(to) {
            sources.retain(|s| s != from);
        }
    }

    /// Drop every edge pointing at `to`.
    pub fn remove_incoming(&mut self, to: &str) {
        for from in self.sources(to).to_vec() {
            self.remove_edge(&from, to);
        }
    }

    pub fn targets(&self, from: &str) -> &[String] {
        self.forward.get(from).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sources(&self, to: &str) -> &[String] {
        self.backward.get(to).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `target` can be reached from `start` by following edges forward.
    pub fn reaches(&self, start: &str, target: &str) -> bool {
        if start == target {
            return true;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(start);
        visited.insert(start);

        while let Some(current) = queue.pop_front() {
            for next in self.targets(current) {
                if next == target {
                    return true;
                }
                if visited.insert(next.as_str()) {
                    queue.push_back(next.as_str());
                }
            }
        }

        false
    }

    /// Every node reachable forward from `start`, in breadth-first order.
    pub fn descendants(&self, start: &str) -> Vec<String> {
        self.walk(start, |node| self.targets(node))
    }

    /// Every node reachable backward from `start`, nearest first.
    pub fn ancestors(&self, start: &str) -> Vec<String> {
        self.walk(start, |node| self.sources(node))
    }

    /// Longest chain of edges ending at `node`.
    pub fn ancestor_depth(&self, node: &str) -> usize {
        self.depth(node, |n| self.sources(n))
    }

    /// Longest chain of edges starting at `node`.
    pub fn descendant_depth(&self, node: &str) -> usize {
        self.depth(node, |n| self.targets(n))
    }

    fn walk<'a, F>(&'a self, start: &'a str, next: F) -> Vec<String>
    where
        F: Fn(&str) -> &'a [String],
    {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut order = Vec::new();
        visited.insert(start);
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            for neighbor in next(current) {
                if visited.insert(neighbor.as_str()) {
                    order.push(neighbor.clone());
                    queue.push_back(neighbor.as_str());
                }
            }
        }

        order
    }

    /// Level-by-level BFS; the visited set keeps malformed data from looping.
    fn depth<'a, F>(&'a self, start: &'a str, next: F) -> usize
    where
        F: Fn(&str) -> &'a [String],
    {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut frontier: Vec<&str> = vec![start];
        let mut depth = 0;
        visited.insert(start);

        loop {
            let mut level = Vec::new();
            for node in frontier {
                for neighbor in next(node) {
                    if visited.insert(neighbor.as_str()) {
                        level.push(neighbor.as_str());
                    }
                }
            }
            if level.is_empty() {
                return depth;
            }
            depth += 1;
            frontier = level;
        }
    }
}

/// Check a prospective `parent_of(from, to)` edge against the hierarchy.
///
/// Rejects an edge that closes a cycle, then one that pushes the tree past
/// [`MAX_HIERARCHY_DEPTH`] hops.
pub fn check_hierarchy(graph: &TaskGraph, from: &str, to: &str) -> Result<()> {
    if graph.reaches(to, from) {
        return Err(ArbeitError::CircularDependency {
            from_task_id: from.to_string(),
            to_task_id: to.to_string(),
        });
    }

    let depth = graph.ancestor_depth(from) + 1 + graph.descendant_depth(to);
    if depth > MAX_HIERARCHY_DEPTH {
        return Err(ArbeitError::MaxDepthExceeded {
            depth,
            max: MAX_HIERARCHY_DEPTH,
        });
    }

    Ok(())
}

/// Check a prospective `blocks(from, to)` edge for cycles.
pub fn check_blocking(graph: &TaskGraph, from: &str, to: &str) -> Result<()> {
    if graph.reaches(to, from) {
        return Err(ArbeitError::CircularDependency {
            from_task_id: from.to_string(),
            to_task_id: to.to_string(),
        });
    }
    Ok(())
}
