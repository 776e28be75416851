//! Dependency graph for managing task dependencies.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (waits for)
//! - Reverse edges: task -> tasks that depend on it (waiting tasks)
//! - Invariant: edges and reverse_edges must be kept in sync
//!
//! Dependencies are immutable after registration and may only reference tasks
//! that already exist, so the graph is acyclic by construction.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::domain::TaskId;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward edges: task -> tasks it depends on (waits for)
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// Reverse edges: task -> tasks that depend on it
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency: `task` depends on `depends_on`.
    ///
    /// add_dependency(task_b, task_a) means "B waits for A"
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
        self.reverse_edges
            .entry(depends_on)
            .or_default()
            .insert(task);
    }

    /// Drop a task and every edge touching it.
    pub fn remove_task(&mut self, task: TaskId) {
        if let Some(deps) = self.edges.remove(&task) {
            for dep in deps {
                remove_edge(&mut self.reverse_edges, dep, task);
            }
        }
        if let Some(dependents) = self.reverse_edges.remove(&task) {
            for dependent in dependents {
                remove_edge(&mut self.edges, dependent, task);
            }
        }
    }

    /// Tasks that declared a dependency on `task`.
    pub fn get_dependents(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }
}

fn remove_edge(map: &mut HashMap<TaskId, HashSet<TaskId>>, from: TaskId, to: TaskId) {
    if let Entry::Occupied(mut e) = map.entry(from) {
        e.get_mut().remove(&to);
        if e.get().is_empty() {
            e.remove_entry();
        }
    }
}

// 読み取り用の補助はテストからのみ使う
#[cfg(test)]
impl DependencyGraph {
    fn has_dependents(&self, task: TaskId) -> bool {
        self.reverse_edges
            .get(&task)
            .map(|deps| !deps.is_empty())
            .unwrap_or(false)
    }

    fn has_dependencies(&self, task: TaskId) -> bool {
        self.edges
            .get(&task)
            .map(|deps| !deps.is_empty())
            .unwrap_or(false)
    }

    fn get_dependencies(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }
}
