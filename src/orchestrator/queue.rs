//! Task Queue: the dependency map the phase executor walks to find
//! ready-to-run subtasks (SPEC_FULL.md 4.6).

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

struct Entry<T> {
    item: T,
    dependencies: HashSet<Uuid>,
}

/// A generic dependency-ordered queue over items identified by `Uuid`.
/// Used by the phase executor with `T = Subtask`, but kept generic so it
/// carries no phase-specific assumptions.
pub struct TaskQueue<T> {
    entries: HashMap<Uuid, Entry<T>>,
    completed: HashSet<Uuid>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            completed: HashSet::new(),
        }
    }

    pub fn add_task(&mut self, id: Uuid, dependencies: Vec<Uuid>, item: T) {
        self.entries.insert(
            id,
            Entry {
                item,
                dependencies: dependencies.into_iter().collect(),
            },
        );
    }

    /// All not-yet-completed items whose dependency set is a subset of the
    /// completed-id set.
    pub fn available_tasks(&self) -> Vec<&Uuid> {
        self.entries
            .iter()
            .filter(|(id, entry)| {
                !self.completed.contains(*id) && entry.dependencies.is_subset(&self.completed)
            })
            .map(|(id, _)| id)
            .collect()
    }

    pub fn get(&self, id: &Uuid) -> Option<&T> {
        self.entries.get(id).map(|e| &e.item)
    }

    pub fn mark_completed(&mut self, id: Uuid) {
        self.completed.insert(id);
    }

    pub fn is_complete(&self) -> bool {
        self.entries.keys().all(|id| self.completed.contains(id))
    }

    pub fn remaining(&self) -> usize {
        self.entries.len() - self.completed.len()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_tasks_respects_dependencies() {
        let mut q: TaskQueue<&str> = TaskQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        q.add_task(a, Vec::new(), "a");
        q.add_task(b, vec![a], "b");

        assert_eq!(q.available_tasks(), vec![&a]);
        q.mark_completed(a);
        assert_eq!(q.available_tasks(), vec![&b]);
        q.mark_completed(b);
        assert!(q.is_complete());
        assert_eq!(q.remaining(), 0);
    }
}
