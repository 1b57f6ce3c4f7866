//! Store of generated tasks, shared by every request in the process.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::core::task::TaskSpec;

/// Generated tasks keyed by id. Cloning shares the same store.
///
/// Entries live until the process exits.
#[derive(Debug, Clone, Default)]
pub struct GeneratedTaskStore {
    tasks: Arc<RwLock<HashMap<String, Arc<TaskSpec>>>>,
}

impl GeneratedTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh unique id for a task about to be inserted.
    pub fn mint_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn insert(&self, task: Arc<TaskSpec>) {
        let mut tasks = self.tasks.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<Arc<TaskSpec>> {
        let tasks = self.tasks.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task_spec;
    use std::thread;

    #[test]
    fn concurrent_inserts_are_all_kept() {
        let store = GeneratedTaskStore::new();
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                thread::spawn(move || {
                    let mut task = task_spec(&format!("task_{n}"));
                    task.id = GeneratedTaskStore::mint_id();
                    let id = task.id.clone();
                    store.insert(Arc::new(task));
                    id
                })
            })
            .collect();
        let ids: Vec<String> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect();
        assert_eq!(store.len(), 8);
        for id in ids {
            assert!(store.get(&id).is_some());
        }
    }
}
