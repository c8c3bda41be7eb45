//! # Worker Registry
//!
//! A concurrent set of file paths currently being followed. This is the only
//! synchronization point between the [`crate::scheduler::GlobScheduler`],
//! which checks and adds paths, and [`crate::follower::FollowerWorker`]s,
//! which remove their own path on exit. Guaranteeing at-most-one active
//! follower per path is the entire point of this type: the scheduler must
//! `add` a path before spawning its worker, never after, or a second pass
//! can race the worker startup and spawn a duplicate follower.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Concurrent registry of in-flight follower paths.
#[derive(Default)]
pub struct WorkerRegistry {
    paths: RwLock<HashSet<PathBuf>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `path` is currently registered.
    pub fn exists(&self, path: &Path) -> bool {
        self.paths.read().expect("registry lock poisoned").contains(path)
    }

    /// Register `path`. A no-op if already present.
    pub fn add(&self, path: PathBuf) {
        self.paths.write().expect("registry lock poisoned").insert(path);
    }

    /// Unregister `path`. A no-op if absent.
    pub fn remove(&self, path: &Path) {
        self.paths.write().expect("registry lock poisoned").remove(path);
    }

    /// Number of paths currently registered. Exposed for diagnostics and tests.
    pub fn len(&self) -> usize {
        self.paths.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn add_then_remove_clears_membership() {
        let reg = WorkerRegistry::new();
        let path = PathBuf::from("/tmp/a.log");
        reg.add(path.clone());
        assert!(reg.exists(&path));
        reg.remove(&path);
        assert!(!reg.exists(&path));
    }

    #[test]
    fn double_add_is_idempotent() {
        let reg = WorkerRegistry::new();
        let path = PathBuf::from("/tmp/a.log");
        reg.add(path.clone());
        reg.add(path.clone());
        assert_eq!(reg.len(), 1);
        reg.remove(&path);
        assert!(!reg.exists(&path));
    }

    #[test]
    fn remove_of_absent_path_is_a_no_op() {
        let reg = WorkerRegistry::new();
        reg.remove(&PathBuf::from("/tmp/never-added.log"));
        assert!(reg.is_empty());
    }

    #[test]
    fn concurrent_add_remove_on_distinct_keys_is_consistent() {
        let reg = Arc::new(WorkerRegistry::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let reg = Arc::clone(&reg);
            handles.push(thread::spawn(move || {
                let path = PathBuf::from(format!("/tmp/file-{i}.log"));
                reg.add(path.clone());
                assert!(reg.exists(&path));
                reg.remove(&path);
                assert!(!reg.exists(&path));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(reg.is_empty());
    }
}
