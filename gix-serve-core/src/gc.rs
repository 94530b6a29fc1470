//! Per-repository locks held while garbage is collected.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// The set of repositories currently being collected.
///
/// Shared between the command running the collection and the resolver, which refuses access meanwhile.
#[derive(Debug, Default, Clone)]
pub struct CollectionLocks {
    collecting: Arc<Mutex<HashSet<PathBuf>>>,
}

impl CollectionLocks {
    /// Lock the repository at `git_dir`, or return `None` if it is being collected already.
    pub fn try_lock(&self, git_dir: &Path) -> Option<CollectionGuard> {
        let inserted = self
            .collecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(git_dir.to_owned());
        inserted.then(|| CollectionGuard {
            locks: self.clone(),
            git_dir: git_dir.to_owned(),
        })
    }

    /// Return `true` if the repository at `git_dir` is being collected.
    pub fn is_collecting(&self, git_dir: &Path) -> bool {
        self.collecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(git_dir)
    }
}

/// Releases the lock of a repository when dropped.
#[derive(Debug)]
pub struct CollectionGuard {
    locks: CollectionLocks,
    git_dir: PathBuf,
}

impl Drop for CollectionGuard {
    fn drop(&mut self) {
        self.locks
            .collecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.git_dir);
    }
}
