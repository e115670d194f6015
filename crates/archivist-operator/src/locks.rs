//! Per-archive mutual exclusion
//!
//! Create and delete of the same archive never overlap: a delete started by
//! the sync timer waits for an in-flight create step and vice versa.
//! Different archives never share a lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use archivist_common::ArchiveId;

/// Lazily created async mutex per [`ArchiveId`]
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<ArchiveId, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`
    pub async fn lock(&self, id: &ArchiveId) -> OwnedMutexGuard<()> {
        // the map guard must be released before awaiting
        let mutex = self.locks.entry(id.clone()).or_default().clone();
        mutex.lock_owned().await
    }

    /// Drop the entry of `id` if nobody holds or waits for it
    pub fn forget(&self, id: &ArchiveId) {
        self.locks
            .remove_if(id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Number of archives with a lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Check if no archive has a lock entry
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_archive_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let id = ArchiveId::new("ecosystem", "sa-1");

        let guard = locks.lock(&id).await;

        let waiter_locks = locks.clone();
        let waiter_id = id.clone();
        let waiter = tokio::spawn(async move {
            let _guard = waiter_locks.lock(&waiter_id).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_archives_do_not_contend() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(&ArchiveId::new("ecosystem", "sa-1")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(&ArchiveId::new("ecosystem", "sa-2")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn forget_keeps_held_entries() {
        let locks = KeyedLocks::new();
        let id = ArchiveId::new("ecosystem", "sa-1");

        let guard = locks.lock(&id).await;
        locks.forget(&id);
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.forget(&id);
        assert!(locks.is_empty());
    }
}
