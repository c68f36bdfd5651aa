//! Per-GUID mutual exclusion.
//!
//! The violation and interval rules read and then write one server's state;
//! two requests for the same GUID must not interleave there.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

#[derive(Debug, Clone, Default)]
pub struct GuidLocks {
    table: Arc<LockTable>,
}

impl GuidLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder has `guid`.
    pub async fn lock(&self, guid: &str) -> GuidGuard {
        let mutex = Arc::clone(&self.table.entry(guid.to_owned()).or_default());
        let guard = mutex.lock_owned().await;
        GuidGuard {
            guard: Some(guard),
            guid: guid.to_owned(),
            table: Arc::clone(&self.table),
        }
    }

    /// GUIDs currently locked or waited on.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Releases the GUID on drop and forgets it once nobody else waits.
#[derive(Debug)]
pub struct GuidGuard {
    guard: Option<OwnedMutexGuard<()>>,
    guid: String,
    table: Arc<LockTable>,
}

impl Drop for GuidGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold their own clone, so a count of one means only the
        // table still references the mutex.
        self.table
            .remove_if(&self.guid, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn same_guid_is_exclusive() {
        let locks = GuidLocks::new();
        let first = locks.lock("a").await;

        let mut second = task::spawn(locks.lock("a"));
        assert_pending!(second.poll());

        drop(first);
        assert!(second.is_woken());
        let guard = assert_ready!(second.poll());
        drop(guard);
    }

    #[tokio::test]
    async fn different_guids_do_not_block() {
        let locks = GuidLocks::new();
        let _a = locks.lock("a").await;

        let mut other = task::spawn(locks.lock("b"));
        let _b = assert_ready!(other.poll());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn released_guids_are_forgotten() {
        let locks = GuidLocks::new();
        {
            let _guard = locks.lock("a").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_someone_waits() {
        let locks = GuidLocks::new();
        let first = locks.lock("a").await;
        let mut waiter = task::spawn(locks.lock("a"));
        assert_pending!(waiter.poll());

        drop(first);
        assert_eq!(locks.len(), 1);

        let guard = assert_ready!(waiter.poll());
        drop(guard);
        assert!(locks.is_empty());
    }
}
