//! Awaiting-completion bookkeeping
//!
//! The storage write pipeline may only finalize a snapshot once every
//! streamed collection has reported its completion status. The producer
//! registers one expected completion per non-deleted collection; the
//! pipeline marks one off per status callback.
//!
//! Deleted (tombstone) collections never stream and never report, so they
//! are never registered here — registering one would stall
//! [`PendingCompletions::wait_idle`] forever.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;

/// Counter of completion signals the write pipeline still expects
#[derive(Debug, Default)]
pub struct PendingCompletions {
    count: AtomicI64,
    idle: Notify,
}

impl PendingCompletions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers one expected completion.
    pub fn register(&self) {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(pending = n, "completion registered");
    }

    /// Marks one completion received.
    pub fn complete(&self) {
        let n = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(pending = n, "completion received");
        if n <= 0 {
            self.idle.notify_waiters();
        }
    }

    /// Completions still outstanding.
    pub fn outstanding(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Waits until every registered completion has been received.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count.load(Ordering::SeqCst) <= 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_register_and_complete() {
        let pending = PendingCompletions::new();
        pending.register();
        pending.register();
        assert_eq!(pending.outstanding(), 2);

        pending.complete();
        assert_eq!(pending.outstanding(), 1);
        pending.complete();
        assert_eq!(pending.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let pending = PendingCompletions::new();
        tokio::time::timeout(Duration::from_millis(50), pending.wait_idle())
            .await
            .expect("wait_idle should not block with nothing registered");
    }

    #[tokio::test]
    async fn test_wait_idle_blocks_until_all_complete() {
        let pending = PendingCompletions::new();
        pending.register();
        pending.register();

        let waiter = {
            let pending = Arc::clone(&pending);
            tokio::spawn(async move { pending.wait_idle().await })
        };

        // Still waiting after one completion
        pending.complete();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pending.complete();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("wait_idle should return after final completion")
            .unwrap();
    }
}
