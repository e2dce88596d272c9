//! Exact-count shutdown barrier.
//!
//! The supervisor registers one unit per background task that must report
//! before the stop sequence may continue. Each task completes its unit
//! exactly once. Completing more units than were registered is an error
//! rather than a silent wrap, since a mismatch is what makes shutdown hang.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Error type for barrier operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarrierError {
    /// A unit was completed with no outstanding registration.
    #[error("shutdown barrier completed more units than registered")]
    Underflow,
    /// The barrier did not reach zero within the allowed time.
    #[error("shutdown barrier timed out with {outstanding} unit(s) outstanding")]
    TimedOut { outstanding: usize },
}

/// Counting barrier, the gateway's equivalent of a wait group.
#[derive(Debug, Clone)]
pub struct ShutdownBarrier {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    outstanding: watch::Sender<usize>,
    registered: AtomicUsize,
    completed: AtomicUsize,
}

impl ShutdownBarrier {
    /// Create an empty barrier.
    pub fn new() -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                outstanding,
                registered: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }),
        }
    }

    /// Register `units` additional completions to wait for.
    pub fn add(&self, units: usize) {
        self.inner.registered.fetch_add(units, Ordering::SeqCst);
        self.inner.outstanding.send_modify(|n| *n += units);
    }

    /// Complete one unit.
    pub fn done(&self) -> Result<(), BarrierError> {
        let mut result = Ok(());
        self.inner.outstanding.send_if_modified(|n| {
            if *n == 0 {
                result = Err(BarrierError::Underflow);
                false
            } else {
                *n -= 1;
                true
            }
        });
        if result.is_ok() {
            self.inner.completed.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    /// Units registered and not yet completed.
    pub fn outstanding(&self) -> usize {
        *self.inner.outstanding.borrow()
    }

    /// Total units registered over the barrier's lifetime.
    pub fn registered(&self) -> usize {
        self.inner.registered.load(Ordering::SeqCst)
    }

    /// Total units completed over the barrier's lifetime.
    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::SeqCst)
    }

    /// Wait until every registered unit has completed.
    ///
    /// There is no deadline: a task that never observes cancellation keeps
    /// this pending forever. Use [`ShutdownBarrier::wait_timeout`] to bound it.
    pub async fn wait(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Wait for the barrier with a deadline.
    pub async fn wait_timeout(&self, limit: Duration) -> Result<(), BarrierError> {
        tokio::time::timeout(limit, self.wait())
            .await
            .map_err(|_| BarrierError::TimedOut {
                outstanding: self.outstanding(),
            })
    }
}

impl Default for ShutdownBarrier {
    fn default() -> Self {
        Self::new()
    }
}
