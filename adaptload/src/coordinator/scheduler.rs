//! Idle scheduling for low-priority work.
//!
//! Preloads and below-the-fold images wait for an "idle" moment before
//! starting. What idle means depends on the host, so it sits behind a trait.

use std::time::Duration;

use futures::future::BoxFuture;

/// Delay used when no native idle signal exists.
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(100);

/// Resolves when the host has spare capacity.
pub trait IdleScheduler: Send + Sync {
    fn idle(&self) -> BoxFuture<'_, ()>;
}

/// Yields once to the tokio scheduler, letting queued tasks run first.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioIdleScheduler;

impl IdleScheduler for TokioIdleScheduler {
    fn idle(&self) -> BoxFuture<'_, ()> {
        Box::pin(tokio::task::yield_now())
    }
}

/// Waits a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct DeferredIdleScheduler {
    delay: Duration,
}

impl DeferredIdleScheduler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for DeferredIdleScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_DELAY)
    }
}

impl IdleScheduler for DeferredIdleScheduler {
    fn idle(&self) -> BoxFuture<'_, ()> {
        Box::pin(tokio::time::sleep(self.delay))
    }
}
