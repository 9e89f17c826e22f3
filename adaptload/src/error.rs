//! Error taxonomy for content loading.
//!
//! Every failure a unit or image load can hit maps onto one [`LoadError`]
//! variant. Whether the error reaches a caller depends on the active
//! strategy: with graceful degradation enabled the coordinator recovers
//! locally and hands back `None` instead.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while resolving or fetching a unit of content.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    /// The unit did not resolve within the strategy timeout.
    #[error("Loading '{unit}' timed out after {}ms", timeout.as_millis())]
    ResolutionTimeout {
        /// Identifier of the unit that timed out.
        unit: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// The unit source reported a failure.
    #[error("Failed to load '{unit}': {reason}")]
    ResolutionFailure {
        /// Identifier of the unit that failed.
        unit: String,
        /// Human-readable cause reported by the source.
        reason: String,
    },

    /// An in-flight request was aborted through its cancellation token.
    #[error("Request aborted")]
    NetworkAbort,

    /// All retry attempts failed.
    #[error("Gave up after {attempts} attempts: {last}")]
    ExhaustedRetries {
        /// Number of attempts made, including the first one.
        attempts: u32,
        /// Message of the last failure.
        last: String,
    },

    /// The owning consumer was disposed while the operation was pending.
    ///
    /// Never surfaced to UI: there is nothing left to render it.
    #[error("Consumer disposed during operation")]
    UnmountedDuringOperation,

    /// A dynamic unit id was requested but no dynamic source is registered.
    #[error("No source registered for unit '{0}'")]
    UnregisteredUnit(String),
}

impl LoadError {
    /// Convenience constructor for source failures.
    pub fn failure(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResolutionFailure {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error was caused by the consumer going away.
    ///
    /// Such errors are swallowed instead of being written to loading state.
    pub fn is_unmounted(&self) -> bool {
        matches!(self, Self::UnmountedDuringOperation)
    }
}
