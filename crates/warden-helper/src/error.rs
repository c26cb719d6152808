//! Error types for helper pool operations.

use std::time::Duration;

use thiserror::Error;

/// Result alias for helper pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Failures surfaced by the helper pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool was started without a program or without worker slots.
    #[error("helper pool is not configured")]
    NotConfigured,
    /// The admission queue is full.
    #[error("helper queue overloaded")]
    Overloaded {
        /// Configured queue bound.
        queue_limit: usize,
    },
    /// The pool has been shut down.
    #[error("helper pool is shut down")]
    ShutDown,
    /// The request line contained a line break.
    #[error("helper request contains a line break")]
    InvalidRequest,
    /// Launching the helper process failed.
    #[error("failed to spawn helper")]
    Spawn {
        /// Executable that failed to start.
        program: String,
        /// Operating system error detail.
        detail: String,
    },
    /// The helper exited or its pipes failed before it replied.
    #[error("helper exited before replying")]
    HelperExited {
        /// Worker slot that owned the helper.
        worker: usize,
    },
    /// The helper did not reply before the request deadline.
    #[error("helper did not reply in time")]
    Timeout {
        /// Deadline that elapsed.
        timeout: Duration,
    },
}

impl PoolError {
    /// Whether the request never reached a helper.
    #[must_use]
    pub const fn is_admission_failure(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured | Self::Overloaded { .. } | Self::ShutDown | Self::InvalidRequest
        )
    }
}
