//! Pool sizing and helper command line.

use std::time::Duration;

/// Settings for a [`crate::HelperPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperPoolConfig {
    /// Name used in log lines.
    pub name: String,
    /// Helper executable followed by its arguments.
    pub program: Vec<String>,
    /// Worker slots, one helper process each.
    pub max: usize,
    /// Helpers spawned when the pool starts.
    pub startup: usize,
    /// Helpers respawned eagerly after they exit.
    pub idle: usize,
    /// Requests a single helper services at once.
    pub concurrency: usize,
    /// Requests allowed to wait for a free helper.
    pub queue_limit: usize,
    /// Per-request deadline.
    pub timeout: Option<Duration>,
}

impl HelperPoolConfig {
    /// Single-helper configuration running `program`.
    #[must_use]
    pub fn new(name: impl Into<String>, program: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program,
            max: 1,
            startup: 0,
            idle: 0,
            concurrency: 1,
            queue_limit: 2,
            timeout: None,
        }
    }

    pub(crate) fn uses_channel_ids(&self) -> bool {
        self.concurrency > 1
    }
}
