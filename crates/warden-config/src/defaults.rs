//! Stock values applied when a configuration document omits a field.
//!
//! # Design
//! - Keep every default in one place so the model, loader and dump agree.
//! - Time-based defaults are expressed in seconds for auditability.

/// Realm presented in challenges when none is configured.
pub const DEFAULT_REALM: &str = "Warden proxy-caching web server";
/// How long a successful verification is trusted before rechecking (2 hours).
pub const DEFAULT_CREDENTIALS_TTL_SECS: u64 = 2 * 60 * 60;
/// Upper bound on helper processes.
pub const DEFAULT_CHILDREN_MAX: usize = 20;
/// Helpers spawned before the first request arrives.
pub const DEFAULT_CHILDREN_STARTUP: usize = 0;
/// Helpers kept warm and respawned eagerly after exit.
pub const DEFAULT_CHILDREN_IDLE: usize = 1;
/// Requests a single helper may service concurrently.
pub const DEFAULT_CHILDREN_CONCURRENCY: usize = 1;
/// Queue slots granted per helper when no explicit queue limit is set.
pub const QUEUE_SLOTS_PER_CHILD: usize = 2;
/// Log level used when neither the document nor `RUST_LOG` provide one.
pub const DEFAULT_LOG_LEVEL: &str = "info";
