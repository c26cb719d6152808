//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers; IO lives in `loader.rs`, checks in `validate.rs`.
//! - Every field has a default so partial documents stay valid.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_CHILDREN_CONCURRENCY, DEFAULT_CHILDREN_IDLE, DEFAULT_CHILDREN_MAX,
    DEFAULT_CHILDREN_STARTUP, DEFAULT_CREDENTIALS_TTL_SECS, DEFAULT_LOG_LEVEL, DEFAULT_REALM,
    QUEUE_SLOTS_PER_CHILD,
};

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WardenConfig {
    /// Basic authentication scheme settings.
    pub basic: BasicAuthConfig,
    /// Logging output settings.
    pub logging: LoggingSettings,
}

/// Settings for the Basic authentication scheme and its helper pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BasicAuthConfig {
    /// Helper program and arguments; empty disables the scheme.
    pub program: Vec<String>,
    /// Realm presented in `Basic realm="..."` challenges.
    pub realm: String,
    /// Helper pool sizing.
    pub children: ChildrenConfig,
    /// Seconds a successful verification is trusted before rechecking.
    pub credentials_ttl_secs: u64,
    /// Treat usernames case-sensitively when keying the user cache.
    pub case_sensitive: bool,
    /// Transcode credentials from Latin-1 to UTF-8 before handing them to helpers.
    pub utf8: bool,
    /// Maximum queued helper requests; defaults to twice the helper count.
    pub queue_limit: Option<usize>,
    /// Per-request helper timeout in seconds; `None` waits indefinitely.
    pub request_timeout_secs: Option<u64>,
}

/// Helper pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChildrenConfig {
    /// Maximum helper processes.
    pub max: usize,
    /// Helpers spawned at startup.
    pub startup: usize,
    /// Helpers kept warm.
    pub idle: usize,
    /// Concurrent requests per helper.
    pub concurrency: usize,
}

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// `json` or `pretty`; inferred from the build profile when absent.
    pub format: Option<String>,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self {
            program: Vec::new(),
            realm: DEFAULT_REALM.to_string(),
            children: ChildrenConfig::default(),
            credentials_ttl_secs: DEFAULT_CREDENTIALS_TTL_SECS,
            case_sensitive: false,
            utf8: false,
            queue_limit: None,
            request_timeout_secs: None,
        }
    }
}

impl Default for ChildrenConfig {
    fn default() -> Self {
        Self {
            max: DEFAULT_CHILDREN_MAX,
            startup: DEFAULT_CHILDREN_STARTUP,
            idle: DEFAULT_CHILDREN_IDLE,
            concurrency: DEFAULT_CHILDREN_CONCURRENCY,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: None,
        }
    }
}

impl BasicAuthConfig {
    /// Whether enough is configured for the scheme to be offered to clients.
    #[must_use]
    pub fn configured(&self) -> bool {
        !self.program.is_empty() && self.children.max != 0 && !self.realm.is_empty()
    }

    /// Credential freshness window.
    #[must_use]
    pub const fn credentials_ttl(&self) -> Duration {
        Duration::from_secs(self.credentials_ttl_secs)
    }

    /// Per-request helper timeout, if any.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Queue bound applied by the helper pool.
    #[must_use]
    pub fn effective_queue_limit(&self) -> usize {
        self.queue_limit
            .unwrap_or_else(|| self.children.max.saturating_mul(QUEUE_SLOTS_PER_CHILD))
            .max(1)
    }

    /// Render the effective settings as `auth_param`-style directive lines.
    #[must_use]
    pub fn dump(&self, name: &str) -> String {
        let mut out = format!("{name} basic");
        for word in &self.program {
            out.push(' ');
            out.push_str(word);
        }
        out.push('\n');
        let _ = writeln!(out, "{name} basic realm {}", self.realm);
        let _ = writeln!(
            out,
            "{name} basic children {} startup={} idle={} concurrency={}",
            self.children.max,
            self.children.startup,
            self.children.idle,
            self.children.concurrency
        );
        let _ = writeln!(
            out,
            "{name} basic credentialsttl {} seconds",
            self.credentials_ttl_secs
        );
        let _ = writeln!(
            out,
            "{name} basic casesensitive {}",
            on_off(self.case_sensitive)
        );
        let _ = writeln!(out, "{name} basic utf8 {}", on_off(self.utf8));
        out
    }
}

const fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
