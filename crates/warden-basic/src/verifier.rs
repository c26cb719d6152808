//! Verifier seam and the helper-pool backed implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;
use warden_config::BasicAuthConfig;
use warden_helper::{HelperPool, HelperPoolConfig};

use crate::coordinator::BasicSettings;
use crate::credentials::Credentials;
use crate::error::{BasicError, BasicResult, VerifierError};
use crate::protocol::{Verdict, encode_request, parse_reply};

/// Something that can confirm a username/password pair.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Check one credential pair.
    async fn check(&self, credentials: &Credentials) -> Result<Verdict, VerifierError>;

    /// Apply reloaded settings. The default ignores them.
    fn reconfigure(&self, _settings: &BasicSettings) {}
}

/// Pool name used for Basic credential helpers.
pub const HELPER_POOL_NAME: &str = "basicauthenticator";

/// Helper pool settings derived from the scheme configuration.
#[must_use]
pub fn helper_pool_config(config: &BasicAuthConfig) -> HelperPoolConfig {
    let mut pool = HelperPoolConfig::new(HELPER_POOL_NAME, config.program.clone());
    pool.max = config.children.max;
    pool.startup = config.children.startup;
    pool.idle = config.children.idle;
    pool.concurrency = config.children.concurrency;
    pool.queue_limit = config.effective_queue_limit();
    pool.timeout = config.request_timeout();
    pool
}

/// Verifier that forwards credentials to external helper processes.
pub struct HelperVerifier {
    pool: Arc<HelperPool>,
    utf8: AtomicBool,
}

impl HelperVerifier {
    /// Wrap an already running pool.
    #[must_use]
    pub const fn new(pool: Arc<HelperPool>, utf8: bool) -> Self {
        Self {
            pool,
            utf8: AtomicBool::new(utf8),
        }
    }

    /// Start a pool for `config` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`BasicError::HelperPool`] when the pool cannot start.
    pub fn start(config: &BasicAuthConfig) -> BasicResult<Self> {
        let pool = HelperPool::start(helper_pool_config(config))
            .map_err(|source| BasicError::HelperPool { source })?;
        Ok(Self::new(Arc::new(pool), config.utf8))
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<HelperPool> {
        &self.pool
    }
}

#[async_trait]
impl CredentialVerifier for HelperVerifier {
    async fn check(&self, credentials: &Credentials) -> Result<Verdict, VerifierError> {
        let line = encode_request(credentials, self.utf8.load(Ordering::Relaxed));
        let reply = self.pool.submit(line)?.wait().await?;
        debug!(username = %credentials.username_lossy(), "helper replied");
        Ok(parse_reply(&reply))
    }

    fn reconfigure(&self, settings: &BasicSettings) {
        self.utf8.store(settings.utf8, Ordering::Relaxed);
    }
}
