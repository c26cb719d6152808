//! Verification coordinator.
//!
//! Every request is decoded, matched against the user cache and then either
//! answered from the cache or queued behind the single in-flight attempt for
//! that user. Attempts run on spawned tasks; their verdict is fanned out to
//! every queued caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_config::BasicAuthConfig;
use warden_config::defaults::{DEFAULT_CREDENTIALS_TTL_SECS, DEFAULT_REALM};
use warden_telemetry::Metrics;

use crate::cache::{InFlight, PendingCaller, UserCache, UserRecord, VerificationState};
use crate::credentials::{Credentials, decode};
use crate::error::{AuthDenial, BasicError, BasicResult, VerifierError};
use crate::identity::{AuthOutcome, Challenge, ChallengeSlot, Identity};
use crate::protocol::Verdict;
use crate::verifier::CredentialVerifier;

/// Settings the coordinator consults on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicSettings {
    /// Realm presented in challenges.
    pub realm: String,
    /// How long an accepted verdict is reused.
    pub credentials_ttl: Duration,
    /// Whether usernames are compared exactly.
    pub case_sensitive: bool,
    /// Whether helpers expect UTF-8 rather than raw Latin-1.
    pub utf8: bool,
    /// Whether the scheme may be offered to clients.
    pub configured: bool,
}

impl Default for BasicSettings {
    fn default() -> Self {
        Self {
            realm: DEFAULT_REALM.to_string(),
            credentials_ttl: Duration::from_secs(DEFAULT_CREDENTIALS_TTL_SECS),
            case_sensitive: false,
            utf8: false,
            configured: false,
        }
    }
}

impl From<&BasicAuthConfig> for BasicSettings {
    fn from(config: &BasicAuthConfig) -> Self {
        Self {
            realm: config.realm.clone(),
            credentials_ttl: config.credentials_ttl(),
            case_sensitive: config.case_sensitive,
            utf8: config.utf8,
            configured: config.configured(),
        }
    }
}

/// Counters describing coordinator activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BasicStats {
    /// Requests handled.
    pub verifications_total: u64,
    /// Requests answered from a fresh cached verdict.
    pub cache_hits: u64,
    /// Requests that had to wait for a verifier.
    pub cache_misses: u64,
    /// Attempts currently waiting on a verifier.
    pub in_flight: usize,
    /// Users in the cache.
    pub cached_users: usize,
}

/// Answer to [`BasicAuthenticator::verify`].
#[derive(Debug)]
pub enum Verification {
    /// Answered without waiting.
    Ready(AuthOutcome),
    /// Waiting on an in-flight attempt.
    Queued(PendingOutcome),
}

impl Verification {
    /// Resolve to the final outcome.
    pub async fn outcome(self) -> AuthOutcome {
        match self {
            Self::Ready(outcome) => outcome,
            Self::Queued(pending) => pending.wait().await,
        }
    }

    /// Whether the outcome is already known.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Handle to the outcome of a queued request.
#[derive(Debug)]
pub struct PendingOutcome {
    username: String,
    rx: oneshot::Receiver<AuthOutcome>,
}

impl PendingOutcome {
    /// Wait for the verdict. Resolves to a shutdown denial if the
    /// authenticator goes away first.
    pub async fn wait(self) -> AuthOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => AuthOutcome::shutting_down(Some(self.username)),
        }
    }
}

struct State {
    settings: BasicSettings,
    cache: UserCache,
    shutting_down: bool,
}

#[derive(Default)]
struct Counters {
    verifications: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

struct Inner {
    state: Mutex<State>,
    verifier: Arc<dyn CredentialVerifier>,
    runtime: Handle,
    shutdown: watch::Sender<bool>,
    counters: Counters,
    metrics: Option<Metrics>,
}

/// Attempt handed to a background task.
struct Attempt {
    key: Vec<u8>,
    credentials: Credentials,
    in_flight: InFlight,
}

/// Basic scheme authenticator shared by all request handlers.
#[derive(Clone)]
pub struct BasicAuthenticator {
    inner: Arc<Inner>,
}

impl BasicAuthenticator {
    /// Build an authenticator around `verifier`. Must be called from within
    /// a Tokio runtime; attempts are spawned onto it.
    ///
    /// # Errors
    ///
    /// Returns [`BasicError::Runtime`] outside a runtime.
    pub fn new(settings: BasicSettings, verifier: Arc<dyn CredentialVerifier>) -> BasicResult<Self> {
        Self::build(settings, verifier, None)
    }

    /// Like [`BasicAuthenticator::new`], recording activity in `metrics`.
    ///
    /// # Errors
    ///
    /// Returns [`BasicError::Runtime`] outside a runtime.
    pub fn with_metrics(
        settings: BasicSettings,
        verifier: Arc<dyn CredentialVerifier>,
        metrics: Metrics,
    ) -> BasicResult<Self> {
        Self::build(settings, verifier, Some(metrics))
    }

    fn build(
        settings: BasicSettings,
        verifier: Arc<dyn CredentialVerifier>,
        metrics: Option<Metrics>,
    ) -> BasicResult<Self> {
        let runtime = Handle::try_current().map_err(|source| BasicError::Runtime { source })?;
        let (shutdown, _) = watch::channel(false);
        info!(
            realm = %settings.realm,
            ttl_secs = settings.credentials_ttl.as_secs(),
            case_sensitive = settings.case_sensitive,
            "basic authenticator ready"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    settings,
                    cache: UserCache::new(),
                    shutting_down: false,
                }),
                verifier,
                runtime,
                shutdown,
                counters: Counters::default(),
                metrics,
            }),
        })
    }

    /// Authenticate one `Proxy-Authorization` header value.
    ///
    /// Never blocks: the answer is either ready now or delivered once the
    /// in-flight attempt for the user completes.
    pub fn verify(&self, header: impl AsRef<[u8]>) -> Verification {
        let inner = &self.inner;
        inner.counters.verifications.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &inner.metrics {
            metrics.inc_verification();
        }

        let mut state = inner.lock_state();
        if state.shutting_down {
            return Verification::Ready(AuthOutcome::shutting_down(None));
        }

        let credentials = match decode(header.as_ref(), state.settings.case_sensitive) {
            Ok(credentials) => credentials,
            Err(err) => {
                drop(state);
                debug!(reason = err.label(), "rejecting undecodable credentials");
                if let Some(metrics) = &inner.metrics {
                    metrics.inc_decode_failure(err.label());
                }
                let username = err.username().map(str::to_string);
                return Verification::Ready(AuthOutcome::denied(
                    Identity::Broken { username },
                    err.into(),
                ));
            }
        };

        let now = Instant::now();
        let ttl = state.settings.credentials_ttl;
        let record = state
            .cache
            .get_or_create(credentials.username(), credentials.password());
        if record.reconcile(credentials.password()) {
            debug!(username = %record.username_lossy(), "cached verdict discarded");
        }

        if record.is_fresh(now, ttl) {
            let identity = Identity::Basic {
                username: record.username_lossy(),
                checked_at: record.last_checked().unwrap_or(now),
            };
            drop(state);
            inner.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &inner.metrics {
                metrics.inc_cache_hit();
            }
            return Verification::Ready(AuthOutcome::Authenticated(identity));
        }

        let (tx, rx) = oneshot::channel();
        record.enqueue(tx);
        let username = record.username_lossy();
        let attempt = if record.state() == VerificationState::Pending {
            debug!(username = %username, waiting = record.waiting(), "joining in-flight verification");
            None
        } else {
            Some(Inner::begin_attempt(record))
        };
        let cached_users = state.cache.len();
        drop(state);

        inner.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &inner.metrics {
            metrics.inc_cache_miss();
            metrics.set_cached_users(cached_users);
        }
        if let Some(attempt) = attempt {
            inner.spawn_attempt(attempt);
        }

        Verification::Queued(PendingOutcome { username, rx })
    }

    /// Swap in reloaded settings and drop every cached verdict that is not
    /// currently being verified.
    pub fn reconfigure(&self, settings: BasicSettings) {
        {
            let mut state = self.inner.lock_state();
            state.settings = settings.clone();
            state.cache.invalidate_all();
        }
        self.inner.verifier.reconfigure(&settings);
        info!(
            realm = %settings.realm,
            ttl_secs = settings.credentials_ttl.as_secs(),
            case_sensitive = settings.case_sensitive,
            "basic authenticator reconfigured"
        );
    }

    /// Stop accepting requests and answer every queued caller with
    /// [`AuthDenial::ShuttingDown`]. Later replies are discarded.
    pub fn shutdown(&self) {
        let drained = {
            let mut state = self.inner.lock_state();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            let in_flight = state.cache.in_flight();
            let drained = state.cache.drain_all();
            if let Some(metrics) = &self.inner.metrics {
                for _ in 0..in_flight {
                    metrics.dec_in_flight();
                }
            }
            drained
        };
        self.inner.shutdown.send_replace(true);

        info!(waiting = drained.len(), "basic authenticator shutting down");
        for (username, caller) in drained {
            caller.complete(AuthOutcome::shutting_down(Some(username)));
        }
    }

    /// Challenge to send with a 401/407, or `None` when the scheme is not
    /// configured.
    #[must_use]
    pub fn challenge(&self, slot: ChallengeSlot) -> Option<Challenge> {
        let state = self.inner.lock_state();
        state
            .settings
            .configured
            .then(|| Challenge::basic(slot, &state.settings.realm))
    }

    /// Whether the scheme may be offered to clients.
    #[must_use]
    pub fn configured(&self) -> bool {
        self.inner.lock_state().settings.configured
    }

    /// Whether requests are still being accepted.
    #[must_use]
    pub fn active(&self) -> bool {
        !self.inner.lock_state().shutting_down
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> BasicSettings {
        self.inner.lock_state().settings.clone()
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> BasicStats {
        let (in_flight, cached_users) = {
            let state = self.inner.lock_state();
            (state.cache.in_flight(), state.cache.len())
        };
        let counters = &self.inner.counters;
        BasicStats {
            verifications_total: counters.verifications.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: counters.cache_misses.load(Ordering::Relaxed),
            in_flight,
            cached_users,
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn begin_attempt(record: &mut UserRecord) -> Attempt {
        let (in_flight, password) = record.begin_attempt(Uuid::new_v4());
        Attempt {
            key: record.username().to_vec(),
            credentials: Credentials::new(record.username(), password),
            in_flight,
        }
    }

    fn spawn_attempt(self: &Arc<Self>, attempt: Attempt) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_in_flight();
        }
        debug!(
            username = %attempt.credentials.username_lossy(),
            attempt_id = %attempt.in_flight.id,
            generation = attempt.in_flight.generation,
            "submitting credentials"
        );
        let mut guard = AttemptGuard {
            inner: Arc::clone(self),
            attempt: Some(attempt),
        };
        let mut shutdown = self.shutdown.subscribe();
        self.runtime.spawn(async move {
            let Some(attempt) = guard.attempt.as_ref() else {
                return;
            };
            let result = tokio::select! {
                biased;
                () = stopped(&mut shutdown) => None,
                result = guard.inner.verifier.check(&attempt.credentials) => Some(result),
            };
            let Some(attempt) = guard.attempt.take() else {
                return;
            };
            if let Some(result) = result {
                guard.inner.finish_attempt(&attempt, result);
            }
        });
    }

    fn finish_attempt(self: &Arc<Self>, attempt: &Attempt, result: Result<Verdict, VerifierError>) {
        let attempt_id = attempt.in_flight.id;
        let verdict = match result {
            Ok(Verdict::Accepted) => Ok(()),
            Ok(Verdict::Rejected(message)) => Err(AuthDenial::VerificationFailed(message)),
            Err(err) => {
                warn!(
                    username = %attempt.credentials.username_lossy(),
                    attempt_id = %attempt_id,
                    error = %err,
                    "credential verifier failed"
                );
                Err(AuthDenial::from(err))
            }
        };

        let now = Instant::now();
        let mut state = self.lock_state();
        if state.shutting_down {
            debug!(attempt_id = %attempt_id, "discarding reply after shutdown");
            return;
        }
        let Some(record) = state.cache.find_mut(&attempt.key) else {
            return;
        };
        if record.finish_attempt(attempt_id).is_none() {
            debug!(attempt_id = %attempt_id, "discarding stale reply");
            return;
        }

        let current = attempt.in_flight.generation == record.generation();
        if current {
            let deny_message = match &verdict {
                Err(AuthDenial::VerificationFailed(message)) => message.clone(),
                Err(denial) => Some(denial.to_string()),
                Ok(()) => None,
            };
            record.record_verdict(verdict.is_ok(), deny_message, now);
        }
        let username = record.username_lossy();
        let checked_at = record.last_checked().unwrap_or(now);
        let waiters = record.take_waiters(attempt.in_flight.generation);
        let next = if record.waiting() > 0 {
            Some(Self::begin_attempt(record))
        } else {
            if !current {
                record.reset();
            }
            None
        };
        drop(state);

        if let Some(metrics) = &self.metrics {
            metrics.dec_in_flight();
            metrics.inc_verdict(verdict.as_ref().map_or_else(AuthDenial::label, |_| "ok"));
        }
        debug!(
            username = %username,
            attempt_id = %attempt_id,
            accepted = verdict.is_ok(),
            waiters = waiters.len(),
            "verification finished"
        );

        let identity = Identity::Basic {
            username,
            checked_at,
        };
        let outcome = match verdict {
            Ok(()) => AuthOutcome::Authenticated(identity),
            Err(denial) => AuthOutcome::denied(identity, denial),
        };
        complete_all(waiters, &outcome);

        if let Some(next) = next {
            self.spawn_attempt(next);
        }
    }
}

/// Owns a spawned attempt until it finishes. If the verifier unwinds or the
/// task is dropped first, the attempt is finished as a failure so its waiters
/// are answered and the record leaves Pending.
struct AttemptGuard {
    inner: Arc<Inner>,
    attempt: Option<Attempt>,
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            self.inner
                .finish_attempt(&attempt, Err(VerifierError::Abandoned));
        }
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

fn complete_all(waiters: Vec<PendingCaller>, outcome: &AuthOutcome) {
    for waiter in waiters {
        waiter.complete(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_configuration() {
        let config = BasicAuthConfig {
            program: vec!["/usr/lib/helper".into()],
            realm: "Corp".into(),
            credentials_ttl_secs: 30,
            case_sensitive: true,
            utf8: true,
            ..BasicAuthConfig::default()
        };
        let settings = BasicSettings::from(&config);
        assert_eq!(settings.realm, "Corp");
        assert_eq!(settings.credentials_ttl, Duration::from_secs(30));
        assert!(settings.case_sensitive);
        assert!(settings.utf8);
        assert!(settings.configured);

        assert!(!BasicSettings::from(&BasicAuthConfig::default()).configured);
    }

    #[test]
    fn construction_requires_a_runtime() {
        struct Never;

        #[async_trait::async_trait]
        impl CredentialVerifier for Never {
            async fn check(&self, _: &Credentials) -> Result<Verdict, VerifierError> {
                Ok(Verdict::Rejected(None))
            }
        }

        let result = BasicAuthenticator::new(BasicSettings::default(), Arc::new(Never));
        assert!(matches!(result, Err(BasicError::Runtime { .. })));
    }
}
