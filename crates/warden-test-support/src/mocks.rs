//! Scripted verifier used to drive the coordinator deterministically.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};
use warden_basic::{BasicSettings, CredentialVerifier, Credentials, Verdict, VerifierError};

/// Reason returned for a wrong password.
pub const WRONG_PASSWORD: &str = "invalid password";

/// In-memory verifier with a fixed password table.
///
/// When held, every check blocks until [`ScriptedVerifier::release`] hands
/// out a permit, which lets tests pile callers onto an in-flight attempt.
#[derive(Default)]
pub struct ScriptedVerifier {
    passwords: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    failure: Mutex<Option<VerifierError>>,
    gate: Option<Semaphore>,
    seen: Mutex<Vec<Credentials>>,
    reconfigured: Mutex<Vec<BasicSettings>>,
    submitted: Notify,
}

impl ScriptedVerifier {
    /// Verifier that answers immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifier whose checks wait for [`ScriptedVerifier::release`].
    #[must_use]
    pub fn held() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Accept `password` for `user`.
    #[must_use]
    pub fn with_user(self, user: &str, password: &str) -> Self {
        self.set_password(user, password);
        self
    }

    /// Replace the accepted password for `user`.
    pub fn set_password(&self, user: &str, password: &str) {
        lock(&self.passwords).insert(user.as_bytes().to_vec(), password.as_bytes().to_vec());
    }

    /// Fail every subsequent check with `err`, or stop failing with `None`.
    pub fn fail_with(&self, err: Option<VerifierError>) {
        *lock(&self.failure) = err;
    }

    /// Let `checks` held checks proceed.
    pub fn release(&self, checks: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(checks);
        }
    }

    /// Number of checks started so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        lock(&self.seen).len()
    }

    /// Credentials passed to each check, in order.
    #[must_use]
    pub fn seen(&self) -> Vec<Credentials> {
        lock(&self.seen).clone()
    }

    /// Settings pushed through [`CredentialVerifier::reconfigure`].
    #[must_use]
    pub fn reconfigurations(&self) -> Vec<BasicSettings> {
        lock(&self.reconfigured).clone()
    }

    /// Wait until at least `count` checks have started.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.submitted.notified();
            if self.calls() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl CredentialVerifier for ScriptedVerifier {
    async fn check(&self, credentials: &Credentials) -> Result<Verdict, VerifierError> {
        lock(&self.seen).push(credentials.clone());
        self.submitted.notify_waiters();

        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }

        if let Some(err) = lock(&self.failure).clone() {
            return Err(err);
        }
        let accepted = lock(&self.passwords)
            .get(credentials.username())
            .is_some_and(|password| password.as_slice() == credentials.password());
        if accepted {
            Ok(Verdict::Accepted)
        } else {
            Ok(Verdict::Rejected(Some(WRONG_PASSWORD.to_string())))
        }
    }

    fn reconfigure(&self, settings: &BasicSettings) {
        lock(&self.reconfigured).push(settings.clone());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
