//! Per-user records and the callers waiting on them.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::identity::AuthOutcome;

/// Verification status of a cached user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationState {
    /// No current verdict.
    Unchecked,
    /// One verification attempt is in flight.
    Pending,
    /// Last verdict accepted the stored password.
    Ok,
    /// Last verdict rejected the stored password.
    Failed,
}

/// Caller waiting for the verdict of an in-flight attempt.
#[derive(Debug)]
pub struct PendingCaller {
    sender: oneshot::Sender<AuthOutcome>,
    generation: u64,
    password: Vec<u8>,
}

impl PendingCaller {
    /// Deliver the outcome. A caller that went away is ignored.
    pub fn complete(self, outcome: AuthOutcome) {
        let _ = self.sender.send(outcome);
    }

    /// Password generation the caller presented.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Attempt currently submitted for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    /// Attempt id, used to spot stale replies.
    pub id: Uuid,
    /// Password generation being verified.
    pub generation: u64,
}

/// Everything known about one user.
#[derive(Debug)]
pub struct UserRecord {
    username: Vec<u8>,
    password: Vec<u8>,
    generation: u64,
    state: VerificationState,
    last_checked: Option<Instant>,
    deny_message: Option<String>,
    pending: VecDeque<PendingCaller>,
    in_flight: Option<InFlight>,
}

impl UserRecord {
    fn new(username: &[u8], password: &[u8]) -> Self {
        Self {
            username: username.to_vec(),
            password: password.to_vec(),
            generation: 0,
            state: VerificationState::Unchecked,
            last_checked: None,
            deny_message: None,
            pending: VecDeque::new(),
            in_flight: None,
        }
    }

    /// Username key.
    #[must_use]
    pub fn username(&self) -> &[u8] {
        &self.username
    }

    /// Username rendered for logs and identities.
    #[must_use]
    pub fn username_lossy(&self) -> String {
        String::from_utf8_lossy(&self.username).into_owned()
    }

    /// Stored password.
    #[must_use]
    pub fn password(&self) -> &[u8] {
        &self.password
    }

    /// Bumped on every password overwrite.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Current verification state.
    #[must_use]
    pub const fn state(&self) -> VerificationState {
        self.state
    }

    /// When the last verdict was recorded.
    #[must_use]
    pub const fn last_checked(&self) -> Option<Instant> {
        self.last_checked
    }

    /// Helper explanation from the last failed verdict.
    #[must_use]
    pub fn deny_message(&self) -> Option<&str> {
        self.deny_message.as_deref()
    }

    /// Number of queued callers.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.pending.len()
    }

    /// Attempt in flight, if any.
    #[must_use]
    pub const fn in_flight(&self) -> Option<InFlight> {
        self.in_flight
    }

    /// Bring the record in line with a newly presented password.
    ///
    /// A different password is stored under a new generation and drops any
    /// verdict. A failed verdict is dropped even for the same password so
    /// that the next request re-verifies. An in-flight attempt is left alone.
    /// Returns whether the cached verdict was discarded.
    pub fn reconcile(&mut self, password: &[u8]) -> bool {
        if self.password != password {
            password.clone_into(&mut self.password);
            self.generation = self.generation.wrapping_add(1);
            if self.state != VerificationState::Pending {
                self.state = VerificationState::Unchecked;
            }
            return true;
        }
        if self.state == VerificationState::Failed {
            self.state = VerificationState::Unchecked;
            return true;
        }
        false
    }

    /// Whether an accepted verdict is still within `ttl` at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        self.state == VerificationState::Ok
            && self
                .last_checked
                .is_some_and(|checked| now.saturating_duration_since(checked) < ttl)
    }

    /// Queue a caller for the current generation.
    pub fn enqueue(&mut self, sender: oneshot::Sender<AuthOutcome>) {
        self.pending.push_back(PendingCaller {
            sender,
            generation: self.generation,
            password: self.password.clone(),
        });
    }

    /// Mark a new attempt as in flight for the oldest queued caller, or for
    /// the stored password when nobody waits.
    ///
    /// Returns the attempt and the password it verifies. A superseded
    /// password is still verified on its own so its callers never receive
    /// the verdict for a different password.
    pub fn begin_attempt(&mut self, id: Uuid) -> (InFlight, Vec<u8>) {
        let (generation, password) = match self.pending.front() {
            Some(caller) => (caller.generation, caller.password.clone()),
            None => (self.generation, self.password.clone()),
        };
        let attempt = InFlight { id, generation };
        self.state = VerificationState::Pending;
        self.in_flight = Some(attempt);
        (attempt, password)
    }

    /// Clear the in-flight attempt if it is `id`. Returns it when it matched.
    pub fn finish_attempt(&mut self, id: Uuid) -> Option<InFlight> {
        match self.in_flight {
            Some(attempt) if attempt.id == id => self.in_flight.take(),
            _ => None,
        }
    }

    /// Store a verdict reached at `now`.
    pub fn record_verdict(&mut self, accepted: bool, deny_message: Option<String>, now: Instant) {
        self.state = if accepted {
            VerificationState::Ok
        } else {
            VerificationState::Failed
        };
        self.last_checked = Some(now);
        self.deny_message = deny_message;
    }

    /// Leave the record without a verdict.
    pub fn reset(&mut self) {
        self.state = VerificationState::Unchecked;
    }

    /// Remove callers that presented `generation`, in FIFO order.
    pub fn take_waiters(&mut self, generation: u64) -> Vec<PendingCaller> {
        let (answered, remaining): (VecDeque<_>, VecDeque<_>) = self
            .pending
            .drain(..)
            .partition(|caller| caller.generation == generation);
        self.pending = remaining;
        answered.into()
    }
}

/// Username-keyed map of user records.
#[derive(Debug, Default)]
pub struct UserCache {
    records: HashMap<Vec<u8>, UserRecord>,
}

impl UserCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record.
    #[must_use]
    pub fn find(&self, username: &[u8]) -> Option<&UserRecord> {
        self.records.get(username)
    }

    /// Look up a record for update.
    pub fn find_mut(&mut self, username: &[u8]) -> Option<&mut UserRecord> {
        self.records.get_mut(username)
    }

    /// Existing record for `username`, or a new Unchecked one holding `password`.
    pub fn get_or_create(&mut self, username: &[u8], password: &[u8]) -> &mut UserRecord {
        self.records
            .entry(username.to_vec())
            .or_insert_with(|| UserRecord::new(username, password))
    }

    /// Drop the verdict of every record that is not being verified.
    pub fn invalidate_all(&mut self) {
        for record in self.records.values_mut() {
            if record.state != VerificationState::Pending {
                record.state = VerificationState::Unchecked;
            }
        }
    }

    /// Number of cached users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no user has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records with an attempt in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.records
            .values()
            .filter(|record| record.in_flight.is_some())
            .count()
    }

    /// Remove every queued caller and abandon in-flight attempts.
    ///
    /// Returns the callers paired with the username they waited on.
    pub fn drain_all(&mut self) -> Vec<(String, PendingCaller)> {
        let mut drained = Vec::new();
        for record in self.records.values_mut() {
            if record.in_flight.take().is_some() {
                record.state = VerificationState::Unchecked;
            }
            if record.pending.is_empty() {
                continue;
            }
            let username = record.username_lossy();
            drained.extend(
                record
                    .pending
                    .drain(..)
                    .map(|caller| (username.clone(), caller)),
            );
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(record: &mut UserRecord) -> oneshot::Receiver<AuthOutcome> {
        let (tx, rx) = oneshot::channel();
        record.enqueue(tx);
        rx
    }

    #[test]
    fn new_records_are_unchecked_with_empty_queue() {
        let mut cache = UserCache::new();
        let record = cache.get_or_create(b"alice", b"pw");
        assert_eq!(record.state(), VerificationState::Unchecked);
        assert_eq!(record.password(), b"pw");
        assert_eq!(record.waiting(), 0);
        assert_eq!(cache.len(), 1);
        assert!(cache.find(b"bob").is_none());
    }

    #[test]
    fn get_or_create_returns_the_existing_record() {
        let mut cache = UserCache::new();
        cache.get_or_create(b"alice", b"pw").record_verdict(true, None, Instant::now());
        let again = cache.get_or_create(b"alice", b"other");
        assert_eq!(again.state(), VerificationState::Ok);
        assert_eq!(again.password(), b"pw");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn password_change_resets_verdict_and_bumps_generation() {
        let mut cache = UserCache::new();
        let record = cache.get_or_create(b"alice", b"old");
        record.record_verdict(true, None, Instant::now());
        assert!(record.reconcile(b"new"));
        assert_eq!(record.state(), VerificationState::Unchecked);
        assert_eq!(record.password(), b"new");
        assert_eq!(record.generation(), 1);
    }

    #[test]
    fn failed_verdict_is_not_sticky() {
        let mut cache = UserCache::new();
        let record = cache.get_or_create(b"alice", b"pw");
        record.record_verdict(false, Some("nope".into()), Instant::now());
        assert!(record.reconcile(b"pw"));
        assert_eq!(record.state(), VerificationState::Unchecked);
        assert_eq!(record.generation(), 0);
    }

    #[test]
    fn same_password_keeps_accepted_verdict() {
        let mut cache = UserCache::new();
        let record = cache.get_or_create(b"alice", b"pw");
        record.record_verdict(true, None, Instant::now());
        assert!(!record.reconcile(b"pw"));
        assert_eq!(record.state(), VerificationState::Ok);
    }

    #[test]
    fn password_change_while_pending_keeps_attempt() {
        let mut cache = UserCache::new();
        let record = cache.get_or_create(b"alice", b"old");
        let (attempt, _) = record.begin_attempt(Uuid::new_v4());
        assert!(record.reconcile(b"new"));
        assert_eq!(record.state(), VerificationState::Pending);
        assert_eq!(record.in_flight(), Some(attempt));
        assert_eq!(record.generation(), attempt.generation + 1);
    }

    #[test]
    fn freshness_respects_ttl() {
        let mut cache = UserCache::new();
        let record = cache.get_or_create(b"alice", b"pw");
        let checked = Instant::now();
        record.record_verdict(true, None, checked);
        let ttl = Duration::from_secs(60);
        assert!(record.is_fresh(checked + Duration::from_secs(59), ttl));
        assert!(!record.is_fresh(checked + Duration::from_secs(60), ttl));
    }

    #[test]
    fn take_waiters_splits_by_generation() {
        let mut cache = UserCache::new();
        let record = cache.get_or_create(b"alice", b"old");
        let _first = caller(record);
        let _second = caller(record);
        record.reconcile(b"new");
        let _third = caller(record);

        let answered = record.take_waiters(0);
        assert_eq!(answered.len(), 2);
        assert!(answered.iter().all(|caller| caller.generation() == 0));
        assert_eq!(record.waiting(), 1);
    }

    #[test]
    fn superseded_passwords_are_verified_in_turn() {
        let mut cache = UserCache::new();
        let record = cache.get_or_create(b"alice", b"a");
        let _first = caller(record);
        let (first, password) = record.begin_attempt(Uuid::new_v4());
        assert_eq!((first.generation, password.as_slice()), (0, &b"a"[..]));

        record.reconcile(b"b");
        let _second = caller(record);
        record.reconcile(b"a");
        let _third = caller(record);
        assert_eq!(record.generation(), 2);

        assert_eq!(record.finish_attempt(first.id), Some(first));
        assert_eq!(record.take_waiters(first.generation).len(), 1);

        let (second, password) = record.begin_attempt(Uuid::new_v4());
        assert_eq!((second.generation, password.as_slice()), (1, &b"b"[..]));
        assert_eq!(record.take_waiters(second.generation).len(), 1);

        let (third, password) = record.begin_attempt(Uuid::new_v4());
        assert_eq!((third.generation, password.as_slice()), (2, &b"a"[..]));
        assert_eq!(record.take_waiters(third.generation).len(), 1);
        assert_eq!(record.waiting(), 0);
    }

    #[test]
    fn stale_attempt_ids_do_not_finish() {
        let mut cache = UserCache::new();
        let record = cache.get_or_create(b"alice", b"pw");
        let (attempt, _) = record.begin_attempt(Uuid::new_v4());
        assert_eq!(record.finish_attempt(Uuid::new_v4()), None);
        assert_eq!(record.finish_attempt(attempt.id), Some(attempt));
        assert_eq!(record.in_flight(), None);
    }

    #[test]
    fn invalidate_all_skips_pending_records() {
        let mut cache = UserCache::new();
        cache.get_or_create(b"ok", b"pw").record_verdict(true, None, Instant::now());
        cache.get_or_create(b"busy", b"pw").begin_attempt(Uuid::new_v4());
        cache.invalidate_all();
        assert_eq!(
            cache.find(b"ok").map(UserRecord::state),
            Some(VerificationState::Unchecked)
        );
        assert_eq!(
            cache.find(b"busy").map(UserRecord::state),
            Some(VerificationState::Pending)
        );
    }

    #[test]
    fn drain_all_empties_every_queue() {
        let mut cache = UserCache::new();
        let alice = cache.get_or_create(b"alice", b"pw");
        alice.begin_attempt(Uuid::new_v4());
        let mut alice_rx = caller(alice);
        let bob = cache.get_or_create(b"bob", b"pw");
        let _bob_rx = caller(bob);

        let drained = cache.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(
            cache.find(b"alice").map(UserRecord::waiting),
            Some(0)
        );

        for (username, caller) in drained {
            caller.complete(AuthOutcome::shutting_down(Some(username)));
        }
        let outcome = alice_rx.try_recv().expect("drained caller answered");
        assert!(!outcome.is_authenticated());
    }
}
