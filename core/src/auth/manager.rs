//! Credential scheduler
//!
//! Selects the next usable credential per provider, tracks health, applies
//! quarantine/backoff on failures and schedules token refreshes. The index
//! mutex is never held across I/O; refreshes are single-flight per record
//! behind a per-entry async gate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, warn};

use super::store::AuthStore;
use super::{Auth, AuthStatus};
use crate::error::{Error, Result};
use crate::executor::ExecutorSet;

/// Refresh is kicked when the token expires within this window.
const REFRESH_SKEW: Duration = Duration::from_secs(60);

/// Per-attempt refresh deadline.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive transient failures before quarantine.
const MAX_TRANSIENT_FAILURES: u32 = 5;

/// Honored Retry-After cap.
const RETRY_AFTER_CAP: Duration = Duration::from_secs(600);

/// Backoff schedule in seconds; holds at the last step until a probe
/// succeeds.
const BACKOFF_SCHEDULE: [u64; 6] = [1, 2, 5, 15, 60, 300];

/// How a lease ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
  /// Upstream call succeeded
  Ok,
  /// Upstream rejected the credential (401/403/invalid_grant)
  AuthFailure,
  /// Upstream 429; `retry_after` is the honored header value
  RateLimited { retry_after: Option<Duration> },
  /// 5xx / network / timeout
  Transient,
  /// Client disconnect; neutral, neither success nor failure
  Cancelled,
}

struct EntryState {
  auth: Auth,
  /// Consecutive failures, indexes the backoff schedule
  attempts: u32,
  last_used_at: DateTime<Utc>,
}

struct Entry {
  state: Mutex<EntryState>,
  in_flight: AtomicU32,
  /// Single-flight refresh gate
  refresh_gate: tokio::sync::Mutex<()>,
}

impl Entry {
  fn new(auth: Auth) -> Self {
    Self {
      state: Mutex::new(EntryState {
        auth,
        attempts: 0,
        last_used_at: DateTime::<Utc>::MIN_UTC,
      }),
      in_flight: AtomicU32::new(0),
      refresh_gate: tokio::sync::Mutex::new(()),
    }
  }

  fn snapshot(&self) -> Auth {
    self.state.lock().expect("auth entry lock poisoned").auth.clone()
  }

  fn leasable_at(&self, now: DateTime<Utc>) -> bool {
    let state = self.state.lock().expect("auth entry lock poisoned");
    let retry_ok = state.auth.next_retry_at.map(|at| at <= now).unwrap_or(true);
    match state.auth.status {
      AuthStatus::Active | AuthStatus::Refreshing => retry_ok,
      // Quarantine heals once the scheduled retry time passes
      AuthStatus::Quarantined => state.auth.next_retry_at.map(|at| at <= now).unwrap_or(false),
      AuthStatus::Expired | AuthStatus::Disabled => false,
    }
  }
}

struct Shared {
  store: Arc<AuthStore>,
  executors: Arc<ExecutorSet>,
  entries: Mutex<HashMap<String, Arc<Entry>>>,
}

/// The credential scheduler
#[derive(Clone)]
pub struct AuthManager {
  shared: Arc<Shared>,
}

impl AuthManager {
  /// Build the manager over a store, indexing every persisted record.
  pub fn new(store: Arc<AuthStore>, executors: Arc<ExecutorSet>) -> Self {
    let mut entries = HashMap::new();
    for auth in store.list() {
      entries.insert(auth.id.clone(), Arc::new(Entry::new(auth)));
    }
    Self {
      shared: Arc::new(Shared {
        store,
        executors,
        entries: Mutex::new(entries),
      }),
    }
  }

  /// Providers that currently hold at least one leasable credential.
  pub fn available_providers(&self) -> Vec<String> {
    let now = Utc::now();
    let entries = self.shared.entries.lock().expect("auth index poisoned");
    let mut providers: Vec<String> = Vec::new();
    for entry in entries.values() {
      if entry.leasable_at(now) {
        let provider = entry.snapshot().provider;
        if !providers.contains(&provider) {
          providers.push(provider);
        }
      }
    }
    providers.sort();
    providers
  }

  /// Lease a credential for `provider`.
  ///
  /// Selection prefers non-quarantined records, fewest in-flight leases,
  /// then least recently used. If the token expires inside the refresh skew
  /// a background refresh is kicked before the lease is returned.
  pub fn lease(&self, provider: &str) -> Result<Lease> {
    self.lease_excluding(provider, &[])
  }

  /// Lease like [`lease`](Self::lease), skipping previously tried records.
  pub fn lease_excluding(&self, provider: &str, excluded_ids: &[String]) -> Result<Lease> {
    let now = Utc::now();
    let candidates: Vec<Arc<Entry>> = {
      let entries = self.shared.entries.lock().expect("auth index poisoned");
      entries.values().cloned().collect()
    };

    let mut eligible: Vec<(bool, u32, DateTime<Utc>, Arc<Entry>)> = Vec::new();
    for entry in candidates {
      let state = entry.state.lock().expect("auth entry lock poisoned");
      if state.auth.provider != provider || excluded_ids.contains(&state.auth.id) {
        continue;
      }
      let quarantined = state.auth.status == AuthStatus::Quarantined;
      let key = (quarantined, entry.in_flight.load(Ordering::Relaxed), state.last_used_at);
      drop(state);
      if entry.leasable_at(now) {
        eligible.push((key.0, key.1, key.2, entry));
      }
    }
    eligible.sort_by_key(|(quarantined, in_flight, last_used, _)| {
      (*quarantined, *in_flight, *last_used)
    });

    let Some((_, _, _, entry)) = eligible.into_iter().next() else {
      return Err(Error::UnauthorizedClient(provider.to_string()));
    };

    entry.in_flight.fetch_add(1, Ordering::SeqCst);

    let needs_refresh = {
      let mut state = entry.state.lock().expect("auth entry lock poisoned");
      // A healed quarantine lease doubles as the probe
      if state.auth.status == AuthStatus::Quarantined {
        state.auth.status = AuthStatus::Active;
      }
      let near_expiry = state.auth.expires_within(REFRESH_SKEW)
        && state.auth.refresh_token().is_some()
        && state.auth.status != AuthStatus::Refreshing;
      if near_expiry {
        state.auth.status = AuthStatus::Refreshing;
      }
      near_expiry
    };

    if needs_refresh {
      let manager = self.clone();
      let id = entry.snapshot().id;
      tokio::spawn(async move {
        if let Err(err) = manager.refresh(&id).await {
          warn!(auth = %id, error = %err, "token refresh failed");
        }
      });
    }

    Ok(Lease {
      entry,
      manager: self.clone(),
      released: false,
    })
  }

  /// Refresh a record's token via its provider executor.
  ///
  /// Single-flight per record: concurrent callers queue on the entry gate
  /// and observe the already-refreshed token.
  pub async fn refresh(&self, id: &str) -> Result<()> {
    let entry = self
      .entry(id)
      .ok_or_else(|| Error::NotFound(format!("auth record: {id}")))?;

    let _gate = entry.refresh_gate.lock().await;

    let auth = entry.snapshot();
    if !auth.expires_within(REFRESH_SKEW) {
      // Another flight already refreshed it
      self.set_status(&entry, AuthStatus::Active);
      return Ok(());
    }

    let executor = self
      .shared
      .executors
      .get(&auth.provider)
      .ok_or_else(|| Error::NotFound(format!("executor: {}", auth.provider)))?;

    let refreshed = tokio::time::timeout(REFRESH_TIMEOUT, executor.refresh(&auth)).await;
    match refreshed {
      Ok(Ok(updated)) => {
        {
          let mut state = entry.state.lock().expect("auth entry lock poisoned");
          state.auth = updated;
          state.auth.status = AuthStatus::Active;
          state.auth.last_error = None;
          state.auth.next_retry_at = None;
          state.attempts = 0;
        }
        self.persist(&entry);
        debug!(auth = %id, "token refreshed");
        Ok(())
      }
      Ok(Err(err)) => {
        self.mark_failure(&entry, &err.to_string());
        Err(err)
      }
      Err(_) => {
        let err = Error::UpstreamTransient("token refresh timed out".to_string());
        self.mark_failure(&entry, &err.to_string());
        Err(err)
      }
    }
  }

  /// Register a record (manual import or OAuth completion).
  pub fn register(&self, auth: Auth) -> Result<()> {
    self.shared.store.save(&auth)?;
    let mut entries = self.shared.entries.lock().expect("auth index poisoned");
    entries.insert(auth.id.clone(), Arc::new(Entry::new(auth)));
    Ok(())
  }

  /// Delete a record.
  pub fn delete(&self, id: &str) -> Result<()> {
    self.shared.store.delete(id)?;
    let mut entries = self.shared.entries.lock().expect("auth index poisoned");
    entries.remove(id);
    Ok(())
  }

  /// Snapshot of every record (management listing).
  pub fn list(&self) -> Vec<Auth> {
    let entries = self.shared.entries.lock().expect("auth index poisoned");
    entries.values().map(|e| e.snapshot()).collect()
  }

  /// Record snapshot by id.
  pub fn get(&self, id: &str) -> Option<Auth> {
    self.entry(id).map(|e| e.snapshot())
  }

  fn entry(&self, id: &str) -> Option<Arc<Entry>> {
    self
      .shared
      .entries
      .lock()
      .expect("auth index poisoned")
      .get(id)
      .cloned()
  }

  fn set_status(&self, entry: &Arc<Entry>, status: AuthStatus) {
    {
      let mut state = entry.state.lock().expect("auth entry lock poisoned");
      state.auth.status = status;
    }
    self.persist(entry);
  }

  fn mark_failure(&self, entry: &Arc<Entry>, message: &str) {
    {
      let mut state = entry.state.lock().expect("auth entry lock poisoned");
      state.attempts += 1;
      let backoff = backoff_for(state.attempts);
      state.auth.status = AuthStatus::Quarantined;
      state.auth.last_error = Some(message.to_string());
      state.auth.last_error_at = Some(Utc::now());
      state.auth.next_retry_at = Some(Utc::now() + to_chrono(backoff));
    }
    self.persist(entry);
  }

  fn persist(&self, entry: &Arc<Entry>) {
    let auth = entry.snapshot();
    if let Err(err) = self.shared.store.save(&auth) {
      warn!(auth = %auth.id, error = %err, "failed to persist auth record");
    }
  }

  fn release(&self, entry: &Arc<Entry>, outcome: LeaseOutcome) {
    entry.in_flight.fetch_sub(1, Ordering::SeqCst);

    let changed = {
      let mut state = entry.state.lock().expect("auth entry lock poisoned");
      match outcome {
        LeaseOutcome::Ok => {
          state.attempts = 0;
          state.last_used_at = Utc::now();
          state.auth.last_error = None;
          state.auth.last_error_at = None;
          state.auth.next_retry_at = None;
          if state.auth.status == AuthStatus::Quarantined {
            state.auth.status = AuthStatus::Active;
          }
          true
        }
        LeaseOutcome::AuthFailure => {
          state.attempts += 1;
          let backoff = backoff_for(state.attempts);
          state.auth.status = AuthStatus::Quarantined;
          state.auth.next_retry_at = Some(Utc::now() + to_chrono(backoff));
          true
        }
        LeaseOutcome::RateLimited { retry_after } => {
          let wait = retry_after
            .unwrap_or_else(|| backoff_for(state.attempts + 1))
            .min(RETRY_AFTER_CAP);
          state.auth.next_retry_at = Some(Utc::now() + to_chrono(wait));
          true
        }
        LeaseOutcome::Transient => {
          state.attempts += 1;
          let backoff = with_jitter(backoff_for(state.attempts));
          if state.attempts >= MAX_TRANSIENT_FAILURES {
            state.auth.status = AuthStatus::Quarantined;
          }
          state.auth.next_retry_at = Some(Utc::now() + to_chrono(backoff));
          true
        }
        LeaseOutcome::Cancelled => false,
      }
    };

    if changed {
      self.persist(entry);
    }
  }
}

/// A reservation of one credential for one request.
///
/// Dropping an unreleased lease counts as `Cancelled`, which keeps the
/// in-flight gauge correct on every exit path.
pub struct Lease {
  entry: Arc<Entry>,
  manager: AuthManager,
  released: bool,
}

impl Lease {
  /// Snapshot of the leased record
  pub fn auth(&self) -> Auth {
    self.entry.snapshot()
  }

  /// Release with an explicit outcome
  pub fn release(mut self, outcome: LeaseOutcome) {
    self.manager.release(&self.entry, outcome);
    self.released = true;
  }
}

impl Drop for Lease {
  fn drop(&mut self) {
    if !self.released {
      self.manager.release(&self.entry, LeaseOutcome::Cancelled);
    }
  }
}

fn backoff_for(attempts: u32) -> Duration {
  let idx = (attempts.saturating_sub(1) as usize).min(BACKOFF_SCHEDULE.len() - 1);
  Duration::from_secs(BACKOFF_SCHEDULE[idx])
}

fn to_chrono(duration: Duration) -> chrono::Duration {
  chrono::Duration::milliseconds(duration.as_millis() as i64)
}

fn with_jitter(base: Duration) -> Duration {
  let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4);
  base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn manager_with(auths: Vec<Auth>) -> (AuthManager, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(AuthStore::open(dir.path()).unwrap());
    for auth in &auths {
      store.save(auth).unwrap();
    }
    let manager = AuthManager::new(store, Arc::new(ExecutorSet::empty()));
    (manager, dir)
  }

  fn active_auth(provider: &str, account: &str) -> Auth {
    let mut auth = Auth::new(provider, account);
    auth.set_token("tok", Some("refresh"), 24 * 3600);
    auth
  }

  #[tokio::test]
  async fn test_lease_no_credential() {
    let (manager, _dir) = manager_with(vec![]);
    assert!(matches!(
      manager.lease("claude"),
      Err(Error::UnauthorizedClient(_))
    ));
  }

  #[tokio::test]
  async fn test_lease_and_release_ok() {
    let (manager, _dir) = manager_with(vec![active_auth("claude", "a")]);

    let lease = manager.lease("claude").unwrap();
    assert_eq!(lease.auth().provider, "claude");
    lease.release(LeaseOutcome::Ok);

    let auth = manager.list().pop().unwrap();
    assert_eq!(auth.status, AuthStatus::Active);
    assert!(auth.next_retry_at.is_none());
  }

  #[tokio::test]
  async fn test_auth_failure_quarantines() {
    let (manager, _dir) = manager_with(vec![active_auth("claude", "a")]);

    let lease = manager.lease("claude").unwrap();
    lease.release(LeaseOutcome::AuthFailure);

    let auth = manager.list().pop().unwrap();
    assert_eq!(auth.status, AuthStatus::Quarantined);
    assert!(auth.next_retry_at.is_some());

    // Quarantined with a future retry time is not leasable
    assert!(manager.lease("claude").is_err());
  }

  #[tokio::test]
  async fn test_quarantine_heals_after_retry_at() {
    let (manager, _dir) = manager_with(vec![active_auth("claude", "a")]);

    let lease = manager.lease("claude").unwrap();
    lease.release(LeaseOutcome::AuthFailure);

    // Rewind the retry time to the past
    {
      let id = manager.list().pop().unwrap().id;
      let entry = manager.entry(&id).unwrap();
      let mut state = entry.state.lock().unwrap();
      state.auth.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
    }

    let lease = manager.lease("claude").unwrap();
    assert_eq!(lease.auth().status, AuthStatus::Active);
    lease.release(LeaseOutcome::Ok);
  }

  #[tokio::test]
  async fn test_excluded_ids_skip_record() {
    let (manager, _dir) = manager_with(vec![active_auth("claude", "a"), active_auth("claude", "b")]);

    let first = manager.lease("claude").unwrap();
    let first_id = first.auth().id;
    let second = manager.lease_excluding("claude", &[first_id.clone()]).unwrap();
    assert_ne!(second.auth().id, first_id);

    assert!(manager
      .lease_excluding("claude", &[first_id, second.auth().id])
      .is_err());
  }

  #[tokio::test]
  async fn test_drop_counts_as_cancelled() {
    let (manager, _dir) = manager_with(vec![active_auth("claude", "a")]);

    {
      let _lease = manager.lease("claude").unwrap();
      let entry = manager.entry(&manager.list().pop().unwrap().id).unwrap();
      assert_eq!(entry.in_flight.load(Ordering::SeqCst), 1);
    }

    let entry = manager.entry(&manager.list().pop().unwrap().id).unwrap();
    assert_eq!(entry.in_flight.load(Ordering::SeqCst), 0);

    // Cancelled is neutral: still active, no error recorded
    let auth = manager.list().pop().unwrap();
    assert_eq!(auth.status, AuthStatus::Active);
    assert!(auth.last_error.is_none());
  }

  #[tokio::test]
  async fn test_rate_limit_sets_retry_at() {
    let (manager, _dir) = manager_with(vec![active_auth("claude", "a")]);

    let lease = manager.lease("claude").unwrap();
    lease.release(LeaseOutcome::RateLimited {
      retry_after: Some(Duration::from_secs(30)),
    });

    let auth = manager.list().pop().unwrap();
    assert_eq!(auth.status, AuthStatus::Active);
    assert!(auth.next_retry_at.unwrap() > Utc::now());
    assert!(manager.lease("claude").is_err());
  }

  #[test]
  fn test_backoff_schedule_holds_at_cap() {
    assert_eq!(backoff_for(1), Duration::from_secs(1));
    assert_eq!(backoff_for(3), Duration::from_secs(5));
    assert_eq!(backoff_for(6), Duration::from_secs(300));
    assert_eq!(backoff_for(40), Duration::from_secs(300));
  }
}
