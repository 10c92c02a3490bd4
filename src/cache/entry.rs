//! Per-key cache state and the read-only snapshots handed to consumers.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::SyncError;
use crate::key::ResourceKey;

/// Handle to the single outstanding fetch for a key.
///
/// Every concurrent reader awaits a clone of the same shared future.
pub type InFlight<V> = Shared<BoxFuture<'static, Result<Arc<V>, SyncError>>>;

/// Fetch status of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  /// Never fetched
  Idle,
  /// A fetch is outstanding
  Pending,
  /// The last fetch cycle succeeded
  Success,
  /// The last fetch cycle exhausted its retries
  Error,
}

/// Read-only view of an entry at one point in time.
#[derive(Debug)]
pub struct EntrySnapshot<V> {
  pub key: ResourceKey,
  /// Last successfully fetched value, kept while revalidating
  pub value: Option<Arc<V>>,
  pub status: EntryStatus,
  pub error: Option<SyncError>,
  /// Wall-clock time of the last successful fetch
  pub fetched_at: Option<DateTime<Utc>>,
  /// Consecutive failed attempts in the current fetch cycle
  pub retry_count: u32,
  /// The value is older than its staleness window, was invalidated, or the
  /// last fetch cycle failed
  pub is_stale: bool,
  /// A write invalidated this entry and no fetch has landed since
  pub is_invalidated: bool,
  pub is_fetching: bool,
}

impl<V> Clone for EntrySnapshot<V> {
  fn clone(&self) -> Self {
    Self {
      key: self.key.clone(),
      value: self.value.clone(),
      status: self.status,
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      retry_count: self.retry_count,
      is_stale: self.is_stale,
      is_invalidated: self.is_invalidated,
      is_fetching: self.is_fetching,
    }
  }
}

impl<V> EntrySnapshot<V> {
  pub fn data(&self) -> Option<&V> {
    self.value.as_deref()
  }

  /// First load: fetching with nothing to show yet.
  pub fn is_loading(&self) -> bool {
    self.is_fetching && self.value.is_none()
  }

  pub fn is_success(&self) -> bool {
    self.status == EntryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == EntryStatus::Error
  }
}

/// What the fetch loop should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureAction {
  Retry { failures: u32 },
  GiveUp,
}

/// Each listener holds only the latest snapshot; unpolled transitions coalesce.
type Listener<V> = (u64, watch::Sender<EntrySnapshot<V>>);

/// Live state for one resource key. Owned exclusively by the cache.
pub(crate) struct CacheEntry<V> {
  pub(crate) value: Option<Arc<V>>,
  pub(crate) status: EntryStatus,
  fetched_at: Option<Instant>,
  fetched_at_utc: Option<DateTime<Utc>>,
  pub(crate) stale_after: Duration,
  pub(crate) error: Option<SyncError>,
  pub(crate) retry_count: u32,
  invalidated: bool,
  /// Bumped whenever a newer fetch (or an invalidation) supersedes older ones
  pub(crate) generation: u64,
  pub(crate) in_flight: Option<InFlight<V>>,
  pub(crate) last_accessed: Instant,
  listeners: Vec<Listener<V>>,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(stale_after: Duration, now: Instant) -> Self {
    Self {
      value: None,
      status: EntryStatus::Idle,
      fetched_at: None,
      fetched_at_utc: None,
      stale_after,
      error: None,
      retry_count: 0,
      invalidated: false,
      generation: 0,
      in_flight: None,
      last_accessed: now,
      listeners: Vec::new(),
    }
  }

  pub(crate) fn is_stale(&self, now: Instant) -> bool {
    if self.invalidated || self.status == EntryStatus::Error {
      return true;
    }
    match self.fetched_at {
      Some(at) => now.saturating_duration_since(at) >= self.stale_after,
      None => true,
    }
  }

  /// Fresh successful value, if any.
  pub(crate) fn fresh_value(&self, now: Instant) -> Option<Arc<V>> {
    match (&self.status, &self.value) {
      (EntryStatus::Success, Some(value)) if !self.is_stale(now) => Some(Arc::clone(value)),
      _ => None,
    }
  }

  pub(crate) fn snapshot(&self, key: &ResourceKey, now: Instant) -> EntrySnapshot<V> {
    EntrySnapshot {
      key: key.clone(),
      value: self.value.clone(),
      status: self.status,
      error: self.error.clone(),
      fetched_at: self.fetched_at_utc,
      retry_count: self.retry_count,
      is_stale: self.is_stale(now),
      is_invalidated: self.invalidated,
      is_fetching: self.in_flight.is_some(),
    }
  }

  /// Start a new fetch cycle and return its generation.
  pub(crate) fn begin_fetch(&mut self, in_flight: InFlight<V>) -> u64 {
    self.generation += 1;
    self.status = EntryStatus::Pending;
    self.retry_count = 0;
    self.in_flight = Some(in_flight);
    self.generation
  }

  /// Apply a successful fetch. Returns false if the fetch was superseded.
  pub(crate) fn complete(&mut self, generation: u64, value: Arc<V>, now: Instant) -> bool {
    if generation != self.generation {
      return false;
    }
    self.value = Some(value);
    self.status = EntryStatus::Success;
    self.fetched_at = Some(now);
    self.fetched_at_utc = Some(Utc::now());
    self.retry_count = 0;
    self.error = None;
    self.invalidated = false;
    self.in_flight = None;
    true
  }

  /// Record a failed attempt and decide whether the cycle continues.
  pub(crate) fn fail(
    &mut self,
    generation: u64,
    error: SyncError,
    max_retries: u32,
  ) -> FailureAction {
    if generation != self.generation {
      return FailureAction::GiveUp;
    }
    self.retry_count += 1;
    let retry = error.is_retryable() && self.retry_count <= max_retries;
    self.error = Some(error);
    if retry {
      FailureAction::Retry {
        failures: self.retry_count,
      }
    } else {
      // The cycle the invalidation asked for has run
      self.status = EntryStatus::Error;
      self.invalidated = false;
      self.in_flight = None;
      FailureAction::GiveUp
    }
  }

  /// Mark stale without discarding the value.
  ///
  /// Any outstanding fetch is detached: its waiters still get its result,
  /// but the result no longer lands in the entry.
  pub(crate) fn invalidate(&mut self) {
    self.invalidated = true;
    self.generation += 1;
    if self.in_flight.take().is_some() && self.status == EntryStatus::Pending {
      self.status = if self.value.is_some() {
        EntryStatus::Success
      } else {
        EntryStatus::Idle
      };
    }
  }

  pub(crate) fn add_listener(&mut self, id: u64, tx: watch::Sender<EntrySnapshot<V>>) {
    self.listeners.push((id, tx));
  }

  pub(crate) fn remove_listener(&mut self, id: u64) {
    self.listeners.retain(|(listener_id, _)| *listener_id != id);
  }

  pub(crate) fn has_listeners(&self) -> bool {
    !self.listeners.is_empty()
  }

  /// Push the current state to every listener, dropping closed ones.
  pub(crate) fn notify(&mut self, key: &ResourceKey, now: Instant) {
    if self.listeners.is_empty() {
      return;
    }
    let snapshot = self.snapshot(key, now);
    self
      .listeners
      .retain(|(_, tx)| tx.send(snapshot.clone()).is_ok());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::FutureExt;

  fn in_flight() -> InFlight<u32> {
    futures::future::pending().boxed().shared()
  }

  #[tokio::test(start_paused = true)]
  async fn test_staleness_window() {
    let now = Instant::now();
    let mut entry = CacheEntry::new(Duration::from_secs(60), now);
    assert!(entry.is_stale(now));

    let generation = entry.begin_fetch(in_flight());
    assert!(entry.complete(generation, Arc::new(1u32), now));
    assert!(!entry.is_stale(now + Duration::from_secs(59)));
    assert!(entry.is_stale(now + Duration::from_secs(60)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_superseded_fetch_is_discarded() {
    let now = Instant::now();
    let mut entry = CacheEntry::new(Duration::from_secs(60), now);
    let first = entry.begin_fetch(in_flight());
    let second = entry.begin_fetch(in_flight());

    assert!(entry.complete(second, Arc::new(2u32), now));
    assert!(!entry.complete(first, Arc::new(1u32), now));
    assert_eq!(entry.value.as_deref(), Some(&2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_fail_retries_then_gives_up() {
    let now = Instant::now();
    let mut entry: CacheEntry<u32> = CacheEntry::new(Duration::from_secs(60), now);
    let generation = entry.begin_fetch(in_flight());

    let err = SyncError::transport("down");
    assert_eq!(
      entry.fail(generation, err.clone(), 1),
      FailureAction::Retry { failures: 1 }
    );
    assert_eq!(entry.status, EntryStatus::Pending);
    assert_eq!(entry.fail(generation, err.clone(), 1), FailureAction::GiveUp);
    assert_eq!(entry.status, EntryStatus::Error);
    assert_eq!(entry.retry_count, 2);
    assert_eq!(entry.error, Some(err));
    assert!(entry.in_flight.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_keeps_value() {
    let now = Instant::now();
    let mut entry = CacheEntry::new(Duration::from_secs(60), now);
    let generation = entry.begin_fetch(in_flight());
    entry.complete(generation, Arc::new(5u32), now);

    entry.invalidate();
    assert!(entry.is_stale(now));
    assert_eq!(entry.value.as_deref(), Some(&5));
    assert_eq!(entry.status, EntryStatus::Success);
    assert!(entry.fresh_value(now).is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_notify_prunes_closed_listeners() {
    let now = Instant::now();
    let key = ResourceKey::queue_list();
    let mut entry: CacheEntry<u32> = CacheEntry::new(Duration::from_secs(60), now);
    let (tx_open, rx_open) = watch::channel(entry.snapshot(&key, now));
    let (tx_closed, rx_closed) = watch::channel(entry.snapshot(&key, now));
    entry.add_listener(1, tx_open);
    entry.add_listener(2, tx_closed);
    drop(rx_closed);

    entry.notify(&key, now);
    assert!(rx_open.has_changed().unwrap());
    assert_eq!(entry.listeners.len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_listener_keeps_only_latest_snapshot() {
    let now = Instant::now();
    let key = ResourceKey::queue_list();
    let mut entry: CacheEntry<u32> = CacheEntry::new(Duration::from_secs(60), now);
    let (tx, mut rx) = watch::channel(entry.snapshot(&key, now));
    entry.add_listener(1, tx);

    let generation = entry.begin_fetch(in_flight());
    entry.notify(&key, now);
    entry.fail(generation, SyncError::transport("down"), 3);
    entry.notify(&key, now);
    entry.fail(generation, SyncError::transport("down"), 3);
    entry.notify(&key, now);

    let latest = rx.borrow_and_update().clone();
    assert_eq!(latest.status, EntryStatus::Pending);
    assert_eq!(latest.retry_count, 2);
    assert!(!rx.has_changed().unwrap());
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_cycle_after_invalidation_settles() {
    let now = Instant::now();
    let mut entry = CacheEntry::new(Duration::from_secs(60), now);
    let generation = entry.begin_fetch(in_flight());
    entry.complete(generation, Arc::new(5u32), now);

    entry.invalidate();
    let generation = entry.begin_fetch(in_flight());
    assert_eq!(
      entry.fail(generation, SyncError::transport("down"), 0),
      FailureAction::GiveUp
    );

    let snapshot = entry.snapshot(&ResourceKey::queue_list(), now);
    assert_eq!(snapshot.status, EntryStatus::Error);
    assert!(!snapshot.is_invalidated);
    assert!(!snapshot.is_fetching);
    // Still stale, and the old value stays visible
    assert!(snapshot.is_stale);
    assert_eq!(snapshot.data(), Some(&5));
  }
}
