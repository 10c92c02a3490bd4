//! The process-wide query cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::entry::{CacheEntry, EntrySnapshot};
use super::policy::CacheConfig;
use crate::key::{KeyPattern, ResourceKey};

pub(crate) struct CacheState<V> {
  pub(crate) entries: HashMap<ResourceKey, CacheEntry<V>>,
  next_listener_id: u64,
}

impl<V> CacheState<V> {
  /// Get the entry for a key, creating it (and evicting if over capacity).
  pub(crate) fn entry_mut(
    &mut self,
    key: &ResourceKey,
    stale_after: Duration,
    max_entries: Option<usize>,
    now: Instant,
  ) -> &mut CacheEntry<V> {
    if !self.entries.contains_key(key) {
      if let Some(max) = max_entries {
        if self.entries.len() >= max {
          self.evict_one();
        }
      }
    }
    self
      .entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(stale_after, now))
  }

  /// Drop the least recently accessed entry nobody is using.
  fn evict_one(&mut self) {
    let victim = self
      .entries
      .iter()
      .filter(|(_, entry)| entry.in_flight.is_none() && !entry.has_listeners())
      .min_by_key(|(_, entry)| entry.last_accessed)
      .map(|(key, _)| key.clone());

    if let Some(key) = victim {
      debug!(key = %key, "evicting cache entry");
      self.entries.remove(&key);
    }
  }
}

/// Key-addressed cache of remote query results.
///
/// Cloning yields another handle to the same cache. Entries are only
/// mutated through the query and mutation coordinators; everybody else
/// gets [`EntrySnapshot`]s.
pub struct QueryCache<V> {
  state: Arc<Mutex<CacheState<V>>>,
  config: Arc<CacheConfig>,
}

impl<V> Clone for QueryCache<V> {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
      config: Arc::clone(&self.config),
    }
  }
}

impl<V> QueryCache<V> {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      state: Arc::new(Mutex::new(CacheState {
        entries: HashMap::new(),
        next_listener_id: 0,
      })),
      config: Arc::new(config),
    }
  }

  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  /// Transitions never leave an entry half-updated, so a poisoned lock still holds valid state.
  pub(crate) fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Current state of a key, if it has ever been read.
  pub fn snapshot(&self, key: &ResourceKey) -> Option<EntrySnapshot<V>> {
    let now = Instant::now();
    self
      .lock()
      .entries
      .get(key)
      .map(|entry| entry.snapshot(key, now))
  }

  pub fn keys(&self) -> Vec<ResourceKey> {
    self.lock().entries.keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Mark every entry matching the pattern stale and return the affected keys.
  pub(crate) fn invalidate(&self, pattern: &KeyPattern) -> Vec<ResourceKey> {
    let now = Instant::now();
    let mut state = self.lock();
    let mut affected = Vec::new();
    for (key, entry) in state.entries.iter_mut() {
      if pattern.matches(key) {
        entry.invalidate();
        entry.notify(key, now);
        affected.push(key.clone());
      }
    }
    affected
  }

  /// Register a listener on a key's entry, creating the entry if needed.
  pub(crate) fn add_listener(
    &self,
    key: &ResourceKey,
    stale_after: Duration,
  ) -> (u64, watch::Receiver<EntrySnapshot<V>>) {
    let now = Instant::now();
    let mut state = self.lock();
    state.next_listener_id += 1;
    let id = state.next_listener_id;
    let entry = state.entry_mut(key, stale_after, self.config.max_entries, now);
    let (tx, rx) = watch::channel(entry.snapshot(key, now));
    entry.add_listener(id, tx);
    (id, rx)
  }

  pub(crate) fn remove_listener(&self, key: &ResourceKey, id: u64) {
    if let Some(entry) = self.lock().entries.get_mut(key) {
      entry.remove_listener(id);
    }
  }
}
