//! Reactive binding between a presentation view and one cache entry.
//!
//! Inspired by TanStack Query observers, a `QueryObserver<V>` is what a view
//! holds while it is mounted: it registers a listener on the entry, starts
//! the read, and lets the view's event loop poll for state transitions.
//!
//! # Example
//!
//! ```ignore
//! let api = api.clone();
//! let mut observer = queries.subscribe(ResourceKey::queue_list(), stale_after, move || {
//!     let api = api.clone();
//!     async move { api.list_queues().await }
//! });
//!
//! // Mount: read from cache or start fetching
//! observer.fetch();
//!
//! // In event loop tick
//! if observer.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! let snapshot = observer.snapshot();
//! match snapshot.status {
//!     EntryStatus::Pending if snapshot.value.is_none() => render_spinner(),
//!     EntryStatus::Error => render_error(snapshot.error),
//!     _ => render_data(snapshot.data()),
//! }
//! ```
//!
//! Dropping the observer unsubscribes it. A fetch still in progress keeps
//! running and populates the cache, but no listener hears about it.

use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::entry::{EntrySnapshot, EntryStatus};
use super::query::{Fetcher, QueryCoordinator};
use crate::key::ResourceKey;

/// A mounted view's subscription to a resource key.
pub struct QueryObserver<V: Send + Sync + 'static> {
  key: ResourceKey,
  stale_after: Duration,
  queries: QueryCoordinator<V>,
  fetcher: Fetcher<V>,
  snapshot: EntrySnapshot<V>,
  receiver: watch::Receiver<EntrySnapshot<V>>,
  listener_id: u64,
}

impl<V: Send + Sync + 'static> QueryObserver<V> {
  pub(crate) fn new(
    queries: QueryCoordinator<V>,
    key: ResourceKey,
    stale_after: Duration,
    fetcher: Fetcher<V>,
  ) -> Self {
    // Entries with listeners are never evicted, so the receiver lives as long as we do
    let (listener_id, receiver) = queries.cache().add_listener(&key, stale_after);
    let snapshot = receiver.borrow().clone();

    Self {
      key,
      stale_after,
      queries,
      fetcher,
      snapshot,
      receiver,
      listener_id,
    }
  }

  pub fn key(&self) -> &ResourceKey {
    &self.key
  }

  /// Latest state seen by this observer.
  pub fn snapshot(&self) -> &EntrySnapshot<V> {
    &self.snapshot
  }

  pub fn data(&self) -> Option<&V> {
    self.snapshot.data()
  }

  pub fn status(&self) -> EntryStatus {
    self.snapshot.status
  }

  pub fn is_loading(&self) -> bool {
    self.snapshot.is_loading()
  }

  pub fn is_error(&self) -> bool {
    self.snapshot.is_error()
  }

  /// Read through the coordinator: served from cache when fresh.
  pub fn fetch(&mut self) {
    self
      .queries
      .read_with(&self.key, self.stale_after, self.fetcher.clone());
    self.refresh_snapshot();
  }

  /// Force a new fetch, even if data is fresh or a fetch is running.
  pub fn refetch(&mut self) {
    self
      .queries
      .refetch(&self.key, self.stale_after, self.fetcher.clone());
    self.refresh_snapshot();
  }

  /// Pick up the latest state.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick
  /// handler. Transitions between polls coalesce into the latest one. If a
  /// write invalidated the entry and nothing is fetching it, this starts the
  /// re-fetch; a failed re-fetch clears the invalidation, so it runs once.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    if self.receiver.has_changed().unwrap_or(false) {
      self.snapshot = self.receiver.borrow_and_update().clone();
      changed = true;
    }

    if self.snapshot.is_invalidated && !self.snapshot.is_fetching {
      debug!(key = %self.key, "entry invalidated, refetching");
      self.fetch();
      changed = true;
    }
    changed
  }

  /// Resync with the cache and discard notifications already reflected in it.
  fn refresh_snapshot(&mut self) {
    self.receiver.borrow_and_update();
    if let Some(snapshot) = self.queries.cache().snapshot(&self.key) {
      self.snapshot = snapshot;
    }
  }
}

impl<V: Send + Sync + 'static> Drop for QueryObserver<V> {
  fn drop(&mut self) {
    self.queries.cache().remove_listener(&self.key, self.listener_id);
  }
}

impl<V: Send + Sync + std::fmt::Debug + 'static> std::fmt::Debug for QueryObserver<V> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key)
      .field("snapshot", &self.snapshot)
      .field("stale_after", &self.stale_after)
      .finish_non_exhaustive()
  }
}
