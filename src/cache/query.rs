//! Query coordinator: fetch-or-reuse with deduplication and retries.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::entry::{FailureAction, InFlight};
use super::observer::QueryObserver;
use super::store::QueryCache;
use crate::error::{SyncError, SyncResult};
use crate::key::ResourceKey;

/// A zero-argument operation producing a fresh value, callable once per attempt.
pub type Fetcher<V> = Arc<dyn Fn() -> BoxFuture<'static, SyncResult<V>> + Send + Sync>;

/// Box a closure into a [`Fetcher`].
pub fn fetcher<V, F, Fut>(f: F) -> Fetcher<V>
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = SyncResult<V>> + Send + 'static,
{
  Arc::new(move || f().boxed())
}

/// Result of a non-blocking read.
pub enum ReadOutcome<V> {
  /// Cache hit, no network activity
  Fresh(Arc<V>),
  /// Last known value, with a fetch for the fresh one in progress
  Revalidating { stale: Arc<V>, fresh: InFlight<V> },
  /// Nothing to show yet; await the in-flight fetch
  Pending(InFlight<V>),
}

impl<V> ReadOutcome<V> {
  /// Value that can be shown right now, fresh or stale.
  pub fn current(&self) -> Option<&Arc<V>> {
    match self {
      Self::Fresh(value) => Some(value),
      Self::Revalidating { stale, .. } => Some(stale),
      Self::Pending(_) => None,
    }
  }

  /// Wait for the freshest value this read can produce.
  pub async fn resolve(self) -> SyncResult<Arc<V>> {
    match self {
      Self::Fresh(value) => Ok(value),
      Self::Revalidating { fresh, .. } | Self::Pending(fresh) => fresh.await,
    }
  }
}

/// Orchestrates reads against a [`QueryCache`].
///
/// At most one fetch is outstanding per key. Fetches run on their own task,
/// so they finish and populate the cache even if every reader goes away.
/// Must be used from within a tokio runtime.
pub struct QueryCoordinator<V> {
  cache: QueryCache<V>,
}

impl<V> Clone for QueryCoordinator<V> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
    }
  }
}

impl<V: Send + Sync + 'static> QueryCoordinator<V> {
  pub fn new(cache: QueryCache<V>) -> Self {
    Self { cache }
  }

  pub fn cache(&self) -> &QueryCache<V> {
    &self.cache
  }

  /// Read a key, fetching only if it is absent, stale, or failed.
  pub fn read<F, Fut>(&self, key: &ResourceKey, stale_after: Duration, f: F) -> ReadOutcome<V>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<V>> + Send + 'static,
  {
    self.read_with(key, stale_after, fetcher(f))
  }

  /// [`read`](Self::read) with an already boxed fetcher.
  pub fn read_with(
    &self,
    key: &ResourceKey,
    stale_after: Duration,
    fetcher: Fetcher<V>,
  ) -> ReadOutcome<V> {
    let now = Instant::now();
    let mut state = self.cache.lock();
    let entry = state.entry_mut(key, stale_after, self.cache.config().max_entries, now);
    entry.stale_after = stale_after;
    entry.last_accessed = now;

    if let Some(in_flight) = &entry.in_flight {
      debug!(key = %key, "attaching to in-flight fetch");
      return match &entry.value {
        Some(stale) => ReadOutcome::Revalidating {
          stale: Arc::clone(stale),
          fresh: in_flight.clone(),
        },
        None => ReadOutcome::Pending(in_flight.clone()),
      };
    }

    if let Some(value) = entry.fresh_value(now) {
      debug!(key = %key, "cache hit");
      return ReadOutcome::Fresh(value);
    }

    let (tx, rx) = oneshot::channel();
    let in_flight: InFlight<V> = rx
      .map(|received| {
        received.unwrap_or_else(|_| Err(SyncError::transport("fetch task ended without a result")))
      })
      .boxed()
      .shared();
    let stale = entry.value.clone();
    let generation = entry.begin_fetch(in_flight.clone());
    entry.notify(key, now);
    drop(state);

    info!(key = %key, generation, "fetching");
    tokio::spawn(run_fetch(
      self.cache.clone(),
      key.clone(),
      generation,
      fetcher,
      tx,
    ));

    match stale {
      Some(stale) => ReadOutcome::Revalidating {
        stale,
        fresh: in_flight,
      },
      None => ReadOutcome::Pending(in_flight),
    }
  }

  /// Read a key and wait for a value: cached if fresh, otherwise the fetched one.
  pub async fn fetch<F, Fut>(&self, key: &ResourceKey, stale_after: Duration, f: F) -> SyncResult<Arc<V>>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<V>> + Send + 'static,
  {
    self.read(key, stale_after, f).resolve().await
  }

  /// Force a new fetch regardless of freshness.
  ///
  /// Any fetch already outstanding is superseded; its result is not stored.
  pub fn refetch(&self, key: &ResourceKey, stale_after: Duration, fetcher: Fetcher<V>) -> ReadOutcome<V> {
    if let Some(entry) = self.cache.lock().entries.get_mut(key) {
      entry.invalidate();
    }
    self.read_with(key, stale_after, fetcher)
  }

  /// Mount a reactive observer on a key.
  pub fn subscribe<F, Fut>(&self, key: ResourceKey, stale_after: Duration, f: F) -> QueryObserver<V>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<V>> + Send + 'static,
  {
    QueryObserver::new(self.clone(), key, stale_after, fetcher(f))
  }
}

async fn run_fetch<V: Send + Sync + 'static>(
  cache: QueryCache<V>,
  key: ResourceKey,
  generation: u64,
  fetcher: Fetcher<V>,
  tx: oneshot::Sender<SyncResult<Arc<V>>>,
) {
  let retry = cache.config().retry.clone();
  let timeout = cache.config().fetch_timeout;

  let result = loop {
    let attempt = match timeout {
      Some(limit) => match tokio::time::timeout(limit, fetcher()).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(limit)),
      },
      None => fetcher().await,
    };

    match attempt {
      Ok(value) => {
        let value = Arc::new(value);
        let now = Instant::now();
        let applied = {
          let mut state = cache.lock();
          match state.entries.get_mut(&key) {
            Some(entry) => {
              let applied = entry.complete(generation, Arc::clone(&value), now);
              if applied {
                entry.notify(&key, now);
              }
              applied
            }
            None => false,
          }
        };
        if applied {
          info!(key = %key, generation, "fetch succeeded");
        } else {
          debug!(key = %key, generation, "discarding superseded fetch result");
        }
        break Ok(value);
      }
      Err(error) => {
        let now = Instant::now();
        let action = {
          let mut state = cache.lock();
          match state.entries.get_mut(&key) {
            Some(entry) => {
              let action = entry.fail(generation, error.clone(), retry.max_retries);
              entry.notify(&key, now);
              action
            }
            None => FailureAction::GiveUp,
          }
        };

        match action {
          FailureAction::Retry { failures } => {
            let delay = retry.backoff(failures);
            warn!(key = %key, error = %error, failures, ?delay, "fetch failed, retrying");
            tokio::time::sleep(delay).await;
          }
          FailureAction::GiveUp => {
            warn!(key = %key, error = %error, "fetch failed");
            break Err(error);
          }
        }
      }
    }
  };

  // Nobody may be waiting any more; the entry is already updated.
  let _ = tx.send(result);
}
