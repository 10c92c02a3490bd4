//! Mutation coordinator: run a write, then invalidate what it touched.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use super::bus::InvalidationBus;
use super::store::QueryCache;
use crate::error::SyncResult;
use crate::key::KeyPattern;

type Operation<A, R> = Arc<dyn Fn(A) -> BoxFuture<'static, SyncResult<R>> + Send + Sync>;
type Invalidates<A> = Arc<dyn Fn(&A) -> Vec<KeyPattern> + Send + Sync>;

/// A named remote write and the key patterns it makes stale.
pub struct Mutation<A, R> {
  name: &'static str,
  operation: Operation<A, R>,
  invalidates: Invalidates<A>,
}

impl<A, R> Clone for Mutation<A, R> {
  fn clone(&self) -> Self {
    Self {
      name: self.name,
      operation: Arc::clone(&self.operation),
      invalidates: Arc::clone(&self.invalidates),
    }
  }
}

impl<A: Send + 'static, R: Send + 'static> Mutation<A, R> {
  /// Define a write that invalidates nothing yet.
  pub fn new<F, Fut>(name: &'static str, operation: F) -> Self
  where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<R>> + Send + 'static,
  {
    Self {
      name,
      operation: Arc::new(move |args| operation(args).boxed()),
      invalidates: Arc::new(|_: &A| Vec::new()),
    }
  }

  /// The same patterns for every call.
  pub fn invalidates(mut self, patterns: Vec<KeyPattern>) -> Self {
    self.invalidates = Arc::new(move |_: &A| patterns.clone());
    self
  }

  /// Patterns derived from the call's arguments.
  pub fn invalidates_with<F>(mut self, patterns: F) -> Self
  where
    F: Fn(&A) -> Vec<KeyPattern> + Send + Sync + 'static,
  {
    self.invalidates = Arc::new(patterns);
    self
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Patterns a call with these arguments would invalidate.
  pub fn patterns_for(&self, args: &A) -> Vec<KeyPattern> {
    (self.invalidates)(args)
  }
}

/// Executes writes and reconciles the cache with them.
///
/// Writes run exactly once per call and are never retried, since they are
/// not assumed idempotent. Nothing in the cache changes unless the write
/// succeeds.
pub struct MutationCoordinator<V> {
  cache: QueryCache<V>,
  bus: InvalidationBus,
}

impl<V> Clone for MutationCoordinator<V> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      bus: self.bus.clone(),
    }
  }
}

impl<V> MutationCoordinator<V> {
  pub fn new(cache: QueryCache<V>, bus: InvalidationBus) -> Self {
    Self { cache, bus }
  }

  pub fn bus(&self) -> &InvalidationBus {
    &self.bus
  }

  /// Run a write; on success mark every entry matching `invalidates` stale
  /// and publish each affected key on the bus.
  pub async fn commit<R, Fut>(&self, operation: Fut, invalidates: &[KeyPattern]) -> SyncResult<R>
  where
    Fut: Future<Output = SyncResult<R>>,
  {
    let output = operation.await.map_err(|error| {
      warn!(error = %error, "mutation failed");
      error
    })?;

    let mut affected = 0;
    for pattern in invalidates {
      let keys = self.cache.invalidate(pattern);
      affected += keys.len();
      for key in &keys {
        self.bus.publish(key);
      }
    }
    info!(patterns = invalidates.len(), affected, "mutation committed");

    Ok(output)
  }

  /// Run a defined mutation with its arguments.
  pub async fn invoke<A, R>(&self, mutation: &Mutation<A, R>, args: A) -> SyncResult<R>
  where
    A: Send + 'static,
    R: Send + 'static,
  {
    let patterns = mutation.patterns_for(&args);
    info!(mutation = mutation.name(), "running mutation");
    self.commit((mutation.operation)(args), &patterns).await
  }
}
