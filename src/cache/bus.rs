//! Process-wide invalidation bus.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::key::{KeyPattern, ResourceKey};

/// Callback run when a matching key is invalidated.
pub type InvalidationCallback = Arc<dyn Fn(&ResourceKey) + Send + Sync>;

/// Handle returned by [`InvalidationBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
  id: SubscriptionId,
  pattern: KeyPattern,
  callback: InvalidationCallback,
}

#[derive(Default)]
struct BusState {
  next_id: u64,
  subscribers: Vec<Subscriber>,
}

/// Registry of pattern subscribers notified when a write invalidates keys.
///
/// Cloning yields another handle to the same registry. Subscribers of the
/// same publish run in no particular order.
#[derive(Clone, Default)]
pub struct InvalidationBus {
  state: Arc<Mutex<BusState>>,
}

impl InvalidationBus {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, BusState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn subscribe<F>(&self, pattern: KeyPattern, callback: F) -> SubscriptionId
  where
    F: Fn(&ResourceKey) + Send + Sync + 'static,
  {
    let mut state = self.lock();
    state.next_id += 1;
    let id = SubscriptionId(state.next_id);
    state.subscribers.push(Subscriber {
      id,
      pattern,
      callback: Arc::new(callback),
    });
    id
  }

  /// Remove a subscriber. Returns false if it was already gone.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut state = self.lock();
    let before = state.subscribers.len();
    state.subscribers.retain(|s| s.id != id);
    state.subscribers.len() != before
  }

  /// Invoke every subscriber whose pattern matches the key.
  ///
  /// Callbacks run outside the registry lock, so they may subscribe or
  /// unsubscribe. Returns how many callbacks ran.
  pub fn publish(&self, key: &ResourceKey) -> usize {
    let callbacks: Vec<InvalidationCallback> = self
      .lock()
      .subscribers
      .iter()
      .filter(|s| s.pattern.matches(key))
      .map(|s| Arc::clone(&s.callback))
      .collect();

    for callback in &callbacks {
      callback(key);
    }
    callbacks.len()
  }

  pub fn subscriber_count(&self) -> usize {
    self.lock().subscribers.len()
  }
}

impl std::fmt::Debug for InvalidationBus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("InvalidationBus")
      .field("subscribers", &self.subscriber_count())
      .finish()
  }
}
