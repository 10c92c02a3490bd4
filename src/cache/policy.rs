//! Staleness, retry and capacity policy for the query cache.

use std::collections::HashMap;
use std::time::Duration;

use crate::key::ResourceKind;

/// Default staleness window for list and detail reads.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// How failed fetch attempts are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Extra attempts after the first failure
  pub max_retries: u32,
  /// Backoff before the first retry; doubles on each further failure
  pub retry_delay: Duration,
  /// Upper bound on any single backoff
  pub max_retry_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 1,
      retry_delay: Duration::from_secs(1),
      max_retry_delay: Duration::from_secs(30),
    }
  }
}

impl RetryPolicy {
  /// Never retry.
  pub fn none() -> Self {
    Self {
      max_retries: 0,
      ..Self::default()
    }
  }

  /// Backoff after the given number of consecutive failures (1-based).
  pub fn backoff(&self, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    self
      .retry_delay
      .saturating_mul(1u32 << exponent)
      .min(self.max_retry_delay)
  }
}

/// Configuration the cache is constructed with.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Staleness window applied when a kind has no override
  pub stale_after: Duration,
  /// Per-kind staleness windows
  pub stale_overrides: HashMap<ResourceKind, Duration>,
  pub retry: RetryPolicy,
  /// Deadline for a single fetch attempt
  pub fetch_timeout: Option<Duration>,
  /// Optional bound on the number of entries
  pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_after: DEFAULT_STALE_AFTER,
      stale_overrides: HashMap::new(),
      retry: RetryPolicy::default(),
      fetch_timeout: None,
      max_entries: None,
    }
  }
}

impl CacheConfig {
  pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
    self.stale_after = stale_after;
    self
  }

  pub fn with_stale_after_for(mut self, kind: ResourceKind, stale_after: Duration) -> Self {
    self.stale_overrides.insert(kind, stale_after);
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
    self.fetch_timeout = Some(timeout);
    self
  }

  pub fn with_max_entries(mut self, max_entries: usize) -> Self {
    self.max_entries = Some(max_entries);
    self
  }

  /// Staleness window for a resource kind.
  pub fn stale_after_for(&self, kind: ResourceKind) -> Duration {
    self
      .stale_overrides
      .get(&kind)
      .copied()
      .unwrap_or(self.stale_after)
  }
}
