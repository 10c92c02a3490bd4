//! Error taxonomy shared by fetchers, mutations and the transport.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Every failure a read or write can surface.
///
/// Errors are `Clone` because one in-flight failure is delivered to every
/// waiting consumer and also retained in the cache entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
  /// Network or connectivity failure, including undecodable responses
  #[error("transport error: {0}")]
  Transport(String),

  /// The server answered with a non-success status
  #[error("server returned {code}: {message}")]
  Status { code: u16, message: String },

  /// A single attempt exceeded its deadline
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  /// Malformed parameters, rejected before any call is issued
  #[error("invalid request: {0}")]
  Validation(String),
}

impl SyncError {
  pub fn validation(reason: impl Into<String>) -> Self {
    Self::Validation(reason.into())
  }

  pub fn transport(reason: impl Into<String>) -> Self {
    Self::Transport(reason.into())
  }

  /// Whether a failed fetch attempt with this error may be retried.
  ///
  /// Validation failures are deterministic, so retrying them only repeats the failure.
  pub fn is_retryable(&self) -> bool {
    !matches!(self, Self::Validation(_))
  }

  /// HTTP status code, if the server produced one.
  pub fn status_code(&self) -> Option<u16> {
    match self {
      Self::Status { code, .. } => Some(*code),
      _ => None,
    }
  }
}
