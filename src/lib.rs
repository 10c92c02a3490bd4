//! Client-side synchronization layer for the qafka queue dashboard.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod key;

pub use error::{SyncError, SyncResult};
pub use key::{KeyPattern, ResourceKey, ResourceKind};
