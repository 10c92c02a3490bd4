//! Queue API: wire models, the REST transport, and the cached client.

pub mod cached_client;
pub mod client;
pub mod types;

pub use cached_client::{CachedQueueClient, Resource};
pub use client::{QueueApi, RestClient};
