//! Query cache and synchronization core.
//!
//! This module provides an API-agnostic synchronization layer that:
//! - Caches remote query results by structural [`ResourceKey`](crate::key::ResourceKey)
//! - Serves fresh entries without network activity and stale ones while revalidating
//! - Deduplicates concurrent reads into one in-flight fetch per key
//! - Retries failed fetches with backoff and discards out-of-order results
//! - Invalidates dependent entries after successful writes

mod bus;
mod entry;
mod mutation;
mod observer;
mod policy;
mod query;
mod store;

pub use bus::{InvalidationBus, InvalidationCallback, SubscriptionId};
pub use entry::{EntrySnapshot, EntryStatus, InFlight};
pub use mutation::{Mutation, MutationCoordinator};
pub use observer::QueryObserver;
pub use policy::{CacheConfig, RetryPolicy, DEFAULT_STALE_AFTER};
pub use query::{fetcher, Fetcher, QueryCoordinator, ReadOutcome};
pub use store::QueryCache;
