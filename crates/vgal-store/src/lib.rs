//! Video record persistence.
//!
//! This crate provides:
//! - `VideoStore`: the record store contract, with read-modify-write updates
//!   built on a compare-and-set primitive
//! - `InMemoryVideoStore`: process-local store for tests and single-node runs
//! - `RedisVideoStore`: shared store keyed by video id, safe across workers

pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryVideoStore;
pub use redis_store::{RedisStoreConfig, RedisVideoStore};
pub use store::{Mutator, VideoStore, MAX_UPDATE_ATTEMPTS};
