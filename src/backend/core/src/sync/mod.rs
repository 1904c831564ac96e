//! Synchronization store: the shared arbitration surface for replicas.
//!
//! This module provides pluggable store backends behind one trait:
//! - **InMemoryStore**: process-local map, for single-replica deployments and tests
//! - **RedisStore**: shared Redis instance, for multi-replica deployments
//!
//! Both honor the same contract. `set_greater_than` is the only operation
//! with coordination semantics: it stores a value only when the key is absent
//! or holds something strictly smaller, in a single atomic step.
//!
//! # Architecture
//!
//! ```text
//!  replica A ──┐                         ┌─────────────────────────────┐
//!              │  set_greater_than(k, T) │  SyncStore                  │
//!  replica B ──┼────────────────────────▶│  (in-memory | Redis + Lua)  │
//!              │                         └─────────────────────────────┘
//!  replica C ──┘        exactly one caller observes `true` for T
//! ```

pub mod clock;
pub mod memory;
pub mod remote;

pub use clock::{clock_id, SynchronizedClock};
pub use memory::InMemoryStore;
pub use remote::{RedisStore, RedisStoreConfig};

use crate::error::Result;
use async_trait::async_trait;

/// Key/value store with one atomic compare-and-set primitive.
///
/// Keys are opaque strings; values are 64-bit integers interpreted as
/// monotonically non-decreasing timestamps.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Unconditionally overwrite a value.
    async fn set(&self, key: &str, value: i64) -> Result<()>;

    /// Get a value, `None` if the key was never set or has been deleted.
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Delete a key. Deleting an absent key is not an error.
    ///
    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically store `value` if the key is absent or holds a strictly
    /// smaller value. Returns true iff this call stored it.
    async fn set_greater_than(&self, key: &str, value: i64) -> Result<bool>;

    /// Get the backend name.
    fn name(&self) -> &'static str;
}
