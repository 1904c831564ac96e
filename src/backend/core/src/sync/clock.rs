//! Synchronized clock: a shared high-water mark for one scheduled job.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::warn;

use super::SyncStore;
use crate::error::Result;

const CLOCK_KEY_PREFIX: &str = "clock:";

/// Identifier of the clock owned by a job: `<job-id>:<cron-rule>`.
pub fn clock_id(job_id: &str, rule: &str) -> String {
    format!("{}:{}", job_id, rule)
}

/// A timestamp recorded in a [`SyncStore`] under `clock:<id>`.
///
/// Clones share the same key and store.
#[derive(Clone)]
pub struct SynchronizedClock {
    key: String,
    store: Arc<dyn SyncStore>,
}

impl std::fmt::Debug for SynchronizedClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizedClock")
            .field("key", &self.key)
            .field("backend", &self.store.name())
            .finish()
    }
}

impl SynchronizedClock {
    /// Create a clock for `id` against the given store.
    pub fn new(id: impl AsRef<str>, store: Arc<dyn SyncStore>) -> Self {
        Self {
            key: format!("{}{}", CLOCK_KEY_PREFIX, id.as_ref()),
            store,
        }
    }

    /// Store key of this clock.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record `timestamp` as the last fired time.
    ///
    /// Returns true iff this call advanced the shared high-water mark. Store
    /// failures count as a lost race.
    pub async fn set(&self, timestamp: DateTime<Utc>) -> bool {
        let timestamp_ms = timestamp.timestamp_millis();
        match self.store.set_greater_than(&self.key, timestamp_ms).await {
            Ok(won) => won,
            Err(e) => {
                warn!(
                    key = %self.key,
                    backend = self.store.name(),
                    timestamp_ms,
                    error = %e,
                    "Clock arbitration failed, treating tick as lost"
                );
                false
            }
        }
    }

    /// Forget the recorded timestamp.
    pub async fn reset(&self) {
        if let Err(e) = self.store.delete(&self.key).await {
            warn!(
                key = %self.key,
                backend = self.store.name(),
                error = %e,
                "Failed to reset synchronized clock"
            );
        }
    }

    /// Read the current high-water mark.
    pub async fn last(&self) -> Result<Option<DateTime<Utc>>> {
        let value = self.store.get(&self.key).await?;
        Ok(value.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }
}
