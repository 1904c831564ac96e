//! Connection to the shared synchronization store.

use anyhow::{Context, Result};
use apex_sched::engine::CronRule;
use apex_sched::sync::{clock_id, RedisStore, RedisStoreConfig, SyncStore, SynchronizedClock};
use apex_sched::telemetry::redact_url;
use std::sync::Arc;
use std::time::Duration;

/// Client for the Redis store the replicas arbitrate against.
pub struct StoreClient {
    store: Arc<RedisStore>,
}

impl StoreClient {
    /// Connect to the store at `url`, using `namespace` as the key prefix.
    pub async fn connect(url: &str, namespace: &str, timeout: Duration) -> Result<Self> {
        let mut config = RedisStoreConfig::new(url, namespace);
        config.connect_timeout = timeout;
        config.command_timeout = timeout;

        let store = RedisStore::connect(config)
            .await
            .with_context(|| format!("Failed to connect to {}", redact_url(url)))?;

        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// Redacted URL of the store, for display.
    pub fn display_url(&self) -> String {
        redact_url(&self.store.config().url)
    }

    /// Key namespace in use.
    pub fn namespace(&self) -> &str {
        &self.store.config().namespace
    }

    /// The raw store.
    pub fn store(&self) -> Arc<dyn SyncStore> {
        self.store.clone()
    }

    /// Clock of the job `job_id` running on `rule`.
    ///
    /// The rule is validated first so a typo cannot address a clock that no
    /// replica would ever use.
    pub fn clock(&self, job_id: &str, rule: &str) -> Result<(CronRule, SynchronizedClock)> {
        let rule = CronRule::parse(rule)?;
        let clock = SynchronizedClock::new(clock_id(job_id, rule.as_str()), self.store());
        Ok((rule, clock))
    }
}
