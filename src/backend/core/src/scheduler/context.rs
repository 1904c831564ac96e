//! Scheduler context and synchronized job handles.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use metrics::counter;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::{SyncBackendKind, SyncConfig};
use crate::engine::{CronEngine, CronRule, EngineConfig, EngineJob, JobContext, JobTask};
use crate::error::Result;
use crate::sync::{clock_id, InMemoryStore, RedisStore, SyncStore, SynchronizedClock};

/// Result of arbitrating one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// This replica advanced the clock to the timestamp and runs the callback.
    Won(DateTime<Utc>),
    /// Another replica (or an earlier call) already claimed the timestamp,
    /// or the store could not be reached.
    Lost(DateTime<Utc>),
    /// The tick's timestamp could not be determined.
    Skipped,
}

impl TickOutcome {
    /// Whether the callback should run.
    pub fn is_won(&self) -> bool {
        matches!(self, Self::Won(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Won(_) => "won",
            Self::Lost(_) => "lost",
            Self::Skipped => "skipped",
        }
    }
}

/// Decide whether this replica acts on a tick.
///
/// `next_run` is the engine's next fire time for the job after the current
/// fire; it becomes the tick's canonical timestamp.
pub async fn arbitrate_tick(
    job_id: &str,
    next_run: Result<DateTime<Utc>>,
    clock: &SynchronizedClock,
) -> TickOutcome {
    let outcome = match next_run {
        Ok(timestamp) => {
            if clock.set(timestamp).await {
                TickOutcome::Won(timestamp)
            } else {
                TickOutcome::Lost(timestamp)
            }
        }
        Err(e) => {
            error!(
                job_id = %job_id,
                error = %e,
                "Can not schedule synchronized job: next run lookup failed"
            );
            TickOutcome::Skipped
        }
    };

    counter!(
        "apex_sched_ticks_total",
        "job_id" => job_id.to_string(),
        "outcome" => outcome.label(),
    )
    .increment(1);

    if let TickOutcome::Won(timestamp) | TickOutcome::Lost(timestamp) = outcome {
        debug!(
            job_id = %job_id,
            key = %clock.key(),
            timestamp_ms = timestamp.timestamp_millis(),
            outcome = outcome.label(),
            "Tick arbitrated"
        );
    }

    outcome
}

/// Owns the local cron engine and the synchronization store for a process.
///
/// The store is fixed at construction, so every job scheduled through one
/// context arbitrates against the same backend.
pub struct SchedulerContext {
    engine: CronEngine,
    store: Arc<dyn SyncStore>,
}

impl fmt::Debug for SchedulerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerContext")
            .field("engine", &self.engine)
            .field("backend", &self.store.name())
            .finish()
    }
}

impl SchedulerContext {
    /// Create a context over `store` with a started engine.
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self::with_engine_config(store, EngineConfig::default())
    }

    /// Create a context with a custom engine configuration.
    pub fn with_engine_config(store: Arc<dyn SyncStore>, config: EngineConfig) -> Self {
        let engine = CronEngine::new(config);
        engine.start();
        info!(backend = store.name(), "Scheduler context created");
        Self { engine, store }
    }

    /// Create a context backed by a process-local store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    /// Build the store selected by `sync` and create a context over it.
    pub async fn from_config(sync: &SyncConfig, engine: EngineConfig) -> Result<Self> {
        let store: Arc<dyn SyncStore> = match sync.backend {
            SyncBackendKind::Memory => Arc::new(InMemoryStore::new()),
            SyncBackendKind::Redis => Arc::new(RedisStore::connect(sync.redis.to_store_config()).await?),
        };
        Ok(Self::with_engine_config(store, engine))
    }

    /// The synchronization store jobs arbitrate against.
    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    /// The local cron engine.
    pub fn engine(&self) -> &CronEngine {
        &self.engine
    }

    /// Schedule `callback` on `rule`, executed by at most one replica per tick.
    ///
    /// A malformed rule is returned as an error and nothing is registered.
    pub fn schedule_synchronized_job<F, Fut>(
        &self,
        id: &str,
        rule: &str,
        callback: F,
    ) -> Result<ScheduledJob>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // Surrounding whitespace never changes the clock a rule maps to.
        let rule = CronRule::parse(rule)?;
        let clock = SynchronizedClock::new(clock_id(id, rule.as_str()), self.store.clone());

        let job_id: Arc<str> = Arc::from(id);
        let callback = Arc::new(callback);
        let gate = Arc::new(ArbitrationGate::default());
        let tick_clock = clock.clone();
        let tick_job_id = job_id.clone();
        let tick_gate = gate.clone();

        let task: JobTask = Arc::new(move |ctx: JobContext| {
            let clock = tick_clock.clone();
            let callback = callback.clone();
            let job_id = tick_job_id.clone();
            let gate = tick_gate.clone();
            async move {
                if gate.arbitrate(&job_id, ctx, &clock).await.is_won() {
                    callback().await;
                }
            }
            .boxed()
        });

        let engine_job = self.engine.register(rule.as_str(), task)?;

        info!(
            job_id = %job_id,
            rule = %engine_job.rule(),
            key = %clock.key(),
            backend = self.store.name(),
            "Synchronized job scheduled"
        );

        Ok(ScheduledJob {
            id: job_id,
            engine_job,
            engine: self.engine.clone(),
            clock,
            gate,
        })
    }

    /// Stop the engine. Clocks are left untouched.
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}

/// Serializes a job's clock writes against [`ScheduledJob::stop`].
///
/// The lock covers the next-run lookup and the clock write only, never the
/// callback. The flag is set once the job is stopped; a tick that reaches
/// the gate afterwards is skipped so it cannot recreate a deleted clock.
#[derive(Default)]
struct ArbitrationGate {
    stopped: Mutex<bool>,
}

impl ArbitrationGate {
    async fn arbitrate(
        &self,
        job_id: &str,
        ctx: JobContext,
        clock: &SynchronizedClock,
    ) -> TickOutcome {
        let stopped = self.stopped.lock().await;
        if *stopped {
            debug!(job_id = %job_id, "Tick dropped after stop");
            return TickOutcome::Skipped;
        }
        arbitrate_tick(job_id, ctx.next_run(), clock).await
    }

    /// Wait for any in-flight arbitration and refuse later ones.
    async fn close(&self) {
        *self.stopped.lock().await = true;
    }
}

/// Handle to a job created by [`SchedulerContext::schedule_synchronized_job`].
pub struct ScheduledJob {
    id: Arc<str>,
    engine_job: EngineJob,
    engine: CronEngine,
    clock: SynchronizedClock,
    gate: Arc<ArbitrationGate>,
}

impl fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("id", &self.id)
            .field("rule", &self.engine_job.rule().as_str())
            .field("clock", &self.clock)
            .finish()
    }
}

impl ScheduledJob {
    /// Get the job id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the cron rule.
    pub fn rule(&self) -> &str {
        self.engine_job.rule().as_str()
    }

    /// The job's synchronized clock.
    pub fn clock(&self) -> &SynchronizedClock {
        &self.clock
    }

    /// Next local fire time.
    pub fn next_run(&self) -> Result<DateTime<Utc>> {
        self.engine_job.next_run()
    }

    /// Unregister the job and delete its clock.
    ///
    /// A clock write already in flight finishes before the key is deleted,
    /// so the key is gone once this returns. A callback already running is
    /// not interrupted. Calling this twice is harmless.
    pub async fn stop(&self) {
        if let Err(e) = self.engine.unregister(self.engine_job.id()) {
            debug!(job_id = %self.id, error = %e, "Job was not registered");
        }
        self.gate.close().await;
        self.clock.reset().await;
        info!(job_id = %self.id, key = %self.clock.key(), "Synchronized job stopped");
    }

    /// Unregister the job but keep its clock.
    ///
    /// Used when a replica leaves while its peers keep running the job.
    pub fn detach(&self) {
        if let Err(e) = self.engine.unregister(self.engine_job.id()) {
            debug!(job_id = %self.id, error = %e, "Job was not registered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApexError, ErrorCode};
    use chrono::TimeZone;

    fn memory_clock(id: &str) -> (Arc<dyn SyncStore>, SynchronizedClock) {
        let store: Arc<dyn SyncStore> = Arc::new(InMemoryStore::new());
        let clock = SynchronizedClock::new(id, store.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn test_arbitrate_tick_won_then_lost() {
        let (_, clock) = memory_clock("job1:* * * * * *");
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();

        assert_eq!(arbitrate_tick("job1", Ok(t), &clock).await, TickOutcome::Won(t));
        assert_eq!(arbitrate_tick("job1", Ok(t), &clock).await, TickOutcome::Lost(t));
    }

    #[tokio::test]
    async fn test_arbitrate_tick_skips_without_next_run() {
        let (store, clock) = memory_clock("job1:* * * * * *");
        let next_run = Err(ApexError::job_not_found("job1"));

        assert_eq!(arbitrate_tick("job1", next_run, &clock).await, TickOutcome::Skipped);
        assert!(!store.exists(clock.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_schedule_rejects_malformed_rule() {
        let ctx = SchedulerContext::in_memory();
        let err = ctx
            .schedule_synchronized_job("job1", "every minute", || async {})
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCronRule);
        assert_eq!(ctx.engine().job_count(), 0);
    }

    #[tokio::test]
    async fn test_scheduled_job_accessors() {
        let ctx = SchedulerContext::in_memory();
        let job = ctx
            .schedule_synchronized_job("report", "0 0 8 * * *", || async {})
            .unwrap();

        assert_eq!(job.id(), "report");
        assert_eq!(job.rule(), "0 0 8 * * *");
        assert_eq!(job.clock().key(), "clock:report:0 0 8 * * *");
        assert!(job.next_run().unwrap() > Utc::now());

        job.stop().await;
        assert_eq!(ctx.engine().job_count(), 0);
        job.stop().await;
    }

    #[tokio::test]
    async fn test_clock_key_uses_trimmed_rule() {
        let ctx = SchedulerContext::in_memory();
        let job = ctx
            .schedule_synchronized_job("report", "  0 0 8 * * * ", || async {})
            .unwrap();
        assert_eq!(job.clock().key(), "clock:report:0 0 8 * * *");
        job.stop().await;
    }
}
