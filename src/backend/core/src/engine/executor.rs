//! Process-local cron executor.
//!
//! Every registered job runs on its own tokio task. A job's task is awaited
//! inline, so successive ticks of one job never overlap; distinct jobs run
//! concurrently.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use metrics::gauge;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::CronRule;
use crate::error::{ApexError, ErrorCode, Result};

/// Unit of work fired on each tick.
pub type JobTask = Arc<dyn Fn(JobContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Identifier of a job registered with a [`CronEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineJobId(Uuid);

impl EngineJobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EngineJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for the cron engine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Engine name, used in logs
    #[serde(default = "default_engine_name")]
    pub name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_engine_name(),
        }
    }
}

fn default_engine_name() -> String {
    "apex-sched-engine".to_string()
}

struct JobState {
    rule: CronRule,
    next_run: Mutex<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
}

struct EngineInner {
    config: EngineConfig,
    jobs: DashMap<EngineJobId, Arc<JobState>>,
    started: watch::Sender<bool>,
    shutdown: CancellationToken,
}

impl EngineInner {
    fn next_run(&self, id: EngineJobId) -> Result<DateTime<Utc>> {
        let state = self
            .jobs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ApexError::job_not_found(id))?;

        let next_run = *state.next_run.lock();
        next_run.ok_or_else(|| ApexError::schedule_exhausted(id))
    }

    fn record_job_count(&self) {
        gauge!("apex_sched_jobs_registered", "engine" => self.config.name.clone())
            .set(self.jobs.len() as f64);
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Context handed to a task on each tick.
#[derive(Clone)]
pub struct JobContext {
    job_id: EngineJobId,
    scheduled_at: DateTime<Utc>,
    engine: Weak<EngineInner>,
}

impl JobContext {
    /// Id of the firing job.
    pub fn job_id(&self) -> EngineJobId {
        self.job_id
    }

    /// Nominal fire time of this tick.
    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    /// The job's next fire time, as computed by the engine after this tick.
    ///
    /// Fails once the job has been unregistered or the engine is gone.
    pub fn next_run(&self) -> Result<DateTime<Utc>> {
        let engine = self.engine.upgrade().ok_or_else(|| {
            ApexError::new(ErrorCode::EngineShutdown, "Cron engine has shut down")
        })?;
        engine.next_run(self.job_id)
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("scheduled_at", &self.scheduled_at)
            .finish()
    }
}

/// Reference to a registered job.
#[derive(Clone)]
pub struct EngineJob {
    id: EngineJobId,
    rule: CronRule,
    engine: Weak<EngineInner>,
}

impl EngineJob {
    /// Get the job id.
    pub fn id(&self) -> EngineJobId {
        self.id
    }

    /// Get the rule the job fires on.
    pub fn rule(&self) -> &CronRule {
        &self.rule
    }

    /// Next scheduled fire time.
    pub fn next_run(&self) -> Result<DateTime<Utc>> {
        let engine = self.engine.upgrade().ok_or_else(|| {
            ApexError::new(ErrorCode::EngineShutdown, "Cron engine has shut down")
        })?;
        engine.next_run(self.id)
    }
}

impl fmt::Debug for EngineJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineJob")
            .field("id", &self.id)
            .field("rule", &self.rule.as_str())
            .finish()
    }
}

/// Recurring job scheduler driven by cron rules.
///
/// Clones share the same set of jobs. Dropping the last clone stops every
/// job loop.
#[derive(Clone)]
pub struct CronEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for CronEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronEngine")
            .field("name", &self.inner.config.name)
            .field("jobs", &self.inner.jobs.len())
            .field("started", &self.is_started())
            .finish()
    }
}

impl Default for CronEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl CronEngine {
    /// Create a stopped engine.
    pub fn new(config: EngineConfig) -> Self {
        let (started, _) = watch::channel(false);
        Self {
            inner: Arc::new(EngineInner {
                config,
                jobs: DashMap::new(),
                started,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Start firing jobs. Jobs registered before this call wait for it.
    pub fn start(&self) {
        if !self.inner.started.send_replace(true) {
            info!(engine = %self.inner.config.name, "Cron engine started");
        }
    }

    /// Whether [`start`](Self::start) has been called.
    pub fn is_started(&self) -> bool {
        *self.inner.started.borrow()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Number of registered jobs.
    pub fn job_count(&self) -> usize {
        self.inner.jobs.len()
    }

    /// Register a task to fire on `rule`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register(&self, rule: &str, task: JobTask) -> Result<EngineJob> {
        let rule = CronRule::parse(rule)?;

        if self.is_shutdown() {
            return Err(ApexError::new(
                ErrorCode::EngineShutdown,
                "Cron engine has shut down",
            ));
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ApexError::internal("Jobs must be registered from within a Tokio runtime")
                .with_source(e)
        })?;

        let id = EngineJobId::new();
        let initial = if self.is_started() {
            rule.next_after(&Utc::now())
        } else {
            None
        };
        let state = Arc::new(JobState {
            rule: rule.clone(),
            next_run: Mutex::new(initial),
            cancel: self.inner.shutdown.child_token(),
        });
        self.inner.jobs.insert(id, state.clone());
        self.inner.record_job_count();

        runtime.spawn(run_job(
            Arc::downgrade(&self.inner),
            id,
            state,
            task,
            self.inner.started.subscribe(),
        ));

        debug!(
            engine = %self.inner.config.name,
            job_id = %id,
            rule = %rule,
            "Cron job registered"
        );

        Ok(EngineJob {
            id,
            rule,
            engine: Arc::downgrade(&self.inner),
        })
    }

    /// Register an async closure to fire on `rule`.
    pub fn register_fn<F, Fut>(&self, rule: &str, f: F) -> Result<EngineJob>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(rule, Arc::new(move |ctx| f(ctx).boxed()))
    }

    /// Unregister a job. Future ticks stop; an in-flight tick is not interrupted.
    pub fn unregister(&self, id: EngineJobId) -> Result<()> {
        let (_, state) = self
            .inner
            .jobs
            .remove(&id)
            .ok_or_else(|| ApexError::job_not_found(id))?;
        state.cancel.cancel();
        self.inner.record_job_count();

        debug!(engine = %self.inner.config.name, job_id = %id, "Cron job unregistered");
        Ok(())
    }

    /// Next fire time of a registered job.
    pub fn next_run(&self, id: EngineJobId) -> Result<DateTime<Utc>> {
        self.inner.next_run(id)
    }

    /// Stop every job loop and refuse further registrations.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.jobs.clear();
        self.inner.record_job_count();
        info!(engine = %self.inner.config.name, "Cron engine shut down");
    }
}

async fn run_job(
    engine: Weak<EngineInner>,
    id: EngineJobId,
    state: Arc<JobState>,
    task: JobTask,
    mut started: watch::Receiver<bool>,
) {
    let wait_for_start = async { started.wait_for(|started| *started).await.is_ok() };
    tokio::select! {
        _ = state.cancel.cancelled() => return,
        ok = wait_for_start => {
            if !ok {
                return;
            }
        }
    }

    let mut next = state.rule.next_after(&Utc::now());

    while let Some(fire_at) = next {
        *state.next_run.lock() = Some(fire_at);

        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            biased;
            _ = state.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        // Visible to the task through `JobContext::next_run`.
        let following = state.rule.next_after(&fire_at);
        *state.next_run.lock() = following;

        let ctx = JobContext {
            job_id: id,
            scheduled_at: fire_at,
            engine: engine.clone(),
        };

        if let Err(panic) = AssertUnwindSafe(task(ctx)).catch_unwind().await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(job_id = %id, panic = %message, "Cron job task panicked");
        }

        if state.cancel.is_cancelled() {
            return;
        }

        // Fire times that passed while the task ran are skipped.
        let now = Utc::now();
        next = match following {
            Some(t) if t > now => Some(t),
            _ => state.rule.next_after(&now),
        };
    }

    info!(job_id = %id, rule = %state.rule, "Cron rule has no further fire times");
    if let Some(engine) = engine.upgrade() {
        engine.jobs.remove(&id);
        engine.record_job_count();
    }
}
