#![allow(clippy::result_large_err)]
//! # Apex Sched
//!
//! Cron jobs that run on many replicas but fire on exactly one per tick.
//!
//! ## Architecture
//!
//! - **Engine**: Local six-field cron engine running each job on its own task
//! - **Sync**: Key/value store with an atomic "set if greater" primitive
//!   (in-memory or Redis) and the synchronized clocks built on it
//! - **Scheduler**: Wraps engine jobs so only the replica that advances a
//!   job's clock runs the callback
//! - **Telemetry**: Structured logging and Prometheus metrics
//!
//! ```rust,no_run
//! use apex_sched::prelude::*;
//!
//! # async fn run() -> apex_sched::Result<()> {
//! let ctx = SchedulerContext::in_memory();
//! let job = ctx.schedule_synchronized_job("report", "0 */5 * * * *", || async {
//!     tracing::info!("generating report");
//! })?;
//!
//! job.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod sync;
pub mod telemetry;

pub use error::{ApexError, ErrorCode, ErrorContext, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, JobDefinition, SyncBackendKind, SyncConfig};
    pub use crate::engine::{CronEngine, CronRule, EngineConfig, JobContext};
    pub use crate::error::{ApexError, ErrorCode, ErrorContext, ErrorSeverity, Result};
    pub use crate::scheduler::{SchedulerContext, ScheduledJob, TickOutcome};
    pub use crate::sync::{
        clock_id, InMemoryStore, RedisStore, RedisStoreConfig, SyncStore, SynchronizedClock,
    };
}
