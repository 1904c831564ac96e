//! Local cron engine.
//!
//! A single engine per process fires registered tasks whenever their
//! six-field cron rule matches (second resolution). Each replica runs its
//! own engine; nothing here coordinates across processes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use apex_sched::engine::{CronEngine, EngineConfig};
//!
//! let engine = CronEngine::new(EngineConfig::default());
//! engine.start();
//!
//! let job = engine.register_fn("*/10 * * * * *", |ctx| async move {
//!     tracing::info!(next = ?ctx.next_run(), "tick");
//! })?;
//!
//! engine.unregister(job.id())?;
//! ```

pub mod executor;
pub mod rule;

pub use executor::{CronEngine, EngineConfig, EngineJob, EngineJobId, JobContext, JobTask};
pub use rule::CronRule;
