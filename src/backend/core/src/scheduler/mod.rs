//! Synchronized scheduled jobs.
//!
//! Every replica registers the same job id and cron rule with its own local
//! engine. On each tick the replica computes the tick's canonical timestamp
//! (the engine's next run after this fire, identical across replicas that
//! share the rule) and asks the job's [`SynchronizedClock`] to advance to it.
//! Only the replica whose call advances the clock invokes the callback.
//!
//! ```text
//!  local engine tick ──▶ next_run() ──▶ clock.set(T) ──▶ won?  ──▶ callback()
//!                             │                          └─ lost ─▶ nothing
//!                             └─ error ─▶ tick skipped (logged)
//! ```
//!
//! The arbitration is resolved before the callback starts; no lock is held
//! while it runs.

pub mod context;

pub use context::{arbitrate_tick, SchedulerContext, ScheduledJob, TickOutcome};
