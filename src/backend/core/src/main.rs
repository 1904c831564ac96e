//! Apex Sched replica - runs the configured synchronized jobs.
//!
//! Start one replica per host; every replica pointing at the same store and
//! namespace shares the work, and each tick runs on exactly one of them.

use std::path::PathBuf;
use std::sync::Arc;

use apex_sched::{
    config::{Config, JobDefinition},
    scheduler::{SchedulerContext, ScheduledJob},
    telemetry,
};
use clap::Parser;
use tokio::process::Command;

#[derive(Parser, Debug)]
#[command(name = "apex-sched-replica", version, about = "Run synchronized cron jobs")]
struct Args {
    /// Configuration file (toml, yaml or json); environment variables override it
    #[arg(short, long, env = "APEX_SCHED_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    telemetry::init_telemetry(
        &config.observability.logging(),
        &config.observability.metrics(),
    )?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.sync.backend,
        jobs = config.jobs.len(),
        "Starting Apex Sched replica"
    );

    let ctx = SchedulerContext::from_config(&config.sync, config.engine.clone())
        .await
        .map_err(|e| {
            e.log();
            e
        })?;

    let mut jobs = Vec::with_capacity(config.jobs.len());
    for definition in &config.jobs {
        jobs.push(schedule(&ctx, definition)?);
    }
    if jobs.is_empty() {
        tracing::warn!("No jobs configured; the replica will idle until stopped");
    }

    shutdown_signal().await;

    stop_jobs(&jobs, config.replica.reset_clocks_on_shutdown).await;
    ctx.shutdown();

    tracing::info!("Replica stopped");
    Ok(())
}

fn schedule(ctx: &SchedulerContext, definition: &JobDefinition) -> apex_sched::Result<ScheduledJob> {
    let job_id: Arc<str> = Arc::from(definition.id.as_str());
    let command: Arc<[String]> = Arc::from(definition.command.clone());

    ctx.schedule_synchronized_job(&definition.id, &definition.rule, move || {
        let job_id = job_id.clone();
        let command = command.clone();
        async move { run_tick(&job_id, &command).await }
    })
}

async fn run_tick(job_id: &str, command: &[String]) {
    let Some((program, args)) = command.split_first() else {
        tracing::info!(job_id = %job_id, "Tick won");
        return;
    };

    tracing::info!(job_id = %job_id, program = %program, "Tick won, running command");
    match Command::new(program).args(args).kill_on_drop(true).status().await {
        Ok(status) if status.success() => {
            tracing::info!(job_id = %job_id, "Command finished");
        }
        Ok(status) => {
            tracing::warn!(job_id = %job_id, status = %status, "Command exited unsuccessfully");
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, program = %program, error = %e, "Failed to spawn command");
        }
    }
}

async fn stop_jobs(jobs: &[ScheduledJob], reset_clocks: bool) {
    for job in jobs {
        if reset_clocks {
            job.stop().await;
        } else {
            job.detach();
        }
    }
    tracing::info!(count = jobs.len(), reset_clocks, "Jobs unregistered");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
