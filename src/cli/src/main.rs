//! Apex Sched CLI - inspect synchronized clocks and preview cron rules.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;

use commands::{clock, config, rule};
use output::OutputFormat;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_NAMESPACE: &str = "apex-sched";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Apex Sched - synchronized cron jobs across replicas
#[derive(Parser)]
#[command(
    name = "apex-sched",
    author = "Aezi <aezi.zhu@icloud.com>",
    version = "0.1.0",
    about = "Apex Sched - synchronized cron jobs across replicas",
    long_about = "Inspect and reset the clocks replicas arbitrate on, and preview cron rules.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Redis URL of the shared store
    #[arg(long, global = true, env = "APEX_SCHED_REDIS_URL")]
    redis_url: Option<String>,

    /// Key namespace the replicas use
    #[arg(long, global = true, env = "APEX_SCHED_NAMESPACE")]
    namespace: Option<String>,

    /// Connect and command timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronized clock operations
    #[command(subcommand)]
    Clock(clock::ClockCommands),

    /// Cron rule tools
    #[command(subcommand)]
    Rule(rule::RuleCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;

    let result = match cli.command {
        Commands::Clock(cmd) => match connect(&cli.redis_url, &cli.namespace, cli.timeout_ms).await {
            Ok(client) => clock::execute(cmd, &client, format).await,
            Err(e) => Err(e),
        },
        Commands::Rule(cmd) => rule::execute(cmd, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn connect(
    redis_url: &Option<String>,
    namespace: &Option<String>,
    timeout_ms: Option<u64>,
) -> Result<client::StoreClient> {
    let url = redis_url
        .clone()
        .or_else(|| config::load_value("redis-url"))
        .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
    let namespace = namespace
        .clone()
        .or_else(|| config::load_value("namespace"))
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let timeout_ms = timeout_ms
        .or_else(|| config::load_value("timeout-ms").and_then(|v| v.parse().ok()))
        .unwrap_or(DEFAULT_TIMEOUT_MS);

    client::StoreClient::connect(&url, &namespace, Duration::from_millis(timeout_ms)).await
}
