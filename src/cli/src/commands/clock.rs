//! Synchronized clock commands.
//!
//! Inspect, reset and manually claim the high-water mark a job's replicas
//! arbitrate on.

use anyhow::{Context, Result};
use apex_sched::engine::CronRule;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;

use crate::client::StoreClient;
use crate::commands::rule::upcoming_ticks;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ClockCommands {
    /// Show the last claimed tick of a job
    Show {
        /// Job id
        job_id: String,
        /// Cron rule the job runs on (quote it)
        rule: String,
    },

    /// Delete a job's clock so the next tick is claimable again
    Reset {
        /// Job id
        job_id: String,
        /// Cron rule the job runs on (quote it)
        rule: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Claim a tick by hand, as a replica would
    Claim {
        /// Job id
        job_id: String,
        /// Cron rule the job runs on (quote it)
        rule: String,
        /// Clock value to claim (RFC 3339); defaults to the value the replica
        /// firing at the rule's next fire time would write
        #[arg(long)]
        at: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct ClockView {
    key: String,
    namespace: String,
    last_tick_ms: Option<i64>,
    last_tick: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ClaimView {
    key: String,
    tick_ms: i64,
    tick: DateTime<Utc>,
    won: bool,
}

/// The clock value the replica firing at the next fire after `now` writes.
fn default_claim(rule: &CronRule, now: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    upcoming_ticks(rule, now, 1).first().map(|(_, clock)| *clock)
}

pub async fn execute(cmd: ClockCommands, client: &StoreClient, format: OutputFormat) -> Result<()> {
    match cmd {
        ClockCommands::Show { job_id, rule } => {
            let (_, clock) = client.clock(&job_id, &rule)?;
            let last = clock.last().await?;

            let view = ClockView {
                key: clock.key().to_string(),
                namespace: client.namespace().to_string(),
                last_tick_ms: last.map(|t| t.timestamp_millis()),
                last_tick: last,
            };

            match format {
                OutputFormat::Table => {
                    output::print_header("Synchronized Clock");
                    output::print_detail("Store", &client.display_url());
                    output::print_detail("Namespace", &view.namespace);
                    output::print_detail("Key", &view.key);
                    match last {
                        Some(t) => {
                            output::print_detail("Last tick", &t.to_rfc3339());
                            output::print_detail("Last tick (ms)", &t.timestamp_millis().to_string());
                        }
                        None => output::print_info("No tick has been claimed"),
                    }
                }
                _ => output::print_item(&view, format)?,
            }
        }

        ClockCommands::Reset { job_id, rule, force } => {
            let (_, clock) = client.clock(&job_id, &rule)?;

            if !force {
                output::print_info(&format!(
                    "This lets every replica claim the next tick of '{}' again. Use --force to confirm.",
                    clock.key()
                ));
                return Ok(());
            }

            let existed = client.store().delete(clock.key()).await?;
            match format {
                OutputFormat::Table => {
                    if existed {
                        output::print_success(&format!("Clock {} reset", clock.key()));
                    } else {
                        output::print_info(&format!("Clock {} was not set", clock.key()));
                    }
                }
                _ => output::print_item(
                    &serde_json::json!({ "key": clock.key(), "deleted": existed }),
                    format,
                )?,
            }
        }

        ClockCommands::Claim { job_id, rule, at } => {
            let (rule, clock) = client.clock(&job_id, &rule)?;

            let tick = match at {
                Some(at) => DateTime::parse_from_rfc3339(&at)
                    .with_context(|| format!("Invalid RFC 3339 timestamp: {}", at))?
                    .with_timezone(&Utc),
                None => default_claim(&rule, &Utc::now())
                    .with_context(|| format!("Rule '{}' has no upcoming fire time", rule))?,
            };

            let won = client
                .store()
                .set_greater_than(clock.key(), tick.timestamp_millis())
                .await?;

            let view = ClaimView {
                key: clock.key().to_string(),
                tick_ms: tick.timestamp_millis(),
                tick,
                won,
            };

            match format {
                OutputFormat::Table => {
                    if won {
                        output::print_success(&format!("Claimed {} for {}", tick.to_rfc3339(), view.key));
                    } else {
                        output::print_warning(&format!(
                            "{} already holds {} or a later tick",
                            view.key,
                            tick.to_rfc3339()
                        ));
                    }
                }
                _ => output::print_item(&view, format)?,
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_claim_matches_next_firing_replica() {
        let rule = CronRule::parse("0 * * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 11, 59, 30).unwrap();

        // The replica firing at 12:00:00 writes 12:01:00.
        let claim = default_claim(&rule, &now).unwrap();
        assert_eq!(claim, Utc.with_ymd_and_hms(2026, 10, 19, 12, 1, 0).unwrap());
        assert!(claim > rule.next_after(&now).unwrap());
    }
}
