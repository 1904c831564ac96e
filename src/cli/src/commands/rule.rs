//! Cron rule commands.

use anyhow::Result;
use apex_sched::engine::CronRule;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum RuleCommands {
    /// Validate a rule and list its upcoming fire times
    Next {
        /// Six-field cron rule: sec min hour day-of-month month day-of-week
        rule: String,

        /// Number of fire times to list
        #[arg(short, long, default_value = "5")]
        count: usize,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct UpcomingRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Fire time (UTC)")]
    at: DateTime<Utc>,
    #[tabled(rename = "Clock value (ms)")]
    clock_ms: i64,
}

/// Upcoming fires after `from`, each paired with the clock value the firing
/// replica writes: the rule's next fire after that fire.
pub(crate) fn upcoming_ticks(
    rule: &CronRule,
    from: &DateTime<Utc>,
    count: usize,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    rule.upcoming(from, count + 1)
        .windows(2)
        .map(|pair| (pair[0], pair[1]))
        .collect()
}

pub async fn execute(cmd: RuleCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        RuleCommands::Next { rule, count } => {
            let rule = CronRule::parse(&rule)?;
            let rows: Vec<UpcomingRow> = upcoming_ticks(&rule, &Utc::now(), count)
                .into_iter()
                .enumerate()
                .map(|(i, (at, clock))| UpcomingRow {
                    index: i + 1,
                    at,
                    clock_ms: clock.timestamp_millis(),
                })
                .collect();

            if matches!(format, OutputFormat::Table) {
                output::print_header(&format!("Upcoming fires of '{}'", rule));
                if rows.is_empty() {
                    output::print_info("The rule has no upcoming fire times");
                    return Ok(());
                }
            }
            output::print_list(&rows, format)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clock_value_is_next_fire_after_the_fire() {
        let rule = CronRule::parse("0 * * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 11, 59, 30).unwrap();

        let ticks = upcoming_ticks(&rule, &now, 3);
        assert_eq!(ticks.len(), 3);
        assert_eq!(ticks[0].0, Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap());
        assert_eq!(ticks[0].1, Utc.with_ymd_and_hms(2026, 10, 19, 12, 1, 0).unwrap());
        assert_eq!(ticks[1].0, ticks[0].1);
        assert_eq!(ticks[2].1, Utc.with_ymd_and_hms(2026, 10, 19, 12, 3, 0).unwrap());
    }

    #[test]
    fn test_zero_count_lists_nothing() {
        let rule = CronRule::parse("* * * * * *").unwrap();
        assert!(upcoming_ticks(&rule, &Utc::now(), 0).is_empty());
    }
}
