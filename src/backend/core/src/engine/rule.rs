//! Six-field cron rules with second resolution.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::{ApexError, Result};

/// A parsed cron rule: `sec min hour day-of-month month day-of-week`.
#[derive(Debug, Clone)]
pub struct CronRule {
    source: String,
    schedule: cron::Schedule,
}

impl CronRule {
    /// Number of whitespace-separated fields a rule must have.
    pub const FIELD_COUNT: usize = 6;

    /// Parse a rule, rejecting anything but exactly six fields.
    pub fn parse(rule: &str) -> Result<Self> {
        let source = rule.trim();
        let fields = source.split_whitespace().count();
        if fields != Self::FIELD_COUNT {
            return Err(ApexError::invalid_rule(
                source,
                format!("expected {} fields, found {}", Self::FIELD_COUNT, fields),
            ));
        }

        let schedule = cron::Schedule::from_str(source)
            .map_err(|e| ApexError::invalid_rule(source, e.to_string()).with_source(e))?;

        Ok(Self {
            source: source.to_string(),
            schedule,
        })
    }

    /// The rule text as given (trimmed).
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }

    /// The next `count` fire times strictly after `after`.
    pub fn upcoming(&self, after: &DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(after).take(count).collect()
    }
}

impl FromStr for CronRule {
    type Err = ApexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use chrono::TimeZone;

    #[test]
    fn test_parse_every_second() {
        let rule = CronRule::parse("* * * * * *").unwrap();
        assert_eq!(rule.as_str(), "* * * * * *");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let rule = CronRule::parse("  0 */5 * * * *  ").unwrap();
        assert_eq!(rule.to_string(), "0 */5 * * * *");
    }

    #[test]
    fn test_rejects_five_field_rule() {
        let err = CronRule::parse("*/5 * * * *").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCronRule);
    }

    #[test]
    fn test_rejects_seven_field_rule() {
        let err = CronRule::parse("0 0 0 1 1 * 2030").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCronRule);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = CronRule::parse("a b c d e f").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCronRule);
    }

    #[test]
    fn test_next_after_is_strictly_later() {
        let rule = CronRule::parse("* * * * * *").unwrap();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(rule.next_after(&t), Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 1).unwrap()));
    }

    #[test]
    fn test_upcoming_is_increasing() {
        let rule = CronRule::parse("0 0 * * * *").unwrap();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        let upcoming = rule.upcoming(&t, 3);
        assert_eq!(
            upcoming,
            vec![
                Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap(),
            ]
        );
    }
}
