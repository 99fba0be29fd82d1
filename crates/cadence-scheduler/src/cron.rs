//! Cron expression handling.
//!
//! Field count selects the parser mode: six whitespace-delimited fields mean
//! `SEC MIN HOUR DOM MON DOW` (second resolution); anything else is parsed as
//! the classic five-field `MIN HOUR DOM MON DOW` (minute resolution).

use cadence_core::error::{CadenceError, Result};
use chrono::{DateTime, Utc};
use croner::Cron;

/// A parsed, validated cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    with_seconds: bool,
    cron: Cron,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let with_seconds = expression.split_whitespace().count() == 6;

        let parsed = if with_seconds {
            Cron::new(expression).with_seconds_required().parse()
        } else {
            Cron::new(expression).parse()
        };

        let cron = parsed.map_err(|e| CadenceError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expression: expression.to_string(),
            with_seconds,
            cron,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// True for six-field (second resolution) expressions.
    pub fn has_seconds(&self) -> bool {
        self.with_seconds
    }

    /// First occurrence strictly after `after`, if any.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.cron.find_next_occurrence(&after, false) {
            Ok(next) => Some(next),
            Err(e) => {
                tracing::warn!("No next occurrence for cron '{}': {}", self.expression, e);
                None
            }
        }
    }
}

/// Validate an expression without keeping the parsed schedule.
pub fn validate(expression: &str) -> Result<()> {
    CronSchedule::parse(expression).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_every_hour() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let schedule = CronSchedule::parse("0 * * * *").unwrap();
        assert!(!schedule.has_seconds());
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_specific_time() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = CronSchedule::parse("0 8 * * *").unwrap().next_after(after).unwrap();
        assert_eq!(next.hour(), 8);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_six_fields_select_seconds() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 1).unwrap();
        let schedule = CronSchedule::parse("*/5 * * * * *").unwrap();
        assert!(schedule.has_seconds());
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next.minute(), 2);
        assert_eq!(next.second(), 5);
    }

    #[test]
    fn test_next_is_strictly_after() {
        let at = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 5).unwrap();
        let schedule = CronSchedule::parse("* * * * * *").unwrap();
        assert_eq!(schedule.next_after(at).unwrap().second(), 6);
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(CronSchedule::parse("bad").is_err());
        assert!(CronSchedule::parse("61 * * * *").is_err());
        assert!(validate("* * * * * * * *").is_err());
        let err = CronSchedule::parse("99 * * * * *").unwrap_err();
        assert!(matches!(err, CadenceError::InvalidCron { .. }));
    }
}
