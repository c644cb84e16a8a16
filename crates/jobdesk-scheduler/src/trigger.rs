//! Cron expression translation into engine triggers.
//!
//! Expressions use the admin dialect: `second minute hour day-of-month month
//! day-of-week [year]`, where `?` means "no specific value". Fields are
//! evaluated in the server's local timezone.

use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use cron::Schedule;
use jobdesk_core::{truncate_chars, CRON_EXPRESSION_MAX_CHARS};

use crate::error::ValidationError;

const MIN_FIELDS: usize = 6;
const MAX_FIELDS: usize = 7;

/// A compiled trigger ready for the engine.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: String,
    schedule: Schedule,
    has_year: bool,
}

impl CronTrigger {
    /// The normalized expression handed to the schedule parser.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether a seventh (year) field constrains the trigger.
    #[must_use]
    pub fn has_year_constraint(&self) -> bool {
        self.has_year
    }

    /// The first fire time strictly after `after`, if any remain.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&Local))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Up to `count` fire times strictly after `after`.
    #[must_use]
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&Local))
            .take(count)
            .map(|t| t.with_timezone(&Utc))
            .collect()
    }
}

impl FromStr for CronTrigger {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        translate(s)
    }
}

/// Translates an admin cron expression into a [`CronTrigger`].
///
/// # Errors
///
/// Returns [`ValidationError::Cron`] when the expression has fewer than six
/// or more than seven fields, or when any field is rejected by the schedule
/// parser (for example day-of-month `32`).
pub fn translate(expression: &str) -> Result<CronTrigger, ValidationError> {
    let len = expression.chars().count();
    if len > CRON_EXPRESSION_MAX_CHARS {
        return Err(ValidationError::cron(
            &truncate_chars(expression, 64),
            format!("longer than {CRON_EXPRESSION_MAX_CHARS} characters ({len})"),
        ));
    }

    let fields: Vec<&str> = expression.split_whitespace().collect();

    if fields.len() < MIN_FIELDS || fields.len() > MAX_FIELDS {
        return Err(ValidationError::cron(
            expression,
            format!(
                "expected 6 or 7 fields (second minute hour day-of-month month day-of-week [year]), got {}",
                fields.len()
            ),
        ));
    }

    let normalized = fields
        .iter()
        .map(|field| field.replace('?', "*"))
        .collect::<Vec<_>>()
        .join(" ");

    let schedule = Schedule::from_str(&normalized)
        .map_err(|e| ValidationError::cron(expression, e.to_string()))?;

    Ok(CronTrigger {
        expression: normalized,
        schedule,
        has_year: fields.len() == MAX_FIELDS,
    })
}
