//! Cron expression parsing and next occurrence calculation.
//!
//! Supports standard 5-field cron, extended 6-field cron (with seconds),
//! shortcuts (@daily, @hourly, etc.), and interval expressions (@every).
//! Every occurrence returned is strictly after the reference instant.
//!
//! Day-of-week numbers follow standard cron: 0 through 6 starting at Sunday,
//! with 7 also meaning Sunday. When both day-of-month and day-of-week are
//! restricted, a day matching either field matches.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when parsing or evaluating schedules.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The expression is not valid cron syntax.
    #[error("invalid cron expression: {0}")]
    InvalidExpression(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// The expression has no occurrence after the reference instant.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct Schedule {
    expression: String,
    timezone: Tz,
    kind: ScheduleKind,
}

#[derive(Debug, Clone)]
enum ScheduleKind {
    /// One schedule, or one per day field when both are restricted.
    Cron(Vec<CronSchedule>),
    Interval(chrono::Duration),
}

/// Earliest instant strictly after `after` matching `expression` (UTC).
pub fn next_occurrence(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    Schedule::new(expression)?.next_after(after)
}

impl Schedule {
    /// Parse a schedule evaluated in UTC.
    ///
    /// Accepts:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
    /// - Intervals: `@every 5m`, `@every 1h30m`
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, "UTC")
    }

    /// Parse a schedule whose fields are interpreted in `timezone`.
    pub fn with_timezone(
        expression: impl Into<String>,
        timezone: &str,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))?;
        let kind = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            kind,
        })
    }

    fn parse_expression(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        let trimmed = expression.trim();

        if trimmed.starts_with('@') {
            return Self::parse_shortcut(trimmed);
        }

        Self::parse_cron(trimmed)
    }

    /// Parse a shortcut expression (@daily, @every, etc.).
    fn parse_shortcut(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => Self::parse_cron("0 0 1 1 *"),
            "@monthly" => Self::parse_cron("0 0 1 * *"),
            "@weekly" => Self::parse_cron("0 0 * * SUN"),
            "@daily" | "@midnight" => Self::parse_cron("0 0 * * *"),
            "@hourly" => Self::parse_cron("0 * * * *"),
            s if s.starts_with("@every ") => {
                let duration = parse_duration(s["@every ".len()..].trim())?;
                let duration = chrono::Duration::from_std(duration)
                    .map_err(|_| ScheduleError::InvalidInterval(s.to_string()))?;
                Ok(ScheduleKind::Interval(duration))
            }
            _ => Err(ScheduleError::InvalidExpression(format!(
                "unknown shortcut: {}",
                expression
            ))),
        }
    }

    fn parse_cron(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        let mut fields: Vec<&str> = expression.split_whitespace().collect();

        match fields.len() {
            // The cron crate always wants a seconds field.
            5 => fields.insert(0, "0"),
            6 => {}
            n => {
                return Err(ScheduleError::InvalidExpression(format!(
                    "expected 5 or 6 fields, got {}",
                    n
                )));
            }
        }

        let invalid =
            |e: String| ScheduleError::InvalidExpression(format!("{}: {}", expression, e));
        let weekdays = weekday_field(fields[5]).map_err(invalid)?;
        let day_of_month = fields[3];

        let variants = if is_unrestricted(day_of_month) || is_unrestricted(fields[5]) {
            vec![(day_of_month, weekdays.as_str())]
        } else {
            vec![(day_of_month, "*"), ("*", weekdays.as_str())]
        };

        let schedules = variants
            .into_iter()
            .map(|(dom, dow)| {
                let cron_expr = format!(
                    "{} {} {} {} {} {}",
                    fields[0], fields[1], fields[2], dom, fields[4], dow
                );
                CronSchedule::from_str(&cron_expr).map_err(|e| invalid(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ScheduleKind::Cron(schedules))
    }

    /// Get the earliest occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match &self.kind {
            ScheduleKind::Cron(schedules) => {
                let local = after.with_timezone(&self.timezone);
                schedules
                    .iter()
                    .filter_map(|schedule| schedule.after(&local).next())
                    .map(|dt| dt.with_timezone(&Utc))
                    .min()
                    .ok_or(ScheduleError::NoMoreOccurrences)
            }
            ScheduleKind::Interval(step) => after
                .checked_add_signed(*step)
                .ok_or(ScheduleError::NoMoreOccurrences),
        }
    }

    /// Get up to `n` consecutive occurrences after `after`.
    pub fn next_n_after(
        &self,
        after: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
        let mut results = Vec::with_capacity(n);
        let mut current = after;
        for _ in 0..n {
            match self.next_after(current) {
                Ok(next) => {
                    results.push(next);
                    current = next;
                }
                Err(ScheduleError::NoMoreOccurrences) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone name.
    pub fn timezone(&self) -> &str {
        self.timezone.name()
    }
}

fn is_unrestricted(field: &str) -> bool {
    field == "*" || field == "?"
}

const WEEKDAY_NAMES: [(&str, &str); 7] = [
    ("sun", "sunday"),
    ("mon", "monday"),
    ("tue", "tuesday"),
    ("wed", "wednesday"),
    ("thu", "thursday"),
    ("fri", "friday"),
    ("sat", "saturday"),
];

/// Rewrite a standard day-of-week field (0 or 7 = Sunday) as an explicit list
/// in the cron crate's numbering (1 = Sunday).
fn weekday_field(field: &str) -> Result<String, String> {
    if is_unrestricted(field) {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{}'", item))?;
                if step == 0 {
                    return Err(format!("day-of-week step must be positive in '{}'", item));
                }
                (base, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = match base.split_once('-') {
            _ if is_unrestricted(base) => (0, 6),
            Some((start, end)) => (weekday(start)?, weekday(end)?),
            // `n/step` runs from n to the end of the week
            None if step.is_some() => (weekday(base)?, 6),
            None => {
                let day = weekday(base)?;
                (day, day)
            }
        };
        if start > end {
            return Err(format!("day-of-week range '{}' is reversed", base));
        }

        for day in (start..=end).step_by(step.unwrap_or(1) as usize) {
            days[(day % 7) as usize] = true;
        }
    }

    let list: Vec<String> = days
        .iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .map(|(day, _)| (day + 1).to_string())
        .collect();
    Ok(list.join(","))
}

fn weekday(token: &str) -> Result<u32, String> {
    if let Ok(day) = token.parse::<u32>() {
        return if day <= 7 {
            Ok(day)
        } else {
            Err(format!("day-of-week {} is out of range 0-7", day))
        };
    }

    let lower = token.to_lowercase();
    WEEKDAY_NAMES
        .iter()
        .position(|(short, long)| lower == *short || lower == *long)
        .map(|day| day as u32)
        .ok_or_else(|| format!("unknown day-of-week '{}'", token))
}

/// Parse a duration string like "5m", "1h", "1h30m", "30s", "2d".
fn parse_duration(s: &str) -> Result<Duration, ScheduleError> {
    let mut total_secs: u64 = 0;
    let mut current_num = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            current_num.push(c);
            continue;
        }

        let num: u64 = current_num
            .parse()
            .map_err(|_| ScheduleError::InvalidInterval(s.to_string()))?;
        current_num.clear();

        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            _ => return Err(ScheduleError::InvalidInterval(s.to_string())),
        };
        total_secs = num
            .checked_mul(unit)
            .and_then(|secs| total_secs.checked_add(secs))
            .ok_or_else(|| ScheduleError::InvalidInterval(s.to_string()))?;
    }

    // Trailing digits without a unit
    if !current_num.is_empty() || total_secs == 0 {
        return Err(ScheduleError::InvalidInterval(s.to_string()));
    }

    Ok(Duration::from_secs(total_secs))
}
