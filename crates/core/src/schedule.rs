//! Schedule expression parsing.
//!
//! Only used to validate root jobs at write time; deciding when a job fires is
//! the scheduler's business.
//!
//! Accepted forms:
//! - cron expressions with 5, 6 or 7 fields (a 5-field expression gets a
//!   leading `0` seconds field)
//! - descriptors: `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`,
//!   `@midnight`, `@hourly`
//! - `@every <duration>`, e.g. `@every 1h30m`
//! - `@at <RFC3339 timestamp>`

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{DomainError, DomainResult};

/// A parsed schedule.
#[derive(Debug, Clone)]
pub enum Schedule {
    Cron(Box<cron::Schedule>),
    Every(Duration),
    At(DateTime<Utc>),
}

impl FromStr for Schedule {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Parse a schedule expression.
pub fn parse(expr: &str) -> DomainResult<Schedule> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(DomainError::schedule_parse("empty schedule expression"));
    }

    if let Some(rest) = expr.strip_prefix("@every ") {
        let every = parse_duration(rest.trim())?;
        if every.is_zero() {
            return Err(DomainError::schedule_parse("@every interval must be positive"));
        }
        return Ok(Schedule::Every(every));
    }

    if let Some(rest) = expr.strip_prefix("@at ") {
        let at = DateTime::parse_from_rfc3339(rest.trim())
            .map_err(|e| DomainError::schedule_parse(format!("invalid @at timestamp: {e}")))?;
        return Ok(Schedule::At(at.with_timezone(&Utc)));
    }

    let normalized = if expr.starts_with('@') {
        descriptor(expr)?.to_string()
    } else if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };

    cron::Schedule::from_str(&normalized)
        .map(|s| Schedule::Cron(Box::new(s)))
        .map_err(|e| DomainError::schedule_parse(format!("{expr}: {e}")))
}

fn descriptor(expr: &str) -> DomainResult<&'static str> {
    match expr {
        "@yearly" | "@annually" => Ok("0 0 0 1 1 *"),
        "@monthly" => Ok("0 0 0 1 * *"),
        "@weekly" => Ok("0 0 0 * * Sun"),
        "@daily" | "@midnight" => Ok("0 0 0 * * *"),
        "@hourly" => Ok("0 0 * * * *"),
        other => Err(DomainError::schedule_parse(format!(
            "unrecognized descriptor: {other}"
        ))),
    }
}

/// Parse a duration written as a sequence of `<number><unit>` terms, e.g.
/// `1h30m`, `90s`, `1.5h`, `250ms`.
///
/// Units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`.
pub fn parse_duration(input: &str) -> DomainResult<Duration> {
    let bad = || DomainError::schedule_parse(format!("invalid duration {input:?}"));

    if input.is_empty() {
        return Err(bad());
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = input;

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(bad)?;
        if num_len == 0 {
            return Err(bad());
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| bad())?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            _ => return Err(bad()),
        };
        rest = &rest[unit_len..];

        total_nanos += value * nanos_per_unit;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(bad());
    }

    Ok(Duration::from_nanos(total_nanos as u64))
}

/// Check that `timezone` names a loadable IANA zone. Empty means UTC.
pub fn validate_timezone(timezone: &str) -> DomainResult<()> {
    if timezone.is_empty() {
        return Ok(());
    }
    timezone
        .parse::<chrono_tz::Tz>()
        .map(|_| ())
        .map_err(|_| DomainError::InvalidTimezone(timezone.to_string()))
}
