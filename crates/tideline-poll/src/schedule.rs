//! Watch schedules.
//!
//! Supported forms: `@every <duration>` (or `every <duration>`) with
//! durations built from `h`, `m`, `s` and `ms` units, and the descriptors
//! `@hourly`, `@daily`, `@midnight` and `@weekly`.

use std::fmt;
use std::time::Duration;

use crate::error::{PollError, PollResult};

/// A parsed watch schedule: a fixed polling period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    expr: String,
    period: Duration,
}

impl Schedule {
    /// Parse a schedule expression.
    pub fn parse(expr: &str) -> PollResult<Self> {
        let trimmed = expr.trim();
        let invalid = |reason: &str| PollError::InvalidSchedule {
            schedule: expr.to_string(),
            reason: reason.to_string(),
        };

        let period = match trimmed {
            "@hourly" => Duration::from_secs(60 * 60),
            "@daily" | "@midnight" => Duration::from_secs(24 * 60 * 60),
            "@weekly" => Duration::from_secs(7 * 24 * 60 * 60),
            _ => {
                let rest = trimmed
                    .strip_prefix("@every")
                    .or_else(|| trimmed.strip_prefix("every"))
                    .ok_or_else(|| invalid("expected @every <duration> or a descriptor"))?;
                parse_duration(rest.trim()).map_err(|reason| invalid(&reason))?
            }
        };

        if period.is_zero() {
            return Err(invalid("period must be greater than zero"));
        }

        Ok(Self {
            expr: trimmed.to_string(),
            period,
        })
    }

    /// Time between polls.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Expression as given, trimmed.
    pub fn as_str(&self) -> &str {
        &self.expr
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

/// Parse `1h30m`, `90s`, `500ms` style durations.
fn parse_duration(s: &str) -> Result<Duration, String> {
    if s.is_empty() {
        return Err("missing duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("expected a number in {s:?}"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("number out of range in {s:?}"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let overflow = || format!("duration out of range in {s:?}");
        let part = match unit {
            "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "s" => Some(Duration::from_secs(value)),
            "ms" => Some(Duration::from_millis(value)),
            "" => return Err(format!("missing unit in {s:?}")),
            other => return Err(format!("unknown unit {other:?}")),
        }
        .ok_or_else(overflow)?;
        total = total.checked_add(part).ok_or_else(overflow)?;
    }
    Ok(total)
}
