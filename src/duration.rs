//! Duration string parsing.
//!
//! Accepts the compact form build templates use for timeouts: a sequence of
//! decimal numbers, each with an optional fraction and a unit suffix, such
//! as `"300ms"`, `"1.5h"` or `"2h45m"`. Valid units are `ns`, `us` (or
//! `µs`), `ms`, `s`, `m` and `h`. A bare `"0"` is accepted. Negative
//! durations cannot be represented and are rejected.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<int>[0-9]*)(?:\.(?P<frac>[0-9]*))?(?P<unit>ns|us|µs|μs|ms|s|m|h)")
        .expect("duration component regex is valid")
});

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Error returned when a duration string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("invalid duration {0:?}")]
    Invalid(String),
    #[error("negative duration {0:?}")]
    Negative(String),
    #[error("duration {0:?} overflows")]
    Overflow(String),
}

fn unit_nanos(unit: &str) -> u128 {
    match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => NANOS_PER_SEC,
        "m" => 60 * NANOS_PER_SEC,
        "h" => 3_600 * NANOS_PER_SEC,
        _ => unreachable!("unit is constrained by the component regex"),
    }
}

/// Parses a duration string such as `"2m"` or `"1h30m"`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());
    let overflow = || DurationError::Overflow(input.to_string());

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let caps = COMPONENT.captures(rest).ok_or_else(invalid)?;
        let int = caps.name("int").map_or("", |m| m.as_str());
        let frac = caps.name("frac").map_or("", |m| m.as_str());
        if int.is_empty() && frac.is_empty() {
            return Err(invalid());
        }

        let unit = unit_nanos(&caps["unit"]);
        let whole: u128 = if int.is_empty() {
            0
        } else {
            int.parse().map_err(|_| overflow())?
        };
        let mut nanos = whole.checked_mul(unit).ok_or_else(overflow)?;

        if !frac.is_empty() {
            // Digits beyond nanosecond precision of the unit contribute nothing.
            let digits = &frac[..frac.len().min(18)];
            let scale = 10u128.pow(digits.len() as u32);
            let value: u128 = digits.parse().map_err(|_| invalid())?;
            nanos = nanos
                .checked_add(value * unit / scale)
                .ok_or_else(overflow)?;
        }

        total = total.checked_add(nanos).ok_or_else(overflow)?;
        rest = &rest[caps[0].len()..];
    }

    if negative && total > 0 {
        return Err(DurationError::Negative(input.to_string()));
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| overflow())?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}
