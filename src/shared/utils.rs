//! Utility functions for flowstage
//!
//! Duration strings follow the `300ms`, `1.5h`, `2h45m` format used throughout the
//! configuration surface.

use std::time::Duration;

use chrono::Utc;

const NANOS_PER_UNIT: [(&str, u64); 8] = [
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("μs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 3600 * 1_000_000_000),
];

/// Parse a duration string such as `500ms`, `1.5s` or `1h30m`.
///
/// An empty string is a zero duration. A bare `0` is accepted, any other number needs a unit.
/// Negative durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() || s == "0" {
        return Ok(Duration::ZERO);
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s.starts_with('-') {
        return Err(format!("negative duration {input:?}"));
    }

    let mut rest = s;
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(num_len);
        if number.is_empty() || number == "." {
            return Err(format!("invalid duration {input:?}"));
        }

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        if unit.is_empty() {
            return Err(format!("missing unit in duration {input:?}"));
        }
        let scale = NANOS_PER_UNIT
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| format!("unknown unit {unit:?} in duration {input:?}"))?;

        let (whole, frac) = match number.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (number, ""),
        };
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| format!("invalid duration {input:?}"))?
        };
        let overflow = || format!("duration {input:?} overflows");
        total = whole
            .checked_mul(scale as u128)
            .and_then(|nanos| total.checked_add(nanos))
            .ok_or_else(overflow)?;

        // fractional digits beyond nanosecond precision are dropped
        let mut place = scale as u128;
        for digit in frac.chars() {
            let digit = digit
                .to_digit(10)
                .ok_or_else(|| format!("invalid duration {input:?}"))?;
            place /= 10;
            total = total
                .checked_add(digit as u128 * place)
                .ok_or_else(overflow)?;
        }

        if total > u64::MAX as u128 {
            return Err(overflow());
        }
        rest = tail;
    }

    Ok(Duration::from_nanos(total as u64))
}

/// Current wall-clock time as unix seconds.
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}
