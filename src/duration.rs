// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Go-style duration strings.
//!
//! cert-manager stores `duration` and `renewBefore` as Go duration strings
//! (e.g. `"2160h0m0s"`), and users write them the same way in annotations
//! (e.g. `"168h"`, `"1h30m"`, `"1.5h"`). This module parses those strings into
//! `std::time::Duration` and formats them back in Go's canonical form.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Write as _};
use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MINUTE: u128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MINUTE;

/// Go stores durations as signed 64-bit nanoseconds.
const MAX_NANOS: u128 = i64::MAX as u128;

/// Fraction digits beyond this are truncated, which keeps the arithmetic in `u128`.
const MAX_FRACTION_DIGITS: usize = 18;

/// Parse a Go duration string into a Rust `Duration`.
///
/// Accepts an optional leading sign followed by one or more `<number><unit>`
/// pairs. Numbers may carry a decimal fraction. Supported units are `ns`,
/// `us` (or `µs`), `ms`, `s`, `m` and `h`. The bare string `"0"` is zero.
/// A leading `-` is only accepted when the value is zero.
///
/// # Examples
///
/// ```
/// use certshim::duration::parse_go_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_go_duration("168h").unwrap(), Duration::from_secs(7 * 24 * 3600));
/// assert_eq!(parse_go_duration("1h30m").unwrap(), Duration::from_secs(5400));
/// assert_eq!(parse_go_duration("1.5s").unwrap(), Duration::from_millis(1500));
/// assert!(parse_go_duration("ten minutes").is_err());
/// ```
///
/// # Errors
///
/// Returns an error if:
/// - The string is empty or a component has no digits
/// - A component has no unit, or the unit is unknown
/// - The duration is negative
/// - The duration exceeds Go's maximum of roughly 292 years
pub fn parse_go_duration(input: &str) -> Result<Duration> {
    let mut rest = input;
    let mut negative = false;

    if let Some(stripped) = rest.strip_prefix('+') {
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('-') {
        rest = stripped;
        negative = true;
    }

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        bail!("Duration {input:?} is empty");
    }

    let mut total: u128 = 0;

    while !rest.is_empty() {
        let int_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (int_part, after_int) = rest.split_at(int_end);

        let (frac_part, after_number) = match after_int.strip_prefix('.') {
            Some(after_dot) => {
                let frac_end = after_dot
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(after_dot.len());
                after_dot.split_at(frac_end)
            }
            None => ("", after_int),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            bail!("Duration {input:?} has a component without digits");
        }

        let unit_end = after_number
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_number.len());
        let (unit, remaining) = after_number.split_at(unit_end);

        let scale = match unit {
            "" => bail!("Duration {input:?} is missing a unit"),
            "ns" => 1,
            "us" | "\u{b5}s" | "\u{3bc}s" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SECOND,
            "m" => NANOS_PER_MINUTE,
            "h" => NANOS_PER_HOUR,
            _ => bail!(
                "Duration {input:?} has unknown unit {unit:?}. Use ns, us, ms, s, m or h"
            ),
        };

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .with_context(|| format!("Duration {input:?} is out of range"))?
        };

        let mut nanos = whole
            .checked_mul(scale)
            .with_context(|| format!("Duration {input:?} is out of range"))?;

        if !frac_part.is_empty() {
            let mut numerator: u128 = 0;
            let mut denominator: u128 = 1;
            for digit in frac_part.bytes().take(MAX_FRACTION_DIGITS) {
                numerator = numerator * 10 + u128::from(digit - b'0');
                denominator *= 10;
            }
            nanos += numerator * scale / denominator;
        }

        total = total
            .checked_add(nanos)
            .filter(|t| *t <= MAX_NANOS)
            .with_context(|| format!("Duration {input:?} is out of range"))?;

        rest = remaining;
    }

    // A negative sign is only allowed on zero ("-0", "-0s").
    if negative && total > 0 {
        bail!("Duration {input:?} is negative");
    }

    let nanos = u64::try_from(total).context("Duration out of range")?;
    Ok(Duration::from_nanos(nanos))
}

/// Format a `Duration` the way Go's `time.Duration.String()` does.
///
/// ```
/// use certshim::duration::format_go_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_go_duration(Duration::from_secs(7 * 24 * 3600)), "168h0m0s");
/// assert_eq!(format_go_duration(Duration::from_millis(1500)), "1.5s");
/// assert_eq!(format_go_duration(Duration::ZERO), "0s");
/// ```
#[must_use]
pub fn format_go_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();

    if nanos == 0 {
        return "0s".to_string();
    }

    if nanos < NANOS_PER_SECOND {
        return if nanos < NANOS_PER_MICRO {
            format!("{nanos}ns")
        } else if nanos < NANOS_PER_MILLI {
            format!("{}\u{b5}s", format_fraction(nanos, NANOS_PER_MICRO))
        } else {
            format!("{}ms", format_fraction(nanos, NANOS_PER_MILLI))
        };
    }

    let hours = nanos / NANOS_PER_HOUR;
    let minutes = (nanos % NANOS_PER_HOUR) / NANOS_PER_MINUTE;
    let seconds = nanos % NANOS_PER_MINUTE;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    let _ = write!(out, "{}s", format_fraction(seconds, NANOS_PER_SECOND));
    out
}

fn format_fraction(value: u128, scale: u128) -> String {
    let whole = value / scale;
    let fraction = value % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let width = scale.to_string().len() - 1;
    let digits = format!("{fraction:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

/// A `Duration` serialized as a Go duration string.
///
/// Used for the `duration` and `renewBefore` fields of a `Certificate` spec.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GoDuration(pub Duration);

impl GoDuration {
    /// Construct from whole hours.
    #[must_use]
    pub const fn from_hours(hours: u64) -> Self {
        Self(Duration::from_secs(hours * 3600))
    }

    /// The wrapped `Duration`.
    #[must_use]
    pub const fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for GoDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_go_duration(self.0))
    }
}

impl std::str::FromStr for GoDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_go_duration(s).map(Self)
    }
}

impl Serialize for GoDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_go_duration(self.0))
    }
}

impl<'de> Deserialize<'de> for GoDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_go_duration(&raw)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "duration_tests.rs"]
mod duration_tests;
