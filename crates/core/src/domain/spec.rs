//! Typed numeric configuration values.
//!
//! Workload files describe counts, durations and rates as either plain
//! numbers or short human-readable strings (`"4 seconds"`, `"1e3"`,
//! `"5 per 2 seconds"`). These types validate the input once, at parse time,
//! so the engine only ever sees well-formed values.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Ordinal of a phase. Phases start at 0 and are contiguous.
pub type PhaseNumber = u64;

/// Untyped scalar as it appears in a workload file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSpec {
    Int(i64),
    Float(f64),
    Text(String),
}

fn time_spec_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(-?\d+)\s*([A-Za-z]*)\s*$").expect("Invalid time spec pattern")
    })
}

fn rate_spec_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\S+)\s+per\s+(.+?)\s*$").expect("Invalid rate spec pattern")
    })
}

/// Nanoseconds per unit for every accepted unit spelling.
fn unit_nanos(unit: &str) -> Option<u64> {
    match unit.to_ascii_lowercase().as_str() {
        "nanosecond" | "nanoseconds" | "ns" => Some(1),
        "microsecond" | "microseconds" | "us" => Some(1_000),
        // A bare number is milliseconds, matching the integer form.
        "" | "millisecond" | "milliseconds" | "ms" => Some(1_000_000),
        "second" | "seconds" | "s" => Some(1_000_000_000),
        "minute" | "minutes" | "min" | "m" => Some(60 * 1_000_000_000),
        "hour" | "hours" | "h" => Some(3_600 * 1_000_000_000),
        _ => None,
    }
}

/// A non-negative span of time.
///
/// Accepts an integer number of milliseconds or `"<count> <unit>"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "RawSpec", into = "String")]
pub struct TimeSpec(Duration);

impl TimeSpec {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_nanos(&self) -> u128 {
        self.0.as_nanos()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<Duration> for TimeSpec {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl FromStr for TimeSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = time_spec_pattern()
            .captures(s)
            .ok_or_else(|| CoreError::time_spec(s, "expected '<count> <unit>'"))?;

        let count = &caps[1];
        if count.starts_with('-') {
            return Err(CoreError::time_spec(s, "must not be negative"));
        }
        let count: u64 = count
            .parse()
            .map_err(|_| CoreError::time_spec(s, "count is out of range"))?;
        let unit = &caps[2];
        let scale =
            unit_nanos(unit).ok_or_else(|| CoreError::time_spec(s, format!("unknown unit '{}'", unit)))?;
        let nanos = count
            .checked_mul(scale)
            .ok_or_else(|| CoreError::time_spec(s, "duration overflows"))?;

        Ok(Self(Duration::from_nanos(nanos)))
    }
}

impl TryFrom<RawSpec> for TimeSpec {
    type Error = CoreError;

    fn try_from(raw: RawSpec) -> Result<Self> {
        match raw {
            RawSpec::Int(millis) if millis < 0 => {
                Err(CoreError::time_spec(millis.to_string(), "must not be negative"))
            }
            RawSpec::Int(millis) => Ok(Self::from_millis(millis as u64)),
            RawSpec::Float(value) => Err(CoreError::time_spec(
                value.to_string(),
                "expected integer milliseconds or '<count> <unit>'",
            )),
            RawSpec::Text(text) => text.parse(),
        }
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        let (count, unit) = if nanos != 0 && nanos % 1_000_000_000 == 0 {
            (nanos / 1_000_000_000, "second")
        } else if nanos != 0 && nanos % 1_000_000 == 0 {
            (nanos / 1_000_000, "millisecond")
        } else if nanos != 0 && nanos % 1_000 == 0 {
            (nanos / 1_000, "microsecond")
        } else {
            (nanos, "nanosecond")
        };
        let plural = if count == 1 { "" } else { "s" };
        write!(f, "{} {}{}", count, unit, plural)
    }
}

impl From<TimeSpec> for String {
    fn from(spec: TimeSpec) -> Self {
        spec.to_string()
    }
}

/// A non-negative whole number.
///
/// Accepts integers and strings in plain (`"1_000"`) or scientific (`"1e3"`)
/// notation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "RawSpec", into = "u64")]
pub struct IntegerSpec(u64);

impl IntegerSpec {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    fn from_float(input: &str, value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(CoreError::integer_spec(input, "must be a non-negative number"));
        }
        if value.fract() != 0.0 {
            return Err(CoreError::integer_spec(input, "must be a whole number"));
        }
        if value > u64::MAX as f64 {
            return Err(CoreError::integer_spec(input, "is out of range"));
        }
        Ok(Self(value as u64))
    }
}

impl FromStr for IntegerSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
        if cleaned.is_empty() {
            return Err(CoreError::integer_spec(s, "is empty"));
        }
        if cleaned.starts_with('-') {
            return Err(CoreError::integer_spec(s, "must not be negative"));
        }
        if cleaned.chars().all(|c| c.is_ascii_digit()) {
            return cleaned
                .parse()
                .map(Self)
                .map_err(|_| CoreError::integer_spec(s, "is out of range"));
        }
        if cleaned.contains(['e', 'E']) {
            let value: f64 = cleaned
                .parse()
                .map_err(|_| CoreError::integer_spec(s, "is not a number"))?;
            return Self::from_float(s, value);
        }
        Err(CoreError::integer_spec(s, "is not a number"))
    }
}

impl TryFrom<RawSpec> for IntegerSpec {
    type Error = CoreError;

    fn try_from(raw: RawSpec) -> Result<Self> {
        match raw {
            RawSpec::Int(value) if value < 0 => {
                Err(CoreError::integer_spec(value.to_string(), "must not be negative"))
            }
            RawSpec::Int(value) => Ok(Self(value as u64)),
            RawSpec::Float(value) => Self::from_float(&value.to_string(), value),
            RawSpec::Text(text) => text.parse(),
        }
    }
}

impl From<u64> for IntegerSpec {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<IntegerSpec> for u64 {
    fn from(spec: IntegerSpec) -> Self {
        spec.0
    }
}

impl fmt::Display for IntegerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// "`operations` per `per`", e.g. `"300 per 2 nanoseconds"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RateSpec {
    operations: u64,
    per: TimeSpec,
}

impl RateSpec {
    pub fn new(operations: u64, per: TimeSpec) -> Result<Self> {
        let spec = Self { operations, per };
        if operations == 0 {
            return Err(CoreError::rate_spec(spec.to_string(), "operations must be positive"));
        }
        if per.is_zero() {
            return Err(CoreError::rate_spec(spec.to_string(), "duration must be positive"));
        }
        Ok(spec)
    }

    /// Shorthand for `RateSpec::new` with a `Duration`.
    pub fn per_duration(operations: u64, per: Duration) -> Result<Self> {
        Self::new(operations, TimeSpec::new(per))
    }

    pub fn operations(&self) -> u64 {
        self.operations
    }

    pub fn per(&self) -> TimeSpec {
        self.per
    }

    /// Time cost of a single token in nanosecond ticks.
    ///
    /// Rates finer than one operation per nanosecond cost zero ticks.
    pub fn ticks_per_token(&self) -> i64 {
        let ticks = self.per.as_nanos() / u128::from(self.operations);
        i64::try_from(ticks).unwrap_or(i64::MAX)
    }
}

impl FromStr for RateSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = rate_spec_pattern()
            .captures(s)
            .ok_or_else(|| CoreError::rate_spec(s, "expected '<operations> per <duration>'"))?;
        let operations: IntegerSpec = caps[1]
            .parse()
            .map_err(|e: CoreError| CoreError::rate_spec(s, e.to_string()))?;
        let per: TimeSpec = caps[2]
            .parse()
            .map_err(|e: CoreError| CoreError::rate_spec(s, e.to_string()))?;
        Self::new(operations.value(), per)
    }
}

impl TryFrom<String> for RateSpec {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {}", self.operations, self.per)
    }
}

impl From<RateSpec> for String {
    fn from(spec: RateSpec) -> Self {
        spec.to_string()
    }
}
