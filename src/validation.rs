//! # Feed Validation
//!
//! Every number that comes off the wire passes through here before the engine
//! trusts it. A level must parse as a finite number and sit inside a physical
//! plausibility band; a timestamp must be an RFC 3339 instant.
//!
//! The band defaults to ±20 in the feed's own unit. Anything outside it is
//! almost certainly a transmission or parsing fault, and a single such value
//! would dominate a short polynomial fit.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default lower plausibility bound (inclusive)
pub const LEVEL_MIN: f64 = -20.0;

/// Default upper plausibility bound (inclusive)
pub const LEVEL_MAX: f64 = 20.0;

/// Reasons a single raw value is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("level {0:?} is not a number")]
    NotNumeric(String),

    #[error("level {0} is not finite")]
    NotFinite(f64),

    #[error("level {value} outside plausible range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("timestamp {0:?} could not be parsed")]
    Timestamp(String),
}

/// Inclusive plausibility band for sea level values.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for LevelBounds {
    fn default() -> Self {
        LevelBounds {
            min: LEVEL_MIN,
            max: LEVEL_MAX,
        }
    }
}

impl LevelBounds {
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && (self.min..=self.max).contains(&value)
    }

    /// Parse a raw level string and check it against the band.
    pub fn parse_level(&self, raw: &str) -> Result<f64, ValidationError> {
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| ValidationError::NotNumeric(raw.to_string()))?;

        if !value.is_finite() {
            return Err(ValidationError::NotFinite(value));
        }
        if !self.contains(value) {
            return Err(ValidationError::OutOfRange {
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(value)
    }
}

/// True iff `value` is finite and within the default ±20 band.
pub fn is_valid_level(value: f64) -> bool {
    LevelBounds::default().contains(value)
}

/// Parse a feed timestamp.
///
/// The service emits RFC 3339 with an offset (`2025-03-01T12:10:00+01:00`).
/// Offset-less values are read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ValidationError::Timestamp(raw.to_string()))
}
