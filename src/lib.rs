//! # Tide Watch Core Library
//!
//! This library turns the Kartverket sea level service into point-in-time answers
//! for a single coastal location: the current water level, where it is heading over
//! the next ten minutes and the next hour, and when the next high or low tide is due.
//! It also fires one notification per high or low tide at the moment it occurs.
//!
//! ## Design Philosophy
//!
//! ### Short-Horizon Only
//! The upstream service already publishes smoothed forecasts at 10-minute resolution.
//! The engine does not predict tides itself; it interpolates exactly through the
//! last ~35 minutes of forecast samples and evaluates that curve around "now".
//!
//! ### Fail Safe, Never Fatal
//! - **Level feed**: one bad value rejects the whole batch and the previous model stays
//! - **Event feed**: bad entries are skipped, good ones are kept
//! - **Stale data**: readings degrade to an explicit "no data" sentinel
//! - **Everything else**: logged, and the next tick is the retry
//!
//! ### Data Flow
//! 1. **Fetch**: [`tide_data`] pulls level and event feeds over HTTPS
//! 2. **Ingest**: [`engine::TideEngine`] validates and installs them
//! 3. **Check**: a fast tick fires due events and recomputes [`engine::Readings`]
//!
//! ## Core Types
//!
//! - [`Sample`]: One validated level observation
//! - [`EventKind`]: High or low water
//! - [`TideEvent`]: One validated extremum with its recorded level
//! - [`RawEvent`]: One event feed entry before validation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Module declarations
pub mod config;
pub mod engine;
pub mod events;
pub mod log_sink;
pub mod model;
pub mod station;
pub mod tide_data;
pub mod validation;

/// A single validated sea level reading.
///
/// Levels are in the unit of the feed and always lie inside the configured
/// plausibility band, see [`validation::LevelBounds`].
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use tide_watch_lib::Sample;
///
/// let sample = Sample {
///     timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
///     level: 1.42,
/// };
/// assert_eq!(sample.level, 1.42);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub level: f64,
}

/// Which extremum a tide event marks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Highest,
    Lowest,
}

impl EventKind {
    /// Map the service's `flag` attribute to a kind. Anything other than
    /// `high` or `low` is not an extremum.
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag.trim() {
            "high" => Some(EventKind::Highest),
            "low" => Some(EventKind::Lowest),
            _ => None,
        }
    }

    /// Human-readable label used for the "next event" reading.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::Highest => "High tide",
            EventKind::Lowest => "Low tide",
        }
    }
}

/// One unvalidated entry of the event feed, as extracted from the response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub level: String,
    pub flag: String,
}

/// A known or predicted high/low water instant.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TideEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    /// Level recorded by the service for this extremum
    pub level: f64,
}
