//! # Tide Engine
//!
//! One engine per monitored coordinate. It owns the forecast model and the event
//! schedule, installs freshly fetched feeds into them and answers the host's
//! point-in-time questions.
//!
//! ## Ingestion Policies
//! - **Level feed, fail-closed**: every entry must validate or the whole batch is
//!   discarded and the previous model stays in place.
//! - **Event feed, fail-open**: invalid entries are skipped, the rest replace the
//!   previous event sets.
//!
//! ## Readings
//! [`TideEngine::readings`] never caches. When the newest sample does not reach at
//! least an hour past now, it returns [`Readings::no_data`] instead of extrapolating.
//!
//! All operations take `now` explicitly. The engine holds no lock: the host must not
//! run two operations on the same instance at once.

use crate::config::EngineConfig;
use crate::events::{EventSchedule, TideNotification};
use crate::log_sink::LogSink;
use crate::model::{ForecastModel, ModelError};
use crate::validation::{parse_timestamp, LevelBounds, ValidationError};
use crate::{EventKind, RawEvent, Sample, TideEvent};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::broadcast;

/// Label used in place of the next event type when data is stale
pub const NO_DATA_LABEL: &str = "no data";

/// Default number of checks between two capability log lines
pub const LOG_EVERY_CHECKS: u32 = 120;

/// Relative size below which a one-minute level change counts as a tie
const TIE_TOLERANCE: f64 = 1e-9;

/// Why a level batch was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("level batch is empty")]
    EmptyBatch,

    #[error("invalid timestamp in level batch: {0}")]
    Timestamp(ValidationError),

    #[error("invalid level at {timestamp}: {source}")]
    Level {
        timestamp: String,
        source: ValidationError,
    },
}

/// Why no readings could be produced this cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Unavailable {
    #[error("no tide event data available")]
    NoEvents,

    #[error("no upcoming tide event")]
    NoUpcomingEvent,

    #[error("no forecast model available")]
    NoModel,

    #[error("interpolation failed: {0}")]
    Model(#[from] ModelError),
}

/// Outcome of an event feed ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventIngest {
    /// Entries admitted to the full event set
    pub accepted: usize,
    /// Accepted entries still in the future
    pub scheduled: usize,
    /// Entries rejected by validation
    pub skipped: usize,
}

/// Current-moment values pushed to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Readings {
    pub level: Option<f64>,
    pub change_next_hour: Option<f64>,
    pub change_next_10_min: Option<f64>,
    pub next_type: String,
    pub next_time: String,
}

impl Readings {
    /// Sentinel for data too old to extrapolate from.
    pub fn no_data() -> Self {
        Readings {
            level: None,
            change_next_hour: None,
            change_next_10_min: None,
            next_type: NO_DATA_LABEL.to_string(),
            next_time: String::new(),
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.level.is_none() && self.next_type == NO_DATA_LABEL
    }
}

pub struct TideEngine {
    latitude: f64,
    longitude: f64,
    bounds: LevelBounds,
    fit_window: Duration,
    proximity_window: Duration,
    staleness_horizon: Duration,
    tz: Tz,
    model: Option<ForecastModel>,
    schedule: EventSchedule,
    sink: Box<dyn LogSink>,
    log_every: u32,
    checks_to_next_log: u32,
}

impl TideEngine {
    pub fn new(
        latitude: f64,
        longitude: f64,
        settings: &EngineConfig,
        sink: impl LogSink + 'static,
    ) -> Self {
        TideEngine {
            latitude,
            longitude,
            bounds: settings.bounds(),
            fit_window: settings.fit_window(),
            proximity_window: settings.proximity_window(),
            staleness_horizon: settings.staleness_horizon(),
            tz: settings.tz(),
            model: None,
            schedule: EventSchedule::new(),
            sink: Box::new(sink),
            log_every: LOG_EVERY_CHECKS,
            checks_to_next_log: 0,
        }
    }

    /// Log a capabilities line once every `checks` successful checks.
    pub fn with_log_every(mut self, checks: u32) -> Self {
        self.log_every = checks;
        self
    }

    pub fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    /// Rebind the engine to a new coordinate. Model and events are kept
    /// until the next successful ingestion replaces them.
    pub fn update_position(&mut self, latitude: f64, longitude: f64) {
        self.latitude = latitude;
        self.longitude = longitude;
        self.log(&format!(
            "Position updated to {:.4}, {:.4}",
            latitude, longitude
        ));
    }

    pub fn model(&self) -> Option<&ForecastModel> {
        self.model.as_ref()
    }

    pub fn schedule(&self) -> &EventSchedule {
        &self.schedule
    }

    pub fn last_sample_time(&self) -> Option<DateTime<Utc>> {
        self.model.as_ref().and_then(ForecastModel::last_sample_time)
    }

    /// Register a listener for high/low tide notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TideNotification> {
        self.schedule.subscribe()
    }

    /// Record a status line from outside the engine (e.g. a failed fetch).
    pub fn log(&mut self, line: &str) {
        self.sink.record(line);
    }

    // -- Ingestion --

    /// Validate a level feed and rebuild the forecast model from it.
    ///
    /// On any invalid entry the batch is dropped and the current model is left
    /// untouched. Returns the number of points in the batch.
    pub fn ingest_levels<I, K, V>(&mut self, data: I, now: DateTime<Utc>) -> Result<usize, IngestError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        match self.validate_levels(data) {
            Ok(samples) => {
                let model = ForecastModel::from_window(&samples, now, self.fit_window);
                self.log(&format!(
                    "Tide levels updated - {} data points saved, {} in fit window",
                    samples.len(),
                    model.len()
                ));
                self.model = Some(model);
                self.checks_to_next_log = 0;
                Ok(samples.len())
            }
            Err(err) => {
                self.log(&format!("Tide levels rejected - {}", err));
                Err(err)
            }
        }
    }

    fn validate_levels<I, K, V>(&self, data: I) -> Result<Vec<Sample>, IngestError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut by_time = BTreeMap::new();
        for (key, value) in data {
            let key = key.as_ref();
            let timestamp = parse_timestamp(key).map_err(IngestError::Timestamp)?;
            let level = self
                .bounds
                .parse_level(value.as_ref())
                .map_err(|source| IngestError::Level {
                    timestamp: key.to_string(),
                    source,
                })?;
            by_time.insert(timestamp, level);
        }

        if by_time.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        Ok(by_time
            .into_iter()
            .map(|(timestamp, level)| Sample { timestamp, level })
            .collect())
    }

    /// Validate an event feed entry by entry and replace both event sets.
    pub fn ingest_events<I, K>(&mut self, data: I, now: DateTime<Utc>) -> EventIngest
    where
        I: IntoIterator<Item = (K, RawEvent)>,
        K: AsRef<str>,
    {
        let mut events = Vec::new();
        let mut skipped = 0;

        for (key, raw) in data {
            match self.validate_event(key.as_ref(), &raw) {
                Some(event) => events.push(event),
                None => skipped += 1,
            }
        }

        let accepted = events.len();
        let scheduled = self.schedule.replace(events, now);
        self.checks_to_next_log = 0;

        if skipped > 0 {
            self.log(&format!(
                "Tide events updated - {} events saved, {} skipped",
                accepted, skipped
            ));
        } else {
            self.log(&format!("Tide events updated - {} events saved", accepted));
        }

        EventIngest {
            accepted,
            scheduled,
            skipped,
        }
    }

    fn validate_event(&self, key: &str, raw: &RawEvent) -> Option<TideEvent> {
        let kind = match EventKind::from_flag(&raw.flag) {
            Some(kind) => kind,
            None => {
                log::debug!("Skipping event at {} with flag {:?}", key, raw.flag);
                return None;
            }
        };

        let parsed = parse_timestamp(key).and_then(|timestamp| {
            self.bounds
                .parse_level(&raw.level)
                .map(|level| TideEvent {
                    timestamp,
                    kind,
                    level,
                })
        });

        match parsed {
            Ok(event) => Some(event),
            Err(err) => {
                log::warn!("Skipping event at {}: {}", key, err);
                None
            }
        }
    }

    // -- Scheduler --

    /// Fire every pending event whose time has come.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<TideNotification> {
        self.schedule.tick(now)
    }

    /// One fast-tick cycle: advance the scheduler, then compute readings.
    ///
    /// `None` means "no update this cycle" and is a normal outcome.
    pub fn check(&mut self, now: DateTime<Utc>) -> (Vec<TideNotification>, Option<Readings>) {
        let fired = self.tick(now);
        for notification in &fired {
            self.log(&format!(
                "{} reached at {:.2}",
                notification.kind.label(),
                notification.level
            ));
        }

        let readings = match self.readings(now) {
            Ok(readings) => {
                self.log_capabilities(&readings);
                Some(readings)
            }
            Err(Unavailable::Model(err)) => {
                self.log(&format!("Error processing tide data: {}", err));
                None
            }
            Err(reason) => {
                log::debug!("No readings this cycle: {}", reason);
                None
            }
        };

        (fired, readings)
    }

    fn log_capabilities(&mut self, readings: &Readings) {
        let Some(level) = readings.level else {
            log::debug!("Tide data is not up to date");
            return;
        };

        if self.checks_to_next_log == 0 {
            self.log(&format!(
                "Capabilities updated - Level: {:.1}, Next: {} at {}",
                level, readings.next_type, readings.next_time
            ));
            self.checks_to_next_log = self.log_every;
        } else {
            self.checks_to_next_log -= 1;
        }
    }

    // -- Queries --

    /// Current level, short-term deltas and the next event.
    pub fn readings(&self, now: DateTime<Utc>) -> Result<Readings, Unavailable> {
        if !self.schedule.is_loaded() {
            return Err(Unavailable::NoEvents);
        }
        let next = self
            .schedule
            .next_event(now)
            .ok_or(Unavailable::NoUpcomingEvent)?;

        let model = self.model.as_ref().ok_or(Unavailable::NoModel)?;
        if self.is_stale(model, now) {
            return Ok(Readings::no_data());
        }

        let levels = model.evaluate_at(&[
            now,
            now + Duration::hours(1),
            now + Duration::minutes(10),
        ])?;
        let current = levels[0];

        Ok(Readings {
            level: Some(round2(current)),
            change_next_hour: Some(round2(levels[1] - current)),
            change_next_10_min: Some(round2(levels[2] - current)),
            next_type: next.kind.label().to_string(),
            next_time: next
                .timestamp
                .with_timezone(&self.tz)
                .format("%H:%M")
                .to_string(),
        })
    }

    fn is_stale(&self, model: &ForecastModel, now: DateTime<Utc>) -> bool {
        match model.last_sample_time() {
            Some(last) => last < now + self.staleness_horizon,
            None => true,
        }
    }

    /// Direction of the level change over the next minute, `None` when unknown.
    ///
    /// Changes within rounding noise of the interpolation count as a tie, so a
    /// flat feed is neither rising nor falling.
    fn direction(&self, now: DateTime<Utc>) -> Option<Ordering> {
        let model = self.model.as_ref()?;
        match model.last_sample_time() {
            Some(last) if last >= now => {}
            _ => return None,
        }
        let levels = model
            .evaluate_at(&[now, now + Duration::minutes(1)])
            .ok()?;
        let delta = levels[1] - levels[0];
        let tolerance = TIE_TOLERANCE * levels[0].abs().max(1.0);
        if delta > tolerance {
            Some(Ordering::Greater)
        } else if delta < -tolerance {
            Some(Ordering::Less)
        } else {
            Some(Ordering::Equal)
        }
    }

    pub fn is_rising(&self, now: DateTime<Utc>) -> bool {
        self.direction(now) == Some(Ordering::Greater)
    }

    pub fn is_falling(&self, now: DateTime<Utc>) -> bool {
        self.direction(now) == Some(Ordering::Less)
    }

    pub fn is_tide_high(&self, now: DateTime<Utc>) -> bool {
        self.schedule
            .is_event_within(EventKind::Highest, now, self.proximity_window)
    }

    pub fn is_tide_low(&self, now: DateTime<Utc>) -> bool {
        self.schedule
            .is_event_within(EventKind::Lowest, now, self.proximity_window)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
