//! # Station Driver
//!
//! Host-side glue for one monitored coordinate: a [`TideEngine`] plus the
//! [`TideSource`] that feeds it. The host calls [`Station::refresh`] on a slow
//! cadence and [`Station::check`] on a fast one.
//!
//! A failed fetch only costs that feed's refresh. The previous model or event set
//! stays in place and the next refresh is the retry.
//!
//! ## Fetching vs. Installing
//! [`Station::watch`] runs each refresh as its own task and only touches the
//! engine when the feeds come back over a channel. A slow or hung request never
//! holds the engine, so the check tick keeps firing events. In-flight fetches are
//! not cancelled; whichever response arrives last wins, except that feeds for a
//! coordinate the station has since left are dropped.

use crate::config::Config;
use crate::engine::{Readings, TideEngine};
use crate::events::TideNotification;
use crate::log_sink::LogSink;
use crate::tide_data::{EventFeed, LevelFeed, TideError, TideSource};
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};

/// Level feed window relative to now
const LEVELS_BACK_HOURS: i64 = 2;
const LEVELS_AHEAD_HOURS: i64 = 5;

/// Event feed window relative to now
const EVENTS_BACK_HOURS: i64 = 2;
const EVENTS_AHEAD_HOURS: i64 = 48;

/// Completed fetches waiting to be installed
const FEEDS_BACKLOG: usize = 4;

/// Raw result of one fetch cycle, not yet ingested.
#[derive(Debug)]
pub struct Feeds {
    position: (f64, f64),
    fetched_at: DateTime<Utc>,
    levels: Result<LevelFeed, TideError>,
    events: Result<EventFeed, TideError>,
}

/// What a refresh managed to install.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub levels_updated: bool,
    pub events_updated: bool,
}

pub struct Station<S: TideSource> {
    engine: TideEngine,
    source: S,
}

impl<S: TideSource> Station<S> {
    pub fn new(config: &Config, source: S, sink: impl LogSink + 'static) -> Self {
        let engine = TideEngine::new(
            config.location.latitude,
            config.location.longitude,
            &config.engine,
            sink,
        )
        .with_log_every(config.schedule.log_every_checks);
        Station { engine, source }
    }

    pub fn engine(&self) -> &TideEngine {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TideNotification> {
        self.engine.subscribe()
    }

    /// Fetch both feeds and install whatever validates.
    pub async fn refresh(&mut self) -> RefreshOutcome {
        self.refresh_at(Utc::now()).await
    }

    pub async fn refresh_at(&mut self, now: DateTime<Utc>) -> RefreshOutcome {
        self.engine.log("Requesting tide data and events from API");
        let feeds = fetch_feeds(&self.source, self.engine.position(), now).await;
        self.install(feeds)
    }

    /// Start a refresh that does not borrow the station.
    ///
    /// The returned future owns a clone of the source; hand its output to
    /// [`Station::install`].
    pub fn begin_refresh(
        &mut self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Feeds> + Send + 'static
    where
        S: Clone + Send + Sync + 'static,
    {
        self.engine.log("Requesting tide data and events from API");
        let source = self.source.clone();
        let position = self.engine.position();
        async move { fetch_feeds(&source, position, now).await }
    }

    /// Ingest fetched feeds, each independently.
    pub fn install(&mut self, feeds: Feeds) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();
        if feeds.position != self.engine.position() {
            log::debug!(
                "Dropping feeds fetched for {:?}, station moved to {:?}",
                feeds.position,
                self.engine.position()
            );
            return outcome;
        }

        match feeds.levels {
            Ok(feed) => {
                outcome.levels_updated = self.engine.ingest_levels(feed, feeds.fetched_at).is_ok();
            }
            Err(err) => self.engine.log(&format!("Error fetching tide data: {}", err)),
        }

        match feeds.events {
            Ok(feed) => {
                self.engine.ingest_events(feed, feeds.fetched_at);
                outcome.events_updated = true;
            }
            Err(err) => self.engine.log(&format!("Error fetching tide events: {}", err)),
        }

        outcome
    }

    /// Run the refresh and check ticks until the future is dropped.
    ///
    /// `on_check` sees the station after every check, with the events that
    /// fired and the readings, if any.
    pub async fn watch<F>(
        &mut self,
        refresh_every: std::time::Duration,
        check_every: std::time::Duration,
        mut on_check: F,
    ) where
        S: Clone + Send + Sync + 'static,
        F: FnMut(&Self, Vec<TideNotification>, Option<Readings>),
    {
        let (tx, mut rx) = mpsc::channel::<Feeds>(FEEDS_BACKLOG);
        let mut refresh = interval(refresh_every);
        let mut check = interval(check_every);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = refresh.tick() => {
                    let fetch = self.begin_refresh(Utc::now());
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        // Receiver only goes away when the watch itself is dropped
                        let _ = tx.send(fetch.await).await;
                    });
                }
                Some(feeds) = rx.recv() => {
                    let outcome = self.install(feeds);
                    log::debug!("Refresh finished: {:?}", outcome);
                }
                _ = check.tick() => {
                    let (fired, readings) = self.check();
                    on_check(self, fired, readings);
                }
            }
        }
    }

    /// Fire due events and compute the current readings.
    pub fn check(&mut self) -> (Vec<TideNotification>, Option<Readings>) {
        self.engine.check(Utc::now())
    }

    pub fn check_at(&mut self, now: DateTime<Utc>) -> (Vec<TideNotification>, Option<Readings>) {
        self.engine.check(now)
    }

    /// Move to a new coordinate and refresh straight away.
    pub async fn update_position(&mut self, latitude: f64, longitude: f64) -> RefreshOutcome {
        self.update_position_at(latitude, longitude, Utc::now()).await
    }

    pub async fn update_position_at(
        &mut self,
        latitude: f64,
        longitude: f64,
        now: DateTime<Utc>,
    ) -> RefreshOutcome {
        self.engine.update_position(latitude, longitude);
        self.refresh_at(now).await
    }

    pub fn is_tide_high(&self) -> bool {
        self.engine.is_tide_high(Utc::now())
    }

    pub fn is_tide_low(&self) -> bool {
        self.engine.is_tide_low(Utc::now())
    }

    pub fn is_rising(&self) -> bool {
        self.engine.is_rising(Utc::now())
    }

    pub fn is_falling(&self) -> bool {
        self.engine.is_falling(Utc::now())
    }
}

async fn fetch_feeds<S: TideSource>(
    source: &S,
    position: (f64, f64),
    now: DateTime<Utc>,
) -> Feeds {
    let (latitude, longitude) = position;
    let (levels, events) = tokio::join!(
        source.fetch_levels(
            latitude,
            longitude,
            now - Duration::hours(LEVELS_BACK_HOURS),
            now + Duration::hours(LEVELS_AHEAD_HOURS),
        ),
        source.fetch_events(
            latitude,
            longitude,
            now - Duration::hours(EVENTS_BACK_HOURS),
            now + Duration::hours(EVENTS_AHEAD_HOURS),
        ),
    );

    Feeds {
        position,
        fetched_at: now,
        levels,
        events,
    }
}
