//! # Engine Scenario Tests
//!
//! End-to-end checks of the ingestion, forecast and event paths through the public
//! library API, using fixed clocks so every run sees the same "now".

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use tide_watch_lib::config::EngineConfig;
use tide_watch_lib::engine::{Readings, TideEngine};
use tide_watch_lib::log_sink::{NullSink, RingLog};
use tide_watch_lib::validation::is_valid_level;
use tide_watch_lib::{EventKind, RawEvent};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 21, 9, 30, 0).unwrap()
}

fn stamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&chrono_tz::Europe::Oslo)
        .to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Semidiurnal-looking forecast, 10-minute spacing from -2h to +2h.
fn forecast_feed() -> Vec<(String, String)> {
    (-12..=12)
        .map(|i| {
            let at = now() + Duration::minutes(10 * i);
            let hours = i as f64 / 6.0;
            let level = 0.5 + 0.3 * (hours * std::f64::consts::TAU / 12.42).sin();
            (stamp(at), level.to_string())
        })
        .collect()
}

fn event(offset: Duration, level: &str, flag: &str) -> (String, RawEvent) {
    (
        stamp(now() + offset),
        RawEvent {
            level: level.to_string(),
            flag: flag.to_string(),
        },
    )
}

fn loaded_engine() -> TideEngine {
    let mut engine = TideEngine::new(59.91, 10.75, &EngineConfig::default(), NullSink);
    engine
        .ingest_levels(forecast_feed(), now())
        .expect("forecast feed should validate");
    engine.ingest_events(
        vec![
            event(Duration::hours(-3), "0.21", "low"),
            event(Duration::hours(3), "0.79", "high"),
            event(Duration::hours(9), "0.20", "low"),
        ],
        now(),
    );
    engine
}

/// Levels are valid exactly when finite and inside the ±20 band.
#[test]
fn level_band_matches_physical_limits() {
    for value in [-20.0, -3.2, 0.0, 1.5, 20.0] {
        assert!(is_valid_level(value), "{value} should be valid");
    }
    for value in [-20.5, 20.01, 1e9, f64::NAN, f64::INFINITY] {
        assert!(!is_valid_level(value), "{value} should be rejected");
    }
}

/// The fit window keeps only the trailing 35 minutes of the feed plus
/// everything ahead of now, and the curve passes through each kept point.
#[test]
fn forecast_reproduces_feed_points() {
    let engine = loaded_engine();
    let model = engine.model().expect("model should be installed");

    // -30, -20, -10, 0, then +10 .. +120
    assert_eq!(model.len(), 16, "unexpected fit window size");
    for (at, level) in model.points() {
        let fitted = model.level_at(at).unwrap();
        assert!(
            (fitted - level).abs() < 1e-6,
            "curve misses point at {at}: {fitted} vs {level}"
        );
    }
}

/// Readings follow the curve: rising tide before the high three hours out.
#[test]
fn readings_report_rising_tide_before_high() {
    let engine = loaded_engine();
    let readings = engine.readings(now()).expect("readings should be available");

    assert!(readings.level.is_some());
    assert!(
        readings.change_next_hour.unwrap() > 0.0,
        "tide should rise over the next hour"
    );
    assert_eq!(readings.next_type, "High tide");
    // 12:30 UTC is 14:30 in Oslo in summer
    assert_eq!(readings.next_time, "14:30");
    assert!(engine.is_rising(now()));
    assert!(!engine.is_falling(now()));
}

/// A second refresh with one corrupt sample must not touch the model.
#[test]
fn corrupt_refresh_keeps_previous_model() {
    let mut engine = loaded_engine();
    let before = engine.model().cloned();

    let mut feed = forecast_feed();
    let last = feed.len() - 1;
    feed[last].1 = "-inf".to_string();

    assert!(engine.ingest_levels(feed, now()).is_err());
    assert_eq!(engine.model().cloned(), before, "model must be unchanged");
    assert!(engine.readings(now()).is_ok());
}

/// Event refresh drops invalid entries but keeps the rest.
#[test]
fn event_refresh_admits_valid_entries() {
    let mut engine = loaded_engine();
    let outcome = engine.ingest_events(
        vec![
            event(Duration::hours(1), "0.80", "high"),
            event(Duration::hours(7), "abc", "low"),
            event(Duration::hours(13), "0.81", "high"),
        ],
        now(),
    );
    assert_eq!(outcome.accepted, 2);
    assert_eq!(outcome.skipped, 1);
    assert!(engine.is_tide_high(now()));
    assert!(!engine.is_tide_low(now()));
}

/// A due event notifies exactly once, then stays fired.
#[test]
fn due_event_notifies_once() {
    let mut engine = TideEngine::new(59.91, 10.75, &EngineConfig::default(), NullSink);
    let mut rx = engine.subscribe();
    engine.ingest_events(
        vec![event(Duration::seconds(-1), "0.77", "high")],
        now() - Duration::minutes(30),
    );

    let fired = engine.tick(now());
    assert_eq!(fired.len(), 1);
    let notification = rx.try_recv().expect("one notification");
    assert_eq!(notification.kind, EventKind::Highest);
    assert_eq!(notification.level, 0.77);

    assert!(engine.tick(now()).is_empty(), "second tick must not re-fire");
    assert!(rx.try_recv().is_err());
    assert!(engine.schedule().pending_events().all(|p| p.is_fired()));
}

/// Refreshing the event feed starts from scratch: an event fired in the previous
/// cycle that is still in the future of the new fetch is scheduled again.
#[test]
fn event_refresh_resets_fired_flags() {
    let mut engine = TideEngine::new(59.91, 10.75, &EngineConfig::default(), NullSink);
    let fetch_time = now() - Duration::minutes(30);
    let feed = vec![event(Duration::minutes(-5), "0.77", "high")];

    engine.ingest_events(feed.clone(), fetch_time);
    assert_eq!(engine.tick(now()).len(), 1);

    engine.ingest_events(feed, fetch_time);
    assert!(engine.schedule().pending_events().all(|p| !p.is_fired()));
    assert_eq!(engine.tick(now()).len(), 1, "identity does not survive refresh");
}

/// Data that stops short of an hour ahead is treated as stale.
#[test]
fn stale_feed_reports_no_data() {
    let engine = loaded_engine();
    // Last sample is at +2h; ninety minutes later it is only 30 minutes ahead.
    let later = now() + Duration::minutes(90);
    let readings = engine.readings(later).unwrap();
    assert_eq!(readings, Readings::no_data());
    assert!(readings.level.is_none());
    assert!(readings.change_next_hour.is_none());
    assert!(readings.change_next_10_min.is_none());
    assert_eq!(readings.next_time, "");
}

/// Every ingestion leaves a line in the injected log.
#[test]
fn ingestion_is_logged() {
    let ring = RingLog::default();
    let mut engine = TideEngine::new(59.91, 10.75, &EngineConfig::default(), ring.clone());
    engine.ingest_levels(forecast_feed(), now()).unwrap();
    engine.ingest_events(vec![event(Duration::hours(3), "0.79", "high")], now());
    let _ = engine.ingest_levels(vec![(stamp(now()), "oops".to_string())], now());

    let dump = ring.dump();
    assert!(dump.contains("Tide levels updated - 25 data points saved"));
    assert!(dump.contains("Tide events updated - 1 events saved"));
    assert!(dump.contains("Tide levels rejected"));
    assert_eq!(ring.len(), 3);
}
