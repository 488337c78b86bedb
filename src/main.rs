//! # Tide Watch Entry Point
//!
//! Host loop for a single location. It plays the part of the home-automation
//! controller: one slow tick refreshes data from Kartverket in the background,
//! one fast tick fires due high/low notifications and prints the current
//! readings as JSON lines.
//!
//! Usage: `tide-watch [--once] [--config PATH]`

// Test modules
#[cfg(test)]
mod tests;

use serde::Serialize;
use std::env;
use std::time::Duration;
use tide_watch_lib::{
    config::Config,
    engine::Readings,
    events::TideNotification,
    log_sink::RingLog,
    station::Station,
    tide_data::{KartverketClient, TideSource},
};

/// One line of output per check
#[derive(Serialize)]
struct Report<'a> {
    readings: &'a Readings,
    is_high: bool,
    is_low: bool,
    is_rising: bool,
    is_falling: bool,
}

fn print_report<S: TideSource>(station: &Station<S>, readings: &Readings) {
    let report = Report {
        readings,
        is_high: station.is_tide_high(),
        is_low: station.is_tide_low(),
        is_rising: station.is_rising(),
        is_falling: station.is_falling(),
    };
    match serde_json::to_string(&report) {
        Ok(line) => println!("{}", line),
        Err(e) => log::warn!("Could not serialize readings: {}", e),
    }
}

fn print_notification(notification: &TideNotification) {
    match serde_json::to_string(notification) {
        Ok(line) => println!("{}", line),
        Err(e) => log::warn!("Could not serialize notification: {}", e),
    }
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let once = args.iter().any(|arg| arg == "--once");
    let config = match args.iter().position(|arg| arg == "--config") {
        Some(i) => match args.get(i + 1) {
            Some(path) => Config::load_from_path(path),
            None => anyhow::bail!("--config needs a path"),
        },
        None => Config::load(),
    };

    // Engine mutations never overlap on a current-thread runtime
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(config, once))
}

async fn run(config: Config, once: bool) -> anyhow::Result<()> {
    let client = KartverketClient::new(config.api.clone())?;
    let ring = RingLog::default();
    let mut station = Station::new(&config, client, ring.clone());

    if once {
        station.refresh().await;
        let (fired, readings) = station.check();
        for notification in &fired {
            print_notification(notification);
        }
        match readings {
            Some(readings) => print_report(&station, &readings),
            None => log::warn!("No readings available:\n{}", ring.dump()),
        }
        return Ok(());
    }

    log::info!(
        "Watching tide at {:.4}, {:.4}",
        config.location.latitude,
        config.location.longitude
    );

    station
        .watch(
            Duration::from_secs(config.schedule.refresh_interval_secs),
            Duration::from_secs(config.schedule.check_interval_secs),
            |station, fired, readings| {
                for notification in &fired {
                    print_notification(notification);
                }
                if let Some(readings) = readings {
                    print_report(station, &readings);
                }
            },
        )
        .await;
    Ok(())
}
