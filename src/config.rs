//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the tide-config.toml file.
//! It provides a centralized way to configure the monitored location, the Kartverket
//! API, polling cadence and the engine's validation and forecast parameters.

use crate::validation::LevelBounds;
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default config file name, resolved against the working directory
pub const CONFIG_FILE: &str = "tide-config.toml";

/// Application configuration loaded from tide-config.toml
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Monitored coordinate
    pub location: LocationConfig,
    /// Kartverket tide API settings
    pub api: ApiConfig,
    /// Host tick cadence
    pub schedule: ScheduleConfig,
    /// Validation and forecast parameters
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Endpoint of the tide API
    pub base_url: String,
    /// Vertical reference (`cd` = chart datum)
    pub refcode: String,
    /// Response language
    pub lang: String,
    /// Spacing of forecast samples in minutes
    pub interval_minutes: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// Seconds between network refreshes
    pub refresh_interval_secs: u64,
    /// Seconds between scheduler ticks / reading updates
    pub check_interval_secs: u64,
    /// Log a capabilities line once every this many checks
    pub log_every_checks: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Lowest plausible level, in feed units
    pub level_min: f64,
    /// Highest plausible level, in feed units
    pub level_max: f64,
    /// Trailing span of samples used for the fit
    pub fit_window_minutes: i64,
    /// Half-width of the "tide is high/low" window
    pub proximity_window_minutes: i64,
    /// Data must reach at least this far past now to be trusted
    pub staleness_horizon_minutes: i64,
    /// IANA zone used for the next-event time label
    pub timezone: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            location: LocationConfig {
                latitude: 59.91,
                longitude: 10.75,
            },
            api: ApiConfig {
                base_url: "https://vannstand.kartverket.no/tideapi.php".to_string(),
                refcode: "cd".to_string(),
                lang: "nn".to_string(),
                interval_minutes: 10,
            },
            schedule: ScheduleConfig {
                refresh_interval_secs: 1800,
                check_interval_secs: 5,
                log_every_checks: 120, // 10 minutes at a 5 second tick
            },
            engine: EngineConfig::default(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Config::default().location
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Config::default().api
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Config::default().schedule
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let bounds = LevelBounds::default();
        EngineConfig {
            level_min: bounds.min,
            level_max: bounds.max,
            fit_window_minutes: crate::model::FIT_WINDOW_MINUTES,
            proximity_window_minutes: crate::events::PROXIMITY_WINDOW_MINUTES,
            staleness_horizon_minutes: 60,
            timezone: "Europe/Oslo".to_string(),
        }
    }
}

impl ScheduleConfig {
    /// Replace zero periods with the defaults; an interval cannot tick every 0 s.
    fn checked(mut self) -> Self {
        let defaults = ScheduleConfig::default();
        if self.refresh_interval_secs == 0 {
            log::warn!(
                "refresh_interval_secs must be positive, using {}",
                defaults.refresh_interval_secs
            );
            self.refresh_interval_secs = defaults.refresh_interval_secs;
        }
        if self.check_interval_secs == 0 {
            log::warn!(
                "check_interval_secs must be positive, using {}",
                defaults.check_interval_secs
            );
            self.check_interval_secs = defaults.check_interval_secs;
        }
        self
    }
}

impl EngineConfig {
    pub fn bounds(&self) -> LevelBounds {
        LevelBounds {
            min: self.level_min,
            max: self.level_max,
        }
    }

    pub fn fit_window(&self) -> Duration {
        Duration::minutes(self.fit_window_minutes)
    }

    pub fn proximity_window(&self) -> Duration {
        Duration::minutes(self.proximity_window_minutes)
    }

    pub fn staleness_horizon(&self) -> Duration {
        Duration::minutes(self.staleness_horizon_minutes)
    }

    /// Display zone; unknown names fall back to UTC.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or_else(|_| {
            log::warn!("Unknown timezone {:?}, using UTC", self.timezone);
            Tz::UTC
        })
    }
}

impl Config {
    /// Load configuration from tide-config.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(mut config) => {
                    config.schedule = config.schedule.checked();
                    log::info!(
                        "Loaded configuration for {:.4}, {:.4}",
                        config.location.latitude,
                        config.location.longitude
                    );
                    config
                }
                Err(e) => {
                    log::warn!("Invalid config file format: {}", e);
                    log::warn!("Using default configuration (Oslo)");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No config file found, using default configuration (Oslo)");
                Self::default()
            }
        }
    }

    /// Save current configuration to the given path
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Save current configuration to tide-config.toml
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to_path(CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.location.latitude, 59.91);
        assert_eq!(config.schedule.refresh_interval_secs, 1800);
        assert_eq!(config.schedule.check_interval_secs, 5);
        assert_eq!(config.engine.fit_window_minutes, 35);
        assert_eq!(config.engine.proximity_window_minutes, 90);
        assert_eq!(config.engine.bounds(), LevelBounds::default());
        assert_eq!(config.engine.tz(), chrono_tz::Europe::Oslo);
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.location.latitude = 69.65;
        config.engine.level_max = 400.0;
        config.save_to_path(temp_file.path()).unwrap();

        let parsed = Config::load_from_path(temp_file.path());
        assert_eq!(parsed.location.latitude, 69.65);
        assert_eq!(parsed.engine.level_max, 400.0);
        assert_eq!(parsed.api.base_url, config.api.base_url);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(
            temp_file.path(),
            "[location]\nlatitude = 63.43\nlongitude = 10.39\n",
        )
        .unwrap();
        let config = Config::load_from_path(temp_file.path());
        assert_eq!(config.location.longitude, 10.39);
        assert_eq!(config.schedule.log_every_checks, 120);
    }

    #[test]
    fn test_zero_intervals_fall_back_to_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(
            temp_file.path(),
            "[schedule]\nrefresh_interval_secs = 0\ncheck_interval_secs = 0\nlog_every_checks = 12\n",
        )
        .unwrap();
        let config = Config::load_from_path(temp_file.path());
        assert_eq!(config.schedule.refresh_interval_secs, 1800);
        assert_eq!(config.schedule.check_interval_secs, 5);
        assert_eq!(config.schedule.log_every_checks, 12);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        // Should fallback to default
        assert_eq!(config.location.longitude, 10.75);
    }

    #[test]
    fn test_unknown_timezone_falls_back_to_utc() {
        let engine = EngineConfig {
            timezone: "Mars/Olympus".to_string(),
            ..EngineConfig::default()
        };
        assert_eq!(engine.tz(), Tz::UTC);
    }
}
