//! # Kartverket Tide Data Fetching
//!
//! This module handles all network operations for the Norwegian Mapping Authority's
//! sea level service (vannstand.kartverket.no). It only fetches and flattens; every
//! value it returns is still a raw string that the engine validates.
//!
//! ## Data Source
//!
//! ### Tide API
//! - **URL**: https://vannstand.kartverket.no/tideapi.php
//! - **Location**: any coastal latitude/longitude, no station id needed
//! - **Format**: XML, one `<waterlevel time=".." value=".." flag=".."/>` per point
//!
//! ### Two Feeds
//! 1. **Levels** (`datatype=all`): observations, predictions and forecasts at
//!    10-minute spacing. Only `flag="forecast"` points are kept.
//! 2. **Events** (`datatype=tab`): the high and low water table, `flag="high"`
//!    or `flag="low"`.
//!
//! ## Units
//! The `cd` reference delivers centimetres (`<data unit="cm">`). Values are
//! converted to metres here so the engine's plausibility band stays in metres.
//! Anything that does not parse is passed through untouched for the engine to
//! reject.
//!
//! ## Error Handling
//!
//! - **Network failures**: DNS, TLS and connection errors surface as `TideError::Http`
//! - **Server errors**: non-2xx responses are `TideError::Status`
//! - **Parse failures**: a body with no usable `waterlevel` element is `TideError::Scrape`
//!
//! No request timeout is set. A hung request only holds the background task
//! that made it; the station keeps checking and later refreshes still run.

use crate::config::ApiConfig;
use crate::RawEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;

/// Errors that can occur while fetching or extracting feed data.
#[derive(Error, Debug)]
pub enum TideError {
    /// HTTP request failed (network, TLS, or protocol error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),

    /// Response did not contain the expected elements
    #[error("scrape failed: {0}")]
    Scrape(String),
}

/// Level feed as handed to the engine: timestamp -> raw level.
pub type LevelFeed = BTreeMap<String, String>;

/// Event feed as handed to the engine: timestamp -> raw level + flag.
pub type EventFeed = BTreeMap<String, RawEvent>;

/// Anything that can supply the two raw feeds for a coordinate.
pub trait TideSource {
    fn fetch_levels(
        &self,
        latitude: f64,
        longitude: f64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Future<Output = Result<LevelFeed, TideError>> + Send;

    fn fetch_events(
        &self,
        latitude: f64,
        longitude: f64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Future<Output = Result<EventFeed, TideError>> + Send;
}

/// HTTPS client for the Kartverket tide API.
#[derive(Debug, Clone)]
pub struct KartverketClient {
    http: reqwest::Client,
    api: ApiConfig,
}

impl KartverketClient {
    pub fn new(api: ApiConfig) -> Result<Self, TideError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("tide-watch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(KartverketClient { http, api })
    }

    async fn request(
        &self,
        datatype: &str,
        latitude: f64,
        longitude: f64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<String, TideError> {
        let interval = self.api.interval_minutes.to_string();
        let params = [
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
            ("fromtime", from.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ("totime", to.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ("datatype", datatype.to_string()),
            ("refcode", self.api.refcode.clone()),
            ("place", String::new()),
            ("file", String::new()),
            ("lang", self.api.lang.clone()),
            ("interval", interval),
            ("dst", "0".to_string()),
            ("tzone", String::new()),
            ("tide_request", "locationdata".to_string()),
        ];

        log::debug!("Requesting {} data for {}, {}", datatype, latitude, longitude);
        let response = self
            .http
            .get(&self.api.base_url)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TideError::Status(status));
        }
        Ok(response.text().await?)
    }
}

impl TideSource for KartverketClient {
    async fn fetch_levels(
        &self,
        latitude: f64,
        longitude: f64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<LevelFeed, TideError> {
        let body = self.request("all", latitude, longitude, from, to).await?;
        let feed = parse_levels(&body)?;
        log::info!("Received tide data - {} data points", feed.len());
        Ok(feed)
    }

    async fn fetch_events(
        &self,
        latitude: f64,
        longitude: f64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<EventFeed, TideError> {
        let body = self.request("tab", latitude, longitude, from, to).await?;
        let feed = parse_events(&body)?;
        log::info!("Received tide events - {} events", feed.len());
        Ok(feed)
    }
}

/// Extract forecast points from a `datatype=all` response.
pub fn parse_levels(body: &str) -> Result<LevelFeed, TideError> {
    let doc = Html::parse_document(body);
    let sel = selector(r#"waterlevel[flag="forecast"]"#)?;

    let feed: LevelFeed = doc
        .select(&sel)
        .filter_map(|node| {
            let el = node.value();
            let level = to_metres(el.attr("value")?, data_unit(node));
            Some((el.attr("time")?.to_string(), level))
        })
        .collect();

    if feed.is_empty() {
        return Err(TideError::Scrape("no forecast waterlevel elements".into()));
    }
    Ok(feed)
}

/// Extract high/low entries from a `datatype=tab` response.
pub fn parse_events(body: &str) -> Result<EventFeed, TideError> {
    let doc = Html::parse_document(body);
    let sel = selector("waterlevel")?;

    let feed: EventFeed = doc
        .select(&sel)
        .filter_map(|node| {
            let el = node.value();
            let raw = RawEvent {
                level: to_metres(el.attr("value")?, data_unit(node)),
                flag: el.attr("flag").unwrap_or_default().to_string(),
            };
            Some((el.attr("time")?.to_string(), raw))
        })
        .collect();

    if feed.is_empty() {
        return Err(TideError::Scrape("no waterlevel elements".into()));
    }
    Ok(feed)
}

/// Unit declared on the enclosing `<data>` element, if any.
fn data_unit(node: ElementRef<'_>) -> Option<&str> {
    node.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "data")
        .and_then(|el| el.value().attr("unit"))
}

fn to_metres(value: &str, unit: Option<&str>) -> String {
    match unit {
        Some("cm") => match value.trim().parse::<f64>() {
            Ok(cm) => (cm / 100.0).to_string(),
            Err(_) => value.to_string(),
        },
        None | Some("m") => value.to_string(),
        Some(other) => {
            log::warn!("Unexpected level unit {:?}, passing value through", other);
            value.to_string()
        }
    }
}

fn selector(css: &str) -> Result<Selector, TideError> {
    Selector::parse(css).map_err(|e| TideError::Scrape(format!("bad selector {css}: {e}")))
}
