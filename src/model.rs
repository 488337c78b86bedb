//! # Forecast Model
//!
//! Exact polynomial interpolation through the samples of the trailing fit window.
//!
//! The service already delivers smoothed forecast points every 10 minutes, so there
//! is nothing to regress away: the curve of degree `n - 1` passes through every
//! retained point and is only evaluated a short way beyond them.
//!
//! ## Numerics
//! Abscissae are stored as seconds relative to the first retained sample. Keeping
//! them small avoids cancellation when Neville's scheme subtracts neighbouring
//! abscissae that would otherwise both be around 1.7e9.

use crate::Sample;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Trailing span of samples kept for the fit
pub const FIT_WINDOW_MINUTES: i64 = 35;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("no samples inside the fit window")]
    NoPoints,

    #[error("fit points share an abscissa")]
    Degenerate,

    #[error("interpolation produced a non-finite value")]
    NonFinite,
}

/// Curve-fit inputs for the current window.
#[derive(Clone, Debug, PartialEq)]
pub struct ForecastModel {
    origin: DateTime<Utc>,
    fit_x: Vec<f64>,
    fit_y: Vec<f64>,
    last_sample_time: Option<DateTime<Utc>>,
}

impl ForecastModel {
    /// Build a model from a chronological batch of validated samples.
    ///
    /// Only samples strictly newer than `now - window` are fitted, but
    /// `last_sample_time` tracks the newest sample of the whole batch: it
    /// describes how fresh the source is, not how much of it is kept.
    pub fn from_window(samples: &[Sample], now: DateTime<Utc>, window: Duration) -> Self {
        let from = now - window;
        let last_sample_time = samples.iter().map(|s| s.timestamp).max();

        let kept: Vec<&Sample> = samples.iter().filter(|s| s.timestamp > from).collect();
        let origin = kept.first().map(|s| s.timestamp).unwrap_or(now);

        let mut fit_x = Vec::with_capacity(kept.len());
        let mut fit_y = Vec::with_capacity(kept.len());
        for sample in kept {
            fit_x.push(seconds_between(origin, sample.timestamp));
            fit_y.push(sample.level);
        }

        ForecastModel {
            origin,
            fit_x,
            fit_y,
            last_sample_time,
        }
    }

    pub fn len(&self) -> usize {
        self.fit_x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fit_x.is_empty()
    }

    /// Newest timestamp of the batch this model was built from.
    pub fn last_sample_time(&self) -> Option<DateTime<Utc>> {
        self.last_sample_time
    }

    /// Fitted points as `(instant, level)` pairs, oldest first.
    pub fn points(&self) -> impl Iterator<Item = (DateTime<Utc>, f64)> + '_ {
        self.fit_x.iter().zip(&self.fit_y).map(move |(&x, &y)| {
            let offset = Duration::milliseconds((x * 1000.0).round() as i64);
            (self.origin + offset, y)
        })
    }

    /// Interpolated level at each requested instant.
    pub fn evaluate_at(&self, at: &[DateTime<Utc>]) -> Result<Vec<f64>, ModelError> {
        at.iter().map(|&t| self.level_at(t)).collect()
    }

    /// Interpolated level at a single instant (Neville's algorithm).
    pub fn level_at(&self, at: DateTime<Utc>) -> Result<f64, ModelError> {
        let n = self.fit_x.len();
        if n == 0 {
            return Err(ModelError::NoPoints);
        }

        let x = seconds_between(self.origin, at);
        let xs = &self.fit_x;
        let mut p = self.fit_y.clone();

        for m in 1..n {
            for i in 0..n - m {
                let denom = xs[i] - xs[i + m];
                if denom == 0.0 {
                    return Err(ModelError::Degenerate);
                }
                p[i] = ((x - xs[i + m]) * p[i] + (xs[i] - x) * p[i + 1]) / denom;
            }
        }

        if p[0].is_finite() {
            Ok(p[0])
        } else {
            Err(ModelError::NonFinite)
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
