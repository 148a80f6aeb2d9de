//! Fixed-length feature window over the trailing history.
//!
//! Each sample becomes one row of [`FEATURE_COUNT`] columns, in this order:
//!
//! | idx | column                  |
//! |-----|-------------------------|
//! | 0   | soil moisture (%)       |
//! | 1   | light (lux)             |
//! | 2   | temperature (°C)        |
//! | 3   | humidity (%)            |
//! | 4   | time of day, sine       |
//! | 5   | time of day, cosine     |
//! | 6   | month, sine             |
//! | 7   | month, cosine           |
//!
//! The first [`RAW_CHANNELS`] columns are the ones the normalizer scales.

use std::f64::consts::PI;

use thiserror::Error;
use time::PrimitiveDateTime;

use crate::history::{HistoricalSample, History};

/// Samples per window (24 h at 30-minute cycles).
pub const WINDOW_LEN: usize = 48;

/// Raw sensor columns at the front of each row.
pub const RAW_CHANNELS: usize = 4;

pub const FEATURE_COUNT: usize = RAW_CHANNELS + 4;

pub mod column {
    pub const SOIL: usize = 0;
    pub const LUX: usize = 1;
    pub const TEMPERATURE: usize = 2;
    pub const HUMIDITY: usize = 3;
    pub const TIME_SIN: usize = 4;
    pub const TIME_COS: usize = 5;
    pub const MONTH_SIN: usize = 6;
    pub const MONTH_COS: usize = 7;
}

pub type FeatureRow = [f64; FEATURE_COUNT];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("insufficient history: have {have} samples, need {need}")]
    InsufficientHistory { have: usize, need: usize },
}

/// Exactly [`WINDOW_LEN`] feature rows, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    rows: Vec<FeatureRow>,
}

impl Window {
    /// Callers inside the crate guarantee `rows.len() == WINDOW_LEN`.
    pub(crate) fn from_rows(rows: Vec<FeatureRow>) -> Self {
        debug_assert_eq!(rows.len(), WINDOW_LEN);
        Self { rows }
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    /// The most recent row.
    pub fn last(&self) -> &FeatureRow {
        &self.rows[WINDOW_LEN - 1]
    }

    /// Values of one column across the window.
    #[cfg(test)]
    pub fn column(&self, idx: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |r| r[idx])
    }
}

/// Cyclical encodings of time of day and month:
/// `[time_sin, time_cos, month_sin, month_cos]`.
pub fn time_features(ts: PrimitiveDateTime) -> [f64; 4] {
    let hour = f64::from(ts.hour()) + f64::from(ts.minute()) / 60.0;
    let day_angle = hour * (2.0 * PI / 24.0);
    let month_angle = f64::from(ts.month() as u8 - 1) * (2.0 * PI / 12.0);
    [
        day_angle.sin(),
        day_angle.cos(),
        month_angle.sin(),
        month_angle.cos(),
    ]
}

fn feature_row(s: &HistoricalSample) -> FeatureRow {
    let [time_sin, time_cos, month_sin, month_cos] = time_features(s.timestamp);
    [
        s.soil_moisture_percent,
        s.lux,
        s.temperature,
        s.humidity,
        time_sin,
        time_cos,
        month_sin,
        month_cos,
    ]
}

/// Cut the trailing [`WINDOW_LEN`] samples out of `history`.  Short histories
/// are rejected rather than padded.
pub fn build_window(history: &History) -> Result<Window, WindowError> {
    if history.len() < WINDOW_LEN {
        return Err(WindowError::InsufficientHistory {
            have: history.len(),
            need: WINDOW_LEN,
        });
    }
    let rows = history.tail(WINDOW_LEN).map(feature_row).collect();
    Ok(Window::from_rows(rows))
}

// ===========================================================================
// Tests
// ===========================================================================
