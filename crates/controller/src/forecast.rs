//! Forecasting capability.  The controller hands the normalized window
//! (shape `[1, 48, 8]`, one batch) to a [`Forecaster`] and gets back a single
//! normalized soil-moisture value.

use thiserror::Error;

use crate::window::{column, Window};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("forecaster returned a non-finite value ({0})")]
    NonFinite(f64),
}

pub trait Forecaster {
    /// Predict the normalized soil-moisture value from a normalized window.
    fn predict(&mut self, window: &Window) -> Result<f64, ForecastError>;
}

/// Persistence baseline: tomorrow looks like now.  Returns the most recent
/// normalized soil value, so the de-normalized forecast equals the latest
/// measured moisture.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastValue;

impl Forecaster for LastValue {
    fn predict(&mut self, window: &Window) -> Result<f64, ForecastError> {
        Ok(window.last()[column::SOIL])
    }
}
