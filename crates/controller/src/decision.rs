//! Watering decision: a pure threshold on the de-normalized forecast.
//!
//! There is no hysteresis or cool-down.  A forecast hovering around the
//! threshold waters on every cycle it is below it.

use std::time::Duration;

/// Forecasts strictly below this soil-moisture percent trigger watering.
pub const WATER_THRESHOLD_PERCENT: f64 = 23.0;

/// How long the pump runs per watering event.
pub const WATER_DURATION: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoAction,
    Water(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionEngine {
    threshold: f64,
    water_for: Duration,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(WATER_THRESHOLD_PERCENT, WATER_DURATION)
    }
}

impl DecisionEngine {
    pub fn new(threshold: f64, water_for: Duration) -> Self {
        Self {
            threshold,
            water_for,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// `Water` iff `forecast < threshold`.  NaN never waters.
    pub fn decide(&self, forecast: f64) -> Decision {
        if forecast < self.threshold {
            Decision::Water(self.water_for)
        } else {
            Decision::NoAction
        }
    }
}
