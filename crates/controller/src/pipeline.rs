//! One control cycle, end to end:
//!
//! ```text
//! acquire ─▶ assemble ─▶ append ─▶ window ─▶ normalize ─▶ predict
//!                                                           │
//!                      water (maybe) ◀─ decide ◀─ de-normalize
//! ```
//!
//! Every failure below is recoverable.  A missing channel only skips the
//! sample; the forecast is still attempted on the history already held.  Too
//! little history or a forecaster error skips the decision.

use tracing::{error, info, warn};

use crate::decision::{Decision, DecisionEngine};
use crate::forecast::{ForecastError, Forecaster};
use crate::history::{assemble, HistoricalSample, History, HistorySink};
use crate::normalize::{normalize, NormalizationStats};
use crate::pump::{self, Pump};
use crate::scheduler::Clock;
use crate::sensors::SensorSuite;
use crate::window::build_window;

/// What one cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub sample: Option<HistoricalSample>,
    pub forecast: Option<f64>,
    pub decision: Option<Decision>,
}

pub struct Controller<C: Clock> {
    sensors: SensorSuite,
    history: History,
    sink: Box<dyn HistorySink>,
    stats: NormalizationStats,
    forecaster: Box<dyn Forecaster>,
    decision: DecisionEngine,
    pump: Box<dyn Pump>,
    clock: C,
}

impl<C: Clock> Controller<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sensors: SensorSuite,
        history: History,
        sink: Box<dyn HistorySink>,
        stats: NormalizationStats,
        forecaster: Box<dyn Forecaster>,
        decision: DecisionEngine,
        pump: Box<dyn Pump>,
        clock: C,
    ) -> Self {
        Self {
            sensors,
            history,
            sink,
            stats,
            forecaster,
            decision,
            pump,
            clock,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    #[cfg(test)]
    pub fn history(&self) -> &History {
        &self.history
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let now = self.clock.now();
        info!(
            date = format_args!("{:02}/{:02}/{:04}", now.day(), u8::from(now.month()), now.year()),
            time = format_args!("{:02}:{:02}:{:02}", now.hour(), now.minute(), now.second()),
            "cycle started"
        );

        let readings = self.sensors.read_all(&self.clock).await;
        let sample = assemble(now, &readings);
        match sample {
            Some(s) => self.record(s),
            None => warn!(
                readings = readings.len(),
                "incomplete acquisition, no sample recorded this cycle"
            ),
        }

        let forecast = self.forecast();
        let decision = forecast.map(|f| self.decision.decide(f));

        match decision {
            Some(Decision::Water(duration)) => {
                info!(
                    threshold = self.decision.threshold(),
                    "forecast below threshold, watering"
                );
                pump::water(self.pump.as_mut(), &self.clock, duration).await;
            }
            Some(Decision::NoAction) => info!("no watering needed"),
            None => {}
        }

        CycleReport {
            sample,
            forecast,
            decision,
        }
    }

    /// Append to memory and to the sink.  A sink failure is logged; the
    /// sample still counts for forecasting.
    fn record(&mut self, sample: HistoricalSample) {
        if let Err(e) = self.sink.append(&sample) {
            error!("failed to persist sample: {e}");
        }
        self.history.push(sample);
        info!(samples = self.history.len(), "sample recorded");
    }

    /// De-normalized soil-moisture forecast, or `None` when no forecast can be
    /// made this cycle.
    fn forecast(&mut self) -> Option<f64> {
        let window = match build_window(&self.history) {
            Ok(w) => w,
            Err(e) => {
                warn!("{e}; skipping forecast");
                return None;
            }
        };

        let input = normalize(&window, &self.stats);
        let normalized = match self.forecaster.predict(&input) {
            Ok(v) if v.is_finite() => v,
            Ok(v) => {
                error!("{}", ForecastError::NonFinite(v));
                return None;
            }
            Err(e) => {
                error!("{e}");
                return None;
            }
        };

        let forecast = self.stats.denormalize_soil(normalized);
        info!(
            forecast = format_args!("{forecast:.2}"),
            normalized, "predicted soil moisture"
        );
        Some(forecast)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
