//! Sensor acquisition: capability traits for the physical channels and the
//! bounded-retry state machine every channel is read through.
//!
//! ```text
//! Attempting(0) ──fault──▶ sleep RETRY_WAIT ──▶ Attempting(1) ── … ──▶ Exhausted
//!      │                                             │
//!      └──────────────ok──────────────┬──────────────┘
//!                                     ▼
//!                              Succeeded(value)
//! ```
//!
//! Soil channels add a calibration step on success; light and air values
//! pass through in physical units.

use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::calibration::{CalibrationRecord, CalibrationStore};
use crate::scheduler::Clock;

/// Default number of raw-read attempts per channel per cycle.
pub const MAX_RETRY: u32 = 3;

/// Default pause between attempts.
pub const RETRY_WAIT: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// A transient hardware fault (bus glitch, checksum mismatch, timeout).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct SensorFault {
    pub reason: String,
}

impl SensorFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Capacitive soil probe behind an ADC.  Yields volts.
pub trait SoilProbe {
    fn read_voltage(&mut self) -> Result<f64, SensorFault>;
}

/// Ambient light meter.  Yields lux.
pub trait LightMeter {
    fn read_lux(&mut self) -> Result<f64, SensorFault>;
}

/// Combined air humidity / temperature sensor.  Yields
/// `(relative humidity %, temperature °C)`.
pub trait AirSensor {
    fn read_air(&mut self) -> Result<(f64, f64), SensorFault>;
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// One successfully acquired channel value.  A channel that could not be
/// read produces no `SensorReading` at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    SoilMoisture { percent: f64 },
    Light { lux: f64 },
    Air { humidity: f64, temperature: f64 },
}

// ---------------------------------------------------------------------------
// Retry state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry: u32,
    pub retry_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry: MAX_RETRY,
            retry_wait: RETRY_WAIT,
        }
    }
}

/// Terminal state of one channel's acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquisition<T> {
    Succeeded(T),
    Exhausted,
}

impl<T> Acquisition<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Succeeded(v) => Some(v),
            Self::Exhausted => None,
        }
    }
}

/// Call `read` until it succeeds or `policy.max_retry` consecutive faults
/// have occurred, sleeping `policy.retry_wait` on the clock after each fault.
pub async fn acquire<T, C, F>(
    channel: &str,
    policy: &RetryPolicy,
    clock: &C,
    mut read: F,
) -> Acquisition<T>
where
    C: Clock,
    F: FnMut() -> Result<T, SensorFault>,
{
    for attempt in 1..=policy.max_retry {
        match read() {
            Ok(value) => return Acquisition::Succeeded(value),
            Err(fault) => {
                warn!(
                    channel,
                    attempt,
                    max_retry = policy.max_retry,
                    "sensor read failed: {fault} — retrying"
                );
                clock.sleep(policy.retry_wait).await;
            }
        }
    }

    error!(channel, attempts = policy.max_retry, "sensor exhausted");
    Acquisition::Exhausted
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Convert a raw probe voltage into a 0–100 % moisture level, rounded to two
/// decimals.  `max_value` is the 0 % reference and `min_value` the 100 %
/// reference.  A degenerate record (both references equal) reads as 0 %.
pub fn soil_percent(raw_voltage: f64, calib: &CalibrationRecord) -> f64 {
    let span = calib.min_value - calib.max_value;
    if span == 0.0 {
        return 0.0;
    }
    let percent = (raw_voltage - calib.max_value) / span * 100.0;
    if percent.is_nan() {
        return 0.0;
    }
    round2(percent.clamp(0.0, 100.0))
}

// ---------------------------------------------------------------------------
// Sensor suite
// ---------------------------------------------------------------------------

/// A named soil probe.  The name keys its calibration file.
pub struct SoilChannel {
    pub name: String,
    pub probe: Box<dyn SoilProbe>,
}

impl SoilChannel {
    pub fn new(name: impl Into<String>, probe: Box<dyn SoilProbe>) -> Self {
        Self {
            name: name.into(),
            probe,
        }
    }
}

/// Every input the controller samples per cycle, plus the calibration store
/// for the soil channels.
pub struct SensorSuite {
    soil: Vec<SoilChannel>,
    light: Box<dyn LightMeter>,
    air: Box<dyn AirSensor>,
    calibration: CalibrationStore,
    policy: RetryPolicy,
}

impl SensorSuite {
    pub fn new(
        soil: Vec<SoilChannel>,
        light: Box<dyn LightMeter>,
        air: Box<dyn AirSensor>,
        calibration: CalibrationStore,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            soil,
            light,
            air,
            calibration,
            policy,
        }
    }

    /// Read one soil channel: calibrate the voltage and persist the new
    /// `last_level` straight away.
    async fn read_soil_channel<C: Clock>(
        channel: &mut SoilChannel,
        calibration: &CalibrationStore,
        policy: &RetryPolicy,
        clock: &C,
    ) -> Option<f64> {
        let record = match calibration.load(&channel.name) {
            Ok(r) => r,
            Err(e) => {
                error!(channel = %channel.name, "calibration unavailable: {e}");
                return None;
            }
        };

        let raw = acquire(&channel.name, policy, clock, || channel.probe.read_voltage())
            .await
            .ok()?;

        if record.min_value == record.max_value {
            warn!(
                channel = %channel.name,
                reference = record.min_value,
                "degenerate calibration (wet == dry) — reading as 0%"
            );
        }
        let percent = soil_percent(raw, &record);

        if let Err(e) = calibration.update_last_level(&channel.name, percent) {
            error!(channel = %channel.name, "failed to persist last_level: {e}");
        }

        info!(channel = %channel.name, raw_voltage = raw, percent, "soil moisture");
        Some(percent)
    }

    /// Mean of every soil channel's calibrated level.  Every channel is read
    /// (and its level persisted) even if an earlier one failed, but a single
    /// exhausted channel leaves the cycle without a soil reading.
    pub async fn read_soil<C: Clock>(&mut self, clock: &C) -> Option<SensorReading> {
        let mut levels = Vec::with_capacity(self.soil.len());
        for channel in &mut self.soil {
            levels.push(
                Self::read_soil_channel(channel, &self.calibration, &self.policy, clock).await,
            );
        }

        let levels: Option<Vec<f64>> = levels.into_iter().collect();
        let Some(levels) = levels.filter(|l| !l.is_empty()) else {
            error!("soil moisture unavailable this cycle");
            return None;
        };

        let percent = round2(levels.iter().sum::<f64>() / levels.len() as f64);
        info!(percent, channels = levels.len(), "soil moisture average");
        Some(SensorReading::SoilMoisture { percent })
    }

    pub async fn read_light<C: Clock>(&mut self, clock: &C) -> Option<SensorReading> {
        let lux = acquire("light", &self.policy, clock, || self.light.read_lux())
            .await
            .ok()?;
        let lux = round2(lux);
        info!(lux, "light");
        Some(SensorReading::Light { lux })
    }

    pub async fn read_air<C: Clock>(&mut self, clock: &C) -> Option<SensorReading> {
        let (humidity, temperature) = acquire("air", &self.policy, clock, || self.air.read_air())
            .await
            .ok()?;
        info!(humidity, temperature, "air");
        Some(SensorReading::Air {
            humidity,
            temperature,
        })
    }

    /// One acquisition pass over every channel, in light → air → soil order.
    /// Channels that could not be read are simply absent from the result.
    pub async fn read_all<C: Clock>(&mut self, clock: &C) -> Vec<SensorReading> {
        let mut readings = Vec::with_capacity(3);
        readings.extend(self.read_light(clock).await);
        readings.extend(self.read_air(clock).await);
        readings.extend(self.read_soil(clock).await);
        readings
    }
}

// ===========================================================================
// Tests
// ===========================================================================
