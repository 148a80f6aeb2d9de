//! Stateful garden simulator for local development.
//!
//! One pot, shared by every simulated device:
//! - Soil moisture drifts drier with a mean-reverting random walk
//! - Each soil probe has its own calibration offset and ADC noise
//! - Light, temperature and humidity follow a day/night cycle
//! - Reads occasionally fault, so the retry path gets exercised
//! - Running the pump wets the soil (closed loop)
//!
//! Probe voltages follow a capacitive sensor on 3.3 V: about 1.2 V in
//! saturated soil, about 2.8 V bone dry.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::pump::{MockPump, Pump};
use crate::sensors::{AirSensor, LightMeter, SensorFault, SoilProbe};

/// Probe output in saturated soil.
pub const WET_VOLTS: f64 = 1.2;
/// Probe output in dry soil.
pub const DRY_VOLTS: f64 = 2.8;

/// ADS1115 full scale at PGA ±4.096 V.
const ADC_FULL_SCALE: f64 = 4.096;

/// Moisture gained per second of pump run, in percent.
const WET_RATE_PER_SEC: f64 = 1.5;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries steadily.  Waters every few hours.
    Drying,
    /// Hovers around the centre.  Rarely crosses the threshold.
    Stable,
    /// Noisy probes and a ~25% fault rate per read.  Exercises retries and
    /// exhausted channels.
    Flaky,
    /// Starts near saturation and dries slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }

    /// `(drift %/read, walk sigma %, mean reversion, noise sigma V, fault prob, start %)`
    fn params(self) -> (f64, f64, f64, f64, f32, f64) {
        match self {
            Self::Drying => (0.6, 0.4, 0.01, 0.01, 0.02, 45.0),
            Self::Stable => (0.05, 0.2, 0.05, 0.005, 0.005, 50.0),
            Self::Flaky => (0.4, 0.8, 0.02, 0.04, 0.25, 45.0),
            Self::Wet => (0.15, 0.3, 0.01, 0.01, 0.01, 85.0),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct ProbeState {
    /// Permanent per-probe offset in volts.
    offset: f64,
    noise_sigma: f64,
}

struct GardenState {
    /// "True" soil moisture, percent.
    moisture: f64,
    probes: Vec<ProbeState>,

    drift: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,
    fault_prob: f32,

    /// Length of one simulated day in seconds.
    day_s: f64,
    pump_started: Option<Instant>,
}

impl GardenState {
    fn fault(&self, device: &str) -> Result<(), SensorFault> {
        if fastrand::f32() < self.fault_prob {
            Err(SensorFault::new(format!("simulated {device} fault")))
        } else {
            Ok(())
        }
    }

    /// Advance the soil one step toward dry.
    fn evolve(&mut self) {
        let pull = self.mean_reversion * (self.center - self.moisture);
        let walk = gaussian(0.0, self.walk_sigma);
        self.moisture = (self.moisture - self.drift + pull + walk).clamp(0.0, 100.0);
    }

    /// Position in the simulated day: 0 at midnight, 0.5 at noon.
    fn day_fraction(&self) -> f64 {
        let now_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        (now_s % self.day_s) / self.day_s
    }

    /// -1 at midnight, +1 at noon.
    fn daylight(&self) -> f64 {
        -(2.0 * std::f64::consts::PI * self.day_fraction()).cos()
    }
}

/// A simulated pot with its sensors and pump.  Hand out devices with the
/// `*_probe` / `pump` methods; they all observe the same soil.
#[derive(Clone)]
pub struct Garden {
    state: Rc<RefCell<GardenState>>,
}

impl Garden {
    /// `day_s` sets the day/night cycle length.  Use 86400 for real time, or
    /// something short to watch a whole day in a few minutes.
    pub fn new(scenario: Scenario, soil_probes: usize, day_s: f64) -> Self {
        let (drift, walk_sigma, mean_reversion, noise_sigma, fault_prob, start) =
            scenario.params();

        let probes = (0..soil_probes)
            .map(|_| ProbeState {
                offset: gaussian(0.0, 0.03),
                noise_sigma: noise_sigma * (1.0 + 0.2 * approx_std_normal()).max(0.3),
            })
            .collect();

        info!(%scenario, soil_probes, day_s, "garden simulator started");

        Self {
            state: Rc::new(RefCell::new(GardenState {
                moisture: (start + gaussian(0.0, 3.0)).clamp(0.0, 100.0),
                probes,
                drift,
                walk_sigma,
                mean_reversion,
                center: 40.0,
                fault_prob,
                day_s,
                pump_started: None,
            })),
        }
    }

    pub fn soil_probe(&self, index: usize) -> SimSoilProbe {
        SimSoilProbe {
            garden: self.clone(),
            index,
        }
    }

    pub fn light_meter(&self) -> SimLightMeter {
        SimLightMeter {
            garden: self.clone(),
        }
    }

    pub fn air_sensor(&self) -> SimAirSensor {
        SimAirSensor {
            garden: self.clone(),
        }
    }

    pub fn pump(&self) -> SimPump {
        SimPump {
            garden: self.clone(),
            relay: MockPump::default(),
        }
    }

    #[cfg(test)]
    fn moisture(&self) -> f64 {
        self.state.borrow().moisture
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

pub struct SimSoilProbe {
    garden: Garden,
    index: usize,
}

impl SoilProbe for SimSoilProbe {
    /// The first probe advances the soil, so one pass over all probes is
    /// one step of the model.
    fn read_voltage(&mut self) -> Result<f64, SensorFault> {
        let mut state = self.garden.state.borrow_mut();
        if self.index == 0 {
            state.evolve();
        }
        state.fault("soil adc")?;

        let probe = state
            .probes
            .get(self.index)
            .ok_or_else(|| SensorFault::new(format!("no simulated probe {}", self.index)))?;
        let volts = DRY_VOLTS - state.moisture / 100.0 * (DRY_VOLTS - WET_VOLTS)
            + probe.offset
            + gaussian(0.0, probe.noise_sigma);
        Ok(volts.clamp(0.0, ADC_FULL_SCALE))
    }
}

pub struct SimLightMeter {
    garden: Garden,
}

impl LightMeter for SimLightMeter {
    fn read_lux(&mut self) -> Result<f64, SensorFault> {
        let state = self.garden.state.borrow();
        state.fault("light meter")?;
        // Indoor window sill: ~20k lux at noon, dark at night.
        let lux = 20_000.0 * state.daylight().max(0.0) + gaussian(0.0, 50.0);
        Ok(lux.max(0.0))
    }
}

pub struct SimAirSensor {
    garden: Garden,
}

impl AirSensor for SimAirSensor {
    /// Whole-number readings, like a DHT11.
    fn read_air(&mut self) -> Result<(f64, f64), SensorFault> {
        let state = self.garden.state.borrow();
        state.fault("dht11 checksum")?;
        let daylight = state.daylight();
        let temperature = (20.0 + 5.0 * daylight + gaussian(0.0, 0.5)).round();
        let humidity = (60.0 - 15.0 * daylight + gaussian(0.0, 2.0))
            .round()
            .clamp(20.0, 90.0);
        Ok((humidity, temperature))
    }
}

/// Mock relay that also wets the simulated soil in proportion to how long
/// it ran.
pub struct SimPump {
    garden: Garden,
    relay: MockPump,
}

impl Pump for SimPump {
    fn set(&mut self, on: bool) {
        self.relay.set(on);
        let mut state = self.garden.state.borrow_mut();
        match (on, state.pump_started) {
            (true, None) => state.pump_started = Some(Instant::now()),
            (false, Some(started)) => {
                let ran = started.elapsed().as_secs_f64();
                state.moisture = (state.moisture + ran * WET_RATE_PER_SEC).min(100.0);
                state.pump_started = None;
                info!(
                    ran_s = format_args!("{ran:.1}"),
                    moisture = format_args!("{:.1}", state.moisture),
                    "[sim] pump off"
                );
            }
            _ => {}
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(scenario: Scenario) -> Garden {
        let garden = Garden::new(scenario, 2, 600.0);
        garden.state.borrow_mut().fault_prob = 0.0;
        garden
    }

    fn mean_voltage(probe: &mut SimSoilProbe, n: usize) -> f64 {
        (0..n).map(|_| probe.read_voltage().unwrap()).sum::<f64>() / n as f64
    }

    #[test]
    fn voltages_within_adc_range() {
        let garden = Garden::new(Scenario::Flaky, 2, 600.0);
        let mut probes = [garden.soil_probe(0), garden.soil_probe(1)];
        for _ in 0..500 {
            for p in &mut probes {
                if let Ok(v) = p.read_voltage() {
                    assert!((0.0..=ADC_FULL_SCALE).contains(&v), "out of range: {v}");
                }
            }
        }
    }

    #[test]
    fn drying_raises_voltage() {
        let garden = quiet(Scenario::Drying);
        garden.state.borrow_mut().moisture = 80.0;
        let mut probe = garden.soil_probe(0);

        let before = mean_voltage(&mut probe, 5);
        for _ in 0..100 {
            probe.read_voltage().unwrap();
        }
        let after = mean_voltage(&mut probe, 5);

        assert!(after > before, "before={before:.3} after={after:.3}");
    }

    #[test]
    fn moisture_stays_in_percent_range() {
        let garden = quiet(Scenario::Flaky);
        let mut probe = garden.soil_probe(0);
        for _ in 0..2000 {
            probe.read_voltage().unwrap();
            let m = garden.moisture();
            assert!((0.0..=100.0).contains(&m), "moisture {m}");
        }
    }

    #[test]
    fn only_first_probe_advances_soil() {
        let garden = quiet(Scenario::Drying);
        let before = garden.moisture();
        garden.soil_probe(1).read_voltage().unwrap();
        assert_eq!(garden.moisture(), before);
    }

    #[test]
    fn pump_run_wets_soil() {
        let garden = quiet(Scenario::Drying);
        garden.state.borrow_mut().moisture = 20.0;
        garden.state.borrow_mut().pump_started =
            Some(Instant::now() - std::time::Duration::from_secs(8));

        let mut pump = garden.pump();
        pump.set(false);

        let m = garden.moisture();
        assert_eq!(pump.relay.activations, 0);
        assert!(m >= 20.0 + 8.0 * WET_RATE_PER_SEC - 0.5, "moisture {m}");
        assert!(garden.state.borrow().pump_started.is_none());
    }

    #[test]
    fn pump_cycle_counts_activation() {
        let garden = quiet(Scenario::Drying);
        let mut pump = garden.pump();
        pump.set(true);
        assert!(pump.relay.on);
        pump.set(false);
        assert!(!pump.relay.on);
        assert_eq!(pump.relay.activations, 1);
        assert!(garden.moisture() >= 0.0);
    }

    #[test]
    fn pump_off_without_on_is_noop() {
        let garden = quiet(Scenario::Stable);
        let before = garden.moisture();
        garden.pump().set(false);
        assert_eq!(garden.moisture(), before);
    }

    #[test]
    fn flaky_scenario_faults() {
        let garden = Garden::new(Scenario::Flaky, 1, 600.0);
        let mut light = garden.light_meter();
        let faults = (0..400).filter(|_| light.read_lux().is_err()).count();
        // ~25% expected; anything between 5% and 50% is plausible.
        assert!((20..200).contains(&faults), "faults={faults}");
    }

    #[test]
    fn air_readings_are_whole_numbers() {
        let garden = quiet(Scenario::Stable);
        let mut air = garden.air_sensor();
        for _ in 0..50 {
            let (h, t) = air.read_air().unwrap();
            assert_eq!(h, h.round());
            assert_eq!(t, t.round());
            assert!((20.0..=90.0).contains(&h));
        }
    }

    #[test]
    fn lux_never_negative() {
        let garden = quiet(Scenario::Stable);
        let mut light = garden.light_meter();
        for _ in 0..200 {
            assert!(light.read_lux().unwrap() >= 0.0);
        }
    }

    #[test]
    fn missing_probe_faults() {
        let garden = quiet(Scenario::Stable);
        assert!(garden.soil_probe(5).read_voltage().is_err());
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("drying"), Scenario::Drying);
        assert_eq!(Scenario::from_str_lossy("STABLE"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("Flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("wet"), Scenario::Wet);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Drying);
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let mean = (0..n).map(|_| approx_std_normal()).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.15, "mean should be near zero: {mean}");
    }
}
