//! TOML configuration: file layout, defaults, and validation.
//!
//! Every key is optional; an absent file yields [`Config::default`].
//!
//! ```toml
//! interval_minutes = 30
//! history_csv = "plant_data.csv"
//! training_stats = "training_stats.json"
//!
//! [decision]
//! threshold_percent = 23.0
//! water_sec = 8
//!
//! [[soil_sensors]]
//! name = "upper"
//! adc_channel = 0
//! calibration_file = "calibration_data_1.json"
//! ```

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::decision::{WATER_DURATION, WATER_THRESHOLD_PERCENT};
use crate::sensors::{RetryPolicy, MAX_RETRY, RETRY_WAIT};
use crate::window::WINDOW_LEN;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Minutes between cycles; must divide 60.
    pub interval_minutes: u32,
    pub history_csv: PathBuf,
    pub training_stats: PathBuf,
    /// Samples kept in memory (and reloaded from the CSV at startup).
    pub history_retention: usize,
    pub acquisition: AcquisitionConfig,
    pub decision: DecisionConfig,
    pub pump: PumpConfig,
    pub soil_sensors: Vec<SoilSensorEntry>,
    pub hardware: HardwareConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionConfig {
    pub max_retry: u32,
    pub retry_wait_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecisionConfig {
    pub threshold_percent: f64,
    pub water_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PumpConfig {
    /// BCM pin driving the relay.
    pub gpio_pin: u8,
    pub active_low: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoilSensorEntry {
    pub name: String,
    /// ADS1115 single-ended input, 0-3.
    pub adc_channel: u8,
    pub calibration_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HardwareConfig {
    pub adc_addr: u16,
    pub light_addr: u16,
    /// BCM pin of the DHT11 data line.
    pub air_gpio_pin: u8,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            history_csv: PathBuf::from("plant_data.csv"),
            training_stats: PathBuf::from("training_stats.json"),
            history_retention: 336,
            acquisition: AcquisitionConfig::default(),
            decision: DecisionConfig::default(),
            pump: PumpConfig::default(),
            soil_sensors: vec![
                SoilSensorEntry {
                    name: "upper".into(),
                    adc_channel: 0,
                    calibration_file: PathBuf::from("calibration_data_1.json"),
                },
                SoilSensorEntry {
                    name: "lower".into(),
                    adc_channel: 1,
                    calibration_file: PathBuf::from("calibration_data_2.json"),
                },
            ],
            hardware: HardwareConfig::default(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_retry: MAX_RETRY,
            retry_wait_sec: RETRY_WAIT.as_secs_f64(),
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            threshold_percent: WATER_THRESHOLD_PERCENT,
            water_sec: WATER_DURATION.as_secs_f64(),
        }
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 23,
            active_low: false,
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            adc_addr: 0x48,
            light_addr: 0x23,
            air_gpio_pin: 12,
        }
    }
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

impl AcquisitionConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retry: self.max_retry,
            retry_wait: Duration::from_secs_f64(self.retry_wait_sec),
        }
    }
}

impl DecisionConfig {
    pub fn water_for(&self) -> Duration {
        Duration::from_secs_f64(self.water_sec)
    }
}

// ---------------------------------------------------------------------------
// GPIO / I2C whitelists
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

/// Addresses selectable on the ADS1115 ADDR pin.
const ADS1115_ADDRS: [u16; 4] = [0x48, 0x49, 0x4a, 0x4b];

/// Addresses selectable on the BH1750 ADDR pin.
const BH1750_ADDRS: [u16; 2] = [0x23, 0x5c];

/// Upper bound on one pump run; a typo should not flood the pot.
const MAX_WATER_SEC: f64 = 120.0;

/// Upper bound on the pause between sensor retries.
const MAX_RETRY_WAIT_SEC: f64 = 60.0;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_schedule(&mut errors);
        self.validate_acquisition(&mut errors);
        self.validate_decision(&mut errors);
        self.validate_pins(&mut errors);
        self.validate_soil_sensors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_schedule(&self, errors: &mut Vec<String>) {
        if self.interval_minutes == 0 || 60 % self.interval_minutes != 0 {
            errors.push(format!(
                "interval_minutes {} must be a divisor of 60",
                self.interval_minutes
            ));
        }
        if self.history_retention < WINDOW_LEN {
            errors.push(format!(
                "history_retention {} is below the forecast window of {WINDOW_LEN}",
                self.history_retention
            ));
        }
        if self.history_csv.as_os_str().is_empty() {
            errors.push("history_csv is empty".into());
        }
        if self.training_stats.as_os_str().is_empty() {
            errors.push("training_stats is empty".into());
        }
    }

    fn validate_acquisition(&self, errors: &mut Vec<String>) {
        let a = &self.acquisition;
        if a.max_retry == 0 {
            errors.push("acquisition.max_retry must be at least 1".into());
        }
        if !(a.retry_wait_sec >= 0.0 && a.retry_wait_sec <= MAX_RETRY_WAIT_SEC) {
            errors.push(format!(
                "acquisition.retry_wait_sec {} out of range [0, {MAX_RETRY_WAIT_SEC}]",
                a.retry_wait_sec
            ));
        }
    }

    fn validate_decision(&self, errors: &mut Vec<String>) {
        let d = &self.decision;
        if !(0.0..=100.0).contains(&d.threshold_percent) {
            errors.push(format!(
                "decision.threshold_percent {} out of range [0, 100]",
                d.threshold_percent
            ));
        }
        if !(d.water_sec > 0.0 && d.water_sec <= MAX_WATER_SEC) {
            errors.push(format!(
                "decision.water_sec {} out of range (0, {MAX_WATER_SEC}]",
                d.water_sec
            ));
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let pump_pin = self.pump.gpio_pin;
        let air_pin = self.hardware.air_gpio_pin;

        if !VALID_GPIO_PINS.contains(&pump_pin) {
            errors.push(format!(
                "pump.gpio_pin {pump_pin} is not a valid BCM GPIO pin (allowed: 2-27)"
            ));
        }
        if !VALID_GPIO_PINS.contains(&air_pin) {
            errors.push(format!(
                "hardware.air_gpio_pin {air_pin} is not a valid BCM GPIO pin (allowed: 2-27)"
            ));
        }
        if pump_pin == air_pin {
            errors.push(format!(
                "pump.gpio_pin and hardware.air_gpio_pin are both GPIO {pump_pin}"
            ));
        }
        // GPIO 2/3 carry SDA/SCL for the ADC and light meter.
        for (key, pin) in [("pump.gpio_pin", pump_pin), ("hardware.air_gpio_pin", air_pin)] {
            if pin == 2 || pin == 3 {
                errors.push(format!("{key} {pin} collides with the I2C bus (GPIO 2/3)"));
            }
        }

        if !ADS1115_ADDRS.contains(&self.hardware.adc_addr) {
            errors.push(format!(
                "hardware.adc_addr {:#04x} is not an ADS1115 address (0x48-0x4b)",
                self.hardware.adc_addr
            ));
        }
        if !BH1750_ADDRS.contains(&self.hardware.light_addr) {
            errors.push(format!(
                "hardware.light_addr {:#04x} is not a BH1750 address (0x23 or 0x5c)",
                self.hardware.light_addr
            ));
        }
    }

    fn validate_soil_sensors(&self, errors: &mut Vec<String>) {
        if self.soil_sensors.is_empty() {
            errors.push("at least one [[soil_sensors]] entry is required".into());
        }

        let mut seen_names: HashSet<&str> = HashSet::new();
        let mut seen_channels: HashSet<u8> = HashSet::new();
        let mut seen_files: HashSet<&Path> = HashSet::new();

        for (i, s) in self.soil_sensors.iter().enumerate() {
            let ctx = || {
                if s.name.is_empty() {
                    format!("soil_sensors[{i}]")
                } else {
                    format!("soil sensor '{}'", s.name)
                }
            };

            if s.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            } else if !seen_names.insert(&s.name) {
                errors.push(format!("{}: duplicate name", ctx()));
            }

            if s.adc_channel > 3 {
                errors.push(format!(
                    "{}: adc_channel {} out of ADS1115 range [0, 3]",
                    ctx(),
                    s.adc_channel
                ));
            } else if !seen_channels.insert(s.adc_channel) {
                errors.push(format!(
                    "{}: adc_channel {} already used",
                    ctx(),
                    s.adc_channel
                ));
            }

            if s.calibration_file.as_os_str().is_empty() {
                errors.push(format!("{}: calibration_file is empty", ctx()));
            } else if !seen_files.insert(&s.calibration_file) {
                errors.push(format!(
                    "{}: calibration_file '{}' shared with another sensor",
                    ctx(),
                    s.calibration_file.display()
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file means
/// "run with defaults".
pub fn load(path: &Path) -> Result<Config> {
    let config = match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no config file, using defaults");
            Config::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read config: {}", path.display()))
        }
    };
    config
        .validate()
        .with_context(|| format!("invalid config: {}", path.display()))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
