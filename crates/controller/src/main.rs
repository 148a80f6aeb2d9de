mod calibration;
mod config;
mod decision;
mod error;
mod forecast;
mod history;
#[cfg(feature = "hw")]
mod hw;
mod normalize;
mod pipeline;
mod pump;
mod scheduler;
mod sensors;
#[cfg(all(feature = "sim", not(feature = "hw")))]
mod sim;
#[cfg(test)]
mod testing;
mod window;

#[cfg(not(any(feature = "sim", feature = "hw")))]
compile_error!("enable the `sim` feature (simulated garden) or the `hw` feature (Raspberry Pi)");

use std::{env, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use time::UtcOffset;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use calibration::CalibrationStore;
use config::Config;
use decision::DecisionEngine;
use forecast::LastValue;
use history::{CsvSink, History};
use normalize::NormalizationStats;
use pipeline::Controller;
use pump::Pump;
use scheduler::SystemClock;
use sensors::{AirSensor, LightMeter, SensorSuite, SoilChannel};
use window::column;

/// Pump run for `self-test`.
const SELF_TEST_WATER: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    SelfTest,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let command = match env::args().nth(1).as_deref() {
        None | Some("run") => Command::Run,
        Some("self-test") => Command::SelfTest,
        Some(other) => bail!("unknown command {other:?} (usage: plant-controller [run|self-test])"),
    };

    // Resolved while the process is still single-threaded.
    let offset = UtcOffset::current_local_offset().unwrap_or_else(|e| {
        warn!("cannot determine local UTC offset ({e}), timestamps will be UTC");
        UtcOffset::UTC
    });

    // ── Config ──────────────────────────────────────────────────────
    let config_path =
        PathBuf::from(env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string()));
    let cfg = config::load(&config_path)?;
    info!(
        path = %config_path.display(),
        interval_minutes = cfg.interval_minutes,
        soil_sensors = cfg.soil_sensors.len(),
        "config loaded"
    );

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?
        .block_on(run(cfg, offset, command))
}

async fn run(cfg: Config, offset: UtcOffset, command: Command) -> Result<()> {
    let clock = SystemClock::new(offset);

    // ── Calibration ─────────────────────────────────────────────────
    let calibration = CalibrationStore::new(
        cfg.soil_sensors
            .iter()
            .map(|s| (s.name.clone(), s.calibration_file.clone())),
    );
    for s in &cfg.soil_sensors {
        let record = calibration
            .load(&s.name)
            .with_context(|| format!("calibration for soil sensor '{}' is unusable", s.name))?;
        info!(
            channel = %s.name,
            min_value = record.min_value,
            max_value = record.max_value,
            last_level = record.last_level,
            "calibration loaded"
        );
    }

    // ── Devices ─────────────────────────────────────────────────────
    let devices = open_devices(&cfg)?;
    let mut pump = devices.pump;
    let mut sensors = SensorSuite::new(
        devices.soil,
        devices.light,
        devices.air,
        calibration,
        cfg.acquisition.policy(),
    );

    if command == Command::SelfTest {
        return self_test(&mut sensors, pump.as_mut(), &clock).await;
    }

    // ── Forecasting inputs ──────────────────────────────────────────
    let stats = NormalizationStats::load(&cfg.training_stats)?;
    info!(
        soil_mean = stats.mean(column::SOIL),
        soil_std = stats.std(column::SOIL),
        "normalization stats loaded"
    );

    let sink = CsvSink::new(&cfg.history_csv);
    let recent = sink.load_recent(cfg.history_retention).unwrap_or_else(|e| {
        warn!("could not reload history, starting empty: {e}");
        Vec::new()
    });
    let history = History::from_samples(recent, cfg.history_retention);
    match history.latest() {
        Some(last) => info!(
            samples = history.len(),
            last = %last.timestamp,
            path = %sink.path().display(),
            "history reloaded"
        ),
        None => info!(path = %sink.path().display(), "no history yet"),
    }
    if history.len() < window::WINDOW_LEN && !history.is_empty() {
        info!(
            cycles = window::WINDOW_LEN - history.len(),
            "forecasting resumes once the window fills"
        );
    }

    let decision = DecisionEngine::new(cfg.decision.threshold_percent, cfg.decision.water_for());
    info!(
        threshold_percent = cfg.decision.threshold_percent,
        water_sec = cfg.decision.water_sec,
        "forecaster: last-value baseline"
    );

    let mut controller = Controller::new(
        sensors,
        history,
        Box::new(sink),
        stats,
        Box::new(LastValue),
        decision,
        pump,
        clock,
    );

    // ── Shutdown ────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, finishing current cycle"),
            Err(e) => warn!("cannot listen for ctrl-c: {e}"),
        }
        on_signal.cancel();
    });
    // Let the listener register before the first cycle, which may not yield.
    tokio::task::yield_now().await;

    scheduler::run(&mut controller, cfg.interval_minutes, &cancel).await;
    info!("controller stopped");
    Ok(())
}

/// One read of every channel and a short pump run.  Fails if any channel
/// could not be read.
async fn self_test(sensors: &mut SensorSuite, pump: &mut dyn Pump, clock: &SystemClock) -> Result<()> {
    println!("Testing hardware...");
    let light = sensors.read_light(clock).await;
    println!("  light = {light:?}");
    let air = sensors.read_air(clock).await;
    println!("  air   = {air:?}");
    let soil = sensors.read_soil(clock).await;
    println!("  soil  = {soil:?}");

    println!("Running pump for {}s...", SELF_TEST_WATER.as_secs());
    pump::water(pump, clock, SELF_TEST_WATER).await;
    println!("Pump OK");

    let missing: Vec<&str> = [("light", light.is_none()), ("air", air.is_none()), ("soil", soil.is_none())]
        .into_iter()
        .filter_map(|(name, missing)| missing.then_some(name))
        .collect();
    if !missing.is_empty() {
        bail!("self-test failed, no reading from: {}", missing.join(", "));
    }
    println!("Self-test passed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Device wiring
// ---------------------------------------------------------------------------

struct Devices {
    soil: Vec<SoilChannel>,
    light: Box<dyn LightMeter>,
    air: Box<dyn AirSensor>,
    pump: Box<dyn Pump>,
}

#[cfg(feature = "hw")]
fn open_devices(cfg: &Config) -> Result<Devices> {
    let inputs = hw::open(cfg)?;
    let pump = pump::RelayPump::new(cfg.pump.gpio_pin, cfg.pump.active_low)?;
    Ok(Devices {
        soil: inputs.soil,
        light: inputs.light,
        air: inputs.air,
        pump: Box::new(pump),
    })
}

#[cfg(all(feature = "sim", not(feature = "hw")))]
fn open_devices(cfg: &Config) -> Result<Devices> {
    use sim::{Garden, Scenario};

    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let day_s: f64 = env::var("SIM_DAY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|d: &f64| *d > 0.0)
        .unwrap_or(86_400.0);
    info!(
        gpio_pin = cfg.pump.gpio_pin,
        active_low = cfg.pump.active_low,
        "simulation mode, relay not driven"
    );

    let garden = Garden::new(scenario, cfg.soil_sensors.len(), day_s);
    let soil = cfg
        .soil_sensors
        .iter()
        .enumerate()
        .map(|(i, s)| SoilChannel::new(&s.name, Box::new(garden.soil_probe(i))))
        .collect();

    Ok(Devices {
        soil,
        light: Box::new(garden.light_meter()),
        air: Box::new(garden.air_sensor()),
        pump: Box::new(garden.pump()),
    })
}
