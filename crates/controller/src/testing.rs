//! Test doubles shared by the unit tests: a hand-driven clock, scripted
//! sensors, a recording pump and sink, and a ready-wired controller.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use time::macros::datetime;
use time::PrimitiveDateTime;
use tokio_util::sync::CancellationToken;

use crate::calibration::CalibrationStore;
use crate::decision::DecisionEngine;
use crate::error::PersistenceError;
use crate::forecast::{ForecastError, Forecaster, LastValue};
use crate::history::{HistoricalSample, History, HistorySink};
use crate::normalize::NormalizationStats;
use crate::pipeline::Controller;
use crate::pump::Pump;
use crate::scheduler::Clock;
use crate::sensors::{AirSensor, LightMeter, RetryPolicy, SensorFault, SensorSuite, SoilChannel, SoilProbe};
use crate::window::Window;

/// Fresh, empty directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "plant-controller-{}-{tag}-{n}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Sample `i` of a half-hourly series starting 2024-06-01 00:00.
pub fn sample_at(i: usize, soil: f64) -> HistoricalSample {
    HistoricalSample {
        timestamp: datetime!(2024-06-01 00:00:00) + Duration::from_secs(1800 * i as u64),
        soil_moisture_percent: soil,
        lux: 1200.5,
        temperature: 21.5,
        humidity: 55.0,
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Clock whose `sleep` advances `now` instantly and records the duration.
pub struct ManualClock {
    now: Cell<PrimitiveDateTime>,
    sleeps: RefCell<Vec<Duration>>,
    cancel: Option<(usize, CancellationToken)>,
}

impl ManualClock {
    pub fn new(start: PrimitiveDateTime) -> Self {
        Self {
            now: Cell::new(start),
            sleeps: RefCell::new(Vec::new()),
            cancel: None,
        }
    }

    /// Fire `token` once `n` sleeps have completed.
    pub fn cancel_after_sleeps(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel = Some((n, token));
        self
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> PrimitiveDateTime {
        self.now.get()
    }

    async fn sleep(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
        let count = {
            let mut sleeps = self.sleeps.borrow_mut();
            sleeps.push(duration);
            sleeps.len()
        };
        if let Some((n, token)) = &self.cancel {
            if count >= *n {
                token.cancel();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

enum Script<T> {
    Always(T),
    Sequence(VecDeque<Result<T, SensorFault>>),
    Failing,
}

/// Probe that replays a fixed script.  Clones share the script and the read
/// counter.
#[derive(Clone)]
pub struct ScriptedProbe<T> {
    script: Rc<RefCell<Script<T>>>,
    reads: Rc<Cell<u32>>,
}

impl<T: Clone> ScriptedProbe<T> {
    fn with(script: Script<T>) -> Self {
        Self {
            script: Rc::new(RefCell::new(script)),
            reads: Rc::new(Cell::new(0)),
        }
    }

    pub fn always(value: T) -> Self {
        Self::with(Script::Always(value))
    }

    /// Replay `results` in order, then fault forever.
    pub fn sequence(results: Vec<Result<T, SensorFault>>) -> Self {
        Self::with(Script::Sequence(results.into()))
    }

    pub fn failing() -> Self {
        Self::with(Script::Failing)
    }

    pub fn reads(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.reads)
    }

    fn next(&mut self) -> Result<T, SensorFault> {
        self.reads.set(self.reads.get() + 1);
        match &mut *self.script.borrow_mut() {
            Script::Always(v) => Ok(v.clone()),
            Script::Sequence(queue) => queue
                .pop_front()
                .unwrap_or_else(|| Err(SensorFault::new("script exhausted"))),
            Script::Failing => Err(SensorFault::new("scripted fault")),
        }
    }
}

impl SoilProbe for ScriptedProbe<f64> {
    fn read_voltage(&mut self) -> Result<f64, SensorFault> {
        self.next()
    }
}

impl LightMeter for ScriptedProbe<f64> {
    fn read_lux(&mut self) -> Result<f64, SensorFault> {
        self.next()
    }
}

impl AirSensor for ScriptedProbe<(f64, f64)> {
    fn read_air(&mut self) -> Result<(f64, f64), SensorFault> {
        self.next()
    }
}

// ---------------------------------------------------------------------------
// Pump, sink, forecaster
// ---------------------------------------------------------------------------

/// Records every `set` call.
#[derive(Default)]
pub struct RecordingPump {
    events: Rc<RefCell<Vec<bool>>>,
}

impl RecordingPump {
    pub fn events(&self) -> Rc<RefCell<Vec<bool>>> {
        Rc::clone(&self.events)
    }
}

impl Pump for RecordingPump {
    fn set(&mut self, on: bool) {
        self.events.borrow_mut().push(on);
    }
}

pub struct MemorySink {
    rows: Rc<RefCell<Vec<HistoricalSample>>>,
    fails: bool,
}

impl HistorySink for MemorySink {
    fn append(&mut self, sample: &HistoricalSample) -> Result<(), PersistenceError> {
        if self.fails {
            return Err(PersistenceError::Io {
                path: PathBuf::from("/dev/full"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.rows.borrow_mut().push(*sample);
        Ok(())
    }
}

/// Forecaster that always answers the same normalized value.
pub struct Fixed(pub f64);

impl Forecaster for Fixed {
    fn predict(&mut self, _window: &Window) -> Result<f64, ForecastError> {
        Ok(self.0)
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Ingredients for [`test_controller_with`].  Soil probes read through the
/// default `{0, 100}` calibration, so a reading of `v` becomes `100 - v` %.
pub struct TestRig {
    pub clock: ManualClock,
    pub upper: ScriptedProbe<f64>,
    pub lower: ScriptedProbe<f64>,
    pub light: ScriptedProbe<f64>,
    pub air: ScriptedProbe<(f64, f64)>,
    pub history: Vec<HistoricalSample>,
    pub forecaster: Box<dyn Forecaster>,
    pub sink_fails: bool,
}

impl TestRig {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            upper: ScriptedProbe::always(60.0),
            lower: ScriptedProbe::always(60.0),
            light: ScriptedProbe::always(1200.5),
            air: ScriptedProbe::always((55.0, 21.5)),
            history: Vec::new(),
            forecaster: Box::new(LastValue),
            sink_fails: false,
        }
    }
}

pub struct Handles {
    pub sink: Rc<RefCell<Vec<HistoricalSample>>>,
    pub pump: Rc<RefCell<Vec<bool>>>,
}

pub fn test_controller_with(rig: TestRig) -> (Controller<ManualClock>, Handles) {
    let dir = scratch_dir("controller");
    let sensors = SensorSuite::new(
        vec![
            SoilChannel::new("upper", Box::new(rig.upper)),
            SoilChannel::new("lower", Box::new(rig.lower)),
        ],
        Box::new(rig.light),
        Box::new(rig.air),
        CalibrationStore::new([
            ("upper", dir.join("calibration_data_1.json")),
            ("lower", dir.join("calibration_data_2.json")),
        ]),
        RetryPolicy::default(),
    );

    let rows = Rc::new(RefCell::new(Vec::new()));
    let sink = MemorySink {
        rows: Rc::clone(&rows),
        fails: rig.sink_fails,
    };
    let pump = RecordingPump::default();
    let events = pump.events();
    let stats =
        NormalizationStats::new(&[30.0, 5000.0, 20.0, 60.0], &[10.0, 2500.0, 4.0, 15.0]).unwrap();

    let controller = Controller::new(
        sensors,
        History::from_samples(rig.history, 336),
        Box::new(sink),
        stats,
        rig.forecaster,
        DecisionEngine::default(),
        Box::new(pump),
        rig.clock,
    );
    (
        controller,
        Handles {
            sink: rows,
            pump: events,
        },
    )
}

/// Controller with `soil` behind both channels and every other input healthy.
pub fn test_controller(clock: ManualClock, soil: ScriptedProbe<f64>) -> (Controller<ManualClock>, Handles) {
    test_controller_with(TestRig {
        upper: soil.clone(),
        lower: soil,
        ..TestRig::new(clock)
    })
}
