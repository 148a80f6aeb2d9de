//! Historical sample series: assembly from one cycle's readings, the
//! in-memory ring the window is cut from, and the CSV sink that keeps the
//! full record on disk.
//!
//! CSV layout (header written once, when the file is empty):
//!
//! ```text
//! date,time,soil_moisture_percent,lux,temperature,humidity
//! 01/06/2024,14:30:00,42.0,812.35,21.0,55.0
//! ```

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, PrimitiveDateTime, Time};
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::sensors::SensorReading;

const CSV_HEADERS: [&str; 6] = [
    "date",
    "time",
    "soil_moisture_percent",
    "lux",
    "temperature",
    "humidity",
];

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalSample {
    pub timestamp: PrimitiveDateTime,
    pub soil_moisture_percent: f64,
    pub lux: f64,
    pub temperature: f64,
    pub humidity: f64,
}

/// Combine one cycle's readings into a sample.  Needs one reading of each
/// kind; if any channel is missing the cycle contributes nothing.
pub fn assemble(timestamp: PrimitiveDateTime, readings: &[SensorReading]) -> Option<HistoricalSample> {
    let mut soil = None;
    let mut lux = None;
    let mut air = None;

    for r in readings {
        match *r {
            SensorReading::SoilMoisture { percent } => soil = Some(percent),
            SensorReading::Light { lux: l } => lux = Some(l),
            SensorReading::Air {
                humidity,
                temperature,
            } => air = Some((humidity, temperature)),
        }
    }

    let (humidity, temperature) = air?;
    Some(HistoricalSample {
        timestamp,
        soil_moisture_percent: soil?,
        lux: lux?,
        temperature,
        humidity,
    })
}

// ---------------------------------------------------------------------------
// In-memory series
// ---------------------------------------------------------------------------

/// Append-only chronological series, bounded to the most recent `retention`
/// samples.  Older samples fall off the front; nothing is ever rewritten.
#[derive(Debug, Clone)]
pub struct History {
    samples: VecDeque<HistoricalSample>,
    retention: usize,
}

impl History {
    pub fn new(retention: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(retention),
            retention,
        }
    }

    pub fn from_samples(samples: impl IntoIterator<Item = HistoricalSample>, retention: usize) -> Self {
        let mut history = Self::new(retention);
        for s in samples {
            history.push(s);
        }
        history
    }

    pub fn push(&mut self, sample: HistoricalSample) {
        if self.samples.len() >= self.retention {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The most recent `n` samples (or fewer), oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &HistoricalSample> {
        self.samples.iter().skip(self.samples.len().saturating_sub(n))
    }

    pub fn latest(&self) -> Option<&HistoricalSample> {
        self.samples.back()
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Durable destination for completed samples.
pub trait HistorySink {
    fn append(&mut self, sample: &HistoricalSample) -> Result<(), PersistenceError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    date: String,
    time: String,
    soil_moisture_percent: f64,
    lux: f64,
    temperature: f64,
    humidity: f64,
}

impl From<&HistoricalSample> for CsvRow {
    fn from(s: &HistoricalSample) -> Self {
        let ts = s.timestamp;
        Self {
            date: format!("{:02}/{:02}/{:04}", ts.day(), ts.month() as u8, ts.year()),
            time: format!("{:02}:{:02}:{:02}", ts.hour(), ts.minute(), ts.second()),
            soil_moisture_percent: s.soil_moisture_percent,
            lux: s.lux,
            temperature: s.temperature,
            humidity: s.humidity,
        }
    }
}

impl CsvRow {
    fn to_sample(&self) -> Result<HistoricalSample, time::error::Parse> {
        let date = Date::parse(self.date.trim(), format_description!("[day]/[month]/[year]"))?;
        let time = Time::parse(self.time.trim(), format_description!("[hour]:[minute]:[second]"))?;
        Ok(HistoricalSample {
            timestamp: PrimitiveDateTime::new(date, time),
            soil_moisture_percent: self.soil_moisture_percent,
            lux: self.lux,
            temperature: self.temperature,
            humidity: self.humidity,
        })
    }
}

/// Appends samples to a CSV file, one row per sample.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the most recent `retention` rows.  A missing file is an empty
    /// history; rows that fail to parse are skipped with a warning.
    pub fn load_recent(&self, retention: usize) -> Result<Vec<HistoricalSample>, PersistenceError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no history file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(PersistenceError::io(&self.path)(e)),
        };

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut recent: VecDeque<HistoricalSample> = VecDeque::with_capacity(retention);
        let mut skipped = 0usize;

        for (i, row) in reader.deserialize::<CsvRow>().enumerate() {
            let sample = row
                .map_err(|e| e.to_string())
                .and_then(|r| r.to_sample().map_err(|e| e.to_string()));
            match sample {
                Ok(s) => {
                    if recent.len() >= retention {
                        recent.pop_front();
                    }
                    recent.push_back(s);
                }
                Err(e) => {
                    skipped += 1;
                    // +2: one for the header, one for 1-based line numbers.
                    warn!(path = %self.path.display(), line = i + 2, "skipping history row: {e}");
                }
            }
        }

        info!(
            path = %self.path.display(),
            loaded = recent.len(),
            skipped,
            "history loaded"
        );
        Ok(recent.into())
    }
}

impl HistorySink for CsvSink {
    fn append(&mut self, sample: &HistoricalSample) -> Result<(), PersistenceError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(PersistenceError::io(&self.path))?;
        let empty = file
            .metadata()
            .map_err(PersistenceError::io(&self.path))?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if empty {
            writer
                .write_record(CSV_HEADERS)
                .map_err(PersistenceError::csv(&self.path))?;
        }
        writer
            .serialize(CsvRow::from(sample))
            .map_err(PersistenceError::csv(&self.path))?;
        writer.flush().map_err(PersistenceError::io(&self.path))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
