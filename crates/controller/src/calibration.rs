//! Per-channel soil calibration records, persisted as one JSON file per
//! channel.
//!
//! The field names are inverted relative to what they describe: `max_value`
//! is the dry (0 %) reference voltage and `min_value` the wet (100 %)
//! reference.  Existing calibration files on deployed units depend on this
//! layout, so it is kept as-is.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::PersistenceError;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// On-disk layout: `{"min_value": f64, "max_value": f64, "last_level": f64}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Wet (100 %) reference voltage.
    pub min_value: f64,
    /// Dry (0 %) reference voltage.
    pub max_value: f64,
    /// Most recent calibrated level, in percent.
    pub last_level: f64,
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self {
            min_value: 0.0,
            max_value: 100.0,
            last_level: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Sole reader/writer of the calibration files.  Every operation goes to disk
/// so an external recalibration is picked up on the next read.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    files: HashMap<String, PathBuf>,
}

impl CalibrationStore {
    /// `files` maps a soil channel name to its calibration file.
    pub fn new<I, S, P>(files: I) -> Self
    where
        I: IntoIterator<Item = (S, P)>,
        S: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(name, path)| (name.into(), path.into()))
                .collect(),
        }
    }

    fn path(&self, channel: &str) -> Result<&Path, PersistenceError> {
        self.files
            .get(channel)
            .map(PathBuf::as_path)
            .ok_or_else(|| PersistenceError::UnknownChannel(channel.to_string()))
    }

    /// Load the record for `channel`.  A missing file is not an error: the
    /// default `{0, 100, 0}` record is returned instead.
    pub fn load(&self, channel: &str) -> Result<CalibrationRecord, PersistenceError> {
        let path = self.path(channel)?;
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(PersistenceError::json(path)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    channel,
                    path = %path.display(),
                    "no calibration file — using defaults"
                );
                Ok(CalibrationRecord::default())
            }
            Err(e) => Err(PersistenceError::io(path)(e)),
        }
    }

    /// Persist `record` for `channel`.  Written to a sibling temp file first
    /// and renamed into place so a crash never leaves a truncated record.
    pub fn save(&self, channel: &str, record: &CalibrationRecord) -> Result<(), PersistenceError> {
        let path = self.path(channel)?;
        let json = serde_json::to_string(record).map_err(PersistenceError::json(path))?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, json).map_err(PersistenceError::io(&tmp))?;
        std::fs::rename(&tmp, path).map_err(PersistenceError::io(path))?;
        Ok(())
    }

    /// Load, replace `last_level`, save.  Called after every successful raw
    /// read, whatever the level turns out to be.
    pub fn update_last_level(
        &self,
        channel: &str,
        level: f64,
    ) -> Result<CalibrationRecord, PersistenceError> {
        let mut record = self.load(channel)?;
        record.last_level = level;
        self.save(channel, &record)?;
        Ok(record)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
