//! Z-score scaling with the statistics the forecaster was trained on.
//!
//! Stats file layout, channel order `[soil %, lux, temperature, humidity]`:
//!
//! ```json
//! {"train_means": [31.2, 5120.0, 21.4, 58.0], "train_stds": [9.8, 7400.0, 3.1, 11.5]}
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::window::{column, Window, RAW_CHANNELS};

const CHANNEL_NAMES: [&str; RAW_CHANNELS] = ["soil_moisture_percent", "lux", "temperature", "humidity"];

#[derive(Debug, Deserialize)]
struct StatsFile {
    train_means: Vec<f64>,
    train_stds: Vec<f64>,
}

/// Per-channel `(mean, std)`, immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizationStats {
    means: [f64; RAW_CHANNELS],
    stds: [f64; RAW_CHANNELS],
}

impl NormalizationStats {
    /// Validate and build.  Every value must be finite and no std may be
    /// zero; all violations are reported together.
    pub fn new(means: &[f64], stds: &[f64]) -> Result<Self> {
        let mut errors: Vec<String> = Vec::new();

        if means.len() != RAW_CHANNELS {
            errors.push(format!(
                "train_means has {} values, expected {RAW_CHANNELS}",
                means.len()
            ));
        }
        if stds.len() != RAW_CHANNELS {
            errors.push(format!(
                "train_stds has {} values, expected {RAW_CHANNELS}",
                stds.len()
            ));
        }
        for (name, m) in CHANNEL_NAMES.iter().zip(means) {
            if !m.is_finite() {
                errors.push(format!("{name}: mean {m} is not finite"));
            }
        }
        for (name, s) in CHANNEL_NAMES.iter().zip(stds) {
            if !s.is_finite() {
                errors.push(format!("{name}: std {s} is not finite"));
            } else if *s == 0.0 {
                errors.push(format!("{name}: std is zero"));
            }
        }

        if !errors.is_empty() {
            bail!(
                "invalid normalization stats ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }

        let mut stats = Self {
            means: [0.0; RAW_CHANNELS],
            stds: [0.0; RAW_CHANNELS],
        };
        stats.means.copy_from_slice(means);
        stats.stds.copy_from_slice(stds);
        Ok(stats)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: StatsFile = serde_json::from_str(json).context("failed to parse stats json")?;
        Self::new(&file.train_means, &file.train_stds)
    }

    /// Read and validate the stats file.  Any failure here is fatal at
    /// startup: forecasting is meaningless without it.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read normalization stats: {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("invalid normalization stats: {}", path.display()))
    }

    pub fn mean(&self, channel: usize) -> f64 {
        self.means[channel]
    }

    pub fn std(&self, channel: usize) -> f64 {
        self.stds[channel]
    }

    /// Map a normalized soil-moisture forecast back to percent.
    pub fn denormalize_soil(&self, scalar: f64) -> f64 {
        denormalize(scalar, self.means[column::SOIL], self.stds[column::SOIL])
    }
}

/// Scale the raw channel columns of `window`; the derived time columns are
/// copied untouched.
pub fn normalize(window: &Window, stats: &NormalizationStats) -> Window {
    let rows = window
        .rows()
        .iter()
        .map(|row| {
            let mut out = *row;
            for c in 0..RAW_CHANNELS {
                out[c] = (row[c] - stats.means[c]) / stats.stds[c];
            }
            out
        })
        .collect();
    Window::from_rows(rows)
}

pub fn denormalize(scalar: f64, mean: f64, std: f64) -> f64 {
    scalar * std + mean
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::History;
    use crate::testing::{sample_at, scratch_dir};
    use crate::window::{build_window, FEATURE_COUNT};

    fn stats() -> NormalizationStats {
        NormalizationStats::new(&[30.0, 5000.0, 20.0, 60.0], &[10.0, 2500.0, 4.0, 15.0]).unwrap()
    }

    fn window() -> Window {
        let h = History::from_samples((0..48).map(|i| sample_at(i, 20.0 + i as f64 * 0.5)), 48);
        build_window(&h).unwrap()
    }

    #[test]
    fn normalize_scales_raw_columns() {
        let w = window();
        let n = normalize(&w, &stats());
        let raw = w.last();
        let scaled = n.last();

        assert!((scaled[column::SOIL] - (raw[column::SOIL] - 30.0) / 10.0).abs() < 1e-12);
        assert!((scaled[column::LUX] - (raw[column::LUX] - 5000.0) / 2500.0).abs() < 1e-12);
        assert!(
            (scaled[column::TEMPERATURE] - (raw[column::TEMPERATURE] - 20.0) / 4.0).abs() < 1e-12
        );
        assert!((scaled[column::HUMIDITY] - (raw[column::HUMIDITY] - 60.0) / 15.0).abs() < 1e-12);
    }

    #[test]
    fn normalize_leaves_time_columns() {
        let w = window();
        let n = normalize(&w, &stats());
        for (a, b) in w.rows().iter().zip(n.rows()) {
            assert_eq!(a[RAW_CHANNELS..FEATURE_COUNT], b[RAW_CHANNELS..FEATURE_COUNT]);
        }
    }

    #[test]
    fn normalize_is_pure() {
        let w = window();
        let before = w.clone();
        let _ = normalize(&w, &stats());
        assert_eq!(w, before);
    }

    #[test]
    fn soil_round_trip_is_identity() {
        let s = stats();
        let w = window();
        let n = normalize(&w, &s);
        for (raw, scaled) in w.column(column::SOIL).zip(n.column(column::SOIL)) {
            let back = s.denormalize_soil(scaled);
            assert!((back - raw).abs() < 1e-9, "raw={raw} back={back}");
        }
    }

    #[test]
    fn denormalize_formula() {
        assert_eq!(denormalize(-0.95, 30.0, 10.0), -0.95 * 10.0 + 30.0);
        assert_eq!(denormalize(0.0, 30.0, 10.0), 30.0);
    }

    #[test]
    fn parse_stats_json() {
        let s = NormalizationStats::from_json(
            r#"{"train_means": [30, 5000, 20, 60], "train_stds": [10, 2500, 4, 15]}"#,
        )
        .unwrap();
        assert_eq!(s, stats());
        assert_eq!(s.mean(column::LUX), 5000.0);
        assert_eq!(s.std(column::HUMIDITY), 15.0);
    }

    #[test]
    fn zero_std_rejected() {
        let err = NormalizationStats::new(&[1.0; 4], &[1.0, 0.0, 1.0, 1.0]).unwrap_err();
        assert!(format!("{err:#}").contains("lux: std is zero"), "{err:#}");
    }

    #[test]
    fn wrong_arity_rejected() {
        let err = NormalizationStats::new(&[1.0; 3], &[1.0; 5]).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("train_means has 3 values"), "{msg}");
        assert!(msg.contains("train_stds has 5 values"), "{msg}");
    }

    #[test]
    fn non_finite_rejected() {
        let err = NormalizationStats::new(&[f64::NAN, 1.0, 1.0, 1.0], &[1.0, 1.0, f64::INFINITY, 1.0])
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("soil_moisture_percent: mean NaN"), "{msg}");
        assert!(msg.contains("temperature: std inf"), "{msg}");
    }

    #[test]
    fn empty_stats_rejected() {
        // An empty object deserializes to neither field; an explicit empty
        // list reaches validation.
        assert!(NormalizationStats::from_json("{}").is_err());
        assert!(
            NormalizationStats::from_json(r#"{"train_means": [], "train_stds": []}"#).is_err()
        );
    }

    #[test]
    fn load_missing_file_is_error() {
        let dir = scratch_dir("stats-missing");
        let err = NormalizationStats::load(&dir.join("training_stats.json")).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read normalization stats"));
    }

    #[test]
    fn load_from_file() {
        let dir = scratch_dir("stats-load");
        let path = dir.join("training_stats.json");
        std::fs::write(
            &path,
            r#"{"train_means": [30.0, 5000.0, 20.0, 60.0], "train_stds": [10.0, 2500.0, 4.0, 15.0]}"#,
        )
        .unwrap();
        assert_eq!(NormalizationStats::load(&path).unwrap(), stats());
    }
}
