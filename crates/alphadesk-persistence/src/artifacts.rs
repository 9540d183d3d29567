//! Weight artifact files
//!
//! Each run writes its target weights to `weights_YYYYMMDD.json` so
//! downstream jobs can consume the book without a database connection. The
//! copy-forward path lets a failed run fall back to the previous day's file.

use crate::Result;
use alphadesk_core::{PersistenceError, TargetWeights};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct WeightArtifact {
    date: NaiveDate,
    run_id: String,
    weights: BTreeMap<String, f64>,
    /// Set when the file was copied forward from an earlier date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    copied_from: Option<NaiveDate>,
}

/// Filesystem store for daily weight files.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("weights_{}.json", date.format("%Y%m%d")))
    }

    /// Write the weights file for a date, replacing any earlier one.
    pub fn write_weights(
        &self,
        date: NaiveDate,
        run_id: &str,
        weights: &TargetWeights,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let artifact = WeightArtifact {
            date,
            run_id: run_id.to_string(),
            weights: weights.as_map().clone(),
            copied_from: None,
        };
        let path = self.path_for(date);
        fs::write(&path, serde_json::to_string_pretty(&artifact)?)?;
        info!(path = %path.display(), positions = weights.len(), "Wrote weight artifact");
        Ok(path)
    }

    /// Load the weights file for a date.
    pub fn load_weights(&self, date: NaiveDate) -> Result<TargetWeights> {
        let path = self.path_for(date);
        let artifact = Self::read_artifact(&path)?;
        Ok(TargetWeights::new(artifact.weights))
    }

    pub fn exists(&self, date: NaiveDate) -> bool {
        self.path_for(date).exists()
    }

    /// Copy the most recent earlier weights file to `date`.
    ///
    /// Scans back up to `max_lookback_days` calendar days so a weekend or
    /// holiday gap does not defeat the fallback. Returns the source date.
    pub fn copy_forward(&self, date: NaiveDate, max_lookback_days: u32) -> Result<NaiveDate> {
        for offset in 1..=max_lookback_days as i64 {
            let source_date = date - chrono::Duration::days(offset);
            let source = self.path_for(source_date);
            if !source.exists() {
                continue;
            }

            let mut artifact = Self::read_artifact(&source)?;
            artifact.copied_from = Some(artifact.copied_from.unwrap_or(source_date));
            artifact.date = date;
            let target = self.path_for(date);
            fs::write(&target, serde_json::to_string_pretty(&artifact)?)?;
            warn!(
                from = %source_date,
                to = %date,
                "Copied stale weight artifact forward"
            );
            return Ok(source_date);
        }

        Err(PersistenceError::NotFound(format!(
            "no weight artifact within {max_lookback_days} days before {date}"
        )))
    }

    fn read_artifact(path: &Path) -> Result<WeightArtifact> {
        if !path.exists() {
            return Err(PersistenceError::NotFound(path.display().to_string()));
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
