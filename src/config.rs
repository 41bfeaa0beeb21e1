//! Run configuration: JSON file, `.env`/environment overrides, then CLI flags.

use crate::error::{ReportError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_DATA_DIR: &str = "REPORT_DATA_DIR";
pub const ENV_OUTPUT_DIR: &str = "REPORT_OUTPUT_DIR";
pub const ENV_CURRENCY: &str = "REPORT_CURRENCY";

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Settings shared by every artist of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSettings {
    /// Root holding one extract directory per artist.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Currency money columns are expected in; others only warn.
    #[serde(default = "default_currency")]
    pub settlement_currency: String,
    #[serde(default)]
    pub write_csv_sheets: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
            settlement_currency: default_currency(),
            write_csv_sheets: false,
        }
    }
}

impl ReportSettings {
    /// Load from an optional JSON file, then apply the process environment
    /// (after reading `.env`, if present).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(settings.with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReportError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ReportError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Apply `REPORT_*` overrides through `lookup`.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(dir) = value(ENV_DATA_DIR) {
            debug!(data_dir = dir.as_str(), "data dir from environment");
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = value(ENV_OUTPUT_DIR) {
            debug!(output_dir = dir.as_str(), "output dir from environment");
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(currency) = value(ENV_CURRENCY) {
            self.settlement_currency = currency.trim().to_uppercase();
        }
        self
    }

    /// Per-artist run configuration; the artist must name a single directory.
    pub fn for_artist(&self, artist: &str) -> Result<RunConfig> {
        validate_artist(artist)?;
        Ok(RunConfig {
            artist: artist.to_string(),
            data_dir: self.data_dir.clone(),
            output_dir: self.output_dir.clone(),
            settlement_currency: self.settlement_currency.clone(),
            write_csv_sheets: self.write_csv_sheets,
        })
    }
}

/// Everything one artist's run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub artist: String,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub settlement_currency: String,
    pub write_csv_sheets: bool,
}

impl RunConfig {
    pub fn new(artist: &str, data_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        ReportSettings {
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
            ..ReportSettings::default()
        }
        .for_artist(artist)
    }

    /// `<data_dir>/<artist>`.
    pub fn artist_dir(&self) -> PathBuf {
        self.data_dir.join(&self.artist)
    }
}

fn validate_artist(artist: &str) -> Result<()> {
    let trimmed = artist.trim();
    if trimmed.is_empty()
        || trimmed != artist
        || artist == "."
        || artist == ".."
        || artist.contains(['/', '\\'])
    {
        return Err(ReportError::InvalidArtist(artist.to_string()));
    }
    Ok(())
}
