use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    /// An expected per-category source file is absent.
    #[error("Missing source file: {}", path.display())]
    MissingSourceFile { path: PathBuf },

    /// No analysis window can be resolved for the artist.
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid artist identifier: {0}")]
    InvalidArtist(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for ReportError {
    fn from(err: polars::error::PolarsError) -> Self {
        ReportError::Polars(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
