//! Aggregation of derived rows into the three report tables, and their
//! persistence as a JSON artifact with optional CSV sheets.

use crate::arith::{safe_divide, Values};
use crate::derive::is_duration_row;
use crate::error::{ReportError, Result};
use crate::matrix::MetricMatrix;
use crate::period::PeriodKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const MEAN_COLUMN: &str = "Mean";
pub const LABEL_COLUMN: &str = "Metric";

/// One cell of a persisted sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Null,
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Cell::Number(x) => x.to_string(),
            Cell::Text(s) => s.clone(),
            Cell::Null => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetRow {
    pub label: String,
    pub cells: Vec<Cell>,
}

/// A labelled table: `columns` name the cells of every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub columns: Vec<String>,
    pub rows: Vec<SheetRow>,
}

impl Sheet {
    pub fn row(&self, label: &str) -> Option<&SheetRow> {
        self.rows.iter().find(|r| r.label == label)
    }

    /// Cell of `label` under `column`.
    pub fn cell(&self, label: &str, column: &str) -> Option<&Cell> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.row(label).and_then(|r| r.cells.get(idx))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheets {
    pub values: Sheet,
    pub deviation_from_mean: Sheet,
    pub deviation_from_previous: Sheet,
}

/// The persisted report for one artist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub artist: String,
    pub periods: Vec<String>,
    pub sheets: Sheets,
}

/// Derived rows with their period mean and both deviation tables.
#[derive(Debug, Clone)]
pub struct ReportTables {
    pub periods: Vec<PeriodKey>,
    pub labels: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
    pub means: Vec<f64>,
    pub deviation_from_mean: Vec<Vec<f64>>,
    pub deviation_from_previous: Vec<Vec<f64>>,
}

impl ReportTables {
    /// Mean over every window column (nulls as zero), then
    /// `(value − mean) / mean` and `(value − previous) / previous`, both zero
    /// wherever the denominator is zero. The first period has no previous
    /// value and always deviates by zero.
    pub fn build(derived: &MetricMatrix) -> Result<Self> {
        let dense = derived.to_dense();
        let width = derived.width();

        let means: Vec<f64> = dense
            .iter()
            .map(|row| {
                if width == 0 {
                    0.0
                } else {
                    row.iter().sum::<f64>() / width as f64
                }
            })
            .collect();

        let from_mean: Vec<Vec<f64>> = dense
            .iter()
            .zip(&means)
            .map(|(row, mean)| row.iter().map(|v| v - mean).collect())
            .collect();
        let deviation_from_mean = divide_matrix(from_mean, Values::from(means.clone()), dense.len())?;

        let previous: Vec<Vec<f64>> = dense
            .iter()
            .map(|row| {
                std::iter::once(f64::NAN)
                    .chain(row.iter().copied().take(width.saturating_sub(1)))
                    .take(width)
                    .collect()
            })
            .collect();
        let from_previous: Vec<Vec<f64>> = dense
            .iter()
            .zip(&previous)
            .map(|(row, prev)| row.iter().zip(prev).map(|(v, p)| v - p).collect())
            .collect();
        let deviation_from_previous =
            divide_matrix(from_previous, Values::from(previous), dense.len())?;

        Ok(Self {
            periods: derived.periods().to_vec(),
            labels: derived.labels().map(str::to_string).collect(),
            values: derived.rows().iter().map(|r| r.cells.clone()).collect(),
            means,
            deviation_from_mean,
            deviation_from_previous,
        })
    }

    fn period_columns(&self) -> Vec<String> {
        self.periods.iter().map(PeriodKey::to_string).collect()
    }

    /// Values with the leading mean column; duration rows render as clock time.
    pub fn values_sheet(&self) -> Sheet {
        let mut columns = vec![MEAN_COLUMN.to_string()];
        columns.extend(self.period_columns());

        let rows = self
            .labels
            .iter()
            .zip(&self.values)
            .zip(&self.means)
            .map(|((label, cells), mean)| {
                let duration = is_duration_row(label);
                let period_cells = cells.iter().map(|cell| match (cell, duration) {
                    (cell, true) => Cell::Text(format_duration(cell.unwrap_or(0.0))),
                    (Some(v), false) => Cell::Number(*v),
                    (None, false) => Cell::Null,
                });
                SheetRow {
                    label: label.clone(),
                    cells: std::iter::once(Cell::Number(*mean)).chain(period_cells).collect(),
                }
            })
            .collect();
        Sheet { columns, rows }
    }

    pub fn deviation_from_mean_sheet(&self) -> Sheet {
        self.numeric_sheet(&self.deviation_from_mean)
    }

    pub fn deviation_from_previous_sheet(&self) -> Sheet {
        self.numeric_sheet(&self.deviation_from_previous)
    }

    fn numeric_sheet(&self, table: &[Vec<f64>]) -> Sheet {
        let rows = self
            .labels
            .iter()
            .zip(table)
            .map(|(label, row)| SheetRow {
                label: label.clone(),
                cells: row.iter().map(|v| Cell::Number(*v)).collect(),
            })
            .collect();
        Sheet {
            columns: self.period_columns(),
            rows,
        }
    }

    pub fn into_artifact(self, artist: &str) -> ReportArtifact {
        ReportArtifact {
            artist: artist.to_string(),
            periods: self.period_columns(),
            sheets: Sheets {
                values: self.values_sheet(),
                deviation_from_mean: self.deviation_from_mean_sheet(),
                deviation_from_previous: self.deviation_from_previous_sheet(),
            },
        }
    }
}

fn divide_matrix(numerator: Vec<Vec<f64>>, denominator: Values, height: usize) -> Result<Vec<Vec<f64>>> {
    if height == 0 {
        return Ok(Vec::new());
    }
    safe_divide(&Values::from(numerator), &denominator)?
        .into_matrix()
        .ok_or_else(|| ReportError::ShapeMismatch("expected a matrix quotient".to_string()))
}

/// Seconds as `MM:SS`, or `HH:MM:SS` from one hour up.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

pub fn report_file_name(artist: &str) -> String {
    format!("report_{}.json", artist)
}

/// Write the artifact as `<output_dir>/report_<artist>.json`.
pub fn write_report(artifact: &ReportArtifact, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(report_file_name(&artifact.artist));
    let encoded = serde_json::to_string_pretty(artifact)?;
    std::fs::write(&path, encoded)?;
    info!("💾 Report written: {}", path.display());
    Ok(path)
}

/// Read an artifact written by [`write_report`].
pub fn read_report(path: &Path) -> Result<ReportArtifact> {
    let encoded = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&encoded)?)
}

/// Write each sheet as `<output_dir>/<artist>/<sheet>.csv`.
pub fn write_csv_sheets(artifact: &ReportArtifact, output_dir: &Path) -> Result<Vec<PathBuf>> {
    let dir = output_dir.join(&artifact.artist);
    std::fs::create_dir_all(&dir)?;

    let sheets = [
        ("values", &artifact.sheets.values),
        ("deviation_from_mean", &artifact.sheets.deviation_from_mean),
        ("deviation_from_previous", &artifact.sheets.deviation_from_previous),
    ];
    let mut written = Vec::with_capacity(sheets.len());
    for (name, sheet) in sheets {
        let path = dir.join(format!("{}.csv", name));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(std::iter::once(LABEL_COLUMN).chain(sheet.columns.iter().map(String::as_str)))?;
        for row in &sheet.rows {
            let record: Vec<String> = std::iter::once(row.label.clone())
                .chain(row.cells.iter().map(Cell::render))
                .collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;
        info!("📄 Sheet written: {}", path.display());
        written.push(path);
    }
    Ok(written)
}
