//! Labelled metric rows over period columns.

use crate::error::{ReportError, Result};
use crate::period::PeriodKey;
use std::collections::HashMap;

/// One named row of a [`MetricMatrix`]. `None` cells are null placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub label: String,
    pub cells: Vec<Option<f64>>,
}

impl MetricRow {
    pub fn new(label: impl Into<String>, cells: Vec<Option<f64>>) -> Self {
        Self { label: label.into(), cells }
    }

    /// A fully populated row.
    pub fn dense(label: impl Into<String>, values: Vec<f64>) -> Self {
        Self::new(label, values.into_iter().map(Some).collect())
    }

    pub fn zeros(label: impl Into<String>, width: usize) -> Self {
        Self::dense(label, vec![0.0; width])
    }

    /// Cell values with nulls read as zero.
    pub fn values(&self) -> Vec<f64> {
        self.cells.iter().map(|c| c.unwrap_or(0.0)).collect()
    }
}

/// Metric rows × period columns.
///
/// Column order is whatever the matrix was built with; the loader always hands
/// out ascending periods. Row lookup is by label, never by position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricMatrix {
    periods: Vec<PeriodKey>,
    rows: Vec<MetricRow>,
}

impl MetricMatrix {
    pub fn new(periods: Vec<PeriodKey>) -> Self {
        Self { periods, rows: Vec::new() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn periods(&self) -> &[PeriodKey] {
        &self.periods
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.label.as_str())
    }

    pub fn width(&self) -> usize {
        self.periods.len()
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.periods.is_empty()
    }

    /// Append a row; its cell count must match the column count.
    pub fn push_row(&mut self, row: MetricRow) -> Result<()> {
        if row.cells.len() != self.periods.len() {
            return Err(ReportError::ShapeMismatch(format!(
                "row '{}' has {} cells, matrix has {} columns",
                row.label,
                row.cells.len(),
                self.periods.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn row(&self, label: &str) -> Option<&MetricRow> {
        self.rows.iter().find(|r| r.label == label)
    }

    pub fn cell(&self, label: &str, period: &PeriodKey) -> Option<f64> {
        let col = self.periods.iter().position(|p| p == period)?;
        self.row(label).and_then(|r| r.cells[col])
    }

    /// Copy of this matrix laid out on `periods`. Columns absent here become
    /// null cells; columns not in `periods` are dropped.
    pub fn reindex(&self, periods: &[PeriodKey]) -> MetricMatrix {
        let positions: HashMap<&PeriodKey, usize> =
            self.periods.iter().enumerate().map(|(i, p)| (p, i)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let cells = periods
                    .iter()
                    .map(|p| positions.get(p).and_then(|&i| row.cells[i]))
                    .collect();
                MetricRow::new(row.label.clone(), cells)
            })
            .collect();
        MetricMatrix { periods: periods.to_vec(), rows }
    }

    /// Like [`reindex`](Self::reindex) but every null becomes zero.
    pub fn reindex_zero_filled(&self, periods: &[PeriodKey]) -> MetricMatrix {
        let mut out = self.reindex(periods);
        for row in &mut out.rows {
            for cell in row.cells.iter_mut().filter(|c| c.is_none()) {
                *cell = Some(0.0);
            }
        }
        out
    }

    /// Row values aligned to `periods`, nulls as zero. `None` when the label is absent.
    pub fn aligned_values(&self, label: &str, periods: &[PeriodKey]) -> Option<Vec<f64>> {
        let row = self.row(label)?;
        Some(
            periods
                .iter()
                .map(|p| {
                    self.periods
                        .iter()
                        .position(|q| q == p)
                        .and_then(|i| row.cells[i])
                        .unwrap_or(0.0)
                })
                .collect(),
        )
    }

    /// Elementwise sum of several matrices on `periods`, outer-joined on labels.
    /// Missing rows and columns count as zero.
    pub fn sum_aligned(parts: &[&MetricMatrix], periods: &[PeriodKey]) -> MetricMatrix {
        let mut out = MetricMatrix::new(periods.to_vec());
        for part in parts {
            let aligned = part.reindex_zero_filled(periods);
            for row in aligned.rows {
                match out.rows.iter_mut().find(|r| r.label == row.label) {
                    Some(existing) => {
                        for (acc, add) in existing.cells.iter_mut().zip(row.cells) {
                            *acc = Some(acc.unwrap_or(0.0) + add.unwrap_or(0.0));
                        }
                    }
                    None => out.rows.push(row),
                }
            }
        }
        out
    }

    /// Dense copy of all cells, nulls as zero.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(MetricRow::values).collect()
    }

    /// Append a zero row for every label not already present.
    pub fn fill_missing_rows<'a, I>(&mut self, labels: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for label in labels {
            if self.row(label).is_none() {
                self.rows.push(MetricRow::zeros(label, self.periods.len()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(y: i32, m: u32) -> PeriodKey {
        PeriodKey::new(y, m).unwrap()
    }

    fn sample() -> MetricMatrix {
        let mut m = MetricMatrix::new(vec![key(2024, 1), key(2024, 3)]);
        m.push_row(MetricRow::new("Views", vec![Some(10.0), None])).unwrap();
        m.push_row(MetricRow::dense("Revenue", vec![1.0, 3.0])).unwrap();
        m
    }

    #[test]
    fn test_push_row_rejects_wrong_width() {
        let mut m = sample();
        let err = m.push_row(MetricRow::dense("Bad", vec![1.0])).unwrap_err();
        assert!(matches!(err, ReportError::ShapeMismatch(_)));
    }

    #[test]
    fn test_reindex_inserts_null_columns() {
        let periods = vec![key(2024, 1), key(2024, 2), key(2024, 3)];
        let m = sample().reindex(&periods);
        assert_eq!(m.width(), 3);
        assert_eq!(m.row("Revenue").unwrap().cells, vec![Some(1.0), None, Some(3.0)]);

        let z = sample().reindex_zero_filled(&periods);
        assert_eq!(z.row("Views").unwrap().cells, vec![Some(10.0), Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_fill_missing_rows_keeps_existing() {
        let mut m = sample();
        m.fill_missing_rows(["Revenue", "Likes"]);
        assert_eq!(m.height(), 3);
        assert_eq!(m.row("Revenue").unwrap().values(), vec![1.0, 3.0]);
        assert_eq!(m.row("Likes").unwrap().cells, vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_aligned_values_by_label() {
        let periods = vec![key(2024, 3), key(2024, 4)];
        let m = sample();
        assert_eq!(m.aligned_values("Revenue", &periods), Some(vec![3.0, 0.0]));
        assert_eq!(m.aligned_values("Missing", &periods), None);
    }

    #[test]
    fn test_sum_aligned_outer_joins_labels() {
        let periods = vec![key(2024, 1), key(2024, 2), key(2024, 3)];
        let mut other = MetricMatrix::new(vec![key(2024, 2)]);
        other.push_row(MetricRow::dense("Views", vec![5.0])).unwrap();
        other.push_row(MetricRow::dense("Likes", vec![7.0])).unwrap();

        let a = sample();
        let total = MetricMatrix::sum_aligned(&[&a, &other], &periods);
        assert_eq!(total.height(), 3);
        assert_eq!(total.row("Views").unwrap().values(), vec![10.0, 5.0, 0.0]);
        assert_eq!(total.row("Likes").unwrap().values(), vec![0.0, 7.0, 0.0]);
    }
}
