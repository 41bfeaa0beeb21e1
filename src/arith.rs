//! Zero-safe division and label-based subtraction.
//!
//! Every ratio and every "total minus part" in the derivation engine goes
//! through these two primitives.

use crate::error::{ReportError, Result};
use crate::matrix::{MetricMatrix, MetricRow};

/// Operand of [`safe_divide`]: a scalar, a vector, or a row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
}

impl Values {
    pub fn into_vector(self) -> Option<Vec<f64>> {
        match self {
            Values::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_matrix(self) -> Option<Vec<Vec<f64>>> {
        match self {
            Values::Matrix(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Values::Scalar(x) => Some(*x),
            _ => None,
        }
    }
}

impl From<f64> for Values {
    fn from(x: f64) -> Self {
        Values::Scalar(x)
    }
}

impl From<Vec<f64>> for Values {
    fn from(v: Vec<f64>) -> Self {
        Values::Vector(v)
    }
}

impl From<&[f64]> for Values {
    fn from(v: &[f64]) -> Self {
        Values::Vector(v.to_vec())
    }
}

impl From<Vec<Vec<f64>>> for Values {
    fn from(m: Vec<Vec<f64>>) -> Self {
        Values::Matrix(m)
    }
}

/// `n / d`, or 0 when `d` is zero or NaN or the quotient is not finite.
#[inline]
pub fn safe_div(n: f64, d: f64) -> f64 {
    if d == 0.0 || d.is_nan() {
        return 0.0;
    }
    let q = n / d;
    if q.is_finite() {
        q
    } else {
        0.0
    }
}

fn divide_slice(num: &[f64], den: &[f64]) -> Vec<f64> {
    num.iter().zip(den).map(|(&n, &d)| safe_div(n, d)).collect()
}

fn shape_error(num: &Values, den: &Values) -> ReportError {
    fn describe(v: &Values) -> String {
        match v {
            Values::Scalar(_) => "scalar".to_string(),
            Values::Vector(v) => format!("vector[{}]", v.len()),
            Values::Matrix(m) => format!(
                "matrix[{}x{}]",
                m.len(),
                m.first().map_or(0, |r| r.len())
            ),
        }
    }
    ReportError::ShapeMismatch(format!(
        "cannot divide {} by {}",
        describe(num),
        describe(den)
    ))
}

/// Elementwise division where a zero or NaN denominator yields 0.
///
/// Matrix ÷ vector broadcasts per row when the vector length equals the row
/// count (each row divided by its own scalar), otherwise per column when it
/// equals the column count. Row broadcasting wins for square matrices.
pub fn safe_divide(numerator: &Values, denominator: &Values) -> Result<Values> {
    use Values::*;

    let out = match (numerator, denominator) {
        (Scalar(n), Scalar(d)) => Scalar(safe_div(*n, *d)),
        (Vector(n), Scalar(d)) => Vector(n.iter().map(|&x| safe_div(x, *d)).collect()),
        (Scalar(n), Vector(d)) => Vector(d.iter().map(|&y| safe_div(*n, y)).collect()),
        (Vector(n), Vector(d)) if n.len() == d.len() => Vector(divide_slice(n, d)),
        (Matrix(n), Scalar(d)) => Matrix(
            n.iter()
                .map(|row| row.iter().map(|&x| safe_div(x, *d)).collect())
                .collect(),
        ),
        (Matrix(n), Vector(d)) if n.len() == d.len() => Matrix(
            n.iter()
                .zip(d)
                .map(|(row, &dv)| row.iter().map(|&x| safe_div(x, dv)).collect())
                .collect(),
        ),
        (Matrix(n), Vector(d)) if n.iter().all(|row| row.len() == d.len()) => {
            Matrix(n.iter().map(|row| divide_slice(row, d)).collect())
        }
        (Matrix(n), Matrix(d))
            if n.len() == d.len() && n.iter().zip(d).all(|(a, b)| a.len() == b.len()) =>
        {
            Matrix(n.iter().zip(d).map(|(a, b)| divide_slice(a, b)).collect())
        }
        _ => return Err(shape_error(numerator, denominator)),
    };
    Ok(out)
}

/// Vector ÷ vector shorthand; length mismatches fall back to a zero vector
/// of the numerator's length.
pub fn ratio(numerator: &[f64], denominator: &[f64]) -> Vec<f64> {
    safe_divide(&Values::from(numerator), &Values::from(denominator))
        .ok()
        .and_then(Values::into_vector)
        .unwrap_or_else(|| vec![0.0; numerator.len()])
}

/// `a[label_a] − b[label_b]` on `a`'s columns, emitted as `out_label`.
///
/// `b` is reindexed to `a`'s periods with missing columns read as zero. If
/// either row is absent the result is an all-zero row of `a`'s width.
pub fn subtract_by_label(
    a: &MetricMatrix,
    label_a: &str,
    b: &MetricMatrix,
    label_b: &str,
    out_label: &str,
) -> MetricRow {
    let periods = a.periods();
    match (
        a.aligned_values(label_a, periods),
        b.aligned_values(label_b, periods),
    ) {
        (Some(lhs), Some(rhs)) => MetricRow::dense(
            out_label,
            lhs.iter().zip(&rhs).map(|(x, y)| x - y).collect(),
        ),
        _ => MetricRow::zeros(out_label, periods.len()),
    }
}
