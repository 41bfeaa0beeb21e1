//! Calendar-month keys and the trailing analysis window.
//!
//! Every matrix in the crate is indexed by [`PeriodKey`] columns. The window is
//! resolved once per run from the aggregate extract and always holds exactly
//! [`WINDOW_MONTHS`] consecutive months ending at the latest parseable period.

use crate::error::{ReportError, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::{debug, warn};

/// Number of months in every analysis window.
pub const WINDOW_MONTHS: usize = 6;

/// Highest slot index for per-month detail files.
pub const MAX_DETAIL_SLOTS: u8 = 12;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%b %d, %Y", "%d/%m/%Y"];

/// A calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodKey {
    year: i32,
    month: u32,
}

impl PeriodKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Parse a `YYYY-MM` period label.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (year, month) = raw.split_once('-')?;
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return None;
        }
        Self::new(year.parse().ok()?, month.parse().ok()?)
    }

    /// Parse a publish timestamp or date into the month it falls in.
    ///
    /// Falls back to [`PeriodKey::parse`] so `YYYY-MM` values are accepted too.
    pub fn from_timestamp(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Self::new(dt.year(), dt.month());
        }
        for fmt in TIMESTAMP_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Self::new(dt.year(), dt.month());
            }
        }
        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
                return Self::new(date.year(), date.month());
            }
        }
        Self::parse(raw)
    }

    pub fn pred(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for PeriodKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The trailing window of consecutive months every output column is drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisWindow {
    periods: Vec<PeriodKey>,
}

impl AnalysisWindow {
    /// The [`WINDOW_MONTHS`] months ending at (and including) `anchor`.
    pub fn ending_at(anchor: PeriodKey) -> Self {
        let mut periods = Vec::with_capacity(WINDOW_MONTHS);
        let mut current = anchor;
        for _ in 0..WINDOW_MONTHS {
            periods.push(current);
            current = current.pred();
        }
        periods.reverse();
        Self { periods }
    }

    /// Resolve the window from the raw period labels of the aggregate extract.
    ///
    /// A leading `Total` sentinel row is skipped silently; any other label that
    /// does not parse is dropped with a warning.
    pub fn resolve<'a, I>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let mut anchor: Option<PeriodKey> = None;
        let mut seen = 0usize;
        for (idx, label) in labels.into_iter().enumerate() {
            seen += 1;
            let raw = label.unwrap_or("").trim();
            match PeriodKey::parse(raw) {
                Some(period) => {
                    anchor = Some(anchor.map_or(period, |a| a.max(period)));
                }
                None if idx == 0 && is_total_sentinel(raw) => {
                    debug!("skipping grand-total sentinel row");
                }
                None => {
                    warn!(row = idx, value = raw, "dropping row with unparseable period");
                }
            }
        }

        match anchor {
            Some(anchor) => Ok(Self::ending_at(anchor)),
            None if seen == 0 => Err(ReportError::DataUnavailable(
                "aggregate extract is empty".to_string(),
            )),
            None => Err(ReportError::DataUnavailable(
                "aggregate extract has no parseable period".to_string(),
            )),
        }
    }

    pub fn periods(&self) -> &[PeriodKey] {
        &self.periods
    }

    pub fn start(&self) -> PeriodKey {
        self.periods[0]
    }

    pub fn anchor(&self) -> PeriodKey {
        self.periods[self.periods.len() - 1]
    }

    pub fn contains(&self, period: &PeriodKey) -> bool {
        self.position(period).is_some()
    }

    pub fn position(&self, period: &PeriodKey) -> Option<usize> {
        self.periods.iter().position(|p| p == period)
    }

    /// Every detail slot paired with the window period it is expected to hold.
    /// Window position `i` maps to slot `i + 1`; later slots map to nothing.
    pub fn detail_slots(&self) -> impl Iterator<Item = (DetailSlot, Option<PeriodKey>)> + '_ {
        DetailSlot::all().map(move |slot| {
            let expected = self.periods.get(usize::from(slot.index()) - 1).copied();
            (slot, expected)
        })
    }
}

/// Treats the `Total` row some exports put first as a sentinel.
pub fn is_total_sentinel(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("total")
}

/// Index of one per-month detail file, `1..=MAX_DETAIL_SLOTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DetailSlot(u8);

impl DetailSlot {
    pub fn new(index: u8) -> Option<Self> {
        (1..=MAX_DETAIL_SLOTS).contains(&index).then_some(Self(index))
    }

    pub fn index(&self) -> u8 {
        self.0
    }

    /// All slots in ascending order.
    pub fn all() -> impl Iterator<Item = DetailSlot> {
        (1..=MAX_DETAIL_SLOTS).map(DetailSlot)
    }

    /// File name of this slot for the given category stem, e.g. `live_03.csv`.
    pub fn file_name(&self, stem: &str) -> String {
        format!("{}_{:02}.csv", stem, self.0)
    }
}
