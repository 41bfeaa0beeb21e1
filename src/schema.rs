//! Canonical column sets per content category and the normalizer that
//! enforces them on raw extracts.

use crate::error::Result;
use lazy_static::lazy_static;
use polars::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

pub const DATE: &str = "Date";
pub const PUBLISH_TIME: &str = "Video publish time";
pub const CONTENT_ID: &str = "Content";
pub const VIDEO_TITLE: &str = "Video title";

pub const POST_LIKE_RATE: &str = "Post like rate (%)";
pub const POST_LIKES: &str = "Post likes";
pub const POST_IMPRESSIONS: &str = "Post impressions";
pub const UNIQUE_VIEWERS: &str = "Unique viewers";
pub const COMMENTS: &str = "Comments added";
pub const SHARES: &str = "Shares";
pub const LIKES: &str = "Likes";
pub const RPM: &str = "RPM (USD)";
pub const CTR: &str = "Impressions click-through rate (%)";
pub const IMPRESSIONS: &str = "Impressions";
pub const VIDEOS_PUBLISHED: &str = "Videos published";
pub const SUBSCRIBERS: &str = "Subscribers";
pub const AVG_PERCENT_VIEWED: &str = "Average percentage viewed (%)";
pub const VIEWS: &str = "Views";
pub const WATCH_TIME: &str = "Watch time (hours)";
pub const AVG_VIEW_DURATION: &str = "Average view duration";
pub const REVENUE: &str = "Estimated revenue (USD)";
pub const CPM: &str = "CPM (USD)";
pub const PLAYBACK_CPM: &str = "Playback-based CPM (USD)";
pub const POST_REPLIES: &str = "Post replies";
pub const SUBSCRIBERS_GAINED: &str = "Subscribers gained";
pub const SUBSCRIBERS_LOST: &str = "Subscribers lost";

pub const TRAFFIC_SOURCE: &str = "Traffic source";
pub const POST_PUBLISH_TIME: &str = "Post publish time";

/// How a raw cell is interpreted by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Plain number, thousands separators allowed.
    Number,
    /// Percentage points; stored as a fraction.
    Percent,
    /// `H:MM:SS`, `M:SS`, or a number; stored in seconds.
    Duration,
    /// `YYYY-MM` period label.
    Period,
    /// Publish timestamp.
    Timestamp,
    Text,
}

/// How detail rows of one period collapse into a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Sum,
    Mean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ValueKind,
    pub reducer: Reducer,
}

impl ColumnSpec {
    const fn new(name: &'static str, kind: ValueKind, reducer: Reducer) -> Self {
        Self { name, kind, reducer }
    }

    pub fn is_metric(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::Number | ValueKind::Percent | ValueKind::Duration
        )
    }
}

const fn sum(name: &'static str) -> ColumnSpec {
    ColumnSpec::new(name, ValueKind::Number, Reducer::Sum)
}

const fn mean(name: &'static str, kind: ValueKind) -> ColumnSpec {
    ColumnSpec::new(name, kind, Reducer::Mean)
}

const fn key(name: &'static str, kind: ValueKind) -> ColumnSpec {
    ColumnSpec::new(name, kind, Reducer::Sum)
}

const AGGREGATE_COLUMNS: &[ColumnSpec] = &[
    key(DATE, ValueKind::Period),
    mean(POST_LIKE_RATE, ValueKind::Percent),
    sum(POST_LIKES),
    sum(POST_IMPRESSIONS),
    sum(UNIQUE_VIEWERS),
    sum(COMMENTS),
    sum(SHARES),
    sum(LIKES),
    mean(RPM, ValueKind::Number),
    mean(CTR, ValueKind::Percent),
    sum(IMPRESSIONS),
    sum(VIDEOS_PUBLISHED),
    sum(SUBSCRIBERS),
    mean(AVG_PERCENT_VIEWED, ValueKind::Percent),
    sum(VIEWS),
    sum(WATCH_TIME),
    mean(AVG_VIEW_DURATION, ValueKind::Duration),
    sum(REVENUE),
    mean(CPM, ValueKind::Number),
    mean(PLAYBACK_CPM, ValueKind::Number),
    sum(POST_REPLIES),
    sum(SUBSCRIBERS_GAINED),
    sum(SUBSCRIBERS_LOST),
];

const CATEGORY_COLUMNS: &[ColumnSpec] = &[
    key(DATE, ValueKind::Period),
    sum(UNIQUE_VIEWERS),
    sum(COMMENTS),
    sum(SHARES),
    sum(LIKES),
    mean(RPM, ValueKind::Number),
    mean(CTR, ValueKind::Percent),
    sum(IMPRESSIONS),
    sum(VIDEOS_PUBLISHED),
    sum(SUBSCRIBERS),
    mean(AVG_PERCENT_VIEWED, ValueKind::Percent),
    sum(VIEWS),
    sum(WATCH_TIME),
    mean(AVG_VIEW_DURATION, ValueKind::Duration),
    sum(REVENUE),
];

const DETAIL_COLUMNS: &[ColumnSpec] = &[
    key(PUBLISH_TIME, ValueKind::Timestamp),
    key(CONTENT_ID, ValueKind::Text),
    key(VIDEO_TITLE, ValueKind::Text),
    sum(UNIQUE_VIEWERS),
    sum(COMMENTS),
    sum(SHARES),
    sum(LIKES),
    mean(RPM, ValueKind::Number),
    mean(CTR, ValueKind::Percent),
    sum(IMPRESSIONS),
    sum(SUBSCRIBERS),
    mean(AVG_PERCENT_VIEWED, ValueKind::Percent),
    sum(VIEWS),
    sum(WATCH_TIME),
    mean(AVG_VIEW_DURATION, ValueKind::Duration),
    sum(REVENUE),
];

const TRAFFIC_COLUMNS: &[ColumnSpec] = &[
    key(DATE, ValueKind::Period),
    key(TRAFFIC_SOURCE, ValueKind::Text),
    sum(VIEWS),
];

const COMMUNITY_COLUMNS: &[ColumnSpec] = &[key(POST_PUBLISH_TIME, ValueKind::Timestamp)];

/// Content categories; each owns its source files and canonical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentCategory {
    Aggregate,
    LongForm,
    Live,
    ShortForm,
}

impl ContentCategory {
    /// The three publishable content types, in report order.
    pub const CONTENT: [ContentCategory; 3] = [
        ContentCategory::LongForm,
        ContentCategory::Live,
        ContentCategory::ShortForm,
    ];

    /// File stem of the category's aggregate extract and detail slots.
    pub fn file_stem(&self) -> &'static str {
        match self {
            ContentCategory::Aggregate => "total",
            ContentCategory::LongForm => "long_form",
            ContentCategory::Live => "live",
            ContentCategory::ShortForm => "short_form",
        }
    }

    pub fn aggregate_file(&self) -> String {
        format!("{}.csv", self.file_stem())
    }

    /// Canonical columns of the rolled-up per-period extract.
    pub fn aggregate_schema(&self) -> &'static [ColumnSpec] {
        match self {
            ContentCategory::Aggregate => AGGREGATE_COLUMNS,
            _ => CATEGORY_COLUMNS,
        }
    }

    /// Canonical columns of the per-item detail files.
    pub fn detail_schema(&self) -> &'static [ColumnSpec] {
        DETAIL_COLUMNS
    }

    /// Singular name used in derived row labels.
    pub fn content_label(&self) -> &'static str {
        match self {
            ContentCategory::Aggregate => "Total",
            ContentCategory::LongForm => "Long-form",
            ContentCategory::Live => "Live",
            ContentCategory::ShortForm => "Short",
        }
    }

    /// Plural name used in derived row labels.
    pub fn plural_label(&self) -> &'static str {
        match self {
            ContentCategory::Aggregate => "Total",
            ContentCategory::LongForm => "Long-form",
            ContentCategory::Live => "Lives",
            ContentCategory::ShortForm => "Shorts",
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

pub fn traffic_schema() -> &'static [ColumnSpec] {
    TRAFFIC_COLUMNS
}

pub fn community_schema() -> &'static [ColumnSpec] {
    COMMUNITY_COLUMNS
}

lazy_static! {
    static ref CURRENCY_HEADER: Regex =
        Regex::new(r"^(?:Estimated revenue|RPM|CPM|Playback-based CPM) \((?P<cur>[A-Z]{3})\)$")
            .expect("currency header pattern is valid");
}

/// Currencies found in money column headers that differ from `settlement`.
pub fn foreign_currencies(columns: &[&str], settlement: &str) -> Vec<String> {
    let mut found: Vec<String> = columns
        .iter()
        .filter_map(|c| CURRENCY_HEADER.captures(c))
        .map(|caps| caps["cur"].to_string())
        .filter(|cur| !cur.eq_ignore_ascii_case(settlement))
        .collect();
    found.sort();
    found.dedup();
    found
}

/// Enforce `canonical` on a raw extract.
///
/// The result holds every canonical column in declared order (absent ones
/// null-filled as strings) followed by the extra columns in their original
/// order. Rows are untouched. A money column in a currency other than
/// `settlement` only produces a warning.
pub fn normalize_schema(
    df: DataFrame,
    canonical: &[ColumnSpec],
    settlement: &str,
    source: &str,
) -> Result<DataFrame> {
    let original: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let names: Vec<&str> = original.iter().map(String::as_str).collect();
    for currency in foreign_currencies(&names, settlement) {
        warn!(
            source,
            currency = currency.as_str(),
            settlement,
            "⚠️ extract reports money in a different currency than the settlement currency"
        );
    }

    let present: HashSet<&str> = names.iter().copied().collect();
    let height = df.height();
    let mut df = df;
    for spec in canonical.iter().filter(|s| !present.contains(s.name)) {
        debug!(source, column = spec.name, "null-filling missing canonical column");
        df.with_column(Series::full_null(spec.name, height, &DataType::String))?;
    }

    let canonical_names: HashSet<&str> = canonical.iter().map(|s| s.name).collect();
    let ordered: Vec<String> = canonical
        .iter()
        .map(|s| s.name.to_string())
        .chain(
            original
                .iter()
                .filter(|c| !canonical_names.contains(c.as_str()))
                .cloned(),
        )
        .collect();

    Ok(df.select(ordered)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_missing_and_keeps_extras_last() {
        let raw = df![
            "Extra note" => ["a", "b"],
            VIEWS => ["10", "20"],
            DATE => ["2024-01", "2024-02"],
        ]
        .unwrap();

        let schema = ContentCategory::LongForm.aggregate_schema();
        let out = normalize_schema(raw, schema, "USD", "long_form.csv").unwrap();

        let names: Vec<&str> = out.get_column_names();
        assert_eq!(names.len(), schema.len() + 1);
        assert_eq!(names[0], DATE);
        assert_eq!(*names.last().unwrap(), "Extra note");
        assert_eq!(out.height(), 2);
        assert_eq!(out.column(REVENUE).unwrap().null_count(), 2);
        assert_eq!(out.column(VIEWS).unwrap().str().unwrap().get(1), Some("20"));
    }

    #[test]
    fn test_normalize_never_drops_rows_of_empty_extract() {
        let raw = df![DATE => Vec::<String>::new()].unwrap();
        let out = normalize_schema(raw, AGGREGATE_COLUMNS, "USD", "total.csv").unwrap();
        assert_eq!(out.height(), 0);
        assert_eq!(out.width(), AGGREGATE_COLUMNS.len());
    }

    #[test]
    fn test_foreign_currency_detection() {
        let cols = ["Date", "Estimated revenue (BRL)", "RPM (BRL)", "CPM (USD)"];
        assert_eq!(foreign_currencies(&cols, "USD"), vec!["BRL".to_string()]);
        assert!(foreign_currencies(&cols[..1], "USD").is_empty());
        assert!(foreign_currencies(&["CPM (USD)"], "usd").is_empty());
    }

    #[test]
    fn test_category_files() {
        assert_eq!(ContentCategory::Aggregate.aggregate_file(), "total.csv");
        assert_eq!(ContentCategory::ShortForm.aggregate_file(), "short_form.csv");
        assert!(ContentCategory::Live
            .detail_schema()
            .iter()
            .all(|s| s.name != VIDEOS_PUBLISHED));
    }
}
