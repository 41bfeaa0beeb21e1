//! Per-category loading of aggregate extracts, new-content detail slots,
//! traffic-source breakdowns and community posts.
//!
//! Every matrix handed out here covers only periods inside the analysis
//! window, in ascending order, and may be missing any of them. Callers
//! reindex before combining.

use crate::error::{ReportError, Result};
use crate::matrix::{MetricMatrix, MetricRow};
use crate::period::{is_total_sentinel, AnalysisWindow, PeriodKey};
use crate::schema::{self, ColumnSpec, ContentCategory, Reducer, ValueKind};
use itertools::Itertools;
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Label of the community post count row.
pub const COMMUNITY_POSTS: &str = "Community posts";

pub const SUBSCRIBER_COUNT_FILE: &str = "subscribers.txt";
pub const COMMUNITY_FILE: &str = "community.csv";

const PERIOD_COLUMN: &str = "__period";

/// Traffic-source extract file for a content category.
pub fn traffic_file(category: ContentCategory) -> String {
    format!("traffic_{}.csv", category.file_stem())
}

/// Read a CSV extract with every column as a string.
///
/// Returns `Ok(None)` when the file does not exist or is zero bytes long.
pub fn read_extract(path: &Path) -> Result<Option<DataFrame>> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(_) => {
            debug!(path = %path.display(), "extract not present");
            return Ok(None);
        }
    };
    if meta.len() == 0 {
        warn!(path = %path.display(), "extract is empty, treating as no data");
        return Ok(None);
    }

    info!("📂 Loading CSV: {}", path.display());
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()
        .map_err(|e| ReportError::Polars(format!("Failed to scan CSV {}: {}", path.display(), e)))?
        .collect()
        .map_err(|e| {
            ReportError::Polars(format!("Failed to collect CSV {}: {}", path.display(), e))
        })?;
    debug!(rows = df.height(), columns = df.width(), "loaded extract");
    Ok(Some(df))
}

/// Read an extract and enforce its canonical schema.
pub fn read_normalized(
    path: &Path,
    canonical: &[ColumnSpec],
    settlement: &str,
) -> Result<Option<DataFrame>> {
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match read_extract(path)? {
        Some(df) => Ok(Some(schema::normalize_schema(df, canonical, settlement, &source)?)),
        None => Ok(None),
    }
}

/// String cells of one column; nulls stay `None`.
pub fn string_cells(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df.column(name)?.cast(&DataType::String)?;
    let cells = series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    Ok(cells)
}

/// Parse a numeric cell. Thousands separators, a trailing `%` and blanks are
/// tolerated; blanks and placeholders yield `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a duration in `H:MM:SS`, `M:SS` or plain seconds into seconds.
pub fn parse_duration(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if !raw.contains(':') {
        return parse_number(raw);
    }
    let parts: Vec<f64> = raw
        .split(':')
        .map(|p| p.trim().parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [m, s] => Some(m * 60.0 + s),
        [h, m, s] => Some(h * 3600.0 + m * 60.0 + s),
        _ => None,
    }
}

/// Parse one cell according to its declared kind.
pub fn parse_cell(raw: Option<&str>, kind: ValueKind) -> Option<f64> {
    let raw = raw?;
    match kind {
        ValueKind::Number => parse_number(raw),
        ValueKind::Percent => parse_number(raw).map(|v| v / 100.0),
        ValueKind::Duration => parse_duration(raw),
        ValueKind::Period | ValueKind::Timestamp | ValueKind::Text => None,
    }
}

fn metric_columns(canonical: &[ColumnSpec]) -> impl Iterator<Item = &ColumnSpec> {
    canonical.iter().filter(|s| s.is_metric())
}

/// Loads every per-category source of one artist against a resolved window.
pub struct SourceLoader<'a> {
    artist_dir: PathBuf,
    window: &'a AnalysisWindow,
    settlement: String,
}

impl<'a> SourceLoader<'a> {
    pub fn new(artist_dir: PathBuf, window: &'a AnalysisWindow, settlement: &str) -> Self {
        Self {
            artist_dir,
            window,
            settlement: settlement.to_string(),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.artist_dir.join(file)
    }

    /// Optional extracts that cannot be read count as no data.
    fn read_optional(&self, path: &Path, canonical: &[ColumnSpec]) -> Option<DataFrame> {
        match read_normalized(path, canonical, &self.settlement) {
            Ok(df) => df,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable extract, treating as no data");
                None
            }
        }
    }

    /// Aggregate mode for a category file on disk. A missing file is fatal.
    pub fn load_aggregate(&self, category: ContentCategory) -> Result<MetricMatrix> {
        let path = self.path(&category.aggregate_file());
        let df = read_normalized(&path, category.aggregate_schema(), &self.settlement)?
            .ok_or(ReportError::MissingSourceFile { path })?;
        self.aggregate_from_frame(&df, category)
    }

    /// Aggregate mode over an already normalized frame: one column per window
    /// period, one row per canonical metric, percentages as fractions and
    /// durations in seconds.
    pub fn aggregate_from_frame(
        &self,
        df: &DataFrame,
        category: ContentCategory,
    ) -> Result<MetricMatrix> {
        let labels = string_cells(df, schema::DATE)?;
        let mut by_period: BTreeMap<PeriodKey, usize> = BTreeMap::new();
        for (idx, label) in labels.iter().enumerate() {
            let raw = label.as_deref().unwrap_or("");
            match PeriodKey::parse(raw) {
                Some(period) if self.window.contains(&period) => {
                    if by_period.contains_key(&period) {
                        warn!(%category, %period, "duplicate period row, keeping the first one");
                    } else {
                        by_period.insert(period, idx);
                    }
                }
                Some(period) => debug!(%category, %period, "period outside analysis window"),
                None if idx == 0 && is_total_sentinel(raw) => {}
                None => warn!(%category, row = idx, value = raw, "dropping row with unparseable period"),
            }
        }

        let periods: Vec<PeriodKey> = by_period.keys().copied().collect();
        let mut matrix = MetricMatrix::new(periods);
        for spec in metric_columns(category.aggregate_schema()) {
            let raw = string_cells(df, spec.name)?;
            let cells = by_period
                .values()
                .map(|&idx| parse_cell(raw[idx].as_deref(), spec.kind))
                .collect();
            matrix.push_row(MetricRow::new(spec.name, cells))?;
        }
        info!(%category, periods = matrix.width(), "loaded aggregate extract");
        Ok(matrix)
    }

    /// Detail mode: new-content items from every present slot file, bucketed by
    /// their own publish month and reduced per metric. No matching data gives
    /// an empty matrix; an unreadable slot is skipped.
    pub fn load_new_content(&self, category: ContentCategory) -> Result<MetricMatrix> {
        let canonical = category.detail_schema();
        let metrics: Vec<&ColumnSpec> = metric_columns(canonical).collect();

        let mut periods: Vec<String> = Vec::new();
        let mut keep: Vec<Option<bool>> = Vec::new();
        let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); metrics.len()];

        for (slot, expected) in self.window.detail_slots() {
            let path = self.path(&slot.file_name(category.file_stem()));
            let Some(df) = self.read_optional(&path, canonical) else {
                if let Some(period) = expected {
                    debug!(%category, %period, slot = slot.index(), "detail slot absent");
                }
                continue;
            };
            let published = string_cells(&df, schema::PUBLISH_TIME)?;
            let mut in_window = 0usize;
            for raw in &published {
                let period = raw.as_deref().and_then(PeriodKey::from_timestamp);
                if period.is_none() {
                    warn!(%category, slot = slot.index(), value = raw.as_deref().unwrap_or(""), "dropping item with unparseable publish time");
                }
                let inside = period.map_or(false, |p| self.window.contains(&p));
                in_window += inside as usize;
                keep.push(Some(inside));
                periods.push(period.map(|p| p.to_string()).unwrap_or_default());
            }
            for (spec, column) in metrics.iter().zip(values.iter_mut()) {
                let raw = string_cells(&df, spec.name)?;
                column.extend(raw.iter().map(|v| parse_cell(v.as_deref(), spec.kind)));
            }
            debug!(%category, slot = slot.index(), expected = ?expected, items = published.len(), in_window, "read detail slot");
        }

        if !keep.iter().any(|k| *k == Some(true)) {
            info!(%category, "no new content inside the analysis window");
            return Ok(MetricMatrix::empty());
        }

        let mut columns = vec![Series::new(PERIOD_COLUMN, periods)];
        for (spec, column) in metrics.iter().zip(values) {
            columns.push(Series::new(spec.name, column));
        }
        let mask: BooleanChunked = keep.into_iter().collect();
        let items = DataFrame::new(columns)?.filter(&mask)?;

        let aggs: Vec<Expr> = metrics
            .iter()
            .map(|spec| match spec.reducer {
                Reducer::Sum => col(spec.name).sum().alias(spec.name),
                Reducer::Mean => col(spec.name).mean().alias(spec.name),
            })
            .collect();
        let grouped = items
            .lazy()
            .group_by([col(PERIOD_COLUMN)])
            .agg(aggs)
            .collect()?;

        let mut order: Vec<(PeriodKey, usize)> = string_cells(&grouped, PERIOD_COLUMN)?
            .iter()
            .enumerate()
            .filter_map(|(i, label)| label.as_deref().and_then(PeriodKey::parse).map(|p| (p, i)))
            .collect();
        order.sort();

        let mut matrix = MetricMatrix::new(order.iter().map(|(p, _)| *p).collect());
        for spec in &metrics {
            let series = grouped.column(spec.name)?.cast(&DataType::Float64)?;
            let reduced = series.f64()?;
            let cells = order.iter().map(|&(_, i)| reduced.get(i)).collect();
            matrix.push_row(MetricRow::new(spec.name, cells))?;
        }
        info!(%category, periods = matrix.width(), "loaded new-content detail");
        Ok(matrix)
    }

    /// Traffic-source views as source rows × period columns. The first value
    /// wins when a (period, source) pair repeats. Missing or unreadable file →
    /// empty matrix.
    pub fn load_traffic_sources(&self, category: ContentCategory) -> Result<MetricMatrix> {
        let path = self.path(&traffic_file(category));
        let Some(df) = self.read_optional(&path, schema::traffic_schema()) else {
            debug!(%category, "no traffic-source extract");
            return Ok(MetricMatrix::empty());
        };

        let dates = string_cells(&df, schema::DATE)?;
        let sources = string_cells(&df, schema::TRAFFIC_SOURCE)?;
        let views = string_cells(&df, schema::VIEWS)?;

        let mut cells: HashMap<(String, PeriodKey), f64> = HashMap::new();
        let mut seen_periods: Vec<PeriodKey> = Vec::new();
        let mut seen_sources: Vec<String> = Vec::new();
        for ((date, source), view) in dates.iter().zip(&sources).zip(&views) {
            let Some(period) = date.as_deref().and_then(PeriodKey::parse) else {
                warn!(%category, value = date.as_deref().unwrap_or(""), "dropping traffic row with unparseable period");
                continue;
            };
            let Some(source) = source.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
                continue;
            };
            if !self.window.contains(&period) {
                continue;
            }
            let value = view.as_deref().and_then(parse_number).unwrap_or(0.0);
            cells.entry((source.to_string(), period)).or_insert(value);
            seen_periods.push(period);
            seen_sources.push(source.to_string());
        }

        let periods: Vec<PeriodKey> = seen_periods.into_iter().unique().sorted().collect();
        let mut matrix = MetricMatrix::new(periods.clone());
        for source in seen_sources.into_iter().unique() {
            let row = periods
                .iter()
                .map(|p| cells.get(&(source.clone(), *p)).copied())
                .collect();
            matrix.push_row(MetricRow::new(source, row))?;
        }
        Ok(matrix)
    }

    /// Community posts counted per publish month. Missing or unreadable file →
    /// empty matrix.
    pub fn load_community(&self) -> Result<MetricMatrix> {
        let path = self.path(COMMUNITY_FILE);
        let Some(df) = self.read_optional(&path, schema::community_schema()) else {
            debug!("no community extract");
            return Ok(MetricMatrix::empty());
        };

        let mut counts: BTreeMap<PeriodKey, f64> = BTreeMap::new();
        for raw in string_cells(&df, schema::POST_PUBLISH_TIME)?.iter().flatten() {
            match PeriodKey::from_timestamp(raw) {
                Some(p) if self.window.contains(&p) => *counts.entry(p).or_insert(0.0) += 1.0,
                Some(_) => {}
                None => debug!(value = raw.as_str(), "skipping community post without publish time"),
            }
        }

        let mut matrix = MetricMatrix::new(counts.keys().copied().collect());
        matrix.push_row(MetricRow::dense(COMMUNITY_POSTS, counts.into_values().collect()))?;
        Ok(matrix)
    }

    /// Absolute subscriber count as of the latest period, if recorded.
    pub fn load_subscriber_count(&self) -> Option<f64> {
        let path = self.path(SUBSCRIBER_COUNT_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "subscriber count unavailable");
                return None;
            }
        };
        let parsed = parse_subscriber_count(&text);
        if parsed.is_none() {
            warn!(path = %path.display(), "subscriber count is not a number");
        }
        parsed
    }
}

/// First line of the subscriber file with any separators stripped.
pub fn parse_subscriber_count(text: &str) -> Option<f64> {
    let digits: String = text
        .lines()
        .next()?
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn key(y: i32, m: u32) -> PeriodKey {
        PeriodKey::new(y, m).unwrap()
    }

    #[test]
    fn test_parse_cells() {
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number(" 12 "), Some(12.0));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_cell(Some("4.5"), ValueKind::Percent), Some(0.045));
        assert_eq!(parse_cell(Some("0:02:05"), ValueKind::Duration), Some(125.0));
        assert_eq!(parse_cell(Some("3:10"), ValueKind::Duration), Some(190.0));
        assert_eq!(parse_cell(Some("125"), ValueKind::Duration), Some(125.0));
        assert_eq!(parse_cell(None, ValueKind::Number), None);
    }

    #[test]
    fn test_parse_subscriber_count() {
        assert_eq!(parse_subscriber_count("1.234.567\n"), Some(1_234_567.0));
        assert_eq!(parse_subscriber_count("98,000"), Some(98_000.0));
        assert_eq!(parse_subscriber_count("unknown"), None);
    }

    #[test]
    fn test_aggregate_mode_transposes_and_restricts_to_window() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("live.csv"),
            "Date,Views,Impressions click-through rate (%),Average view duration\n\
             Total,999,1.0,0:10:00\n\
             2024-07,70,7.0,0:01:10\n\
             2024-01,10,1.0,0:00:10\n\
             2023-12,5,0.5,0:00:05\n\
             garbage,1,1,1\n",
        )
        .unwrap();

        let window = AnalysisWindow::ending_at(key(2024, 7));
        let loader = SourceLoader::new(dir.path().to_path_buf(), &window, "USD");
        let m = loader.load_aggregate(ContentCategory::Live).unwrap();

        assert_eq!(m.periods(), &[key(2024, 7)]);
        assert_eq!(m.cell(schema::VIEWS, &key(2024, 7)), Some(70.0));
        assert_eq!(m.cell(schema::CTR, &key(2024, 7)), Some(0.07));
        assert_eq!(m.cell(schema::AVG_VIEW_DURATION, &key(2024, 7)), Some(70.0));
        assert_eq!(m.cell(schema::REVENUE, &key(2024, 7)), None);
    }

    #[test]
    fn test_missing_aggregate_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let window = AnalysisWindow::ending_at(key(2024, 6));
        let loader = SourceLoader::new(dir.path().to_path_buf(), &window, "USD");
        assert!(matches!(
            loader.load_aggregate(ContentCategory::ShortForm),
            Err(ReportError::MissingSourceFile { .. })
        ));
    }

    #[test]
    fn test_detail_mode_reduces_by_declared_reducer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("long_form_01.csv"),
            "Video publish time,Content,Views,Average percentage viewed (%)\n\
             2024-05-03 10:00:00,a,100,40\n\
             2024-05-20 10:00:00,b,50,60\n\
             2023-01-02 10:00:00,old,1000,10\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("long_form_02.csv"),
            "Video publish time,Content,Views,Average percentage viewed (%)\n\
             2024-06-01,c,30,50\n",
        )
        .unwrap();

        let window = AnalysisWindow::ending_at(key(2024, 6));
        let loader = SourceLoader::new(dir.path().to_path_buf(), &window, "USD");
        let m = loader.load_new_content(ContentCategory::LongForm).unwrap();

        assert_eq!(m.periods(), &[key(2024, 5), key(2024, 6)]);
        assert_eq!(m.cell(schema::VIEWS, &key(2024, 5)), Some(150.0));
        assert_eq!(m.cell(schema::VIEWS, &key(2024, 6)), Some(30.0));
        let pct = m.cell(schema::AVG_PERCENT_VIEWED, &key(2024, 5)).unwrap();
        assert!((pct - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_detail_mode_without_files_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let window = AnalysisWindow::ending_at(key(2024, 6));
        let loader = SourceLoader::new(dir.path().to_path_buf(), &window, "USD");
        assert!(loader.load_new_content(ContentCategory::Live).unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_detail_slot_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("live_01.csv"),
            "Video publish time,Content,Views\n\
             2024-06-01,a,10\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("live_02.csv"),
            "Video publish time,Content,Views\n\
             2024-06-02,b,20,extra,fields\n",
        )
        .unwrap();

        let window = AnalysisWindow::ending_at(key(2024, 6));
        let loader = SourceLoader::new(dir.path().to_path_buf(), &window, "USD");
        let m = loader.load_new_content(ContentCategory::Live).unwrap();
        assert_eq!(m.cell(schema::VIEWS, &key(2024, 6)), Some(10.0));
    }

    #[test]
    fn test_traffic_sources_first_value_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("traffic_long_form.csv"),
            "Date,Traffic source,Views\n\
             2024-06,Suggested videos,30\n\
             2024-06,Suggested videos,99\n\
             2024-05,External,5\n",
        )
        .unwrap();

        let window = AnalysisWindow::ending_at(key(2024, 6));
        let loader = SourceLoader::new(dir.path().to_path_buf(), &window, "USD");
        let m = loader.load_traffic_sources(ContentCategory::LongForm).unwrap();
        assert_eq!(m.periods(), &[key(2024, 5), key(2024, 6)]);
        assert_eq!(m.cell("Suggested videos", &key(2024, 6)), Some(30.0));
        assert_eq!(m.cell("External", &key(2024, 6)), None);
    }

    #[test]
    fn test_community_posts_counted_per_month() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(COMMUNITY_FILE),
            "Post,Post publish time\n\
             Ug1,\"Jun 02, 2024\"\n\
             Ug2,\"Jun 20, 2024\"\n\
             Ug3,\"May 01, 2024\"\n\
             Ug4,\"Jan 01, 2001\"\n",
        )
        .unwrap();

        let window = AnalysisWindow::ending_at(key(2024, 6));
        let loader = SourceLoader::new(dir.path().to_path_buf(), &window, "USD");
        let m = loader.load_community().unwrap();
        assert_eq!(m.cell(COMMUNITY_POSTS, &key(2024, 6)), Some(2.0));
        assert_eq!(m.cell(COMMUNITY_POSTS, &key(2024, 5)), Some(1.0));
        assert_eq!(m.width(), 2);
    }

    #[test]
    fn test_ragged_community_extract_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(COMMUNITY_FILE),
            "Post,Post publish time\n\
             Ug1,\"Jun 02, 2024\",surplus,cells\n",
        )
        .unwrap();

        let window = AnalysisWindow::ending_at(key(2024, 6));
        let loader = SourceLoader::new(dir.path().to_path_buf(), &window, "USD");
        assert!(loader.load_community().unwrap().is_empty());
    }
}
