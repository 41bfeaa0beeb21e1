//! The metric derivation engine.
//!
//! A single stateless pass turns the loaded per-category matrices into the
//! full catalog of report rows. Derivations write rows by label; assembly then
//! lays them out in [`ROW_ORDER`] over the analysis window, zero-filling any
//! row nothing produced.

use crate::arith::{ratio, safe_divide, subtract_by_label, Values};
use crate::error::{ReportError, Result};
use crate::loader::COMMUNITY_POSTS;
use crate::matrix::{MetricMatrix, MetricRow};
use crate::period::{AnalysisWindow, PeriodKey};
use crate::schema::{self, ContentCategory};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Traffic sources reported individually, with the label each is reported under.
pub const TRAFFIC_SOURCES: &[(&str, &str)] = &[
    ("Browse features", "Browse features"),
    ("Suggested videos", "Suggested videos"),
    ("Shorts feed", "Shorts feed"),
    ("External", "External"),
    ("Notifications", "Notifications"),
    ("YouTube search", "YouTube search"),
    ("Playlists", "Playlists"),
    ("YouTube advertising", "Paid traffic"),
];

/// Bucket for every traffic source outside [`TRAFFIC_SOURCES`].
pub const OTHER_TRAFFIC: &str = "Other";

pub const SUBSCRIBERS_TOTAL: &str = "Subscribers Total";
pub const SUBSCRIBER_GROWTH: &str = "Subscriber Growth (%)";

/// Rows holding seconds that the values table renders as clock time.
pub const DURATION_ROWS: &[&str] = &[
    "Length Long-form (new)",
    "Avg View Duration Long-form (new)",
    "Length Lives (new)",
    "Avg View Duration Lives (new)",
    "Length Shorts (new)",
    "Avg View Duration Shorts (new)",
];

/// Every report row, in report order.
pub const ROW_ORDER: &[&str] = &[
    "Revenue without Shorts",
    "Revenue Long-form",
    "Revenue Lives",
    "Revenue Shorts",
    "Impressions without Shorts",
    "Impressions Long-form",
    "Impressions Lives",
    "Views without Shorts",
    "Views Shorts",
    "Views Long-form",
    "Views Lives",
    "Long-form published",
    "Lives published",
    "Shorts published",
    "Watch Time Total",
    "Impressions per Long-form (new)",
    "Impressions per Live (new)",
    "Impressions per Short (new)",
    "RPM Legacy",
    "RPM New",
    "RPM without Shorts",
    "RPM Long-form (new)",
    "RPM Lives (new)",
    "RPM Shorts (new)",
    "CTR Long-form (new)",
    "CTR Lives (new)",
    "Avg Percentage Viewed Long-form (new)",
    "Avg Percentage Viewed Lives (new)",
    "Length Long-form (new)",
    "Length Lives (new)",
    "Avg View Duration Long-form (new)",
    "Avg View Duration Lives (new)",
    "Browse features",
    "Suggested videos",
    "Shorts feed",
    "External",
    "Notifications",
    "YouTube search",
    "Playlists",
    "Paid traffic",
    "Other",
    "Subscribers Long-form (new)",
    "Subscribers Lives (new)",
    "Subscribers Shorts (new)",
    "Subscribers Long-form (legacy)",
    "Subscribers Lives (legacy)",
    "Subscribers Shorts (legacy)",
    "Subscribers Long-form",
    "Subscribers Lives",
    "Subscribers Shorts",
    SUBSCRIBERS_TOTAL,
    "Subscribers without Shorts",
    SUBSCRIBER_GROWTH,
    "Revenue per Long-form (new)",
    "Revenue per Live (new)",
    "Revenue per Short (new)",
    "Revenue Long-form (new)",
    "Revenue Lives (new)",
    "CPM",
    "Revenue Long-form (legacy)",
    "Revenue Shorts (legacy)",
    "Revenue Lives (legacy)",
    "Revenue Shorts (new)",
    "Fill Rate",
    "Engagement per Long-form (new)",
    "Engagement per Live (new)",
    "Impressions Shorts",
    "Watch Time Long-form",
    "Watch Time Lives",
    "Watch Time Shorts",
    "RPM Long-form",
    "RPM Lives",
    "RPM Shorts",
    "RPM Total",
    "Subscribers Gained",
    "Subscribers Lost",
    "Subscribers Net Change",
    "Engagement per Short (new)",
    "Length Shorts (new)",
    "Avg Percentage Viewed Shorts (new)",
    "Avg View Duration Shorts (new)",
    "Views Long-form (new)",
    "Views Lives (new)",
    "Views Shorts (new)",
    "Views Long-form (legacy)",
    "Views Lives (legacy)",
    "Views Shorts (legacy)",
    "Views Total",
    "Community Posts",
    "Post Impressions",
    "Post Likes",
];

pub fn is_duration_row(label: &str) -> bool {
    DURATION_ROWS.contains(&label)
}

/// Everything loaded for one artist, ready for derivation.
#[derive(Debug, Clone)]
pub struct SourceData {
    pub window: AnalysisWindow,
    /// Channel-wide aggregate extract.
    pub total: MetricMatrix,
    /// Per-category aggregate extracts.
    pub aggregates: HashMap<ContentCategory, MetricMatrix>,
    /// Per-category new-content detail, reduced per period.
    pub new_content: HashMap<ContentCategory, MetricMatrix>,
    /// Traffic-source breakdowns that feed the traffic mix.
    pub traffic: Vec<MetricMatrix>,
    pub community: MetricMatrix,
    pub subscriber_count: Option<f64>,
}

impl SourceData {
    pub fn new(window: AnalysisWindow, total: MetricMatrix) -> Self {
        Self {
            window,
            total,
            aggregates: HashMap::new(),
            new_content: HashMap::new(),
            traffic: Vec::new(),
            community: MetricMatrix::empty(),
            subscriber_count: None,
        }
    }
}

/// Run every derivation and lay the rows out in [`ROW_ORDER`].
pub fn derive(data: &SourceData) -> MetricMatrix {
    let mut deriver = Deriver::new(data);
    deriver.volumes();
    deriver.legacy_split();
    deriver.monetization();
    deriver.per_publication();
    deriver.retention();
    deriver.traffic_mix();
    deriver.subscribers();
    deriver.community();
    deriver.finish()
}

struct Deriver {
    periods: Vec<PeriodKey>,
    total: MetricMatrix,
    aggregates: HashMap<ContentCategory, MetricMatrix>,
    new_content: HashMap<ContentCategory, MetricMatrix>,
    new_total: MetricMatrix,
    traffic: Vec<MetricMatrix>,
    community: MetricMatrix,
    subscriber_count: Option<f64>,
    empty: MetricMatrix,
    rows: HashMap<String, MetricRow>,
}

impl Deriver {
    /// Aggregates keep their nulls; new-content and community matrices are
    /// zero-filled since a missing period there means nothing was published.
    /// A category without detail still gets a zero row per detail metric, so
    /// its legacy rows equal the aggregate.
    fn new(data: &SourceData) -> Self {
        let periods = data.window.periods().to_vec();
        let aggregates: HashMap<_, _> = ContentCategory::CONTENT
            .iter()
            .filter_map(|c| data.aggregates.get(c).map(|m| (*c, m.reindex(&periods))))
            .collect();
        let new_content: HashMap<_, _> = ContentCategory::CONTENT
            .iter()
            .map(|c| {
                let mut m = data
                    .new_content
                    .get(c)
                    .map(|m| m.reindex_zero_filled(&periods))
                    .unwrap_or_else(|| MetricMatrix::new(periods.clone()));
                m.fill_missing_rows(
                    c.detail_schema().iter().filter(|s| s.is_metric()).map(|s| s.name),
                );
                (*c, m)
            })
            .collect();
        let parts: Vec<&MetricMatrix> = new_content.values().collect();
        let new_total = MetricMatrix::sum_aligned(&parts, &periods);

        Self {
            total: data.total.reindex(&periods),
            aggregates,
            new_content,
            new_total,
            traffic: data.traffic.clone(),
            community: data.community.reindex_zero_filled(&periods),
            subscriber_count: data.subscriber_count,
            empty: MetricMatrix::new(periods.clone()),
            rows: HashMap::new(),
            periods,
        }
    }

    fn width(&self) -> usize {
        self.periods.len()
    }

    fn aggregate(&self, category: ContentCategory) -> &MetricMatrix {
        self.aggregates.get(&category).unwrap_or(&self.empty)
    }

    fn new_content(&self, category: ContentCategory) -> &MetricMatrix {
        self.new_content.get(&category).unwrap_or(&self.empty)
    }

    /// Window-aligned values of a row, nulls and absent rows as zeros.
    fn values(&self, matrix: &MetricMatrix, label: &str) -> Vec<f64> {
        matrix
            .aligned_values(label, &self.periods)
            .unwrap_or_else(|| vec![0.0; self.width()])
    }

    fn emit(&mut self, row: MetricRow) {
        if self.rows.insert(row.label.clone(), row).is_some() {
            warn!("derived row emitted twice, keeping the later one");
        }
    }

    /// Copy a loaded row under a report label, keeping null cells.
    fn pass_through(&mut self, out: &str, matrix: &MetricMatrix, label: &str) {
        let cells = matrix
            .row(label)
            .map(|r| r.cells.clone())
            .unwrap_or_else(|| vec![Some(0.0); self.width()]);
        self.emit(MetricRow::new(out, cells));
    }

    /// Record a computed row; a failing computation is logged and zero-filled.
    fn derived<F>(&mut self, out: &str, compute: F)
    where
        F: FnOnce(&Self) -> Result<Vec<f64>>,
    {
        let row = match compute(self) {
            Ok(values) if values.len() == self.width() => MetricRow::dense(out, values),
            Ok(values) => {
                warn!(row = out, cells = values.len(), "derived row has wrong width, zero-filling");
                MetricRow::zeros(out, self.width())
            }
            Err(e) => {
                warn!(row = out, error = %e, "derivation failed, zero-filling");
                MetricRow::zeros(out, self.width())
            }
        };
        self.emit(row);
    }

    fn divide(&self, numerator: Vec<f64>, denominator: Vec<f64>) -> Result<Vec<f64>> {
        safe_divide(&Values::from(numerator), &Values::from(denominator))?
            .into_vector()
            .ok_or_else(|| ReportError::ShapeMismatch("expected a vector quotient".to_string()))
    }

    fn volumes(&mut self) {
        let short = self.aggregate(ContentCategory::ShortForm).clone();
        let total = self.total.clone();
        for (metric, name) in [
            (schema::REVENUE, "Revenue"),
            (schema::IMPRESSIONS, "Impressions"),
            (schema::VIEWS, "Views"),
        ] {
            let row = subtract_by_label(&total, metric, &short, metric, &format!("{} without Shorts", name));
            self.emit(row);
        }

        for category in ContentCategory::CONTENT {
            let agg = self.aggregate(category).clone();
            let plural = category.plural_label();
            self.pass_through(&format!("Revenue {}", plural), &agg, schema::REVENUE);
            self.pass_through(&format!("Impressions {}", plural), &agg, schema::IMPRESSIONS);
            self.pass_through(&format!("Views {}", plural), &agg, schema::VIEWS);
            self.pass_through(&format!("{} published", plural), &agg, schema::VIDEOS_PUBLISHED);
            self.pass_through(&format!("Watch Time {}", plural), &agg, schema::WATCH_TIME);
            self.pass_through(&format!("RPM {}", plural), &agg, schema::RPM);
            self.pass_through(&format!("Subscribers {}", plural), &agg, schema::SUBSCRIBERS);
        }

        self.pass_through("Watch Time Total", &total, schema::WATCH_TIME);
        self.pass_through("Views Total", &total, schema::VIEWS);
        self.pass_through("RPM Total", &total, schema::RPM);
        self.pass_through("CPM", &total, schema::CPM);
        self.pass_through("Post Impressions", &total, schema::POST_IMPRESSIONS);
        self.pass_through("Post Likes", &total, schema::POST_LIKES);
    }

    /// Legacy = category aggregate minus what newly published content earned.
    fn legacy_split(&mut self) {
        for category in ContentCategory::CONTENT {
            let agg = self.aggregate(category).clone();
            let new = self.new_content(category).clone();
            let plural = category.plural_label();
            for (metric, name) in [
                (schema::REVENUE, "Revenue"),
                (schema::VIEWS, "Views"),
                (schema::SUBSCRIBERS, "Subscribers"),
            ] {
                self.pass_through(&format!("{} {} (new)", name, plural), &new, metric);
                let legacy = subtract_by_label(
                    &agg,
                    metric,
                    &new,
                    metric,
                    &format!("{} {} (legacy)", name, plural),
                );
                self.emit(legacy);
            }
        }
    }

    fn monetization(&mut self) {
        self.derived("RPM Legacy", |d| {
            let revenue = subtract_by_label(&d.total, schema::REVENUE, &d.new_total, schema::REVENUE, "");
            let views = subtract_by_label(&d.total, schema::VIEWS, &d.new_total, schema::VIEWS, "");
            d.divide(scale(&revenue.values(), 1000.0), views.values())
        });
        self.derived("RPM New", |d| {
            let revenue = d.values(&d.new_total, schema::REVENUE);
            d.divide(scale(&revenue, 1000.0), d.values(&d.new_total, schema::VIEWS))
        });
        self.derived("RPM without Shorts", |d| {
            let long_form = d.aggregate(ContentCategory::LongForm);
            let live = d.aggregate(ContentCategory::Live);
            let imp_lf = d.values(long_form, schema::IMPRESSIONS);
            let imp_live = d.values(live, schema::IMPRESSIONS);
            let combined: Vec<f64> = imp_lf.iter().zip(&imp_live).map(|(a, b)| a + b).collect();
            let w_lf = d.divide(imp_lf, combined.clone())?;
            let w_live = d.divide(imp_live, combined)?;
            let rpm_lf = d.values(long_form, schema::RPM);
            let rpm_live = d.values(live, schema::RPM);
            Ok((0..d.width())
                .map(|i| rpm_lf[i] * w_lf[i] + rpm_live[i] * w_live[i])
                .collect())
        });
        self.derived("Fill Rate", |d| {
            d.divide(
                d.values(&d.total, schema::PLAYBACK_CPM),
                d.values(&d.total, schema::CPM),
            )
        });

        for category in ContentCategory::CONTENT {
            let new = self.new_content(category).clone();
            self.pass_through(&format!("RPM {} (new)", category.plural_label()), &new, schema::RPM);
        }
    }

    /// New-content volume divided by how many items the category published.
    fn per_publication(&mut self) {
        for category in ContentCategory::CONTENT {
            let singular = category.content_label();
            for (metric, name) in [(schema::IMPRESSIONS, "Impressions"), (schema::REVENUE, "Revenue")] {
                self.derived(&format!("{} per {} (new)", name, singular), |d| {
                    d.divide(
                        d.values(d.new_content(category), metric),
                        d.values(d.aggregate(category), schema::VIDEOS_PUBLISHED),
                    )
                });
            }
            self.derived(&format!("Engagement per {} (new)", singular), |d| {
                let new = d.new_content(category);
                let engagement: Vec<f64> = [schema::COMMENTS, schema::LIKES, schema::SHARES]
                    .iter()
                    .map(|m| d.values(new, m))
                    .fold(vec![0.0; d.width()], |acc, v| {
                        acc.iter().zip(&v).map(|(a, x)| a + x.abs()).collect()
                    });
                d.divide(engagement, d.values(d.aggregate(category), schema::VIDEOS_PUBLISHED))
            });
        }
    }

    /// Click-through, retention and content length of new items.
    fn retention(&mut self) {
        for category in ContentCategory::CONTENT {
            let new = self.new_content(category).clone();
            let plural = category.plural_label();
            if category != ContentCategory::ShortForm {
                self.pass_through(&format!("CTR {} (new)", plural), &new, schema::CTR);
            }
            self.pass_through(
                &format!("Avg Percentage Viewed {} (new)", plural),
                &new,
                schema::AVG_PERCENT_VIEWED,
            );
            self.pass_through(
                &format!("Avg View Duration {} (new)", plural),
                &new,
                schema::AVG_VIEW_DURATION,
            );
            self.derived(&format!("Length {} (new)", plural), |d| {
                d.divide(
                    d.values(&new, schema::AVG_VIEW_DURATION),
                    d.values(&new, schema::AVG_PERCENT_VIEWED),
                )
            });
        }
    }

    /// Share of views per traffic source, long-form and live combined.
    fn traffic_mix(&mut self) {
        let labels: Vec<&str> = TRAFFIC_SOURCES
            .iter()
            .map(|(_, label)| *label)
            .chain(std::iter::once(OTHER_TRAFFIC))
            .collect();

        let mut buckets = vec![vec![0.0; self.width()]; labels.len()];
        for matrix in &self.traffic {
            let aligned = matrix.reindex_zero_filled(&self.periods);
            for row in aligned.rows() {
                let idx = TRAFFIC_SOURCES
                    .iter()
                    .position(|(source, _)| *source == row.label)
                    .unwrap_or(labels.len() - 1);
                for (acc, v) in buckets[idx].iter_mut().zip(row.values()) {
                    *acc += v;
                }
            }
        }

        let totals: Vec<f64> = (0..self.width())
            .map(|i| buckets.iter().map(|b| b[i]).sum())
            .collect();
        let scaled: Vec<Vec<f64>> = buckets.iter().map(|b| scale(b, 100.0)).collect();
        let mix = safe_divide(&Values::from(scaled), &Values::from(totals))
            .and_then(|v| {
                v.into_matrix().ok_or_else(|| {
                    ReportError::ShapeMismatch("expected a matrix quotient".to_string())
                })
            });
        match mix {
            Ok(rows) => {
                for (label, values) in labels.iter().zip(rows) {
                    self.emit(MetricRow::dense(*label, values));
                }
            }
            Err(e) => warn!(error = %e, "traffic mix failed, zero-filling"),
        }
    }

    fn subscribers(&mut self) {
        let total = self.total.clone();
        let short = self.aggregate(ContentCategory::ShortForm).clone();
        self.emit(subtract_by_label(
            &total,
            schema::SUBSCRIBERS,
            &short,
            schema::SUBSCRIBERS,
            "Subscribers without Shorts",
        ));
        self.pass_through("Subscribers Gained", &total, schema::SUBSCRIBERS_GAINED);
        self.pass_through("Subscribers Lost", &total, schema::SUBSCRIBERS_LOST);
        self.pass_through("Subscribers Net Change", &total, schema::SUBSCRIBERS);

        let deltas = self.values(&total, schema::SUBSCRIBERS);
        let cumulative = match self.subscriber_count {
            Some(count) => cumulative_subscribers(count, &deltas),
            None => {
                warn!("no subscriber count recorded, cumulative subscribers zero-filled");
                vec![0.0; self.width()]
            }
        };
        let growth = if self.subscriber_count.is_some() {
            subscriber_growth(&cumulative, &deltas)
        } else {
            vec![0.0; self.width()]
        };
        self.emit(MetricRow::dense(SUBSCRIBERS_TOTAL, cumulative));
        self.emit(MetricRow::dense(SUBSCRIBER_GROWTH, growth));
    }

    fn community(&mut self) {
        let community = self.community.clone();
        self.pass_through("Community Posts", &community, COMMUNITY_POSTS);
    }

    fn finish(mut self) -> MetricMatrix {
        let mut out = MetricMatrix::new(self.periods.clone());
        for label in ROW_ORDER {
            let row = self.rows.remove(*label).unwrap_or_else(|| {
                debug!(row = *label, "no inputs for row, zero-filling");
                MetricRow::zeros(*label, self.periods.len())
            });
            if let Err(e) = out.push_row(row) {
                warn!(row = *label, error = %e, "dropping malformed row");
            }
        }
        for label in self.rows.keys() {
            warn!(row = label.as_str(), "derived row is not part of the report layout");
        }
        info!(rows = out.height(), periods = out.width(), "derived report rows");
        out
    }
}

fn scale(values: &[f64], factor: f64) -> Vec<f64> {
    values.iter().map(|v| v * factor).collect()
}

/// Subscriber count at the end of each period, given the count at the end of
/// the last one: `count − Σ deltas after p`.
pub fn cumulative_subscribers(count: f64, deltas: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; deltas.len()];
    let mut running = count;
    for (i, delta) in deltas.iter().enumerate().rev() {
        out[i] = running;
        running -= delta;
    }
    out
}

/// Percentage change of the cumulative count over the previous period.
pub fn subscriber_growth(cumulative: &[f64], deltas: &[f64]) -> Vec<f64> {
    let previous: Vec<f64> = cumulative.iter().zip(deltas).map(|(c, d)| c - d).collect();
    ratio(deltas, &previous)
        .into_iter()
        .map(|r| r * 100.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key(y: i32, m: u32) -> PeriodKey {
        PeriodKey::new(y, m).unwrap()
    }

    fn matrix(periods: &[PeriodKey], rows: &[(&str, Vec<f64>)]) -> MetricMatrix {
        let mut m = MetricMatrix::new(periods.to_vec());
        for (label, values) in rows {
            m.push_row(MetricRow::dense(*label, values.clone())).unwrap();
        }
        m
    }

    fn window() -> AnalysisWindow {
        AnalysisWindow::ending_at(key(2024, 6))
    }

    #[test]
    fn test_row_order_labels_are_unique() {
        let unique: HashSet<&str> = ROW_ORDER.iter().copied().collect();
        assert_eq!(unique.len(), ROW_ORDER.len());
        assert!(DURATION_ROWS.iter().all(|r| ROW_ORDER.contains(r)));
    }

    #[test]
    fn test_empty_inputs_yield_full_zero_catalog() {
        let w = window();
        let data = SourceData::new(w.clone(), MetricMatrix::empty());
        let out = derive(&data);
        assert_eq!(out.periods(), w.periods());
        assert_eq!(out.labels().collect::<Vec<_>>(), ROW_ORDER.to_vec());
        assert!(out.rows().iter().all(|r| r.values().iter().all(|v| *v == 0.0)));
    }

    #[test]
    fn test_every_derivation_lands_in_the_layout() {
        let w = window();
        let p = w.periods();
        let ones = vec![1.0; 6];
        let full: Vec<(&str, Vec<f64>)> = ContentCategory::Aggregate
            .aggregate_schema()
            .iter()
            .filter(|s| s.is_metric())
            .map(|s| (s.name, ones.clone()))
            .collect();
        let mut data = SourceData::new(w.clone(), matrix(p, &full));
        for c in ContentCategory::CONTENT {
            data.aggregates.insert(c, matrix(p, &full));
            data.new_content.insert(c, matrix(p, &full));
        }
        data.traffic.push(matrix(p, &[("External", ones.clone())]));
        data.community = matrix(p, &[(COMMUNITY_POSTS, ones.clone())]);
        data.subscriber_count = Some(100.0);

        let mut d = Deriver::new(&data);
        d.volumes();
        d.legacy_split();
        d.monetization();
        d.per_publication();
        d.retention();
        d.traffic_mix();
        d.subscribers();
        d.community();
        let produced: HashSet<&str> = d.rows.keys().map(String::as_str).collect();
        let layout: HashSet<&str> = ROW_ORDER.iter().copied().collect();
        assert_eq!(produced, layout);
    }

    #[test]
    fn test_rpm_zero_views_and_legacy_revenue_without_detail() {
        let w = window();
        let p = w.periods();
        let total = matrix(
            p,
            &[
                (schema::REVENUE, vec![10.0, 20.0, 30.0, 100.0, 50.0, 60.0]),
                (schema::VIEWS, vec![1000.0, 1000.0, 1000.0, 0.0, 1000.0, 1000.0]),
            ],
        );
        let mut data = SourceData::new(w.clone(), total.clone());
        data.aggregates.insert(ContentCategory::LongForm, total);
        let mut new = MetricMatrix::new(vec![key(2024, 1), key(2024, 2)]);
        new.push_row(MetricRow::dense(schema::REVENUE, vec![4.0, 5.0])).unwrap();
        new.push_row(MetricRow::dense(schema::VIEWS, vec![100.0, 100.0])).unwrap();
        data.new_content.insert(ContentCategory::LongForm, new);

        let out = derive(&data);
        let month4 = key(2024, 4);
        assert_eq!(out.cell("RPM Legacy", &month4), Some(0.0));
        assert_eq!(out.cell("Revenue Long-form (legacy)", &month4), Some(100.0));
        assert_eq!(out.cell("Revenue Long-form (legacy)", &key(2024, 1)), Some(6.0));
        assert_eq!(out.cell("RPM New", &key(2024, 1)), Some(40.0));
        assert_eq!(out.cell("RPM New", &month4), Some(0.0));
    }

    #[test]
    fn test_legacy_equals_aggregate_when_category_has_no_detail() {
        let w = window();
        let p = w.periods();
        let aggregate = matrix(
            p,
            &[
                (schema::REVENUE, vec![5.0; 6]),
                (schema::VIEWS, vec![50.0; 6]),
                (schema::SUBSCRIBERS, vec![2.0; 6]),
                (schema::VIDEOS_PUBLISHED, vec![1.0; 6]),
            ],
        );
        let mut data = SourceData::new(w.clone(), MetricMatrix::empty());
        data.aggregates.insert(ContentCategory::LongForm, aggregate.clone());
        data.aggregates.insert(ContentCategory::Live, aggregate);
        data.new_content.insert(
            ContentCategory::LongForm,
            matrix(&p[..1], &[(schema::REVENUE, vec![3.0]), (schema::VIEWS, vec![20.0])]),
        );
        data.new_content.insert(ContentCategory::Live, MetricMatrix::empty());

        let out = derive(&data);
        assert_eq!(out.row("Revenue Lives (legacy)").unwrap().values(), vec![5.0; 6]);
        assert_eq!(out.row("Views Lives (legacy)").unwrap().values(), vec![50.0; 6]);
        assert_eq!(out.row("Subscribers Lives (legacy)").unwrap().values(), vec![2.0; 6]);
        assert_eq!(out.row("Revenue per Live (new)").unwrap().values(), vec![0.0; 6]);
        assert_eq!(out.cell("Revenue Long-form (legacy)", &p[0]), Some(2.0));
        assert_eq!(out.cell("Views Long-form (legacy)", &p[1]), Some(50.0));
    }

    #[test]
    fn test_traffic_mix_sums_to_hundred() {
        let w = window();
        let p = w.periods();
        let long_form = matrix(
            p,
            &[
                ("Suggested videos", vec![50.0, 0.0, 0.0, 0.0, 0.0, 10.0]),
                ("Channel pages", vec![25.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            ],
        );
        let live = matrix(&p[..1], &[("YouTube advertising", vec![25.0])]);
        let mut data = SourceData::new(w.clone(), MetricMatrix::empty());
        data.traffic = vec![long_form, live];

        let out = derive(&data);
        let first = p[0];
        assert_eq!(out.cell("Suggested videos", &first), Some(50.0));
        assert_eq!(out.cell("Other", &first), Some(25.0));
        assert_eq!(out.cell("Paid traffic", &first), Some(25.0));
        assert_eq!(out.cell("Suggested videos", &p[5]), Some(100.0));

        for period in p {
            let sum: f64 = TRAFFIC_SOURCES
                .iter()
                .map(|(_, l)| *l)
                .chain(std::iter::once(OTHER_TRAFFIC))
                .map(|l| out.cell(l, period).unwrap())
                .sum();
            let has_views = *period == p[0] || *period == p[5];
            let expected = if has_views { 100.0 } else { 0.0 };
            assert!((sum - expected).abs() < 1e-9, "{} sums to {}", period, sum);
        }
    }

    #[test]
    fn test_cumulative_subscribers_and_growth() {
        let deltas = vec![10.0, 20.0, 0.0, 30.0, 0.0, 40.0];
        let cumulative = cumulative_subscribers(1000.0, &deltas);
        assert_eq!(cumulative, vec![910.0, 930.0, 930.0, 960.0, 960.0, 1000.0]);
        let growth = subscriber_growth(&cumulative, &deltas);
        assert!((growth[0] - 10.0 / 900.0 * 100.0).abs() < 1e-9);
        assert_eq!(growth[2], 0.0);
        assert!((growth[5] - 40.0 / 960.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_subscriber_count_zero_fills_total() {
        let w = window();
        let total = matrix(w.periods(), &[(schema::SUBSCRIBERS, vec![1.0; 6])]);
        let data = SourceData::new(w.clone(), total);
        let out = derive(&data);
        assert_eq!(out.row(SUBSCRIBERS_TOTAL).unwrap().values(), vec![0.0; 6]);
        assert_eq!(out.row(SUBSCRIBER_GROWTH).unwrap().values(), vec![0.0; 6]);
        assert_eq!(out.row("Subscribers Net Change").unwrap().values(), vec![1.0; 6]);
    }

    #[test]
    fn test_pass_through_keeps_nulls() {
        let w = window();
        let p = w.periods();
        let mut total = MetricMatrix::new(p[3..].to_vec());
        total.push_row(MetricRow::dense(schema::VIEWS, vec![1.0, 2.0, 3.0])).unwrap();
        let data = SourceData::new(w.clone(), total);
        let out = derive(&data);
        let views = out.row("Views Total").unwrap();
        assert_eq!(views.cells[0], None);
        assert_eq!(views.cells[5], Some(3.0));
        assert_eq!(out.row("Views without Shorts").unwrap().cells[0], Some(0.0));
    }

    #[test]
    fn test_content_length_from_duration_and_percentage() {
        let w = window();
        let p = w.periods();
        let new = matrix(
            p,
            &[
                (schema::AVG_VIEW_DURATION, vec![60.0, 0.0, 0.0, 0.0, 0.0, 30.0]),
                (schema::AVG_PERCENT_VIEWED, vec![0.5, 0.0, 0.0, 0.0, 0.0, 0.0]),
            ],
        );
        let mut data = SourceData::new(w.clone(), MetricMatrix::empty());
        data.new_content.insert(ContentCategory::Live, new);
        let out = derive(&data);
        assert_eq!(out.cell("Length Lives (new)", &p[0]), Some(120.0));
        assert_eq!(out.cell("Length Lives (new)", &p[5]), Some(0.0));
    }
}
