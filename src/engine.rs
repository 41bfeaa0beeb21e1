//! End-to-end report generation for one artist, and the batch loop over many.

use crate::config::{ReportSettings, RunConfig};
use crate::derive::{derive, SourceData};
use crate::error::{ReportError, Result};
use crate::loader::{read_normalized, string_cells, SourceLoader};
use crate::matrix::MetricMatrix;
use crate::period::AnalysisWindow;
use crate::report::{write_csv_sheets, write_report, ReportArtifact, ReportTables};
use crate::schema::{self, ContentCategory};
use std::path::PathBuf;
use tracing::{error, info, warn};

pub struct ReportEngine {
    config: RunConfig,
}

impl ReportEngine {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Load every source, derive the catalog and build the artifact in memory.
    pub fn build(&self) -> Result<ReportArtifact> {
        let artist_dir = self.config.artist_dir();
        let currency = self.config.settlement_currency.as_str();
        info!("🎯 Building report for {}", self.config.artist);

        let total_path = artist_dir.join(ContentCategory::Aggregate.aggregate_file());
        let total_frame = read_normalized(
            &total_path,
            ContentCategory::Aggregate.aggregate_schema(),
            currency,
        )?
        .ok_or(ReportError::MissingSourceFile { path: total_path })?;

        let labels = string_cells(&total_frame, schema::DATE)?;
        let window = AnalysisWindow::resolve(labels.iter().map(|l| l.as_deref()))?;
        info!(
            start = %window.start(),
            anchor = %window.anchor(),
            "📅 Analysis window resolved"
        );

        let loader = SourceLoader::new(artist_dir, &window, currency);
        let total = loader.aggregate_from_frame(&total_frame, ContentCategory::Aggregate)?;
        let mut data = SourceData::new(window.clone(), total);

        for category in ContentCategory::CONTENT {
            data.aggregates.insert(category, loader.load_aggregate(category)?);
            let new_content = optional("new-content detail", loader.load_new_content(category));
            data.new_content.insert(category, new_content);
        }
        for category in [ContentCategory::LongForm, ContentCategory::Live] {
            let traffic = optional("traffic sources", loader.load_traffic_sources(category));
            if !traffic.is_empty() {
                data.traffic.push(traffic);
            }
        }
        data.community = optional("community posts", loader.load_community());
        data.subscriber_count = loader.load_subscriber_count();

        let derived = derive(&data);
        let tables = ReportTables::build(&derived)?;
        Ok(tables.into_artifact(&self.config.artist))
    }

    /// Build and persist the report; returns the JSON artifact's path.
    pub fn run(&self) -> Result<PathBuf> {
        let artifact = self.build()?;
        let path = write_report(&artifact, &self.config.output_dir)?;
        if self.config.write_csv_sheets {
            write_csv_sheets(&artifact, &self.config.output_dir)?;
        }
        info!("✅ Report for {} saved", self.config.artist);
        Ok(path)
    }
}

/// Only the window and the aggregate extracts are fatal; any other source
/// that fails to load is reported and treated as empty.
fn optional(source: &str, loaded: Result<MetricMatrix>) -> MetricMatrix {
    loaded.unwrap_or_else(|e| {
        warn!(source, error = %e, "source failed to load, continuing without it");
        MetricMatrix::empty()
    })
}

/// Outcome of one artist in a batch.
#[derive(Debug)]
pub struct ArtistOutcome {
    pub artist: String,
    pub result: Result<PathBuf>,
}

/// Process each artist in turn. A failing artist is logged and the batch
/// moves on to the next.
pub fn run_batch(settings: &ReportSettings, artists: &[String]) -> Vec<ArtistOutcome> {
    artists
        .iter()
        .map(|artist| {
            let result = settings
                .for_artist(artist)
                .and_then(|config| ReportEngine::new(config).run());
            match &result {
                Ok(path) => info!(artist = artist.as_str(), path = %path.display(), "report finished"),
                Err(e @ ReportError::MissingSourceFile { .. }) => {
                    warn!(artist = artist.as_str(), "❌ {}", e)
                }
                Err(e) => error!(artist = artist.as_str(), "❌ Report failed: {}", e),
            }
            ArtistOutcome {
                artist: artist.clone(),
                result,
            }
        })
        .collect()
}
