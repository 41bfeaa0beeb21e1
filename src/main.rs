use anyhow::{bail, Result};
use channel_report::{run_batch, ReportSettings};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "channel-report")]
#[command(about = "Monthly channel analytics report: values, deviation from mean, deviation from previous month")]
struct Args {
    /// Artists to process; each names a directory under the data dir
    #[arg(required = true)]
    artists: Vec<String>,

    /// Directory holding one extract folder per artist
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Where report_<artist>.json is written
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write every sheet as CSV under <output-dir>/<artist>/
    #[arg(long)]
    csv_sheets: bool,

    /// Settlement currency money columns are expected in
    #[arg(long)]
    currency: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut settings = ReportSettings::load(args.config.as_deref())?;
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }
    if let Some(dir) = args.output_dir {
        settings.output_dir = dir;
    }
    if let Some(currency) = args.currency {
        settings.settlement_currency = currency.trim().to_uppercase();
    }
    settings.write_csv_sheets |= args.csv_sheets;

    info!("🚀 channel-report starting for {} artist(s)", args.artists.len());
    info!("📂 Data dir: {}", settings.data_dir.display());

    let outcomes = run_batch(&settings, &args.artists);
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| o.result.is_err())
        .map(|o| o.artist.as_str())
        .collect();

    println!("\n=== Report Results ===");
    for outcome in &outcomes {
        match &outcome.result {
            Ok(path) => println!("✅ {}: {}", outcome.artist, path.display()),
            Err(e) => println!("❌ {}: {}", outcome.artist, e),
        }
    }

    if !failed.is_empty() {
        bail!("{} of {} artist(s) failed: {}", failed.len(), outcomes.len(), failed.join(", "));
    }
    Ok(())
}
