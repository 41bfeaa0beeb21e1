pub mod arith;
pub mod config;
pub mod derive;
pub mod engine;
pub mod error;
pub mod loader;
pub mod matrix;
pub mod period;
pub mod report;
pub mod schema;

pub use config::{ReportSettings, RunConfig};
pub use engine::{run_batch, ArtistOutcome, ReportEngine};
pub use error::{ReportError, Result};
