//! Reimbursement Trainer - deterministic offline formula fitter
//!
//! Loads labeled trips, segments them by trip length and spend bands,
//! searches base rates and rule subsets for the lowest total error, and
//! emits a hashed model artifact.

pub mod artifact;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod outliers;
pub mod pipeline;
pub mod search;
pub mod segment;

use std::path::Path;

pub use artifact::{formula_hash, ModelArtifact, ScoreSummary};
pub use config::FitConfig;
pub use dataset::{Dataset, DatasetHandle, DatasetSummary, InvalidRecordPolicy};
pub use errors::{Result, TrainerError};
pub use outliers::{OutlierCandidate, OutlierConfig, OutlierDetector, OutlierReport};
pub use pipeline::{FitPipeline, FitReport};
pub use search::{
    search, GridSearch, ParamRange, ParameterSpace, RefineConfig, RuleSubsetSearch,
    SearchOutcome, SubsetOutcome,
};
pub use segment::{
    implied_coefficient, Band, BucketKey, BucketSpec, Bucketing, SegmentStats, SegmentTable,
    Segmenter,
};

/// Fit a formula directly from a JSON case file.
pub fn fit_from_json(path: &Path, config: FitConfig) -> Result<FitReport> {
    let dataset = Dataset::from_json_path(path, InvalidRecordPolicy::Abort)?;
    FitPipeline::new(config).run_dataset(&dataset)
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
