//! Fit configuration
//!
//! Every knob of a fitting run, loadable from TOML. Missing sections and
//! keys fall back to [`FitConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::errors::{Result, TrainerError};
use crate::outliers::OutlierConfig;
use crate::search::{ParameterSpace, RefineConfig};
use crate::segment::BucketSpec;

/// Fitting run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Score candidates on the rayon pool
    pub parallel: bool,
    /// Base-rate grid
    pub grid: ParameterSpace,
    /// Coarse-to-fine rounds after the grid
    pub refine: RefineConfig,
    /// Bucketing used for implied-coefficient statistics
    pub segments: SegmentConfig,
    /// Outlier detection
    pub outliers: OutlierConfig,
    /// Rule-subset search
    pub rules: RuleConfig,
    /// Evaluation report
    pub report: ReportConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            grid: ParameterSpace::default(),
            refine: RefineConfig::default(),
            segments: SegmentConfig::default(),
            outliers: OutlierConfig::default(),
            rules: RuleConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

/// Segmentation configuration. A width of 0 leaves that dimension out of
/// the bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub by_days: bool,
    pub spend_width: u32,
    pub miles_width: u32,
    /// Buckets below this size are not searched or examined for outliers
    pub min_support: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            by_days: true,
            spend_width: 50,
            miles_width: 0,
            min_support: 3,
        }
    }
}

impl SegmentConfig {
    pub fn bucket_spec(&self) -> BucketSpec {
        BucketSpec {
            by_days: self.by_days,
            spend_width: (self.spend_width > 0).then_some(self.spend_width),
            miles_width: (self.miles_width > 0).then_some(self.miles_width),
        }
    }
}

/// Rule-subset search configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Largest subset of candidate rules scored together
    pub max_subset_size: usize,
    /// Offer one median-rate rule per supported bucket as an extra candidate
    pub segment_rules: bool,
    /// Keep the short/long trip corrections in the searched template
    pub trip_length_corrections: bool,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            max_subset_size: 3,
            segment_rules: false,
            trip_length_corrections: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Worst cases kept in the evaluation report
    pub worst: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { worst: 10 }
    }
}

impl FitConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: FitConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TrainerError::InvalidConfig(format!("failed to serialize config: {e}")))
    }

    /// Check every section before any search starts
    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        self.refine.validate()?;

        if !self.segments.by_days && self.segments.spend_width == 0 && self.segments.miles_width == 0
        {
            return Err(TrainerError::InvalidConfig(
                "segments: at least one bucket dimension must be enabled".to_string(),
            ));
        }
        if self.segments.min_support == 0 {
            return Err(TrainerError::InvalidConfig(
                "segments.min_support must be at least 1".to_string(),
            ));
        }

        let threshold = self.outliers.threshold_std_devs;
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(TrainerError::InvalidConfig(format!(
                "outliers.threshold_std_devs must be a non-negative number, got {threshold}"
            )));
        }
        if self.outliers.region_width == 0 {
            return Err(TrainerError::InvalidConfig(
                "outliers.region_width must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
