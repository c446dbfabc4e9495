//! Labeled case loading
//!
//! Reads the JSON case file (`[{ "input": {...}, "expected_output": n }]`),
//! validates every record and exposes a cheap-to-clone, read-only dataset.

use once_cell::sync::OnceCell;
use reimburse_core::Example;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{Result, TrainerError};

/// What to do with a record that fails validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidRecordPolicy {
    #[default]
    Abort,
    Skip,
}

/// A record dropped under [`InvalidRecordPolicy::Skip`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

/// Validated labeled examples, shared read-only between components
#[derive(Clone, Debug)]
pub struct Dataset {
    examples: Arc<[Example]>,
    rejected: Vec<RejectedRecord>,
}

/// Value ranges of the loaded examples
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub count: usize,
    pub days: (u32, u32),
    pub miles: (f64, f64),
    pub receipts: (f64, f64),
    pub expected: (f64, f64),
}

impl Dataset {
    /// Build from in-memory examples; any invalid example is an error
    pub fn from_examples(examples: Vec<Example>) -> Result<Self> {
        for (index, example) in examples.iter().enumerate() {
            example
                .validate()
                .map_err(|err| TrainerError::InvalidRecord {
                    index,
                    reason: err.to_string(),
                })?;
        }
        if examples.is_empty() {
            return Err(TrainerError::EmptyDataset);
        }
        Ok(Self {
            examples: examples.into(),
            rejected: Vec::new(),
        })
    }

    /// Load dataset from a JSON case file
    pub fn from_json_path<P: AsRef<Path>>(path: P, policy: InvalidRecordPolicy) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content, policy)
    }

    pub fn from_json_str(content: &str, policy: InvalidRecordPolicy) -> Result<Self> {
        let records: Vec<serde_json::Value> = serde_json::from_str(content)?;

        let mut examples = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            let parsed = serde_json::from_value::<Example>(record)
                .map_err(|err| err.to_string())
                .and_then(|example| {
                    example
                        .validate()
                        .map(|_| example)
                        .map_err(|err| err.to_string())
                });

            match (parsed, policy) {
                (Ok(example), _) => examples.push(example),
                (Err(reason), InvalidRecordPolicy::Abort) => {
                    return Err(TrainerError::InvalidRecord { index, reason });
                }
                (Err(reason), InvalidRecordPolicy::Skip) => {
                    warn!("Skipping record {}: {}", index, reason);
                    rejected.push(RejectedRecord { index, reason });
                }
            }
        }

        if examples.is_empty() {
            return Err(TrainerError::EmptyDataset);
        }

        Ok(Self {
            examples: examples.into(),
            rejected,
        })
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// Get number of examples
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn rejected(&self) -> &[RejectedRecord] {
        &self.rejected
    }

    /// Min/max of every input column and the target
    pub fn summary(&self) -> DatasetSummary {
        let mut summary = DatasetSummary {
            count: self.examples.len(),
            days: (u32::MAX, u32::MIN),
            miles: (f64::INFINITY, f64::NEG_INFINITY),
            receipts: (f64::INFINITY, f64::NEG_INFINITY),
            expected: (f64::INFINITY, f64::NEG_INFINITY),
        };

        for example in self.examples.iter() {
            summary.days.0 = summary.days.0.min(example.days());
            summary.days.1 = summary.days.1.max(example.days());
            summary.miles.0 = summary.miles.0.min(example.miles());
            summary.miles.1 = summary.miles.1.max(example.miles());
            summary.receipts.0 = summary.receipts.0.min(example.receipts());
            summary.receipts.1 = summary.receipts.1.max(example.receipts());
            summary.expected.0 = summary.expected.0.min(example.expected);
            summary.expected.1 = summary.expected.1.max(example.expected);
        }

        summary
    }
}

/// Lazily loaded dataset: parsed on first access, then shared by every
/// component that holds the handle.
#[derive(Debug)]
pub struct DatasetHandle {
    path: PathBuf,
    policy: InvalidRecordPolicy,
    cell: OnceCell<Dataset>,
}

impl DatasetHandle {
    pub fn new(path: impl Into<PathBuf>, policy: InvalidRecordPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            cell: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn get(&self) -> Result<&Dataset> {
        self.cell.get_or_try_init(|| {
            info!("Loading cases from: {}", self.path.display());
            let dataset = Dataset::from_json_path(&self.path, self.policy)?;
            info!(
                "Loaded {} examples ({} rejected)",
                dataset.len(),
                dataset.rejected().len()
            );
            Ok(dataset)
        })
    }
}
