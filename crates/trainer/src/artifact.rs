//! Fitted model artifact
//!
//! A fitted formula plus its in-sample score, serialized as canonical JSON
//! (object keys sorted recursively) so the BLAKE3 hash of the formula is
//! stable across runs and platforms.

use chrono::{DateTime, Utc};
use reimburse_core::{EvaluationResult, Formula};
use serde::{Deserialize, Serialize};
use serde_json::{map::Map, ser::PrettyFormatter, Serializer, Value};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::errors::Result;

/// File name of the serialized artifact inside the output directory
pub const MODEL_FILE: &str = "model.json";
/// File name of the hex formula hash inside the output directory
pub const HASH_FILE: &str = "model.hash";

/// Headline numbers of the final evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub total_error: f64,
    pub mean_error: f64,
    pub max_error: f64,
    pub exact_matches: usize,
    pub close_matches: usize,
    pub score: i64,
}

impl From<&EvaluationResult> for ScoreSummary {
    fn from(result: &EvaluationResult) -> Self {
        Self {
            count: result.count,
            total_error: result.total_error,
            mean_error: result.mean_error,
            max_error: result.max_error,
            exact_matches: result.exact_matches,
            close_matches: result.close_matches,
            score: result.score(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Trainer version that produced the artifact
    pub version: String,
    pub fitted_at: DateTime<Utc>,
    pub formula: Formula,
    /// Hex BLAKE3 of the formula's canonical JSON
    pub formula_hash: String,
    pub score: ScoreSummary,
}

impl ModelArtifact {
    pub fn new(formula: Formula, evaluation: &EvaluationResult) -> Result<Self> {
        let formula_hash = formula_hash(&formula)?;
        Ok(Self {
            version: crate::VERSION.to_string(),
            fitted_at: Utc::now(),
            formula,
            formula_hash,
            score: ScoreSummary::from(evaluation),
        })
    }

    /// Recompute the formula hash and compare with the recorded one
    pub fn verify(&self) -> Result<bool> {
        Ok(formula_hash(&self.formula)? == self.formula_hash)
    }

    /// Write `model.json` and `model.hash` into `dir`, creating it if needed
    pub fn save(&self, dir: &Path) -> Result<ArtifactPaths> {
        std::fs::create_dir_all(dir)?;

        let model = dir.join(MODEL_FILE);
        info!("Saving model to: {}", model.display());
        std::fs::write(&model, canonical_json_string(self)?)?;

        let hash = dir.join(HASH_FILE);
        info!("Saving hash to: {}", hash.display());
        std::fs::write(&hash, &self.formula_hash)?;

        Ok(ArtifactPaths { model, hash })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Where [`ModelArtifact::save`] wrote its files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub hash: PathBuf,
}

/// Hex BLAKE3 of the canonical JSON encoding of `formula`
pub fn formula_hash(formula: &Formula) -> Result<String> {
    let json = canonical_json_string(formula)?;
    Ok(hex::encode(blake3::hash(json.as_bytes()).as_bytes()))
}

/// Recursively sort object keys
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::with_capacity(entries.len());
            for (key, val) in entries {
                sorted.insert(key, canonicalize(val));
            }
            Value::Object(sorted)
        }
        Value::Array(elements) => Value::Array(elements.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Pretty JSON with sorted keys and two-space indentation
pub fn canonical_json_string<T: Serialize>(value: &T) -> Result<String> {
    let canonical = canonicalize(serde_json::to_value(value)?);
    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"  ");
    let mut serializer = Serializer::with_formatter(&mut buffer, formatter);
    canonical.serialize(&mut serializer)?;
    // serde_json only emits valid UTF-8
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
