//! Coefficient and rule-subset search
//!
//! Exhaustive, bounded enumeration scored by total absolute error. The best
//! candidate is the first one (in enumeration order) with the lowest error;
//! the parallel path reduces on `(error, index)` so it returns exactly what
//! the sequential loop would.

use rayon::prelude::*;
use reimburse_core::{total_error, Example, Formula, LinearRates, ModelError, OverrideRule};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info, instrument};

use crate::errors::{Result, TrainerError};

/// Upper bound on base-rate combinations per grid
pub const MAX_GRID_CANDIDATES: usize = 20_000_000;
/// Upper bound on rule subsets per search
pub const MAX_RULE_SUBSETS: usize = 1_000_000;

const STEP_EPSILON: f64 = 1e-9;

/// Values one coefficient may take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamRange {
    /// `start + i * step` for every `i` with the value `<= end`
    Stepped { start: f64, end: f64, step: f64 },
    /// Explicit list, evaluated in the given order
    Values(Vec<f64>),
}

impl ParamRange {
    pub fn stepped(start: f64, end: f64, step: f64) -> Self {
        ParamRange::Stepped { start, end, step }
    }

    pub fn fixed(value: f64) -> Self {
        ParamRange::Values(vec![value])
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        match self {
            ParamRange::Stepped { start, end, step } => {
                if !(start.is_finite() && end.is_finite() && step.is_finite()) {
                    return Err(TrainerError::InvalidConfig(format!(
                        "{name}: bounds and step must be finite"
                    )));
                }
                if *step <= 0.0 {
                    return Err(TrainerError::InvalidConfig(format!(
                        "{name}: step must be positive, got {step}"
                    )));
                }
                if start > end {
                    return Err(TrainerError::InvalidConfig(format!(
                        "{name}: start {start} exceeds end {end}"
                    )));
                }
                // bounded before the cast; a saturated usize would overflow len()
                let count = stepped_count(*start, *end, *step);
                if count > MAX_GRID_CANDIDATES as f64 {
                    return Err(TrainerError::InvalidConfig(format!(
                        "{name}: {count} values exceed the grid limit"
                    )));
                }
            }
            ParamRange::Values(values) => {
                if values.is_empty() {
                    return Err(TrainerError::InvalidConfig(format!(
                        "{name}: value list is empty"
                    )));
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(TrainerError::InvalidConfig(format!(
                        "{name}: values must be finite"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of values; assumes a validated range
    pub fn len(&self) -> usize {
        match self {
            ParamRange::Stepped { start, end, step } => {
                stepped_count(*start, *end, *step) as usize
            }
            ParamRange::Values(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enumerated values. Stepped values are index based, so there is no
    /// accumulated drift over long ranges.
    pub fn values(&self) -> Vec<f64> {
        match self {
            ParamRange::Stepped { start, step, .. } => (0..self.len())
                .map(|i| start + i as f64 * step)
                .collect(),
            ParamRange::Values(values) => values.clone(),
        }
    }

    /// Spacing between neighbouring values, if there is more than one
    pub fn resolution(&self) -> Option<f64> {
        match self {
            ParamRange::Stepped { step, .. } => Some(*step),
            ParamRange::Values(values) => {
                let mut sorted = values.clone();
                sorted.sort_by(f64::total_cmp);
                sorted
                    .windows(2)
                    .map(|pair| pair[1] - pair[0])
                    .filter(|gap| *gap > 0.0)
                    .min_by(f64::total_cmp)
            }
        }
    }

    /// Finer range centered on `value`, spanning one old step either side
    pub fn around(&self, value: f64, divisor: f64) -> Self {
        match self.resolution() {
            Some(step) => ParamRange::Stepped {
                start: value - step,
                end: value + step,
                step: step / divisor,
            },
            None => ParamRange::fixed(value),
        }
    }
}

fn stepped_count(start: f64, end: f64, step: f64) -> f64 {
    ((end - start) / step + STEP_EPSILON).floor() + 1.0
}

/// Cartesian grid over the three base rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSpace {
    pub day_rate: ParamRange,
    pub mile_rate: ParamRange,
    pub receipt_rate: ParamRange,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self {
            day_rate: ParamRange::stepped(80.0, 100.0, 2.0),
            mile_rate: ParamRange::stepped(0.50, 0.70, 0.02),
            receipt_rate: ParamRange::stepped(0.20, 0.40, 0.02),
        }
    }
}

impl ParameterSpace {
    pub fn validate(&self) -> Result<()> {
        self.day_rate.validate("day_rate")?;
        self.mile_rate.validate("mile_rate")?;
        self.receipt_rate.validate("receipt_rate")?;
        let size = self
            .day_rate
            .len()
            .checked_mul(self.mile_rate.len())
            .and_then(|n| n.checked_mul(self.receipt_rate.len()));
        match size {
            Some(n) if n <= MAX_GRID_CANDIDATES => Ok(()),
            _ => Err(TrainerError::InvalidConfig(format!(
                "grid exceeds {MAX_GRID_CANDIDATES} candidates"
            ))),
        }
    }

    /// Saturates for unvalidated spaces
    pub fn size(&self) -> usize {
        self.day_rate
            .len()
            .saturating_mul(self.mile_rate.len())
            .saturating_mul(self.receipt_rate.len())
    }

    /// Day rate outermost, receipt rate innermost
    pub fn candidates(&self) -> Vec<LinearRates> {
        let days = self.day_rate.values();
        let miles = self.mile_rate.values();
        let receipts = self.receipt_rate.values();
        let mut candidates = Vec::with_capacity(days.len() * miles.len() * receipts.len());
        for &day_rate in &days {
            for &mile_rate in &miles {
                for &receipt_rate in &receipts {
                    candidates.push(LinearRates::new(day_rate, mile_rate, receipt_rate));
                }
            }
        }
        candidates
    }

    pub fn around(&self, center: &LinearRates, divisor: f64) -> Self {
        Self {
            day_rate: self.day_rate.around(center.day_rate, divisor),
            mile_rate: self.mile_rate.around(center.mile_rate, divisor),
            receipt_rate: self.receipt_rate.around(center.receipt_rate, divisor),
        }
    }
}

/// Coarse-to-fine refinement settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    pub rounds: usize,
    /// Each round divides the step by this factor
    pub divisor: f64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            rounds: 2,
            divisor: 4.0,
        }
    }
}

impl RefineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.divisor.is_finite() && self.divisor > 1.0) {
            return Err(TrainerError::InvalidConfig(format!(
                "refine.divisor must be greater than 1, got {}",
                self.divisor
            )));
        }
        Ok(())
    }
}

/// Result of a base-rate grid search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub best: Formula,
    pub best_score: f64,
    /// Score of the first enumerated candidate
    pub first_score: f64,
    pub evaluated: usize,
}

/// Grid search over base rates, with the template's rules held fixed
#[derive(Debug, Clone)]
pub struct GridSearch {
    template: Formula,
    parallel: bool,
}

impl GridSearch {
    pub fn new(template: Formula) -> Self {
        Self {
            template,
            parallel: false,
        }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Evaluate every grid point and keep the first lowest-error one
    #[instrument(skip(self, examples, space), fields(examples = examples.len(), candidates = space.size()))]
    pub fn run(&self, examples: &[Example], space: &ParameterSpace) -> Result<SearchOutcome> {
        space.validate()?;
        if examples.is_empty() {
            return Err(ModelError::EmptyExampleSet.into());
        }

        let candidates = space.candidates();
        let template = &self.template;
        let score = |rates: &LinearRates| {
            total_error(
                &|input: &reimburse_core::TripInput| template.evaluate_with(rates, input),
                examples,
            )
        };

        let first_score = score(&candidates[0]);
        let (index, best_score) = lowest_error(&candidates, self.parallel, score)
            .ok_or(ModelError::EmptyExampleSet)?;
        let best_rates = candidates[index];

        debug!(
            "Best of {} candidates: {} (error {:.2})",
            candidates.len(),
            best_rates,
            best_score
        );

        Ok(SearchOutcome {
            best: template.with_rates(best_rates),
            best_score,
            first_score,
            evaluated: candidates.len(),
        })
    }

    /// Coarse grid followed by bounded rounds of finer grids centered on the
    /// incumbent. A round that does not improve keeps the incumbent.
    pub fn refine(
        &self,
        examples: &[Example],
        space: &ParameterSpace,
        refine: &RefineConfig,
    ) -> Result<SearchOutcome> {
        refine.validate()?;
        let mut outcome = self.run(examples, space)?;
        let mut current = space.clone();

        for round in 0..refine.rounds {
            current = current.around(&outcome.best.base, refine.divisor);
            let finer = self.run(examples, &current)?;
            outcome.evaluated += finer.evaluated;
            if finer.best_score < outcome.best_score {
                info!(
                    "Refine round {}: {} -> {:.2}",
                    round + 1,
                    finer.best.base,
                    finer.best_score
                );
                outcome.best = finer.best;
                outcome.best_score = finer.best_score;
            } else {
                debug!("Refine round {} kept incumbent", round + 1);
            }
        }

        Ok(outcome)
    }
}

/// Plain linear grid search over `space`
pub fn search(examples: &[Example], space: &ParameterSpace) -> Result<SearchOutcome> {
    GridSearch::new(Formula::linear(LinearRates::new(0.0, 0.0, 0.0))).run(examples, space)
}

/// Result of a rule-subset search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsetOutcome {
    pub best: Formula,
    /// Candidate indices of the chosen rules, ascending
    pub selected: Vec<usize>,
    pub best_score: f64,
    /// Score of the template with no candidate rules
    pub baseline_score: f64,
    pub evaluated: usize,
}

impl SubsetOutcome {
    pub fn selected_rules(&self, candidates: &[OverrideRule]) -> Vec<OverrideRule> {
        self.selected
            .iter()
            .filter_map(|&i| candidates.get(i).cloned())
            .collect()
    }
}

/// Exhaustive search over subsets of candidate overriding rules layered on
/// a template formula
#[derive(Debug, Clone)]
pub struct RuleSubsetSearch {
    template: Formula,
    candidates: Vec<OverrideRule>,
    max_size: usize,
    parallel: bool,
}

impl RuleSubsetSearch {
    pub fn new(template: Formula, candidates: Vec<OverrideRule>, max_size: usize) -> Self {
        Self {
            template,
            candidates,
            max_size,
            parallel: false,
        }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn candidates(&self) -> &[OverrideRule] {
        &self.candidates
    }

    /// Empty subset first, then sizes `1..=max_size` in lexicographic order
    pub fn subsets(&self) -> Result<Vec<Vec<usize>>> {
        let n = self.candidates.len();
        let k = self.max_size.min(n);
        let total = (1..=k).try_fold(1usize, |acc, size| {
            binomial(n, size).and_then(|c| acc.checked_add(c))
        });
        match total {
            Some(total) if total <= MAX_RULE_SUBSETS => {}
            _ => {
                return Err(TrainerError::InvalidConfig(format!(
                    "{n} candidate rules with subsets up to {k} exceed {MAX_RULE_SUBSETS} combinations"
                )))
            }
        }

        let mut subsets = vec![Vec::new()];
        for size in 1..=k {
            subsets.extend(combinations(n, size));
        }
        Ok(subsets)
    }

    #[instrument(skip(self, examples), fields(examples = examples.len(), rules = self.candidates.len()))]
    pub fn run(&self, examples: &[Example]) -> Result<SubsetOutcome> {
        if examples.is_empty() {
            return Err(ModelError::EmptyExampleSet.into());
        }
        let subsets = self.subsets()?;
        info!("Scoring {} rule subsets", subsets.len());

        let build = |subset: &Vec<usize>| {
            self.template
                .with_overrides(subset.iter().map(|&i| &self.candidates[i]))
        };
        let (index, best_score) = lowest_error(&subsets, self.parallel, |subset| {
            total_error(&build(subset), examples)
        })
        .ok_or(ModelError::EmptyExampleSet)?;

        Ok(SubsetOutcome {
            best: build(&subsets[index]),
            selected: subsets[index].clone(),
            best_score,
            baseline_score: total_error(&self.template, examples),
            evaluated: subsets.len(),
        })
    }
}

/// Index and error of the first lowest-error item
fn lowest_error<T, F>(items: &[T], parallel: bool, score: F) -> Option<(usize, f64)>
where
    T: Sync,
    F: Fn(&T) -> f64 + Sync + Send,
{
    if parallel {
        items
            .par_iter()
            .enumerate()
            .map(|(index, item)| (index, comparable(score(item))))
            .reduce_with(prefer_lower)
    } else {
        items
            .iter()
            .enumerate()
            .map(|(index, item)| (index, comparable(score(item))))
            .reduce(prefer_lower)
    }
}

/// NaN scores rank last
fn comparable(score: f64) -> f64 {
    if score.is_nan() {
        f64::INFINITY
    } else {
        score
    }
}

fn prefer_lower(a: (usize, f64), b: (usize, f64)) -> (usize, f64) {
    match a.1.total_cmp(&b.1) {
        Ordering::Less => a,
        Ordering::Greater => b,
        Ordering::Equal if a.0 <= b.0 => a,
        Ordering::Equal => b,
    }
}

fn binomial(n: usize, k: usize) -> Option<usize> {
    if k > n {
        return Some(0);
    }
    let k = k.min(n - k);
    (0..k).try_fold(1usize, |acc, i| Some(acc.checked_mul(n - i)? / (i + 1)))
}

/// All `size`-element index subsets of `0..n` in lexicographic order
fn combinations(n: usize, size: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if size == 0 || size > n {
        return out;
    }
    let mut current: Vec<usize> = (0..size).collect();
    loop {
        out.push(current.clone());
        // rightmost position that can still advance
        let Some(pos) = (0..size).rev().find(|&i| current[i] < n - size + i) else {
            return out;
        };
        current[pos] += 1;
        for i in pos + 1..size {
            current[i] = current[i - 1] + 1;
        }
    }
}
