//! End-to-end fitting run
//!
//! grid (+ refine) -> segment against the best base without its receipt
//! term -> outlier detection -> candidate rules -> rule-subset search ->
//! final evaluation.

use reimburse_core::{evaluate, EvaluationResult, Formula, LinearRates, OverrideRule, TripInput};
use serde::Serialize;
use tracing::{info, instrument};

use crate::config::FitConfig;
use crate::dataset::Dataset;
use crate::errors::Result;
use crate::outliers::{OutlierDetector, OutlierReport};
use crate::search::{GridSearch, RuleSubsetSearch, SearchOutcome, SubsetOutcome};
use crate::segment::{SegmentSummary, Segmenter};

/// Everything a fitting run found
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitReport {
    /// Final formula: best base rates plus the selected rules
    pub formula: Formula,
    pub grid: SearchOutcome,
    /// Supported buckets, by descending support
    pub segments: Vec<SegmentSummary>,
    /// Examples without receipts, left out of the segment statistics
    pub skipped: usize,
    pub outliers: OutlierReport,
    pub candidate_rules: Vec<OverrideRule>,
    pub rules: SubsetOutcome,
    pub selected_rules: Vec<OverrideRule>,
    pub evaluation: EvaluationResult,
}

#[derive(Debug, Clone, Default)]
pub struct FitPipeline {
    config: FitConfig,
}

impl FitPipeline {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Formula whose rules stay fixed while the base rates are searched
    pub fn template(&self) -> Formula {
        let mut template = Formula::fitted();
        template.overrides.clear();
        if !self.config.rules.trip_length_corrections {
            template.corrections.clear();
        }
        template
    }

    pub fn run_dataset(&self, dataset: &Dataset) -> Result<FitReport> {
        self.run(dataset.examples())
    }

    #[instrument(skip_all, fields(examples = examples.len(), parallel = self.config.parallel))]
    pub fn run(&self, examples: &[reimburse_core::Example]) -> Result<FitReport> {
        let config = &self.config;
        config.validate()?;

        info!(
            "Grid search over {} base-rate candidates",
            config.grid.size()
        );
        let grid = GridSearch::new(self.template())
            .parallel(config.parallel)
            .refine(examples, &config.grid, &config.refine)?;
        info!(
            "Best base {} (error {:.2}, first candidate {:.2}, {} evaluated)",
            grid.best.base, grid.best_score, grid.first_score, grid.evaluated
        );

        let best = grid.best.clone();
        let without_receipts: LinearRates = best.base.without_receipts();
        let base = move |input: &TripInput| best.evaluate_with(&without_receipts, input);
        let segmenter = Segmenter::new(
            config.segments.bucket_spec(),
            base,
            config.segments.min_support,
        );
        let table = segmenter.segment(examples);
        info!(
            "{} buckets, {} supported, {} examples without receipts",
            table.len(),
            table.supported().count(),
            table.skipped
        );

        let outliers = OutlierDetector::new(config.outliers).detect(&segmenter, &table, examples);
        let mut candidate_rules = outliers.candidate_rules(config.outliers.max_candidates);
        if config.rules.segment_rules {
            candidate_rules.extend(table.to_override_rules());
        }
        info!(
            "{} outliers flagged, {} candidate rules",
            outliers.len(),
            candidate_rules.len()
        );

        let rule_search = RuleSubsetSearch::new(
            grid.best.clone(),
            candidate_rules.clone(),
            config.rules.max_subset_size,
        )
        .parallel(config.parallel);
        let rules = rule_search.run(examples)?;
        let selected_rules = rules.selected_rules(rule_search.candidates());
        info!(
            "Selected {} rules (error {:.2} -> {:.2})",
            selected_rules.len(),
            rules.baseline_score,
            rules.best_score
        );

        let formula = rules.best.clone();
        let evaluation = evaluate(&formula, examples, config.report.worst)?;

        Ok(FitReport {
            formula,
            grid,
            segments: table.summaries(),
            skipped: table.skipped,
            outliers,
            candidate_rules,
            rules,
            selected_rules,
            evaluation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{ParamRange, ParameterSpace};
    use reimburse_core::{Example, Feature, ModelError, Predicate};

    fn small_config() -> FitConfig {
        FitConfig {
            parallel: false,
            grid: ParameterSpace {
                day_rate: ParamRange::stepped(80.0, 100.0, 5.0),
                mile_rate: ParamRange::stepped(0.5, 0.7, 0.05),
                receipt_rate: ParamRange::stepped(0.2, 0.5, 0.05),
            },
            ..FitConfig::default()
        }
    }

    /// Linear cases plus a block of 6-day trips whose receipts are ignored
    fn examples() -> Vec<Example> {
        let rates = LinearRates::new(90.0, 0.6, 0.35);
        let mut examples = Vec::new();
        for days in 3..=7u32 {
            for receipts in [40.0, 90.0, 160.0, 220.0, 310.0, 400.0] {
                let input = TripInput::new(days, 50.0 * f64::from(days), receipts * f64::from(days));
                let mut expected = rates.apply(&input);
                if days == 6 && receipts > 300.0 {
                    expected -= 0.35 * input.receipts;
                }
                examples.push(Example { input, expected });
            }
        }
        examples
    }

    /// Twelve 4-day trips paid at receipt rate 0.35 and two expensive ones
    /// (spend per day 320 and 330) paid at 0.10
    fn low_receipt_region() -> Vec<Example> {
        let rates = LinearRates::new(90.0, 0.6, 0.35);
        let mut examples: Vec<Example> = (0..12)
            .map(|i| {
                let step = f64::from(i);
                let input = TripInput::new(4, 100.0 + 10.0 * step, 4.0 * (50.0 + 10.0 * step));
                Example {
                    input,
                    expected: rates.apply(&input),
                }
            })
            .collect();
        let deviant = LinearRates::new(90.0, 0.6, 0.10);
        for receipts in [1280.0, 1320.0] {
            let input = TripInput::new(4, 120.0, receipts);
            examples.push(Example {
                input,
                expected: deviant.apply(&input),
            });
        }
        examples
    }

    fn fixed_grid_config() -> FitConfig {
        let mut config = FitConfig {
            parallel: false,
            grid: ParameterSpace {
                day_rate: ParamRange::fixed(90.0),
                mile_rate: ParamRange::fixed(0.6),
                receipt_rate: ParamRange::fixed(0.35),
            },
            ..FitConfig::default()
        };
        config.segments.spend_width = 0;
        config.rules.trip_length_corrections = false;
        config
    }

    #[test]
    fn outlier_region_becomes_selected_rule() {
        let report = FitPipeline::new(fixed_grid_config())
            .run(&low_receipt_region())
            .unwrap();

        assert_eq!(report.segments.len(), 1);
        assert_eq!(report.outliers.len(), 2);
        let flagged: Vec<usize> = report.outliers.outliers.iter().map(|o| o.index).collect();
        assert!(flagged.contains(&12) && flagged.contains(&13));
        assert!(report.outliers.outliers.iter().all(|o| o.deviation < -2.0));

        let region = Predicate::days_eq(4).within(Feature::SpendPerDay, 300.0, 350.0);
        assert_eq!(report.candidate_rules.len(), 1);
        assert_eq!(report.selected_rules.len(), 1);
        let rule = &report.selected_rules[0];
        assert_eq!(rule.predicate, region);
        assert_eq!(rule.name, "outlier 4d_300spend");
        assert!((rule.rates.receipt_rate.unwrap() - 0.10).abs() < 1e-12);

        assert!(report.rules.baseline_score > 600.0);
        assert!(report.rules.best_score < 1e-6);
        assert_eq!(report.formula.overrides, report.selected_rules);
        assert!(report.evaluation.total_error < 1e-6);
    }

    #[test]
    fn pipeline_improves_on_plain_grid() {
        let mut config = small_config();
        config.rules.trip_length_corrections = false;
        let report = FitPipeline::new(config).run(&examples()).unwrap();

        assert!(report.grid.best_score <= report.grid.first_score);
        assert!(report.rules.best_score <= report.rules.baseline_score);
        assert!(report.evaluation.total_error <= report.grid.best_score + 1e-6);
        assert_eq!(report.evaluation.count, 30);
        assert_eq!(report.selected_rules.len(), report.rules.selected.len());
        assert_eq!(
            report.formula.overrides.len(),
            report.selected_rules.len()
        );
    }

    #[test]
    fn template_respects_correction_switch() {
        let mut config = FitConfig::default();
        assert!(FitPipeline::new(config.clone()).template().overrides.is_empty());
        assert_eq!(FitPipeline::new(config.clone()).template().corrections.len(), 2);
        config.rules.trip_length_corrections = false;
        assert!(FitPipeline::new(config).template().corrections.is_empty());
    }

    #[test]
    fn runs_are_deterministic() {
        let examples = examples();
        let pipeline = FitPipeline::new(small_config());
        let first = pipeline.run(&examples).unwrap();
        let second = pipeline.run(&examples).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_is_an_error() {
        let err = FitPipeline::new(small_config()).run(&[]).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::TrainerError::Model(ModelError::EmptyExampleSet)
        ));
    }
}
