//! Reimbursement formula fitter CLI
//!
//! Fits base rates and special-case rules against a labeled case file and
//! writes a hashed model artifact.

use anyhow::{Context, Result};
use clap::Parser;
use reimburse_trainer::{
    DatasetHandle, FitConfig, FitPipeline, InvalidRecordPolicy, ModelArtifact,
};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "reimburse-fit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deterministic fitter for travel reimbursement formulas", long_about = None)]
struct Args {
    /// Labeled case file (JSON array of {input, expected_output})
    #[arg(short, long, default_value = "public_cases.json")]
    cases: PathBuf,

    /// TOML fit configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for model and hash
    #[arg(short, long, default_value = "models")]
    output: PathBuf,

    /// Worst cases to report (overrides the config)
    #[arg(long)]
    worst: Option<usize>,

    /// Drop invalid records instead of aborting
    #[arg(long)]
    skip_invalid: bool,

    /// Score candidates on a single thread
    #[arg(long)]
    sequential: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Reimbursement formula fitter v{}", env!("CARGO_PKG_VERSION"));
    info!("═══════════════════════════════════════════");

    let mut config = match &args.config {
        Some(path) => FitConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => FitConfig::default(),
    };
    if let Some(worst) = args.worst {
        config.report.worst = worst;
    }
    if args.sequential {
        config.parallel = false;
    }

    let policy = if args.skip_invalid {
        InvalidRecordPolicy::Skip
    } else {
        InvalidRecordPolicy::Abort
    };
    let handle = DatasetHandle::new(&args.cases, policy);
    let dataset = handle.get().context("Failed to load cases")?;
    for rejected in dataset.rejected() {
        warn!("  record {}: {}", rejected.index, rejected.reason);
    }

    let summary = dataset.summary();
    info!("Dataset ranges:");
    info!("  days: {}..={}", summary.days.0, summary.days.1);
    info!("  miles: {:.2}..={:.2}", summary.miles.0, summary.miles.1);
    info!("  receipts: {:.2}..={:.2}", summary.receipts.0, summary.receipts.1);
    info!("  expected: {:.2}..={:.2}", summary.expected.0, summary.expected.1);

    info!("═══════════════════════════════════════════");
    info!("Starting fit...");
    let report = FitPipeline::new(config)
        .run_dataset(dataset)
        .context("Fit failed")?;

    for segment in report.segments.iter().take(10) {
        info!(
            "  {:<20} n={:<4} median={:.3} q25={:.3} q75={:.3}",
            segment.bucket,
            segment.stats.count,
            segment.stats.median,
            segment.stats.q25,
            segment.stats.q75
        );
    }
    for outlier in report.outliers.outliers.iter().take(10) {
        info!(
            "  outlier #{} ({}d, {:.0} mi, ${:.2}) implied {:.3} vs mean {:.3} ({:+.1} sd)",
            outlier.index,
            outlier.example.days(),
            outlier.example.miles(),
            outlier.example.receipts(),
            outlier.implied,
            outlier.segment_mean,
            outlier.deviation
        );
    }

    let evaluation = &report.evaluation;
    info!("═══════════════════════════════════════════");
    info!("Fit complete!");
    info!("  Base rates: {}", report.formula.base);
    for rule in &report.selected_rules {
        info!("  Rule: {}", rule);
    }
    info!("  Score: {}", evaluation.score());
    info!("  Mean error: {:.2}", evaluation.mean_error);
    info!("  Max error: {:.2}", evaluation.max_error);
    info!(
        "  Exact matches (±0.01): {}/{}",
        evaluation.exact_matches, evaluation.count
    );
    info!(
        "  Close matches (±1.00): {}/{}",
        evaluation.close_matches, evaluation.count
    );
    info!("Worst cases:");
    for case in &evaluation.worst_cases {
        info!(
            "  #{}: {}d, {:.0} mi, ${:.2} expected {:.2} got {:.2} (error {:.2})",
            case.index,
            case.example.days(),
            case.example.miles(),
            case.example.receipts(),
            case.example.expected,
            case.predicted,
            case.error
        );
    }

    let artifact =
        ModelArtifact::new(report.formula, evaluation).context("Failed to build model artifact")?;
    let paths = artifact
        .save(&args.output)
        .context("Failed to write model artifact")?;

    info!("═══════════════════════════════════════════");
    info!("✓ Fit completed successfully");
    info!("  Model: {}", paths.model.display());
    info!("  Hash: {} ({})", paths.hash.display(), artifact.formula_hash);

    Ok(())
}
