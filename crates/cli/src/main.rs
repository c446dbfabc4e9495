//! Travel reimbursement calculator
//!
//! Prints the reimbursement for one trip. Logs go to stderr so stdout
//! carries nothing but the amount.

use anyhow::{bail, Context, Result};
use clap::Parser;
use reimburse_core::{Formula, ReimbursementPredictor};
use reimburse_trainer::ModelArtifact;
use std::path::{Path, PathBuf};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "calculate-reimbursement")]
#[command(about = "Calculate the reimbursement for a business trip", long_about = None)]
#[command(version)]
struct Cli {
    /// Trip duration in days
    trip_duration_days: u32,

    /// Miles traveled
    #[arg(allow_negative_numbers = true)]
    miles_traveled: f64,

    /// Total receipts amount
    #[arg(allow_negative_numbers = true)]
    total_receipts_amount: f64,

    /// Fitted model artifact (model.json) to use instead of the built-in formula
    #[arg(long)]
    model: Option<PathBuf>,

    /// Verbose logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let formula = match &cli.model {
        Some(path) => load_formula(path)?,
        None => Formula::fitted(),
    };
    debug!("Using formula '{}' with base {}", formula.name, formula.base);

    let amount = ReimbursementPredictor::new(formula)
        .predict(
            cli.trip_duration_days,
            cli.miles_traveled,
            cli.total_receipts_amount,
        )
        .context("Invalid trip")?;

    println!("{amount}");
    Ok(())
}

/// Load a fitted artifact, refusing one whose formula no longer matches its
/// recorded hash
fn load_formula(path: &Path) -> Result<Formula> {
    let artifact = ModelArtifact::load(path)
        .with_context(|| format!("Failed to load model {}", path.display()))?;
    if !artifact.verify()? {
        bail!(
            "Model {} does not match its recorded hash {}",
            path.display(),
            artifact.formula_hash
        );
    }
    debug!(
        "Loaded model fitted at {} (score {})",
        artifact.fitted_at, artifact.score.score
    );
    Ok(artifact.formula)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use reimburse_core::{evaluate, Example, LinearRates};

    #[test]
    fn parses_three_positionals() {
        let cli = Cli::try_parse_from(["calculate-reimbursement", "8", "795", "1645.99"]).unwrap();
        assert_eq!(cli.trip_duration_days, 8);
        assert_eq!(cli.miles_traveled, 795.0);
        assert_eq!(cli.total_receipts_amount, 1645.99);
        assert!(cli.model.is_none());
    }

    #[test]
    fn wrong_argument_count_is_a_usage_error() {
        let err = Cli::try_parse_from(["calculate-reimbursement", "8", "795"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);

        let err = Cli::try_parse_from(["calculate-reimbursement", "8", "795", "1", "2"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn fractional_days_are_rejected() {
        assert!(Cli::try_parse_from(["calculate-reimbursement", "2.5", "10", "10"]).is_err());
    }

    #[test]
    fn negative_amounts_parse_then_fail_validation() {
        let cli = Cli::try_parse_from(["calculate-reimbursement", "3", "-5", "10"]).unwrap();
        assert!(ReimbursementPredictor::default()
            .predict(cli.trip_duration_days, cli.miles_traveled, cli.total_receipts_amount)
            .is_err());
    }

    #[test]
    fn loads_and_verifies_artifact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let formula = Formula::linear(LinearRates::new(100.0, 0.58, 1.0));
        let evaluation = evaluate(&formula, &[Example::new(8, 795.0, 1645.99, 644.69)], 1)?;
        let paths = ModelArtifact::new(formula.clone(), &evaluation)?.save(dir.path())?;

        assert_eq!(load_formula(&paths.model)?, formula);

        let mut tampered = ModelArtifact::load(&paths.model)?;
        tampered.formula.base.day_rate = 1.0;
        std::fs::write(&paths.model, reimburse_trainer::artifact::canonical_json_string(&tampered)?)?;
        assert!(load_formula(&paths.model).is_err());
        Ok(())
    }
}
