// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`   — trains a model and writes a run directory
//   2. `predict` — loads a run's best checkpoint and predicts
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

// Declare the commands submodule
pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, PredictArgs, TrainArgs};

/// The main CLI struct — clap reads the fields and generates
/// argument parsing code automatically via the Parser derive macro.
#[derive(Parser, Debug)]
#[command(
    name = "residue-trainer",
    version = "0.1.0",
    about = "Train per-residue protein classifiers on precomputed embeddings, then predict."
)]
pub struct Cli {
    /// The subcommand to run (train or predict)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::Predict(args) => run_predict(args),
        }
    }
}

/// Handles the `train` subcommand.
/// Builds a TrainConfig from `--config` plus flags and hands off to Layer 2.
fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::{TrainConfig, TrainUseCase};

    let base = match &args.config {
        Some(path) => TrainConfig::from_file(path)?,
        None       => TrainConfig::default(),
    };
    let config = args.overlay(base);
    tracing::info!("Starting experiment '{}'", config.experiment_name());

    let summary = TrainUseCase::new(config).execute()?;

    println!("Training complete: {}", summary.experiment_name);
    if let (Some(epoch), Some(reason)) = (summary.best_epoch, summary.stop_reason) {
        println!("  best epoch {epoch} (stopped: {reason})");
    }
    if let Some(test) = &summary.test {
        println!("  test loss  {:.4}", test.loss);
        for (name, value) in &test.metrics {
            println!("  test {name:<9}{value:.4}");
        }
    }
    Ok(())
}

/// Handles the `predict` subcommand.
fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::PredictUseCase;

    let use_case    = PredictUseCase::new(&args.output_dir, args.batch_size)?;
    let predictions = use_case.predict(&args.embeddings_file)?;
    let path        = use_case.write(&predictions, args.out.as_deref())?;

    println!("Predicted {} sequences → {}", predictions.len(), path.display());
    Ok(())
}
