// ============================================================
// Layer 6 — Run Store
// ============================================================
// Everything a run leaves behind, under one output directory:
//
//   <output_dir>/
//     train_config.json   ← the configuration the run used
//     out.json            ← RunSummary (written on success AND
//                           on failure, with the error text)
//     metrics.csv         ← MetricsLogger
//     checkpoints/        ← FileCheckpointSink
//
// out.json is what `predict` reads back: it carries the model
// choice, feature/class counts and the class vocabulary needed
// to rebuild the model and decode its output.
//
// Reference: Rust Book §9 (Error Handling)
//            serde_json documentation

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::train_use_case::TrainConfig;
use crate::domain::{
    history::{StopReason, TrainingHistory},
    labels::ClassVocabulary,
};
use crate::ml::trainer::BatchInference;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSizes {
    pub train: usize,
    pub val:   usize,
    pub test:  usize,
}

/// Test-partition results with predictions decoded to class symbols.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub loss:        f64,
    pub metrics:     BTreeMap<String, f64>,
    #[serde(default)]
    pub batches:     Vec<BatchInference>,
    pub predictions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub experiment_name:   String,
    pub config:            TrainConfig,
    pub vocabulary:        ClassVocabulary,
    pub partition_sizes:   PartitionSizes,
    pub n_features:        usize,
    pub n_classes:         usize,
    pub n_free_parameters: usize,
    pub class_weights:     Option<Vec<f32>>,
    pub history:           TrainingHistory,
    pub best_epoch:        Option<usize>,
    pub stop_reason:       Option<StopReason>,
    pub test:              Option<TestSummary>,
    pub training_seconds:  f64,
    pub total_seconds:     f64,
    pub error:             Option<String>,
}

impl RunSummary {
    /// An empty summary that the run fills in as it goes.
    pub fn new(config: &TrainConfig) -> Self {
        Self {
            experiment_name:   config.experiment_name(),
            config:            config.clone(),
            vocabulary:        ClassVocabulary::default(),
            partition_sizes:   PartitionSizes::default(),
            n_features:        0,
            n_classes:         0,
            n_free_parameters: 0,
            class_weights:     None,
            history:           TrainingHistory::default(),
            best_epoch:        None,
            stop_reason:       None,
            test:              None,
            training_seconds:  0.0,
            total_seconds:     0.0,
            error:             None,
        }
    }
}

/// Reads and writes the files of one output directory.
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Open an existing output directory without creating it.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        anyhow::ensure!(
            dir.is_dir(),
            "Output directory '{}' does not exist. Have you run 'train' first?",
            dir.display()
        );
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.dir.join("checkpoints")
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("train_config.json")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join("out.json")
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        write_json(&self.config_path(), cfg)?;
        tracing::debug!("Saved training config to '{}'", self.config_path().display());
        Ok(())
    }

    pub fn save_summary(&self, summary: &RunSummary) -> Result<()> {
        write_json(&self.summary_path(), summary)?;
        tracing::info!("Wrote run summary to '{}'", self.summary_path().display());
        Ok(())
    }

    pub fn load_summary(&self) -> Result<RunSummary> {
        read_json(&self.summary_path())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    // serde_json::to_string_pretty adds indentation for readability
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Cannot write '{}'", path.display()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'. Have you run 'train' first?", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Malformed JSON in '{}'", path.display()))
}
