// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Seed the run's random source  (Layer 6 - infra)
//   Step 2: Read sequences + labels       (Layer 4 - data)
//   Step 3: Open the embedding store      (Layer 4 - data)
//   Step 4: Index labels, partitions      (Layer 3 - domain)
//   Step 5: Build datasets + batchers     (Layer 4 - data)
//   Step 6: Class weights (optional)      (Layer 4 - data)
//   Step 7: Model, loss, optimizer        (Layer 5 - ml)
//   Step 8: Fit with early stopping       (Layer 5 - ml)
//   Step 9: Test inference                (Layer 5 - ml)
//   Step 10: Release the store, write out.json
//
// The embedding store is held from Step 3 until Step 9 and is
// dropped on every error path as well.
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Context, Result};
use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};
use serde::{Deserialize, Serialize};

use crate::data::{
    batcher::ResidueBatcher,
    class_weights::estimate_class_weights,
    dataset::ResidueDataset,
    embeddings::JsonEmbeddingStore,
    fasta::{label_records, read_fasta, sequence_map},
};
use crate::domain::{
    error::TrainerError,
    labels::{ClassVocabulary, IdentifierLabelIndex, LabelRecord, Partition},
    traits::EmbeddingStore,
};
use crate::infra::{
    checkpoint::{CheckpointSink, FileCheckpointSink},
    metrics::MetricsLogger,
    rng::RunRng,
    run_store::{PartitionSizes, RunStore, RunSummary, TestSummary},
};
use crate::ml::{
    loss::{LossRegistry, LossSpec},
    model::{ModelChoice, ModelSpec, ModelVisitor, ResidueModel},
    optim::{OptimizerRegistry, OptimizerSpec},
    scoring::MetricRegistry,
    trainer::{ConvergenceRule, Solver, SolverComponents, SolverConfig},
    TrainBackend,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// All settings for a training run.
// Serialisable so it can be saved next to the outputs and reloaded.
// #[serde(default)] lets a JSON config file name only the fields
// it wants to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub sequence_file:      String,
    pub labels_file:        String,
    pub embeddings_file:    String,
    pub embedder_name:      String,
    pub output_dir:         String,
    pub model_choice:       ModelChoice,
    pub loss_choice:        String,
    pub optimizer_choice:   String,
    pub learning_rate:      f64,
    pub batch_size:         usize,
    pub num_epochs:         usize,
    pub patience:           usize,
    /// Convergence rule threshold; None turns the rule off
    pub epsilon:            Option<f64>,
    pub convergence_window: usize,
    pub shuffle:            bool,
    pub use_class_weights:  bool,
    pub seed:               u64,
    pub dropout:            f64,
    pub metrics:            Vec<String>,
    pub primary_metric:     String,
    pub lower_is_better:    Vec<String>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            sequence_file:      "sequences.fasta".to_string(),
            labels_file:        "labels.fasta".to_string(),
            embeddings_file:    "embeddings.json".to_string(),
            embedder_name:      "custom_embeddings".to_string(),
            output_dir:         "output".to_string(),
            model_choice:       ModelChoice::Cnn,
            loss_choice:        "cross_entropy_loss".to_string(),
            optimizer_choice:   "adam".to_string(),
            learning_rate:      1e-3,
            batch_size:         128,
            num_epochs:         200,
            patience:           10,
            epsilon:            None,
            convergence_window: 3,
            shuffle:            true,
            use_class_weights:  false,
            seed:               42,
            dropout:            0.25,
            metrics:            MetricRegistry::default().names().map(str::to_string).collect(),
            primary_metric:     "loss".to_string(),
            lower_is_better:    vec!["loss".to_string()],
        }
    }
}

impl TrainConfig {
    /// Read a (possibly partial) JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file '{}'", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Malformed config file '{}'", path.display()))
    }

    /// `<embedder_name>_<model_choice>`, also the checkpoint key.
    pub fn experiment_name(&self) -> String {
        format!("{}_{}", self.embedder_name, self.model_choice)
    }

    pub fn validate(&self) -> std::result::Result<(), TrainerError> {
        let fail = |message: String| Err(TrainerError::config(message));

        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".into());
        }
        if self.num_epochs == 0 {
            return fail("num_epochs must be at least 1".into());
        }
        if self.patience == 0 {
            return fail("patience must be at least 1".into());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return fail(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return fail(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        if let Some(epsilon) = self.epsilon {
            if !(epsilon.is_finite() && epsilon > 0.0) || self.convergence_window == 0 {
                return fail("convergence rule needs epsilon > 0 and convergence_window >= 1".into());
            }
        }

        let registry = MetricRegistry::default();
        for name in &self.metrics {
            registry.build(name)?;
        }
        if self.primary_metric != "loss" && !self.metrics.contains(&self.primary_metric) {
            return fail(format!(
                "primary_metric '{}' must be 'loss' or one of the configured metrics",
                self.primary_metric
            ));
        }
        if !LossRegistry::<TrainBackend>::default().tags().any(|t| t == self.loss_choice) {
            return fail(format!("unknown loss_choice '{}'", self.loss_choice));
        }
        Ok(())
    }

    fn solver_config(&self) -> SolverConfig {
        SolverConfig {
            num_epochs:      self.num_epochs,
            patience:        self.patience,
            primary_metric:  self.primary_metric.clone(),
            lower_is_better: self.lower_is_better.clone(),
            convergence:     self.epsilon.map(|epsilon| ConvergenceRule {
                epsilon,
                window: self.convergence_window,
            }),
            checkpoint_key:  self.experiment_name(),
        }
    }
}

/// Where the best snapshot of a run is kept.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointTarget {
    #[cfg(test)]
    Memory,
    Directory(PathBuf),
}

/// Parsed inputs of a run, before any embedding is fetched.
pub struct TrainingInputs {
    pub records:   Vec<LabelRecord>,
    pub sequences: HashMap<String, String>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
// Owns the config and runs the full training pipeline.
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    /// Create a new TrainUseCase with the given configuration
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end, reading inputs
    /// from disk and writing every output under `output_dir`.
    pub fn execute(&self) -> Result<RunSummary> {
        let cfg = &self.config;
        cfg.validate()?;

        let run_store = RunStore::new(&cfg.output_dir)?;
        run_store.save_config(cfg)?;

        // ── Step 2: Read sequences and labels ─────────────────────────────────
        tracing::info!("Reading sequences from '{}'", cfg.sequence_file);
        let sequences = sequence_map(&read_fasta(&cfg.sequence_file)?)?;
        tracing::info!("Reading labels from '{}'", cfg.labels_file);
        let records = label_records(read_fasta(&cfg.labels_file)?);
        tracing::info!("Read {} sequences and {} label records", sequences.len(), records.len());

        // ── Step 3: Open the embedding store ──────────────────────────────────
        let store = JsonEmbeddingStore::open(&cfg.embeddings_file).map_err(TrainerError::from)?;

        let metrics_logger = MetricsLogger::new(run_store.dir(), &cfg.metrics)?;
        let mut summary    = RunSummary::new(cfg);
        let device         = Default::default();

        let outcome = run::<TrainBackend>(
            cfg,
            TrainingInputs { records, sequences },
            Box::new(store),
            &CheckpointTarget::Directory(run_store.checkpoint_dir()),
            Some(metrics_logger),
            &device,
            &mut summary,
        );

        finish(&run_store, summary, outcome)
    }
}

/// Write out.json for a finished or failed run. When the run failed,
/// its error is returned even if out.json cannot be written.
fn finish(run_store: &RunStore, mut summary: RunSummary, outcome: Result<()>) -> Result<RunSummary> {
    match outcome {
        Ok(()) => {
            run_store.save_summary(&summary)?;
            Ok(summary)
        }
        Err(e) => {
            summary.error = Some(format!("{e:#}"));
            if let Err(save_error) = run_store.save_summary(&summary) {
                tracing::error!("Cannot record the failure of '{}': {:#}", summary.experiment_name, save_error);
            }
            Err(e)
        }
    }
}

/// Run one training job from in-memory inputs.
///
/// `summary` is filled in as the run progresses, so after a failure
/// it still holds everything completed before the error.
pub fn run<B: AutodiffBackend>(
    cfg:            &TrainConfig,
    inputs:         TrainingInputs,
    store:          Box<dyn EmbeddingStore>,
    target:         &CheckpointTarget,
    metrics_logger: Option<MetricsLogger>,
    device:         &B::Device,
    summary:        &mut RunSummary,
) -> Result<()> {
    let started = Instant::now();

    // ── Step 1: Seed the run ──────────────────────────────────────────────────
    // Every random draw of the run comes from this one generator,
    // except dropout masks, which come from the backend seeded alike.
    let mut rng = RunRng::seeded(cfg.seed);
    rng.seed_backend::<B>();

    // ── Step 4: Index labels and partitions ───────────────────────────────────
    let index = IdentifierLabelIndex::build(&inputs.records, &inputs.sequences)?;
    let vocabulary = index.vocabulary().clone();
    let (train_n, val_n, test_n) = index.partitions().sizes();
    tracing::info!("Class vocabulary: {:?}", vocabulary.symbols());
    tracing::info!("Partitions: {} train, {} validation, {} test", train_n, val_n, test_n);
    let partitions = index.partitions();
    let folded = partitions
        .train()
        .iter()
        .chain(partitions.val())
        .chain(partitions.test())
        .filter(|id| index.fold(id).is_some())
        .count();
    if folded > 0 {
        tracing::info!("{} sequences carry a FOLD marker", folded);
    }
    summary.vocabulary      = vocabulary.clone();
    summary.partition_sizes = PartitionSizes { train: train_n, val: val_n, test: test_n };
    summary.n_classes       = vocabulary.len();

    // ── Step 5: Build datasets and batchers ───────────────────────────────────
    tracing::debug!("Embedding store holds {} entries", store.len());
    let train_set  = ResidueDataset::from_partition(Partition::Train, &index, store.as_ref(), None)?;
    let n_features = train_set
        .n_features()
        .ok_or_else(|| TrainerError::data("training partition has no samples"))?;
    let val_set  = ResidueDataset::from_partition(Partition::Val, &index, store.as_ref(), Some(n_features))?;
    let test_set = ResidueDataset::from_partition(Partition::Test, &index, store.as_ref(), Some(n_features))?;
    summary.n_features = n_features;
    tracing::info!("Number of features: {}", n_features);

    // ── Step 6: Class weights ─────────────────────────────────────────────────
    let class_weights = if cfg.use_class_weights {
        Some(estimate_class_weights(index.partition_labels(Partition::Train), &vocabulary)?)
    } else {
        None
    };
    summary.class_weights = class_weights.clone();

    let batchers = Batchers {
        train: ResidueBatcher::new(train_set, cfg.batch_size, cfg.shuffle),
        val:   ResidueBatcher::new(val_set, cfg.batch_size, false),
        test:  ResidueBatcher::new(test_set, cfg.batch_size, false),
    };

    // ── Step 7–9: Model, fit, test inference ──────────────────────────────────
    let spec = ModelSpec { n_features, n_classes: vocabulary.len(), dropout: cfg.dropout };
    let result = cfg.model_choice.build::<B, _>(
        &spec,
        &mut rng,
        device,
        FitAndTest {
            cfg,
            batchers: &batchers,
            vocabulary: &vocabulary,
            class_weights,
            target,
            metrics_logger,
            device,
            summary: &mut *summary,
        },
    );

    // ── Step 10: Release the store ────────────────────────────────────────────
    drop(store);
    summary.total_seconds = started.elapsed().as_secs_f64();
    result
}

struct Batchers {
    train: ResidueBatcher,
    val:   ResidueBatcher,
    test:  ResidueBatcher,
}

struct FitAndTest<'a, B: AutodiffBackend> {
    cfg:            &'a TrainConfig,
    batchers:       &'a Batchers,
    vocabulary:     &'a ClassVocabulary,
    class_weights:  Option<Vec<f32>>,
    target:         &'a CheckpointTarget,
    metrics_logger: Option<MetricsLogger>,
    device:         &'a B::Device,
    summary:        &'a mut RunSummary,
}

impl<B: AutodiffBackend> ModelVisitor<B> for FitAndTest<'_, B> {
    type Output = Result<()>;

    fn visit<M>(self, model: M, rng: &mut RunRng) -> Self::Output
    where
        M: ResidueModel<B> + AutodiffModule<B> + 'static,
        M::InnerModule: ResidueModel<B::InnerBackend>,
    {
        let cfg = self.cfg;
        let n_params = model.num_params();
        self.summary.n_free_parameters = n_params;
        tracing::info!("Model {} ready: {} free parameters", cfg.model_choice, n_params);

        let loss_spec = LossSpec { class_weights: self.class_weights };
        let metric_registry = MetricRegistry::default();
        let metrics = cfg
            .metrics
            .iter()
            .map(|name| metric_registry.build(name))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let checkpoints: Box<dyn CheckpointSink<B, M>> = match self.target {
            #[cfg(test)]
            CheckpointTarget::Memory => Box::new(crate::infra::checkpoint::InMemoryCheckpointSink::<M>::new()),
            CheckpointTarget::Directory(dir) => Box::new(FileCheckpointSink::<B>::new(dir, self.device.clone())?),
        };

        let components = SolverComponents {
            train_loss: LossRegistry::<B>::default().build(&cfg.loss_choice, &loss_spec)?,
            eval_loss:  LossRegistry::<B::InnerBackend>::default().build(&cfg.loss_choice, &loss_spec)?,
            optimizer:  OptimizerRegistry::<B, M>::default()
                .build(&cfg.optimizer_choice, &OptimizerSpec { learning_rate: cfg.learning_rate })?,
            metrics,
            checkpoints,
        };

        let mut solver = Solver::new(cfg.solver_config(), self.device.clone(), components)?;
        if let Some(logger) = self.metrics_logger {
            solver = solver.with_observer(Box::new(logger));
        }

        let training = Instant::now();
        let fitted = solver.fit(model, &self.batchers.train, &self.batchers.val, rng);
        self.summary.training_seconds = training.elapsed().as_secs_f64();

        let outcome = match fitted {
            Ok(outcome) => outcome,
            Err(failure) => {
                self.summary.history = failure.history.clone();
                return Err(failure.into());
            }
        };
        tracing::info!(
            "Best epoch {} ({}={:.4})",
            outcome.best_epoch, cfg.primary_metric, outcome.best_value
        );
        self.summary.history     = outcome.history;
        self.summary.best_epoch  = Some(outcome.best_epoch);
        self.summary.stop_reason = Some(outcome.stop_reason);

        let result = solver.inference(&outcome.model, &self.batchers.test, rng)?;
        for (name, value) in &result.metrics {
            tracing::info!("Test {}: {:.4}", name, value);
        }

        let predictions = result
            .predictions
            .iter()
            .map(|p| Ok((p.id.clone(), self.vocabulary.decode_sequence(&p.classes)?)))
            .collect::<std::result::Result<_, TrainerError>>()?;
        self.summary.test = Some(TestSummary {
            loss:    result.loss,
            metrics: result.metrics,
            batches: result.batches,
            predictions,
        });
        Ok(())
    }
}
