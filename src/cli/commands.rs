// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `predict`
// and all their configurable flags.
//
// Every `train` flag is optional: an unset flag keeps the value
// from `--config` (or the built-in default when there is no
// config file), so a JSON file and a few overrides compose.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::ModelChoice;

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a per-residue classifier on precomputed embeddings
    Train(TrainArgs),

    /// Predict class strings with the best checkpoint of a run
    Predict(PredictArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug, Default)]
pub struct TrainArgs {
    /// JSON file with a (possibly partial) training configuration
    #[arg(long)]
    pub config: Option<String>,

    /// FASTA file with the amino-acid sequences
    #[arg(long)]
    pub sequence_file: Option<String>,

    /// FASTA file with one class symbol per residue and SET / VALIDATION
    /// attributes in each header
    #[arg(long)]
    pub labels_file: Option<String>,

    /// JSON file mapping each identifier to its [residues x features] embedding
    #[arg(long)]
    pub embeddings_file: Option<String>,

    /// Name of the embedder, used in the experiment name
    #[arg(long)]
    pub embedder_name: Option<String>,

    /// Directory for checkpoints, metrics.csv and out.json
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Model architecture: FNN, CNN or LogReg
    #[arg(long)]
    pub model: Option<ModelChoice>,

    /// Loss function tag
    #[arg(long)]
    pub loss: Option<String>,

    /// Optimizer tag: adam, adamw or sgd
    #[arg(long)]
    pub optimizer: Option<String>,

    #[arg(long)]
    pub lr: Option<f64>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Upper bound on the number of epochs
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Epochs without improvement before stopping
    #[arg(long)]
    pub patience: Option<usize>,

    /// Stop once the epoch-to-epoch change of the training loss stays
    /// below this value for `--convergence-window` epochs
    #[arg(long)]
    pub epsilon: Option<f64>,

    #[arg(long)]
    pub convergence_window: Option<usize>,

    /// Keep the training order fixed between epochs
    #[arg(long)]
    pub no_shuffle: bool,

    /// Weight the loss by inverse class frequency
    #[arg(long)]
    pub class_weights: bool,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub dropout: Option<f64>,

    /// Validation metrics to compute, comma separated
    #[arg(long, value_delimiter = ',')]
    pub metrics: Option<Vec<String>>,

    /// Metric that decides improvement and early stopping
    #[arg(long)]
    pub primary_metric: Option<String>,

    /// Metrics where a lower value is better, comma separated
    #[arg(long, value_delimiter = ',')]
    pub lower_is_better: Option<Vec<String>>,
}

impl TrainArgs {
    /// Apply every flag that was given on top of `base`.
    pub fn overlay(self, base: TrainConfig) -> TrainConfig {
        TrainConfig {
            sequence_file:      self.sequence_file.unwrap_or(base.sequence_file),
            labels_file:        self.labels_file.unwrap_or(base.labels_file),
            embeddings_file:    self.embeddings_file.unwrap_or(base.embeddings_file),
            embedder_name:      self.embedder_name.unwrap_or(base.embedder_name),
            output_dir:         self.output_dir.unwrap_or(base.output_dir),
            model_choice:       self.model.unwrap_or(base.model_choice),
            loss_choice:        self.loss.unwrap_or(base.loss_choice),
            optimizer_choice:   self.optimizer.unwrap_or(base.optimizer_choice),
            learning_rate:      self.lr.unwrap_or(base.learning_rate),
            batch_size:         self.batch_size.unwrap_or(base.batch_size),
            num_epochs:         self.epochs.unwrap_or(base.num_epochs),
            patience:           self.patience.unwrap_or(base.patience),
            epsilon:            self.epsilon.or(base.epsilon),
            convergence_window: self.convergence_window.unwrap_or(base.convergence_window),
            shuffle:            base.shuffle && !self.no_shuffle,
            use_class_weights:  base.use_class_weights || self.class_weights,
            seed:               self.seed.unwrap_or(base.seed),
            dropout:            self.dropout.unwrap_or(base.dropout),
            metrics:            self.metrics.unwrap_or(base.metrics),
            primary_metric:     self.primary_metric.unwrap_or(base.primary_metric),
            lower_is_better:    self.lower_is_better.unwrap_or(base.lower_is_better),
        }
    }
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// This is the boundary between Layer 1 and Layer 2 —
/// the application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        a.overlay(TrainConfig::default())
    }
}

/// All arguments for the `predict` command
#[derive(Args, Debug)]
pub struct PredictArgs {
    /// JSON embeddings file to predict
    #[arg(long)]
    pub embeddings_file: String,

    /// Output directory of the training run
    #[arg(long, default_value = "output")]
    pub output_dir: String,

    /// Where to write the predictions (default: <output_dir>/predictions.json)
    #[arg(long)]
    pub out: Option<String>,

    #[arg(long, default_value_t = 128)]
    pub batch_size: usize,
}
