// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// This layer contains the Burn code that does the learning.
// Data (Layer 4) hands it padded host batches; it hands back
// histories, predictions and restored models.
//
// What's in this layer:
//
//   model.rs      — per-residue classifiers (FNN, CNN, LogReg),
//                   all initialised from the run's random source,
//                   plus the ModelChoice registry
//
//   loss.rs       — masked, optionally class-weighted
//                   cross-entropy and the loss registry
//
//   optim.rs      — boxed optimizer wrapper over Burn's Adam,
//                   AdamW and SGD and the optimizer registry
//
//   scoring.rs    — accuracy, macro precision/recall/F1, MCC
//                   and the metric registry
//
//   trainer.rs    — the solver: epoch loop, early stopping,
//                   checkpoint restore, test inference
//
//   inferencer.rs — rebuilds a trained model from its checkpoint
//                   and predicts classes for new embeddings
//
// Backends:
//   default       → Autodiff<NdArray> (CPU)
//   --features wgpu → Autodiff<Wgpu>
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Per-residue classifier architectures
pub mod model;

/// Masked cross-entropy and loss registry
pub mod loss;

/// Optimizer wrapper and registry
pub mod optim;

/// Classification metrics and metric registry
pub mod scoring;

/// Training solver with early stopping
pub mod trainer;

/// Prediction from a saved checkpoint
pub mod inferencer;

#[cfg(not(feature = "wgpu"))]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;

#[cfg(feature = "wgpu")]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;
