// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The training core only ever talks to its collaborators
// through these traits, so any implementation can be swapped
// in without touching the solver:
//
//   EmbeddingStore — identifier → per-residue embedding
//                    (JSON file store, in-memory store, ...)
//   Metric         — named scoring function over predictions,
//                    labels and a padding mask
//
// Burn-specific capabilities (model, loss, optimizer,
// checkpoint sink) live next to their implementations in the
// ml and infra layers because their signatures carry tensors.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use thiserror::Error;

use crate::domain::embedding::ResidueEmbedding;
use crate::domain::error::TrainerError;

// ─── EmbeddingStore ───────────────────────────────────────────────────────────
#[derive(Debug, Error)]
pub enum EmbeddingStoreError {
    #[error("no embedding stored for identifier '{0}'")]
    NotFound(String),

    #[error("malformed embedding for identifier '{id}': {reason}")]
    Malformed { id: String, reason: String },

    #[error("embedding store unavailable: {0}")]
    Unavailable(String),
}

impl From<EmbeddingStoreError> for TrainerError {
    fn from(err: EmbeddingStoreError) -> Self {
        match err {
            EmbeddingStoreError::NotFound(_)
            | EmbeddingStoreError::Malformed { .. } => TrainerError::data(err.to_string()),
            EmbeddingStoreError::Unavailable(_) => TrainerError::resource(err.to_string()),
        }
    }
}

/// A keyed source of per-residue embeddings.
///
/// Implementations:
///   - JsonEmbeddingStore     → `{ "<id>": [[f32; F]; L], ... }` file
///   - InMemoryEmbeddingStore → HashMap, used by tests
pub trait EmbeddingStore {
    /// Fetch the embedding of one sequence.
    /// Must return `NotFound` when the identifier is absent.
    fn get(&self, id: &str) -> Result<ResidueEmbedding, EmbeddingStoreError>;

    /// Number of stored embeddings.
    fn len(&self) -> usize;
}

// ─── Metric ───────────────────────────────────────────────────────────────────
/// A named scoring function evaluated on flattened residues.
///
/// All three slices have the same length. Positions where `mask`
/// is false are padding and must not contribute to the score,
/// including its denominator. Whether higher or lower is better
/// is decided by the run configuration, not by the metric.
pub trait Metric {
    fn name(&self) -> &str;

    fn score(&self, predictions: &[usize], labels: &[i64], mask: &[bool]) -> f64;
}
