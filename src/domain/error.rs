// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every failure the training core can report falls into one of
// these kinds. None of them is recoverable inside a run: the
// current run is aborted and the caller decides what to do.
//
//   DataIntegrity     — malformed or inconsistent input data
//                       (length mismatches, missing partition tags,
//                       unrepresented classes, unknown identifiers)
//   NumericDivergence — a loss became NaN or infinite
//   SolverInvariant   — the solver reached an impossible state
//                       (e.g. no checkpoint was ever saved)
//   Resource          — the embedding store or checkpoint storage
//                       could not be used
//   Configuration     — the run configuration is unusable
//
// Messages always name the offending identifier / epoch / class.

use std::fmt;

use thiserror::Error;

use crate::domain::history::TrainingHistory;

/// Which pass over the data produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Training,
    Validation,
    Testing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Training   => "training",
            Phase::Validation => "validation",
            Phase::Testing    => "testing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error(
        "numeric divergence: non-finite {phase} loss ({value}) at epoch {epoch}, batch {batch}"
    )]
    NumericDivergence {
        epoch: usize,
        phase: Phase,
        batch: usize,
        value: f64,
    },

    #[error("solver invariant violated: {0}")]
    SolverInvariant(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl TrainerError {
    pub fn data(message: impl Into<String>) -> Self {
        Self::DataIntegrity(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::SolverInvariant(message.into())
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TrainerError>;

/// A failed training loop together with everything it completed
/// before the failure, so callers can inspect partial progress.
#[derive(Debug, Error)]
#[error("{error} (after {} completed epochs)", .history.len())]
pub struct SolverFailure {
    #[source]
    pub error: TrainerError,
    pub history: TrainingHistory,
}

impl SolverFailure {
    pub fn new(error: TrainerError, history: TrainingHistory) -> Self {
        Self { error, history }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_message_names_epoch_and_phase() {
        let err = TrainerError::NumericDivergence {
            epoch: 3,
            phase: Phase::Training,
            batch: 1,
            value: f64::NAN,
        };
        let text = err.to_string();
        assert!(text.contains("epoch 3"));
        assert!(text.contains("training"));
    }

    #[test]
    fn test_failure_reports_completed_epochs() {
        let failure = SolverFailure::new(
            TrainerError::invariant("no checkpoint"),
            TrainingHistory::default(),
        );
        assert!(failure.to_string().contains("after 0 completed epochs"));
    }
}
