// ============================================================
// Layer 3 — Training History
// ============================================================
// The per-epoch record the solver appends after each
// train + validation pass. The history only ever grows; it is
// used for the stopping decision and handed back to the caller,
// including when a run fails part-way.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One row of the training history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch index
    pub epoch: usize,

    /// Mean loss over the epoch's training batches
    pub train_loss: f64,

    /// Mean loss over the epoch's validation batches
    pub val_loss: f64,

    /// Named validation metrics (accuracy, f1_score, ...)
    pub val_metrics: BTreeMap<String, f64>,
}

impl EpochRecord {
    /// Look up a validation score by name. `loss` resolves to
    /// the validation loss so it can be used as a primary metric.
    pub fn score(&self, name: &str) -> Option<f64> {
        if name == "loss" {
            Some(self.val_loss)
        } else {
            self.val_metrics.get(name).copied()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingHistory {
    records: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &EpochRecord> {
        self.records.iter()
    }
}

/// Why the epoch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    PatienceExhausted,
    Converged,
    EpochBudgetExhausted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StopReason::PatienceExhausted    => "patience exhausted",
            StopReason::Converged            => "converged",
            StopReason::EpochBudgetExhausted => "epoch budget exhausted",
        };
        f.write_str(text)
    }
}
