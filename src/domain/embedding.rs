// ============================================================
// Layer 3 — Per-Residue Embedding
// ============================================================
// A [residues × features] matrix of f32, stored row-major:
//
//   values = [r0_f0, r0_f1, ..., r0_fF, r1_f0, ..., rL_fF]
//
// One row per residue of the protein sequence. The feature
// dimension comes from the external representation model and
// must be the same for every sequence in a run.

use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, TrainerError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidueEmbedding {
    residues: usize,
    features: usize,
    values:   Vec<f32>,
}

impl ResidueEmbedding {
    /// Build from a flat row-major buffer.
    pub fn new(residues: usize, features: usize, values: Vec<f32>) -> Result<Self> {
        if features == 0 {
            return Err(TrainerError::data("embedding has no features per residue"));
        }
        if values.len() != residues * features {
            return Err(TrainerError::data(format!(
                "embedding buffer has {} values, expected {residues} x {features}",
                values.len()
            )));
        }
        Ok(Self { residues, features, values })
    }

    /// Build from one Vec per residue; every row must have the same width.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let residues = rows.len();
        let features = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != features) {
            return Err(TrainerError::data(format!(
                "embedding row {i} has {} features, expected {features}",
                row.len()
            )));
        }
        Self::new(residues, features, rows.into_iter().flatten().collect())
    }

    pub fn residues(&self) -> usize {
        self.residues
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_is_row_major() {
        let emb = ResidueEmbedding::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(emb.residues(), 3);
        assert_eq!(emb.features(), 2);
        assert_eq!(emb.values(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let err = ResidueEmbedding::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, TrainerError::DataIntegrity(_)));
    }

    #[test]
    fn test_flat_buffer_size_is_checked() {
        assert!(ResidueEmbedding::new(2, 3, vec![0.0; 5]).is_err());
        assert!(ResidueEmbedding::new(2, 3, vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_zero_features_are_rejected() {
        let err = ResidueEmbedding::from_rows(vec![vec![], vec![]]).unwrap_err();
        assert!(matches!(err, TrainerError::DataIntegrity(_)));
        assert!(ResidueEmbedding::from_rows(Vec::new()).is_err());
        assert!(ResidueEmbedding::new(0, 0, Vec::new()).is_err());
    }
}
