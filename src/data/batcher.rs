// ============================================================
// Layer 4 — Residue Batcher
// ============================================================
// Groups dataset samples into mini-batches and pads every
// sequence in a batch to that batch's longest sequence.
//
// Padding (right side, residue axis):
//   features → FEATURE_PAD_VALUE  (0.0)
//   labels   → LABEL_PAD_VALUE    (-100, never a class index)
//   mask     → false              (true = real residue)
//
// Example, lengths 3 and 7 in one batch:
//   features: [2, 7, F]
//   mask row of the short sequence: [1 1 1 0 0 0 0]
//
// Each pass covers the partition exactly once: ceil(N / B)
// batches, the last one possibly smaller (nothing dropped).
// With shuffle on, the visiting order is permuted once per pass
// by the run's random source; otherwise partition order is kept.
//
// Batches are built lazily, one per `next()` call.
//
// Reference: Burn Book §4 (Batcher)

use burn::prelude::*;

use crate::data::dataset::{ResidueDataset, ResidueSample};
use crate::infra::rng::RunRng;

/// Padding value for embedding features beyond a sequence's end.
pub const FEATURE_PAD_VALUE: f32 = 0.0;

/// Padding value for labels beyond a sequence's end.
pub const LABEL_PAD_VALUE: i64 = -100;

// ─── ResidueBatch ─────────────────────────────────────────────────────────────
/// A padded batch in host memory, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidueBatch {
    pub ids:        Vec<String>,
    /// True (unpadded) residue count per sequence
    pub lengths:    Vec<usize>,
    /// Longest sequence in this batch
    pub max_len:    usize,
    pub n_features: usize,
    /// [batch, max_len, n_features]
    pub features:   Vec<f32>,
    /// [batch, max_len]
    pub labels:     Vec<i64>,
    /// [batch, max_len]
    pub mask:       Vec<bool>,
}

/// The same batch as burn tensors on one device.
#[derive(Debug, Clone)]
pub struct TensorBatch<B: Backend> {
    /// [batch, max_len, n_features]
    pub embeddings: Tensor<B, 3>,
    /// [batch, max_len], LABEL_PAD_VALUE on padding
    pub labels:     Tensor<B, 2, Int>,
    /// [batch, max_len], true on real residues
    pub mask:       Tensor<B, 2, Bool>,
}

impl ResidueBatch {
    /// Pad and stack samples. All samples must share a feature dimension.
    pub fn from_samples(samples: &[&ResidueSample]) -> Self {
        let batch_size = samples.len();
        let max_len    = samples.iter().map(|s| s.len()).max().unwrap_or(0);
        let n_features = samples.first().map(|s| s.embedding.features()).unwrap_or(0);

        let mut features = Vec::with_capacity(batch_size * max_len * n_features);
        let mut labels   = Vec::with_capacity(batch_size * max_len);
        let mut mask     = Vec::with_capacity(batch_size * max_len);

        for s in samples {
            let pad = max_len - s.len();

            features.extend_from_slice(s.embedding.values());
            features.extend(std::iter::repeat(FEATURE_PAD_VALUE).take(pad * n_features));

            labels.extend(s.labels.iter().map(|&c| c as i64));
            labels.extend(std::iter::repeat(LABEL_PAD_VALUE).take(pad));

            mask.extend(std::iter::repeat(true).take(s.len()));
            mask.extend(std::iter::repeat(false).take(pad));
        }

        Self {
            ids: samples.iter().map(|s| s.id.clone()).collect(),
            lengths: samples.iter().map(|s| s.len()).collect(),
            max_len,
            n_features,
            features,
            labels,
            mask,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Move the batch onto a device.
    ///
    /// The mask tensor is derived from the padded labels, so the
    /// two can never disagree.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> TensorBatch<B> {
        let shape = [self.len(), self.max_len];

        let embeddings = Tensor::<B, 3>::from_data(
            TensorData::new(self.features.clone(), [self.len(), self.max_len, self.n_features]),
            device,
        );
        let labels = Tensor::<B, 2, Int>::from_data(TensorData::new(self.labels.clone(), shape), device);
        let mask   = labels.clone().greater_equal_elem(0);

        TensorBatch { embeddings, labels, mask }
    }

    /// Split flat per-position predictions back into one unpadded
    /// Vec per sequence.
    pub fn unpad(&self, flat: &[usize]) -> Vec<Vec<usize>> {
        self.lengths
            .iter()
            .enumerate()
            .map(|(row, &len)| flat[row * self.max_len..row * self.max_len + len].to_vec())
            .collect()
    }
}

// ─── ResidueBatcher ───────────────────────────────────────────────────────────
pub struct ResidueBatcher {
    dataset:    ResidueDataset,
    batch_size: usize,
    shuffle:    bool,
}

impl ResidueBatcher {
    pub fn new(dataset: ResidueDataset, batch_size: usize, shuffle: bool) -> Self {
        Self { dataset, batch_size: batch_size.max(1), shuffle }
    }

    pub fn dataset(&self) -> &ResidueDataset {
        &self.dataset
    }

    /// ceil(N / B)
    pub fn num_batches(&self) -> usize {
        self.dataset.samples().len().div_ceil(self.batch_size)
    }

    /// Start one pass over the partition. The visiting order is fixed
    /// here; batches are padded on demand.
    pub fn iter(&self, rng: &mut RunRng) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.dataset.samples().len()).collect();
        if self.shuffle {
            rng.shuffle(&mut order);
        }
        BatchIter { batcher: self, order, cursor: 0 }
    }
}

pub struct BatchIter<'a> {
    batcher: &'a ResidueBatcher,
    order:   Vec<usize>,
    cursor:  usize,
}

impl Iterator for BatchIter<'_> {
    type Item = ResidueBatch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batcher.batch_size).min(self.order.len());
        let samples: Vec<&ResidueSample> = self.order[self.cursor..end]
            .iter()
            .filter_map(|&i| self.batcher.dataset.sample(i))
            .collect();
        self.cursor = end;
        Some(ResidueBatch::from_samples(&samples))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.batcher.batch_size);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{embedding::ResidueEmbedding, labels::Partition};
    use burn::backend::NdArray;
    use std::collections::HashSet;

    fn sample(id: &str, len: usize, features: usize) -> ResidueSample {
        let values = (0..len * features).map(|v| v as f32 + 1.0).collect();
        ResidueSample {
            id:        id.to_string(),
            embedding: ResidueEmbedding::new(len, features, values).unwrap(),
            labels:    (0..len).map(|i| i % 2).collect(),
        }
    }

    fn batcher(n: usize, batch_size: usize, shuffle: bool) -> ResidueBatcher {
        let samples = (0..n).map(|i| sample(&format!("id{i}"), 1 + i % 5, 2)).collect();
        ResidueBatcher::new(ResidueDataset::new(Partition::Train, samples), batch_size, shuffle)
    }

    fn order(b: &ResidueBatcher, seed: u64) -> Vec<String> {
        let mut rng = RunRng::seeded(seed);
        b.iter(&mut rng).flat_map(|batch| batch.ids).collect()
    }

    #[test]
    fn test_unshuffled_pass_partitions_identifiers() {
        let b       = batcher(10, 3, false);
        let mut rng = RunRng::seeded(0);
        let batches: Vec<ResidueBatch> = b.iter(&mut rng).collect();

        assert_eq!(batches.len(), 4);
        assert_eq!(b.num_batches(), 4);
        assert_eq!(batches.last().unwrap().len(), 1);

        let ids: Vec<String> = batches.into_iter().flat_map(|x| x.ids).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("id{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let b = batcher(40, 8, true);
        assert_eq!(order(&b, 42), order(&b, 42));
        assert_ne!(order(&b, 42), order(&b, 43));

        let unique: HashSet<String> = order(&b, 42).into_iter().collect();
        assert_eq!(unique.len(), 40);
    }

    #[test]
    fn test_padding_to_batch_maximum() {
        let short = sample("short", 3, 2);
        let long  = sample("long", 7, 2);
        let batch = ResidueBatch::from_samples(&[&short, &long]);

        assert_eq!(batch.max_len, 7);
        assert_eq!(batch.features.len(), 2 * 7 * 2);
        assert_eq!(&batch.mask[..7], &[true, true, true, false, false, false, false]);
        assert_eq!(&batch.mask[7..], &[true; 7]);
        assert!(batch.labels[3..7].iter().all(|&l| l == LABEL_PAD_VALUE));
        assert!(batch.features[6..14].iter().all(|&f| f == FEATURE_PAD_VALUE));
        assert_eq!(batch.lengths.iter().sum::<usize>(), 10);
    }

    #[test]
    fn test_tensors_keep_shape_and_mask() {
        let short = sample("short", 3, 2);
        let long  = sample("long", 7, 2);
        let batch = ResidueBatch::from_samples(&[&short, &long]);

        let tensors = batch.to_tensors::<NdArray>(&Default::default());
        assert_eq!(tensors.embeddings.dims(), [2, 7, 2]);
        assert_eq!(tensors.labels.dims(), [2, 7]);

        let real: i64 = tensors.mask.int().sum().into_scalar().elem::<i64>();
        assert_eq!(real, 10);
    }

    #[test]
    fn test_unpad_restores_lengths() {
        let a     = sample("a", 2, 1);
        let b     = sample("b", 4, 1);
        let batch = ResidueBatch::from_samples(&[&a, &b]);
        let flat  = vec![1, 2, 9, 9, 3, 4, 5, 6];
        assert_eq!(batch.unpad(&flat), vec![vec![1, 2], vec![3, 4, 5, 6]]);
    }
}
