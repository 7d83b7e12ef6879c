use burn::data::dataset::Dataset;

use crate::domain::{
    embedding::ResidueEmbedding,
    error::{Result, TrainerError},
    labels::{IdentifierLabelIndex, Partition},
    traits::EmbeddingStore,
};

/// One labelled protein: its embedding and integer class per residue.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidueSample {
    pub id:        String,
    pub embedding: ResidueEmbedding,
    pub labels:    Vec<usize>,
}

impl ResidueSample {
    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

/// All samples of one partition, in partition order.
/// Indexing is stable: nothing mutates the samples after construction.
pub struct ResidueDataset {
    partition: Partition,
    samples:   Vec<ResidueSample>,
}

impl ResidueDataset {
    /// Pull every identifier of `partition` out of the store and pair it
    /// with its encoded labels. `expected_features` pins the feature
    /// dimension (pass the training partition's value for val/test).
    pub fn from_partition(
        partition:         Partition,
        index:             &IdentifierLabelIndex,
        store:             &dyn EmbeddingStore,
        expected_features: Option<usize>,
    ) -> Result<Self> {
        let ids = index.partitions().ids(partition);
        let mut samples  = Vec::with_capacity(ids.len());
        let mut features = expected_features;

        for id in ids {
            let labels = index
                .encoded(id)
                .ok_or_else(|| TrainerError::data(format!("'{id}' has no encoded labels")))?
                .to_vec();
            let embedding = store.get(id)?;

            if embedding.residues() != labels.len() {
                return Err(TrainerError::data(format!(
                    "length mismatch for '{id}': embedding={} labels={}",
                    embedding.residues(),
                    labels.len()
                )));
            }
            match features {
                Some(f) if f != embedding.features() => {
                    return Err(TrainerError::data(format!(
                        "'{id}' has {} embedding features, expected {f}",
                        embedding.features()
                    )));
                }
                Some(_) => {}
                None => features = Some(embedding.features()),
            }

            samples.push(ResidueSample { id: id.clone(), embedding, labels });
        }

        tracing::debug!("Built {} dataset with {} samples", partition, samples.len());
        Ok(Self { partition, samples })
    }

    pub fn new(partition: Partition, samples: Vec<ResidueSample>) -> Self {
        Self { partition, samples }
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Feature dimension shared by every sample (None when empty).
    pub fn n_features(&self) -> Option<usize> {
        self.samples.first().map(|s| s.embedding.features())
    }

    pub fn sample(&self, index: usize) -> Option<&ResidueSample> {
        self.samples.get(index)
    }

    pub fn samples(&self) -> &[ResidueSample] {
        &self.samples
    }
}

impl Dataset<ResidueSample> for ResidueDataset {
    fn get(&self, index: usize) -> Option<ResidueSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
