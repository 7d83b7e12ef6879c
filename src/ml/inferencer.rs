// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Rebuilds a trained model and predicts a class per residue for
// sequences that have embeddings but no labels.
//
//   1. build the architecture recorded for the run (ModelChoice)
//   2. overwrite its parameters from the checkpoint on disk
//   3. model.valid() → inner backend, dropout off
//   4. batch, forward, argmax, strip padding
//
// The batcher needs labels to build its mask; unlabelled
// sequences get class 0 at every residue, which only marks the
// positions as real. No loss is computed here.

use std::path::Path;

use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};

use crate::data::{
    batcher::ResidueBatcher,
    dataset::{ResidueDataset, ResidueSample},
};
use crate::domain::{
    embedding::ResidueEmbedding,
    error::{Result, TrainerError},
    labels::Partition,
};
use crate::infra::{
    checkpoint::{CheckpointSink, FileCheckpointSink},
    rng::RunRng,
};
use crate::ml::{
    model::{ModelChoice, ModelSpec, ModelVisitor, ResidueModel},
    trainer::{predicted_classes, SequencePrediction},
};

/// Where the trained weights live and how to rebuild them.
#[derive(Debug, Clone)]
pub struct TrainedModel<'a> {
    pub choice:         ModelChoice,
    pub spec:           ModelSpec,
    pub checkpoint_dir: &'a Path,
    pub key:            &'a str,
    pub seed:           u64,
}

/// Predict classes for every sequence, in input order.
pub fn predict_sequences<B: AutodiffBackend>(
    trained:    &TrainedModel<'_>,
    sequences:  Vec<(String, ResidueEmbedding)>,
    batch_size: usize,
    device:     &B::Device,
) -> Result<Vec<SequencePrediction>> {
    for (id, embedding) in &sequences {
        if embedding.features() != trained.spec.n_features {
            return Err(TrainerError::data(format!(
                "'{id}' has {} embedding features, the model expects {}",
                embedding.features(),
                trained.spec.n_features
            )));
        }
    }

    let samples = sequences
        .into_iter()
        .map(|(id, embedding)| {
            let labels = vec![0; embedding.residues()];
            ResidueSample { id, embedding, labels }
        })
        .collect();
    let batcher = ResidueBatcher::new(ResidueDataset::new(Partition::Test, samples), batch_size, false);

    // Initial parameters are overwritten by the checkpoint; the seed
    // only keeps construction deterministic.
    let mut rng = RunRng::seeded(trained.seed);
    trained.choice.build::<B, _>(
        &trained.spec,
        &mut rng,
        device,
        Predict { trained, batcher: &batcher, device },
    )
}

struct Predict<'a, B: AutodiffBackend> {
    trained: &'a TrainedModel<'a>,
    batcher: &'a ResidueBatcher,
    device:  &'a B::Device,
}

impl<B: AutodiffBackend> ModelVisitor<B> for Predict<'_, B> {
    type Output = Result<Vec<SequencePrediction>>;

    fn visit<M>(self, model: M, rng: &mut RunRng) -> Self::Output
    where
        M: ResidueModel<B> + AutodiffModule<B> + 'static,
        M::InnerModule: ResidueModel<B::InnerBackend>,
    {
        let sink  = FileCheckpointSink::<B>::new(self.trained.checkpoint_dir, self.device.clone())?;
        let state = sink.load(self.trained.key, model)?.ok_or_else(|| {
            TrainerError::resource(format!(
                "no checkpoint '{}' in '{}'. Have you run 'train' first?",
                self.trained.key,
                self.trained.checkpoint_dir.display()
            ))
        })?;
        tracing::info!("Model loaded from checkpoint (epoch {})", state.epoch);

        let model = state.model.valid();
        let mut predictions = Vec::with_capacity(self.batcher.dataset().samples().len());

        for batch in self.batcher.iter(rng) {
            let tensors = batch.to_tensors::<B::InnerBackend>(self.device);
            let classes = predicted_classes(model.forward(tensors.embeddings))?;
            for (id, sequence) in batch.ids.iter().zip(batch.unpad(&classes)) {
                predictions.push(SequencePrediction { id: id.clone(), classes: sequence });
            }
        }

        tracing::debug!("Predicted {} sequences", predictions.len());
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::LogRegConfig;
    use burn::backend::{Autodiff, NdArray};
    use burn::prelude::*;

    type B = Autodiff<NdArray>;

    fn embedding(len: usize) -> ResidueEmbedding {
        let values = (0..len * 2).map(|v| if v % 2 == 0 { 1.0 } else { -1.0 }).collect();
        ResidueEmbedding::new(len, 2, values).unwrap()
    }

    #[test]
    fn test_predictions_follow_saved_weights() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();

        // weights that always favour class 1
        let mut model = LogRegConfig::new(2, 2).init::<B>(&mut RunRng::seeded(0), &device);
        model.linear.weight = burn::module::Param::from_tensor(Tensor::from_data(
            TensorData::new(vec![0.0f32, 0.0, 0.0, 0.0], [2, 2]),
            &device,
        ));
        model.linear.bias = Some(burn::module::Param::from_tensor(Tensor::from_data(
            TensorData::new(vec![-1.0f32, 1.0], [2]),
            &device,
        )));
        let mut sink = FileCheckpointSink::<B>::new(dir.path(), device.clone()).unwrap();
        sink.save("exp_LogReg", 3, &model).unwrap();

        let trained = TrainedModel {
            choice:         ModelChoice::LogReg,
            spec:           ModelSpec { n_features: 2, n_classes: 2, dropout: 0.0 },
            checkpoint_dir: dir.path(),
            key:            "exp_LogReg",
            seed:           9,
        };
        let sequences = vec![("a".to_string(), embedding(3)), ("b".to_string(), embedding(5))];
        let predictions = predict_sequences::<B>(&trained, sequences, 4, &device).unwrap();

        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].classes, vec![1; 3]);
        assert_eq!(predictions[1].id, "b");
        assert_eq!(predictions[1].classes, vec![1; 5]);
    }

    #[test]
    fn test_feature_mismatch_is_rejected() {
        let dir     = tempfile::tempdir().unwrap();
        let trained = TrainedModel {
            choice:         ModelChoice::Fnn,
            spec:           ModelSpec { n_features: 8, n_classes: 3, dropout: 0.0 },
            checkpoint_dir: dir.path(),
            key:            "missing",
            seed:           1,
        };
        let err = predict_sequences::<B>(&trained, vec![("x".to_string(), embedding(2))], 2, &Default::default())
            .unwrap_err();
        assert!(matches!(err, TrainerError::DataIntegrity(_)));
    }

    #[test]
    fn test_missing_checkpoint_is_reported() {
        let dir     = tempfile::tempdir().unwrap();
        let trained = TrainedModel {
            choice:         ModelChoice::LogReg,
            spec:           ModelSpec { n_features: 2, n_classes: 2, dropout: 0.0 },
            checkpoint_dir: dir.path(),
            key:            "never_trained",
            seed:           1,
        };
        let err = predict_sequences::<B>(&trained, vec![("x".to_string(), embedding(2))], 2, &Default::default())
            .unwrap_err();
        assert!(err.to_string().contains("never_trained"));
    }
}
