// ============================================================
// Layer 2 — Predict Use Case
// ============================================================
// Applies the best checkpoint of a finished run to new
// embeddings:
//   1. Read out.json back from the run's output directory
//   2. Load every embedding from the embeddings file
//   3. Rebuild the model and predict a class per residue
//   4. Decode classes to symbols and write predictions.json

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};

use crate::data::embeddings::JsonEmbeddingStore;
use crate::domain::{error::TrainerError, traits::EmbeddingStore};
use crate::infra::run_store::{RunStore, RunSummary};
use crate::ml::{
    inferencer::{predict_sequences, TrainedModel},
    model::ModelSpec,
    TrainBackend,
};

pub struct PredictUseCase {
    summary:    RunSummary,
    run_store:  RunStore,
    batch_size: usize,
}

impl PredictUseCase {
    /// Open a finished run. Fails if the run never completed training.
    pub fn new(output_dir: &str, batch_size: usize) -> Result<Self> {
        let run_store = RunStore::open(output_dir)?;
        let summary   = run_store.load_summary()?;

        if let Some(error) = &summary.error {
            anyhow::bail!("Run '{}' failed and has no usable model: {}", summary.experiment_name, error);
        }
        anyhow::ensure!(batch_size > 0, "batch_size must be at least 1");
        tracing::info!(
            "Loaded run '{}' ({} features, {} classes)",
            summary.experiment_name, summary.n_features, summary.n_classes
        );
        Ok(Self { summary, run_store, batch_size })
    }

    /// Predict every identifier in `embeddings_file`, sorted by id.
    pub fn predict(&self, embeddings_file: &str) -> Result<BTreeMap<String, String>> {
        let store = JsonEmbeddingStore::open(embeddings_file).map_err(TrainerError::from)?;

        let mut ids: Vec<String> = store.ids().map(str::to_string).collect();
        ids.sort();
        let sequences = ids
            .into_iter()
            .map(|id| {
                let embedding = store.get(&id)?;
                Ok((id, embedding))
            })
            .collect::<std::result::Result<Vec<_>, TrainerError>>()?;
        drop(store);

        let summary        = &self.summary;
        let checkpoint_dir = self.run_store.checkpoint_dir();
        let trained = TrainedModel {
            choice:         summary.config.model_choice,
            spec:           ModelSpec {
                n_features: summary.n_features,
                n_classes:  summary.n_classes,
                dropout:    summary.config.dropout,
            },
            checkpoint_dir: &checkpoint_dir,
            key:            &summary.experiment_name,
            seed:           summary.config.seed,
        };

        let device      = Default::default();
        let predictions = predict_sequences::<TrainBackend>(&trained, sequences, self.batch_size, &device)?;

        let decoded = predictions
            .into_iter()
            .map(|p| Ok((p.id, summary.vocabulary.decode_sequence(&p.classes)?)))
            .collect::<std::result::Result<BTreeMap<_, _>, TrainerError>>()?;
        tracing::info!("Predicted {} sequences", decoded.len());
        Ok(decoded)
    }

    /// Write predictions as `{ "<id>": "<class string>" }`.
    /// Defaults to `<output_dir>/predictions.json`.
    pub fn write(&self, predictions: &BTreeMap<String, String>, path: Option<&str>) -> Result<PathBuf> {
        let path = path
            .map(PathBuf::from)
            .unwrap_or_else(|| self.run_store.dir().join("predictions.json"));
        let json = serde_json::to_string_pretty(predictions)?;
        std::fs::write(&path, json).with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::info!("Wrote predictions to '{}'", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::{TrainConfig, TrainUseCase};
    use crate::infra::rng::backend_seed_guard;
    use crate::ml::model::ModelChoice;
    use std::collections::HashMap;

    // 6 labelled proteins, two per partition. 'E' when the first
    // feature is positive.
    fn write_inputs(dir: &std::path::Path) -> TrainConfig {
        let mut sequences  = String::new();
        let mut labels     = String::new();
        let mut embeddings = HashMap::new();
        let tags = ["SET=train", "SET=train", "SET=train VALIDATION=True", "SET=train VALIDATION=True", "SET=test", "SET=test"];

        for (i, tag) in tags.iter().enumerate() {
            let id  = format!("prot{i}");
            let len = 4 + i;
            let classes: String = (0..len).map(|r| if (i + r) % 3 == 0 { 'E' } else { '-' }).collect();
            let rows = classes
                .chars()
                .map(|c| if c == 'E' { vec![1.0, 0.5] } else { vec![-1.0, 0.2] })
                .collect();

            sequences.push_str(&format!(">{id}\n{}\n", "A".repeat(len)));
            labels.push_str(&format!(">{id} {tag}\n{classes}\n"));
            embeddings.insert(id, rows);
        }

        std::fs::write(dir.join("seq.fasta"), sequences).unwrap();
        std::fs::write(dir.join("labels.fasta"), labels).unwrap();
        JsonEmbeddingStore::write(dir.join("emb.json"), &embeddings).unwrap();

        TrainConfig {
            sequence_file:   dir.join("seq.fasta").display().to_string(),
            labels_file:     dir.join("labels.fasta").display().to_string(),
            embeddings_file: dir.join("emb.json").display().to_string(),
            embedder_name:   "toy".to_string(),
            output_dir:      dir.join("out").display().to_string(),
            model_choice:    ModelChoice::Fnn,
            batch_size:      2,
            num_epochs:      3,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_train_then_predict_from_disk() {
        let _guard = backend_seed_guard();
        let dir = tempfile::tempdir().unwrap();
        let cfg = write_inputs(dir.path());

        let summary = TrainUseCase::new(cfg.clone()).execute().unwrap();
        assert_eq!(summary.experiment_name, "toy_FNN");
        let out = std::path::Path::new(&cfg.output_dir);
        assert!(out.join("out.json").is_file());
        assert!(out.join("train_config.json").is_file());
        assert!(out.join("metrics.csv").is_file());

        let use_case    = PredictUseCase::new(&cfg.output_dir, 4).unwrap();
        let predictions = use_case.predict(&cfg.embeddings_file).unwrap();
        assert_eq!(predictions.len(), 6);
        assert_eq!(predictions["prot5"].len(), 9);
        assert!(predictions.values().flat_map(|s| s.chars()).all(|c| c == 'E' || c == '-'));

        let path = use_case.write(&predictions, None).unwrap();
        let back: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, predictions);
    }

    #[test]
    fn test_failed_run_cannot_predict() {
        let _guard = backend_seed_guard();
        let dir = tempfile::tempdir().unwrap();
        let cfg = write_inputs(dir.path());

        // a test protein without an embedding fails the run before fitting
        let mut embeddings: HashMap<String, Vec<Vec<f32>>> =
            serde_json::from_str(&std::fs::read_to_string(&cfg.embeddings_file).unwrap()).unwrap();
        embeddings.remove("prot4");
        JsonEmbeddingStore::write(&cfg.embeddings_file, &embeddings).unwrap();

        assert!(TrainUseCase::new(cfg.clone()).execute().is_err());
        let saved = RunStore::open(&cfg.output_dir).unwrap().load_summary().unwrap();
        assert!(saved.error.unwrap().contains("prot4"));
        assert!(saved.history.is_empty());

        let err = PredictUseCase::new(&cfg.output_dir, 4).err().unwrap();
        assert!(err.to_string().contains("failed"));
    }

    #[test]
    fn test_missing_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = PredictUseCase::new(&dir.path().join("nope").display().to_string(), 4)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("train"));
    }
}
