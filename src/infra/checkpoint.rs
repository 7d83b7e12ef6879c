// ============================================================
// Layer 6 — Checkpoint Sinks
// ============================================================
// Stores the best model snapshot of a run and hands it back
// after the epoch loop. The solver only sees the trait; which
// storage is behind it is the caller's choice.
//
//   InMemoryCheckpointSink — keeps model clones in memory
//                            (test builds only). Every save is
//                            kept so tests can inspect which
//                            epochs were stored.
//   FileCheckpointSink     — Burn's NamedMpkGzFileRecorder
//                            (MessagePack + gzip, full precision)
//                            plus a JSON file with the epoch.
//
// File naming convention (FileCheckpointSink):
//   <output_dir>/checkpoints/
//     <key>.mpk.gz        ← weights of the best epoch
//     <key>.epoch.json    ← which epoch those weights are from
//
// A save under an existing key replaces the previous snapshot.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};

use crate::domain::error::{Result, TrainerError};

/// A restored snapshot and the epoch it was taken at.
#[derive(Debug, Clone)]
pub struct CheckpointState<M> {
    pub epoch: usize,
    pub model: M,
}

/// Keyed storage for model snapshots.
pub trait CheckpointSink<B: Backend, M: Module<B>> {
    /// Store `model` as the snapshot for `key`.
    fn save(&mut self, key: &str, epoch: usize, model: &M) -> Result<()>;

    /// Restore the snapshot for `key` into `template`.
    /// `Ok(None)` when nothing was ever saved under `key`.
    fn load(&self, key: &str, template: M) -> Result<Option<CheckpointState<M>>>;
}

// ─── In-memory ────────────────────────────────────────────────────────────────
#[cfg(test)]
pub use memory::InMemoryCheckpointSink;


// ─── Files ────────────────────────────────────────────────────────────────────
type FileRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

pub struct FileCheckpointSink<B: Backend> {
    dir:    PathBuf,
    device: B::Device,
}

impl<B: Backend> FileCheckpointSink<B> {
    /// Creates `dir` (and parents) if needed.
    pub fn new(dir: impl AsRef<Path>, device: B::Device) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            TrainerError::resource(format!("cannot create checkpoint directory '{}': {e}", dir.display()))
        })?;
        Ok(Self { dir, device })
    }

    /// Path without extension; the recorder appends `.mpk.gz`.
    fn weights_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn epoch_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.epoch.json"))
    }
}

impl<B: Backend, M: Module<B>> CheckpointSink<B, M> for FileCheckpointSink<B> {
    fn save(&mut self, key: &str, epoch: usize, model: &M) -> Result<()> {
        let path = self.weights_path(key);

        Recorder::<B>::record(&FileRecorder::new(), model.clone().into_record(), path.clone())
            .map_err(|e| {
                TrainerError::resource(format!("failed to save checkpoint to '{}': {e}", path.display()))
            })?;

        let epoch_path = self.epoch_path(key);
        let json = serde_json::to_string(&epoch)
            .map_err(|e| TrainerError::resource(format!("cannot encode checkpoint epoch: {e}")))?;
        fs::write(&epoch_path, json).map_err(|e| {
            TrainerError::resource(format!("cannot write '{}': {e}", epoch_path.display()))
        })?;

        tracing::debug!("Saved checkpoint '{}': epoch {}", key, epoch);
        Ok(())
    }

    fn load(&self, key: &str, template: M) -> Result<Option<CheckpointState<M>>> {
        let epoch_path = self.epoch_path(key);
        if !epoch_path.exists() {
            return Ok(None);
        }

        let epoch: usize = fs::read_to_string(&epoch_path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
            .map_err(|e| TrainerError::resource(format!("cannot read '{}': {e}", epoch_path.display())))?;

        let path   = self.weights_path(key);
        let record = Recorder::<B>::load(&FileRecorder::new(), path.clone(), &self.device).map_err(|e| {
            TrainerError::resource(format!("cannot load checkpoint '{}': {e}", path.display()))
        })?;

        tracing::info!("Loaded checkpoint '{}' from epoch {}", key, epoch);
        Ok(Some(CheckpointState { epoch, model: template.load_record(record) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::rng::RunRng;
    use crate::ml::model::{LogReg, LogRegConfig};
    use burn::backend::NdArray;

    type B = NdArray;

    fn model(seed: u64) -> LogReg<B> {
        LogRegConfig::new(3, 2).init::<B>(&mut RunRng::seeded(seed), &Default::default())
    }

    fn weights(model: &LogReg<B>) -> Vec<f32> {
        model.linear.weight.val().into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_in_memory_returns_latest_save() {
        let mut sink = InMemoryCheckpointSink::new();
        let handle   = sink.clone();

        CheckpointSink::<B, _>::save(&mut sink, "run", 1, &model(1)).unwrap();
        CheckpointSink::<B, _>::save(&mut sink, "run", 3, &model(3)).unwrap();

        let state = CheckpointSink::<B, _>::load(&sink, "run", model(0)).unwrap().unwrap();
        assert_eq!(state.epoch, 3);
        assert_eq!(weights(&state.model), weights(&model(3)));
        assert_eq!(handle.saved_epochs("run"), vec![1, 3]);
        assert!(CheckpointSink::<B, _>::load(&sink, "other", model(0)).unwrap().is_none());
    }

    #[test]
    fn test_file_sink_round_trips_weights() {
        let dir      = tempfile::tempdir().unwrap();
        let mut sink = FileCheckpointSink::<B>::new(dir.path().join("checkpoints"), Default::default()).unwrap();
        let saved    = model(11);

        sink.save("exp_CNN", 4, &saved).unwrap();
        let state = sink.load("exp_CNN", model(0)).unwrap().unwrap();

        assert_eq!(state.epoch, 4);
        assert_eq!(weights(&state.model), weights(&saved));
    }

    #[test]
    fn test_file_sink_without_save_is_empty() {
        let dir  = tempfile::tempdir().unwrap();
        let sink = FileCheckpointSink::<B>::new(dir.path(), Default::default()).unwrap();
        assert!(CheckpointSink::<B, LogReg<B>>::load(&sink, "missing", model(0)).unwrap().is_none());
    }
}
