// ============================================================
// Layer 4 — Embedding Stores
// ============================================================
// Implementations of the EmbeddingStore trait from Layer 3.
//
//   JsonEmbeddingStore     — reads a precomputed embeddings file
//                            { "<id>": [[f32; F]; L], ... }
//   InMemoryEmbeddingStore — a plain HashMap, compiled for tests
//
// A store is opened once per run before the first epoch and
// dropped after final inference (or on the first error). The
// Drop impl logs the release so the lifetime is visible in the
// run log.

use std::{
    collections::HashMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Instant,
};

use crate::domain::{
    embedding::ResidueEmbedding,
    traits::{EmbeddingStore, EmbeddingStoreError},
};

// ─── JsonEmbeddingStore ───────────────────────────────────────────────────────
pub struct JsonEmbeddingStore {
    path:    PathBuf,
    entries: HashMap<String, Vec<Vec<f32>>>,
}

impl JsonEmbeddingStore {
    /// Open and fully read an embeddings file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EmbeddingStoreError> {
        let path  = path.as_ref().to_path_buf();
        let start = Instant::now();
        tracing::info!("Loading embeddings from: {}", path.display());

        let file = File::open(&path).map_err(|e| {
            EmbeddingStoreError::Unavailable(format!("cannot open '{}': {e}", path.display()))
        })?;
        let entries: HashMap<String, Vec<Vec<f32>>> =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                EmbeddingStoreError::Unavailable(format!("cannot parse '{}': {e}", path.display()))
            })?;

        tracing::info!("Read {} entries.", entries.len());
        tracing::info!(
            "Time elapsed for reading embeddings: {:.1}[s]",
            start.elapsed().as_secs_f64()
        );
        Ok(Self { path, entries })
    }

    /// Write embeddings in the format `open` reads.
    pub fn write(
        path: impl AsRef<Path>,
        embeddings: &HashMap<String, Vec<Vec<f32>>>,
    ) -> Result<(), EmbeddingStoreError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            EmbeddingStoreError::Unavailable(format!("cannot create '{}': {e}", path.display()))
        })?;
        serde_json::to_writer(file, embeddings)
            .map_err(|e| EmbeddingStoreError::Unavailable(e.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl EmbeddingStore for JsonEmbeddingStore {
    fn get(&self, id: &str) -> Result<ResidueEmbedding, EmbeddingStoreError> {
        let rows = self
            .entries
            .get(id)
            .ok_or_else(|| EmbeddingStoreError::NotFound(id.to_string()))?;
        ResidueEmbedding::from_rows(rows.clone()).map_err(|e| EmbeddingStoreError::Malformed {
            id:     id.to_string(),
            reason: e.to_string(),
        })
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Drop for JsonEmbeddingStore {
    fn drop(&mut self) {
        tracing::debug!("Released embedding store '{}'", self.path.display());
    }
}

// ─── InMemoryEmbeddingStore ───────────────────────────────────────────────────
#[cfg(test)]
pub use in_memory::InMemoryEmbeddingStore;
