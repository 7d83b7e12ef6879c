// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from input files to padded tensor batches.
//
//   FASTA files            embeddings file
//       │                        │
//       ▼                        ▼
//   fasta (reader)         JsonEmbeddingStore
//       │                        │
//       └──────────┬─────────────┘
//                  ▼
//   IdentifierLabelIndex (Layer 3) → vocabulary + partitions
//                  │
//                  ▼
//   ResidueDataset ×3      → implements Burn's Dataset trait
//                  │
//                  ▼
//   ResidueBatcher         → padded batches + masks, per epoch
//
//   class_weights          → optional balanced loss weights
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// FASTA reader for sequence and label files
pub mod fasta;

/// JSON and in-memory embedding stores
pub mod embeddings;

/// Implements Burn's Dataset trait for labelled residues
pub mod dataset;

/// Lazily pads samples into batches with masks
pub mod batcher;

/// Inverse-frequency class weights
pub mod class_weights;
