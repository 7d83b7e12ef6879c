// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits that define what the
// system works with: label records, the class vocabulary,
// partitions, embeddings, the training history and the error
// taxonomy.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Error kinds shared by every layer
pub mod error;

// Per-residue embedding matrix
pub mod embedding;

// Label records, class vocabulary and train/val/test partitions
pub mod labels;

// Per-epoch records and stop reasons
pub mod history;

// Core abstractions (traits) that other layers implement
pub mod traits;
