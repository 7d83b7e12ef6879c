// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Handles all cross-cutting concerns that don't belong in
// any specific business layer:
//
//   rng.rs        — Run-scoped random source
//                   One seeded generator per run, passed to
//                   batch shuffling and parameter init.
//
//   checkpoint.rs — Saving and restoring the best model
//                   In memory (tests) or on disk with Burn's
//                   NamedMpkGzFileRecorder.
//
//   metrics.rs    — Training metrics logging
//                   Writes epoch-level losses and validation
//                   metrics to a CSV file for later analysis.
//
//   run_store.rs  — Run outputs
//                   train_config.json and the out.json run
//                   summary that prediction reads back.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Seeded random source shared by one run
pub mod rng;

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// Run configuration and summary persistence
pub mod run_store;
