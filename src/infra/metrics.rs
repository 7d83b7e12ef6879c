// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Columns:
//   - epoch:      the epoch number (1, 2, 3, ...)
//   - train_loss: mean masked cross-entropy over training batches
//   - val_loss:   mean masked cross-entropy over validation batches
//   - one column per validation metric, in name order
//
// Output file: <output_dir>/metrics.csv (recreated per run)
//
// Example CSV output:
//   epoch,train_loss,val_loss,accuracy,f1_score,mcc,precision,recall
//   1,0.912400,0.889200,0.612000,0.540100,0.230000,0.571000,0.552000
//   2,0.790100,0.801300,0.684000,0.611200,0.352100,0.640300,0.618800
//   ...
//
// How to read the metrics:
//   - Loss should decrease each epoch (model is learning)
//   - If val_loss increases while train_loss decreases → overfitting
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::{error::TrainerError, history::EpochRecord};
use crate::ml::trainer::EpochObserver;

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    /// Full path to the CSV file
    csv_path: PathBuf,

    /// Validation metric columns after epoch/train_loss/val_loss
    columns: Vec<String>,
}

impl MetricsLogger {
    /// Create a new MetricsLogger and write the CSV header.
    /// An existing file from an earlier run is replaced.
    pub fn new(dir: impl AsRef<Path>, metric_names: &[String]) -> Result<Self> {
        let dir = dir.as_ref();

        // Create directory if it doesn't exist
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        let mut columns = metric_names.to_vec();
        columns.sort();

        let mut f = fs::File::create(&csv_path)
            .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
        let mut header = vec!["epoch", "train_loss", "val_loss"];
        header.extend(columns.iter().map(String::as_str));
        writeln!(f, "{}", header.join(","))?;
        tracing::debug!("Created metrics CSV: '{}'", csv_path.display());

        Ok(Self { csv_path, columns })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    /// Metrics missing from the record are left empty.
    pub fn log(&self, record: &EpochRecord) -> Result<()> {
        // Open in append mode — adds to end of file
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        let mut row = vec![
            record.epoch.to_string(),
            format!("{:.6}", record.train_loss),
            format!("{:.6}", record.val_loss),
        ];
        row.extend(self.columns.iter().map(|name| {
            record.val_metrics.get(name).map(|v| format!("{v:.6}")).unwrap_or_default()
        }));
        writeln!(f, "{}", row.join(","))?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            record.epoch,
            record.train_loss,
            record.val_loss,
        );

        Ok(())
    }
}

impl EpochObserver for MetricsLogger {
    fn on_epoch(&mut self, record: &EpochRecord) -> crate::domain::error::Result<()> {
        self.log(record).map_err(|e| TrainerError::resource(format!("{e:#}")))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_rows_follow_header_columns() {
        let dir    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path(), &["mcc".to_string(), "accuracy".to_string()]).unwrap();

        let mut val_metrics = BTreeMap::new();
        val_metrics.insert("accuracy".to_string(), 0.5);
        logger
            .log(&EpochRecord { epoch: 1, train_loss: 0.9, val_loss: 0.8, val_metrics })
            .unwrap();

        let text = fs::read_to_string(&logger.csv_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "epoch,train_loss,val_loss,accuracy,mcc");
        // mcc was not recorded → empty cell
        assert_eq!(lines[1], "1,0.900000,0.800000,0.500000,");
    }

    #[test]
    fn test_new_run_replaces_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = MetricsLogger::new(dir.path(), &[]).unwrap();
        first
            .log(&EpochRecord { epoch: 1, train_loss: 1.0, val_loss: 1.0, val_metrics: BTreeMap::new() })
            .unwrap();

        let second = MetricsLogger::new(dir.path(), &[]).unwrap();
        let text   = fs::read_to_string(&second.csv_path).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
