// ============================================================
// Layer 4 — FASTA Reader
// ============================================================
// Reads both inputs of a run:
//
//   sequence file — >P12345
//                   MKTAYIAKQR
//   labels file   — >P12345 SET=train VALIDATION=False
//                   CCCHHHHEEC
//
// Sequence lines may wrap; they are concatenated until the
// next header. Everything after the identifier on a header
// line is parsed as whitespace-separated KEY=VALUE attributes.
// Tokens without '=' are ignored (free-text descriptions).
//
// Reference: Rust Book §8 (Strings), §9 (Error Handling)

use anyhow::{bail, Context, Result};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use crate::domain::labels::LabelRecord;

/// One FASTA entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub id:         String,
    pub sequence:   String,
    pub attributes: BTreeMap<String, String>,
}

/// Read and parse a FASTA file from disk.
pub fn read_fasta(path: impl AsRef<Path>) -> Result<Vec<FastaRecord>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read FASTA file '{}'", path.display()))?;
    let records = parse_fasta(&text)
        .with_context(|| format!("Malformed FASTA file '{}'", path.display()))?;
    tracing::debug!("Read {} records from '{}'", records.len(), path.display());
    Ok(records)
}

/// Parse FASTA text.
pub fn parse_fasta(text: &str) -> Result<Vec<FastaRecord>> {
    let mut records: Vec<FastaRecord> = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('>') {
            let mut tokens = header.split_whitespace();
            let Some(id) = tokens.next() else {
                bail!("line {}: header without identifier", line_no + 1);
            };

            let attributes = tokens
                .filter_map(|t| t.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();

            records.push(FastaRecord {
                id: id.to_string(),
                sequence: String::new(),
                attributes,
            });
        } else {
            match records.last_mut() {
                Some(record) => record.sequence.push_str(line),
                None => bail!("line {}: sequence data before the first header", line_no + 1),
            }
        }
    }

    Ok(records)
}

/// id → sequence. Duplicate identifiers are rejected.
pub fn sequence_map(records: &[FastaRecord]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::with_capacity(records.len());
    for r in records {
        if map.insert(r.id.clone(), r.sequence.clone()).is_some() {
            bail!("identifier '{}' appears more than once in the sequence file", r.id);
        }
    }
    Ok(map)
}

/// Interpret FASTA records as per-residue label records.
pub fn label_records(records: Vec<FastaRecord>) -> Vec<LabelRecord> {
    records
        .into_iter()
        .map(|r| LabelRecord::new(r.id, r.sequence, r.attributes))
        .collect()
}
