// ============================================================
// Layer 3 — Identifier / Label Index
// ============================================================
// Turns raw per-residue label strings into everything the
// training core needs:
//
//   ClassVocabulary — char <-> dense zero-based class index,
//                     built from the union of ALL label records
//                     before any label is encoded
//   encoded labels  — Vec<usize> per identifier
//   PartitionSet    — train / val / test identifier lists,
//                     resolved from the record's header attributes
//
// Header attributes follow the FASTA convention
//   >P12345 SET=train VALIDATION=False
//   >Q67890 SET=test
// and an optional FOLD=<n> cross-validation marker.
//
// Any inconsistency is a DataIntegrity error that names the
// identifier; nothing is truncated or skipped silently.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, TrainerError};

/// One label sequence as read from the labels file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRecord {
    pub id: String,
    /// One class symbol per residue
    pub labels: String,
    /// KEY=VALUE pairs from the record header
    pub attributes: BTreeMap<String, String>,
}

impl LabelRecord {
    pub fn new(
        id: impl Into<String>,
        labels: impl Into<String>,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self { id: id.into(), labels: labels.into(), attributes }
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Resolve the partition tag from SET / VALIDATION attributes.
    pub fn partition(&self) -> Result<Partition> {
        let set = self.attribute("SET").ok_or_else(|| {
            TrainerError::data(format!("'{}' has no SET attribute in its label header", self.id))
        })?;

        let validation = match self.attribute("VALIDATION") {
            None => false,
            Some(v) if v.eq_ignore_ascii_case("true") => true,
            Some(v) if v.eq_ignore_ascii_case("false") => false,
            Some(v) => {
                return Err(TrainerError::data(format!(
                    "'{}' has VALIDATION={v}, expected True or False",
                    self.id
                )))
            }
        };

        match set.to_ascii_lowercase().as_str() {
            "train" if validation => Ok(Partition::Val),
            "train"               => Ok(Partition::Train),
            "val" | "validation"  => Ok(Partition::Val),
            "test"                => Ok(Partition::Test),
            other => Err(TrainerError::data(format!(
                "'{}' has unknown SET={other}, expected train, val or test",
                self.id
            ))),
        }
    }

    /// Optional cross-validation fold marker.
    pub fn fold(&self) -> Result<Option<u32>> {
        match self.attribute("FOLD") {
            None => Ok(None),
            Some(v) => v.parse::<u32>().map(Some).map_err(|_| {
                TrainerError::data(format!("'{}' has non-numeric FOLD={v}", self.id))
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Train,
    Val,
    Test,
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Partition::Train => "train",
            Partition::Val   => "val",
            Partition::Test  => "test",
        })
    }
}

// ─── ClassVocabulary ──────────────────────────────────────────────────────────
/// Bijection between class symbols and dense indices.
/// Symbols are sorted by code point, so the same input always
/// produces the same mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<char>", into = "Vec<char>")]
pub struct ClassVocabulary {
    symbols: Vec<char>,
    index: HashMap<char, usize>,
}

impl From<Vec<char>> for ClassVocabulary {
    fn from(symbols: Vec<char>) -> Self {
        Self::new(symbols)
    }
}

impl From<ClassVocabulary> for Vec<char> {
    fn from(vocabulary: ClassVocabulary) -> Self {
        vocabulary.symbols
    }
}

impl ClassVocabulary {
    pub fn new(symbols: impl IntoIterator<Item = char>) -> Self {
        let symbols: Vec<char> = symbols
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index = symbols.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Self { symbols, index }
    }

    pub fn from_records(records: &[LabelRecord]) -> Self {
        Self::new(records.iter().flat_map(|r| r.labels.chars()))
    }

    pub fn encode(&self, symbol: char) -> Option<usize> {
        self.index.get(&symbol).copied()
    }

    pub fn decode(&self, class: usize) -> Option<char> {
        self.symbols.get(class).copied()
    }

    /// Decode a class index sequence back into a label string.
    pub fn decode_sequence(&self, classes: &[usize]) -> Result<String> {
        classes
            .iter()
            .map(|&c| {
                self.decode(c).ok_or_else(|| {
                    TrainerError::data(format!(
                        "class index {c} is outside the vocabulary of {} classes",
                        self.len()
                    ))
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }
}

// ─── PartitionSet ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSet {
    train: Vec<String>,
    val:   Vec<String>,
    test:  Vec<String>,
}

impl PartitionSet {
    pub fn train(&self) -> &[String] {
        &self.train
    }

    pub fn val(&self) -> &[String] {
        &self.val
    }

    pub fn test(&self) -> &[String] {
        &self.test
    }

    pub fn ids(&self, partition: Partition) -> &[String] {
        match partition {
            Partition::Train => &self.train,
            Partition::Val   => &self.val,
            Partition::Test  => &self.test,
        }
    }

    pub fn partition_of(&self, id: &str) -> Option<Partition> {
        [Partition::Train, Partition::Val, Partition::Test]
            .into_iter()
            .find(|&p| self.ids(p).iter().any(|x| x == id))
    }

    /// (train, val, test) sizes
    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.train.len(), self.val.len(), self.test.len())
    }

    fn push(&mut self, partition: Partition, id: String) {
        match partition {
            Partition::Train => self.train.push(id),
            Partition::Val   => self.val.push(id),
            Partition::Test  => self.test.push(id),
        }
    }
}

// ─── IdentifierLabelIndex ─────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct IdentifierLabelIndex {
    vocabulary: ClassVocabulary,
    encoded:    HashMap<String, Vec<usize>>,
    folds:      HashMap<String, u32>,
    partitions: PartitionSet,
}

impl IdentifierLabelIndex {
    /// Build the index from label records and the id → sequence map.
    ///
    /// Order of work:
    ///   1. vocabulary from the union of every record's symbols
    ///   2. per record: duplicate check, sequence lookup, length
    ///      check, encoding, partition + fold resolution
    ///   3. every sequence must have been labelled
    ///   4. no partition may be empty
    pub fn build(records: &[LabelRecord], sequences: &HashMap<String, String>) -> Result<Self> {
        let vocabulary = ClassVocabulary::from_records(records);
        tracing::debug!("Class vocabulary: {:?}", vocabulary.symbols());

        let mut encoded    = HashMap::with_capacity(records.len());
        let mut folds      = HashMap::new();
        let mut partitions = PartitionSet::default();
        let mut seen       = HashSet::with_capacity(records.len());

        for record in records {
            if !seen.insert(record.id.as_str()) {
                let first = partitions
                    .partition_of(&record.id)
                    .map_or_else(|| "an unknown".to_string(), |p| format!("the {p}"));
                return Err(TrainerError::data(format!(
                    "identifier '{}' appears more than once in the labels (first in {first} partition)",
                    record.id
                )));
            }

            let sequence = sequences.get(&record.id).ok_or_else(|| {
                TrainerError::data(format!("'{}' has labels but no sequence", record.id))
            })?;

            let label_len = record.labels.chars().count();
            let seq_len   = sequence.chars().count();
            if label_len == 0 {
                return Err(TrainerError::data(format!("'{}' has an empty label sequence", record.id)));
            }
            if label_len != seq_len {
                return Err(TrainerError::data(format!(
                    "length mismatch for '{}': sequence={seq_len} labels={label_len}",
                    record.id
                )));
            }

            let classes = record
                .labels
                .chars()
                .map(|symbol| {
                    vocabulary.encode(symbol).ok_or_else(|| {
                        TrainerError::data(format!(
                            "'{}' uses class symbol '{symbol}' missing from the vocabulary",
                            record.id
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            partitions.push(record.partition()?, record.id.clone());
            if let Some(fold) = record.fold()? {
                folds.insert(record.id.clone(), fold);
            }
            encoded.insert(record.id.clone(), classes);
        }

        if let Some(orphan) = sequences.keys().find(|id| !encoded.contains_key(*id)) {
            return Err(TrainerError::data(format!("'{orphan}' has a sequence but no labels")));
        }

        for partition in [Partition::Train, Partition::Val, Partition::Test] {
            if partitions.ids(partition).is_empty() {
                return Err(TrainerError::data(format!("the {partition} partition is empty")));
            }
        }

        let (train, val, test) = partitions.sizes();
        tracing::info!(
            "Indexed {} labelled sequences: {} train, {} val, {} test, {} classes",
            encoded.len(), train, val, test, vocabulary.len()
        );

        Ok(Self { vocabulary, encoded, folds, partitions })
    }

    pub fn vocabulary(&self) -> &ClassVocabulary {
        &self.vocabulary
    }

    pub fn partitions(&self) -> &PartitionSet {
        &self.partitions
    }

    pub fn encoded(&self, id: &str) -> Option<&[usize]> {
        self.encoded.get(id).map(Vec::as_slice)
    }

    pub fn fold(&self, id: &str) -> Option<u32> {
        self.folds.get(id).copied()
    }

    /// Encoded labels of every identifier in one partition, in order.
    pub fn partition_labels(&self, partition: Partition) -> Vec<&[usize]> {
        self.partitions
            .ids(partition)
            .iter()
            .filter_map(|id| self.encoded(id))
            .collect()
    }
}
