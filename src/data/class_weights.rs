// ============================================================
// Layer 4 — Class Weight Estimator
// ============================================================
// Balanced class weighting, inversely proportional to class
// size, computed from the TRAINING partition only:
//
//   w_c = total_residues / (n_classes * count_c)
//
// Example: counts {0: 100, 1: 25}, 2 classes, total 125
//   w_0 = 125 / (2 * 100) = 0.625
//   w_1 = 125 / (2 * 25)  = 2.5
//
// A class that never occurs in the training residues would get
// an infinite weight. That is reported as a DataIntegrity error
// naming the class, after the raw counts have been logged.

use crate::domain::{
    error::{Result, TrainerError},
    labels::ClassVocabulary,
};

/// Per-class residue counts over a set of encoded label sequences.
pub fn class_counts<'a>(
    labels:    impl IntoIterator<Item = &'a [usize]>,
    n_classes: usize,
) -> Result<Vec<usize>> {
    let mut counts = vec![0usize; n_classes];
    for sequence in labels {
        for &class in sequence {
            let slot = counts.get_mut(class).ok_or_else(|| {
                TrainerError::data(format!(
                    "class index {class} is outside the vocabulary of {n_classes} classes"
                ))
            })?;
            *slot += 1;
        }
    }
    Ok(counts)
}

/// Balanced weights for every class of `vocabulary`.
pub fn estimate_class_weights<'a>(
    train_labels: impl IntoIterator<Item = &'a [usize]>,
    vocabulary:   &ClassVocabulary,
) -> Result<Vec<f32>> {
    let n_classes = vocabulary.len();
    let counts    = class_counts(train_labels, n_classes)?;
    let total: usize = counts.iter().sum();

    tracing::info!("Total number of samples/residues: {}", total);
    tracing::info!("Individual class counts:");
    for (class, count) in counts.iter().enumerate() {
        tracing::info!("\t{} : {}", symbol(vocabulary, class), count);
    }

    if let Some(missing) = counts.iter().position(|&c| c == 0) {
        return Err(TrainerError::data(format!(
            "class '{}' (index {missing}) has no residues in the training partition; \
             balanced class weights are undefined",
            symbol(vocabulary, missing)
        )));
    }

    let weights: Vec<f32> = counts
        .iter()
        .map(|&c| (total as f64 / (n_classes as f64 * c as f64)) as f32)
        .collect();

    for (class, w) in weights.iter().enumerate() {
        tracing::info!("\t{} weight: {:.3}", symbol(vocabulary, class), w);
    }
    Ok(weights)
}

fn symbol(vocabulary: &ClassVocabulary, class: usize) -> char {
    vocabulary.decode(class).unwrap_or('?')
}
