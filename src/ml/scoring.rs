// ============================================================
// Layer 5 — Classification Metrics
// ============================================================
// Host-side scores over flattened residue positions. Padding
// (mask == false) is filtered out before anything is counted.
//
//   accuracy  = correct / residues
//   precision = macro mean of TP / (TP + FP)
//   recall    = macro mean of TP / (TP + FN)
//   f1_score  = macro mean of 2PR / (P + R)
//   mcc       = multi-class Matthews correlation (Gorodkin, 2004)
//
// Macro averages run over every class seen in either the labels
// or the predictions. A zero denominator scores 0.

use std::collections::BTreeMap;

use crate::domain::{
    error::{Result, TrainerError},
    traits::Metric,
};

/// Dense confusion matrix of the real (unmasked) residues.
/// `counts[truth][predicted]`
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn from_positions(predictions: &[usize], labels: &[i64], mask: &[bool]) -> Self {
        let real: Vec<(usize, usize)> = predictions
            .iter()
            .zip(labels)
            .zip(mask)
            .filter(|(_, m)| **m)
            .filter_map(|((&p, &t), _)| usize::try_from(t).ok().map(|t| (t, p)))
            .collect();

        let n = real.iter().map(|&(t, p)| t.max(p) + 1).max().unwrap_or(0);
        let mut counts = vec![vec![0usize; n]; n];
        for (t, p) in real {
            counts[t][p] += 1;
        }
        Self { counts }
    }

    pub fn n_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.n_classes()).map(|c| self.counts[c][c]).sum()
    }

    fn true_count(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    fn predicted_count(&self, class: usize) -> usize {
        self.counts.iter().map(|row| row[class]).sum()
    }

    /// Classes that occur as truth or prediction at least once.
    fn observed(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.n_classes()).filter(|&c| self.true_count(c) + self.predicted_count(c) > 0)
    }

    fn precision_of(&self, class: usize) -> f64 {
        ratio(self.counts[class][class], self.predicted_count(class))
    }

    fn recall_of(&self, class: usize) -> f64 {
        ratio(self.counts[class][class], self.true_count(class))
    }

    fn macro_mean(&self, per_class: impl Fn(usize) -> f64) -> f64 {
        let scores: Vec<f64> = self.observed().map(per_class).collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

// ─── Metrics ──────────────────────────────────────────────────────────────────
pub struct Accuracy;

impl Metric for Accuracy {
    fn name(&self) -> &str {
        "accuracy"
    }

    fn score(&self, predictions: &[usize], labels: &[i64], mask: &[bool]) -> f64 {
        let cm = ConfusionMatrix::from_positions(predictions, labels, mask);
        ratio(cm.correct(), cm.total())
    }
}

pub struct Precision;

impl Metric for Precision {
    fn name(&self) -> &str {
        "precision"
    }

    fn score(&self, predictions: &[usize], labels: &[i64], mask: &[bool]) -> f64 {
        let cm = ConfusionMatrix::from_positions(predictions, labels, mask);
        cm.macro_mean(|c| cm.precision_of(c))
    }
}

pub struct Recall;

impl Metric for Recall {
    fn name(&self) -> &str {
        "recall"
    }

    fn score(&self, predictions: &[usize], labels: &[i64], mask: &[bool]) -> f64 {
        let cm = ConfusionMatrix::from_positions(predictions, labels, mask);
        cm.macro_mean(|c| cm.recall_of(c))
    }
}

pub struct F1Score;

impl Metric for F1Score {
    fn name(&self) -> &str {
        "f1_score"
    }

    fn score(&self, predictions: &[usize], labels: &[i64], mask: &[bool]) -> f64 {
        let cm = ConfusionMatrix::from_positions(predictions, labels, mask);
        cm.macro_mean(|c| {
            let (p, r) = (cm.precision_of(c), cm.recall_of(c));
            if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
        })
    }
}

pub struct MatthewsCorrelation;

impl Metric for MatthewsCorrelation {
    fn name(&self) -> &str {
        "mcc"
    }

    fn score(&self, predictions: &[usize], labels: &[i64], mask: &[bool]) -> f64 {
        let cm = ConfusionMatrix::from_positions(predictions, labels, mask);
        let s  = cm.total() as f64;
        let c  = cm.correct() as f64;

        let (mut pt, mut pp, mut tt) = (0.0, 0.0, 0.0);
        for k in 0..cm.n_classes() {
            let p = cm.predicted_count(k) as f64;
            let t = cm.true_count(k) as f64;
            pt += p * t;
            pp += p * p;
            tt += t * t;
        }

        let denominator = ((s * s - pp) * (s * s - tt)).sqrt();
        if denominator == 0.0 {
            0.0
        } else {
            (c * s - pt) / denominator
        }
    }
}

// ─── Metric registry ──────────────────────────────────────────────────────────
type MetricConstructor = fn() -> Box<dyn Metric>;

/// Metric name → constructor.
pub struct MetricRegistry {
    constructors: BTreeMap<&'static str, MetricConstructor>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        let mut registry = Self { constructors: BTreeMap::new() };
        registry.register("accuracy", || Box::new(Accuracy));
        registry.register("precision", || Box::new(Precision));
        registry.register("recall", || Box::new(Recall));
        registry.register("f1_score", || Box::new(F1Score));
        registry.register("mcc", || Box::new(MatthewsCorrelation));
        registry
    }
}

impl MetricRegistry {
    pub fn register(&mut self, name: &'static str, constructor: MetricConstructor) {
        self.constructors.insert(name, constructor);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    pub fn build(&self, name: &str) -> Result<Box<dyn Metric>> {
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| TrainerError::config(format!("unknown metric '{name}'")))
    }

    /// Every registered metric, in name order.
    #[cfg(test)]
    pub fn build_all(&self) -> Vec<Box<dyn Metric>> {
        self.constructors.values().map(|constructor| constructor()).collect()
    }
}
