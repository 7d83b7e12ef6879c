// ============================================================
// Layer 5 — Masked Loss Functions
// ============================================================
// Per-residue cross-entropy that ignores padded positions:
//
//   nll_i  = -log softmax(logits_i)[label_i]
//   loss   = Σ_i mask_i * w[label_i] * nll_i
//            ───────────────────────────────
//              Σ_i mask_i * w[label_i]
//
// With no class weights w ≡ 1 and this is the plain mean over
// real residues. Padded labels (-100) are clamped to 0 before
// the gather; the mask zeroes their contribution.
//
// Reference: Burn Book §3 (Tensor Operations)

use std::collections::BTreeMap;

use burn::{prelude::*, tensor::activation::log_softmax};

use crate::domain::error::{Result, TrainerError};

/// Scalar training objective over a padded batch.
pub trait Loss<B: Backend> {
    /// logits [b, L, C], labels [b, L], mask [b, L] → [1]
    fn compute(
        &self,
        logits: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
        mask:   Tensor<B, 2, Bool>,
    ) -> Tensor<B, 1>;
}

/// Inputs every loss constructor receives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossSpec {
    /// One weight per class index, or None for unweighted
    pub class_weights: Option<Vec<f32>>,
}

// ─── Cross-entropy ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default)]
pub struct MaskedCrossEntropy {
    class_weights: Option<Vec<f32>>,
}

impl MaskedCrossEntropy {
    pub fn new(class_weights: Option<Vec<f32>>) -> Self {
        Self { class_weights }
    }
}

impl<B: Backend> Loss<B> for MaskedCrossEntropy {
    fn compute(
        &self,
        logits: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
        mask:   Tensor<B, 2, Bool>,
    ) -> Tensor<B, 1> {
        let [batch, len, classes] = logits.dims();
        let rows   = batch * len;
        let device = logits.device();

        let log_probs = log_softmax(logits.reshape([rows, classes]), 1);
        let targets   = labels.clamp_min(0).reshape([rows]);
        let nll = log_probs
            .gather(1, targets.clone().reshape([rows, 1]))
            .reshape([rows])
            .neg();

        let mask = mask.reshape([rows]).float();
        let weight = match &self.class_weights {
            Some(w) => {
                let w = Tensor::<B, 1>::from_data(TensorData::new(w.clone(), [w.len()]), &device);
                w.select(0, targets) * mask
            }
            None => mask,
        };

        (nll * weight.clone()).sum() / weight.sum()
    }
}

// ─── Loss registry ────────────────────────────────────────────────────────────
type LossConstructor<B> = fn(&LossSpec) -> Box<dyn Loss<B>>;

/// Configuration tag → loss constructor.
pub struct LossRegistry<B: Backend> {
    constructors: BTreeMap<&'static str, LossConstructor<B>>,
}

impl<B: Backend> Default for LossRegistry<B> {
    fn default() -> Self {
        let mut registry = Self { constructors: BTreeMap::new() };
        registry.register("cross_entropy_loss", |spec| {
            Box::new(MaskedCrossEntropy::new(spec.class_weights.clone()))
        });
        registry
    }
}

impl<B: Backend> LossRegistry<B> {
    pub fn register(&mut self, tag: &'static str, constructor: LossConstructor<B>) {
        self.constructors.insert(tag, constructor);
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    pub fn build(&self, tag: &str, spec: &LossSpec) -> Result<Box<dyn Loss<B>>> {
        let constructor = self.constructors.get(tag).ok_or_else(|| {
            TrainerError::config(format!(
                "unknown loss '{tag}', expected one of {}",
                self.tags().collect::<Vec<_>>().join(", ")
            ))
        })?;
        Ok(constructor(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn inputs() -> (Tensor<B, 3>, Tensor<B, 2, Int>, Tensor<B, 2, Bool>) {
        let device = Default::default();
        // one sequence of 3 positions, 2 classes; last position is padding
        let logits = Tensor::<B, 3>::from_data(
            TensorData::new(vec![2.0f32, 0.0, 0.0, 2.0, 5.0, -5.0], [1, 3, 2]),
            &device,
        );
        let labels = Tensor::<B, 2, Int>::from_data(TensorData::new(vec![0i64, 1, -100], [1, 3]), &device);
        let mask   = labels.clone().greater_equal_elem(0);
        (logits, labels, mask)
    }

    fn value(t: Tensor<B, 1>) -> f64 {
        t.into_scalar().elem::<f64>()
    }

    #[test]
    fn test_padding_does_not_contribute() {
        let (logits, labels, mask) = inputs();
        let loss = value(MaskedCrossEntropy::default().compute(logits, labels, mask));

        // both real positions have the same margin of 2 in favour of the label
        let expected = -(2.0f64.exp() / (2.0f64.exp() + 1.0)).ln();
        assert!((loss - expected).abs() < 1e-5, "{loss} vs {expected}");
    }

    #[test]
    fn test_class_weights_rescale_positions() {
        let (logits, labels, mask) = inputs();
        let uniform  = value(MaskedCrossEntropy::new(Some(vec![1.0, 1.0])).compute(logits.clone(), labels.clone(), mask.clone()));
        let weighted = value(MaskedCrossEntropy::new(Some(vec![0.5, 3.0])).compute(logits, labels, mask));

        // equal per-position losses → weighted mean is unchanged
        assert!((uniform - weighted).abs() < 1e-5);
    }

    #[test]
    fn test_registry_rejects_unknown_tag() {
        let registry = LossRegistry::<B>::default();
        assert!(registry.build("cross_entropy_loss", &LossSpec::default()).is_ok());
        let err = registry.build("focal", &LossSpec::default()).err().unwrap();
        assert!(matches!(err, TrainerError::Configuration(_)));
    }
}
