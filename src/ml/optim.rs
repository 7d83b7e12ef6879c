// ============================================================
// Layer 5 — Optimizers
// ============================================================
// Burn's own Optimizer trait is generic over the record type
// and cannot be boxed, so the solver sees this narrower trait:
// one learning rate fixed at construction, one `step` per batch.
//
//   adam  → Kingma & Ba (2015)
//   adamw → Adam with decoupled weight decay
//   sgd   → plain stochastic gradient descent
//
// Reference: Burn Book §5 (Optimizers)

use std::collections::BTreeMap;

use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, AdamWConfig, GradientsParams, SgdConfig},
    tensor::backend::AutodiffBackend,
};

use crate::domain::error::{Result, TrainerError};

/// Parameter update rule used by the solver.
pub trait Optimizer<B: AutodiffBackend, M: AutodiffModule<B>> {
    fn step(&mut self, model: M, grads: GradientsParams) -> M;

    fn learning_rate(&self) -> f64;
}

/// Any burn optimizer paired with a constant learning rate.
pub struct BurnOptimizer<O> {
    inner:         O,
    learning_rate: f64,
}

impl<O> BurnOptimizer<O> {
    pub fn new(inner: O, learning_rate: f64) -> Self {
        Self { inner, learning_rate }
    }
}

impl<B, M, O> Optimizer<B, M> for BurnOptimizer<O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: burn::optim::Optimizer<M, B>,
{
    fn step(&mut self, model: M, grads: GradientsParams) -> M {
        self.inner.step(self.learning_rate, model, grads)
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

/// Inputs every optimizer constructor receives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSpec {
    pub learning_rate: f64,
}

// ─── Optimizer registry ───────────────────────────────────────────────────────
type OptimizerConstructor<B, M> = fn(&OptimizerSpec) -> Box<dyn Optimizer<B, M>>;

fn adam<B: AutodiffBackend, M: AutodiffModule<B> + 'static>(spec: &OptimizerSpec) -> Box<dyn Optimizer<B, M>> {
    Box::new(BurnOptimizer::new(AdamConfig::new().init::<B, M>(), spec.learning_rate))
}

fn adamw<B: AutodiffBackend, M: AutodiffModule<B> + 'static>(spec: &OptimizerSpec) -> Box<dyn Optimizer<B, M>> {
    Box::new(BurnOptimizer::new(AdamWConfig::new().init::<B, M>(), spec.learning_rate))
}

fn sgd<B: AutodiffBackend, M: AutodiffModule<B> + 'static>(spec: &OptimizerSpec) -> Box<dyn Optimizer<B, M>> {
    Box::new(BurnOptimizer::new(SgdConfig::new().init::<B, M>(), spec.learning_rate))
}

/// Configuration tag → optimizer constructor.
pub struct OptimizerRegistry<B: AutodiffBackend, M: AutodiffModule<B>> {
    constructors: BTreeMap<&'static str, OptimizerConstructor<B, M>>,
}

impl<B: AutodiffBackend, M: AutodiffModule<B> + 'static> Default for OptimizerRegistry<B, M> {
    fn default() -> Self {
        let mut registry = Self { constructors: BTreeMap::new() };
        registry.register("adam", adam::<B, M>);
        registry.register("adamw", adamw::<B, M>);
        registry.register("sgd", sgd::<B, M>);
        registry
    }
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> OptimizerRegistry<B, M> {
    pub fn register(&mut self, tag: &'static str, constructor: OptimizerConstructor<B, M>) {
        self.constructors.insert(tag, constructor);
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    pub fn build(&self, tag: &str, spec: &OptimizerSpec) -> Result<Box<dyn Optimizer<B, M>>> {
        let constructor = self.constructors.get(tag).ok_or_else(|| {
            TrainerError::config(format!(
                "unknown optimizer '{tag}', expected one of {}",
                self.tags().collect::<Vec<_>>().join(", ")
            ))
        })?;
        tracing::debug!("Optimizer '{}' with learning rate {}", tag, spec.learning_rate);
        Ok(constructor(spec))
    }
}
