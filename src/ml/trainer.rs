// ============================================================
// Layer 5 — Training Solver
// ============================================================
// Epoch loop with early stopping, best-checkpoint restore and
// a final inference pass.
//
// Per epoch (1-based):
//   1. training pass   → one optimizer step per batch,
//                        train_loss = mean of batch losses
//   2. validation pass → model.valid(), no updates,
//                        val_loss = mean of batch losses,
//                        metrics over every real residue
//   3. EpochRecord appended to the history
//   4. primary metric strictly better than the best so far?
//        yes → save checkpoint, reset patience
//        no  → patience += 1
//   5. stop checks, in this order:
//        patience exhausted → convergence rule → epoch budget
//
// After the loop the best checkpoint is loaded back. A run
// that never saved one is a SolverInvariant failure.
//
// Key Burn insight:
//   - Training uses B (an AutodiffBackend) for gradients
//   - model.valid() returns the module on B::InnerBackend,
//     so validation and testing never build a graph
//
// Reference: Burn Book §5, Prechelt (1998) Early Stopping

use std::collections::BTreeMap;

use burn::{
    module::AutodiffModule,
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::ResidueBatcher;
use crate::domain::{
    error::{Phase, Result, SolverFailure, TrainerError},
    history::{EpochRecord, StopReason, TrainingHistory},
    traits::Metric,
};
use crate::infra::{checkpoint::CheckpointSink, rng::RunRng};
use crate::ml::{loss::Loss, model::ResidueModel, optim::Optimizer};

/// Stop once |train_loss_k − train_loss_{k−1}| < epsilon for
/// `window` consecutive epochs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRule {
    pub epsilon: f64,
    pub window:  usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    pub num_epochs:      usize,
    pub patience:        usize,
    /// `loss` or the name of a validation metric
    pub primary_metric:  String,
    /// Metric names where a smaller value is better
    pub lower_is_better: Vec<String>,
    /// None disables the convergence rule
    pub convergence:     Option<ConvergenceRule>,
    /// Key the best snapshot is stored under
    pub checkpoint_key:  String,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            num_epochs:      200,
            patience:        10,
            primary_metric:  "loss".to_string(),
            lower_is_better: vec!["loss".to_string()],
            convergence:     None,
            checkpoint_key:  "best".to_string(),
        }
    }
}

/// Receives every EpochRecord as soon as it is appended.
pub trait EpochObserver {
    fn on_epoch(&mut self, record: &EpochRecord) -> Result<()>;
}

/// Everything the solver calls into, built by the orchestrator.
pub struct SolverComponents<B: AutodiffBackend, M: AutodiffModule<B>> {
    pub train_loss:  Box<dyn Loss<B>>,
    pub eval_loss:   Box<dyn Loss<B::InnerBackend>>,
    pub optimizer:   Box<dyn Optimizer<B, M>>,
    pub metrics:     Vec<Box<dyn Metric>>,
    pub checkpoints: Box<dyn CheckpointSink<B, M>>,
}

/// Predicted classes of one sequence, padding removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencePrediction {
    pub id:      String,
    pub classes: Vec<usize>,
}

/// Loss of one evaluation batch and the sequences it held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInference {
    pub index: usize,
    pub ids:   Vec<String>,
    pub loss:  f64,
}

#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Mean of the batch losses
    pub loss:        f64,
    pub metrics:     BTreeMap<String, f64>,
    pub batches:     Vec<BatchInference>,
    /// In batch order, one entry per sequence
    pub predictions: Vec<SequencePrediction>,
}

#[derive(Debug)]
pub struct FitOutcome<M> {
    /// Restored from the best checkpoint
    pub model:       M,
    pub history:     TrainingHistory,
    pub best_epoch:  usize,
    pub best_value:  f64,
    pub stop_reason: StopReason,
}

struct Progress<M> {
    model:       M,
    best_epoch:  usize,
    best_value:  f64,
    stop_reason: StopReason,
}

pub struct Solver<B: AutodiffBackend, M: AutodiffModule<B>> {
    config:      SolverConfig,
    device:      B::Device,
    train_loss:  Box<dyn Loss<B>>,
    eval_loss:   Box<dyn Loss<B::InnerBackend>>,
    optimizer:   Box<dyn Optimizer<B, M>>,
    metrics:     Vec<Box<dyn Metric>>,
    checkpoints: Box<dyn CheckpointSink<B, M>>,
    observers:   Vec<Box<dyn EpochObserver>>,
}

impl<B, M> Solver<B, M>
where
    B: AutodiffBackend,
    M: ResidueModel<B> + AutodiffModule<B> + 'static,
    M::InnerModule: ResidueModel<B::InnerBackend>,
{
    pub fn new(config: SolverConfig, device: B::Device, components: SolverComponents<B, M>) -> Result<Self> {
        validate(&config, &components.metrics)?;
        Ok(Self {
            config,
            device,
            train_loss:  components.train_loss,
            eval_loss:   components.eval_loss,
            optimizer:   components.optimizer,
            metrics:     components.metrics,
            checkpoints: components.checkpoints,
            observers:   Vec::new(),
        })
    }

    pub fn with_observer(mut self, observer: Box<dyn EpochObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn lower_is_better(&self) -> bool {
        self.config.lower_is_better.iter().any(|m| m == &self.config.primary_metric)
    }

    /// Run the epoch loop and return the restored best model.
    /// On failure the history completed so far travels with the error.
    pub fn fit(
        &mut self,
        model: M,
        train: &ResidueBatcher,
        val:   &ResidueBatcher,
        rng:   &mut RunRng,
    ) -> std::result::Result<FitOutcome<M>, SolverFailure> {
        let mut history = TrainingHistory::default();
        match self.run(model, train, val, rng, &mut history) {
            Ok(progress) => Ok(FitOutcome {
                model:       progress.model,
                history,
                best_epoch:  progress.best_epoch,
                best_value:  progress.best_value,
                stop_reason: progress.stop_reason,
            }),
            Err(error) => {
                tracing::error!("Training stopped: {}", error);
                Err(SolverFailure::new(error, history))
            }
        }
    }

    fn run(
        &mut self,
        mut model: M,
        train:     &ResidueBatcher,
        val:       &ResidueBatcher,
        rng:       &mut RunRng,
        history:   &mut TrainingHistory,
    ) -> Result<Progress<M>> {
        let lower_is_better = self.lower_is_better();
        let mut best_value  = if lower_is_better { f64::INFINITY } else { f64::NEG_INFINITY };
        let mut best_epoch  = 0usize;
        let mut stale       = 0usize;
        let mut stable      = 0usize;
        let mut stop_reason = StopReason::EpochBudgetExhausted;

        tracing::info!(
            "Training for up to {} epochs ({} train / {} val batches per epoch), lr={}, primary metric '{}'",
            self.config.num_epochs,
            train.num_batches(),
            val.num_batches(),
            self.optimizer.learning_rate(),
            self.config.primary_metric,
        );

        for epoch in 1..=self.config.num_epochs {
            // ── Step 1: training pass ─────────────────────────────────────────
            let (trained, train_loss) = self.train_epoch(model, train, rng, epoch)?;
            model = trained;

            // ── Step 2: validation pass ───────────────────────────────────────
            let valid = model.valid();
            let evaluation = evaluate(
                &valid,
                self.eval_loss.as_ref(),
                &self.metrics,
                val,
                rng,
                &self.device,
                Phase::Validation,
                epoch,
            )?;

            // ── Step 3: record ────────────────────────────────────────────────
            let previous_train_loss = history.last().map(|r| r.train_loss);
            let record = EpochRecord {
                epoch,
                train_loss,
                val_loss: evaluation.loss,
                val_metrics: evaluation.metrics,
            };
            let value = record.score(&self.config.primary_metric).ok_or_else(|| {
                TrainerError::invariant(format!(
                    "metric '{}' missing from epoch {epoch}",
                    self.config.primary_metric
                ))
            })?;
            history.push(record.clone());
            for observer in &mut self.observers {
                observer.on_epoch(&record)?;
            }

            tracing::info!(
                "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | {}={:.4}",
                epoch,
                self.config.num_epochs,
                train_loss,
                record.val_loss,
                self.config.primary_metric,
                value,
            );

            // ── Step 4: improvement check ─────────────────────────────────────
            let improved = if lower_is_better { value < best_value } else { value > best_value };
            if improved {
                best_value = value;
                best_epoch = epoch;
                stale      = 0;
                self.checkpoints.save(&self.config.checkpoint_key, epoch, &model)?;
                tracing::debug!("New best {}={:.6} at epoch {}", self.config.primary_metric, value, epoch);
            } else {
                stale += 1;
            }

            // ── Step 5: stop checks ───────────────────────────────────────────
            if let Some(rule) = self.config.convergence {
                match previous_train_loss {
                    Some(prev) if (train_loss - prev).abs() < rule.epsilon => stable += 1,
                    _ => stable = 0,
                }
            }

            if stale >= self.config.patience {
                stop_reason = StopReason::PatienceExhausted;
                tracing::info!("Early stopping at epoch {}: no improvement for {} epochs", epoch, stale);
                break;
            }
            if let Some(rule) = self.config.convergence {
                if stable >= rule.window {
                    stop_reason = StopReason::Converged;
                    tracing::info!("Training loss converged at epoch {}", epoch);
                    break;
                }
            }
        }

        // ── Step 6: restore the best snapshot ─────────────────────────────────
        let state = self
            .checkpoints
            .load(&self.config.checkpoint_key, model)?
            .ok_or_else(|| {
                TrainerError::invariant(format!(
                    "no checkpoint was saved under '{}' during {} epochs",
                    self.config.checkpoint_key,
                    history.len()
                ))
            })?;
        if state.epoch != best_epoch {
            return Err(TrainerError::invariant(format!(
                "restored checkpoint is from epoch {}, best epoch was {best_epoch}",
                state.epoch
            )));
        }

        tracing::info!(
            "Training complete ({}): restored epoch {} with {}={:.6}",
            stop_reason,
            best_epoch,
            self.config.primary_metric,
            best_value,
        );
        Ok(Progress { model: state.model, best_epoch, best_value, stop_reason })
    }

    fn train_epoch(
        &mut self,
        mut model: M,
        train:     &ResidueBatcher,
        rng:       &mut RunRng,
        epoch:     usize,
    ) -> Result<(M, f64)> {
        let mut loss_sum = 0.0f64;
        let mut batches  = 0usize;

        for (index, batch) in train.iter(rng).enumerate() {
            let tensors = batch.to_tensors::<B>(&self.device);
            let logits  = model.forward(tensors.embeddings);
            let loss    = self.train_loss.compute(logits, tensors.labels, tensors.mask);

            let value: f64 = loss.clone().into_scalar().elem::<f64>();
            if !value.is_finite() {
                return Err(TrainerError::NumericDivergence {
                    epoch,
                    phase: Phase::Training,
                    batch: index,
                    value,
                });
            }
            loss_sum += value;
            batches  += 1;

            // Backward pass + optimizer update
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = self.optimizer.step(model, grads);
        }

        if batches == 0 {
            return Err(TrainerError::invariant(format!("epoch {epoch} produced no training batches")));
        }
        Ok((model, loss_sum / batches as f64))
    }

    /// Evaluate `model` on every batch of `test` without updates.
    /// A non-finite loss here reports epoch 0.
    pub fn inference(&self, model: &M, test: &ResidueBatcher, rng: &mut RunRng) -> Result<InferenceResult> {
        let valid = model.valid();
        let evaluation = evaluate(
            &valid,
            self.eval_loss.as_ref(),
            &self.metrics,
            test,
            rng,
            &self.device,
            Phase::Testing,
            0,
        )?;
        for batch in &evaluation.batches {
            tracing::debug!(
                "{} batch {}: loss={:.4} ({} sequences)",
                test.dataset().partition(), batch.index, batch.loss, batch.ids.len()
            );
        }
        tracing::info!("Test loss={:.4} over {} sequences", evaluation.loss, evaluation.predictions.len());
        Ok(InferenceResult {
            loss:        evaluation.loss,
            metrics:     evaluation.metrics,
            batches:     evaluation.batches,
            predictions: evaluation.predictions,
        })
    }
}

fn validate(config: &SolverConfig, metrics: &[Box<dyn Metric>]) -> Result<()> {
    if config.num_epochs == 0 {
        return Err(TrainerError::config("num_epochs must be at least 1"));
    }
    if config.patience == 0 {
        return Err(TrainerError::config("patience must be at least 1"));
    }
    let known = config.primary_metric == "loss"
        || metrics.iter().any(|m| m.name() == config.primary_metric);
    if !known {
        return Err(TrainerError::config(format!(
            "primary metric '{}' is neither 'loss' nor a configured metric",
            config.primary_metric
        )));
    }
    if let Some(rule) = config.convergence {
        if !(rule.epsilon > 0.0) || rule.window == 0 {
            return Err(TrainerError::config(format!(
                "convergence rule needs epsilon > 0 and window >= 1, got {:?}",
                rule
            )));
        }
    }
    Ok(())
}

struct Evaluation {
    loss:        f64,
    metrics:     BTreeMap<String, f64>,
    batches:     Vec<BatchInference>,
    predictions: Vec<SequencePrediction>,
}

/// Shared by validation and testing: losses per batch, argmax
/// predictions per residue, metrics over the whole pass.
#[allow(clippy::too_many_arguments)]
fn evaluate<IB, IM>(
    model:   &IM,
    loss_fn: &dyn Loss<IB>,
    metrics: &[Box<dyn Metric>],
    batcher: &ResidueBatcher,
    rng:     &mut RunRng,
    device:  &IB::Device,
    phase:   Phase,
    epoch:   usize,
) -> Result<Evaluation>
where
    IB: Backend,
    IM: ResidueModel<IB>,
{
    let mut batches     = Vec::new();
    let mut all_classes = Vec::new();
    let mut all_labels  = Vec::new();
    let mut all_mask    = Vec::new();
    let mut predictions = Vec::new();

    for (index, batch) in batcher.iter(rng).enumerate() {
        let tensors = batch.to_tensors::<IB>(device);
        let logits  = model.forward(tensors.embeddings);

        let value: f64 = loss_fn
            .compute(logits.clone(), tensors.labels, tensors.mask)
            .into_scalar()
            .elem::<f64>();
        if !value.is_finite() {
            return Err(TrainerError::NumericDivergence { epoch, phase, batch: index, value });
        }
        batches.push(BatchInference { index, ids: batch.ids.clone(), loss: value });

        let classes = predicted_classes(logits)?;

        for (id, sequence) in batch.ids.iter().zip(batch.unpad(&classes)) {
            predictions.push(SequencePrediction { id: id.clone(), classes: sequence });
        }
        all_classes.extend(classes);
        all_labels.extend_from_slice(&batch.labels);
        all_mask.extend_from_slice(&batch.mask);
    }

    if batches.is_empty() {
        return Err(TrainerError::invariant(format!("{phase} pass produced no batches")));
    }

    let metrics = metrics
        .iter()
        .map(|m| (m.name().to_string(), m.score(&all_classes, &all_labels, &all_mask)))
        .collect();

    let loss = batches.iter().map(|b| b.loss).sum::<f64>() / batches.len() as f64;
    Ok(Evaluation { loss, metrics, batches, predictions })
}

/// Highest-scoring class per position, flattened row-major
/// over [batch, len] (padding included).
pub(crate) fn predicted_classes<B: Backend>(logits: Tensor<B, 3>) -> Result<Vec<usize>> {
    // argmax over classes: [b, L, C] → [b, L, 1]
    let classes = logits
        .argmax(2)
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| TrainerError::invariant(format!("cannot read predicted classes: {e:?}")))?;
    Ok(classes.into_iter().map(|c| c as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{ResidueDataset, ResidueSample};
    use crate::domain::{embedding::ResidueEmbedding, labels::Partition};
    use crate::infra::checkpoint::{CheckpointState, InMemoryCheckpointSink};
    use crate::ml::loss::MaskedCrossEntropy;
    use crate::ml::model::{LogReg, LogRegConfig};
    use crate::ml::optim::{OptimizerRegistry, OptimizerSpec};
    use crate::ml::scoring::MetricRegistry;
    use burn::backend::{Autodiff, NdArray};
    use std::cell::Cell;
    use std::rc::Rc;

    type B     = Autodiff<NdArray>;
    type Model = LogReg<B>;

    const KEY: &str = "test_run";

    // Residue class = sign of its first feature.
    fn sample(id: usize, len: usize) -> ResidueSample {
        let mut values = Vec::new();
        let mut labels = Vec::new();
        for r in 0..len {
            let x = if (id + r) % 2 == 0 { 1.0 } else { -1.0 };
            values.extend([x, 0.5 * x, (r as f32) / 10.0]);
            labels.push(if x > 0.0 { 1 } else { 0 });
        }
        ResidueSample {
            id:        format!("seq{id}"),
            embedding: ResidueEmbedding::new(len, 3, values).unwrap(),
            labels,
        }
    }

    fn batcher(partition: Partition, ids: std::ops::Range<usize>, shuffle: bool) -> ResidueBatcher {
        let samples = ids.map(|i| sample(i, 2 + i % 4)).collect();
        ResidueBatcher::new(ResidueDataset::new(partition, samples), 3, shuffle)
    }

    fn model(seed: u64) -> Model {
        LogRegConfig::new(3, 2).init::<B>(&mut RunRng::seeded(seed), &Default::default())
    }

    fn weights(model: &Model) -> Vec<f32> {
        model.linear.weight.val().into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    fn components(
        optimizer:   &str,
        lr:          f64,
        metrics:     Vec<Box<dyn Metric>>,
        checkpoints: Box<dyn CheckpointSink<B, Model>>,
        train_loss:  Box<dyn Loss<B>>,
    ) -> SolverComponents<B, Model> {
        SolverComponents {
            train_loss,
            eval_loss: Box::new(MaskedCrossEntropy::default()),
            optimizer: OptimizerRegistry::<B, Model>::default()
                .build(optimizer, &OptimizerSpec { learning_rate: lr })
                .unwrap(),
            metrics,
            checkpoints,
        }
    }

    fn config(num_epochs: usize, patience: usize) -> SolverConfig {
        SolverConfig {
            num_epochs,
            patience,
            checkpoint_key: KEY.to_string(),
            ..SolverConfig::default()
        }
    }

    /// Replays a fixed sequence of validation scores, one per epoch.
    struct ScriptedMetric {
        trace: Vec<f64>,
        calls: Cell<usize>,
    }

    impl Metric for ScriptedMetric {
        fn name(&self) -> &str {
            "scripted"
        }

        fn score(&self, _: &[usize], _: &[i64], _: &[bool]) -> f64 {
            let i = self.calls.get();
            self.calls.set(i + 1);
            self.trace[i.min(self.trace.len() - 1)]
        }
    }

    /// Cross-entropy that turns NaN after a number of healthy calls.
    struct PoisonedLoss {
        healthy: usize,
        calls:   Rc<Cell<usize>>,
    }

    impl PoisonedLoss {
        fn new(healthy: usize) -> (Self, Rc<Cell<usize>>) {
            let calls = Rc::new(Cell::new(0));
            (Self { healthy, calls: Rc::clone(&calls) }, calls)
        }
    }

    impl<LB: Backend> Loss<LB> for PoisonedLoss {
        fn compute(&self, logits: Tensor<LB, 3>, labels: Tensor<LB, 2, Int>, mask: Tensor<LB, 2, Bool>) -> Tensor<LB, 1> {
            let loss = MaskedCrossEntropy::default().compute(logits, labels, mask);
            let n = self.calls.get();
            self.calls.set(n + 1);
            if n >= self.healthy { loss.mul_scalar(f32::NAN) } else { loss }
        }
    }

    /// Accepts saves and forgets them.
    struct ForgetfulSink;

    impl CheckpointSink<B, Model> for ForgetfulSink {
        fn save(&mut self, _: &str, _: usize, _: &Model) -> Result<()> {
            Ok(())
        }

        fn load(&self, _: &str, _: Model) -> Result<Option<CheckpointState<Model>>> {
            Ok(None)
        }
    }

    struct CountingObserver(Rc<Cell<usize>>);

    impl EpochObserver for CountingObserver {
        fn on_epoch(&mut self, _: &EpochRecord) -> Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_patience_stops_and_restores_best_epoch() {
        let sink   = InMemoryCheckpointSink::<Model>::new();
        let metric = ScriptedMetric { trace: vec![0.5, 0.6, 0.55, 0.52, 0.51], calls: Cell::new(0) };
        let mut cfg = config(10, 2);
        cfg.primary_metric = "scripted".to_string();

        let mut solver = Solver::new(
            cfg,
            Default::default(),
            components("adam", 0.05, vec![Box::new(metric)], Box::new(sink.clone()), Box::new(MaskedCrossEntropy::default())),
        )
        .unwrap();

        let (train, val) = (batcher(Partition::Train, 0..6, true), batcher(Partition::Val, 6..9, false));
        let outcome = solver.fit(model(1), &train, &val, &mut RunRng::seeded(42)).unwrap();

        assert_eq!(outcome.history.len(), 4);
        assert_eq!(outcome.best_epoch, 2);
        assert_eq!(outcome.best_value, 0.6);
        assert_eq!(outcome.stop_reason, StopReason::PatienceExhausted);
        assert_eq!(sink.saved_epochs(KEY), vec![1, 2]);

        let best = sink.snapshot(KEY, 2).unwrap();
        assert_eq!(weights(&outcome.model), weights(&best));
        assert_ne!(weights(&best), weights(&sink.snapshot(KEY, 1).unwrap()));
    }

    #[test]
    fn test_nan_loss_halts_with_partial_history() {
        // 6 training samples, batch size 3 → 2 batches per epoch;
        // the 4th call (epoch 2, batch 1) is the first NaN
        let (poisoned, _) = PoisonedLoss::new(3);
        let mut solver = Solver::new(
            config(10, 5),
            Default::default(),
            components("adam", 0.01, vec![], Box::new(InMemoryCheckpointSink::new()), Box::new(poisoned)),
        )
        .unwrap();

        let (train, val) = (batcher(Partition::Train, 0..6, false), batcher(Partition::Val, 6..9, false));
        let failure = solver.fit(model(1), &train, &val, &mut RunRng::seeded(42)).unwrap_err();

        assert_eq!(failure.history.len(), 1);
        assert!(matches!(
            failure.error,
            TrainerError::NumericDivergence { epoch: 2, phase: Phase::Training, batch: 1, .. }
        ));
    }

    #[test]
    fn test_nan_validation_loss_halts_before_next_epoch() {
        // one validation batch per epoch; the second pass is NaN
        let (train_loss, train_calls) = PoisonedLoss::new(usize::MAX);
        let (eval_loss, _)            = PoisonedLoss::new(1);
        let mut parts = components("adam", 0.01, vec![], Box::new(InMemoryCheckpointSink::new()), Box::new(train_loss));
        parts.eval_loss = Box::new(eval_loss);
        let mut solver = Solver::new(config(10, 5), Default::default(), parts).unwrap();

        let (train, val) = (batcher(Partition::Train, 0..6, false), batcher(Partition::Val, 6..9, false));
        let failure = solver.fit(model(1), &train, &val, &mut RunRng::seeded(42)).unwrap_err();

        assert!(matches!(
            failure.error,
            TrainerError::NumericDivergence { epoch: 2, phase: Phase::Validation, batch: 0, .. }
        ));
        assert_eq!(failure.history.len(), 1);
        // two training batches in each of epochs 1 and 2, none in epoch 3
        assert_eq!(train_calls.get(), 4);
    }

    #[test]
    fn test_nan_test_loss_fails_inference() {
        let (eval_loss, eval_calls) = PoisonedLoss::new(2);
        let mut parts = components("adam", 0.01, vec![], Box::new(InMemoryCheckpointSink::new()), Box::new(MaskedCrossEntropy::default()));
        parts.eval_loss = Box::new(eval_loss);
        let mut solver = Solver::new(config(2, 5), Default::default(), parts).unwrap();

        let (train, val) = (batcher(Partition::Train, 0..6, false), batcher(Partition::Val, 6..9, false));
        let test = batcher(Partition::Test, 9..14, false);
        let mut rng = RunRng::seeded(5);
        let outcome = solver.fit(model(1), &train, &val, &mut rng).unwrap();
        assert_eq!(outcome.history.len(), 2);

        let err = solver.inference(&outcome.model, &test, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            TrainerError::NumericDivergence { epoch: 0, phase: Phase::Testing, batch: 0, .. }
        ));
        assert_eq!(eval_calls.get(), 3);
    }

    #[test]
    fn test_epoch_budget_ends_training() {
        let sink = InMemoryCheckpointSink::<Model>::new();
        let mut solver = Solver::new(
            config(3, 10),
            Default::default(),
            components("adam", 0.05, MetricRegistry::default().build_all(), Box::new(sink.clone()), Box::new(MaskedCrossEntropy::default())),
        )
        .unwrap();

        let (train, val) = (batcher(Partition::Train, 0..6, true), batcher(Partition::Val, 6..9, false));
        let outcome = solver.fit(model(3), &train, &val, &mut RunRng::seeded(7)).unwrap();

        assert_eq!(outcome.history.len(), 3);
        assert_eq!(outcome.stop_reason, StopReason::EpochBudgetExhausted);
        assert_eq!(sink.saved_epochs(KEY).last(), Some(&outcome.best_epoch));
        assert!(outcome.history.iter().all(|r| r.val_metrics.len() == 5));
    }

    #[test]
    fn test_convergence_rule_stops_flat_training() {
        let mut cfg = config(10, 10);
        cfg.convergence = Some(ConvergenceRule { epsilon: 1e-9, window: 2 });

        // zero learning rate → identical loss every epoch
        let mut solver = Solver::new(
            cfg,
            Default::default(),
            components("sgd", 0.0, vec![], Box::new(InMemoryCheckpointSink::new()), Box::new(MaskedCrossEntropy::default())),
        )
        .unwrap();

        let (train, val) = (batcher(Partition::Train, 0..6, false), batcher(Partition::Val, 6..9, false));
        let outcome = solver.fit(model(1), &train, &val, &mut RunRng::seeded(1)).unwrap();

        assert_eq!(outcome.history.len(), 3);
        assert_eq!(outcome.stop_reason, StopReason::Converged);
        assert_eq!(outcome.best_epoch, 1);
    }

    #[test]
    fn test_missing_checkpoint_is_solver_invariant() {
        let mut solver = Solver::new(
            config(2, 5),
            Default::default(),
            components("adam", 0.01, vec![], Box::new(ForgetfulSink), Box::new(MaskedCrossEntropy::default())),
        )
        .unwrap();

        let (train, val) = (batcher(Partition::Train, 0..6, false), batcher(Partition::Val, 6..9, false));
        let failure = solver.fit(model(1), &train, &val, &mut RunRng::seeded(1)).unwrap_err();

        assert!(matches!(failure.error, TrainerError::SolverInvariant(_)));
        assert_eq!(failure.history.len(), 2);
    }

    #[test]
    fn test_unknown_primary_metric_is_rejected() {
        let mut cfg = config(5, 2);
        cfg.primary_metric = "auc".to_string();
        let result = Solver::new(
            cfg,
            Default::default(),
            components("adam", 0.01, MetricRegistry::default().build_all(), Box::new(ForgetfulSink), Box::new(MaskedCrossEntropy::default())),
        );
        assert!(matches!(result.err(), Some(TrainerError::Configuration(_))));
    }

    #[test]
    fn test_observer_and_inference() {
        let seen = Rc::new(Cell::new(0));
        let mut solver = Solver::new(
            config(2, 5),
            Default::default(),
            components("adam", 0.05, MetricRegistry::default().build_all(), Box::new(InMemoryCheckpointSink::new()), Box::new(MaskedCrossEntropy::default())),
        )
        .unwrap()
        .with_observer(Box::new(CountingObserver(Rc::clone(&seen))));

        let (train, val) = (batcher(Partition::Train, 0..6, true), batcher(Partition::Val, 6..9, false));
        let test = batcher(Partition::Test, 9..14, false);
        let mut rng = RunRng::seeded(3);
        let outcome = solver.fit(model(2), &train, &val, &mut rng).unwrap();
        assert_eq!(seen.get(), 2);

        let result = solver.inference(&outcome.model, &test, &mut rng).unwrap();
        assert!(result.loss.is_finite());
        assert_eq!(result.predictions.len(), 5);

        // 5 test sequences, batch size 3 → batches of 3 and 2
        let indices: Vec<usize> = result.batches.iter().map(|b| b.index).collect();
        assert_eq!(indices, [0, 1]);
        assert_eq!(result.batches[0].ids, ["seq9", "seq10", "seq11"]);
        assert_eq!(result.batches[1].ids, ["seq12", "seq13"]);
        assert!(result.batches.iter().all(|b| b.loss.is_finite()));
        let mean = result.batches.iter().map(|b| b.loss).sum::<f64>() / 2.0;
        assert!((result.loss - mean).abs() < 1e-12);
        for (prediction, sample) in result.predictions.iter().zip(test.dataset().samples()) {
            assert_eq!(prediction.id, sample.id);
            assert_eq!(prediction.classes.len(), sample.len());
            assert!(prediction.classes.iter().all(|&c| c < 2));
        }
        assert!(result.metrics.contains_key("accuracy"));
    }
}
