use std::str::FromStr;

use burn::{
    module::{AutodiffModule, Param},
    nn::{
        conv::{Conv1d, Conv1dConfig},
        Dropout, DropoutConfig, Initializer, Linear, LinearConfig, PaddingConfig1d,
    },
    prelude::*,
    tensor::{activation::relu, backend::AutodiffBackend},
};
use serde::{Deserialize, Serialize};

use crate::infra::rng::RunRng;

/// Capability every per-residue classifier provides to the solver.
///
/// Parameters are counted with `Module::num_params`; state is
/// saved and restored through a `CheckpointSink`.
pub trait ResidueModel<B: Backend>: Module<B> {
    /// embeddings [batch, len, features] → logits [batch, len, classes]
    fn forward(&self, embeddings: Tensor<B, 3>) -> Tensor<B, 3>;
}

/// Shape information every model constructor receives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    pub n_features: usize,
    pub n_classes:  usize,
    pub dropout:    f64,
}

// ─── Model registry ───────────────────────────────────────────────────────────
/// Configuration tag → model constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelChoice {
    #[serde(rename = "FNN")]
    Fnn,
    #[serde(rename = "CNN")]
    Cnn,
    #[serde(rename = "LogReg")]
    LogReg,
}

impl ModelChoice {
    pub const ALL: [ModelChoice; 3] = [ModelChoice::Fnn, ModelChoice::Cnn, ModelChoice::LogReg];

    pub fn tag(&self) -> &'static str {
        match self {
            ModelChoice::Fnn    => "FNN",
            ModelChoice::Cnn    => "CNN",
            ModelChoice::LogReg => "LogReg",
        }
    }

    /// Construct the chosen model from the run's random source and hand
    /// it, together with that source, to `visitor`. Each model type is
    /// concrete, so the caller's generic training code is reached
    /// through the visitor.
    pub fn build<B, V>(&self, spec: &ModelSpec, rng: &mut RunRng, device: &B::Device, visitor: V) -> V::Output
    where
        B: AutodiffBackend,
        V: ModelVisitor<B>,
    {
        tracing::debug!("Building {} model: {:?}", self.tag(), spec);
        match self {
            ModelChoice::Fnn => {
                let model = FnnConfig::new(spec.n_features, spec.n_classes)
                    .with_dropout(spec.dropout)
                    .init::<B>(rng, device);
                visitor.visit(model, rng)
            }
            ModelChoice::Cnn => {
                let model = CnnConfig::new(spec.n_features, spec.n_classes)
                    .with_dropout(spec.dropout)
                    .init::<B>(rng, device);
                visitor.visit(model, rng)
            }
            ModelChoice::LogReg => {
                let model = LogRegConfig::new(spec.n_features, spec.n_classes).init::<B>(rng, device);
                visitor.visit(model, rng)
            }
        }
    }
}

impl FromStr for ModelChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelChoice::ALL
            .into_iter()
            .find(|m| m.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let known: Vec<&str> = ModelChoice::ALL.iter().map(|m| m.tag()).collect();
                format!("unknown model '{s}', expected one of {}", known.join(", "))
            })
    }
}

impl std::fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Continuation that receives a freshly built model of any type.
pub trait ModelVisitor<B: AutodiffBackend> {
    type Output;

    fn visit<M>(self, model: M, rng: &mut RunRng) -> Self::Output
    where
        M: ResidueModel<B> + AutodiffModule<B> + 'static,
        M::InnerModule: ResidueModel<B::InnerBackend>;
}

// ─── Parameter initialisation ─────────────────────────────────────────────────
// Uniform(-1/sqrt(fan_in), 1/sqrt(fan_in)) for weights and biases,
// drawn from the run's random source. Layers are created with zero
// initialisers first so initialisation never touches the backend RNG
// (dropout does, see RunRng::seed_backend).

fn seeded_linear<B: Backend>(d_in: usize, d_out: usize, rng: &mut RunRng, device: &B::Device) -> Linear<B> {
    let mut layer = LinearConfig::new(d_in, d_out)
        .with_initializer(Initializer::Zeros)
        .init(device);
    let bound = 1.0 / (d_in as f32).sqrt();

    layer.weight = Param::from_tensor(Tensor::from_data(
        TensorData::new(rng.uniform(d_in * d_out, bound), [d_in, d_out]),
        device,
    ));
    layer.bias = Some(Param::from_tensor(Tensor::from_data(
        TensorData::new(rng.uniform(d_out, bound), [d_out]),
        device,
    )));
    layer
}

fn seeded_conv1d<B: Backend>(
    channels_in:  usize,
    channels_out: usize,
    kernel_size:  usize,
    rng:          &mut RunRng,
    device:       &B::Device,
) -> Conv1d<B> {
    let mut layer = Conv1dConfig::new(channels_in, channels_out, kernel_size)
        .with_padding(PaddingConfig1d::Explicit(kernel_size / 2))
        .with_initializer(Initializer::Zeros)
        .init(device);
    let bound = 1.0 / ((channels_in * kernel_size) as f32).sqrt();

    layer.weight = Param::from_tensor(Tensor::from_data(
        TensorData::new(
            rng.uniform(channels_out * channels_in * kernel_size, bound),
            [channels_out, channels_in, kernel_size],
        ),
        device,
    ));
    layer.bias = Some(Param::from_tensor(Tensor::from_data(
        TensorData::new(rng.uniform(channels_out, bound), [channels_out]),
        device,
    )));
    layer
}

// ─── FNN ──────────────────────────────────────────────────────────────────────
// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct FnnConfig {
    pub n_features: usize,
    pub n_classes:  usize,
    #[config(default = 32)]
    pub hidden:     usize,
    #[config(default = 0.25)]
    pub dropout:    f64,
}

impl FnnConfig {
    pub fn init<B: Backend>(&self, rng: &mut RunRng, device: &B::Device) -> Fnn<B> {
        Fnn {
            input:   seeded_linear(self.n_features, self.hidden, rng, device),
            output:  seeded_linear(self.hidden, self.n_classes, rng, device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Two dense layers applied to every residue independently.
#[derive(Module, Debug)]
pub struct Fnn<B: Backend> {
    pub input:   Linear<B>,
    pub output:  Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> ResidueModel<B> for Fnn<B> {
    fn forward(&self, embeddings: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = relu(self.input.forward(embeddings));
        let x = self.dropout.forward(x);
        self.output.forward(x)
    }
}

// ─── CNN ──────────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct CnnConfig {
    pub n_features:  usize,
    pub n_classes:   usize,
    #[config(default = 32)]
    pub channels:    usize,
    #[config(default = 7)]
    pub kernel_size: usize,
    #[config(default = 0.25)]
    pub dropout:     f64,
}

impl CnnConfig {
    pub fn init<B: Backend>(&self, rng: &mut RunRng, device: &B::Device) -> Cnn<B> {
        Cnn {
            conv1:   seeded_conv1d(self.n_features, self.channels, self.kernel_size, rng, device),
            conv2:   seeded_conv1d(self.channels, self.n_classes, self.kernel_size, rng, device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Two 1D convolutions along the residue axis ("same" padding, odd kernel).
#[derive(Module, Debug)]
pub struct Cnn<B: Backend> {
    pub conv1:   Conv1d<B>,
    pub conv2:   Conv1d<B>,
    pub dropout: Dropout,
}

impl<B: Backend> ResidueModel<B> for Cnn<B> {
    fn forward(&self, embeddings: Tensor<B, 3>) -> Tensor<B, 3> {
        // [batch, len, features] → [batch, features, len]
        let x = embeddings.swap_dims(1, 2);
        let x = relu(self.conv1.forward(x));
        let x = self.dropout.forward(x);
        self.conv2.forward(x).swap_dims(1, 2)
    }
}

// ─── LogReg ───────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct LogRegConfig {
    pub n_features: usize,
    pub n_classes:  usize,
}

impl LogRegConfig {
    pub fn init<B: Backend>(&self, rng: &mut RunRng, device: &B::Device) -> LogReg<B> {
        LogReg { linear: seeded_linear(self.n_features, self.n_classes, rng, device) }
    }
}

/// Multinomial logistic regression per residue.
#[derive(Module, Debug)]
pub struct LogReg<B: Backend> {
    pub linear: Linear<B>,
}

impl<B: Backend> ResidueModel<B> for LogReg<B> {
    fn forward(&self, embeddings: Tensor<B, 3>) -> Tensor<B, 3> {
        self.linear.forward(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    struct Shape;

    impl ModelVisitor<TestBackend> for Shape {
        type Output = ([usize; 3], usize);

        fn visit<M>(self, model: M, _rng: &mut RunRng) -> Self::Output
        where
            M: ResidueModel<TestBackend> + AutodiffModule<TestBackend> + 'static,
            M::InnerModule: ResidueModel<NdArray>,
        {
            let input = Tensor::<TestBackend, 3>::ones([2, 9, 4], &Default::default());
            (model.forward(input).dims(), model.num_params())
        }
    }

    #[test]
    fn test_every_model_maps_residues_to_classes() {
        let spec = ModelSpec { n_features: 4, n_classes: 3, dropout: 0.0 };
        for choice in ModelChoice::ALL {
            let mut rng = RunRng::seeded(1);
            let (dims, _) = choice.build::<TestBackend, _>(&spec, &mut rng, &Default::default(), Shape);
            assert_eq!(dims, [2, 9, 3], "{choice}");
        }
    }

    #[test]
    fn test_parameter_counts() {
        let spec    = ModelSpec { n_features: 4, n_classes: 3, dropout: 0.0 };
        let mut rng = RunRng::seeded(1);
        let (_, logreg) = ModelChoice::LogReg.build::<TestBackend, _>(&spec, &mut rng, &Default::default(), Shape);
        assert_eq!(logreg, 4 * 3 + 3);

        let (_, fnn) = ModelChoice::Fnn.build::<TestBackend, _>(&spec, &mut rng, &Default::default(), Shape);
        assert_eq!(fnn, (4 * 32 + 32) + (32 * 3 + 3));
    }

    #[test]
    fn test_same_seed_same_parameters() {
        let device = Default::default();
        let a = LogRegConfig::new(4, 2).init::<NdArray>(&mut RunRng::seeded(9), &device);
        let b = LogRegConfig::new(4, 2).init::<NdArray>(&mut RunRng::seeded(9), &device);
        let c = LogRegConfig::new(4, 2).init::<NdArray>(&mut RunRng::seeded(10), &device);

        let w = |m: &LogReg<NdArray>| m.linear.weight.val().into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert_eq!(w(&a), w(&b));
        assert_ne!(w(&a), w(&c));
    }

    #[test]
    fn test_model_choice_parses_tags() {
        assert_eq!("cnn".parse::<ModelChoice>().unwrap(), ModelChoice::Cnn);
        assert_eq!("LogReg".parse::<ModelChoice>().unwrap(), ModelChoice::LogReg);
        assert!("transformer".parse::<ModelChoice>().is_err());
    }
}
