// ============================================================
// Layer 5 — Surrogate Networks
// ============================================================
// Feed-forward stacks that map one encoder layer's flattened
// input [N, max_len · D] to its flattened output.
//
// Each stage is   LayerNorm → Linear → LeakyReLU(0.01)
// and the last stage drops the LeakyReLU.
//
// Widths are fixed ratios of w = max_len · d_model:
//
//   shrink2    w → w/2   → w
//   shrink8    w → w/8   → w
//   shrink128  w → w/128 → w
//   shrink256  w → w/256 → w
//   small      w → w/4   → output_dim (defaults to w)
//   tapered    w/[1,1,2,2,4,4,2,2,1,1]
//   medium     w·[1,2,2,1]
//   large      w·[1,2,8,1]        sharded
//   wide       w·[1,2,4,8,4,1]    sharded
//
// Sharded kinds place stage i on devices[1 + i mod (n-1)] and keep
// devices[0] as the reference device. Activations follow the stage
// parameters; output and mask meet on the input's device.

use anyhow::{bail, Result};
use burn::{
    module::Param,
    nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
    tensor::{activation, Distribution},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const LEAKY_SLOPE: f64 = 0.01;
const UNIFORM_BIAS: f64 = 0.01;

// ─── SurrogateKind ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurrogateKind {
    Shrink2,
    Shrink8,
    Shrink128,
    Shrink256,
    Small,
    Tapered,
    Medium,
    Large,
    Wide,
}

impl SurrogateKind {
    pub const ALL: [SurrogateKind; 9] = [
        SurrogateKind::Shrink2,
        SurrogateKind::Shrink8,
        SurrogateKind::Shrink128,
        SurrogateKind::Shrink256,
        SurrogateKind::Small,
        SurrogateKind::Tapered,
        SurrogateKind::Medium,
        SurrogateKind::Large,
        SurrogateKind::Wide,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SurrogateKind::Shrink2   => "shrink2",
            SurrogateKind::Shrink8   => "shrink8",
            SurrogateKind::Shrink128 => "shrink128",
            SurrogateKind::Shrink256 => "shrink256",
            SurrogateKind::Small     => "small",
            SurrogateKind::Tapered   => "tapered",
            SurrogateKind::Medium    => "medium",
            SurrogateKind::Large     => "large",
            SurrogateKind::Wide      => "wide",
        }
    }

    pub fn is_sharded(&self) -> bool {
        matches!(self, SurrogateKind::Large | SurrogateKind::Wide)
    }

    /// Layer widths from input to output, `widths.len() - 1` stages
    pub fn widths(&self, w: usize, output_dim: usize) -> Vec<usize> {
        match self {
            SurrogateKind::Shrink2   => vec![w, w / 2, w],
            SurrogateKind::Shrink8   => vec![w, w / 8, w],
            SurrogateKind::Shrink128 => vec![w, w / 128, w],
            SurrogateKind::Shrink256 => vec![w, w / 256, w],
            SurrogateKind::Small     => vec![w, w / 4, output_dim],
            SurrogateKind::Tapered   => [1, 1, 2, 2, 4, 4, 2, 2, 1, 1].iter().map(|d| w / d).collect(),
            SurrogateKind::Medium    => [1, 2, 2, 1].iter().map(|m| w * m).collect(),
            SurrogateKind::Large     => [1, 2, 8, 1].iter().map(|m| w * m).collect(),
            SurrogateKind::Wide      => [1, 2, 4, 8, 4, 1].iter().map(|m| w * m).collect(),
        }
    }
}

impl FromStr for SurrogateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SurrogateKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = SurrogateKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown surrogate '{s}', expected one of {}", names.join(", "))
            })
    }
}

impl fmt::Display for SurrogateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── SurrogateConfig ──────────────────────────────────────────────────────────
/// Saved as surrogate_config.json next to the checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateConfig {
    pub kind:            SurrogateKind,
    pub model_dimension: usize,
    pub sentence_length: usize,
    /// Final width of `small`; every other kind ends at the input width
    pub output_dim:      Option<usize>,
    pub uniform_init:    bool,
}

impl SurrogateConfig {
    pub fn new(kind: SurrogateKind, model_dimension: usize, sentence_length: usize) -> Self {
        Self {
            kind,
            model_dimension,
            sentence_length,
            output_dim: None,
            uniform_init: false,
        }
    }

    pub fn with_uniform_init(mut self, uniform_init: bool) -> Self {
        self.uniform_init = uniform_init;
        self
    }

    /// max_len · d_model
    pub fn input_width(&self) -> usize {
        self.sentence_length * self.model_dimension
    }

    pub fn widths(&self) -> Vec<usize> {
        let w = self.input_width();
        self.kind.widths(w, self.output_dim.unwrap_or(w))
    }

    /// Reject schedules that would produce an empty layer.
    pub fn validate(&self) -> Result<()> {
        let widths = self.widths();
        if let Some(pos) = widths.iter().position(|&w| w == 0) {
            bail!(
                "surrogate '{}' has a zero-width layer at position {} for width {} (max_len {} × d_model {})",
                self.kind,
                pos,
                self.input_width(),
                self.sentence_length,
                self.model_dimension
            );
        }
        Ok(())
    }

    /// Build the network. `devices[0]` is the reference device; sharded
    /// kinds spread their stages over the rest.
    ///
    /// # Panics
    /// If `devices` is empty.
    pub fn init<B: Backend>(&self, devices: &[B::Device]) -> SurrogateNetwork<B> {
        assert!(!devices.is_empty(), "surrogate needs at least one device");

        let widths = self.widths();
        let stages = widths
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let device = stage_device(self.kind, i, devices);
                SurrogateStage {
                    norm:   LayerNormConfig::new(pair[0]).init(device),
                    linear: LinearConfig::new(pair[0], pair[1]).init(device),
                }
            })
            .collect();

        let network = SurrogateNetwork { stages };
        if self.uniform_init {
            network.init_weights()
        } else {
            network
        }
    }
}

/// Device for stage `i`: the reference device unless the kind is
/// sharded and there are devices to shard over.
pub fn stage_device<D>(kind: SurrogateKind, i: usize, devices: &[D]) -> &D {
    if kind.is_sharded() && devices.len() > 1 {
        &devices[1 + i % (devices.len() - 1)]
    } else {
        &devices[0]
    }
}

// ─── Uniform Initialisation ───────────────────────────────────────────────────
/// Implemented by layers that own a weight matrix the uniform
/// initialiser can overwrite.
pub trait UniformInit {
    fn init_uniform(self) -> Self;
}

impl<B: Backend> UniformInit for Linear<B> {
    /// Weights drawn from U[0, 1), bias filled with 0.01
    fn init_uniform(mut self) -> Self {
        let weight = self.weight.val();
        let device = weight.device();
        self.weight = Param::from_tensor(Tensor::random(
            weight.shape(),
            Distribution::Uniform(0.0, 1.0),
            &device,
        ));
        if let Some(bias) = self.bias.take() {
            let bias = bias.val();
            self.bias = Some(Param::from_tensor(Tensor::full(bias.shape(), UNIFORM_BIAS, &device)));
        }
        self
    }
}

// ─── SurrogateNetwork ─────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct SurrogateStage<B: Backend> {
    pub norm:   LayerNorm<B>,
    pub linear: Linear<B>,
}

impl<B: Backend> SurrogateStage<B> {
    pub fn device(&self) -> B::Device {
        self.linear.weight.val().device()
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(self.norm.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct SurrogateNetwork<B: Backend> {
    pub stages: Vec<SurrogateStage<B>>,
}

impl<B: Backend> SurrogateNetwork<B> {
    /// Apply the uniform initialiser to every layer that supports it.
    pub fn init_weights(mut self) -> Self {
        self.stages = self
            .stages
            .into_iter()
            .map(|stage| SurrogateStage { norm: stage.norm, linear: stage.linear.init_uniform() })
            .collect();
        self
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// data, mask `[N, w]` → prediction `[N, out]`, zero where mask is zero
    pub fn forward(&self, data: Tensor<B, 2>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
        let reference = data.device();
        let last      = self.stages.len().saturating_sub(1);

        let mut x = data;
        for (i, stage) in self.stages.iter().enumerate() {
            x = stage.forward(x.to_device(&stage.device()));
            if i < last {
                x = activation::leaky_relu(x, LEAKY_SLOPE);
            }
        }
        x.to_device(&reference) * mask.to_device(&reference)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_width_schedules() {
        assert_eq!(SurrogateKind::Shrink8.widths(64, 64), vec![64, 8, 64]);
        assert_eq!(SurrogateKind::Small.widths(64, 10), vec![64, 16, 10]);
        assert_eq!(
            SurrogateKind::Tapered.widths(64, 64),
            vec![64, 64, 32, 32, 16, 16, 32, 32, 64, 64]
        );
        assert_eq!(SurrogateKind::Medium.widths(4, 4), vec![4, 8, 8, 4]);
        assert_eq!(SurrogateKind::Wide.widths(4, 4), vec![4, 8, 16, 32, 16, 4]);
    }

    #[test]
    fn test_parse_round_trip() {
        for kind in SurrogateKind::ALL {
            assert_eq!(kind.as_str().parse::<SurrogateKind>().unwrap(), kind);
        }
        assert!("huge".parse::<SurrogateKind>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_width() {
        let cfg = SurrogateConfig::new(SurrogateKind::Shrink256, 4, 2);
        assert!(cfg.validate().is_err());
        let cfg = SurrogateConfig::new(SurrogateKind::Shrink2, 4, 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_sharded_placement_round_robin() {
        let devices = ["ref", "a", "b"];
        let picked: Vec<&str> = (0..5).map(|i| *stage_device(SurrogateKind::Large, i, &devices)).collect();
        assert_eq!(picked, vec!["a", "b", "a", "b", "a"]);
        // single device and unsharded kinds stay on the reference
        assert_eq!(*stage_device(SurrogateKind::Wide, 3, &["ref"]), "ref");
        assert_eq!(*stage_device(SurrogateKind::Medium, 3, &devices), "ref");
    }

    #[test]
    fn test_forward_zeroes_masked_positions() {
        let device  = Default::default();
        let cfg     = SurrogateConfig::new(SurrogateKind::Shrink2, 2, 3);
        let network: SurrogateNetwork<TestBackend> = cfg.init(std::slice::from_ref(&device));
        assert_eq!(network.num_stages(), 2);

        let data = Tensor::<TestBackend, 2>::random([2, 6], Distribution::Default, &device);
        let mask = Tensor::<TestBackend, 2>::from_floats(
            [[1.0, 1.0, 1.0, 1.0, 0.0, 0.0], [1.0, 1.0, 0.0, 0.0, 0.0, 0.0]],
            &device,
        );
        let out = network.forward(data, mask);
        assert_eq!(out.dims(), [2, 6]);

        let values = out.into_data().to_vec::<f32>().unwrap();
        for idx in [4, 5, 8, 9, 10, 11] {
            assert_eq!(values[idx], 0.0);
        }
    }

    #[test]
    fn test_uniform_init_touches_weights_and_bias() {
        let device  = Default::default();
        let cfg     = SurrogateConfig::new(SurrogateKind::Medium, 2, 2).with_uniform_init(true);
        let network: SurrogateNetwork<TestBackend> = cfg.init(std::slice::from_ref(&device));

        for stage in &network.stages {
            let w = stage.linear.weight.val().into_data().to_vec::<f32>().unwrap();
            assert!(w.iter().all(|&x| (0.0..1.0).contains(&x)));
            let b = stage.linear.bias.as_ref().unwrap().val().into_data().to_vec::<f32>().unwrap();
            assert!(b.iter().all(|&x| (x - 0.01).abs() < 1e-6));
        }
    }
}
