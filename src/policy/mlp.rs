//! Learned policy: dense MLP loaded from exported weights
//!
//! The export pipeline writes the actor network as JSON:
//!
//! ```json
//! {"layers": [
//!   {"weights": [[...5 floats...], ...64 rows], "bias": [...64], "activation": "tanh"},
//!   {"weights": [[...64 floats...], ...64 rows], "bias": [...64], "activation": "tanh"},
//!   {"weights": [[...64 floats...], ...2 rows],  "bias": [...2]}
//! ]}
//! ```
//!
//! Each `weights` row is one output unit. The final layer yields one logit per
//! absolute direction; the action is their arg-max.

use serde::Deserialize;
use std::path::Path;

use super::{DecisionSource, Direction, Observation, PolicyError, OBSERVATION_LEN};

/// Logits in the policy head (Left, Right)
const ACTION_COUNT: usize = 2;

/// Per-layer activation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Tanh,
    Relu,
    #[default]
    Identity,
}

impl Activation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Tanh => x.tanh(),
            Self::Relu => x.max(0.0),
            Self::Identity => x,
        }
    }
}

/// On-disk layer description
#[derive(Debug, Clone, Deserialize)]
pub struct LayerSpec {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub activation: Activation,
}

#[derive(Debug, Deserialize)]
struct WeightsFile {
    layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    inputs: usize,
    /// Row-major, `outputs * inputs`
    weights: Vec<f32>,
    bias: Vec<f32>,
    activation: Activation,
}

impl DenseLayer {
    fn forward(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .chunks_exact(self.inputs)
            .zip(&self.bias)
            .map(|(row, b)| {
                let sum: f32 = row.iter().zip(input).map(|(w, x)| w * x).sum();
                self.activation.apply(sum + b)
            })
            .collect()
    }
}

/// Immutable feed-forward actor network.
///
/// Holds no interior state, so one instance serves every session concurrently.
#[derive(Debug, Clone)]
pub struct MlpPolicy {
    layers: Vec<DenseLayer>,
}

impl MlpPolicy {
    /// Load weights from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, PolicyError> {
        let file: WeightsFile = serde_json::from_str(raw)?;
        Self::from_layers(file.layers)
    }

    /// Validate shapes and build the network
    pub fn from_layers(specs: Vec<LayerSpec>) -> Result<Self, PolicyError> {
        if specs.is_empty() {
            return Err(PolicyError::Shape("network has no layers".to_string()));
        }

        let mut inputs = OBSERVATION_LEN;
        let mut layers = Vec::with_capacity(specs.len());

        for (index, spec) in specs.into_iter().enumerate() {
            let outputs = spec.weights.len();
            if outputs == 0 {
                return Err(PolicyError::Shape(format!("layer {} has no units", index)));
            }
            if spec.bias.len() != outputs {
                return Err(PolicyError::Shape(format!(
                    "layer {} has {} rows but {} biases",
                    index,
                    outputs,
                    spec.bias.len()
                )));
            }
            if let Some(row) = spec.weights.iter().position(|r| r.len() != inputs) {
                return Err(PolicyError::Shape(format!(
                    "layer {} row {} has {} weights, expected {}",
                    index,
                    row,
                    spec.weights[row].len(),
                    inputs
                )));
            }

            let weights: Vec<f32> = spec.weights.into_iter().flatten().collect();
            if weights.iter().chain(&spec.bias).any(|v| !v.is_finite()) {
                return Err(PolicyError::Shape(format!(
                    "layer {} contains non-finite parameters",
                    index
                )));
            }

            layers.push(DenseLayer {
                inputs,
                weights,
                bias: spec.bias,
                activation: spec.activation,
            });
            inputs = outputs;
        }

        if inputs != ACTION_COUNT {
            return Err(PolicyError::Shape(format!(
                "policy head has {} outputs, expected {}",
                inputs, ACTION_COUNT
            )));
        }

        Ok(Self { layers })
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Raw action logits for a window
    pub fn logits(&self, observation: &Observation) -> Vec<f32> {
        self.layers
            .iter()
            .fold(observation.features().to_vec(), |x, layer| layer.forward(&x))
    }
}

impl DecisionSource for MlpPolicy {
    fn name(&self) -> &'static str {
        "policy"
    }

    /// Deterministic arg-max; ties resolve to the lowest index
    fn predict(&self, observation: &Observation) -> Result<Direction, PolicyError> {
        let logits = self.logits(observation);
        if logits.iter().any(|l| !l.is_finite()) {
            return Err(PolicyError::Inference(format!(
                "non-finite logits {:?}",
                logits
            )));
        }

        let best = logits
            .iter()
            .enumerate()
            .fold(0, |best, (i, &l)| if l > logits[best] { i } else { best });

        Direction::from_index(best)
            .ok_or_else(|| PolicyError::Inference(format!("logit index {} out of range", best)))
    }
}
