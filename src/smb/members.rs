//! Pre-trained ensemble members.
//!
//! Members are stored one per JSON file. Two shapes exist:
//!
//! * linear (lasso): `{"mean": [...], "scale": [...], "coef": [...], "intercept": x}`
//! * dense network: `{"input_mean": [...], "input_scale": [...], "layers": [{"weights": [[...]], "bias": [...], "activation": "relu"}]}`
//!
//! Weights of a layer are stored row per output unit.

use std::path::Path;

use ndarray::{Array1, Array2};
use serde::Deserialize;

use crate::error::BatchError;

/// Inference contract shared by every member family.
pub trait SmbPredictor: Send + Sync {
    /// Glacier-wide mass balance [m w.e.] for one feature vector.
    /// Returns NaN when the input does not fit the member.
    fn predict(&self, features: &[f64]) -> f64;
}

/// Standardize-then-dot linear regression.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearMember {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    pub coef: Vec<f64>,
    pub intercept: f64,
}

impl LinearMember {
    fn check(&self) -> Result<(), String> {
        let n = self.coef.len();
        if self.mean.len() != n || self.scale.len() != n {
            return Err(format!(
                "mean/scale/coef lengths differ ({}/{}/{})",
                self.mean.len(),
                self.scale.len(),
                n
            ));
        }
        Ok(())
    }
}

impl SmbPredictor for LinearMember {
    fn predict(&self, features: &[f64]) -> f64 {
        if features.len() != self.coef.len() {
            return f64::NAN;
        }
        features
            .iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .zip(&self.coef)
            .map(|(((x, m), s), c)| {
                let s = if *s == 0.0 { 1.0 } else { *s };
                (x - m) / s * c
            })
            .sum::<f64>()
            + self.intercept
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Linear,
    Tanh,
    Sigmoid,
}

impl Activation {
    #[inline]
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Linear => x,
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DenseLayer {
    weights: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

/// Feed-forward network evaluated with `ndarray` matrix-vector products.
#[derive(Debug, Clone)]
pub struct DenseNetwork {
    input_mean: Option<Array1<f64>>,
    input_scale: Option<Array1<f64>>,
    layers: Vec<DenseLayer>,
}

#[derive(Deserialize)]
struct RawLayer {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    activation: Activation,
}

#[derive(Deserialize)]
struct RawNetwork {
    #[serde(default)]
    input_mean: Option<Vec<f64>>,
    #[serde(default)]
    input_scale: Option<Vec<f64>>,
    layers: Vec<RawLayer>,
}

impl TryFrom<RawNetwork> for DenseNetwork {
    type Error = String;

    fn try_from(raw: RawNetwork) -> Result<Self, Self::Error> {
        if raw.layers.is_empty() {
            return Err("network has no layers".into());
        }
        let mut layers = Vec::with_capacity(raw.layers.len());
        let mut width: Option<usize> = None;
        for (i, layer) in raw.layers.into_iter().enumerate() {
            let rows = layer.weights.len();
            let cols = layer.weights.first().map_or(0, Vec::len);
            if rows == 0 || cols == 0 || layer.weights.iter().any(|r| r.len() != cols) {
                return Err(format!("layer {i}: ragged or empty weight matrix"));
            }
            if layer.bias.len() != rows {
                return Err(format!("layer {i}: bias has {} entries for {rows} units", layer.bias.len()));
            }
            if let Some(w) = width {
                if w != cols {
                    return Err(format!("layer {i}: expects {cols} inputs, previous layer gives {w}"));
                }
            }
            width = Some(rows);
            let flat: Vec<f64> = layer.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((rows, cols), flat).map_err(|e| e.to_string())?;
            layers.push(DenseLayer {
                weights,
                bias: Array1::from(layer.bias),
                activation: layer.activation,
            });
        }
        Ok(Self {
            input_mean: raw.input_mean.map(Array1::from),
            input_scale: raw.input_scale.map(Array1::from),
            layers,
        })
    }
}

impl DenseNetwork {
    fn input_width(&self) -> usize {
        self.layers.first().map_or(0, |l| l.weights.ncols())
    }
}

impl SmbPredictor for DenseNetwork {
    fn predict(&self, features: &[f64]) -> f64 {
        if features.len() != self.input_width() {
            return f64::NAN;
        }
        let mut x = Array1::from(features.to_vec());
        if let Some(mean) = &self.input_mean {
            if mean.len() != x.len() {
                return f64::NAN;
            }
            x -= mean;
        }
        if let Some(scale) = &self.input_scale {
            if scale.len() != x.len() {
                return f64::NAN;
            }
            x.zip_mut_with(scale, |v, &s| {
                if s != 0.0 {
                    *v /= s
                }
            });
        }
        for layer in &self.layers {
            let mut z = layer.weights.dot(&x) + &layer.bias;
            z.mapv_inplace(|v| layer.activation.apply(v));
            x = z;
        }
        x.get(0).copied().unwrap_or(f64::NAN)
    }
}

pub fn load_linear(path: &Path) -> Result<LinearMember, BatchError> {
    let text = std::fs::read_to_string(path).map_err(|e| BatchError::io(path, e))?;
    let member: LinearMember = serde_json::from_str(&text).map_err(|e| BatchError::parse(path, e))?;
    member.check().map_err(|e| BatchError::parse(path, e))?;
    Ok(member)
}

pub fn load_network(path: &Path) -> Result<DenseNetwork, BatchError> {
    let text = std::fs::read_to_string(path).map_err(|e| BatchError::io(path, e))?;
    let raw: RawNetwork = serde_json::from_str(&text).map_err(|e| BatchError::parse(path, e))?;
    DenseNetwork::try_from(raw).map_err(|e| BatchError::parse(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_member_standardizes() {
        let m = LinearMember {
            mean: vec![1.0, 10.0],
            scale: vec![2.0, 0.0],
            coef: vec![0.5, -1.0],
            intercept: -0.3,
        };
        // (3-1)/2*0.5 + (12-10)/1*(-1) - 0.3
        assert_relative_eq!(m.predict(&[3.0, 12.0]), 0.5 - 2.0 - 0.3);
        assert!(m.predict(&[1.0]).is_nan());
    }

    #[test]
    fn test_network_forward_pass() {
        let raw: RawNetwork = serde_json::from_str(
            r#"{
                "layers": [
                    {"weights": [[1.0, -1.0], [0.5, 0.5]], "bias": [0.0, -1.0], "activation": "relu"},
                    {"weights": [[2.0, 1.0]], "bias": [0.25], "activation": "linear"}
                ]
            }"#,
        )
        .unwrap();
        let net = DenseNetwork::try_from(raw).unwrap();
        // hidden = relu([1-2, 1.5-1]) = [0, 0.5]; out = 0.5 + 0.25
        assert_relative_eq!(net.predict(&[1.0, 2.0]), 0.75);
        assert!(net.predict(&[1.0, 2.0, 3.0]).is_nan());
    }

    #[test]
    fn test_network_rejects_mismatched_layers() {
        let raw: RawNetwork = serde_json::from_str(
            r#"{"layers": [
                {"weights": [[1.0, 1.0]], "bias": [0.0], "activation": "tanh"},
                {"weights": [[1.0, 1.0]], "bias": [0.0], "activation": "sigmoid"}
            ]}"#,
        )
        .unwrap();
        assert!(DenseNetwork::try_from(raw).is_err());
    }

    #[test]
    fn test_input_standardization() {
        let raw: RawNetwork = serde_json::from_str(
            r#"{"input_mean": [2.0], "input_scale": [4.0],
                "layers": [{"weights": [[1.0]], "bias": [0.0], "activation": "linear"}]}"#,
        )
        .unwrap();
        let net = DenseNetwork::try_from(raw).unwrap();
        assert_relative_eq!(net.predict(&[10.0]), 2.0);
    }
}
