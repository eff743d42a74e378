// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Dense Feed-Forward Network
// ─────────────────────────────────────────────────────────────────────
//! Inference-only multilayer perceptron with an analytic input Jacobian.
//!
//! Each layer computes `a' = σ(a · W + b)` with W of shape in × out.
//! An optional input scaler standardizes features before the first
//! layer; its scale enters the Jacobian as a diagonal factor.

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use chirp_types::{ChirpError, ChirpResult};

use crate::artifact::{matrix_from_rows, matrix_to_rows};
use crate::scaler::StandardScaler;

/// Stable softplus: log(1 + exp(x)) with overflow protection.
#[inline]
pub fn softplus(x: f64) -> f64 {
    if x > 20.0 {
        x
    } else if x < -20.0 {
        0.0
    } else {
        (1.0 + x.exp()).ln()
    }
}

/// Derivative of softplus: sigmoid(x) = 1/(1+exp(-x)).
#[inline]
pub fn softplus_deriv(x: f64) -> f64 {
    if x > 20.0 {
        1.0
    } else if x < -20.0 {
        0.0
    } else {
        1.0 / (1.0 + (-x).exp())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Tanh,
    Sigmoid,
    Softplus,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Linear => x,
            Self::Relu => x.max(0.0),
            Self::Tanh => x.tanh(),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Softplus => softplus(x),
        }
    }

    /// Derivative with respect to the pre-activation.
    #[inline]
    pub fn derivative(self, x: f64) -> f64 {
        match self {
            Self::Linear => 1.0,
            Self::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Self::Sigmoid => {
                let s = 1.0 / (1.0 + (-x).exp());
                s * (1.0 - s)
            }
            Self::Softplus => softplus_deriv(x),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DenseLayerArtifact", into = "DenseLayerArtifact")]
pub struct DenseLayer {
    weights: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

/// On-disk layout of a layer; `weights` has one row per input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayerArtifact {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub activation: Activation,
}

impl TryFrom<DenseLayerArtifact> for DenseLayer {
    type Error = ChirpError;

    fn try_from(a: DenseLayerArtifact) -> ChirpResult<Self> {
        let weights = matrix_from_rows(a.weights, "layer weights")?;
        Self::new(weights, Array1::from(a.bias), a.activation)
    }
}

impl From<DenseLayer> for DenseLayerArtifact {
    fn from(layer: DenseLayer) -> Self {
        Self {
            weights: matrix_to_rows(&layer.weights),
            bias: layer.bias.to_vec(),
            activation: layer.activation,
        }
    }
}

impl DenseLayer {
    pub fn new(weights: Array2<f64>, bias: Array1<f64>, activation: Activation) -> ChirpResult<Self> {
        if bias.len() != weights.ncols() {
            return Err(ChirpError::Load(format!(
                "layer bias has {} entries, weights have {} outputs",
                bias.len(),
                weights.ncols()
            )));
        }
        Ok(Self {
            weights,
            bias,
            activation,
        })
    }

    pub fn n_inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn n_outputs(&self) -> usize {
        self.weights.ncols()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    fn pre_activation(&self, a: ArrayView2<'_, f64>) -> Array2<f64> {
        a.dot(&self.weights) + &self.bias.view().insert_axis(Axis(0))
    }
}

/// Stack of dense layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseNetwork {
    #[serde(default)]
    pub input_scaler: Option<StandardScaler>,
    pub layers: Vec<DenseLayer>,
}

impl DenseNetwork {
    pub fn new(input_scaler: Option<StandardScaler>, layers: Vec<DenseLayer>) -> ChirpResult<Self> {
        let net = Self {
            input_scaler,
            layers,
        };
        net.validate()?;
        Ok(net)
    }

    /// Check that consecutive layer widths agree.
    pub fn validate(&self) -> ChirpResult<()> {
        let first = self
            .layers
            .first()
            .ok_or_else(|| ChirpError::Load("network has no layers".into()))?;
        if let Some(scaler) = &self.input_scaler {
            scaler.validate()?;
            if scaler.width() != first.n_inputs() {
                return Err(ChirpError::Load(format!(
                    "input scaler width {} does not match network input {}",
                    scaler.width(),
                    first.n_inputs()
                )));
            }
        }
        for (i, pair) in self.layers.windows(2).enumerate() {
            if pair[0].n_outputs() != pair[1].n_inputs() {
                return Err(ChirpError::Load(format!(
                    "layer {i} outputs {} values but layer {} takes {}",
                    pair[0].n_outputs(),
                    i + 1,
                    pair[1].n_inputs()
                )));
            }
        }
        Ok(())
    }

    pub fn n_inputs(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::n_inputs)
    }

    pub fn n_outputs(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::n_outputs)
    }

    /// Evaluate on N × n_inputs features, giving N × n_outputs.
    pub fn forward(&self, x: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        let mut a = self.scaled_input(x)?;
        for layer in &self.layers {
            let act = layer.activation;
            a = layer.pre_activation(a.view()).mapv_into(|z| act.apply(z));
        }
        Ok(a)
    }

    /// Input Jacobian, N × n_outputs × n_inputs.
    pub fn jacobian(&self, x: ArrayView2<'_, f64>) -> ChirpResult<Array3<f64>> {
        let scaled = self.scaled_input(x)?;
        let n_in = self.n_inputs();
        let mut out = Array3::zeros((x.nrows(), self.n_outputs(), n_in));

        let mut seed = Array2::<f64>::eye(n_in);
        if let Some(scaler) = &self.input_scaler {
            for (i, s) in scaler.scale.iter().enumerate() {
                seed[[i, i]] = 1.0 / s;
            }
        }

        for (row, mut jac_out) in scaled.outer_iter().zip(out.outer_iter_mut()) {
            let mut a = row.insert_axis(Axis(0)).to_owned();
            let mut jac = seed.clone();
            for layer in &self.layers {
                let z = layer.pre_activation(a.view());
                jac = layer.weights.t().dot(&jac);
                for (mut jac_row, &zo) in jac.outer_iter_mut().zip(z.row(0)) {
                    let d = layer.activation.derivative(zo);
                    jac_row.mapv_inplace(|v| v * d);
                }
                let act = layer.activation;
                a = z.mapv_into(|v| act.apply(v));
            }
            jac_out.assign(&jac);
        }
        Ok(out)
    }

    fn scaled_input(&self, x: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        if x.ncols() != self.n_inputs() {
            return Err(ChirpError::Dimension(format!(
                "network expects {} inputs, got {}",
                self.n_inputs(),
                x.ncols()
            )));
        }
        match &self.input_scaler {
            Some(scaler) => scaler.transform(x),
            None => Ok(x.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn toy_network(activation: Activation) -> DenseNetwork {
        let hidden = DenseLayer::new(
            array![[0.5, -0.3, 0.8], [0.1, 0.9, -0.4]],
            array![0.05, -0.1, 0.2],
            activation,
        )
        .unwrap();
        let output = DenseLayer::new(
            array![[1.0, -0.5], [0.3, 0.7], [-0.6, 0.2]],
            array![0.0, 0.1],
            Activation::Linear,
        )
        .unwrap();
        let scaler = StandardScaler::new(vec![0.2, -0.1], vec![1.5, 0.8]).unwrap();
        DenseNetwork::new(Some(scaler), vec![hidden, output]).unwrap()
    }

    #[test]
    fn test_softplus_limits() {
        assert_eq!(softplus(50.0), 50.0);
        assert_eq!(softplus(-50.0), 0.0);
        assert_relative_eq!(softplus(0.0), 2f64.ln(), epsilon = 1e-15);
        assert_relative_eq!(softplus_deriv(0.0), 0.5, epsilon = 1e-15);
    }

    #[test]
    fn test_linear_network_is_affine() {
        let layer = DenseLayer::new(array![[2.0], [3.0]], array![1.0], Activation::Linear).unwrap();
        let net = DenseNetwork::new(None, vec![layer]).unwrap();
        let y = net.forward(array![[1.0, 1.0], [0.0, -1.0]].view()).unwrap();
        assert_eq!(y, array![[6.0], [-2.0]]);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        for activation in [
            Activation::Tanh,
            Activation::Sigmoid,
            Activation::Softplus,
            Activation::Relu,
        ] {
            let net = toy_network(activation);
            let x = array![[0.7, -0.2], [-1.1, 0.4]];
            let jac = net.jacobian(x.view()).unwrap();
            let h = 1e-6;
            for j in 0..2 {
                let mut plus = x.clone();
                let mut minus = x.clone();
                plus.column_mut(j).mapv_inplace(|v| v + h);
                minus.column_mut(j).mapv_inplace(|v| v - h);
                let fd = (net.forward(plus.view()).unwrap() - net.forward(minus.view()).unwrap())
                    / (2.0 * h);
                for n in 0..2 {
                    for o in 0..2 {
                        assert_relative_eq!(jac[[n, o, j]], fd[[n, o]], epsilon = 1e-6);
                    }
                }
            }
        }
    }

    #[test]
    fn test_layer_chain_validated() {
        let a = DenseLayer::new(Array2::zeros((2, 3)), Array1::zeros(3), Activation::Relu).unwrap();
        let b = DenseLayer::new(Array2::zeros((4, 1)), Array1::zeros(1), Activation::Linear).unwrap();
        assert!(DenseNetwork::new(None, vec![a, b]).is_err());
        assert!(DenseNetwork::new(None, vec![]).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let net = toy_network(Activation::Tanh);
        let json = serde_json::to_string(&net).unwrap();
        assert!(json.contains("\"tanh\""));
        let back: DenseNetwork = serde_json::from_str(&json).unwrap();
        assert_eq!(back, net);
    }
}
