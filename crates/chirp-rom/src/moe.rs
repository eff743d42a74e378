// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Mixture of Experts
// ─────────────────────────────────────────────────────────────────────
//! Softmax-gated mixture of linear experts for one scalar target.
//!
//!   x̃ = [x, 1]
//!   π = softmax(x̃ · V)        (gating, (F+1) × E)
//!   y = Σ_k π_k · (x̃ · W)_k   (experts, (F+1) × E)
//!
//! The bias is the trailing row of both weight matrices.
//!
//! Input gradient:
//!   ∂y/∂x_j = Σ_k π_k W_jk + Σ_k e_k π_k (V_jk − Σ_i π_i V_ji)

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use chirp_types::{ChirpError, ChirpResult};

use crate::artifact::{matrix_from_rows, matrix_to_rows};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MixtureArtifact", into = "MixtureArtifact")]
pub struct MixtureOfExperts {
    gating: Array2<f64>,
    experts: Array2<f64>,
}

/// On-disk layout: one row per feature plus the trailing bias row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureArtifact {
    pub gating: Vec<Vec<f64>>,
    pub experts: Vec<Vec<f64>>,
}

impl TryFrom<MixtureArtifact> for MixtureOfExperts {
    type Error = ChirpError;

    fn try_from(a: MixtureArtifact) -> ChirpResult<Self> {
        Self::new(
            matrix_from_rows(a.gating, "gating weights")?,
            matrix_from_rows(a.experts, "expert weights")?,
        )
    }
}

impl From<MixtureOfExperts> for MixtureArtifact {
    fn from(moe: MixtureOfExperts) -> Self {
        Self {
            gating: matrix_to_rows(&moe.gating),
            experts: matrix_to_rows(&moe.experts),
        }
    }
}

impl MixtureOfExperts {
    pub fn new(gating: Array2<f64>, experts: Array2<f64>) -> ChirpResult<Self> {
        if gating.dim() != experts.dim() {
            return Err(ChirpError::Load(format!(
                "gating {:?} and expert {:?} weights disagree in shape",
                gating.dim(),
                experts.dim()
            )));
        }
        if gating.nrows() < 2 {
            return Err(ChirpError::Load(
                "mixture needs at least one feature row plus the bias row".into(),
            ));
        }
        Ok(Self { gating, experts })
    }

    /// Number of input features F (bias excluded).
    pub fn n_features(&self) -> usize {
        self.gating.nrows() - 1
    }

    pub fn n_experts(&self) -> usize {
        self.gating.ncols()
    }

    /// N × F features → N predictions.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> ChirpResult<Array1<f64>> {
        let (pi, expert_out) = self.forward(x)?;
        Ok((&pi * &expert_out).sum_axis(Axis(1)))
    }

    /// N × F features → N × F input gradient.
    pub fn gradient(&self, x: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        let (pi, expert_out) = self.forward(x)?;
        let f = self.n_features();
        let v = self.gating.slice(s![..f, ..]);
        let w = self.experts.slice(s![..f, ..]);

        let mut grad = Array2::zeros((x.nrows(), f));
        for ((mut g, pi_n), e_n) in grad
            .outer_iter_mut()
            .zip(pi.outer_iter())
            .zip(expert_out.outer_iter())
        {
            // Σ_i π_i V_ji
            let v_mean = v.dot(&pi_n);
            let pe: Array1<f64> = &pi_n * &e_n;
            for j in 0..f {
                let mut acc = 0.0;
                for k in 0..self.n_experts() {
                    acc += pi_n[k] * w[[j, k]] + pe[k] * (v[[j, k]] - v_mean[j]);
                }
                g[j] = acc;
            }
        }
        Ok(grad)
    }

    /// Gating probabilities and expert outputs, both N × E.
    fn forward(&self, x: ArrayView2<'_, f64>) -> ChirpResult<(Array2<f64>, Array2<f64>)> {
        let f = self.n_features();
        if x.ncols() != f {
            return Err(ChirpError::Dimension(format!(
                "mixture expects {f} features, got {}",
                x.ncols()
            )));
        }
        let mut logits = x.dot(&self.gating.slice(s![..f, ..]));
        logits += &self.gating.row(f);
        for mut row in logits.outer_iter_mut() {
            softmax_inplace(&mut row);
        }
        let mut expert_out = x.dot(&self.experts.slice(s![..f, ..]));
        expert_out += &self.experts.row(f);
        Ok((logits, expert_out))
    }
}

fn softmax_inplace(row: &mut ndarray::ArrayViewMut1<'_, f64>) {
    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    row.mapv_inplace(|v| (v - max).exp());
    let total = row.sum();
    row.mapv_inplace(|v| v / total);
}

/// Softmax of a single logit vector.
pub fn softmax(logits: ArrayView1<'_, f64>) -> Array1<f64> {
    let mut out = logits.to_owned();
    softmax_inplace(&mut out.view_mut());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn toy_moe() -> MixtureOfExperts {
        MixtureOfExperts::new(
            array![[0.8, -0.4, 0.1], [0.2, 0.5, -0.9], [0.0, 0.3, -0.2]],
            array![[1.0, -2.0, 0.5], [0.3, 0.1, -0.7], [0.2, -0.1, 0.4]],
        )
        .unwrap()
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(array![1000.0, 1001.0, 999.0].view());
        assert_relative_eq!(p.sum(), 1.0, epsilon = 1e-15);
        assert!(p.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_single_expert_is_linear() {
        let moe = MixtureOfExperts::new(array![[0.7], [0.1]], array![[2.0], [-1.0]]).unwrap();
        let y = moe.predict(array![[3.0], [0.0]].view()).unwrap();
        assert_relative_eq!(y[0], 5.0, epsilon = 1e-14);
        assert_relative_eq!(y[1], -1.0, epsilon = 1e-14);
        let g = moe.gradient(array![[3.0]].view()).unwrap();
        assert_relative_eq!(g[[0, 0]], 2.0, epsilon = 1e-14);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let moe = toy_moe();
        let x = array![[0.4, -1.3], [2.0, 0.6]];
        let g = moe.gradient(x.view()).unwrap();
        let h = 1e-6;
        for j in 0..2 {
            let mut plus = x.clone();
            let mut minus = x.clone();
            plus.column_mut(j).mapv_inplace(|v| v + h);
            minus.column_mut(j).mapv_inplace(|v| v - h);
            let fd = (moe.predict(plus.view()).unwrap() - moe.predict(minus.view()).unwrap())
                / (2.0 * h);
            for n in 0..2 {
                assert_relative_eq!(g[[n, j]], fd[n], epsilon = 1e-7);
            }
        }
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(MixtureOfExperts::new(Array2::zeros((3, 2)), Array2::zeros((3, 3))).is_err());
        assert!(toy_moe().predict(array![[1.0]].view()).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let moe = toy_moe();
        let json = serde_json::to_string(&moe).unwrap();
        let back: MixtureOfExperts = serde_json::from_str(&json).unwrap();
        assert_eq!(back, moe);
    }
}
