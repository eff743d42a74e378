// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Coefficient Predictors
// ─────────────────────────────────────────────────────────────────────
//! Regression from standardized source parameters to reduced
//! coefficients.
//!
//! Two families, selected by the `kind` tag of the artifact:
//!   - `mixture`: one mixture of experts per coefficient, sharing a
//!     feature recipe
//!   - `ensemble`: dense networks each owning a block of coefficients,
//!     plus optional residual networks whose output, scaled by fixed
//!     coefficients, is added on top
//!
//! Coefficients not owned by any sub-predictor are zero.

use std::fmt;

use ndarray::{s, Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};

use chirp_types::{ChirpError, ChirpResult, DiagnosticKind, Diagnostics};

use crate::features::FeatureSet;
use crate::moe::MixtureOfExperts;
use crate::nn::DenseNetwork;

/// Capability shared by all predictor families.
pub trait CoefficientPredictor: Send + Sync {
    /// Number K of predicted coefficients.
    fn n_components(&self) -> usize;

    /// N × P inputs → N × K coefficients.
    fn predict(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>>;

    /// N × P inputs → N × K × P gradient.
    fn predict_gradient(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<Array3<f64>>;
}

/// Regression family, used by mode generators for family-specific
/// amplitude scaling and phase offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegressionFamily {
    Mixture,
    Ensemble,
}

impl fmt::Display for RegressionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mixture => "mixture of experts",
            Self::Ensemble => "neural network ensemble",
        })
    }
}

// ── Component table ─────────────────────────────────────────────────

/// Validated assignment of coefficient indices to sub-predictors:
/// every index is in range and no index is owned twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentTable {
    n_components: usize,
    blocks: Vec<Vec<usize>>,
}

impl ComponentTable {
    pub fn new(n_components: usize, blocks: Vec<Vec<usize>>) -> ChirpResult<Self> {
        let mut owner: Vec<Option<usize>> = vec![None; n_components];
        for (b, block) in blocks.iter().enumerate() {
            if block.is_empty() {
                return Err(ChirpError::Load(format!("sub-predictor {b} owns no components")));
            }
            for &k in block {
                let slot = owner.get_mut(k).ok_or_else(|| {
                    ChirpError::Load(format!(
                        "sub-predictor {b} claims component {k}, model has {n_components}"
                    ))
                })?;
                if let Some(prev) = slot.replace(b) {
                    return Err(ChirpError::Load(format!(
                        "component {k} claimed by sub-predictors {prev} and {b}"
                    )));
                }
            }
        }
        Ok(Self {
            n_components,
            blocks,
        })
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn blocks(&self) -> &[Vec<usize>] {
        &self.blocks
    }

    /// Mask of the components some sub-predictor owns.
    pub fn covered(&self) -> Vec<bool> {
        let mut mask = vec![false; self.n_components];
        for &k in self.blocks.iter().flatten() {
            mask[k] = true;
        }
        mask
    }
}

/// Chain an N × F × P feature Jacobian with an N × O × F regressor
/// Jacobian, giving N × O × P.
fn chain_jacobians(regressor: &Array3<f64>, features: &Array3<f64>) -> Array3<f64> {
    let (n, o, _) = regressor.dim();
    let p = features.dim().2;
    let mut out = Array3::zeros((n, o, p));
    for i in 0..n {
        let prod = regressor
            .slice(s![i, .., ..])
            .dot(&features.slice(s![i, .., ..]));
        out.slice_mut(s![i, .., ..]).assign(&prod);
    }
    out
}

// ── Mixture family ──────────────────────────────────────────────────

/// One mixture of experts per coefficient: `experts[k]` predicts
/// coefficient `k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixturePredictor {
    pub n_components: usize,
    pub features: FeatureSet,
    pub experts: Vec<MixtureOfExperts>,
}

impl MixturePredictor {
    pub fn new(
        n_components: usize,
        features: FeatureSet,
        experts: Vec<MixtureOfExperts>,
    ) -> ChirpResult<Self> {
        let predictor = Self {
            n_components,
            features,
            experts,
        };
        predictor.validate()?;
        Ok(predictor)
    }

    pub fn table(&self) -> ChirpResult<ComponentTable> {
        ComponentTable::new(
            self.n_components,
            (0..self.experts.len()).map(|k| vec![k]).collect(),
        )
    }

    pub fn validate(&self) -> ChirpResult<()> {
        self.features.validate()?;
        self.table()?;
        let width = self.features.n_features();
        if let Some((k, e)) = self
            .experts
            .iter()
            .enumerate()
            .find(|(_, e)| e.n_features() != width)
        {
            return Err(ChirpError::Load(format!(
                "expert {k} takes {} features, recipe produces {width}",
                e.n_features()
            )));
        }
        Ok(())
    }
}

impl CoefficientPredictor for MixturePredictor {
    fn n_components(&self) -> usize {
        self.n_components
    }

    fn predict(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        let x = self.features.augment(theta)?;
        let mut out = Array2::zeros((theta.nrows(), self.n_components));
        for (k, expert) in self.experts.iter().enumerate() {
            out.column_mut(k).assign(&expert.predict(x.view())?);
        }
        Ok(out)
    }

    fn predict_gradient(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<Array3<f64>> {
        let x = self.features.augment(theta)?;
        let jac = self.features.jacobian(theta)?;
        let p = self.features.n_inputs;
        let mut out = Array3::zeros((theta.nrows(), self.n_components, p));
        for (k, expert) in self.experts.iter().enumerate() {
            let g = expert.gradient(x.view())?;
            for i in 0..theta.nrows() {
                let row = g.row(i).dot(&jac.slice(s![i, .., ..]));
                out.slice_mut(s![i, k, ..]).assign(&row);
            }
        }
        Ok(out)
    }
}

// ── Ensemble family ─────────────────────────────────────────────────

/// A network predicting the listed coefficients, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressorBlock {
    pub components: Vec<usize>,
    pub features: FeatureSet,
    pub network: DenseNetwork,
}

/// A network whose output, multiplied by `coefficients`, is added to
/// the listed coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualBlock {
    pub components: Vec<usize>,
    pub features: FeatureSet,
    pub network: DenseNetwork,
    /// One scale per component, or a single shared scale.
    #[serde(default)]
    pub coefficients: Option<Vec<f64>>,
}

impl ResidualBlock {
    fn scale(&self, o: usize) -> f64 {
        match self.coefficients.as_deref() {
            Some([shared]) => *shared,
            Some(c) => c.get(o).copied().unwrap_or(0.0),
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePredictor {
    pub n_components: usize,
    pub blocks: Vec<RegressorBlock>,
    #[serde(default)]
    pub residuals: Vec<ResidualBlock>,
}

impl EnsemblePredictor {
    /// Build and validate, dropping residual blocks that lack
    /// coefficients.
    pub fn new(
        n_components: usize,
        blocks: Vec<RegressorBlock>,
        residuals: Vec<ResidualBlock>,
        diag: &mut Diagnostics,
    ) -> ChirpResult<Self> {
        Self {
            n_components,
            blocks,
            residuals,
        }
        .prepare(diag)
    }

    pub fn table(&self) -> ChirpResult<ComponentTable> {
        ComponentTable::new(
            self.n_components,
            self.blocks.iter().map(|b| b.components.clone()).collect(),
        )
    }

    fn prepare(mut self, diag: &mut Diagnostics) -> ChirpResult<Self> {
        self.table()?;
        for (i, block) in self.blocks.iter().enumerate() {
            check_block(&format!("block {i}"), &block.components, &block.features, &block.network)?;
        }
        let residuals = std::mem::take(&mut self.residuals);
        for (i, residual) in residuals.into_iter().enumerate() {
            let Some(coefficients) = residual.coefficients.as_ref() else {
                diag.push(
                    DiagnosticKind::MissingResidualCoefficients,
                    format!(
                        "residual network {i} for components {:?} has no coefficients and was not loaded",
                        residual.components
                    ),
                );
                continue;
            };
            if coefficients.len() != 1 && coefficients.len() != residual.components.len() {
                return Err(ChirpError::Load(format!(
                    "residual {i} has {} coefficients for {} components",
                    coefficients.len(),
                    residual.components.len()
                )));
            }
            check_block(
                &format!("residual {i}"),
                &residual.components,
                &residual.features,
                &residual.network,
            )?;
            self.residuals.push(residual);
        }
        ComponentTable::new(
            self.n_components,
            self.residuals.iter().map(|r| r.components.clone()).collect(),
        )?;
        Ok(self)
    }
}

fn check_block(
    name: &str,
    components: &[usize],
    features: &FeatureSet,
    network: &DenseNetwork,
) -> ChirpResult<()> {
    features.validate()?;
    network.validate()?;
    if network.n_inputs() != features.n_features() {
        return Err(ChirpError::Load(format!(
            "{name}: network takes {} inputs, features produce {}",
            network.n_inputs(),
            features.n_features()
        )));
    }
    if network.n_outputs() != components.len() {
        return Err(ChirpError::Load(format!(
            "{name}: network has {} outputs for {} components",
            network.n_outputs(),
            components.len()
        )));
    }
    Ok(())
}

impl CoefficientPredictor for EnsemblePredictor {
    fn n_components(&self) -> usize {
        self.n_components
    }

    fn predict(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        let mut out = Array2::zeros((theta.nrows(), self.n_components));
        for block in &self.blocks {
            let y = block.network.forward(block.features.augment(theta)?.view())?;
            for (o, &k) in block.components.iter().enumerate() {
                out.column_mut(k).assign(&y.column(o));
            }
        }
        for residual in &self.residuals {
            let y = residual
                .network
                .forward(residual.features.augment(theta)?.view())?;
            for (o, &k) in residual.components.iter().enumerate() {
                let scale = residual.scale(o);
                out.column_mut(k).scaled_add(scale, &y.column(o));
            }
        }
        Ok(out)
    }

    fn predict_gradient(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<Array3<f64>> {
        let p = theta.ncols();
        let mut out = Array3::zeros((theta.nrows(), self.n_components, p));
        for block in &self.blocks {
            let x = block.features.augment(theta)?;
            let grad = chain_jacobians(
                &block.network.jacobian(x.view())?,
                &block.features.jacobian(theta)?,
            );
            for (o, &k) in block.components.iter().enumerate() {
                out.slice_mut(s![.., k, ..]).assign(&grad.slice(s![.., o, ..]));
            }
        }
        for residual in &self.residuals {
            let x = residual.features.augment(theta)?;
            let grad = chain_jacobians(
                &residual.network.jacobian(x.view())?,
                &residual.features.jacobian(theta)?,
            );
            for (o, &k) in residual.components.iter().enumerate() {
                out.slice_mut(s![.., k, ..])
                    .scaled_add(residual.scale(o), &grad.slice(s![.., o, ..]));
            }
        }
        Ok(out)
    }
}

// ── Tagged family ───────────────────────────────────────────────────

/// Predictor of either family, as stored on disk under the `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predictor {
    Mixture(MixturePredictor),
    Ensemble(EnsemblePredictor),
}

impl Predictor {
    /// Validate a freshly deserialized predictor. Residual networks
    /// without coefficients are dropped with a diagnostic.
    pub fn prepare(self, diag: &mut Diagnostics) -> ChirpResult<Self> {
        log::debug!("validating {} predictor", self.family());
        match self {
            Self::Mixture(m) => {
                m.validate()?;
                Ok(Self::Mixture(m))
            }
            Self::Ensemble(e) => Ok(Self::Ensemble(e.prepare(diag)?)),
        }
    }

    pub fn family(&self) -> RegressionFamily {
        match self {
            Self::Mixture(_) => RegressionFamily::Mixture,
            Self::Ensemble(_) => RegressionFamily::Ensemble,
        }
    }

    /// Short human-readable description for model summaries.
    pub fn describe(&self) -> String {
        match self {
            Self::Mixture(m) => {
                let experts: Vec<String> = m
                    .experts
                    .iter()
                    .map(|e| e.n_experts().to_string())
                    .collect();
                format!(
                    "{} regressors over {} features, experts per component [{}]",
                    m.experts.len(),
                    m.features.n_features(),
                    experts.join(", ")
                )
            }
            Self::Ensemble(e) => format!(
                "{} networks, {} residual networks, components covered {}/{}",
                e.blocks.len(),
                e.residuals.len(),
                e.blocks.iter().map(|b| b.components.len()).sum::<usize>(),
                e.n_components
            ),
        }
    }
}

impl CoefficientPredictor for Predictor {
    fn n_components(&self) -> usize {
        match self {
            Self::Mixture(m) => m.n_components(),
            Self::Ensemble(e) => e.n_components(),
        }
    }

    fn predict(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        match self {
            Self::Mixture(m) => m.predict(theta),
            Self::Ensemble(e) => e.predict(theta),
        }
    }

    fn predict_gradient(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<Array3<f64>> {
        match self {
            Self::Mixture(m) => m.predict_gradient(theta),
            Self::Ensemble(e) => e.predict_gradient(theta),
        }
    }
}
