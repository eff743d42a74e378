// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Linear Reduced-Order Model
// ─────────────────────────────────────────────────────────────────────
//! PCA compression of fixed-length series.
//!
//!   reduce(x)      = (x − μ) · V
//!   reconstruct(g) = g · Vᵀ + μ
//!
//! with μ of length D and V of shape D × K (orthonormal columns).
//! All operations are batched over rows and allocate fresh outputs.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use chirp_types::{ChirpError, ChirpResult};

use crate::artifact::{matrix_from_rows, matrix_to_rows};

/// Mean and principal basis of one quantity (amplitude or phase).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RomArtifact", into = "RomArtifact")]
pub struct ReducedOrderModel {
    mean: Array1<f64>,
    basis: Array2<f64>,
}

/// On-disk layout: `basis` is stored row-major, one row per grid point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RomArtifact {
    pub mean: Vec<f64>,
    pub basis: Vec<Vec<f64>>,
}

impl TryFrom<RomArtifact> for ReducedOrderModel {
    type Error = ChirpError;

    fn try_from(a: RomArtifact) -> ChirpResult<Self> {
        let basis = matrix_from_rows(a.basis, "PCA basis")?;
        Self::new(Array1::from(a.mean), basis)
    }
}

impl From<ReducedOrderModel> for RomArtifact {
    fn from(rom: ReducedOrderModel) -> Self {
        Self {
            mean: rom.mean.to_vec(),
            basis: matrix_to_rows(&rom.basis),
        }
    }
}

impl ReducedOrderModel {
    pub fn new(mean: Array1<f64>, basis: Array2<f64>) -> ChirpResult<Self> {
        let (d, k) = basis.dim();
        if d == 0 || k == 0 {
            return Err(ChirpError::Load("PCA basis must be non-empty".into()));
        }
        if mean.len() != d {
            return Err(ChirpError::Load(format!(
                "PCA mean has {} entries but basis has {d} rows",
                mean.len()
            )));
        }
        if mean.iter().chain(basis.iter()).any(|v| !v.is_finite()) {
            return Err(ChirpError::Load("PCA model contains non-finite values".into()));
        }
        Ok(Self { mean, basis })
    }

    /// Length D of the reconstructed series.
    pub fn grid_len(&self) -> usize {
        self.basis.nrows()
    }

    /// Number K of retained components.
    pub fn n_components(&self) -> usize {
        self.basis.ncols()
    }

    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    pub fn basis(&self) -> ArrayView2<'_, f64> {
        self.basis.view()
    }

    /// Project N × D data onto the basis, giving N × K coefficients.
    pub fn reduce(&self, x: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        if x.ncols() != self.grid_len() {
            return Err(ChirpError::Dimension(format!(
                "reduce: data has {} columns, model expects {}",
                x.ncols(),
                self.grid_len()
            )));
        }
        let centered = &x - &self.mean.view().insert_axis(Axis(0));
        Ok(centered.dot(&self.basis))
    }

    /// Map N × K coefficients back to N × D series.
    pub fn reconstruct(&self, g: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        let mut out = self.reconstruct_tangent(g)?;
        out += &self.mean.view().insert_axis(Axis(0));
        Ok(out)
    }

    /// Linear part of [`reconstruct`](Self::reconstruct): maps coefficient
    /// perturbations to series perturbations, without the mean.
    pub fn reconstruct_tangent(&self, dg: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        self.check_components(dg.ncols())?;
        Ok(dg.dot(&self.basis.t()))
    }

    /// Propagate N × K × P coefficient gradients to N × D × P series
    /// gradients.
    pub fn reconstruct_gradient(&self, dg: ArrayView3<'_, f64>) -> ChirpResult<Array3<f64>> {
        let (n, k, p) = dg.dim();
        self.check_components(k)?;
        let mut out = Array3::zeros((n, self.grid_len(), p));
        for j in 0..p {
            let slab = dg.slice(s![.., .., j]).dot(&self.basis.t());
            out.slice_mut(s![.., .., j]).assign(&slab);
        }
        Ok(out)
    }

    fn check_components(&self, k: usize) -> ChirpResult<()> {
        if k != self.n_components() {
            return Err(ChirpError::Dimension(format!(
                "coefficients have {k} components, model has {}",
                self.n_components()
            )));
        }
        Ok(())
    }
}
