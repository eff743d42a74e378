// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Standard Scaler
// ─────────────────────────────────────────────────────────────────────

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use chirp_types::{ChirpError, ChirpResult};

/// Per-column affine standardization `(x − mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> ChirpResult<Self> {
        let scaler = Self { mean, scale };
        scaler.validate()?;
        Ok(scaler)
    }

    pub fn validate(&self) -> ChirpResult<()> {
        if self.mean.len() != self.scale.len() || self.mean.is_empty() {
            return Err(ChirpError::Load(format!(
                "scaler mean ({}) and scale ({}) must be non-empty and equal length",
                self.mean.len(),
                self.scale.len()
            )));
        }
        if self.scale.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(ChirpError::Load("scaler scale must be finite and non-zero".into()));
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        self.check(x.ncols())?;
        let mut out = x.to_owned();
        for (mut col, (m, s)) in out
            .axis_iter_mut(Axis(1))
            .zip(self.mean.iter().zip(&self.scale))
        {
            col.mapv_inplace(|v| (v - m) / s);
        }
        Ok(out)
    }

    pub fn inverse_transform(&self, z: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        self.check(z.ncols())?;
        let mut out = z.to_owned();
        for (mut col, (m, s)) in out
            .axis_iter_mut(Axis(1))
            .zip(self.mean.iter().zip(&self.scale))
        {
            col.mapv_inplace(|v| v * s + m);
        }
        Ok(out)
    }

    fn check(&self, width: usize) -> ChirpResult<()> {
        if width != self.width() {
            return Err(ChirpError::Dimension(format!(
                "scaler expects {} columns, got {width}",
                self.width()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_transform_inverse() {
        let scaler = StandardScaler::new(vec![1.0, -2.0], vec![2.0, 0.5]).unwrap();
        let x = array![[3.0, -1.0], [1.0, -2.0]];
        let z = scaler.transform(x.view()).unwrap();
        assert_abs_diff_eq!(z, array![[1.0, 2.0], [0.0, 0.0]], epsilon = 1e-15);
        let back = scaler.inverse_transform(z.view()).unwrap();
        assert_abs_diff_eq!(back, x, epsilon = 1e-15);
    }

    #[test]
    fn test_zero_scale_rejected() {
        assert!(StandardScaler::new(vec![0.0], vec![0.0]).is_err());
        assert!(StandardScaler::new(vec![0.0, 1.0], vec![1.0]).is_err());
    }

    #[test]
    fn test_width_checked() {
        let scaler = StandardScaler::new(vec![0.0], vec![1.0]).unwrap();
        assert!(scaler.transform(array![[1.0, 2.0]].view()).is_err());
    }
}
