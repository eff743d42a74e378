// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Wigner Small-d & Spin-Weighted Harmonics
// ─────────────────────────────────────────────────────────────────────
//! Closed-form Wigner small-d functions in terms of the half angle,
//! c = cos(β/2), s = sin(β/2):
//!
//!   d^l_{n,m}(β) = √((l+m)!(l−m)!(l+n)!(l−n)!)
//!                · Σ_k (−1)^{n−m+k} c^{2l+m−n−2k} s^{2k+n−m}
//!                  / (k! (l+m−k)! (l−n−k)! (n−m+k)!)
//!
//! with k ∈ [max(0, m−n), min(l+m, l−n)]. Batched evaluation shares the
//! powers of c and s across every (n, m) pair of the same l.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use num_complex::Complex64;

use chirp_types::{ChirpError, ChirpResult, Mode};

fn factorial(n: i64) -> f64 {
    (2..=n).fold(1.0, |acc, k| acc * k as f64)
}

/// Expanded sum for one `d^l_{n,m}`: `(cos exponent, sin exponent, weight)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WignerTerms {
    terms: Vec<(i32, i32, f64)>,
}

impl WignerTerms {
    pub fn new(l: u32, n: i32, m: i32) -> ChirpResult<Self> {
        let (l, n, m) = (l as i64, n as i64, m as i64);
        if n.abs() > l || m.abs() > l {
            return Err(ChirpError::Validation(format!(
                "Wigner d indices ({n}, {m}) out of range for l = {l}"
            )));
        }
        let norm = (factorial(l + m) * factorial(l - m) * factorial(l + n) * factorial(l - n)).sqrt();
        let k_min = 0.max(m - n);
        let k_max = (l + m).min(l - n);
        let terms = (k_min..=k_max)
            .map(|k| {
                let sign = if (n - m + k) % 2 == 0 { 1.0 } else { -1.0 };
                let denom = factorial(k)
                    * factorial(l + m - k)
                    * factorial(l - n - k)
                    * factorial(n - m + k);
                let cos_exp = (2 * l + m - n - 2 * k) as i32;
                let sin_exp = (2 * k + n - m) as i32;
                (cos_exp, sin_exp, sign * norm / denom)
            })
            .collect();
        Ok(Self { terms })
    }

    /// Evaluate at a single half angle.
    pub fn eval(&self, cos_half: f64, sin_half: f64) -> f64 {
        self.terms
            .iter()
            .map(|&(ce, se, w)| w * cos_half.powi(ce) * sin_half.powi(se))
            .sum()
    }

    fn exponents(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.terms.iter().map(|&(ce, se, _)| (ce, se))
    }
}

/// Powers of cos(β/2) and sin(β/2) over a batch of angles, computed
/// once per distinct exponent.
#[derive(Debug, Clone)]
pub struct HalfAnglePowers {
    len: usize,
    cos: BTreeMap<i32, Vec<f64>>,
    sin: BTreeMap<i32, Vec<f64>>,
}

impl HalfAnglePowers {
    pub fn new<'a>(
        cos_half: &[f64],
        sin_half: &[f64],
        terms: impl IntoIterator<Item = &'a WignerTerms>,
    ) -> Self {
        debug_assert_eq!(cos_half.len(), sin_half.len());
        let mut cos = BTreeMap::new();
        let mut sin = BTreeMap::new();
        for t in terms {
            for (ce, se) in t.exponents() {
                cos.entry(ce)
                    .or_insert_with(|| cos_half.iter().map(|c| c.powi(ce)).collect());
                sin.entry(se)
                    .or_insert_with(|| sin_half.iter().map(|s| s.powi(se)).collect());
            }
        }
        Self {
            len: cos_half.len(),
            cos,
            sin,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `d^l_{n,m}` at every angle of the batch. `terms` must have been
    /// registered at construction.
    pub fn evaluate(&self, terms: &WignerTerms) -> Vec<f64> {
        let mut out = vec![0.0; self.len];
        for &(ce, se, w) in &terms.terms {
            let (Some(cp), Some(sp)) = (self.cos.get(&ce), self.sin.get(&se)) else {
                continue;
            };
            for ((o, c), s) in out.iter_mut().zip(cp).zip(sp) {
                *o += w * c * s;
            }
        }
        out
    }
}

/// `d^l_{n,m}(β)` for a single angle.
pub fn wigner_d(l: u32, n: i32, m: i32, beta: f64) -> ChirpResult<f64> {
    let half = 0.5 * beta;
    Ok(WignerTerms::new(l, n, m)?.eval(half.cos(), half.sin()))
}

/// Spin −2 weighted spherical harmonic
/// `Y_lm(ι, φ0) = √((2l+1)/4π) (−1)^|m| d^l_{−m,−2}(ι) e^{i m φ0}`.
pub fn spherical_harmonic(mode: Mode, iota: f64, phi0: f64) -> ChirpResult<Complex64> {
    let l = mode.l;
    let m = mode.m;
    let d = wigner_d(l, -m, -2, iota)?;
    let sign = if m.abs() % 2 == 0 { 1.0 } else { -1.0 };
    let norm = ((2 * l + 1) as f64 / (4.0 * PI)).sqrt();
    Ok(Complex64::from_polar(norm * sign * d, m as f64 * phi0))
}

/// Real weights of one positive-m mode in the polarizations, including
/// its negative-m partner `h_{l,−m} = (−1)^l h*_{lm}`:
///
///   h+ += A cos(φ + mφ0) · plus,   h× += A sin(φ + mφ0) · cross
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarizationWeights {
    pub plus: f64,
    pub cross: f64,
}

impl PolarizationWeights {
    pub fn new(mode: Mode, iota: f64) -> ChirpResult<Self> {
        let l = mode.l;
        let m = mode.m;
        let half = 0.5 * iota;
        let (c, s) = (half.cos(), half.sin());
        let d_lm = WignerTerms::new(l, -m, -2)?.eval(c, s);
        let d_lmm = WignerTerms::new(l, m, -2)?.eval(c, s);
        let sign_m = if m.abs() % 2 == 0 { 1.0 } else { -1.0 };
        let parity = if l % 2 == 0 { 1.0 } else { -1.0 };
        let norm = ((2 * l + 1) as f64 / (4.0 * PI)).sqrt() * sign_m;
        Ok(Self {
            plus: norm * (d_lm + parity * d_lmm),
            cross: norm * (d_lm - parity * d_lmm),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_known_closed_forms() {
        let beta: f64 = 0.7;
        let (c, s) = ((beta / 2.0).cos(), (beta / 2.0).sin());
        assert_relative_eq!(wigner_d(2, -2, -2, beta).unwrap(), c.powi(4), epsilon = 1e-14);
        assert_relative_eq!(wigner_d(2, 2, -2, beta).unwrap(), s.powi(4), epsilon = 1e-14);
        assert_relative_eq!(wigner_d(1, 0, 0, beta).unwrap(), beta.cos(), epsilon = 1e-14);
        assert_relative_eq!(
            wigner_d(2, 0, 0, beta).unwrap(),
            0.5 * (3.0 * beta.cos().powi(2) - 1.0),
            epsilon = 1e-14
        );
    }

    #[test]
    fn test_identity_at_zero() {
        for l in 2..=5u32 {
            let li = l as i32;
            for n in -li..=li {
                for m in -li..=li {
                    let expected = if n == m { 1.0 } else { 0.0 };
                    assert_relative_eq!(wigner_d(l, n, m, 0.0).unwrap(), expected, epsilon = 1e-14);
                }
            }
        }
    }

    #[test]
    fn test_rows_are_normalized() {
        // d^l is a real orthogonal matrix
        let beta = 1.3;
        for l in [2u32, 3, 4] {
            let li = l as i32;
            for n in -li..=li {
                let norm: f64 = (-li..=li)
                    .map(|m| wigner_d(l, n, m, beta).unwrap().powi(2))
                    .sum();
                assert_relative_eq!(norm, 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_batched_matches_scalar() {
        let betas = [0.0, 0.4, 1.1, 2.9, std::f64::consts::PI];
        let cos_half: Vec<f64> = betas.iter().map(|b| (0.5 * b).cos()).collect();
        let sin_half: Vec<f64> = betas.iter().map(|b| (0.5 * b).sin()).collect();
        let terms: Vec<WignerTerms> = [(2, 1), (-1, 2), (0, 0)]
            .iter()
            .map(|&(n, m)| WignerTerms::new(3, n, m).unwrap())
            .collect();
        let powers = HalfAnglePowers::new(&cos_half, &sin_half, &terms);
        for (t, &(n, m)) in terms.iter().zip(&[(2, 1), (-1, 2), (0, 0)]) {
            let batch = powers.evaluate(t);
            for (b, &beta) in batch.iter().zip(&betas) {
                assert_relative_eq!(*b, wigner_d(3, n, m, beta).unwrap(), epsilon = 1e-13);
            }
        }
    }

    #[test]
    fn test_out_of_range_indices() {
        assert!(WignerTerms::new(2, 3, 0).is_err());
        assert!(WignerTerms::new(2, 0, -3).is_err());
    }

    #[test]
    fn test_22_weights_match_closed_form() {
        let iota: f64 = 0.9;
        let w = PolarizationWeights::new(Mode::L2M2, iota).unwrap();
        let norm = (5.0 / (4.0 * PI)).sqrt();
        assert_relative_eq!(w.plus, norm * 0.5 * (1.0 + iota.cos().powi(2)), epsilon = 1e-14);
        assert_relative_eq!(w.cross, norm * iota.cos(), epsilon = 1e-14);
    }

    #[test]
    fn test_harmonic_face_on() {
        // only m = 2 survives at ι = 0 for l = 2
        let y22 = spherical_harmonic(Mode::L2M2, 0.0, 0.0).unwrap();
        assert_relative_eq!(y22.re, (5.0 / (4.0 * PI)).sqrt(), epsilon = 1e-14);
        let y2m2 = spherical_harmonic(Mode { l: 2, m: -2 }, 0.0, 0.0).unwrap();
        assert_relative_eq!(y2m2.norm(), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_harmonic_phase_dependence() {
        let mode = Mode { l: 3, m: 2 };
        let a = spherical_harmonic(mode, 0.8, 0.0).unwrap();
        let b = spherical_harmonic(mode, 0.8, 0.25).unwrap();
        assert_relative_eq!(a.norm(), b.norm(), epsilon = 1e-14);
        assert_relative_eq!((b / a).arg(), 0.5, epsilon = 1e-12);
    }
}
