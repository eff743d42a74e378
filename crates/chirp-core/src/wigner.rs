// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Wigner-D Recoupling
// ─────────────────────────────────────────────────────────────────────
//! Rotation of a set of modes sharing `l` by time-dependent Euler
//! angles:
//!
//!   D^l_{m,m'}(α, β, γ) = d^l_{m,m'}(β) e^{−i m α} e^{−i m' γ}
//!   h^P_m(t) = Σ_{m'} D^l_{m,m'}(t) h^{NP}_{m'}(t)

use ndarray::{Array2, Array3, ArrayView2, Axis};
use num_complex::Complex64;

use chirp_types::{ChirpError, ChirpResult};

use crate::harmonics::{HalfAnglePowers, WignerTerms};

/// Euler angles sampled on a common time axis.
#[derive(Debug, Clone, Copy)]
pub struct AngleSamples<'a> {
    pub alpha: &'a [f64],
    pub beta: &'a [f64],
    pub gamma: &'a [f64],
}

impl AngleSamples<'_> {
    fn len(&self) -> usize {
        self.alpha.len()
    }

    fn check(&self) -> ChirpResult<()> {
        if self.beta.len() != self.len() || self.gamma.len() != self.len() {
            return Err(ChirpError::Dimension(format!(
                "Euler angle tracks have lengths {}, {}, {}",
                self.alpha.len(),
                self.beta.len(),
                self.gamma.len()
            )));
        }
        Ok(())
    }
}

/// `D^l_{m_out[i], m_in[j]}` at every sample, shape T × M × M'.
pub fn wigner_d_matrix(
    l: u32,
    m_out: &[i32],
    m_in: &[i32],
    angles: AngleSamples<'_>,
) -> ChirpResult<Array3<Complex64>> {
    angles.check()?;
    let terms = m_out
        .iter()
        .map(|&mo| {
            m_in.iter()
                .map(|&mi| WignerTerms::new(l, mo, mi))
                .collect::<ChirpResult<Vec<_>>>()
        })
        .collect::<ChirpResult<Vec<_>>>()?;

    let cos_half: Vec<f64> = angles.beta.iter().map(|b| (0.5 * b).cos()).collect();
    let sin_half: Vec<f64> = angles.beta.iter().map(|b| (0.5 * b).sin()).collect();
    let powers = HalfAnglePowers::new(&cos_half, &sin_half, terms.iter().flatten());

    let t_len = angles.len();
    let mut out = Array3::zeros((t_len, m_out.len(), m_in.len()));
    for (i, (&mo, row_terms)) in m_out.iter().zip(&terms).enumerate() {
        for (j, (&mi, t)) in m_in.iter().zip(row_terms).enumerate() {
            let d = powers.evaluate(t);
            for (ti, dv) in d.into_iter().enumerate() {
                let phase = -(mo as f64) * angles.alpha[ti] - (mi as f64) * angles.gamma[ti];
                out[[ti, i, j]] = Complex64::from_polar(dv, phase);
            }
        }
    }
    Ok(out)
}

/// Append the negative-m partners `h_{l,−m} = (−1)^l h*_{lm}` of every
/// positive m. Input is T × M; returns the extended m list and T × M''.
pub fn with_negative_modes(
    l: u32,
    m_list: &[i32],
    modes: ArrayView2<'_, Complex64>,
) -> (Vec<i32>, Array2<Complex64>) {
    let parity = if l % 2 == 0 { 1.0 } else { -1.0 };
    let positive: Vec<usize> = (0..m_list.len()).filter(|&j| m_list[j] > 0).collect();
    let mut extended_m = m_list.to_vec();
    extended_m.extend(positive.iter().map(|&j| -m_list[j]));

    let mut out = Array2::zeros((modes.nrows(), extended_m.len()));
    for (mut out_row, row) in out.outer_iter_mut().zip(modes.outer_iter()) {
        for (j, v) in row.iter().enumerate() {
            out_row[j] = *v;
        }
        for (p, &j) in positive.iter().enumerate() {
            out_row[m_list.len() + p] = row[j].conj() * parity;
        }
    }
    (extended_m, out)
}

/// Twist T × M' non-precessing modes `h_np` (indexed by `m_in`) into the
/// T × M precessing modes `m_out`.
pub fn twist(
    l: u32,
    m_out: &[i32],
    m_in: &[i32],
    h_np: ArrayView2<'_, Complex64>,
    angles: AngleSamples<'_>,
) -> ChirpResult<Array2<Complex64>> {
    if h_np.dim() != (angles.len(), m_in.len()) {
        return Err(ChirpError::Dimension(format!(
            "modes of shape {:?} do not match {} samples × {} modes",
            h_np.dim(),
            angles.len(),
            m_in.len()
        )));
    }
    let d = wigner_d_matrix(l, m_out, m_in, angles)?;
    let mut out = Array2::zeros((angles.len(), m_out.len()));
    for ((mut out_row, d_t), h_t) in out
        .outer_iter_mut()
        .zip(d.outer_iter())
        .zip(h_np.outer_iter())
    {
        out_row.assign(&d_t.dot(&h_t));
    }
    Ok(out)
}

/// Rotate T × M modes (all m of `l`, in `m_list` order) by the constant
/// rotation `D(−γ0, −β0, −α0)` into the initial orbital frame.
pub fn rotate_to_initial_frame(
    l: u32,
    m_list: &[i32],
    modes: ArrayView2<'_, Complex64>,
    initial: (f64, f64, f64),
) -> ChirpResult<Array2<Complex64>> {
    let (alpha0, beta0, gamma0) = initial;
    let d = wigner_d_matrix(
        l,
        m_list,
        m_list,
        AngleSamples {
            alpha: &[-gamma0],
            beta: &[-beta0],
            gamma: &[-alpha0],
        },
    )?;
    let rot = d.index_axis(Axis(0), 0);
    Ok(modes.dot(&rot.t()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn full_m(l: u32) -> Vec<i32> {
        let li = l as i32;
        (-li..=li).collect()
    }

    #[test]
    fn test_d_matrix_is_unitary() {
        let alpha = [0.3, -1.2];
        let beta = [0.8, 2.4];
        let gamma = [1.7, 0.05];
        for l in [2u32, 3] {
            let m = full_m(l);
            let d = wigner_d_matrix(
                l,
                &m,
                &m,
                AngleSamples {
                    alpha: &alpha,
                    beta: &beta,
                    gamma: &gamma,
                },
            )
            .unwrap();
            for t in 0..2 {
                let dt = d.index_axis(Axis(0), t);
                let prod = dt.dot(&dt.t().mapv(|z| z.conj()));
                for i in 0..m.len() {
                    for j in 0..m.len() {
                        let expected = if i == j { 1.0 } else { 0.0 };
                        assert_relative_eq!(prod[[i, j]].re, expected, epsilon = 1e-12);
                        assert_relative_eq!(prod[[i, j]].im, 0.0, epsilon = 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn test_zero_beta_is_phase_rotation() {
        let alpha = [0.4];
        let gamma = [-0.4];
        let m = full_m(2);
        let d = wigner_d_matrix(
            2,
            &m,
            &m,
            AngleSamples {
                alpha: &alpha,
                beta: &[0.0],
                gamma: &gamma,
            },
        )
        .unwrap();
        for i in 0..m.len() {
            for j in 0..m.len() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(d[[0, i, j]].re, expected, epsilon = 1e-14);
                assert_relative_eq!(d[[0, i, j]].im, 0.0, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn test_negative_modes_symmetry() {
        let h = array![[Complex64::new(1.0, 2.0), Complex64::new(-0.5, 0.25)]];
        let (m, ext) = with_negative_modes(3, &[1, 3], h.view());
        assert_eq!(m, vec![1, 3, -1, -3]);
        assert_eq!(ext[[0, 2]], Complex64::new(-1.0, 2.0));
        assert_eq!(ext[[0, 3]], Complex64::new(0.5, 0.25));
        let (m, ext) = with_negative_modes(2, &[0, 2], h.view());
        assert_eq!(m, vec![0, 2, -2]);
        assert_eq!(ext[[0, 2]], Complex64::new(-0.5, -0.25));
    }

    #[test]
    fn test_twist_preserves_power() {
        let m = full_m(2);
        let h = Array2::from_shape_fn((3, m.len()), |(t, j)| {
            Complex64::new((t + j) as f64 * 0.1, 0.3 - j as f64 * 0.05)
        });
        let alpha = [0.1, 0.5, 0.9];
        let beta = [0.2, 0.6, 1.0];
        let gamma = [-0.3, 0.0, 0.4];
        let tw = twist(
            2,
            &m,
            &m,
            h.view(),
            AngleSamples {
                alpha: &alpha,
                beta: &beta,
                gamma: &gamma,
            },
        )
        .unwrap();
        for t in 0..3 {
            let before: f64 = h.row(t).iter().map(|z| z.norm_sqr()).sum();
            let after: f64 = tw.row(t).iter().map(|z| z.norm_sqr()).sum();
            assert_relative_eq!(before, after, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_initial_frame_rotation_undoes_twist_at_start() {
        let m = full_m(2);
        let h = Array2::from_shape_fn((1, m.len()), |(_, j)| Complex64::new(j as f64, 1.0));
        let (a, b, g) = (0.7, 0.9, -0.2);
        let tw = twist(
            2,
            &m,
            &m,
            h.view(),
            AngleSamples {
                alpha: &[a],
                beta: &[b],
                gamma: &[g],
            },
        )
        .unwrap();
        let back = rotate_to_initial_frame(2, &m, tw.view(), (a, b, g)).unwrap();
        for j in 0..m.len() {
            assert_relative_eq!(back[[0, j]].re, h[[0, j]].re, epsilon = 1e-12);
            assert_relative_eq!(back[[0, j]].im, h[[0, j]].im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let h = Array2::<Complex64>::zeros((2, 3));
        let res = twist(
            2,
            &[2],
            &[2, 1],
            h.view(),
            AngleSamples {
                alpha: &[0.0, 0.0],
                beta: &[0.0, 0.0],
                gamma: &[0.0, 0.0],
            },
        );
        assert!(res.is_err());
    }
}
