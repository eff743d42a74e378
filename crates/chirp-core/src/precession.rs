// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Spin Precession & Euler Angles
// ─────────────────────────────────────────────────────────────────────
//! Precessing-spin geometry and the Euler-angle tracks that twist the
//! aligned-spin modes.
//!
//! The angles are built on the canonical grid at the reference mass:
//!
//! - `α` integrates the precession rate `Ω_p ∝ (3 + 3/(2q))(L·Ψ0 + Ψ1)ω²`
//! - `β` is the opening angle of `J` around the effective `L + Ψ2`
//! - `γ` integrates `−Ω_p cos β`
//!
//! where `Ψ` comes from [`AngleTrendModel`] and `L`, `ω` from the phase
//! of the (2,2) mode. Tracks are then rescaled to each row's total mass.

use ndarray::{Array2, ArrayView1, ArrayView2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use chirp_rom::{DenseNetwork, FeatureSet, StandardScaler};
use chirp_types::{ChirpError, ChirpResult};

use crate::interp::gradient;
use crate::wigner::AngleSamples;

/// Spins shorter than this have undefined orientation; angles are zero.
const SPIN_EPS: f64 = 1e-12;

/// Number of raw inputs of the angle-trend model.
pub const ANGLE_INPUTS: usize = 6;

/// Number of reduced angle outputs.
pub const ANGLE_OUTPUTS: usize = 4;

// ── spin geometry ───────────────────────────────────────────────────

/// Spin vector in polar form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarSpin {
    pub magnitude: f64,
    /// Tilt from the orbital angular momentum.
    pub theta: f64,
    /// Azimuth in the orbital plane.
    pub phi: f64,
}

impl PolarSpin {
    pub fn from_cartesian(s: [f64; 3]) -> Self {
        let magnitude = (s[0] * s[0] + s[1] * s[1] + s[2] * s[2]).sqrt();
        if magnitude < SPIN_EPS {
            return Self {
                magnitude: 0.0,
                theta: 0.0,
                phi: 0.0,
            };
        }
        Self {
            magnitude,
            theta: (s[2] / magnitude).clamp(-1.0, 1.0).acos(),
            phi: s[1].atan2(s[0]),
        }
    }
}

/// Orbit-averaged precessing parameters of one binary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrecessingParams {
    pub q: f64,
    pub chi1: f64,
    pub chi2: f64,
    pub theta1: f64,
    pub theta2: f64,
    /// `φ2 − φ1` wrapped to `(−π, π]`.
    pub delta_phi: f64,
}

impl PrecessingParams {
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.q,
            self.chi1,
            self.chi2,
            self.theta1,
            self.theta2,
            self.delta_phi,
        ]
    }
}

/// Binary with body 1 the heavier one and both spins in polar form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinarySpins {
    pub q: f64,
    pub spin1: PolarSpin,
    pub spin2: PolarSpin,
}

impl BinarySpins {
    /// Exchanges the bodies when `m1 < m2`.
    pub fn new(m1: f64, m2: f64, s1: [f64; 3], s2: [f64; 3]) -> ChirpResult<Self> {
        if !(m1.is_finite() && m2.is_finite()) || m1 <= 0.0 || m2 <= 0.0 {
            return Err(ChirpError::Validation(format!(
                "masses must be positive, got m1 = {m1}, m2 = {m2}"
            )));
        }
        let (m1, m2, s1, s2) = if m1 < m2 { (m2, m1, s2, s1) } else { (m1, m2, s1, s2) };
        let spin1 = PolarSpin::from_cartesian(s1);
        let spin2 = PolarSpin::from_cartesian(s2);
        for (i, spin) in [(1, spin1), (2, spin2)] {
            if spin.magnitude.is_nan() || spin.magnitude > 1.0 {
                return Err(ChirpError::Validation(format!(
                    "spin {i} has magnitude {} > 1",
                    spin.magnitude
                )));
            }
        }
        Ok(Self {
            q: m1 / m2,
            spin1,
            spin2,
        })
    }

    /// From a row `[m1, m2, s1x, s1y, s1z, s2x, s2y, s2z]`.
    pub fn from_row(row: ArrayView1<'_, f64>) -> ChirpResult<Self> {
        if row.len() != 8 {
            return Err(ChirpError::Validation(format!(
                "precessing parameters take 8 columns, got {}",
                row.len()
            )));
        }
        Self::new(
            row[0],
            row[1],
            [row[2], row[3], row[4]],
            [row[5], row[6], row[7]],
        )
    }

    pub fn precessing_params(&self) -> PrecessingParams {
        let d = self.spin2.phi - self.spin1.phi;
        PrecessingParams {
            q: self.q,
            chi1: self.spin1.magnitude,
            chi2: self.spin2.magnitude,
            theta1: self.spin1.theta,
            theta2: self.spin2.theta,
            delta_phi: d.sin().atan2(d.cos()),
        }
    }

    /// Raw inputs of the angle-trend model.
    pub fn angle_features(&self) -> [f64; ANGLE_INPUTS] {
        [
            self.q,
            self.spin1.magnitude,
            self.spin2.magnitude,
            self.spin1.theta,
            self.spin2.theta,
            self.spin1.phi - self.spin2.phi,
        ]
    }

    /// Dimensionless spins `χ_i m_i²` with masses in units of `M`.
    fn scaled_spins(&self) -> (f64, f64) {
        let m1 = self.q / (1.0 + self.q);
        let m2 = 1.0 / (1.0 + self.q);
        (self.spin1.magnitude * m1 * m1, self.spin2.magnitude * m2 * m2)
    }

    /// Opening angle between `J` and the effective angular momentum
    /// `l + psi2` (both in units of `M²`).
    ///
    /// Approximation: spins stay frozen at their reference values, so
    /// this is not a precession-averaged trend.
    pub fn beta(&self, l: f64, psi2: f64) -> f64 {
        let (s1, s2) = self.scaled_spins();
        let dphi = self.spin2.phi - self.spin1.phi;
        let in_plane = Complex64::new(s1 * self.spin1.theta.sin(), 0.0)
            + Complex64::from_polar(s2 * self.spin2.theta.sin(), dphi);
        let along = s1 * self.spin1.theta.cos() + s2 * self.spin2.theta.cos();
        in_plane.norm().atan2(l + psi2 + along)
    }

    /// Initial `α` from the in-plane direction of `J = L ẑ + S1 + S2`;
    /// zero when `J` is along `ẑ`.
    pub fn initial_alpha(&self) -> f64 {
        let (s1, s2) = self.scaled_spins();
        let jx = s1 * self.spin1.theta.sin() * self.spin1.phi.cos()
            + s2 * self.spin2.theta.sin() * self.spin2.phi.cos();
        let jy = s1 * self.spin1.theta.sin() * self.spin1.phi.sin()
            + s2 * self.spin2.theta.sin() * self.spin2.phi.sin();
        if jx.hypot(jy) < SPIN_EPS {
            0.0
        } else {
            (-jy).atan2(-jx)
        }
    }
}

// ── angle-trend model ───────────────────────────────────────────────

/// Regressor from `[q, χ1, χ2, θ1, θ2, φ1 − φ2]` to the reduced angles
/// `Ψ = (Ψ0, Ψ1, Ψ2, Ψ3)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleTrendModel {
    pub features: FeatureSet,
    pub network: DenseNetwork,
    pub output_scaler: StandardScaler,
}

impl AngleTrendModel {
    pub fn new(
        features: FeatureSet,
        network: DenseNetwork,
        output_scaler: StandardScaler,
    ) -> ChirpResult<Self> {
        let model = Self {
            features,
            network,
            output_scaler,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> ChirpResult<()> {
        self.features.validate()?;
        self.network.validate()?;
        self.output_scaler.validate()?;
        if self.features.n_inputs != ANGLE_INPUTS {
            return Err(ChirpError::Load(format!(
                "angle model takes {ANGLE_INPUTS} inputs, features declare {}",
                self.features.n_inputs
            )));
        }
        if self.network.n_inputs() != self.features.n_features() {
            return Err(ChirpError::Load(format!(
                "angle network takes {} inputs, features produce {}",
                self.network.n_inputs(),
                self.features.n_features()
            )));
        }
        if self.network.n_outputs() != ANGLE_OUTPUTS || self.output_scaler.width() != ANGLE_OUTPUTS {
            return Err(ChirpError::Load(format!(
                "angle model must produce {ANGLE_OUTPUTS} outputs, network has {} and scaler {}",
                self.network.n_outputs(),
                self.output_scaler.width()
            )));
        }
        Ok(())
    }

    /// N × 6 raw inputs to N × 4 reduced angles.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        if x.ncols() != ANGLE_INPUTS {
            return Err(ChirpError::Dimension(format!(
                "angle model takes {ANGLE_INPUTS} columns, got {}",
                x.ncols()
            )));
        }
        let features = self.features.augment(x)?;
        let z = self.network.forward(features.view())?;
        self.output_scaler.inverse_transform(z.view())
    }
}

// ── orbital dynamics ────────────────────────────────────────────────

/// Orbital angular momentum `L/M²` and angular velocity along a phase
/// track of the (2,2) mode.
///
/// `ω = −½ dφ/dt` is evaluated where `t < −|cutoff|`; both tracks are
/// then held constant up to the end of the grid. `mu` is `η³/(M t☉)`
/// with `M t☉` the total mass in seconds matching `t`.
pub fn angular_momentum_track(
    phase: &[f64],
    t: &[f64],
    mu: f64,
    cutoff: f64,
) -> ChirpResult<(Vec<f64>, Vec<f64>)> {
    if phase.len() != t.len() {
        return Err(ChirpError::Dimension(format!(
            "phase has {} samples, grid has {}",
            phase.len(),
            t.len()
        )));
    }
    let keep = t.iter().take_while(|&&x| x < -cutoff.abs()).count();
    if keep == 0 {
        return Err(ChirpError::Numerical(format!(
            "no samples before the merger cutoff {} s",
            -cutoff.abs()
        )));
    }
    let dphase = gradient(phase, t);
    let mut omega: Vec<f64> = dphase[..keep].iter().map(|d| -0.5 * d).collect();
    let mut l: Vec<f64> = omega.iter().map(|w| (mu / w).cbrt()).collect();
    let (last_omega, last_l) = (omega[keep - 1], l[keep - 1]);
    omega.resize(t.len(), last_omega);
    l.resize(t.len(), last_l);
    Ok((l, omega))
}

/// Euler angles of one binary on the reference-mass grid `t` (seconds).
///
/// `mass_seconds` is the reference total mass in seconds; `l` and
/// `omega` come from [`angular_momentum_track`] on the same grid.
pub fn model_grid_angles(
    spins: &BinarySpins,
    psi: [f64; ANGLE_OUTPUTS],
    l: &[f64],
    omega: &[f64],
    t: &[f64],
    mass_seconds: f64,
) -> ChirpResult<[Vec<f64>; 3]> {
    if l.len() != t.len() || omega.len() != t.len() || t.is_empty() {
        return Err(ChirpError::Dimension(format!(
            "angular momentum ({}) and frequency ({}) tracks must match the grid ({})",
            l.len(),
            omega.len(),
            t.len()
        )));
    }
    let rate = mass_seconds * (3.0 + 1.5 / spins.q);
    let omega_p: Vec<f64> = l
        .iter()
        .zip(omega)
        .map(|(l, w)| rate * (l * psi[0] + psi[1]) * w * w)
        .collect();
    let beta: Vec<f64> = l.iter().map(|&l| spins.beta(l, psi[2])).collect();

    let alpha0 = spins.initial_alpha();
    let gamma0 = -alpha0;
    let mut alpha = Vec::with_capacity(t.len());
    let mut gamma = Vec::with_capacity(t.len());
    let (mut a, mut g) = (alpha0, gamma0);
    for j in 0..t.len() {
        let dt = if j == 0 { 0.0 } else { t[j] - t[j - 1] };
        a += omega_p[j] * dt;
        g -= omega_p[j] * beta[j].cos() * dt;
        alpha.push(a);
        gamma.push(g);
    }
    Ok([alpha, beta, gamma])
}

// ── angle tracks ────────────────────────────────────────────────────

/// `(α, β, γ)` per row, each N × T.
#[derive(Debug, Clone, PartialEq)]
pub struct EulerAngleTrack {
    pub alpha: Array2<f64>,
    pub beta: Array2<f64>,
    pub gamma: Array2<f64>,
}

impl EulerAngleTrack {
    pub fn n_rows(&self) -> usize {
        self.alpha.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.alpha.ncols()
    }

    /// Replace the initial value of `α` (and likewise `γ`) by shifting
    /// the whole track.
    pub fn shift_initial(&mut self, alpha0: Option<f64>, gamma0: Option<f64>) {
        for (track, value) in [(&mut self.alpha, alpha0), (&mut self.gamma, gamma0)] {
            let Some(value) = value else { continue };
            for mut row in track.rows_mut() {
                if let Some(&first) = row.get(0) {
                    row.mapv_inplace(|x| x - first + value);
                }
            }
        }
    }

    /// Contiguous copies of row `i`, suitable for [`AngleSamples`].
    pub fn row(&self, i: usize) -> [Vec<f64>; 3] {
        [
            self.alpha.row(i).to_vec(),
            self.beta.row(i).to_vec(),
            self.gamma.row(i).to_vec(),
        ]
    }
}

/// Borrow a row copy as Wigner angle samples.
pub fn samples(row: &[Vec<f64>; 3]) -> AngleSamples<'_> {
    AngleSamples {
        alpha: &row[0],
        beta: &row[1],
        gamma: &row[2],
    }
}
