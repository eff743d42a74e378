// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Deterministic Toy Models
// ─────────────────────────────────────────────────────────────────────
//! Small analytic models with fixed weights for tests and benchmarks.
//!
//! Amplitudes are Gaussians peaking at `t = 0`, phases follow a chirp
//! `φ(t) = −m ω0 (t + t²/2T)` so that the frequency grows monotonically
//! up to the end of the grid. Regressors only perturb these templates
//! slightly, keeping every generated quantity physically sensible.

use ndarray::{Array1, Array2};

use chirp_rom::{
    Activation, DenseLayer, DenseNetwork, EnsemblePredictor, ExtraFeature, FeatureSet,
    MixtureOfExperts, MixturePredictor, Predictor, ReducedOrderModel, RegressionFamily,
    RegressorBlock, ResidualBlock, StandardScaler,
};
use chirp_types::{ChirpResult, Diagnostics, GeneratorConfig, Mode};

use crate::composer::WaveformComposer;
use crate::interp::linspace;
use crate::mode_generator::ModeGenerator;
use crate::precession::AngleTrendModel;

pub const GRID_START: f64 = -0.02;
pub const GRID_END: f64 = 0.002;
pub const GRID_LEN: usize = 256;

const AMP_WIDTH: f64 = 0.005;
const OMEGA0: f64 = 2000.0 * std::f64::consts::PI;
const CHIRP_SCALE: f64 = 0.03;

/// Canonical grid in s/M☉ shared by every toy mode.
pub fn canonical_times() -> Vec<f64> {
    linspace(GRID_START, GRID_END, GRID_LEN)
}

/// Peak amplitude of each toy mode.
fn amplitude_scale(mode: Mode) -> f64 {
    match (mode.l, mode.m) {
        (2, 2) => 1.0,
        (2, 1) => 0.35,
        (3, 3) => 0.4,
        _ => 0.1,
    }
}

/// Smooth deterministic matrix, entries in `[−scale, scale]`.
pub fn pattern(rows: usize, cols: usize, seed: f64, scale: f64) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        scale * (seed + 1.7 * i as f64 + 0.9 * j as f64).sin()
    })
}

/// Orthonormal columns spanning `columns`, by Gram-Schmidt.
pub fn orthonormal_basis(columns: &[Vec<f64>]) -> Array2<f64> {
    let d = columns.first().map_or(0, Vec::len);
    let mut basis = Array2::zeros((d, columns.len()));
    for (k, column) in columns.iter().enumerate() {
        let mut v = Array1::from(column.clone());
        for p in 0..k {
            let prev = basis.column(p);
            let proj = prev.dot(&v);
            v.scaled_add(-proj, &prev);
        }
        let norm = v.dot(&v).sqrt();
        if norm > 0.0 {
            v /= norm;
        }
        basis.column_mut(k).assign(&v);
    }
    basis
}

fn amplitude_rom(mode: Mode, times: &[f64]) -> ChirpResult<ReducedOrderModel> {
    let a = amplitude_scale(mode);
    let mean: Vec<f64> = times
        .iter()
        .map(|t| a * (-0.5 * (t / AMP_WIDTH).powi(2)).exp())
        .collect();
    let shapes = [
        mean.iter()
            .zip(times)
            .map(|(m, t)| m * (t / AMP_WIDTH).powi(2))
            .collect::<Vec<_>>(),
        mean.iter().zip(times).map(|(m, t)| m * t / AMP_WIDTH).collect(),
    ];
    ReducedOrderModel::new(Array1::from(mean), orthonormal_basis(&shapes))
}

fn phase_rom(mode: Mode, times: &[f64]) -> ChirpResult<ReducedOrderModel> {
    let m = f64::from(mode.m);
    let mean: Vec<f64> = times
        .iter()
        .map(|t| -m * OMEGA0 * (t + 0.5 * t * t / CHIRP_SCALE))
        .collect();
    let shapes = [times.to_vec(), times.iter().map(|t| t * t).collect()];
    ReducedOrderModel::new(Array1::from(mean), orthonormal_basis(&shapes))
}

fn standard_features() -> ChirpResult<FeatureSet> {
    let features = FeatureSet::mass_ratio_log(vec!["00".parse::<ExtraFeature>()?]);
    features.validate()?;
    Ok(features)
}

fn mixture_predictor(n_components: usize, seed: f64, scale: f64) -> ChirpResult<Predictor> {
    let features = standard_features()?;
    let rows = features.n_features() + 1;
    let experts = (0..n_components)
        .map(|k| {
            let s = seed + k as f64;
            MixtureOfExperts::new(pattern(rows, 2, s, 0.5), pattern(rows, 2, s + 0.3, scale))
        })
        .collect::<ChirpResult<Vec<_>>>()?;
    Ok(Predictor::Mixture(MixturePredictor::new(
        n_components,
        features,
        experts,
    )?))
}

fn ensemble_predictor(
    n_components: usize,
    seed: f64,
    scale: f64,
    residual: bool,
) -> ChirpResult<Predictor> {
    let features = standard_features()?;
    let hidden = DenseLayer::new(
        pattern(features.n_features(), 3, seed, 0.4),
        Array1::zeros(3),
        Activation::Tanh,
    )?;
    let output = DenseLayer::new(
        pattern(3, n_components, seed + 0.5, scale),
        Array1::zeros(n_components),
        Activation::Linear,
    )?;
    let block = RegressorBlock {
        components: (0..n_components).collect(),
        features,
        network: DenseNetwork::new(None, vec![hidden, output])?,
    };
    let residuals = if residual {
        let layer = DenseLayer::new(
            pattern(3, 1, seed + 1.1, 0.2),
            Array1::zeros(1),
            Activation::Linear,
        )?;
        vec![ResidualBlock {
            components: vec![0],
            features: FeatureSet::identity(3),
            network: DenseNetwork::new(None, vec![layer])?,
            coefficients: Some(vec![0.05]),
        }]
    } else {
        Vec::new()
    };
    let mut diag = Diagnostics::new();
    Ok(Predictor::Ensemble(EnsemblePredictor::new(
        n_components,
        vec![block],
        residuals,
        &mut diag,
    )?))
}

/// One toy mode of the given regression family.
pub fn toy_mode(mode: Mode, family: RegressionFamily) -> ChirpResult<ModeGenerator> {
    let times = canonical_times();
    let amp_rom = amplitude_rom(mode, &times)?;
    let ph_rom = phase_rom(mode, &times)?;
    let seed = f64::from(mode.l) + 0.1 * f64::from(mode.m);
    let (amp_predictor, ph_predictor) = match family {
        RegressionFamily::Mixture => (
            mixture_predictor(2, seed, 0.02)?,
            mixture_predictor(2, seed + 2.0, 0.01)?,
        ),
        RegressionFamily::Ensemble => (
            ensemble_predictor(2, seed, 0.02, false)?,
            ensemble_predictor(2, seed + 2.0, 0.01, true)?,
        ),
    };
    ModeGenerator::new(mode, times, amp_rom, ph_rom, amp_predictor, ph_predictor)
}

/// Angle-trend model with small outputs around `Ψ ≈ (0.05, 0, 0.02, 0)`.
pub fn toy_angle_model() -> ChirpResult<AngleTrendModel> {
    let layer = DenseLayer::new(
        pattern(6, 4, 0.7, 0.05),
        Array1::zeros(4),
        Activation::Linear,
    )?;
    AngleTrendModel::new(
        FeatureSet::identity(6),
        DenseNetwork::new(None, vec![layer])?,
        StandardScaler::new(vec![0.05, 0.0, 0.02, 0.0], vec![0.02, 0.01, 0.02, 0.01])?,
    )
}

/// Configuration whose merger-time window fits inside the toy grid for
/// total masses of at least 20 M☉.
pub fn toy_config() -> GeneratorConfig {
    GeneratorConfig {
        merger_time_start: -0.35,
        merger_time_end: 0.0,
        merger_time_samples: 500,
        ..GeneratorConfig::default()
    }
}

/// Composer with (2,2) and (2,1) from the mixture family, (3,3) from the
/// ensemble family, and an angle-trend model.
pub fn toy_composer() -> ChirpResult<WaveformComposer> {
    let modes = vec![
        toy_mode(Mode::L2M2, RegressionFamily::Mixture)?,
        toy_mode(Mode::new(2, 1)?, RegressionFamily::Mixture)?,
        toy_mode(Mode::new(3, 3)?, RegressionFamily::Ensemble)?,
    ];
    WaveformComposer::new(toy_config(), modes, Some(toy_angle_model()?))
}
