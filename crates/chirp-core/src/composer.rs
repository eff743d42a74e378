// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Waveform Composer
// ─────────────────────────────────────────────────────────────────────
//! Registry of mode generators and the query surface built on top of it.
//!
//! The composer normalizes every accepted parameter layout, sums modes
//! into the two polarizations, differentiates modes with respect to the
//! chosen mass variables, builds Euler angles from the angle-trend model
//! and twists aligned-spin modes into precessing ones.
//!
//! Every method is a pure function of the loaded model and its inputs.
//! Recoverable issues go to the caller's [`Diagnostics`].

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;
use std::path::Path;

use ndarray::{s, Array2, Array3, Array4, ArrayView2, Axis};
use num_complex::Complex64;
use rayon::prelude::*;

use chirp_types::{
    CanonicalParams, ChirpError, ChirpResult, DiagnosticKind, Diagnostics, GeneratorConfig,
    GradVariables, Mode, OutType, PhysicalParams, StandardParams,
};

use crate::harmonics::{spherical_harmonic, PolarizationWeights};
use crate::interp::{gradient, interp, Fill};
use crate::mode_generator::{check_time_grid, row_slice, ModeGenerator};
use crate::precession::{
    angular_momentum_track, model_grid_angles, samples, AngleTrendModel, BinarySpins,
    EulerAngleTrack, PrecessingParams, ANGLE_INPUTS,
};
use crate::store;
use crate::wigner::{rotate_to_initial_frame, twist, with_negative_modes};

/// Relative tolerance between a caller reference frequency and the one
/// implied by the model grid.
const REFERENCE_FREQUENCY_TOLERANCE: f64 = 0.01;

/// Which modes enter a query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ModeSelection {
    /// The (2,2) mode only, through the closed-form fast path.
    #[default]
    Dominant,
    /// Every mode in the registry.
    All,
    /// An explicit list; modes missing from the registry are skipped.
    Only(Vec<Mode>),
}

/// Options of [`WaveformComposer::get_twisted_modes`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TwistOptions {
    /// Replaces the initial value of `α`.
    pub alpha0: Option<f64>,
    /// Replaces the initial value of `γ`.
    pub gamma0: Option<f64>,
    /// Express the modes in the frame of the initial orbital momentum.
    pub l0_frame: bool,
    /// Frequency (Hz) of the (2,2) mode at which the spins are given.
    /// Only checked against the model's own reference frequency.
    pub reference_frequency: Option<f64>,
}

/// Precessing modes, each N × T × K, and the angles that produced them.
#[derive(Debug, Clone)]
pub struct TwistedModes {
    pub real: Array3<f64>,
    pub imag: Array3<f64>,
    pub angles: EulerAngleTrack,
}

/// Mode registry plus an optional angle-trend model.
#[derive(Debug, Clone)]
pub struct WaveformComposer {
    config: GeneratorConfig,
    modes: BTreeMap<Mode, ModeGenerator>,
    angle_model: Option<AngleTrendModel>,
    metadata: BTreeMap<String, String>,
}

impl WaveformComposer {
    pub fn new(
        config: GeneratorConfig,
        generators: Vec<ModeGenerator>,
        angle_model: Option<AngleTrendModel>,
    ) -> ChirpResult<Self> {
        config.validate()?;
        if generators.is_empty() {
            return Err(ChirpError::Load("model contains no modes".into()));
        }
        let mut modes = BTreeMap::new();
        for gen in generators {
            let mode = gen.mode();
            let gen = gen
                .with_reference_mass(config.reference_total_mass)
                .with_batch_size(config.inference_batch_size);
            if modes.insert(mode, gen).is_some() {
                return Err(ChirpError::Load(format!("mode {mode} given twice")));
            }
        }
        if let Some(model) = &angle_model {
            model.validate()?;
        }
        log::debug!(
            "composer ready: {} modes, angle model {}",
            modes.len(),
            if angle_model.is_some() { "loaded" } else { "absent" }
        );
        Ok(Self {
            config,
            modes,
            angle_model,
            metadata: BTreeMap::new(),
        })
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Load a model directory.
    pub fn load(
        path: impl AsRef<Path>,
        config: GeneratorConfig,
        diag: &mut Diagnostics,
    ) -> ChirpResult<Self> {
        store::load_model(path.as_ref(), config, diag)
    }

    /// Write the model directory layout read by [`Self::load`].
    pub fn save(&self, path: impl AsRef<Path>) -> ChirpResult<()> {
        store::save_model(self, path.as_ref())
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn angle_model(&self) -> Option<&AngleTrendModel> {
        self.angle_model.as_ref()
    }

    /// Available modes in ascending `(l, m)` order.
    pub fn list_modes(&self) -> Vec<Mode> {
        self.modes.keys().copied().collect()
    }

    pub fn mode_generator(&self, mode: Mode) -> Option<&ModeGenerator> {
        self.modes.get(&mode)
    }

    pub(crate) fn generators(&self) -> impl Iterator<Item = &ModeGenerator> {
        self.modes.values()
    }

    pub fn summary(&self) -> String {
        let mut out = String::from("###### Summary for Chirp Kernel model ######\n");
        if let Some(description) = self.metadata.get("description") {
            out.push_str(description);
            out.push('\n');
        }
        for (k, v) in self.metadata.iter().filter(|(k, _)| k.as_str() != "description") {
            out.push_str(&format!("   {k}: {v}\n"));
        }
        let modes: Vec<String> = self.modes.keys().map(Mode::to_string).collect();
        out.push_str(&format!("   modes: {}\n", modes.join(", ")));
        out.push_str(&format!(
            "   angle-trend model: {}\n",
            if self.angle_model.is_some() { "loaded" } else { "absent" }
        ));
        for gen in self.modes.values() {
            out.push_str(&gen.summary());
        }
        out
    }

    // ── parameter handling ──────────────────────────────────────────

    /// Normalize every row of an accepted layout to canonical form.
    pub fn normalize(
        &self,
        theta: ArrayView2<'_, f64>,
        diag: &mut Diagnostics,
    ) -> ChirpResult<Vec<CanonicalParams>> {
        theta
            .outer_iter()
            .map(|row| {
                CanonicalParams::from_row(&row_slice(row), self.config.reference_total_mass, diag)
            })
            .collect()
    }

    fn dominant(&self) -> ChirpResult<&ModeGenerator> {
        self.modes.get(&Mode::L2M2).ok_or_else(|| {
            ChirpError::Validation("model has no (2,2) mode, required by this operation".into())
        })
    }

    fn requested_modes(&self, selection: &ModeSelection) -> Vec<Mode> {
        match selection {
            ModeSelection::Dominant => vec![Mode::L2M2],
            ModeSelection::All => self.list_modes(),
            ModeSelection::Only(modes) => modes.clone(),
        }
    }

    fn lookup(&self, mode: Mode, diag: &mut Diagnostics) -> Option<&ModeGenerator> {
        let gen = self.modes.get(&mode);
        if gen.is_none() {
            diag.push(
                DiagnosticKind::UnknownMode,
                format!("mode {mode} is not in the model, skipping it"),
            );
        }
        gen
    }

    // ── polarizations ───────────────────────────────────────────────

    /// Plus and cross polarizations, each N × T, for any accepted layout.
    pub fn get_wf(
        &self,
        theta: ArrayView2<'_, f64>,
        t_grid: &[f64],
        selection: &ModeSelection,
        diag: &mut Diagnostics,
    ) -> ChirpResult<(Array2<f64>, Array2<f64>)> {
        check_time_grid(t_grid)?;
        let params = self.normalize(theta, diag)?;
        let intrinsic = intrinsic_matrix(&params);
        let t_len = t_grid.len();
        let mut h_plus = Array2::zeros((params.len(), t_len));
        let mut h_cross = Array2::zeros((params.len(), t_len));
        let scale: Vec<f64> = params
            .iter()
            .map(|p| self.config.amplitude_prefactor * p.total_mass() / p.distance)
            .collect();

        if *selection == ModeSelection::Dominant {
            let (amp, ph) =
                self.dominant()?
                    .get_mode(intrinsic.view(), t_grid, OutType::AmpPhase, diag)?;
            let norm = (5.0 / (4.0 * PI)).sqrt();
            for (i, p) in params.iter().enumerate() {
                let cos_i = p.inclination.cos();
                let plus = 0.5 * (1.0 + cos_i * cos_i);
                for j in 0..t_len {
                    let a = norm * scale[i] * amp[[i, j]];
                    let arg = ph[[i, j]] + 2.0 * p.phase;
                    h_plus[[i, j]] = a * arg.cos() * plus;
                    h_cross[[i, j]] = a * arg.sin() * cos_i;
                }
            }
            return Ok((h_plus, h_cross));
        }

        for mode in self.requested_modes(selection) {
            let Some(gen) = self.lookup(mode, diag) else {
                continue;
            };
            let (amp, ph) = gen.get_mode(intrinsic.view(), t_grid, OutType::AmpPhase, diag)?;
            for (i, p) in params.iter().enumerate() {
                let w = PolarizationWeights::new(mode, p.inclination)?;
                let m_phi = f64::from(mode.m) * p.phase;
                for j in 0..t_len {
                    let a = scale[i] * amp[[i, j]];
                    let arg = ph[[i, j]] + m_phi;
                    h_plus[[i, j]] += a * arg.cos() * w.plus;
                    h_cross[[i, j]] += a * arg.sin() * w.cross;
                }
            }
        }
        Ok((h_plus, h_cross))
    }

    /// [`Self::get_wf`] for a single row.
    pub fn get_wf_single(
        &self,
        theta: &[f64],
        t_grid: &[f64],
        selection: &ModeSelection,
        diag: &mut Diagnostics,
    ) -> ChirpResult<(Vec<f64>, Vec<f64>)> {
        let (h_plus, h_cross) = self.get_wf(single_row(theta)?, t_grid, selection, diag)?;
        Ok((h_plus.row(0).to_vec(), h_cross.row(0).to_vec()))
    }

    /// (2,2) polarizations for the full physical parameter set.
    pub fn generate(
        &self,
        t_grid: &[f64],
        params: &PhysicalParams,
        diag: &mut Diagnostics,
    ) -> ChirpResult<(Vec<f64>, Vec<f64>)> {
        self.get_wf_single(&params.to_array(), t_grid, &ModeSelection::Dominant, diag)
    }

    /// Complex `Y^{−2}_{lm}(ι, φ0)`.
    pub fn spherical_harmonics(&self, mode: Mode, iota: f64, phi0: f64) -> ChirpResult<Complex64> {
        spherical_harmonic(mode, iota, phi0)
    }

    // ── modes ───────────────────────────────────────────────────────

    /// Modes on a user grid, each output N × T × K in selection order.
    /// Modes missing from the registry are left at zero.
    pub fn get_modes(
        &self,
        theta: ArrayView2<'_, f64>,
        t_grid: &[f64],
        selection: &ModeSelection,
        out_type: OutType,
        diag: &mut Diagnostics,
    ) -> ChirpResult<(Array3<f64>, Array3<f64>)> {
        check_time_grid(t_grid)?;
        let params = self.normalize(theta, diag)?;
        let intrinsic = intrinsic_matrix(&params);
        let requested = self.requested_modes(selection);
        let shape = (params.len(), t_grid.len(), requested.len());
        let mut out1 = Array3::zeros(shape);
        let mut out2 = Array3::zeros(shape);
        for (k, mode) in requested.into_iter().enumerate() {
            let Some(gen) = self.lookup(mode, diag) else {
                continue;
            };
            let (a, b) = gen.get_mode(intrinsic.view(), t_grid, out_type, diag)?;
            out1.index_axis_mut(Axis(2), k).assign(&a);
            out2.index_axis_mut(Axis(2), k).assign(&b);
        }
        Ok((out1, out2))
    }

    /// Mode gradients, each N × T × 4 × K, with respect to `grad_var`
    /// followed by the two aligned spins.
    pub fn get_mode_grads(
        &self,
        theta: ArrayView2<'_, f64>,
        t_grid: &[f64],
        selection: &ModeSelection,
        out_type: OutType,
        grad_var: GradVariables,
        diag: &mut Diagnostics,
    ) -> ChirpResult<(Array4<f64>, Array4<f64>)> {
        check_time_grid(t_grid)?;
        let params = self.normalize(theta, diag)?;
        let intrinsic = intrinsic_matrix(&params);
        let requested = self.requested_modes(selection);
        let shape = (params.len(), t_grid.len(), 4, requested.len());
        let mut out1 = Array4::zeros(shape);
        let mut out2 = Array4::zeros(shape);
        for (k, mode) in requested.into_iter().enumerate() {
            let Some(gen) = self.lookup(mode, diag) else {
                continue;
            };
            let (a, b) = gen.get_grads(intrinsic.view(), t_grid, out_type, diag)?;
            out1.index_axis_mut(Axis(3), k).assign(&a);
            out2.index_axis_mut(Axis(3), k).assign(&b);
        }
        if grad_var != GradVariables::TotalMassMassRatio {
            let jacobians = mass_jacobians(&params, grad_var, diag);
            apply_jacobians(&mut out1, &jacobians);
            apply_jacobians(&mut out2, &jacobians);
        }
        Ok((out1, out2))
    }

    // ── derived quantities ──────────────────────────────────────────

    /// Phase of the (2,2) mode on a user grid, without diagnostics from
    /// grids that deliberately start early.
    fn dominant_phase(
        &self,
        intrinsic: ArrayView2<'_, f64>,
        t_grid: &[f64],
    ) -> ChirpResult<Array2<f64>> {
        let mut scratch = Diagnostics::new();
        let (_, ph) = self
            .dominant()?
            .get_mode(intrinsic, t_grid, OutType::AmpPhase, &mut scratch)?;
        Ok(ph)
    }

    /// Orbital frequency (Hz) at the amplitude peak.
    pub fn merger_frequency(
        &self,
        theta: ArrayView2<'_, f64>,
        diag: &mut Diagnostics,
    ) -> ChirpResult<Vec<f64>> {
        let params = self.normalize(theta, diag)?;
        let dt = self.config.frequency_step;
        let ph = self.dominant_phase(intrinsic_matrix(&params).view(), &[-dt, dt])?;
        Ok(ph
            .rows()
            .into_iter()
            .map(|r| (0.5 * (r[1] - r[0]) / (2.0 * dt)).abs() / (2.0 * PI))
            .collect())
    }

    /// Orbital frequency (Hz) at `|t|` seconds before merger.
    pub fn orbital_frequency(
        &self,
        theta: ArrayView2<'_, f64>,
        t: f64,
        diag: &mut Diagnostics,
    ) -> ChirpResult<Vec<f64>> {
        let params = self.normalize(theta, diag)?;
        self.orbital_frequency_of(intrinsic_matrix(&params).view(), t)
    }

    fn orbital_frequency_of(&self, intrinsic: ArrayView2<'_, f64>, t: f64) -> ChirpResult<Vec<f64>> {
        let dt = self.config.frequency_step;
        let t = t.abs();
        let ph = self.dominant_phase(intrinsic, &[-t - dt, -t + dt])?;
        Ok(ph
            .rows()
            .into_iter()
            .map(|r| 0.5 * (r[1] - r[0]).abs() / (2.0 * dt) / (2.0 * PI))
            .collect())
    }

    /// Frequency (Hz) of the (2,2) mode at the start of the model grid,
    /// where the precessing spins are defined, and the time (s) it is
    /// taken at. Accepts `(m1, m2, s1z, s2z)`, any layout of
    /// [`Self::normalize`] or 8-column precessing rows.
    pub fn reference_frequency_angles(
        &self,
        theta: ArrayView2<'_, f64>,
        diag: &mut Diagnostics,
    ) -> ChirpResult<(Vec<f64>, Vec<f64>)> {
        let intrinsic = if theta.ncols() == 8 {
            self.non_precessing_theta(theta)?
        } else {
            intrinsic_matrix(&self.normalize(theta, diag)?)
        };
        let start = self.dominant()?.times()[0];
        let dt = self.config.frequency_step;
        let mut frefs = Vec::with_capacity(intrinsic.nrows());
        let mut trefs = Vec::with_capacity(intrinsic.nrows());
        for i in 0..intrinsic.nrows() {
            let row = intrinsic.slice(s![i..i + 1, ..]);
            let tref = start * (row[[0, 0]] + row[[0, 1]]) + dt;
            let f = self.orbital_frequency_of(row, tref)?;
            frefs.push(2.0 * f[0]);
            trefs.push(tref);
        }
        Ok((frefs, trefs))
    }

    /// Time (s) before merger at which the (2,2) mode reaches frequency
    /// `f` (Hz).
    ///
    /// Inverts the frequency track on the configured search window by
    /// linear interpolation, which assumes the frequency grows
    /// monotonically over the window.
    pub fn merger_time(
        &self,
        f: f64,
        theta: ArrayView2<'_, f64>,
        diag: &mut Diagnostics,
    ) -> ChirpResult<Vec<f64>> {
        let params = self.normalize(theta, diag)?;
        let grid = self.config.merger_time_grid();
        let ph = self.dominant_phase(intrinsic_matrix(&params).view(), &grid)?;
        Ok(ph
            .rows()
            .into_iter()
            .map(|r| {
                let f_t: Vec<f64> = gradient(&row_slice(r), &grid)
                    .into_iter()
                    .map(|d| -d / (2.0 * PI))
                    .collect();
                interp(&[f], &f_t, &grid, Fill::Edge)[0].abs()
            })
            .collect())
    }

    /// Orbital angular momentum `L/M²` and angular velocity (rad/s), each
    /// N × T.
    ///
    /// Rows are `(m1, m2, s1z, s2z)` or 8-column precessing rows. Without
    /// `t_grid` the tracks are computed on the model grid at the
    /// reference mass.
    pub fn orbital_angular_momentum(
        &self,
        theta: ArrayView2<'_, f64>,
        t_grid: Option<&[f64]>,
        diag: &mut Diagnostics,
    ) -> ChirpResult<(Array2<f64>, Array2<f64>)> {
        let intrinsic = match theta.ncols() {
            8 => self.non_precessing_theta(theta)?,
            4 => theta.to_owned(),
            d => {
                return Err(ChirpError::Validation(format!(
                    "angular momentum takes 4 or 8 columns, got {d}"
                )))
            }
        };
        match t_grid {
            None => self.reference_mass_track(intrinsic.view()),
            Some(t) => {
                check_time_grid(t)?;
                let (_, ph) =
                    self.dominant()?
                        .get_mode(intrinsic.view(), t, OutType::AmpPhase, diag)?;
                let mu: Vec<f64> = intrinsic
                    .rows()
                    .into_iter()
                    .map(|r| reduced_mass_rate(r[0], r[1], self.config.solar_mass_seconds))
                    .collect();
                self.momentum_tracks(&ph, t, &mu)
            }
        }
    }

    /// `L` and `ω` on the model grid at the reference mass.
    fn reference_mass_track(
        &self,
        intrinsic: ArrayView2<'_, f64>,
    ) -> ChirpResult<(Array2<f64>, Array2<f64>)> {
        let gen = self.dominant()?;
        let mref = self.config.reference_total_mass;
        let mut standard = Array2::zeros((intrinsic.nrows(), 3));
        let mut mu = Vec::with_capacity(intrinsic.nrows());
        for (mut out, r) in standard.rows_mut().into_iter().zip(intrinsic.rows()) {
            let (p, _) = StandardParams::from_masses(r[0], r[1], r[2], r[3]);
            out.assign(&ndarray::arr1(&p.to_array()));
            let mass = r[0] + r[1];
            mu.push(reduced_mass_rate(r[0], r[1], self.config.solar_mass_seconds) * mass / mref);
        }
        let (_, ph) = gen.get_raw_mode(standard.view())?;
        let t_ref: Vec<f64> = gen.times().iter().map(|t| t * mref).collect();
        self.momentum_tracks(&ph, &t_ref, &mu)
    }

    fn momentum_tracks(
        &self,
        ph: &Array2<f64>,
        t: &[f64],
        mu: &[f64],
    ) -> ChirpResult<(Array2<f64>, Array2<f64>)> {
        let cutoff = self.config.merger_cutoff;
        let tracks = (0..ph.nrows())
            .into_par_iter()
            .map(|i| angular_momentum_track(&row_slice(ph.row(i)), t, mu[i], cutoff))
            .collect::<ChirpResult<Vec<_>>>()?;
        let mut l = Array2::zeros((ph.nrows(), t.len()));
        let mut omega = Array2::zeros((ph.nrows(), t.len()));
        for (i, (l_row, w_row)) in tracks.into_iter().enumerate() {
            l.row_mut(i).assign(&ndarray::Array1::from(l_row));
            omega.row_mut(i).assign(&ndarray::Array1::from(w_row));
        }
        Ok((l, omega))
    }

    // ── precession ──────────────────────────────────────────────────

    /// `(q, χ1, χ2, θ1, θ2, Δφ)` of one binary, body 1 the heavier.
    pub fn precessing_params(
        &self,
        m1: f64,
        m2: f64,
        s1: [f64; 3],
        s2: [f64; 3],
    ) -> ChirpResult<PrecessingParams> {
        Ok(BinarySpins::new(m1, m2, s1, s2)?.precessing_params())
    }

    /// Drop the in-plane spins of 8-column rows: `(m1, m2, s1z, s2z)`.
    pub fn non_precessing_theta(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        check_precessing_width(theta)?;
        let mut out = Array2::zeros((theta.nrows(), 4));
        for (mut o, r) in out.rows_mut().into_iter().zip(theta.rows()) {
            o[0] = r[0];
            o[1] = r[1];
            o[2] = r[4];
            o[3] = r[7];
        }
        Ok(out)
    }

    fn require_angle_model(&self) -> ChirpResult<&AngleTrendModel> {
        self.angle_model.as_ref().ok_or_else(|| {
            ChirpError::Validation("model has no angle-trend model; precession unavailable".into())
        })
    }

    fn reduced_angles_of(&self, spins: &[BinarySpins]) -> ChirpResult<Array2<f64>> {
        let model = self.require_angle_model()?;
        let mut x = Array2::zeros((spins.len(), ANGLE_INPUTS));
        for (mut row, s) in x.rows_mut().into_iter().zip(spins) {
            row.assign(&ndarray::arr1(&s.angle_features()));
        }
        model.predict(x.view())
    }

    /// Reduced angles `Ψ`, N × 4, for 8-column precessing rows.
    pub fn reduced_angles(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        check_precessing_width(theta)?;
        let spins = theta
            .rows()
            .into_iter()
            .map(BinarySpins::from_row)
            .collect::<ChirpResult<Vec<_>>>()?;
        self.reduced_angles_of(&spins)
    }

    /// Euler angles on a user grid for 8-column precessing rows.
    pub fn euler_angles(
        &self,
        theta: ArrayView2<'_, f64>,
        t_grid: &[f64],
        options: &TwistOptions,
        diag: &mut Diagnostics,
    ) -> ChirpResult<EulerAngleTrack> {
        check_precessing_width(theta)?;
        check_time_grid(t_grid)?;
        let spins = theta
            .rows()
            .into_iter()
            .map(BinarySpins::from_row)
            .collect::<ChirpResult<Vec<_>>>()?;
        let psi = self.reduced_angles_of(&spins)?;
        let intrinsic = self.non_precessing_theta(theta)?;
        let (l, omega) = self.reference_mass_track(intrinsic.view())?;

        let gen = self.dominant()?;
        let times = gen.times();
        let mref = self.config.reference_total_mass;
        let t_ref: Vec<f64> = times.iter().map(|t| t * mref).collect();
        let mass_seconds = mref * self.config.solar_mass_seconds;

        let rows = (0..spins.len())
            .into_par_iter()
            .map(|i| {
                let psi_i = [psi[[i, 0]], psi[[i, 1]], psi[[i, 2]], psi[[i, 3]]];
                let track = model_grid_angles(
                    &spins[i],
                    psi_i,
                    &row_slice(l.row(i)),
                    &row_slice(omega.row(i)),
                    &t_ref,
                    mass_seconds,
                )?;
                let mass = intrinsic[[i, 0]] + intrinsic[[i, 1]];
                let grid: Vec<f64> = t_grid.iter().map(|t| t / mass).collect();
                Ok(track.map(|angle| interp(&grid, times, &angle, Fill::Edge)))
            })
            .collect::<ChirpResult<Vec<_>>>()?;

        let shape = (spins.len(), t_grid.len());
        let mut track = EulerAngleTrack {
            alpha: Array2::zeros(shape),
            beta: Array2::zeros(shape),
            gamma: Array2::zeros(shape),
        };
        for (i, [a, b, g]) in rows.into_iter().enumerate() {
            track.alpha.row_mut(i).assign(&ndarray::Array1::from(a));
            track.beta.row_mut(i).assign(&ndarray::Array1::from(b));
            track.gamma.row_mut(i).assign(&ndarray::Array1::from(g));
        }

        if let Some(requested) = options.reference_frequency {
            let (frefs, _) = self.reference_frequency_angles(intrinsic.view(), diag)?;
            let off = frefs
                .iter()
                .filter(|&&f| (requested - f).abs() > REFERENCE_FREQUENCY_TOLERANCE * f)
                .count();
            if off > 0 {
                diag.push(
                    DiagnosticKind::ReferenceFrequencyMismatch,
                    format!(
                        "reference frequency {requested} Hz differs from the model's for {off} of {} rows; spins are taken at the start of the model grid",
                        frefs.len()
                    ),
                );
            }
        }
        track.shift_initial(options.alpha0, options.gamma0);
        Ok(track)
    }

    /// Precessing modes for 8-column rows `(m1, m2, s1, s2)`.
    ///
    /// For each `l` in `modes` the aligned-spin modes of that `l` are
    /// completed with their negative-m partners and rotated by the Euler
    /// angles. Output columns follow the order of `modes`.
    pub fn get_twisted_modes(
        &self,
        theta: ArrayView2<'_, f64>,
        t_grid: &[f64],
        modes: &[Mode],
        options: &TwistOptions,
        diag: &mut Diagnostics,
    ) -> ChirpResult<TwistedModes> {
        check_precessing_width(theta)?;
        if t_grid.is_empty() {
            return Err(ChirpError::Validation("time grid is empty".into()));
        }
        let np_theta = self.non_precessing_theta(theta)?;
        let angles = self.euler_angles(theta, t_grid, options, diag)?;

        let (n, t_len) = (theta.nrows(), t_grid.len());
        let mut real = Array3::zeros((n, t_len, modes.len()));
        let mut imag = Array3::zeros((n, t_len, modes.len()));

        let l_values: BTreeSet<u32> = modes.iter().map(|m| m.l).collect();
        for l in l_values {
            let out_idx: Vec<usize> = (0..modes.len()).filter(|&k| modes[k].l == l).collect();
            let m_out: Vec<i32> = out_idx.iter().map(|&k| modes[k].m).collect();
            let np_modes: Vec<Mode> = self.modes.keys().filter(|m| m.l == l).copied().collect();
            if np_modes.is_empty() {
                diag.push(
                    DiagnosticKind::MissingNonPrecessingModes,
                    format!("no aligned-spin modes with l = {l}; twisted modes set to zero"),
                );
                continue;
            }
            let m_in: Vec<i32> = np_modes.iter().map(|m| m.m).collect();
            let (re, im) = self.get_modes(
                np_theta.view(),
                t_grid,
                &ModeSelection::Only(np_modes),
                OutType::RealImag,
                diag,
            )?;

            let twisted = (0..n)
                .into_par_iter()
                .map(|i| {
                    let h = Array2::from_shape_fn((t_len, m_in.len()), |(t, k)| {
                        Complex64::new(re[[i, t, k]], im[[i, t, k]])
                    });
                    let (m_ext, h_ext) = with_negative_modes(l, &m_in, h.view());
                    let row = angles.row(i);
                    if options.l0_frame {
                        let li = l as i32;
                        let m_full: Vec<i32> = (-li..=li).collect();
                        let full = twist(l, &m_full, &m_ext, h_ext.view(), samples(&row))?;
                        let initial = (row[0][0], row[1][0], row[2][0]);
                        let rotated = rotate_to_initial_frame(l, &m_full, full.view(), initial)?;
                        let cols: Vec<usize> = m_out.iter().map(|m| (m + li) as usize).collect();
                        Ok(rotated.select(Axis(1), &cols))
                    } else {
                        twist(l, &m_out, &m_ext, h_ext.view(), samples(&row))
                    }
                })
                .collect::<ChirpResult<Vec<_>>>()?;

            for (i, h) in twisted.iter().enumerate() {
                for (k, &o) in out_idx.iter().enumerate() {
                    for t in 0..t_len {
                        real[[i, t, o]] = h[[t, k]].re;
                        imag[[i, t, o]] = h[[t, k]].im;
                    }
                }
            }
        }
        Ok(TwistedModes { real, imag, angles })
    }
}

// ── helpers ─────────────────────────────────────────────────────────

fn intrinsic_matrix(params: &[CanonicalParams]) -> Array2<f64> {
    let mut out = Array2::zeros((params.len(), 4));
    for (mut row, p) in out.rows_mut().into_iter().zip(params) {
        row.assign(&ndarray::arr1(&p.intrinsic()));
    }
    out
}

fn single_row(theta: &[f64]) -> ChirpResult<ArrayView2<'_, f64>> {
    ArrayView2::from_shape((1, theta.len()), theta)
        .map_err(|e| ChirpError::Dimension(format!("parameter row: {e}")))
}

fn check_precessing_width(theta: ArrayView2<'_, f64>) -> ChirpResult<()> {
    if theta.ncols() != 8 {
        return Err(ChirpError::Validation(format!(
            "precessing rows take (m1, m2, s1x, s1y, s1z, s2x, s2y, s2z), got {} columns",
            theta.ncols()
        )));
    }
    Ok(())
}

/// `η³ / (M t☉)` with `M t☉` the total mass in seconds.
fn reduced_mass_rate(m1: f64, m2: f64, solar_mass_seconds: f64) -> f64 {
    let mass = m1 + m2;
    (m1 * m2).powi(3) / mass.powi(7) / solar_mass_seconds
}

/// Per-row 2 × 2 Jacobians `J[new][old]` of `(M, q)` with respect to the
/// requested mass variables.
fn mass_jacobians(
    params: &[CanonicalParams],
    grad_var: GradVariables,
    diag: &mut Diagnostics,
) -> Vec<[[f64; 2]; 2]> {
    match grad_var {
        GradVariables::TotalMassMassRatio => vec![[[1.0, 0.0], [0.0, 1.0]]; params.len()],
        GradVariables::Mass1Mass2 => params
            .iter()
            .map(|p| {
                let (m1, m2) = (p.m1, p.m2);
                if m1 >= m2 {
                    [[1.0, 1.0 / m2], [1.0, -m1 / (m2 * m2)]]
                } else {
                    [[1.0, -m2 / (m1 * m1)], [1.0, 1.0 / m1]]
                }
            })
            .collect(),
        GradVariables::ChirpMassSymmetricMassRatio => {
            let jacobians: Vec<[[f64; 2]; 2]> = params
                .iter()
                .map(|p| {
                    let q = p.m1 / p.m2;
                    let eta = q / ((1.0 + q) * (1.0 + q));
                    let mchirp = (p.m1 * p.m2).powf(0.6) / p.total_mass().powf(0.2);
                    let root = (1.0 - 4.0 * eta).sqrt();
                    let dq_deta = -(1.0 / (eta * root) + 0.5 / (eta * eta) + root / (2.0 * eta * eta));
                    [
                        [eta.powf(-0.6), 0.0],
                        [-0.6 * mchirp * eta.powf(-1.6), dq_deta],
                    ]
                })
                .collect();
            let singular = jacobians
                .iter()
                .filter(|j| j.iter().flatten().any(|v| !v.is_finite()))
                .count();
            if singular > 0 {
                diag.push(
                    DiagnosticKind::NumericalSingularity,
                    format!(
                        "dq/deta diverges at equal masses; {singular} of {} rows have non-finite gradients",
                        params.len()
                    ),
                );
            }
            jacobians
        }
    }
}

/// `g_new[m] = Σ_k g_old[k] J[m][k]` over the first two variables.
fn apply_jacobians(grads: &mut Array4<f64>, jacobians: &[[[f64; 2]; 2]]) {
    for (mut row, jac) in grads.outer_iter_mut().zip(jacobians) {
        for mut sample in row.outer_iter_mut() {
            for mut per_mode in sample.axis_iter_mut(Axis(1)) {
                let (g0, g1) = (per_mode[0], per_mode[1]);
                per_mode[0] = g0 * jac[0][0] + g1 * jac[0][1];
                per_mode[1] = g0 * jac[1][0] + g1 * jac[1][1];
            }
        }
    }
}
