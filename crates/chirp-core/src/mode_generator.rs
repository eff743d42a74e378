// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Single-Mode Generator
// ─────────────────────────────────────────────────────────────────────
//! One (l, m) multipole: amplitude and phase reduced-order models, their
//! coefficient predictors and the canonical time grid (s/M☉).
//!
//! Raw generation happens at the reference total mass on the canonical
//! grid. User-facing generation rescales the grid by the total mass,
//! interpolates onto the requested times and aligns the phase.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::f64::consts::PI;

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Zip};
use rayon::prelude::*;

use chirp_rom::{CoefficientPredictor, Predictor, ReducedOrderModel, RegressionFamily};
use chirp_types::{
    ChirpError, ChirpResult, DiagnosticKind, Diagnostics, Mode, OutType, StandardParams,
    REFERENCE_TOTAL_MASS,
};

use crate::interp::{gradient, interp_into, is_sorted, is_strictly_increasing, Fill};

/// Default number of rows per regressor evaluation.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Standardized row plus the bookkeeping needed to undo it.
#[derive(Debug, Clone, Copy)]
struct StandardRow {
    params: StandardParams,
    swapped: bool,
    total_mass: f64,
}

#[derive(Debug, Clone)]
pub struct ModeGenerator {
    mode: Mode,
    times: Vec<f64>,
    amp_rom: ReducedOrderModel,
    ph_rom: ReducedOrderModel,
    amp_predictor: Predictor,
    ph_predictor: Predictor,
    metadata: BTreeMap<String, String>,
    reference_mass: f64,
    batch_size: usize,
}

impl ModeGenerator {
    pub fn new(
        mode: Mode,
        times: Vec<f64>,
        amp_rom: ReducedOrderModel,
        ph_rom: ReducedOrderModel,
        amp_predictor: Predictor,
        ph_predictor: Predictor,
    ) -> ChirpResult<Self> {
        if mode.m < 0 {
            return Err(ChirpError::Load(format!(
                "mode {mode}: only non-negative m can be modelled"
            )));
        }
        if times.len() < 2 || !is_strictly_increasing(&times) {
            return Err(ChirpError::Load(format!(
                "mode {mode}: time grid must have at least two strictly increasing samples"
            )));
        }
        for (name, rom) in [("amplitude", &amp_rom), ("phase", &ph_rom)] {
            if rom.grid_len() != times.len() {
                return Err(ChirpError::Load(format!(
                    "mode {mode}: {name} model has {} grid points, time grid has {}",
                    rom.grid_len(),
                    times.len()
                )));
            }
        }
        for (name, rom, predictor) in [
            ("amplitude", &amp_rom, &amp_predictor),
            ("phase", &ph_rom, &ph_predictor),
        ] {
            if predictor.n_components() != rom.n_components() {
                return Err(ChirpError::Load(format!(
                    "mode {mode}: {name} predictor yields {} coefficients, PCA has {}",
                    predictor.n_components(),
                    rom.n_components()
                )));
            }
        }
        if amp_predictor.family() != ph_predictor.family() {
            return Err(ChirpError::Load(format!(
                "mode {mode}: amplitude and phase predictors belong to different families"
            )));
        }
        Ok(Self {
            mode,
            times,
            amp_rom,
            ph_rom,
            amp_predictor,
            ph_predictor,
            metadata: BTreeMap::new(),
            reference_mass: REFERENCE_TOTAL_MASS,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Total mass used for 3-column `(q, s1, s2)` input.
    pub fn with_reference_mass(mut self, reference_mass: f64) -> Self {
        self.reference_mass = reference_mass;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Canonical grid in s/M☉.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn family(&self) -> RegressionFamily {
        self.amp_predictor.family()
    }

    pub fn amp_rom(&self) -> &ReducedOrderModel {
        &self.amp_rom
    }

    pub fn ph_rom(&self) -> &ReducedOrderModel {
        &self.ph_rom
    }

    pub fn amp_predictor(&self) -> &Predictor {
        &self.amp_predictor
    }

    pub fn ph_predictor(&self) -> &Predictor {
        &self.ph_predictor
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Constant added to the aligned phase.
    pub fn phase_offset(&self) -> f64 {
        match self.family() {
            RegressionFamily::Mixture => 0.0,
            RegressionFamily::Ensemble => match (self.mode.l, self.mode.m) {
                (2, 1) => PI / 2.0,
                (3, 3) => -PI / 2.0,
                (4, 4) => PI,
                (5, 5) => PI / 2.0,
                _ => 0.0,
            },
        }
    }

    /// Amplitude scale applied after interpolation: the symmetric mass
    /// ratio for the ensemble family, one otherwise.
    fn amplitude_scale(&self, q: f64) -> f64 {
        match self.family() {
            RegressionFamily::Mixture => 1.0,
            RegressionFamily::Ensemble => q / ((1.0 + q) * (1.0 + q)),
        }
    }

    /// d(amplitude_scale)/dq.
    fn amplitude_scale_deriv(&self, q: f64) -> f64 {
        match self.family() {
            RegressionFamily::Mixture => 0.0,
            RegressionFamily::Ensemble => (1.0 - q) / (1.0 + q).powi(3),
        }
    }

    // ── raw generation ──────────────────────────────────────────────

    /// Reduced coefficients of amplitude and phase for N × 3 standardized
    /// inputs, evaluated in row batches.
    fn coefficients(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<(Array2<f64>, Array2<f64>)> {
        check_standard_width(theta)?;
        let n = theta.nrows();
        let mut g_amp = Array2::zeros((n, self.amp_rom.n_components()));
        let mut g_ph = Array2::zeros((n, self.ph_rom.n_components()));
        for (b, chunk) in theta.axis_chunks_iter(Axis(0), self.batch_size).enumerate() {
            let start = b * self.batch_size;
            let rows = s![start..start + chunk.nrows(), ..];
            g_amp.slice_mut(rows).assign(&self.amp_predictor.predict(chunk)?);
            g_ph.slice_mut(rows).assign(&self.ph_predictor.predict(chunk)?);
        }
        Ok((g_amp, g_ph))
    }

    /// Amplitude and phase on the canonical grid at the reference total
    /// mass, for N × 3 standardized `(q, s1, s2)`.
    pub fn get_raw_mode(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<(Array2<f64>, Array2<f64>)> {
        let (g_amp, g_ph) = self.coefficients(theta)?;
        Ok((
            self.amp_rom.reconstruct(g_amp.view())?,
            self.ph_rom.reconstruct(g_ph.view())?,
        ))
    }

    /// Gradients of the raw amplitude and phase with respect to
    /// `(q, s1, s2)`, each N × D × 3.
    pub fn get_raw_grads(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<(Array3<f64>, Array3<f64>)> {
        check_standard_width(theta)?;
        let n = theta.nrows();
        let mut dg_amp = Array3::zeros((n, self.amp_rom.n_components(), 3));
        let mut dg_ph = Array3::zeros((n, self.ph_rom.n_components(), 3));
        for (b, chunk) in theta.axis_chunks_iter(Axis(0), self.batch_size).enumerate() {
            let start = b * self.batch_size;
            let rows = s![start..start + chunk.nrows(), .., ..];
            dg_amp
                .slice_mut(rows)
                .assign(&self.amp_predictor.predict_gradient(chunk)?);
            dg_ph
                .slice_mut(rows)
                .assign(&self.ph_predictor.predict_gradient(chunk)?);
        }
        Ok((
            self.amp_rom.reconstruct_gradient(dg_amp.view())?,
            self.ph_rom.reconstruct_gradient(dg_ph.view())?,
        ))
    }

    // ── user-grid generation ────────────────────────────────────────

    fn standardize(&self, theta: ArrayView2<'_, f64>) -> ChirpResult<Vec<StandardRow>> {
        let width = theta.ncols();
        if width != 3 && width != 4 {
            return Err(ChirpError::Validation(format!(
                "mode generation takes (q, s1, s2) or (m1, m2, s1, s2), got {width} columns"
            )));
        }
        theta
            .outer_iter()
            .map(|row| {
                let (params, swapped, total_mass) = if width == 3 {
                    check_mass_ratio(row[0])?;
                    let (p, swapped) = StandardParams::from_reduced(row[0], row[1], row[2]);
                    (p, swapped, self.reference_mass)
                } else {
                    check_masses(row[0], row[1])?;
                    let (p, swapped) = StandardParams::from_masses(row[0], row[1], row[2], row[3]);
                    (p, swapped, row[0] + row[1])
                };
                check_spin(params.s1)?;
                check_spin(params.s2)?;
                Ok(StandardRow {
                    params,
                    swapped,
                    total_mass,
                })
            })
            .collect()
    }

    fn standard_matrix(rows: &[StandardRow]) -> Array2<f64> {
        let mut out = Array2::zeros((rows.len(), 3));
        for (mut r, s) in out.outer_iter_mut().zip(rows) {
            r.assign(&ArrayView1::from(&s.params.to_array()));
        }
        out
    }

    fn warn_extrapolation(&self, rows: &[StandardRow], t_grid: &[f64], diag: &mut Diagnostics) {
        let Some(t_min) = t_grid.iter().copied().reduce(f64::min) else {
            return;
        };
        let count = rows
            .iter()
            .filter(|r| t_min / r.total_mass < self.times[0])
            .count();
        if count > 0 {
            diag.push(
                DiagnosticKind::GridExtrapolation,
                format!(
                    "mode {}: time grid starts before the model grid for {count} of {} rows; amplitude set to zero there",
                    self.mode,
                    rows.len()
                ),
            );
        }
    }

    /// Mode on a user grid (seconds), shape N × T each.
    ///
    /// Accepts `(q, s1, s2)` at the reference mass or `(m1, m2, s1, s2)`.
    /// The phase is zero at the first sample plus the mode's offset.
    pub fn get_mode(
        &self,
        theta: ArrayView2<'_, f64>,
        t_grid: &[f64],
        out_type: OutType,
        diag: &mut Diagnostics,
    ) -> ChirpResult<(Array2<f64>, Array2<f64>)> {
        check_time_grid(t_grid)?;
        let rows = self.standardize(theta)?;
        self.warn_extrapolation(&rows, t_grid, diag);
        let (raw_amp, raw_ph) = self.get_raw_mode(Self::standard_matrix(&rows).view())?;

        let masses = Array1::from_iter(rows.iter().map(|r| r.total_mass));
        let scales = Array1::from_iter(rows.iter().map(|r| self.amplitude_scale(r.params.q)));
        let offset = self.phase_offset();
        let times = self.times.as_slice();

        let n = rows.len();
        let mut out1 = Array2::zeros((n, t_grid.len()));
        let mut out2 = Array2::zeros((n, t_grid.len()));
        Zip::from(out1.rows_mut())
            .and(out2.rows_mut())
            .and(raw_amp.rows())
            .and(raw_ph.rows())
            .and(&masses)
            .and(&scales)
            .par_for_each(|mut o1, mut o2, a_raw, p_raw, &mass, &scale| {
                let grid: Vec<f64> = t_grid.iter().map(|t| t / mass).collect();
                let mut amp = vec![0.0; grid.len()];
                let mut ph = vec![0.0; grid.len()];
                interp_into(&grid, times, &row_slice(a_raw), Fill::Value(0.0), &mut amp);
                interp_into(&grid, times, &row_slice(p_raw), Fill::Edge, &mut ph);
                let ph0 = ph.first().copied().unwrap_or(0.0);
                for (j, (a, p)) in amp.iter().zip(&ph).enumerate() {
                    let a = a * scale;
                    let p = p - ph0 + offset;
                    match out_type {
                        OutType::AmpPhase => {
                            o1[j] = a;
                            o2[j] = p;
                        }
                        OutType::RealImag => {
                            o1[j] = a * p.cos();
                            o2[j] = a * p.sin();
                        }
                    }
                }
            });
        Ok((out1, out2))
    }

    /// Gradients of the mode on a user grid with respect to
    /// `(M, q, s1, s2)`, each N × T × 4.
    ///
    /// `theta` holds `(m1, m2, s1, s2)` in its first four columns and
    /// `t_grid` must be strictly increasing. Phase gradients vanish at the
    /// first sample and wherever the phase is flat.
    pub fn get_grads(
        &self,
        theta: ArrayView2<'_, f64>,
        t_grid: &[f64],
        out_type: OutType,
        diag: &mut Diagnostics,
    ) -> ChirpResult<(Array3<f64>, Array3<f64>)> {
        if theta.ncols() < 4 {
            return Err(ChirpError::Validation(format!(
                "gradients take (m1, m2, s1, s2), got {} columns",
                theta.ncols()
            )));
        }
        check_time_grid(t_grid)?;
        if t_grid.is_empty() || !is_strictly_increasing(t_grid) {
            return Err(ChirpError::Validation(
                "gradient time grid must be non-empty and strictly increasing".into(),
            ));
        }
        let theta = theta.slice(s![.., ..4]);
        let rows = self.standardize(theta)?;
        let (raw_grad_amp, raw_grad_ph) = self.get_raw_grads(Self::standard_matrix(&rows).view())?;
        let (amp, ph) = self.get_mode(theta, t_grid, OutType::AmpPhase, diag)?;

        let n = rows.len();
        let t_len = t_grid.len();
        let results: Vec<(Array2<f64>, Array2<f64>)> = (0..n)
            .into_par_iter()
            .map(|i| {
                let row = rows[i];
                let (g_amp, g_ph) = self.row_grads(
                    row,
                    t_grid,
                    &row_slice(amp.row(i)),
                    &row_slice(ph.row(i)),
                    raw_grad_amp.index_axis(Axis(0), i),
                    raw_grad_ph.index_axis(Axis(0), i),
                );
                match out_type {
                    OutType::AmpPhase => (g_amp, g_ph),
                    OutType::RealImag => {
                        // the aligned phase keeps its offset here
                        let ph_row = ph.row(i);
                        let amp_row = amp.row(i);
                        let mut g_re = Array2::zeros((t_len, 4));
                        let mut g_im = Array2::zeros((t_len, 4));
                        for j in 0..t_len {
                            let (sin, cos) = ph_row[j].sin_cos();
                            let a = amp_row[j];
                            for c in 0..4 {
                                let ga = g_amp[[j, c]];
                                let gp = g_ph[[j, c]];
                                g_re[[j, c]] = ga * cos - gp * a * sin;
                                g_im[[j, c]] = ga * sin + gp * a * cos;
                            }
                        }
                        (g_re, g_im)
                    }
                }
            })
            .collect();

        let mut out1 = Array3::zeros((n, t_len, 4));
        let mut out2 = Array3::zeros((n, t_len, 4));
        for (i, (g1, g2)) in results.into_iter().enumerate() {
            out1.index_axis_mut(Axis(0), i).assign(&g1);
            out2.index_axis_mut(Axis(0), i).assign(&g2);
        }
        Ok((out1, out2))
    }

    /// Amplitude and phase gradients (T × 4) of one standardized row.
    fn row_grads(
        &self,
        row: StandardRow,
        t_grid: &[f64],
        amp_row: &[f64],
        ph_row: &[f64],
        raw_grad_amp: ArrayView2<'_, f64>,
        raw_grad_ph: ArrayView2<'_, f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        let t_len = t_grid.len();
        let mass = row.total_mass;
        let q = row.params.q;
        let scale = self.amplitude_scale(q);
        let scale_deriv = self.amplitude_scale_deriv(q);
        let grid: Vec<f64> = t_grid.iter().map(|t| t / mass).collect();

        let mut g_amp = Array2::<f64>::zeros((t_len, 4));
        let mut g_ph = Array2::<f64>::zeros((t_len, 4));

        // ∂_M f(t/M) = −(t/M) ∂_t f
        let da = gradient(amp_row, t_grid);
        let dp = gradient(ph_row, t_grid);
        for j in 0..t_len {
            let factor = -t_grid[j] / mass;
            g_amp[[j, 0]] = factor * da[j];
            g_ph[[j, 0]] = factor * dp[j];
        }

        let mut buf = vec![0.0; t_len];
        for c in 0..3 {
            let col = raw_grad_amp.column(c).to_vec();
            interp_into(&grid, &self.times, &col, Fill::Value(0.0), &mut buf);
            g_amp.column_mut(c + 1).assign(&ArrayView1::from(&buf));
            let col = raw_grad_ph.column(c).to_vec();
            interp_into(&grid, &self.times, &col, Fill::Edge, &mut buf);
            g_ph.column_mut(c + 1).assign(&ArrayView1::from(&buf));
        }

        if self.family() == RegressionFamily::Ensemble {
            for j in 0..t_len {
                let bare = amp_row[j] / scale;
                g_amp[[j, 1]] = scale_deriv * bare + scale * g_amp[[j, 1]];
                g_amp[[j, 2]] *= scale;
                g_amp[[j, 3]] *= scale;
            }
        }

        let first = g_ph.row(0).to_owned();
        for mut r in g_ph.outer_iter_mut() {
            r -= &first;
        }

        // flat phase after ringdown
        for j in 0..t_len {
            let flat = if j + 1 < t_len {
                ph_row[j + 1] == ph_row[j]
            } else {
                t_len >= 2 && ph_row[j] == ph_row[j - 1]
            };
            if flat {
                g_ph.row_mut(j).fill(0.0);
            }
        }

        if row.swapped {
            swap_spin_columns(&mut g_amp);
            swap_spin_columns(&mut g_ph);
        }
        (g_amp, g_ph)
    }

    /// Text summary from the mode's metadata and model shapes.
    pub fn summary(&self) -> String {
        let mut out = format!("### Mode {} ###\n", self.mode);
        if let Some(description) = self.metadata.get("description") {
            out.push_str(description);
            out.push('\n');
        }
        for (k, v) in self.metadata.iter().filter(|(k, _)| k.as_str() != "description") {
            out.push_str(&format!("   {k}: {v}\n"));
        }
        out.push_str(&format!(
            "   family: {}\n   grid: {} points in [{:.4e}, {:.4e}] s/M☉\n",
            self.family(),
            self.times.len(),
            self.times[0],
            self.times[self.times.len() - 1]
        ));
        out.push_str(&format!(
            "   amplitude: {} PC, {}\n   phase: {} PC, {}\n",
            self.amp_rom.n_components(),
            self.amp_predictor.describe(),
            self.ph_rom.n_components(),
            self.ph_predictor.describe()
        ));
        out
    }
}

fn check_standard_width(theta: ArrayView2<'_, f64>) -> ChirpResult<()> {
    if theta.ncols() != 3 {
        return Err(ChirpError::Dimension(format!(
            "raw generation takes (q, s1, s2), got {} columns",
            theta.ncols()
        )));
    }
    Ok(())
}

fn check_mass_ratio(q: f64) -> ChirpResult<()> {
    if !q.is_finite() || q <= 0.0 {
        return Err(ChirpError::Validation(format!(
            "mass ratio must be positive, got {q}"
        )));
    }
    Ok(())
}

fn check_masses(m1: f64, m2: f64) -> ChirpResult<()> {
    if !(m1.is_finite() && m2.is_finite()) || m1 <= 0.0 || m2 <= 0.0 {
        return Err(ChirpError::Validation(format!(
            "masses must be positive, got m1 = {m1}, m2 = {m2}"
        )));
    }
    Ok(())
}

fn check_spin(s: f64) -> ChirpResult<()> {
    if s.is_nan() || !(-1.0..=1.0).contains(&s) {
        return Err(ChirpError::Validation(format!(
            "aligned spin {s} outside [-1, 1]"
        )));
    }
    Ok(())
}

/// User time grids must be finite and sorted.
pub(crate) fn check_time_grid(t_grid: &[f64]) -> ChirpResult<()> {
    if let Some(t) = t_grid.iter().find(|t| !t.is_finite()) {
        return Err(ChirpError::Validation(format!(
            "time grid contains a non-finite value ({t})"
        )));
    }
    if !is_sorted(t_grid) {
        return Err(ChirpError::Validation(
            "time grid must be sorted in increasing order".into(),
        ));
    }
    Ok(())
}

/// Contiguous view of a row, copying only when the layout requires it.
pub(crate) fn row_slice<'a>(row: ArrayView1<'a, f64>) -> Cow<'a, [f64]> {
    match row.to_slice() {
        Some(s) => Cow::Borrowed(s),
        None => Cow::Owned(row.to_vec()),
    }
}

fn swap_spin_columns(g: &mut Array2<f64>) {
    for mut r in g.outer_iter_mut() {
        r.swap(2, 3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{toy_mode, GRID_START};
    use crate::interp::{interp, linspace};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn mixture_22() -> ModeGenerator {
        toy_mode(Mode::L2M2, RegressionFamily::Mixture).unwrap()
    }

    fn ensemble_33() -> ModeGenerator {
        toy_mode(Mode::new(3, 3).unwrap(), RegressionFamily::Ensemble).unwrap()
    }

    fn user_grid() -> Vec<f64> {
        linspace(-0.3, 0.03, 800)
    }

    fn max_abs(a: &Array2<f64>) -> f64 {
        a.iter().fold(0.0_f64, |m, x| m.max(x.abs()))
    }

    /// Rows `(m1, m2, s1, s2)` at fixed total mass for mass ratio `q`.
    fn at_mass_ratio(total: f64, q: f64, s1: f64, s2: f64) -> Array2<f64> {
        array![[total * q / (1.0 + q), total / (1.0 + q), s1, s2]]
    }

    #[test]
    fn test_raw_mode_matches_reconstruction() {
        let gen = mixture_22();
        let theta = array![[1.5, 0.2, -0.1], [3.0, -0.5, 0.7]];
        let (amp, ph) = gen.get_raw_mode(theta.view()).unwrap();
        assert_eq!(amp.dim(), (2, gen.times().len()));
        let g = gen.amp_predictor().predict(theta.view()).unwrap();
        let expected = gen.amp_rom().reconstruct(g.view()).unwrap();
        assert_abs_diff_eq!(amp, expected, epsilon = 1e-15);
        assert_eq!(ph.dim(), (2, gen.times().len()));
    }

    #[test]
    fn test_batching_does_not_change_output() {
        let theta = Array2::from_shape_fn((23, 3), |(i, j)| match j {
            0 => 1.0 + 0.2 * i as f64,
            1 => 0.03 * i as f64 - 0.3,
            _ => 0.5 - 0.04 * i as f64,
        });
        let (a1, p1) = mixture_22().with_batch_size(4).get_raw_mode(theta.view()).unwrap();
        let (a2, p2) = mixture_22().with_batch_size(100).get_raw_mode(theta.view()).unwrap();
        assert_abs_diff_eq!(a1, a2, epsilon = 1e-14);
        assert_abs_diff_eq!(p1, p2, epsilon = 1e-12);
    }

    #[test]
    fn test_raw_mode_rejects_width() {
        let gen = mixture_22();
        assert!(matches!(
            gen.get_raw_mode(Array2::zeros((2, 4)).view()),
            Err(ChirpError::Dimension(_))
        ));
    }

    #[test]
    fn test_mass_ratio_symmetry() {
        let gen = mixture_22();
        let t = user_grid();
        let mut diag = Diagnostics::new();
        let a = gen
            .get_mode(array![[25.0, 12.0, 0.4, -0.2]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        let b = gen
            .get_mode(array![[12.0, 25.0, -0.2, 0.4]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn test_grid_scaling_invariance() {
        let gen = mixture_22();
        let t = user_grid();
        let t2: Vec<f64> = t.iter().map(|x| 2.0 * x).collect();
        let mut diag = Diagnostics::new();
        let (a, p) = gen
            .get_mode(array![[15.0, 5.0, 0.1, 0.2]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        let (a2, p2) = gen
            .get_mode(array![[30.0, 10.0, 0.1, 0.2]].view(), &t2, OutType::AmpPhase, &mut diag)
            .unwrap();
        assert_abs_diff_eq!(a, a2, epsilon = 1e-12);
        assert_abs_diff_eq!(p, p2, epsilon = 1e-9);
    }

    #[test]
    fn test_phase_starts_at_offset() {
        let t = user_grid();
        let mut diag = Diagnostics::new();
        let theta = array![[20.0, 10.0, 0.3, -0.3], [18.0, 17.0, 0.0, 0.5]];
        let (_, ph) = mixture_22()
            .get_mode(theta.view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        assert_eq!(ph[[0, 0]], 0.0);
        assert_eq!(ph[[1, 0]], 0.0);
        let (_, ph) = ensemble_33()
            .get_mode(theta.view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        assert_abs_diff_eq!(ph[[0, 0]], -PI / 2.0);
        assert_abs_diff_eq!(ph[[1, 0]], -PI / 2.0);
    }

    #[test]
    fn test_amplitude_peaks_near_merger() {
        let t = user_grid();
        let mut diag = Diagnostics::new();
        let (amp, _) = mixture_22()
            .get_mode(array![[12.0, 8.0, 0.2, 0.1]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        let (peak, _) = amp
            .row(0)
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |best, (i, &a)| if a > best.1 { (i, a) } else { best });
        assert!(t[peak].abs() < 0.01, "peak at {}", t[peak]);
        assert!(diag.is_empty());
    }

    #[test]
    fn test_ensemble_amplitude_scaled_by_eta() {
        let gen = ensemble_33();
        let t = user_grid();
        let mut diag = Diagnostics::new();
        let (amp, _) = gen
            .get_mode(array![[2.0, 0.1, 0.1]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        let (raw, _) = gen.get_raw_mode(array![[2.0, 0.1, 0.1]].view()).unwrap();
        let bare = interp(
            &t.iter().map(|x| x / REFERENCE_TOTAL_MASS).collect::<Vec<_>>(),
            gen.times(),
            &raw.row(0).to_vec(),
            Fill::Value(0.0),
        );
        let eta = 2.0 / 9.0;
        for (a, b) in amp.row(0).iter().zip(&bare) {
            assert_abs_diff_eq!(*a, eta * b, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_reduced_and_mass_layouts_agree() {
        let gen = mixture_22();
        let t = user_grid();
        let mut diag = Diagnostics::new();
        let (a3, p3) = gen
            .get_mode(array![[3.0, 0.3, -0.2]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        let (a4, p4) = gen
            .get_mode(array![[15.0, 5.0, 0.3, -0.2]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        assert_abs_diff_eq!(a3, a4, epsilon = 1e-12);
        assert_abs_diff_eq!(p3, p4, epsilon = 1e-8);
    }

    #[test]
    fn test_inverted_reduced_ratio_is_swapped() {
        let gen = mixture_22();
        let t = user_grid();
        let mut diag = Diagnostics::new();
        let a = gen
            .get_mode(array![[0.5, 0.3, -0.2]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        let b = gen
            .get_mode(array![[2.0, -0.2, 0.3]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn test_early_grid_warns_and_zeroes_amplitude() {
        let gen = mixture_22();
        let t = linspace(-1.0, 0.0, 200);
        let mut diag = Diagnostics::new();
        let (amp, ph) = gen
            .get_mode(array![[10.0, 10.0, 0.0, 0.0]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        assert_eq!(diag.count(DiagnosticKind::GridExtrapolation), 1);
        assert!(t[0] / 20.0 < GRID_START);
        assert_eq!(amp[[0, 0]], 0.0);
        // phase is clamped, so constant before the model grid
        assert_eq!(ph[[0, 0]], ph[[0, 1]]);
    }

    #[test]
    fn test_bad_inputs_rejected() {
        let gen = mixture_22();
        let t = user_grid();
        let mut diag = Diagnostics::new();
        for theta in [
            Array2::from_elem((1, 5), 1.0),
            array![[10.0, -1.0, 0.0, 0.0]],
            array![[10.0, 5.0, 1.5, 0.0]],
            array![[0.0, 0.1, 0.1]],
        ] {
            assert!(matches!(
                gen.get_mode(theta.view(), &t, OutType::AmpPhase, &mut diag),
                Err(ChirpError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_non_finite_grid_rejected() {
        let gen = mixture_22();
        let theta = array![[25.0, 12.0, 0.4, -0.2]];
        let mut diag = Diagnostics::new();
        for t in [
            vec![f64::NAN, 0.0],
            vec![-0.1, f64::INFINITY],
            vec![f64::NEG_INFINITY, 0.0],
        ] {
            assert!(matches!(
                gen.get_mode(theta.view(), &t, OutType::AmpPhase, &mut diag),
                Err(ChirpError::Validation(_))
            ));
            assert!(matches!(
                gen.get_grads(theta.view(), &t, OutType::AmpPhase, &mut diag),
                Err(ChirpError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_unsorted_grid_rejected() {
        let gen = mixture_22();
        let theta = array![[25.0, 12.0, 0.4, -0.2]];
        let mut diag = Diagnostics::new();
        assert!(matches!(
            gen.get_mode(theta.view(), &[0.0, -0.1, 0.01], OutType::AmpPhase, &mut diag),
            Err(ChirpError::Validation(_))
        ));
        // repeated samples are still sorted
        let (amp, _) = gen
            .get_mode(theta.view(), &[-0.1, -0.1, 0.0], OutType::AmpPhase, &mut diag)
            .unwrap();
        assert_eq!(amp[[0, 0]], amp[[0, 1]]);
    }

    #[test]
    fn test_real_imag_output() {
        let gen = mixture_22();
        let t = user_grid();
        let mut diag = Diagnostics::new();
        let theta = array![[14.0, 9.0, 0.1, 0.6]];
        let (amp, ph) = gen.get_mode(theta.view(), &t, OutType::AmpPhase, &mut diag).unwrap();
        let (re, im) = gen.get_mode(theta.view(), &t, OutType::RealImag, &mut diag).unwrap();
        for j in [0, 100, 500, 799] {
            assert_abs_diff_eq!(re[[0, j]], amp[[0, j]] * ph[[0, j]].cos(), epsilon = 1e-15);
            assert_abs_diff_eq!(im[[0, j]], amp[[0, j]] * ph[[0, j]].sin(), epsilon = 1e-15);
        }
    }

    fn check_mass_ratio_gradient(gen: &ModeGenerator, out_type: OutType) {
        let t = user_grid();
        let (total, q, h) = (30.0, 2.5, 1e-5);
        let mut diag = Diagnostics::new();
        let (g1, g2) = gen
            .get_grads(at_mass_ratio(total, q, 0.2, -0.3).view(), &t, out_type, &mut diag)
            .unwrap();
        let (p1, p2) = gen
            .get_mode(at_mass_ratio(total, q + h, 0.2, -0.3).view(), &t, out_type, &mut diag)
            .unwrap();
        let (m1, m2) = gen
            .get_mode(at_mass_ratio(total, q - h, 0.2, -0.3).view(), &t, out_type, &mut diag)
            .unwrap();
        for (plus, minus, grad) in [(p1, m1, g1), (p2, m2, g2)] {
            let fd = (&plus - &minus) / (2.0 * h);
            let analytic = grad.index_axis(Axis(2), 1).to_owned();
            let err = max_abs(&(&fd - &analytic));
            assert!(
                err <= 1e-4 * max_abs(&analytic) + 1e-8,
                "q gradient error {err} vs scale {}",
                max_abs(&analytic)
            );
        }
    }

    #[test]
    fn test_mass_ratio_gradient_mixture() {
        check_mass_ratio_gradient(&mixture_22(), OutType::AmpPhase);
    }

    #[test]
    fn test_mass_ratio_gradient_ensemble() {
        check_mass_ratio_gradient(&ensemble_33(), OutType::AmpPhase);
    }

    #[test]
    fn test_mass_ratio_gradient_real_imag() {
        check_mass_ratio_gradient(&mixture_22(), OutType::RealImag);
    }

    #[test]
    fn test_spin_gradient_on_swapped_row() {
        let gen = mixture_22();
        let t = user_grid();
        let h = 1e-5;
        let mut diag = Diagnostics::new();
        let theta = array![[10.0, 20.0, 0.3, -0.1]];
        let (g_amp, _) = gen.get_grads(theta.view(), &t, OutType::AmpPhase, &mut diag).unwrap();
        let (plus, _) = gen
            .get_mode(array![[10.0, 20.0, 0.3 + h, -0.1]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        let (minus, _) = gen
            .get_mode(array![[10.0, 20.0, 0.3 - h, -0.1]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        let fd = (&plus - &minus) / (2.0 * h);
        let analytic = g_amp.index_axis(Axis(2), 2).to_owned();
        assert!(max_abs(&(&fd - &analytic)) <= 1e-4 * max_abs(&analytic) + 1e-10);
    }

    #[test]
    fn test_total_mass_gradient() {
        let gen = mixture_22();
        let t = linspace(-0.3, 0.03, 4000);
        let (total, q, h) = (25.0, 1.5, 1e-3);
        let mut diag = Diagnostics::new();
        let (g_amp, _) = gen
            .get_grads(at_mass_ratio(total, q, 0.0, 0.0).view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        let (plus, _) = gen
            .get_mode(at_mass_ratio(total + h, q, 0.0, 0.0).view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        let (minus, _) = gen
            .get_mode(at_mass_ratio(total - h, q, 0.0, 0.0).view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        let fd = (&plus - &minus) / (2.0 * h);
        let analytic = g_amp.index_axis(Axis(2), 0).to_owned();
        let l1_err: f64 = (&fd - &analytic).iter().map(|x| x.abs()).sum();
        let l1: f64 = analytic.iter().map(|x| x.abs()).sum();
        assert!(l1_err < 0.05 * l1, "relative L1 error {}", l1_err / l1);
    }

    #[test]
    fn test_phase_gradients_vanish_at_first_sample() {
        let gen = ensemble_33();
        let t = user_grid();
        let mut diag = Diagnostics::new();
        let (_, g_ph) = gen
            .get_grads(array![[20.0, 12.0, 0.2, 0.2]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        for c in 0..4 {
            assert_eq!(g_ph[[0, 0, c]], 0.0);
        }
        assert!(g_ph[[0, 400, 1]] != 0.0);
    }

    #[test]
    fn test_flat_phase_gradients_zeroed() {
        let gen = mixture_22();
        // ends well after the model grid, where the phase is clamped
        let t = linspace(-0.2, 0.2, 300);
        let mut diag = Diagnostics::new();
        let (_, g_ph) = gen
            .get_grads(array![[10.0, 10.0, 0.1, 0.1]].view(), &t, OutType::AmpPhase, &mut diag)
            .unwrap();
        for c in 0..4 {
            assert_eq!(g_ph[[0, 299, c]], 0.0);
            assert_eq!(g_ph[[0, 250, c]], 0.0);
        }
    }

    #[test]
    fn test_gradients_require_increasing_grid() {
        let gen = mixture_22();
        let mut diag = Diagnostics::new();
        let theta = array![[10.0, 10.0, 0.1, 0.1]];
        assert!(gen
            .get_grads(theta.view(), &[0.0, -0.1, 0.1], OutType::AmpPhase, &mut diag)
            .is_err());
        assert!(gen
            .get_grads(array![[2.0, 0.1, 0.1]].view(), &[-0.1, 0.0], OutType::AmpPhase, &mut diag)
            .is_err());
    }

    #[test]
    fn test_mixed_families_rejected() {
        let a = mixture_22();
        let b = ensemble_33();
        let result = ModeGenerator::new(
            Mode::L2M2,
            a.times().to_vec(),
            a.amp_rom().clone(),
            a.ph_rom().clone(),
            a.amp_predictor().clone(),
            b.ph_predictor().clone(),
        );
        assert!(matches!(result, Err(ChirpError::Load(_))));
    }

    #[test]
    fn test_summary_lists_family_and_metadata() {
        let mut meta = BTreeMap::new();
        meta.insert("description".to_string(), "toy 22 mode".to_string());
        meta.insert("trained_on".to_string(), "analytic".to_string());
        let text = mixture_22().with_metadata(meta).summary();
        assert!(text.starts_with("### Mode (2,2) ###"));
        assert!(text.contains("toy 22 mode"));
        assert!(text.contains("trained_on: analytic"));
        assert!(text.contains("family: mixture"));
    }
}
