// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — PyO3 FFI Bindings
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
// #![deny(unsafe_code)] is left off here: the PyO3 macros expand to
// unsafe blocks. Hand-written code in this crate stays safe.
//! Python-callable wrappers around the Chirp Kernel waveform generator.
//!
//! Exposes `WaveformGenerator` and `GeneratorConfig` to Python via PyO3.
//!
//! # FFI Conventions
//!
//! - Parameter batches are lists of rows; outputs are nested lists.
//! - Every `ChirpError` surfaces as `ValueError`.
//! - Diagnostics of a call are returned under the `warnings` key.
//!
//! Install: `pip install -e crates/chirp-ffi` (requires maturin).
//!
//! Usage from Python:
//! ```python
//! from chirp_kernel import WaveformGenerator
//!
//! gen = WaveformGenerator("path/to/model")
//! out = gen.get_wf([[30.0, 20.0, 0.3, -0.2, 400.0, 0.5, 0.0]], times)
//! h_plus, h_cross = out["h_plus"], out["h_cross"]
//! ```

use ndarray::{Array2, Array3, Array4};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use chirp_core::{ModeSelection, TwistOptions, WaveformComposer};
use chirp_types::{ChirpError, Diagnostics, GeneratorConfig, GradVariables, Mode, OutType, PhysicalParams};

fn to_py(e: ChirpError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn to_matrix(rows: Vec<Vec<f64>>) -> PyResult<Array2<f64>> {
    let n_cols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != n_cols) {
        return Err(PyValueError::new_err("parameter rows must all have the same length"));
    }
    let n_rows = rows.len();
    Array2::from_shape_vec((n_rows, n_cols), rows.into_iter().flatten().collect())
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

fn rows2(a: &Array2<f64>) -> Vec<Vec<f64>> {
    a.outer_iter().map(|r| r.to_vec()).collect()
}

fn rows3(a: &Array3<f64>) -> Vec<Vec<Vec<f64>>> {
    a.outer_iter().map(|m| rows2(&m.to_owned())).collect()
}

fn rows4(a: &Array4<f64>) -> Vec<Vec<Vec<Vec<f64>>>> {
    a.outer_iter().map(|m| rows3(&m.to_owned())).collect()
}

fn to_modes(modes: Vec<(u32, i32)>) -> PyResult<Vec<Mode>> {
    modes
        .into_iter()
        .map(|(l, m)| Mode::new(l, m).map_err(to_py))
        .collect()
}

/// `None` selects every mode; `[(2, 2)]` uses the closed-form fast path.
fn selection(modes: Option<Vec<(u32, i32)>>) -> PyResult<ModeSelection> {
    match modes {
        None => Ok(ModeSelection::All),
        Some(list) if list == [(2, 2)] => Ok(ModeSelection::Dominant),
        Some(list) => Ok(ModeSelection::Only(to_modes(list)?)),
    }
}

// ─── PyGeneratorConfig ──────────────────────────────────────────────

/// Python-visible generator configuration.
#[pyclass(name = "GeneratorConfig")]
#[derive(Clone)]
struct PyGeneratorConfig {
    inner: GeneratorConfig,
}

#[pymethods]
impl PyGeneratorConfig {
    #[new]
    #[pyo3(signature = (
        reference_total_mass = 20.0,
        amplitude_prefactor = 4.786_418_827_336_033_6e-20,
        solar_mass_seconds = 4.93e-6,
        merger_cutoff = 0.05,
        frequency_step = 1e-3,
        merger_time_start = -100.0,
        merger_time_end = 0.0,
        merger_time_samples = 1000,
        inference_batch_size = 10,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        reference_total_mass: f64,
        amplitude_prefactor: f64,
        solar_mass_seconds: f64,
        merger_cutoff: f64,
        frequency_step: f64,
        merger_time_start: f64,
        merger_time_end: f64,
        merger_time_samples: usize,
        inference_batch_size: usize,
    ) -> PyResult<Self> {
        let config = GeneratorConfig {
            reference_total_mass,
            amplitude_prefactor,
            solar_mass_seconds,
            merger_cutoff,
            frequency_step,
            merger_time_start,
            merger_time_end,
            merger_time_samples,
            inference_batch_size,
        };
        config.validate().map_err(to_py)?;
        Ok(Self { inner: config })
    }

    /// Construct from JSON string.
    #[staticmethod]
    fn from_json(json: &str) -> PyResult<Self> {
        let config = GeneratorConfig::from_json(json).map_err(to_py)?;
        config.validate().map_err(to_py)?;
        Ok(Self { inner: config })
    }

    fn __repr__(&self) -> String {
        format!(
            "GeneratorConfig(reference_total_mass={}, merger_time=[{}, {}] x {}, batch={})",
            self.inner.reference_total_mass,
            self.inner.merger_time_start,
            self.inner.merger_time_end,
            self.inner.merger_time_samples,
            self.inner.inference_batch_size
        )
    }
}

// ─── PyWaveformGenerator ────────────────────────────────────────────

/// A loaded model: mode generators plus the optional angle-trend model.
#[pyclass(name = "WaveformGenerator")]
struct PyWaveformGenerator {
    inner: WaveformComposer,
    load_warnings: Vec<String>,
}

#[pymethods]
impl PyWaveformGenerator {
    #[new]
    #[pyo3(signature = (path, config = None))]
    fn new(path: &str, config: Option<PyGeneratorConfig>) -> PyResult<Self> {
        let config = config.map(|c| c.inner).unwrap_or_default();
        let mut diag = Diagnostics::new();
        let inner = WaveformComposer::load(path, config, &mut diag).map_err(to_py)?;
        Ok(Self {
            inner,
            load_warnings: diag.into_messages(),
        })
    }

    /// Diagnostics recorded while loading the model.
    #[getter]
    fn load_warnings(&self) -> Vec<String> {
        self.load_warnings.clone()
    }

    /// Available modes as `(l, m)` tuples.
    fn list_modes(&self) -> Vec<(u32, i32)> {
        self.inner.list_modes().iter().map(|m| (m.l, m.m)).collect()
    }

    fn summary(&self) -> String {
        self.inner.summary()
    }

    /// (2,2) polarizations for one row of the 14 physical parameters.
    fn generate(&self, py: Python<'_>, t_grid: Vec<f64>, params: Vec<f64>) -> PyResult<PyObject> {
        let params = PhysicalParams::from_slice(&params).map_err(to_py)?;
        let mut diag = Diagnostics::new();
        let (h_plus, h_cross) = self.inner.generate(&t_grid, &params, &mut diag).map_err(to_py)?;
        let dict = PyDict::new(py);
        dict.set_item("h_plus", h_plus)?;
        dict.set_item("h_cross", h_cross)?;
        dict.set_item("warnings", diag.into_messages())?;
        Ok(dict.into())
    }

    /// Polarizations for a batch of rows of any accepted layout.
    #[pyo3(signature = (theta, t_grid, modes = Some(vec![(2, 2)])))]
    fn get_wf(
        &self,
        py: Python<'_>,
        theta: Vec<Vec<f64>>,
        t_grid: Vec<f64>,
        modes: Option<Vec<(u32, i32)>>,
    ) -> PyResult<PyObject> {
        let theta = to_matrix(theta)?;
        let mut diag = Diagnostics::new();
        let (h_plus, h_cross) = self
            .inner
            .get_wf(theta.view(), &t_grid, &selection(modes)?, &mut diag)
            .map_err(to_py)?;
        let dict = PyDict::new(py);
        dict.set_item("h_plus", rows2(&h_plus))?;
        dict.set_item("h_cross", rows2(&h_cross))?;
        dict.set_item("warnings", diag.into_messages())?;
        Ok(dict.into())
    }

    /// Modes, each N × T × K, as amplitude/phase or real/imaginary parts.
    #[pyo3(signature = (theta, t_grid, modes = None, out_type = "realimag"))]
    fn get_modes(
        &self,
        py: Python<'_>,
        theta: Vec<Vec<f64>>,
        t_grid: Vec<f64>,
        modes: Option<Vec<(u32, i32)>>,
        out_type: &str,
    ) -> PyResult<PyObject> {
        let theta = to_matrix(theta)?;
        let out_type: OutType = out_type.parse().map_err(to_py)?;
        let mut diag = Diagnostics::new();
        let (first, second) = self
            .inner
            .get_modes(theta.view(), &t_grid, &selection(modes)?, out_type, &mut diag)
            .map_err(to_py)?;
        let dict = PyDict::new(py);
        dict.set_item("first", rows3(&first))?;
        dict.set_item("second", rows3(&second))?;
        dict.set_item("warnings", diag.into_messages())?;
        Ok(dict.into())
    }

    /// Mode gradients, each N × T × 4 × K.
    #[pyo3(signature = (theta, t_grid, modes = None, out_type = "ampph", grad_var = "M_q"))]
    fn get_mode_grads(
        &self,
        py: Python<'_>,
        theta: Vec<Vec<f64>>,
        t_grid: Vec<f64>,
        modes: Option<Vec<(u32, i32)>>,
        out_type: &str,
        grad_var: &str,
    ) -> PyResult<PyObject> {
        let theta = to_matrix(theta)?;
        let out_type: OutType = out_type.parse().map_err(to_py)?;
        let grad_var: GradVariables = grad_var.parse().map_err(to_py)?;
        let mut diag = Diagnostics::new();
        let (first, second) = self
            .inner
            .get_mode_grads(
                theta.view(),
                &t_grid,
                &selection(modes)?,
                out_type,
                grad_var,
                &mut diag,
            )
            .map_err(to_py)?;
        let dict = PyDict::new(py);
        dict.set_item("first", rows4(&first))?;
        dict.set_item("second", rows4(&second))?;
        dict.set_item("warnings", diag.into_messages())?;
        Ok(dict.into())
    }

    /// Precessing modes for rows `(m1, m2, s1x, s1y, s1z, s2x, s2y, s2z)`.
    #[pyo3(signature = (
        theta,
        t_grid,
        modes,
        alpha0 = None,
        gamma0 = None,
        l0_frame = false,
        f_ref = None,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn get_twisted_modes(
        &self,
        py: Python<'_>,
        theta: Vec<Vec<f64>>,
        t_grid: Vec<f64>,
        modes: Vec<(u32, i32)>,
        alpha0: Option<f64>,
        gamma0: Option<f64>,
        l0_frame: bool,
        f_ref: Option<f64>,
    ) -> PyResult<PyObject> {
        let theta = to_matrix(theta)?;
        let modes = to_modes(modes)?;
        let options = TwistOptions {
            alpha0,
            gamma0,
            l0_frame,
            reference_frequency: f_ref,
        };
        let mut diag = Diagnostics::new();
        let twisted = self
            .inner
            .get_twisted_modes(theta.view(), &t_grid, &modes, &options, &mut diag)
            .map_err(to_py)?;
        let dict = PyDict::new(py);
        dict.set_item("real", rows3(&twisted.real))?;
        dict.set_item("imag", rows3(&twisted.imag))?;
        dict.set_item("alpha", rows2(&twisted.angles.alpha))?;
        dict.set_item("beta", rows2(&twisted.angles.beta))?;
        dict.set_item("gamma", rows2(&twisted.angles.gamma))?;
        dict.set_item("warnings", diag.into_messages())?;
        Ok(dict.into())
    }

    /// Orbital frequency (Hz) at the amplitude peak, one per row.
    fn merger_frequency(&self, theta: Vec<Vec<f64>>) -> PyResult<Vec<f64>> {
        let theta = to_matrix(theta)?;
        let mut diag = Diagnostics::new();
        self.inner.merger_frequency(theta.view(), &mut diag).map_err(to_py)
    }

    /// Time (s) before merger at which the (2,2) frequency equals `f`.
    fn merger_time(&self, f: f64, theta: Vec<Vec<f64>>) -> PyResult<Vec<f64>> {
        let theta = to_matrix(theta)?;
        let mut diag = Diagnostics::new();
        self.inner.merger_time(f, theta.view(), &mut diag).map_err(to_py)
    }

    fn __repr__(&self) -> String {
        let modes: Vec<String> = self.inner.list_modes().iter().map(Mode::to_string).collect();
        format!("WaveformGenerator(modes=[{}])", modes.join(", "))
    }
}

// ─── Module Registration ────────────────────────────────────────────

#[pymodule]
fn chirp_kernel(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyGeneratorConfig>()?;
    m.add_class::<PyWaveformGenerator>()?;
    Ok(())
}
