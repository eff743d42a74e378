// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — JSON Artifact I/O
// ─────────────────────────────────────────────────────────────────────
//! Reading and writing serde-serializable model artifacts. Failures
//! carry the offending path.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use chirp_types::{ChirpError, ChirpResult};

/// Deserialize a JSON artifact from `path`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> ChirpResult<T> {
    let file = File::open(path).map_err(|e| ChirpError::artifact(path, e.to_string()))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| ChirpError::artifact(path, e.to_string()))
}

/// Serialize `value` as pretty-printed JSON to `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> ChirpResult<()> {
    let file = File::create(path).map_err(|e| ChirpError::artifact(path, e.to_string()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| ChirpError::artifact(path, e.to_string()))?;
    writer
        .flush()
        .map_err(|e| ChirpError::artifact(path, e.to_string()))
}

/// Convert a row-major nested vector into a rectangular matrix.
pub(crate) fn matrix_from_rows(
    rows: Vec<Vec<f64>>,
    what: &str,
) -> ChirpResult<ndarray::Array2<f64>> {
    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, Vec::len);
    if n_rows == 0 || n_cols == 0 {
        return Err(ChirpError::Load(format!("{what}: empty matrix")));
    }
    if let Some(bad) = rows.iter().position(|r| r.len() != n_cols) {
        return Err(ChirpError::Load(format!(
            "{what}: row {bad} has {} entries, expected {n_cols}",
            rows[bad].len()
        )));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    ndarray::Array2::from_shape_vec((n_rows, n_cols), flat)
        .map_err(|e| ChirpError::Load(format!("{what}: {e}")))
}

pub(crate) fn matrix_to_rows(m: &ndarray::Array2<f64>) -> Vec<Vec<f64>> {
    m.outer_iter().map(|r| r.to_vec()).collect()
}
