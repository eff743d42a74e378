// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Model Directory Store
// ─────────────────────────────────────────────────────────────────────
//! On-disk layout of a trained model:
//!
//! ```text
//! <model>/
//!   README                 JSON string map (optional)
//!   angles/model.json      angle-trend model (optional)
//!   22/                    one directory per mode, named "lm"
//!     times                canonical grid, whitespace text, '#' comments
//!     amp_pca.json  ph_pca.json
//!     amp_predictor.json  ph_predictor.json
//!     README               (optional)
//!   21/ ...
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use chirp_rom::artifact::{read_json, write_json};
use chirp_rom::Predictor;
use chirp_types::{ChirpError, ChirpResult, DiagnosticKind, Diagnostics, GeneratorConfig, Mode};

use crate::composer::WaveformComposer;
use crate::mode_generator::ModeGenerator;

pub const README: &str = "README";
pub const ANGLES_DIR: &str = "angles";
pub const ANGLE_MODEL_FILE: &str = "model.json";
pub const TIMES_FILE: &str = "times";
pub const AMP_PCA_FILE: &str = "amp_pca.json";
pub const PH_PCA_FILE: &str = "ph_pca.json";
pub const AMP_PREDICTOR_FILE: &str = "amp_predictor.json";
pub const PH_PREDICTOR_FILE: &str = "ph_predictor.json";

/// Modes stored under `path`, in ascending `(l, m)` order.
///
/// Directories whose names do not parse as a mode are skipped with an
/// [`DiagnosticKind::InvalidModeFolder`] entry.
pub fn list_modes(path: &Path, diag: &mut Diagnostics) -> ChirpResult<BTreeSet<Mode>> {
    let entries = fs::read_dir(path).map_err(|e| ChirpError::artifact(path, e.to_string()))?;
    let mut modes = BTreeSet::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == ANGLES_DIR {
            continue;
        }
        match Mode::from_folder_name(&name) {
            Some(mode) => {
                modes.insert(mode);
            }
            None => diag.push(
                DiagnosticKind::InvalidModeFolder,
                format!("folder '{name}' is not a valid mode name, skipping it"),
            ),
        }
    }
    Ok(modes)
}

/// String map from a `README` file. A missing file gives an empty map, a
/// malformed one an empty map plus a diagnostic.
pub fn read_metadata(path: &Path, diag: &mut Diagnostics) -> BTreeMap<String, String> {
    let Ok(text) = fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    match serde_json::from_str(&text) {
        Ok(map) => map,
        Err(e) => {
            diag.push(
                DiagnosticKind::MalformedMetadata,
                format!("{}: {e}; metadata ignored", path.display()),
            );
            BTreeMap::new()
        }
    }
}

pub fn write_metadata(path: &Path, metadata: &BTreeMap<String, String>) -> ChirpResult<()> {
    if metadata.is_empty() {
        return Ok(());
    }
    write_json(path, metadata)
}

/// Canonical grid: whitespace-separated numbers, `#` starts a comment.
pub fn read_times(path: &Path) -> ChirpResult<Vec<f64>> {
    let text = fs::read_to_string(path).map_err(|e| ChirpError::artifact(path, e.to_string()))?;
    let mut times = Vec::new();
    for line in text.lines() {
        let content = line.split('#').next().unwrap_or("");
        for token in content.split_whitespace() {
            let value = token.parse::<f64>().map_err(|e| {
                ChirpError::artifact(path, format!("bad time value '{token}': {e}"))
            })?;
            times.push(value);
        }
    }
    if times.is_empty() {
        return Err(ChirpError::artifact(path, "time grid is empty"));
    }
    Ok(times)
}

pub fn write_times(path: &Path, times: &[f64]) -> ChirpResult<()> {
    let mut text = String::from("# canonical time grid (s/M_sun)\n");
    for t in times {
        text.push_str(&format!("{t:e}\n"));
    }
    fs::write(path, text).map_err(|e| ChirpError::artifact(path, e.to_string()))
}

/// Load one mode directory.
pub fn load_mode(dir: &Path, mode: Mode, diag: &mut Diagnostics) -> ChirpResult<ModeGenerator> {
    log::debug!("loading mode {mode} from {}", dir.display());
    let times = read_times(&dir.join(TIMES_FILE))?;
    let amp_predictor = read_json::<Predictor>(&dir.join(AMP_PREDICTOR_FILE))?.prepare(diag)?;
    let ph_predictor = read_json::<Predictor>(&dir.join(PH_PREDICTOR_FILE))?.prepare(diag)?;
    let gen = ModeGenerator::new(
        mode,
        times,
        read_json(&dir.join(AMP_PCA_FILE))?,
        read_json(&dir.join(PH_PCA_FILE))?,
        amp_predictor,
        ph_predictor,
    )?;
    Ok(gen.with_metadata(read_metadata(&dir.join(README), diag)))
}

pub fn save_mode(dir: &Path, gen: &ModeGenerator) -> ChirpResult<()> {
    fs::create_dir_all(dir).map_err(|e| ChirpError::artifact(dir, e.to_string()))?;
    write_times(&dir.join(TIMES_FILE), gen.times())?;
    write_json(&dir.join(AMP_PCA_FILE), gen.amp_rom())?;
    write_json(&dir.join(PH_PCA_FILE), gen.ph_rom())?;
    write_json(&dir.join(AMP_PREDICTOR_FILE), gen.amp_predictor())?;
    write_json(&dir.join(PH_PREDICTOR_FILE), gen.ph_predictor())?;
    write_metadata(&dir.join(README), gen.metadata())
}

/// Load every mode under `path` plus the optional angle-trend model.
pub fn load_model(
    path: &Path,
    config: GeneratorConfig,
    diag: &mut Diagnostics,
) -> ChirpResult<WaveformComposer> {
    if !path.is_dir() {
        return Err(ChirpError::artifact(path, "model directory not found"));
    }
    log::info!("loading model from {}", path.display());
    let modes = list_modes(path, diag)?;
    if modes.is_empty() {
        return Err(ChirpError::artifact(path, "no mode directories found"));
    }
    let generators = modes
        .into_iter()
        .map(|mode| load_mode(&path.join(mode.folder_name()), mode, diag))
        .collect::<ChirpResult<Vec<_>>>()?;

    let angle_path = path.join(ANGLES_DIR).join(ANGLE_MODEL_FILE);
    let angle_model = if angle_path.is_file() {
        Some(read_json(&angle_path)?)
    } else {
        log::info!("no angle-trend model at {}; precession disabled", angle_path.display());
        None
    };

    let metadata = read_metadata(&path.join(README), diag);
    let composer = WaveformComposer::new(config, generators, angle_model)?.with_metadata(metadata);
    log::info!("loaded modes {:?}", composer.list_modes());
    Ok(composer)
}

/// Write `composer` in the layout read by [`load_model`].
pub fn save_model(composer: &WaveformComposer, path: &Path) -> ChirpResult<()> {
    fs::create_dir_all(path).map_err(|e| ChirpError::artifact(path, e.to_string()))?;
    for gen in composer.generators() {
        save_mode(&path.join(gen.mode().folder_name()), gen)?;
    }
    if let Some(model) = composer.angle_model() {
        let dir = path.join(ANGLES_DIR);
        fs::create_dir_all(&dir).map_err(|e| ChirpError::artifact(&dir, e.to_string()))?;
        write_json(&dir.join(ANGLE_MODEL_FILE), model)?;
    }
    write_metadata(&path.join(README), composer.metadata())?;
    log::info!("saved model to {}", path.display());
    Ok(())
}
