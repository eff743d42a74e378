// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Model Directory Round Trip
// ─────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;
use std::fs;

use approx::assert_abs_diff_eq;
use ndarray::array;
use tempfile::tempdir;

use chirp_core::fixtures::{toy_composer, toy_config};
use chirp_core::store;
use chirp_core::{ModeSelection, TwistOptions, WaveformComposer};
use chirp_types::{DiagnosticKind, Diagnostics, Mode, OutType};

fn grid() -> Vec<f64> {
    chirp_core::interp::linspace(-0.3, 0.02, 400)
}

#[test]
fn test_saved_model_reloads_identically() {
    let mut meta = BTreeMap::new();
    meta.insert("description".to_string(), "toy model".to_string());
    let original = toy_composer().unwrap().with_metadata(meta);
    let dir = tempdir().unwrap();
    original.save(dir.path()).unwrap();

    let mut diag = Diagnostics::new();
    let loaded = WaveformComposer::load(dir.path(), toy_config(), &mut diag).unwrap();
    assert!(diag.is_empty());
    assert_eq!(loaded.list_modes(), original.list_modes());
    assert!(loaded.angle_model().is_some());
    assert_eq!(
        loaded.metadata().get("description").map(String::as_str),
        Some("toy model")
    );

    let theta = array![[30.0, 20.0, 0.3, -0.2, 200.0, 0.6, 0.3]];
    let (hp0, hc0) = original
        .get_wf(theta.view(), &grid(), &ModeSelection::All, &mut diag)
        .unwrap();
    let (hp1, hc1) = loaded
        .get_wf(theta.view(), &grid(), &ModeSelection::All, &mut diag)
        .unwrap();
    assert_eq!(hp0, hp1);
    assert_eq!(hc0, hc1);

    let precessing = array![[30.0, 20.0, 0.4, 0.1, 0.3, -0.2, 0.3, 0.1]];
    let modes = [Mode::L2M2, Mode::new(3, 3).unwrap()];
    let a = original
        .get_twisted_modes(precessing.view(), &grid(), &modes, &TwistOptions::default(), &mut diag)
        .unwrap();
    let b = loaded
        .get_twisted_modes(precessing.view(), &grid(), &modes, &TwistOptions::default(), &mut diag)
        .unwrap();
    assert_abs_diff_eq!(a.real, b.real, epsilon = 1e-14);
    assert_abs_diff_eq!(a.imag, b.imag, epsilon = 1e-14);
}

#[test]
fn test_layout_on_disk() {
    let dir = tempdir().unwrap();
    toy_composer().unwrap().save(dir.path()).unwrap();
    for mode in ["21", "22", "33"] {
        let mode_dir = dir.path().join(mode);
        for file in [
            store::TIMES_FILE,
            store::AMP_PCA_FILE,
            store::PH_PCA_FILE,
            store::AMP_PREDICTOR_FILE,
            store::PH_PREDICTOR_FILE,
        ] {
            assert!(mode_dir.join(file).is_file(), "{mode}/{file} missing");
        }
    }
    assert!(dir
        .path()
        .join(store::ANGLES_DIR)
        .join(store::ANGLE_MODEL_FILE)
        .is_file());
    let predictor = fs::read_to_string(dir.path().join("33").join(store::PH_PREDICTOR_FILE)).unwrap();
    assert!(predictor.contains("\"kind\""));
}

#[test]
fn test_invalid_folder_and_bad_readme_are_diagnostics() {
    let dir = tempdir().unwrap();
    toy_composer().unwrap().save(dir.path()).unwrap();
    fs::create_dir(dir.path().join("scratch")).unwrap();
    fs::write(dir.path().join(store::README), "{ not json").unwrap();

    let mut diag = Diagnostics::new();
    let loaded = WaveformComposer::load(dir.path(), toy_config(), &mut diag).unwrap();
    assert_eq!(loaded.list_modes().len(), 3);
    assert!(diag.contains(DiagnosticKind::InvalidModeFolder));
    assert!(diag.contains(DiagnosticKind::MalformedMetadata));
}

#[test]
fn test_model_without_angles_still_generates() {
    let dir = tempdir().unwrap();
    toy_composer().unwrap().save(dir.path()).unwrap();
    fs::remove_dir_all(dir.path().join(store::ANGLES_DIR)).unwrap();

    let mut diag = Diagnostics::new();
    let loaded = WaveformComposer::load(dir.path(), toy_config(), &mut diag).unwrap();
    assert!(loaded.angle_model().is_none());
    let theta = array![[30.0, 20.0, 0.3, -0.2]];
    let (amp, _) = loaded
        .get_modes(theta.view(), &grid(), &ModeSelection::Dominant, OutType::AmpPhase, &mut diag)
        .unwrap();
    assert!(amp.iter().any(|&a| a > 0.5));
    let precessing = array![[30.0, 20.0, 0.4, 0.1, 0.3, -0.2, 0.3, 0.1]];
    assert!(loaded
        .get_twisted_modes(precessing.view(), &grid(), &[Mode::L2M2], &TwistOptions::default(), &mut diag)
        .is_err());
}

#[test]
fn test_missing_artifact_is_fatal() {
    let dir = tempdir().unwrap();
    toy_composer().unwrap().save(dir.path()).unwrap();
    fs::remove_file(dir.path().join("21").join(store::AMP_PCA_FILE)).unwrap();
    let mut diag = Diagnostics::new();
    let err = WaveformComposer::load(dir.path(), toy_config(), &mut diag).unwrap_err();
    assert!(err.to_string().contains(store::AMP_PCA_FILE));
}
