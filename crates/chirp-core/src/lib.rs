// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Waveform Synthesis Core
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Reduced-order synthesis of binary black hole merger waveforms.
//!
//! ```text
//! theta ─ normalize ─> (m1, m2, s1z, s2z) ─ ModeGenerator ─> (A, φ) per mode
//!       ─ spherical harmonics ─> (h+, h×)
//!       ─ angle-trend model + Wigner D ─> precessing modes
//! ```
//!
//! # Invariants
//!
//! 1. **Pure queries**: every [`WaveformComposer`] method depends only on
//!    the loaded model and its arguments; rows are processed
//!    independently and in parallel.
//!
//! 2. **No silent fallbacks**: recoverable issues (unknown modes, grid
//!    extrapolation, ignored spins) are recorded in the caller's
//!    [`chirp_types::Diagnostics`] and logged; contract violations are
//!    errors.
//!
//! 3. **Symmetric in the bodies**: exchanging the two bodies (masses and
//!    spins) leaves every mode unchanged.

pub mod composer;
pub mod fixtures;
pub mod harmonics;
pub mod interp;
pub mod mode_generator;
pub mod precession;
pub mod store;
pub mod wigner;

pub use composer::{ModeSelection, TwistOptions, TwistedModes, WaveformComposer};
pub use harmonics::{spherical_harmonic, wigner_d, PolarizationWeights};
pub use mode_generator::ModeGenerator;
pub use precession::{AngleTrendModel, BinarySpins, EulerAngleTrack, PrecessingParams};
pub use wigner::{twist, wigner_d_matrix, AngleSamples};
