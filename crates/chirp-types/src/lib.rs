// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Shared Types
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Type definitions, configuration, diagnostics and error hierarchy for
//! the Chirp Kernel waveform engine.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod mode;
pub mod params;

pub use config::GeneratorConfig;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{ChirpError, ChirpResult};
pub use mode::Mode;
pub use params::{
    CanonicalParams, GradVariables, OutType, PhysicalParams, StandardParams,
    REFERENCE_TOTAL_MASS,
};
