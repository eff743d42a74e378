// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Recoverable Diagnostics
// ─────────────────────────────────────────────────────────────────────
//! Explicit channel for recoverable data-quality issues.
//!
//! Operations that can degrade gracefully take a `&mut Diagnostics` and
//! record what happened and which fallback was applied. Every record is
//! also forwarded to `log::warn!`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a recoverable issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Requested (l, m) is not in the registry; the mode is skipped.
    UnknownMode,
    /// User grid starts before the model grid; amplitude is zero there.
    GridExtrapolation,
    /// In-plane spin components given to a z-spin-only interface.
    IgnoredSpinComponents,
    /// README metadata is not a string map; it is ignored.
    MalformedMetadata,
    /// A directory in the model folder is not a valid mode name.
    InvalidModeFolder,
    /// A residual regressor has no coefficient file; it is not loaded.
    MissingResidualCoefficients,
    /// A known singular point (e.g. η = 1/4) produced non-finite values.
    NumericalSingularity,
    /// Caller reference frequency differs from the model's own.
    ReferenceFrequencyMismatch,
    /// No non-precessing mode exists for a requested l; output is zero.
    MissingNonPrecessingModes,
}

/// A single recoverable issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Ordered collection of diagnostics produced by one or more calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an issue and forward it to the log.
    pub fn push(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{kind:?}: {message}");
        self.entries.push(Diagnostic { kind, message });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry of `kind` was recorded.
    pub fn contains(&self, kind: DiagnosticKind) -> bool {
        self.entries.iter().any(|d| d.kind == kind)
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    /// Move all entries of `other` into `self`.
    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn into_messages(self) -> Vec<String> {
        self.entries.into_iter().map(|d| d.to_string()).collect()
    }
}
