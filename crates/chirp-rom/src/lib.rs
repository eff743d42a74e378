// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Reduced-Order Models & Regressors
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Linear reduced-order models (PCA), feature augmentation and the
//! coefficient regressors that map source parameters to reduced
//! coefficients.
//!
//! Pipeline per mode and per quantity (amplitude or phase):
//!
//! ```text
//! (q, s1, s2) ─ FeatureSet ─> features ─ regressor ─> g (K) ─ ROM ─> series (D)
//! ```

pub mod artifact;
pub mod features;
pub mod moe;
pub mod nn;
pub mod pca;
pub mod predictor;
pub mod scaler;

pub use features::{ExtraFeature, FeatureSet};
pub use moe::MixtureOfExperts;
pub use nn::{Activation, DenseLayer, DenseNetwork};
pub use pca::ReducedOrderModel;
pub use predictor::{
    CoefficientPredictor, ComponentTable, EnsemblePredictor, MixturePredictor, Predictor,
    RegressionFamily, RegressorBlock, ResidualBlock,
};
pub use scaler::StandardScaler;
