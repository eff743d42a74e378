// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Feature Augmentation
// ─────────────────────────────────────────────────────────────────────
//! Basis-function expansion of regressor inputs.
//!
//! The output of a [`FeatureSet`] is the base columns (selected columns
//! replaced by their logarithm) followed by the extra features, in
//! declaration order:
//!
//!   - `"01"`, `"112"`: product of the named base columns
//!   - `"2nd_poly"` .. `"5th_poly"`: every monomial of that degree in the
//!     base columns, lexicographic in column index
//!
//! Every output feature is a monomial in the transformed base columns,
//! which gives a closed-form Jacobian with respect to the raw inputs.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};

use chirp_types::{ChirpError, ChirpResult};

/// One extra feature appended after the base columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExtraFeature {
    /// Product of base columns, e.g. `"01"` = x0·x1.
    Product(Vec<usize>),
    /// All monomials of the given degree (2..=5).
    Polynomial(usize),
}

const POLY_NAMES: [(&str, usize); 4] = [
    ("2nd_poly", 2),
    ("3rd_poly", 3),
    ("4th_poly", 4),
    ("5th_poly", 5),
];

impl FromStr for ExtraFeature {
    type Err = ChirpError;

    fn from_str(s: &str) -> ChirpResult<Self> {
        if let Some(&(_, degree)) = POLY_NAMES.iter().find(|(name, _)| *name == s) {
            return Ok(Self::Polynomial(degree));
        }
        if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
            let columns = s
                .chars()
                .filter_map(|c| c.to_digit(10))
                .map(|d| d as usize)
                .collect();
            return Ok(Self::Product(columns));
        }
        Err(ChirpError::Load(format!("unknown feature '{s}'")))
    }
}

impl TryFrom<String> for ExtraFeature {
    type Error = ChirpError;

    fn try_from(s: String) -> ChirpResult<Self> {
        s.parse()
    }
}

impl fmt::Display for ExtraFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Product(columns) => {
                for c in columns {
                    write!(f, "{c}")?;
                }
                Ok(())
            }
            Self::Polynomial(degree) => {
                let name = POLY_NAMES
                    .iter()
                    .find(|(_, d)| d == degree)
                    .map_or("poly", |(name, _)| *name);
                f.write_str(name)
            }
        }
    }
}

impl From<ExtraFeature> for String {
    fn from(feature: ExtraFeature) -> Self {
        feature.to_string()
    }
}

/// Feature recipe of one regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Number of raw input columns.
    pub n_inputs: usize,
    /// Base columns replaced by their natural logarithm.
    #[serde(default)]
    pub log_columns: Vec<usize>,
    #[serde(default)]
    pub extras: Vec<ExtraFeature>,
}

impl FeatureSet {
    /// Raw inputs passed through unchanged.
    pub fn identity(n_inputs: usize) -> Self {
        Self {
            n_inputs,
            log_columns: Vec::new(),
            extras: Vec::new(),
        }
    }

    /// The usual recipe for `(q, s1, s2)`: log of the mass ratio plus extras.
    pub fn mass_ratio_log(extras: Vec<ExtraFeature>) -> Self {
        Self {
            n_inputs: 3,
            log_columns: vec![0],
            extras,
        }
    }

    pub fn validate(&self) -> ChirpResult<()> {
        if self.n_inputs == 0 {
            return Err(ChirpError::Load("feature set has no inputs".into()));
        }
        if let Some(&c) = self.log_columns.iter().find(|&&c| c >= self.n_inputs) {
            return Err(ChirpError::Load(format!(
                "log column {c} out of range for {} inputs",
                self.n_inputs
            )));
        }
        for extra in &self.extras {
            match extra {
                ExtraFeature::Product(columns) => {
                    if columns.is_empty() || columns.iter().any(|&c| c >= self.n_inputs) {
                        return Err(ChirpError::Load(format!(
                            "feature '{extra}' references a column outside 0..{}",
                            self.n_inputs
                        )));
                    }
                }
                ExtraFeature::Polynomial(degree) => {
                    if !(2..=5).contains(degree) {
                        return Err(ChirpError::Load(format!(
                            "polynomial degree {degree} not supported"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Output features as monomials: each entry lists the base columns
    /// multiplied together.
    pub fn terms(&self) -> Vec<Vec<usize>> {
        let mut terms: Vec<Vec<usize>> = (0..self.n_inputs).map(|c| vec![c]).collect();
        for extra in &self.extras {
            match extra {
                ExtraFeature::Product(columns) => terms.push(columns.clone()),
                ExtraFeature::Polynomial(degree) => {
                    monomials(self.n_inputs, *degree, 0, &mut Vec::new(), &mut terms)
                }
            }
        }
        terms
    }

    pub fn n_features(&self) -> usize {
        self.terms().len()
    }

    /// Expand N × n_inputs raw inputs into N × F features.
    pub fn augment(&self, x: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        let base = self.transformed_base(x)?;
        let terms = self.terms();
        let mut out = Array2::zeros((x.nrows(), terms.len()));
        for (mut out_row, base_row) in out.outer_iter_mut().zip(base.outer_iter()) {
            for (f, term) in terms.iter().enumerate() {
                out_row[f] = term.iter().map(|&c| base_row[c]).product();
            }
        }
        Ok(out)
    }

    /// Jacobian of the expansion, N × F × n_inputs, with respect to the
    /// raw (untransformed) inputs.
    pub fn jacobian(&self, x: ArrayView2<'_, f64>) -> ChirpResult<Array3<f64>> {
        let base = self.transformed_base(x)?;
        let terms = self.terms();
        let mut jac = Array3::zeros((x.nrows(), terms.len(), self.n_inputs));
        for (n, (base_row, raw_row)) in base.outer_iter().zip(x.outer_iter()).enumerate() {
            let chain: Vec<f64> = (0..self.n_inputs)
                .map(|c| {
                    if self.log_columns.contains(&c) {
                        1.0 / raw_row[c]
                    } else {
                        1.0
                    }
                })
                .collect();
            for (f, term) in terms.iter().enumerate() {
                for p in 0..term.len() {
                    let rest: f64 = term
                        .iter()
                        .enumerate()
                        .filter(|&(r, _)| r != p)
                        .map(|(_, &c)| base_row[c])
                        .product();
                    let c = term[p];
                    jac[[n, f, c]] += rest * chain[c];
                }
            }
        }
        Ok(jac)
    }

    fn transformed_base(&self, x: ArrayView2<'_, f64>) -> ChirpResult<Array2<f64>> {
        if x.ncols() != self.n_inputs {
            return Err(ChirpError::Dimension(format!(
                "features expect {} input columns, got {}",
                self.n_inputs,
                x.ncols()
            )));
        }
        let mut base = x.to_owned();
        for &c in &self.log_columns {
            for v in base.column_mut(c).iter_mut() {
                if *v <= 0.0 {
                    return Err(ChirpError::Numerical(format!(
                        "log feature of non-positive input {v} in column {c}"
                    )));
                }
                *v = v.ln();
            }
        }
        Ok(base)
    }
}

/// Non-decreasing column tuples of length `degree`, starting at `start`.
fn monomials(
    n_inputs: usize,
    degree: usize,
    start: usize,
    prefix: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    if prefix.len() == degree {
        out.push(prefix.clone());
        return;
    }
    for c in start..n_inputs {
        prefix.push(c);
        monomials(n_inputs, degree, c, prefix, out);
        prefix.pop();
    }
}
