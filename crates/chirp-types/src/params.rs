// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Source Parameter Layouts
// ─────────────────────────────────────────────────────────────────────
//! Parameter layouts accepted at the query surface and their reduction to
//! the canonical seven-field form and to standardized model inputs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::{ChirpError, ChirpResult};

/// Total mass (M☉) at which mode models are trained.
pub const REFERENCE_TOTAL_MASS: f64 = 20.0;

/// Widths accepted by [`CanonicalParams::from_row`].
pub const ACCEPTED_WIDTHS: [usize; 6] = [3, 4, 5, 6, 7, 14];

/// Standardized model input: mass ratio `q ≥ 1` and aligned spins, with
/// body 1 the heavier one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardParams {
    pub q: f64,
    pub s1: f64,
    pub s2: f64,
}

impl StandardParams {
    /// Standardize from component masses. Returns the parameters and
    /// whether the bodies were exchanged.
    ///
    /// `q` is always the larger mass over the smaller one, so exchanging
    /// the two bodies yields bitwise identical parameters.
    pub fn from_masses(m1: f64, m2: f64, s1: f64, s2: f64) -> (Self, bool) {
        if m1 < m2 {
            (
                Self {
                    q: m2 / m1,
                    s1: s2,
                    s2: s1,
                },
                true,
            )
        } else {
            (Self { q: m1 / m2, s1, s2 }, false)
        }
    }

    /// Standardize an already reduced triple `(q, s1, s2)`.
    pub fn from_reduced(q: f64, s1: f64, s2: f64) -> (Self, bool) {
        if q < 1.0 {
            (
                Self {
                    q: 1.0 / q,
                    s1: s2,
                    s2: s1,
                },
                true,
            )
        } else {
            (Self { q, s1, s2 }, false)
        }
    }

    /// Symmetric mass ratio `q / (1 + q)²`.
    pub fn eta(&self) -> f64 {
        self.q / ((1.0 + self.q) * (1.0 + self.q))
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.q, self.s1, self.s2]
    }
}

/// The seven active source parameters
/// `[m1, m2, s1z, s2z, D_L, iota, phi0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanonicalParams {
    pub m1: f64,
    pub m2: f64,
    pub s1z: f64,
    pub s2z: f64,
    pub distance: f64,
    pub inclination: f64,
    pub phase: f64,
}

impl CanonicalParams {
    /// Normalize one row of any accepted layout:
    ///
    /// - 3: `[q, s1z, s2z]` at `reference_mass`
    /// - 4: `[m1, m2, s1z, s2z]`
    /// - 5: `+ D_L`
    /// - 6: `+ iota`
    /// - 7: `+ phi0`
    /// - 14: the full [`PhysicalParams`] row
    ///
    /// Missing trailing fields default to `D_L = 1`, `iota = phi0 = 0`.
    pub fn from_row(
        row: &[f64],
        reference_mass: f64,
        diag: &mut Diagnostics,
    ) -> ChirpResult<Self> {
        let params = match row.len() {
            3 => {
                let q = row[0];
                Self {
                    m1: q * reference_mass / (1.0 + q),
                    m2: reference_mass / (1.0 + q),
                    s1z: row[1],
                    s2z: row[2],
                    distance: 1.0,
                    inclination: 0.0,
                    phase: 0.0,
                }
            }
            4..=7 => Self {
                m1: row[0],
                m2: row[1],
                s1z: row[2],
                s2z: row[3],
                distance: row.get(4).copied().unwrap_or(1.0),
                inclination: row.get(5).copied().unwrap_or(0.0),
                phase: row.get(6).copied().unwrap_or(0.0),
            },
            14 => {
                let physical = PhysicalParams::from_slice(row)?;
                return physical.to_canonical(diag);
            }
            d => {
                return Err(ChirpError::Validation(format!(
                    "unsupported parameter layout with {d} fields, expected one of {ACCEPTED_WIDTHS:?}"
                )))
            }
        };
        params.validate()?;
        Ok(params)
    }

    /// Reject non-physical values.
    pub fn validate(&self) -> ChirpResult<()> {
        if !(self.m1.is_finite() && self.m2.is_finite()) || self.m1 <= 0.0 || self.m2 <= 0.0 {
            return Err(ChirpError::Validation(format!(
                "masses must be positive and finite, got m1 = {}, m2 = {}",
                self.m1, self.m2
            )));
        }
        check_spin("s1z", self.s1z)?;
        check_spin("s2z", self.s2z)?;
        if !self.distance.is_finite() || self.distance <= 0.0 {
            return Err(ChirpError::Validation(format!(
                "luminosity distance must be positive, got {}",
                self.distance
            )));
        }
        if !(self.inclination.is_finite() && self.phase.is_finite()) {
            return Err(ChirpError::Validation(
                "inclination and reference phase must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn total_mass(&self) -> f64 {
        self.m1 + self.m2
    }

    /// `[m1, m2, s1z, s2z]`, the intrinsic part.
    pub fn intrinsic(&self) -> [f64; 4] {
        [self.m1, self.m2, self.s1z, self.s2z]
    }

    pub fn standardize(&self) -> (StandardParams, bool) {
        StandardParams::from_masses(self.m1, self.m2, self.s1z, self.s2z)
    }

    pub fn to_array(&self) -> [f64; 7] {
        [
            self.m1,
            self.m2,
            self.s1z,
            self.s2z,
            self.distance,
            self.inclination,
            self.phase,
        ]
    }
}

fn check_spin(name: &str, value: f64) -> ChirpResult<()> {
    if value.is_nan() || !(-1.0..=1.0).contains(&value) {
        return Err(ChirpError::Validation(format!(
            "spin component {name} = {value} outside [-1, 1]"
        )));
    }
    Ok(())
}

/// Full physical parameter set of a quasi-circular binary.
///
/// Only the canonical seven fields drive the models; the in-plane spins
/// are reported when non-zero and the orbital elements are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalParams {
    pub m1: f64,
    pub m2: f64,
    pub s1: [f64; 3],
    pub s2: [f64; 3],
    pub distance: f64,
    pub inclination: f64,
    pub phase: f64,
    pub long_asc_nodes: f64,
    pub eccentricity: f64,
    pub mean_per_ano: f64,
}

impl PhysicalParams {
    pub fn from_slice(row: &[f64]) -> ChirpResult<Self> {
        if row.len() != 14 {
            return Err(ChirpError::Dimension(format!(
                "physical parameters need 14 fields, got {}",
                row.len()
            )));
        }
        Ok(Self {
            m1: row[0],
            m2: row[1],
            s1: [row[2], row[3], row[4]],
            s2: [row[5], row[6], row[7]],
            distance: row[8],
            inclination: row[9],
            phase: row[10],
            long_asc_nodes: row[11],
            eccentricity: row[12],
            mean_per_ano: row[13],
        })
    }

    pub fn to_array(&self) -> [f64; 14] {
        [
            self.m1,
            self.m2,
            self.s1[0],
            self.s1[1],
            self.s1[2],
            self.s2[0],
            self.s2[1],
            self.s2[2],
            self.distance,
            self.inclination,
            self.phase,
            self.long_asc_nodes,
            self.eccentricity,
            self.mean_per_ano,
        ]
    }

    /// Project to the canonical layout, recording discarded in-plane spins.
    pub fn to_canonical(&self, diag: &mut Diagnostics) -> ChirpResult<CanonicalParams> {
        for (name, value) in [
            ("s1x", self.s1[0]),
            ("s1y", self.s1[1]),
            ("s2x", self.s2[0]),
            ("s2y", self.s2[1]),
        ] {
            check_spin(name, value)?;
        }
        let in_plane = [self.s1[0], self.s1[1], self.s2[0], self.s2[1]];
        if in_plane.iter().any(|&s| s != 0.0) {
            diag.push(
                DiagnosticKind::IgnoredSpinComponents,
                format!(
                    "in-plane spins (s1x, s1y, s2x, s2y) = {in_plane:?} are not supported and were set to zero"
                ),
            );
        }
        let canonical = CanonicalParams {
            m1: self.m1,
            m2: self.m2,
            s1z: self.s1[2],
            s2z: self.s2[2],
            distance: self.distance,
            inclination: self.inclination,
            phase: self.phase,
        };
        canonical.validate()?;
        Ok(canonical)
    }
}

/// Representation of a generated mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OutType {
    /// Amplitude and phase.
    #[default]
    AmpPhase,
    /// Real and imaginary part.
    RealImag,
}

impl FromStr for OutType {
    type Err = ChirpError;

    fn from_str(s: &str) -> ChirpResult<Self> {
        match s {
            "ampph" => Ok(Self::AmpPhase),
            "realimag" => Ok(Self::RealImag),
            other => Err(ChirpError::Validation(format!(
                "unknown output type '{other}', expected 'ampph' or 'realimag'"
            ))),
        }
    }
}

impl fmt::Display for OutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AmpPhase => "ampph",
            Self::RealImag => "realimag",
        })
    }
}

/// Variables that mode gradients are expressed in. The last two
/// components are always the aligned spins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GradVariables {
    /// `(M, q, s1, s2)`.
    #[default]
    TotalMassMassRatio,
    /// `(Mc, η, s1, s2)`.
    ChirpMassSymmetricMassRatio,
    /// `(m1, m2, s1, s2)`.
    Mass1Mass2,
}

impl FromStr for GradVariables {
    type Err = ChirpError;

    fn from_str(s: &str) -> ChirpResult<Self> {
        match s {
            "M_q" => Ok(Self::TotalMassMassRatio),
            "mchirp_eta" => Ok(Self::ChirpMassSymmetricMassRatio),
            "m1_m2" => Ok(Self::Mass1Mass2),
            other => Err(ChirpError::Validation(format!(
                "unknown gradient variables '{other}', expected 'M_q', 'mchirp_eta' or 'm1_m2'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardize_swaps_lighter_primary() {
        let (a, swapped_a) = StandardParams::from_masses(10.0, 30.0, 0.1, -0.4);
        let (b, swapped_b) = StandardParams::from_masses(30.0, 10.0, -0.4, 0.1);
        assert!(swapped_a);
        assert!(!swapped_b);
        assert_eq!(a, b);
        assert_eq!(a.q, 3.0);
    }

    #[test]
    fn test_from_reduced_inverts_small_q() {
        let (p, swapped) = StandardParams::from_reduced(0.5, 0.2, 0.3);
        assert!(swapped);
        assert_eq!(p.q, 2.0);
        assert_eq!((p.s1, p.s2), (0.3, 0.2));
    }

    #[test]
    fn test_layout_3_fixes_reference_mass() {
        let mut diag = Diagnostics::new();
        let p = CanonicalParams::from_row(&[3.0, 0.1, 0.2], 20.0, &mut diag).unwrap();
        assert!((p.m1 - 15.0).abs() < 1e-12);
        assert!((p.m2 - 5.0).abs() < 1e-12);
        assert_eq!(p.distance, 1.0);
        assert_eq!(p.inclination, 0.0);
    }

    #[test]
    fn test_layout_3_matches_layout_7() {
        let mut diag = Diagnostics::new();
        let a = CanonicalParams::from_row(&[3.0, 0.1, 0.2], 20.0, &mut diag).unwrap();
        let b = CanonicalParams::from_row(&[15.0, 5.0, 0.1, 0.2, 1.0, 0.0, 0.0], 20.0, &mut diag)
            .unwrap();
        let (sa, _) = a.standardize();
        let (sb, _) = b.standardize();
        assert!((sa.q - sb.q).abs() < 1e-12);
        assert_eq!(a.total_mass(), b.total_mass());
    }

    #[test]
    fn test_layout_padding() {
        let mut diag = Diagnostics::new();
        let p = CanonicalParams::from_row(&[20.0, 10.0, 0.0, 0.0, 400.0], 20.0, &mut diag).unwrap();
        assert_eq!(p.distance, 400.0);
        assert_eq!(p.phase, 0.0);
        let p = CanonicalParams::from_row(&[20.0, 10.0, 0.0, 0.0, 400.0, 0.3], 20.0, &mut diag)
            .unwrap();
        assert_eq!(p.inclination, 0.3);
        assert!(diag.is_empty());
    }

    #[test]
    fn test_layout_14_warns_on_in_plane_spins() {
        let mut diag = Diagnostics::new();
        let row = [
            20.0, 10.0, 0.3, 0.0, 0.1, 0.0, 0.0, -0.2, 100.0, 0.5, 0.1, 1.0, 0.0, 0.0,
        ];
        let p = CanonicalParams::from_row(&row, 20.0, &mut diag).unwrap();
        assert_eq!(p.s1z, 0.1);
        assert_eq!(p.s2z, -0.2);
        assert_eq!(p.distance, 100.0);
        assert_eq!(diag.count(DiagnosticKind::IgnoredSpinComponents), 1);
    }

    #[test]
    fn test_layout_14_silent_when_aligned() {
        let mut diag = Diagnostics::new();
        let row = [
            20.0, 10.0, 0.0, 0.0, 0.1, 0.0, 0.0, -0.2, 100.0, 0.5, 0.1, 1.0, 0.0, 0.0,
        ];
        CanonicalParams::from_row(&row, 20.0, &mut diag).unwrap();
        assert!(diag.is_empty());
    }

    #[test]
    fn test_bad_width_rejected() {
        let mut diag = Diagnostics::new();
        assert!(matches!(
            CanonicalParams::from_row(&[1.0, 2.0], 20.0, &mut diag),
            Err(ChirpError::Validation(_))
        ));
        assert!(CanonicalParams::from_row(&[0.0; 8], 20.0, &mut diag).is_err());
    }

    #[test]
    fn test_spin_out_of_range_rejected() {
        let mut diag = Diagnostics::new();
        assert!(CanonicalParams::from_row(&[20.0, 10.0, 1.2, 0.0], 20.0, &mut diag).is_err());
        let mut row = [0.0; 14];
        row[0] = 20.0;
        row[1] = 10.0;
        row[8] = 1.0;
        row[3] = -1.5;
        assert!(CanonicalParams::from_row(&row, 20.0, &mut diag).is_err());
    }

    #[test]
    fn test_non_positive_mass_rejected() {
        let mut diag = Diagnostics::new();
        assert!(CanonicalParams::from_row(&[0.0, 10.0, 0.0, 0.0], 20.0, &mut diag).is_err());
    }

    #[test]
    fn test_parse_options() {
        assert_eq!("ampph".parse::<OutType>().unwrap(), OutType::AmpPhase);
        assert_eq!("realimag".parse::<OutType>().unwrap(), OutType::RealImag);
        assert!("complex".parse::<OutType>().is_err());
        assert_eq!(
            "mchirp_eta".parse::<GradVariables>().unwrap(),
            GradVariables::ChirpMassSymmetricMassRatio
        );
        assert!("M_eta".parse::<GradVariables>().is_err());
    }
}
