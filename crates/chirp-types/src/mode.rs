// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Spherical-Harmonic Mode Index
// ─────────────────────────────────────────────────────────────────────

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ChirpError, ChirpResult};

/// One spherical-harmonic multipole `(l, m)` with `l ≥ |m|`.
///
/// Ordered by `l` then `m`, so registries iterate in a stable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Mode {
    pub l: u32,
    pub m: i32,
}

impl Mode {
    /// The dominant quadrupole mode.
    pub const L2M2: Mode = Mode { l: 2, m: 2 };

    pub fn new(l: u32, m: i32) -> ChirpResult<Self> {
        if m.unsigned_abs() > l {
            return Err(ChirpError::Validation(format!(
                "invalid mode ({l},{m}): |m| must not exceed l"
            )));
        }
        Ok(Self { l, m })
    }

    /// Parse a mode directory name: the first two characters are the
    /// digits `l` and `m` with `l >= m`.
    pub fn from_folder_name(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        let l = chars.next()?.to_digit(10)?;
        let m = chars.next()?.to_digit(10)?;
        if l < m {
            return None;
        }
        Some(Self { l, m: m as i32 })
    }

    /// Directory name used when persisting this mode.
    pub fn folder_name(&self) -> String {
        format!("{}{}", self.l, self.m)
    }

    /// The `(l, -m)` partner.
    pub fn negative(&self) -> Self {
        Self {
            l: self.l,
            m: -self.m,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.l, self.m)
    }
}

impl TryFrom<(u32, i32)> for Mode {
    type Error = ChirpError;

    fn try_from((l, m): (u32, i32)) -> ChirpResult<Self> {
        Self::new(l, m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_large_m() {
        assert!(Mode::new(2, 3).is_err());
        assert!(Mode::new(2, -3).is_err());
        assert!(Mode::new(3, -3).is_ok());
    }

    #[test]
    fn test_folder_name_parsing() {
        assert_eq!(Mode::from_folder_name("22"), Some(Mode::L2M2));
        assert_eq!(Mode::from_folder_name("21"), Some(Mode { l: 2, m: 1 }));
        assert_eq!(Mode::from_folder_name("20"), Some(Mode { l: 2, m: 0 }));
        assert_eq!(Mode::from_folder_name("12"), None);
        assert_eq!(Mode::from_folder_name("angles"), None);
        assert_eq!(Mode::from_folder_name("3"), None);
    }

    #[test]
    fn test_folder_name_roundtrip() {
        let mode = Mode { l: 4, m: 4 };
        assert_eq!(Mode::from_folder_name(&mode.folder_name()), Some(mode));
    }

    #[test]
    fn test_ordering() {
        let mut modes = vec![
            Mode { l: 3, m: 3 },
            Mode { l: 2, m: 2 },
            Mode { l: 2, m: 1 },
        ];
        modes.sort();
        assert_eq!(
            modes,
            vec![Mode { l: 2, m: 1 }, Mode { l: 2, m: 2 }, Mode { l: 3, m: 3 }]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Mode { l: 3, m: -2 }.to_string(), "(3,-2)");
    }
}
