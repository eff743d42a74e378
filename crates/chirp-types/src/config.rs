// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Generator Configuration
// ─────────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};

use crate::error::{ChirpError, ChirpResult};

/// Runtime configuration for the waveform composer.
///
/// Physical constants live here rather than in code so that models
/// trained with a different reference mass can be served unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Total mass (M☉) at which every mode model is trained.
    /// Default: 20.0.
    pub reference_total_mass: f64,

    /// G/c² · M☉/Mpc, converts reduced amplitude to strain.
    /// Default: 4.7864188273360336e-20.
    pub amplitude_prefactor: f64,

    /// G·M☉/c³ in seconds, used by the precession rate and L/M².
    /// Default: 4.93e-6.
    pub solar_mass_seconds: f64,

    /// Angular momentum is frozen for t > -merger_cutoff (seconds).
    /// Default: 0.05.
    pub merger_cutoff: f64,

    /// Half step (seconds) of the finite differences used for
    /// merger and orbital frequencies. Default: 1e-3.
    pub frequency_step: f64,

    /// Start of the grid scanned by the merger-time search (seconds).
    /// Default: -100.0.
    pub merger_time_start: f64,

    /// End of the grid scanned by the merger-time search (seconds).
    /// Default: 0.0.
    pub merger_time_end: f64,

    /// Number of samples of the merger-time search grid. Default: 1000.
    pub merger_time_samples: usize,

    /// Rows per regressor evaluation batch. Default: 10.
    pub inference_batch_size: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            reference_total_mass: 20.0,
            amplitude_prefactor: 4.786_418_827_336_033_6e-20,
            solar_mass_seconds: 4.93e-6,
            merger_cutoff: 0.05,
            frequency_step: 1e-3,
            merger_time_start: -100.0,
            merger_time_end: 0.0,
            merger_time_samples: 1000,
            inference_batch_size: 10,
        }
    }
}

impl GeneratorConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> ChirpResult<()> {
        require_positive("reference_total_mass", self.reference_total_mass)?;
        require_positive("amplitude_prefactor", self.amplitude_prefactor)?;
        require_positive("solar_mass_seconds", self.solar_mass_seconds)?;
        require_positive("frequency_step", self.frequency_step)?;
        if self.merger_cutoff.is_nan() || self.merger_cutoff < 0.0 {
            return Err(ChirpError::Config(format!(
                "merger_cutoff must be >= 0, got {}",
                self.merger_cutoff
            )));
        }
        if self.merger_time_start.is_nan()
            || self.merger_time_end.is_nan()
            || self.merger_time_start >= self.merger_time_end
        {
            return Err(ChirpError::Config(format!(
                "merger_time_start must be < merger_time_end, got {} >= {}",
                self.merger_time_start, self.merger_time_end
            )));
        }
        if self.merger_time_samples < 2 {
            return Err(ChirpError::Config(format!(
                "merger_time_samples must be >= 2, got {}",
                self.merger_time_samples
            )));
        }
        if self.inference_batch_size == 0 {
            return Err(ChirpError::Config(
                "inference_batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from JSON string. Missing keys take their default value.
    pub fn from_json(json: &str) -> ChirpResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ChirpError::Config(format!("JSON parse error: {e}")))
    }

    /// Merger-time search grid, evenly spaced and inclusive of both ends.
    pub fn merger_time_grid(&self) -> Vec<f64> {
        let n = self.merger_time_samples;
        let step = (self.merger_time_end - self.merger_time_start) / (n - 1) as f64;
        (0..n)
            .map(|i| self.merger_time_start + step * i as f64)
            .collect()
    }
}

fn require_positive(name: &str, value: f64) -> ChirpResult<()> {
    if value.is_nan() || value <= 0.0 {
        return Err(ChirpError::Config(format!("{name} must be > 0, got {value}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(GeneratorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_negative_mass_rejected() {
        let cfg = GeneratorConfig {
            reference_total_mass: -1.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_nan_prefactor_rejected() {
        let cfg = GeneratorConfig {
            amplitude_prefactor: f64::NAN,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_inverted_window_rejected() {
        let cfg = GeneratorConfig {
            merger_time_start: 1.0,
            merger_time_end: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let cfg = GeneratorConfig {
            inference_batch_size: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = GeneratorConfig::from_json(r#"{"merger_cutoff": 0.1}"#).unwrap();
        assert_eq!(cfg.merger_cutoff, 0.1);
        assert_eq!(cfg.reference_total_mass, 20.0);
    }

    #[test]
    fn test_from_json_garbage() {
        assert!(matches!(
            GeneratorConfig::from_json("not json"),
            Err(ChirpError::Config(_))
        ));
    }

    #[test]
    fn test_merger_time_grid_endpoints() {
        let grid = GeneratorConfig::default().merger_time_grid();
        assert_eq!(grid.len(), 1000);
        assert_eq!(grid[0], -100.0);
        assert!(grid[999].abs() < 1e-9);
    }
}
