//! Pipeline configuration.
//!
//! Defaults reproduce the standard processing settings. A configuration file
//! only needs to list the fields it changes; everything else falls back to
//! [`Default`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};

/// Complete configuration for one pipeline instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub twitch: TwitchConfig,
    pub oasis: OasisConfig,
    pub tracking: TrackingConfig,
}

/// Initialization settings for one tissue type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitializationConfig {
    /// Background components to fit
    pub background_components: usize,
    /// Sparsity weight of sparse-NMF initialization (unused by greedy ROI)
    pub sparsity_weight: f64,
    /// Initialize on overlapping patches instead of the whole field
    pub use_patches: bool,
    /// Patch side as a multiple of the neuron diameter
    pub patch_downsampling: usize,
    /// Fractional overlap between neighboring patches
    pub patch_overlap: f64,
}

impl InitializationConfig {
    pub fn somatic() -> Self {
        Self {
            background_components: 4,
            sparsity_weight: 0.0,
            use_patches: false,
            patch_downsampling: 4,
            patch_overlap: 0.2,
        }
    }

    pub fn axonal() -> Self {
        Self {
            background_components: 1,
            sparsity_weight: 500.0,
            use_patches: true,
            patch_downsampling: 4,
            patch_overlap: 0.2,
        }
    }
}

impl Default for InitializationConfig {
    fn default() -> Self {
        Self::somatic()
    }
}

/// Settings forwarded to the demixing routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Autoregressive order of the calcium impulse response
    pub ar_order: usize,
    /// Correlation above which overlapping components are merged
    pub merge_threshold: f64,
    /// Worker process hint, passed through untouched
    pub n_processes: usize,
    /// Pixels handed to each worker, passed through untouched
    pub n_pixels_per_process: usize,
    /// Block size hint, passed through untouched
    pub block_size: usize,
    /// Inflation applied to the component count estimate
    pub component_margin: f64,
    /// Extraction method identifier recorded with every run
    pub extract_method: u8,
    pub somatic: InitializationConfig,
    pub axonal: InitializationConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ar_order: 2,
            merge_threshold: 0.8,
            n_processes: 12,
            n_pixels_per_process: 10_000,
            block_size: 10_000,
            component_margin: 1.5,
            extract_method: 2,
            somatic: InitializationConfig::somatic(),
            axonal: InitializationConfig::axonal(),
        }
    }
}

/// Optical filter passband in nanometers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Passband {
    pub center_nm: f64,
    pub half_width_nm: f64,
}

impl Passband {
    pub fn new(center_nm: f64, half_width_nm: f64) -> Self {
        Self {
            center_nm,
            half_width_nm,
        }
    }

    pub fn lo(&self) -> f64 {
        self.center_nm - self.half_width_nm
    }

    pub fn hi(&self) -> f64 {
        self.center_nm + self.half_width_nm
    }
}

/// Ratiometric unmixing settings for Twitch-type FRET indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    /// Channel carrying the acceptor (green) emission
    pub green_channel: usize,
    /// Channel carrying the donor (blue) emission
    pub blue_channel: usize,
    pub green_filter: Passband,
    pub blue_filter: Passband,
    /// Wide low-pass cutoff, fraction of the sampling rate
    pub unsharp_cutoff: f64,
    /// Narrow low-pass cutoff, fraction of the sampling rate
    pub denoise_cutoff: f64,
    /// Pairwise slopes evaluated by the robust fit
    pub max_pairs: usize,
    pub seed: u64,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            green_channel: 1,
            blue_channel: 2,
            green_filter: Passband::new(535.0, 25.0),
            blue_filter: Passband::new(475.0, 20.0),
            unsharp_cutoff: 0.03,
            denoise_cutoff: 0.125,
            max_pairs: 20_000,
            seed: 0,
        }
    }
}

/// Native nonnegative deconvolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OasisConfig {
    /// Indicator decay time constant (s)
    pub tau: f64,
    /// L1 penalty on the spike train
    pub sparsity: f64,
    /// Percentile of the trace taken as baseline
    pub baseline_percentile: f64,
}

impl Default for OasisConfig {
    fn default() -> Self {
        Self {
            tau: 0.5,
            sparsity: 0.0,
            baseline_percentile: 8.0,
        }
    }
}

/// Eye-tracking post-processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Largest frame-count mismatch that is resolved by truncation
    pub frame_count_tolerance: usize,
    /// Position standard deviation (px) above which a detection is unreliable
    pub position_std_threshold: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            frame_count_tolerance: 10,
            position_std_threshold: 10.0,
        }
    }
}

impl PipelineConfig {
    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> PipelineResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::configuration(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, json).map_err(|e| {
            PipelineError::configuration(format!("cannot write {}: {e}", path.display()))
        })
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> PipelineResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            PipelineError::configuration(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let e = &self.extraction;
        if !(e.merge_threshold > 0.0 && e.merge_threshold <= 1.0) {
            return Err(PipelineError::configuration(format!(
                "merge threshold must lie in (0, 1], got {}",
                e.merge_threshold
            )));
        }
        if !(e.component_margin >= 1.0) {
            return Err(PipelineError::configuration(format!(
                "component margin must be at least 1, got {}",
                e.component_margin
            )));
        }
        for (name, init) in [("somatic", &e.somatic), ("axonal", &e.axonal)] {
            if init.background_components == 0 {
                return Err(PipelineError::configuration(format!(
                    "{name} initialization needs at least one background component"
                )));
            }
            if !(0.0..1.0).contains(&init.patch_overlap) || init.patch_downsampling == 0 {
                return Err(PipelineError::configuration(format!(
                    "{name} patch settings are invalid"
                )));
            }
        }

        let t = &self.twitch;
        if t.green_channel == 0 || t.blue_channel == 0 || t.green_channel == t.blue_channel {
            return Err(PipelineError::configuration(format!(
                "green ({}) and blue ({}) channels must be distinct and 1-based",
                t.green_channel, t.blue_channel
            )));
        }
        for cutoff in [t.unsharp_cutoff, t.denoise_cutoff] {
            if !(cutoff > 0.0 && cutoff <= 0.5) {
                return Err(PipelineError::configuration(format!(
                    "filter cutoff {cutoff} must lie in (0, 0.5]"
                )));
            }
        }
        if t.unsharp_cutoff >= t.denoise_cutoff {
            return Err(PipelineError::configuration(
                "unsharp cutoff must be below the denoise cutoff",
            ));
        }
        if t.max_pairs == 0 {
            return Err(PipelineError::configuration("max_pairs must be positive"));
        }

        let o = &self.oasis;
        if !(o.tau > 0.0) || !(o.sparsity >= 0.0) || !(0.0..=100.0).contains(&o.baseline_percentile) {
            return Err(PipelineError::configuration(format!(
                "invalid deconvolution settings: tau={} sparsity={} baseline={}",
                o.tau, o.sparsity, o.baseline_percentile
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.extraction.ar_order, 2);
        assert_eq!(config.extraction.merge_threshold, 0.8);
        assert_eq!(config.extraction.axonal.background_components, 1);
        assert_eq!(config.extraction.axonal.sparsity_weight, 500.0);
        assert!(!config.extraction.somatic.use_patches);
        assert_eq!(config.tracking.position_std_threshold, 10.0);
        assert_eq!(config.tracking.frame_count_tolerance, 10);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.json");

        let mut config = PipelineConfig::default();
        config.twitch.seed = 42;
        config.oasis.tau = 1.2;
        config.save_to_file(&path).unwrap();

        let loaded = PipelineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "extraction": { "ar_order": 1 } }"#).unwrap();

        let loaded = PipelineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.extraction.ar_order, 1);
        assert_eq!(loaded.extraction.merge_threshold, 0.8);
        assert_eq!(loaded.twitch, TwitchConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = PipelineConfig::default();
        config.twitch.blue_channel = config.twitch.green_channel;
        assert!(config.validate().unwrap_err().is_configuration());

        let mut config = PipelineConfig::default();
        config.extraction.merge_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.twitch.unsharp_cutoff = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let dir = tempdir().unwrap();
        let err = PipelineConfig::load_from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.is_configuration());
    }
}
