//! Deterministic synthetic data for tests and the demonstration binary.
//!
//! Scans are rendered from Gaussian sources whose brightness follows AR(1)
//! calcium transients driven by random spikes, plus Gaussian read noise.
//! Everything is seeded, so the same configuration always renders the same
//! frames.

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::error::{PipelineError, PipelineResult};
use crate::scan::{MotionCorrection, Scan, ScanInfo, ScanKey};
use crate::traces::{EmissionFractions, EmissionSpectra};

/// Shape and content of a synthetic scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticScanConfig {
    pub height: usize,
    pub width: usize,
    pub nframes: usize,
    pub nchannels: usize,
    pub nslices: usize,
    pub nsources: usize,
    pub fps: f64,
    /// Calcium decay time constant (s)
    pub tau: f64,
    /// Mean firing rate (Hz)
    pub spike_rate: f64,
    /// Peak brightness added by one unit of calcium
    pub amplitude: f64,
    /// Gaussian source width (px)
    pub sigma_px: f64,
    pub baseline: f64,
    pub noise_std: f64,
    pub fluorophore: String,
    pub seed: u64,
}

impl Default for SyntheticScanConfig {
    fn default() -> Self {
        Self {
            height: 32,
            width: 32,
            nframes: 200,
            nchannels: 1,
            nslices: 1,
            nsources: 4,
            fps: 15.0,
            tau: 0.5,
            spike_rate: 0.5,
            amplitude: 400.0,
            sigma_px: 2.0,
            baseline: 100.0,
            noise_std: 5.0,
            fluorophore: "GCaMP6f".to_string(),
            seed: 42,
        }
    }
}

/// Ground truth of one rendered source.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSource {
    /// Center row (px)
    pub y: f64,
    /// Center column (px)
    pub x: f64,
    pub calcium: Vec<f64>,
    pub spikes: Vec<f64>,
    /// Normalized footprint `[height, width]`, peak 1
    pub footprint: Array2<f64>,
}

/// A rendered scan and the sources it was rendered from.
#[derive(Debug, Clone)]
pub struct SyntheticScan {
    pub scan: Scan,
    pub sources: Vec<SyntheticSource>,
}

impl SyntheticScan {
    pub fn footprints(&self) -> Vec<Array2<f64>> {
        self.sources.iter().map(|s| s.footprint.clone()).collect()
    }
}

/// AR(1) calcium driven by Bernoulli spikes at `rate` Hz.
pub fn calcium_transients(
    nframes: usize,
    fps: f64,
    tau: f64,
    rate: f64,
    rng: &mut impl Rng,
) -> (Vec<f64>, Vec<f64>) {
    let gamma = (-1.0 / (fps * tau)).exp();
    let p = (rate / fps).clamp(0.0, 1.0);

    let spikes: Vec<f64> = (0..nframes)
        .map(|_| if rng.gen::<f64>() < p { 1.0 } else { 0.0 })
        .collect();

    let mut calcium = Vec::with_capacity(nframes);
    let mut level = 0.0;
    for &s in &spikes {
        level = gamma * level + s;
        calcium.push(level);
    }
    (calcium, spikes)
}

fn gaussian_footprint(height: usize, width: usize, y: f64, x: f64, sigma: f64) -> Array2<f64> {
    Array2::from_shape_fn((height, width), |(r, c)| {
        let dy = r as f64 - y;
        let dx = c as f64 - x;
        (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
    })
}

fn synthetic_info(config: &SyntheticScanConfig) -> ScanInfo {
    ScanInfo {
        nframes_requested: config.nframes,
        nframes: config.nframes,
        px_width: config.width,
        px_height: config.height,
        um_width: config.width as f64 * 2.0,
        um_height: config.height as f64 * 2.0,
        bidirectional: true,
        fps: config.fps,
        zoom: 1.0,
        dwell_time: 0.1,
        nchannels: config.nchannels,
        nslices: config.nslices,
        slice_pitch: 10.0,
        fill_fraction: 0.712867,
        raster_phase: 0.0,
    }
}

/// Render a scan with stationary motion and no raster phase.
///
/// Every channel and slice shows the same sources; each gets its own noise.
pub fn synthetic_scan(key: ScanKey, config: &SyntheticScanConfig) -> PipelineResult<SyntheticScan> {
    let info = synthetic_info(config);
    info.validate()?;

    let noise = Normal::new(0.0, config.noise_std)
        .map_err(|e| PipelineError::configuration(format!("noise level: {e}")))?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let margin = (2.0 * config.sigma_px).min(config.height.min(config.width) as f64 / 2.0);
    let sources: Vec<SyntheticSource> = (0..config.nsources)
        .map(|_| {
            let y = rng.gen_range(margin..=(config.height as f64 - 1.0 - margin).max(margin));
            let x = rng.gen_range(margin..=(config.width as f64 - 1.0 - margin).max(margin));
            let (calcium, spikes) = calcium_transients(
                config.nframes,
                config.fps,
                config.tau,
                config.spike_rate,
                &mut rng,
            );
            SyntheticSource {
                y,
                x,
                calcium,
                spikes,
                footprint: gaussian_footprint(config.height, config.width, y, x, config.sigma_px),
            }
        })
        .collect();

    let mut clean = Array3::from_elem((config.height, config.width, config.nframes), config.baseline);
    for source in &sources {
        for ((r, c, t), v) in clean.indexed_iter_mut() {
            *v += config.amplitude * source.calcium[t] * source.footprint[[r, c]];
        }
    }

    let frames: Vec<Vec<Array3<i16>>> = (0..config.nchannels)
        .map(|_| {
            (0..config.nslices)
                .map(|_| {
                    clean.mapv(|v| {
                        let noisy = v + noise.sample(&mut rng);
                        noisy.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
                    })
                })
                .collect()
        })
        .collect();

    let template = Array2::from_elem((config.height, config.width), config.baseline);
    let motion = (1..=config.nslices)
        .map(|slice| MotionCorrection::stationary(slice, 1, template.clone(), config.nframes))
        .collect();

    let scan = Scan::new(key, info, frames, motion, config.fluorophore.clone())?;
    Ok(SyntheticScan { scan, sources })
}

fn gaussian_band(wavelengths: &[f64], peak: f64, width: f64, scale: f64) -> Vec<f64> {
    wavelengths
        .iter()
        .map(|&w| scale * (-((w - peak) / width).powi(2) / 2.0).exp())
        .collect()
}

/// Model emission spectra of a donor/acceptor FRET pair.
///
/// The free state emits mostly from the donor near 475 nm, the loaded state
/// mostly from the acceptor near 530 nm.
pub fn twitch_spectra() -> EmissionSpectra {
    let wavelengths: Vec<f64> = (0..=100).map(|i| 420.0 + 2.0 * i as f64).collect();
    let donor = |scale| gaussian_band(&wavelengths, 475.0, 12.0, scale);
    let acceptor = |scale| gaussian_band(&wavelengths, 530.0, 15.0, scale);

    let free = donor(1.0)
        .into_iter()
        .zip(acceptor(0.4))
        .map(|(d, a)| d + a)
        .collect();
    let loaded = donor(0.35)
        .into_iter()
        .zip(acceptor(1.0))
        .map(|(d, a)| d + a)
        .collect();

    EmissionSpectra {
        wavelengths,
        free,
        loaded,
    }
}

/// Green and blue traces of a component with bound fraction `x`.
pub fn ratiometric_pair(
    x: &[f64],
    gamma: f64,
    brightness: f64,
    fractions: &EmissionFractions,
) -> (Vec<f64>, Vec<f64>) {
    let green = x
        .iter()
        .map(|&x| brightness * ((1.0 - x) * fractions.green_free + x * fractions.green_loaded))
        .collect();
    let blue = x
        .iter()
        .map(|&x| gamma * brightness * ((1.0 - x) * fractions.blue_free + x * fractions.blue_loaded))
        .collect();
    (green, blue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TwitchConfig;

    #[test]
    fn test_rendering_is_deterministic() {
        let config = SyntheticScanConfig {
            height: 12,
            width: 10,
            nframes: 20,
            nsources: 2,
            ..Default::default()
        };
        let a = synthetic_scan(ScanKey::new(1, 1, 1), &config).unwrap();
        let b = synthetic_scan(ScanKey::new(1, 1, 1), &config).unwrap();
        assert_eq!(a.scan.frames(1, 1).unwrap(), b.scan.frames(1, 1).unwrap());
        assert_eq!(a.sources, b.sources);
        assert_eq!(a.scan.frames(1, 1).unwrap().dim(), (12, 10, 20));
    }

    #[test]
    fn test_transients_decay_between_spikes() {
        let mut rng = StdRng::seed_from_u64(3);
        let (calcium, spikes) = calcium_transients(500, 10.0, 0.5, 1.0, &mut rng);
        let gamma = (-1.0f64 / 5.0).exp();
        for t in 1..500 {
            let expected = gamma * calcium[t - 1] + spikes[t];
            assert!((calcium[t] - expected).abs() < 1e-12);
        }
        assert!(spikes.iter().any(|&s| s > 0.0));
    }

    #[test]
    fn test_model_spectra_separate_states() {
        let config = TwitchConfig::default();
        let f = EmissionFractions::from_spectra(
            &twitch_spectra(),
            config.green_filter,
            config.blue_filter,
        )
        .unwrap();
        assert!(f.green_loaded > f.green_free);
        assert!(f.blue_loaded < f.blue_free);
    }
}
