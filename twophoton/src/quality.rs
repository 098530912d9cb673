//! Quality measures and non-fatal quality flags.

use calcium_math::theil_sen;
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PipelineError, PipelineResult};

/// A condition that did not stop processing but should reach the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityWarning {
    /// Ratiometric slope came out non-negative and was clamped to -1.
    DegenerateFit { channel: usize, trace_id: usize },
    /// The green and blue traces could not be unmixed at all.
    UnmixingFailed { channel: usize, trace_id: usize },
}

impl fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QualityWarning::DegenerateFit { channel, trace_id } => write!(
                f,
                "degenerate ratiometric fit for channel {channel} trace {trace_id}"
            ),
            QualityWarning::UnmixingFailed { channel, trace_id } => write!(
                f,
                "unmixing failed for channel {channel} trace {trace_id}"
            ),
        }
    }
}

/// Intensities above this are left out of the quantal size fit
pub const MAX_ACCEPTABLE_INTENSITY: i64 = 3000;

/// Intensities must occur in more than this fraction of frames to bound the fit
pub const MIN_COUNT_FRACTION: f64 = 0.1;

/// Rounding offset so exact halves round up consistently
const ROUND_EPS: f64 = 1e-4;

/// Photon-transfer estimate of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantalSize {
    /// Smallest common pixel intensity
    pub min_intensity: i64,
    /// Largest common pixel intensity
    pub max_intensity: i64,
    /// Intensities used in the fit, ascending
    pub intensities: Vec<i64>,
    /// Mean noise variance at each intensity
    pub variances: Vec<f64>,
    /// Variance added per unit of intensity (lower is better)
    pub quantal_size: f64,
    /// Intensity at which the fitted variance reaches zero
    pub zero_level: f64,
}

/// Estimate the quantal size of a scan `[height, width, frames]`.
///
/// Consecutive frames are assumed stationary. Every pixel of every frame
/// pair gives an intensity (their rounded mean) and a noise variance (half
/// their squared difference). Under shot noise the variance grows linearly
/// with intensity; the robust slope of that line is the quantal size.
pub fn compute_quantal_size(scan: &Array3<i16>, max_pairs: usize, seed: u64) -> PipelineResult<QuantalSize> {
    let nframes = scan.len_of(Axis(2));
    if nframes < 2 {
        return Err(PipelineError::geometry(format!(
            "quantal size needs at least two frames, got {nframes}"
        )));
    }

    let mut samples: Vec<(i64, f64)> = Vec::with_capacity(scan.len());
    for lane in scan.lanes(Axis(2)) {
        let values = lane.to_vec();
        for pair in values.windows(2) {
            let (a, b) = (f64::from(pair[0]), f64::from(pair[1]));
            let intensity = ((a + b) / 2.0 + ROUND_EPS).round() as i64;
            samples.push((intensity, (a - b).powi(2) / 2.0));
        }
    }

    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for &(intensity, _) in &samples {
        *counts.entry(intensity).or_default() += 1;
    }

    let min_count = nframes as f64 * MIN_COUNT_FRACTION;
    let mut common = counts
        .iter()
        .filter(|&(_, &c)| c as f64 > min_count)
        .map(|(&i, _)| i);
    let min_intensity = common.next().ok_or_else(|| {
        PipelineError::geometry(format!(
            "no pixel intensity occurs more than {min_count} times"
        ))
    })?;
    let max_intensity = common.last().unwrap_or(min_intensity);
    let upper = max_intensity.min(MAX_ACCEPTABLE_INTENSITY);

    let mut sums: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for &(intensity, variance) in &samples {
        if intensity >= min_intensity && intensity <= upper {
            let entry = sums.entry(intensity).or_insert((0.0, 0));
            entry.0 += variance;
            entry.1 += 1;
        }
    }

    let intensities: Vec<i64> = sums.keys().copied().collect();
    let variances: Vec<f64> = sums.values().map(|(sum, n)| sum / *n as f64).collect();

    let x: Vec<f64> = intensities.iter().map(|&i| i as f64).collect();
    let fit = theil_sen(&x, &variances, max_pairs, seed)
        .map_err(|e| PipelineError::geometry(format!("quantal size fit failed: {e}")))?;

    Ok(QuantalSize {
        min_intensity,
        max_intensity,
        intensities,
        variances,
        quantal_size: fit.slope,
        zero_level: -fit.intercept / fit.slope,
    })
}
