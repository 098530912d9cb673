//! Eye-tracking post-processing: frame filtering, frame-count reconciliation
//! and comparison of tracked pupils against a hand-labelled reference.

use calcium_math::{pearson_correlation, percentile};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::TrackingConfig;
use crate::error::{PipelineError, PipelineResult};

/// Pupil fit of one video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeDetection {
    /// 1-based video frame
    pub frame: usize,
    pub pupil_x: f64,
    pub pupil_y: f64,
    pub pupil_r_minor: f64,
    pub pupil_r_major: f64,
    /// Major axis angle against horizontal (radians)
    pub pupil_angle: f64,
    pub pupil_x_std: f64,
    pub pupil_y_std: f64,
    pub pupil_r_minor_std: f64,
    pub pupil_r_major_std: f64,
    pub pupil_angle_std: f64,
    /// Standard deviation of the ROI pixel values
    pub intensity_std: f64,
}

/// One rejection rule for detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameFilter {
    /// Keep detections whose `intensity_std` exceeds half the given
    /// percentile of all detections' `intensity_std`.
    Intensity { percentile: f64 },
}

impl FrameFilter {
    pub fn apply(&self, detections: Vec<EyeDetection>) -> PipelineResult<Vec<EyeDetection>> {
        match self {
            FrameFilter::Intensity { percentile: q } => {
                if detections.is_empty() {
                    return Ok(detections);
                }
                let values: Vec<f64> = detections.iter().map(|d| d.intensity_std).collect();
                let threshold = percentile(&values, *q)
                    .map_err(|e| PipelineError::configuration(format!("intensity filter: {e}")))?
                    / 2.0;
                Ok(detections
                    .into_iter()
                    .filter(|d| d.intensity_std > threshold)
                    .collect())
            }
        }
    }
}

/// A filter together with its place in a protocol (lower runs first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStep {
    pub priority: i32,
    pub filter: FrameFilter,
}

/// Named sequence of filters that decides which frames are usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterProtocol {
    pub id: u32,
    pub name: String,
    pub steps: Vec<ProtocolStep>,
}

impl FilterProtocol {
    /// The standard protocol: one intensity filter at the median.
    pub fn frame_intensity() -> Self {
        Self {
            id: 0,
            name: "frame_intensity".to_string(),
            steps: vec![ProtocolStep {
                priority: 50,
                filter: FrameFilter::Intensity { percentile: 50.0 },
            }],
        }
    }

    /// Apply every step in ascending priority.
    pub fn apply(&self, detections: &[EyeDetection]) -> PipelineResult<Vec<EyeDetection>> {
        let mut steps: Vec<&ProtocolStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.priority);

        let before = detections.len();
        let mut frames = detections.to_vec();
        for step in steps {
            frames = step.filter.apply(frames)?;
        }
        info!(
            "protocol {}: {} of {before} detections kept",
            self.name,
            frames.len()
        );
        Ok(frames)
    }
}

/// Number of frames usable when timestamps and video frames disagree.
///
/// A mismatch up to `tolerance` frames is resolved by truncating both to the
/// shorter count; anything larger cannot be aligned safely.
pub fn reconcile_frame_counts(
    timestamps: &[f64],
    video_frames: usize,
    tolerance: usize,
) -> PipelineResult<usize> {
    let n_ts = timestamps.len();
    let diff = n_ts.abs_diff(video_frames);
    if diff == 0 {
        return Ok(n_ts);
    }
    if diff > tolerance {
        return Err(PipelineError::geometry(format!(
            "{n_ts} timestamps for {video_frames} video frames, beyond tolerance {tolerance}"
        )));
    }
    let usable = n_ts.min(video_frames);
    warn!("{n_ts} timestamps for {video_frames} video frames, truncating to {usable}");
    Ok(usable)
}

/// Hand-labelled pupil of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePupil {
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

/// Reference annotation of one frame; `pupil` is `None` where no pupil was
/// labelled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFrame {
    pub frame: usize,
    pub pupil: Option<ReferencePupil>,
}

/// Settings for [`tracking_quality`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySettings {
    /// Offset (x, y) added to tracked positions to bring them into
    /// reference coordinates, e.g. the tracking ROI corner
    pub offset: (f64, f64),
    /// Detections with an x or y position std above this count as missed
    pub std_threshold: f64,
}

impl QualitySettings {
    pub fn from_config(config: &TrackingConfig, offset: (f64, f64)) -> Self {
        Self {
            offset,
            std_threshold: config.position_std_threshold,
        }
    }
}

/// Agreement between tracking and the reference labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingQuality {
    /// Root mean squared pupil position error over matched frames (px)
    pub pos_err: f64,
    /// Correlation between reference radii and tracked major radii
    pub r_corr: f64,
    /// Tracked frames with no reference pupil
    pub excess_frames: usize,
    /// Reference pupils not tracked, filtered out, or tracked unreliably
    pub missed_frames: usize,
    pub total_frames: usize,
}

/// Compare tracked detections against the reference.
///
/// `filtered` is the subset of `detections` that passed the filter protocol.
///
/// `pos_err` averages squared errors over matched frames only; excess and
/// missed frames are counted separately and do not pull the error towards
/// zero. It is NaN when no frame matches.
pub fn tracking_quality(
    reference: &[ReferenceFrame],
    detections: &[EyeDetection],
    filtered: &[EyeDetection],
    settings: &QualitySettings,
) -> TrackingQuality {
    let tracked: BTreeMap<usize, &EyeDetection> =
        detections.iter().map(|d| (d.frame, d)).collect();
    let accepted: BTreeSet<usize> = filtered.iter().map(|d| d.frame).collect();

    let mut excess_frames = 0;
    let mut missed_frames = 0;
    let mut sq_errors = Vec::new();
    let mut r_ref = Vec::new();
    let mut r_trk = Vec::new();

    for frame in reference {
        let detection = tracked.get(&frame.frame);
        match (frame.pupil, detection) {
            (None, Some(_)) => excess_frames += 1,
            (None, None) => {}
            (Some(_), None) => missed_frames += 1,
            (Some(_), Some(_)) if !accepted.contains(&frame.frame) => missed_frames += 1,
            (Some(pupil), Some(det)) => {
                if det.pupil_x_std > settings.std_threshold
                    || det.pupil_y_std > settings.std_threshold
                {
                    missed_frames += 1;
                    continue;
                }
                let dx = pupil.x - (det.pupil_x + settings.offset.0);
                let dy = pupil.y - (det.pupil_y + settings.offset.1);
                sq_errors.push(dx * dx + dy * dy);
                r_ref.push(pupil.r);
                r_trk.push(det.pupil_r_major);
            }
        }
    }

    let pos_err = if sq_errors.is_empty() {
        f64::NAN
    } else {
        (sq_errors.iter().sum::<f64>() / sq_errors.len() as f64).sqrt()
    };

    TrackingQuality {
        pos_err,
        r_corr: pearson_correlation(&r_ref, &r_trk),
        excess_frames,
        missed_frames,
        total_frames: reference.len(),
    }
}
