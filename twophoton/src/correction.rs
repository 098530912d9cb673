//! Raster and motion correction of raw frame stacks.
//!
//! Both corrections capture their calibration when built and are pure
//! functions of the frames afterwards. They compose as
//! `motion.correct(&raster.correct(frames)?, indices)`, which is what
//! [`CorrectionAdapter::correct`] does for a whole slice.
//!
//! Frame stacks are `[height, width, frames]`.

use calcium_math::interp_clamped;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use std::f64::consts::FRAC_PI_2;

use crate::error::{PipelineError, PipelineResult};
use crate::scan::{MotionCorrection, ScanInfo};

/// Resonant-scanner raster correction.
///
/// The resonant mirror sweeps sinusoidally, so samples taken at a constant
/// pixel clock land at positions that follow the sine of the scan angle, and
/// forward/backward lines are offset by the raster phase. Each line is
/// resampled onto a uniform grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterCorrection {
    pub fill_fraction: f64,
    pub raster_phase: f64,
}

impl RasterCorrection {
    pub fn new(fill_fraction: f64, raster_phase: f64) -> Self {
        Self {
            fill_fraction,
            raster_phase,
        }
    }

    pub fn from_info(info: &ScanInfo) -> Self {
        Self::new(info.fill_fraction, info.raster_phase)
    }

    /// True when the calibration describes no raster distortion.
    pub fn is_identity(&self) -> bool {
        self.raster_phase == 0.0
    }

    /// Correct a raw frame stack.
    ///
    /// A zero raster phase returns the frames cast to floating point.
    pub fn correct(&self, frames: &Array3<i16>) -> PipelineResult<Array3<f64>> {
        let cast = frames.mapv(f64::from);
        if self.is_identity() {
            return Ok(cast);
        }

        let (height, width, _) = frames.dim();
        let theta_max = FRAC_PI_2 * self.fill_fraction;
        let sin_max = theta_max.sin();
        if !(sin_max > 0.0) {
            return Err(PipelineError::configuration(format!(
                "fill fraction {} gives no scan angle",
                self.fill_fraction
            )));
        }

        // Uniform output grid in normalized field coordinates [-1, 1]
        let grid: Vec<f64> = (0..width)
            .map(|j| -1.0 + (2 * j + 1) as f64 / width as f64)
            .collect();

        let sampled_at = |phase: f64| -> Vec<f64> {
            grid.iter()
                .map(|&p| ((p * sin_max).asin() + phase).sin() / sin_max)
                .collect()
        };
        let forward = sampled_at(self.raster_phase);
        let backward = sampled_at(-self.raster_phase);

        let mut out = cast.clone();
        for mut frame in out.axis_iter_mut(Axis(2)) {
            for row in 0..height {
                let positions = if row % 2 == 0 { &forward } else { &backward };
                let values: Vec<f64> = frame.row(row).to_vec();
                for (j, &p) in grid.iter().enumerate() {
                    frame[[row, j]] = interp_clamped(p, positions, &values).map_err(|e| {
                        PipelineError::configuration(format!(
                            "raster phase {} cannot be corrected: {e}",
                            self.raster_phase
                        ))
                    })?;
                }
            }
        }

        Ok(out)
    }
}

/// Applies per-frame rigid (y, x) offsets from a motion estimate.
#[derive(Debug, Clone)]
pub struct MotionCorrector {
    motion_yx: Vec<(f64, f64)>,
}

impl MotionCorrector {
    pub fn new(motion_yx: Vec<(f64, f64)>) -> Self {
        Self { motion_yx }
    }

    pub fn from_record(record: &MotionCorrection) -> Self {
        Self::new(record.motion_yx.clone())
    }

    /// Shift frame `k` of `frames` by the offset recorded for
    /// `frame_indices[k]`.
    ///
    /// Output pixel `(y, x)` takes the bilinearly interpolated input at
    /// `(y - dy, x - dx)`, clamped to the frame.
    pub fn correct(
        &self,
        frames: &Array3<f64>,
        frame_indices: &[usize],
    ) -> PipelineResult<Array3<f64>> {
        let nframes = frames.len_of(Axis(2));
        if frame_indices.len() != nframes {
            return Err(PipelineError::geometry(format!(
                "{} frame indices for {} frames",
                frame_indices.len(),
                nframes
            )));
        }

        let mut out = Array3::zeros(frames.dim());
        for (k, &index) in frame_indices.iter().enumerate() {
            let &(dy, dx) = self.motion_yx.get(index).ok_or_else(|| {
                PipelineError::geometry(format!(
                    "frame index {index} beyond {} motion offsets",
                    self.motion_yx.len()
                ))
            })?;

            let shifted = shift_frame(frames.index_axis(Axis(2), k), dy, dx);
            out.index_axis_mut(Axis(2), k).assign(&shifted);
        }
        Ok(out)
    }
}

fn shift_frame(frame: ArrayView2<f64>, dy: f64, dx: f64) -> Array2<f64> {
    let (height, width) = frame.dim();
    if dy == 0.0 && dx == 0.0 {
        return frame.to_owned();
    }

    Array2::from_shape_fn((height, width), |(y, x)| {
        bilinear_clamped(&frame, y as f64 - dy, x as f64 - dx)
    })
}

fn bilinear_clamped(frame: &ArrayView2<f64>, y: f64, x: f64) -> f64 {
    let (height, width) = frame.dim();
    let y = y.clamp(0.0, (height - 1) as f64);
    let x = x.clamp(0.0, (width - 1) as f64);

    let y0 = y.floor() as usize;
    let x0 = x.floor() as usize;
    let y1 = (y0 + 1).min(height - 1);
    let x1 = (x0 + 1).min(width - 1);
    let fy = y - y0 as f64;
    let fx = x - x0 as f64;

    let top = frame[[y0, x0]] * (1.0 - fx) + frame[[y0, x1]] * fx;
    let bottom = frame[[y1, x0]] * (1.0 - fx) + frame[[y1, x1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Raster followed by motion correction for one slice.
#[derive(Debug, Clone)]
pub struct CorrectionAdapter {
    pub raster: RasterCorrection,
    pub motion: MotionCorrector,
}

impl CorrectionAdapter {
    pub fn new(info: &ScanInfo, motion: &MotionCorrection) -> Self {
        Self {
            raster: RasterCorrection::from_info(info),
            motion: MotionCorrector::from_record(motion),
        }
    }

    /// Correct a whole recording, frame `k` using motion offset `k`.
    pub fn correct(&self, frames: &Array3<i16>) -> PipelineResult<Array3<f64>> {
        let indices: Vec<usize> = (0..frames.len_of(Axis(2))).collect();
        self.correct_frames(frames, &indices)
    }

    /// Correct a subset of frames taken from the recording at `frame_indices`.
    pub fn correct_frames(
        &self,
        frames: &Array3<i16>,
        frame_indices: &[usize],
    ) -> PipelineResult<Array3<f64>> {
        let raster_corrected = self.raster.correct(frames)?;
        self.motion.correct(&raster_corrected, frame_indices)
    }
}
