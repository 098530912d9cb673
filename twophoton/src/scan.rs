//! Scan data model: identities, galvo scan header, raw frame stacks and
//! motion-correction records.
//!
//! Channels and slices are numbered from 1, matching how they are keyed in
//! the record store. Frame stacks are `[height, width, frames]`.

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PipelineError, PipelineResult};

/// Identity of one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanKey {
    pub animal_id: u32,
    pub session: u16,
    pub scan_idx: u16,
}

impl ScanKey {
    pub fn new(animal_id: u32, session: u16, scan_idx: u16) -> Self {
        Self {
            animal_id,
            session,
            scan_idx,
        }
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "animal_id={} session={} scan_idx={}",
            self.animal_id, self.session, self.scan_idx
        )
    }
}

/// Identity of one extraction run: a scan processed with one extraction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    pub scan: ScanKey,
    pub extract_method: u8,
}

impl RunKey {
    pub fn new(scan: ScanKey, extract_method: u8) -> Self {
        Self {
            scan,
            extract_method,
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} extract_method={}", self.scan, self.extract_method)
    }
}

/// Header and calibration of a galvo/resonant scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    /// Number of volumes requested in the acquisition header
    pub nframes_requested: usize,
    /// Frames actually recorded
    pub nframes: usize,
    /// Pixels per line
    pub px_width: usize,
    /// Lines per frame
    pub px_height: usize,
    /// Field width in microns
    pub um_width: f64,
    /// Field height in microns
    pub um_height: f64,
    pub bidirectional: bool,
    /// Frames per second (Hz)
    pub fps: f64,
    pub zoom: f64,
    /// Microseconds per pixel per frame
    pub dwell_time: f64,
    pub nchannels: usize,
    pub nslices: usize,
    /// Distance between slices in microns
    pub slice_pitch: f64,
    /// Temporal fill fraction of the resonant line scan
    pub fill_fraction: f64,
    /// Shift of odd vs even raster lines (radians of scan angle)
    pub raster_phase: f64,
}

impl ScanInfo {
    pub fn microns_per_pixel(&self) -> f64 {
        self.um_width / self.px_width as f64
    }

    pub fn pixels_per_frame(&self) -> usize {
        self.px_height * self.px_width
    }

    /// Reject headers that no downstream computation can work with.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.px_width == 0 || self.px_height == 0 {
            return Err(PipelineError::geometry(format!(
                "empty frame geometry {}x{}",
                self.px_height, self.px_width
            )));
        }
        if self.nchannels == 0 || self.nslices == 0 {
            return Err(PipelineError::geometry(format!(
                "scan has {} channels and {} slices",
                self.nchannels, self.nslices
            )));
        }
        if !(self.fps > 0.0) {
            return Err(PipelineError::configuration(format!(
                "frame rate must be positive, got {}",
                self.fps
            )));
        }
        if !(self.fill_fraction > 0.0 && self.fill_fraction <= 1.0) {
            return Err(PipelineError::configuration(format!(
                "fill fraction must lie in (0, 1], got {}",
                self.fill_fraction
            )));
        }
        if !(self.um_width > 0.0 && self.um_height > 0.0) {
            return Err(PipelineError::configuration(format!(
                "field size must be positive, got {}x{} um",
                self.um_height, self.um_width
            )));
        }
        Ok(())
    }
}

/// Tissue structure targeted by the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStructure {
    Soma,
    Axon,
    Dendrite,
}

impl TargetStructure {
    /// Sparse, spatially distributed processes rather than cell bodies.
    pub fn is_axonal_or_dendritic(self) -> bool {
        matches!(self, TargetStructure::Axon | TargetStructure::Dendrite)
    }
}

/// Calcium indicator class, which decides the trace-assembly path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Indicator {
    /// Any single-channel indicator (GCaMP6f, OGB-1, ...)
    Single(String),
    /// Dual-emission FRET indicator requiring ratiometric unmixing
    Twitch2B,
}

impl Indicator {
    pub fn from_fluorophore(name: &str) -> Self {
        if name == "Twitch2B" {
            Indicator::Twitch2B
        } else {
            Indicator::Single(name.to_string())
        }
    }

    pub fn is_ratiometric(&self) -> bool {
        matches!(self, Indicator::Twitch2B)
    }
}

/// Alignment of one slice, produced upstream by motion estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionCorrection {
    /// 1-based slice this alignment applies to
    pub slice: usize,
    /// Channel used to compute the alignment
    pub channel: usize,
    /// Alignment template
    pub template: Array2<f64>,
    /// Per-frame (y, x) correction offsets in pixels
    pub motion_yx: Vec<(f64, f64)>,
}

impl MotionCorrection {
    /// Alignment with no motion, for scans that need none.
    pub fn stationary(slice: usize, channel: usize, template: Array2<f64>, nframes: usize) -> Self {
        Self {
            slice,
            channel,
            template,
            motion_yx: vec![(0.0, 0.0); nframes],
        }
    }

    /// Standard deviation of the motion in microns.
    ///
    /// Root mean squared distance of the per-frame offsets from their mean
    /// offset, scaled by the pixel pitch.
    pub fn rms_um(&self, microns_per_pixel: f64) -> f64 {
        let n = self.motion_yx.len();
        if n == 0 {
            return 0.0;
        }

        let (sum_y, sum_x) = self
            .motion_yx
            .iter()
            .fold((0.0, 0.0), |acc, &(y, x)| (acc.0 + y, acc.1 + x));
        let (mean_y, mean_x) = (sum_y / n as f64, sum_x / n as f64);

        let mean_sq = self
            .motion_yx
            .iter()
            .map(|&(y, x)| (y - mean_y).powi(2) + (x - mean_x).powi(2))
            .sum::<f64>()
            / n as f64;

        mean_sq.sqrt() * microns_per_pixel
    }
}

/// Raw acquisition with everything extraction needs.
///
/// Immutable once built; construction validates that every frame stack
/// matches the header geometry.
#[derive(Debug, Clone)]
pub struct Scan {
    pub key: ScanKey,
    pub info: ScanInfo,
    /// Frame stacks indexed `[channel - 1][slice - 1]`
    frames: Vec<Vec<Array3<i16>>>,
    /// One alignment per slice, in slice order
    motion: Vec<MotionCorrection>,
    /// Targeted structure; `None` means somatic imaging
    pub target: Option<TargetStructure>,
    pub fluorophore: String,
}

impl Scan {
    pub fn new(
        key: ScanKey,
        info: ScanInfo,
        frames: Vec<Vec<Array3<i16>>>,
        motion: Vec<MotionCorrection>,
        fluorophore: impl Into<String>,
    ) -> PipelineResult<Self> {
        info.validate()?;

        if frames.len() != info.nchannels {
            return Err(PipelineError::geometry(format!(
                "header lists {} channels but {} frame sets were supplied",
                info.nchannels,
                frames.len()
            )));
        }

        let expected = (info.px_height, info.px_width, info.nframes);
        for (c, slices) in frames.iter().enumerate() {
            if slices.len() != info.nslices {
                return Err(PipelineError::geometry(format!(
                    "channel {} has {} slices, header lists {}",
                    c + 1,
                    slices.len(),
                    info.nslices
                )));
            }
            for (s, stack) in slices.iter().enumerate() {
                if stack.dim() != expected {
                    return Err(PipelineError::geometry(format!(
                        "channel {} slice {} has shape {:?}, expected {:?}",
                        c + 1,
                        s + 1,
                        stack.dim(),
                        expected
                    )));
                }
            }
        }

        if motion.len() != info.nslices {
            return Err(PipelineError::configuration(format!(
                "{} motion corrections for {} slices",
                motion.len(),
                info.nslices
            )));
        }
        for (s, mc) in motion.iter().enumerate() {
            if mc.slice != s + 1 {
                return Err(PipelineError::configuration(format!(
                    "motion correction at position {} is for slice {}",
                    s + 1,
                    mc.slice
                )));
            }
            if mc.motion_yx.len() != info.nframes {
                return Err(PipelineError::geometry(format!(
                    "slice {} has {} motion offsets for {} frames",
                    mc.slice,
                    mc.motion_yx.len(),
                    info.nframes
                )));
            }
        }

        Ok(Self {
            key,
            info,
            frames,
            motion,
            target: None,
            fluorophore: fluorophore.into(),
        })
    }

    pub fn with_target(mut self, target: TargetStructure) -> Self {
        self.target = Some(target);
        self
    }

    /// True when the scan targets axons or dendrites.
    pub fn is_axonal(&self) -> bool {
        self.target
            .map(TargetStructure::is_axonal_or_dendritic)
            .unwrap_or(false)
    }

    pub fn indicator(&self) -> Indicator {
        Indicator::from_fluorophore(&self.fluorophore)
    }

    /// Raw frame stack for a 1-based channel and slice.
    pub fn frames(&self, channel: usize, slice: usize) -> PipelineResult<&Array3<i16>> {
        channel
            .checked_sub(1)
            .and_then(|c| self.frames.get(c))
            .and_then(|slices| slice.checked_sub(1).and_then(|s| slices.get(s)))
            .ok_or_else(|| {
                PipelineError::configuration(format!(
                    "no frames for channel {channel} slice {slice}"
                ))
            })
    }

    /// Motion correction record for a 1-based slice.
    pub fn motion(&self, slice: usize) -> PipelineResult<&MotionCorrection> {
        slice
            .checked_sub(1)
            .and_then(|s| self.motion.get(s))
            .ok_or_else(|| {
                PipelineError::configuration(format!("no motion correction for slice {slice}"))
            })
    }
}
