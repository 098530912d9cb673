//! Common utilities for twophoton integration tests

#![allow(dead_code)]

use ndarray::{Array2, Array3};
use twophoton::{MotionCorrection, Scan, ScanInfo, ScanKey};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Header for a small scan with a 4x3 field and no raster phase
pub fn scan_info(nchannels: usize, nslices: usize, nframes: usize) -> ScanInfo {
    ScanInfo {
        nframes_requested: nframes,
        nframes,
        px_width: 4,
        px_height: 3,
        um_width: 400.0,
        um_height: 300.0,
        bidirectional: true,
        fps: 10.0,
        zoom: 1.0,
        dwell_time: 0.1,
        nchannels,
        nslices,
        slice_pitch: 5.0,
        fill_fraction: 0.712867,
        raster_phase: 0.0,
    }
}

/// Scan of constant frames with stationary motion
pub fn flat_scan(key: ScanKey, nchannels: usize, nslices: usize, nframes: usize) -> Scan {
    let info = scan_info(nchannels, nslices, nframes);
    let frames = vec![vec![Array3::<i16>::from_elem((3, 4, nframes), 10); nslices]; nchannels];
    let motion = (1..=nslices)
        .map(|s| MotionCorrection::stationary(s, 1, Array2::zeros((3, 4)), nframes))
        .collect();
    Scan::new(key, info, frames, motion, "GCaMP6f").expect("valid test scan")
}

/// Calcium-bound fraction with periodic transients, within (0.2, 0.7]
pub fn bound_fraction(n: usize) -> Vec<f64> {
    (0..n)
        .map(|t| 0.2 + 0.5 * (-((t % 25) as f64) / 4.0).exp())
        .collect()
}
