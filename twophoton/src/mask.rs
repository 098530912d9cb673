//! Spatial mask encoding and reassembly.
//!
//! Masks are stored sparsely as `(pixel_index, weight)` pairs. The encoding is
//! fixed: pixel indices are 1-based and enumerate the image in column-major
//! order, i.e. `index = row + col * height + 1`. Everything that crosses the
//! store boundary goes through [`SparseMask`] so the convention lives in one
//! place.

use ndarray::{s, Array2, Array3, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::extraction::records::TraceRecord;

/// Sparse 2-D weight image in the 1-based column-major encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMask {
    /// 1-based column-major pixel indices, ascending
    pub pixels: Vec<u32>,
    /// Weight at each listed pixel
    pub weights: Vec<f64>,
}

impl SparseMask {
    /// Encode a flattened column-major image, keeping nonzero entries.
    pub fn from_column_major(values: ArrayView1<f64>) -> Self {
        let (pixels, weights) = values
            .iter()
            .enumerate()
            .filter(|&(_, &w)| w != 0.0)
            .map(|(i, &w)| (i as u32 + 1, w))
            .unzip();
        Self { pixels, weights }
    }

    /// Encode a dense `[height, width]` image.
    pub fn from_image(image: &Array2<f64>) -> Self {
        let (height, width) = image.dim();
        let mut pixels = Vec::new();
        let mut weights = Vec::new();
        for c in 0..width {
            for r in 0..height {
                let w = image[[r, c]];
                if w != 0.0 {
                    pixels.push((r + c * height + 1) as u32);
                    weights.push(w);
                }
            }
        }
        Self { pixels, weights }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Decode into a dense `[height, width]` image.
    pub fn to_image(&self, height: usize, width: usize) -> PipelineResult<Array2<f64>> {
        let mut image = Array2::zeros((height, width));
        scatter(&self.pixels, &self.weights, height, width, |r, c, w| {
            image[[r, c]] = w;
        })?;
        Ok(image)
    }
}

fn scatter(
    pixels: &[u32],
    weights: &[f64],
    height: usize,
    width: usize,
    mut put: impl FnMut(usize, usize, f64),
) -> PipelineResult<()> {
    if pixels.len() != weights.len() {
        return Err(PipelineError::geometry(format!(
            "mask has {} pixel indices but {} weights",
            pixels.len(),
            weights.len()
        )));
    }

    let npixels = height * width;
    for (&p, &w) in pixels.iter().zip(weights) {
        let p = p as usize;
        if p == 0 || p > npixels {
            return Err(PipelineError::geometry(format!(
                "pixel index {p} outside [1, {npixels}] for a {height}x{width} image"
            )));
        }
        let i = p - 1;
        put(i % height, i / height, w);
    }
    Ok(())
}

/// Reassemble sparse masks into a dense `[height, width, num_masks]` stack.
///
/// Mask `k` is scattered into a zero image at `pixel_index - 1` and laid out
/// in column-major order.
pub fn reshape_masks(
    pixel_indices: &[Vec<u32>],
    weights: &[Vec<f64>],
    height: usize,
    width: usize,
) -> PipelineResult<Array3<f64>> {
    if pixel_indices.len() != weights.len() {
        return Err(PipelineError::geometry(format!(
            "{} pixel lists for {} weight lists",
            pixel_indices.len(),
            weights.len()
        )));
    }

    let mut masks = Array3::zeros((height, width, pixel_indices.len()));
    for (k, (px, w)) in pixel_indices.iter().zip(weights).enumerate() {
        scatter(px, w, height, width, |r, c, v| masks[[r, c, k]] = v)?;
    }
    Ok(masks)
}

/// Stack raw traces into `[num_traces, num_frames]`.
///
/// Rows are grouped by channel and ordered by ascending trace id within each
/// channel. Missing ids are simply absent, rows are not padded to a dense id
/// range.
pub fn get_all_traces(records: &[TraceRecord]) -> PipelineResult<Array2<f64>> {
    let mut ordered: Vec<&TraceRecord> = records.iter().collect();
    ordered.sort_by_key(|r| (r.channel, r.trace_id));

    let nframes = ordered.first().map(|r| r.trace.len()).unwrap_or(0);
    let mut stacked = Array2::zeros((ordered.len(), nframes));
    for (row, record) in ordered.iter().enumerate() {
        if record.trace.len() != nframes {
            return Err(PipelineError::geometry(format!(
                "trace {} has {} samples, expected {}",
                record.trace_id,
                record.trace.len(),
                nframes
            )));
        }
        stacked
            .row_mut(row)
            .iter_mut()
            .zip(&record.trace)
            .for_each(|(dst, &v)| *dst = v);
    }
    Ok(stacked)
}

/// One segmentation tile: a mask covering a sub-rectangle of the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMask {
    /// First row, 1-based inclusive
    pub row_start: usize,
    /// Last row, 1-based inclusive
    pub row_end: usize,
    /// First column, 1-based inclusive
    pub col_start: usize,
    /// Last column, 1-based inclusive
    pub col_end: usize,
    pub mask: Array2<f64>,
}

/// Place tile masks into a dense `[height, width, num_tiles]` stack.
pub fn assemble_tile_masks(
    tiles: &[TileMask],
    height: usize,
    width: usize,
) -> PipelineResult<Array3<f64>> {
    let mut masks = Array3::zeros((height, width, tiles.len()));

    for (k, tile) in tiles.iter().enumerate() {
        let valid_rows = tile.row_start >= 1 && tile.row_start <= tile.row_end && tile.row_end <= height;
        let valid_cols = tile.col_start >= 1 && tile.col_start <= tile.col_end && tile.col_end <= width;
        if !valid_rows || !valid_cols {
            return Err(PipelineError::geometry(format!(
                "tile {} bounds rows {}..={} cols {}..={} exceed a {}x{} image",
                k + 1,
                tile.row_start,
                tile.row_end,
                tile.col_start,
                tile.col_end,
                height,
                width
            )));
        }

        let rows = tile.row_end - tile.row_start + 1;
        let cols = tile.col_end - tile.col_start + 1;
        if tile.mask.dim() != (rows, cols) {
            return Err(PipelineError::geometry(format!(
                "tile {} mask has shape {:?}, bounds describe {}x{}",
                k + 1,
                tile.mask.dim(),
                rows,
                cols
            )));
        }

        masks
            .slice_mut(s![
                tile.row_start - 1..tile.row_end,
                tile.col_start - 1..tile.col_end,
                k
            ])
            .assign(&tile.mask);
    }

    Ok(masks)
}
