//! Linear interpolation and gap filling.
//!
//! - **`interp`**: bounds-checked interpolation on sorted abscissae
//! - **`interp_clamped`**: interpolation that holds the edge values outside the range
//! - **`fill_nans`**: replace undefined samples of a trace by interpolation

use thiserror::Error;

/// Errors that can occur during interpolation operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("Value {0} is out of bounds for interpolation range [{1}, {2}]")]
    OutOfBounds(f64, f64, f64),
    #[error("Input vectors must have at least 2 points")]
    InsufficientData,
    #[error("Input vectors must have the same length")]
    MismatchedLengths,
    #[error("X values must be sorted in ascending order")]
    UnsortedData,
}

fn validate(xs: &[f64], ys: &[f64]) -> Result<(), InterpError> {
    if xs.len() != ys.len() {
        return Err(InterpError::MismatchedLengths);
    }
    if xs.len() < 2 {
        return Err(InterpError::InsufficientData);
    }
    if xs.windows(2).any(|w| w[1] < w[0]) {
        return Err(InterpError::UnsortedData);
    }
    Ok(())
}

// Caller guarantees xs sorted and xs[0] <= x <= xs[n-1].
fn interp_inside(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let idx = xs.partition_point(|&v| v <= x);
    if idx == 0 {
        return ys[0];
    }
    if idx >= xs.len() {
        return ys[xs.len() - 1];
    }

    let (x0, x1) = (xs[idx - 1], xs[idx]);
    let (y0, y1) = (ys[idx - 1], ys[idx]);
    if x1 == x0 {
        return y0;
    }
    let t = (x - x0) / (x1 - x0);
    y0 + t * (y1 - y0)
}

/// Performs linear interpolation on 1D data using binary search.
///
/// # Arguments
/// * `x` - The x-coordinate at which to interpolate
/// * `xs` - Array of x-coordinates (must be sorted in ascending order)
/// * `ys` - Array of corresponding y-values (must match length of xs)
///
/// # Returns
/// * `Ok(f64)` - The interpolated y-value at position x
/// * `Err(InterpError)` - If x is outside `[xs[0], xs[n-1]]` or the inputs are invalid
pub fn interp(x: f64, xs: &[f64], ys: &[f64]) -> Result<f64, InterpError> {
    validate(xs, ys)?;

    let (lo, hi) = (xs[0], xs[xs.len() - 1]);
    if x < lo || x > hi {
        return Err(InterpError::OutOfBounds(x, lo, hi));
    }

    Ok(interp_inside(x, xs, ys))
}

/// Linear interpolation that returns the first/last y value outside the range.
///
/// A single sample is accepted and yields a constant.
pub fn interp_clamped(x: f64, xs: &[f64], ys: &[f64]) -> Result<f64, InterpError> {
    if xs.len() == 1 && ys.len() == 1 {
        return Ok(ys[0]);
    }
    validate(xs, ys)?;

    let last = xs.len() - 1;
    if x <= xs[0] {
        Ok(ys[0])
    } else if x >= xs[last] {
        Ok(ys[last])
    } else {
        Ok(interp_inside(x, xs, ys))
    }
}

/// Fill NaN samples of a trace.
///
/// Every NaN is replaced by linear interpolation between its nearest defined
/// neighbors; NaNs before the first or after the last defined sample take that
/// sample's value. Defined samples are returned unchanged. A trace with no
/// defined sample becomes all zeros.
pub fn fill_nans(trace: &[f64]) -> Vec<f64> {
    let defined: Vec<usize> = (0..trace.len()).filter(|&i| !trace[i].is_nan()).collect();

    if defined.is_empty() {
        return vec![0.0; trace.len()];
    }

    let mut filled = trace.to_vec();
    let first = defined[0];
    let last = defined[defined.len() - 1];

    filled[..first].fill(trace[first]);
    filled[last + 1..].fill(trace[last]);

    for pair in defined.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let (ya, yb) = (trace[a], trace[b]);
        let span = (b - a) as f64;
        for (i, value) in filled.iter_mut().enumerate().take(b).skip(a + 1) {
            let t = (i - a) as f64 / span;
            *value = ya + t * (yb - ya);
        }
    }

    filled
}
