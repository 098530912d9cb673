//! 1-D smoothing and band-pass filters for calcium traces.
//!
//! Filters are built from normalized Hamming windows. Convolution renormalizes
//! the kernel over the samples that fall inside the signal, so a constant
//! signal stays exactly constant up to the edges and a difference of two
//! low-pass filters removes any constant offset everywhere.

use std::f64::consts::PI;
use thiserror::Error;

/// Errors that can occur while building filters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("cutoff {0} must lie in (0, 0.5] as a fraction of the sampling rate")]
    InvalidCutoff(f64),
}

/// Symmetric Hamming window of length `n`.
///
/// `w[k] = 0.54 - 0.46 cos(2πk / (n - 1))`. A window of length one is `[1.0]`.
pub fn hamming(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (n - 1) as f64;
            (0..n)
                .map(|k| 0.54 - 0.46 * (2.0 * PI * k as f64 / denom).cos())
                .collect()
        }
    }
}

/// Low-pass kernel for a cutoff given as a fraction of the sampling rate.
///
/// The window spans roughly one period of the cutoff frequency: its length is
/// `2 * floor(1 / (2 * cutoff)) + 1` taps, normalized to unit sum. A cutoff of
/// 0.03 yields a 33-tap kernel, a cutoff of 1/8 a 9-tap kernel.
pub fn lowpass_kernel(cutoff: f64) -> Result<Vec<f64>, FilterError> {
    if !(cutoff > 0.0 && cutoff <= 0.5) {
        return Err(FilterError::InvalidCutoff(cutoff));
    }

    let half_width = (1.0 / (2.0 * cutoff)).floor() as usize;
    let mut kernel = hamming(2 * half_width + 1);
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);
    Ok(kernel)
}

/// Convolve `signal` with a centered odd-length `kernel`.
///
/// Output has the same length as the input. Near the edges the kernel is
/// truncated and renormalized by the sum of the taps that overlap the signal.
pub fn smooth(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = signal.len();
    let half = kernel.len() / 2;

    (0..n)
        .map(|i| {
            let mut acc = 0.0;
            let mut weight = 0.0;
            for (j, &k) in kernel.iter().enumerate() {
                let idx = i as isize + j as isize - half as isize;
                if idx >= 0 && (idx as usize) < n {
                    acc += k * signal[idx as usize];
                    weight += k;
                }
            }
            if weight > 0.0 {
                acc / weight
            } else {
                0.0
            }
        })
        .collect()
}

/// Band-pass filter as a difference of two low-pass filters.
///
/// The signal is denoised with a narrow kernel (`denoise_cutoff`, e.g. 1/8 of
/// the sampling rate) and the slow component found with a wide kernel
/// (`unsharp_cutoff`, e.g. 0.03 of the sampling rate) is subtracted, a gentle
/// unsharp mask.
pub fn band_pass(
    signal: &[f64],
    unsharp_cutoff: f64,
    denoise_cutoff: f64,
) -> Result<Vec<f64>, FilterError> {
    let wide = lowpass_kernel(unsharp_cutoff)?;
    let narrow = lowpass_kernel(denoise_cutoff)?;

    let denoised = smooth(signal, &narrow);
    let background = smooth(signal, &wide);

    Ok(denoised
        .iter()
        .zip(&background)
        .map(|(d, b)| d - b)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_hamming_shape() {
        let w = hamming(5);
        assert_eq!(w.len(), 5);
        assert_relative_eq!(w[0], 0.08, epsilon = 1e-12);
        assert_relative_eq!(w[2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(w[0], w[4], epsilon = 1e-12);
        assert_eq!(hamming(1), vec![1.0]);
        assert!(hamming(0).is_empty());
    }

    #[test]
    fn test_lowpass_kernel_lengths() {
        let wide = lowpass_kernel(0.03).unwrap();
        let narrow = lowpass_kernel(0.125).unwrap();
        assert_eq!(wide.len(), 33);
        assert_eq!(narrow.len(), 9);
        assert_relative_eq!(wide.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(narrow.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_lowpass_kernel_rejects_bad_cutoff() {
        assert_eq!(lowpass_kernel(0.0), Err(FilterError::InvalidCutoff(0.0)));
        assert_eq!(lowpass_kernel(0.7), Err(FilterError::InvalidCutoff(0.7)));
        assert!(lowpass_kernel(f64::NAN).is_err());
    }

    #[test]
    fn test_smooth_preserves_constant_including_edges() {
        let signal = vec![3.5; 20];
        let kernel = lowpass_kernel(0.1).unwrap();
        for v in smooth(&signal, &kernel) {
            assert_relative_eq!(v, 3.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_band_pass_removes_offset() {
        let signal = vec![100.0; 64];
        for v in band_pass(&signal, 0.03, 0.125).unwrap() {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_band_pass_is_linear() {
        let a: Vec<f64> = (0..80).map(|i| (i as f64 * 0.4).sin()).collect();
        let b: Vec<f64> = a.iter().map(|v| 3.0 * v + 7.0).collect();

        let fa = band_pass(&a, 0.03, 0.125).unwrap();
        let fb = band_pass(&b, 0.03, 0.125).unwrap();
        for (x, y) in fa.iter().zip(&fb) {
            assert_abs_diff_eq!(3.0 * x, *y, epsilon = 1e-9);
        }
    }
}
