//! Integration of sampled spectra over a wavelength band.

use crate::interp::{interp, InterpError};

/// Integrate a sampled spectrum over `[lo, hi]`.
///
/// The spectrum is treated as piecewise linear between samples and zero
/// outside the sampled wavelength range, so the integral is exact for the
/// interpolant. Returns 0 when the band does not overlap the samples.
///
/// # Arguments
/// * `wavelengths` - Sample wavelengths, ascending
/// * `values` - Spectrum value at each wavelength
/// * `lo`, `hi` - Band edges in the same units as `wavelengths`
pub fn band_integral(
    wavelengths: &[f64],
    values: &[f64],
    lo: f64,
    hi: f64,
) -> Result<f64, InterpError> {
    if wavelengths.len() != values.len() {
        return Err(InterpError::MismatchedLengths);
    }
    if wavelengths.len() < 2 {
        return Err(InterpError::InsufficientData);
    }
    if wavelengths.windows(2).any(|w| w[1] < w[0]) {
        return Err(InterpError::UnsortedData);
    }

    let first = wavelengths[0];
    let last = wavelengths[wavelengths.len() - 1];
    let a = lo.max(first);
    let b = hi.min(last);
    if b <= a {
        return Ok(0.0);
    }

    let mut knots = Vec::with_capacity(wavelengths.len() + 2);
    knots.push(a);
    knots.extend(wavelengths.iter().copied().filter(|&w| w > a && w < b));
    knots.push(b);

    let mut total = 0.0;
    let mut prev_x = a;
    let mut prev_y = interp(a, wavelengths, values)?;
    for &x in &knots[1..] {
        let y = interp(x, wavelengths, values)?;
        total += 0.5 * (prev_y + y) * (x - prev_x);
        prev_x = x;
        prev_y = y;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flat_spectrum() {
        let wl = [400.0, 500.0, 600.0];
        let v = [2.0, 2.0, 2.0];
        assert_relative_eq!(band_integral(&wl, &v, 450.0, 550.0).unwrap(), 200.0);
    }

    #[test]
    fn test_triangle_spectrum_partial_band() {
        // Peak of 1 at 500, zero at 400 and 600
        let wl = [400.0, 500.0, 600.0];
        let v = [0.0, 1.0, 0.0];
        assert_relative_eq!(band_integral(&wl, &v, 400.0, 600.0).unwrap(), 100.0);
        assert_relative_eq!(band_integral(&wl, &v, 450.0, 500.0).unwrap(), 37.5);
    }

    #[test]
    fn test_band_outside_samples() {
        let wl = [400.0, 500.0];
        let v = [1.0, 1.0];
        assert_eq!(band_integral(&wl, &v, 600.0, 700.0).unwrap(), 0.0);
        // Only the overlapping part counts
        assert_relative_eq!(band_integral(&wl, &v, 350.0, 450.0).unwrap(), 50.0);
    }
}
