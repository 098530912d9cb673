//! Ratiometric unmixing for Twitch-type FRET indicators.
//!
//! Green (acceptor) and blue (donor) fluorescence of a component are modeled
//! as
//!
//! ```text
//! g = F * ((1 - x) * eg_free + x * eg_loaded)
//! b = gamma * F * ((1 - x) * eb_free + x * eb_loaded)
//! ```
//!
//! where `x` is the calcium-bound fraction, `F` the overall brightness, the
//! `e` terms the fraction of each state's emission collected by each filter,
//! and `gamma` the unknown relative gain of the blue channel. Fast changes in
//! `x` move green and blue in opposite directions, so the slope of
//! band-passed green against band-passed blue is `d_eg / (gamma * d_eb)`,
//! which yields `gamma`. With `gamma` known, `x` follows in closed form.

use calcium_math::{band_integral, band_pass, fill_nans, theil_sen};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::{Passband, TwitchConfig};
use crate::error::{PipelineError, PipelineResult};

/// Emission spectra of the free and calcium-loaded indicator states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionSpectra {
    /// Sample wavelengths (nm), ascending
    pub wavelengths: Vec<f64>,
    pub free: Vec<f64>,
    pub loaded: Vec<f64>,
}

/// Fraction of each state's emission collected through each filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmissionFractions {
    pub green_free: f64,
    pub green_loaded: f64,
    pub blue_free: f64,
    pub blue_loaded: f64,
}

impl EmissionFractions {
    pub fn from_spectra(
        spectra: &EmissionSpectra,
        green: Passband,
        blue: Passband,
    ) -> PipelineResult<Self> {
        let wl = &spectra.wavelengths;
        let integrate = |values: &[f64], lo: f64, hi: f64| {
            band_integral(wl, values, lo, hi).map_err(|e| {
                PipelineError::configuration(format!("invalid emission spectrum: {e}"))
            })
        };

        let (first, last) = match (wl.first(), wl.last()) {
            (Some(&a), Some(&b)) => (a, b),
            _ => return Err(PipelineError::configuration("emission spectrum is empty")),
        };

        let fraction = |values: &[f64], band: Passband| -> PipelineResult<f64> {
            let total = integrate(values, first, last)?;
            if !(total > 0.0) {
                return Err(PipelineError::configuration(
                    "emission spectrum integrates to zero",
                ));
            }
            Ok(integrate(values, band.lo(), band.hi())? / total)
        };

        Ok(Self {
            green_free: fraction(&spectra.free, green)?,
            green_loaded: fraction(&spectra.loaded, green)?,
            blue_free: fraction(&spectra.free, blue)?,
            blue_loaded: fraction(&spectra.loaded, blue)?,
        })
    }

    fn delta_green(&self) -> f64 {
        self.green_loaded - self.green_free
    }

    fn delta_blue(&self) -> f64 {
        self.blue_loaded - self.blue_free
    }
}

/// Estimated blue/green gain ratio of one component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwitchRatio {
    pub gamma: f64,
    /// Robust slope of filtered green against filtered blue, after clamping
    pub slope: f64,
    /// The fitted slope was not negative and was replaced by -1
    pub degenerate: bool,
}

/// First and last index (inclusive) at which both traces are defined.
pub fn shared_support(green: &[f64], blue: &[f64]) -> Option<(usize, usize)> {
    let defined = |i: &usize| !(green[*i] * blue[*i]).is_nan();
    let n = green.len().min(blue.len());
    let first = (0..n).find(defined)?;
    let last = (0..n).rev().find(defined)?;
    Some((first, last))
}

/// Estimate `gamma` from the trimmed green and blue traces.
///
/// A non-negative slope is physically implausible; it is replaced by -1 and
/// reported through [`TwitchRatio::degenerate`]. Too few finite samples for
/// the fit give [`PipelineError::Regression`].
pub fn estimate_twitch_ratio(
    green: &[f64],
    blue: &[f64],
    fractions: &EmissionFractions,
    config: &TwitchConfig,
) -> PipelineResult<TwitchRatio> {
    let filter = |trace: &[f64]| {
        band_pass(&fill_nans(trace), config.unsharp_cutoff, config.denoise_cutoff)
            .map_err(|e| PipelineError::configuration(e.to_string()))
    };
    let green_f = filter(green)?;
    let blue_f = filter(blue)?;

    let fit = theil_sen(&blue_f, &green_f, config.max_pairs, config.seed)?;

    let (slope, degenerate) = if fit.slope < 0.0 {
        (fit.slope, false)
    } else {
        (-1.0, true)
    };

    let gamma = fractions.delta_green() / (slope * fractions.delta_blue());
    if !(gamma.is_finite() && gamma > 0.0) {
        return Err(PipelineError::configuration(format!(
            "emission fractions give gamma={gamma}; loaded state must raise green and lower blue"
        )));
    }

    Ok(TwitchRatio {
        gamma,
        slope,
        degenerate,
    })
}

/// Closed-form calcium-bound fraction for one green/blue sample pair.
pub fn unmix_sample(green: f64, blue: f64, gamma: f64, fractions: &EmissionFractions) -> f64 {
    let numerator = blue * fractions.green_free - gamma * green * fractions.blue_free;
    let denominator = gamma * green * fractions.delta_blue() - blue * fractions.delta_green();
    numerator / denominator
}

/// Outcome of unmixing one component.
#[derive(Debug, Clone, PartialEq)]
pub struct Unmixed {
    /// Full-length ratiometric trace, NaN outside the shared support
    pub trace: Vec<f64>,
    pub ratio: TwitchRatio,
}

/// Unmix one green/blue pair.
///
/// Returns `Ok(None)` when the traces share no defined sample or the
/// robust fit has too little data.
pub fn unmix(
    green: &[f64],
    blue: &[f64],
    fractions: &EmissionFractions,
    config: &TwitchConfig,
) -> PipelineResult<Option<Unmixed>> {
    if green.len() != blue.len() {
        return Err(PipelineError::geometry(format!(
            "green trace has {} samples, blue trace {}",
            green.len(),
            blue.len()
        )));
    }

    let Some((first, last)) = shared_support(green, blue) else {
        return Ok(None);
    };

    let g = &green[first..=last];
    let b = &blue[first..=last];
    let ratio = match estimate_twitch_ratio(g, b, fractions, config) {
        Ok(ratio) => ratio,
        Err(PipelineError::Regression(e)) => {
            warn!("ratiometric fit failed: {e}");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let mut trace = vec![f64::NAN; green.len()];
    for i in first..=last {
        trace[i] = unmix_sample(green[i], blue[i], ratio.gamma, fractions);
    }

    Ok(Some(Unmixed { trace, ratio }))
}
