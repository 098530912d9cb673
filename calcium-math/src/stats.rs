//! Statistical functions for trace analysis and robust fitting

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Errors produced by the statistics and regression routines.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegressionError {
    /// Inputs disagree in length.
    #[error("input vectors must have the same length ({0} vs {1})")]
    MismatchedLengths(usize, usize),

    /// Not enough finite samples to fit or summarize.
    #[error("insufficient data: {available} finite values, {required} required")]
    InsufficientData { available: usize, required: usize },

    /// Every candidate pair shared the same x value.
    #[error("degenerate regressor: all x values are identical")]
    DegenerateRegressor,
}

/// Result of a straight-line fit `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Evaluate the fitted line at `x`.
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Calculate median of a slice of f64 values
///
/// NaN values are ignored. For even-length data, returns the average of the
/// two middle values.
pub fn median(values: &[f64]) -> Result<f64, RegressionError> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid.is_empty() {
        return Err(RegressionError::InsufficientData {
            available: 0,
            required: 1,
        });
    }

    valid.sort_by(f64::total_cmp);

    let mid = valid.len() / 2;
    let median_value = if valid.len() % 2 == 0 {
        (valid[mid - 1] + valid[mid]) / 2.0
    } else {
        valid[mid]
    };

    Ok(median_value)
}

/// Percentile with linear interpolation between closest ranks.
///
/// `q` is given in percent (0-100) and is clamped to that range. NaN values
/// are ignored. Matches the default ("linear") behavior of the common
/// array-library percentile routines.
pub fn percentile(values: &[f64], q: f64) -> Result<f64, RegressionError> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid.is_empty() {
        return Err(RegressionError::InsufficientData {
            available: 0,
            required: 1,
        });
    }

    valid.sort_by(f64::total_cmp);

    let rank = q.clamp(0.0, 100.0) / 100.0 * (valid.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;

    Ok(valid[lower] + (valid[upper] - valid[lower]) * frac)
}

/// Calculate Pearson correlation coefficient between two samples
///
/// Returns correlation in range [-1, 1], or NaN if samples have zero variance
/// or mismatched lengths.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return f64::NAN;
    }

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let (cov, var_x, var_y) = x.iter().zip(y).fold((0.0, 0.0, 0.0), |acc, (&xi, &yi)| {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        (acc.0 + dx * dy, acc.1 + dx * dx, acc.2 + dy * dy)
    });

    if var_x < 1e-12 || var_y < 1e-12 {
        return f64::NAN;
    }

    cov / (var_x.sqrt() * var_y.sqrt())
}

/// Theil-Sen robust line fit.
///
/// The slope is the median of the pairwise slopes `(y_j - y_i) / (x_j - x_i)`
/// and the intercept is the median of `y - slope * x`. Non-finite samples are
/// dropped first. When the number of pairs exceeds `max_pairs`, that many
/// pairs are drawn at random from an RNG seeded with `seed`, so results are
/// reproducible for a given input.
///
/// # Arguments
/// * `x` - Regressor samples
/// * `y` - Response samples, same length as `x`
/// * `max_pairs` - Upper bound on the number of pairwise slopes evaluated
/// * `seed` - Seed for pair subsampling
pub fn theil_sen(
    x: &[f64],
    y: &[f64],
    max_pairs: usize,
    seed: u64,
) -> Result<LinearFit, RegressionError> {
    if x.len() != y.len() {
        return Err(RegressionError::MismatchedLengths(x.len(), y.len()));
    }

    let points: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(xi, yi)| xi.is_finite() && yi.is_finite())
        .map(|(&xi, &yi)| (xi, yi))
        .collect();

    let n = points.len();
    if n < 2 {
        return Err(RegressionError::InsufficientData {
            available: n,
            required: 2,
        });
    }

    let pair_slope = |i: usize, j: usize| -> Option<f64> {
        let (xi, yi) = points[i];
        let (xj, yj) = points[j];
        let dx = xj - xi;
        if dx == 0.0 {
            None
        } else {
            Some((yj - yi) / dx)
        }
    };

    let total_pairs = n * (n - 1) / 2;
    let mut slopes = Vec::with_capacity(total_pairs.min(max_pairs.max(1)));

    if total_pairs <= max_pairs {
        for i in 0..n {
            for j in (i + 1)..n {
                slopes.extend(pair_slope(i, j));
            }
        }
    } else {
        let mut rng = StdRng::seed_from_u64(seed);
        while slopes.len() < max_pairs.max(1) {
            let i = rng.gen_range(0..n);
            let j = rng.gen_range(0..n);
            if i != j {
                slopes.extend(pair_slope(i, j));
            }
            // Bail out if the sampled pairs keep landing on identical x
            if slopes.is_empty() && points.iter().all(|p| p.0 == points[0].0) {
                break;
            }
        }
    }

    if slopes.is_empty() {
        return Err(RegressionError::DegenerateRegressor);
    }

    let slope = median(&slopes)?;
    let residuals: Vec<f64> = points.iter().map(|(xi, yi)| yi - slope * xi).collect();
    let intercept = median(&residuals)?;

    Ok(LinearFit { slope, intercept })
}
