//! Nonnegative deconvolution with the OASIS active-set algorithm.
//!
//! Solves the AR(1) problem
//!
//! ```text
//! minimize  1/2 ||y - c||^2 + lambda ||s||_1
//! subject to c[t] = gamma * c[t-1] + s[t],  s[t] >= 0
//! ```
//!
//! over a whole trace at once (Friedrich, Zhou & Paninski, 2017). The trace
//! is partitioned into pools within which calcium decays freely; adjacent
//! pools are merged while the decay constraint is violated.

use calcium_math::percentile;

use super::NonnegativeDeconvolver;
use crate::config::OasisConfig;
use crate::error::BoxError;

#[derive(Debug, Clone, Copy)]
struct Pool {
    /// Calcium level at the first sample of the pool
    value: f64,
    weight: f64,
    start: usize,
    len: usize,
}

/// Batch OASIS deconvolver for AR(1) calcium dynamics.
#[derive(Debug, Clone, PartialEq)]
pub struct OasisDeconvolver {
    /// Decay time constant (s)
    pub tau: f64,
    /// L1 penalty on spikes
    pub sparsity: f64,
    /// Percentile of the trace subtracted as baseline
    pub baseline_percentile: f64,
}

impl OasisDeconvolver {
    pub fn new(tau: f64, sparsity: f64) -> Self {
        Self {
            tau,
            sparsity,
            baseline_percentile: 8.0,
        }
    }

    pub fn from_config(config: &OasisConfig) -> Self {
        Self {
            tau: config.tau,
            sparsity: config.sparsity,
            baseline_percentile: config.baseline_percentile,
        }
    }

    /// Per-sample decay for a sampling interval `dt`.
    pub fn gamma(&self, dt: f64) -> f64 {
        (-dt / self.tau).exp()
    }

    /// Denoised calcium and spikes for a baseline-free trace.
    pub fn solve(&self, y: &[f64], gamma: f64) -> (Vec<f64>, Vec<f64>) {
        let n = y.len();
        let lambda = self.sparsity;
        let mut pools: Vec<Pool> = Vec::with_capacity(n);

        for (t, &yt) in y.iter().enumerate() {
            let shift = if t + 1 == n { lambda } else { lambda * (1.0 - gamma) };
            pools.push(Pool {
                value: yt - shift,
                weight: 1.0,
                start: t,
                len: 1,
            });

            while pools.len() > 1 {
                let last = pools.len() - 1;
                let prev = pools[last - 1];
                let curr = pools[last];
                let decay = gamma.powi(prev.len as i32);
                if curr.value >= decay * prev.value {
                    break;
                }
                let weight = prev.weight + decay * decay * curr.weight;
                pools[last - 1] = Pool {
                    value: (prev.weight * prev.value + decay * curr.weight * curr.value) / weight,
                    weight,
                    start: prev.start,
                    len: prev.len + curr.len,
                };
                pools.pop();
            }
        }

        let mut calcium = vec![0.0; n];
        for pool in &pools {
            let mut level = pool.value.max(0.0);
            for c in calcium.iter_mut().skip(pool.start).take(pool.len) {
                *c = level;
                level *= gamma;
            }
        }

        let spikes = (0..n)
            .map(|t| {
                let prev = if t == 0 { 0.0 } else { gamma * calcium[t - 1] };
                (calcium[t] - prev).max(0.0)
            })
            .collect();

        (calcium, spikes)
    }
}

impl Default for OasisDeconvolver {
    fn default() -> Self {
        Self::from_config(&OasisConfig::default())
    }
}

impl NonnegativeDeconvolver for OasisDeconvolver {
    fn deconvolve(&self, trace: &[f64], dt: f64) -> Result<Vec<f64>, BoxError> {
        if !(dt > 0.0) || !(self.tau > 0.0) {
            return Err(format!("invalid time step {dt} or decay constant {}", self.tau).into());
        }
        if trace.is_empty() {
            return Ok(Vec::new());
        }
        if trace.iter().any(|v| !v.is_finite()) {
            return Err("trace contains undefined samples".into());
        }

        let baseline = percentile(trace, self.baseline_percentile)?;
        let centered: Vec<f64> = trace.iter().map(|v| v - baseline).collect();
        let (_, spikes) = self.solve(&centered, self.gamma(dt));
        Ok(spikes)
    }

    fn name(&self) -> &'static str {
        "oasis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ar1_trace(n: usize, gamma: f64, spikes: &[(usize, f64)]) -> Vec<f64> {
        let mut c = vec![0.0; n];
        for t in 0..n {
            let prev = if t == 0 { 0.0 } else { gamma * c[t - 1] };
            let s = spikes
                .iter()
                .filter(|(at, _)| *at == t)
                .map(|(_, a)| a)
                .sum::<f64>();
            c[t] = prev + s;
        }
        c
    }

    #[test]
    fn test_recovers_noise_free_spikes() {
        let dt = 0.1;
        let deconv = OasisDeconvolver::new(0.5, 0.0);
        let gamma = deconv.gamma(dt);
        let trace = ar1_trace(120, gamma, &[(20, 3.0), (60, 1.5)]);

        let spikes = deconv.deconvolve(&trace, dt).unwrap();
        assert_eq!(spikes.len(), 120);
        assert_abs_diff_eq!(spikes[20], 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(spikes[60], 1.5, epsilon = 1e-9);
        let rest: f64 = spikes
            .iter()
            .enumerate()
            .filter(|(t, _)| *t != 20 && *t != 60)
            .map(|(_, s)| s)
            .sum();
        assert_abs_diff_eq!(rest, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_output_is_nonnegative() {
        let trace: Vec<f64> = (0..200).map(|t| ((t as f64) * 0.37).sin() * 2.0).collect();
        let spikes = OasisDeconvolver::new(0.3, 0.1).deconvolve(&trace, 1.0 / 15.0).unwrap();
        assert!(spikes.iter().all(|s| *s >= 0.0));
    }

    #[test]
    fn test_fast_decay_is_pooled() {
        // Falling faster than the decay allows violates the constraint, so
        // all samples end up in one pool
        let deconv = OasisDeconvolver::new(1.0, 0.0);
        let (calcium, _) = deconv.solve(&[1.0, 0.2, 0.1], 0.9);
        assert!(calcium[0] >= calcium[1] && calcium[1] >= calcium[2]);
        assert_abs_diff_eq!(calcium[1], 0.9 * calcium[0], epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_undefined_samples() {
        let err = OasisDeconvolver::default()
            .deconvolve(&[1.0, f64::NAN], 0.1)
            .unwrap_err();
        assert!(err.to_string().contains("undefined"));
    }
}
