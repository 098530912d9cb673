//! calcium-math - Numerical primitives for calcium-imaging trace processing
//!
//! This crate provides the small set of numerical building blocks used by the
//! two-photon preprocessing pipeline, kept free of any domain types:
//!
//! - **Statistics** - median, percentile, Pearson correlation, Theil-Sen regression
//! - **Filtering** - Hamming windows, edge-normalized low-pass and band-pass filters
//! - **Interpolation** - clamped linear interpolation and NaN gap filling
//! - **Spectra** - integration of sampled emission spectra over a filter passband
//!
//! # Example
//!
//! ```
//! use calcium_math::{fill_nans, theil_sen};
//!
//! let filled = fill_nans(&[1.0, f64::NAN, 3.0]);
//! assert_eq!(filled, vec![1.0, 2.0, 3.0]);
//!
//! let x = [0.0, 1.0, 2.0, 3.0];
//! let y = [1.0, 3.0, 5.0, 7.0];
//! let fit = theil_sen(&x, &y, 1000, 0).unwrap();
//! assert!((fit.slope - 2.0).abs() < 1e-12);
//! ```

pub mod filter;
pub mod interp;
pub mod spectrum;
pub mod stats;

pub use filter::{band_pass, hamming, lowpass_kernel, smooth, FilterError};
pub use interp::{fill_nans, interp, interp_clamped, InterpError};
pub use spectrum::band_integral;
pub use stats::{median, pearson_correlation, percentile, theil_sen, LinearFit, RegressionError};
