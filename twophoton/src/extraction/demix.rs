//! Interface to the external demix-and-deconvolve routine, plus a
//! deterministic stand-in used by tests and the demonstration binary.

use ndarray::{Array1, Array2, Array3, Axis};
use std::cell::{Cell, RefCell};

use super::params::CnmfParams;
use crate::error::{BoxError, PipelineError, PipelineResult};

/// Everything the demixing routine returns for one movie.
///
/// Pixel axes enumerate the image in column-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct DemixOutput {
    /// Spatial footprints, `[pixels, components]`
    pub spatial: Array2<f64>,
    /// Denoised activity, `[components, frames]`
    pub temporal: Array2<f64>,
    /// Background footprints, `[pixels, background]`
    pub background_spatial: Array2<f64>,
    /// Background activity, `[background, frames]`
    pub background_temporal: Array2<f64>,
    /// Raw traces, `[components, frames]`
    pub raw_traces: Array2<f64>,
    /// Deconvolved spikes, `[components, frames]`
    pub spikes: Array2<f64>,
    /// Autoregressive coefficients, `[components, ar_order]`
    pub ar_params: Array2<f64>,
}

impl DemixOutput {
    pub fn num_components(&self) -> usize {
        self.spatial.ncols()
    }

    /// Check every matrix against the movie it was computed from.
    pub fn validate(&self, npixels: usize, nframes: usize, ar_order: usize) -> PipelineResult<()> {
        let k = self.num_components();
        let nb = self.background_spatial.ncols();

        let checks = [
            ("spatial", self.spatial.dim(), (npixels, k)),
            ("temporal", self.temporal.dim(), (k, nframes)),
            ("raw traces", self.raw_traces.dim(), (k, nframes)),
            ("spikes", self.spikes.dim(), (k, nframes)),
            ("background spatial", self.background_spatial.dim(), (npixels, nb)),
            ("background activity", self.background_temporal.dim(), (nb, nframes)),
        ];
        for (name, got, expected) in checks {
            if got != expected {
                return Err(PipelineError::geometry(format!(
                    "demix {name} has shape {got:?}, expected {expected:?}"
                )));
            }
        }

        if ar_order > 0 && self.ar_params.dim() != (k, ar_order) {
            return Err(PipelineError::geometry(format!(
                "demix AR parameters have shape {:?}, expected {:?}",
                self.ar_params.dim(),
                (k, ar_order)
            )));
        }
        Ok(())
    }
}

/// External source-extraction routine.
///
/// Receives a corrected movie `[height, width, frames]` and the parameter
/// set; any failure is passed through unchanged.
pub trait DemixRoutine {
    fn demix(&self, movie: &Array3<f64>, params: &CnmfParams) -> Result<DemixOutput, BoxError>;

    /// Name reported when the routine fails.
    fn name(&self) -> &'static str {
        "cnmf"
    }
}

/// Decay used by [`MockDemix`] to derive spikes from raw traces.
const MOCK_DECAY: f64 = 0.9;

#[derive(Debug, Clone)]
enum MockBehavior {
    /// Per-call raw traces; component `k` owns pixel `k`.
    Scripted(Vec<Vec<Vec<f64>>>),
    /// Fixed spatial footprints `[height, width]`; traces read from the movie.
    Footprints(Vec<Array2<f64>>),
    Failing(String),
}

/// Deterministic demixing stand-in.
///
/// Records how often it was called and the parameters it received.
#[derive(Debug)]
pub struct MockDemix {
    behavior: MockBehavior,
    calls: Cell<usize>,
    params: RefCell<Vec<CnmfParams>>,
}

impl MockDemix {
    fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Cell::new(0),
            params: RefCell::new(Vec::new()),
        }
    }

    /// Return the same raw traces on every call.
    pub fn with_traces(traces: Vec<Vec<f64>>) -> Self {
        Self::scripted(vec![traces])
    }

    /// Return `script[i % script.len()]` as raw traces on call `i`.
    pub fn scripted(script: Vec<Vec<Vec<f64>>>) -> Self {
        Self::with_behavior(MockBehavior::Scripted(script))
    }

    /// Read each footprint's weighted mean out of the movie.
    pub fn with_footprints(footprints: Vec<Array2<f64>>) -> Self {
        Self::with_behavior(MockBehavior::Footprints(footprints))
    }

    /// Fail every call with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_behavior(MockBehavior::Failing(message.into()))
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn received_params(&self) -> Vec<CnmfParams> {
        self.params.borrow().clone()
    }

    fn scripted_traces(
        &self,
        script: &[Vec<Vec<f64>>],
        call: usize,
        nframes: usize,
    ) -> Result<Array2<f64>, BoxError> {
        let traces = if script.is_empty() {
            &[][..]
        } else {
            &script[call % script.len()][..]
        };
        let mut out = Array2::zeros((traces.len(), nframes));
        for (k, trace) in traces.iter().enumerate() {
            if trace.len() != nframes {
                return Err(format!(
                    "scripted trace {k} has {} samples for a {nframes}-frame movie",
                    trace.len()
                )
                .into());
            }
            out.row_mut(k).assign(&Array1::from(trace.clone()));
        }
        Ok(out)
    }
}

impl DemixRoutine for MockDemix {
    fn demix(&self, movie: &Array3<f64>, params: &CnmfParams) -> Result<DemixOutput, BoxError> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        self.params.borrow_mut().push(params.clone());

        let (height, width, nframes) = movie.dim();
        let npixels = height * width;

        let (spatial, raw_traces) = match &self.behavior {
            MockBehavior::Failing(message) => return Err(message.clone().into()),
            MockBehavior::Scripted(script) => {
                let raw = self.scripted_traces(script, call, nframes)?;
                let k = raw.nrows();
                if k > npixels {
                    return Err(format!("{k} components do not fit {npixels} pixels").into());
                }
                let mut spatial = Array2::zeros((npixels, k));
                for i in 0..k {
                    spatial[[i, i]] = 1.0;
                }
                (spatial, raw)
            }
            MockBehavior::Footprints(footprints) => {
                let mut spatial = Array2::zeros((npixels, footprints.len()));
                let mut raw = Array2::zeros((footprints.len(), nframes));
                for (k, fp) in footprints.iter().enumerate() {
                    if fp.dim() != (height, width) {
                        return Err(format!(
                            "footprint {k} has shape {:?}, movie frames are {height}x{width}",
                            fp.dim()
                        )
                        .into());
                    }
                    let total: f64 = fp.sum();
                    if total <= 0.0 {
                        return Err(format!("footprint {k} has no positive weight").into());
                    }
                    for c in 0..width {
                        for r in 0..height {
                            spatial[[r + c * height, k]] = fp[[r, c]];
                        }
                    }
                    for t in 0..nframes {
                        let frame = movie.index_axis(Axis(2), t);
                        raw[[k, t]] = (&frame * fp).sum() / total;
                    }
                }
                (spatial, raw)
            }
        };

        let k = raw_traces.nrows();
        let temporal = raw_traces.clone();
        let mut spikes = Array2::zeros((k, nframes));
        for i in 0..k {
            for t in 0..nframes {
                let prev = if t == 0 { 0.0 } else { temporal[[i, t - 1]] };
                spikes[[i, t]] = (temporal[[i, t]] - MOCK_DECAY * prev).max(0.0);
            }
        }

        let mut ar_params = Array2::zeros((k, params.ar_order));
        if params.ar_order > 0 {
            ar_params.column_mut(0).fill(MOCK_DECAY);
        }

        // First background component is the mean frame at unit activity
        let nb = params.background_components.max(1);
        let mut background_spatial = Array2::zeros((npixels, nb));
        let mut background_temporal = Array2::zeros((nb, nframes));
        if let Some(mean) = movie.mean_axis(Axis(2)) {
            for c in 0..width {
                for r in 0..height {
                    background_spatial[[r + c * height, 0]] = mean[[r, c]];
                }
            }
        }
        background_temporal.row_mut(0).fill(1.0);

        Ok(DemixOutput {
            spatial,
            temporal,
            background_spatial,
            background_temporal,
            raw_traces,
            spikes,
            ar_params,
        })
    }

    fn name(&self) -> &'static str {
        "mock-demix"
    }
}
