//! Spike inference dispatch.
//!
//! A closed set of backends, selected by [`SpikeMethod`]:
//!
//! - **stm**: an external calcium-to-spike model fed gap-filled traces
//! - **nmf**: spike traces already deconvolved during extraction
//! - **oopsi**: nonnegative deconvolution of gap-filled traces at `dt = 1/fps`
//!
//! Every backend's output is normalized to [`SpikeInferenceResult`].

pub mod oasis;

pub use oasis::OasisDeconvolver;

use calcium_math::fill_nans;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BoxError, PipelineError, PipelineResult};
use crate::extraction::records::SpikeTraceRecord;
use crate::scan::RunKey;
use crate::traces::ComputedTrace;

/// Spike inference method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpikeMethod {
    /// Spike-triggered mixture model
    Stm,
    /// Spikes from the demixing routine
    Nmf,
    /// Fast nonnegative deconvolution
    Oopsi,
}

impl SpikeMethod {
    pub const ALL: [SpikeMethod; 3] = [SpikeMethod::Stm, SpikeMethod::Nmf, SpikeMethod::Oopsi];

    /// Numeric identifier used in the method lookup table.
    pub fn id(self) -> u8 {
        match self {
            SpikeMethod::Oopsi => 2,
            SpikeMethod::Stm => 3,
            SpikeMethod::Nmf => 5,
        }
    }

    pub fn from_id(id: u8) -> PipelineResult<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.id() == id)
            .ok_or_else(|| PipelineError::configuration(format!("unimplemented method id {id}")))
    }

    pub fn name(self) -> &'static str {
        match self {
            SpikeMethod::Stm => "stm",
            SpikeMethod::Nmf => "nmf",
            SpikeMethod::Oopsi => "oopsi",
        }
    }
}

impl fmt::Display for SpikeMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpikeMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stm" => Ok(SpikeMethod::Stm),
            "nmf" => Ok(SpikeMethod::Nmf),
            "oopsi" | "fastoopsi" => Ok(SpikeMethod::Oopsi),
            other => Err(PipelineError::configuration(format!(
                "unimplemented method `{other}`"
            ))),
        }
    }
}

/// Inferred spike rate of one trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeInferenceResult {
    pub run: RunKey,
    pub channel: usize,
    pub trace_id: usize,
    pub method: SpikeMethod,
    pub rate: Vec<f64>,
}

/// External calcium-to-spike model.
pub trait CalciumToSpikeModel {
    /// One prediction per input trace, each as long as its input.
    fn predict(&self, traces: &[Vec<f64>], fps: f64) -> Result<Vec<Vec<f64>>, BoxError>;

    fn name(&self) -> &'static str {
        "stm"
    }
}

/// Nonnegative deconvolution backend.
pub trait NonnegativeDeconvolver {
    fn deconvolve(&self, trace: &[f64], dt: f64) -> Result<Vec<f64>, BoxError>;

    fn name(&self) -> &'static str {
        "oopsi"
    }
}

/// Inputs available to the spike backends for one run.
#[derive(Debug, Clone, Copy)]
pub struct SpikeInput<'a> {
    pub computed: &'a [ComputedTrace],
    /// Spike traces persisted by extraction, used by `nmf`
    pub extraction_spikes: &'a [SpikeTraceRecord],
    pub fps: f64,
}

/// Routes trace sets to a spike inference backend.
pub struct SpikeDispatcher {
    deconvolver: Box<dyn NonnegativeDeconvolver>,
    stm: Option<Box<dyn CalciumToSpikeModel>>,
}

impl Default for SpikeDispatcher {
    fn default() -> Self {
        Self::new(Box::new(OasisDeconvolver::default()))
    }
}

impl SpikeDispatcher {
    pub fn new(deconvolver: Box<dyn NonnegativeDeconvolver>) -> Self {
        Self {
            deconvolver,
            stm: None,
        }
    }

    pub fn with_stm_model(mut self, model: Box<dyn CalciumToSpikeModel>) -> Self {
        self.stm = Some(model);
        self
    }

    /// Run `method` over the input and return one result per trace.
    pub fn infer(
        &self,
        method: SpikeMethod,
        input: SpikeInput,
    ) -> PipelineResult<Vec<SpikeInferenceResult>> {
        if method != SpikeMethod::Nmf && !(input.fps > 0.0) {
            return Err(PipelineError::configuration(format!(
                "frame rate must be positive, got {}",
                input.fps
            )));
        }

        let results = match method {
            SpikeMethod::Nmf => input
                .extraction_spikes
                .iter()
                .map(|r| SpikeInferenceResult {
                    run: r.run,
                    channel: r.channel,
                    trace_id: r.trace_id,
                    method,
                    rate: r.spike_trace.clone(),
                })
                .collect(),
            SpikeMethod::Stm => self.infer_stm(input)?,
            SpikeMethod::Oopsi => self.infer_oopsi(input)?,
        };

        info!("{method}: inferred {} spike traces", results.len());
        Ok(results)
    }

    fn infer_stm(&self, input: SpikeInput) -> PipelineResult<Vec<SpikeInferenceResult>> {
        let model = self
            .stm
            .as_ref()
            .ok_or_else(|| PipelineError::configuration("no calcium-to-spike model configured"))?;

        let usable = defined_traces(input.computed);
        let filled: Vec<Vec<f64>> = usable.iter().map(|(_, t)| fill_nans(t)).collect();

        let predictions = model
            .predict(&filled, input.fps)
            .map_err(|e| PipelineError::external(model.name(), e))?;
        if predictions.len() != filled.len() {
            return Err(PipelineError::geometry(format!(
                "{} returned {} predictions for {} traces",
                model.name(),
                predictions.len(),
                filled.len()
            )));
        }

        usable
            .iter()
            .zip(filled.iter().zip(predictions))
            .map(|((trace, _), (input_trace, rate))| {
                if rate.len() != input_trace.len() {
                    return Err(PipelineError::geometry(format!(
                        "prediction for trace {} has {} samples, expected {}",
                        trace.trace_id,
                        rate.len(),
                        input_trace.len()
                    )));
                }
                Ok(SpikeInferenceResult {
                    run: trace.run,
                    channel: trace.channel,
                    trace_id: trace.trace_id,
                    method: SpikeMethod::Stm,
                    rate,
                })
            })
            .collect()
    }

    fn infer_oopsi(&self, input: SpikeInput) -> PipelineResult<Vec<SpikeInferenceResult>> {
        let dt = 1.0 / input.fps;

        defined_traces(input.computed)
            .into_iter()
            .map(|(trace, values)| {
                let filled = fill_nans(values);
                let rate = self
                    .deconvolver
                    .deconvolve(&filled, dt)
                    .map_err(|e| PipelineError::external(self.deconvolver.name(), e))?;
                if rate.len() != filled.len() {
                    return Err(PipelineError::geometry(format!(
                        "deconvolution of trace {} returned {} samples, expected {}",
                        trace.trace_id,
                        rate.len(),
                        filled.len()
                    )));
                }
                Ok(SpikeInferenceResult {
                    run: trace.run,
                    channel: trace.channel,
                    trace_id: trace.trace_id,
                    method: SpikeMethod::Oopsi,
                    rate,
                })
            })
            .collect()
    }
}

/// Computed traces that exist; traces whose unmixing failed are skipped.
fn defined_traces(computed: &[ComputedTrace]) -> Vec<(&ComputedTrace, &[f64])> {
    computed
        .iter()
        .filter_map(|c| match &c.trace {
            Some(values) => Some((c, values.as_slice())),
            None => {
                warn!("{}: trace {} has no values, skipping", c.run, c.trace_id);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanKey;
    use std::cell::RefCell;

    fn run() -> RunKey {
        RunKey::new(ScanKey::new(9, 2, 1), 2)
    }

    fn computed(trace_id: usize, trace: Option<Vec<f64>>) -> ComputedTrace {
        ComputedTrace {
            run: run(),
            channel: 1,
            trace_id,
            trace,
        }
    }

    /// Returns its (gap-filled) input doubled and records what it saw.
    struct EchoModel {
        seen: RefCell<Vec<Vec<f64>>>,
    }

    impl CalciumToSpikeModel for EchoModel {
        fn predict(&self, traces: &[Vec<f64>], _fps: f64) -> Result<Vec<Vec<f64>>, BoxError> {
            self.seen.borrow_mut().extend(traces.iter().cloned());
            Ok(traces
                .iter()
                .map(|t| t.iter().map(|v| 2.0 * v).collect())
                .collect())
        }
    }

    struct ShortDeconvolver;

    impl NonnegativeDeconvolver for ShortDeconvolver {
        fn deconvolve(&self, _trace: &[f64], _dt: f64) -> Result<Vec<f64>, BoxError> {
            Ok(vec![0.0])
        }
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("STM".parse::<SpikeMethod>().unwrap(), SpikeMethod::Stm);
        assert_eq!("nmf".parse::<SpikeMethod>().unwrap(), SpikeMethod::Nmf);
        assert_eq!("fastoopsi".parse::<SpikeMethod>().unwrap(), SpikeMethod::Oopsi);
        let err = "bogus".parse::<SpikeMethod>().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("unimplemented method"));
    }

    #[test]
    fn test_method_ids() {
        for method in SpikeMethod::ALL {
            assert_eq!(SpikeMethod::from_id(method.id()).unwrap(), method);
        }
        assert!(SpikeMethod::from_id(4).unwrap_err().is_configuration());
    }

    #[test]
    fn test_nmf_passes_extraction_spikes_through() {
        let spikes = vec![SpikeTraceRecord {
            run: run(),
            channel: 2,
            trace_id: 7,
            spike_trace: vec![0.0, 1.0, 0.5],
        }];
        let input = SpikeInput {
            computed: &[],
            extraction_spikes: &spikes,
            fps: 0.0,
        };
        let out = SpikeDispatcher::default().infer(SpikeMethod::Nmf, input).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rate, vec![0.0, 1.0, 0.5]);
        assert_eq!((out[0].channel, out[0].trace_id), (2, 7));
    }

    #[test]
    fn test_stm_gap_fills_before_predicting() {
        let model = EchoModel {
            seen: RefCell::new(Vec::new()),
        };
        let traces = vec![
            computed(1, Some(vec![f64::NAN, 1.0, f64::NAN, 3.0])),
            computed(2, Some(vec![f64::NAN; 3])),
            computed(3, None),
        ];
        let dispatcher = SpikeDispatcher::default().with_stm_model(Box::new(model));
        let out = dispatcher
            .infer(
                SpikeMethod::Stm,
                SpikeInput {
                    computed: &traces,
                    extraction_spikes: &[],
                    fps: 15.0,
                },
            )
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].rate, vec![2.0, 2.0, 4.0, 6.0]);
        assert_eq!(out[1].rate, vec![0.0; 3]);
    }

    #[test]
    fn test_stm_without_model_is_configuration_error() {
        let traces = vec![computed(1, Some(vec![1.0, 2.0]))];
        let err = SpikeDispatcher::default()
            .infer(
                SpikeMethod::Stm,
                SpikeInput {
                    computed: &traces,
                    extraction_spikes: &[],
                    fps: 15.0,
                },
            )
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_oopsi_uses_native_deconvolver() {
        let traces = vec![computed(1, Some(vec![0.0, 0.0, 0.0, 4.0, 2.0, 1.0, 0.5, 0.25]))];
        let out = SpikeDispatcher::default()
            .infer(
                SpikeMethod::Oopsi,
                SpikeInput {
                    computed: &traces,
                    extraction_spikes: &[],
                    fps: 10.0,
                },
            )
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rate.len(), 8);
        assert_eq!(out[0].method, SpikeMethod::Oopsi);
        let peak = out[0]
            .rate
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(3));
    }

    #[test]
    fn test_backend_length_mismatch_is_geometry_error() {
        let traces = vec![computed(1, Some(vec![1.0, 2.0, 3.0]))];
        let err = SpikeDispatcher::new(Box::new(ShortDeconvolver))
            .infer(
                SpikeMethod::Oopsi,
                SpikeInput {
                    computed: &traces,
                    extraction_spikes: &[],
                    fps: 10.0,
                },
            )
            .unwrap_err();
        assert!(err.is_geometry());
    }
}
