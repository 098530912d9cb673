//! Records produced by one extraction run.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::mask::SparseMask;
use crate::scan::RunKey;
use crate::store::{Store, StoreError};

/// Raw fluorescence trace of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub run: RunKey,
    pub channel: usize,
    pub trace_id: usize,
    pub trace: Vec<f64>,
}

/// Spikes deconvolved by the demixing routine itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeTraceRecord {
    pub run: RunKey,
    pub channel: usize,
    pub trace_id: usize,
    pub spike_trace: Vec<f64>,
}

/// Autoregressive impulse-response coefficients of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArCoefficients {
    pub run: RunKey,
    pub channel: usize,
    pub trace_id: usize,
    pub coefficients: Vec<f64>,
}

/// Spatial mask of one component within its slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskRecord {
    pub run: RunKey,
    pub channel: usize,
    pub slice: usize,
    pub trace_id: usize,
    pub mask: SparseMask,
}

/// Low-rank background of one channel and slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundComponents {
    pub run: RunKey,
    pub channel: usize,
    pub slice: usize,
    /// `[pixels, components]`, column-major pixel order
    pub spatial: Array2<f64>,
    /// `[components, frames]`
    pub activity: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationImage {
    pub run: RunKey,
    pub channel: usize,
    pub slice: usize,
    /// `[height, width]`
    pub image: Array2<f64>,
}

/// Parameters the run was extracted with, keys lower-cased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CnmfParameterRecord {
    pub run: RunKey,
    pub params: BTreeMap<String, serde_json::Value>,
}

/// Everything one extraction run produced, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub run: RunKey,
    pub traces: Vec<TraceRecord>,
    pub spike_traces: Vec<SpikeTraceRecord>,
    pub ar_coefficients: Vec<ArCoefficients>,
    pub masks: Vec<MaskRecord>,
    pub backgrounds: Vec<BackgroundComponents>,
    pub correlation_images: Vec<CorrelationImage>,
    pub parameters: CnmfParameterRecord,
}

impl ExtractionResult {
    pub fn num_traces(&self) -> usize {
        self.traces.len()
    }

    /// Insert every record. The parameter record goes last, so a run with
    /// parameters is complete.
    pub fn persist(&self, store: &mut dyn Store) -> Result<(), StoreError> {
        for record in &self.correlation_images {
            store.insert_correlation_image(record.clone())?;
        }
        for record in &self.traces {
            store.insert_trace(record.clone())?;
        }
        for record in &self.spike_traces {
            store.insert_spike_trace(record.clone())?;
        }
        for record in &self.ar_coefficients {
            store.insert_ar_coefficients(record.clone())?;
        }
        for record in &self.masks {
            store.insert_mask(record.clone())?;
        }
        for record in &self.backgrounds {
            store.insert_background(record.clone())?;
        }
        store.insert_parameters(self.parameters.clone())
    }
}
