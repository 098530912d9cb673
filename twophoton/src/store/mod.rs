//! Record store interface.
//!
//! The pipeline never holds ambient connection state: every operation that
//! persists or reads records takes a `&mut dyn Store` / `&dyn Store` handle.
//! Records are insert-once; re-running a unit requires [`Store::purge_run`]
//! first.

mod memory;

pub use memory::{MemoryStore, MemoryStoreSnapshot};

use thiserror::Error;

use crate::extraction::records::{
    ArCoefficients, BackgroundComponents, CnmfParameterRecord, CorrelationImage, MaskRecord,
    SpikeTraceRecord, TraceRecord,
};
use crate::scan::RunKey;
use crate::spikes::{SpikeInferenceResult, SpikeMethod};
use crate::traces::ComputedTrace;

/// Errors raised by a record store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Primary key already present.
    #[error("duplicate {table} record for {key}")]
    Duplicate { table: &'static str, key: String },

    /// A record required by the caller does not exist.
    #[error("missing {table} record for {key}")]
    Missing { table: &'static str, key: String },
}

impl StoreError {
    pub fn duplicate(table: &'static str, key: impl Into<String>) -> Self {
        StoreError::Duplicate {
            table,
            key: key.into(),
        }
    }

    pub fn missing(table: &'static str, key: impl Into<String>) -> Self {
        StoreError::Missing {
            table,
            key: key.into(),
        }
    }
}

/// Explicit repository for everything the pipeline produces.
///
/// Query methods return records for one run ordered by `(channel, trace_id)`
/// or `(channel, slice)` as appropriate.
pub trait Store {
    fn insert_trace(&mut self, record: TraceRecord) -> Result<(), StoreError>;
    fn insert_spike_trace(&mut self, record: SpikeTraceRecord) -> Result<(), StoreError>;
    fn insert_ar_coefficients(&mut self, record: ArCoefficients) -> Result<(), StoreError>;
    fn insert_mask(&mut self, record: MaskRecord) -> Result<(), StoreError>;
    fn insert_background(&mut self, record: BackgroundComponents) -> Result<(), StoreError>;
    fn insert_correlation_image(&mut self, record: CorrelationImage) -> Result<(), StoreError>;
    fn insert_parameters(&mut self, record: CnmfParameterRecord) -> Result<(), StoreError>;
    fn insert_computed_trace(&mut self, record: ComputedTrace) -> Result<(), StoreError>;
    fn insert_spike_rate(&mut self, record: SpikeInferenceResult) -> Result<(), StoreError>;

    fn traces(&self, run: &RunKey) -> Vec<TraceRecord>;
    fn spike_traces(&self, run: &RunKey) -> Vec<SpikeTraceRecord>;
    fn ar_coefficients(&self, run: &RunKey) -> Vec<ArCoefficients>;
    fn masks(&self, run: &RunKey) -> Vec<MaskRecord>;
    fn backgrounds(&self, run: &RunKey) -> Vec<BackgroundComponents>;
    fn correlation_images(&self, run: &RunKey) -> Vec<CorrelationImage>;
    fn parameters(&self, run: &RunKey) -> Option<CnmfParameterRecord>;
    fn computed_traces(&self, run: &RunKey) -> Vec<ComputedTrace>;
    fn spike_rates(&self, run: &RunKey, method: SpikeMethod) -> Vec<SpikeInferenceResult>;

    /// Remove every record belonging to `run`. Returns the number removed.
    fn purge_run(&mut self, run: &RunKey) -> usize;

    /// A run counts as extracted once its parameter record exists, which is
    /// written last.
    fn has_extraction(&self, run: &RunKey) -> bool {
        self.parameters(run).is_some()
    }
}
