//! In-memory record store backed by ordered maps.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

use super::{Store, StoreError};
use crate::extraction::records::{
    ArCoefficients, BackgroundComponents, CnmfParameterRecord, CorrelationImage, MaskRecord,
    SpikeTraceRecord, TraceRecord,
};
use crate::scan::RunKey;
use crate::spikes::{SpikeInferenceResult, SpikeMethod};
use crate::traces::ComputedTrace;

type TraceKey = (RunKey, usize, usize);
type SliceKey = (RunKey, usize, usize);
type MaskKey = (RunKey, usize, usize, usize);
type RateKey = (RunKey, SpikeMethod, usize, usize);

/// Store used by tests, the demo binary and single-process runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    traces: BTreeMap<TraceKey, TraceRecord>,
    spike_traces: BTreeMap<TraceKey, SpikeTraceRecord>,
    ar_coefficients: BTreeMap<TraceKey, ArCoefficients>,
    masks: BTreeMap<MaskKey, MaskRecord>,
    backgrounds: BTreeMap<SliceKey, BackgroundComponents>,
    correlation_images: BTreeMap<SliceKey, CorrelationImage>,
    parameters: BTreeMap<RunKey, CnmfParameterRecord>,
    computed_traces: BTreeMap<TraceKey, ComputedTrace>,
    spike_rates: BTreeMap<RateKey, SpikeInferenceResult>,
}

fn insert_once<K: Ord + Debug, V>(
    table: &'static str,
    map: &mut BTreeMap<K, V>,
    key: K,
    value: V,
) -> Result<(), StoreError> {
    if map.contains_key(&key) {
        return Err(StoreError::duplicate(table, format!("{key:?}")));
    }
    map.insert(key, value);
    Ok(())
}

fn purge<K, V>(map: &mut BTreeMap<K, V>, belongs: impl Fn(&K) -> bool) -> usize
where
    K: Ord,
{
    let before = map.len();
    map.retain(|k, _| !belongs(k));
    before - map.len()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records held.
    pub fn len(&self) -> usize {
        self.traces.len()
            + self.spike_traces.len()
            + self.ar_coefficients.len()
            + self.masks.len()
            + self.backgrounds.len()
            + self.correlation_images.len()
            + self.parameters.len()
            + self.computed_traces.len()
            + self.spike_rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every record, in key order.
    pub fn snapshot(&self) -> MemoryStoreSnapshot {
        MemoryStoreSnapshot {
            traces: self.traces.values().cloned().collect(),
            spike_traces: self.spike_traces.values().cloned().collect(),
            ar_coefficients: self.ar_coefficients.values().cloned().collect(),
            masks: self.masks.values().cloned().collect(),
            backgrounds: self.backgrounds.values().cloned().collect(),
            correlation_images: self.correlation_images.values().cloned().collect(),
            parameters: self.parameters.values().cloned().collect(),
            computed_traces: self.computed_traces.values().cloned().collect(),
            spike_rates: self.spike_rates.values().cloned().collect(),
        }
    }
}

impl Store for MemoryStore {
    fn insert_trace(&mut self, record: TraceRecord) -> Result<(), StoreError> {
        let key = (record.run, record.channel, record.trace_id);
        insert_once("trace", &mut self.traces, key, record)
    }

    fn insert_spike_trace(&mut self, record: SpikeTraceRecord) -> Result<(), StoreError> {
        let key = (record.run, record.channel, record.trace_id);
        insert_once("spike_trace", &mut self.spike_traces, key, record)
    }

    fn insert_ar_coefficients(&mut self, record: ArCoefficients) -> Result<(), StoreError> {
        let key = (record.run, record.channel, record.trace_id);
        insert_once("ar_coefficients", &mut self.ar_coefficients, key, record)
    }

    fn insert_mask(&mut self, record: MaskRecord) -> Result<(), StoreError> {
        let key = (record.run, record.channel, record.slice, record.trace_id);
        insert_once("mask", &mut self.masks, key, record)
    }

    fn insert_background(&mut self, record: BackgroundComponents) -> Result<(), StoreError> {
        let key = (record.run, record.channel, record.slice);
        insert_once("background", &mut self.backgrounds, key, record)
    }

    fn insert_correlation_image(&mut self, record: CorrelationImage) -> Result<(), StoreError> {
        let key = (record.run, record.channel, record.slice);
        insert_once("correlation_image", &mut self.correlation_images, key, record)
    }

    fn insert_parameters(&mut self, record: CnmfParameterRecord) -> Result<(), StoreError> {
        insert_once("parameters", &mut self.parameters, record.run, record)
    }

    fn insert_computed_trace(&mut self, record: ComputedTrace) -> Result<(), StoreError> {
        let key = (record.run, record.channel, record.trace_id);
        insert_once("computed_trace", &mut self.computed_traces, key, record)
    }

    fn insert_spike_rate(&mut self, record: SpikeInferenceResult) -> Result<(), StoreError> {
        let key = (record.run, record.method, record.channel, record.trace_id);
        insert_once("spike_rate", &mut self.spike_rates, key, record)
    }

    fn traces(&self, run: &RunKey) -> Vec<TraceRecord> {
        self.traces
            .values()
            .filter(|r| r.run == *run)
            .cloned()
            .collect()
    }

    fn spike_traces(&self, run: &RunKey) -> Vec<SpikeTraceRecord> {
        self.spike_traces
            .values()
            .filter(|r| r.run == *run)
            .cloned()
            .collect()
    }

    fn ar_coefficients(&self, run: &RunKey) -> Vec<ArCoefficients> {
        self.ar_coefficients
            .values()
            .filter(|r| r.run == *run)
            .cloned()
            .collect()
    }

    fn masks(&self, run: &RunKey) -> Vec<MaskRecord> {
        self.masks
            .values()
            .filter(|r| r.run == *run)
            .cloned()
            .collect()
    }

    fn backgrounds(&self, run: &RunKey) -> Vec<BackgroundComponents> {
        self.backgrounds
            .values()
            .filter(|r| r.run == *run)
            .cloned()
            .collect()
    }

    fn correlation_images(&self, run: &RunKey) -> Vec<CorrelationImage> {
        self.correlation_images
            .values()
            .filter(|r| r.run == *run)
            .cloned()
            .collect()
    }

    fn parameters(&self, run: &RunKey) -> Option<CnmfParameterRecord> {
        self.parameters.get(run).cloned()
    }

    fn computed_traces(&self, run: &RunKey) -> Vec<ComputedTrace> {
        self.computed_traces
            .values()
            .filter(|r| r.run == *run)
            .cloned()
            .collect()
    }

    fn spike_rates(&self, run: &RunKey, method: SpikeMethod) -> Vec<SpikeInferenceResult> {
        self.spike_rates
            .values()
            .filter(|r| r.run == *run && r.method == method)
            .cloned()
            .collect()
    }

    fn purge_run(&mut self, run: &RunKey) -> usize {
        let removed = purge(&mut self.traces, |k| k.0 == *run)
            + purge(&mut self.spike_traces, |k| k.0 == *run)
            + purge(&mut self.ar_coefficients, |k| k.0 == *run)
            + purge(&mut self.masks, |k| k.0 == *run)
            + purge(&mut self.backgrounds, |k| k.0 == *run)
            + purge(&mut self.correlation_images, |k| k.0 == *run)
            + purge(&mut self.parameters, |k| k == run)
            + purge(&mut self.computed_traces, |k| k.0 == *run)
            + purge(&mut self.spike_rates, |k| k.0 == *run);
        debug!("purged {removed} records for {run}");
        removed
    }
}

/// Serializable dump of a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryStoreSnapshot {
    pub traces: Vec<TraceRecord>,
    pub spike_traces: Vec<SpikeTraceRecord>,
    pub ar_coefficients: Vec<ArCoefficients>,
    pub masks: Vec<MaskRecord>,
    pub backgrounds: Vec<BackgroundComponents>,
    pub correlation_images: Vec<CorrelationImage>,
    pub parameters: Vec<CnmfParameterRecord>,
    pub computed_traces: Vec<ComputedTrace>,
    pub spike_rates: Vec<SpikeInferenceResult>,
}

impl MemoryStoreSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
