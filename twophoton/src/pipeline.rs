//! Stage wiring: run a stage for one unit and persist its records.
//!
//! Each `populate_*` call resolves every input and setting before its first
//! insert, so a configuration mistake never leaves partial records behind.
//! Errors are reported with the scan identity and stage.

use log::info;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::extraction::{extract, DemixRoutine};
use crate::quality::{compute_quantal_size, QuantalSize};
use crate::scan::{Indicator, RunKey, Scan, ScanKey};
use crate::spikes::{SpikeDispatcher, SpikeInferenceResult, SpikeInput, SpikeMethod};
use crate::store::Store;
use crate::tracking::reconcile_frame_counts;
use crate::traces::{assemble, EmissionSpectra, TraceAssembly};

/// Pipeline driver holding the validated configuration.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Key of the extraction run this pipeline produces for `scan`.
    pub fn run_key(&self, scan: &Scan) -> RunKey {
        RunKey::new(scan.key, self.config.extraction.extract_method)
    }

    /// Extract sources from `scan` and persist every record of the run.
    ///
    /// A run that is already complete is left untouched.
    pub fn populate_extraction(
        &self,
        scan: &Scan,
        demix: &dyn DemixRoutine,
        store: &mut dyn Store,
    ) -> PipelineResult<RunKey> {
        let run = self.run_key(scan);
        if store.has_extraction(&run) {
            info!("{run}: extraction already populated");
            return Ok(run);
        }

        let result = extract(scan, demix, &self.config.extraction)?;
        result
            .persist(store)
            .map_err(|e| PipelineError::from(e).in_stage(scan.key, Stage::Persist))?;

        info!("{run}: persisted {} traces", result.num_traces());
        Ok(run)
    }

    /// Assemble computed traces for an extracted run and persist them.
    ///
    /// Quality warnings are returned with the traces; they do not fail the
    /// stage.
    pub fn populate_traces(
        &self,
        run: RunKey,
        indicator: &Indicator,
        spectra: Option<&EmissionSpectra>,
        store: &mut dyn Store,
    ) -> PipelineResult<TraceAssembly> {
        self.populate_traces_inner(run, indicator, spectra, store)
            .map_err(|e| e.in_stage(run.scan, Stage::Traces))
    }

    fn populate_traces_inner(
        &self,
        run: RunKey,
        indicator: &Indicator,
        spectra: Option<&EmissionSpectra>,
        store: &mut dyn Store,
    ) -> PipelineResult<TraceAssembly> {
        if !store.has_extraction(&run) {
            return Err(PipelineError::configuration(format!(
                "no extraction recorded for {run}"
            )));
        }

        let raw = store.traces(&run);
        let assembly = assemble(&raw, indicator, spectra, &self.config.twitch)?;
        for trace in &assembly.traces {
            store.insert_computed_trace(trace.clone())?;
        }

        info!("{run}: persisted {} computed traces", assembly.traces.len());
        Ok(assembly)
    }

    /// Infer spikes for a run with the method named `method`.
    ///
    /// An unknown method fails before anything is read or written.
    pub fn populate_spikes(
        &self,
        run: RunKey,
        method: &str,
        dispatcher: &SpikeDispatcher,
        fps: f64,
        store: &mut dyn Store,
    ) -> PipelineResult<Vec<SpikeInferenceResult>> {
        self.populate_spikes_inner(run, method, dispatcher, fps, store)
            .map_err(|e| e.in_stage(run.scan, Stage::Spikes))
    }

    fn populate_spikes_inner(
        &self,
        run: RunKey,
        method: &str,
        dispatcher: &SpikeDispatcher,
        fps: f64,
        store: &mut dyn Store,
    ) -> PipelineResult<Vec<SpikeInferenceResult>> {
        let method: SpikeMethod = method.parse()?;

        let computed = store.computed_traces(&run);
        let extraction_spikes = store.spike_traces(&run);
        match method {
            SpikeMethod::Nmf if !store.has_extraction(&run) => {
                return Err(PipelineError::configuration(format!(
                    "no extraction recorded for {run}"
                )));
            }
            SpikeMethod::Stm | SpikeMethod::Oopsi if computed.is_empty() => {
                return Err(PipelineError::configuration(format!(
                    "no computed traces recorded for {run}"
                )));
            }
            _ => {}
        }

        let results = dispatcher.infer(
            method,
            SpikeInput {
                computed: &computed,
                extraction_spikes: &extraction_spikes,
                fps,
            },
        )?;
        for result in &results {
            store.insert_spike_rate(result.clone())?;
        }

        info!("{run}: persisted {} {method} spike traces", results.len());
        Ok(results)
    }

    /// Quantal size of the raw frames of one channel and slice.
    pub fn quantal_size(
        &self,
        scan: &Scan,
        channel: usize,
        slice: usize,
    ) -> PipelineResult<QuantalSize> {
        let twitch = &self.config.twitch;
        scan.frames(channel, slice)
            .and_then(|frames| compute_quantal_size(frames, twitch.max_pairs, twitch.seed))
            .map_err(|e| e.in_stage(scan.key, Stage::Quality))
    }

    /// Number of eye-camera frames usable for `scan`, given the behavior
    /// timestamps and the frame count of the video.
    pub fn reconcile_eye_frames(
        &self,
        scan: ScanKey,
        timestamps: &[f64],
        video_frames: usize,
    ) -> PipelineResult<usize> {
        reconcile_frame_counts(
            timestamps,
            video_frames,
            self.config.tracking.frame_count_tolerance,
        )
        .map_err(|e| e.in_stage(scan, Stage::Tracking))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::MockDemix;
    use crate::store::{MemoryStore, StoreError};
    use crate::synthetic::{synthetic_scan, SyntheticScanConfig};

    fn small_scan() -> Scan {
        let config = SyntheticScanConfig {
            height: 6,
            width: 5,
            nframes: 3,
            nchannels: 1,
            nsources: 1,
            sigma_px: 1.0,
            ..Default::default()
        };
        synthetic_scan(ScanKey::new(7, 1, 1), &config).unwrap().scan
    }

    #[test]
    fn test_extraction_is_not_repeated() {
        let scan = small_scan();
        let pipeline = Pipeline::default();
        let mock = MockDemix::with_traces(vec![vec![1.0, 2.0, 3.0]]);
        let mut store = MemoryStore::new();

        let run = pipeline.populate_extraction(&scan, &mock, &mut store).unwrap();
        let records = store.len();
        pipeline.populate_extraction(&scan, &mock, &mut store).unwrap();
        assert_eq!(mock.calls(), 1);
        assert_eq!(store.len(), records);
        assert!(store.has_extraction(&run));
    }

    #[test]
    fn test_traces_need_extraction() {
        let run = RunKey::new(ScanKey::new(7, 1, 1), 2);
        let mut store = MemoryStore::new();
        let err = Pipeline::default()
            .populate_traces(run, &Indicator::Single("GCaMP6f".into()), None, &mut store)
            .unwrap_err();
        assert!(err.root().is_configuration());
        assert!(err.to_string().contains("trace assembly"));
    }

    #[test]
    fn test_second_trace_population_is_duplicate() {
        let scan = small_scan();
        let pipeline = Pipeline::default();
        let mock = MockDemix::with_traces(vec![vec![1.0, 2.0, 3.0]]);
        let mut store = MemoryStore::new();
        let run = pipeline.populate_extraction(&scan, &mock, &mut store).unwrap();

        let indicator = scan.indicator();
        pipeline
            .populate_traces(run, &indicator, None, &mut store)
            .unwrap();
        let err = pipeline
            .populate_traces(run, &indicator, None, &mut store)
            .unwrap_err();
        assert!(matches!(
            err.root(),
            PipelineError::Store(StoreError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_oopsi_needs_computed_traces() {
        let scan = small_scan();
        let pipeline = Pipeline::default();
        let mock = MockDemix::with_traces(vec![vec![1.0, 2.0, 3.0]]);
        let mut store = MemoryStore::new();
        let run = pipeline.populate_extraction(&scan, &mock, &mut store).unwrap();

        let err = pipeline
            .populate_spikes(run, "oopsi", &SpikeDispatcher::default(), 15.0, &mut store)
            .unwrap_err();
        assert!(err.root().is_configuration());

        // nmf only needs the extraction spikes
        let out = pipeline
            .populate_spikes(run, "nmf", &SpikeDispatcher::default(), 15.0, &mut store)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(store.spike_rates(&run, SpikeMethod::Nmf).len(), 1);
    }

    #[test]
    fn test_quality_errors_name_quality_stage() {
        let scan = small_scan();
        let pipeline = Pipeline::default();

        let err = pipeline.quantal_size(&scan, 2, 1).unwrap_err();
        match &err {
            PipelineError::Stage { scan: key, stage, .. } => {
                assert_eq!(*key, scan.key);
                assert_eq!(*stage, Stage::Quality);
            }
            other => panic!("expected stage context, got {other:?}"),
        }
        assert!(err.to_string().starts_with("quality failed"));
    }

    #[test]
    fn test_eye_frames_use_tracking_tolerance() {
        let key = ScanKey::new(7, 1, 1);
        let pipeline = Pipeline::default();
        let timestamps = vec![0.0; 100];

        assert_eq!(pipeline.reconcile_eye_frames(key, &timestamps, 92).unwrap(), 92);

        let err = pipeline.reconcile_eye_frames(key, &timestamps, 89).unwrap_err();
        assert!(err.is_geometry());
        assert!(err.to_string().starts_with("eye tracking failed"));
    }
}
