//! Full pipeline runs against the in-memory store

mod common;

use std::collections::BTreeMap;

use approx::assert_relative_eq;
use twophoton::config::TwitchConfig;
use twophoton::extraction::{CnmfParameterRecord, TraceRecord};
use twophoton::mask::get_all_traces;
use twophoton::spikes::SpikeDispatcher;
use twophoton::store::Store;
use twophoton::synthetic::{ratiometric_pair, synthetic_scan, twitch_spectra, SyntheticScanConfig};
use twophoton::traces::EmissionFractions;
use twophoton::{
    extract, Indicator, MemoryStore, MockDemix, Pipeline, RunKey, ScanKey, SpikeMethod,
};

use common::{bound_fraction, flat_scan, init_logging};

#[test]
fn test_two_channel_scan_with_two_components() {
    init_logging();
    let scan = flat_scan(ScanKey::new(30, 2, 1), 2, 1, 3);
    let mock = MockDemix::with_traces(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    let pipeline = Pipeline::default();
    let mut store = MemoryStore::new();

    let run = pipeline.populate_extraction(&scan, &mock, &mut store).unwrap();

    let traces = store.traces(&run);
    for channel in [1, 2] {
        let mine: Vec<&TraceRecord> = traces.iter().filter(|t| t.channel == channel).collect();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].trace_id, 1);
        assert_eq!(mine[0].trace, vec![1.0, 2.0, 3.0]);
        assert_eq!(mine[1].trace_id, 2);
        assert_eq!(mine[1].trace, vec![4.0, 5.0, 6.0]);
    }

    let images: Vec<(usize, usize)> = store
        .correlation_images(&run)
        .iter()
        .map(|c| (c.channel, c.slice))
        .collect();
    assert_eq!(images, vec![(1, 1), (2, 1)]);
    assert_eq!(store.masks(&run).len(), 4);
    assert_eq!(store.backgrounds(&run).len(), 2);
    assert!(store.has_extraction(&run));
}

#[test]
fn test_components_only_in_first_channel() {
    let scan = flat_scan(ScanKey::new(30, 2, 2), 2, 1, 3);
    let mock = MockDemix::scripted(vec![
        vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
        vec![],
    ]);

    let result = extract(&scan, &mock, &Default::default()).unwrap();
    assert_eq!(result.num_traces(), 2);
    let ids: Vec<usize> = result.traces.iter().map(|t| t.trace_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(result.correlation_images.len(), 2);

    let stacked = get_all_traces(&result.traces).unwrap();
    assert_eq!(stacked.dim(), (2, 3));
    assert_eq!(stacked.row(1).to_vec(), vec![4.0, 5.0, 6.0]);
}

#[test]
fn test_demix_failure_aborts_run() {
    let scan = flat_scan(ScanKey::new(30, 2, 3), 1, 1, 3);
    let mut store = MemoryStore::new();
    let err = Pipeline::default()
        .populate_extraction(&scan, &MockDemix::failing("solver diverged"), &mut store)
        .unwrap_err();

    assert!(err.is_external());
    let message = err.to_string();
    assert!(message.contains("animal_id=30"));
    assert!(message.contains("solver diverged"));
    assert!(store.is_empty());
}

#[test]
fn test_synthetic_scan_through_every_stage() {
    init_logging();
    let synthetic = synthetic_scan(
        ScanKey::new(31, 1, 1),
        &SyntheticScanConfig {
            height: 16,
            width: 16,
            nframes: 120,
            nsources: 3,
            ..Default::default()
        },
    )
    .unwrap();
    let scan = &synthetic.scan;
    let pipeline = Pipeline::default();
    let mut store = MemoryStore::new();
    let demix = MockDemix::with_footprints(synthetic.footprints());

    let run = pipeline.populate_extraction(scan, &demix, &mut store).unwrap();
    assert_eq!(store.traces(&run).len(), 3);

    let assembly = pipeline
        .populate_traces(run, &scan.indicator(), None, &mut store)
        .unwrap();
    assert!(assembly.warnings.is_empty());
    assert_eq!(store.computed_traces(&run).len(), 3);

    for method in ["oopsi", "nmf"] {
        let rates = pipeline
            .populate_spikes(run, method, &SpikeDispatcher::default(), scan.info.fps, &mut store)
            .unwrap();
        assert_eq!(rates.len(), 3);
        assert!(rates.iter().all(|r| r.rate.len() == 120));
        assert!(rates.iter().flat_map(|r| &r.rate).all(|s| *s >= 0.0));
    }
    assert_eq!(store.spike_rates(&run, SpikeMethod::Oopsi).len(), 3);
    assert_eq!(store.spike_rates(&run, SpikeMethod::Nmf).len(), 3);

    assert!(store.purge_run(&run) > 0);
    assert!(store.is_empty());
}

#[test]
fn test_ratiometric_traces_are_unmixed() {
    init_logging();
    let config = TwitchConfig::default();
    let spectra = twitch_spectra();
    let fractions =
        EmissionFractions::from_spectra(&spectra, config.green_filter, config.blue_filter).unwrap();

    let run = RunKey::new(ScanKey::new(32, 1, 1), 2);
    let x = bound_fraction(300);
    let (mut green, blue) = ratiometric_pair(&x, 1.3, 2000.0, &fractions);
    green[0] = f64::NAN;

    let mut store = MemoryStore::new();
    for (channel, trace) in [(1, green), (2, blue)] {
        store
            .insert_trace(TraceRecord {
                run,
                channel,
                trace_id: 1,
                trace,
            })
            .unwrap();
    }
    store
        .insert_parameters(CnmfParameterRecord {
            run,
            params: BTreeMap::new(),
        })
        .unwrap();

    let pipeline = Pipeline::default();
    let assembly = pipeline
        .populate_traces(run, &Indicator::Twitch2B, Some(&spectra), &mut store)
        .unwrap();
    assert!(assembly.warnings.is_empty());

    let computed = store.computed_traces(&run);
    assert_eq!(computed.len(), 1);
    assert_eq!(computed[0].channel, 1);
    let trace = computed[0].trace.as_ref().unwrap();
    assert!(trace[0].is_nan());
    for t in 1..300 {
        assert_relative_eq!(trace[t], x[t], epsilon = 1e-6);
    }

    let rates = pipeline
        .populate_spikes(run, "OOPSI", &SpikeDispatcher::default(), 15.0, &mut store)
        .unwrap();
    assert_eq!(rates.len(), 1);
    assert_eq!(rates[0].rate.len(), 300);
}
