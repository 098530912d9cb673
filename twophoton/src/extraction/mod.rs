//! Source extraction orchestrator.
//!
//! For every channel (outer loop) and slice (inner loop) of a scan the raw
//! frames are raster and motion corrected, a correlation image is computed,
//! and the movie is handed to the demixing routine. Discovered components are
//! numbered per channel: the running count carries across slices and resets
//! when the channel changes.

pub mod demix;
pub mod params;
pub mod records;

pub use demix::{DemixOutput, DemixRoutine, MockDemix};
pub use params::{CnmfParams, InitMethod};
pub use records::{
    ArCoefficients, BackgroundComponents, CnmfParameterRecord, CorrelationImage, ExtractionResult,
    MaskRecord, SpikeTraceRecord, TraceRecord,
};

use log::{debug, info};
use ndarray::Axis;

use crate::config::ExtractionConfig;
use crate::correction::CorrectionAdapter;
use crate::correlation::correlation_image;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::mask::SparseMask;
use crate::scan::{RunKey, Scan};

/// Run extraction over a whole scan.
///
/// Any failure, including one raised by the demixing routine, aborts the
/// whole run and is reported with the scan identity.
pub fn extract(
    scan: &Scan,
    demix: &dyn DemixRoutine,
    config: &ExtractionConfig,
) -> PipelineResult<ExtractionResult> {
    extract_inner(scan, demix, config).map_err(|e| e.in_stage(scan.key, Stage::Extraction))
}

fn extract_inner(
    scan: &Scan,
    demix: &dyn DemixRoutine,
    config: &ExtractionConfig,
) -> PipelineResult<ExtractionResult> {
    let run = RunKey::new(scan.key, config.extract_method);
    let info = &scan.info;
    let npixels = info.pixels_per_frame();

    let params = CnmfParams::for_scan(info, scan.is_axonal(), config);
    debug!(
        "{run}: {:?} initialization, K={}, gnb={}, patches={:?}",
        params.init_method, params.num_components, params.background_components, params.patch_half_size
    );

    let mut traces = Vec::new();
    let mut spike_traces = Vec::new();
    let mut ar_coefficients = Vec::new();
    let mut masks = Vec::new();
    let mut backgrounds = Vec::new();
    let mut correlation_images = Vec::new();

    for channel in 1..=info.nchannels {
        let mut count = 0;

        for slice in 1..=info.nslices {
            info!("{run}: extracting channel {channel} slice {slice}");

            let adapter = CorrectionAdapter::new(info, scan.motion(slice)?);
            let movie = adapter
                .correct(scan.frames(channel, slice)?)
                .map_err(|e| e.in_stage(scan.key, Stage::Correction))?;
            let nframes = movie.len_of(Axis(2));

            correlation_images.push(CorrelationImage {
                run,
                channel,
                slice,
                image: correlation_image(&movie),
            });

            let output = demix
                .demix(&movie, &params)
                .map_err(|e| PipelineError::external(demix.name(), e))?;
            output.validate(npixels, nframes, params.ar_order)?;

            let found = output.num_components();
            for k in 0..found {
                let trace_id = count + k + 1;

                traces.push(TraceRecord {
                    run,
                    channel,
                    trace_id,
                    trace: output.raw_traces.row(k).to_vec(),
                });
                spike_traces.push(SpikeTraceRecord {
                    run,
                    channel,
                    trace_id,
                    spike_trace: output.spikes.row(k).to_vec(),
                });
                if params.ar_order > 0 {
                    ar_coefficients.push(ArCoefficients {
                        run,
                        channel,
                        trace_id,
                        coefficients: output.ar_params.row(k).to_vec(),
                    });
                }
                masks.push(MaskRecord {
                    run,
                    channel,
                    slice,
                    trace_id,
                    mask: SparseMask::from_column_major(output.spatial.column(k)),
                });
            }

            backgrounds.push(BackgroundComponents {
                run,
                channel,
                slice,
                spatial: output.background_spatial,
                activity: output.background_temporal,
            });

            info!("{run}: channel {channel} slice {slice} yielded {found} components");
            count += found;
        }
    }

    let parameters = CnmfParameterRecord {
        run,
        params: params.to_record()?,
    };

    Ok(ExtractionResult {
        run,
        traces,
        spike_traces,
        ar_coefficients,
        masks,
        backgrounds,
        correlation_images,
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{MotionCorrection, ScanInfo, ScanKey, TargetStructure};
    use ndarray::{Array2, Array3};

    fn scan(nchannels: usize, nslices: usize, nframes: usize) -> Scan {
        let info = ScanInfo {
            nframes_requested: nframes,
            nframes,
            px_width: 4,
            px_height: 3,
            um_width: 40.0,
            um_height: 30.0,
            bidirectional: true,
            fps: 10.0,
            zoom: 1.0,
            dwell_time: 0.1,
            nchannels,
            nslices,
            slice_pitch: 5.0,
            fill_fraction: 0.7,
            raster_phase: 0.0,
        };
        let frames = vec![vec![Array3::<i16>::ones((3, 4, nframes)); nslices]; nchannels];
        let motion = (1..=nslices)
            .map(|s| MotionCorrection::stationary(s, 1, Array2::zeros((3, 4)), nframes))
            .collect();
        Scan::new(ScanKey::new(3, 1, 2), info, frames, motion, "GCaMP6f").unwrap()
    }

    #[test]
    fn test_ids_carry_across_slices_and_reset_per_channel() {
        let scan = scan(2, 2, 3);
        let three = vec![vec![1.0, 2.0, 3.0]; 3];
        let two = vec![vec![4.0, 5.0, 6.0]; 2];
        let mock = MockDemix::scripted(vec![three, two]);

        let result = extract(&scan, &mock, &ExtractionConfig::default()).unwrap();
        let ids: Vec<(usize, usize)> = result.traces.iter().map(|t| (t.channel, t.trace_id)).collect();
        assert_eq!(
            ids,
            vec![(1, 1), (1, 2), (1, 3), (1, 4), (1, 5), (2, 1), (2, 2), (2, 3), (2, 4), (2, 5)]
        );
        assert_eq!(mock.calls(), 4);
        assert_eq!(result.correlation_images.len(), 4);
        assert_eq!(result.backgrounds.len(), 4);
        assert_eq!(result.ar_coefficients.len(), 10);

        // Masks of slice 2 belong to ids 4 and 5
        let slice2: Vec<usize> = result
            .masks
            .iter()
            .filter(|m| m.channel == 1 && m.slice == 2)
            .map(|m| m.trace_id)
            .collect();
        assert_eq!(slice2, vec![4, 5]);
    }

    #[test]
    fn test_demix_failure_aborts_run() {
        let scan = scan(1, 1, 3);
        let err = extract(&scan, &MockDemix::failing("diverged"), &ExtractionConfig::default())
            .unwrap_err();
        assert!(err.is_external());
        assert!(err.to_string().contains("animal_id=3"));
        assert!(err.to_string().contains("diverged"));
    }

    #[test]
    fn test_correction_failure_names_correction_stage() {
        let mut scan = scan(1, 1, 3);
        scan.info.fill_fraction = 0.0;
        scan.info.raster_phase = 0.01;
        let mock = MockDemix::with_traces(vec![vec![1.0, 2.0, 3.0]]);

        let err = extract(&scan, &mock, &ExtractionConfig::default()).unwrap_err();
        match &err {
            PipelineError::Stage { stage, .. } => assert_eq!(*stage, Stage::Correction),
            other => panic!("expected stage context, got {other:?}"),
        }
        assert!(err.is_configuration());
        assert!(err.to_string().starts_with("correction failed"));
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn test_no_ar_records_for_order_zero() {
        let scan = scan(1, 1, 3);
        let mock = MockDemix::with_traces(vec![vec![1.0, 2.0, 3.0]]);
        let config = ExtractionConfig {
            ar_order: 0,
            ..ExtractionConfig::default()
        };
        let result = extract(&scan, &mock, &config).unwrap();
        assert!(result.ar_coefficients.is_empty());
        assert_eq!(result.parameters.params["p"], serde_json::json!(0));
    }

    #[test]
    fn test_axonal_scan_uses_sparse_nmf() {
        let scan = scan(1, 1, 3).with_target(TargetStructure::Axon);
        let mock = MockDemix::with_traces(vec![]);
        extract(&scan, &mock, &ExtractionConfig::default()).unwrap();
        let params = mock.received_params();
        assert_eq!(params[0].init_method, InitMethod::SparseNmf);
        assert_eq!(params[0].background_components, 1);
    }
}
