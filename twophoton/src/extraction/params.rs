//! Parameter set handed to the demixing routine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ExtractionConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::estimate::{estimate_component_count, estimate_neuron_pixel_size, with_margin};
use crate::scan::ScanInfo;

/// How the demixing routine seeds its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitMethod {
    /// Greedy search for bright, compact regions (somata)
    #[serde(rename = "greedy_roi")]
    GreedyRoi,
    /// Sparse NMF, suited to spatially distributed processes
    #[serde(rename = "sparse_nmf")]
    SparseNmf,
}

/// Demixing parameters, named as the demixing routine expects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CnmfParams {
    /// Components to initialize (per patch when patches are used)
    #[serde(rename = "K")]
    pub num_components: usize,
    /// Expected half-size of a neuron in pixels (y, x)
    #[serde(rename = "gSig")]
    pub neuron_half_size: [usize; 2],
    /// Autoregressive order
    #[serde(rename = "p")]
    pub ar_order: usize,
    pub merge_thresh: f64,
    pub init_method: InitMethod,
    #[serde(rename = "alpha_snmf")]
    pub sparsity_weight: Option<f64>,
    /// Background components
    #[serde(rename = "gnb")]
    pub background_components: usize,
    /// Patch half-size in pixels
    #[serde(rename = "rf")]
    pub patch_half_size: Option<usize>,
    /// Overlap between patches in pixels
    #[serde(rename = "stride")]
    pub patch_overlap: Option<usize>,
    pub n_processes: usize,
    pub n_pixels_per_process: usize,
    pub block_size: usize,
    /// Frame rate (Hz)
    #[serde(rename = "fr")]
    pub frame_rate: f64,
}

impl CnmfParams {
    /// Choose parameters for every slice of a scan.
    ///
    /// The expected component count is inflated by the configured margin.
    /// With patch initialization the total is spread evenly over patches,
    /// at least one component each.
    pub fn for_scan(info: &ScanInfo, is_axonal: bool, config: &ExtractionConfig) -> Self {
        let expected = estimate_component_count(info.um_height, info.um_width, is_axonal);
        let total = with_margin(expected, config.component_margin).max(1);
        let neuron_px = estimate_neuron_pixel_size(info.um_width, info.px_width);
        let half = (neuron_px / 2).max(1);

        let init = if is_axonal {
            &config.axonal
        } else {
            &config.somatic
        };

        let (num_components, patch_half_size, patch_overlap) = if init.use_patches {
            let side = (init.patch_downsampling * neuron_px).max(2);
            let overlap = ((init.patch_overlap * side as f64).round() as usize).min(side - 1);
            let patches = patches_along(info.px_height, side, overlap)
                * patches_along(info.px_width, side, overlap);
            let per_patch = total.div_ceil(patches).max(1);
            (per_patch, Some(side / 2), Some(overlap))
        } else {
            (total, None, None)
        };

        let (init_method, sparsity_weight) = if is_axonal {
            (InitMethod::SparseNmf, Some(init.sparsity_weight))
        } else {
            (InitMethod::GreedyRoi, None)
        };

        Self {
            num_components,
            neuron_half_size: [half, half],
            ar_order: config.ar_order,
            merge_thresh: config.merge_threshold,
            init_method,
            sparsity_weight,
            background_components: init.background_components,
            patch_half_size,
            patch_overlap,
            n_processes: config.n_processes,
            n_pixels_per_process: config.n_pixels_per_process,
            block_size: config.block_size,
            frame_rate: info.fps,
        }
    }

    /// Parameter record with lower-cased keys, as persisted once per run.
    pub fn to_record(&self) -> PipelineResult<BTreeMap<String, serde_json::Value>> {
        let value = serde_json::to_value(self)
            .map_err(|e| PipelineError::configuration(format!("cannot encode parameters: {e}")))?;
        match value {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect()),
            other => Err(PipelineError::configuration(format!(
                "parameters encoded as {other}, expected an object"
            ))),
        }
    }
}

fn patches_along(extent: usize, side: usize, overlap: usize) -> usize {
    if extent <= side {
        return 1;
    }
    let step = side - overlap;
    (extent - side).div_ceil(step) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ScanInfo {
        ScanInfo {
            nframes_requested: 100,
            nframes: 100,
            px_width: 256,
            px_height: 256,
            um_width: 400.0,
            um_height: 400.0,
            bidirectional: true,
            fps: 14.8,
            zoom: 1.0,
            dwell_time: 0.08,
            nchannels: 1,
            nslices: 1,
            slice_pitch: 0.0,
            fill_fraction: 0.71,
            raster_phase: 0.0,
        }
    }

    #[test]
    fn test_somatic_parameters() {
        let params = CnmfParams::for_scan(&info(), false, &ExtractionConfig::default());
        // 160 expected, 1.5x margin
        assert_eq!(params.num_components, 240);
        assert_eq!(params.init_method, InitMethod::GreedyRoi);
        assert_eq!(params.background_components, 4);
        assert_eq!(params.patch_half_size, None);
        assert_eq!(params.ar_order, 2);
        assert_eq!(params.merge_thresh, 0.8);
        // 400/256 um per px -> 15 um is 10 px
        assert_eq!(params.neuron_half_size, [5, 5]);
    }

    #[test]
    fn test_axonal_parameters_use_patches() {
        let params = CnmfParams::for_scan(&info(), true, &ExtractionConfig::default());
        assert_eq!(params.init_method, InitMethod::SparseNmf);
        assert_eq!(params.sparsity_weight, Some(500.0));
        assert_eq!(params.background_components, 1);
        // side 40 px, overlap 8 px -> 8 patches per axis
        assert_eq!(params.patch_half_size, Some(20));
        assert_eq!(params.patch_overlap, Some(8));
        // 2400 components over 64 patches
        assert_eq!(params.num_components, 38);
    }

    #[test]
    fn test_record_keys_are_lowercase() {
        let params = CnmfParams::for_scan(&info(), false, &ExtractionConfig::default());
        let record = params.to_record().unwrap();
        assert!(record.contains_key("k"));
        assert!(record.contains_key("gsig"));
        assert!(record.contains_key("merge_thresh"));
        assert_eq!(record["init_method"], serde_json::json!("greedy_roi"));
        assert!(record.keys().all(|k| *k == k.to_lowercase()));
    }

    #[test]
    fn test_patch_count() {
        assert_eq!(patches_along(30, 40, 8), 1);
        assert_eq!(patches_along(40, 40, 8), 1);
        assert_eq!(patches_along(41, 40, 8), 2);
        assert_eq!(patches_along(256, 40, 8), 8);
    }
}
