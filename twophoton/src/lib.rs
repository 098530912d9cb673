//! Two-photon calcium imaging preprocessing
//!
//! This crate takes raw galvo/resonant scans through raster and motion
//! correction, source extraction, trace assembly (including ratiometric
//! unmixing of FRET indicators) and spike inference. Numerical collaborators
//! such as the demixing routine and external spike models are injected
//! through traits; every record is written through an explicit [`Store`].

pub mod config;
pub mod correction;
pub mod correlation;
pub mod error;
pub mod estimate;
pub mod extraction;
pub mod mask;
pub mod pipeline;
pub mod quality;
pub mod scan;
pub mod spikes;
pub mod store;
pub mod synthetic;
pub mod tracking;
pub mod traces;

// Re-exports for easier access
pub use config::PipelineConfig;
pub use correction::{CorrectionAdapter, MotionCorrector, RasterCorrection};
pub use correlation::correlation_image;
pub use error::{BoxError, PipelineError, PipelineResult, Stage};
pub use estimate::{estimate_component_count, estimate_neuron_pixel_size};
pub use extraction::{extract, DemixOutput, DemixRoutine, ExtractionResult, MockDemix};
pub use mask::{get_all_traces, reshape_masks, SparseMask};
pub use pipeline::Pipeline;
pub use quality::{compute_quantal_size, QualityWarning};
pub use scan::{Indicator, MotionCorrection, RunKey, Scan, ScanInfo, ScanKey, TargetStructure};
pub use spikes::{SpikeDispatcher, SpikeInferenceResult, SpikeMethod};
pub use store::{MemoryStore, Store, StoreError};
pub use traces::{assemble, ComputedTrace, EmissionSpectra};
