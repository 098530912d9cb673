use calcium_math::RegressionError;
use std::fmt;
use thiserror::Error;

use crate::scan::ScanKey;
use crate::store::StoreError;

/// Boxed error raised by an external collaborator (demixing, spike models).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Pipeline stage in which an error occurred, for re-running a single unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Correction,
    Extraction,
    Persist,
    Traces,
    Spikes,
    Quality,
    Tracking,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Correction => "correction",
            Stage::Extraction => "extraction",
            Stage::Persist => "persist",
            Stage::Traces => "trace assembly",
            Stage::Spikes => "spike inference",
            Stage::Quality => "quality",
            Stage::Tracking => "eye tracking",
        };
        f.write_str(name)
    }
}

/// Errors produced by the preprocessing pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Unknown method identifier, invalid setting, or a required record or
    /// collaborator is absent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Independently sourced dimensions or counts cannot be reconciled.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// A robust fit had too little usable data. Callers that can continue
    /// without the fit record a quality warning instead of aborting.
    #[error("regression failed: {0}")]
    Regression(#[from] RegressionError),

    /// An external numerical routine raised; the error is passed through.
    #[error("external tool `{tool}` failed: {source}")]
    ExternalTool {
        /// Name of the collaborator that failed.
        tool: &'static str,
        source: BoxError,
    },

    /// The record store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Any of the above, annotated with the scan and stage it aborted.
    #[error("{stage} failed for scan {scan}: {source}")]
    Stage {
        scan: ScanKey,
        stage: Stage,
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    pub fn geometry(msg: impl Into<String>) -> Self {
        PipelineError::Geometry(msg.into())
    }

    pub fn external(tool: &'static str, source: impl Into<BoxError>) -> Self {
        PipelineError::ExternalTool {
            tool,
            source: source.into(),
        }
    }

    /// Attach scan identity and stage. Errors that already carry context are
    /// returned unchanged so the innermost stage is reported.
    pub fn in_stage(self, scan: ScanKey, stage: Stage) -> Self {
        match self {
            already @ PipelineError::Stage { .. } => already,
            other => PipelineError::Stage {
                scan,
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The classified error underneath any stage annotation.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), PipelineError::Configuration(_))
    }

    pub fn is_geometry(&self) -> bool {
        matches!(self.root(), PipelineError::Geometry(_))
    }

    pub fn is_regression(&self) -> bool {
        matches!(self.root(), PipelineError::Regression(_))
    }

    pub fn is_external(&self) -> bool {
        matches!(self.root(), PipelineError::ExternalTool { .. })
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
