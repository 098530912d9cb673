//! Final calcium traces assembled from the raw extraction traces.
//!
//! Single-channel indicators pass through unchanged. Twitch-type FRET
//! indicators are unmixed from their green and blue channels, see [`twitch`].

pub mod twitch;

pub use twitch::{
    estimate_twitch_ratio, unmix, EmissionFractions, EmissionSpectra, TwitchRatio, Unmixed,
};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::TwitchConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::extraction::records::TraceRecord;
use crate::quality::QualityWarning;
use crate::scan::{Indicator, RunKey};

/// Calcium trace after unmixing.
///
/// `trace` is `None` when unmixing failed for the whole component; NaN
/// samples mark regions where the input was undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedTrace {
    pub run: RunKey,
    /// Channel of the source trace (green channel for ratiometric traces)
    pub channel: usize,
    pub trace_id: usize,
    pub trace: Option<Vec<f64>>,
}

/// Computed traces plus the non-fatal conditions met while computing them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TraceAssembly {
    pub traces: Vec<ComputedTrace>,
    pub warnings: Vec<QualityWarning>,
}

/// Build final traces for one run.
///
/// `spectra` is required for ratiometric indicators and ignored otherwise.
pub fn assemble(
    raw: &[TraceRecord],
    indicator: &Indicator,
    spectra: Option<&EmissionSpectra>,
    config: &TwitchConfig,
) -> PipelineResult<TraceAssembly> {
    match indicator {
        Indicator::Single(name) => {
            info!("passing {} {name} traces through", raw.len());
            Ok(TraceAssembly {
                traces: raw
                    .iter()
                    .map(|r| ComputedTrace {
                        run: r.run,
                        channel: r.channel,
                        trace_id: r.trace_id,
                        trace: Some(r.trace.clone()),
                    })
                    .collect(),
                warnings: Vec::new(),
            })
        }
        Indicator::Twitch2B => {
            let spectra = spectra.ok_or_else(|| {
                PipelineError::configuration("ratiometric indicator requires emission spectra")
            })?;
            assemble_ratiometric(raw, spectra, config)
        }
    }
}

fn by_trace_id(raw: &[TraceRecord], channel: usize) -> BTreeMap<usize, &TraceRecord> {
    raw.iter()
        .filter(|r| r.channel == channel)
        .map(|r| (r.trace_id, r))
        .collect()
}

fn assemble_ratiometric(
    raw: &[TraceRecord],
    spectra: &EmissionSpectra,
    config: &TwitchConfig,
) -> PipelineResult<TraceAssembly> {
    let fractions =
        EmissionFractions::from_spectra(spectra, config.green_filter, config.blue_filter)?;

    let green = by_trace_id(raw, config.green_channel);
    let blue = by_trace_id(raw, config.blue_channel);

    let mut assembly = TraceAssembly::default();
    for (&trace_id, g) in &green {
        let Some(b) = blue.get(&trace_id) else {
            continue;
        };

        let unmixed = unmix(&g.trace, &b.trace, &fractions, config)?;
        let trace = match unmixed {
            Some(u) => {
                if u.ratio.degenerate {
                    warn!(
                        "{}: trace {trace_id} gave a non-negative green/blue slope, clamped to -1",
                        g.run
                    );
                    assembly.warnings.push(QualityWarning::DegenerateFit {
                        channel: g.channel,
                        trace_id,
                    });
                }
                Some(u.trace)
            }
            None => {
                warn!("{}: trace {trace_id} could not be unmixed", g.run);
                assembly.warnings.push(QualityWarning::UnmixingFailed {
                    channel: g.channel,
                    trace_id,
                });
                None
            }
        };

        assembly.traces.push(ComputedTrace {
            run: g.run,
            channel: g.channel,
            trace_id,
            trace,
        });
    }

    info!(
        "unmixed {} ratiometric traces, {} warnings",
        assembly.traces.len(),
        assembly.warnings.len()
    );
    Ok(assembly)
}
