use flowmend_core::{MendConfig, RepairRun, run_repair_loop};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{DecodeError, ExtractionError, Recovery, decode_graph, extract};

#[derive(Debug, Error)]
pub enum MendError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Everything known about one piece of generated text after mending.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MendReport {
    pub recovery: Recovery,
    pub decode_warnings: Vec<String>,
    #[serde(flatten)]
    pub run: RepairRun,
}

impl MendReport {
    /// True when the extractor had to force-close a truncated structure.
    pub fn is_degraded(&self) -> bool {
        self.recovery == Recovery::TruncationRepaired
    }
}

/// Extract a graph from generated text, decode it and run the repair loop.
pub fn mend_text(text: &str, config: &MendConfig) -> Result<MendReport, MendError> {
    let extraction = extract(text)?;
    if extraction.is_degraded() {
        warn!("Graph text was truncated; the recovered graph may be incomplete");
    }

    let decoded = decode_graph(&extraction.value)?;
    for warning in &decoded.warnings {
        warn!("Decode: {}", warning);
    }

    let run = run_repair_loop(&decoded.graph, config);
    info!(
        "Mended graph: {} nodes, {} connections, {} fix(es), outcome {:?}",
        run.graph.nodes.len(),
        run.graph.connections.len(),
        run.changelog.len(),
        run.outcome
    );

    Ok(MendReport {
        recovery: extraction.recovery,
        decode_warnings: decoded.warnings,
        run,
    })
}
