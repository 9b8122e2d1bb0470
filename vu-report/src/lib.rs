//! VU Report - Orchestration layer over loaded VU traces
//!
//! This crate connects trace loading, flow statistics and the file based
//! side of inspection: annotated disassembly listings, memory dumps and
//! per-instruction comment files.

pub mod export;
pub mod report;

pub use export::{dump_memory, export_disassembly, write_disassembly, CommentFile};
pub use report::{FlowReport, InstructionReport};

use anyhow::Context;
use std::path::Path;
use vu_tracer::{Disassembler, TraceConfig, TraceSession};

/// Result type for report operations
pub type Result<T> = anyhow::Result<T>;

/// Load a trace and summarize its control flow
pub fn load_report(
    path: impl AsRef<Path>,
    config: TraceConfig,
    disassembler: &impl Disassembler,
) -> Result<(TraceSession, FlowReport)> {
    let path = path.as_ref();
    let session = TraceSession::open(path, config, disassembler)
        .with_context(|| format!("Failed to load trace {}", path.display()))?;

    let report = FlowReport::from_session(&session);
    tracing::info!(
        "Trace has {} executed instructions and {} taken branches",
        report.executed_count(),
        report.branch_count()
    );

    Ok((session, report))
}
