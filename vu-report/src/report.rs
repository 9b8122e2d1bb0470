//! Flow Report
//!
//! Summarizes the per-instruction statistics of a loaded trace.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use vu_tracer::{InstructionSlot, TraceSession};

/// Execution summary of a trace
///
/// Only executed instruction slots are listed, in address order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowReport {
    /// Trace file the session was loaded from
    pub trace_path: Option<PathBuf>,

    /// Trace format version
    pub format_version: u32,

    /// Number of snapshots in the trace
    pub snapshot_count: usize,

    /// Executed instructions
    pub instructions: Vec<InstructionReport>,
}

/// Statistics of one executed instruction pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionReport {
    pub address: u32,
    pub times_executed: usize,
    /// Arrivals by sequential fall-through
    pub fall_through_in: usize,
    /// Departures by sequential fall-through
    pub fall_through_out: usize,
    /// Taken branches: target -> count
    pub branch_to: BTreeMap<u32, usize>,
    /// Incoming branches: source -> count
    pub branch_from: BTreeMap<u32, usize>,
    pub disassembly: String,
}

impl FlowReport {
    /// Build a report from a loaded session
    pub fn from_session(session: &TraceSession) -> Self {
        let instructions: Vec<InstructionReport> = session
            .instructions()
            .addressed()
            .filter(|(_, slot)| slot.executed)
            .map(|(address, slot)| instruction_report(address, slot))
            .collect();

        Self {
            trace_path: session.path().map(|p| p.to_path_buf()),
            format_version: session.version().as_u32(),
            snapshot_count: session.snapshots().len(),
            instructions,
        }
    }

    /// Number of distinct instructions executed
    pub fn executed_count(&self) -> usize {
        self.instructions.len()
    }

    /// Total taken branches across the trace
    pub fn branch_count(&self) -> usize {
        self.instructions
            .iter()
            .map(|insn| insn.branch_to.values().sum::<usize>())
            .sum()
    }

    /// The `n` most executed instructions, ties broken by address
    pub fn hottest(&self, n: usize) -> Vec<&InstructionReport> {
        let mut sorted: Vec<&InstructionReport> = self.instructions.iter().collect();
        sorted.sort_by(|a, b| {
            b.times_executed
                .cmp(&a.times_executed)
                .then(a.address.cmp(&b.address))
        });
        sorted.truncate(n);
        sorted
    }

    /// Serialize report to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize report from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn instruction_report(address: u32, slot: &InstructionSlot) -> InstructionReport {
    InstructionReport {
        address,
        times_executed: slot.times_executed,
        fall_through_in: slot.fall_through_in(),
        fall_through_out: slot.fall_through_out(),
        branch_to: slot.branch_to.clone(),
        branch_from: slot.branch_from.clone(),
        disassembly: slot.disassembly.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::session_with_pcs;

    #[test]
    fn test_report_lists_executed_slots() {
        let session = session_with_pcs(&[0, 8, 16, 0, 8, 16, 24]);
        let report = FlowReport::from_session(&session);

        assert_eq!(report.snapshot_count, 7);
        assert_eq!(report.format_version, 3);
        assert_eq!(report.executed_count(), 4);
        assert_eq!(
            report.instructions.iter().map(|i| i.address).collect::<Vec<_>>(),
            vec![0, 8, 16, 24]
        );

        let head = &report.instructions[0];
        assert_eq!(head.times_executed, 2);
        assert_eq!(head.branch_from, BTreeMap::from([(16, 1)]));
        assert_eq!(head.fall_through_in, 1);

        let tail = &report.instructions[2];
        assert_eq!(tail.branch_to, BTreeMap::from([(0, 1)]));
        assert_eq!(tail.fall_through_out, 1);
        assert_eq!(report.branch_count(), 1);
    }

    #[test]
    fn test_hottest_instructions() {
        let session = session_with_pcs(&[0, 8, 8, 8, 16, 0]);
        let report = FlowReport::from_session(&session);
        let hottest: Vec<u32> = report.hottest(2).iter().map(|i| i.address).collect();
        assert_eq!(hottest, vec![8, 0]);
        assert_eq!(report.hottest(10).len(), 3);
    }

    #[test]
    fn test_report_serialization() {
        let session = session_with_pcs(&[0, 16, 8]);
        let report = FlowReport::from_session(&session);

        let bytes = report.to_bytes().unwrap();
        let deserialized = FlowReport::from_bytes(&bytes).unwrap();
        assert_eq!(deserialized, report);
        assert!(FlowReport::from_bytes(b"not json").is_err());
    }
}
