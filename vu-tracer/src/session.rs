//! Loaded trace session
//!
//! Reads a whole trace up front, then serves navigation queries against the
//! immutable snapshot store through a single cursor.

use crate::accumulator::StateAccumulator;
use crate::collab::{Disassembler, GsPacketDecoder};
use crate::config::TraceConfig;
use crate::flow::{slot_index, InstructionSlot, InstructionTable};
use crate::navigator::{self, Step};
use crate::packet::{FormatVersion, PacketReader};
use crate::trace::{MemoryAccess, Snapshot, SnapshotStore};
use crate::Result;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Kind of memory access, for labelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Which snapshots a listing shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotFilter {
    All,
    /// Snapshots whose current instruction is XGKICK
    Xgkick,
    /// Snapshots whose current instruction's disassembly contains the text
    Highlighted(String),
}

/// A fully loaded trace plus the navigation cursor
#[derive(Debug)]
pub struct TraceSession {
    path: Option<PathBuf>,
    config: TraceConfig,
    version: FormatVersion,
    snapshots: SnapshotStore,
    instructions: InstructionTable,
    cursor: usize,
}

impl TraceSession {
    /// Load a trace file
    pub fn open(
        path: impl AsRef<Path>,
        config: TraceConfig,
        disassembler: &impl Disassembler,
    ) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading trace {}", path.display());
        let file = File::open(path)?;
        let mut session = Self::from_reader(BufReader::new(file), config, disassembler)?;
        session.path = Some(path.to_path_buf());
        Ok(session)
    }

    /// Load a trace from any byte stream
    pub fn from_reader<R: Read>(
        reader: R,
        config: TraceConfig,
        disassembler: &impl Disassembler,
    ) -> Result<Self> {
        let packets = PacketReader::new(reader, config)?;
        let version = packets.version();

        let mut accumulator = StateAccumulator::new(config);
        for packet in packets {
            let (offset, packet) = packet?;
            accumulator.apply(offset, packet)?;
        }
        let (snapshots, mut instructions, last) = accumulator.finish();

        tracing::debug!("Disassembling {} instruction slots", instructions.len());
        instructions.disassemble_with(|address| {
            let pair = last.instruction_at(address).unwrap_or_default();
            disassembler.disassemble(&pair, address)
        });

        tracing::info!(
            "Loaded {} snapshots (format version {})",
            snapshots.len(),
            version.as_u32()
        );

        Ok(Self {
            path: None,
            config,
            version,
            snapshots,
            instructions,
            cursor: 0,
        })
    }

    /// Path of the trace file, if loaded from disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn instructions(&self) -> &InstructionTable {
        &self.instructions
    }

    /// Slot statistics for an instruction address
    pub fn instruction(&self, address: u32) -> Option<&InstructionSlot> {
        self.instructions.get(slot_index(address))
    }

    /// Index of the selected snapshot
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Selected snapshot; `None` only for a trace without any snapshot
    pub fn current(&self) -> Option<&Snapshot> {
        self.snapshots.get(self.cursor)
    }

    /// Select snapshot `index`; returns false if it does not exist
    pub fn go_to(&mut self, index: usize) -> bool {
        if index >= self.snapshots.len() || index == self.cursor {
            return false;
        }
        self.cursor = index;
        true
    }

    pub fn step_forward(&mut self) -> bool {
        self.go_to(self.cursor + 1)
    }

    pub fn step_back(&mut self) -> bool {
        match self.cursor.checked_sub(1) {
            Some(index) => self.go_to(index),
            None => false,
        }
    }

    /// Move to the next snapshot in `step` direction whose PC is `target_pc`
    pub fn seek_pc(&mut self, target_pc: u32, step: Step) -> bool {
        self.move_to(navigator::find_pc(&self.snapshots, self.cursor, target_pc, step))
    }

    /// Previous execution of the current instruction
    pub fn previous_iteration(&mut self) -> bool {
        self.current()
            .map(Snapshot::pc)
            .map_or(false, |pc| self.seek_pc(pc, Step::Backward))
    }

    /// Next execution of the current instruction
    pub fn next_iteration(&mut self) -> bool {
        self.current()
            .map(Snapshot::pc)
            .map_or(false, |pc| self.seek_pc(pc, Step::Forward))
    }

    /// Jump to the nearest execution of the instruction at `address`
    ///
    /// Looks backward first when the current PC is past `address`, forward
    /// first otherwise, then tries the other direction.
    pub fn seek_instruction(&mut self, address: u32) -> bool {
        let Some(pc) = self.current().map(Snapshot::pc) else {
            return false;
        };
        if pc == address {
            return false;
        }
        let first = if pc > address { Step::Backward } else { Step::Forward };
        self.seek_pc(address, first) || self.seek_pc(address, first.reverse())
    }

    /// Move to just before the next snapshot touching the 16-byte block of `address`
    pub fn seek_memory_access(&mut self, address: u32) -> bool {
        self.move_to(navigator::find_memory_access(&self.snapshots, self.cursor, address))
    }

    /// Lowest address of `pattern` in the selected snapshot's data memory
    pub fn find_bytes(&self, pattern: &[u8]) -> Option<usize> {
        self.current()
            .and_then(|snapshot| navigator::find_bytes(&snapshot.memory, pattern))
    }

    fn move_to(&mut self, target: Option<usize>) -> bool {
        match target {
            Some(index) => {
                self.cursor = index;
                true
            }
            None => false,
        }
    }

    /// Access performed by the instruction executing at snapshot `index`
    ///
    /// Access records are stored on the snapshot the instruction retires
    /// into, so this reads snapshot `index + 1`. Reads win over writes.
    pub fn pending_access(&self, index: usize) -> Option<(AccessKind, MemoryAccess)> {
        let next = self.snapshots.get(index + 1)?;
        if next.read.is_some() {
            Some((AccessKind::Read, next.read))
        } else if next.write.is_some() {
            Some((AccessKind::Write, next.write))
        } else {
            None
        }
    }

    /// Indices of the snapshots passing `filter`
    pub fn filter(&self, filter: &SnapshotFilter) -> Vec<usize> {
        self.snapshots
            .iter()
            .enumerate()
            .filter(|(_, snapshot)| self.matches(snapshot, filter))
            .map(|(index, _)| index)
            .collect()
    }

    fn matches(&self, snapshot: &Snapshot, filter: &SnapshotFilter) -> bool {
        match filter {
            SnapshotFilter::All => true,
            SnapshotFilter::Xgkick => snapshot.is_xgkick(),
            SnapshotFilter::Highlighted(text) => {
                !text.is_empty()
                    && self
                        .instruction(snapshot.pc())
                        .map_or(false, |slot| slot.disassembly.contains(text.as_str()))
            }
        }
    }

    /// Decode the GS packet at `address`, or at the XGKICK source when `None`
    ///
    /// Returns `None` when no address is given and the current instruction is
    /// not an XGKICK. Addresses past the end of memory are clamped.
    pub fn gs_packet<D: GsPacketDecoder>(
        &self,
        decoder: &D,
        address: Option<usize>,
    ) -> Option<D::Packet> {
        let snapshot = self.current()?;
        let address = address
            .or_else(|| snapshot.xgkick_address())?
            .min(snapshot.memory.len());
        let window = &snapshot.memory[address..];
        Some(decoder.read_gs_packet(window, window.len()))
    }
}
