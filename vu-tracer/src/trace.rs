//! Data structures for reconstructed execution traces

use crate::config::{TraceConfig, INSN_PAIR_SIZE};
use crate::registers::RegisterFile;
use serde::{Deserialize, Serialize};
use std::ops::Index;
use std::sync::Arc;

/// Lower-word encoding of XGKICK, bits 0..=10
const XGKICK_OPCODE: u32 = 0b110_1111_1100;

/// Granularity of VU memory accesses in bytes
pub const ACCESS_BLOCK_SIZE: u32 = 16;

/// Memory operand touched by one instruction (read or write)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryAccess {
    /// Byte address in data memory
    pub addr: u32,
    /// Size in bytes; zero means no access
    pub size: u32,
}

impl MemoryAccess {
    pub const NONE: Self = Self { addr: 0, size: 0 };

    pub fn new(addr: u32, size: u32) -> Self {
        Self { addr, size }
    }

    pub fn is_some(&self) -> bool {
        self.size > 0
    }

    /// True if this access touches the 16-byte block containing `address`
    pub fn hits_block(&self, address: u32) -> bool {
        self.is_some() && self.addr / ACCESS_BLOCK_SIZE == address / ACCESS_BLOCK_SIZE
    }
}

/// Fully materialized machine state at one instruction retirement
///
/// Memory images are shared between snapshots until a packet changes them,
/// so consecutive snapshots with identical images cost one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Register file
    pub registers: RegisterFile,
    /// Data memory image
    pub memory: Arc<Vec<u8>>,
    /// Instruction memory image
    pub program: Arc<Vec<u8>>,
    /// Read issued by the instruction at the previous snapshot's PC
    pub read: MemoryAccess,
    /// Write issued by the instruction at the previous snapshot's PC
    pub write: MemoryAccess,
}

impl Snapshot {
    /// Zeroed state sized for `config`
    pub fn blank(config: &TraceConfig) -> Self {
        Self {
            registers: RegisterFile::default(),
            memory: Arc::new(vec![0; config.memory_size]),
            program: Arc::new(vec![0; config.program_size]),
            read: MemoryAccess::NONE,
            write: MemoryAccess::NONE,
        }
    }

    pub fn pc(&self) -> u32 {
        self.registers.pc()
    }

    /// Raw instruction pair at `address`
    pub fn instruction_at(&self, address: u32) -> Option<[u8; 8]> {
        let start = address as usize;
        let bytes = self.program.get(start..start + INSN_PAIR_SIZE as usize)?;
        let mut pair = [0u8; 8];
        pair.copy_from_slice(bytes);
        Some(pair)
    }

    /// Lower (first) word of the instruction pair at the PC
    pub fn lower_word(&self) -> Option<u32> {
        self.instruction_at(self.pc())
            .map(|pair| u32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]))
    }

    /// True if the instruction at the PC is an XGKICK
    pub fn is_xgkick(&self) -> bool {
        self.lower_word().map_or(false, is_xgkick)
    }

    /// Source address of the GS packet kicked by the current XGKICK, if any
    pub fn xgkick_address(&self) -> Option<usize> {
        let lower = self.lower_word().filter(|lower| is_xgkick(*lower))?;
        let is = ((lower >> 11) & 0x1f) as usize;
        Some(self.registers.vi[is] as usize * ACCESS_BLOCK_SIZE as usize)
    }
}

/// True if a lower instruction word encodes XGKICK
pub fn is_xgkick(lower: u32) -> bool {
    lower & 0x7ff == XGKICK_OPCODE
}

/// Append-only, indexable sequence of snapshots
///
/// Only the accumulator appends; once a session is built the store is
/// read-only and may be shared freely.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    snapshots: Vec<Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, snapshot: Snapshot) -> &Snapshot {
        self.snapshots.push(snapshot);
        &self.snapshots[self.snapshots.len() - 1]
    }

    /// Number of snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Snapshot> {
        self.snapshots.iter()
    }

    /// Program counter of snapshot `index`
    pub fn pc(&self, index: usize) -> Option<u32> {
        self.get(index).map(Snapshot::pc)
    }
}

impl Index<usize> for SnapshotStore {
    type Output = Snapshot;

    fn index(&self, index: usize) -> &Snapshot {
        &self.snapshots[index]
    }
}

impl<'a> IntoIterator for &'a SnapshotStore {
    type Item = &'a Snapshot;
    type IntoIter = std::slice::Iter<'a, Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.snapshots.iter()
    }
}
