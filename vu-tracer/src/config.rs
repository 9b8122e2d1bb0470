//! Trace geometry configuration

/// Size of one instruction pair (lower + upper word) in bytes
pub const INSN_PAIR_SIZE: u32 = 8;

/// Default VU1 data memory size (16 KiB)
pub const DEFAULT_MEMORY_SIZE: usize = 0x4000;

/// Default VU1 instruction memory size (16 KiB)
pub const DEFAULT_PROGRAM_SIZE: usize = 0x4000;

/// Sizes of the memory images carried by a trace
///
/// The trace format has no header field for these, so the reader must be
/// told what the capturing environment used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceConfig {
    /// Data memory image size in bytes
    pub memory_size: usize,
    /// Instruction memory image size in bytes
    pub program_size: usize,
}

impl TraceConfig {
    /// Create a new trace configuration
    pub fn new(memory_size: usize, program_size: usize) -> Self {
        Self {
            memory_size,
            program_size,
        }
    }

    /// Number of instruction slots (one per instruction pair)
    pub fn slot_count(&self) -> usize {
        self.program_size / INSN_PAIR_SIZE as usize
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE, DEFAULT_PROGRAM_SIZE)
    }
}
