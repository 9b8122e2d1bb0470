//! Interfaces to the instruction disassembler and GS packet decoder

/// Renders one VU instruction pair as text
///
/// Implementations must accept any eight bytes; unknown encodings render as
/// raw text instead of failing.
pub trait Disassembler {
    fn disassemble(&self, insn: &[u8; 8], address: u32) -> String;
}

impl<F> Disassembler for F
where
    F: Fn(&[u8; 8], u32) -> String,
{
    fn disassemble(&self, insn: &[u8; 8], address: u32) -> String {
        self(insn, address)
    }
}

/// Fallback disassembler printing the upper and lower words in hex
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDisassembler;

impl Disassembler for RawDisassembler {
    fn disassemble(&self, insn: &[u8; 8], _address: u32) -> String {
        // Words are little-endian; show the upper (second) word first
        let mut upper = insn[4..].to_vec();
        let mut lower = insn[..4].to_vec();
        upper.reverse();
        lower.reverse();
        format!("{} {}", hex::encode(upper), hex::encode(lower))
    }
}

/// Decoder for GS packets stored in VU data memory
pub trait GsPacketDecoder {
    type Packet;

    /// Decode a packet starting at `memory[0]` with `available_len` bytes readable
    fn read_gs_packet(&self, memory: &[u8], available_len: usize) -> Self::Packet;
}
