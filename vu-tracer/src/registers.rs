//! VU register file and its on-disk layouts

use crate::error::FormatError;
use serde::{Deserialize, Serialize};

/// Number of vector (VF) registers
pub const VF_COUNT: usize = 32;
/// Number of integer/control (VI) registers
pub const VI_COUNT: usize = 32;

/// Well-known indices into [`RegisterFile::vi`]
pub mod vi {
    pub const STATUS: usize = 16;
    pub const TPC: usize = 26;
}

/// Display names of the integer/control registers, indexed like [`RegisterFile::vi`]
pub const INTEGER_REGISTER_NAMES: [&str; VI_COUNT] = [
    "vi00", "vi01", "vi02", "vi03", "vi04", "vi05", "vi06", "vi07",
    "vi08", "vi09", "vi10", "vi11", "vi12", "vi13", "vi14", "vi15",
    "Status", "MACflag", "ClipFlag", "c2c19", "R", "I", "Q", "c2c23",
    "c2c24", "c2c25", "TPC", "CMSAR0", "FBRST", "VPU-STAT", "c2c30", "CMSAR1",
];

/// Register index space used by register patch packets
const PATCH_ACC: u8 = 64;
const PATCH_Q: u8 = 65;
const PATCH_P: u8 = 66;

/// Size of one register slot on the wire (VF, VI, ACC, Q and P are all 128-bit)
const SLOT: usize = 16;

/// Bytes shared by every layout: VF[32], VI[32], ACC, Q, P
const COMMON_SIZE: usize = (VF_COUNT + VI_COUNT + 3) * SLOT;

/// Interpreter bookkeeping captured after the common fields by older capture builds
const LEGACY_V1_TRAILER: usize = 96;
const LEGACY_V2_TRAILER: usize = 144;

/// 128-bit vector register, four 32-bit lanes (x, y, z, w)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vector(pub [u32; 4]);

impl Vector {
    /// Decode four little-endian lanes
    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        let mut lanes = [0u32; 4];
        for (lane, chunk) in lanes.iter_mut().zip(bytes.chunks_exact(4)) {
            *lane = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self(lanes)
    }

    pub fn to_le_bytes(self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        for (chunk, lane) in bytes.chunks_exact_mut(4).zip(self.0) {
            chunk.copy_from_slice(&lane.to_le_bytes());
        }
        bytes
    }

    /// Lanes reinterpreted as IEEE floats
    pub fn as_f32(&self) -> [f32; 4] {
        self.0.map(f32::from_bits)
    }
}

/// State of the VU register file at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    /// Vector registers vf00-vf31
    pub vf: [Vector; VF_COUNT],
    /// Integer and control registers; 16-bit values widened to 32 bits
    pub vi: [u32; VI_COUNT],
    /// Accumulator
    pub acc: Vector,
    /// Q (FDIV result) register
    pub q: u32,
    /// P (EFU result) register
    pub p: u32,
}

impl RegisterFile {
    /// Program counter (TPC)
    pub fn pc(&self) -> u32 {
        self.vi[vi::TPC]
    }

    pub fn status(&self) -> u32 {
        self.vi[vi::STATUS]
    }

    /// Overwrite one register from a raw 128-bit patch value
    ///
    /// Indices 0-31 select VF, 32-63 select VI, 64 ACC, 65 Q and 66 P.
    /// Scalar registers take the low 32 bits.
    pub fn patch(&mut self, index: u8, raw: [u8; 16]) -> Result<(), FormatError> {
        let low = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        match index {
            0..=31 => self.vf[index as usize] = Vector::from_le_bytes(raw),
            32..=63 => self.vi[index as usize - 32] = low,
            PATCH_ACC => self.acc = Vector::from_le_bytes(raw),
            PATCH_Q => self.q = low,
            PATCH_P => self.p = low,
            _ => return Err(FormatError::RegisterIndex(index)),
        }
        Ok(())
    }
}

/// Shape of a `SetRegisters` payload, fixed by the trace format version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterLayout {
    /// Version 1 capture structure
    LegacyV1,
    /// Version 2 capture structure
    LegacyV2,
    /// Version 3 and later
    Current,
}

impl RegisterLayout {
    /// Payload size in bytes
    pub const fn size(self) -> usize {
        match self {
            Self::LegacyV1 => COMMON_SIZE + LEGACY_V1_TRAILER,
            Self::LegacyV2 => COMMON_SIZE + LEGACY_V2_TRAILER,
            Self::Current => COMMON_SIZE,
        }
    }

    /// Normalize a payload of exactly [`size`](Self::size) bytes into a [`RegisterFile`]
    pub fn decode(self, payload: &[u8]) -> RegisterFile {
        debug_assert_eq!(payload.len(), self.size());
        match self {
            Self::LegacyV1 => decode_legacy(payload, LEGACY_V1_TRAILER),
            Self::LegacyV2 => decode_legacy(payload, LEGACY_V2_TRAILER),
            Self::Current => decode_current(payload),
        }
    }

    /// Encode a register file in this layout. Legacy trailers are written as zeros.
    pub fn encode(self, regs: &RegisterFile) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        for v in &regs.vf {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for value in &regs.vi {
            push_scalar(&mut out, *value);
        }
        out.extend_from_slice(&regs.acc.to_le_bytes());
        push_scalar(&mut out, regs.q);
        push_scalar(&mut out, regs.p);
        out.resize(self.size(), 0);
        out
    }
}

fn decode_current(payload: &[u8]) -> RegisterFile {
    let mut slots = payload.chunks_exact(SLOT).map(|chunk| {
        let mut raw = [0u8; SLOT];
        raw.copy_from_slice(chunk);
        raw
    });
    let mut regs = RegisterFile::default();
    for (v, raw) in regs.vf.iter_mut().zip(slots.by_ref()) {
        *v = Vector::from_le_bytes(raw);
    }
    for (value, raw) in regs.vi.iter_mut().zip(slots.by_ref()) {
        *value = scalar(raw);
    }
    // COMMON_SIZE guarantees these slots exist
    regs.acc = slots.next().map(Vector::from_le_bytes).unwrap_or_default();
    regs.q = slots.next().map(scalar).unwrap_or_default();
    regs.p = slots.next().map(scalar).unwrap_or_default();
    regs
}

fn decode_legacy(payload: &[u8], trailer: usize) -> RegisterFile {
    // Legacy structures lead with the same fields; the trailer is interpreter
    // state with no counterpart in the current register file.
    tracing::trace!("skipping {} byte legacy register trailer", trailer);
    decode_current(&payload[..payload.len() - trailer])
}

fn scalar(raw: [u8; SLOT]) -> u32 {
    u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
}

fn push_scalar(out: &mut Vec<u8>, value: u32) {
    let mut slot = [0u8; SLOT];
    slot[..4].copy_from_slice(&value.to_le_bytes());
    out.extend_from_slice(&slot);
}
