//! Binary packet stream reader and writer
//!
//! A trace is an optional `VUTR` magic followed by a little-endian `u32`
//! format version, then a flat sequence of packets until end of file. Each
//! packet is a one byte discriminant followed by a fixed size payload. Files
//! without the magic are version 1 and start with packet data immediately.

use crate::config::TraceConfig;
use crate::error::{FormatError, TraceError};
use crate::registers::{RegisterFile, RegisterLayout};
use crate::trace::MemoryAccess;
use crate::Result;
use std::io::{self, Chain, Cursor, Read, Write};

/// Magic tag at the start of versioned traces
pub const MAGIC: &[u8; 4] = b"VUTR";

const PUSH_SNAPSHOT: u8 = b'P';
const SET_REGISTERS: u8 = b'R';
const SET_MEMORY: u8 = b'M';
const SET_INSTRUCTIONS: u8 = b'I';
const LOAD_OP: u8 = b'L';
const STORE_OP: u8 = b'S';
const PATCH_REGISTER: u8 = b'r';
const PATCH_MEMORY: u8 = b'm';

/// Highest index accepted by a register patch (P)
const MAX_PATCH_INDEX: u8 = 66;

/// Trace format revision, resolved once from the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormatVersion {
    V1,
    V2,
    V3,
}

impl FormatVersion {
    pub fn from_u32(version: u32) -> Result<Self> {
        match version {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            _ => Err(TraceError::UnsupportedVersion { version }),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Layout of `SetRegisters` payloads in this version
    pub fn register_layout(self) -> RegisterLayout {
        match self {
            Self::V1 => RegisterLayout::LegacyV1,
            Self::V2 => RegisterLayout::LegacyV2,
            Self::V3 => RegisterLayout::Current,
        }
    }
}

/// One typed record of the trace stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Materialize the current state as a new snapshot
    PushSnapshot,
    /// Replace the whole register file
    SetRegisters(Box<RegisterFile>),
    /// Replace the data memory image
    SetMemory(Vec<u8>),
    /// Replace the instruction memory image
    SetInstructions(Vec<u8>),
    /// Memory read performed by the retiring instruction
    LoadOp(MemoryAccess),
    /// Memory write performed by the retiring instruction
    StoreOp(MemoryAccess),
    /// Overwrite one register with a raw 128-bit value
    PatchRegister { index: u8, value: [u8; 16] },
    /// Overwrite one 32-bit word of data memory
    PatchMemory { address: u16, value: u32 },
}

impl Packet {
    pub fn discriminant(&self) -> u8 {
        match self {
            Self::PushSnapshot => PUSH_SNAPSHOT,
            Self::SetRegisters(_) => SET_REGISTERS,
            Self::SetMemory(_) => SET_MEMORY,
            Self::SetInstructions(_) => SET_INSTRUCTIONS,
            Self::LoadOp(_) => LOAD_OP,
            Self::StoreOp(_) => STORE_OP,
            Self::PatchRegister { .. } => PATCH_REGISTER,
            Self::PatchMemory { .. } => PATCH_MEMORY,
        }
    }
}

/// Lazy reader producing `(offset, packet)` pairs until end of stream
///
/// The offset is the stream position of the packet's discriminant byte. The
/// iterator stops after the first error.
pub struct PacketReader<R> {
    inner: Chain<Cursor<Vec<u8>>, R>,
    offset: u64,
    version: FormatVersion,
    config: TraceConfig,
    finished: bool,
}

impl<R: Read> PacketReader<R> {
    /// Parse the header and position the reader at the first packet
    pub fn new(mut reader: R, config: TraceConfig) -> Result<Self> {
        let mut magic = [0u8; 4];
        read_exact(&mut reader, &mut magic, 0)?;

        let (replay, version, offset) = if &magic == MAGIC {
            let mut raw = [0u8; 4];
            read_exact(&mut reader, &mut raw, 4)?;
            let version = FormatVersion::from_u32(u32::from_le_bytes(raw))?;
            tracing::debug!("trace header found, format version {}", version.as_u32());
            (Vec::new(), version, 8)
        } else {
            // No header: the four bytes already consumed are packet data
            tracing::debug!("no trace header, assuming format version 1");
            (magic.to_vec(), FormatVersion::V1, 0)
        };

        Ok(Self {
            inner: Cursor::new(replay).chain(reader),
            offset,
            version,
            config,
            finished: false,
        })
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// Current stream offset
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        read_exact(&mut self.inner, buf, self.offset)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    fn read_u32(&mut self) -> Result<u32> {
        self.read_array::<4>().map(u32::from_le_bytes)
    }

    /// Read one discriminant byte; `None` on a clean end of stream
    fn read_discriminant(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.offset += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_packet(&mut self) -> Result<Option<(u64, Packet)>> {
        let start = self.offset;
        let Some(discriminant) = self.read_discriminant()? else {
            return Ok(None);
        };

        let packet = match discriminant {
            PUSH_SNAPSHOT => Packet::PushSnapshot,
            SET_REGISTERS => {
                let layout = self.version.register_layout();
                let payload = self.read_vec(layout.size())?;
                Packet::SetRegisters(Box::new(layout.decode(&payload)))
            }
            SET_MEMORY => Packet::SetMemory(self.read_vec(self.config.memory_size)?),
            SET_INSTRUCTIONS => Packet::SetInstructions(self.read_vec(self.config.program_size)?),
            LOAD_OP => Packet::LoadOp(MemoryAccess::new(self.read_u32()?, self.read_u32()?)),
            STORE_OP => Packet::StoreOp(MemoryAccess::new(self.read_u32()?, self.read_u32()?)),
            PATCH_REGISTER => {
                let [index] = self.read_array::<1>()?;
                let value = self.read_array::<16>()?;
                if index > MAX_PATCH_INDEX {
                    return Err(TraceError::format(start, FormatError::RegisterIndex(index)));
                }
                Packet::PatchRegister { index, value }
            }
            PATCH_MEMORY => {
                let address = u16::from_le_bytes(self.read_array::<2>()?);
                let value = self.read_u32()?;
                if address as usize + 4 > self.config.memory_size {
                    return Err(TraceError::format(start, FormatError::MemoryAddress(address)));
                }
                Packet::PatchMemory { address, value }
            }
            other => return Err(TraceError::format(start, FormatError::UnknownPacket(other))),
        };

        tracing::trace!("packet {:?} at {:#x}", discriminant as char, start);
        Ok(Some((start, packet)))
    }
}

impl<R: Read> Iterator for PacketReader<R> {
    type Item = Result<(u64, Packet)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_packet() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => TraceError::UnexpectedEof { offset },
        _ => TraceError::Io(e),
    })
}

/// Encoder for trace streams
///
/// Produces files the reader accepts; used to build fixtures and to
/// re-encode traces in the current format.
pub struct PacketWriter<W> {
    out: W,
    version: FormatVersion,
}

impl<W: Write> PacketWriter<W> {
    /// Write a `VUTR` header for `version`
    pub fn new(mut out: W, version: FormatVersion) -> io::Result<Self> {
        out.write_all(MAGIC)?;
        out.write_all(&version.as_u32().to_le_bytes())?;
        Ok(Self { out, version })
    }

    /// Version 1 stream without a header
    pub fn headerless(out: W) -> Self {
        Self {
            out,
            version: FormatVersion::V1,
        }
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn write_packet(&mut self, packet: &Packet) -> io::Result<()> {
        self.out.write_all(&[packet.discriminant()])?;
        match packet {
            Packet::PushSnapshot => {}
            Packet::SetRegisters(regs) => {
                self.out.write_all(&self.version.register_layout().encode(regs))?;
            }
            Packet::SetMemory(image) | Packet::SetInstructions(image) => self.out.write_all(image)?,
            Packet::LoadOp(access) | Packet::StoreOp(access) => {
                self.out.write_all(&access.addr.to_le_bytes())?;
                self.out.write_all(&access.size.to_le_bytes())?;
            }
            Packet::PatchRegister { index, value } => {
                self.out.write_all(&[*index])?;
                self.out.write_all(value)?;
            }
            Packet::PatchMemory { address, value } => {
                self.out.write_all(&address.to_le_bytes())?;
                self.out.write_all(&value.to_le_bytes())?;
            }
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::vi;

    fn small_config() -> TraceConfig {
        TraceConfig::new(64, 32)
    }

    fn encode(version: Option<FormatVersion>, packets: &[Packet]) -> Vec<u8> {
        let mut writer = match version {
            Some(version) => PacketWriter::new(Vec::new(), version).unwrap(),
            None => PacketWriter::headerless(Vec::new()),
        };
        for packet in packets {
            writer.write_packet(packet).unwrap();
        }
        writer.into_inner()
    }

    fn decode(bytes: &[u8]) -> Result<Vec<(u64, Packet)>> {
        PacketReader::new(bytes, small_config())?.collect()
    }

    #[test]
    fn test_versioned_header() {
        let bytes = encode(Some(FormatVersion::V3), &[Packet::PushSnapshot]);
        assert_eq!(&bytes[..4], b"VUTR");
        let reader = PacketReader::new(&bytes[..], small_config()).unwrap();
        assert_eq!(reader.version(), FormatVersion::V3);
        assert_eq!(reader.offset(), 8);
        let packets: Vec<_> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(packets, vec![(8, Packet::PushSnapshot)]);
    }

    #[test]
    fn test_headerless_stream_replays_first_bytes() {
        let bytes = encode(
            None,
            &[
                Packet::PushSnapshot,
                Packet::LoadOp(MemoryAccess::new(0x20, 16)),
                Packet::PushSnapshot,
            ],
        );
        let reader = PacketReader::new(&bytes[..], small_config()).unwrap();
        assert_eq!(reader.version(), FormatVersion::V1);
        let packets: Vec<_> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(
            packets,
            vec![
                (0, Packet::PushSnapshot),
                (1, Packet::LoadOp(MemoryAccess::new(0x20, 16))),
                (10, Packet::PushSnapshot),
            ]
        );
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = b"VUTR".to_vec();
        bytes.extend_from_slice(&4u32.to_le_bytes());
        let err = PacketReader::new(&bytes[..], small_config()).err().unwrap();
        assert!(matches!(err, TraceError::UnsupportedVersion { version: 4 }));
    }

    #[test]
    fn test_tagged_version_zero_is_unsupported() {
        let mut bytes = b"VUTR".to_vec();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(b'P');
        let err = PacketReader::new(&bytes[..], small_config()).err().unwrap();
        assert!(matches!(err, TraceError::UnsupportedVersion { version: 0 }));
    }

    #[test]
    fn test_stream_shorter_than_magic() {
        let err = PacketReader::new(&b"PP"[..], small_config()).err().unwrap();
        assert!(matches!(err, TraceError::UnexpectedEof { offset: 0 }));
    }

    #[test]
    fn test_unknown_discriminant_reports_offset() {
        let mut bytes = encode(Some(FormatVersion::V3), &[Packet::PushSnapshot]);
        bytes.push(b'X');
        let err = decode(&bytes).unwrap_err();
        match err {
            TraceError::Format { offset, source } => {
                assert_eq!(offset, 9);
                assert_eq!(source, FormatError::UnknownPacket(b'X'));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = encode(Some(FormatVersion::V3), &[]);
        bytes.push(b'M');
        bytes.extend_from_slice(&[0u8; 10]);
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, TraceError::UnexpectedEof { offset: 9 }), "{err:?}");
    }

    #[test]
    fn test_register_patch_bounds() {
        let ok = encode(
            Some(FormatVersion::V3),
            &[Packet::PatchRegister { index: 66, value: [1; 16] }],
        );
        assert_eq!(decode(&ok).unwrap().len(), 1);

        let mut bad = encode(Some(FormatVersion::V3), &[]);
        bad.push(b'r');
        bad.push(67);
        bad.extend_from_slice(&[0u8; 16]);
        let err = decode(&bad).unwrap_err();
        assert!(matches!(
            err,
            TraceError::Format { offset: 8, source: FormatError::RegisterIndex(67) }
        ));
    }

    #[test]
    fn test_memory_patch_bounds() {
        // Last full word of a 64 byte memory is accepted
        let ok = encode(
            Some(FormatVersion::V3),
            &[Packet::PatchMemory { address: 60, value: 1 }],
        );
        assert_eq!(decode(&ok).unwrap().len(), 1);

        let bad = encode(
            Some(FormatVersion::V3),
            &[Packet::PatchMemory { address: 61, value: 1 }],
        );
        let err = decode(&bad).unwrap_err();
        assert!(matches!(
            err,
            TraceError::Format { offset: 8, source: FormatError::MemoryAddress(61) }
        ));
    }

    #[test]
    fn test_set_registers_uses_version_layout() {
        let mut regs = RegisterFile::default();
        regs.vi[vi::TPC] = 8;
        regs.p = 3;
        let packet = Packet::SetRegisters(Box::new(regs));

        for version in [FormatVersion::V1, FormatVersion::V2, FormatVersion::V3] {
            let bytes = encode(Some(version), &[packet.clone(), Packet::PushSnapshot]);
            assert_eq!(bytes.len(), 8 + 1 + version.register_layout().size() + 1);
            let packets = decode(&bytes).unwrap();
            assert_eq!(packets[0].1, packet);
        }
    }

    #[test]
    fn test_reader_stops_after_error() {
        let mut bytes = encode(Some(FormatVersion::V3), &[]);
        bytes.extend_from_slice(b"ZP");
        let mut reader = PacketReader::new(&bytes[..], small_config()).unwrap();
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }
}
