//! Error types for trace ingestion

use std::io;
use thiserror::Error;

/// Fatal error raised while loading a trace.
///
/// Every variant aborts the whole load; no partially reconstructed session is
/// ever returned.
#[derive(Debug, Error)]
pub enum TraceError {
    /// A packet was structurally valid but its content is not acceptable
    #[error("malformed trace at offset {offset:#x}: {source}")]
    Format {
        /// Stream offset of the offending packet (its discriminant byte)
        offset: u64,
        #[source]
        source: FormatError,
    },

    /// The header carries a version this reader does not understand
    #[error("unsupported trace format version {version}")]
    UnsupportedVersion { version: u32 },

    /// The stream ended in the middle of a header or packet
    #[error("unexpected end of file at offset {offset:#x}")]
    UnexpectedEof { offset: u64 },

    /// The trace could not be opened or read
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reason attached to [`TraceError::Format`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid packet type {0:#04x}")]
    UnknownPacket(u8),

    #[error("register patch has bad register index {0}")]
    RegisterIndex(u8),

    #[error("memory patch address {0:#x} is out of range")]
    MemoryAddress(u16),

    /// Pushed snapshot has a PC outside the instruction memory or not pair aligned
    #[error("invariant violation: bad program counter {pc:#x}")]
    InvariantViolation { pc: u32 },
}

impl TraceError {
    pub(crate) fn format(offset: u64, source: FormatError) -> Self {
        Self::Format { offset, source }
    }

    /// Stream offset the error refers to, if any
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::Format { offset, .. } | Self::UnexpectedEof { offset } => Some(*offset),
            Self::UnsupportedVersion { .. } | Self::Io(_) => None,
        }
    }
}
