//! VU Tracer - Replay engine for recorded VU co-processor traces
//!
//! This crate reads trace files captured by an instrumented emulator, one
//! record of register file, data memory and instruction memory per retired
//! instruction, and rebuilds them into a navigable sequence of snapshots.
//!
//! # Overview
//!
//! Loading a trace runs a short pipeline:
//!
//! * [`PacketReader`] decodes the versioned packet stream
//! * [`StateAccumulator`] applies packets to a mutable current state and
//!   materializes a [`Snapshot`] on every push
//! * [`InstructionTable`] collects execution counts and branch edges from
//!   consecutive snapshot PCs
//! * [`TraceSession`] owns the result and navigates it with a cursor
//!
//! # Usage
//!
//! ```no_run
//! use vu_tracer::{RawDisassembler, TraceConfig, TraceSession};
//!
//! let mut session = TraceSession::open("vu1.trace", TraceConfig::default(), &RawDisassembler)?;
//! println!("Loaded {} snapshots", session.snapshots().len());
//!
//! // jump to the next time the current instruction runs
//! session.next_iteration();
//! # Ok::<(), vu_tracer::TraceError>(())
//! ```
//!
//! # Limitations
//!
//! * Disassembly is computed once from the final instruction memory image; if
//!   a trace replaces its microprogram midway, earlier snapshots show the
//!   final program's text.
//! * Any malformed packet aborts the whole load. There is no partial recovery.

pub mod accumulator;
pub mod collab;
pub mod config;
pub mod error;
pub mod flow;
pub mod navigator;
pub mod packet;
pub mod registers;
pub mod session;
pub mod trace;

pub use accumulator::StateAccumulator;
pub use collab::{Disassembler, GsPacketDecoder, RawDisassembler};
pub use config::{TraceConfig, INSN_PAIR_SIZE};
pub use error::{FormatError, TraceError};
pub use flow::{InstructionSlot, InstructionTable};
pub use navigator::Step;
pub use packet::{FormatVersion, Packet, PacketReader, PacketWriter};
pub use registers::{RegisterFile, Vector};
pub use session::{AccessKind, SnapshotFilter, TraceSession};
pub use trace::{MemoryAccess, Snapshot, SnapshotStore};

/// Result type for trace operations
pub type Result<T> = std::result::Result<T, TraceError>;
