//! Incremental state reconstruction
//!
//! Packets edit a single mutable "current" state. Each `PushSnapshot` copies
//! that state into the [`SnapshotStore`], updates the flow statistics and
//! clears the access records, which the next LoadOp/StoreOp packets refill
//! for the instruction retiring into the following snapshot.

use crate::config::{TraceConfig, INSN_PAIR_SIZE};
use crate::error::{FormatError, TraceError};
use crate::flow::{slot_index, InstructionTable};
use crate::packet::Packet;
use crate::trace::{MemoryAccess, Snapshot, SnapshotStore};
use crate::Result;
use std::sync::Arc;

/// Builder turning a packet stream into snapshots and flow statistics
#[derive(Debug)]
pub struct StateAccumulator {
    config: TraceConfig,
    current: Snapshot,
    store: SnapshotStore,
    instructions: InstructionTable,
    program_changed: bool,
}

impl StateAccumulator {
    pub fn new(config: TraceConfig) -> Self {
        Self {
            config,
            current: Snapshot::blank(&config),
            store: SnapshotStore::new(),
            instructions: InstructionTable::new(config.slot_count()),
            program_changed: false,
        }
    }

    /// State that the next push will materialize
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn instructions(&self) -> &InstructionTable {
        &self.instructions
    }

    /// True if the instruction image was replaced after the first snapshot
    pub fn program_changed(&self) -> bool {
        self.program_changed
    }

    /// Apply one packet read at stream `offset`
    pub fn apply(&mut self, offset: u64, packet: Packet) -> Result<()> {
        match packet {
            Packet::PushSnapshot => self.push(offset)?,
            Packet::SetRegisters(regs) => self.current.registers = *regs,
            Packet::SetMemory(image) => {
                self.current.memory = Arc::new(sized(image, self.config.memory_size));
            }
            Packet::SetInstructions(image) => {
                let image = sized(image, self.config.program_size);
                if !self.store.is_empty() && *self.current.program != image && !self.program_changed {
                    tracing::warn!(
                        "instruction memory replaced at offset {:#x}; disassembly reflects the final image",
                        offset
                    );
                    self.program_changed = true;
                }
                self.current.program = Arc::new(image);
            }
            Packet::LoadOp(access) => self.current.read = access,
            Packet::StoreOp(access) => self.current.write = access,
            Packet::PatchRegister { index, value } => self
                .current
                .registers
                .patch(index, value)
                .map_err(|e| TraceError::format(offset, e))?,
            Packet::PatchMemory { address, value } => {
                let start = address as usize;
                let memory = Arc::make_mut(&mut self.current.memory);
                let word = memory
                    .get_mut(start..start + 4)
                    .ok_or_else(|| TraceError::format(offset, FormatError::MemoryAddress(address)))?;
                word.copy_from_slice(&value.to_le_bytes());
            }
        }
        Ok(())
    }

    fn push(&mut self, offset: u64) -> Result<()> {
        let pc = self.current.pc();
        // the slot table bound also rejects the tail of a program size that is not pair aligned
        if slot_index(pc) >= self.instructions.len() || pc % INSN_PAIR_SIZE != 0 {
            return Err(TraceError::format(offset, FormatError::InvariantViolation { pc }));
        }

        let previous_pc = self.store.last().map(Snapshot::pc);
        self.store.push(self.current.clone());
        self.instructions.record(previous_pc, pc);

        self.current.read = MemoryAccess::NONE;
        self.current.write = MemoryAccess::NONE;
        Ok(())
    }

    /// Finish ingestion, returning the store, the flow table and the final state
    pub fn finish(self) -> (SnapshotStore, InstructionTable, Snapshot) {
        (self.store, self.instructions, self.current)
    }
}

/// Images always match the configured size, whatever a hand-built packet carries
fn sized(mut image: Vec<u8>, size: usize) -> Vec<u8> {
    image.resize(size, 0);
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{vi, RegisterFile, Vector};

    fn config() -> TraceConfig {
        TraceConfig::new(64, 64)
    }

    fn set_pc(pc: u32) -> Packet {
        let mut regs = RegisterFile::default();
        regs.vi[vi::TPC] = pc;
        Packet::SetRegisters(Box::new(regs))
    }

    fn run(packets: Vec<Packet>) -> StateAccumulator {
        let mut acc = StateAccumulator::new(config());
        for (i, packet) in packets.into_iter().enumerate() {
            acc.apply(i as u64, packet).unwrap();
        }
        acc
    }

    #[test]
    fn test_push_count_matches_snapshots() {
        let acc = run(vec![
            set_pc(0),
            Packet::PushSnapshot,
            Packet::PushSnapshot,
            set_pc(8),
            Packet::PushSnapshot,
        ]);
        assert_eq!(acc.store().len(), 3);
        assert_eq!(acc.store().pc(2), Some(8));
    }

    #[test]
    fn test_access_records_attach_to_following_snapshot() {
        let acc = run(vec![
            set_pc(0),
            Packet::PushSnapshot,
            // issued by the instruction at pc 0, retiring into snapshot 1
            Packet::LoadOp(MemoryAccess::new(0x20, 16)),
            set_pc(8),
            Packet::PushSnapshot,
            Packet::StoreOp(MemoryAccess::new(0x30, 4)),
            set_pc(16),
            Packet::PushSnapshot,
        ]);
        let store = acc.store();
        assert_eq!(store[0].read, MemoryAccess::NONE);
        assert_eq!(store[1].read, MemoryAccess::new(0x20, 16));
        assert_eq!(store[1].write, MemoryAccess::NONE);
        assert_eq!(store[2].read, MemoryAccess::NONE);
        assert_eq!(store[2].write, MemoryAccess::new(0x30, 4));
        // cleared on the builder after every push
        assert_eq!(acc.current().write, MemoryAccess::NONE);
    }

    #[test]
    fn test_patches_edit_in_place() {
        let acc = run(vec![
            Packet::SetMemory(vec![0xaa; 64]),
            Packet::PatchMemory { address: 4, value: 0x0403_0201 },
            Packet::PatchRegister { index: 2, value: Vector([1, 2, 3, 4]).to_le_bytes() },
            Packet::PushSnapshot,
            Packet::PatchMemory { address: 60, value: 0 },
            Packet::PushSnapshot,
        ]);
        let first = &acc.store()[0];
        assert_eq!(&first.memory[..9], &[0xaa, 0xaa, 0xaa, 0xaa, 1, 2, 3, 4, 0xaa]);
        assert_eq!(first.registers.vf[2], Vector([1, 2, 3, 4]));

        // later edits do not leak into earlier snapshots
        let second = &acc.store()[1];
        assert_eq!(first.memory[60], 0xaa);
        assert_eq!(second.memory[60], 0);
        assert_eq!(second.registers, first.registers);
    }

    #[test]
    fn test_unchanged_images_are_shared() {
        let acc = run(vec![Packet::PushSnapshot, Packet::PushSnapshot]);
        let store = acc.store();
        assert!(Arc::ptr_eq(&store[0].memory, &store[1].memory));
        assert!(Arc::ptr_eq(&store[0].program, &store[1].program));
    }

    #[test]
    fn test_bad_pc_on_push() {
        for pc in [4, 64, 0x1000] {
            let mut acc = StateAccumulator::new(config());
            acc.apply(0, set_pc(pc)).unwrap();
            let err = acc.apply(7, Packet::PushSnapshot).unwrap_err();
            assert!(
                matches!(
                    err,
                    TraceError::Format { offset: 7, source: FormatError::InvariantViolation { pc: p } } if p == pc
                ),
                "{err:?}"
            );
            assert!(acc.store().is_empty());
        }
    }

    #[test]
    fn test_pc_past_last_whole_slot_is_rejected() {
        // 12 bytes of program hold a single instruction pair
        let mut acc = StateAccumulator::new(TraceConfig::new(64, 12));
        acc.apply(0, set_pc(8)).unwrap();
        let err = acc.apply(1, Packet::PushSnapshot).unwrap_err();
        assert!(matches!(
            err,
            TraceError::Format { offset: 1, source: FormatError::InvariantViolation { pc: 8 } }
        ));
        assert!(acc.store().is_empty());

        acc.apply(2, set_pc(0)).unwrap();
        acc.apply(3, Packet::PushSnapshot).unwrap();
        assert_eq!(acc.instructions()[0].times_executed, 1);
    }

    #[test]
    fn test_out_of_range_patch_is_rejected() {
        let mut acc = StateAccumulator::new(config());
        let err = acc
            .apply(3, Packet::PatchMemory { address: 62, value: 0 })
            .unwrap_err();
        assert!(matches!(
            err,
            TraceError::Format { offset: 3, source: FormatError::MemoryAddress(62) }
        ));
        let err = acc
            .apply(5, Packet::PatchRegister { index: 70, value: [0; 16] })
            .unwrap_err();
        assert!(matches!(
            err,
            TraceError::Format { offset: 5, source: FormatError::RegisterIndex(70) }
        ));
    }

    #[test]
    fn test_flow_updated_per_push() {
        let acc = run(vec![
            set_pc(0),
            Packet::PushSnapshot,
            set_pc(8),
            Packet::PushSnapshot,
            set_pc(0),
            Packet::PushSnapshot,
        ]);
        let table = acc.instructions();
        assert_eq!(table[0].times_executed, 2);
        assert_eq!(table[1].times_executed, 1);
        assert_eq!(table[1].branch_to.get(&0), Some(&1));
        assert_eq!(table[0].branch_from.get(&8), Some(&1));
        assert!(table[0].branch_to.is_empty());
    }

    #[test]
    fn test_program_change_is_flagged() {
        let acc = run(vec![
            Packet::SetInstructions(vec![0; 64]),
            Packet::PushSnapshot,
            Packet::SetInstructions(vec![0; 64]),
        ]);
        assert!(!acc.program_changed());

        let acc = run(vec![
            Packet::PushSnapshot,
            Packet::SetInstructions(vec![1; 64]),
            Packet::PushSnapshot,
        ]);
        assert!(acc.program_changed());
        assert_eq!(acc.store()[0].program[0], 0);
        assert_eq!(acc.store()[1].program[0], 1);
    }
}
