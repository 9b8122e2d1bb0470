//! Per-instruction execution counts and branch edges
//!
//! Statistics are derived from consecutive snapshot PCs while the trace is
//! ingested: a PC that is not the previous PC plus one instruction pair is a
//! taken branch (or jump) from the previous instruction to the new one.

use crate::config::INSN_PAIR_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Execution statistics for one instruction pair address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionSlot {
    /// Some snapshot had its PC at this address
    pub executed: bool,
    /// Number of snapshots with their PC at this address
    pub times_executed: usize,
    /// Non-sequential successors: target address -> count
    pub branch_to: BTreeMap<u32, usize>,
    /// Non-sequential predecessors: source address -> count
    pub branch_from: BTreeMap<u32, usize>,
    /// Disassembly of the final instruction memory image
    pub disassembly: String,
}

impl InstructionSlot {
    /// Times this instruction was reached by sequential fall-through
    /// (or as the very first snapshot)
    pub fn fall_through_in(&self) -> usize {
        self.times_executed
            .saturating_sub(self.branch_from.values().sum::<usize>())
    }

    /// Times this instruction was followed by the next sequential one
    ///
    /// The final snapshot of a trace has no successor, so this can over-count
    /// by one for the last executed instruction.
    pub fn fall_through_out(&self) -> usize {
        self.times_executed
            .saturating_sub(self.branch_to.values().sum::<usize>())
    }
}

/// Instruction slot table, one slot per instruction pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionTable {
    slots: Vec<InstructionSlot>,
}

impl InstructionTable {
    /// Table with `slot_count` empty slots
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: vec![InstructionSlot::default(); slot_count],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot by index (`address / 8`)
    pub fn get(&self, index: usize) -> Option<&InstructionSlot> {
        self.slots.get(index)
    }

    /// Slot for an instruction address
    pub fn at_address(&self, address: u32) -> Option<&InstructionSlot> {
        self.get(slot_index(address))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InstructionSlot> {
        self.slots.iter()
    }

    /// Slots paired with their instruction addresses
    pub fn addressed(&self) -> impl Iterator<Item = (u32, &InstructionSlot)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (i as u32 * INSN_PAIR_SIZE, slot))
    }

    /// Account for a newly pushed snapshot at `pc`, preceded by one at `previous_pc`
    ///
    /// Callers guarantee both PCs are in range and pair aligned.
    pub fn record(&mut self, previous_pc: Option<u32>, pc: u32) {
        let slot = &mut self.slots[slot_index(pc)];
        slot.executed = true;
        slot.times_executed += 1;

        if let Some(previous_pc) = previous_pc {
            if previous_pc.wrapping_add(INSN_PAIR_SIZE) != pc {
                *slot.branch_from.entry(previous_pc).or_insert(0) += 1;
                *self.slots[slot_index(previous_pc)]
                    .branch_to
                    .entry(pc)
                    .or_insert(0) += 1;
            }
        }
    }

    /// Fill in disassembly text for every slot from one instruction image
    pub(crate) fn disassemble_with<F>(&mut self, mut disassemble: F)
    where
        F: FnMut(u32) -> String,
    {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.disassembly = disassemble(i as u32 * INSN_PAIR_SIZE);
        }
    }
}

impl std::ops::Index<usize> for InstructionTable {
    type Output = InstructionSlot;

    fn index(&self, index: usize) -> &InstructionSlot {
        &self.slots[index]
    }
}

/// Slot index of an instruction address
pub fn slot_index(address: u32) -> usize {
    (address / INSN_PAIR_SIZE) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn walk(pcs: &[u32], slots: usize) -> InstructionTable {
        let mut table = InstructionTable::new(slots);
        let mut previous = None;
        for &pc in pcs {
            table.record(previous, pc);
            previous = Some(pc);
        }
        table
    }

    #[test]
    fn test_first_snapshot_is_not_a_branch() {
        let table = walk(&[16], 4);
        let slot = table.at_address(16).unwrap();
        assert!(slot.executed);
        assert_eq!(slot.times_executed, 1);
        assert!(slot.branch_from.is_empty());
        assert_eq!(slot.fall_through_in(), 1);
    }

    #[test]
    fn test_loop_edges() {
        // 0 -> 8 -> 16 -> 0 -> 8 -> 16 -> 24
        let table = walk(&[0, 8, 16, 0, 8, 16, 24], 4);

        assert_eq!(table[0].times_executed, 2);
        assert_eq!(table[0].branch_from, BTreeMap::from([(16, 1)]));
        assert_eq!(table[0].fall_through_in(), 1);

        assert_eq!(table[2].branch_to, BTreeMap::from([(0, 1)]));
        assert_eq!(table[2].fall_through_out(), 1);

        assert!(table[1].branch_to.is_empty() && table[1].branch_from.is_empty());
        assert_eq!(table[3].times_executed, 1);
    }

    #[test]
    fn test_self_loop_counts_as_branch() {
        let table = walk(&[8, 8, 8], 2);
        assert_eq!(table[1].times_executed, 3);
        assert_eq!(table[1].branch_to, BTreeMap::from([(8, 2)]));
        assert_eq!(table[1].branch_from, BTreeMap::from([(8, 2)]));
    }

    #[test]
    fn test_unexecuted_slots_stay_empty() {
        let table = walk(&[0, 24], 8);
        assert!(!table[1].executed);
        assert_eq!(table.iter().filter(|s| s.executed).count(), 2);
        let addressed: Vec<u32> = table
            .addressed()
            .filter(|(_, s)| s.executed)
            .map(|(a, _)| a)
            .collect();
        assert_eq!(addressed, vec![0, 24]);
    }

    #[test]
    fn test_random_walk_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let slots = 32;
        let mut pcs = vec![0u32];
        for _ in 0..2000 {
            let last = *pcs.last().unwrap();
            let next = if rng.gen_bool(0.7) && last + 8 < slots as u32 * 8 {
                last + 8
            } else {
                rng.gen_range(0..slots as u32) * 8
            };
            pcs.push(next);
        }

        let table = walk(&pcs, slots);

        for (address, slot) in table.addressed() {
            let count = pcs.iter().filter(|&&pc| pc == address).count();
            assert_eq!(slot.times_executed, count, "slot {address:#x}");
            assert_eq!(slot.executed, count > 0);

            let sequential_in = pcs
                .windows(2)
                .filter(|w| w[1] == address && w[0] + 8 == address)
                .count();
            let first = usize::from(pcs[0] == address);
            assert_eq!(slot.fall_through_in(), sequential_in + first);

            // every outgoing edge has a matching incoming edge
            for (&target, &times) in &slot.branch_to {
                assert_eq!(table.at_address(target).unwrap().branch_from[&address], times);
            }
        }

        let edges = pcs.windows(2).filter(|w| w[0] + 8 != w[1]).count();
        let recorded: usize = table.iter().map(|s| s.branch_to.values().sum::<usize>()).sum();
        assert_eq!(edges, recorded);
    }
}
