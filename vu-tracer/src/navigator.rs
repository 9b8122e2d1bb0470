//! Searches over a loaded snapshot store
//!
//! These functions only read the store and return indices; moving the
//! session cursor is left to [`TraceSession`](crate::TraceSession).

use crate::trace::SnapshotStore;

/// Direction of a PC seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Backward,
    Forward,
}

impl Step {
    fn advance(self, index: usize, len: usize) -> Option<usize> {
        match self {
            Self::Backward => index.checked_sub(1),
            Self::Forward => index.checked_add(1).filter(|&next| next < len),
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Self::Backward => Self::Forward,
            Self::Forward => Self::Backward,
        }
    }
}

/// First index reached from `from` by repeated `step` whose PC equals `target_pc`
///
/// `from` itself is never a match; `None` if a boundary is hit first.
pub fn find_pc(store: &SnapshotStore, from: usize, target_pc: u32, step: Step) -> Option<usize> {
    let mut index = from;
    loop {
        index = step.advance(index, store.len())?;
        if store.pc(index) == Some(target_pc) {
            return Some(index);
        }
    }
}

/// Index to land on for the next snapshot touching the 16-byte block of `address`
///
/// Scans cyclically from `from + 1`, wrapping to the start, and stops after
/// testing `from` itself. On a match at `j` the result is `j - 1` (saturating),
/// the snapshot whose instruction performs the access.
pub fn find_memory_access(store: &SnapshotStore, from: usize, address: u32) -> Option<usize> {
    let len = store.len();
    if len == 0 {
        return None;
    }
    let start = from % len;
    let mut index = start;
    loop {
        index = (index + 1) % len;
        let snapshot = &store[index];
        if snapshot.read.hits_block(address) || snapshot.write.hits_block(address) {
            return Some(index.saturating_sub(1));
        }
        if index == start {
            return None;
        }
    }
}

/// Lowest address where `pattern` occurs in `memory`
///
/// An empty pattern matches nothing.
pub fn find_bytes(memory: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > memory.len() {
        return None;
    }
    memory.windows(pattern.len()).position(|window| window == pattern)
}

/// Decode a user typed hex byte pattern
///
/// Separators and any other non-hex characters are skipped, so `"de ad be ef"`
/// and `"DEADBEEF"` are equivalent. A dangling final nibble is dropped.
pub fn decode_hex_pattern(input: &str) -> Vec<u8> {
    let mut digits: String = input.chars().filter(char::is_ascii_hexdigit).collect();
    if digits.len() % 2 != 0 {
        digits.pop();
    }
    // only hex digits remain, so decoding cannot fail
    hex::decode(digits).unwrap_or_default()
}

/// Parse a hex address with an optional `0x` prefix
pub fn parse_hex_address(input: &str) -> Option<usize> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    usize::from_str_radix(digits, 16).ok()
}
