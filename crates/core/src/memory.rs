//! Word-addressed backing memory behind PEEK/POKE.
//!
//! | Address Range               | Content                       |
//! |-----------------------------|-------------------------------|
//! | `MEM_BASE`..`MEM_BASE+SIZE` | 512 Ki 32-bit words (2 MiB)   |
//! | anything else               | reads `OUT_OF_RANGE_WORD`, writes dropped |
//!
//! Addresses are byte addresses; the low two bits are ignored when indexing
//! (`(address - MEM_BASE) / 4`).

use tracing::debug;

use crate::{MEM_BASE, MEM_SIZE, OUT_OF_RANGE_WORD};

/// Target of completed PEEK/POKE operations.
pub trait WordBus {
    fn peek(&mut self, address: u32) -> u32;
    fn poke(&mut self, address: u32, value: u32);
}

/// 2 MiB of 32-bit words mapped at [`MEM_BASE`].
pub struct BackingMemory {
    words: Vec<u32>,
}

impl BackingMemory {
    pub fn new() -> Self {
        BackingMemory { words: vec![0u32; MEM_SIZE / 4] }
    }

    #[inline(always)]
    fn index(address: u32) -> Option<usize> {
        let offset = address.checked_sub(MEM_BASE)? as usize;
        if offset < MEM_SIZE { Some(offset / 4) } else { None }
    }

    pub fn in_range(address: u32) -> bool {
        Self::index(address).is_some()
    }

    /// Read word at byte address; out-of-range returns the sentinel.
    pub fn read_word(&self, address: u32) -> u32 {
        match Self::index(address) {
            Some(i) => self.words[i],
            None => OUT_OF_RANGE_WORD,
        }
    }

    /// Write word at byte address; out-of-range writes are dropped.
    pub fn write_word(&mut self, address: u32, value: u32) -> bool {
        match Self::index(address) {
            Some(i) => { self.words[i] = value; true }
            None => false,
        }
    }

    /// Raw view by word index, for the debugger.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }
}

impl WordBus for BackingMemory {
    fn peek(&mut self, address: u32) -> u32 {
        if !Self::in_range(address) {
            debug!("peek 0x{:08X} out of range, returning sentinel", address);
        }
        self.read_word(address)
    }

    fn poke(&mut self, address: u32, value: u32) {
        if !self.write_word(address, value) {
            debug!("poke 0x{:08X} out of range, 0x{:08X} dropped", address, value);
        }
    }
}

impl Default for BackingMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-word latch used by the detection generation, which has no memory:
/// PEEK returns whatever was last POKEd (or the detection signature).
#[derive(Debug, Default)]
pub struct EchoLatch {
    pub value: u32,
}

impl WordBus for EchoLatch {
    fn peek(&mut self, _address: u32) -> u32 {
        self.value
    }

    fn poke(&mut self, _address: u32, value: u32) {
        self.value = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_roundtrip() {
        let mut mem = BackingMemory::new();
        mem.poke(MEM_BASE + 0x10, 0xDEAD_BEEF);
        assert_eq!(mem.peek(MEM_BASE + 0x10), 0xDEAD_BEEF);
        assert_eq!(mem.words()[4], 0xDEAD_BEEF);
    }

    #[test]
    fn test_low_bits_ignored() {
        let mut mem = BackingMemory::new();
        mem.poke(MEM_BASE + 0x13, 0x1122_3344);
        assert_eq!(mem.peek(MEM_BASE + 0x10), 0x1122_3344);
    }

    #[test]
    fn test_out_of_range_sentinel() {
        let mut mem = BackingMemory::new();
        assert_eq!(mem.peek(MEM_BASE - 4), OUT_OF_RANGE_WORD);
        assert_eq!(mem.peek(MEM_BASE + MEM_SIZE as u32), OUT_OF_RANGE_WORD);
        assert_eq!(mem.peek(0), OUT_OF_RANGE_WORD);
        assert_eq!(mem.peek(u32::MAX), OUT_OF_RANGE_WORD);
    }

    #[test]
    fn test_out_of_range_poke_ignored() {
        let mut mem = BackingMemory::new();
        mem.poke(MEM_BASE + MEM_SIZE as u32, 0x1234_5678);
        mem.poke(0x0000_0000, 0x1234_5678);
        assert!(mem.words().iter().all(|&w| w == 0));
    }

    #[test]
    fn test_last_word_in_range() {
        let mut mem = BackingMemory::new();
        let last = MEM_BASE + MEM_SIZE as u32 - 4;
        assert!(BackingMemory::in_range(last));
        mem.poke(last, 7);
        assert_eq!(mem.peek(last), 7);
    }

    #[test]
    fn test_echo_latch() {
        let mut latch = EchoLatch::default();
        latch.poke(0x8000_0000, 0xCAFE);
        assert_eq!(latch.peek(0), 0xCAFE);
    }
}
