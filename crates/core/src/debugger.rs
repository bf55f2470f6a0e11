//! Port-level debugging facilities.
//!
//! - **Watchpoints**: Trigger on reads/writes of a port offset
//! - **Access trace**: The last N port accesses with the protocol state they left
//! - **Memory viewer**: Word dump of backing memory
//! - **Register viewer**: Named dump of the register file
//!
//! Watchpoints and the trace are fed from [`Aqp::read_port`](crate::Aqp::read_port)
//! and [`Aqp::write_port`](crate::Aqp::write_port).

use std::collections::VecDeque;

use crate::protocol::{Direction, ProtocolState};
use crate::registers::{RegisterFile, REG_CONTROL, REG_MODE, REG_SELECT, REG_STATUS};
use crate::MEM_BASE;

/// Accesses kept by the trace unless configured otherwise
pub const DEFAULT_TRACE_DEPTH: usize = 64;

/// Watchpoint trigger type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WatchKind {
    Write,
    Read,
    ReadWrite,
}

impl WatchKind {
    fn covers(self, dir: Direction) -> bool {
        match self {
            WatchKind::Read => dir == Direction::Read,
            WatchKind::Write => dir == Direction::Write,
            WatchKind::ReadWrite => true,
        }
    }
}

/// A port watchpoint.
#[derive(Debug, Clone)]
pub struct Watchpoint {
    /// Port offset from iobase
    pub offset: u8,
    pub kind: WatchKind,
    /// Optional: only trigger when the byte equals this
    pub value_match: Option<u8>,
    pub hits: u64,
    pub enabled: bool,
}

/// Watchpoint trigger event.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchHit {
    pub index: usize,
    pub offset: u8,
    pub dir: Direction,
    pub value: u8,
}

/// One traced port access.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceEntry {
    pub offset: u8,
    pub dir: Direction,
    pub value: u8,
    /// PP-FSM state after the access
    pub state: ProtocolState,
}

pub struct Debugger {
    pub watchpoints: Vec<Watchpoint>,
    /// First unconsumed hit
    pub watch_hit: Option<WatchHit>,
    trace: VecDeque<TraceEntry>,
    trace_depth: usize,
}

impl Debugger {
    pub fn new() -> Self {
        Self::with_trace_depth(DEFAULT_TRACE_DEPTH)
    }

    pub fn with_trace_depth(depth: usize) -> Self {
        Debugger {
            watchpoints: Vec::new(),
            watch_hit: None,
            trace: VecDeque::with_capacity(depth),
            trace_depth: depth,
        }
    }

    /// Add a watchpoint. Returns its index.
    pub fn add_watchpoint(&mut self, offset: u8, kind: WatchKind) -> usize {
        let idx = self.watchpoints.len();
        self.watchpoints.push(Watchpoint { offset, kind, value_match: None, hits: 0, enabled: true });
        idx
    }

    pub fn remove_watchpoint(&mut self, idx: usize) -> bool {
        if idx < self.watchpoints.len() {
            self.watchpoints.remove(idx);
            true
        } else {
            false
        }
    }

    /// Record one access: check watchpoints, then append it to the trace.
    pub fn record(&mut self, offset: u8, dir: Direction, value: u8, state: ProtocolState) {
        for (i, wp) in self.watchpoints.iter_mut().enumerate() {
            if !wp.enabled || wp.offset != offset || !wp.kind.covers(dir) {
                continue;
            }
            if wp.value_match.is_some_and(|v| v != value) {
                continue;
            }
            wp.hits += 1;
            if self.watch_hit.is_none() {
                self.watch_hit = Some(WatchHit { index: i, offset, dir, value });
            }
        }

        if self.trace_depth == 0 {
            return;
        }
        if self.trace.len() == self.trace_depth {
            self.trace.pop_front();
        }
        self.trace.push_back(TraceEntry { offset, dir, value, state });
    }

    /// Take pending watchpoint hit (returns and clears it).
    pub fn take_hit(&mut self) -> Option<WatchHit> {
        self.watch_hit.take()
    }

    /// Oldest first.
    pub fn trace(&self) -> impl Iterator<Item = &TraceEntry> {
        self.trace.iter()
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    pub fn list_watchpoints(&self) -> String {
        if self.watchpoints.is_empty() {
            return "No watchpoints set.\n".into();
        }
        let mut s = String::new();
        for (i, wp) in self.watchpoints.iter().enumerate() {
            let k = match wp.kind {
                WatchKind::Write => "W",
                WatchKind::Read => "R",
                WatchKind::ReadWrite => "RW",
            };
            let en = if wp.enabled { " " } else { "!" };
            let vm = wp.value_match.map(|v| format!(" =0x{:02X}", v)).unwrap_or_default();
            s.push_str(&format!("  [{}]{} +0x{:02X} {}  hits={}{}\n", i, en, wp.offset, k, wp.hits, vm));
        }
        s
    }

    pub fn format_trace(&self) -> String {
        let mut s = String::new();
        for e in &self.trace {
            let d = if e.dir == Direction::Read { 'r' } else { 'w' };
            s.push_str(&format!("  {}{:02x} {:02X}  -> {:?}\n", d, e.offset, e.value, e.state));
        }
        if s.is_empty() {
            s.push_str("  (no accesses)\n");
        }
        s
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Memory viewer ──────────────────────────────────────────────────────────

/// Format backing memory as 4 words per line, labelled with bus addresses.
pub fn dump_memory(words: &[u32], start_word: usize, count: usize) -> String {
    let end = start_word.saturating_add(count).min(words.len());
    let mut s = String::new();
    let mut idx = start_word;
    while idx < end {
        let line_end = (idx + 4).min(end);
        let addr = MEM_BASE.wrapping_add((idx as u32).wrapping_mul(4));
        s.push_str(&format!("{:08X}:", addr));
        for w in &words[idx..line_end] {
            s.push_str(&format!(" {:08X}", w));
        }
        s.push('\n');
        idx = line_end;
    }
    s
}

// ─── Register viewer ────────────────────────────────────────────────────────

pub const REGISTER_NAMES: [(u8, &str); 4] = [
    (REG_CONTROL, "CONTROL"),
    (REG_STATUS, "STATUS"),
    (REG_MODE, "MODE"),
    (REG_SELECT, "SELECT"),
];

/// Values as the host would read them.
pub fn dump_registers(regs: &RegisterFile) -> String {
    let mut s = String::new();
    for (offset, name) in REGISTER_NAMES {
        let val = regs.read(offset).unwrap_or(0);
        s.push_str(&format!("  {:>8} (+0x{:02X}) = 0x{:02X}  {:08b}\n", name, offset, val, val));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchpoint() {
        let mut dbg = Debugger::new();
        dbg.add_watchpoint(0x01, WatchKind::Write);
        dbg.record(0x01, Direction::Read, 0xFF, ProtocolState::Idle);
        assert!(dbg.take_hit().is_none());
        dbg.record(0x01, Direction::Write, 0x42, ProtocolState::Idle);
        let hit = dbg.take_hit().unwrap();
        assert_eq!(hit.offset, 0x01);
        assert_eq!(hit.value, 0x42);
        assert_eq!(dbg.watchpoints[0].hits, 1);
    }

    #[test]
    fn test_watchpoint_value_match_and_first_hit() {
        let mut dbg = Debugger::new();
        let i = dbg.add_watchpoint(0x03, WatchKind::ReadWrite);
        dbg.watchpoints[i].value_match = Some(0x10);
        dbg.record(0x03, Direction::Write, 0x11, ProtocolState::Idle);
        assert!(dbg.watch_hit.is_none());
        dbg.record(0x03, Direction::Write, 0x10, ProtocolState::Idle);
        dbg.record(0x03, Direction::Read, 0x10, ProtocolState::Idle);
        assert_eq!(dbg.watchpoints[i].hits, 2);
        // first hit is latched
        assert_eq!(dbg.take_hit().unwrap().dir, Direction::Write);
        assert!(dbg.remove_watchpoint(i));
        assert!(!dbg.remove_watchpoint(i));
    }

    #[test]
    fn test_trace_bounded() {
        let mut dbg = Debugger::with_trace_depth(3);
        for v in 0..5u8 {
            dbg.record(0x00, Direction::Read, v, ProtocolState::Idle);
        }
        let vals: Vec<u8> = dbg.trace().map(|e| e.value).collect();
        assert_eq!(vals, vec![2, 3, 4]);
        dbg.clear_trace();
        assert!(dbg.format_trace().contains("no accesses"));
    }

    #[test]
    fn test_dump_memory() {
        let words = [0x1234_5678u32, 0, 0, 0, 0xDEAD_BEEF];
        let dump = dump_memory(&words, 0, 5);
        assert!(dump.starts_with("80000000: 12345678 00000000"));
        assert!(dump.contains("80000010: DEADBEEF"));
        assert_eq!(dump_memory(&words, 10, 4), "");
    }

    #[test]
    fn test_dump_registers() {
        let regs = RegisterFile::new();
        let dump = dump_registers(&regs);
        assert!(dump.contains("STATUS (+0x10) = 0x01"));
    }
}
