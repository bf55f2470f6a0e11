//! Error types for the AQP core.
//!
//! Out-of-range PEEK/POKE and unmatched link tags are *not* errors: they have
//! defined fallback behaviour on the card and are only traced.

use thiserror::Error;

use crate::protocol::{Access, ProtocolState};

pub type Result<T> = std::result::Result<T, AqpError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AqpError {
    /// Opcode byte outside {0 = POKE, 1 = PEEK}.
    #[error("unsupported opcode 0x{opcode:02X}")]
    UnsupportedOpcode { opcode: u8 },

    /// The driver reached a transition the rule table declares impossible.
    #[error("protocol violation in {state:?}: {detail}")]
    ProtocolViolation { state: ProtocolState, detail: &'static str },

    /// Two rules share a predecessor and trigger, or a rule loops onto itself.
    #[error("rule conflict: {from:?} on {access:?} ({detail})")]
    RuleConflict { from: ProtocolState, access: Access, detail: &'static str },

    #[error("link table: {0}")]
    LinkTable(#[from] LinkTableError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkTableError {
    #[error("tag 0x{0:08X} appears more than once")]
    DuplicateTag(u32),
    #[error("table is not terminated by the sentinel tag")]
    MissingSentinel,
    #[error("sentinel tag used before the end of the table (entry {0})")]
    SentinelInBody(usize),
}

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file too small")]
    TooSmall,
    #[error("invalid save state file (bad magic)")]
    BadMagic,
    #[error("unsupported save state version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("generation mismatch: save={saved} current={current}")]
    GenerationMismatch { saved: u8, current: u8 },
    #[error("decompress error: {0}")]
    Decompress(String),
    #[error("serialize error: {0}")]
    Serde(#[from] bincode::Error),
}
