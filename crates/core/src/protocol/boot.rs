//! Power-on detection handshake (detection generation only).
//!
//! The driver probes the card with a fixed sequence of register writes, one
//! POKE, a status read and a PEEK before it treats the card as present. Each
//! state accepts exactly one byte on its trigger port; any other byte on that
//! port puts the sequencer into [`BootState::Error`] for good (only an
//! external reset leaves it). PEEK/POKE framing unlocks at
//! [`UNLOCK_STATE`] and stays unlocked through the fast-link probe.

use tracing::{debug, warn};

use crate::registers::{REG_CONTROL, REG_MODE, REG_SELECT, REG_STATUS};
use super::{PORT_DATA, PORT_STROBE};

/// Word the card reports on the PEEK that follows the probe POKE
pub const DETECT_SIGNATURE: u32 = 0x0123_4567;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootState {
    #[default]
    PowerOn,
    /// Hardware detection, steps 0..=10
    Hardware(u8),
    /// Fast-link probe, steps 0..=2
    FastLink(u8),
    Error,
}

impl BootState {
    /// Position along the handshake; `Error` is off the path.
    pub const fn rank(self) -> Option<u8> {
        match self {
            BootState::PowerOn => Some(0),
            BootState::Hardware(n) => Some(n.saturating_add(1)),
            BootState::FastLink(n) => Some(n.saturating_add(12)),
            BootState::Error => None,
        }
    }
}

/// First state in which the opcode trigger is accepted
pub const UNLOCK_STATE: BootState = BootState::Hardware(6);
/// Handshake finished
pub const COMPLETE_STATE: BootState = BootState::FastLink(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootTrigger {
    /// Write on `port`; only `expect` advances, anything else is an error
    Write { port: u8, expect: u8 },
    Read { port: u8 },
    /// Read on `port` after which the port protocol is idle
    ReadIdle { port: u8 },
    PokeComplete,
}

/// Side effect of a handshake step on the rest of the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootAction {
    None,
    /// Next PEEK returns [`DETECT_SIGNATURE`]
    LatchSignature,
    /// Status cell becomes 1
    LatchStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRule {
    pub from: BootState,
    pub trigger: BootTrigger,
    pub to: BootState,
    pub action: BootAction,
}

const fn step(from: BootState, trigger: BootTrigger, to: BootState) -> BootRule {
    BootRule { from, trigger, to, action: BootAction::None }
}

const fn wr(port: u8, expect: u8) -> BootTrigger {
    BootTrigger::Write { port, expect }
}

use BootState::{FastLink, Hardware, PowerOn};

pub const BOOT_RULES: &[BootRule] = &[
    step(PowerOn, wr(REG_MODE, 0x00), Hardware(0)),
    step(Hardware(0), wr(REG_STATUS, 0x00), Hardware(1)),
    step(Hardware(1), wr(REG_CONTROL, 0x08), Hardware(2)),
    step(Hardware(2), wr(REG_CONTROL, 0x00), Hardware(3)),
    step(Hardware(3), wr(REG_SELECT, 0x80), Hardware(4)),
    step(Hardware(4), wr(REG_STATUS, 0x01), Hardware(5)),
    step(Hardware(5), wr(REG_STATUS, 0x00), Hardware(6)),
    BootRule {
        from: Hardware(6), trigger: BootTrigger::PokeComplete, to: Hardware(7),
        action: BootAction::LatchSignature,
    },
    BootRule {
        from: Hardware(7), trigger: BootTrigger::Read { port: REG_STATUS }, to: Hardware(8),
        action: BootAction::LatchStatus,
    },
    step(Hardware(8), BootTrigger::ReadIdle { port: PORT_DATA }, Hardware(9)),
    step(Hardware(9), wr(REG_SELECT, 0x00), Hardware(10)),
    step(Hardware(10), wr(REG_CONTROL, 0x01), FastLink(0)),
    step(FastLink(0), BootTrigger::Read { port: PORT_STROBE }, FastLink(1)),
    step(FastLink(1), wr(REG_CONTROL, 0x00), FastLink(2)),
];

/// True if every state has at most one outgoing rule and none loops.
pub fn rules_are_deterministic(rules: &[BootRule]) -> bool {
    rules.iter().enumerate().all(|(i, r)| {
        r.from != r.to && r.from != BootState::Error && !rules[..i].iter().any(|p| p.from == r.from)
    })
}

pub struct DetectSequencer {
    pub state: BootState,
}

impl DetectSequencer {
    pub fn new() -> Self {
        debug_assert!(rules_are_deterministic(BOOT_RULES));
        DetectSequencer { state: BootState::PowerOn }
    }

    pub fn reset(&mut self) {
        self.state = BootState::PowerOn;
    }

    /// PEEK/POKE framing is accepted from [`UNLOCK_STATE`] onwards.
    pub fn unlocked(&self) -> bool {
        match (self.state.rank(), UNLOCK_STATE.rank()) {
            (Some(at), Some(from)) => at >= from,
            _ => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == COMPLETE_STATE
    }

    fn rule(&self) -> Option<&'static BootRule> {
        BOOT_RULES.iter().find(|r| r.from == self.state)
    }

    fn advance(&mut self, rule: &BootRule) -> BootAction {
        debug!("detect {:?} -> {:?}", self.state, rule.to);
        self.state = rule.to;
        rule.action
    }

    pub fn on_write(&mut self, port: u8, byte: u8) -> BootAction {
        let Some(rule) = self.rule() else { return BootAction::None };
        match rule.trigger {
            BootTrigger::Write { port: p, expect } if p == port => {
                if byte == expect {
                    self.advance(rule)
                } else {
                    warn!("detect error in {:?}: port 0x{:02X} got 0x{:02X}, expected 0x{:02X}",
                        self.state, port, byte, expect);
                    self.state = BootState::Error;
                    BootAction::None
                }
            }
            _ => BootAction::None,
        }
    }

    /// `pp_idle` is the port protocol state after it handled the same read.
    pub fn on_read(&mut self, port: u8, pp_idle: bool) -> BootAction {
        let Some(rule) = self.rule() else { return BootAction::None };
        match rule.trigger {
            BootTrigger::Read { port: p } if p == port => self.advance(rule),
            BootTrigger::ReadIdle { port: p } if p == port && pp_idle => self.advance(rule),
            _ => BootAction::None,
        }
    }

    pub fn on_poke_complete(&mut self) -> BootAction {
        match self.rule() {
            Some(rule) if rule.trigger == BootTrigger::PokeComplete => self.advance(rule),
            _ => BootAction::None,
        }
    }
}

impl Default for DetectSequencer {
    fn default() -> Self {
        Self::new()
    }
}
