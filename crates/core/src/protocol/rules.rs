//! Transition tables for the port protocol.
//!
//! Each generation gets its own table. Rows are scanned in order and the
//! first row whose predecessor, access and guard match wins. Construction
//! rejects rows that could shadow each other, so scan order only matters as a
//! tie-break contract, never as hidden behaviour.

use super::state::{Access, Op::{Peek, Poke}, ProtocolState};
use super::state::ProtocolState::*;
use super::{Generation, OPCODE_PEEK, OPCODE_POKE, PORT_DATA, PORT_FRAME, PORT_SERIAL, PORT_STROBE};
use crate::error::{AqpError, Result};

/// Side effect applied when a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Store serial byte `n` of the target address
    LatchAddress(u8),
    /// Store serial byte `n` of the POKE value
    LatchValue(u8),
    /// Store serial byte `n` of the link tag
    LatchTag(u8),
    /// Last value byte: store the word to the backing store
    CommitPoke,
    /// Last PEEK address byte: fetch the word to be emitted
    FetchPeek,
    /// Last tag byte: search the link table and arm the cursor
    LookupTag,
    /// Put byte `n` of the fetched word on the data port
    EmitValue(u8),
    /// Put the next link payload byte on the data port
    EmitLink,
    CloseLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub from: ProtocolState,
    pub on: Access,
    /// Written byte must equal this for the rule to match
    pub guard: Option<u8>,
    /// Only matches once the detection handshake has unlocked PEEK/POKE
    pub gated: bool,
    pub to: ProtocolState,
    pub effect: Effect,
}

impl Rule {
    pub const fn new(from: ProtocolState, on: Access, to: ProtocolState, effect: Effect) -> Self {
        Rule { from, on, guard: None, gated: false, to, effect }
    }

    const fn gated(from: ProtocolState, on: Access, to: ProtocolState) -> Self {
        Rule { from, on, guard: None, gated: true, to, effect: Effect::None }
    }

    const fn guarded(from: ProtocolState, on: Access, byte: u8, to: ProtocolState) -> Self {
        Rule { from, on, guard: Some(byte), gated: false, to, effect: Effect::None }
    }

    fn matches(&self, state: ProtocolState, access: Access, byte: Option<u8>, unlocked: bool) -> bool {
        self.from == state
            && self.on == access
            && (!self.gated || unlocked)
            && self.guard.map_or(true, |g| byte == Some(g))
    }
}

const R_DATA: Access = Access::read(PORT_DATA);
const R_STROBE: Access = Access::read(PORT_STROBE);
const R_FRAME: Access = Access::read(PORT_FRAME);
const W_SERIAL: Access = Access::write(PORT_SERIAL);
const W_FRAME: Access = Access::write(PORT_FRAME);

/// Opcode framing, address/value assembly and PEEK read-out.
const PEEK_POKE_RULES: &[Rule] = &[
    // Opcode trigger: driver either reads or writes the frame port
    Rule::gated(Idle, R_FRAME, AwaitOpcode),
    Rule::gated(Idle, W_FRAME, AwaitOpcode),
    Rule::guarded(AwaitOpcode, W_SERIAL, OPCODE_POKE, AddressPulse { op: Poke, index: 0 }),
    Rule::guarded(AwaitOpcode, W_SERIAL, OPCODE_PEEK, AddressPulse { op: Peek, index: 0 }),

    // POKE address
    Rule::new(AddressPulse { op: Poke, index: 0 }, R_FRAME, AddressByte { op: Poke, index: 0 }, Effect::None),
    Rule::new(AddressByte { op: Poke, index: 0 }, W_SERIAL, AddressPulse { op: Poke, index: 1 }, Effect::LatchAddress(0)),
    Rule::new(AddressPulse { op: Poke, index: 1 }, R_FRAME, AddressByte { op: Poke, index: 1 }, Effect::None),
    Rule::new(AddressByte { op: Poke, index: 1 }, W_SERIAL, AddressPulse { op: Poke, index: 2 }, Effect::LatchAddress(1)),
    Rule::new(AddressPulse { op: Poke, index: 2 }, R_FRAME, AddressByte { op: Poke, index: 2 }, Effect::None),
    Rule::new(AddressByte { op: Poke, index: 2 }, W_SERIAL, AddressPulse { op: Poke, index: 3 }, Effect::LatchAddress(2)),
    Rule::new(AddressPulse { op: Poke, index: 3 }, R_FRAME, AddressByte { op: Poke, index: 3 }, Effect::None),
    Rule::new(AddressByte { op: Poke, index: 3 }, W_SERIAL, ValuePulse { index: 0 }, Effect::LatchAddress(3)),

    // POKE value
    Rule::new(ValuePulse { index: 0 }, R_FRAME, ValueByte { index: 0 }, Effect::None),
    Rule::new(ValueByte { index: 0 }, W_SERIAL, ValuePulse { index: 1 }, Effect::LatchValue(0)),
    Rule::new(ValuePulse { index: 1 }, R_FRAME, ValueByte { index: 1 }, Effect::None),
    Rule::new(ValueByte { index: 1 }, W_SERIAL, ValuePulse { index: 2 }, Effect::LatchValue(1)),
    Rule::new(ValuePulse { index: 2 }, R_FRAME, ValueByte { index: 2 }, Effect::None),
    Rule::new(ValueByte { index: 2 }, W_SERIAL, ValuePulse { index: 3 }, Effect::LatchValue(2)),
    Rule::new(ValuePulse { index: 3 }, R_FRAME, ValueByte { index: 3 }, Effect::None),
    Rule::new(ValueByte { index: 3 }, W_SERIAL, Idle, Effect::CommitPoke),

    // PEEK address
    Rule::new(AddressPulse { op: Peek, index: 0 }, R_FRAME, AddressByte { op: Peek, index: 0 }, Effect::None),
    Rule::new(AddressByte { op: Peek, index: 0 }, W_SERIAL, AddressPulse { op: Peek, index: 1 }, Effect::LatchAddress(0)),
    Rule::new(AddressPulse { op: Peek, index: 1 }, R_FRAME, AddressByte { op: Peek, index: 1 }, Effect::None),
    Rule::new(AddressByte { op: Peek, index: 1 }, W_SERIAL, AddressPulse { op: Peek, index: 2 }, Effect::LatchAddress(1)),
    Rule::new(AddressPulse { op: Peek, index: 2 }, R_FRAME, AddressByte { op: Peek, index: 2 }, Effect::None),
    Rule::new(AddressByte { op: Peek, index: 2 }, W_SERIAL, AddressPulse { op: Peek, index: 3 }, Effect::LatchAddress(2)),
    Rule::new(AddressPulse { op: Peek, index: 3 }, R_FRAME, AddressByte { op: Peek, index: 3 }, Effect::None),
    Rule::new(AddressByte { op: Peek, index: 3 }, W_SERIAL, ReadPulse { index: 0 }, Effect::FetchPeek),

    // PEEK read-out, low byte first
    Rule::new(ReadPulse { index: 0 }, R_STROBE, ReadByte { index: 0 }, Effect::None),
    Rule::new(ReadByte { index: 0 }, R_DATA, ReadPulse { index: 1 }, Effect::EmitValue(0)),
    Rule::new(ReadPulse { index: 1 }, R_STROBE, ReadByte { index: 1 }, Effect::None),
    Rule::new(ReadByte { index: 1 }, R_DATA, ReadPulse { index: 2 }, Effect::EmitValue(1)),
    Rule::new(ReadPulse { index: 2 }, R_STROBE, ReadByte { index: 2 }, Effect::None),
    Rule::new(ReadByte { index: 2 }, R_DATA, ReadPulse { index: 3 }, Effect::EmitValue(2)),
    Rule::new(ReadPulse { index: 3 }, R_STROBE, ReadByte { index: 3 }, Effect::None),
    Rule::new(ReadByte { index: 3 }, R_DATA, Idle, Effect::EmitValue(3)),
];

/// Tag assembly and link payload drain.
const LINK_RULES: &[Rule] = &[
    // The arming strobe doubles as the pulse for tag byte 0
    Rule::new(Idle, R_STROBE, TagByte { index: 0 }, Effect::None),
    Rule::new(TagByte { index: 0 }, W_SERIAL, TagPulse { index: 1 }, Effect::LatchTag(0)),
    Rule::new(TagPulse { index: 1 }, R_STROBE, TagByte { index: 1 }, Effect::None),
    Rule::new(TagByte { index: 1 }, W_SERIAL, TagPulse { index: 2 }, Effect::LatchTag(1)),
    Rule::new(TagPulse { index: 2 }, R_STROBE, TagByte { index: 2 }, Effect::None),
    Rule::new(TagByte { index: 2 }, W_SERIAL, TagPulse { index: 3 }, Effect::LatchTag(2)),
    Rule::new(TagPulse { index: 3 }, R_STROBE, TagByte { index: 3 }, Effect::None),
    Rule::new(TagByte { index: 3 }, W_SERIAL, LinkPulse, Effect::LookupTag),

    Rule::new(LinkPulse, R_STROBE, LinkByte, Effect::None),
    Rule::new(LinkByte, R_DATA, LinkPulse, Effect::EmitLink),
    Rule::new(LinkPulse, W_FRAME, Idle, Effect::CloseLink),
];

/// Validated, ordered rule list.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// Build a table, rejecting self-loops, rules out of `Halted`, guards on
    /// reads, and any two rows that could both match the same access.
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        for (i, r) in rules.iter().enumerate() {
            let conflict = |detail| AqpError::RuleConflict { from: r.from, access: r.on, detail };
            if r.from == r.to {
                return Err(conflict("self-loop"));
            }
            if r.from.is_halted() || r.to.is_halted() {
                return Err(conflict("halted state in table"));
            }
            if r.guard.is_some() && r.on.dir == super::Direction::Read {
                return Err(conflict("guard on a read"));
            }
            let shadows = rules[..i].iter().any(|p| {
                p.from == r.from
                    && p.on == r.on
                    && match (p.guard, r.guard) {
                        (Some(a), Some(b)) => a == b,
                        _ => true,
                    }
            });
            if shadows {
                return Err(conflict("duplicate predecessor"));
            }
        }
        Ok(RuleTable { rules })
    }

    pub fn for_generation(generation: Generation) -> Result<Self> {
        let mut rules = PEEK_POKE_RULES.to_vec();
        if generation == Generation::Link {
            rules.extend_from_slice(LINK_RULES);
        }
        Self::new(rules)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First matching rule in table order.
    pub fn find(&self, state: ProtocolState, access: Access, byte: Option<u8>, unlocked: bool) -> Option<&Rule> {
        self.rules.iter().find(|r| r.matches(state, access, byte, unlocked))
    }

    /// True if `state` validates the byte written on `access` (opcode step).
    pub fn validates_payload(&self, state: ProtocolState, access: Access) -> bool {
        self.rules.iter().any(|r| r.from == state && r.on == access && r.guard.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tables_valid() {
        let detect = RuleTable::for_generation(Generation::Detect).unwrap();
        let link = RuleTable::for_generation(Generation::Link).unwrap();
        assert_eq!(detect.rules().len(), PEEK_POKE_RULES.len());
        assert_eq!(link.rules().len(), PEEK_POKE_RULES.len() + LINK_RULES.len());
    }

    #[test]
    fn test_rejects_self_loop() {
        let r = RuleTable::new(vec![Rule::new(Idle, R_FRAME, Idle, Effect::None)]);
        assert!(matches!(r, Err(AqpError::RuleConflict { detail: "self-loop", .. })));
    }

    #[test]
    fn test_rejects_duplicate_predecessor() {
        let r = RuleTable::new(vec![
            Rule::new(Idle, R_FRAME, AwaitOpcode, Effect::None),
            Rule::new(Idle, R_FRAME, LinkPulse, Effect::None),
        ]);
        assert!(matches!(r, Err(AqpError::RuleConflict { detail: "duplicate predecessor", .. })));
    }

    #[test]
    fn test_unguarded_shadows_guarded() {
        let r = RuleTable::new(vec![
            Rule::guarded(AwaitOpcode, W_SERIAL, 0, AddressPulse { op: Poke, index: 0 }),
            Rule::new(AwaitOpcode, W_SERIAL, Idle, Effect::None),
        ]);
        assert!(r.is_err());
    }

    #[test]
    fn test_same_state_different_ports_allowed() {
        let r = RuleTable::new(vec![
            Rule::new(LinkPulse, R_STROBE, LinkByte, Effect::None),
            Rule::new(LinkPulse, W_FRAME, Idle, Effect::CloseLink),
        ]);
        assert!(r.is_ok());
    }

    #[test]
    fn test_find_respects_gate_and_guard() {
        let t = RuleTable::for_generation(Generation::Link).unwrap();
        assert!(t.find(Idle, R_FRAME, None, false).is_none());
        assert_eq!(t.find(Idle, R_FRAME, None, true).unwrap().to, AwaitOpcode);
        let peek = t.find(AwaitOpcode, W_SERIAL, Some(OPCODE_PEEK), true).unwrap();
        assert_eq!(peek.to, AddressPulse { op: Peek, index: 0 });
        assert!(t.find(AwaitOpcode, W_SERIAL, Some(7), true).is_none());
        assert!(t.validates_payload(AwaitOpcode, W_SERIAL));
        assert!(!t.validates_payload(ValueByte { index: 0 }, W_SERIAL));
    }

    #[test]
    fn test_detect_has_no_link_leg() {
        let t = RuleTable::for_generation(Generation::Detect).unwrap();
        assert!(t.find(Idle, R_STROBE, None, true).is_none());
    }
}
