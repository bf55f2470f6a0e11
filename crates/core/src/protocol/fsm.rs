//! Port protocol state machine (PP-FSM).
//!
//! Every access on ports 0x00-0x03 enters [`PortProtocol::read`] or
//! [`PortProtocol::write`]. The current [`ProtocolState`] and the access pick
//! at most one [`Rule`](super::Rule); its effect runs against the backing
//! store or link table and the state moves to the rule's successor. Accesses
//! with no rule leave the state alone (reads return nothing, i.e. open bus).
//!
//! Two things stop the machine: a non-opcode byte on the opcode step, and an
//! effect that finds its inputs incomplete (which the rule table makes
//! impossible for any in-order driver). Both park the machine in
//! [`ProtocolState::Halted`] until [`PortProtocol::reset`].

use tracing::{debug, error, trace};

use super::rules::{Effect, RuleTable};
use super::state::{Access, Fault, ProtocolState};
use super::Generation;
use crate::error::{AqpError, Result};
use crate::link::{LinkCursor, LinkTable};
use crate::memory::WordBus;

/// 32-bit value assembled one byte at a time, low byte first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WordAccumulator {
    bytes: [u8; 4],
    filled: u8,
}

impl WordAccumulator {
    pub fn clear(&mut self) {
        *self = WordAccumulator::default();
    }

    /// Store byte `index`. Byte 0 restarts the word; any other byte must
    /// follow its predecessor. Returns false on an out-of-order byte.
    pub fn latch(&mut self, index: u8, byte: u8) -> bool {
        if index == 0 {
            self.clear();
        }
        if index > 3 || self.filled != index {
            return false;
        }
        self.bytes[index as usize] = byte;
        self.filled += 1;
        true
    }

    /// The word, once all four bytes are in.
    pub fn word(&self) -> Option<u32> {
        (self.filled == 4).then(|| u32::from_le_bytes(self.bytes))
    }

    pub fn load(&mut self, word: u32) {
        self.bytes = word.to_le_bytes();
        self.filled = 4;
    }
}

/// Operation finished by the access that produced a [`Step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Poked { address: u32, value: u32 },
    Peeked { address: u32, value: u32 },
    Linked { tag: u32, matched: bool },
    /// Last PEEK output byte emitted
    Drained,
}

/// Result of one access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub from: ProtocolState,
    pub to: ProtocolState,
    pub output: Option<u8>,
    pub completion: Option<Completion>,
}

impl Step {
    fn unchanged(state: ProtocolState) -> Self {
        Step { from: state, to: state, output: None, completion: None }
    }
}

/// What the protocol can touch while applying an effect.
pub struct Wiring<'a> {
    pub bus: &'a mut dyn WordBus,
    pub links: Option<&'a LinkTable>,
    /// Detection handshake has unlocked the opcode trigger
    pub unlocked: bool,
}

pub struct PortProtocol {
    pub state: ProtocolState,
    table: RuleTable,
    pub address: WordAccumulator,
    pub value: WordAccumulator,
    pub tag: WordAccumulator,
    pub cursor: Option<LinkCursor>,
}

impl PortProtocol {
    pub fn new(generation: Generation) -> Result<Self> {
        Ok(PortProtocol {
            state: ProtocolState::Idle,
            table: RuleTable::for_generation(generation)?,
            address: WordAccumulator::default(),
            value: WordAccumulator::default(),
            tag: WordAccumulator::default(),
            cursor: None,
        })
    }

    pub fn reset(&mut self) {
        self.state = ProtocolState::Idle;
        self.address.clear();
        self.value.clear();
        self.tag.clear();
        self.cursor = None;
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    pub fn fault(&self) -> Option<Fault> {
        match self.state {
            ProtocolState::Halted(f) => Some(f),
            _ => None,
        }
    }

    pub fn read(&mut self, port: u8, wiring: Wiring<'_>) -> Result<Step> {
        self.dispatch(Access::read(port), None, wiring)
    }

    pub fn write(&mut self, port: u8, byte: u8, wiring: Wiring<'_>) -> Result<Step> {
        self.dispatch(Access::write(port), Some(byte), wiring)
    }

    fn dispatch(&mut self, access: Access, byte: Option<u8>, mut wiring: Wiring<'_>) -> Result<Step> {
        let from = self.state;
        if from.is_halted() {
            return Ok(Step::unchanged(from));
        }

        let Some(rule) = self.table.find(from, access, byte, wiring.unlocked).copied() else {
            if let Some(opcode) = byte {
                if self.table.validates_payload(from, access) {
                    error!("unknown opcode 0x{:02X}, halting", opcode);
                    self.state = ProtocolState::Halted(Fault::UnsupportedOpcode(opcode));
                    return Err(AqpError::UnsupportedOpcode { opcode });
                }
            }
            return Ok(Step::unchanged(from));
        };

        match self.apply(from, rule.effect, byte, &mut wiring) {
            Ok((output, completion)) => {
                self.state = rule.to;
                trace!("{} {:02X?} ({:?} -> {:?})", access, output.or(byte), from, rule.to);
                Ok(Step { from, to: rule.to, output, completion })
            }
            Err(e) => {
                error!("{}, halting", e);
                self.state = ProtocolState::Halted(Fault::ProtocolViolation);
                Err(e)
            }
        }
    }

    fn apply(
        &mut self,
        state: ProtocolState,
        effect: Effect,
        byte: Option<u8>,
        wiring: &mut Wiring<'_>,
    ) -> Result<(Option<u8>, Option<Completion>)> {
        let violation = |detail| AqpError::ProtocolViolation { state, detail };
        let latch = |acc: &mut WordAccumulator, index: u8| -> Result<()> {
            let b = byte.ok_or(violation("latch without a written byte"))?;
            if acc.latch(index, b) { Ok(()) } else { Err(violation("byte latched out of order")) }
        };

        match effect {
            Effect::None => Ok((None, None)),
            Effect::LatchAddress(i) => latch(&mut self.address, i).map(|_| (None, None)),
            Effect::LatchValue(i) => latch(&mut self.value, i).map(|_| (None, None)),
            Effect::LatchTag(i) => latch(&mut self.tag, i).map(|_| (None, None)),
            Effect::CommitPoke => {
                latch(&mut self.value, 3)?;
                let address = self.address.word().ok_or(violation("POKE before address complete"))?;
                let value = self.value.word().ok_or(violation("POKE value incomplete"))?;
                debug!("POKE(0x{:08X}, 0x{:08X})", address, value);
                wiring.bus.poke(address, value);
                Ok((None, Some(Completion::Poked { address, value })))
            }
            Effect::FetchPeek => {
                latch(&mut self.address, 3)?;
                let address = self.address.word().ok_or(violation("PEEK address incomplete"))?;
                let value = wiring.bus.peek(address);
                self.value.load(value);
                debug!("PEEK(0x{:08X}) => 0x{:08X}", address, value);
                Ok((None, Some(Completion::Peeked { address, value })))
            }
            Effect::EmitValue(i) => {
                let value = self.value.word().ok_or(violation("PEEK output before fetch"))?;
                let out = value.to_le_bytes()[usize::from(i & 3)];
                let done = (i == 3).then_some(Completion::Drained);
                Ok((Some(out), done))
            }
            Effect::LookupTag => {
                latch(&mut self.tag, 3)?;
                let tag = self.tag.word().ok_or(violation("tag incomplete"))?;
                let links = wiring.links.ok_or(violation("no link table"))?;
                let cursor = links.open(tag);
                debug!("LINK(0x{:08X}) matched={}", tag, cursor.is_matched());
                self.cursor = Some(cursor);
                Ok((None, Some(Completion::Linked { tag, matched: cursor.is_matched() })))
            }
            Effect::EmitLink => {
                let links = wiring.links.ok_or(violation("no link table"))?;
                let cursor = self.cursor.as_mut().ok_or(violation("link read without lookup"))?;
                Ok((Some(cursor.next_byte(links)), None))
            }
            Effect::CloseLink => {
                self.cursor = None;
                self.tag.clear();
                Ok((None, None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LINK_FILLER, TAG_SERIAL_NO};
    use crate::memory::{BackingMemory, EchoLatch};
    use crate::protocol::{OPCODE_PEEK, OPCODE_POKE, PORT_DATA, PORT_FRAME, PORT_SERIAL, PORT_STROBE};
    use crate::OUT_OF_RANGE_WORD;

    struct Rig {
        pp: PortProtocol,
        mem: BackingMemory,
        links: LinkTable,
    }

    impl Rig {
        fn new() -> Self {
            Rig {
                pp: PortProtocol::new(Generation::Link).unwrap(),
                mem: BackingMemory::new(),
                links: LinkTable::builtin().unwrap(),
            }
        }

        fn r(&mut self, port: u8) -> Result<Step> {
            let w = Wiring { bus: &mut self.mem, links: Some(&self.links), unlocked: true };
            self.pp.read(port, w)
        }

        fn w(&mut self, port: u8, byte: u8) -> Result<Step> {
            let w = Wiring { bus: &mut self.mem, links: Some(&self.links), unlocked: true };
            self.pp.write(port, byte, w)
        }

        fn start(&mut self, opcode: u8, address: u32) {
            self.r(PORT_FRAME).unwrap();
            self.w(PORT_SERIAL, opcode).unwrap();
            for b in address.to_le_bytes() {
                self.r(PORT_FRAME).unwrap();
                self.w(PORT_SERIAL, b).unwrap();
            }
        }

        fn poke(&mut self, address: u32, value: u32) {
            self.start(OPCODE_POKE, address);
            for b in value.to_le_bytes() {
                self.r(PORT_FRAME).unwrap();
                self.w(PORT_SERIAL, b).unwrap();
            }
        }

        fn peek(&mut self, address: u32) -> [u8; 4] {
            self.start(OPCODE_PEEK, address);
            let mut out = [0u8; 4];
            for o in out.iter_mut() {
                self.r(PORT_STROBE).unwrap();
                *o = self.r(PORT_DATA).unwrap().output.unwrap();
            }
            out
        }
    }

    #[test]
    fn test_accumulator_order() {
        let mut acc = WordAccumulator::default();
        assert!(acc.latch(0, 0x78));
        assert!(!acc.latch(2, 0x34));
        assert!(acc.latch(1, 0x56));
        assert_eq!(acc.word(), None);
        assert!(acc.latch(2, 0x34));
        assert!(acc.latch(3, 0x12));
        assert_eq!(acc.word(), Some(0x1234_5678));
        assert!(acc.latch(0, 0xAA));
        assert_eq!(acc.word(), None);
    }

    #[test]
    fn test_address_assembly_little_endian() {
        for a in [[0u8, 0, 0, 0x80], [0x01, 0x02, 0x03, 0x04], [0xFF, 0x00, 0xFF, 0x00]] {
            let mut rig = Rig::new();
            rig.start(OPCODE_POKE, u32::from_le_bytes(a));
            let expected = a[0] as u32 | (a[1] as u32) << 8 | (a[2] as u32) << 16 | (a[3] as u32) << 24;
            assert_eq!(rig.pp.address.word(), Some(expected));
            assert_eq!(rig.pp.state, ProtocolState::ValuePulse { index: 0 });
        }
    }

    #[test]
    fn test_poke_then_peek() {
        let mut rig = Rig::new();
        rig.poke(0x8000_0000, 0x1234_5678);
        assert!(rig.pp.state.is_idle());
        assert_eq!(rig.peek(0x8000_0000), [0x78, 0x56, 0x34, 0x12]);
        assert!(rig.pp.state.is_idle());
    }

    #[test]
    fn test_peek_out_of_range_sentinel() {
        let mut rig = Rig::new();
        rig.poke(0x8000_0000, 1);
        assert_eq!(rig.peek(0x0000_1000), OUT_OF_RANGE_WORD.to_le_bytes());
        assert_eq!(rig.peek(0x9000_0000), [0xAA, 0x55, 0xAA, 0x55]);
    }

    #[test]
    fn test_poke_completion_reported() {
        let mut rig = Rig::new();
        rig.start(OPCODE_POKE, 0x8000_0004);
        for b in [1u8, 2, 3] {
            rig.r(PORT_FRAME).unwrap();
            rig.w(PORT_SERIAL, b).unwrap();
        }
        rig.r(PORT_FRAME).unwrap();
        let step = rig.w(PORT_SERIAL, 4).unwrap();
        assert_eq!(step.completion, Some(Completion::Poked { address: 0x8000_0004, value: 0x0403_0201 }));
        assert_eq!(step.to, ProtocolState::Idle);
    }

    #[test]
    fn test_unmatched_read_is_open_bus_noop() {
        let mut rig = Rig::new();
        rig.start(OPCODE_PEEK, 0x8000_0000);
        let before = rig.pp.state;
        for port in [PORT_DATA, PORT_FRAME, 0x05] {
            let step = rig.r(port).unwrap();
            assert_eq!(step.output, None);
            assert_eq!(rig.pp.state, before);
        }
    }

    #[test]
    fn test_stray_write_ignored() {
        let mut rig = Rig::new();
        rig.start(OPCODE_POKE, 0x8000_0000);
        // serial byte without the frame pulse
        rig.w(PORT_SERIAL, 0x99).unwrap();
        assert_eq!(rig.pp.state, ProtocolState::ValuePulse { index: 0 });
        assert_eq!(rig.pp.value.word(), None);
    }

    #[test]
    fn test_unsupported_opcode_halts() {
        let mut rig = Rig::new();
        rig.r(PORT_FRAME).unwrap();
        let err = rig.w(PORT_SERIAL, 2).unwrap_err();
        assert_eq!(err, AqpError::UnsupportedOpcode { opcode: 2 });
        assert_eq!(rig.pp.fault(), Some(Fault::UnsupportedOpcode(2)));
        // inert until reset
        assert_eq!(rig.r(PORT_FRAME).unwrap().to, ProtocolState::Halted(Fault::UnsupportedOpcode(2)));
        rig.pp.reset();
        assert!(rig.pp.state.is_idle());
        assert_eq!(rig.r(PORT_FRAME).unwrap().to, ProtocolState::AwaitOpcode);
    }

    #[test]
    fn test_out_of_order_latch_is_violation() {
        let mut rig = Rig::new();
        rig.start(OPCODE_POKE, 0x8000_0000);
        // Corrupt the accumulator behind the machine's back
        rig.pp.value.clear();
        rig.pp.state = ProtocolState::ValueByte { index: 2 };
        let err = rig.w(PORT_SERIAL, 0).unwrap_err();
        assert!(matches!(err, AqpError::ProtocolViolation { .. }));
        assert_eq!(rig.pp.fault(), Some(Fault::ProtocolViolation));
    }

    #[test]
    fn test_emit_without_fetch_is_violation() {
        let mut rig = Rig::new();
        rig.pp.state = ProtocolState::ReadByte { index: 0 };
        assert!(rig.r(PORT_DATA).is_err());
        assert!(rig.pp.state.is_halted());
    }

    #[test]
    fn test_link_query_drains_payload() {
        let mut rig = Rig::new();
        rig.r(PORT_STROBE).unwrap();
        let bytes = TAG_SERIAL_NO.to_le_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                rig.r(PORT_STROBE).unwrap();
            }
            rig.w(PORT_SERIAL, *b).unwrap();
        }
        assert_eq!(rig.pp.state, ProtocolState::LinkPulse);
        let mut got = Vec::new();
        for _ in 0..6 {
            rig.r(PORT_STROBE).unwrap();
            got.push(rig.r(PORT_DATA).unwrap().output.unwrap());
        }
        assert_eq!(got, vec![0x07, 0x31, 0x00, 0x96, LINK_FILLER, LINK_FILLER]);
        rig.w(PORT_FRAME, 0).unwrap();
        assert!(rig.pp.state.is_idle());
        assert_eq!(rig.pp.cursor, None);
    }

    fn detect_access(pp: &mut PortProtocol, latch: &mut EchoLatch, access: Access, byte: u8) -> Step {
        let wiring = Wiring { bus: latch, links: None, unlocked: true };
        match access.dir {
            crate::protocol::Direction::Read => pp.read(access.port, wiring).unwrap(),
            crate::protocol::Direction::Write => pp.write(access.port, byte, wiring).unwrap(),
        }
    }

    #[test]
    fn test_detect_generation_echoes_last_poke() {
        let mut pp = PortProtocol::new(Generation::Detect).unwrap();
        let mut latch = EchoLatch::default();
        detect_access(&mut pp, &mut latch, Access::read(PORT_FRAME), 0);
        detect_access(&mut pp, &mut latch, Access::write(PORT_SERIAL), OPCODE_POKE);
        for b in [0u8, 0, 0, 0, 0xEF, 0xBE, 0xAD, 0xDE] {
            detect_access(&mut pp, &mut latch, Access::read(PORT_FRAME), 0);
            detect_access(&mut pp, &mut latch, Access::write(PORT_SERIAL), b);
        }
        assert_eq!(latch.value, 0xDEAD_BEEF);
        assert!(pp.state.is_idle());
        // no link leg in this generation
        let step = detect_access(&mut pp, &mut latch, Access::read(PORT_STROBE), 0);
        assert_eq!(step.to, ProtocolState::Idle);
    }
}
