//! # aqp-core
//!
//! Port-level emulation of the AQP ISA acquisition-processor card.
//!
//! The card decodes a window of [`PORT_SPAN`] I/O ports starting at its
//! iobase (default 0x150). Four of them carry a byte-serial protocol through
//! which the host driver PEEKs and POKEs 32-bit words in the card's memory
//! and queries a tag/link table; four more are plain scalar registers. On
//! the detection generation a power-on handshake gates the protocol.
//!
//! ## Architecture
//!
//! - [`Aqp`]: the card; owns every component and routes port accesses
//! - [`registers::RegisterFile`]: scalar registers at 0x07, 0x10, 0x11, 0x14
//! - [`memory`]: 2 MiB backing memory (or the detection echo latch)
//! - [`link`]: tag/link table and payload cursor
//! - [`protocol`]: PP-FSM rule tables and the detection sequencer
//! - [`savestate`]: register-file save state
//! - [`debugger`]: port watchpoints, access trace, memory/register viewers
//! - [`driver`]: host-side access sequences for PEEK, POKE, link and detect
//!
//! ## Port map (offsets from iobase)
//!
//! | Offset | Access | Role                                  |
//! |--------|--------|---------------------------------------|
//! | 0x00   | R      | PEEK / link output byte               |
//! | 0x01   | W      | opcode, address, value and tag bytes  |
//! | 0x02   | R      | strobe for output and link framing    |
//! | 0x03   | R/W    | opcode trigger and input frame pulse  |
//! | 0x07   | R/W    | control register                      |
//! | 0x10   | R/W    | status register (bit 0 reads as 1)    |
//! | 0x11   | R/W    | mode register                         |
//! | 0x14   | R/W    | select register                       |
//!
//! Every other offset in the window reads 0xFF and ignores writes.

pub mod error;
pub mod registers;
pub mod memory;
pub mod link;
pub mod protocol;
pub mod savestate;
pub mod debugger;
pub mod driver;

pub use driver::Driver;
pub use error::{AqpError, Result, SaveStateError};
pub use protocol::Generation;
pub use registers::RegisterFile;

use std::path::Path;

use tracing::{debug, trace};

use debugger::Debugger;
use link::LinkTable;
use memory::{BackingMemory, EchoLatch, WordBus};
use protocol::boot::DETECT_SIGNATURE;
use protocol::{BootAction, DetectSequencer, Direction, Fault, PortProtocol, Wiring, OPEN_BUS, PORT_FRAME};
use savestate::SaveState;

/// Default I/O base address
pub const DEFAULT_IOBASE: u16 = 0x150;
/// Number of ports decoded from iobase
pub const PORT_SPAN: u16 = 32;

/// First byte address of backing memory
pub const MEM_BASE: u32 = 0x8000_0000;
/// Backing memory size: 2 MiB
pub const MEM_SIZE: usize = 2 * 1024 * 1024;
/// PEEK result for addresses outside backing memory
pub const OUT_OF_RANGE_WORD: u32 = 0x55AA_55AA;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AqpConfig {
    pub iobase: u16,
    pub generation: Generation,
}

impl Default for AqpConfig {
    fn default() -> Self {
        AqpConfig { iobase: DEFAULT_IOBASE, generation: Generation::default() }
    }
}

/// What completed PEEK/POKE operations land on.
enum Backing {
    Memory(BackingMemory),
    Echo(EchoLatch),
}

impl Backing {
    fn for_generation(generation: Generation) -> Self {
        match generation {
            Generation::Link => Backing::Memory(BackingMemory::new()),
            Generation::Detect => Backing::Echo(EchoLatch::default()),
        }
    }

    fn bus(&mut self) -> &mut dyn WordBus {
        match self {
            Backing::Memory(m) => m,
            Backing::Echo(e) => e,
        }
    }
}

/// The emulated card.
pub struct Aqp {
    pub config: AqpConfig,
    pub regs: RegisterFile,
    backing: Backing,
    links: Option<LinkTable>,
    pub pp: PortProtocol,
    /// Present on the detection generation only
    pub sequencer: Option<DetectSequencer>,
    pub debugger: Debugger,
    fault: Option<AqpError>,
}

impl Aqp {
    /// Card at the default iobase, link generation.
    pub fn new() -> Result<Self> {
        Self::new_with_config(AqpConfig::default())
    }

    pub fn new_with_config(config: AqpConfig) -> Result<Self> {
        let links = match config.generation {
            Generation::Link => Some(LinkTable::builtin()?),
            Generation::Detect => None,
        };
        let sequencer = match config.generation {
            Generation::Detect => Some(DetectSequencer::new()),
            Generation::Link => None,
        };
        debug!("AQP card at 0x{:03X}, {} generation", config.iobase, config.generation.name());
        Ok(Aqp {
            config,
            regs: RegisterFile::new(),
            backing: Backing::for_generation(config.generation),
            links,
            pp: PortProtocol::new(config.generation)?,
            sequencer,
            debugger: Debugger::new(),
            fault: None,
        })
    }

    pub fn generation(&self) -> Generation {
        self.config.generation
    }

    /// True if `addr` falls inside the card's port window.
    pub fn claims(&self, addr: u16) -> bool {
        self.offset(addr).is_some()
    }

    fn offset(&self, addr: u16) -> Option<u8> {
        let rel = addr.checked_sub(self.config.iobase)?;
        (rel < PORT_SPAN).then_some(rel as u8)
    }

    pub fn memory(&self) -> Option<&BackingMemory> {
        match &self.backing {
            Backing::Memory(m) => Some(m),
            Backing::Echo(_) => None,
        }
    }

    pub fn echo_latch(&self) -> Option<&EchoLatch> {
        match &self.backing {
            Backing::Echo(e) => Some(e),
            Backing::Memory(_) => None,
        }
    }

    pub fn links(&self) -> Option<&LinkTable> {
        self.links.as_ref()
    }

    /// Bus-facing read. Faults are latched (see [`Aqp::fault`]) and the
    /// access reads as open bus.
    pub fn read_port(&mut self, addr: u16) -> u8 {
        match self.try_read_port(addr) {
            Ok(v) => v,
            Err(e) => {
                self.fault = Some(e);
                OPEN_BUS
            }
        }
    }

    /// Bus-facing write. Faults are latched (see [`Aqp::fault`]).
    pub fn write_port(&mut self, addr: u16, byte: u8) {
        if let Err(e) = self.try_write_port(addr, byte) {
            self.fault = Some(e);
        }
    }

    /// Ports outside the window read as open bus.
    pub fn try_read_port(&mut self, addr: u16) -> Result<u8> {
        let Some(offset) = self.offset(addr) else { return Ok(OPEN_BUS) };
        let result = self.read_offset(offset);
        let value = *result.as_ref().unwrap_or(&OPEN_BUS);
        self.debugger.record(offset, Direction::Read, value, self.pp.state);
        result
    }

    pub fn try_write_port(&mut self, addr: u16, byte: u8) -> Result<()> {
        let Some(offset) = self.offset(addr) else { return Ok(()) };
        let result = self.write_offset(offset, byte);
        self.debugger.record(offset, Direction::Write, byte, self.pp.state);
        result
    }

    fn unlocked(&self) -> bool {
        self.sequencer.as_ref().map_or(true, |s| s.unlocked())
    }

    fn read_offset(&mut self, offset: u8) -> Result<u8> {
        if offset <= PORT_FRAME {
            let unlocked = self.unlocked();
            let wiring = Wiring { bus: self.backing.bus(), links: self.links.as_ref(), unlocked };
            let value = self.pp.read(offset, wiring)?.output.unwrap_or(OPEN_BUS);
            // the handshake looks at the protocol state this read left behind
            self.observe_read(offset);
            return Ok(value);
        }

        // a register read that moves the handshake sees the latched cell
        self.observe_read(offset);
        match self.regs.read(offset) {
            Some(v) => {
                trace!("r{:02x} {:02X} (register)", offset, v);
                Ok(v)
            }
            None => {
                debug!("unhandled port read +0x{:02X}", offset);
                Ok(OPEN_BUS)
            }
        }
    }

    fn observe_read(&mut self, offset: u8) {
        let pp_idle = self.pp.state.is_idle();
        if let Some(seq) = self.sequencer.as_mut() {
            let action = seq.on_read(offset, pp_idle);
            self.apply_boot_action(action);
        }
    }

    fn write_offset(&mut self, offset: u8, byte: u8) -> Result<()> {
        let mut poked = false;
        if offset <= PORT_FRAME {
            let unlocked = self.unlocked();
            let wiring = Wiring { bus: self.backing.bus(), links: self.links.as_ref(), unlocked };
            let step = self.pp.write(offset, byte, wiring)?;
            poked = matches!(step.completion, Some(protocol::Completion::Poked { .. }));
        } else if self.regs.write(offset, byte) {
            trace!("w{:02x} {:02X} (register)", offset, byte);
        } else {
            debug!("unhandled port write +0x{:02X} = 0x{:02X}", offset, byte);
        }

        if let Some(seq) = self.sequencer.as_mut() {
            let action = if poked { seq.on_poke_complete() } else { seq.on_write(offset, byte) };
            self.apply_boot_action(action);
        }
        Ok(())
    }

    fn apply_boot_action(&mut self, action: BootAction) {
        match action {
            BootAction::None => {}
            BootAction::LatchSignature => {
                if let Backing::Echo(latch) = &mut self.backing {
                    latch.value = DETECT_SIGNATURE;
                }
            }
            BootAction::LatchStatus => self.regs.latch_status(),
        }
    }

    /// Last fault latched by [`Aqp::read_port`] / [`Aqp::write_port`].
    pub fn fault(&self) -> Option<&AqpError> {
        self.fault.as_ref()
    }

    pub fn take_fault(&mut self) -> Option<AqpError> {
        self.fault.take()
    }

    /// Why the PP-FSM is halted, if it is.
    pub fn halted(&self) -> Option<Fault> {
        self.pp.fault()
    }

    /// External reset: protocol and sequencer back to power-on, fault
    /// cleared. Registers and backing memory keep their contents.
    pub fn reset(&mut self) {
        debug!("reset");
        self.pp.reset();
        if let Some(seq) = self.sequencer.as_mut() {
            seq.reset();
        }
        self.fault = None;
    }

    // ─── Save state ─────────────────────────────────────────────────────

    pub fn save_state(&self) -> SaveState {
        SaveState { registers: self.regs.save_state() }
    }

    /// Registers come from `state`; everything else powers on.
    pub fn load_state(&mut self, state: &SaveState) {
        self.reset();
        self.backing = Backing::for_generation(self.config.generation);
        self.regs.load_state(&state.registers);
        self.debugger.clear_trace();
    }

    pub fn save_to_file(&self, path: &Path) -> std::result::Result<(), SaveStateError> {
        savestate::save_to_file(&self.save_state(), self.config.generation.to_byte(), path)
    }

    pub fn load_from_file(&mut self, path: &Path) -> std::result::Result<(), SaveStateError> {
        let state = savestate::load_from_file(path, self.config.generation.to_byte())?;
        self.load_state(&state);
        Ok(())
    }

    // ─── Debug views ────────────────────────────────────────────────────

    pub fn dump_state(&self) -> String {
        let mut s = format!(
            "AQP @0x{:03X} ({})\n  protocol: {:?}\n",
            self.config.iobase,
            self.config.generation.name(),
            self.pp.state,
        );
        if let Some(seq) = &self.sequencer {
            s.push_str(&format!("  detect:   {:?}\n", seq.state));
        }
        if let Some(e) = &self.fault {
            s.push_str(&format!("  fault:    {}\n", e));
        }
        if let Some(latch) = self.echo_latch() {
            s.push_str(&format!("  echo:     0x{:08X}\n", latch.value));
        }
        s.push_str(&debugger::dump_registers(&self.regs));
        s
    }

    pub fn dump_memory(&self, start_word: usize, count: usize) -> String {
        match &self.backing {
            Backing::Memory(m) => debugger::dump_memory(m.words(), start_word, count),
            Backing::Echo(e) => format!("(no backing memory; echo latch 0x{:08X})\n", e.value),
        }
    }
}
