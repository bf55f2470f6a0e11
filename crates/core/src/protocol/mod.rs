//! AQP port protocol.
//!
//! Contains the two state machines the driver talks to:
//!
//! - [`PortProtocol`]: PEEK/POKE and tag/link framing on ports 0x00-0x03,
//!   driven by a [`RuleTable`] (one per [`Generation`])
//! - [`DetectSequencer`]: power-on detection handshake layered over the
//!   register file (detection generation only)

mod state;
mod rules;
mod fsm;
pub mod boot;

pub use state::{Access, Direction, Op, ProtocolState, Fault};
pub use rules::{Effect, Rule, RuleTable};
pub use fsm::{Completion, PortProtocol, Step, Wiring, WordAccumulator};
pub use boot::{BootAction, BootState, BootTrigger, DetectSequencer};

/// Output byte of an in-flight PEEK or link read
pub const PORT_DATA: u8 = 0x00;
/// Serial input: opcode, address, value and tag bytes
pub const PORT_SERIAL: u8 = 0x01;
/// Read strobe: advances PEEK output and link framing
pub const PORT_STROBE: u8 = 0x02;
/// Frame pulse: advances address/value/opcode framing
pub const PORT_FRAME: u8 = 0x03;

/// Returned by any read that no rule produces data for
pub const OPEN_BUS: u8 = 0xFF;

pub const OPCODE_POKE: u8 = 0;
pub const OPCODE_PEEK: u8 = 1;

/// Mutually exclusive protocol generations of the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Generation {
    /// Power-on detection handshake, no backing memory, no tag/link leg.
    Detect,
    /// Backing memory plus tag/link table, no handshake.
    #[default]
    Link,
}

impl Generation {
    pub fn to_byte(self) -> u8 {
        match self {
            Generation::Detect => 0,
            Generation::Link => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Generation::Detect => "detect",
            Generation::Link => "link",
        }
    }
}
