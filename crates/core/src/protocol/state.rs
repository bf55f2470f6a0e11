//! Protocol states and port accesses.

use std::fmt;

/// Operation selected by the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Poke,
    Peek,
}

/// Why the protocol machine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    UnsupportedOpcode(u8),
    ProtocolViolation,
}

/// The step awaited next. Byte indices run 0..4, low byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolState {
    #[default]
    Idle,
    /// Opcode trigger seen; next serial byte is the opcode
    AwaitOpcode,
    /// Waiting for the frame pulse before address byte `index`
    AddressPulse { op: Op, index: u8 },
    /// Waiting for address byte `index` on the serial port
    AddressByte { op: Op, index: u8 },
    ValuePulse { index: u8 },
    ValueByte { index: u8 },
    /// PEEK output: waiting for the strobe before byte `index`
    ReadPulse { index: u8 },
    /// PEEK output: byte `index` ready on the data port
    ReadByte { index: u8 },
    TagPulse { index: u8 },
    TagByte { index: u8 },
    /// Link session open; strobe to stage the next payload byte
    LinkPulse,
    LinkByte,
    /// Inert until reset
    Halted(Fault),
}

impl ProtocolState {
    pub fn is_idle(&self) -> bool {
        *self == ProtocolState::Idle
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, ProtocolState::Halted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// One byte-wide access at a port offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub dir: Direction,
    pub port: u8,
}

impl Access {
    pub const fn read(port: u8) -> Self {
        Access { dir: Direction::Read, port }
    }

    pub const fn write(port: u8) -> Self {
        Access { dir: Direction::Write, port }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = match self.dir {
            Direction::Read => 'r',
            Direction::Write => 'w',
        };
        write!(f, "{}{:02x}", d, self.port)
    }
}
