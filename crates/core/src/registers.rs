//! Scalar register file.
//!
//! Four independent byte cells at fixed port offsets. Reads return the last
//! written value; offset 0x10 additionally reports bit 0 set ("no error")
//! unconditionally. The detection handshake forces cell 0x10 to 1 once, via
//! [`RegisterFile::latch_status`].

use crate::savestate::RegisterFileState;

/// Register cell offsets
pub const REG_CONTROL: u8 = 0x07;
pub const REG_STATUS: u8 = 0x10;
pub const REG_MODE: u8 = 0x11;
pub const REG_SELECT: u8 = 0x14;

/// Bit 0 of the status cell always reads as set
pub const STATUS_NO_ERROR: u8 = 0x01;

pub struct RegisterFile {
    pub control: u8,
    pub status: u8,
    pub mode: u8,
    pub select: u8,
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile { control: 0, status: 0, mode: 0, select: 0 }
    }

    /// Returns true if `offset` is one of the four cells.
    pub fn decodes(offset: u8) -> bool {
        matches!(offset, REG_CONTROL | REG_STATUS | REG_MODE | REG_SELECT)
    }

    pub fn read(&self, offset: u8) -> Option<u8> {
        match offset {
            REG_CONTROL => Some(self.control),
            REG_STATUS => Some(self.status | STATUS_NO_ERROR),
            REG_MODE => Some(self.mode),
            REG_SELECT => Some(self.select),
            _ => None,
        }
    }

    /// Returns true if `offset` was handled
    pub fn write(&mut self, offset: u8, value: u8) -> bool {
        match offset {
            REG_CONTROL => self.control = value,
            REG_STATUS => self.status = value,
            REG_MODE => self.mode = value,
            REG_SELECT => self.select = value,
            _ => return false,
        }
        true
    }

    /// Status cell becomes 1 when the detection handshake observes the read.
    pub fn latch_status(&mut self) {
        self.status = 1;
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> RegisterFileState {
        RegisterFileState {
            control: self.control, status: self.status, mode: self.mode, select: self.select,
        }
    }

    /// Restore state from save state.
    pub fn load_state(&mut self, s: &RegisterFileState) {
        self.control = s.control; self.status = s.status; self.mode = s.mode; self.select = s.select;
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}
