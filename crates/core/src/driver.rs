//! Host driver access sequences.
//!
//! [`Driver`] plays the host side of the port protocol against an [`Aqp`],
//! issuing the same reads and writes, in the same order, as the ISA driver
//! does. The CLI and the tests use it instead of hand-rolling pulse loops.

use crate::error::Result;
use crate::protocol::boot::DETECT_SIGNATURE;
use crate::protocol::{OPCODE_PEEK, OPCODE_POKE, PORT_DATA, PORT_FRAME, PORT_SERIAL, PORT_STROBE};
use crate::registers::{REG_CONTROL, REG_MODE, REG_SELECT, REG_STATUS};
use crate::{Aqp, MEM_BASE};

/// Word POKEd during detection; the card answers with [`DETECT_SIGNATURE`].
pub const PROBE_VALUE: u32 = 0x0000_0000;

pub struct Driver<'a> {
    aqp: &'a mut Aqp,
}

impl<'a> Driver<'a> {
    pub fn new(aqp: &'a mut Aqp) -> Self {
        Driver { aqp }
    }

    fn port(&self, offset: u8) -> u16 {
        self.aqp.config.iobase.wrapping_add(u16::from(offset))
    }

    fn r(&mut self, offset: u8) -> Result<u8> {
        let addr = self.port(offset);
        self.aqp.try_read_port(addr)
    }

    fn w(&mut self, offset: u8, byte: u8) -> Result<()> {
        let addr = self.port(offset);
        self.aqp.try_write_port(addr, byte)
    }

    /// Frame pulse followed by one serial byte.
    fn send(&mut self, byte: u8) -> Result<()> {
        self.r(PORT_FRAME)?;
        self.w(PORT_SERIAL, byte)
    }

    fn start(&mut self, opcode: u8, address: u32) -> Result<()> {
        self.send(opcode)?;
        for b in address.to_le_bytes() {
            self.send(b)?;
        }
        Ok(())
    }

    pub fn poke(&mut self, address: u32, value: u32) -> Result<()> {
        self.start(OPCODE_POKE, address)?;
        for b in value.to_le_bytes() {
            self.send(b)?;
        }
        Ok(())
    }

    pub fn peek(&mut self, address: u32) -> Result<u32> {
        self.start(OPCODE_PEEK, address)?;
        let mut out = [0u8; 4];
        for b in out.iter_mut() {
            self.r(PORT_STROBE)?;
            *b = self.r(PORT_DATA)?;
        }
        Ok(u32::from_le_bytes(out))
    }

    /// Query `tag` and drain `len` payload bytes, then close the session.
    pub fn link(&mut self, tag: u32, len: usize) -> Result<Vec<u8>> {
        // the first strobe arms the query and doubles as the pulse for byte 0
        for b in tag.to_le_bytes() {
            self.r(PORT_STROBE)?;
            self.w(PORT_SERIAL, b)?;
        }
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            self.r(PORT_STROBE)?;
            out.push(self.r(PORT_DATA)?);
        }
        self.w(PORT_FRAME, 0)?;
        Ok(out)
    }

    /// Run the power-on detection handshake. Returns true if the card
    /// answered with the detection signature and, where the card has a
    /// sequencer, the handshake reached its final state.
    pub fn detect(&mut self) -> Result<bool> {
        for (reg, byte) in [
            (REG_MODE, 0x00),
            (REG_STATUS, 0x00),
            (REG_CONTROL, 0x08),
            (REG_CONTROL, 0x00),
            (REG_SELECT, 0x80),
            (REG_STATUS, 0x01),
            (REG_STATUS, 0x00),
        ] {
            self.w(reg, byte)?;
        }
        self.poke(MEM_BASE, PROBE_VALUE)?;
        self.r(REG_STATUS)?;
        let signature = self.peek(MEM_BASE)?;

        self.w(REG_SELECT, 0x00)?;
        self.w(REG_CONTROL, 0x01)?;
        self.r(PORT_STROBE)?;
        self.w(REG_CONTROL, 0x00)?;

        let complete = self.aqp.sequencer.as_ref().map_or(true, |s| s.is_complete());
        Ok(signature == DETECT_SIGNATURE && complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LINK_FILLER, TAG_SERIAL_NO};
    use crate::{AqpConfig, Generation, OUT_OF_RANGE_WORD};

    #[test]
    fn test_poke_peek() {
        let mut aqp = Aqp::new().unwrap();
        let mut drv = Driver::new(&mut aqp);
        drv.poke(MEM_BASE + 0x100, 0xA5A5_0001).unwrap();
        drv.poke(MEM_BASE + 0x104, 0x0000_0002).unwrap();
        assert_eq!(drv.peek(MEM_BASE + 0x100).unwrap(), 0xA5A5_0001);
        assert_eq!(drv.peek(MEM_BASE + 0x104).unwrap(), 2);
        // low address bits are ignored
        assert_eq!(drv.peek(MEM_BASE + 0x103).unwrap(), 0xA5A5_0001);
        assert_eq!(drv.peek(0x1000).unwrap(), OUT_OF_RANGE_WORD);
    }

    #[test]
    fn test_poke_out_of_range_dropped() {
        let mut aqp = Aqp::new().unwrap();
        let mut drv = Driver::new(&mut aqp);
        drv.poke(MEM_BASE + crate::MEM_SIZE as u32, 0x1234).unwrap();
        assert_eq!(drv.peek(MEM_BASE + crate::MEM_SIZE as u32).unwrap(), OUT_OF_RANGE_WORD);
        assert!(aqp.memory().unwrap().words().iter().all(|w| *w == 0));
    }

    #[test]
    fn test_link_known_and_unknown() {
        let mut aqp = Aqp::new().unwrap();
        let mut drv = Driver::new(&mut aqp);
        assert_eq!(drv.link(TAG_SERIAL_NO, 5).unwrap(), vec![0x07, 0x31, 0x00, 0x96, LINK_FILLER]);
        assert_eq!(drv.link(0x1234_5678, 2).unwrap(), vec![LINK_FILLER, LINK_FILLER]);
        // session closed; PEEK/POKE still works
        drv.poke(MEM_BASE, 9).unwrap();
        assert_eq!(drv.peek(MEM_BASE).unwrap(), 9);
        assert!(aqp.pp.state.is_idle());
    }

    #[test]
    fn test_nonzero_iobase() {
        let mut aqp = Aqp::new_with_config(AqpConfig { iobase: 0x280, generation: Generation::Link }).unwrap();
        let mut drv = Driver::new(&mut aqp);
        drv.poke(MEM_BASE, 0x0BAD_CAFE).unwrap();
        assert_eq!(drv.peek(MEM_BASE).unwrap(), 0x0BAD_CAFE);
    }

    #[test]
    fn test_detect_on_link_generation() {
        let mut aqp = Aqp::new().unwrap();
        // no handshake on this generation; memory answers with the probe value
        assert!(!Driver::new(&mut aqp).detect().unwrap());
        assert_eq!(aqp.memory().unwrap().read_word(MEM_BASE), PROBE_VALUE);
    }
}
