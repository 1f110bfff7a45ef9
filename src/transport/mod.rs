//! Abstract target link interface.
use anyhow::Result;

use crate::constants::FRAME_LEN;
use crate::protocol::{Command, Reply};

pub use self::serial::{DEFAULT_BAUDRATE, SerialTransport};

mod serial;

/// Abstraction of the byte-serial link to the target.
/// Might be a hardware SPI master, a USB or serial bridge, or a simulator.
pub trait Transport {
    /// Clock one byte out and return the byte clocked in at the same time.
    fn exchange_byte(&mut self, value: u8) -> Result<u8>;

    /// Send a full instruction frame.
    ///
    /// All four bytes are always clocked, even when only the last reply byte
    /// carries the result.
    fn transfer(&mut self, cmd: Command) -> Result<Reply> {
        let req = cmd.into_raw()?;
        let mut resp = [0u8; FRAME_LEN];
        for (out, byte) in resp.iter_mut().zip(req) {
            *out = self.exchange_byte(byte)?;
        }
        log::trace!("=> {} <= {}", hex::encode(req), hex::encode(resp));
        Ok(Reply(resp))
    }

    /// Send a frame and return the reply to its third byte.
    fn exchange(&mut self, cmd: Command) -> Result<u8> {
        Ok(self.transfer(cmd)?.echo())
    }

    /// Send a frame and return the reply to its last byte.
    fn exchange_last(&mut self, cmd: Command) -> Result<u8> {
        Ok(self.transfer(cmd)?.last())
    }
}

/// Level control of the target's reset and device select lines.
///
/// `true` always means asserted, whatever the electrical polarity.
pub trait ControlLines {
    fn set_reset(&mut self, asserted: bool) -> Result<()>;
    fn set_select(&mut self, asserted: bool) -> Result<()>;
}
