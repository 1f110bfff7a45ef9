//! The serial programming instruction set of AVR ISP

use std::fmt;

use anyhow::Result;
use scroll::{BE, Pwrite};

use crate::constants::{FRAME_LEN, commands};

/// Fuse byte selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fuse {
    Low,
    High,
    Extended,
}

impl Fuse {
    pub const ALL: [Fuse; 3] = [Fuse::Low, Fuse::High, Fuse::Extended];

    const fn read_prefix(self) -> [u8; 2] {
        match self {
            Fuse::Low => commands::READ_FUSE_LOW,
            Fuse::High => commands::READ_FUSE_HIGH,
            Fuse::Extended => commands::READ_FUSE_EXTENDED,
        }
    }

    const fn write_prefix(self) -> [u8; 2] {
        match self {
            Fuse::Low => commands::WRITE_FUSE_LOW,
            Fuse::High => commands::WRITE_FUSE_HIGH,
            Fuse::Extended => commands::WRITE_FUSE_EXTENDED,
        }
    }
}

impl fmt::Display for Fuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fuse::Low => write!(f, "low"),
            Fuse::High => write!(f, "high"),
            Fuse::Extended => write!(f, "extended"),
        }
    }
}

/// Opcode that stages a byte into the page buffer.
///
/// Program memory is organized in 16-bit words: the even address is the low
/// byte of a word, the odd address is the high byte.
pub const fn load_opcode(address: u32) -> u8 {
    if address & 1 == 1 {
        commands::LOAD_PAGE_HIGH
    } else {
        commands::LOAD_PAGE_LOW
    }
}

/// Opcode that reads one byte of program memory, same parity rule as [`load_opcode`].
pub const fn read_opcode(address: u32) -> u8 {
    if address & 1 == 1 {
        commands::READ_PROGRAM_HIGH
    } else {
        commands::READ_PROGRAM_LOW
    }
}

/// AVR ISP Command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    /// Enter serial programming mode. Only legal right after reset.
    ProgrammingEnable,
    /// Erase program memory and unlock the lock bits.
    ChipErase,
    /// Poll the busy flag of the last write or erase.
    PollReady,
    /// Stage one byte into the page buffer.
    ///
    /// `address` is the absolute byte address, only its page-relative word
    /// offset and its parity go on the wire.
    LoadPage {
        address: u32,
        page_size: u32,
        data: u8,
    },
    /// Commit the page buffer to the page starting at `page_address`.
    WritePage { page_address: u32 },
    /// Read one byte of program memory.
    ReadProgram { address: u32 },
    ReadLock,
    /// Read signature byte `index` (0..=3).
    ReadSignature { index: u8 },
    ReadFuse(Fuse),
    ReadCalibration,
    WriteLock(u8),
    WriteFuse(Fuse, u8),
}

impl Command {
    pub fn load_page(address: u32, page_size: u32, data: u8) -> Self {
        Command::LoadPage {
            address,
            page_size,
            data,
        }
    }

    pub fn write_page(page_address: u32) -> Self {
        Command::WritePage { page_address }
    }

    pub fn read_program(address: u32) -> Self {
        Command::ReadProgram { address }
    }

    pub fn into_raw(self) -> Result<[u8; FRAME_LEN]> {
        let mut buf = [0u8; FRAME_LEN];
        match self {
            Command::ProgrammingEnable => {
                buf[..2].copy_from_slice(&commands::PROGRAMMING_ENABLE);
            }
            Command::ChipErase => {
                buf[..2].copy_from_slice(&commands::CHIP_ERASE);
            }
            Command::PollReady => {
                buf[0] = commands::POLL_READY;
            }
            Command::LoadPage {
                address,
                page_size,
                data,
            } => {
                // CMD, 0, WORD OFFSET IN PAGE, DATA
                let words_per_page = (page_size >> 1).max(1);
                buf[0] = load_opcode(address);
                buf[2] = ((address >> 1) % words_per_page) as u8;
                buf[3] = data;
            }
            Command::WritePage { page_address } => {
                // CMD, WORD ADDRESS (BE), 0
                buf[0] = commands::WRITE_PAGE;
                buf.pwrite_with((page_address >> 1) as u16, 1, BE)?;
            }
            Command::ReadProgram { address } => {
                buf[0] = read_opcode(address);
                buf.pwrite_with((address >> 1) as u16, 1, BE)?;
            }
            Command::ReadLock => {
                buf[..2].copy_from_slice(&commands::READ_LOCK);
            }
            Command::ReadSignature { index } => {
                buf[0] = commands::READ_SIGNATURE;
                buf[2] = index;
            }
            Command::ReadFuse(fuse) => {
                buf[..2].copy_from_slice(&fuse.read_prefix());
            }
            Command::ReadCalibration => {
                buf[0] = commands::READ_CALIBRATION;
            }
            Command::WriteLock(value) => {
                buf[..2].copy_from_slice(&commands::WRITE_LOCK);
                buf[3] = value;
            }
            Command::WriteFuse(fuse, value) => {
                buf[..2].copy_from_slice(&fuse.write_prefix());
                buf[3] = value;
            }
        }
        Ok(buf)
    }
}

/// The four bytes clocked in while a command was clocked out.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reply(pub [u8; FRAME_LEN]);

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reply[{}]", hex::encode(self.0))
    }
}

impl Reply {
    /// Byte received while the third command byte was sent.
    ///
    /// Programming enable answers here by echoing its second byte.
    pub fn echo(&self) -> u8 {
        self.0[2]
    }

    /// Byte received while the last command byte was sent, where all read
    /// instructions place their result.
    pub fn last(&self) -> u8 {
        self.0[3]
    }
}
