/// Second byte of the programming enable frame, echoed back while the third
/// byte is clocked out when the target accepted the command.
pub const PROGRAMMING_ACK: u8 = 0x53;

/// Bit 0 of the poll reply is set while a write or erase is in progress.
pub const BUSY_BIT: u8 = 0x01;

/// Length of every serial programming instruction.
pub const FRAME_LEN: usize = 4;

pub mod commands {
    pub const PROGRAMMING_ENABLE: [u8; 2] = [0xac, 0x53];
    pub const CHIP_ERASE: [u8; 2] = [0xac, 0x80];
    pub const POLL_READY: u8 = 0xf0;

    pub const LOAD_PAGE_LOW: u8 = 0x40;
    pub const LOAD_PAGE_HIGH: u8 = 0x48;
    pub const WRITE_PAGE: u8 = 0x4c;
    pub const READ_PROGRAM_LOW: u8 = 0x20;
    pub const READ_PROGRAM_HIGH: u8 = 0x28;

    pub const READ_SIGNATURE: u8 = 0x30;
    pub const READ_CALIBRATION: u8 = 0x38;
    /// Lock bits and high fuse share this opcode, selected by the second byte.
    pub const READ_LOCK: [u8; 2] = [0x58, 0x00];
    pub const READ_FUSE_LOW: [u8; 2] = [0x50, 0x00];
    pub const READ_FUSE_HIGH: [u8; 2] = [0x58, 0x08];
    pub const READ_FUSE_EXTENDED: [u8; 2] = [0x50, 0x08];

    pub const WRITE_LOCK: [u8; 2] = [0xac, 0xe0];
    pub const WRITE_FUSE_LOW: [u8; 2] = [0xac, 0xa0];
    pub const WRITE_FUSE_HIGH: [u8; 2] = [0xac, 0xa8];
    pub const WRITE_FUSE_EXTENDED: [u8; 2] = [0xac, 0xa4];
}
