//! AVR ISP Protocol implementation.

pub mod board;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod format;
pub mod handshake;
pub mod protocol;
pub mod sequence;
pub mod signal;
pub mod transport;

pub use self::board::{Board, Led};
pub use self::config::Timing;
pub use self::device::{Chip, ChipDB};
pub use self::error::{Error, Result};
pub use self::flashing::Flashing;
pub use self::protocol::{Command, Reply};
pub use self::sequence::{Plan, Report};
pub use self::signal::Signal;
pub use self::transport::{ControlLines, Transport};
