//! Faults a programming run can end in.

use crate::device::Signature;
use crate::signal::Signal;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target never echoed the programming enable acknowledgment.
    #[error("target did not enter programming mode after {attempts} attempts")]
    HandshakeExhausted { attempts: u32 },
    /// Signature is not in the allow-list.
    #[error("unsupported device signature {signature}")]
    IdentityRejected { signature: Signature },
    /// A programmed byte read back differently.
    #[error("verify failed at 0x{address:04x}: expected 0x{expected:02x}, found 0x{found:02x}")]
    VerificationMismatch { address: u32, expected: u8, found: u8 },
    /// The busy flag did not clear within the configured bound.
    #[error("target still busy after {waited_ms} ms")]
    FlashTimeout { waited_ms: u32 },
    /// The image does not fit into the chip's program memory.
    #[error("image of {len} bytes at 0x{address:04x} exceeds flash size of {flash_size} bytes")]
    OutOfBounds {
        address: u32,
        len: usize,
        flash_size: u32,
    },
    /// The link itself failed.
    #[error(transparent)]
    Link(#[from] anyhow::Error),
}

impl Error {
    /// Operator-visible pattern for this fault, if the fault belongs to the target.
    pub fn signal(&self) -> Option<Signal> {
        match self {
            Error::HandshakeExhausted { .. } => Some(Signal::HandshakeExhausted),
            Error::IdentityRejected { .. } => Some(Signal::IdentityRejected),
            Error::VerificationMismatch { .. } => Some(Signal::VerificationMismatch),
            Error::FlashTimeout { .. } => Some(Signal::FlashTimeout),
            Error::OutOfBounds { .. } | Error::Link(_) => None,
        }
    }
}
