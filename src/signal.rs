//! Indicator patterns: the only way an unattended programmer reports a result.

use std::fmt;

use crate::board::{Board, Led};

/// One stretch of constant indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Step {
    pub red: bool,
    pub green: bool,
    pub beeper: bool,
    pub hold_ms: u32,
}

const fn step(red: bool, green: bool, beeper: bool, hold_ms: u32) -> Step {
    Step {
        red,
        green,
        beeper,
        hold_ms,
    }
}

const SUCCESS: &[Step] = &[
    step(false, true, true, 10),
    step(false, true, false, 100),
    step(false, true, true, 10),
    step(false, true, false, 100),
    step(false, true, true, 10),
    step(false, true, false, 0),
];

const HANDSHAKE_EXHAUSTED: &[Step] = &[step(true, false, true, 500), step(true, false, false, 0)];

const IDENTITY_REJECTED: &[Step] = &[
    step(true, false, true, 100),
    step(true, false, false, 100),
    step(true, false, true, 100),
    step(true, false, false, 0),
];

const VERIFICATION_MISMATCH: &[Step] = &[step(true, true, false, 0)];

const FLASH_TIMEOUT: &[Step] = &[
    step(true, false, true, 500),
    step(true, false, false, 200),
    step(true, false, true, 500),
    step(true, false, false, 0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Signal {
    Success,
    HandshakeExhausted,
    IdentityRejected,
    VerificationMismatch,
    FlashTimeout,
}

impl Signal {
    pub const ALL: [Signal; 5] = [
        Signal::Success,
        Signal::HandshakeExhausted,
        Signal::IdentityRejected,
        Signal::VerificationMismatch,
        Signal::FlashTimeout,
    ];

    /// The pattern, played once. The last step's state stays latched.
    pub fn pattern(self) -> &'static [Step] {
        match self {
            Signal::Success => SUCCESS,
            Signal::HandshakeExhausted => HANDSHAKE_EXHAUSTED,
            Signal::IdentityRejected => IDENTITY_REJECTED,
            Signal::VerificationMismatch => VERIFICATION_MISMATCH,
            Signal::FlashTimeout => FLASH_TIMEOUT,
        }
    }

    pub fn is_fault(self) -> bool {
        self != Signal::Success
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Success => "success",
            Signal::HandshakeExhausted => "handshake-exhausted",
            Signal::IdentityRejected => "identity-rejected",
            Signal::VerificationMismatch => "verification-mismatch",
            Signal::FlashTimeout => "flash-timeout",
        };
        write!(f, "{}", name)
    }
}

/// Drive `signal`'s pattern onto the board.
pub fn play<B: Board + ?Sized>(board: &mut B, signal: Signal) {
    if signal.is_fault() {
        log::error!("Signalling {}", signal);
    } else {
        log::info!("Signalling {}", signal);
    }
    for step in signal.pattern() {
        board.set_led(Led::Red, step.red);
        board.set_led(Led::Green, step.green);
        board.set_beeper(step.beeper);
        if step.hold_ms > 0 {
            board.delay_ms(step.hold_ms);
        }
    }
}
