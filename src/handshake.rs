//! Reset sequencing and the programming enable handshake.
//!
//! ```text
//! Idle -> ResetPulse -> AwaitingAck -> Active
//!             ^              |
//!             +--- retry ----+--> Exhausted
//! ```

use crate::Result;
use crate::board::{Board, Led};
use crate::config::Timing;
use crate::constants::PROGRAMMING_ACK;
use crate::error::Error;
use crate::protocol::Command;
use crate::transport::{ControlLines, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    Idle,
    ResetPulse,
    AwaitingAck,
    /// Programming mode entered, programming instructions are legal.
    Active,
    /// Terminal, the retry budget is spent.
    Exhausted,
}

pub struct Handshake {
    timing: Timing,
    state: HandshakeState,
    attempts: u32,
}

impl Handshake {
    pub fn new(timing: &Timing) -> Self {
        Handshake {
            timing: timing.clone(),
            state: HandshakeState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Programming enable frames sent so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Advance by one transition. `Active` and `Exhausted` are fixed points.
    pub fn step<T, B>(&mut self, link: &mut T, board: &mut B) -> anyhow::Result<HandshakeState>
    where
        T: Transport + ControlLines + ?Sized,
        B: Board + ?Sized,
    {
        self.state = match self.state {
            HandshakeState::Idle => {
                // SCK is idle low, hold the target in reset from the start
                link.set_select(false)?;
                link.set_reset(true)?;
                HandshakeState::ResetPulse
            }
            HandshakeState::ResetPulse => {
                board.set_led(Led::Red, true);
                board.delay_ms(self.timing.reset_pulse_ms);
                link.set_reset(true)?;
                board.delay_ms(self.timing.reset_settle_ms);
                board.set_led(Led::Red, false);
                HandshakeState::AwaitingAck
            }
            HandshakeState::AwaitingAck => {
                self.attempts += 1;
                link.set_select(true)?;
                let echo = link.exchange(Command::ProgrammingEnable)?;
                if echo == PROGRAMMING_ACK {
                    log::info!("Programming mode entered after {} attempt(s)", self.attempts);
                    HandshakeState::Active
                } else {
                    log::warn!(
                        "Programming enable not acknowledged (got 0x{:02x}), attempt {}/{}",
                        echo,
                        self.attempts,
                        self.timing.handshake_attempts
                    );
                    // a positive reset pulse resynchronizes the target's SPI
                    link.set_reset(false)?;
                    link.set_select(false)?;
                    board.delay_ms(self.timing.retry_cooldown_ms);
                    if self.attempts >= self.timing.handshake_attempts {
                        HandshakeState::Exhausted
                    } else {
                        HandshakeState::ResetPulse
                    }
                }
            }
            state @ (HandshakeState::Active | HandshakeState::Exhausted) => state,
        };
        Ok(self.state)
    }

    /// Step until programming mode is entered or the attempts run out.
    pub fn run<T, B>(&mut self, link: &mut T, board: &mut B) -> Result<()>
    where
        T: Transport + ControlLines + ?Sized,
        B: Board + ?Sized,
    {
        loop {
            match self.step(link, board)? {
                HandshakeState::Active => return Ok(()),
                HandshakeState::Exhausted => {
                    return Err(Error::HandshakeExhausted {
                        attempts: self.attempts,
                    });
                }
                _ => (),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers programming enable on the `ack_on`-th frame, if ever.
    struct Target {
        ack_on: Option<u32>,
        frames: u32,
        pos: usize,
        reset: bool,
        reset_pulses: u32,
    }

    impl Target {
        fn new(ack_on: Option<u32>) -> Self {
            Target {
                ack_on,
                frames: 0,
                pos: 0,
                reset: false,
                reset_pulses: 0,
            }
        }
    }

    impl Transport for Target {
        fn exchange_byte(&mut self, value: u8) -> anyhow::Result<u8> {
            assert!(self.reset, "frame sent while target is running");
            let reply = match self.pos {
                0 => {
                    self.frames += 1;
                    0
                }
                2 if self.ack_on == Some(self.frames) => PROGRAMMING_ACK,
                _ => value.wrapping_add(1),
            };
            self.pos = (self.pos + 1) % 4;
            Ok(reply)
        }
    }

    impl ControlLines for Target {
        fn set_reset(&mut self, asserted: bool) -> anyhow::Result<()> {
            if asserted && !self.reset {
                self.reset_pulses += 1;
            }
            self.reset = asserted;
            Ok(())
        }

        fn set_select(&mut self, _asserted: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Clock {
        elapsed: u32,
    }

    impl Board for Clock {
        fn set_led(&mut self, _led: Led, _on: bool) {}
        fn set_beeper(&mut self, _on: bool) {}
        fn delay_ms(&mut self, ms: u32) {
            self.elapsed += ms;
        }
    }

    #[test]
    fn test_first_attempt_ack() {
        let mut target = Target::new(Some(1));
        let mut clock = Clock::default();
        let mut handshake = Handshake::new(&Timing::default());

        assert_eq!(handshake.state(), HandshakeState::Idle);
        handshake.run(&mut target, &mut clock).unwrap();
        assert_eq!(handshake.state(), HandshakeState::Active);
        assert_eq!(handshake.attempts(), 1);
        assert_eq!(target.frames, 1);
        assert_eq!(clock.elapsed, 100);
    }

    #[test]
    fn test_never_ack_exhausts_after_three() {
        let mut target = Target::new(None);
        let mut clock = Clock::default();
        let mut handshake = Handshake::new(&Timing::default());

        let err = handshake.run(&mut target, &mut clock).unwrap_err();
        assert!(matches!(err, Error::HandshakeExhausted { attempts: 3 }));
        assert_eq!(handshake.state(), HandshakeState::Exhausted);
        assert_eq!(target.frames, 3);
        assert_eq!(target.reset_pulses, 3);

        // terminal
        let state = handshake.step(&mut target, &mut clock).unwrap();
        assert_eq!(state, HandshakeState::Exhausted);
        assert_eq!(target.frames, 3);
    }

    #[test]
    fn test_late_ack_within_budget() {
        let mut target = Target::new(Some(3));
        let mut clock = Clock::default();
        let mut handshake = Handshake::new(&Timing::default());

        handshake.run(&mut target, &mut clock).unwrap();
        assert_eq!(handshake.attempts(), 3);
        assert_eq!(clock.elapsed, 3 * 100 + 2 * 100);
    }

    #[test]
    fn test_state_sequence() {
        let mut target = Target::new(Some(2));
        let mut clock = Clock::default();
        let mut handshake = Handshake::new(&Timing::default());

        let states: Vec<_> = (0..6)
            .map(|_| handshake.step(&mut target, &mut clock).unwrap())
            .collect();
        assert_eq!(
            states,
            vec![
                HandshakeState::ResetPulse,
                HandshakeState::AwaitingAck,
                HandshakeState::ResetPulse,
                HandshakeState::AwaitingAck,
                HandshakeState::Active,
                HandshakeState::Active,
            ]
        );
    }
}
