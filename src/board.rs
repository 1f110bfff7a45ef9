//! Operator-facing outputs of the programmer and its time base.
use std::{thread::sleep, time::Duration};

use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Led {
    Red,
    Green,
}

/// Indicators, beeper and busy-wait delay of the programmer board.
///
/// A firmware build backs this with GPIOs and a cycle-counting delay. Setting
/// an output never fails.
pub trait Board {
    fn set_led(&mut self, led: Led, on: bool);
    fn set_beeper(&mut self, on: bool);
    fn delay_ms(&mut self, ms: u32);

    /// `done` of `total` bytes of the current image have been staged.
    fn progress(&mut self, _done: usize, _total: usize) {}
}

/// Host stand-in for the indicator board: LED and beeper changes go to the
/// log, progress to a terminal bar.
#[derive(Default)]
pub struct ConsoleBoard {
    red: bool,
    green: bool,
    beeper: bool,
    bar: Option<ProgressBar>,
}

impl ConsoleBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_bar(total: usize) -> ProgressBar {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes}",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar
    }
}

impl Board for ConsoleBoard {
    fn set_led(&mut self, led: Led, on: bool) {
        let state = match led {
            Led::Red => &mut self.red,
            Led::Green => &mut self.green,
        };
        if *state != on {
            *state = on;
            log::trace!("LED {:?} {}", led, if on { "on" } else { "off" });
        }
        if let Some(bar) = &self.bar {
            bar.tick();
        }
    }

    fn set_beeper(&mut self, on: bool) {
        if self.beeper != on {
            self.beeper = on;
            log::trace!("Beeper {}", if on { "on" } else { "off" });
        }
    }

    fn delay_ms(&mut self, ms: u32) {
        sleep(Duration::from_millis(ms as u64));
    }

    fn progress(&mut self, done: usize, total: usize) {
        if done == 0 {
            if let Some(bar) = self.bar.take() {
                bar.finish_and_clear();
            }
            self.bar = Some(Self::new_bar(total));
        }
        if let Some(bar) = &self.bar {
            bar.set_position(done as u64);
            if done >= total {
                bar.finish_and_clear();
                self.bar = None;
            }
        }
    }
}
