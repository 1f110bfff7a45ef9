//! In-memory ATmega328 answering the serial programming instruction set.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use avrisp::board::{Board, Led};
use avrisp::signal::Signal;
use avrisp::transport::{ControlLines, Transport};

pub const FLASH_SIZE: usize = 32 * 1024;
pub const PAGE_SIZE: u32 = 64;
pub const ATMEGA328P: [u8; 3] = [0x1e, 0x95, 0x0f];
pub const ATMEGA328: [u8; 3] = [0x1e, 0x95, 0x14];
pub const ATMEGA168: [u8; 3] = [0x1e, 0x94, 0x06];
pub const ATMEGA8: [u8; 3] = [0x1e, 0x93, 0x0b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardEvent {
    Led(Led, bool),
    Beeper(bool),
    Delay(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Frame([u8; 4]),
    Reset(bool),
    Select(bool),
    Board(BoardEvent),
}

/// A committed page and the absolute addresses staged into its buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub page_address: u32,
    pub staged: Vec<u32>,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub signature: [u8; 3],
    /// Programming enable is acknowledged from this attempt on (1-based).
    pub ack_on_attempt: Option<u32>,
    /// Polls that report busy after each page write or erase.
    pub busy_polls: u32,
    pub stuck_busy: bool,
    /// Read-back of this address returns the inverted byte.
    pub corrupt_read: Option<u32>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            signature: ATMEGA328P,
            ack_on_attempt: Some(1),
            busy_polls: 2,
            stuck_busy: false,
            corrupt_read: None,
        }
    }
}

pub struct SimTarget {
    pub config: SimConfig,
    pub flash: Vec<u8>,
    pub lock: u8,
    pub fuses: [u8; 3],
    pub programming: bool,
    pub enable_attempts: u32,
    pub commits: Vec<Commit>,
    page_buffer: Vec<Option<u8>>,
    reset: bool,
    frame: [u8; 4],
    pos: usize,
    busy_remaining: u32,
    log: EventLog,
}

#[derive(Default)]
pub struct SimBoard {
    pub red: bool,
    pub green: bool,
    pub beeper: bool,
    pub elapsed_ms: u64,
    log: EventLog,
}

pub fn sim(config: SimConfig) -> (SimTarget, SimBoard) {
    let log = EventLog::default();
    let target = SimTarget {
        config,
        flash: vec![0x00; FLASH_SIZE],
        lock: 0x3c,
        fuses: [0x62, 0xd9, 0xff],
        programming: false,
        enable_attempts: 0,
        commits: vec![],
        page_buffer: vec![None; PAGE_SIZE as usize],
        reset: false,
        frame: [0; 4],
        pos: 0,
        busy_remaining: 0,
        log: log.clone(),
    };
    let board = SimBoard {
        log,
        ..Default::default()
    };
    (target, board)
}

impl SimTarget {
    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn frames(&self) -> Vec<[u8; 4]> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Frame(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Frames with one of the given opcodes, in order.
    pub fn frames_with(&self, opcodes: &[u8]) -> Vec<[u8; 4]> {
        self.frames()
            .into_iter()
            .filter(|f| opcodes.contains(&f[0]))
            .collect()
    }

    /// Every signal played on the board, in order.
    pub fn signals(&self) -> Vec<Signal> {
        let board: Vec<BoardEvent> = self
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Board(b) => Some(b),
                _ => None,
            })
            .collect();

        let mut renderings: Vec<(Signal, Vec<BoardEvent>)> = Signal::ALL
            .iter()
            .map(|&s| (s, render(s)))
            .collect();
        // longest first, one pattern may start with another
        renderings.sort_by_key(|(_, r)| std::cmp::Reverse(r.len()));

        let mut found = vec![];
        let mut i = 0;
        while i < board.len() {
            match renderings
                .iter()
                .find(|(_, r)| board[i..].starts_with(r))
            {
                Some((signal, r)) => {
                    found.push(*signal);
                    i += r.len();
                }
                None => i += 1,
            }
        }
        found
    }

    fn read(&mut self) -> u8 {
        let [op, b1, b2, _] = self.frame;
        if !self.programming {
            return 0x00;
        }
        let word = ((b1 as u32) << 8) | b2 as u32;
        match (op, b1) {
            (0xf0, _) => {
                if self.config.stuck_busy {
                    1
                } else if self.busy_remaining > 0 {
                    self.busy_remaining -= 1;
                    1
                } else {
                    0
                }
            }
            (0x20 | 0x28, _) => {
                let address = word * 2 + (op == 0x28) as u32;
                let value = self.flash[address as usize];
                if self.config.corrupt_read == Some(address) {
                    !value
                } else {
                    value
                }
            }
            (0x30, _) => self.config.signature.get(b2 as usize).copied().unwrap_or(0xff),
            (0x38, _) => 0x8f,
            (0x58, 0x00) => self.lock,
            (0x50, 0x00) => self.fuses[0],
            (0x58, 0x08) => self.fuses[1],
            (0x50, 0x08) => self.fuses[2],
            _ => 0x00,
        }
    }

    fn execute(&mut self) {
        let [op, b1, b2, b3] = self.frame;
        if !self.programming {
            return;
        }
        match (op, b1) {
            (0xac, 0x80) => {
                self.flash.iter_mut().for_each(|b| *b = 0xff);
                self.lock = 0xff;
                self.busy_remaining = self.config.busy_polls;
            }
            (0x40 | 0x48, _) => {
                let words = PAGE_SIZE / 2;
                let offset = (b2 as u32 % words) * 2 + (op == 0x48) as u32;
                self.page_buffer[offset as usize] = Some(b3);
            }
            (0x4c, _) => {
                let word = ((b1 as u32) << 8) | b2 as u32;
                let page_address = (word * 2) & !(PAGE_SIZE - 1);
                let mut staged = vec![];
                for (offset, slot) in self.page_buffer.iter_mut().enumerate() {
                    if let Some(value) = slot.take() {
                        let address = page_address + offset as u32;
                        // programming only clears bits
                        self.flash[address as usize] &= value;
                        staged.push(address);
                    }
                }
                self.commits.push(Commit {
                    page_address,
                    staged,
                });
                self.busy_remaining = self.config.busy_polls;
            }
            (0xac, 0xe0) => self.lock = b3,
            (0xac, 0xa0) => self.fuses[0] = b3,
            (0xac, 0xa8) => self.fuses[1] = b3,
            (0xac, 0xa4) => self.fuses[2] = b3,
            _ => (),
        }
    }
}

impl Transport for SimTarget {
    fn exchange_byte(&mut self, value: u8) -> anyhow::Result<u8> {
        self.frame[self.pos] = value;
        let reply = match self.pos {
            0 => 0x00,
            1 => self.frame[0],
            2 => {
                if self.frame[..2] == [0xac, 0x53] && self.reset {
                    self.enable_attempts += 1;
                    let accepted = self
                        .config
                        .ack_on_attempt
                        .is_some_and(|n| self.enable_attempts >= n);
                    if accepted {
                        self.programming = true;
                        0x53
                    } else {
                        0x00
                    }
                } else if self.programming {
                    self.frame[1]
                } else {
                    0x00
                }
            }
            _ => self.read(),
        };
        self.pos += 1;
        if self.pos == 4 {
            self.pos = 0;
            self.execute();
            self.log.borrow_mut().push(Event::Frame(self.frame));
        }
        Ok(reply)
    }
}

impl ControlLines for SimTarget {
    fn set_reset(&mut self, asserted: bool) -> anyhow::Result<()> {
        if !asserted {
            self.programming = false;
        }
        self.reset = asserted;
        self.log.borrow_mut().push(Event::Reset(asserted));
        Ok(())
    }

    fn set_select(&mut self, asserted: bool) -> anyhow::Result<()> {
        self.log.borrow_mut().push(Event::Select(asserted));
        Ok(())
    }
}

impl Board for SimBoard {
    fn set_led(&mut self, led: Led, on: bool) {
        match led {
            Led::Red => self.red = on,
            Led::Green => self.green = on,
        }
        self.log
            .borrow_mut()
            .push(Event::Board(BoardEvent::Led(led, on)));
    }

    fn set_beeper(&mut self, on: bool) {
        self.beeper = on;
        self.log.borrow_mut().push(Event::Board(BoardEvent::Beeper(on)));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ms += ms as u64;
        self.log.borrow_mut().push(Event::Board(BoardEvent::Delay(ms)));
    }
}

/// Board events `signal::play` produces for `signal`.
pub fn render(signal: Signal) -> Vec<BoardEvent> {
    let mut events = vec![];
    for step in signal.pattern() {
        events.push(BoardEvent::Led(Led::Red, step.red));
        events.push(BoardEvent::Led(Led::Green, step.green));
        events.push(BoardEvent::Beeper(step.beeper));
        if step.hold_ms > 0 {
            events.push(BoardEvent::Delay(step.hold_ms));
        }
    }
    events
}

/// Deterministic test image.
pub fn image(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ 0x5a)
        .collect()
}
