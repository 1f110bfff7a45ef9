//! The complete programming run: erase, images, lock, fuses, in that order.

use crate::Result;
use crate::board::Board;
use crate::config::Timing;
use crate::device::{Chip, ChipDB, Fuses, HighFuse, Identity};
use crate::flashing::Flashing;
use crate::signal::{self, Signal};
use crate::transport::{ControlLines, Transport};

/// What to write. Unset values fall back to the chip's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub bootloader: Vec<u8>,
    pub bootloader_offset: Option<u32>,
    pub application: Vec<u8>,
    pub lock: Option<u8>,
    pub low_fuse: Option<u8>,
    pub high_fuse: Option<u8>,
    pub extended_fuse: Option<u8>,
}

impl Plan {
    pub fn new(bootloader: Vec<u8>, application: Vec<u8>) -> Self {
        Plan {
            bootloader,
            application,
            ..Default::default()
        }
    }

    pub fn bootloader_offset(&self, chip: &Chip) -> u32 {
        self.bootloader_offset.unwrap_or(chip.bootloader_offset)
    }

    pub fn lock(&self, chip: &Chip) -> u8 {
        self.lock.unwrap_or(chip.lock)
    }

    pub fn fuses(&self, chip: &Chip) -> Fuses {
        Fuses {
            low: self.low_fuse.unwrap_or(chip.fuses.low),
            high: self.high_fuse.unwrap_or(chip.fuses.high),
            extended: self.extended_fuse.unwrap_or(chip.fuses.extended),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub chip: Chip,
    /// Identity as read before erasing.
    pub identity: Identity,
    pub bytes_programmed: usize,
    pub lock: u8,
    pub fuses: Fuses,
}

/// Run the whole sequence against one target and signal the result on `board`.
///
/// Exactly one signal is played: success after the last fuse, or the
/// pattern of the first fault. Nothing after a fault is attempted.
pub fn run<T, B>(
    link: &mut T,
    board: &mut B,
    plan: &Plan,
    timing: &Timing,
    db: &ChipDB,
) -> Result<Report>
where
    T: Transport + ControlLines + ?Sized,
    B: Board + ?Sized,
{
    let result = execute(link, board, plan, timing, db);
    match &result {
        Ok(report) => {
            log::info!(
                "{} programmed, {} bytes written",
                report.chip,
                report.bytes_programmed
            );
            signal::play(board, Signal::Success);
        }
        Err(err) => {
            log::error!("Programming failed: {}", err);
            if let Some(signal) = err.signal() {
                signal::play(board, signal);
            }
        }
    }
    result
}

fn execute<T, B>(
    link: &mut T,
    board: &mut B,
    plan: &Plan,
    timing: &Timing,
    db: &ChipDB,
) -> Result<Report>
where
    T: Transport + ControlLines + ?Sized,
    B: Board + ?Sized,
{
    let mut flashing = Flashing::connect(link, board, timing, db)?;
    let chip = flashing.chip().clone();
    let identity = *flashing.identity();

    let bootloader_offset = plan.bootloader_offset(&chip);
    let lock = plan.lock(&chip);
    let fuses = plan.fuses(&chip);

    // refuse before erasing anything
    flashing.check_bounds(bootloader_offset, plan.bootloader.len())?;
    flashing.check_bounds(0, plan.application.len())?;
    if !plan.bootloader.is_empty() {
        if plan.application.len() as u32 > bootloader_offset {
            log::warn!(
                "Application ({} bytes) runs into the bootloader at 0x{:04x}",
                plan.application.len(),
                bootloader_offset
            );
        }
        let boot_start = HighFuse(fuses.high).boot_section_start(chip.flash_size);
        if boot_start != bootloader_offset {
            log::warn!(
                "Bootloader at 0x{:04x}, but high fuse 0x{:02x} puts the boot section at 0x{:04x}",
                bootloader_offset,
                fuses.high,
                boot_start
            );
        }
    }

    flashing.erase()?;
    flashing.program(bootloader_offset, &plan.bootloader)?;
    flashing.program(0, &plan.application)?;
    flashing.write_lock(lock)?;
    flashing.write_fuses(&fuses)?;
    flashing.reset()?;

    Ok(Report {
        chip,
        identity,
        bytes_programmed: plan.bootloader.len() + plan.application.len(),
        lock,
        fuses,
    })
}
