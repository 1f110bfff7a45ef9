//! Chip flashing logic.

use crate::Result;
use crate::board::{Board, Led};
use crate::config::Timing;
use crate::constants::BUSY_BIT;
use crate::device::{Chip, ChipDB, Fuses, HighFuse, Identity, LockBits};
use crate::error::Error;
use crate::handshake::Handshake;
use crate::protocol::{Command, Fuse};
use crate::transport::{ControlLines, Transport};

/// A programming session: exists only while the target is in programming
/// mode and has passed the identity check.
pub struct Flashing<'a, T: ?Sized, B: ?Sized> {
    link: &'a mut T,
    board: &'a mut B,
    timing: Timing,
    chip: Chip,
    identity: Identity,
}

impl<'a, T, B> Flashing<'a, T, B>
where
    T: Transport + ControlLines + ?Sized,
    B: Board + ?Sized,
{
    /// Enter programming mode and admit only chips known to `db`.
    pub fn connect(link: &'a mut T, board: &'a mut B, timing: &Timing, db: &ChipDB) -> Result<Self> {
        Handshake::new(timing).run(link, board)?;

        board.set_led(Led::Red, true);
        let identity = Identity::read(link)?;
        let signature = identity.signature();
        let chip = db.find_chip(signature).ok_or_else(|| {
            log::error!("Unsupported chip, signature {}", signature);
            Error::IdentityRejected { signature }
        })?;
        board.set_led(Led::Red, false);
        log::info!("Found chip: {}", chip);

        Ok(Flashing {
            link,
            board,
            timing: timing.clone(),
            chip,
            identity,
        })
    }

    pub fn chip(&self) -> &Chip {
        &self.chip
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn dump_info(&self) {
        let identity = &self.identity;
        let high = HighFuse(identity.fuses.high);
        log::info!(
            "Chip: {} (CodeFlash: {}KiB, Page: {} bytes)",
            self.chip,
            self.chip.flash_size / 1024,
            self.chip.page_size
        );
        log::info!("Signature row: {}", hex::encode(identity.signature_row));
        log::info!("Lock: 0x{:02x} {:?}", identity.lock, LockBits(identity.lock));
        log::info!(
            "Fuses: low 0x{:02x}, high 0x{:02x}, extended 0x{:02x}",
            identity.fuses.low,
            identity.fuses.high,
            identity.fuses.extended
        );
        log::info!(
            "Boot section: 0x{:04x} ({} bytes), reset vector in boot section: {}",
            high.boot_section_start(self.chip.flash_size),
            high.boot_section_size(),
            !high.bootrst()
        );
        log::info!("Calibration: 0x{:02x}", identity.calibration);
    }

    /// Erase all of program memory and clear the lock bits.
    pub fn erase(&mut self) -> Result<()> {
        self.link.transfer(Command::ChipErase)?;
        self.wait_ready(self.timing.erase_poll_ms)?;
        log::info!("Code Flash Erased");
        Ok(())
    }

    /// Write `data` to program memory at `address` and read every byte back.
    ///
    /// Bytes are staged into the page buffer one at a time; a page is
    /// committed once its last byte is staged, or when the data ends inside it.
    pub fn program(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.check_bounds(address, data.len())?;
        if data.is_empty() {
            log::debug!("Nothing to program at 0x{:04x}", address);
            return Ok(());
        }

        let page_size = self.chip.page_size;
        let end = address + data.len() as u32;
        self.board.progress(0, data.len());
        for (n, (addr, &byte)) in (address..end).zip(data).enumerate() {
            self.link
                .transfer(Command::load_page(addr, page_size, byte))?;
            if addr % page_size == page_size - 1 {
                self.commit_page(addr & self.chip.page_mask())?;
                self.board.progress(n + 1, data.len());
            }
        }
        if end % page_size != 0 {
            self.commit_page((end - 1) & self.chip.page_mask())?;
        }
        self.board.progress(data.len(), data.len());
        log::info!("Programmed {} bytes at 0x{:04x}", data.len(), address);

        self.verify(address, data)?;
        log::info!("Verified {} bytes at 0x{:04x}", data.len(), address);
        Ok(())
    }

    /// Compare program memory at `address` against `data`, stop at the first difference.
    pub fn verify(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.check_bounds(address, data.len())?;
        for (addr, &expected) in (address..).zip(data) {
            let found = self.link.exchange_last(Command::read_program(addr))?;
            if found != expected {
                log::error!(
                    "Mismatch at 0x{:04x}: expected 0x{:02x}, found 0x{:02x}",
                    addr,
                    expected,
                    found
                );
                return Err(Error::VerificationMismatch {
                    address: addr,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Lock bits are written without read-back.
    pub fn write_lock(&mut self, lock: u8) -> Result<()> {
        self.link.transfer(Command::WriteLock(lock))?;
        log::info!("Lock bits set to 0x{:02x}", lock);
        Ok(())
    }

    /// Write low, high and extended fuse, in that order, without read-back.
    pub fn write_fuses(&mut self, fuses: &Fuses) -> Result<()> {
        for fuse in Fuse::ALL {
            let value = fuses.get(fuse);
            self.link.transfer(Command::WriteFuse(fuse, value))?;
            log::info!("Fuse {} set to 0x{:02x}", fuse, value);
        }
        Ok(())
    }

    /// Leave programming mode: deselect and release reset so the target runs.
    pub fn reset(mut self) -> Result<()> {
        self.link.set_select(false)?;
        self.link.set_reset(false)?;
        log::info!("Device reset");
        Ok(())
    }

    pub(crate) fn check_bounds(&self, address: u32, len: usize) -> Result<()> {
        if address as u64 + len as u64 > self.chip.flash_size as u64 {
            return Err(Error::OutOfBounds {
                address,
                len,
                flash_size: self.chip.flash_size,
            });
        }
        Ok(())
    }

    fn commit_page(&mut self, page_address: u32) -> Result<()> {
        log::debug!("Commit page 0x{:04x}", page_address);
        self.link.transfer(Command::write_page(page_address))?;
        self.wait_ready(self.timing.page_poll_ms)
    }

    /// Poll the busy flag, blinking green with `period_ms` while it is set.
    fn wait_ready(&mut self, period_ms: u32) -> Result<()> {
        let mut waited_ms = 0u32;
        loop {
            let status = self.link.exchange_last(Command::PollReady)?;
            if status & BUSY_BIT == 0 {
                return Ok(());
            }
            if waited_ms >= self.timing.ready_timeout_ms {
                log::error!("Target busy for {} ms", waited_ms);
                return Err(Error::FlashTimeout { waited_ms });
            }
            self.board.set_led(Led::Green, true);
            self.board.delay_ms(period_ms);
            self.board.set_led(Led::Green, false);
            self.board.delay_ms(period_ms);
            waited_ms = waited_ms.saturating_add(period_ms.saturating_mul(2).max(1));
        }
    }
}
