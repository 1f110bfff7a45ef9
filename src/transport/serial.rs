//! Serial byte-bridge transportation.
//!
//! The bridge clocks every byte it receives out on its SPI master and sends
//! back the byte clocked in. DTR drives the target reset, RTS its select line.
use std::io::{Read, Write};
use std::time::Duration;

use anyhow::{Error, Result};
use serialport::SerialPort;

use super::{ControlLines, Transport};

const SERIAL_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_BAUDRATE: u32 = 115200;

pub struct SerialTransport {
    serial_port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn scan_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    pub fn open(port: &str, baudrate: u32) -> Result<Self> {
        log::info!("Opening serial port: \"{}\" @ {} baud", port, baudrate);
        let port = serialport::new(port, baudrate)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()?;
        Ok(SerialTransport { serial_port: port })
    }

    pub fn open_nth(nth: usize, baudrate: u32) -> Result<Self> {
        let ports = serialport::available_ports()?;

        match ports.get(nth) {
            Some(port) => Self::open(&port.port_name, baudrate),
            None => Err(Error::msg("No serial ports found!")),
        }
    }

    pub fn open_any(baudrate: u32) -> Result<Self> {
        Self::open_nth(0, baudrate)
    }
}

impl Transport for SerialTransport {
    fn exchange_byte(&mut self, value: u8) -> Result<u8> {
        self.serial_port.write_all(&[value])?;
        self.serial_port.flush()?;

        let mut buf = [0u8; 1];
        self.serial_port.read_exact(&mut buf)?;
        Ok(buf[0])
    }
}

impl ControlLines for SerialTransport {
    fn set_reset(&mut self, asserted: bool) -> Result<()> {
        self.serial_port.write_data_terminal_ready(asserted)?;
        Ok(())
    }

    fn set_select(&mut self, asserted: bool) -> Result<()> {
        self.serial_port.write_request_to_send(asserted)?;
        Ok(())
    }
}
