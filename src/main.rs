use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use avrisp::board::ConsoleBoard;
use avrisp::format::read_firmware_from_file;
use avrisp::transport::{DEFAULT_BAUDRATE, SerialTransport};
use avrisp::{ChipDB, Flashing, Plan, Timing};

#[derive(Parser)]
#[command(
    name = "avrisp",
    version,
    about = "Program ATmega328 targets over an ISP serial bridge"
)]
struct Cli {
    /// Serial port of the ISP bridge, the first port found if omitted
    #[arg(short, long, global = true)]
    port: Option<String>,

    #[arg(short, long, global = true, default_value_t = DEFAULT_BAUDRATE)]
    baudrate: u32,

    /// YAML file overriding reset and polling timing
    #[arg(long, global = true, value_name = "FILE")]
    timing: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get info about current connected chip
    Info {},
    /// List the supported chips
    Chips {},
    /// Erase program memory and lock bits
    Erase {},
    /// Erase, write bootloader and application, then lock and set fuses
    Flash {
        /// Application image, written at address 0
        #[arg(short, long)]
        application: PathBuf,
        /// Bootloader image
        #[arg(short = 'B', long)]
        bootloader: Option<PathBuf>,
        /// Bootloader address, defaults to the image's own or the chip's
        #[arg(long, value_parser = parse_u32)]
        bootloader_offset: Option<u32>,
        #[arg(long, value_parser = parse_u8)]
        lock: Option<u8>,
        #[arg(long, value_parser = parse_u8)]
        lfuse: Option<u8>,
        #[arg(long, value_parser = parse_u8)]
        hfuse: Option<u8>,
        #[arg(long, value_parser = parse_u8)]
        efuse: Option<u8>,
    },
    /// Verify flash content
    Verify {
        path: PathBuf,
        /// Start address, defaults to the image's own
        #[arg(long, value_parser = parse_u32)]
        address: Option<u32>,
    },
}

fn parse_u32(s: &str) -> Result<u32, String> {
    if let Some(hex_str) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex_str, 16).map_err(|_| format!("Invalid hex number: {}", s))
    } else {
        s.parse::<u32>().map_err(|_| format!("Invalid number: {}", s))
    }
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let value = parse_u32(s)?;
    u8::try_from(value).map_err(|_| format!("Not a byte: {}", s))
}

fn open_link(cli: &Cli) -> Result<SerialTransport> {
    match &cli.port {
        Some(port) => SerialTransport::open(port, cli.baudrate),
        None => {
            log::debug!("Serial ports: {:?}", SerialTransport::scan_ports()?);
            SerialTransport::open_any(cli.baudrate)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = simplelog::TermLogger::init(
        if cli.verbose {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let timing = match &cli.timing {
        Some(path) => Timing::from_yaml_file(path)?,
        None => Timing::default(),
    };
    let db = ChipDB::load()?;

    match &cli.command {
        Commands::Chips {} => {
            for chip in db.chips() {
                log::info!(
                    "{}: {}KiB, bootloader at 0x{:04x}, lock 0x{:02x}, fuses {:02x} {:02x} {:02x}",
                    chip,
                    chip.flash_size / 1024,
                    chip.bootloader_offset,
                    chip.lock,
                    chip.fuses.low,
                    chip.fuses.high,
                    chip.fuses.extended
                );
            }
        }
        Commands::Info {} => {
            let mut link = open_link(&cli)?;
            let mut board = ConsoleBoard::new();
            let flashing = Flashing::connect(&mut link, &mut board, &timing, &db)?;
            flashing.dump_info();
            flashing.reset()?;
        }
        Commands::Erase {} => {
            let mut link = open_link(&cli)?;
            let mut board = ConsoleBoard::new();
            let mut flashing = Flashing::connect(&mut link, &mut board, &timing, &db)?;
            flashing.erase()?;
            flashing.reset()?;
        }
        Commands::Flash {
            application,
            bootloader,
            bootloader_offset,
            lock,
            lfuse,
            hfuse,
            efuse,
        } => {
            let app = read_firmware_from_file(application)?;
            anyhow::ensure!(
                app.start_address == 0,
                "application image starts at 0x{:04x}, expected 0",
                app.start_address
            );
            log::info!("Application size: {}", app.len());

            let mut plan = Plan::new(vec![], app.data);
            if let Some(path) = bootloader {
                let boot = read_firmware_from_file(path)?;
                log::info!("Bootloader size: {}", boot.len());
                plan.bootloader_offset = bootloader_offset.or(match boot.start_address {
                    0 => None,
                    start => Some(start),
                });
                plan.bootloader = boot.data;
            }
            plan.lock = *lock;
            plan.low_fuse = *lfuse;
            plan.high_fuse = *hfuse;
            plan.extended_fuse = *efuse;

            let mut link = open_link(&cli)?;
            let mut board = ConsoleBoard::new();
            avrisp::sequence::run(&mut link, &mut board, &plan, &timing, &db)?;
        }
        Commands::Verify { path, address } => {
            let firmware = read_firmware_from_file(path)?;
            log::info!("Firmware size: {}", firmware.len());
            let mut link = open_link(&cli)?;
            let mut board = ConsoleBoard::new();
            let mut flashing = Flashing::connect(&mut link, &mut board, &timing, &db)?;
            flashing.verify(address.unwrap_or(firmware.start_address), &firmware.data)?;
            log::info!("Verified!");
            flashing.reset()?;
        }
    }

    Ok(())
}
