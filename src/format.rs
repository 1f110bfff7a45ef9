//! Firmware file formats
use std::str;
use std::{borrow::Cow, path::Path};

use anyhow::Result;
use object::{
    Endianness, elf::FileHeader32, elf::PT_LOAD, read::elf::FileHeader, read::elf::ProgramHeader,
};

/// avr-gcc maps SRAM and EEPROM above this in the ELF address space,
/// neither lives in program memory.
const AVR_DATA_SPACE: u64 = 0x80_0000;

/// Widest address span an image may cover, the whole program memory space.
const MAX_IMAGE_SPAN: u32 = AVR_DATA_SPACE as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareFormat {
    PlainHex,
    IntelHex,
    ELF,
    Binary,
}

/// A contiguous program memory image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Firmware {
    /// Program memory address of `data[0]`. Only Intel HEX and ELF carry one.
    pub start_address: u32,
    pub data: Vec<u8>,
}

impl Firmware {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub fn read_firmware_from_file<P: AsRef<Path>>(path: P) -> Result<Firmware> {
    let p = path.as_ref();
    let raw = std::fs::read(p)?;

    let format = guess_format(p, &raw);
    log::info!("Read {} as {:?} format", p.display(), format);
    match format {
        FirmwareFormat::PlainHex => Ok(Firmware {
            start_address: 0,
            data: read_hex(str::from_utf8(&raw)?)?,
        }),
        FirmwareFormat::IntelHex => read_ihex(str::from_utf8(&raw)?),
        FirmwareFormat::ELF => objcopy_binary(&raw),
        FirmwareFormat::Binary => Ok(Firmware {
            start_address: 0,
            data: raw,
        }),
    }
}

pub fn guess_format(path: &Path, raw: &[u8]) -> FirmwareFormat {
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .to_lowercase();
    if ["ihex", "ihe", "h86", "hex", "a43", "a90"].contains(&&*ext) {
        return FirmwareFormat::IntelHex;
    }

    if raw.starts_with(&[0x7f, b'E', b'L', b'F']) {
        FirmwareFormat::ELF
    } else if raw.first() == Some(&b':')
        && raw
            .iter()
            .all(|&c| c.is_ascii_hexdigit() || c == b':' || c == b'\n' || c == b'\r')
    {
        FirmwareFormat::IntelHex
    } else if !raw.is_empty()
        && raw
            .iter()
            .all(|&c| c.is_ascii_hexdigit() || c.is_ascii_whitespace())
    {
        FirmwareFormat::PlainHex
    } else {
        FirmwareFormat::Binary
    }
}

pub fn read_hex(data: &str) -> Result<Vec<u8>> {
    let digits: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(hex::decode(digits)?)
}

pub fn read_ihex(data: &str) -> Result<Firmware> {
    use ihex::Record;

    let mut base_address = 0;

    let mut records = vec![];
    for record in ihex::Reader::new(data) {
        let record = record?;
        use Record::*;
        match record {
            Data { offset, value } => {
                let offset = base_address + offset as u32;

                records.push((offset, value.into()));
            }
            EndOfFile => (),
            ExtendedSegmentAddress(address) => {
                base_address = (address as u32) * 16;
            }
            StartSegmentAddress { .. } => (),
            ExtendedLinearAddress(address) => {
                base_address = (address as u32) << 16;
            }
            StartLinearAddress(_) => (),
        };
    }
    merge_sections(records)
}

/// Simulates `avr-objcopy -O binary -R .eeprom`.
pub fn objcopy_binary(elf_data: &[u8]) -> Result<Firmware> {
    let file_kind = object::FileKind::parse(elf_data)?;

    match file_kind {
        object::FileKind::Elf32 => (),
        _ => anyhow::bail!("cannot read file as ELF32 format"),
    }
    let elf_header = FileHeader32::<Endianness>::parse(elf_data)?;

    let mut sections = vec![];

    let endian = elf_header.endian()?;

    for segment in elf_header.program_headers(endian, elf_data)? {
        // the load address, `.data` is copied from here to SRAM at startup
        let p_paddr: u64 = segment.p_paddr(endian).into();
        let p_vaddr: u64 = segment.p_vaddr(endian).into();

        let segment_data = segment
            .data(endian, elf_data)
            .map_err(|_| anyhow::format_err!("Failed to access data for an ELF segment."))?;
        if segment_data.is_empty() || segment.p_type(endian) != PT_LOAD {
            continue;
        }
        if p_paddr >= AVR_DATA_SPACE {
            log::debug!("Skipping non-flash segment at {:#08x}", p_paddr);
            continue;
        }
        log::info!(
            "Found loadable segment, physical address: {:#06x}, virtual address: {:#08x}, size: {:#x}",
            p_paddr,
            p_vaddr,
            segment_data.len()
        );
        sections.push((p_paddr as u32, Cow::Borrowed(segment_data)));
    }

    if sections.is_empty() {
        anyhow::bail!("no program memory segment in ELF file");
    }
    log::debug!("found {} segments", sections.len());
    merge_sections(sections)
}

/// Lay out sections by address, gaps are filled with the erased value 0xff.
fn merge_sections(mut sections: Vec<(u32, Cow<[u8]>)>) -> Result<Firmware> {
    sections.sort(); // order by start address

    let Some(&(start_address, _)) = sections.first() else {
        anyhow::bail!("firmware contains no data");
    };
    let mut end_address = start_address;
    for (addr, sect) in &sections {
        let end = u32::try_from(sect.len())
            .ok()
            .and_then(|len| addr.checked_add(len))
            .ok_or_else(|| anyhow::format_err!("data at 0x{:08x} runs past 4GiB", addr))?;
        end_address = end_address.max(end);
    }
    anyhow::ensure!(
        end_address - start_address <= MAX_IMAGE_SPAN,
        "firmware spans 0x{:08x}..0x{:08x}, more than program memory can hold",
        start_address,
        end_address
    );

    let mut data = vec![0xffu8; (end_address - start_address) as usize];
    for (addr, sect) in &sections {
        let sect_start = (addr - start_address) as usize;
        let sect_end = sect_start + sect.len();
        anyhow::ensure!(
            data[sect_start..sect_end].iter().all(|&b| b == 0xff),
            "overlapping data at 0x{:04x}",
            addr
        );
        data[sect_start..sect_end].copy_from_slice(sect);
    }
    Ok(Firmware {
        start_address,
        data,
    })
}
