//! MCU Chip definition and the identity bytes read from an attached target
use std::fmt;

use anyhow::Result;
use bitfield::bitfield;
use serde::{Deserialize, Serialize};

use crate::protocol::{Command, Fuse};
use crate::transport::Transport;

/// First three signature bytes: vendor, family (flash size), device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature(pub [u8; 3]);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Low, high and extended fuse bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fuses {
    #[serde(deserialize_with = "parse_byte")]
    pub low: u8,
    #[serde(deserialize_with = "parse_byte")]
    pub high: u8,
    #[serde(deserialize_with = "parse_byte")]
    pub extended: u8,
}

impl Fuses {
    pub fn get(&self, fuse: Fuse) -> u8 {
        match fuse {
            Fuse::Low => self.low,
            Fuse::High => self.high,
            Fuse::Extended => self.extended,
        }
    }
}

/// Everything the target tells about itself once programming mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    pub lock: u8,
    /// Signature row 0..=3, the fourth byte is reserved on most parts
    pub signature_row: [u8; 4],
    pub fuses: Fuses,
    pub calibration: u8,
}

impl Identity {
    /// Read all identity bytes. Read-only, legal in any order.
    pub fn read<T: Transport + ?Sized>(transport: &mut T) -> Result<Self> {
        let lock = transport.exchange_last(Command::ReadLock)?;
        let mut signature_row = [0u8; 4];
        for (index, byte) in signature_row.iter_mut().enumerate() {
            *byte = transport.exchange_last(Command::ReadSignature {
                index: index as u8,
            })?;
        }
        let low = transport.exchange_last(Command::ReadFuse(Fuse::Low))?;
        let high = transport.exchange_last(Command::ReadFuse(Fuse::High))?;
        let extended = transport.exchange_last(Command::ReadFuse(Fuse::Extended))?;
        let calibration = transport.exchange_last(Command::ReadCalibration)?;

        let identity = Identity {
            lock,
            signature_row,
            fuses: Fuses {
                low,
                high,
                extended,
            },
            calibration,
        };
        log::debug!("identity: {:02x?}", identity);
        Ok(identity)
    }

    pub fn signature(&self) -> Signature {
        Signature([
            self.signature_row[0],
            self.signature_row[1],
            self.signature_row[2],
        ])
    }
}

bitfield! {
    /// High fuse byte of the ATmega328 family. A fuse bit reads 0 when programmed.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct HighFuse(u8);
    impl Debug;
    pub rstdisbl, _: 7;
    pub dwen, _: 6;
    pub spien, _: 5;
    pub wdton, _: 4;
    pub eesave, _: 3;
    pub u8, bootsz, _: 2, 1;
    pub bootrst, _: 0;
}

impl HighFuse {
    /// Size of the boot section selected by BOOTSZ, in bytes.
    pub fn boot_section_size(&self) -> u32 {
        // 0b11 -> 256 words, each step down doubles
        let words = 256u32 << (3 - self.bootsz() as u32);
        words * 2
    }

    /// Byte address where the boot section starts.
    pub fn boot_section_start(&self, flash_size: u32) -> u32 {
        flash_size.saturating_sub(self.boot_section_size())
    }
}

bitfield! {
    /// Lock bits. `11` in a field means no restriction.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct LockBits(u8);
    impl Debug;
    pub u8, blb1, _: 5, 4;
    pub u8, blb0, _: 3, 2;
    pub u8, lb, _: 1, 0;
}

/// Variant of a family, told apart by the third signature byte
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    #[serde(deserialize_with = "parse_byte")]
    pub device_id: u8,
}

/// MCU Family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub name: String,
    #[serde(deserialize_with = "parse_byte")]
    pub vendor_id: u8,
    #[serde(deserialize_with = "parse_byte")]
    pub family_id: u8,
    pub description: String,
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub flash_size: u32,
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub page_size: u32,
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub bootloader_offset: u32,
    #[serde(deserialize_with = "parse_byte")]
    pub lock: u8,
    pub fuses: Fuses,
    pub variants: Vec<Variant>,
}

/// Represents an MCU chip accepted for programming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chip {
    pub name: String,
    pub signature: Signature,
    pub flash_size: u32,
    pub page_size: u32,
    /// Where the bootloader image goes by default
    pub bootloader_offset: u32,
    /// Lock byte written after programming
    pub lock: u8,
    /// Fuse bytes written after programming
    pub fuses: Fuses,
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.signature)
    }
}

impl Chip {
    pub fn page_mask(&self) -> u32 {
        !(self.page_size - 1)
    }
}

pub struct ChipDB {
    families: Vec<Family>,
}

impl ChipDB {
    pub fn load() -> Result<Self> {
        let db = ChipDB {
            families: vec![serde_yaml::from_str(include_str!(
                "../devices/atmega328.yaml"
            ))?],
        };
        for family in &db.families {
            anyhow::ensure!(
                family.page_size.is_power_of_two() && family.page_size >= 2,
                "{}: page size {} is not a power of two",
                family.name,
                family.page_size
            );
        }
        Ok(db)
    }

    /// The allow-list: only signatures listed here may be programmed.
    pub fn find_chip(&self, signature: Signature) -> Option<Chip> {
        let [vendor_id, family_id, device_id] = signature.0;
        let family = self
            .families
            .iter()
            .find(|f| f.vendor_id == vendor_id && f.family_id == family_id)?;
        log::debug!("Find chip family: {}", family.name);

        let variant = family.variants.iter().find(|v| v.device_id == device_id)?;
        Some(Chip {
            name: variant.name.clone(),
            signature,
            flash_size: family.flash_size,
            page_size: family.page_size,
            bootloader_offset: family.bootloader_offset,
            lock: family.lock,
            fuses: family.fuses,
        })
    }

    pub fn chips(&self) -> impl Iterator<Item = Chip> + '_ {
        self.families.iter().flat_map(move |family| {
            family.variants.iter().filter_map(move |v| {
                self.find_chip(Signature([family.vendor_id, family.family_id, v.device_id]))
            })
        })
    }
}

fn parse_byte<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = parse_address_and_offset(deserializer)?;
    u8::try_from(value).map_err(|_| serde::de::Error::custom(format!("{} is not a byte", value)))
}

fn parse_address_and_offset<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let s: String = serde::Deserialize::deserialize(deserializer)?;
    let invalid = |_| D::Error::custom(format!("error while parsing {:?}", s));
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(invalid)
    } else if let Some(kib) = s
        .strip_suffix("KiB")
        .or_else(|| s.strip_suffix("KB"))
        .or_else(|| s.strip_suffix("K"))
    {
        Ok(1024 * kib.parse::<u32>().map_err(invalid)?)
    } else {
        s.parse().map_err(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        let db = ChipDB::load().unwrap();

        let chip = db.find_chip(Signature([0x1e, 0x95, 0x0f])).unwrap();
        assert_eq!(chip.name, "ATmega328P");
        assert_eq!(chip.page_size, 64);
        assert_eq!(chip.flash_size, 32 * 1024);
        assert_eq!(chip.bootloader_offset, 0x7e00);
        assert_eq!(chip.lock, 0x0f);
        assert_eq!(
            chip.fuses,
            Fuses {
                low: 0xff,
                high: 0xde,
                extended: 0x05
            }
        );

        let chip = db.find_chip(Signature([0x1e, 0x95, 0x14])).unwrap();
        assert_eq!(chip.name, "ATmega328");

        assert!(db.find_chip(Signature([0x1e, 0x93, 0x0b])).is_none());
        assert!(db.find_chip(Signature([0x1e, 0x95, 0x16])).is_none());
        assert!(db.find_chip(Signature([0x00, 0x95, 0x0f])).is_none());
        assert_eq!(db.chips().count(), 2);
    }

    #[test]
    fn test_high_fuse_boot_section() {
        let fuse = HighFuse(0xde);
        assert!(!fuse.spien()); // programmed
        assert!(fuse.rstdisbl());
        assert_eq!(fuse.bootsz(), 0b11);
        assert_eq!(fuse.boot_section_size(), 512);
        assert_eq!(fuse.boot_section_start(32 * 1024), 0x7e00);

        assert_eq!(HighFuse(0xd8).boot_section_start(32 * 1024), 0x7000);
    }

    #[test]
    fn test_lock_bits() {
        let lock = LockBits(0x0f);
        assert_eq!(lock.blb1(), 0b00);
        assert_eq!(lock.blb0(), 0b11);
        assert_eq!(lock.lb(), 0b11);
    }

    #[test]
    fn test_signature_display() {
        assert_eq!(Signature([0x1e, 0x95, 0x0f]).to_string(), "1e950f");
    }
}
