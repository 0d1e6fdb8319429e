//! Cartridge loading
//!
//! Parses iNES images into PRG and CHR data and exposes the PRG banks as
//! the code regions the decompiler reads from.

use crate::bus::PRG_BANK_SIZE;
use crate::decompiler::CodeRegion;

pub use crate::error::CartridgeError;

/// iNES header size
pub const HEADER_SIZE: usize = 16;
/// Optional trainer size
pub const TRAINER_SIZE: usize = 512;
/// CHR bank size
pub const CHR_BANK_SIZE: usize = 8 * 1024;

/// iNES header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InesHeader {
    /// PRG ROM size in 16KB units
    pub prg_rom_banks: u8,
    /// CHR ROM size in 8KB units
    pub chr_rom_banks: u8,
    pub flags_6: u8,
    pub flags_7: u8,
    /// PRG RAM size in 8KB units
    pub prg_ram_banks: u8,
}

impl InesHeader {
    /// Parse an iNES header from bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, CartridgeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CartridgeError::InvalidHeader("too short"));
        }
        if bytes[0..4] != *b"NES\x1A" {
            return Err(CartridgeError::InvalidHeader("invalid magic"));
        }

        Ok(Self {
            prg_rom_banks: bytes[4],
            chr_rom_banks: bytes[5],
            flags_6: bytes[6],
            flags_7: bytes[7],
            prg_ram_banks: bytes[8],
        })
    }

    /// Mapper number from the two flag nibbles
    pub fn mapper_number(&self) -> u8 {
        (self.flags_6 >> 4) | (self.flags_7 & 0xF0)
    }

    pub fn has_trainer(&self) -> bool {
        (self.flags_6 & 0x04) != 0
    }

    pub fn has_battery(&self) -> bool {
        (self.flags_6 & 0x02) != 0
    }

    pub fn vertical_mirroring(&self) -> bool {
        (self.flags_6 & 0x01) != 0
    }
}

/// A loaded cartridge image
#[derive(Debug, Clone)]
pub struct Cartridge {
    header: InesHeader,
    prg_rom: Vec<u8>,
    chr_rom: Vec<u8>,
}

impl Cartridge {
    /// Parse an iNES image
    pub fn from_rom(rom_data: &[u8]) -> Result<Self, CartridgeError> {
        let header = InesHeader::parse(rom_data)?;
        let mut offset = HEADER_SIZE;

        if header.has_trainer() {
            offset += TRAINER_SIZE;
        }

        let prg_size = header.prg_rom_banks as usize * PRG_BANK_SIZE;
        if prg_size == 0 {
            return Err(CartridgeError::NoProgram);
        }
        let prg_rom = section(rom_data, offset, prg_size, "PRG ROM")?.to_vec();
        offset += prg_size;

        let chr_size = header.chr_rom_banks as usize * CHR_BANK_SIZE;
        let chr_rom = section(rom_data, offset, chr_size, "CHR ROM")?.to_vec();

        Ok(Self {
            header,
            prg_rom,
            chr_rom,
        })
    }

    /// Build a cartridge from a bare PRG image
    pub fn from_prg(prg_rom: Vec<u8>) -> Self {
        Self {
            header: InesHeader {
                prg_rom_banks: (prg_rom.len() / PRG_BANK_SIZE) as u8,
                chr_rom_banks: 0,
                flags_6: 0,
                flags_7: 0,
                prg_ram_banks: 0,
            },
            prg_rom,
            chr_rom: Vec::new(),
        }
    }

    pub fn header(&self) -> &InesHeader {
        &self.header
    }

    pub fn prg_rom(&self) -> &[u8] {
        &self.prg_rom
    }

    pub fn chr_rom(&self) -> &[u8] {
        &self.chr_rom
    }

    pub fn mapper(&self) -> u8 {
        self.header.mapper_number()
    }

    /// Regions the decompiler may read: PRG at $8000, plus its mirror at
    /// $C000 for 16KB images
    pub fn code_regions(&self) -> Vec<CodeRegion> {
        let mut regions = vec![CodeRegion::new(0x8000, self.prg_rom.clone())];
        if self.prg_rom.len() == PRG_BANK_SIZE {
            regions.push(CodeRegion::new(0xC000, self.prg_rom.clone()));
        }
        regions
    }
}

fn section<'a>(
    rom_data: &'a [u8],
    offset: usize,
    size: usize,
    name: &'static str,
) -> Result<&'a [u8], CartridgeError> {
    rom_data
        .get(offset..offset + size)
        .ok_or(CartridgeError::Truncated {
            section: name,
            required: offset + size,
            available: rom_data.len(),
        })
}
