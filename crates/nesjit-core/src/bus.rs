//! Memory bus and mapping
//!
//! The NES memory map:
//! $0000-$07FF - 2KB Internal RAM
//! $0800-$1FFF - RAM mirroring (repeats every $0800 bytes)
//! $2000-$3FFF - PPU registers (mirrored every $08 bytes)
//! $4000-$401F - APU and I/O registers
//! $8000-$FFFF - Cartridge PRG ROM
//!
//! [`MemoryBus`] owns RAM and the PRG image. PPU and controller registers
//! are owned by the hardware aggregate, which routes those ranges before
//! falling back to this bus.

use crate::cpu::Bus;

/// RAM size in bytes
pub const RAM_SIZE: usize = 2048;

/// Mask applied to RAM addresses
pub const RAM_MASK: u16 = 0x07FF;

/// 16KB PRG bank
pub const PRG_BANK_SIZE: usize = 0x4000;

/// Fold a $2000-$3FFF address onto its $2000-$2007 register
pub fn ppu_register(address: u16) -> u16 {
    0x2000 | (address & 0x0007)
}

/// Memory bus structure
#[derive(Debug, Clone)]
pub struct MemoryBus {
    ram: [u8; RAM_SIZE],
    prg_rom: Vec<u8>,
}

impl MemoryBus {
    /// Create a bus with no cartridge code
    pub fn new() -> Self {
        Self::with_prg(Vec::new())
    }

    /// Create a bus mapping `prg_rom` at $8000
    pub fn with_prg(prg_rom: Vec<u8>) -> Self {
        Self {
            ram: [0; RAM_SIZE],
            prg_rom,
        }
    }

    /// Replace the cartridge image
    pub fn set_prg(&mut self, prg_rom: Vec<u8>) {
        self.prg_rom = prg_rom;
    }

    pub fn prg_rom(&self) -> &[u8] {
        &self.prg_rom
    }

    pub fn ram(&self) -> &[u8; RAM_SIZE] {
        &self.ram
    }

    /// Clear RAM; the cartridge image is kept
    pub fn reset(&mut self) {
        self.ram = [0; RAM_SIZE];
    }

    /// Read `length` consecutive bytes, wrapping at $FFFF
    pub fn read_range(&mut self, address: u16, length: usize) -> Vec<u8> {
        (0..length)
            .map(|i| self.read(address.wrapping_add(i as u16)))
            .collect()
    }

    fn read_cartridge(&self, address: u16) -> u8 {
        let mut offset = (address - 0x8000) as usize;
        // 16KB images appear at both $8000 and $C000
        if self.prg_rom.len() == PRG_BANK_SIZE {
            offset %= PRG_BANK_SIZE;
        }
        self.prg_rom.get(offset).copied().unwrap_or(0)
    }
}

impl Bus for MemoryBus {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            // $0000-$1FFF - Internal RAM and its mirrors
            0x0000..=0x1FFF => self.ram[(address & RAM_MASK) as usize],
            // $2000-$3FFF - PPU registers, serviced by the hardware aggregate
            0x2000..=0x3FFF => 0,
            // $4000-$401F - APU and I/O (stub)
            0x4000..=0x401F => 0,
            // $8000-$FFFF - Cartridge PRG ROM
            0x8000..=0xFFFF => self.read_cartridge(address),
            _ => 0,
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => {
                self.ram[(address & RAM_MASK) as usize] = value;
            }
            // PRG ROM is write-protected; everything else here is unmapped
            _ => {}
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_mirroring() {
        let mut bus = MemoryBus::new();
        bus.write(0x0000, 0x42);
        assert_eq!(bus.read(0x0800), 0x42);
        assert_eq!(bus.read(0x1800), 0x42);

        bus.write(0x1FFF, 0x17);
        assert_eq!(bus.read(0x07FF), 0x17);
    }

    #[test]
    fn test_prg_16k_mirrored() {
        let mut prg = vec![0; PRG_BANK_SIZE];
        prg[0] = 0xA9;
        prg[PRG_BANK_SIZE - 1] = 0x77;
        let mut bus = MemoryBus::with_prg(prg);
        assert_eq!(bus.read(0x8000), 0xA9);
        assert_eq!(bus.read(0xC000), 0xA9);
        assert_eq!(bus.read(0xFFFF), 0x77);
    }

    #[test]
    fn test_prg_32k_not_mirrored() {
        let mut prg = vec![0; 2 * PRG_BANK_SIZE];
        prg[0] = 1;
        prg[PRG_BANK_SIZE] = 2;
        let mut bus = MemoryBus::with_prg(prg);
        assert_eq!(bus.read(0x8000), 1);
        assert_eq!(bus.read(0xC000), 2);
    }

    #[test]
    fn test_unmapped_and_rom_writes() {
        let mut bus = MemoryBus::with_prg(vec![0x11; PRG_BANK_SIZE]);
        assert_eq!(bus.read(0x5000), 0);
        assert_eq!(bus.read(0x6000), 0);
        bus.write(0x8000, 0x99);
        assert_eq!(bus.read(0x8000), 0x11);
    }

    #[test]
    fn test_u16_little_endian_wraps() {
        let mut bus = MemoryBus::new();
        bus.write_u16(0x07FF, 0xBEEF);
        assert_eq!(bus.read(0x07FF), 0xEF);
        assert_eq!(bus.read(0x0800), 0xBE);
        assert_eq!(bus.read_u16(0x07FF), 0xBEEF);
        assert_eq!(bus.read_range(0x07FF, 2), vec![0xEF, 0xBE]);
    }

    #[test]
    fn test_ppu_register_fold() {
        assert_eq!(ppu_register(0x2000), 0x2000);
        assert_eq!(ppu_register(0x2008), 0x2000);
        assert_eq!(ppu_register(0x3FFF), 0x2007);
    }
}
