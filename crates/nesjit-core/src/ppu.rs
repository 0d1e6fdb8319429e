//! PPU (Picture Processing Unit) timing and registers
//!
//! Only what the CPU can observe is modelled: the dot/scanline counter,
//! vertical-blank signalling and the eight memory-mapped registers backed by
//! 16KB of VRAM and 256 bytes of OAM. No pixels are produced.
//!
//! Timing: 341 dots per scanline, vblank begins on scanline 241 and the
//! frame wraps back to scanline 0 when scanline 262 is reached.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Dots per scanline
pub const DOTS_PER_SCANLINE: i32 = 341;
/// First vblank scanline
pub const VBLANK_SCANLINE: i32 = 241;
/// Scanlines per frame
pub const SCANLINES_PER_FRAME: i32 = 262;

/// PPU memory sizes
pub const VRAM_SIZE: usize = 16384;
pub const OAM_SIZE: usize = 256;

bitflags! {
    /// Transitions raised by a single [`Ppu::step`], in delivery order
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PpuEvents: u8 {
        const VBLANK_STARTED = 0x01;
        const VBLANK_ENDED = 0x02;
        const FRAME_COMPLETE = 0x04;
    }
}

/// PPU control flags ($2000)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpuCtrl(u8);

impl PpuCtrl {
    pub const NMI_ENABLE: u8 = 0b10000000;
    pub const SPRITE_SIZE: u8 = 0b00100000;
    pub const VRAM_INC: u8 = 0b00000100;
    pub const NAMETABLE: u8 = 0b00000011;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn nmi_enable(&self) -> bool {
        (self.0 & Self::NMI_ENABLE) != 0
    }

    /// Address step applied after each $2007 access
    pub fn vram_increment(&self) -> u16 {
        if (self.0 & Self::VRAM_INC) != 0 {
            32
        } else {
            1
        }
    }
}

/// PPU status flags ($2002)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpuStatus(u8);

impl PpuStatus {
    pub const VBLANK: u8 = 0b10000000;
    pub const SPRITE_ZERO_HIT: u8 = 0b01000000;
    pub const SPRITE_OVERFLOW: u8 = 0b00100000;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn vblank(&self) -> bool {
        (self.0 & Self::VBLANK) != 0
    }

    fn set_vblank(&mut self, on: bool) {
        if on {
            self.0 |= Self::VBLANK;
        } else {
            self.0 &= !Self::VBLANK;
        }
    }
}

/// PPU render mask ($2001)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpuMask(u8);

impl PpuMask {
    pub const RENDER_BG: u8 = 0b00001000;
    pub const RENDER_SPR: u8 = 0b00010000;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn rendering_enabled(&self) -> bool {
        (self.0 & (Self::RENDER_BG | Self::RENDER_SPR)) != 0
    }
}

/// Register snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PpuState {
    pub control: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_address: u8,
    pub vram_address: u16,
    pub scroll_x: u8,
    pub scroll_y: u8,
    pub scanline: i32,
    pub cycle: i32,
    pub in_vblank: bool,
}

/// PPU internal state
#[derive(Debug, Clone)]
pub struct Ppu {
    vram: Box<[u8; VRAM_SIZE]>,
    oam: [u8; OAM_SIZE],
    control: PpuCtrl,
    mask: PpuMask,
    status: PpuStatus,
    oam_address: u8,
    vram_address: u16,
    scroll_x: u8,
    scroll_y: u8,
    /// Shared first/second write latch for $2005 and $2006
    write_toggle: bool,
    read_buffer: u8,
    scanline: i32,
    cycle: i32,
    in_vblank: bool,
    frame_complete: bool,
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            vram: Box::new([0; VRAM_SIZE]),
            oam: [0; OAM_SIZE],
            control: PpuCtrl::default(),
            mask: PpuMask::default(),
            status: PpuStatus::default(),
            oam_address: 0,
            vram_address: 0,
            scroll_x: 0,
            scroll_y: 0,
            write_toggle: false,
            read_buffer: 0,
            scanline: 0,
            cycle: 0,
            in_vblank: false,
            frame_complete: false,
        }
    }

    /// Reset registers and counters; VRAM contents survive
    pub fn reset(&mut self) {
        self.oam = [0; OAM_SIZE];
        self.control = PpuCtrl::default();
        self.mask = PpuMask::default();
        self.status = PpuStatus::default();
        self.oam_address = 0;
        self.vram_address = 0;
        self.scroll_x = 0;
        self.scroll_y = 0;
        self.write_toggle = false;
        self.read_buffer = 0;
        self.scanline = 0;
        self.cycle = 0;
        self.in_vblank = false;
        self.frame_complete = false;
    }

    /// Advance one dot and report the transitions it caused
    pub fn step(&mut self) -> PpuEvents {
        let mut events = PpuEvents::empty();

        self.cycle += 1;
        if self.cycle >= DOTS_PER_SCANLINE {
            self.cycle = 0;
            self.scanline += 1;

            if self.scanline == VBLANK_SCANLINE {
                self.in_vblank = true;
                self.status.set_vblank(true);
                events |= PpuEvents::VBLANK_STARTED;
            } else if self.scanline >= SCANLINES_PER_FRAME {
                self.scanline = 0;
                self.in_vblank = false;
                self.status.set_vblank(false);
                self.frame_complete = true;
                events |= PpuEvents::VBLANK_ENDED | PpuEvents::FRAME_COMPLETE;
            }
        }

        events
    }

    /// Read a register; `address` is folded onto $2000-$2007
    pub fn read_register(&mut self, address: u16) -> u8 {
        match address & 0x0007 {
            // $2002 - PPUSTATUS
            2 => {
                let status = self.status.bits();
                self.status.set_vblank(false);
                self.write_toggle = false;
                status
            }
            // $2004 - OAMDATA
            4 => self.oam[self.oam_address as usize],
            // $2007 - PPUDATA
            7 => {
                let address = self.vram_address & 0x3FFF;
                let value = self.vram[address as usize];
                // Palette reads bypass the buffer
                let result = if address >= 0x3F00 {
                    value
                } else {
                    self.read_buffer
                };
                self.read_buffer = value;
                self.vram_address = self.vram_address.wrapping_add(self.control.vram_increment());
                result
            }
            // Write-only registers read back as 0
            _ => 0,
        }
    }

    /// Write a register; `address` is folded onto $2000-$2007
    pub fn write_register(&mut self, address: u16, value: u8) {
        match address & 0x0007 {
            // $2000 - PPUCTRL
            0 => self.control = PpuCtrl::new(value),
            // $2001 - PPUMASK
            1 => self.mask = PpuMask::new(value),
            // $2003 - OAMADDR
            3 => self.oam_address = value,
            // $2004 - OAMDATA
            4 => {
                self.oam[self.oam_address as usize] = value;
                self.oam_address = self.oam_address.wrapping_add(1);
            }
            // $2005 - PPUSCROLL: X then Y
            5 => {
                if self.write_toggle {
                    self.scroll_y = value;
                } else {
                    self.scroll_x = value;
                }
                self.write_toggle = !self.write_toggle;
            }
            // $2006 - PPUADDR: high then low
            6 => {
                if self.write_toggle {
                    self.vram_address = (self.vram_address & 0xFF00) | value as u16;
                } else {
                    self.vram_address = (self.vram_address & 0x00FF) | ((value as u16 & 0x3F) << 8);
                }
                self.write_toggle = !self.write_toggle;
            }
            // $2007 - PPUDATA
            7 => {
                self.vram[(self.vram_address & 0x3FFF) as usize] = value;
                self.vram_address = self.vram_address.wrapping_add(self.control.vram_increment());
            }
            // $2002 is read-only
            _ => {}
        }
    }

    /// Returns true once per completed frame, clearing the flag
    pub fn is_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    pub fn in_vblank(&self) -> bool {
        self.in_vblank
    }

    pub fn scanline(&self) -> i32 {
        self.scanline
    }

    pub fn cycle(&self) -> i32 {
        self.cycle
    }

    pub fn control(&self) -> PpuCtrl {
        self.control
    }

    pub fn mask(&self) -> PpuMask {
        self.mask
    }

    pub fn status(&self) -> PpuStatus {
        self.status
    }

    /// Direct VRAM access for loaders and debuggers
    pub fn vram(&self) -> &[u8] {
        &self.vram[..]
    }

    pub fn state(&self) -> PpuState {
        PpuState {
            control: self.control.bits(),
            mask: self.mask.bits(),
            status: self.status.bits(),
            oam_address: self.oam_address,
            vram_address: self.vram_address,
            scroll_x: self.scroll_x,
            scroll_y: self.scroll_y,
            scanline: self.scanline,
            cycle: self.cycle,
            in_vblank: self.in_vblank,
        }
    }

    pub fn restore(&mut self, state: &PpuState) {
        self.control = PpuCtrl::new(state.control);
        self.mask = PpuMask::new(state.mask);
        self.status = PpuStatus::new(state.status);
        self.oam_address = state.oam_address;
        self.vram_address = state.vram_address;
        self.scroll_x = state.scroll_x;
        self.scroll_y = state.scroll_y;
        self.scanline = state.scanline;
        self.cycle = state.cycle;
        self.in_vblank = state.in_vblank;
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}
