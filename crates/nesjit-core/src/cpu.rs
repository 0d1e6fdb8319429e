//! CPU module - 2A03 (6502 variant) registers, flags, stack and interrupts
//!
//! Instruction semantics live in compiled units; this module owns the state
//! they operate on plus the placeholder interpreter used when no unit covers
//! the program counter. The NES CPU has no decimal mode: the D flag is
//! stored but never consulted.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Base address of the hardware stack page
pub const STACK_BASE: u16 = 0x0100;
/// NMI vector
pub const NMI_VECTOR: u16 = 0xFFFA;
/// Reset vector
pub const RESET_VECTOR: u16 = 0xFFFC;
/// IRQ / BRK vector
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Bus trait for memory and I/O access
pub trait Bus {
    /// Read a byte from the given address
    fn read(&mut self, address: u16) -> u8;
    /// Write a byte to the given address
    fn write(&mut self, address: u16, value: u8);

    /// Little-endian 16-bit read from `address` and `address + 1`
    fn read_u16(&mut self, address: u16) -> u16 {
        let lo = self.read(address);
        let hi = self.read(address.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    /// Little-endian 16-bit write to `address` and `address + 1`
    fn write_u16(&mut self, address: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write(address, lo);
        self.write(address.wrapping_add(1), hi);
    }
}

/// A single processor status flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    Carry,
    Zero,
    InterruptDisable,
    Decimal,
    Break,
    Unused,
    Overflow,
    Negative,
}

impl Flag {
    /// Bit mask of this flag inside the status byte
    pub fn mask(self) -> u8 {
        match self {
            Flag::Carry => StatusFlags::CARRY,
            Flag::Zero => StatusFlags::ZERO,
            Flag::InterruptDisable => StatusFlags::INTERRUPT,
            Flag::Decimal => StatusFlags::DECIMAL,
            Flag::Break => StatusFlags::BREAK,
            Flag::Unused => StatusFlags::UNUSED,
            Flag::Overflow => StatusFlags::OVERFLOW,
            Flag::Negative => StatusFlags::NEGATIVE,
        }
    }
}

/// CPU status flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(u8);

impl StatusFlags {
    pub const CARRY: u8 = 0b00000001;
    pub const ZERO: u8 = 0b00000010;
    pub const INTERRUPT: u8 = 0b00000100;
    pub const DECIMAL: u8 = 0b00001000;
    pub const BREAK: u8 = 0b00010000;
    pub const UNUSED: u8 = 0b00100000;
    pub const OVERFLOW: u8 = 0b01000000;
    pub const NEGATIVE: u8 = 0b10000000;

    pub fn new(flags: u8) -> Self {
        Self(flags)
    }

    /// Raw status byte
    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn get(&self, flag: Flag) -> bool {
        (self.0 & flag.mask()) != 0
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        self.0 = if value {
            self.0 | flag.mask()
        } else {
            self.0 & !flag.mask()
        };
    }

    pub fn carry(&self) -> bool {
        self.get(Flag::Carry)
    }

    pub fn zero(&self) -> bool {
        self.get(Flag::Zero)
    }

    pub fn interrupt(&self) -> bool {
        self.get(Flag::InterruptDisable)
    }

    pub fn overflow(&self) -> bool {
        self.get(Flag::Overflow)
    }

    pub fn negative(&self) -> bool {
        self.get(Flag::Negative)
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u8, char); 8] = [
            (StatusFlags::NEGATIVE, 'N'),
            (StatusFlags::OVERFLOW, 'V'),
            (StatusFlags::UNUSED, 'U'),
            (StatusFlags::BREAK, 'B'),
            (StatusFlags::DECIMAL, 'D'),
            (StatusFlags::INTERRUPT, 'I'),
            (StatusFlags::ZERO, 'Z'),
            (StatusFlags::CARRY, 'C'),
        ];
        for (mask, name) in NAMES {
            let c = if self.0 & mask != 0 { name } else { '-' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// 2A03 CPU registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuRegisters {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
}

/// Frozen register snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CpuState {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub status: u8,
}

impl CpuState {
    pub fn flags(&self) -> StatusFlags {
        StatusFlags::new(self.status)
    }
}

impl fmt::Display for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PC:{:04X} A:{:02X} X:{:02X} Y:{:02X} SP:{:02X} P:{:02X} [{}]",
            self.pc,
            self.a,
            self.x,
            self.y,
            self.sp,
            self.status,
            self.flags()
        )
    }
}

/// CPU state
#[derive(Debug, Clone)]
pub struct Cpu {
    registers: CpuRegisters,
    status: StatusFlags,
    /// Bytes stepped over by the placeholder interpreter
    fallback_steps: u64,
}

impl Cpu {
    /// Create a new CPU instance
    pub fn new() -> Self {
        Self {
            registers: CpuRegisters {
                sp: 0xFF,
                ..CpuRegisters::default()
            },
            status: StatusFlags::new(StatusFlags::INTERRUPT | StatusFlags::UNUSED),
            fallback_steps: 0,
        }
    }

    /// Reset: clear A/X/Y, SP = $FF, set interrupt-disable and load PC
    /// from the reset vector
    pub fn reset(&mut self, bus: &mut impl Bus) {
        self.registers = CpuRegisters {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFF,
            pc: bus.read_u16(RESET_VECTOR),
        };
        self.status = StatusFlags::new(StatusFlags::INTERRUPT | StatusFlags::UNUSED);
        self.fallback_steps = 0;
    }

    pub fn registers(&self) -> &CpuRegisters {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut CpuRegisters {
        &mut self.registers
    }

    pub fn status(&self) -> &StatusFlags {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut StatusFlags {
        &mut self.status
    }

    pub fn pc(&self) -> u16 {
        self.registers.pc
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.registers.pc = pc;
    }

    pub fn fallback_steps(&self) -> u64 {
        self.fallback_steps
    }

    /// Push a byte: write at `$0100 + sp`, then decrement sp
    pub fn push(&mut self, bus: &mut impl Bus, value: u8) {
        bus.write(STACK_BASE | self.registers.sp as u16, value);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
    }

    /// Pop a byte: increment sp, then read at `$0100 + sp`
    pub fn pop(&mut self, bus: &mut impl Bus) -> u8 {
        self.registers.sp = self.registers.sp.wrapping_add(1);
        bus.read(STACK_BASE | self.registers.sp as u16)
    }

    /// Push a 16-bit value high byte first
    pub fn push_u16(&mut self, bus: &mut impl Bus, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.push(bus, hi);
        self.push(bus, lo);
    }

    /// Pop a 16-bit value low byte first
    pub fn pop_u16(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.pop(bus);
        let hi = self.pop(bus);
        u16::from_le_bytes([lo, hi])
    }

    /// Non-maskable interrupt
    pub fn handle_nmi(&mut self, bus: &mut impl Bus) {
        self.interrupt(bus, NMI_VECTOR);
    }

    /// Maskable interrupt, ignored while interrupt-disable is set.
    /// Returns whether the interrupt was taken.
    pub fn handle_irq(&mut self, bus: &mut impl Bus) -> bool {
        if self.status.interrupt() {
            return false;
        }
        self.interrupt(bus, IRQ_VECTOR);
        true
    }

    fn interrupt(&mut self, bus: &mut impl Bus, vector: u16) {
        self.push_u16(bus, self.registers.pc);
        let pushed = (self.status.bits() | StatusFlags::UNUSED) & !StatusFlags::BREAK;
        self.push(bus, pushed);
        self.status.set(Flag::InterruptDisable, true);
        self.registers.pc = bus.read_u16(vector);
    }

    /// Placeholder interpreter: consume the byte at PC and report success
    pub fn fallback_step(&mut self, bus: &mut impl Bus) -> bool {
        let _ = bus.read(self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        self.fallback_steps += 1;
        true
    }

    /// Snapshot of the registers
    pub fn state(&self) -> CpuState {
        CpuState {
            a: self.registers.a,
            x: self.registers.x,
            y: self.registers.y,
            sp: self.registers.sp,
            pc: self.registers.pc,
            status: self.status.bits(),
        }
    }

    /// Restore registers from a snapshot
    pub fn restore(&mut self, state: &CpuState) {
        self.registers = CpuRegisters {
            a: state.a,
            x: state.x,
            y: state.y,
            sp: state.sp,
            pc: state.pc,
        };
        self.status = StatusFlags::new(state.status);
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatBus([u8; 0x10000]);

    impl Bus for FlatBus {
        fn read(&mut self, address: u16) -> u8 {
            self.0[address as usize]
        }

        fn write(&mut self, address: u16, value: u8) {
            self.0[address as usize] = value;
        }
    }

    fn bus() -> Box<FlatBus> {
        Box::new(FlatBus([0; 0x10000]))
    }

    #[test]
    fn test_cpu_reset() {
        let mut bus = bus();
        bus.write_u16(RESET_VECTOR, 0xC000);
        let mut cpu = Cpu::new();
        cpu.registers_mut().a = 9;
        cpu.reset(bus.as_mut());

        assert_eq!(cpu.pc(), 0xC000);
        assert_eq!(cpu.registers().a, 0);
        assert_eq!(cpu.registers().sp, 0xFF);
        assert_eq!(cpu.status().bits(), 0x24);
    }

    #[test]
    fn test_status_flags() {
        let mut flags = StatusFlags::new(0xFF);
        assert!(flags.carry());
        assert!(flags.zero());
        assert!(flags.interrupt());
        assert!(flags.overflow());
        assert!(flags.negative());

        flags.set(Flag::Carry, false);
        assert!(!flags.carry());
        assert_eq!(flags.to_string(), "NVUBDIZ-");
    }

    #[test]
    fn test_stack_wraps() {
        let mut bus = bus();
        let mut cpu = Cpu::new();
        cpu.registers_mut().sp = 0x00;
        cpu.push(bus.as_mut(), 0xAB);
        assert_eq!(cpu.registers().sp, 0xFF);
        assert_eq!(bus.read(0x0100), 0xAB);
        assert_eq!(cpu.pop(bus.as_mut()), 0xAB);
        assert_eq!(cpu.registers().sp, 0x00);
    }

    #[test]
    fn test_nmi_pushes_pc_and_status() {
        let mut bus = bus();
        bus.write_u16(NMI_VECTOR, 0x9000);
        let mut cpu = Cpu::new();
        cpu.set_pc(0x8123);
        *cpu.status_mut() = StatusFlags::new(StatusFlags::CARRY);
        cpu.handle_nmi(bus.as_mut());

        assert_eq!(cpu.pc(), 0x9000);
        assert_eq!(cpu.registers().sp, 0xFC);
        assert_eq!(bus.read(0x01FF), 0x81);
        assert_eq!(bus.read(0x01FE), 0x23);
        assert_eq!(bus.read(0x01FD), 0x21);
        assert!(cpu.status().interrupt());
    }

    #[test]
    fn test_irq_respects_interrupt_disable() {
        let mut bus = bus();
        bus.write_u16(IRQ_VECTOR, 0xA000);
        let mut cpu = Cpu::new();
        cpu.set_pc(0x8000);
        assert!(!cpu.handle_irq(bus.as_mut()));
        assert_eq!(cpu.pc(), 0x8000);

        cpu.status_mut().set(Flag::InterruptDisable, false);
        assert!(cpu.handle_irq(bus.as_mut()));
        assert_eq!(cpu.pc(), 0xA000);
    }

    #[test]
    fn test_fallback_step_advances_one_byte() {
        let mut bus = bus();
        let mut cpu = Cpu::new();
        cpu.set_pc(0xFFFF);
        assert!(cpu.fallback_step(bus.as_mut()));
        assert_eq!(cpu.pc(), 0x0000);
        assert_eq!(cpu.fallback_steps(), 1);
    }
}
