//! Hardware aggregate
//!
//! [`NesHardware`] owns the CPU, PPU, memory bus and both controller ports,
//! and exposes the primitives compiled units are written against: register
//! and flag access, memory through the full system map, stack push/pop and
//! the call/return/interrupt transfers.

use std::fmt;

use crate::bus::MemoryBus;
use crate::controller::{Buttons, Controller};
use crate::cpu::{Bus, Cpu, CpuState, Flag, StatusFlags, IRQ_VECTOR, NMI_VECTOR, RESET_VECTOR};
use crate::error::JitError;
use crate::ir::Register;
use crate::jit::FunctionDispatch;
use crate::ppu::{Ppu, PpuEvents, PpuState};

/// Controller port registers
pub const JOYPAD1: u16 = 0x4016;
pub const JOYPAD2: u16 = 0x4017;

/// Callback receiving PPU transitions as they happen
pub type PpuListener = Box<dyn FnMut(PpuEvents) + Send>;

/// Interrupt and reset vectors as currently mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptVectors {
    pub nmi: u16,
    pub reset: u16,
    pub irq: u16,
}

impl InterruptVectors {
    /// Distinct vector targets in reset, nmi, irq order
    pub fn entries(&self) -> Vec<u16> {
        let mut entries = Vec::with_capacity(3);
        for address in [self.reset, self.nmi, self.irq] {
            if !entries.contains(&address) {
                entries.push(address);
            }
        }
        entries
    }
}

/// Full CPU-visible address space: PPU registers and controller ports are
/// serviced here, everything else goes to [`MemoryBus`]
pub struct SystemBus<'a> {
    ppu: &'a mut Ppu,
    memory: &'a mut MemoryBus,
    controllers: &'a mut [Controller; 2],
}

impl Bus for SystemBus<'_> {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0x2000..=0x3FFF => self.ppu.read_register(address),
            JOYPAD1 => self.controllers[0].read(),
            JOYPAD2 => self.controllers[1].read(),
            _ => self.memory.read(address),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x2000..=0x3FFF => self.ppu.write_register(address, value),
            // One strobe line feeds both ports
            JOYPAD1 => {
                for controller in self.controllers.iter_mut() {
                    controller.write(value);
                }
            }
            _ => self.memory.write(address, value),
        }
    }
}

/// The emulated console
pub struct NesHardware {
    cpu: Cpu,
    ppu: Ppu,
    memory: MemoryBus,
    controllers: [Controller; 2],
    ppu_listeners: Vec<PpuListener>,
}

impl NesHardware {
    /// Hardware with no cartridge inserted
    pub fn new() -> Self {
        Self::with_memory(MemoryBus::new())
    }

    /// Hardware mapping `prg_rom` at $8000
    pub fn with_prg(prg_rom: Vec<u8>) -> Self {
        Self::with_memory(MemoryBus::with_prg(prg_rom))
    }

    fn with_memory(memory: MemoryBus) -> Self {
        Self {
            cpu: Cpu::new(),
            ppu: Ppu::new(),
            memory,
            controllers: [Controller::new(), Controller::new()],
            ppu_listeners: Vec::new(),
        }
    }

    /// Borrow the CPU alongside the system bus
    pub fn split(&mut self) -> (&mut Cpu, SystemBus<'_>) {
        (
            &mut self.cpu,
            SystemBus {
                ppu: &mut self.ppu,
                memory: &mut self.memory,
                controllers: &mut self.controllers,
            },
        )
    }

    /// Reset CPU and PPU; RAM is cleared
    pub fn reset(&mut self) {
        self.memory.reset();
        self.ppu.reset();
        let (cpu, mut bus) = self.split();
        cpu.reset(&mut bus);
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn ppu_mut(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    pub fn memory(&self) -> &MemoryBus {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryBus {
        &mut self.memory
    }

    /// Read through the system map (side effects included)
    pub fn read(&mut self, address: u16) -> u8 {
        self.split().1.read(address)
    }

    pub fn write(&mut self, address: u16, value: u8) {
        self.split().1.write(address, value);
    }

    pub fn read_u16(&mut self, address: u16) -> u16 {
        self.split().1.read_u16(address)
    }

    pub fn register(&self, register: Register) -> u8 {
        let registers = self.cpu.registers();
        match register {
            Register::A => registers.a,
            Register::X => registers.x,
            Register::Y => registers.y,
            Register::Sp => registers.sp,
        }
    }

    pub fn set_register(&mut self, register: Register, value: u8) {
        let registers = self.cpu.registers_mut();
        match register {
            Register::A => registers.a = value,
            Register::X => registers.x = value,
            Register::Y => registers.y = value,
            Register::Sp => registers.sp = value,
        }
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.cpu.status().get(flag)
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.cpu.status_mut().set(flag, value);
    }

    /// Raw status byte
    pub fn status(&self) -> u8 {
        self.cpu.status().bits()
    }

    pub fn set_status(&mut self, value: u8) {
        *self.cpu.status_mut() = StatusFlags::new(value);
    }

    pub fn pc(&self) -> u16 {
        self.cpu.pc()
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.cpu.set_pc(pc);
    }

    pub fn push(&mut self, value: u8) {
        let (cpu, mut bus) = self.split();
        cpu.push(&mut bus, value);
    }

    pub fn pop(&mut self) -> u8 {
        let (cpu, mut bus) = self.split();
        cpu.pop(&mut bus)
    }

    /// Subroutine call: push `pc - 1` high then low, continue at `target`
    pub fn call_function(&mut self, target: u16) {
        let (cpu, mut bus) = self.split();
        let return_point = cpu.pc().wrapping_sub(1);
        cpu.push_u16(&mut bus, return_point);
        cpu.set_pc(target);
    }

    /// Pop low then high and continue one past the popped address
    pub fn return_from_subroutine(&mut self) {
        let (cpu, mut bus) = self.split();
        let popped = cpu.pop_u16(&mut bus);
        cpu.set_pc(popped.wrapping_add(1));
    }

    /// Pop status, then low and high PC, and continue at the popped address
    pub fn return_from_interrupt(&mut self) {
        let (cpu, mut bus) = self.split();
        let status = cpu.pop(&mut bus);
        *cpu.status_mut() = StatusFlags::new((status & !StatusFlags::BREAK) | StatusFlags::UNUSED);
        let pc = cpu.pop_u16(&mut bus);
        cpu.set_pc(pc);
    }

    /// `BRK` with PC at the opcode: push `pc + 2`, push status with B set,
    /// set interrupt-disable and enter the IRQ vector
    pub fn software_interrupt(&mut self) {
        let (cpu, mut bus) = self.split();
        let resume = cpu.pc().wrapping_add(2);
        cpu.push_u16(&mut bus, resume);
        let status = cpu.status().bits() | StatusFlags::BREAK | StatusFlags::UNUSED;
        cpu.push(&mut bus, status);
        cpu.status_mut().set(Flag::InterruptDisable, true);
        let vector = bus.read_u16(IRQ_VECTOR);
        cpu.set_pc(vector);
    }

    pub fn jump_to(&mut self, address: u16) {
        self.cpu.set_pc(address);
    }

    /// `JMP ($nnnn)`: the high byte is fetched without carrying into the
    /// pointer's page
    pub fn jump_indirect(&mut self, pointer: u16) {
        let lo = self.read(pointer);
        let hi = self.read((pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF));
        self.cpu.set_pc(u16::from_le_bytes([lo, hi]));
    }

    pub fn handle_nmi(&mut self) {
        let (cpu, mut bus) = self.split();
        cpu.handle_nmi(&mut bus);
    }

    pub fn handle_irq(&mut self) -> bool {
        let (cpu, mut bus) = self.split();
        cpu.handle_irq(&mut bus)
    }

    /// One CPU step: run the compiled unit covering PC, or fall back to the
    /// placeholder interpreter when dispatch declines
    pub fn execute_cpu_cycle(&mut self, dispatch: &dyn FunctionDispatch) -> Result<bool, JitError> {
        let pc = self.cpu.pc();
        if dispatch.dispatch(pc, self)? {
            return Ok(true);
        }
        let (cpu, mut bus) = self.split();
        Ok(cpu.fallback_step(&mut bus))
    }

    /// One PPU dot; events are forwarded to listeners before returning
    pub fn step_ppu(&mut self) -> PpuEvents {
        let events = self.ppu.step();
        if !events.is_empty() {
            for listener in self.ppu_listeners.iter_mut() {
                listener(events);
            }
        }
        events
    }

    pub fn add_ppu_listener(&mut self, listener: PpuListener) {
        self.ppu_listeners.push(listener);
    }

    /// Controller on `port` (0 or 1)
    pub fn controller(&self, port: usize) -> Option<&Controller> {
        self.controllers.get(port)
    }

    pub fn set_controller_state(&mut self, port: usize, buttons: Buttons) {
        if let Some(controller) = self.controllers.get_mut(port) {
            controller.set_buttons(buttons);
        }
    }

    pub fn interrupt_vectors(&mut self) -> InterruptVectors {
        InterruptVectors {
            nmi: self.memory.read_u16(NMI_VECTOR),
            reset: self.memory.read_u16(RESET_VECTOR),
            irq: self.memory.read_u16(IRQ_VECTOR),
        }
    }

    pub fn cpu_state(&self) -> CpuState {
        self.cpu.state()
    }

    pub fn set_cpu_state(&mut self, state: &CpuState) {
        self.cpu.restore(state);
    }

    pub fn ppu_state(&self) -> PpuState {
        self.ppu.state()
    }

    pub fn set_ppu_state(&mut self, state: &PpuState) {
        self.ppu.restore(state);
    }

    /// One-line summary for diagnostics
    pub fn summary(&self) -> String {
        let ppu = self.ppu.state();
        format!(
            "{} SL:{} CYC:{} VBL:{}",
            self.cpu.state(),
            ppu.scanline,
            ppu.cycle,
            ppu.in_vblank as u8
        )
    }
}

impl Default for NesHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NesHardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NesHardware")
            .field("cpu", &self.cpu.state())
            .field("ppu", &self.ppu.state())
            .field("listeners", &self.ppu_listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::NoCompiledCode;

    fn hardware() -> NesHardware {
        let mut prg = vec![0xEA; 0x4000];
        // reset -> $8000, nmi -> $8100, irq -> $8200
        prg[0x3FFA..].copy_from_slice(&[0x00, 0x81, 0x00, 0x80, 0x00, 0x82]);
        let mut hw = NesHardware::with_prg(prg);
        hw.reset();
        hw
    }

    #[test]
    fn test_reset_uses_vector() {
        let hw = hardware();
        assert_eq!(hw.pc(), 0x8000);
        assert_eq!(hw.status(), 0x24);
        assert_eq!(hw.register(Register::Sp), 0xFF);
    }

    #[test]
    fn test_call_and_return_restore_stack() {
        let mut hw = hardware();
        hw.set_pc(0x8003);
        hw.call_function(0x9000);
        assert_eq!(hw.pc(), 0x9000);
        assert_eq!(hw.register(Register::Sp), 0xFD);
        assert_eq!(hw.read(0x01FF), 0x80);
        assert_eq!(hw.read(0x01FE), 0x02);

        hw.return_from_subroutine();
        assert_eq!(hw.pc(), 0x8003);
        assert_eq!(hw.register(Register::Sp), 0xFF);
    }

    #[test]
    fn test_software_interrupt_and_rti() {
        let mut hw = hardware();
        hw.set_pc(0x8010);
        hw.set_status(0x21);
        hw.software_interrupt();
        assert_eq!(hw.pc(), 0x8200);
        assert_eq!(hw.read(0x01FF), 0x80);
        assert_eq!(hw.read(0x01FE), 0x12);
        assert_eq!(hw.read(0x01FD), 0x31);
        assert!(hw.flag(Flag::InterruptDisable));

        hw.return_from_interrupt();
        assert_eq!(hw.pc(), 0x8012);
        assert_eq!(hw.status(), 0x21);
        assert_eq!(hw.register(Register::Sp), 0xFF);
    }

    #[test]
    fn test_jump_indirect_page_wrap() {
        let mut hw = hardware();
        hw.write(0x02FF, 0x34);
        hw.write(0x0200, 0x12);
        hw.write(0x0300, 0x99);
        hw.jump_indirect(0x02FF);
        assert_eq!(hw.pc(), 0x1234);
    }

    #[test]
    fn test_ppu_registers_mirrored_on_system_bus() {
        let mut hw = hardware();
        hw.write(0x2003, 0x05);
        hw.write(0x3FFC, 0xAB);
        hw.write(0x2003, 0x05);
        assert_eq!(hw.read(0x2004), 0xAB);
    }

    #[test]
    fn test_controller_ports() {
        let mut hw = hardware();
        hw.set_controller_state(0, Buttons::A);
        hw.set_controller_state(1, Buttons::B);
        hw.write(JOYPAD1, 1);
        hw.write(JOYPAD1, 0);
        assert_eq!(hw.read(JOYPAD1), 1);
        assert_eq!(hw.read(JOYPAD2), 0);
        assert_eq!(hw.read(JOYPAD2), 1);
    }

    #[test]
    fn test_fallback_cycle_without_compiled_code() {
        let mut hw = hardware();
        assert!(hw.execute_cpu_cycle(&NoCompiledCode).unwrap());
        assert_eq!(hw.pc(), 0x8001);
    }

    #[test]
    fn test_vectors() {
        let mut hw = hardware();
        let vectors = hw.interrupt_vectors();
        assert_eq!(vectors.reset, 0x8000);
        assert_eq!(vectors.nmi, 0x8100);
        assert_eq!(vectors.irq, 0x8200);
        assert_eq!(vectors.entries(), vec![0x8000, 0x8100, 0x8200]);
    }
}
