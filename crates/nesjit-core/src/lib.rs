//! nesjit core - NES emulation through compiled 6502 functions
//!
//! Functions are recovered from the cartridge image starting at an entry
//! address, translated into a small intermediate representation and compiled
//! into callable units that run directly against the hardware model. The
//! hardware model (CPU registers, PPU timing, memory map and controllers)
//! is the contract compiled code reads and writes.

#![forbid(unsafe_code)]

/// Error types shared across the crate
pub mod error;
/// Official 6502 opcode table
pub mod opcodes;
/// Function boundary recovery from raw code regions
pub mod decompiler;
/// Intermediate representation of decoded instructions
pub mod ir;
/// Translation of one decoded instruction into IR
pub mod translator;
/// Code generation, caching and dispatch of compiled functions
pub mod jit;
/// CPU (2A03) registers, flags, stack and interrupts
pub mod cpu;
/// Memory bus and mapping
pub mod bus;
/// PPU timing and register interface
pub mod ppu;
/// Standard controller shift register
pub mod controller;
/// Hardware aggregate used by compiled code
pub mod hardware;
/// iNES cartridge loading
pub mod cartridge;
/// Emulator configuration
pub mod config;
/// Frame driver and statistics
pub mod emulator;
/// Real-time timing modes
pub mod modes;

pub use error::{DecodeError, EmulatorError, ExecutionError, GenerationError, JitError};
pub use hardware::NesHardware;
pub use jit::JitCompiler;
