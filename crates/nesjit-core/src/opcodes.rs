//! Official 6502 opcode table
//!
//! The 2A03 decodes the same 151 documented opcodes as a stock 6502.
//! Undocumented opcodes are reported as unknown by [`lookup`].

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Instruction mnemonic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
}

/// Addressing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Relative,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    /// `JMP ($nnnn)`
    Indirect,
    /// `($nn,X)`
    IndexedIndirect,
    /// `($nn),Y`
    IndirectIndexed,
}

impl AddressingMode {
    /// Number of operand bytes following the opcode
    pub fn operand_len(self) -> usize {
        match self {
            AddressingMode::Implied | AddressingMode::Accumulator => 0,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::Relative
            | AddressingMode::IndexedIndirect
            | AddressingMode::IndirectIndexed => 1,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect => 2,
        }
    }
}

/// Decoded opcode properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub opcode: u8,
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    /// Base cycle count, without page-cross or branch-taken penalties
    pub cycles: u8,
}

impl OpcodeInfo {
    /// Instruction length in bytes
    pub fn size(&self) -> usize {
        1 + self.mode.operand_len()
    }

    /// Conditional relative branch
    pub fn is_branch(&self) -> bool {
        self.mode == AddressingMode::Relative
    }

    pub fn is_jump(&self) -> bool {
        self.mnemonic == Mnemonic::Jmp
    }
}

/// Look up an opcode byte, returning `None` for undocumented opcodes
pub fn lookup(opcode: u8) -> Option<OpcodeInfo> {
    use AddressingMode::*;
    use Mnemonic::*;

    let (mnemonic, mode, cycles) = match opcode {
        0x69 => (Adc, Immediate, 2),
        0x65 => (Adc, ZeroPage, 3),
        0x75 => (Adc, ZeroPageX, 4),
        0x6D => (Adc, Absolute, 4),
        0x7D => (Adc, AbsoluteX, 4),
        0x79 => (Adc, AbsoluteY, 4),
        0x61 => (Adc, IndexedIndirect, 6),
        0x71 => (Adc, IndirectIndexed, 5),
        0x29 => (And, Immediate, 2),
        0x25 => (And, ZeroPage, 3),
        0x35 => (And, ZeroPageX, 4),
        0x2D => (And, Absolute, 4),
        0x3D => (And, AbsoluteX, 4),
        0x39 => (And, AbsoluteY, 4),
        0x21 => (And, IndexedIndirect, 6),
        0x31 => (And, IndirectIndexed, 5),
        0x0A => (Asl, Accumulator, 2),
        0x06 => (Asl, ZeroPage, 5),
        0x16 => (Asl, ZeroPageX, 6),
        0x0E => (Asl, Absolute, 6),
        0x1E => (Asl, AbsoluteX, 7),
        0x90 => (Bcc, Relative, 2),
        0xB0 => (Bcs, Relative, 2),
        0xF0 => (Beq, Relative, 2),
        0x30 => (Bmi, Relative, 2),
        0xD0 => (Bne, Relative, 2),
        0x10 => (Bpl, Relative, 2),
        0x50 => (Bvc, Relative, 2),
        0x70 => (Bvs, Relative, 2),
        0x24 => (Bit, ZeroPage, 3),
        0x2C => (Bit, Absolute, 4),
        0x00 => (Brk, Implied, 7),
        0x18 => (Clc, Implied, 2),
        0xD8 => (Cld, Implied, 2),
        0x58 => (Cli, Implied, 2),
        0xB8 => (Clv, Implied, 2),
        0xC9 => (Cmp, Immediate, 2),
        0xC5 => (Cmp, ZeroPage, 3),
        0xD5 => (Cmp, ZeroPageX, 4),
        0xCD => (Cmp, Absolute, 4),
        0xDD => (Cmp, AbsoluteX, 4),
        0xD9 => (Cmp, AbsoluteY, 4),
        0xC1 => (Cmp, IndexedIndirect, 6),
        0xD1 => (Cmp, IndirectIndexed, 5),
        0xE0 => (Cpx, Immediate, 2),
        0xE4 => (Cpx, ZeroPage, 3),
        0xEC => (Cpx, Absolute, 4),
        0xC0 => (Cpy, Immediate, 2),
        0xC4 => (Cpy, ZeroPage, 3),
        0xCC => (Cpy, Absolute, 4),
        0xC6 => (Dec, ZeroPage, 5),
        0xD6 => (Dec, ZeroPageX, 6),
        0xCE => (Dec, Absolute, 6),
        0xDE => (Dec, AbsoluteX, 7),
        0xCA => (Dex, Implied, 2),
        0x88 => (Dey, Implied, 2),
        0x49 => (Eor, Immediate, 2),
        0x45 => (Eor, ZeroPage, 3),
        0x55 => (Eor, ZeroPageX, 4),
        0x4D => (Eor, Absolute, 4),
        0x5D => (Eor, AbsoluteX, 4),
        0x59 => (Eor, AbsoluteY, 4),
        0x41 => (Eor, IndexedIndirect, 6),
        0x51 => (Eor, IndirectIndexed, 5),
        0xE6 => (Inc, ZeroPage, 5),
        0xF6 => (Inc, ZeroPageX, 6),
        0xEE => (Inc, Absolute, 6),
        0xFE => (Inc, AbsoluteX, 7),
        0xE8 => (Inx, Implied, 2),
        0xC8 => (Iny, Implied, 2),
        0x4C => (Jmp, Absolute, 3),
        0x6C => (Jmp, Indirect, 5),
        0x20 => (Jsr, Absolute, 6),
        0xA9 => (Lda, Immediate, 2),
        0xA5 => (Lda, ZeroPage, 3),
        0xB5 => (Lda, ZeroPageX, 4),
        0xAD => (Lda, Absolute, 4),
        0xBD => (Lda, AbsoluteX, 4),
        0xB9 => (Lda, AbsoluteY, 4),
        0xA1 => (Lda, IndexedIndirect, 6),
        0xB1 => (Lda, IndirectIndexed, 5),
        0xA2 => (Ldx, Immediate, 2),
        0xA6 => (Ldx, ZeroPage, 3),
        0xB6 => (Ldx, ZeroPageY, 4),
        0xAE => (Ldx, Absolute, 4),
        0xBE => (Ldx, AbsoluteY, 4),
        0xA0 => (Ldy, Immediate, 2),
        0xA4 => (Ldy, ZeroPage, 3),
        0xB4 => (Ldy, ZeroPageX, 4),
        0xAC => (Ldy, Absolute, 4),
        0xBC => (Ldy, AbsoluteX, 4),
        0x4A => (Lsr, Accumulator, 2),
        0x46 => (Lsr, ZeroPage, 5),
        0x56 => (Lsr, ZeroPageX, 6),
        0x4E => (Lsr, Absolute, 6),
        0x5E => (Lsr, AbsoluteX, 7),
        0xEA => (Nop, Implied, 2),
        0x09 => (Ora, Immediate, 2),
        0x05 => (Ora, ZeroPage, 3),
        0x15 => (Ora, ZeroPageX, 4),
        0x0D => (Ora, Absolute, 4),
        0x1D => (Ora, AbsoluteX, 4),
        0x19 => (Ora, AbsoluteY, 4),
        0x01 => (Ora, IndexedIndirect, 6),
        0x11 => (Ora, IndirectIndexed, 5),
        0x48 => (Pha, Implied, 3),
        0x08 => (Php, Implied, 3),
        0x68 => (Pla, Implied, 4),
        0x28 => (Plp, Implied, 4),
        0x2A => (Rol, Accumulator, 2),
        0x26 => (Rol, ZeroPage, 5),
        0x36 => (Rol, ZeroPageX, 6),
        0x2E => (Rol, Absolute, 6),
        0x3E => (Rol, AbsoluteX, 7),
        0x6A => (Ror, Accumulator, 2),
        0x66 => (Ror, ZeroPage, 5),
        0x76 => (Ror, ZeroPageX, 6),
        0x6E => (Ror, Absolute, 6),
        0x7E => (Ror, AbsoluteX, 7),
        0x40 => (Rti, Implied, 6),
        0x60 => (Rts, Implied, 6),
        0xE9 => (Sbc, Immediate, 2),
        0xE5 => (Sbc, ZeroPage, 3),
        0xF5 => (Sbc, ZeroPageX, 4),
        0xED => (Sbc, Absolute, 4),
        0xFD => (Sbc, AbsoluteX, 4),
        0xF9 => (Sbc, AbsoluteY, 4),
        0xE1 => (Sbc, IndexedIndirect, 6),
        0xF1 => (Sbc, IndirectIndexed, 5),
        0x38 => (Sec, Implied, 2),
        0xF8 => (Sed, Implied, 2),
        0x78 => (Sei, Implied, 2),
        0x85 => (Sta, ZeroPage, 3),
        0x95 => (Sta, ZeroPageX, 4),
        0x8D => (Sta, Absolute, 4),
        0x9D => (Sta, AbsoluteX, 5),
        0x99 => (Sta, AbsoluteY, 5),
        0x81 => (Sta, IndexedIndirect, 6),
        0x91 => (Sta, IndirectIndexed, 6),
        0x86 => (Stx, ZeroPage, 3),
        0x96 => (Stx, ZeroPageY, 4),
        0x8E => (Stx, Absolute, 4),
        0x84 => (Sty, ZeroPage, 3),
        0x94 => (Sty, ZeroPageX, 4),
        0x8C => (Sty, Absolute, 4),
        0xAA => (Tax, Implied, 2),
        0xA8 => (Tay, Implied, 2),
        0xBA => (Tsx, Implied, 2),
        0x8A => (Txa, Implied, 2),
        0x9A => (Txs, Implied, 2),
        0x98 => (Tya, Implied, 2),
        _ => return None,
    };

    Some(OpcodeInfo {
        opcode,
        mnemonic,
        mode,
        cycles,
    })
}

/// All documented opcodes in ascending byte order
pub fn official() -> impl Iterator<Item = OpcodeInfo> {
    (0..=u8::MAX).filter_map(lookup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_official_opcode_count() {
        assert_eq!(official().count(), 151);
    }

    #[test]
    fn test_undocumented_opcodes_are_unknown() {
        for opcode in [0x02, 0x03, 0x1A, 0x80, 0xA3, 0xEB, 0xFF] {
            assert!(lookup(opcode).is_none(), "${:02X}", opcode);
        }
    }

    #[test]
    fn test_sizes() {
        assert_eq!(lookup(0xEA).map(|i| i.size()), Some(1));
        assert_eq!(lookup(0xA9).map(|i| i.size()), Some(2));
        assert_eq!(lookup(0xD0).map(|i| i.size()), Some(2));
        assert_eq!(lookup(0x6C).map(|i| i.size()), Some(3));
        assert_eq!(lookup(0x20).map(|i| i.size()), Some(3));
    }

    #[test]
    fn test_mnemonic_display() {
        assert_eq!(Mnemonic::Lda.to_string(), "LDA");
        assert_eq!("JSR".parse::<Mnemonic>(), Ok(Mnemonic::Jsr));
    }

    #[test]
    fn test_every_mnemonic_is_reachable() {
        let mut seen: Vec<Mnemonic> = official().map(|i| i.mnemonic).collect();
        seen.sort_by_key(|m| m.to_string());
        seen.dedup();
        assert_eq!(seen.len(), 56);
    }
}
