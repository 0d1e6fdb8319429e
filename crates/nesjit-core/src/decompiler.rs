//! Function decompiler
//!
//! Recovers every instruction reachable from an entry address before the
//! function provably ends. Paths end at returns, software interrupts,
//! subroutine calls and indirect jumps. Branch targets and jump operands are
//! followed breadth-first, so the pointer cell of an indirect jump must be
//! mapped code as well.

use std::collections::{BTreeSet, HashSet, VecDeque};

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::opcodes::{self, AddressingMode, Mnemonic};

/// A block of bytes known to contain code, mapped at `base_address`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRegion {
    pub base_address: u16,
    pub bytes: Vec<u8>,
}

impl CodeRegion {
    pub fn new(base_address: u16, bytes: Vec<u8>) -> Self {
        Self {
            base_address,
            bytes,
        }
    }

    /// True when `address` falls inside `[base, base + len)`
    pub fn contains(&self, address: u16) -> bool {
        let base = self.base_address as u32;
        let address = address as u32;
        address >= base && address < base + self.bytes.len() as u32
    }

    fn offset_of(&self, address: u16) -> usize {
        (address as u32 - self.base_address as u32) as usize
    }
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInstruction {
    pub address: u16,
    pub opcode: u8,
    pub mnemonic: Mnemonic,
    pub addressing_mode: AddressingMode,
    pub operand1: Option<u8>,
    pub operand2: Option<u8>,
    /// Resolved branch or jump target. For `JMP (ind)` this is the pointer cell.
    pub target_address: Option<u16>,
    pub is_branch: bool,
    pub cycle_count: u8,
}

impl RawInstruction {
    /// Instruction length in bytes
    pub fn size(&self) -> u16 {
        1 + self.operand1.is_some() as u16 + self.operand2.is_some() as u16
    }

    /// Address of the instruction that follows in memory
    pub fn next_address(&self) -> u16 {
        self.address.wrapping_add(self.size())
    }

    /// The single operand byte, or zero for implied instructions
    pub fn operand_byte(&self) -> u8 {
        self.operand1.unwrap_or(0)
    }

    /// Little-endian operand pair
    pub fn operand_word(&self) -> u16 {
        u16::from_le_bytes([self.operand1.unwrap_or(0), self.operand2.unwrap_or(0)])
    }

    /// Whether decoding should stop following this path after this instruction
    pub fn ends_path(&self) -> bool {
        matches!(
            self.mnemonic,
            Mnemonic::Rts | Mnemonic::Rti | Mnemonic::Brk | Mnemonic::Jsr
        ) || self.addressing_mode == AddressingMode::Indirect
    }
}

/// The result of decompiling one function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompiledFunction {
    pub entry_address: u16,
    pub instructions: Vec<RawInstruction>,
    pub internal_jump_targets: BTreeSet<u16>,
}

impl DecompiledFunction {
    /// Instructions at or after the entry in ascending order, followed by the
    /// ones before the entry, also ascending. The first element is always the
    /// entry instruction.
    pub fn ordered_instructions(&self) -> Vec<&RawInstruction> {
        let mut ordered: Vec<&RawInstruction> = self.instructions.iter().collect();
        ordered.sort_by_key(|i| (i.address < self.entry_address, i.address));
        ordered
    }
}

/// Find the first region containing `address` and decode one instruction there
pub fn decode_at(address: u16, code_regions: &[CodeRegion]) -> Result<RawInstruction, DecodeError> {
    let region = code_regions
        .iter()
        .find(|r| r.contains(address))
        .ok_or(DecodeError::UnmappedAddress { address })?;

    let offset = region.offset_of(address);
    let opcode = region.bytes[offset];
    let info = opcodes::lookup(opcode).ok_or(DecodeError::UnknownOpcode { address, opcode })?;

    let available = region.bytes.len() - offset;
    if available < info.size() {
        return Err(DecodeError::Truncated {
            address,
            mnemonic: info.mnemonic,
            required: info.size(),
            available,
        });
    }

    let operand_len = info.mode.operand_len();
    let operand1 = (operand_len >= 1).then(|| region.bytes[offset + 1]);
    let operand2 = (operand_len >= 2).then(|| region.bytes[offset + 2]);

    let target_address = match (info.mnemonic, info.mode) {
        (_, AddressingMode::Relative) => {
            let displacement = operand1.unwrap_or(0) as i8;
            Some(
                address
                    .wrapping_add(info.size() as u16)
                    .wrapping_add(displacement as u16),
            )
        }
        (Mnemonic::Jmp, _) => Some(u16::from_le_bytes([
            operand1.unwrap_or(0),
            operand2.unwrap_or(0),
        ])),
        _ => None,
    };

    Ok(RawInstruction {
        address,
        opcode,
        mnemonic: info.mnemonic,
        addressing_mode: info.mode,
        operand1,
        operand2,
        target_address,
        is_branch: info.is_branch(),
        cycle_count: info.cycles,
    })
}

/// Decompile the function starting at `entry`
pub fn decompile(entry: u16, code_regions: &[CodeRegion]) -> Result<DecompiledFunction, DecodeError> {
    let mut instructions = Vec::new();
    let mut internal_jump_targets = BTreeSet::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([entry]);

    while let Some(address) = queue.pop_front() {
        if !visited.insert(address) {
            continue;
        }

        let instruction = decode_at(address, code_regions)?;

        if let Some(target) = instruction.target_address {
            internal_jump_targets.insert(target);
            queue.push_back(target);
        }

        if !instruction.ends_path() {
            queue.push_back(instruction.next_address());
        }

        instructions.push(instruction);
    }

    trace!(
        "decompiled ${:04X}: {} instructions, {} jump targets",
        entry,
        instructions.len(),
        internal_jump_targets.len()
    );

    Ok(DecompiledFunction {
        entry_address: entry,
        instructions,
        internal_jump_targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(bytes: &[u8]) -> Vec<CodeRegion> {
        vec![CodeRegion::new(0x8000, bytes.to_vec())]
    }

    #[test]
    fn test_region_bounds() {
        let r = CodeRegion::new(0x8000, vec![0; 4]);
        assert!(r.contains(0x8000));
        assert!(r.contains(0x8003));
        assert!(!r.contains(0x8004));
        assert!(!r.contains(0x7FFF));

        let top = CodeRegion::new(0xFFFE, vec![0; 2]);
        assert!(top.contains(0xFFFF));
    }

    #[test]
    fn test_relative_target_backwards() {
        // $8000: DEX ; $8001: BNE $8000
        let regions = region(&[0xCA, 0xD0, 0xFD, 0x60]);
        let bne = decode_at(0x8001, &regions).unwrap();
        assert_eq!(bne.target_address, Some(0x8000));
        assert!(bne.is_branch);
    }

    #[test]
    fn test_jmp_target_is_little_endian() {
        let regions = region(&[0x4C, 0x34, 0x12]);
        let jmp = decode_at(0x8000, &regions).unwrap();
        assert_eq!(jmp.target_address, Some(0x1234));
        assert_eq!(jmp.operand_word(), 0x1234);
    }

    #[test]
    fn test_first_matching_region_wins() {
        let regions = vec![
            CodeRegion::new(0x8000, vec![0xEA, 0x60]),
            CodeRegion::new(0x8000, vec![0x60]),
        ];
        let first = decode_at(0x8000, &regions).unwrap();
        assert_eq!(first.mnemonic, Mnemonic::Nop);
    }

    #[test]
    fn test_ordered_instructions_start_at_entry() {
        // $8000: RTS ; $8001: BEQ $8000 ; $8003: RTS
        let regions = region(&[0x60, 0xF0, 0xFD, 0x60]);
        let function = decompile(0x8001, &regions).unwrap();
        let addresses: Vec<u16> = function
            .ordered_instructions()
            .iter()
            .map(|i| i.address)
            .collect();
        assert_eq!(addresses, vec![0x8001, 0x8003, 0x8000]);
    }
}
