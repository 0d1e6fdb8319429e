//! Instruction to IR translation
//!
//! [`translate`] is pure: the same instruction and jump-target set always
//! produce the same IR. Read-modify-write instructions go through a scratch
//! variable so the memory operand is read exactly once.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::cpu::{Flag, StatusFlags};
use crate::decompiler::{DecompiledFunction, RawInstruction};
use crate::ir::{BinaryOperator, IrInstruction, LabelId, Register, ShiftKind, UnaryOperator, Value};
use crate::opcodes::{AddressingMode, Mnemonic};

/// Scratch variable used by multi-step translations
const SCRATCH: Value = Value::Variable(0);

const A: Value = Value::Register(Register::A);
const X: Value = Value::Register(Register::X);
const Y: Value = Value::Register(Register::Y);
const SP: Value = Value::Register(Register::Sp);

/// A decoded instruction together with its IR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedInstruction {
    pub original: RawInstruction,
    pub ir: Vec<IrInstruction>,
}

/// Translate every instruction of a function in execution order
pub fn convert_function(function: &DecompiledFunction) -> Vec<ConvertedInstruction> {
    function
        .ordered_instructions()
        .into_iter()
        .map(|instruction| ConvertedInstruction {
            original: instruction.clone(),
            ir: translate(instruction, &function.internal_jump_targets),
        })
        .collect()
}

/// Translate one instruction
pub fn translate(instruction: &RawInstruction, internal_jump_targets: &BTreeSet<u16>) -> Vec<IrInstruction> {
    let mut ir = Vec::new();
    if internal_jump_targets.contains(&instruction.address) {
        ir.push(IrInstruction::Label(LabelId::Instruction(instruction.address)));
    }

    let operand = operand_value(instruction);

    match instruction.mnemonic {
        Mnemonic::Adc => ir.push(IrInstruction::AddWithCarry { operand }),
        Mnemonic::Sbc => {
            // A - M - !C == A + !M + C
            ir.push(IrInstruction::Unary {
                operator: UnaryOperator::Not,
                source: operand,
                destination: SCRATCH,
            });
            ir.push(IrInstruction::AddWithCarry { operand: SCRATCH });
        }
        Mnemonic::And => logical(&mut ir, BinaryOperator::And, operand),
        Mnemonic::Ora => logical(&mut ir, BinaryOperator::Or, operand),
        Mnemonic::Eor => logical(&mut ir, BinaryOperator::Xor, operand),

        Mnemonic::Asl => shift(&mut ir, ShiftKind::ShiftLeft, instruction, operand),
        Mnemonic::Lsr => shift(&mut ir, ShiftKind::ShiftRight, instruction, operand),
        Mnemonic::Rol => shift(&mut ir, ShiftKind::RotateLeft, instruction, operand),
        Mnemonic::Ror => shift(&mut ir, ShiftKind::RotateRight, instruction, operand),

        Mnemonic::Bit => ir.push(IrInstruction::BitTest { operand }),

        Mnemonic::Bcc => branch(&mut ir, instruction, internal_jump_targets, Flag::Carry, false),
        Mnemonic::Bcs => branch(&mut ir, instruction, internal_jump_targets, Flag::Carry, true),
        Mnemonic::Bne => branch(&mut ir, instruction, internal_jump_targets, Flag::Zero, false),
        Mnemonic::Beq => branch(&mut ir, instruction, internal_jump_targets, Flag::Zero, true),
        Mnemonic::Bpl => branch(&mut ir, instruction, internal_jump_targets, Flag::Negative, false),
        Mnemonic::Bmi => branch(&mut ir, instruction, internal_jump_targets, Flag::Negative, true),
        Mnemonic::Bvc => branch(&mut ir, instruction, internal_jump_targets, Flag::Overflow, false),
        Mnemonic::Bvs => branch(&mut ir, instruction, internal_jump_targets, Flag::Overflow, true),

        Mnemonic::Clc => set_flag(&mut ir, Flag::Carry, false),
        Mnemonic::Cld => set_flag(&mut ir, Flag::Decimal, false),
        Mnemonic::Cli => set_flag(&mut ir, Flag::InterruptDisable, false),
        Mnemonic::Clv => set_flag(&mut ir, Flag::Overflow, false),
        Mnemonic::Sec => set_flag(&mut ir, Flag::Carry, true),
        Mnemonic::Sed => set_flag(&mut ir, Flag::Decimal, true),
        Mnemonic::Sei => set_flag(&mut ir, Flag::InterruptDisable, true),

        Mnemonic::Cmp => ir.push(IrInstruction::Compare { left: A, right: operand }),
        Mnemonic::Cpx => ir.push(IrInstruction::Compare { left: X, right: operand }),
        Mnemonic::Cpy => ir.push(IrInstruction::Compare { left: Y, right: operand }),

        Mnemonic::Inc => step_memory(&mut ir, BinaryOperator::Add, operand),
        Mnemonic::Dec => step_memory(&mut ir, BinaryOperator::Subtract, operand),
        Mnemonic::Inx => step_register(&mut ir, BinaryOperator::Add, X),
        Mnemonic::Iny => step_register(&mut ir, BinaryOperator::Add, Y),
        Mnemonic::Dex => step_register(&mut ir, BinaryOperator::Subtract, X),
        Mnemonic::Dey => step_register(&mut ir, BinaryOperator::Subtract, Y),

        Mnemonic::Jmp => {
            let target = instruction.operand_word();
            if instruction.addressing_mode == AddressingMode::Indirect {
                ir.push(IrInstruction::JumpIndirect(target));
            } else if internal_jump_targets.contains(&target) {
                ir.push(IrInstruction::Jump(LabelId::Instruction(target)));
            } else {
                ir.push(IrInstruction::JumpToAddress(target));
            }
        }
        Mnemonic::Jsr => ir.push(IrInstruction::CallFunction {
            target: instruction.operand_word(),
            return_address: instruction.address.wrapping_add(3),
        }),
        Mnemonic::Rts => ir.push(IrInstruction::ReturnFromSubroutine),
        Mnemonic::Rti => ir.push(IrInstruction::ReturnFromInterrupt),
        Mnemonic::Brk => ir.push(IrInstruction::SoftwareInterrupt {
            address: instruction.address,
        }),

        Mnemonic::Lda => load(&mut ir, A, operand),
        Mnemonic::Ldx => load(&mut ir, X, operand),
        Mnemonic::Ldy => load(&mut ir, Y, operand),
        Mnemonic::Sta => store(&mut ir, A, operand),
        Mnemonic::Stx => store(&mut ir, X, operand),
        Mnemonic::Sty => store(&mut ir, Y, operand),

        Mnemonic::Tax => load(&mut ir, X, A),
        Mnemonic::Tay => load(&mut ir, Y, A),
        Mnemonic::Txa => load(&mut ir, A, X),
        Mnemonic::Tya => load(&mut ir, A, Y),
        Mnemonic::Tsx => load(&mut ir, X, SP),
        Mnemonic::Txs => store(&mut ir, X, SP),

        Mnemonic::Pha => ir.push(IrInstruction::PushStackValue(A)),
        Mnemonic::Php => {
            // Pushed copy always has B and the unused bit set
            ir.push(IrInstruction::Binary {
                operator: BinaryOperator::Or,
                left: Value::AllFlags,
                right: Value::Constant(StatusFlags::BREAK | StatusFlags::UNUSED),
                destination: SCRATCH,
            });
            ir.push(IrInstruction::PushStackValue(SCRATCH));
        }
        Mnemonic::Pla => {
            ir.push(IrInstruction::PopStackValue(A));
            ir.push(IrInstruction::UpdateZeroNegative(A));
        }
        Mnemonic::Plp => {
            ir.push(IrInstruction::PopStackValue(SCRATCH));
            ir.push(IrInstruction::Binary {
                operator: BinaryOperator::And,
                left: SCRATCH,
                right: Value::Constant(!StatusFlags::BREAK),
                destination: SCRATCH,
            });
            ir.push(IrInstruction::Binary {
                operator: BinaryOperator::Or,
                left: SCRATCH,
                right: Value::Constant(StatusFlags::UNUSED),
                destination: Value::AllFlags,
            });
        }

        Mnemonic::Nop => {}
    }

    ir
}

/// The value named by an instruction's addressing mode
fn operand_value(instruction: &RawInstruction) -> Value {
    let byte = instruction.operand_byte();
    let word = instruction.operand_word();
    let zero_page = |index| Value::Memory {
        base: byte as u16,
        index,
        single_byte_address: true,
    };
    let absolute = |index| Value::Memory {
        base: word,
        index,
        single_byte_address: false,
    };

    match instruction.addressing_mode {
        AddressingMode::Accumulator | AddressingMode::Implied => A,
        AddressingMode::Immediate | AddressingMode::Relative => Value::Constant(byte),
        AddressingMode::ZeroPage => zero_page(None),
        AddressingMode::ZeroPageX => zero_page(Some(Register::X)),
        AddressingMode::ZeroPageY => zero_page(Some(Register::Y)),
        AddressingMode::Absolute | AddressingMode::Indirect => absolute(None),
        AddressingMode::AbsoluteX => absolute(Some(Register::X)),
        AddressingMode::AbsoluteY => absolute(Some(Register::Y)),
        AddressingMode::IndexedIndirect => Value::IndirectMemory {
            zero_page: byte,
            index: Some(Register::X),
            pre_indexed: true,
        },
        AddressingMode::IndirectIndexed => Value::IndirectMemory {
            zero_page: byte,
            index: Some(Register::Y),
            pre_indexed: false,
        },
    }
}

fn logical(ir: &mut Vec<IrInstruction>, operator: BinaryOperator, operand: Value) {
    ir.push(IrInstruction::Binary {
        operator,
        left: A,
        right: operand,
        destination: A,
    });
    ir.push(IrInstruction::UpdateZeroNegative(A));
}

fn shift(ir: &mut Vec<IrInstruction>, kind: ShiftKind, instruction: &RawInstruction, operand: Value) {
    if instruction.addressing_mode == AddressingMode::Accumulator {
        ir.push(IrInstruction::Shift { kind, target: A });
        return;
    }
    ir.push(IrInstruction::Copy {
        source: operand,
        destination: SCRATCH,
    });
    ir.push(IrInstruction::Shift {
        kind,
        target: SCRATCH,
    });
    ir.push(IrInstruction::Copy {
        source: SCRATCH,
        destination: operand,
    });
}

fn branch(
    ir: &mut Vec<IrInstruction>,
    instruction: &RawInstruction,
    internal_jump_targets: &BTreeSet<u16>,
    flag: Flag,
    taken_when_set: bool,
) {
    let target = instruction.target_address.unwrap_or_else(|| instruction.next_address());
    let condition = Value::Flag(flag);
    let jump = |taken_when_set: bool, label| {
        if taken_when_set {
            IrInstruction::JumpIfNotZero {
                condition,
                target: label,
            }
        } else {
            IrInstruction::JumpIfZero {
                condition,
                target: label,
            }
        }
    };

    if internal_jump_targets.contains(&target) {
        ir.push(jump(taken_when_set, LabelId::Instruction(target)));
    } else {
        let skip = LabelId::Local(instruction.address, 0);
        ir.push(jump(!taken_when_set, skip));
        ir.push(IrInstruction::JumpToAddress(target));
        ir.push(IrInstruction::Label(skip));
    }
}

fn set_flag(ir: &mut Vec<IrInstruction>, flag: Flag, value: bool) {
    ir.push(IrInstruction::Copy {
        source: Value::Constant(value as u8),
        destination: Value::Flag(flag),
    });
}

fn step_memory(ir: &mut Vec<IrInstruction>, operator: BinaryOperator, operand: Value) {
    ir.push(IrInstruction::Binary {
        operator,
        left: operand,
        right: Value::Constant(1),
        destination: SCRATCH,
    });
    ir.push(IrInstruction::Copy {
        source: SCRATCH,
        destination: operand,
    });
    ir.push(IrInstruction::UpdateZeroNegative(SCRATCH));
}

fn step_register(ir: &mut Vec<IrInstruction>, operator: BinaryOperator, register: Value) {
    ir.push(IrInstruction::Binary {
        operator,
        left: register,
        right: Value::Constant(1),
        destination: register,
    });
    ir.push(IrInstruction::UpdateZeroNegative(register));
}

fn load(ir: &mut Vec<IrInstruction>, register: Value, source: Value) {
    ir.push(IrInstruction::Copy {
        source,
        destination: register,
    });
    ir.push(IrInstruction::UpdateZeroNegative(register));
}

fn store(ir: &mut Vec<IrInstruction>, register: Value, destination: Value) {
    ir.push(IrInstruction::Copy {
        source: register,
        destination,
    });
}
