//! Intermediate representation
//!
//! A translated instruction is a short list of [`IrInstruction`]s operating
//! on [`Value`]s. Values name every piece of state a 6502 instruction can
//! touch; instructions are either plain data movement, flag-producing
//! arithmetic, unit-local control flow or transfers to the hardware
//! call/return/interrupt primitives.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumDiscriminants};

use crate::cpu::Flag;

/// CPU register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Register {
    A,
    X,
    Y,
    #[strum(serialize = "SP")]
    Sp,
}

/// Operand or destination of an IR instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Constant(u8),
    Register(Register),
    /// Single flag as 0 or 1
    Flag(Flag),
    /// Whole status byte
    AllFlags,
    /// `base + index`. With `single_byte_address` the sum wraps inside the
    /// zero page.
    Memory {
        base: u16,
        index: Option<Register>,
        single_byte_address: bool,
    },
    /// `($zp,X)` when `pre_indexed`, otherwise `($zp),Y`
    IndirectMemory {
        zero_page: u8,
        index: Option<Register>,
        pre_indexed: bool,
    },
    /// Unit-local scratch byte
    Variable(u8),
}

impl Value {
    pub fn absolute(address: u16) -> Self {
        Value::Memory {
            base: address,
            index: None,
            single_byte_address: false,
        }
    }

    /// Whether the value can be written to
    pub fn is_writable(&self) -> bool {
        !matches!(self, Value::Constant(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Constant(v) => write!(f, "#${:02X}", v),
            Value::Register(r) => write!(f, "{}", r),
            Value::Flag(flag) => write!(f, "{:?}", flag),
            Value::AllFlags => write!(f, "P"),
            Value::Memory {
                base,
                index,
                single_byte_address,
            } => {
                if *single_byte_address {
                    write!(f, "${:02X}", base)?;
                } else {
                    write!(f, "${:04X}", base)?;
                }
                match index {
                    Some(r) => write!(f, ",{}", r),
                    None => Ok(()),
                }
            }
            Value::IndirectMemory {
                zero_page,
                index,
                pre_indexed,
            } => match (index, pre_indexed) {
                (Some(r), true) => write!(f, "(${:02X},{})", zero_page, r),
                (Some(r), false) => write!(f, "(${:02X}),{}", zero_page, r),
                (None, _) => write!(f, "(${:02X})", zero_page),
            },
            Value::Variable(i) => write!(f, "var{}", i),
        }
    }
}

/// Binary operators. Arithmetic wraps and never touches flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum BinaryOperator {
    And,
    Or,
    Xor,
    Add,
    Subtract,
    /// 1 when equal, else 0
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum UnaryOperator {
    /// Bitwise complement
    Not,
}

/// Shift and rotate flavours; all update C, Z and N
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ShiftKind {
    ShiftLeft,
    ShiftRight,
    RotateLeft,
    RotateRight,
}

/// Label inside one compiled unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LabelId {
    /// Start of the instruction at this address
    Instruction(u16),
    /// Local label private to the instruction at this address
    Local(u16, u8),
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelId::Instruction(address) => write!(f, "L_{:04X}", address),
            LabelId::Local(address, n) => write!(f, "L_{:04X}_{}", address, n),
        }
    }
}

/// One IR micro-operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(IrKind), derive(Hash, Display, Serialize, Deserialize))]
pub enum IrInstruction {
    Copy {
        source: Value,
        destination: Value,
    },
    Unary {
        operator: UnaryOperator,
        source: Value,
        destination: Value,
    },
    Binary {
        operator: BinaryOperator,
        left: Value,
        right: Value,
        destination: Value,
    },
    /// `A = A + operand + C`, updating C, V, Z and N
    AddWithCarry {
        operand: Value,
    },
    /// Compare `left - right`, updating C, Z and N
    Compare {
        left: Value,
        right: Value,
    },
    /// Shift or rotate `target` in place, updating C, Z and N
    Shift {
        kind: ShiftKind,
        target: Value,
    },
    /// `BIT`: Z from `A & operand`, N and V from the operand
    BitTest {
        operand: Value,
    },
    /// Set Z and N from a value
    UpdateZeroNegative(Value),
    Label(LabelId),
    Jump(LabelId),
    JumpIfZero {
        condition: Value,
        target: LabelId,
    },
    JumpIfNotZero {
        condition: Value,
        target: LabelId,
    },
    PushStackValue(Value),
    PopStackValue(Value),
    /// Set PC to `return_address`, then run the hardware call primitive
    CallFunction {
        target: u16,
        return_address: u16,
    },
    /// Leave the unit with PC set to the address
    JumpToAddress(u16),
    /// `JMP ($nnnn)` through the pointer at the address, with the 6502
    /// page-wrap quirk
    JumpIndirect(u16),
    ReturnFromSubroutine,
    ReturnFromInterrupt,
    /// `BRK` at `address`
    SoftwareInterrupt {
        address: u16,
    },
    /// Host-injected behaviour keyed by `tag`
    HookPoint {
        tag: u32,
    },
}

impl IrInstruction {
    pub fn kind(&self) -> IrKind {
        IrKind::from(self)
    }

    /// Control never falls through past this instruction
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            IrInstruction::Jump(_)
                | IrInstruction::CallFunction { .. }
                | IrInstruction::JumpToAddress(_)
                | IrInstruction::JumpIndirect(_)
                | IrInstruction::ReturnFromSubroutine
                | IrInstruction::ReturnFromInterrupt
                | IrInstruction::SoftwareInterrupt { .. }
        )
    }
}

impl fmt::Display for IrInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrInstruction::Copy {
                source,
                destination,
            } => write!(f, "{} = {}", destination, source),
            IrInstruction::Unary {
                operator,
                source,
                destination,
            } => write!(f, "{} = {} {}", destination, operator, source),
            IrInstruction::Binary {
                operator,
                left,
                right,
                destination,
            } => write!(f, "{} = {} {} {}", destination, left, operator, right),
            IrInstruction::AddWithCarry { operand } => write!(f, "adc {}", operand),
            IrInstruction::Compare { left, right } => write!(f, "cmp {}, {}", left, right),
            IrInstruction::Shift { kind, target } => write!(f, "{} {}", kind, target),
            IrInstruction::BitTest { operand } => write!(f, "bit {}", operand),
            IrInstruction::UpdateZeroNegative(v) => write!(f, "zn {}", v),
            IrInstruction::Label(label) => write!(f, "{}:", label),
            IrInstruction::Jump(label) => write!(f, "goto {}", label),
            IrInstruction::JumpIfZero { condition, target } => {
                write!(f, "if {} == 0 goto {}", condition, target)
            }
            IrInstruction::JumpIfNotZero { condition, target } => {
                write!(f, "if {} != 0 goto {}", condition, target)
            }
            IrInstruction::PushStackValue(v) => write!(f, "push {}", v),
            IrInstruction::PopStackValue(v) => write!(f, "pop {}", v),
            IrInstruction::CallFunction {
                target,
                return_address,
            } => write!(f, "call ${:04X} ret ${:04X}", target, return_address),
            IrInstruction::JumpToAddress(a) => write!(f, "exit ${:04X}", a),
            IrInstruction::JumpIndirect(a) => write!(f, "exit (${:04X})", a),
            IrInstruction::ReturnFromSubroutine => write!(f, "rts"),
            IrInstruction::ReturnFromInterrupt => write!(f, "rti"),
            IrInstruction::SoftwareInterrupt { address } => write!(f, "brk ${:04X}", address),
            IrInstruction::HookPoint { tag } => write!(f, "hook {}", tag),
        }
    }
}
