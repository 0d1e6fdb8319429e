//! Code generation
//!
//! A function's IR is flattened into a vector of boxed closures. Labels are
//! resolved to op indices before any closure is built, so control flow at run
//! time is a plain index update. A unit only returns to its caller at a call,
//! return, interrupt or a jump out of the function; a loop that never reaches
//! one keeps the calling thread inside the unit.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::cpu::Flag;
use crate::error::{ExecutionError, GenerationError};
use crate::hardware::NesHardware;
use crate::ir::{BinaryOperator, IrInstruction, IrKind, LabelId, Register, ShiftKind, UnaryOperator, Value};
use crate::translator::ConvertedInstruction;

use super::DebugHook;

/// Number of scratch variables available to one invocation
pub const VARIABLE_COUNT: usize = 256;

/// What to do after an op
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Next,
    Goto(usize),
    Exit,
}

/// Per-invocation scratch state
pub struct Frame {
    variables: [Option<u8>; VARIABLE_COUNT],
}

impl Frame {
    pub fn new() -> Self {
        Self {
            variables: [None; VARIABLE_COUNT],
        }
    }

    pub fn get(&self, index: u8) -> Result<u8, ExecutionError> {
        self.variables[index as usize].ok_or(ExecutionError::UndefinedVariable { index })
    }

    pub fn set(&mut self, index: u8, value: u8) {
        self.variables[index as usize] = Some(value);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

/// One generated operation
pub type Op = Box<dyn Fn(&mut Frame, &mut NesHardware) -> Result<Flow, ExecutionError> + Send + Sync>;

/// Replacement generator for one IR kind
pub type CustomGenerator = Arc<dyn Fn(&IrInstruction) -> Result<Op, GenerationError> + Send + Sync>;

/// A callable unit for one entry address
pub struct CompiledFunction {
    entry: u16,
    ops: Vec<Op>,
    instructions: Vec<ConvertedInstruction>,
}

impl CompiledFunction {
    pub fn entry(&self) -> u16 {
        self.entry
    }

    /// The IR this unit was generated from
    pub fn instructions(&self) -> &[ConvertedInstruction] {
        &self.instructions
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Run until the unit reaches a call, return, interrupt or exit
    pub fn invoke(&self, hardware: &mut NesHardware) -> Result<(), ExecutionError> {
        let mut frame = Frame::new();
        let mut index = 0;
        while let Some(op) = self.ops.get(index) {
            match op(&mut frame, hardware)? {
                Flow::Next => index += 1,
                Flow::Goto(target) => index = target,
                Flow::Exit => return Ok(()),
            }
        }
        Err(ExecutionError::RanOffEnd { entry: self.entry })
    }
}

impl fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("entry", &format_args!("${:04X}", self.entry))
            .field("ops", &self.ops.len())
            .field("instructions", &self.instructions.len())
            .finish()
    }
}

enum Planned<'a> {
    Ir(&'a IrInstruction),
    /// Continue at `next` after an instruction whose successor is not the
    /// following entry in the ordered list
    Fallthrough { next: u16 },
}

/// Turns converted instructions into a [`CompiledFunction`]
pub struct CodeGenerator {
    debug_hook: Arc<dyn DebugHook>,
    custom: HashMap<IrKind, CustomGenerator>,
}

impl CodeGenerator {
    pub fn new(debug_hook: Arc<dyn DebugHook>, custom: HashMap<IrKind, CustomGenerator>) -> Self {
        Self { debug_hook, custom }
    }

    pub fn generate(
        &self,
        entry: u16,
        instructions: Vec<ConvertedInstruction>,
    ) -> Result<CompiledFunction, GenerationError> {
        let mut plan = Vec::new();
        let mut labels: HashMap<LabelId, usize> = HashMap::new();
        let mut starts: HashMap<u16, usize> = HashMap::new();

        for (position, converted) in instructions.iter().enumerate() {
            starts.entry(converted.original.address).or_insert(plan.len());

            for ir in &converted.ir {
                if let IrInstruction::Label(label) = ir {
                    if labels.insert(*label, plan.len()).is_some() {
                        return Err(GenerationError::DuplicateLabel {
                            label: label.to_string(),
                        });
                    }
                } else {
                    plan.push(Planned::Ir(ir));
                }
            }

            let ends_flow = matches!(converted.ir.last(), Some(ir) if ir.ends_flow());
            let next = converted.original.next_address();
            let adjacent = instructions
                .get(position + 1)
                .map_or(false, |following| following.original.address == next);
            if !ends_flow && !adjacent {
                plan.push(Planned::Fallthrough { next });
            }
        }

        let mut ops = Vec::with_capacity(plan.len());
        for planned in &plan {
            let op = match planned {
                Planned::Ir(ir) => self.generate_ir(ir, &labels)?,
                Planned::Fallthrough { next } => match starts.get(next) {
                    Some(&target) => goto(target),
                    None => exit_at(*next),
                },
            };
            ops.push(op);
        }

        Ok(CompiledFunction {
            entry,
            ops,
            instructions,
        })
    }

    fn generate_ir(
        &self,
        ir: &IrInstruction,
        labels: &HashMap<LabelId, usize>,
    ) -> Result<Op, GenerationError> {
        if let Some(generator) = self.custom.get(&ir.kind()) {
            return generator(ir);
        }

        let op: Op = match *ir {
            IrInstruction::Copy {
                source,
                destination,
            } => {
                writable(&destination)?;
                Box::new(move |frame, hw| {
                    let value = read_value(&source, frame, hw)?;
                    write_value(&destination, value, frame, hw)?;
                    Ok(Flow::Next)
                })
            }
            IrInstruction::Unary {
                operator: UnaryOperator::Not,
                source,
                destination,
            } => {
                writable(&destination)?;
                Box::new(move |frame, hw| {
                    let value = read_value(&source, frame, hw)?;
                    write_value(&destination, !value, frame, hw)?;
                    Ok(Flow::Next)
                })
            }
            IrInstruction::Binary {
                operator,
                left,
                right,
                destination,
            } => {
                writable(&destination)?;
                Box::new(move |frame, hw| {
                    let l = read_value(&left, frame, hw)?;
                    let r = read_value(&right, frame, hw)?;
                    let result = match operator {
                        BinaryOperator::And => l & r,
                        BinaryOperator::Or => l | r,
                        BinaryOperator::Xor => l ^ r,
                        BinaryOperator::Add => l.wrapping_add(r),
                        BinaryOperator::Subtract => l.wrapping_sub(r),
                        BinaryOperator::Equals => (l == r) as u8,
                        BinaryOperator::NotEquals => (l != r) as u8,
                    };
                    write_value(&destination, result, frame, hw)?;
                    Ok(Flow::Next)
                })
            }
            IrInstruction::AddWithCarry { operand } => Box::new(move |frame, hw| {
                let a = hw.register(Register::A);
                let m = read_value(&operand, frame, hw)?;
                let sum = a as u16 + m as u16 + hw.flag(Flag::Carry) as u16;
                let result = sum as u8;
                hw.set_flag(Flag::Carry, sum > 0xFF);
                hw.set_flag(Flag::Overflow, (!(a ^ m) & (a ^ result) & 0x80) != 0);
                hw.set_register(Register::A, result);
                set_zero_negative(hw, result);
                Ok(Flow::Next)
            }),
            IrInstruction::Compare { left, right } => Box::new(move |frame, hw| {
                let l = read_value(&left, frame, hw)?;
                let r = read_value(&right, frame, hw)?;
                hw.set_flag(Flag::Carry, l >= r);
                set_zero_negative(hw, l.wrapping_sub(r));
                Ok(Flow::Next)
            }),
            IrInstruction::Shift { kind, target } => {
                writable(&target)?;
                Box::new(move |frame, hw| {
                    let value = read_value(&target, frame, hw)?;
                    let carry_in = hw.flag(Flag::Carry) as u8;
                    let (result, carry_out) = match kind {
                        ShiftKind::ShiftLeft => (value << 1, value & 0x80 != 0),
                        ShiftKind::ShiftRight => (value >> 1, value & 0x01 != 0),
                        ShiftKind::RotateLeft => ((value << 1) | carry_in, value & 0x80 != 0),
                        ShiftKind::RotateRight => ((value >> 1) | (carry_in << 7), value & 0x01 != 0),
                    };
                    write_value(&target, result, frame, hw)?;
                    hw.set_flag(Flag::Carry, carry_out);
                    set_zero_negative(hw, result);
                    Ok(Flow::Next)
                })
            }
            IrInstruction::BitTest { operand } => Box::new(move |frame, hw| {
                let m = read_value(&operand, frame, hw)?;
                let a = hw.register(Register::A);
                hw.set_flag(Flag::Zero, a & m == 0);
                hw.set_flag(Flag::Negative, m & 0x80 != 0);
                hw.set_flag(Flag::Overflow, m & 0x40 != 0);
                Ok(Flow::Next)
            }),
            IrInstruction::UpdateZeroNegative(value) => Box::new(move |frame, hw| {
                let v = read_value(&value, frame, hw)?;
                set_zero_negative(hw, v);
                Ok(Flow::Next)
            }),
            IrInstruction::Label(_) => Box::new(|_, _| Ok(Flow::Next)),
            IrInstruction::Jump(label) => transfer(label, labels)?,
            IrInstruction::JumpIfZero { condition, target } => {
                let taken = transfer(target, labels)?;
                Box::new(move |frame, hw| {
                    if read_value(&condition, frame, hw)? == 0 {
                        taken(frame, hw)
                    } else {
                        Ok(Flow::Next)
                    }
                })
            }
            IrInstruction::JumpIfNotZero { condition, target } => {
                let taken = transfer(target, labels)?;
                Box::new(move |frame, hw| {
                    if read_value(&condition, frame, hw)? != 0 {
                        taken(frame, hw)
                    } else {
                        Ok(Flow::Next)
                    }
                })
            }
            IrInstruction::PushStackValue(value) => Box::new(move |frame, hw| {
                let v = read_value(&value, frame, hw)?;
                hw.push(v);
                Ok(Flow::Next)
            }),
            IrInstruction::PopStackValue(destination) => {
                writable(&destination)?;
                Box::new(move |frame, hw| {
                    let v = hw.pop();
                    write_value(&destination, v, frame, hw)?;
                    Ok(Flow::Next)
                })
            }
            IrInstruction::CallFunction {
                target,
                return_address,
            } => Box::new(move |_, hw| {
                hw.set_pc(return_address);
                hw.call_function(target);
                Ok(Flow::Exit)
            }),
            IrInstruction::JumpToAddress(address) => exit_at(address),
            IrInstruction::JumpIndirect(pointer) => Box::new(move |_, hw| {
                hw.jump_indirect(pointer);
                Ok(Flow::Exit)
            }),
            IrInstruction::ReturnFromSubroutine => Box::new(|_, hw| {
                hw.return_from_subroutine();
                Ok(Flow::Exit)
            }),
            IrInstruction::ReturnFromInterrupt => Box::new(|_, hw| {
                hw.return_from_interrupt();
                Ok(Flow::Exit)
            }),
            IrInstruction::SoftwareInterrupt { address } => Box::new(move |_, hw| {
                hw.set_pc(address);
                hw.software_interrupt();
                Ok(Flow::Exit)
            }),
            IrInstruction::HookPoint { tag } => {
                let hook = Arc::clone(&self.debug_hook);
                Box::new(move |_, hw| {
                    hook.on_hook_point(tag, hw)?;
                    Ok(Flow::Next)
                })
            }
        };
        Ok(op)
    }
}

fn goto(target: usize) -> Op {
    Box::new(move |_, _| Ok(Flow::Goto(target)))
}

fn exit_at(address: u16) -> Op {
    Box::new(move |_, hw| {
        hw.set_pc(address);
        Ok(Flow::Exit)
    })
}

fn transfer(label: LabelId, labels: &HashMap<LabelId, usize>) -> Result<Op, GenerationError> {
    let target = *labels.get(&label).ok_or_else(|| GenerationError::UnknownLabel {
        label: label.to_string(),
    })?;
    Ok(goto(target))
}

fn writable(value: &Value) -> Result<(), GenerationError> {
    if value.is_writable() {
        Ok(())
    } else {
        Err(GenerationError::InvalidTarget {
            value: value.to_string(),
        })
    }
}

fn set_zero_negative(hw: &mut NesHardware, value: u8) {
    hw.set_flag(Flag::Zero, value == 0);
    hw.set_flag(Flag::Negative, value & 0x80 != 0);
}

/// Resolve a memory-backed value to its effective address
fn effective_address(value: &Value, hw: &mut NesHardware) -> Option<u16> {
    match *value {
        Value::Memory {
            base,
            index,
            single_byte_address,
        } => {
            let offset = index.map_or(0, |r| hw.register(r));
            Some(if single_byte_address {
                (base as u8).wrapping_add(offset) as u16
            } else {
                base.wrapping_add(offset as u16)
            })
        }
        Value::IndirectMemory {
            zero_page,
            index,
            pre_indexed,
        } => {
            let offset = index.map_or(0, |r| hw.register(r));
            let pointer = if pre_indexed {
                zero_page.wrapping_add(offset)
            } else {
                zero_page
            };
            // Pointer fetch wraps inside the zero page
            let lo = hw.read(pointer as u16);
            let hi = hw.read(pointer.wrapping_add(1) as u16);
            let address = u16::from_le_bytes([lo, hi]);
            Some(if pre_indexed {
                address
            } else {
                address.wrapping_add(offset as u16)
            })
        }
        _ => None,
    }
}

fn read_value(value: &Value, frame: &Frame, hw: &mut NesHardware) -> Result<u8, ExecutionError> {
    Ok(match *value {
        Value::Constant(v) => v,
        Value::Register(r) => hw.register(r),
        Value::Flag(flag) => hw.flag(flag) as u8,
        Value::AllFlags => hw.status(),
        Value::Variable(index) => frame.get(index)?,
        Value::Memory { .. } | Value::IndirectMemory { .. } => {
            let address = effective_address(value, hw).unwrap_or(0);
            hw.read(address)
        }
    })
}

fn write_value(value: &Value, v: u8, frame: &mut Frame, hw: &mut NesHardware) -> Result<(), ExecutionError> {
    match *value {
        Value::Register(r) => hw.set_register(r, v),
        Value::Flag(flag) => hw.set_flag(flag, v != 0),
        Value::AllFlags => hw.set_status(v),
        Value::Variable(index) => frame.set(index, v),
        Value::Memory { .. } | Value::IndirectMemory { .. } => {
            let address = effective_address(value, hw).unwrap_or(0);
            hw.write(address, v);
        }
        // Rejected at generation time
        Value::Constant(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::{decompile, CodeRegion};
    use crate::jit::LogDebugHook;
    use crate::translator::convert_function;

    fn generator() -> CodeGenerator {
        CodeGenerator::new(Arc::new(LogDebugHook), HashMap::new())
    }

    fn compile(bytes: &[u8]) -> CompiledFunction {
        let regions = vec![CodeRegion::new(0x8000, bytes.to_vec())];
        let function = decompile(0x8000, &regions).unwrap();
        generator().generate(0x8000, convert_function(&function)).unwrap()
    }

    #[test]
    fn test_adc_sets_overflow_and_carry() {
        // LDA #$7F ; ADC #$01 ; RTS
        let unit = compile(&[0xA9, 0x7F, 0x69, 0x01, 0x60]);
        let mut hw = NesHardware::new();
        hw.set_register(Register::Sp, 0xFD);
        unit.invoke(&mut hw).unwrap();
        assert_eq!(hw.register(Register::A), 0x80);
        assert!(hw.flag(Flag::Overflow));
        assert!(hw.flag(Flag::Negative));
        assert!(!hw.flag(Flag::Carry));
    }

    #[test]
    fn test_sbc_borrow() {
        // SEC ; LDA #$10 ; SBC #$20 ; RTS
        let unit = compile(&[0x38, 0xA9, 0x10, 0xE9, 0x20, 0x60]);
        let mut hw = NesHardware::new();
        unit.invoke(&mut hw).unwrap();
        assert_eq!(hw.register(Register::A), 0xF0);
        assert!(!hw.flag(Flag::Carry));
    }

    #[test]
    fn test_forward_branch_stays_in_unit() {
        // LDX #$00 ; BEQ +2 ; LDX #$05 ; INX ; RTS
        let unit = compile(&[0xA2, 0x00, 0xF0, 0x02, 0xA2, 0x05, 0xE8, 0x60]);
        let mut hw = NesHardware::new();
        unit.invoke(&mut hw).unwrap();
        assert_eq!(hw.register(Register::X), 0x01);
    }

    #[test]
    fn test_backward_branch_loops_inside_unit() {
        // $8000: LDX #$03 ; $8002: DEX ; $8003: BNE $8002 ; $8005: RTS
        let unit = compile(&[0xA2, 0x03, 0xCA, 0xD0, 0xFD, 0x60]);
        let mut hw = NesHardware::new();
        hw.set_register(Register::Sp, 0xFD);
        hw.write(0x01FE, 0x10);
        hw.write(0x01FF, 0x90);
        unit.invoke(&mut hw).unwrap();
        assert_eq!(hw.register(Register::X), 0x00);
        assert_eq!(hw.pc(), 0x9011);
        assert_eq!(hw.register(Register::Sp), 0xFF);
    }

    #[test]
    fn test_fallthrough_into_earlier_entry_stays_in_unit() {
        // $8000: INX ; $8001: BNE $8000 ; $8003: RTS, entered at $8001
        let regions = vec![CodeRegion::new(0x8000, vec![0xE8, 0xD0, 0xFD, 0x60])];
        let function = decompile(0x8001, &regions).unwrap();
        let unit = generator().generate(0x8001, convert_function(&function)).unwrap();
        let mut hw = NesHardware::new();
        hw.set_register(Register::X, 0xFD);
        hw.set_flag(Flag::Zero, false);
        unit.invoke(&mut hw).unwrap();
        assert_eq!(hw.register(Register::X), 0x00);
    }

    #[test]
    fn test_unknown_label_is_generation_error() {
        let regions = vec![CodeRegion::new(0x8000, vec![0xEA, 0x60])];
        let function = decompile(0x8000, &regions).unwrap();
        let mut converted = convert_function(&function);
        converted[0].ir.push(IrInstruction::Jump(LabelId::Instruction(0x9000)));
        let err = generator().generate(0x8000, converted).unwrap_err();
        assert!(matches!(err, GenerationError::UnknownLabel { .. }));
    }

    #[test]
    fn test_uninitialized_variable_fails() {
        let regions = vec![CodeRegion::new(0x8000, vec![0x60])];
        let function = decompile(0x8000, &regions).unwrap();
        let mut converted = convert_function(&function);
        converted[0].ir.insert(0, IrInstruction::PushStackValue(Value::Variable(3)));
        let unit = generator().generate(0x8000, converted).unwrap();
        let err = unit.invoke(&mut NesHardware::new()).unwrap_err();
        assert_eq!(err, ExecutionError::UndefinedVariable { index: 3 });
    }

    #[test]
    fn test_constant_destination_rejected() {
        let regions = vec![CodeRegion::new(0x8000, vec![0x60])];
        let function = decompile(0x8000, &regions).unwrap();
        let mut converted = convert_function(&function);
        converted[0].ir.insert(
            0,
            IrInstruction::Copy {
                source: Value::Register(Register::A),
                destination: Value::Constant(0),
            },
        );
        assert!(matches!(
            generator().generate(0x8000, converted),
            Err(GenerationError::InvalidTarget { .. })
        ));
    }
}
