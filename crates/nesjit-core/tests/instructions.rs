//! Instruction semantics as executed by compiled units

use nesjit_core::cpu::{Flag, StatusFlags};
use nesjit_core::decompiler::CodeRegion;
use nesjit_core::ir::Register;
use nesjit_core::{JitCompiler, NesHardware};

/// Compile `program` at $8000 and run it once. The program is also mapped as
/// PRG so jump pointers inside it are visible on the bus. Most programs end
/// in RTS, which returns through a zeroed stack.
fn run_with(program: &[u8], setup: impl FnOnce(&mut NesHardware)) -> NesHardware {
    let jit = JitCompiler::new(vec![CodeRegion::new(0x8000, program.to_vec())]);
    let mut prg = vec![0xEA; 0x4000];
    prg[..program.len()].copy_from_slice(program);
    let mut hw = NesHardware::with_prg(prg);
    hw.set_register(Register::Sp, 0xFB);
    setup(&mut hw);
    jit.run(0x8000, &mut hw).unwrap();
    hw
}

fn run(program: &[u8]) -> NesHardware {
    run_with(program, |_| {})
}

#[test]
fn test_lda_flags() {
    let hw = run(&[0xA9, 0x00, 0x60]);
    assert!(hw.flag(Flag::Zero));
    assert!(!hw.flag(Flag::Negative));

    let hw = run(&[0xA9, 0x80, 0x60]);
    assert!(!hw.flag(Flag::Zero));
    assert!(hw.flag(Flag::Negative));
}

#[test]
fn test_adc_with_carry_in() {
    // SEC ; LDA #$FF ; ADC #$00
    let hw = run(&[0x38, 0xA9, 0xFF, 0x69, 0x00, 0x60]);
    assert_eq!(hw.register(Register::A), 0x00);
    assert!(hw.flag(Flag::Carry));
    assert!(hw.flag(Flag::Zero));
    assert!(!hw.flag(Flag::Overflow));
}

#[test]
fn test_sbc_overflow() {
    // SEC ; LDA #$80 ; SBC #$01  => $7F, signed overflow
    let hw = run(&[0x38, 0xA9, 0x80, 0xE9, 0x01, 0x60]);
    assert_eq!(hw.register(Register::A), 0x7F);
    assert!(hw.flag(Flag::Carry));
    assert!(hw.flag(Flag::Overflow));
}

#[test]
fn test_logical_ops() {
    // LDA #$F0 ; AND #$3C ; ORA #$01 ; EOR #$FF
    let hw = run(&[0xA9, 0xF0, 0x29, 0x3C, 0x09, 0x01, 0x49, 0xFF, 0x60]);
    assert_eq!(hw.register(Register::A), !0x31);
    assert!(hw.flag(Flag::Negative));
}

#[test]
fn test_compare_sets_carry() {
    // LDX #$10 ; CPX #$10
    let hw = run(&[0xA2, 0x10, 0xE0, 0x10, 0x60]);
    assert!(hw.flag(Flag::Carry));
    assert!(hw.flag(Flag::Zero));

    // LDY #$01 ; CPY #$02
    let hw = run(&[0xA0, 0x01, 0xC0, 0x02, 0x60]);
    assert!(!hw.flag(Flag::Carry));
    assert!(hw.flag(Flag::Negative));
}

#[test]
fn test_shift_accumulator_and_memory() {
    // LDA #$81 ; ASL A
    let hw = run(&[0xA9, 0x81, 0x0A, 0x60]);
    assert_eq!(hw.register(Register::A), 0x02);
    assert!(hw.flag(Flag::Carry));

    // SEC ; ROR $10
    let mut hw = run_with(&[0x38, 0x66, 0x10, 0x60], |hw| hw.write(0x0010, 0x02));
    assert_eq!(hw.read(0x0010), 0x81);
    assert!(!hw.flag(Flag::Carry));
    assert!(hw.flag(Flag::Negative));
}

#[test]
fn test_bit_test() {
    // LDA #$01 ; BIT $20
    let hw = run_with(&[0xA9, 0x01, 0x24, 0x20, 0x60], |hw| hw.write(0x0020, 0xC0));
    assert!(hw.flag(Flag::Zero));
    assert!(hw.flag(Flag::Negative));
    assert!(hw.flag(Flag::Overflow));
    assert_eq!(hw.register(Register::A), 0x01);
}

#[test]
fn test_inc_dec_memory_wrap() {
    // INC $30 ; DEC $31
    let mut hw = run_with(&[0xE6, 0x30, 0xC6, 0x31, 0x60], |hw| {
        hw.write(0x0030, 0xFF);
        hw.write(0x0031, 0x00);
    });
    assert_eq!(hw.read(0x0030), 0x00);
    assert_eq!(hw.read(0x0031), 0xFF);
    assert!(hw.flag(Flag::Negative));
}

#[test]
fn test_zero_page_index_wraps() {
    // LDX #$10 ; LDA $F8,X  => reads $0008
    let hw = run_with(&[0xA2, 0x10, 0xB5, 0xF8, 0x60], |hw| hw.write(0x0008, 0x5A));
    assert_eq!(hw.register(Register::A), 0x5A);
}

#[test]
fn test_indirect_addressing_modes() {
    let setup = |hw: &mut NesHardware| {
        hw.write(0x0024, 0x00);
        hw.write(0x0025, 0x03);
        hw.write(0x0304, 0x77);
        hw.write(0x0300, 0x66);
    };
    // LDX #$04 ; LDA ($20,X)
    let hw = run_with(&[0xA2, 0x04, 0xA1, 0x20, 0x60], setup);
    assert_eq!(hw.register(Register::A), 0x66);

    // LDY #$04 ; LDA ($24),Y
    let hw = run_with(&[0xA0, 0x04, 0xB1, 0x24, 0x60], setup);
    assert_eq!(hw.register(Register::A), 0x77);
}

#[test]
fn test_store_absolute_indexed() {
    // LDA #$12 ; LDY #$03 ; STA $0400,Y
    let mut hw = run(&[0xA9, 0x12, 0xA0, 0x03, 0x99, 0x00, 0x04, 0x60]);
    assert_eq!(hw.read(0x0403), 0x12);
}

#[test]
fn test_transfers() {
    // LDX #$80 ; TXA ; TAY ; TSX
    let hw = run(&[0xA2, 0x80, 0x8A, 0xA8, 0xBA, 0x60]);
    assert_eq!(hw.register(Register::A), 0x80);
    assert_eq!(hw.register(Register::Y), 0x80);
    assert_eq!(hw.register(Register::X), 0xFB);
    assert!(hw.flag(Flag::Negative));

    // LDX #$00 ; LDA #$01 ; TXS ; JMP ($8008) ; $8008: pointer $9000
    let hw = run(&[0xA2, 0x00, 0xA9, 0x01, 0x9A, 0x6C, 0x08, 0x80, 0x00, 0x90]);
    assert_eq!(hw.register(Register::Sp), 0x00);
    assert_eq!(hw.pc(), 0x9000);
    // TXS leaves flags alone
    assert!(!hw.flag(Flag::Zero));
}

#[test]
fn test_php_plp_round_trip() {
    // SEC ; SED ; PHP ; CLC ; CLD ; PLP
    let hw = run(&[0x38, 0xF8, 0x08, 0x18, 0xD8, 0x28, 0x60]);
    assert!(hw.flag(Flag::Carry));
    assert!(hw.flag(Flag::Decimal));
    assert_eq!(hw.status() & StatusFlags::BREAK, 0);
    assert_ne!(hw.status() & StatusFlags::UNUSED, 0);
}

#[test]
fn test_php_pushes_break_bit() {
    // PHP ; JMP ($8004) ; $8004: pointer $9000
    let mut hw = run_with(&[0x08, 0x6C, 0x04, 0x80, 0x00, 0x90], |hw| hw.set_status(0x00));
    assert_eq!(hw.read(0x01FB), 0x30);
    assert_eq!(hw.pc(), 0x9000);
}

#[test]
fn test_pla_updates_flags() {
    // LDA #$00 ; PHA ; LDA #$01 ; PLA
    let hw = run(&[0xA9, 0x00, 0x48, 0xA9, 0x01, 0x68, 0x60]);
    assert_eq!(hw.register(Register::A), 0);
    assert!(hw.flag(Flag::Zero));
}

#[test]
fn test_jsr_leaves_unit_at_target() {
    // $8000: JSR $8010
    let mut program = vec![0x60; 0x11];
    program[0..3].copy_from_slice(&[0x20, 0x10, 0x80]);
    let mut hw = run(&program);
    assert_eq!(hw.pc(), 0x8010);
    assert_eq!(hw.register(Register::Sp), 0xF9);
    assert_eq!(hw.read(0x01FB), 0x80);
    assert_eq!(hw.read(0x01FA), 0x02);
}

#[test]
fn test_forward_branch_skips_instruction() {
    // LDA #$00 ; BEQ +1 ; INX ; INY ; RTS
    let program = [0xA9, 0x00, 0xF0, 0x01, 0xE8, 0xC8, 0x60];
    let hw = run(&program);
    assert_eq!(hw.register(Register::X), 0);
    assert_eq!(hw.register(Register::Y), 1);

    // LDA #$01 ; BEQ +1 ; INX ; INY ; RTS
    let program = [0xA9, 0x01, 0xF0, 0x01, 0xE8, 0xC8, 0x60];
    let hw = run(&program);
    assert_eq!(hw.register(Register::X), 1);
    assert_eq!(hw.register(Register::Y), 1);
}

#[test]
fn test_brk_enters_irq_vector() {
    let mut prg = vec![0xEA; 0x4000];
    prg[0] = 0x00;
    prg[0x3FFE..].copy_from_slice(&[0x00, 0x90]);
    let jit = JitCompiler::new(vec![CodeRegion::new(0x8000, prg.clone())]);
    let mut hw = NesHardware::with_prg(prg);
    hw.reset();
    jit.run(0x8000, &mut hw).unwrap();
    assert_eq!(hw.pc(), 0x9000);
    assert_eq!(hw.read(0x01FF), 0x80);
    assert_eq!(hw.read(0x01FE), 0x02);
    assert!(hw.flag(Flag::InterruptDisable));
}
