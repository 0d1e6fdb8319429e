use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use nesjit_core::decompiler::CodeRegion;
use nesjit_core::ir::Register;
use nesjit_core::{JitCompiler, NesHardware};

/// Sums $0200..$02FF into $10/$11, then returns
fn checksum_program() -> Vec<CodeRegion> {
    let program = vec![
        0xA9, 0x00, // LDA #$00
        0x85, 0x10, // STA $10
        0x85, 0x11, // STA $11
        0xA2, 0x00, // LDX #$00
        0x18, // $8008: CLC
        0xBD, 0x00, 0x02, // LDA $0200,X
        0x65, 0x10, // ADC $10
        0x85, 0x10, // STA $10
        0x90, 0x02, // BCC +2
        0xE6, 0x11, // INC $11
        0xE8, // INX
        0xD0, 0xF1, // BNE $8008
        0x60, // RTS
    ];
    vec![CodeRegion::new(0x8000, program)]
}

fn hardware() -> NesHardware {
    let mut hw = NesHardware::new();
    for i in 0..=0xFFu16 {
        hw.write(0x0200 + i, i as u8);
    }
    hw.set_register(Register::Sp, 0xFB);
    hw
}

fn bench_first_compile(c: &mut Criterion) {
    c.bench_function("compile_and_run", |b| {
        b.iter_batched(
            || (JitCompiler::new(checksum_program()), hardware()),
            |(jit, mut hw)| {
                jit.run(black_box(0x8000), &mut hw).unwrap();
                hw
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_cached_run(c: &mut Criterion) {
    let jit = JitCompiler::new(checksum_program());
    jit.get_or_compile(0x8000).unwrap();

    c.bench_function("cached_loop", |b| {
        b.iter_batched(
            hardware,
            |mut hw| {
                jit.run(0x8000, &mut hw).unwrap();
                hw
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_first_compile, bench_cached_run);
criterion_main!(benches);
