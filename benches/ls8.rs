use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ls8_emulator::emulator::memory::Ram;
use ls8_emulator::emulator::output::BufferSink;
use ls8_emulator::emulator::parse;
use ls8_emulator::Emulator;

// Counting loop: R0 climbs to 255, three instructions per iteration.
const COUNTER: &str = "\
# counter.ls8: count R0 up to 255 then stop

10011001 # LDI R0,0
00000000
00000000
10011001 # LDI R1,1
00000001
00000001
10011001 # LDI R2,255
00000010
11111111
10011001 # LDI R3,12
00000011
00001100
10101000 # ADD R0,R1 (loop head)
00000000
00000001
10100000 # CMP R0,R2
00000000
00000010
01010010 # JNE R3
00000011
00000001 # HLT
";

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("LS8_Instructions");

    let image = parse::parse_source(COUNTER).unwrap();

    group.bench_function("program_execution", |b| {
        b.iter_batched(
            || {
                let mut machine = Emulator::new(Ram::default(), BufferSink::new());
                machine.load_program(black_box(&image)).unwrap();
                machine
            },
            |mut machine| {
                machine.run(Some(1_000)).unwrap();
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.bench_function("add_execution", |b| {
        b.iter_batched(
            || {
                let mut machine = Emulator::new(Ram::default(), BufferSink::new());
                machine
                    .load_program(&[
                        0b10011001, 0, 5, // LDI R0,5
                        0b10011001, 1, 3, // LDI R1,3
                        0b10101000, 0, 1, // ADD R0,R1
                        0b00000001, // HLT
                    ])
                    .unwrap();
                machine.step().unwrap();
                machine.step().unwrap();
                machine
            },
            |mut machine| {
                machine.step().unwrap(); // the ADD
                black_box(&machine);
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.bench_function("parse_source", |b| {
        b.iter_batched(
            || COUNTER,
            |program| {
                black_box(parse::parse_source(black_box(program)).unwrap());
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
