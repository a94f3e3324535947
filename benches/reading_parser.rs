//! Criterion benchmarks for the receive hot path.
//!
//! Every line the device sends goes through line reassembly and then the
//! reading parser, so both sit on the reader thread's critical path.
//!
//! Run with: cargo bench --bench reading_parser

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rs485_monitor::parse_reading;
use rs485_monitor::reader::LineBuffer;

fn parse_line_formats(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_reading");

    let lines = [
        ("csv", "230.12,0.456,96.60"),
        ("tagged", "V=230.12 I=0.456 P=96.60"),
        ("tagged_loose", "status ok V 230.1 A: 0.45 P=96"),
        ("unrecognised", "READY"),
    ];

    for (name, line) in lines {
        group.bench_with_input(BenchmarkId::from_parameter(name), line, |b, line| {
            b.iter(|| parse_reading(black_box(line)))
        });
    }

    group.finish();
}

fn reassemble_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_buffer");

    let stream: Vec<u8> = (0..256)
        .flat_map(|i| format!("{}.5,0.{},{}.25\r\n", 200 + i % 40, i % 1000, i).into_bytes())
        .collect();
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for chunk in [8usize, 64, 1024] {
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut buffer = LineBuffer::new();
                let mut lines = 0;
                for piece in stream.chunks(chunk) {
                    lines += buffer.push(black_box(piece)).len();
                }
                lines
            })
        });
    }

    group.finish();
}

criterion_group!(benches, parse_line_formats, reassemble_stream);
criterion_main!(benches);
