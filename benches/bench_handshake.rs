// CCI Accelerator Microbenchmark
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Benchmarks for the host side of a run: handshake polling, input
//! initialization, and complete runs against the simulated AFU.

use cci_microbench::handshake::{await_nonzero, Handshake};
use cci_microbench::harness::fill_input;
use cci_microbench::sim::SimulatedAfuFactory;
use cci_microbench::{BenchmarkConfig, BenchmarkHarness, MmioRegion, WaitPolicy};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Cost of one satisfied poll: load, compare, acquire fence.
fn bench_await_set_word(c: &mut Criterion) {
    let mut words = vec![0u32; 16];
    words[0] = 1;
    // SAFETY: words outlives region and is only accessed through it below.
    let region =
        unsafe { MmioRegion::from_raw_parts(words.as_mut_ptr() as *mut u8, words.len() * 4) }
            .unwrap();

    c.bench_function("await_nonzero/set", |b| {
        b.iter(|| await_nonzero(&region, 0, Handshake::Completion, WaitPolicy::Unbounded).unwrap());
    });
}

/// Input pattern fill over the buffer sizes a run uses.
fn bench_fill_input(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_input");

    for exponent in [10u32, 14, 18] {
        let count = 1usize << exponent;
        let mut words = vec![0u32; count];
        // SAFETY: words outlives region.
        let region =
            unsafe { MmioRegion::from_raw_parts(words.as_mut_ptr() as *mut u8, count * 4) }
                .unwrap();

        group.throughput(Throughput::Bytes((count * 4) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(exponent), &count, |b, &count| {
            b.iter(|| fill_input(&region, count));
        });
    }

    group.finish();
}

/// Whole run on the simulated AFU, device start to teardown.
fn bench_simulated_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulated_run");
    group.sample_size(10);

    for exponent in [10u32, 14, 18] {
        let config = BenchmarkConfig::new(exponent, 5).unwrap();
        group.throughput(Throughput::Bytes(config.input_bytes() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(exponent), &config, |b, &config| {
            b.iter(|| {
                let mut harness =
                    BenchmarkHarness::new(config, Box::new(SimulatedAfuFactory::default()));
                harness.run().unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_await_set_word, bench_fill_input, bench_simulated_run);
criterion_main!(benches);
