//! Criterion benchmarks for residual cost estimation.
//!
//! Compares the portable and detected backends over synthetic residual
//! blocks at the sparsities a rate-distortion search actually sees:
//! mostly-empty AC blocks, moderately busy blocks, and dense worst cases.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use zencost::{CostBackend, LevelCosts, Residual, TokenType, COEFF_PROBS};

/// Synthetic block corpus at a given non-zero density (out of 16).
fn make_blocks(density: usize, count: usize) -> Vec<[i32; 16]> {
    let mut rng = StdRng::seed_from_u64(density as u64 * 7919);
    (0..count)
        .map(|_| {
            let mut coeffs = [0i32; 16];
            for c in coeffs.iter_mut() {
                if rng.gen_range(0..16) < density {
                    // Small magnitudes dominate quantized residuals.
                    *c = if rng.gen_bool(0.8) {
                        rng.gen_range(-4..=4)
                    } else {
                        rng.gen_range(-2048..=2047)
                    };
                }
            }
            coeffs
        })
        .collect()
}

fn cost_blocks(backend: CostBackend, costs: &LevelCosts, blocks: &[[i32; 16]]) -> u64 {
    let mut total = 0u64;
    for coeffs in blocks {
        let mut res = Residual::new(TokenType::I4, 0, &COEFF_PROBS, costs);
        backend.set_residual_coeffs(coeffs, &mut res);
        for ctx0 in 0..3 {
            total += backend.get_residual_cost(ctx0, &res) as u64;
        }
    }
    total
}

fn bench_residual_cost(c: &mut Criterion) {
    let costs = LevelCosts::from_probs(&COEFF_PROBS);
    let mut group = c.benchmark_group("residual_cost");

    for density in [1usize, 4, 12] {
        let blocks = make_blocks(density, 1024);
        group.throughput(Throughput::Elements(blocks.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("scalar", density),
            &blocks,
            |b, blocks| {
                let backend = CostBackend::scalar();
                b.iter(|| cost_blocks(backend, &costs, black_box(blocks)))
            },
        );
        group.bench_with_input(
            BenchmarkId::new("detected", density),
            &blocks,
            |b, blocks| {
                let backend = CostBackend::detect();
                b.iter(|| cost_blocks(backend, &costs, black_box(blocks)))
            },
        );
    }

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let costs = LevelCosts::from_probs(&COEFF_PROBS);
    let blocks = make_blocks(4, 1024);
    let mut group = c.benchmark_group("set_residual_coeffs");
    group.throughput(Throughput::Elements(blocks.len() as u64));

    for (name, backend) in [
        ("scalar", CostBackend::scalar()),
        ("detected", CostBackend::detect()),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut acc = 0i32;
                for coeffs in &blocks {
                    let mut res = Residual::new(TokenType::I4, 0, &COEFF_PROBS, &costs);
                    backend.set_residual_coeffs(black_box(coeffs), &mut res);
                    acc += res.last;
                }
                acc
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_residual_cost, bench_scan);
criterion_main!(benches);
