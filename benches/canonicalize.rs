//! Optimizer Throughput Benchmarks
//!
//! # Benchmark Categories
//!
//! 1. **Constant chains**: folding cascades through the worklist
//! 2. **Redundant arithmetic**: floating GVN over many twins
//! 3. **Guarded diamonds**: conditional elimination over nested branches
//! 4. **Pipeline**: the full pass sequence on a loop with invariant reads

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use prism_opt::ir::{
    DeoptAction, DeoptReason, Graph, GraphBuilder, GuardInfo, LocationIdentity, Probability, Stamp,
};
use prism_opt::opt::{Canonicalizer, ConditionalElimination};
use prism_opt::optimize;

// =============================================================================
// Graph Generators
// =============================================================================

/// `((c0 + c1) * c2 + c3) ...` over `n` constants.
fn constant_chain(n: usize) -> Graph {
    let mut b = GraphBuilder::new();
    let mut acc = b.const_int(1);
    for i in 0..n {
        let c = b.const_int(i as i64 % 7 + 1);
        acc = if i % 2 == 0 { b.add(acc, c) } else { b.mul(acc, c) };
    }
    b.return_value(Some(acc));
    b.finish()
}

/// `n` copies of `(p + q) ^ r`, summed.
fn redundant_arithmetic(n: usize) -> Graph {
    let mut b = GraphBuilder::new();
    let p = b.parameter(0, Stamp::int_unrestricted());
    let q = b.parameter(1, Stamp::int_unrestricted());
    let r = b.parameter(2, Stamp::int_unrestricted());
    let mut acc = b.const_int(0);
    for _ in 0..n {
        let sum = b.add(q, p);
        let x = b.xor(sum, r);
        acc = b.add(acc, x);
    }
    b.return_value(Some(acc));
    b.finish()
}

/// `n` nested range checks on the same value, each repeated by a guard.
fn guarded_diamonds(n: usize) -> Graph {
    let info = GuardInfo::new(DeoptReason::RangeCheck, DeoptAction::InvalidateReprofile);
    let mut b = GraphBuilder::new();
    let x = b.parameter(0, Stamp::int_unrestricted());
    for i in 0..n {
        let bound = b.const_int(i as i64 * 10 + 10);
        let c = b.int_lt(x, bound);
        let (t, f) = b.if_then_else(c, Probability::from_basis_points(9_000));
        b.switch_to(f);
        b.deoptimize(info.deopt_info());
        b.switch_to(t);
        let again = b.int_lt(x, bound);
        b.fixed_guard(again, info);
    }
    b.return_value(Some(x));
    b.finish()
}

/// A loop reading `width` invariant fields each iteration.
fn loop_with_reads(width: u32) -> Graph {
    let mut b = GraphBuilder::new();
    let obj = b.parameter(0, Stamp::object_non_null());
    let n = b.parameter(1, Stamp::int_unrestricted());
    let zero = b.const_int(0);
    let one = b.const_int(1);
    let header = b.loop_begin();
    let i = b.loop_phi(header, zero);
    let mut bound = n;
    for field in 0..width {
        let read = b.load(obj, LocationIdentity::Field(field));
        bound = b.add(bound, read);
    }
    let cond = b.int_lt(i, bound);
    let (body, exit) = b.if_loop_exit(cond, header, Probability::from_basis_points(9_000));
    b.switch_to(body);
    b.store(obj, i, LocationIdentity::ArrayElement);
    let next = b.add(i, one);
    b.loop_end(header, &[(i, next)]);
    b.switch_to(exit);
    b.return_value(Some(i));
    b.finish()
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_canonicalizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalizer");

    for &n in &[16usize, 128, 1024] {
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("constant_chain", n), &n, |b, &n| {
            b.iter_batched(
                || constant_chain(n),
                |mut graph| black_box(Canonicalizer::new().apply(&mut graph)),
                criterion::BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("redundant_arithmetic", n), &n, |b, &n| {
            b.iter_batched(
                || redundant_arithmetic(n),
                |mut graph| black_box(Canonicalizer::new().apply(&mut graph)),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_conditional_elimination(c: &mut Criterion) {
    let mut group = c.benchmark_group("conditional_elimination");

    for &n in &[8usize, 64, 256] {
        group.bench_with_input(BenchmarkId::new("guarded_diamonds", n), &n, |b, &n| {
            b.iter_batched(
                || guarded_diamonds(n),
                |mut graph| black_box(ConditionalElimination::new().apply(&mut graph)),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    for &width in &[4u32, 32] {
        group.bench_with_input(BenchmarkId::new("loop_with_reads", width), &width, |b, &w| {
            b.iter_batched(
                || loop_with_reads(w),
                |mut graph| black_box(optimize(&mut graph)),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_canonicalizer,
    bench_conditional_elimination,
    bench_pipeline
);
criterion_main!(benches);
