//! Arena allocation benchmarks.
//!
//! Measures:
//! - Bump allocation in batching arenas
//! - Unbatched allocation in implicit arenas
//! - Checked scalar reads and writes on segments

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use marshal_mem::{Arena, ArenaKind};

fn bench_alloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc");

    for kind in [ArenaKind::Auto, ArenaKind::Confined, ArenaKind::Implicit] {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            b.iter(|| {
                let arena = Arena::new(kind);
                for _ in 0..1_000 {
                    black_box(arena.alloc(24, 8).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_scalar_access(c: &mut Criterion) {
    let arena = Arena::confined();
    let seg = arena.alloc(8 * 1024, 8).unwrap();

    c.bench_function("write_read_u64", |b| {
        b.iter(|| {
            for i in 0..1_024 {
                seg.write::<u64>(i * 8, i as u64).unwrap();
            }
            let mut sum = 0u64;
            for i in 0..1_024 {
                sum = sum.wrapping_add(seg.read::<u64>(i * 8).unwrap());
            }
            black_box(sum)
        });
    });
}

criterion_group!(benches, bench_alloc, bench_scalar_access);
criterion_main!(benches);
