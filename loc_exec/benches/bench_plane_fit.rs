//! Benchmarks of the per frame geometry: ground plane fitting and normal estimation.
//!
//! Run with: cargo bench -p loc_exec

use comms_if::eqpt::cloud::{ColorPoint, PointCloud};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use loc_lib::per::{estimate_normals, fit_plane, voxel_downsample, PlaneFitParams};
use rand::{rngs::StdRng, Rng, SeedableRng};

// ------------------------------------------------------------------------------------------------
// SCENE GENERATION
// ------------------------------------------------------------------------------------------------

/// Floor 0.4 m below the sensor with a fence along the left side, `n` points in total.
fn scene(n: usize) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let points = (0..n)
        .map(|i| {
            if i % 4 == 0 {
                ColorPoint::new(
                    -0.7 + rng.gen_range(-0.003..0.003),
                    rng.gen_range(-0.3..0.35),
                    rng.gen_range(0.2..1.8),
                )
            } else {
                ColorPoint::new(
                    rng.gen_range(-1.0..1.0),
                    0.4 + rng.gen_range(-0.003..0.003),
                    rng.gen_range(0.0..2.0),
                )
            }
        })
        .collect();

    PointCloud::from_points(points)
}

// ------------------------------------------------------------------------------------------------
// BENCHMARKS
// ------------------------------------------------------------------------------------------------

fn bench_fit_plane(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit_plane");
    let params = PlaneFitParams::default();

    for n in [5_000usize, 20_000, 80_000].iter() {
        let cloud = scene(*n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &cloud, |b, cloud| {
            b.iter(|| fit_plane(black_box(cloud), None, &params))
        });
    }

    group.finish();
}

fn bench_normals(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_normals");

    for n in [5_000usize, 20_000].iter() {
        let cloud = voxel_downsample(&scene(*n), 0.01);
        group.bench_with_input(BenchmarkId::from_parameter(n), &cloud, |b, cloud| {
            b.iter(|| estimate_normals(black_box(cloud), 0.03, None))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fit_plane, bench_normals);
criterion_main!(benches);
