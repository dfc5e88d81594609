//! Synthetic scenes shared by the unit tests.

use comms_if::eqpt::cloud::{ColorPoint, PlaneModel, PointCloud};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Gaussian sample using the Box-Muller transform.
pub fn gaussian(rng: &mut StdRng, sigma: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    sigma * (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Points scattered on a plane with gaussian noise on every axis.
///
/// The two free coordinates are drawn over a region in front of the sensor chosen from the
/// dominant component of the normal: x in [-1, 1] and z in [0, 2] for floors, y in [-0.5, 0.5]
/// and z in [0, 2] for side walls, x in [-1, 1] and y in [-0.5, 0.5] for front walls.
pub fn noisy_plane_cloud(plane: &PlaneModel, n: usize, sigma: f64, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = plane.normal();
    let dominant = normal.iamax();

    let points = (0..n)
        .map(|_| {
            let (x, y, z) = match dominant {
                1 => {
                    let x = rng.gen_range(-1.0..1.0);
                    let z = rng.gen_range(0.0..2.0);
                    (x, -(plane.a * x + plane.c * z + plane.d) / plane.b, z)
                }
                0 => {
                    let y = rng.gen_range(-0.5..0.5);
                    let z = rng.gen_range(0.0..2.0);
                    (-(plane.b * y + plane.c * z + plane.d) / plane.a, y, z)
                }
                _ => {
                    let x = rng.gen_range(-1.0..1.0);
                    let y = rng.gen_range(-0.5..0.5);
                    (x, y, -(plane.a * x + plane.b * y + plane.d) / plane.c)
                }
            };

            ColorPoint::new(
                x + gaussian(&mut rng, sigma),
                y + gaussian(&mut rng, sigma),
                z + gaussian(&mut rng, sigma),
            )
        })
        .collect();

    PointCloud::from_points(points)
}

/// Points on the rectangle `x in [x0, x1]`, `y in [y0, y1]` of a wall facing the sensor at depth
/// `z`, with gaussian noise on every axis.
pub fn front_wall(
    x: (f64, f64),
    y: (f64, f64),
    z: f64,
    n: usize,
    sigma: f64,
    seed: u64,
) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);

    PointCloud::from_points(
        (0..n)
            .map(|_| {
                ColorPoint::new(
                    rng.gen_range(x.0..x.1) + gaussian(&mut rng, sigma),
                    rng.gen_range(y.0..y.1) + gaussian(&mut rng, sigma),
                    z + gaussian(&mut rng, sigma),
                )
            })
            .collect(),
    )
}

/// Points on the rectangle `y in [y0, y1]`, `z in [z0, z1]` of a wall parallel to the direction
/// of travel at lateral position `x`, with gaussian noise on every axis.
pub fn side_wall(
    x: f64,
    y: (f64, f64),
    z: (f64, f64),
    n: usize,
    sigma: f64,
    seed: u64,
) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);

    PointCloud::from_points(
        (0..n)
            .map(|_| {
                ColorPoint::new(
                    x + gaussian(&mut rng, sigma),
                    rng.gen_range(y.0..y.1) + gaussian(&mut rng, sigma),
                    rng.gen_range(z.0..z.1) + gaussian(&mut rng, sigma),
                )
            })
            .collect(),
    )
}

/// Uniformly distributed points in a box.
pub fn uniform_box(min: [f64; 3], max: [f64; 3], n: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);

    PointCloud::from_points(
        (0..n)
            .map(|_| {
                ColorPoint::new(
                    rng.gen_range(min[0]..max[0]),
                    rng.gen_range(min[1]..max[1]),
                    rng.gen_range(min[2]..max[2]),
                )
            })
            .collect(),
    )
}

/// Square grid at a single depth, as a wall square to the sensor reads after quantisation.
pub fn one_depth_grid(side: usize, spacing: f64, z: f64) -> PointCloud {
    let points = (0..side * side)
        .map(|i| ColorPoint::new((i % side) as f64 * spacing, (i / side) as f64 * spacing, z))
        .collect();

    PointCloud::from_points(points)
}
