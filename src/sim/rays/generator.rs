//! Reproducible ray directions.
//!
//! Directions come from a spherical Fibonacci lattice (stratified in solid
//! angle), jittered inside each stratum by a per-ray random stream. Each ray
//! seeds its own generator from `(seed, index)`, so batches can be generated
//! and traced in any order or split across threads.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geom::ray::Ray;
use crate::{Point, Vector};

/// Random stream used for direction jitter.
pub const STREAM_DIRECTION: u64 = 0;
/// Random stream used for reflections while tracing.
pub const STREAM_BOUNCE: u64 = 1;

/// Golden ratio conjugate, the azimuth step of the Fibonacci lattice.
const GOLDEN: f64 = 0.618_033_988_749_894_9;

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Seed of the random stream `stream` for ray `index`.
pub fn ray_seed(seed: u64, index: u64, stream: u64) -> u64 {
    splitmix64(splitmix64(seed ^ splitmix64(index)) ^ stream)
}

/// Deterministic generator for one ray.
pub fn ray_rng(seed: u64, index: usize, stream: u64) -> StdRng {
    StdRng::seed_from_u64(ray_seed(seed, index as u64, stream))
}

/// `count` rays from `source` over the full sphere, or a cone of half-angle
/// `spread_angle` around +Z when `spread_angle < PI`.
pub fn generate(source: Point, count: usize, spread_angle: f64, seed: u64) -> Vec<Ray> {
    generate_towards(source, Vector::new(0.0, 0.0, 1.0), count, spread_angle, seed)
}

/// Same as [`generate`] with the cone centred on `axis`.
pub fn generate_towards(
    source: Point,
    axis: Vector,
    count: usize,
    spread_angle: f64,
    seed: u64,
) -> Vec<Ray> {
    let axis = axis.normalize().unwrap_or(Vector::new(0.0, 0.0, 1.0));
    let (tangent, bitangent) = axis.orthonormal_basis();
    let cos_max = spread_angle.clamp(0.0, PI).cos();

    (0..count)
        .filter_map(|i| {
            let dir = lattice_direction(i, count, cos_max, seed);
            let world = tangent * dir.dx + bitangent * dir.dy + axis * dir.dz;
            Ray::new(source, world)
        })
        .collect()
}

/// Rays `start..start + len` of an endless full-sphere stream, paired with
/// their stream index.
///
/// The stream is cut into lattices of `count` rays; the first lattice matches
/// [`generate`] and each later one is jittered with a fresh seed.
pub fn generate_range(
    source: Point,
    start: usize,
    len: usize,
    count: usize,
    seed: u64,
) -> Vec<(usize, Ray)> {
    if count == 0 {
        return Vec::new();
    }
    let axis = Vector::new(0.0, 0.0, 1.0);
    let (tangent, bitangent) = axis.orthonormal_basis();
    let cos_max = PI.cos();
    (start..start + len)
        .filter_map(|i| {
            let cycle = (i / count) as u64;
            let cycle_seed = if cycle == 0 {
                seed
            } else {
                ray_seed(seed, cycle, STREAM_DIRECTION)
            };
            let dir = lattice_direction(i % count, count, cos_max, cycle_seed);
            let world = tangent * dir.dx + bitangent * dir.dy + axis * dir.dz;
            Ray::new(source, world).map(|r| (i, r))
        })
        .collect()
}

/// Direction of lattice point `i` in the local frame (cone axis = +Z).
fn lattice_direction(i: usize, count: usize, cos_max: f64, seed: u64) -> Vector {
    let mut rng = ray_rng(seed, i, STREAM_DIRECTION);
    let ju: f64 = rng.r#gen();
    let jv: f64 = rng.r#gen();
    // Equal-area strata in cos(theta), jittered within the stratum
    let u = (i as f64 + ju) / count as f64;
    let cos_theta = 1.0 - u * (1.0 - cos_max);
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = 2.0 * PI * ((i as f64 * GOLDEN + jv / count as f64).fract());
    Vector::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta)
}
