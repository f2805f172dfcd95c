//! Spatial acceleration structures.
//!
//! Two interchangeable variants share the [`SpatialIndex`] capability set.
//! [`AccelerationStructure`] is the tagged variant selected from configuration.

pub mod bvh;
pub mod octree;

use serde::{Deserialize, Serialize};

use crate::Point;
use crate::geom::ray::{Ray, SurfaceHit};
use crate::sim::diagnostics::QueryCounters;
use crate::sim::scene::AcousticGeometry;

pub use bvh::Bvh;
pub use octree::Octree;

/// Which structure to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccelerationKind {
    Bvh,
    Octree,
}

/// Build settings for both structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccelerationConfig {
    pub kind: AccelerationKind,
    /// Maximum primitives per BVH leaf.
    pub bvh_leaf_size: usize,
    pub octree_max_depth: usize,
    /// Items per octree cell before it splits.
    pub octree_leaf_capacity: usize,
}

impl AccelerationConfig {
    pub fn new() -> Self {
        Self {
            kind: AccelerationKind::Bvh,
            bvh_leaf_size: 4,
            octree_max_depth: 8,
            octree_leaf_capacity: 8,
        }
    }
}

impl Default for AccelerationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability set shared by the BVH and the octree.
///
/// Structures store primitive indices only; the geometry slice they were built
/// from is passed back in on every query.
pub trait SpatialIndex {
    fn build(geometry: &[AcousticGeometry], config: &AccelerationConfig) -> Self
    where
        Self: Sized;

    /// Closest positive-t hit below `t_max`. Equal distances resolve to the lower index.
    fn intersect_ray(
        &self,
        geometry: &[AcousticGeometry],
        ray: &Ray,
        t_max: f64,
        counters: &mut QueryCounters,
    ) -> Option<(usize, SurfaceHit)>;

    /// Sorted indices of every primitive whose bounds overlap the sphere.
    fn query_sphere(&self, geometry: &[AcousticGeometry], center: Point, radius: f64)
    -> Vec<usize>;

    /// Local update after a few primitives moved. Falls back to a rebuild when needed.
    fn update_dynamic_geometry(&mut self, geometry: &[AcousticGeometry], changed: &[usize]);

    fn memory_bytes(&self) -> usize;
}

#[derive(Debug, Clone)]
pub enum AccelerationStructure {
    Bvh(Bvh),
    Octree(Octree),
}

impl AccelerationStructure {
    pub fn build(geometry: &[AcousticGeometry], config: &AccelerationConfig) -> Self {
        match config.kind {
            AccelerationKind::Bvh => AccelerationStructure::Bvh(Bvh::build(geometry, config)),
            AccelerationKind::Octree => {
                AccelerationStructure::Octree(Octree::build(geometry, config))
            }
        }
    }

    pub fn kind(&self) -> AccelerationKind {
        match self {
            AccelerationStructure::Bvh(_) => AccelerationKind::Bvh,
            AccelerationStructure::Octree(_) => AccelerationKind::Octree,
        }
    }

    pub fn intersect_ray(
        &self,
        geometry: &[AcousticGeometry],
        ray: &Ray,
        t_max: f64,
        counters: &mut QueryCounters,
    ) -> Option<(usize, SurfaceHit)> {
        match self {
            AccelerationStructure::Bvh(s) => s.intersect_ray(geometry, ray, t_max, counters),
            AccelerationStructure::Octree(s) => s.intersect_ray(geometry, ray, t_max, counters),
        }
    }

    pub fn query_sphere(
        &self,
        geometry: &[AcousticGeometry],
        center: Point,
        radius: f64,
    ) -> Vec<usize> {
        match self {
            AccelerationStructure::Bvh(s) => s.query_sphere(geometry, center, radius),
            AccelerationStructure::Octree(s) => s.query_sphere(geometry, center, radius),
        }
    }

    pub fn update_dynamic_geometry(&mut self, geometry: &[AcousticGeometry], changed: &[usize]) {
        match self {
            AccelerationStructure::Bvh(s) => s.update_dynamic_geometry(geometry, changed),
            AccelerationStructure::Octree(s) => s.update_dynamic_geometry(geometry, changed),
        }
    }

    pub fn memory_bytes(&self) -> usize {
        match self {
            AccelerationStructure::Bvh(s) => s.memory_bytes(),
            AccelerationStructure::Octree(s) => s.memory_bytes(),
        }
    }
}

/// Tests one primitive and keeps it if it beats the current best.
///
/// Shared by both structures so they agree on tie-breaking.
pub(crate) fn test_primitive(
    geometry: &[AcousticGeometry],
    index: usize,
    ray: &Ray,
    t_max: f64,
    best: &mut Option<(usize, SurfaceHit)>,
    counters: &mut QueryCounters,
) {
    counters.intersection_tests += 1;
    let limit = best.map_or(t_max, |(_, h)| h.t);
    // Inclusive limit so an equal-distance hit can win the index tie-break
    let Some(hit) = geometry[index].intersect(ray, next_up(limit)) else {
        return;
    };
    let better = match best {
        None => true,
        Some((bi, bh)) => hit.t < bh.t || (hit.t == bh.t && index < *bi),
    };
    if better {
        counters.intersections_found += 1;
        *best = Some((index, hit));
    }
}

fn next_up(x: f64) -> f64 {
    if x.is_finite() {
        x + x.abs() * f64::EPSILON + f64::MIN_POSITIVE
    } else {
        x
    }
}
