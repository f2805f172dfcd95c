//! Per-ray transport: surface loss, reflection, deterministic paths.
//!
//! Everything here works on one immutable [`SceneSnapshot`] and a read-only
//! [`TraceContext`], so rays can be traced on any thread.

pub mod absorption;
pub mod diffraction;
pub mod early_reflections;
pub mod reflection;
pub mod tracer;

use crate::geom::bboxes::Aabb;
use crate::geom::ray::Ray;
use crate::sim::diagnostics::QueryCounters;
use crate::sim::rays::{RayKind, TracingParameters};
use crate::sim::scene::SceneSnapshot;
use crate::{Point, Vector};

use self::absorption::{AirAbsorption, AngleDependent};

/// Offset applied to new ray origins off a surface.
pub const SURFACE_OFFSET: f64 = 1e-6;

/// Read-only state shared by every ray of a pass.
pub struct TraceContext<'a> {
    pub scene: &'a SceneSnapshot,
    pub params: &'a TracingParameters,
    pub air: AirAbsorption,
    pub absorption: AngleDependent,
    pub band_centers: Vec<f64>,
    /// Capture sphere center. `None` traces without a listener.
    pub listener: Option<Point>,
    /// Absolute per-band energy below which a ray is dropped.
    pub energy_floor: f64,
    /// Bounds of the traced geometry. A ray leaving them cannot hit anything.
    pub bounds: Aabb,
}

impl<'a> TraceContext<'a> {
    /// `ray_energy` is the per-band energy every ray starts with.
    pub fn new(
        scene: &'a SceneSnapshot,
        params: &'a TracingParameters,
        listener: Option<Point>,
        ray_energy: f64,
    ) -> Self {
        let band_centers = params.bands.centers();
        let air = if params.enable_air_absorption {
            AirAbsorption::iso9613(
                &band_centers,
                params.air_temperature,
                params.air_humidity,
                101.325,
            )
        } else {
            AirAbsorption::none(band_centers.len())
        };
        Self {
            scene,
            params,
            air,
            absorption: AngleDependent::default(),
            band_centers,
            listener,
            energy_floor: params.min_energy_threshold * ray_energy,
            bounds: scene.bounds(),
        }
    }

    pub fn band_count(&self) -> usize {
        self.band_centers.len()
    }

    /// Energy gain of a point source seen through the listener sphere at `distance`.
    ///
    /// Matches the expected stochastic capture: a disk of radius `r` at distance
    /// `d` intercepts `r^2 / (4 d^2)` of a uniformly emitted unit energy.
    pub fn point_gain(&self, distance: f64) -> f64 {
        let r = self.params.listener_radius;
        let d = distance.max(r);
        r * r / (4.0 * d * d)
    }

    /// Per-band energy of a deterministic path with extra per-band `factors`.
    pub fn path_energy(&self, length: f64, factors: Option<&[f64]>) -> Vec<f64> {
        let gain = self.point_gain(length);
        (0..self.band_count())
            .map(|b| {
                let extra = factors.map_or(1.0, |f| f[b]);
                gain * self.air.factor(b, length) * extra
            })
            .collect()
    }
}

/// One arrival at the listener.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerCapture {
    /// Seconds after emission.
    pub delay: f64,
    pub energy: Vec<f64>,
    /// Unit vector from the listener towards where the sound comes from.
    pub arrival_direction: Vector,
    pub kind: RayKind,
    /// Exact path (direct, image source, diffraction) rather than a ray sample.
    pub deterministic: bool,
    /// Start of the captured segment.
    pub segment_origin: Point,
    /// Travel time at `segment_origin`.
    pub segment_origin_time: f64,
    /// First point after the source on the path.
    pub first_point: Point,
}

impl ListenerCapture {
    pub fn total_energy(&self) -> f64 {
        self.energy.iter().sum()
    }

    /// Deterministic arrival along a straight last leg `from -> listener`.
    pub fn deterministic(
        kind: RayKind,
        length: f64,
        speed_of_sound: f64,
        energy: Vec<f64>,
        from: Point,
        listener: Point,
    ) -> Self {
        Self {
            delay: length / speed_of_sound,
            energy,
            arrival_direction: (from - listener).normalize().unwrap_or(Vector::zero()),
            kind,
            deterministic: true,
            segment_origin: from,
            segment_origin_time: 0.0,
            first_point: from,
        }
    }
}

/// Whether the open segment between `a` and `b` is free of geometry.
///
/// Both ends are excluded so points lying on a surface do not block themselves.
/// Without an acceleration structure every segment is clear (free field).
pub fn clear_between(
    scene: &SceneSnapshot,
    a: Point,
    b: Point,
    counters: &mut QueryCounters,
) -> bool {
    let dist = a.distance(&b);
    if dist <= 2.0 * SURFACE_OFFSET {
        return true;
    }
    let Some(ray) = Ray::from_points(a, b) else {
        return true;
    };
    let Some(ray) = Ray::new(ray.point_at(SURFACE_OFFSET), ray.direction) else {
        return true;
    };
    scene
        .intersect(&ray, dist - 2.0 * SURFACE_OFFSET, counters)
        .is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::accel::AccelerationStructure;
    use crate::sim::accel::test_scenes::shoebox;
    use crate::sim::materials::AcousticMaterial;
    use std::sync::Arc;

    fn room() -> SceneSnapshot {
        let m = Arc::new(AcousticMaterial::uniform("m", 7, 0.1, 0.0));
        let (mut scene, _) = SceneSnapshot::new(1, shoebox(4.0, 3.0, 5.0, m));
        scene.structure = Some(AccelerationStructure::build(
            &scene.geometry,
            &Default::default(),
        ));
        scene
    }

    #[test]
    fn test_clear_between_ignores_endpoints_on_walls() {
        let scene = room();
        let mut counters = QueryCounters::default();
        // Both points lie on walls; nothing in between
        let a = Point::new(0.0, 1.0, 1.0);
        let b = Point::new(4.0, 1.0, 1.0);
        assert!(clear_between(&scene, a, b, &mut counters));
        // Leaving the room is blocked
        let c = Point::new(2.0, 1.0, 7.0);
        assert!(!clear_between(&scene, Point::new(2.0, 1.0, 1.0), c, &mut counters));
    }

    #[test]
    fn test_point_gain() {
        let scene = room();
        let params = TracingParameters::new();
        let ctx = TraceContext::new(&scene, &params, None, 1.0);
        let r = params.listener_radius;
        assert!((ctx.point_gain(2.0) - r * r / 16.0).abs() < 1e-15);
        // Clamped inside the listener sphere
        assert_eq!(ctx.point_gain(0.0), ctx.point_gain(r));
        assert_eq!(ctx.band_count(), 7);
    }
}
