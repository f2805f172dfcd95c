//! Ray casting infrastructure.
//!
//! This module provides a Ray struct and closed-form ray/primitive
//! intersection tests (triangle, sphere, box, capped cylinder) used by
//! the acoustic acceleration structures.

use crate::geom::bboxes::Aabb;
use crate::{Point, Vector};

/// Hits closer than this to the ray origin are ignored (self-intersection guard).
pub const RAY_T_MIN: f64 = 1e-9;

/// A ray defined by an origin point and a unit direction vector.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// Origin point of the ray
    pub origin: Point,
    /// Normalized direction vector
    pub direction: Vector,
    /// Component-wise reciprocal of `direction` (infinite on zero components)
    pub inv_direction: Vector,
}

/// Geometric result of a ray/primitive test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    /// Ray parameter (distance, since the direction is unit length)
    pub t: f64,
    /// Unit geometric normal (not oriented towards the ray)
    pub normal: Vector,
    /// Local parametric coordinates on the primitive
    pub uv: (f64, f64),
}

impl Ray {
    /// Creates a new ray from origin point and direction vector.
    ///
    /// The direction vector is automatically normalized.
    /// Returns `None` for zero-length or non-finite directions.
    pub fn new(origin: Point, direction: Vector) -> Option<Self> {
        let direction = direction.normalize()?;
        if !origin.is_finite() {
            return None;
        }
        Some(Self {
            origin,
            direction,
            inv_direction: Vector::new(
                1.0 / direction.dx,
                1.0 / direction.dy,
                1.0 / direction.dz,
            ),
        })
    }

    /// Creates a ray from two points (origin to target).
    pub fn from_points(origin: Point, target: Point) -> Option<Self> {
        Self::new(origin, target - origin)
    }

    /// Returns the point along the ray at parameter t.
    pub fn point_at(&self, t: f64) -> Point {
        self.origin + self.direction * t
    }

    /// Shortest distance between the segment `[origin, origin + t_end * dir]` and `pt`.
    ///
    /// Returns `(distance, t_closest)`.
    pub fn closest_approach(&self, pt: Point, t_end: f64) -> (f64, f64) {
        let t = (pt - self.origin).dot(self.direction).clamp(0.0, t_end.max(0.0));
        (self.point_at(t).distance(&pt), t)
    }
}

/// Möller-Trumbore ray/triangle test (double-sided).
pub fn intersect_triangle(
    ray: &Ray,
    v0: Point,
    v1: Point,
    v2: Point,
    t_max: f64,
) -> Option<SurfaceHit> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let pvec = ray.direction.cross(edge2);
    let det = edge1.dot(pvec);
    if det.abs() < 1e-14 {
        return None; // Parallel to the triangle plane
    }
    let inv_det = 1.0 / det;
    let tvec = ray.origin - v0;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(edge1);
    let v = ray.direction.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(qvec) * inv_det;
    if t <= RAY_T_MIN || t >= t_max {
        return None;
    }
    let normal = edge1.cross(edge2).normalize()?;
    Some(SurfaceHit {
        t,
        normal,
        uv: (u, v),
    })
}

/// Ray/sphere test. Origins inside the sphere hit the far side.
pub fn intersect_sphere(ray: &Ray, center: Point, radius: f64, t_max: f64) -> Option<SurfaceHit> {
    let oc = ray.origin - center;
    let b = oc.dot(ray.direction);
    let c = oc.length_squared() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    let t = [-b - sq, -b + sq]
        .into_iter()
        .find(|&t| t > RAY_T_MIN && t < t_max)?;
    let p = ray.point_at(t);
    let normal = (p - center).normalize()?;
    let theta = normal.dz.clamp(-1.0, 1.0).acos() / std::f64::consts::PI;
    let phi = (normal.dy.atan2(normal.dx) / (2.0 * std::f64::consts::PI)).rem_euclid(1.0);
    Some(SurfaceHit {
        t,
        normal,
        uv: (phi, theta),
    })
}

/// Ray/box surface test. Origins inside the box hit the exit face.
pub fn intersect_box(ray: &Ray, bounds: &Aabb, t_max: f64) -> Option<SurfaceHit> {
    let (t0, t1) = bounds.intersect_ray(ray, f64::NEG_INFINITY, f64::INFINITY)?;
    let t = if t0 > RAY_T_MIN {
        t0
    } else if t1 > RAY_T_MIN {
        t1
    } else {
        return None;
    };
    if t >= t_max {
        return None;
    }

    // The face is the one whose plane lies closest to the hit point
    let p = ray.point_at(t);
    let mut best = (f64::INFINITY, 0, 1.0);
    for axis in 0..3 {
        let d_lo = (p.coord(axis) - bounds.min.coord(axis)).abs();
        let d_hi = (p.coord(axis) - bounds.max.coord(axis)).abs();
        if d_lo < best.0 {
            best = (d_lo, axis, -1.0);
        }
        if d_hi < best.0 {
            best = (d_hi, axis, 1.0);
        }
    }
    let (_, axis, sign) = best;
    let normal = match axis {
        0 => Vector::new(sign, 0.0, 0.0),
        1 => Vector::new(0.0, sign, 0.0),
        _ => Vector::new(0.0, 0.0, sign),
    };
    let (a, b) = ((axis + 1) % 3, (axis + 2) % 3);
    let rel = |k: usize| {
        let ext = bounds.extent(k);
        if ext > 0.0 {
            (p.coord(k) - bounds.min.coord(k)) / ext
        } else {
            0.0
        }
    };
    Some(SurfaceHit {
        t,
        normal,
        uv: (rel(a), rel(b)),
    })
}

/// Ray test against a capped cylinder.
///
/// `base` is the center of the bottom cap, `axis` a unit vector towards the top cap.
pub fn intersect_cylinder(
    ray: &Ray,
    base: Point,
    axis: Vector,
    radius: f64,
    height: f64,
    t_max: f64,
) -> Option<SurfaceHit> {
    let oc = ray.origin - base;
    let d_axial = ray.direction.dot(axis);
    let o_axial = oc.dot(axis);
    let d_perp = ray.direction - axis * d_axial;
    let o_perp = oc - axis * o_axial;

    let mut best: Option<SurfaceHit> = None;
    let mut consider = |hit: SurfaceHit| {
        if hit.t > RAY_T_MIN && hit.t < t_max && best.is_none_or(|b| hit.t < b.t) {
            best = Some(hit);
        }
    };

    // Lateral surface
    let a = d_perp.length_squared();
    if a > 1e-14 {
        let b = o_perp.dot(d_perp);
        let c = o_perp.length_squared() - radius * radius;
        let disc = b * b - a * c;
        if disc >= 0.0 {
            let sq = disc.sqrt();
            for t in [(-b - sq) / a, (-b + sq) / a] {
                let s = o_axial + t * d_axial;
                if (0.0..=height).contains(&s) {
                    let radial = o_perp + d_perp * t;
                    if let Some(normal) = radial.normalize() {
                        consider(SurfaceHit {
                            t,
                            normal,
                            uv: (0.0, s / height),
                        });
                    }
                }
            }
        }
    }

    // End caps
    if d_axial.abs() > 1e-14 {
        for (s_cap, sign) in [(0.0, -1.0), (height, 1.0)] {
            let t = (s_cap - o_axial) / d_axial;
            let radial = o_perp + d_perp * t;
            let r2 = radial.length_squared();
            if r2 <= radius * radius {
                consider(SurfaceHit {
                    t,
                    normal: axis * sign,
                    uv: (r2.sqrt() / radius, s_cap / height),
                });
            }
        }
    }

    best
}
