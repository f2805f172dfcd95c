use serde::{Deserialize, Serialize};

use crate::geom::EPS;
use crate::geom::point::Point;
use crate::geom::ray::Ray;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point,
    pub max: Point,
}

impl Aabb {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// An inverted box that any `expand` call will replace.
    pub fn empty() -> Self {
        Self {
            min: Point::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points(pts: &[Point]) -> Self {
        let (min, max) = bounding_box(pts);
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn expand_point(&mut self, pt: Point) {
        self.min = self.min.min(pt);
        self.max = self.max.max(pt);
    }

    pub fn surrounding(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Grows the box by `margin` on every side.
    pub fn padded(&self, margin: f64) -> Self {
        Self {
            min: Point::new(self.min.x - margin, self.min.y - margin, self.min.z - margin),
            max: Point::new(self.max.x + margin, self.max.y + margin, self.max.z + margin),
        }
    }

    pub fn centroid(&self) -> Point {
        Point::lerp(self.min, self.max, 0.5)
    }

    pub fn extent(&self, axis: usize) -> f64 {
        self.max.coord(axis) - self.min.coord(axis)
    }

    pub fn longest_axis(&self) -> usize {
        let (ex, ey, ez) = (self.extent(0), self.extent(1), self.extent(2));
        if ex >= ey && ex >= ez {
            0
        } else if ey >= ez {
            1
        } else {
            2
        }
    }

    pub fn surface_area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let (ex, ey, ez) = (self.extent(0), self.extent(1), self.extent(2));
        2.0 * (ex * ey + ey * ez + ez * ex)
    }

    pub fn contains(&self, pt: Point) -> bool {
        pt.x >= self.min.x - EPS
            && pt.x <= self.max.x + EPS
            && pt.y >= self.min.y - EPS
            && pt.y <= self.max.y + EPS
            && pt.z >= self.min.z - EPS
            && pt.z <= self.max.z + EPS
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        are_bboxes_overlapping(self.min, self.max, other.min, other.max)
    }

    /// Conservative sphere overlap (closest point on the box within `radius`).
    pub fn overlaps_sphere(&self, center: Point, radius: f64) -> bool {
        let mut d2 = 0.0;
        for axis in 0..3 {
            let c = center.coord(axis);
            let lo = self.min.coord(axis);
            let hi = self.max.coord(axis);
            if c < lo {
                d2 += (lo - c).powi(2);
            } else if c > hi {
                d2 += (c - hi).powi(2);
            }
        }
        d2 <= radius * radius + EPS
    }

    /// Slab test. Returns the entry/exit parameters clipped to `[t_min, t_max]`.
    pub fn intersect_ray(&self, ray: &Ray, t_min: f64, t_max: f64) -> Option<(f64, f64)> {
        let mut t0 = t_min;
        let mut t1 = t_max;
        for axis in 0..3 {
            let o = ray.origin.coord(axis);
            let inv = ray.inv_direction.coord(axis);
            let mut near = (self.min.coord(axis) - o) * inv;
            let mut far = (self.max.coord(axis) - o) * inv;
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }
            // NaN from 0 * inf (ray on a slab plane) keeps the previous bound
            if near > t0 {
                t0 = near;
            }
            if far < t1 {
                t1 = far;
            }
            if t0 > t1 {
                return None;
            }
        }
        Some((t0, t1))
    }
}

/// Checks whether two bounding boxes overlap.
///
/// Takes min and max corners of each bbox.
/// Returns true if boxes overlap (including touching).
pub fn are_bboxes_overlapping(min1: Point, max1: Point, min2: Point, max2: Point) -> bool {
    // Boxes don't overlap if separated along any axis
    if max1.x < min2.x - EPS || min1.x > max2.x + EPS {
        return false;
    }
    if max1.y < min2.y - EPS || min1.y > max2.y + EPS {
        return false;
    }
    if max1.z < min2.z - EPS || min1.z > max2.z + EPS {
        return false;
    }
    true
}

pub fn bounding_box(pts: &[Point]) -> (Point, Point) {
    pts.iter().fold(
        (
            Point::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        ),
        |(lo, hi), p| (lo.min(*p), hi.max(*p)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vector;

    fn unit_box() -> Aabb {
        Aabb::new(Point::new(0., 0., 0.), Point::new(1., 1., 1.))
    }

    #[test]
    fn test_overlapping() {
        let a = unit_box();
        let b = Aabb::new(Point::new(0.5, 0.5, 0.5), Point::new(2., 2., 2.));
        let c = Aabb::new(Point::new(3., 3., 3.), Point::new(4., 4., 4.));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_sphere_overlap() {
        let a = unit_box();
        assert!(a.overlaps_sphere(Point::new(1.5, 0.5, 0.5), 0.6));
        assert!(!a.overlaps_sphere(Point::new(2.0, 2.0, 2.0), 1.0));
        // Inside counts as overlap
        assert!(a.overlaps_sphere(Point::new(0.5, 0.5, 0.5), 0.01));
    }

    #[test]
    fn test_ray_slab() {
        let a = unit_box();
        let ray = Ray::new(Point::new(-1., 0.5, 0.5), Vector::new(1., 0., 0.)).unwrap();
        let (t0, t1) = a.intersect_ray(&ray, 0.0, f64::INFINITY).unwrap();
        assert!((t0 - 1.0).abs() < 1e-12);
        assert!((t1 - 2.0).abs() < 1e-12);

        let miss = Ray::new(Point::new(-1., 2.5, 0.5), Vector::new(1., 0., 0.)).unwrap();
        assert!(a.intersect_ray(&miss, 0.0, f64::INFINITY).is_none());
    }

    #[test]
    fn test_surface_area_and_axis() {
        let a = Aabb::new(Point::new(0., 0., 0.), Point::new(3., 1., 2.));
        assert!((a.surface_area() - 22.0).abs() < 1e-12);
        assert_eq!(a.longest_axis(), 0);
        assert_eq!(Aabb::empty().surface_area(), 0.0);
    }
}
