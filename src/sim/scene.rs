//! Geometry and material store.
//!
//! A scene is a flat list of [`AcousticGeometry`] primitives, each referencing
//! one shared [`AcousticMaterial`]. The store is immutable during a trace pass;
//! updates publish a new [`SceneSnapshot`] through [`SharedScene`].

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::geom::bboxes::Aabb;
use crate::geom::ray::{
    Ray, SurfaceHit, intersect_box, intersect_cylinder, intersect_sphere, intersect_triangle,
};
use crate::sim::accel::{AccelerationConfig, AccelerationStructure};
use crate::sim::diagnostics::QueryCounters;
use crate::sim::materials::AcousticMaterial;
use crate::{Point, Vector};

/// Primitives with a surface area below this are degenerate.
const DEGENERATE_AREA: f64 = 1e-12;

/// Adjacent mesh triangles meeting at more than this angle form a diffracting edge.
const SHARP_EDGE_COS: f64 = 0.866; // cos(30 deg)

/// Segments used to approximate a cylinder rim for diffraction.
const RIM_SEGMENTS: usize = 16;

/// Closed set of primitive shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveShape {
    Triangle {
        vertices: [Point; 3],
    },
    /// Planar convex quad, vertices in winding order.
    Quad {
        vertices: [Point; 4],
    },
    Sphere {
        center: Point,
        radius: f64,
    },
    /// Axis-aligned box.
    Box {
        min: Point,
        max: Point,
    },
    /// Capped cylinder between the centers of its two caps.
    Cylinder {
        base: Point,
        top: Point,
        radius: f64,
    },
    Mesh {
        vertices: Vec<Point>,
        indices: Vec<[usize; 3]>,
    },
}

impl PrimitiveShape {
    fn bounds(&self) -> Aabb {
        match self {
            PrimitiveShape::Triangle { vertices } => Aabb::from_points(vertices),
            PrimitiveShape::Quad { vertices } => Aabb::from_points(vertices),
            PrimitiveShape::Sphere { center, radius } => {
                Aabb::new(*center, *center).padded(radius.abs())
            }
            PrimitiveShape::Box { min, max } => Aabb::new(min.min(*max), max.max(*min)),
            PrimitiveShape::Cylinder { base, top, radius } => {
                Aabb::from_points(&[*base, *top]).padded(radius.abs())
            }
            PrimitiveShape::Mesh { vertices, .. } => Aabb::from_points(vertices),
        }
    }

    fn surface_area(&self) -> f64 {
        match self {
            PrimitiveShape::Triangle { vertices } => {
                triangle_area(vertices[0], vertices[1], vertices[2])
            }
            PrimitiveShape::Quad { vertices } => {
                triangle_area(vertices[0], vertices[1], vertices[2])
                    + triangle_area(vertices[0], vertices[2], vertices[3])
            }
            PrimitiveShape::Sphere { radius, .. } => 4.0 * std::f64::consts::PI * radius * radius,
            PrimitiveShape::Box { min, max } => Aabb::new(*min, *max).surface_area(),
            PrimitiveShape::Cylinder { base, top, radius } => {
                let h = base.distance(top);
                2.0 * std::f64::consts::PI * radius * (radius + h)
            }
            PrimitiveShape::Mesh { vertices, indices } => indices
                .iter()
                .filter(|tri| tri.iter().all(|&i| i < vertices.len()))
                .map(|tri| triangle_area(vertices[tri[0]], vertices[tri[1]], vertices[tri[2]]))
                .sum(),
        }
    }

    fn is_finite(&self) -> bool {
        match self {
            PrimitiveShape::Triangle { vertices } => vertices.iter().all(Point::is_finite),
            PrimitiveShape::Quad { vertices } => vertices.iter().all(Point::is_finite),
            PrimitiveShape::Sphere { center, radius } => center.is_finite() && radius.is_finite(),
            PrimitiveShape::Box { min, max } => min.is_finite() && max.is_finite(),
            PrimitiveShape::Cylinder { base, top, radius } => {
                base.is_finite() && top.is_finite() && radius.is_finite()
            }
            PrimitiveShape::Mesh { vertices, indices } => {
                vertices.iter().all(Point::is_finite)
                    && indices.iter().flatten().all(|&i| i < vertices.len())
            }
        }
    }

    fn has_zero_extent(&self) -> bool {
        match self {
            PrimitiveShape::Sphere { radius, .. } => *radius <= 0.0,
            PrimitiveShape::Cylinder { base, top, radius } => {
                *radius <= 0.0 || base.distance(top) < 1e-9
            }
            PrimitiveShape::Mesh { indices, .. } => indices.is_empty(),
            _ => false,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            PrimitiveShape::Triangle { .. } => "triangle",
            PrimitiveShape::Quad { .. } => "quad",
            PrimitiveShape::Sphere { .. } => "sphere",
            PrimitiveShape::Box { .. } => "box",
            PrimitiveShape::Cylinder { .. } => "cylinder",
            PrimitiveShape::Mesh { .. } => "mesh",
        }
    }
}

/// One scene primitive with its material and precomputed bounds.
#[derive(Debug, Clone)]
pub struct AcousticGeometry {
    pub shape: PrimitiveShape,
    pub material: Arc<AcousticMaterial>,
    pub bounds: Aabb,
    degenerate: bool,
}

impl AcousticGeometry {
    pub fn new(shape: PrimitiveShape, material: Arc<AcousticMaterial>) -> Self {
        let degenerate = !shape.is_finite()
            || shape.has_zero_extent()
            || shape.surface_area() < DEGENERATE_AREA;
        let bounds = shape.bounds();
        Self {
            shape,
            material,
            bounds,
            degenerate,
        }
    }

    pub fn triangle(vertices: [Point; 3], material: Arc<AcousticMaterial>) -> Self {
        Self::new(PrimitiveShape::Triangle { vertices }, material)
    }

    pub fn quad(vertices: [Point; 4], material: Arc<AcousticMaterial>) -> Self {
        Self::new(PrimitiveShape::Quad { vertices }, material)
    }

    pub fn sphere(center: Point, radius: f64, material: Arc<AcousticMaterial>) -> Self {
        Self::new(PrimitiveShape::Sphere { center, radius }, material)
    }

    pub fn cuboid(min: Point, max: Point, material: Arc<AcousticMaterial>) -> Self {
        Self::new(PrimitiveShape::Box { min, max }, material)
    }

    pub fn cylinder(base: Point, top: Point, radius: f64, material: Arc<AcousticMaterial>) -> Self {
        Self::new(PrimitiveShape::Cylinder { base, top, radius }, material)
    }

    pub fn mesh(
        vertices: Vec<Point>,
        indices: Vec<[usize; 3]>,
        material: Arc<AcousticMaterial>,
    ) -> Self {
        Self::new(PrimitiveShape::Mesh { vertices, indices }, material)
    }

    /// Zero-area, zero-radius or malformed primitives are kept but never intersected.
    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    pub fn kind_name(&self) -> &'static str {
        self.shape.kind_name()
    }

    pub fn surface_area(&self) -> f64 {
        self.shape.surface_area()
    }

    /// Closest hit in `(RAY_T_MIN, t_max)`.
    pub fn intersect(&self, ray: &Ray, t_max: f64) -> Option<SurfaceHit> {
        if self.degenerate {
            return None;
        }
        match &self.shape {
            PrimitiveShape::Triangle { vertices } => {
                intersect_triangle(ray, vertices[0], vertices[1], vertices[2], t_max)
            }
            PrimitiveShape::Quad { vertices } => {
                let first = intersect_triangle(ray, vertices[0], vertices[1], vertices[2], t_max);
                let limit = first.map_or(t_max, |h| h.t);
                intersect_triangle(ray, vertices[0], vertices[2], vertices[3], limit).or(first)
            }
            PrimitiveShape::Sphere { center, radius } => {
                intersect_sphere(ray, *center, *radius, t_max)
            }
            PrimitiveShape::Box { .. } => intersect_box(ray, &self.bounds, t_max),
            PrimitiveShape::Cylinder { base, top, radius } => {
                let axis = (*top - *base).normalize()?;
                intersect_cylinder(ray, *base, axis, *radius, base.distance(top), t_max)
            }
            PrimitiveShape::Mesh { vertices, indices } => {
                let mut best: Option<SurfaceHit> = None;
                for tri in indices {
                    let limit = best.map_or(t_max, |h| h.t);
                    if let Some(hit) = intersect_triangle(
                        ray,
                        vertices[tri[0]],
                        vertices[tri[1]],
                        vertices[tri[2]],
                        limit,
                    ) {
                        best = Some(hit);
                    }
                }
                best
            }
        }
    }

    /// Planar faces usable as image-source mirrors.
    pub fn faces(&self, geometry: usize) -> Vec<PlanarFace> {
        if self.degenerate {
            return Vec::new();
        }
        match &self.shape {
            PrimitiveShape::Triangle { vertices } => {
                PlanarFace::new(geometry, vertices.to_vec()).into_iter().collect()
            }
            PrimitiveShape::Quad { vertices } => {
                PlanarFace::new(geometry, vertices.to_vec()).into_iter().collect()
            }
            PrimitiveShape::Box { .. } => box_corners(&self.bounds)
                .into_iter()
                .filter_map(|quad| PlanarFace::new(geometry, quad.to_vec()))
                .collect(),
            PrimitiveShape::Mesh { vertices, indices } => indices
                .iter()
                .filter_map(|tri| {
                    PlanarFace::new(
                        geometry,
                        vec![vertices[tri[0]], vertices[tri[1]], vertices[tri[2]]],
                    )
                })
                .collect(),
            PrimitiveShape::Sphere { .. } | PrimitiveShape::Cylinder { .. } => Vec::new(),
        }
    }

    /// Boundary and sharp edges that can diffract sound.
    pub fn edges(&self, geometry: usize) -> Vec<DiffractionEdge> {
        if self.degenerate {
            return Vec::new();
        }
        let polygon_edges = |pts: &[Point]| -> Vec<DiffractionEdge> {
            let sum = pts
                .iter()
                .fold(Vector::zero(), |acc, p| acc + Vector::from_a_point(*p));
            let centroid = Point::origin() + sum * (1.0 / pts.len() as f64);
            (0..pts.len())
                .map(|i| {
                    let (a, b) = (pts[i], pts[(i + 1) % pts.len()]);
                    DiffractionEdge::new(geometry, a, b, [face_direction(a, b, centroid), None])
                })
                .collect()
        };
        match &self.shape {
            PrimitiveShape::Triangle { vertices } => polygon_edges(&vertices[..]),
            PrimitiveShape::Quad { vertices } => polygon_edges(&vertices[..]),
            PrimitiveShape::Box { .. } => {
                let (lo, hi) = (self.bounds.min, self.bounds.max);
                let mut edges = Vec::with_capacity(12);
                for axis in 0..3 {
                    let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
                    for (su, sv) in [(false, false), (true, false), (false, true), (true, true)] {
                        let pick = |k: usize, high: bool| if high { hi.coord(k) } else { lo.coord(k) };
                        let mut a = [0.0; 3];
                        let mut b = [0.0; 3];
                        a[axis] = lo.coord(axis);
                        b[axis] = hi.coord(axis);
                        a[u] = pick(u, su);
                        b[u] = a[u];
                        a[v] = pick(v, sv);
                        b[v] = a[v];
                        // Adjacent faces run towards the opposite side along u and v
                        let mut du = [0.0; 3];
                        du[u] = if su { -1.0 } else { 1.0 };
                        let mut dv = [0.0; 3];
                        dv[v] = if sv { -1.0 } else { 1.0 };
                        edges.push(DiffractionEdge::new(
                            geometry,
                            Point::new(a[0], a[1], a[2]),
                            Point::new(b[0], b[1], b[2]),
                            [
                                Some(Vector::new(du[0], du[1], du[2])),
                                Some(Vector::new(dv[0], dv[1], dv[2])),
                            ],
                        ));
                    }
                }
                edges
            }
            PrimitiveShape::Cylinder { base, top, radius } => {
                let Some(axis) = (*top - *base).normalize() else {
                    return Vec::new();
                };
                let (t, b) = axis.orthonormal_basis();
                let mut edges = Vec::with_capacity(2 * RIM_SEGMENTS);
                for (center, along) in [(*base, axis), (*top, -axis)] {
                    let rim: Vec<Point> = (0..RIM_SEGMENTS)
                        .map(|i| {
                            let phi = 2.0 * std::f64::consts::PI * i as f64 / RIM_SEGMENTS as f64;
                            center + (t * phi.cos() + b * phi.sin()) * *radius
                        })
                        .collect();
                    // Cap towards the axis, side towards the other cap
                    edges.extend(polygon_edges(&rim[..]).into_iter().map(|mut e| {
                        e.faces[1] = Some(along);
                        e
                    }));
                }
                edges
            }
            PrimitiveShape::Mesh { vertices, indices } => mesh_edges(geometry, vertices, indices),
            PrimitiveShape::Sphere { .. } => Vec::new(),
        }
    }
}

fn triangle_area(a: Point, b: Point, c: Point) -> f64 {
    0.5 * (b - a).cross(c - a).length()
}

/// The six faces of a box as outward-wound quads.
fn box_corners(b: &Aabb) -> [[Point; 4]; 6] {
    let (l, h) = (b.min, b.max);
    let p = Point::new;
    [
        [p(l.x, l.y, l.z), p(l.x, h.y, l.z), p(h.x, h.y, l.z), p(h.x, l.y, l.z)], // -z
        [p(l.x, l.y, h.z), p(h.x, l.y, h.z), p(h.x, h.y, h.z), p(l.x, h.y, h.z)], // +z
        [p(l.x, l.y, l.z), p(h.x, l.y, l.z), p(h.x, l.y, h.z), p(l.x, l.y, h.z)], // -y
        [p(l.x, h.y, l.z), p(l.x, h.y, h.z), p(h.x, h.y, h.z), p(h.x, h.y, l.z)], // +y
        [p(l.x, l.y, l.z), p(l.x, l.y, h.z), p(l.x, h.y, h.z), p(l.x, h.y, l.z)], // -x
        [p(h.x, l.y, l.z), p(h.x, h.y, l.z), p(h.x, h.y, h.z), p(h.x, l.y, h.z)], // +x
    ]
}

fn mesh_edges(geometry: usize, vertices: &[Point], indices: &[[usize; 3]]) -> Vec<DiffractionEdge> {
    // Per edge: normal and in-face direction of every adjacent triangle
    let mut adjacency: HashMap<(usize, usize), Vec<(Vector, Option<Vector>)>> = HashMap::new();
    for tri in indices {
        let Some(n) = Vector::normal(vertices[tri[0]], vertices[tri[1]], vertices[tri[2]]) else {
            continue;
        };
        for k in 0..3 {
            let (i, j) = (tri[k], tri[(k + 1) % 3]);
            let opposite = vertices[tri[(k + 2) % 3]];
            let dir = face_direction(vertices[i], vertices[j], opposite);
            adjacency.entry((i.min(j), i.max(j))).or_default().push((n, dir));
        }
    }
    let mut edges: Vec<_> = adjacency
        .into_iter()
        .filter(|(_, sides)| {
            sides.len() == 1
                || (sides.len() == 2 && sides[0].0.dot(sides[1].0).abs() < SHARP_EDGE_COS)
        })
        .collect();
    edges.sort_unstable_by_key(|(k, _)| *k);
    edges
        .into_iter()
        .map(|((i, j), sides)| {
            let faces = [sides[0].1, sides.get(1).and_then(|s| s.1)];
            DiffractionEdge::new(geometry, vertices[i], vertices[j], faces)
        })
        .collect()
}

/// Unit vector perpendicular to edge `a -> b`, pointing from the edge towards `inside`.
fn face_direction(a: Point, b: Point, inside: Point) -> Option<Vector> {
    let e = (b - a).normalize()?;
    let v = inside - a;
    (v - e * v.dot(e)).normalize()
}

/// Convex planar polygon owned by a geometry.
#[derive(Debug, Clone)]
pub struct PlanarFace {
    pub geometry: usize,
    pub vertices: Vec<Point>,
    pub normal: Vector,
}

impl PlanarFace {
    pub fn new(geometry: usize, vertices: Vec<Point>) -> Option<Self> {
        if vertices.len() < 3 {
            return None;
        }
        let normal = Vector::normal(vertices[0], vertices[1], vertices[2])?;
        Some(Self {
            geometry,
            vertices,
            normal,
        })
    }

    /// Signed distance from the face plane.
    pub fn signed_distance(&self, pt: Point) -> f64 {
        (pt - self.vertices[0]).dot(self.normal)
    }

    /// Mirror image of `pt` about the face plane.
    pub fn mirror(&self, pt: Point) -> Point {
        pt - self.normal * (2.0 * self.signed_distance(pt))
    }

    /// Whether a point on the face plane lies inside the polygon (edges included).
    pub fn contains(&self, pt: Point) -> bool {
        let n = self.vertices.len();
        (0..n).all(|i| {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            (b - a).cross(pt - a).dot(self.normal) >= -1e-9
        })
    }

    /// Intersection of the segment `a -> b` with the face plane, if it crosses it.
    pub fn segment_plane_point(&self, a: Point, b: Point) -> Option<Point> {
        let da = self.signed_distance(a);
        let db = self.signed_distance(b);
        if da * db > 0.0 || (da - db).abs() < 1e-14 {
            return None;
        }
        Some(Point::lerp(a, b, da / (da - db)))
    }
}

/// A straight edge around which sound can bend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffractionEdge {
    pub geometry: usize,
    pub a: Point,
    pub b: Point,
    /// Unit directions, perpendicular to the edge, into each adjacent face.
    pub faces: [Option<Vector>; 2],
}

impl DiffractionEdge {
    pub fn new(geometry: usize, a: Point, b: Point, faces: [Option<Vector>; 2]) -> Self {
        Self {
            geometry,
            a,
            b,
            faces,
        }
    }

    /// Whether the path `from -> apex -> to` wraps around the solid side of the edge.
    ///
    /// Seen along the edge, some adjacent face must lie strictly inside the
    /// angle between the two legs. Inside corners of a room never satisfy this.
    pub fn bends_around(&self, from: Point, apex: Point, to: Point) -> bool {
        let Some(e) = (self.b - self.a).normalize() else {
            return false;
        };
        let perp = |v: Vector| (v - e * v.dot(e)).normalize();
        let (Some(u), Some(w)) = (perp(from - apex), perp(to - apex)) else {
            return false;
        };
        let n = u.cross(w);
        if n.length() < 1e-9 {
            return false;
        }
        self.faces
            .iter()
            .flatten()
            .any(|&d| u.cross(d).dot(n) > 1e-12 && d.cross(w).dot(n) > 1e-12)
    }

    /// Direction pointing away from the adjacent faces, into free space.
    pub fn outward(&self) -> Option<Vector> {
        let sum = self
            .faces
            .iter()
            .flatten()
            .fold(Vector::zero(), |acc, &d| acc + d);
        (-sum).normalize()
    }

    pub fn length(&self) -> f64 {
        self.a.distance(&self.b)
    }

    /// Point on the edge minimising the path `from -> edge -> to`.
    ///
    /// The path length is convex along the edge, so a golden-section search converges.
    pub fn shortest_path_point(&self, from: Point, to: Point) -> Point {
        let path = |s: f64| {
            let p = Point::lerp(self.a, self.b, s);
            from.distance(&p) + p.distance(&to)
        };
        let inv_phi = (5.0_f64.sqrt() - 1.0) / 2.0;
        let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
        let mut x1 = hi - inv_phi * (hi - lo);
        let mut x2 = lo + inv_phi * (hi - lo);
        let (mut f1, mut f2) = (path(x1), path(x2));
        for _ in 0..48 {
            if f1 <= f2 {
                hi = x2;
                x2 = x1;
                f2 = f1;
                x1 = hi - inv_phi * (hi - lo);
                f1 = path(x1);
            } else {
                lo = x1;
                x1 = x2;
                f1 = f2;
                x2 = lo + inv_phi * (hi - lo);
                f2 = path(x2);
            }
        }
        Point::lerp(self.a, self.b, 0.5 * (lo + hi))
    }
}

/// Per-hit data produced by an intersection query.
#[derive(Debug, Clone, Copy)]
pub struct RayIntersection<'a> {
    pub point: Point,
    /// Unit normal facing the incoming ray.
    pub normal: Vector,
    pub distance: f64,
    pub material: &'a AcousticMaterial,
    pub uv: (f64, f64),
    pub geometry: usize,
}

/// Immutable scene state shared by every trace pass.
#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    /// Bumped on every geometry replacement or dynamic update.
    pub version: u64,
    pub geometry: Vec<AcousticGeometry>,
    /// `None` until an acceleration structure is built: traces run in free field.
    pub structure: Option<AccelerationStructure>,
    pub faces: Vec<PlanarFace>,
    pub edges: Vec<DiffractionEdge>,
}

impl SceneSnapshot {
    /// Copies the geometry in. Degenerate primitives are kept and reported by index.
    pub fn new(version: u64, geometry: Vec<AcousticGeometry>) -> (Self, Vec<usize>) {
        let mut degenerate = Vec::new();
        let mut faces = Vec::new();
        let mut edges = Vec::new();
        for (i, g) in geometry.iter().enumerate() {
            if g.is_degenerate() {
                warn!("Degenerate {} primitive #{i} will be skipped", g.kind_name());
                degenerate.push(i);
                continue;
            }
            faces.extend(g.faces(i));
            edges.extend(g.edges(i));
        }
        let snapshot = Self {
            version,
            geometry,
            structure: None,
            faces,
            edges,
        };
        (snapshot, degenerate)
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.is_empty()
    }

    /// Same scene and version with a freshly built acceleration structure.
    pub fn with_structure(&self, config: &AccelerationConfig) -> Self {
        Self {
            version: self.version,
            geometry: self.geometry.clone(),
            structure: Some(AccelerationStructure::build(&self.geometry, config)),
            faces: self.faces.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Replaces the primitives at the given indices and refits the structure.
    ///
    /// Returns the new snapshot and the indices of degenerate primitives.
    pub fn with_updates(
        &self,
        version: u64,
        updates: Vec<(usize, AcousticGeometry)>,
    ) -> crate::error::Result<(Self, Vec<usize>)> {
        let mut geometry = self.geometry.clone();
        let mut changed = Vec::with_capacity(updates.len());
        for (index, g) in updates {
            let Some(slot) = geometry.get_mut(index) else {
                return Err(crate::error::AcousticError::Geometry(format!(
                    "no primitive #{index} to update ({} in scene)",
                    self.geometry.len()
                )));
            };
            *slot = g;
            changed.push(index);
        }
        let (mut next, degenerate) = Self::new(version, geometry);
        next.structure = self.structure.clone().map(|mut s| {
            s.update_dynamic_geometry(&next.geometry, &changed);
            s
        });
        Ok((next, degenerate))
    }

    pub fn has_structure(&self) -> bool {
        self.structure.is_some()
    }

    /// Scene bounds over all non-degenerate primitives.
    pub fn bounds(&self) -> Aabb {
        self.geometry
            .iter()
            .filter(|g| !g.is_degenerate())
            .fold(Aabb::empty(), |acc, g| acc.surrounding(&g.bounds))
    }

    /// Closest hit through the acceleration structure. Free field without one.
    pub fn intersect(
        &self,
        ray: &Ray,
        t_max: f64,
        counters: &mut QueryCounters,
    ) -> Option<RayIntersection<'_>> {
        let structure = self.structure.as_ref()?;
        let (index, hit) = structure.intersect_ray(&self.geometry, ray, t_max, counters)?;
        let normal = if hit.normal.dot(ray.direction) > 0.0 {
            -hit.normal
        } else {
            hit.normal
        };
        Some(RayIntersection {
            point: ray.point_at(hit.t),
            normal,
            distance: hit.t,
            material: &self.geometry[index].material,
            uv: hit.uv,
            geometry: index,
        })
    }

    /// Straight-line visibility between two points.
    pub fn is_visible(&self, a: Point, b: Point, counters: &mut QueryCounters) -> bool {
        let dist = a.distance(&b);
        let Some(ray) = Ray::from_points(a, b) else {
            return true;
        };
        self.intersect(&ray, dist - 1e-6, counters).is_none()
    }

    /// Rough heap footprint in bytes.
    pub fn memory_bytes(&self) -> usize {
        let geometry: usize = self
            .geometry
            .iter()
            .map(|g| {
                std::mem::size_of::<AcousticGeometry>()
                    + match &g.shape {
                        PrimitiveShape::Mesh { vertices, indices } => {
                            vertices.len() * std::mem::size_of::<Point>()
                                + indices.len() * std::mem::size_of::<[usize; 3]>()
                        }
                        _ => 0,
                    }
            })
            .sum();
        let faces: usize = self
            .faces
            .iter()
            .map(|f| std::mem::size_of::<PlanarFace>() + f.vertices.len() * 24)
            .sum();
        geometry
            + faces
            + self.edges.len() * std::mem::size_of::<DiffractionEdge>()
            + self.structure.as_ref().map_or(0, |s| s.memory_bytes())
    }
}

/// Reference-counted scene published atomically.
///
/// Readers clone the current `Arc` and keep tracing against it while a writer
/// swaps in a rebuilt snapshot.
#[derive(Debug, Default)]
pub struct SharedScene {
    current: RwLock<Arc<SceneSnapshot>>,
}

impl SharedScene {
    pub fn new(snapshot: SceneSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot in effect right now.
    pub fn load(&self) -> Arc<SceneSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn publish(&self, snapshot: SceneSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::materials::FrequencyBands;

    fn material() -> Arc<AcousticMaterial> {
        Arc::new(AcousticMaterial::concrete(&FrequencyBands::octaves()))
    }

    #[test]
    fn test_degenerate_detection() {
        let m = material();
        let p = Point::new(1.0, 1.0, 1.0);
        assert!(AcousticGeometry::triangle([p, p, p], m.clone()).is_degenerate());
        assert!(AcousticGeometry::sphere(p, 0.0, m.clone()).is_degenerate());
        assert!(AcousticGeometry::cylinder(p, p, 1.0, m.clone()).is_degenerate());
        assert!(AcousticGeometry::mesh(vec![p], vec![[0, 1, 2]], m.clone()).is_degenerate());
        assert!(!AcousticGeometry::sphere(p, 0.5, m).is_degenerate());
    }

    #[test]
    fn test_quad_intersection_second_triangle() {
        let quad = AcousticGeometry::quad(
            [
                Point::new(0.0, 0.0, 0.0),
                Point::new(2.0, 0.0, 0.0),
                Point::new(2.0, 2.0, 0.0),
                Point::new(0.0, 2.0, 0.0),
            ],
            material(),
        );
        // Point (0.2, 1.8) lies in triangle (v0, v2, v3)
        let ray = Ray::new(Point::new(0.2, 1.8, 3.0), Vector::new(0.0, 0.0, -1.0)).unwrap();
        let hit = quad.intersect(&ray, f64::INFINITY).unwrap();
        assert!((hit.t - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_box_faces_and_edges() {
        let b = AcousticGeometry::cuboid(Point::origin(), Point::new(1.0, 2.0, 3.0), material());
        let faces = b.faces(7);
        assert_eq!(faces.len(), 6);
        assert!(faces.iter().all(|f| f.geometry == 7));
        let center = b.bounds.centroid();
        // Faces are wound so the normal points out of the box
        for f in &faces {
            assert!(f.signed_distance(center) < 0.0);
        }
        let edges = b.edges(7);
        assert_eq!(edges.len(), 12);
        let total: f64 = edges.iter().map(|e| e.length()).sum();
        assert!((total - 4.0 * (1.0 + 2.0 + 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_mesh_edges_open_vs_closed() {
        // Flat square of two triangles: 4 boundary edges, diagonal not sharp
        let v = vec![
            Point::new(0.0, 0.0, 0.0),
            Point::new(1.0, 0.0, 0.0),
            Point::new(1.0, 1.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
        ];
        let mesh = AcousticGeometry::mesh(v, vec![[0, 1, 2], [0, 2, 3]], material());
        assert_eq!(mesh.edges(0).len(), 4);
        assert_eq!(mesh.faces(0).len(), 2);
    }

    #[test]
    fn test_face_mirror_and_contains() {
        let face = PlanarFace::new(
            0,
            vec![
                Point::new(0.0, 0.0, 0.0),
                Point::new(1.0, 0.0, 0.0),
                Point::new(1.0, 1.0, 0.0),
                Point::new(0.0, 1.0, 0.0),
            ],
        )
        .unwrap();
        let img = face.mirror(Point::new(0.5, 0.5, 2.0));
        assert!(img.is_close(&Point::new(0.5, 0.5, -2.0)));
        assert!(face.contains(Point::new(0.5, 0.5, 0.0)));
        assert!(!face.contains(Point::new(1.5, 0.5, 0.0)));
        let p = face
            .segment_plane_point(Point::new(0.5, 0.5, 1.0), Point::new(0.5, 0.5, -1.0))
            .unwrap();
        assert!(p.is_close(&Point::new(0.5, 0.5, 0.0)));
    }

    #[test]
    fn test_edge_shortest_path() {
        let edge = DiffractionEdge::new(
            0,
            Point::new(0.0, -5.0, 0.0),
            Point::new(0.0, 5.0, 0.0),
            [Some(Vector::new(0.0, 0.0, -1.0)), None],
        );
        let p = edge.shortest_path_point(Point::new(-1.0, -1.0, 1.0), Point::new(1.0, 1.0, 1.0));
        assert!(p.y.abs() < 1e-6, "apex should be at y=0, got {}", p.y);
    }

    #[test]
    fn test_shared_scene_swap_keeps_old_snapshot() {
        let shared = SharedScene::new(SceneSnapshot::default());
        let old = shared.load();
        let (next, _) = SceneSnapshot::new(3, vec![AcousticGeometry::sphere(
            Point::origin(),
            1.0,
            material(),
        )]);
        shared.publish(next);
        assert_eq!(old.version, 0);
        assert!(old.is_empty());
        assert_eq!(shared.version(), 3);
        assert_eq!(shared.load().geometry.len(), 1);
    }

    #[test]
    fn test_free_field_without_structure() {
        let (snap, degenerate) = SceneSnapshot::new(1, vec![AcousticGeometry::sphere(
            Point::origin(),
            1.0,
            material(),
        )]);
        assert!(degenerate.is_empty());
        let ray = Ray::new(Point::new(-5.0, 0.0, 0.0), Vector::new(1.0, 0.0, 0.0)).unwrap();
        let mut counters = QueryCounters::default();
        assert!(snap.intersect(&ray, f64::INFINITY, &mut counters).is_none());
    }
}
