//! Loose-free octree over primitive bounds.
//!
//! A primitive is stored in every leaf cell its bounds overlap, so a cell can
//! be tested in isolation. Cells split once they exceed the leaf capacity.

use log::debug;

use crate::Point;
use crate::geom::bboxes::Aabb;
use crate::geom::ray::{Ray, SurfaceHit};
use crate::sim::diagnostics::QueryCounters;
use crate::sim::scene::AcousticGeometry;

use super::{AccelerationConfig, SpatialIndex, test_primitive};

const CELL_PAD: f64 = 1e-7;

#[derive(Debug, Clone)]
struct OctreeNode {
    bounds: Aabb,
    depth: usize,
    /// Index of the first of eight consecutive children.
    children: Option<usize>,
    items: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Octree {
    nodes: Vec<OctreeNode>,
    prim_bounds: Vec<Aabb>,
    max_depth: usize,
    leaf_capacity: usize,
}

impl Octree {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.children.is_none()).count()
    }

    fn empty(prim_bounds: Vec<Aabb>, config: &AccelerationConfig) -> Self {
        Self {
            nodes: Vec::new(),
            prim_bounds,
            max_depth: config.octree_max_depth,
            leaf_capacity: config.octree_leaf_capacity.max(1),
        }
    }

    /// Cubic root cell around all active primitives.
    fn root_bounds(bounds: &Aabb) -> Aabb {
        let c = bounds.centroid();
        let half = (0..3)
            .map(|a| bounds.extent(a))
            .fold(0.0_f64, f64::max)
            .max(1e-6)
            * 0.5;
        Aabb::new(
            Point::new(c.x - half, c.y - half, c.z - half),
            Point::new(c.x + half, c.y + half, c.z + half),
        )
        .padded(CELL_PAD)
    }

    fn child_bounds(bounds: &Aabb, octant: usize) -> Aabb {
        let c = bounds.centroid();
        let pick = |bit: usize, lo: f64, mid: f64, hi: f64| {
            if octant & bit == 0 { (lo, mid) } else { (mid, hi) }
        };
        let (x0, x1) = pick(1, bounds.min.x, c.x, bounds.max.x);
        let (y0, y1) = pick(2, bounds.min.y, c.y, bounds.max.y);
        let (z0, z1) = pick(4, bounds.min.z, c.z, bounds.max.z);
        Aabb::new(Point::new(x0, y0, z0), Point::new(x1, y1, z1))
    }

    fn insert(&mut self, node: usize, item: usize) {
        if !self.nodes[node].bounds.overlaps(&self.prim_bounds[item]) {
            return;
        }
        if let Some(first) = self.nodes[node].children {
            for child in first..first + 8 {
                self.insert(child, item);
            }
            return;
        }
        self.nodes[node].items.push(item);
        if self.nodes[node].items.len() > self.leaf_capacity
            && self.nodes[node].depth < self.max_depth
        {
            self.split(node);
        }
    }

    fn split(&mut self, node: usize) {
        let first = self.nodes.len();
        let bounds = self.nodes[node].bounds;
        let depth = self.nodes[node].depth + 1;
        for octant in 0..8 {
            self.nodes.push(OctreeNode {
                bounds: Self::child_bounds(&bounds, octant).padded(CELL_PAD),
                depth,
                children: None,
                items: Vec::new(),
            });
        }
        let items = std::mem::take(&mut self.nodes[node].items);
        self.nodes[node].children = Some(first);
        for item in items {
            for child in first..first + 8 {
                self.insert(child, item);
            }
        }
    }

    fn remove(&mut self, item: usize) {
        for node in &mut self.nodes {
            node.items.retain(|&i| i != item);
        }
    }

    fn root_contains(&self, bounds: &Aabb) -> bool {
        self.nodes
            .first()
            .is_some_and(|root| root.bounds.contains(bounds.min) && root.bounds.contains(bounds.max))
    }
}

impl SpatialIndex for Octree {
    fn build(geometry: &[AcousticGeometry], config: &AccelerationConfig) -> Self {
        let prim_bounds: Vec<Aabb> = geometry.iter().map(|g| g.bounds).collect();
        let mut octree = Self::empty(prim_bounds, config);
        let active: Vec<usize> = (0..geometry.len())
            .filter(|&i| !geometry[i].is_degenerate())
            .collect();
        if active.is_empty() {
            return octree;
        }
        let scene = active
            .iter()
            .fold(Aabb::empty(), |acc, &i| acc.surrounding(&octree.prim_bounds[i]));
        octree.nodes.push(OctreeNode {
            bounds: Self::root_bounds(&scene),
            depth: 0,
            children: None,
            items: Vec::new(),
        });
        for item in active {
            octree.insert(0, item);
        }
        debug!(
            "Built octree: {} nodes, {} leaves",
            octree.node_count(),
            octree.leaf_count()
        );
        octree
    }

    fn intersect_ray(
        &self,
        geometry: &[AcousticGeometry],
        ray: &Ray,
        t_max: f64,
        counters: &mut QueryCounters,
    ) -> Option<(usize, SurfaceHit)> {
        let root = self.nodes.first()?;
        let mut best: Option<(usize, SurfaceHit)> = None;
        let mut stack: Vec<(usize, f64)> = Vec::with_capacity(64);
        if let Some((t0, _)) = root.bounds.intersect_ray(ray, 0.0, t_max) {
            stack.push((0, t0));
        }
        let mut children: Vec<(usize, f64)> = Vec::with_capacity(8);

        while let Some((node, t_near)) = stack.pop() {
            if best.is_some_and(|(_, h)| t_near > h.t) {
                continue;
            }
            counters.node_visits += 1;
            let n = &self.nodes[node];
            match n.children {
                None => {
                    for &item in &n.items {
                        test_primitive(geometry, item, ray, t_max, &mut best, counters);
                    }
                }
                Some(first) => {
                    let limit = best.map_or(t_max, |(_, h)| h.t);
                    children.clear();
                    children.extend((first..first + 8).filter_map(|c| {
                        self.nodes[c]
                            .bounds
                            .intersect_ray(ray, 0.0, limit)
                            .map(|(t0, _)| (c, t0))
                    }));
                    // Farthest pushed first so cells pop front-to-back
                    children.sort_by(|a, b| b.1.total_cmp(&a.1).then(b.0.cmp(&a.0)));
                    stack.extend_from_slice(&children);
                }
            }
        }
        best
    }

    fn query_sphere(
        &self,
        geometry: &[AcousticGeometry],
        center: Point,
        radius: f64,
    ) -> Vec<usize> {
        let mut found = Vec::new();
        if self.nodes.is_empty() {
            return found;
        }
        let mut stack = vec![0];
        while let Some(node) = stack.pop() {
            let n = &self.nodes[node];
            if !n.bounds.overlaps_sphere(center, radius) {
                continue;
            }
            match n.children {
                None => found.extend(
                    n.items
                        .iter()
                        .copied()
                        .filter(|&i| geometry[i].bounds.overlaps_sphere(center, radius)),
                ),
                Some(first) => stack.extend(first..first + 8),
            }
        }
        found.sort_unstable();
        found.dedup();
        found
    }

    fn update_dynamic_geometry(&mut self, geometry: &[AcousticGeometry], changed: &[usize]) {
        let rebuild = geometry.len() != self.prim_bounds.len()
            || self.nodes.is_empty()
            || changed.iter().any(|&i| {
                i >= geometry.len()
                    || geometry[i].is_degenerate()
                    || !self.root_contains(&geometry[i].bounds)
            });
        if rebuild {
            debug!("Octree update of {} primitives: full rebuild", changed.len());
            let config = AccelerationConfig {
                octree_max_depth: self.max_depth,
                octree_leaf_capacity: self.leaf_capacity,
                ..AccelerationConfig::new()
            };
            *self = Self::build(geometry, &config);
            return;
        }
        for &i in changed {
            self.remove(i);
            self.prim_bounds[i] = geometry[i].bounds;
            self.insert(0, i);
        }
    }

    fn memory_bytes(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| std::mem::size_of::<OctreeNode>() + n.items.capacity() * std::mem::size_of::<usize>())
            .sum::<usize>()
            + self.prim_bounds.capacity() * std::mem::size_of::<Aabb>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vector;
    use crate::sim::accel::test_scenes::random_scene;

    #[test]
    fn test_octree_splits() {
        let geometry = random_scene(200, 21);
        let config = AccelerationConfig::new();
        let octree = Octree::build(&geometry, &config);
        assert!(octree.node_count() > 1);
        assert_eq!((octree.node_count() - 1) % 8, 0);
        assert!(octree.nodes.iter().all(|n| n.depth <= config.octree_max_depth));
        // Every primitive is reachable from some leaf
        let mut seen: Vec<usize> = octree.nodes.iter().flat_map(|n| n.items.clone()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn test_octree_depth_limit() {
        let geometry = random_scene(100, 22);
        let config = AccelerationConfig {
            octree_max_depth: 0,
            ..AccelerationConfig::new()
        };
        let octree = Octree::build(&geometry, &config);
        assert_eq!(octree.node_count(), 1);
        assert_eq!(octree.nodes[0].items.len(), 100);
    }

    #[test]
    fn test_octree_update_moves_item() {
        let mut geometry = random_scene(60, 23);
        let mut octree = Octree::build(&geometry, &AccelerationConfig::new());
        let material = geometry[4].material.clone();
        // Sphere #4 moves to another spot inside the scene
        let target = Point::new(0.5, 0.5, 0.5);
        geometry[4] = AcousticGeometry::sphere(target, 0.3, material);
        octree.update_dynamic_geometry(&geometry, &[4]);

        assert!(octree.query_sphere(&geometry, target, 0.1).contains(&4));
        let ray = Ray::new(Point::new(0.5, 0.5, 0.5), Vector::new(1.0, 0.0, 0.0)).unwrap();
        let mut counters = QueryCounters::default();
        let mut expected = None;
        for i in 0..geometry.len() {
            test_primitive(&geometry, i, &ray, f64::INFINITY, &mut expected, &mut counters);
        }
        let (idx, hit) = octree
            .intersect_ray(&geometry, &ray, f64::INFINITY, &mut counters)
            .unwrap();
        let (e_idx, e_hit) = expected.unwrap();
        assert_eq!(idx, e_idx);
        assert!((hit.t - e_hit.t).abs() < 1e-9);
        assert!(hit.t <= 0.3 + 1e-9);
    }

    #[test]
    fn test_octree_update_outside_root_rebuilds() {
        let mut geometry = random_scene(30, 24);
        let mut octree = Octree::build(&geometry, &AccelerationConfig::new());
        let material = geometry[0].material.clone();
        let far = Point::new(500.0, 0.0, 0.0);
        geometry[0] = AcousticGeometry::sphere(far, 1.0, material);
        octree.update_dynamic_geometry(&geometry, &[0]);
        assert!(octree.nodes[0].bounds.contains(far));
        assert_eq!(octree.query_sphere(&geometry, far, 0.5), vec![0]);
    }
}
