//! Bounding Volume Hierarchy (BVH) acceleration structure.
//!
//! Binned surface-area-heuristic build over primitive bounds, stored as a flat
//! node array. Children are always allocated after their parent, which lets a
//! refit walk the array backwards.

use log::debug;

use crate::Point;
use crate::geom::bboxes::Aabb;
use crate::geom::ray::{Ray, SurfaceHit};
use crate::sim::diagnostics::QueryCounters;
use crate::sim::scene::AcousticGeometry;

use super::{AccelerationConfig, SpatialIndex, test_primitive};

/// Number of centroid bins evaluated per split.
const SAH_BINS: usize = 12;

/// Relative cost of a node traversal versus a primitive test.
const TRAVERSAL_COST: f64 = 1.0;

/// Node bounds are padded so hits on primitive faces never fall outside.
const NODE_PAD: f64 = 1e-7;

#[derive(Debug, Clone)]
struct BvhNode {
    bounds: Aabb,
    /// Leaf: first slot in `order`. Internal: index of the left child (right = left + 1).
    first: usize,
    /// Number of primitives for leaves, 0 for internal nodes.
    count: usize,
}

impl BvhNode {
    fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

#[derive(Debug, Clone)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    /// Primitive indices, grouped so that each leaf owns a contiguous range.
    order: Vec<usize>,
    prim_bounds: Vec<Aabb>,
    leaf_size: usize,
}

impl Bvh {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[BvhNode], i: usize) -> usize {
            let n = &nodes[i];
            if n.is_leaf() {
                1
            } else {
                1 + walk(nodes, n.first).max(walk(nodes, n.first + 1))
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    fn from_bounds(prim_bounds: Vec<Aabb>, active: Vec<usize>, leaf_size: usize) -> Self {
        let mut bvh = Self {
            nodes: Vec::new(),
            order: active,
            prim_bounds,
            leaf_size: leaf_size.max(1),
        };
        if !bvh.order.is_empty() {
            bvh.nodes.push(BvhNode {
                bounds: Aabb::empty(),
                first: 0,
                count: 0,
            });
            let len = bvh.order.len();
            bvh.build_node(0, 0, len);
        }
        bvh
    }

    fn range_bounds(&self, start: usize, end: usize) -> Aabb {
        self.order[start..end]
            .iter()
            .fold(Aabb::empty(), |acc, &i| acc.surrounding(&self.prim_bounds[i]))
    }

    fn build_node(&mut self, node: usize, start: usize, end: usize) {
        let bounds = self.range_bounds(start, end).padded(NODE_PAD);
        let count = end - start;
        self.nodes[node].bounds = bounds;

        let make_leaf = |nodes: &mut Vec<BvhNode>| {
            nodes[node].first = start;
            nodes[node].count = count;
        };

        if count <= self.leaf_size {
            make_leaf(&mut self.nodes);
            return;
        }

        let mut centroid_bounds = Aabb::empty();
        for &i in &self.order[start..end] {
            centroid_bounds.expand_point(self.prim_bounds[i].centroid());
        }
        let axis = centroid_bounds.longest_axis();
        let c_min = centroid_bounds.min.coord(axis);
        let extent = centroid_bounds.extent(axis);

        // All centroids coincide: no split can separate them
        if extent <= 1e-12 {
            make_leaf(&mut self.nodes);
            return;
        }

        let bin_of = |c: Point| -> usize {
            let b = ((c.coord(axis) - c_min) / extent * SAH_BINS as f64) as usize;
            b.min(SAH_BINS - 1)
        };

        let mut bins = [Bin {
            bounds: Aabb::empty(),
            count: 0,
        }; SAH_BINS];
        for &i in &self.order[start..end] {
            let b = bin_of(self.prim_bounds[i].centroid());
            bins[b].count += 1;
            bins[b].bounds = bins[b].bounds.surrounding(&self.prim_bounds[i]);
        }

        // Sweep to get the cost of splitting after each bin
        let mut best_split = 0;
        let mut best_cost = f64::INFINITY;
        for split in 1..SAH_BINS {
            let (left, right) = bins.split_at(split);
            let fold = |side: &[Bin]| {
                side.iter().fold((Aabb::empty(), 0usize), |(b, n), bin| {
                    (b.surrounding(&bin.bounds), n + bin.count)
                })
            };
            let (lb, ln) = fold(left);
            let (rb, rn) = fold(right);
            if ln == 0 || rn == 0 {
                continue;
            }
            let cost = ln as f64 * lb.surface_area() + rn as f64 * rb.surface_area();
            if cost < best_cost {
                best_cost = cost;
                best_split = split;
            }
        }

        let parent_area = bounds.surface_area().max(1e-300);
        let split_cost = TRAVERSAL_COST + best_cost / parent_area;
        let leaf_cost = count as f64;
        let small = count <= 4 * self.leaf_size;
        if small && (best_split == 0 || split_cost >= leaf_cost) {
            make_leaf(&mut self.nodes);
            return;
        }

        let mid = if best_split == 0 {
            self.median_partition(start, end, axis)
        } else {
            self.bin_partition(start, end, |c| bin_of(c) < best_split)
        };

        let left = self.nodes.len();
        self.nodes.push(BvhNode {
            bounds: Aabb::empty(),
            first: 0,
            count: 0,
        });
        self.nodes.push(BvhNode {
            bounds: Aabb::empty(),
            first: 0,
            count: 0,
        });
        self.nodes[node].first = left;
        self.nodes[node].count = 0;
        self.build_node(left, start, mid);
        self.build_node(left + 1, mid, end);
    }

    /// Stable partition so equal inputs always produce the same tree.
    fn bin_partition(&mut self, start: usize, end: usize, goes_left: impl Fn(Point) -> bool) -> usize {
        let (left, right): (Vec<usize>, Vec<usize>) = self.order[start..end]
            .iter()
            .partition(|&&i| goes_left(self.prim_bounds[i].centroid()));
        let mid = start + left.len();
        self.order[start..mid].copy_from_slice(&left);
        self.order[mid..end].copy_from_slice(&right);
        mid
    }

    fn median_partition(&mut self, start: usize, end: usize, axis: usize) -> usize {
        let bounds = &self.prim_bounds;
        self.order[start..end].sort_by(|&a, &b| {
            let ca = bounds[a].centroid().coord(axis);
            let cb = bounds[b].centroid().coord(axis);
            ca.total_cmp(&cb).then(a.cmp(&b))
        });
        start + (end - start) / 2
    }

    /// Recomputes node bounds bottom-up from the current primitive bounds.
    fn refit(&mut self) {
        for node in (0..self.nodes.len()).rev() {
            let n = &self.nodes[node];
            let bounds = if n.is_leaf() {
                self.range_bounds(n.first, n.first + n.count)
                    .padded(NODE_PAD)
            } else {
                self.nodes[n.first]
                    .bounds
                    .surrounding(&self.nodes[n.first + 1].bounds)
            };
            self.nodes[node].bounds = bounds;
        }
    }
}

impl SpatialIndex for Bvh {
    fn build(geometry: &[AcousticGeometry], config: &AccelerationConfig) -> Self {
        let prim_bounds: Vec<Aabb> = geometry.iter().map(|g| g.bounds).collect();
        let active: Vec<usize> = (0..geometry.len())
            .filter(|&i| !geometry[i].is_degenerate())
            .collect();
        let bvh = Self::from_bounds(prim_bounds, active, config.bvh_leaf_size);
        debug!(
            "Built BVH: {} primitives, {} nodes, depth {}",
            bvh.order.len(),
            bvh.nodes.len(),
            bvh.depth()
        );
        bvh
    }

    fn intersect_ray(
        &self,
        geometry: &[AcousticGeometry],
        ray: &Ray,
        t_max: f64,
        counters: &mut QueryCounters,
    ) -> Option<(usize, SurfaceHit)> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best: Option<(usize, SurfaceHit)> = None;
        let mut stack: Vec<(usize, f64)> = Vec::with_capacity(64);
        if let Some((t0, _)) = self.nodes[0].bounds.intersect_ray(ray, 0.0, t_max) {
            stack.push((0, t0));
        }

        while let Some((node, t_near)) = stack.pop() {
            let limit = best.map_or(t_max, |(_, h)| h.t);
            if t_near > limit {
                continue;
            }
            counters.node_visits += 1;
            let n = &self.nodes[node];
            if n.is_leaf() {
                for &prim in &self.order[n.first..n.first + n.count] {
                    test_primitive(geometry, prim, ray, t_max, &mut best, counters);
                }
                continue;
            }

            let limit = best.map_or(t_max, |(_, h)| h.t);
            let l = self.nodes[n.first].bounds.intersect_ray(ray, 0.0, limit);
            let r = self.nodes[n.first + 1].bounds.intersect_ray(ray, 0.0, limit);
            // Push the farther child first so the nearer one is popped next
            match (l, r) {
                (Some((tl, _)), Some((tr, _))) => {
                    if tl <= tr {
                        stack.push((n.first + 1, tr));
                        stack.push((n.first, tl));
                    } else {
                        stack.push((n.first, tl));
                        stack.push((n.first + 1, tr));
                    }
                }
                (Some((tl, _)), None) => stack.push((n.first, tl)),
                (None, Some((tr, _))) => stack.push((n.first + 1, tr)),
                (None, None) => {}
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
            if n.is_leaf() {
                found.extend(
                    self.order[n.first..n.first + n.count]
                        .iter()
                        .copied()
                        .filter(|&i| geometry[i].bounds.overlaps_sphere(center, radius)),
                );
            } else {
                stack.push(n.first);
                stack.push(n.first + 1);
            }
        }
        found.sort_unstable();
        found
    }

    fn update_dynamic_geometry(&mut self, geometry: &[AcousticGeometry], changed: &[usize]) {
        // Primitives skipped as degenerate at build time have no leaf slot
        let structural_change = geometry.len() != self.prim_bounds.len()
            || changed.iter().any(|&i| {
                i >= geometry.len() || geometry[i].is_degenerate() || !self.order.contains(&i)
            });
        // Refitting many moved primitives degrades the tree; rebuild instead
        let many = changed.len() > 8.max(self.order.len() / 4);
        if structural_change || many {
            debug!("BVH update of {} primitives: full rebuild", changed.len());
            let config = AccelerationConfig {
                bvh_leaf_size: self.leaf_size,
                ..AccelerationConfig::new()
            };
            *self = Self::build(geometry, &config);
            return;
        }
        for &i in changed {
            self.prim_bounds[i] = geometry[i].bounds;
        }
        self.refit();
    }

    fn memory_bytes(&self) -> usize {
        self.nodes.capacity() * std::mem::size_of::<BvhNode>()
            + self.order.capacity() * std::mem::size_of::<usize>()
            + self.prim_bounds.capacity() * std::mem::size_of::<Aabb>()
    }
}
