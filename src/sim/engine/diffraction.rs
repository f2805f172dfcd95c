//! Edge diffraction into the geometric shadow.
//!
//! Uses the Kurze-Anderson approximation of Maekawa's barrier chart over the
//! shortest path across each boundary or sharp edge.

use std::collections::HashSet;
use std::f64::consts::PI;

use crate::Point;
use crate::sim::diagnostics::QueryCounters;
use crate::sim::rays::RayKind;
use crate::sim::scene::DiffractionEdge;

use super::{ListenerCapture, TraceContext, clear_between};

/// Diffracted arrivals kept per listener, shortest paths first.
pub const MAX_DIFFRACTION_PATHS: usize = 16;

/// Barrier attenuation in dB for Fresnel number `n`.
///
/// `A = 5 + 20 log10(sqrt(2 pi N) / tanh(sqrt(2 pi N)))`, 0 dB for `N <= 0`.
pub fn kurze_anderson_db(fresnel: f64) -> f64 {
    if fresnel <= 0.0 {
        return 0.0;
    }
    let x = (2.0 * PI * fresnel).sqrt();
    5.0 + 20.0 * (x / x.tanh()).log10()
}

/// Fresnel number `N = 2 delta / lambda` for path difference `delta`.
pub fn fresnel_number(path_difference: f64, frequency: f64, speed_of_sound: f64) -> f64 {
    2.0 * path_difference * frequency / speed_of_sound
}

/// Distance the visibility checks keep from the apex, into free space.
///
/// An edge flush against another surface (a partition meeting the ceiling)
/// has its free side closed off; checking from just outside the edge sees that.
const APEX_CLEARANCE: f64 = 1e-4;

/// Endpoint key, independent of edge direction.
fn edge_key(edge: &DiffractionEdge) -> [i64; 6] {
    let q = |p: Point| [p.x, p.y, p.z].map(|v| (v * 1e9).round() as i64);
    let (a, b) = (q(edge.a), q(edge.b));
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    [lo[0], lo[1], lo[2], hi[0], hi[1], hi[2]]
}

/// First-order diffracted arrivals around edges.
///
/// Only meaningful when the direct path is occluded; the caller checks that.
pub fn calculate_diffracted_rays(
    ctx: &TraceContext,
    source: Point,
    listener: Point,
    counters: &mut QueryCounters,
) -> Vec<ListenerCapture> {
    let direct = source.distance(&listener);
    let speed = ctx.params.speed_of_sound;

    // Coincident edges of adjacent primitives count once
    let mut used: HashSet<[i64; 6]> = HashSet::new();
    let mut paths: Vec<(f64, Point)> = Vec::new();
    for edge in &ctx.scene.edges {
        let key = edge_key(edge);
        if used.contains(&key) {
            continue;
        }
        let apex = edge.shortest_path_point(source, listener);
        let length = source.distance(&apex) + apex.distance(&listener);
        if length > ctx.params.max_trace_distance || length - direct <= 1e-9 {
            continue;
        }
        if !edge.bends_around(source, apex, listener) {
            continue;
        }
        let clear_point = edge
            .outward()
            .map_or(apex, |out| apex + out * APEX_CLEARANCE);
        let visible = clear_between(ctx.scene, source, clear_point, counters)
            && clear_between(ctx.scene, clear_point, listener, counters);
        if visible {
            used.insert(key);
            paths.push((length, apex));
        }
    }
    paths.sort_by(|a, b| a.0.total_cmp(&b.0));
    paths.truncate(MAX_DIFFRACTION_PATHS);

    paths
        .into_iter()
        .map(|(length, apex)| {
            let delta = length - direct;
            let factors: Vec<f64> = ctx
                .band_centers
                .iter()
                .map(|&f| {
                    let loss = kurze_anderson_db(fresnel_number(delta, f, speed));
                    10.0_f64.powf(-loss / 10.0)
                })
                .collect();
            let mut capture = ListenerCapture::deterministic(
                RayKind::Diffraction,
                length,
                speed,
                ctx.path_energy(length, Some(&factors)),
                apex,
                listener,
            );
            capture.first_point = apex;
            capture
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::Vector;
    use crate::sim::accel::AccelerationStructure;
    use crate::sim::accel::test_scenes::shoebox;
    use crate::sim::materials::AcousticMaterial;
    use crate::sim::rays::TracingParameters;
    use crate::sim::scene::{AcousticGeometry, SceneSnapshot};

    #[test]
    fn test_kurze_anderson() {
        assert_eq!(kurze_anderson_db(0.0), 0.0);
        assert_eq!(kurze_anderson_db(-1.0), 0.0);
        // Grazing limit is 5 dB
        assert!((kurze_anderson_db(1e-9) - 5.0).abs() < 1e-3);
        // N = 1: 5 + 20 log10(2.5066 / 0.9869) = 13.1 dB
        assert!((kurze_anderson_db(1.0) - 13.1).abs() < 0.1);
        // Monotone in N
        assert!(kurze_anderson_db(10.0) > kurze_anderson_db(1.0));
    }

    #[test]
    fn test_fresnel_number() {
        assert!((fresnel_number(0.343, 1000.0, 343.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_diffraction_over_barrier() {
        // Thin wall between source and listener, open above
        let m = Arc::new(AcousticMaterial::uniform("wall", 7, 0.1, 0.0));
        let wall = AcousticGeometry::quad(
            [
                Point::new(0.0, -5.0, 0.0),
                Point::new(0.0, 5.0, 0.0),
                Point::new(0.0, 5.0, 1.5),
                Point::new(0.0, -5.0, 1.5),
            ],
            m,
        );
        let (mut scene, _) = SceneSnapshot::new(1, vec![wall]);
        scene.structure = Some(AccelerationStructure::build(
            &scene.geometry,
            &Default::default(),
        ));
        let mut params = TracingParameters::new();
        params.enable_air_absorption = false;
        let ctx = TraceContext::new(&scene, &params, None, 1.0);
        let mut counters = QueryCounters::default();

        let src = Point::new(-2.0, 0.0, 1.0);
        let lst = Point::new(2.0, 0.0, 1.0);
        assert!(!clear_between(&scene, src, lst, &mut counters));

        let arrivals = calculate_diffracted_rays(&ctx, src, lst, &mut counters);
        assert!(!arrivals.is_empty());
        let top = &arrivals[0];
        assert_eq!(top.kind, RayKind::Diffraction);
        // Over the top edge: 2 * sqrt(4 + 0.25)
        let expected = 2.0 * 4.25_f64.sqrt();
        assert!((top.delay * params.speed_of_sound - expected).abs() < 1e-6);
        assert!(top.first_point.distance(&Point::new(0.0, 0.0, 1.5)) < 1e-6);
        // Below the unobstructed gain, and stronger loss at high frequency
        assert!(top.energy[0] < ctx.point_gain(expected));
        assert!(top.energy[6] < top.energy[0]);
        // Sorted by path length
        for w in arrivals.windows(2) {
            assert!(w[0].delay <= w[1].delay);
        }
    }

    #[test]
    fn test_diffraction_in_room_uses_partition_edge_only() {
        // Full-height partition from y = 0 to 7 splits a 10 x 8 x 3 room
        let m = Arc::new(AcousticMaterial::uniform("wall", 7, 0.1, 0.0));
        let mut geometry = shoebox(10.0, 8.0, 3.0, m.clone());
        geometry.push(AcousticGeometry::quad(
            [
                Point::new(5.0, 0.0, 0.0),
                Point::new(5.0, 7.0, 0.0),
                Point::new(5.0, 7.0, 3.0),
                Point::new(5.0, 0.0, 3.0),
            ],
            m,
        ));
        let (mut scene, _) = SceneSnapshot::new(1, geometry);
        scene.structure = Some(AccelerationStructure::build(
            &scene.geometry,
            &Default::default(),
        ));
        let params = TracingParameters::new();
        let ctx = TraceContext::new(&scene, &params, None, 1.0);
        let mut counters = QueryCounters::default();

        let src = Point::new(2.0, 2.0, 1.5);
        let lst = Point::new(8.0, 2.0, 1.5);
        assert!(!clear_between(&scene, src, lst, &mut counters));

        let arrivals = calculate_diffracted_rays(&ctx, src, lst, &mut counters);
        // Room corners and the edges flush with floor, ceiling and wall add nothing
        assert_eq!(arrivals.len(), 1);
        let apex = arrivals[0].first_point;
        assert!(apex.distance(&Point::new(5.0, 7.0, 1.5)) < 1e-6, "apex {apex}");
        let expected = 2.0 * 34.0_f64.sqrt();
        assert!((arrivals[0].delay * params.speed_of_sound - expected).abs() < 1e-6);
    }

    #[test]
    fn test_room_corner_does_not_bend() {
        // Floor edge of a room: both legs stay inside the corner
        let floor = Vector::new(0.0, -1.0, 0.0);
        let wall = Vector::new(0.0, 0.0, 1.0);
        let edge = DiffractionEdge::new(
            0,
            Point::new(0.0, 8.0, 0.0),
            Point::new(10.0, 8.0, 0.0),
            [Some(floor), Some(wall)],
        );
        let apex = Point::new(5.0, 8.0, 0.0);
        assert!(!edge.bends_around(Point::new(2.0, 2.0, 1.5), apex, Point::new(8.0, 5.0, 2.5)));
        // Top edge of a free-standing wall does
        let top = DiffractionEdge::new(
            0,
            Point::new(0.0, -5.0, 1.5),
            Point::new(0.0, 5.0, 1.5),
            [Some(Vector::new(0.0, 0.0, -1.0)), None],
        );
        let apex = Point::new(0.0, 0.0, 1.5);
        assert!(top.bends_around(Point::new(-2.0, 0.0, 1.0), apex, Point::new(2.0, 0.0, 1.0)));
        assert!(top.outward().unwrap().is_close(&Vector::new(0.0, 0.0, 1.0)));
    }
}
