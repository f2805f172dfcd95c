mod common;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sonotrace::geom::ray::Ray;
use sonotrace::sim::diagnostics::QueryCounters;
use sonotrace::{
    AccelerationKind, AcousticGeometry, AcousticMaterial, AcousticRayTracer, Point,
    TracingParameters, Vector,
};

use common::shoebox;

fn furnished_room(material: Arc<AcousticMaterial>) -> Vec<AcousticGeometry> {
    let mut geometry = shoebox(8.0, 3.0, 6.0, Arc::clone(&material));
    geometry.push(AcousticGeometry::cuboid(
        Point::new(1.0, 0.0, 1.0),
        Point::new(2.5, 0.8, 2.0),
        Arc::clone(&material),
    ));
    geometry.push(AcousticGeometry::sphere(
        Point::new(5.0, 1.5, 4.0),
        0.4,
        Arc::clone(&material),
    ));
    geometry.push(AcousticGeometry::cylinder(
        Point::new(6.5, 0.0, 1.5),
        Point::new(6.5, 3.0, 1.5),
        0.2,
        Arc::clone(&material),
    ));
    geometry.push(AcousticGeometry::triangle(
        [
            Point::new(3.0, 2.0, 5.0),
            Point::new(4.5, 2.5, 5.5),
            Point::new(3.5, 2.9, 4.0),
        ],
        material,
    ));
    geometry
}

#[test]
fn test_bvh_and_octree_agree_on_nearest_hit() {
    let params = TracingParameters::new();
    let material = Arc::new(AcousticMaterial::wood(&params.bands));
    let mut tracer = AcousticRayTracer::new(params.clone()).unwrap();
    tracer.set_scene_geometry(furnished_room(material)).unwrap();
    tracer.build_acceleration_structure();
    let bvh = tracer.snapshot();

    let mut octree_params = params;
    octree_params.acceleration.kind = AccelerationKind::Octree;
    tracer.set_tracing_parameters(octree_params).unwrap();
    let octree = tracer.snapshot();
    assert_eq!(bvh.version, octree.version);

    let mut rng = StdRng::seed_from_u64(42);
    let mut counters = QueryCounters::default();
    for _ in 0..500 {
        let origin = Point::new(
            rng.gen_range(0.1..7.9),
            rng.gen_range(0.1..2.9),
            rng.gen_range(0.1..5.9),
        );
        let dir = Vector::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let Some(ray) = Ray::new(origin, dir) else {
            continue;
        };
        let a = bvh.intersect(&ray, f64::INFINITY, &mut counters);
        let b = octree.intersect(&ray, f64::INFINITY, &mut counters);
        match (a, b) {
            (Some(a), Some(b)) => assert!(
                (a.distance - b.distance).abs() < 1e-9,
                "bvh {} vs octree {}",
                a.distance,
                b.distance
            ),
            (None, None) => {}
            (a, b) => panic!("disagreement: {:?} vs {:?}", a.map(|h| h.distance), b.map(|h| h.distance)),
        }
    }
    assert!(counters.intersection_tests > 0);
}

#[test]
fn test_moved_primitive_is_seen_after_update() {
    let params = TracingParameters::new();
    let material = Arc::new(AcousticMaterial::wood(&params.bands));
    let mut tracer = AcousticRayTracer::new(params).unwrap();
    tracer.set_scene_geometry(furnished_room(Arc::clone(&material))).unwrap();
    tracer.build_acceleration_structure();
    let before = tracer.snapshot();

    // Move the sphere into the test ray's path
    let sphere = AcousticGeometry::sphere(Point::new(4.0, 1.5, 3.0), 0.5, material);
    tracer.update_dynamic_geometry(vec![(7, sphere)]).unwrap();
    let after = tracer.snapshot();
    assert_eq!(after.version, before.version + 1);

    let ray = Ray::new(Point::new(0.5, 1.5, 3.0), Vector::new(1.0, 0.0, 0.0)).unwrap();
    let mut counters = QueryCounters::default();
    let old = before.intersect(&ray, f64::INFINITY, &mut counters).unwrap();
    let new = after.intersect(&ray, f64::INFINITY, &mut counters).unwrap();
    assert!((old.distance - 7.5).abs() < 1e-9);
    assert!((new.distance - 3.0).abs() < 1e-9);
    assert_eq!(new.geometry, 7);

    let stray = after.geometry[0].clone();
    assert!(tracer.update_dynamic_geometry(vec![(99, stray)]).is_err());
}
