#![allow(dead_code)]

use std::sync::Arc;

use sonotrace::{AcousticGeometry, AcousticMaterial, AcousticRayTracer, Point, TracingParameters};

/// Six quads spanning `[0, lx] x [0, ly] x [0, lz]`.
pub fn shoebox(lx: f64, ly: f64, lz: f64, material: Arc<AcousticMaterial>) -> Vec<AcousticGeometry> {
    let p = Point::new;
    [
        [p(0.0, 0.0, 0.0), p(lx, 0.0, 0.0), p(lx, ly, 0.0), p(0.0, ly, 0.0)],
        [p(0.0, 0.0, lz), p(0.0, ly, lz), p(lx, ly, lz), p(lx, 0.0, lz)],
        [p(0.0, 0.0, 0.0), p(0.0, 0.0, lz), p(lx, 0.0, lz), p(lx, 0.0, 0.0)],
        [p(0.0, ly, 0.0), p(lx, ly, 0.0), p(lx, ly, lz), p(0.0, ly, lz)],
        [p(0.0, 0.0, 0.0), p(0.0, ly, 0.0), p(0.0, ly, lz), p(0.0, 0.0, lz)],
        [p(lx, 0.0, 0.0), p(lx, 0.0, lz), p(lx, ly, lz), p(lx, ly, 0.0)],
    ]
    .into_iter()
    .map(|q| AcousticGeometry::quad(q, Arc::clone(&material)))
    .collect()
}

/// Tracer over a 10 x 3 x 10 m concrete room with a built structure.
pub fn concrete_room(params: TracingParameters) -> AcousticRayTracer {
    let concrete = Arc::new(AcousticMaterial::concrete(&params.bands));
    let mut tracer = AcousticRayTracer::new(params).unwrap();
    tracer
        .set_scene_geometry(shoebox(10.0, 3.0, 10.0, concrete))
        .unwrap();
    tracer.build_acceleration_structure();
    tracer
}
