pub mod bboxes;
pub mod point;
pub mod ray;
pub mod vector;

/// Geometric precision
const EPS: f64 = 1e-13;
