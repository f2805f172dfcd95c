use crate::geom::ray::Ray;
use crate::{Point, Vector};

/// Classification of a ray segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum RayKind {
    Direct,
    EarlyReflection,
    LateReflection,
    Diffraction,
    Transmission,
}

/// A stochastic sound ray carrying per-band energy.
///
/// Energy only ever decreases and the travelled distance only ever grows.
#[derive(Debug, Clone)]
pub struct AudioRay {
    /// Position in the generated batch. Drives the per-ray random stream.
    pub index: usize,
    pub origin: Point,
    pub direction: Vector,
    pub energy: Vec<f64>,
    pub bounce_count: usize,
    pub max_bounces: usize,
    pub travel_distance: f64,
    /// Seconds since emission.
    pub travel_time: f64,
    pub kind: RayKind,
    /// Emission point followed by every interaction point.
    pub path: Vec<Point>,
    /// Set once any bounce took the diffuse branch.
    pub scattered: bool,
    /// Set once the ray passed through a surface.
    pub transmitted: bool,
}

impl AudioRay {
    pub fn new(index: usize, ray: &Ray, energy: Vec<f64>, max_bounces: usize) -> Self {
        Self {
            index,
            origin: ray.origin,
            direction: ray.direction,
            energy,
            bounce_count: 0,
            max_bounces,
            travel_distance: 0.0,
            travel_time: 0.0,
            kind: RayKind::Direct,
            path: vec![ray.origin],
            scattered: false,
            transmitted: false,
        }
    }

    /// Geometric ray for the next segment. `None` if the state went non-finite.
    pub fn segment(&self) -> Option<Ray> {
        Ray::new(self.origin, self.direction)
    }

    pub fn total_energy(&self) -> f64 {
        self.energy.iter().sum()
    }

    pub fn max_energy(&self) -> f64 {
        self.energy.iter().copied().fold(0.0, f64::max)
    }

    pub fn is_alive(&self, energy_floor: f64) -> bool {
        self.max_energy() > energy_floor
    }

    pub fn is_finite(&self) -> bool {
        self.origin.is_finite()
            && self.direction.is_finite()
            && self.travel_distance.is_finite()
            && self.energy.iter().all(|e| e.is_finite())
    }

    /// Moves the ray along its direction.
    pub fn advance(&mut self, distance: f64, speed_of_sound: f64) {
        self.origin = self.origin + self.direction * distance;
        self.travel_distance += distance;
        self.travel_time += distance / speed_of_sound;
    }

    /// Multiplies each band by a loss factor clamped to [0, 1].
    pub fn attenuate(&mut self, factors: &[f64]) {
        for (e, f) in self.energy.iter_mut().zip(factors) {
            *e *= f.clamp(0.0, 1.0);
        }
    }

    pub fn record_point(&mut self, pt: Point) {
        self.path.push(pt);
    }
}
