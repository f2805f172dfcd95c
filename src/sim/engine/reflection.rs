use rand::Rng;

use crate::Vector;

/// Defines how rays reflect off surfaces.
pub trait ReflectionModel {
    /// Computes the reflected direction given incident direction and surface normal.
    fn reflect<R: Rng + ?Sized>(&self, incident: Vector, normal: Vector, rng: &mut R) -> Vector;
}

/// Perfect specular (mirror) reflection.
pub struct Specular;

impl ReflectionModel for Specular {
    fn reflect<R: Rng + ?Sized>(&self, incident: Vector, normal: Vector, _rng: &mut R) -> Vector {
        incident.reflect(normal)
    }
}

/// Lambertian diffuse reflection (cosine-weighted hemisphere sampling via Malley's method).
pub struct Diffuse;

impl ReflectionModel for Diffuse {
    fn reflect<R: Rng + ?Sized>(&self, incident: Vector, normal: Vector, rng: &mut R) -> Vector {
        // Flip the hemisphere so the reflected ray stays on the incident side
        let n = if incident.dot(normal) >= 0.0 {
            -normal
        } else {
            normal
        };
        let (tangent, bitangent) = n.orthonormal_basis();

        // Uniform disk sample projected onto the hemisphere: pdf = cos(theta) / pi
        let u1: f64 = rng.r#gen();
        let u2: f64 = rng.r#gen();
        let r = u1.sqrt();
        let phi = 2.0 * std::f64::consts::PI * u2;
        let z = (1.0 - u1).sqrt();

        tangent * (r * phi.cos()) + bitangent * (r * phi.sin()) + n * z
    }
}

/// Hybrid reflection mixing specular and diffuse based on a scattering coefficient.
pub struct Hybrid {
    /// Scattering coefficient [0, 1]: 0 = pure specular, 1 = pure diffuse.
    pub scattering: f64,
}

impl Hybrid {
    pub fn new(scattering: f64) -> Self {
        Self {
            scattering: scattering.clamp(0.0, 1.0),
        }
    }

    /// Reflected direction and whether the diffuse branch was taken.
    pub fn scatter<R: Rng + ?Sized>(
        &self,
        incident: Vector,
        normal: Vector,
        rng: &mut R,
    ) -> (Vector, bool) {
        // Always draw so the random stream does not depend on the material
        let r: f64 = rng.r#gen();
        if r < self.scattering {
            (Diffuse.reflect(incident, normal, rng), true)
        } else {
            (Specular.reflect(incident, normal, rng), false)
        }
    }
}

impl ReflectionModel for Hybrid {
    fn reflect<R: Rng + ?Sized>(&self, incident: Vector, normal: Vector, rng: &mut R) -> Vector {
        self.scatter(incident, normal, rng).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_specular_reflection() {
        let mut rng = StdRng::seed_from_u64(0);
        // Ray coming straight down onto a horizontal surface (normal pointing up)
        let incident = Vector::new(0.0, 0.0, -1.0);
        let normal = Vector::new(0.0, 0.0, 1.0);
        let reflected = Specular.reflect(incident, normal, &mut rng);
        assert!(reflected.is_close(&Vector::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_specular_45_degrees() {
        let mut rng = StdRng::seed_from_u64(0);
        let incident = Vector::new(1.0, 0.0, -1.0);
        let normal = Vector::new(0.0, 0.0, 1.0);
        let reflected = Specular.reflect(incident, normal, &mut rng);
        assert!(reflected.is_close(&Vector::new(1.0, 0.0, 1.0)));
    }

    #[test]
    fn test_diffuse_cosine_weighted_distribution() {
        // E[cos(theta)] = 2/3 for cosine-weighted hemisphere sampling
        let mut rng = StdRng::seed_from_u64(11);
        let normal = Vector::new(0.0, 0.0, 1.0);
        let incident = Vector::new(0.0, 0.0, -1.0);
        let n = 20_000;
        let mut cos_sum = 0.0;
        for _ in 0..n {
            let reflected = Diffuse.reflect(incident, normal, &mut rng);
            assert!((reflected.length() - 1.0).abs() < 1e-9);
            assert!(reflected.dot(normal) >= 0.0);
            cos_sum += reflected.dot(normal);
        }
        let mean_cos = cos_sum / n as f64;
        assert!(
            (mean_cos - 2.0 / 3.0).abs() < 0.02,
            "Mean cos(theta) should be ~0.667, got {mean_cos}"
        );
    }

    #[test]
    fn test_diffuse_respects_incident_side() {
        let mut rng = StdRng::seed_from_u64(12);
        let normal = Vector::new(0.0, 0.0, 1.0);
        // Incident from the normal side: reflection goes into the opposite hemisphere
        let incident = Vector::new(0.0, 0.0, 1.0);
        for _ in 0..100 {
            let reflected = Diffuse.reflect(incident, normal, &mut rng);
            assert!(reflected.dot(normal) <= 0.0);
        }
    }

    #[test]
    fn test_hybrid_fraction() {
        let mut rng = StdRng::seed_from_u64(13);
        let hybrid = Hybrid::new(0.25);
        let normal = Vector::new(0.0, 0.0, 1.0);
        let incident = Vector::new(1.0, 0.0, -1.0).normalize().unwrap();
        let n = 10_000;
        let diffuse = (0..n)
            .filter(|_| hybrid.scatter(incident, normal, &mut rng).1)
            .count();
        assert!((diffuse as f64 / n as f64 - 0.25).abs() < 0.02);
    }

    #[test]
    fn test_hybrid_is_reproducible() {
        let hybrid = Hybrid::new(0.5);
        let normal = Vector::new(0.0, 0.0, 1.0);
        let incident = Vector::new(0.0, 0.0, -1.0);
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        for _ in 0..50 {
            assert_eq!(
                hybrid.reflect(incident, normal, &mut a),
                hybrid.reflect(incident, normal, &mut b)
            );
        }
    }
}
