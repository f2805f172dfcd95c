use crate::sim::materials::AcousticMaterial;

/// Defines how much energy a surface absorbs per band.
pub trait AbsorptionModel {
    /// Absorption coefficient for `band` at incidence cosine `cos_incidence` (1 = normal).
    fn absorption(&self, material: &AcousticMaterial, band: usize, cos_incidence: f64) -> f64;
}

/// Tabulated random-incidence coefficients, independent of angle.
pub struct RandomIncidence;

impl AbsorptionModel for RandomIncidence {
    fn absorption(&self, material: &AcousticMaterial, band: usize, _cos_incidence: f64) -> f64 {
        material.absorption.get(band).copied().unwrap_or(0.0)
    }
}

/// Angle-dependent absorption, stronger at grazing incidence.
///
/// `alpha(mu) = alpha * ((1 - beta) + 3 beta (1 - mu))`. The weight averages to
/// one under a diffuse (cosine-weighted) field, so the random-incidence
/// average stays equal to the tabulated coefficient.
pub struct AngleDependent {
    /// Share of the coefficient that varies with angle, [0, 1].
    pub beta: f64,
}

impl AngleDependent {
    pub fn new(beta: f64) -> Self {
        Self {
            beta: beta.clamp(0.0, 1.0),
        }
    }

    fn weight(&self, cos_incidence: f64) -> f64 {
        let mu = cos_incidence.abs().min(1.0);
        (1.0 - self.beta) + 3.0 * self.beta * (1.0 - mu)
    }
}

impl Default for AngleDependent {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl AbsorptionModel for AngleDependent {
    fn absorption(&self, material: &AcousticMaterial, band: usize, cos_incidence: f64) -> f64 {
        let alpha = material.absorption.get(band).copied().unwrap_or(0.0);
        (alpha * self.weight(cos_incidence)).clamp(0.0, 1.0)
    }
}

/// Per-band surface outcome of one hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceResponse {
    /// Fraction kept by the reflected ray: `(1 - alpha)(1 - tau)`.
    pub reflected: Vec<f64>,
    /// Fraction carried through the surface: `(1 - alpha) tau`.
    pub transmitted: Vec<f64>,
}

/// Splits incident energy into reflected and transmitted shares for every band.
pub fn surface_response(
    model: &impl AbsorptionModel,
    material: &AcousticMaterial,
    band_count: usize,
    cos_incidence: f64,
    enable_transmission: bool,
) -> SurfaceResponse {
    let mut reflected = Vec::with_capacity(band_count);
    let mut transmitted = Vec::with_capacity(band_count);
    for band in 0..band_count {
        let alpha = model.absorption(material, band, cos_incidence);
        let tau = if enable_transmission {
            material.transmission.get(band).copied().unwrap_or(0.0)
        } else {
            0.0
        };
        reflected.push((1.0 - alpha) * (1.0 - tau));
        transmitted.push((1.0 - alpha) * tau);
    }
    SurfaceResponse {
        reflected,
        transmitted,
    }
}

/// Air absorption model based on ISO 9613-1.
///
/// Applies distance-dependent attenuation per frequency band.
#[derive(Debug, Clone, PartialEq)]
pub struct AirAbsorption {
    /// Attenuation coefficients in dB/m per band.
    pub attenuation_per_meter: Vec<f64>,
}

impl AirAbsorption {
    /// Pure-tone attenuation at each band center for the given conditions.
    ///
    /// `temperature` in degrees Celsius, `humidity` in percent, `pressure` in kPa.
    pub fn iso9613(centers: &[f64], temperature: f64, humidity: f64, pressure: f64) -> Self {
        let t = temperature + 273.15;
        let t0 = 293.15;
        let t01 = 273.16;
        let pa = pressure / 101.325;

        // Molar concentration of water vapour (percent)
        let psat = 10.0_f64.powf(-6.8346 * (t01 / t).powf(1.261) + 4.6151);
        let h = humidity * psat / pa;

        // Relaxation frequencies of oxygen and nitrogen
        let fr_o = pa * (24.0 + 4.04e4 * h * (0.02 + h) / (0.391 + h));
        let fr_n = pa
            * (t / t0).powf(-0.5)
            * (9.0 + 280.0 * h * (-4.170 * ((t / t0).powf(-1.0 / 3.0) - 1.0)).exp());

        let attenuation_per_meter = centers
            .iter()
            .map(|&f| {
                let f2 = f * f;
                8.686
                    * f2
                    * (1.84e-11 / pa * (t / t0).sqrt()
                        + (t / t0).powf(-2.5)
                            * (0.01275 * (-2239.1 / t).exp() / (fr_o + f2 / fr_o)
                                + 0.1068 * (-3352.0 / t).exp() / (fr_n + f2 / fr_n)))
            })
            .collect();
        Self {
            attenuation_per_meter,
        }
    }

    /// Creates an air absorption model for standard conditions (20°C, 50% RH).
    pub fn standard(centers: &[f64]) -> Self {
        Self::iso9613(centers, 20.0, 50.0, 101.325)
    }

    /// No attenuation in any band.
    pub fn none(band_count: usize) -> Self {
        Self {
            attenuation_per_meter: vec![0.0; band_count],
        }
    }

    pub fn band_count(&self) -> usize {
        self.attenuation_per_meter.len()
    }

    /// Energy multiplier for one band over `distance` meters.
    pub fn factor(&self, band: usize, distance: f64) -> f64 {
        let db_loss = self.attenuation_per_meter[band] * distance.max(0.0);
        10.0_f64.powf(-db_loss / 10.0)
    }

    /// Apply air absorption over a given distance.
    /// Returns the energy multiplier per band.
    pub fn apply_distance(&self, distance: f64) -> Vec<f64> {
        (0..self.band_count())
            .map(|band| self.factor(band, distance))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::materials::{FrequencyBands, PRESET_BAND_FREQUENCIES};

    #[test]
    fn test_random_incidence() {
        let m = AcousticMaterial::uniform("test", 3, 0.2, 0.0);
        assert!((RandomIncidence.absorption(&m, 1, 0.3) - 0.2).abs() < 1e-12);
        // Unknown band: no absorption
        assert_eq!(RandomIncidence.absorption(&m, 9, 1.0), 0.0);
    }

    #[test]
    fn test_angle_dependent_diffuse_average() {
        // Average over a cosine-weighted field: pdf(mu) = 2 mu on [0, 1]
        let model = AngleDependent::default();
        let m = AcousticMaterial::uniform("test", 1, 0.3, 0.0);
        let n = 10_000;
        let mean: f64 = (0..n)
            .map(|i| {
                let mu = (i as f64 + 0.5) / n as f64;
                2.0 * mu * model.absorption(&m, 0, mu)
            })
            .sum::<f64>()
            / n as f64;
        assert!((mean - 0.3).abs() < 1e-4, "mean {mean}");
        // Grazing absorbs more than normal incidence
        assert!(model.absorption(&m, 0, 0.05) > model.absorption(&m, 0, 1.0));
    }

    #[test]
    fn test_angle_dependent_clamped() {
        let model = AngleDependent::new(1.0);
        let m = AcousticMaterial::uniform("test", 1, 0.9, 0.0);
        assert_eq!(model.absorption(&m, 0, 0.0), 1.0);
    }

    #[test]
    fn test_surface_response_conserves() {
        let bands = FrequencyBands::octaves();
        let m = AcousticMaterial::glass(&bands);
        let r = surface_response(&RandomIncidence, &m, bands.count, 1.0, true);
        for b in 0..bands.count {
            let total = r.reflected[b] + r.transmitted[b] + m.absorption[b];
            assert!((total - 1.0).abs() < 1e-12);
        }
        let r = surface_response(&RandomIncidence, &m, bands.count, 1.0, false);
        assert!(r.transmitted.iter().all(|&t| t == 0.0));
    }

    #[test]
    fn test_air_absorption_standard() {
        let air = AirAbsorption::standard(&PRESET_BAND_FREQUENCIES);
        // 1 kHz at 20 C / 50 % RH is about 5 dB/km
        assert!((air.attenuation_per_meter[3] - 0.0049).abs() < 0.001);
        let factors = air.apply_distance(10.0);
        // Low frequency should have less attenuation than high frequency
        assert!(factors[0] > factors[6]);
        // All factors should be between 0 and 1
        for f in &factors {
            assert!(*f > 0.0 && *f <= 1.0);
        }
    }

    #[test]
    fn test_air_absorption_zero_distance() {
        let air = AirAbsorption::standard(&PRESET_BAND_FREQUENCIES);
        for f in air.apply_distance(0.0) {
            assert!((f - 1.0).abs() < 1e-10);
        }
        assert!(AirAbsorption::none(3).apply_distance(100.0).iter().all(|&f| f == 1.0));
    }
}
