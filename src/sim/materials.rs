use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AcousticError, Result};

/// Number of bands in the canonical preset tables (125 Hz to 8 kHz).
pub const NUM_PRESET_BANDS: usize = 7;

/// Center frequencies of the canonical preset tables in Hz.
pub const PRESET_BAND_FREQUENCIES: [f64; NUM_PRESET_BANDS] =
    [125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0];

/// Characteristic impedance of air at 20 C in Pa*s/m (rayl).
pub const AIR_IMPEDANCE: f64 = 413.0;

/// Upper bound for mass-law transmission (very light layers are never fully open).
const MAX_MASS_LAW_TRANSMISSION: f64 = 0.95;

/// Frequency band layout shared by materials, rays and impulse responses.
///
/// Band centers are log-spaced between `min_hz` and `max_hz` (inclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBands {
    pub count: usize,
    pub min_hz: f64,
    pub max_hz: f64,
}

impl FrequencyBands {
    pub fn new(count: usize, min_hz: f64, max_hz: f64) -> Self {
        Self {
            count,
            min_hz,
            max_hz,
        }
    }

    /// Standard octave bands 125 Hz - 8 kHz.
    pub fn octaves() -> Self {
        Self::new(NUM_PRESET_BANDS, 125.0, 8000.0)
    }

    /// Band center frequencies in Hz.
    pub fn centers(&self) -> Vec<f64> {
        match self.count {
            0 => Vec::new(),
            1 => vec![(self.min_hz * self.max_hz).sqrt()],
            n => {
                let ratio = self.max_hz / self.min_hz;
                (0..n)
                    .map(|i| self.min_hz * ratio.powf(i as f64 / (n - 1) as f64))
                    .collect()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(AcousticError::Configuration(
                "frequency band count must be at least 1".to_string(),
            ));
        }
        if !(self.min_hz > 0.0 && self.max_hz >= self.min_hz && self.max_hz.is_finite()) {
            return Err(AcousticError::Configuration(format!(
                "invalid frequency range {} Hz - {} Hz",
                self.min_hz, self.max_hz
            )));
        }
        Ok(())
    }
}

impl Default for FrequencyBands {
    fn default() -> Self {
        Self::octaves()
    }
}

/// Acoustic surface material with per-band absorption, scattering and transmission.
///
/// All coefficient vectors share one length (the configured band count).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcousticMaterial {
    pub name: String,
    /// Absorption coefficients per band [0.0, 1.0].
    pub absorption: Vec<f64>,
    /// Scattering coefficients per band [0.0, 1.0].
    pub scattering: Vec<f64>,
    /// Transmission coefficients per band [0.0, 1.0].
    pub transmission: Vec<f64>,
    /// Characteristic acoustic impedance in rayl.
    pub impedance: f64,
    /// Density in kg/m^3.
    pub density: f64,
    /// Layer thickness in meters (0 = backed surface, no mass-law transmission).
    pub thickness: f64,
}

impl AcousticMaterial {
    pub fn new(
        name: &str,
        absorption: Vec<f64>,
        scattering: Vec<f64>,
        transmission: Vec<f64>,
        impedance: f64,
        density: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            absorption,
            scattering,
            transmission,
            impedance,
            density,
            thickness: 0.0,
        }
    }

    /// Creates a material with uniform coefficients across all bands and no transmission.
    pub fn uniform(name: &str, band_count: usize, absorption: f64, scattering: f64) -> Self {
        Self::new(
            name,
            vec![absorption; band_count],
            vec![scattering; band_count],
            vec![0.0; band_count],
            1.0e7,
            2000.0,
        )
    }

    pub fn with_thickness(mut self, thickness: f64) -> Self {
        self.thickness = thickness;
        self
    }

    pub fn with_transmission(mut self, transmission: Vec<f64>) -> Self {
        self.transmission = transmission;
        self
    }

    pub fn band_count(&self) -> usize {
        self.absorption.len()
    }

    /// Mass per unit area in kg/m^2.
    pub fn surface_density(&self) -> f64 {
        self.density * self.thickness
    }

    pub fn mean_scattering(&self) -> f64 {
        if self.scattering.is_empty() {
            return 0.0;
        }
        self.scattering.iter().sum::<f64>() / self.scattering.len() as f64
    }

    pub fn has_transmission(&self) -> bool {
        self.transmission.iter().any(|&t| t > 0.0)
    }

    /// Checks band counts and coefficient ranges.
    pub fn validate(&self, band_count: usize) -> Result<()> {
        for (label, coeffs) in [
            ("absorption", &self.absorption),
            ("scattering", &self.scattering),
            ("transmission", &self.transmission),
        ] {
            if coeffs.len() != band_count {
                return Err(AcousticError::Configuration(format!(
                    "material '{}': {} has {} bands, expected {}",
                    self.name,
                    label,
                    coeffs.len(),
                    band_count
                )));
            }
            if let Some(bad) = coeffs.iter().find(|c| !(0.0..=1.0).contains(*c)) {
                return Err(AcousticError::Configuration(format!(
                    "material '{}': {} coefficient {} outside [0, 1]",
                    self.name, label, bad
                )));
            }
        }
        if !(self.impedance > 0.0 && self.density > 0.0) || self.thickness < 0.0 {
            return Err(AcousticError::Configuration(format!(
                "material '{}': impedance and density must be positive",
                self.name
            )));
        }
        Ok(())
    }

    // Presets. Canonical curves are tabulated at 125 Hz - 8 kHz and
    // interpolated onto the requested band layout.

    pub fn concrete(bands: &FrequencyBands) -> Self {
        Self::from_table(
            "concrete",
            bands,
            [0.36, 0.44, 0.31, 0.29, 0.39, 0.25, 0.25],
            [0.10, 0.12, 0.15, 0.20, 0.25, 0.30, 0.30],
            8.05e6,
            2300.0,
            0.2,
        )
    }

    pub fn wood(bands: &FrequencyBands) -> Self {
        Self::from_table(
            "wood",
            bands,
            [0.15, 0.11, 0.10, 0.07, 0.06, 0.07, 0.07],
            [0.10, 0.10, 0.10, 0.10, 0.10, 0.10, 0.10],
            2.4e6,
            600.0,
            0.02,
        )
    }

    pub fn carpet(bands: &FrequencyBands) -> Self {
        Self::from_table(
            "carpet",
            bands,
            [0.02, 0.06, 0.14, 0.37, 0.60, 0.65, 0.65],
            [0.40, 0.40, 0.40, 0.50, 0.50, 0.50, 0.50],
            1.0e5,
            200.0,
            0.0,
        )
    }

    pub fn glass(bands: &FrequencyBands) -> Self {
        Self::from_table(
            "glass",
            bands,
            [0.35, 0.25, 0.18, 0.12, 0.07, 0.04, 0.04],
            [0.05, 0.05, 0.05, 0.05, 0.05, 0.05, 0.05],
            1.3e7,
            2500.0,
            0.006,
        )
    }

    pub fn metal(bands: &FrequencyBands) -> Self {
        Self::from_table(
            "metal",
            bands,
            [0.01, 0.01, 0.01, 0.02, 0.02, 0.02, 0.03],
            [0.05, 0.05, 0.05, 0.05, 0.05, 0.05, 0.05],
            4.5e7,
            7850.0,
            0.002,
        )
    }

    pub fn fabric(bands: &FrequencyBands) -> Self {
        Self::from_table(
            "fabric",
            bands,
            [0.03, 0.04, 0.11, 0.17, 0.24, 0.35, 0.35],
            [0.20, 0.20, 0.30, 0.30, 0.40, 0.40, 0.40],
            2.0e3,
            300.0,
            0.001,
        )
    }

    /// Water surface: fluid boundary, transmission from the impedance mismatch with air.
    pub fn water(bands: &FrequencyBands) -> Self {
        let impedance = 1.48e6;
        let tau = impedance_transmission(AIR_IMPEDANCE, impedance);
        let n = bands.count;
        Self::from_table(
            "water",
            bands,
            [0.01, 0.01, 0.01, 0.015, 0.02, 0.02, 0.025],
            [0.0; NUM_PRESET_BANDS],
            impedance,
            1000.0,
            0.0,
        )
        .with_transmission(vec![tau; n])
    }

    /// Fully transparent boundary (portals, open windows).
    pub fn air(bands: &FrequencyBands) -> Self {
        let n = bands.count;
        Self::new(
            "air",
            vec![0.0; n],
            vec![0.0; n],
            vec![1.0; n],
            AIR_IMPEDANCE,
            1.204,
        )
    }

    /// Looks up a preset by name.
    pub fn preset(name: &str, bands: &FrequencyBands) -> Option<Self> {
        let material = match name {
            "concrete" => Self::concrete(bands),
            "wood" => Self::wood(bands),
            "carpet" => Self::carpet(bands),
            "glass" => Self::glass(bands),
            "metal" => Self::metal(bands),
            "fabric" => Self::fabric(bands),
            "water" => Self::water(bands),
            "air" => Self::air(bands),
            _ => return None,
        };
        Some(material)
    }

    pub fn preset_names() -> [&'static str; 8] {
        [
            "concrete", "wood", "carpet", "glass", "metal", "fabric", "water", "air",
        ]
    }

    fn from_table(
        name: &str,
        bands: &FrequencyBands,
        absorption: [f64; NUM_PRESET_BANDS],
        scattering: [f64; NUM_PRESET_BANDS],
        impedance: f64,
        density: f64,
        thickness: f64,
    ) -> Self {
        let centers = bands.centers();
        let mass = density * thickness;
        let transmission = centers
            .iter()
            .map(|&f| {
                if mass > 0.0 {
                    mass_law_transmission(mass, f)
                } else {
                    0.0
                }
            })
            .collect();
        Self {
            name: name.to_string(),
            absorption: resample_table(&absorption, &centers),
            scattering: resample_table(&scattering, &centers),
            transmission,
            impedance,
            density,
            thickness,
        }
    }
}

/// Field-incidence mass law: TL = 20 log10(m f) - 47 dB.
///
/// Returns the energy transmission coefficient for surface density `mass` (kg/m^2)
/// at frequency `freq` (Hz).
pub fn mass_law_transmission(mass: f64, freq: f64) -> f64 {
    if mass <= 0.0 || freq <= 0.0 {
        return 0.0;
    }
    let tl_db = 20.0 * (mass * freq).log10() - 47.0;
    10.0_f64
        .powf(-tl_db.max(0.0) / 10.0)
        .min(MAX_MASS_LAW_TRANSMISSION)
}

/// Normal-incidence energy transmission across a boundary between two media.
pub fn impedance_transmission(z1: f64, z2: f64) -> f64 {
    if z1 <= 0.0 || z2 <= 0.0 {
        return 0.0;
    }
    4.0 * z1 * z2 / ((z1 + z2) * (z1 + z2))
}

/// Linear interpolation of a preset table in log-frequency, clamped at the ends.
fn resample_table(table: &[f64; NUM_PRESET_BANDS], centers: &[f64]) -> Vec<f64> {
    centers
        .iter()
        .map(|&f| {
            let x = f.log2();
            let first = PRESET_BAND_FREQUENCIES[0].log2();
            let last = PRESET_BAND_FREQUENCIES[NUM_PRESET_BANDS - 1].log2();
            if x <= first {
                return table[0];
            }
            if x >= last {
                return table[NUM_PRESET_BANDS - 1];
            }
            // Preset centers are exact octaves: index by log2 distance
            let pos = x - first;
            let i = (pos.floor() as usize).min(NUM_PRESET_BANDS - 2);
            let frac = pos - i as f64;
            table[i] * (1.0 - frac) + table[i + 1] * frac
        })
        .collect()
}

/// Named materials shared by many geometries.
#[derive(Debug, Clone, Default)]
pub struct MaterialLibrary {
    materials: HashMap<String, Arc<AcousticMaterial>>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library pre-filled with every preset for the given band layout.
    pub fn with_presets(bands: &FrequencyBands) -> Self {
        let mut lib = Self::new();
        for name in AcousticMaterial::preset_names() {
            if let Some(m) = AcousticMaterial::preset(name, bands) {
                lib.add(m);
            }
        }
        lib
    }

    /// Adds (or replaces) a material and returns the shared handle.
    pub fn add(&mut self, material: AcousticMaterial) -> Arc<AcousticMaterial> {
        let material = Arc::new(material);
        self.materials
            .insert(material.name.clone(), Arc::clone(&material));
        material
    }

    pub fn get(&self, name: &str) -> Option<Arc<AcousticMaterial>> {
        self.materials.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}
