use serde::Serialize;

use super::impulse_response::{DECAY_FLOOR_DB, RayTracingImpulseResponse};

/// Schroeder backward integral of an energy histogram, in dB re. the total.
pub fn schroeder_decay(energy: &[f64]) -> Vec<f64> {
    let mut remaining: f64 = energy.iter().sum();
    if remaining <= 0.0 {
        return vec![DECAY_FLOOR_DB; energy.len()];
    }
    let total = remaining;
    let mut out = Vec::with_capacity(energy.len());
    for &e in energy {
        let level = if remaining > 0.0 {
            (10.0 * (remaining / total).log10()).max(DECAY_FLOOR_DB)
        } else {
            DECAY_FLOOR_DB
        };
        out.push(level);
        remaining = (remaining - e).max(0.0);
    }
    out
}

/// Reverberation time from Schroeder backward integration.
///
/// Fits a line to the decay curve between `start_db` and `end_db`,
/// then extrapolates to -60 dB.
pub fn rt_from_decay(
    decay: &[f64],
    time_resolution: f64,
    start_db: f64,
    end_db: f64,
) -> Option<f64> {
    let i_start = decay.iter().position(|&v| v <= start_db)?;
    let i_end = decay.iter().position(|&v| v <= end_db)?;
    if i_end <= i_start {
        return None;
    }

    // Linear regression on the decay curve between start and end
    let n = (i_end - i_start + 1) as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (i, &y) in decay.iter().enumerate().take(i_end + 1).skip(i_start) {
        let x = i as f64 * time_resolution;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }
    let denom = n * sum_xx - sum_x * sum_x;
    if denom <= 0.0 {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    if slope >= 0.0 {
        return None;
    }
    Some(-60.0 / slope)
}

/// T20: Reverberation time estimated from -5 dB to -25 dB range.
pub fn t20(ir: &RayTracingImpulseResponse, band: usize) -> Option<f64> {
    let decay = ir.schroeder_decay(Some(band));
    rt_from_decay(&decay, ir.time_resolution(), -5.0, -25.0)
}

/// T30: Reverberation time estimated from -5 dB to -35 dB range.
pub fn t30(ir: &RayTracingImpulseResponse, band: usize) -> Option<f64> {
    let decay = ir.schroeder_decay(Some(band));
    rt_from_decay(&decay, ir.time_resolution(), -5.0, -35.0)
}

/// RT60: T30, falling back to T20.
pub fn rt60(ir: &RayTracingImpulseResponse, band: usize) -> Option<f64> {
    t30(ir, band).or_else(|| t20(ir, band))
}

/// EDT: Early Decay Time, estimated from 0 dB to -10 dB range.
pub fn edt(ir: &RayTracingImpulseResponse, band: usize) -> Option<f64> {
    let decay = ir.schroeder_decay(Some(band));
    rt_from_decay(&decay, ir.time_resolution(), 0.0, -10.0)
}

/// Early and total energy of `band` split `boundary` seconds after the onset.
fn split_energy(ir: &RayTracingImpulseResponse, band: usize, boundary: f64) -> Option<(f64, f64)> {
    let energy = ir.band_energy.get(band)?;
    let onset = ir.onset_sample();
    let split = onset + (boundary * ir.sample_rate).round() as usize;
    if split >= energy.len() {
        return None;
    }
    let early: f64 = energy[onset..split].iter().sum();
    let late: f64 = energy[split..].iter().sum();
    Some((early, late))
}

/// C80: Clarity (80 ms) in dB.
///
/// C80 = 10 * log10(E_early / E_late) with the boundary 80 ms after the onset.
pub fn c80(ir: &RayTracingImpulseResponse, band: usize) -> Option<f64> {
    let (early, late) = split_energy(ir, band, 0.080)?;
    if late <= 0.0 || early <= 0.0 {
        return None;
    }
    Some(10.0 * (early / late).log10())
}

/// D50: Definition (50 ms), ratio of early to total energy.
pub fn d50(ir: &RayTracingImpulseResponse, band: usize) -> Option<f64> {
    let (early, late) = split_energy(ir, band, 0.050)?;
    let total = early + late;
    if total <= 0.0 {
        return None;
    }
    Some(early / total)
}

/// Aggregated room acoustic metrics for all frequency bands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomAcousticReport {
    pub frequencies: Vec<f64>,
    /// Schroeder-fitted reverberation time per band.
    pub rt60: Vec<Option<f64>>,
    /// Statistical estimate per band.
    pub statistical_rt60: Vec<Option<f64>>,
    pub edt: Vec<Option<f64>>,
    pub c80: Vec<Option<f64>>,
    pub d50: Vec<Option<f64>>,
    pub estimated_rt60: Option<f64>,
}

impl RoomAcousticReport {
    pub fn from_ir(ir: &RayTracingImpulseResponse) -> Self {
        let bands = 0..ir.band_count();
        Self {
            frequencies: ir.band_centers.clone(),
            rt60: bands.clone().map(|b| rt60(ir, b)).collect(),
            statistical_rt60: bands
                .clone()
                .map(|b| ir.band_rt60.get(b).copied().flatten())
                .collect(),
            edt: bands.clone().map(|b| edt(ir, b)).collect(),
            c80: bands.clone().map(|b| c80(ir, b)).collect(),
            d50: bands.map(|b| d50(ir, b)).collect(),
            estimated_rt60: ir.estimated_rt60,
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_ir() -> RayTracingImpulseResponse {
        // 1 kHz histogram, 1 s, faster decay at higher bands
        let fs = 1000.0;
        let n = 1000;
        let centers = vec![125.0, 250.0, 500.0, 1000.0];
        let mut ir = RayTracingImpulseResponse::silent(fs, centers, 1, n);
        for (b, band) in ir.band_energy.iter_mut().enumerate() {
            let decay_rate = 10.0 + b as f64 * 2.0;
            for (i, e) in band.iter_mut().enumerate() {
                *e = (-decay_rate * i as f64 / fs).exp() * 0.01;
            }
        }
        ir
    }

    #[test]
    fn test_schroeder_decay_shape() {
        let decay = schroeder_decay(&[1.0, 1.0, 0.0, 0.0]);
        assert!((decay[0]).abs() < 1e-12);
        assert!((decay[1] + 10.0 * 2.0_f64.log10()).abs() < 1e-12);
        assert_eq!(decay[2], DECAY_FLOOR_DB);
        assert_eq!(schroeder_decay(&[0.0; 3]), vec![DECAY_FLOOR_DB; 3]);
    }

    #[test]
    fn test_rt_from_linear_decay() {
        // -60 dB per second exactly
        let decay: Vec<f64> = (0..1000).map(|i| -60.0 * i as f64 / 1000.0).collect();
        let rt = rt_from_decay(&decay, 0.001, -5.0, -35.0).unwrap();
        assert!((rt - 1.0).abs() < 1e-9);
        assert!(rt_from_decay(&decay, 0.001, -5.0, -80.0).is_none());
    }

    #[test]
    fn test_c80() {
        let ir = make_test_ir();
        for band in 0..ir.band_count() {
            let c = c80(&ir, band).unwrap();
            assert!(c > 0.0, "C80 should be positive for a fast decay");
        }
    }

    #[test]
    fn test_d50() {
        let ir = make_test_ir();
        for band in 0..ir.band_count() {
            let d = d50(&ir, band).unwrap();
            assert!(d > 0.0 && d <= 1.0);
        }
    }

    #[test]
    fn test_rt60_matches_decay_rate() {
        let ir = make_test_ir();
        // Energy e^(-a t) falls 60 dB in 6 ln(10) / a seconds
        let expected = 6.0 * 10.0_f64.ln() / 10.0;
        let rt = rt60(&ir, 0).unwrap();
        assert!((rt - expected).abs() / expected < 0.05, "rt {rt}");
        let e = edt(&ir, 0).unwrap();
        assert!((e - expected).abs() / expected < 0.05, "edt {e}");
        // Faster decay at higher bands
        assert!(rt60(&ir, 3).unwrap() < rt);
    }

    #[test]
    fn test_room_acoustic_report() {
        let ir = make_test_ir();
        let report = RoomAcousticReport::from_ir(&ir);
        assert_eq!(report.frequencies.len(), 4);
        assert_eq!(report.rt60.len(), 4);
        assert!(report.statistical_rt60.iter().all(Option::is_none));
        assert!(report.to_json().unwrap().contains("frequencies"));
    }

    #[test]
    fn test_empty_ir() {
        let ir = RayTracingImpulseResponse::silent(1000.0, vec![1000.0], 1, 100);
        assert!(rt60(&ir, 0).is_none());
        assert!(c80(&ir, 0).is_none());
        assert!(d50(&ir, 0).is_none());
    }
}
