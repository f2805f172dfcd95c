use serde::Serialize;

use super::metrics::{self, RoomAcousticReport};

/// Band centers averaged into the single mid-frequency reverberation time.
const MID_BAND_RANGE: (f64, f64) = (354.0, 1414.0);

/// Energy decay curves stop here instead of going to minus infinity.
pub const DECAY_FLOOR_DB: f64 = -300.0;

/// Multichannel impulse response produced by a trace.
///
/// `channels` holds the rendered pressure signal per output channel.
/// `band_energy` keeps the underlying per-band energy histogram at the same
/// sample rate, which is what the room-acoustic metrics read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RayTracingImpulseResponse {
    pub sample_rate: f64,
    pub band_centers: Vec<f64>,
    /// `channels[channel][sample]`.
    pub channels: Vec<Vec<f64>>,
    /// `band_energy[band][sample]`, summed over channels.
    pub band_energy: Vec<Vec<f64>>,
    /// Seconds from emission to the direct arrival, if one exists.
    pub direct_path_delay: Option<f64>,
    /// Broadband energy of the direct arrival.
    pub direct_gain: Option<f64>,
    /// Seconds after the direct arrival treated as early reflections.
    pub early_reflection_window: f64,
    /// Mid-frequency reverberation time in seconds.
    pub estimated_rt60: Option<f64>,
    /// Statistical reverberation time per band.
    pub band_rt60: Vec<Option<f64>>,
    /// Broadband Schroeder curve in dB, from the onset on.
    pub energy_decay_curve: Vec<f64>,
}

impl RayTracingImpulseResponse {
    /// All-zero response of `length` samples.
    pub fn silent(
        sample_rate: f64,
        band_centers: Vec<f64>,
        channel_count: usize,
        length: usize,
    ) -> Self {
        let bands = band_centers.len();
        Self {
            sample_rate,
            channels: vec![vec![0.0; length]; channel_count],
            band_energy: vec![vec![0.0; length]; bands],
            band_centers,
            direct_path_delay: None,
            direct_gain: None,
            early_reflection_window: 0.0,
            estimated_rt60: None,
            band_rt60: vec![None; bands],
            energy_decay_curve: Vec::new(),
        }
    }

    /// Number of samples per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn band_count(&self) -> usize {
        self.band_centers.len()
    }

    /// Seconds per sample.
    pub fn time_resolution(&self) -> f64 {
        1.0 / self.sample_rate
    }

    pub fn duration(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }

    /// Broadband energy per sample.
    pub fn broadband_energy(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.len()];
        for band in &self.band_energy {
            for (o, e) in out.iter_mut().zip(band) {
                *o += e;
            }
        }
        out
    }

    pub fn total_energy(&self) -> f64 {
        self.band_energy.iter().flatten().sum()
    }

    pub fn band_total(&self, band: usize) -> f64 {
        self.band_energy.get(band).map_or(0.0, |b| b.iter().sum())
    }

    /// Whether no energy arrived at all.
    pub fn is_silent(&self) -> bool {
        self.channels.iter().flatten().all(|&s| s == 0.0)
            && self.band_energy.iter().flatten().all(|&e| e == 0.0)
    }

    /// Largest absolute sample over all channels.
    pub fn peak(&self) -> f64 {
        self.channels
            .iter()
            .flatten()
            .fold(0.0, |acc: f64, s| acc.max(s.abs()))
    }

    /// Index of the largest absolute sample in `channel`.
    pub fn peak_sample(&self, channel: usize) -> Option<usize> {
        let signal = self.channels.get(channel)?;
        signal
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != 0.0)
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()).then(b.0.cmp(&a.0)))
            .map(|(i, _)| i)
    }

    /// First sample that metrics are measured from: the direct arrival, or
    /// the first sample with energy.
    pub fn onset_sample(&self) -> usize {
        if let Some(delay) = self.direct_path_delay {
            return ((delay * self.sample_rate).round() as usize).min(self.len());
        }
        self.broadband_energy()
            .iter()
            .position(|&e| e > 0.0)
            .unwrap_or(0)
    }

    /// Schroeder curve of one band (`Some`) or broadband (`None`), in dB.
    pub fn schroeder_decay(&self, band: Option<usize>) -> Vec<f64> {
        let onset = self.onset_sample();
        match band {
            Some(b) => match self.band_energy.get(b) {
                Some(energy) => metrics::schroeder_decay(&energy[onset..]),
                None => Vec::new(),
            },
            None => metrics::schroeder_decay(&self.broadband_energy()[onset..]),
        }
    }

    /// Recomputes the broadband decay curve and the mid-band RT60.
    pub fn refresh_decay(&mut self) {
        self.energy_decay_curve = self.schroeder_decay(None);
        self.estimated_rt60 = self.mid_band_rt60();
    }

    /// Averages the statistical estimate over mid bands, falling back to
    /// the Schroeder fit when no statistical estimate exists.
    fn mid_band_rt60(&self) -> Option<f64> {
        let mut mids: Vec<usize> = self
            .band_centers
            .iter()
            .enumerate()
            .filter(|(_, f)| (MID_BAND_RANGE.0..=MID_BAND_RANGE.1).contains(*f))
            .map(|(i, _)| i)
            .collect();
        if mids.is_empty() {
            let closest = self
                .band_centers
                .iter()
                .enumerate()
                .min_by(|a, b| {
                    (a.1.ln() - 707.0_f64.ln())
                        .abs()
                        .total_cmp(&(b.1.ln() - 707.0_f64.ln()).abs())
                })
                .map(|(i, _)| i);
            mids.extend(closest);
        }
        let values: Vec<f64> = mids
            .iter()
            .filter_map(|&b| {
                self.band_rt60
                    .get(b)
                    .copied()
                    .flatten()
                    .or_else(|| metrics::rt60(self, b))
            })
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Scales the response so the direct arrival (or the peak) has unit amplitude.
    ///
    /// Returns the amplitude factor applied; a silent response is left as is.
    pub fn normalize(&mut self) -> f64 {
        let reference = match self.direct_gain {
            Some(g) if g > 0.0 => g.sqrt(),
            _ => self.peak(),
        };
        if reference <= 0.0 || !reference.is_finite() {
            return 1.0;
        }
        let gain = 1.0 / reference;
        for s in self.channels.iter_mut().flatten() {
            *s *= gain;
        }
        for e in self.band_energy.iter_mut().flatten() {
            *e *= gain * gain;
        }
        if let Some(g) = self.direct_gain.as_mut() {
            *g *= gain * gain;
        }
        gain
    }

    /// Per-band room-acoustic parameters.
    pub fn compute_diagnostics(&self) -> RoomAcousticReport {
        RoomAcousticReport::from_ir(self)
    }

    /// Energy arriving in `[start, end)` seconds, all bands.
    pub fn energy_between(&self, start: f64, end: f64) -> f64 {
        let len = self.len();
        let a = ((start * self.sample_rate).round().max(0.0) as usize).min(len);
        let b = ((end * self.sample_rate).round().max(0.0) as usize).min(len);
        self.band_energy
            .iter()
            .map(|band| band[a..b.max(a)].iter().sum::<f64>())
            .sum()
    }
}
