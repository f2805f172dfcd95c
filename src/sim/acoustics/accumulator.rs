//! Listener-side accumulation of captured energy and rendering to a signal.
//!
//! Stochastic captures land in a dense per-band energy histogram. Exact
//! arrivals (direct, image source, diffraction) are kept as a sparse list and
//! rendered as impulses. Rendering turns each band's histogram into seeded
//! noise shaped by the band's energy envelope and filtered into the band.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::Vector;
use crate::sim::engine::ListenerCapture;
use crate::sim::materials::FrequencyBands;
use crate::sim::rays::generator::ray_rng;
use crate::sim::rays::{ChannelLayout, TracingParameters};

use super::filters::{BiquadState, band_width_octaves, design_bandpass, noise_power_gain};
use super::impulse_response::RayTracingImpulseResponse;

/// Random stream used for the noise carrier of each band.
const STREAM_RENDER: u64 = 7;

/// Bands centred above this fraction of the sample rate are not rendered.
const MAX_RENDER_FRACTION: f64 = 0.45;

/// Samples used to measure each band filter's noise power gain.
const GAIN_IMPULSE_LENGTH: usize = 16_384;

/// Listener frame used for stereo panning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ListenerOrientation {
    pub forward: Vector,
    pub up: Vector,
}

impl ListenerOrientation {
    pub fn new(forward: Vector, up: Vector) -> Self {
        Self { forward, up }
    }

    /// Unit vector pointing to the listener's right. Falls back to +X.
    pub fn right(&self) -> Vector {
        self.forward
            .cross(self.up)
            .normalize()
            .unwrap_or(Vector::new(1.0, 0.0, 0.0))
    }
}

impl Default for ListenerOrientation {
    /// Looking down -Z with +Y up.
    fn default() -> Self {
        Self {
            forward: Vector::new(0.0, 0.0, -1.0),
            up: Vector::new(0.0, 1.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DeterministicArrival {
    channel: usize,
    sample: usize,
    energy: Vec<f64>,
}

/// Energy collected at one listener.
#[derive(Debug, Clone)]
pub struct ImpulseResponseAccumulator {
    sample_rate: f64,
    length: usize,
    bands: FrequencyBands,
    band_centers: Vec<f64>,
    layout: ChannelLayout,
    right: Vector,
    /// `stochastic[channel][band][sample]`
    stochastic: Vec<Vec<Vec<f64>>>,
    deterministic: Vec<DeterministicArrival>,
    direct: Option<(f64, f64)>,
    dropped: u64,
}

impl ImpulseResponseAccumulator {
    pub fn new(params: &TracingParameters, orientation: ListenerOrientation) -> Self {
        let band_centers = params.bands.centers();
        let length = params.ir_length();
        let channels = params.channel_layout.channel_count();
        Self {
            sample_rate: params.sample_rate,
            length,
            bands: params.bands.clone(),
            stochastic: vec![vec![vec![0.0; length]; band_centers.len()]; channels],
            band_centers,
            layout: params.channel_layout,
            right: orientation.right(),
            deterministic: Vec::new(),
            direct: None,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Captures that arrived after the end of the response.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn deterministic_count(&self) -> usize {
        self.deterministic.len()
    }

    pub fn set_orientation(&mut self, orientation: ListenerOrientation) {
        self.right = orientation.right();
    }

    /// Per-channel energy gains for an arrival from `direction`.
    fn pan(&self, direction: Vector) -> Vec<f64> {
        match self.layout {
            ChannelLayout::Mono => vec![1.0],
            ChannelLayout::Stereo => {
                let x = direction.dot(self.right).clamp(-1.0, 1.0);
                vec![(1.0 - x) / 2.0, (1.0 + x) / 2.0]
            }
        }
    }

    /// Adds one arrival. Returns `false` when it falls outside the response.
    pub fn capture(&mut self, capture: &ListenerCapture) -> bool {
        self.capture_weighted(capture, 1.0)
    }

    /// Adds one arrival with its energy scaled by `weight`.
    pub fn capture_weighted(&mut self, capture: &ListenerCapture, weight: f64) -> bool {
        if !capture.delay.is_finite() || capture.delay < 0.0 {
            self.dropped += 1;
            return false;
        }
        let sample = (capture.delay * self.sample_rate).round() as usize;
        if sample >= self.length {
            self.dropped += 1;
            return false;
        }
        let gains = self.pan(capture.arrival_direction);
        for (channel, gain) in gains.into_iter().enumerate() {
            let w = gain * weight;
            if w <= 0.0 {
                continue;
            }
            if capture.deterministic {
                self.deterministic.push(DeterministicArrival {
                    channel,
                    sample,
                    energy: capture.energy.iter().map(|e| e * w).collect(),
                });
            } else {
                for (band, e) in capture.energy.iter().enumerate() {
                    if let Some(slot) = self.stochastic[channel].get_mut(band) {
                        slot[sample] += e * w;
                    }
                }
            }
        }
        true
    }

    /// Records the direct arrival used for normalization.
    pub fn set_direct(&mut self, delay: f64, gain: f64) {
        self.direct = Some((delay, gain));
    }

    pub fn direct(&self) -> Option<(f64, f64)> {
        self.direct
    }

    /// Multiplies all stochastic energy by `factor`.
    pub fn scale_stochastic(&mut self, factor: f64) {
        for e in self.stochastic.iter_mut().flatten().flatten() {
            *e *= factor;
        }
    }

    /// Drops exact arrivals and the direct reference.
    pub fn clear_deterministic(&mut self) {
        self.deterministic.clear();
        self.direct = None;
    }

    pub fn clear(&mut self) {
        self.clear_deterministic();
        self.scale_stochastic(0.0);
        self.dropped = 0;
    }

    /// Adds another accumulator of the same shape.
    pub fn merge(&mut self, other: &Self) {
        for (a, b) in self
            .stochastic
            .iter_mut()
            .flatten()
            .flatten()
            .zip(other.stochastic.iter().flatten().flatten())
        {
            *a += b;
        }
        self.deterministic.extend(other.deterministic.iter().cloned());
        if self.direct.is_none() {
            self.direct = other.direct;
        }
        self.dropped += other.dropped;
    }

    /// Energy per band and sample, summed over channels and arrival kinds.
    pub fn band_energy(&self) -> Vec<Vec<f64>> {
        let mut out = vec![vec![0.0; self.length]; self.band_centers.len()];
        for channel in &self.stochastic {
            for (acc, band) in out.iter_mut().zip(channel) {
                for (a, e) in acc.iter_mut().zip(band) {
                    *a += e;
                }
            }
        }
        for arrival in &self.deterministic {
            for (acc, e) in out.iter_mut().zip(&arrival.energy) {
                acc[arrival.sample] += e;
            }
        }
        out
    }

    pub fn total_energy(&self) -> f64 {
        let stochastic: f64 = self.stochastic.iter().flatten().flatten().sum();
        let exact: f64 = self
            .deterministic
            .iter()
            .map(|a| a.energy.iter().sum::<f64>())
            .sum();
        stochastic + exact
    }

    pub fn memory_bytes(&self) -> usize {
        let dense = self.stochastic.len() * self.band_centers.len() * self.length;
        let sparse: usize = self.deterministic.iter().map(|a| a.energy.len()).sum();
        (dense + sparse) * std::mem::size_of::<f64>()
    }

    /// Renders the pressure signal of every channel.
    ///
    /// Exact arrivals become single impulses of amplitude `sqrt(E)`. Each
    /// band's stochastic envelope modulates unit-variance noise that is
    /// band-pass filtered and corrected for the filter's noise power gain.
    fn render(&self, seed: u64) -> Vec<Vec<f64>> {
        let octaves = band_width_octaves(self.bands.min_hz, self.bands.max_hz, self.bands.count);
        let nyquist_limit = MAX_RENDER_FRACTION * self.sample_rate;
        let filters: Vec<_> = self
            .band_centers
            .iter()
            .map(|&fc| {
                (fc < nyquist_limit).then(|| {
                    let coeffs = design_bandpass(fc, octaves, self.sample_rate);
                    let power = noise_power_gain(&coeffs, GAIN_IMPULSE_LENGTH);
                    (coeffs, 1.0 / power.max(1e-12).sqrt())
                })
            })
            .collect();

        let mut channels = vec![vec![0.0; self.length]; self.stochastic.len()];
        for (ch, out) in channels.iter_mut().enumerate() {
            for (band, filter) in filters.iter().enumerate() {
                let Some((coeffs, correction)) = filter else {
                    continue;
                };
                let envelope = &self.stochastic[ch][band];
                if envelope.iter().all(|&e| e == 0.0) {
                    continue;
                }
                let mut rng = ray_rng(seed, ch * 1024 + band, STREAM_RENDER);
                let mut state = BiquadState::new();
                for (o, &e) in out.iter_mut().zip(envelope) {
                    // Uniform noise scaled to unit variance
                    let noise = (rng.r#gen::<f64>() * 2.0 - 1.0) * 3.0_f64.sqrt();
                    *o += state.process(noise * e.max(0.0).sqrt(), coeffs) * correction;
                }
            }
        }

        let mut impulses: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for arrival in &self.deterministic {
            *impulses.entry((arrival.channel, arrival.sample)).or_default() +=
                arrival.energy.iter().sum::<f64>();
        }
        for ((ch, sample), energy) in impulses {
            channels[ch][sample] += energy.sqrt();
        }
        channels
    }

    /// Builds the impulse response.
    ///
    /// `band_rt60` is the statistical per-band estimate from the tracer.
    pub fn finish(
        &self,
        seed: u64,
        early_reflection_window: f64,
        band_rt60: Vec<Option<f64>>,
    ) -> RayTracingImpulseResponse {
        let mut ir = RayTracingImpulseResponse {
            sample_rate: self.sample_rate,
            band_centers: self.band_centers.clone(),
            channels: self.render(seed),
            band_energy: self.band_energy(),
            direct_path_delay: self.direct.map(|(d, _)| d),
            direct_gain: self.direct.map(|(_, g)| g),
            early_reflection_window,
            estimated_rt60: None,
            band_rt60,
            energy_decay_curve: Vec::new(),
        };
        ir.refresh_decay();
        ir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;
    use crate::sim::rays::RayKind;

    fn params(layout: ChannelLayout) -> TracingParameters {
        let mut p = TracingParameters::new();
        p.sample_rate = 8000.0;
        p.ir_duration = 0.5;
        p.channel_layout = layout;
        p
    }

    fn capture(delay: f64, energy: f64, from: Vector, deterministic: bool) -> ListenerCapture {
        ListenerCapture {
            delay,
            energy: vec![energy; 7],
            arrival_direction: from,
            kind: RayKind::LateReflection,
            deterministic,
            segment_origin: Point::origin(),
            segment_origin_time: 0.0,
            first_point: Point::origin(),
        }
    }

    #[test]
    fn test_deterministic_impulse() {
        let mut acc = ImpulseResponseAccumulator::new(
            &params(ChannelLayout::Mono),
            ListenerOrientation::default(),
        );
        assert!(acc.capture(&capture(0.01, 0.5 / 7.0, Vector::new(1.0, 0.0, 0.0), true)));
        acc.set_direct(0.01, 0.5);
        let ir = acc.finish(1, 0.08, vec![None; 7]);
        assert_eq!(ir.len(), 4000);
        assert_eq!(ir.peak_sample(0), Some(80));
        assert!((ir.channels[0][80] - 0.5_f64.sqrt()).abs() < 1e-12);
        // Nothing else in the signal
        let others: f64 = ir.channels[0].iter().map(|s| s.abs()).sum::<f64>() - ir.channels[0][80];
        assert!(others.abs() < 1e-12);
        assert_eq!(ir.direct_path_delay, Some(0.01));
    }

    #[test]
    fn test_late_capture_dropped() {
        let mut acc = ImpulseResponseAccumulator::new(
            &params(ChannelLayout::Mono),
            ListenerOrientation::default(),
        );
        assert!(!acc.capture(&capture(0.6, 1.0, Vector::new(1.0, 0.0, 0.0), false)));
        assert!(!acc.capture(&capture(f64::NAN, 1.0, Vector::new(1.0, 0.0, 0.0), false)));
        assert_eq!(acc.dropped(), 2);
        assert_eq!(acc.total_energy(), 0.0);
    }

    #[test]
    fn test_stereo_panning() {
        let mut acc = ImpulseResponseAccumulator::new(
            &params(ChannelLayout::Stereo),
            ListenerOrientation::default(),
        );
        // Default right axis is +X
        acc.capture(&capture(0.01, 1.0, Vector::new(1.0, 0.0, 0.0), true));
        acc.capture(&capture(0.02, 1.0, Vector::new(0.0, 0.0, -1.0), true));
        let ir = acc.finish(0, 0.08, vec![None; 7]);
        assert_eq!(ir.channel_count(), 2);
        // Hard right
        assert_eq!(ir.channels[0][80], 0.0);
        assert!((ir.channels[1][80] - 7.0_f64.sqrt()).abs() < 1e-12);
        // Straight ahead splits evenly
        assert!((ir.channels[0][160] - ir.channels[1][160]).abs() < 1e-12);
    }

    #[test]
    fn test_stochastic_energy_is_preserved() {
        let p = params(ChannelLayout::Mono);
        let mut acc = ImpulseResponseAccumulator::new(&p, ListenerOrientation::default());
        for i in 0..8000 {
            let delay = 0.05 + i as f64 * 5e-5;
            acc.capture(&capture(delay, 1e-3, Vector::new(0.0, 1.0, 0.0), false));
        }
        let ir = acc.finish(3, 0.08, vec![None; 7]);
        assert!((ir.total_energy() - 8000.0 * 7e-3).abs() < 1e-9);
        // Rendered signal power follows the rendered bands' energy
        let rendered: f64 = ir
            .band_centers
            .iter()
            .enumerate()
            .filter(|(_, f)| **f < 0.45 * p.sample_rate)
            .map(|(b, _)| ir.band_total(b))
            .sum();
        let power: f64 = ir.channels[0].iter().map(|s| s * s).sum();
        assert!((power / rendered - 1.0).abs() < 0.25, "ratio {}", power / rendered);
    }

    #[test]
    fn test_render_is_seeded() {
        let p = params(ChannelLayout::Mono);
        let mut acc = ImpulseResponseAccumulator::new(&p, ListenerOrientation::default());
        acc.capture(&capture(0.1, 1e-2, Vector::new(0.0, 1.0, 0.0), false));
        assert_eq!(acc.finish(5, 0.08, vec![]).channels, acc.finish(5, 0.08, vec![]).channels);
        assert_ne!(acc.finish(5, 0.08, vec![]).channels, acc.finish(6, 0.08, vec![]).channels);
    }

    #[test]
    fn test_scale_and_merge() {
        let p = params(ChannelLayout::Mono);
        let mut a = ImpulseResponseAccumulator::new(&p, ListenerOrientation::default());
        let mut b = a.clone();
        a.capture(&capture(0.1, 1.0, Vector::new(0.0, 1.0, 0.0), false));
        b.capture(&capture(0.2, 1.0, Vector::new(0.0, 1.0, 0.0), true));
        a.scale_stochastic(0.5);
        a.merge(&b);
        assert!((a.total_energy() - 10.5).abs() < 1e-12);
        assert_eq!(a.deterministic_count(), 1);
        a.clear();
        assert_eq!(a.total_energy(), 0.0);
    }
}
