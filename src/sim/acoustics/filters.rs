/// Second-order (biquad) filter coefficients in Direct Form I.
///
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

/// Biquad filter state for Direct Form I processing.
#[derive(Debug, Clone, Default)]
pub struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a single sample through the filter.
    pub fn process(&mut self, sample: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * sample + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = sample;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Band-pass biquad centred at `center_freq` spanning `octaves` octaves.
///
/// Cookbook BPF with constant 0 dB peak gain.
pub fn design_bandpass(center_freq: f64, octaves: f64, sample_rate: f64) -> BiquadCoeffs {
    let half = 2.0_f64.powf(octaves / 2.0);
    let bw = center_freq * half - center_freq / half;

    let w0 = 2.0 * std::f64::consts::PI * center_freq / sample_rate;
    let sin_w0 = w0.sin();
    let cos_w0 = w0.cos();
    let alpha = sin_w0 / (2.0 * (center_freq / bw));

    let a0 = 1.0 + alpha;
    BiquadCoeffs {
        b0: alpha / a0,
        b1: 0.0,
        b2: -alpha / a0,
        a1: -2.0 * cos_w0 / a0,
        a2: (1.0 - alpha) / a0,
    }
}

/// One-octave band-pass.
pub fn design_octave_bandpass(center_freq: f64, sample_rate: f64) -> BiquadCoeffs {
    design_bandpass(center_freq, 1.0, sample_rate)
}

/// Width in octaves of each band in a log-spaced layout of `count` bands.
pub fn band_width_octaves(min_hz: f64, max_hz: f64, count: usize) -> f64 {
    if count <= 1 || max_hz <= min_hz {
        return 1.0;
    }
    ((max_hz / min_hz).log2() / (count - 1) as f64).max(1.0 / 6.0)
}

/// Sum of the squared impulse response: output power for unit white noise.
pub fn noise_power_gain(coeffs: &BiquadCoeffs, length: usize) -> f64 {
    let mut state = BiquadState::new();
    (0..length)
        .map(|n| {
            let y = state.process(if n == 0 { 1.0 } else { 0.0 }, coeffs);
            y * y
        })
        .sum()
}

/// Runs `signal` through the filter.
pub fn filter_signal(signal: &[f64], coeffs: &BiquadCoeffs) -> Vec<f64> {
    let mut state = BiquadState::new();
    signal.iter().map(|&s| state.process(s, coeffs)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    fn steady_ratio(input: &[f64], output: &[f64]) -> f64 {
        let skip = input.len() / 4;
        let e_in: f64 = input[skip..].iter().map(|x| x * x).sum();
        let e_out: f64 = output[skip..].iter().map(|x| x * x).sum();
        e_out / e_in
    }

    #[test]
    fn test_biquad_silence() {
        let coeffs = design_octave_bandpass(1000.0, 48000.0);
        let mut state = BiquadState::new();
        for _ in 0..100 {
            assert!(state.process(0.0, &coeffs).abs() < 1e-15);
        }
    }

    #[test]
    fn test_bandpass_passes_center_frequency() {
        let fs = 48000.0;
        let signal = sine(1000.0, fs, 48000);
        let out = filter_signal(&signal, &design_octave_bandpass(1000.0, fs));
        let ratio = steady_ratio(&signal, &out);
        assert!(ratio > 0.9, "ratio={ratio}");
    }

    #[test]
    fn test_bandpass_rejects_out_of_band() {
        let fs = 48000.0;
        let signal = sine(100.0, fs, 48000);
        let out = filter_signal(&signal, &design_octave_bandpass(1000.0, fs));
        let ratio = steady_ratio(&signal, &out);
        assert!(ratio < 0.1, "ratio={ratio}");
    }

    #[test]
    fn test_noise_power_gain() {
        // Pure pass-through has unit gain
        let identity = BiquadCoeffs {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        };
        assert!((noise_power_gain(&identity, 64) - 1.0).abs() < 1e-12);
        // An octave band keeps a fraction of white noise power
        let g = noise_power_gain(&design_octave_bandpass(1000.0, 48000.0), 48000);
        assert!(g > 0.0 && g < 0.2, "gain {g}");
    }

    #[test]
    fn test_band_width_octaves() {
        assert!((band_width_octaves(125.0, 8000.0, 7) - 1.0).abs() < 1e-12);
        assert_eq!(band_width_octaves(1000.0, 1000.0, 1), 1.0);
        // Third-octave layout
        assert!((band_width_octaves(100.0, 800.0, 10) - 1.0 / 3.0).abs() < 1e-12);
    }
}
