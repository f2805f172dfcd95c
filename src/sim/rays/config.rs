use std::hash::Hasher;
use std::path::Path;
use std::time::Duration;

use fxhash::FxHasher64;
use serde::{Deserialize, Serialize};

use crate::error::{AcousticError, Result};
use crate::sim::accel::AccelerationConfig;
use crate::sim::materials::FrequencyBands;

/// Upper bound on `max_bounces`.
pub const MAX_BOUNCES_LIMIT: usize = 10_000;

/// Output channel layout of the impulse response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    /// Left/right energy panning against the listener orientation.
    Stereo,
}

impl ChannelLayout {
    pub fn channel_count(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

/// Tracing configuration.
///
/// Supplied whole and replaced whole; never mutated while a trace runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingParameters {
    // Rays
    pub num_rays: usize,
    pub max_bounces: usize,
    /// Rays stop once every band falls below this fraction of their initial energy.
    pub min_energy_threshold: f64,
    /// Maximum path length in meters.
    pub max_trace_distance: f64,
    /// Speed of sound in m/s.
    pub speed_of_sound: f64,
    pub seed: u64,

    // Bands
    pub bands: FrequencyBands,

    // Features
    pub enable_diffraction: bool,
    pub enable_transmission: bool,
    pub enable_scattering: bool,
    pub enable_air_absorption: bool,
    /// Air temperature in degrees Celsius.
    pub air_temperature: f64,
    /// Relative humidity in percent.
    pub air_humidity: f64,

    // Early reflections
    /// Reflections up to this order come from image sources, not from rays.
    pub early_reflection_order: usize,
    /// Early window in seconds after the direct arrival.
    pub early_reflection_window: f64,
    /// Hard cap on enumerated image sources.
    pub max_image_sources: usize,

    // Listener and output
    /// Capture sphere radius in meters.
    pub listener_radius: f64,
    pub sample_rate: f64,
    /// Impulse response length in seconds.
    pub ir_duration: f64,
    pub channel_layout: ChannelLayout,

    // Execution
    /// Worker threads (0 = rayon default pool).
    pub thread_count: usize,
    /// Rays per offline call before clamping.
    pub max_rays_per_call: usize,
    pub acceleration: AccelerationConfig,
    /// Store every ray path for visualization (memory heavy).
    pub record_debug_paths: bool,

    // Real-time
    pub max_rays_per_frame: usize,
    /// Wall-clock allowance per `update` call.
    pub frame_time_budget: Duration,
    /// Weight of a new ray batch when blended into the live response, (0, 1].
    pub realtime_blend: f64,
    /// Source/listener displacement (m) above which cached paths are dropped.
    pub movement_threshold: f64,
    pub max_cached_paths: usize,
}

impl TracingParameters {
    pub fn new() -> Self {
        Self {
            num_rays: 5000,
            max_bounces: 32,
            min_energy_threshold: 1e-6,
            max_trace_distance: 1000.0,
            speed_of_sound: 343.0,
            seed: 0x5eed,
            bands: FrequencyBands::octaves(),
            enable_diffraction: true,
            enable_transmission: true,
            enable_scattering: true,
            enable_air_absorption: true,
            air_temperature: 20.0,
            air_humidity: 50.0,
            early_reflection_order: 2,
            early_reflection_window: 0.08,
            max_image_sources: 4096,
            listener_radius: 0.5,
            sample_rate: 48_000.0,
            ir_duration: 2.0,
            channel_layout: ChannelLayout::Mono,
            thread_count: 0,
            max_rays_per_call: 200_000,
            acceleration: AccelerationConfig::new(),
            record_debug_paths: false,
            max_rays_per_frame: 256,
            frame_time_budget: Duration::from_millis(4),
            realtime_blend: 0.25,
            movement_threshold: 0.5,
            max_cached_paths: 50_000,
        }
    }

    pub fn band_count(&self) -> usize {
        self.bands.count
    }

    /// Impulse response length in samples.
    pub fn ir_length(&self) -> usize {
        (self.ir_duration * self.sample_rate).ceil() as usize
    }

    /// Rejects configurations that cannot produce a meaningful trace.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(AcousticError::Configuration(msg));
        if self.num_rays == 0 {
            return fail("num_rays must be positive".to_string());
        }
        if self.max_bounces > MAX_BOUNCES_LIMIT {
            return fail(format!(
                "max_bounces {} exceeds limit {MAX_BOUNCES_LIMIT}",
                self.max_bounces
            ));
        }
        if !(0.0..1.0).contains(&self.min_energy_threshold) {
            return fail(format!(
                "min_energy_threshold {} outside [0, 1)",
                self.min_energy_threshold
            ));
        }
        for (name, value) in [
            ("max_trace_distance", self.max_trace_distance),
            ("speed_of_sound", self.speed_of_sound),
            ("listener_radius", self.listener_radius),
            ("sample_rate", self.sample_rate),
            ("ir_duration", self.ir_duration),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return fail(format!("{name} must be positive and finite, got {value}"));
            }
        }
        self.bands.validate()?;
        if !(0.0..=100.0).contains(&self.air_humidity) || !self.air_temperature.is_finite() {
            return fail("air conditions out of range".to_string());
        }
        if self.early_reflection_window < 0.0 {
            return fail("early_reflection_window must not be negative".to_string());
        }
        if self.max_rays_per_call == 0 || self.max_rays_per_frame == 0 {
            return fail("ray budgets must be positive".to_string());
        }
        if !(self.realtime_blend > 0.0 && self.realtime_blend <= 1.0) {
            return fail(format!(
                "realtime_blend {} outside (0, 1]",
                self.realtime_blend
            ));
        }
        if self.movement_threshold < 0.0 || self.max_cached_paths == 0 {
            return fail("invalid real-time cache settings".to_string());
        }
        if self.acceleration.bvh_leaf_size == 0 || self.acceleration.octree_leaf_capacity == 0 {
            return fail("acceleration leaf sizes must be positive".to_string());
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Stable 64-bit hash of the parameters, over their JSON form.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FxHasher64::default();
        // Serializing plain data into a String cannot fail
        hasher.write(serde_json::to_string(self).unwrap_or_default().as_bytes());
        hasher.finish()
    }
}

impl Default for TracingParameters {
    fn default() -> Self {
        Self::new()
    }
}
