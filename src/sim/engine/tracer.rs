use log::{trace, warn};
use rand::Rng;
use rayon::prelude::*;

use crate::Point;
use crate::sim::diagnostics::{DebugRayPath, QueryCounters, TracingStats};
use crate::sim::rays::generator::{STREAM_BOUNCE, ray_rng};
use crate::sim::rays::{AudioRay, CancellationToken, RayKind, TracingParameters};

use super::absorption::surface_response;
use super::reflection::Hybrid;
use super::{ListenerCapture, SURFACE_OFFSET, TraceContext, clear_between};

/// Rays handed to one worker at a time.
const CHUNK_SIZE: usize = 64;

/// Running sums behind the statistical reverberation estimate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecayStats {
    /// Sum of segment lengths between two surface hits.
    pub free_path_sum: f64,
    pub free_path_count: u64,
    /// Surface hits plus escapes. Rays cut by the distance limit are excluded.
    pub events: u64,
    /// Per band, energy fraction kept by the reflected ray, summed over hits.
    pub retention_sum: Vec<f64>,
}

impl DecayStats {
    pub fn new(band_count: usize) -> Self {
        Self {
            retention_sum: vec![0.0; band_count],
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.free_path_sum += other.free_path_sum;
        self.free_path_count += other.free_path_count;
        self.events += other.events;
        if self.retention_sum.len() < other.retention_sum.len() {
            self.retention_sum.resize(other.retention_sum.len(), 0.0);
        }
        for (a, b) in self.retention_sum.iter_mut().zip(&other.retention_sum) {
            *a += b;
        }
    }

    pub fn mean_free_path(&self) -> Option<f64> {
        (self.free_path_count > 0).then(|| self.free_path_sum / self.free_path_count as f64)
    }

    /// Mean per-event retention. Escapes count as total loss.
    pub fn mean_retention(&self, band: usize) -> Option<f64> {
        (self.events > 0).then(|| self.retention_sum[band] / self.events as f64)
    }

    /// Eyring-style RT60 from the measured mean free path and retention.
    ///
    /// Decay rate in dB/s is `c * (-10 log10 R) / mfp + m * c` with `m` the
    /// air attenuation in dB/m.
    pub fn rt60(&self, band: usize, speed_of_sound: f64, air_db_per_m: f64) -> Option<f64> {
        let mfp = self.mean_free_path()?;
        let retention = self.mean_retention(band)?;
        if mfp <= 0.0 {
            return None;
        }
        let surface_db = if retention > 0.0 {
            -10.0 * retention.log10()
        } else {
            return None;
        };
        let rate = speed_of_sound * surface_db / mfp + air_db_per_m * speed_of_sound;
        (rate > 0.0).then(|| 60.0 / rate)
    }
}

/// Outcome of tracing one primary ray (and its transmitted sub-rays).
#[derive(Debug, Clone)]
pub struct RayTrace {
    pub captures: Vec<ListenerCapture>,
    pub stats: TracingStats,
    pub decay: DecayStats,
    pub debug_paths: Vec<DebugRayPath>,
    /// A non-finite value appeared; the ray contributes nothing.
    pub discarded: bool,
}

impl RayTrace {
    fn new(band_count: usize) -> Self {
        Self {
            captures: Vec::new(),
            stats: TracingStats::default(),
            decay: DecayStats::new(band_count),
            debug_paths: Vec::new(),
            discarded: false,
        }
    }
}

/// Merged outcome of a batch of rays.
#[derive(Debug, Clone)]
pub struct BatchTrace {
    pub captures: Vec<ListenerCapture>,
    pub stats: TracingStats,
    pub decay: DecayStats,
    pub debug_paths: Vec<DebugRayPath>,
    /// Indices of rays dropped after a numerical failure.
    pub discarded: Vec<usize>,
    pub rays_completed: usize,
    pub cancelled: bool,
}

impl BatchTrace {
    pub fn new(band_count: usize) -> Self {
        Self {
            captures: Vec::new(),
            stats: TracingStats::default(),
            decay: DecayStats::new(band_count),
            debug_paths: Vec::new(),
            discarded: Vec::new(),
            rays_completed: 0,
            cancelled: false,
        }
    }

    fn absorb(&mut self, index: usize, trace: RayTrace) {
        self.stats.merge(&trace.stats);
        self.rays_completed += 1;
        if trace.discarded {
            self.discarded.push(index);
            return;
        }
        self.captures.extend(trace.captures);
        self.decay.merge(&trace.decay);
        self.debug_paths.extend(trace.debug_paths);
    }

    pub fn merge(&mut self, other: BatchTrace) {
        self.captures.extend(other.captures);
        self.stats.merge(&other.stats);
        self.decay.merge(&other.decay);
        self.debug_paths.extend(other.debug_paths);
        self.discarded.extend(other.discarded);
        self.rays_completed += other.rays_completed;
        self.cancelled |= other.cancelled;
    }
}

fn classify(ray: &AudioRay, params: &TracingParameters) -> RayKind {
    if ray.transmitted {
        RayKind::Transmission
    } else if ray.bounce_count <= params.early_reflection_order {
        RayKind::EarlyReflection
    } else {
        RayKind::LateReflection
    }
}

/// Ray captures only count where image sources do not already cover the path.
fn capture_eligible(ray: &AudioRay, params: &TracingParameters) -> bool {
    ray.bounce_count > params.early_reflection_order || ray.scattered || ray.transmitted
}

/// Near-miss capture of the segment `[origin, origin + seg_len * dir]`.
///
/// The kernel `2 (1 - rho^2 / r^2)` averages to one over the capture disk, so
/// energy is conserved in expectation.
fn capture_segment(
    ray: &AudioRay,
    ctx: &TraceContext,
    listener: Point,
    seg_len: f64,
) -> Option<ListenerCapture> {
    let seg = ray.segment()?;
    let (rho, t) = seg.closest_approach(listener, seg_len);
    let r = ctx.params.listener_radius;
    if rho >= r {
        return None;
    }
    let weight = 2.0 * (1.0 - rho * rho / (r * r));
    let energy = ray
        .energy
        .iter()
        .enumerate()
        .map(|(b, e)| e * weight * ctx.air.factor(b, t))
        .collect();
    Some(ListenerCapture {
        delay: ray.travel_time + t / ctx.params.speed_of_sound,
        energy,
        arrival_direction: -seg.direction,
        kind: ray.kind,
        deterministic: false,
        segment_origin: ray.origin,
        segment_origin_time: ray.travel_time,
        first_point: ray.path.get(1).copied().unwrap_or(ray.origin),
    })
}

/// Follows one ray path until it escapes, dies or runs out of bounces.
///
/// Transmitted sub-rays are pushed to `pending`. Returns `Err` on a numerical failure.
fn trace_path<R: Rng + ?Sized>(
    mut ray: AudioRay,
    ctx: &TraceContext,
    rng: &mut R,
    out: &mut RayTrace,
    pending: &mut Vec<AudioRay>,
) -> Result<(), ()> {
    let params = ctx.params;
    let band_count = ctx.band_count();
    let mut captured = false;

    while ray.bounce_count < ray.max_bounces && ray.is_alive(ctx.energy_floor) {
        let remaining = params.max_trace_distance - ray.travel_distance;
        if remaining <= 0.0 {
            out.stats.rays_truncated += 1;
            break;
        }
        if !ray.is_finite() {
            return Err(());
        }
        let seg = ray.segment().ok_or(())?;
        let hit = ctx.scene.intersect(&seg, remaining, &mut out.stats.queries);
        let seg_len = hit.as_ref().map_or(remaining, |h| h.distance);

        if let Some(listener) = ctx.listener
            && capture_eligible(&ray, params)
            && let Some(capture) = capture_segment(&ray, ctx, listener, seg_len)
        {
            out.stats.listener_captures += 1;
            captured = true;
            out.captures.push(capture);
        }

        let Some(hit) = hit else {
            let end = seg.point_at(seg_len);
            if ctx.scene.has_structure() && ctx.bounds.contains(end) {
                // Cut by the distance limit, not a loss
                out.stats.rays_truncated += 1;
            } else {
                out.stats.rays_escaped += 1;
                out.decay.events += 1;
            }
            ray.advance(seg_len, params.speed_of_sound);
            ray.record_point(ray.origin);
            break;
        };
        if !hit.point.is_finite() || !hit.normal.is_finite() {
            return Err(());
        }

        ray.attenuate(&ctx.air.apply_distance(hit.distance));
        ray.advance(hit.distance, params.speed_of_sound);
        ray.record_point(hit.point);
        if ray.bounce_count > 0 {
            out.decay.free_path_sum += hit.distance;
            out.decay.free_path_count += 1;
        }

        let cos_incidence = ray.direction.dot(hit.normal).abs();
        let response = surface_response(
            &ctx.absorption,
            hit.material,
            band_count,
            cos_incidence,
            params.enable_transmission,
        );
        out.decay.events += 1;
        for (sum, kept) in out.decay.retention_sum.iter_mut().zip(&response.reflected) {
            *sum += kept;
        }

        if params.enable_transmission {
            let energy: Vec<f64> = ray
                .energy
                .iter()
                .zip(&response.transmitted)
                .map(|(e, t)| e * t)
                .collect();
            if energy.iter().any(|&e| e > ctx.energy_floor) {
                let mut sub = ray.clone();
                sub.energy = energy;
                sub.origin = hit.point - hit.normal * SURFACE_OFFSET;
                sub.bounce_count += 1;
                sub.transmitted = true;
                sub.kind = RayKind::Transmission;
                out.stats.transmitted_rays += 1;
                pending.push(sub);
            }
        }

        ray.attenuate(&response.reflected);
        let scattering = if params.enable_scattering {
            hit.material.mean_scattering()
        } else {
            0.0
        };
        let (direction, diffuse) = Hybrid::new(scattering).scatter(ray.direction, hit.normal, rng);
        ray.direction = direction.normalize().ok_or(())?;
        ray.origin = hit.point + hit.normal * SURFACE_OFFSET;
        ray.scattered |= diffuse;
        ray.bounce_count += 1;
        ray.kind = classify(&ray, params);
        out.stats.total_bounces += 1;
    }

    if params.record_debug_paths {
        out.debug_paths.push(DebugRayPath {
            ray_index: ray.index,
            kind: ray.kind,
            points: ray.path,
            captured,
        });
    }
    Ok(())
}

/// Traces one primary ray through the scene.
///
/// Numerical failures discard the whole ray instead of aborting the batch.
pub fn trace_single_ray<R: Rng + ?Sized>(ray: AudioRay, ctx: &TraceContext, rng: &mut R) -> RayTrace {
    let index = ray.index;
    let mut out = RayTrace::new(ctx.band_count());
    out.stats.rays_traced = 1;
    let mut pending = vec![ray];
    while let Some(next) = pending.pop() {
        if trace_path(next, ctx, rng, &mut out, &mut pending).is_err() {
            warn!("Ray #{index} discarded after a non-finite intersection");
            let stats = out.stats.clone();
            out = RayTrace::new(ctx.band_count());
            out.stats = stats;
            out.stats.rays_discarded += 1;
            out.discarded = true;
            break;
        }
    }
    out
}

/// Traces a batch in parallel. Chunks are merged in index order, so the
/// result does not depend on the thread count.
pub fn trace_batch(
    ctx: &TraceContext,
    rays: &[AudioRay],
    cancel: Option<&CancellationToken>,
) -> BatchTrace {
    let band_count = ctx.band_count();
    let partials: Vec<BatchTrace> = rays
        .par_chunks(CHUNK_SIZE)
        .map(|chunk| {
            let mut part = BatchTrace::new(band_count);
            for ray in chunk {
                if cancel.is_some_and(|c| c.is_cancelled()) {
                    part.cancelled = true;
                    break;
                }
                let mut rng = ray_rng(ctx.params.seed, ray.index, STREAM_BOUNCE);
                part.absorb(ray.index, trace_single_ray(ray.clone(), ctx, &mut rng));
            }
            part
        })
        .collect();

    let mut batch = BatchTrace::new(band_count);
    for part in partials {
        batch.merge(part);
    }
    trace!(
        "Traced {} rays: {} captures, {} discarded",
        batch.rays_completed,
        batch.captures.len(),
        batch.discarded.len()
    );
    batch
}

/// Exact line-of-sight arrival, or `None` when occluded or out of range.
pub fn direct_path(
    ctx: &TraceContext,
    source: Point,
    listener: Point,
    counters: &mut QueryCounters,
) -> Option<ListenerCapture> {
    let distance = source.distance(&listener);
    if distance > ctx.params.max_trace_distance {
        return None;
    }
    if !clear_between(ctx.scene, source, listener, counters) {
        return None;
    }
    Some(ListenerCapture::deterministic(
        RayKind::Direct,
        distance,
        ctx.params.speed_of_sound,
        ctx.path_energy(distance, None),
        source,
        listener,
    ))
}
