//! Frame-amortized tracing for interactive use.
//!
//! A session traces at most `max_rays_per_frame` new rays per `update` and
//! blends them into a live impulse response. Captured paths are cached so a
//! small source or listener move only shifts their delays; a large move, a
//! move after the cache dropped paths, or a new scene version restarts the
//! stochastic state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::Point;
use crate::error::{AcousticError, Result};
use crate::sim::acoustics::{
    ImpulseResponseAccumulator, ListenerOrientation, RayTracingImpulseResponse,
};
use crate::sim::diagnostics::{BatchSummary, TracingStats};
use crate::sim::engine::tracer::{BatchTrace, DecayStats, trace_batch};
use crate::sim::engine::{ListenerCapture, TraceContext};
use crate::sim::rays::generator::generate_range;
use crate::sim::rays::{AudioRay, TracingParameters, band_rt60, deterministic_paths};
use crate::sim::scene::{SceneSnapshot, SharedScene};

/// Rays traced between two time-budget checks.
const FRAME_CHUNK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Tracing,
}

/// What one `update` call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub rays_traced: usize,
    /// Budgeted rays left for later because the frame ran out of time.
    pub rays_deferred: usize,
    /// Stochastic state restarted (large move, evicted cache or new scene version).
    pub rebuilt: bool,
    /// Cached paths re-timed for a small move.
    pub relocated: bool,
    pub cached_paths: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
struct CachedPath {
    capture: ListenerCapture,
    /// Source position the path was traced from.
    source: Point,
    weight: f64,
}

impl CachedPath {
    /// The capture re-timed for new source and listener positions.
    ///
    /// The captured segment is kept; only the distance along it to the
    /// listener and the length of the first leg change.
    fn relocated(&self, source: Point, listener: Point, speed_of_sound: f64) -> ListenerCapture {
        let c = &self.capture;
        let mut moved = c.clone();
        let along = -c.arrival_direction;
        let t = (listener - c.segment_origin).dot(along).max(0.0);
        let first_leg = source.distance(&c.first_point) - self.source.distance(&c.first_point);
        moved.delay = (c.segment_origin_time + (t + first_leg) / speed_of_sound).max(0.0);
        moved
    }
}

struct Session {
    source: Point,
    listener: Point,
    orientation: ListenerOrientation,
    /// Positions at the last rebuild; moves are measured from here.
    anchor_source: Point,
    anchor_listener: Point,
    /// Positions the accumulator currently reflects.
    applied_source: Point,
    applied_listener: Point,
    scene_version: u64,
    needs_rebuild: bool,
    accumulator: ImpulseResponseAccumulator,
    cache: VecDeque<CachedPath>,
    /// Paths dropped from `cache` since the last rebuild. Their energy is
    /// still in the accumulator but cannot be re-timed.
    evicted: usize,
    decay: DecayStats,
    next_ray: usize,
    frames: u64,
    elapsed: f64,
    response: Option<RayTracingImpulseResponse>,
    dirty: bool,
}

impl Session {
    fn new(
        params: &TracingParameters,
        source: Point,
        listener: Point,
        orientation: ListenerOrientation,
    ) -> Self {
        Self {
            source,
            listener,
            orientation,
            anchor_source: source,
            anchor_listener: listener,
            applied_source: source,
            applied_listener: listener,
            scene_version: 0,
            needs_rebuild: true,
            accumulator: ImpulseResponseAccumulator::new(params, orientation),
            cache: VecDeque::new(),
            evicted: 0,
            decay: DecayStats::new(params.band_count()),
            next_ray: 0,
            frames: 0,
            elapsed: 0.0,
            response: None,
            dirty: true,
        }
    }

    fn add_deterministic(&mut self, ctx: &TraceContext) {
        let mut summary = BatchSummary::default();
        deterministic_paths(ctx, self.source, self.listener, &mut summary)
            .add_to(&mut self.accumulator);
    }

    /// Drops all stochastic state and starts over at the current positions.
    fn rebuild(&mut self, params: &TracingParameters, scene: &SceneSnapshot) {
        self.accumulator = ImpulseResponseAccumulator::new(params, self.orientation);
        self.cache.clear();
        self.evicted = 0;
        self.decay = DecayStats::new(params.band_count());
        self.frames = 0;
        self.anchor_source = self.source;
        self.anchor_listener = self.listener;
        self.applied_source = self.source;
        self.applied_listener = self.listener;
        self.scene_version = scene.version;
        self.needs_rebuild = false;
        if !scene.has_structure() {
            warn!("Real-time session on scene v{} without acceleration structure", scene.version);
        }
        let ctx = TraceContext::new(scene, params, Some(self.listener), 1.0);
        self.add_deterministic(&ctx);
        self.dirty = true;
    }

    /// Re-times cached paths for the current positions.
    fn relocate(&mut self, params: &TracingParameters, scene: &SceneSnapshot) {
        self.accumulator.clear();
        self.accumulator.set_orientation(self.orientation);
        let ctx = TraceContext::new(scene, params, Some(self.listener), 1.0);
        self.add_deterministic(&ctx);
        for path in &self.cache {
            let moved = path.relocated(self.source, self.listener, params.speed_of_sound);
            self.accumulator.capture_weighted(&moved, path.weight);
        }
        self.applied_source = self.source;
        self.applied_listener = self.listener;
        self.dirty = true;
    }

    /// Blends a new batch into the live state.
    fn blend(&mut self, params: &TracingParameters, batch: BatchTrace, rays: usize) {
        self.frames += 1;
        // Plain running mean until the exponential window is full
        let alpha = params.realtime_blend.max(1.0 / self.frames as f64);
        self.accumulator.scale_stochastic(1.0 - alpha);
        for path in self.cache.iter_mut() {
            path.weight *= 1.0 - alpha;
        }
        let weight = alpha / rays as f64;
        for capture in batch.captures {
            self.accumulator.capture_weighted(&capture, weight);
            self.cache.push_back(CachedPath {
                capture,
                source: self.source,
                weight,
            });
        }
        while self.cache.len() > params.max_cached_paths {
            self.cache.pop_front();
            self.evicted += 1;
        }
        self.decay.merge(&batch.decay);
        self.dirty = true;
    }
}

/// Interactive tracing session manager: Idle until `start`, Tracing until `stop`.
pub struct RealtimeScheduler {
    params: TracingParameters,
    scene: Arc<SharedScene>,
    session: Option<Session>,
    stats: TracingStats,
}

impl RealtimeScheduler {
    pub fn new(params: TracingParameters, scene: Arc<SharedScene>) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            scene,
            session: None,
            stats: TracingStats::default(),
        })
    }

    pub fn state(&self) -> SchedulerState {
        if self.session.is_some() {
            SchedulerState::Tracing
        } else {
            SchedulerState::Idle
        }
    }

    pub fn parameters(&self) -> &TracingParameters {
        &self.params
    }

    /// Replaces the parameters. A running session restarts on the next update.
    pub fn set_tracing_parameters(&mut self, params: TracingParameters) -> Result<()> {
        params.validate()?;
        if let Some(session) = self.session.as_mut() {
            session.accumulator = ImpulseResponseAccumulator::new(&params, session.orientation);
            session.needs_rebuild = true;
        }
        self.params = params;
        Ok(())
    }

    /// Cumulative statistics of the current session.
    pub fn stats(&self) -> &TracingStats {
        &self.stats
    }

    /// Seconds of session time passed through `update`.
    pub fn session_time(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.elapsed)
    }

    pub fn start(
        &mut self,
        source: Point,
        listener: Point,
        orientation: ListenerOrientation,
    ) -> Result<()> {
        if !source.is_finite() || !listener.is_finite() {
            return Err(AcousticError::Geometry(
                "source or listener position is not finite".to_string(),
            ));
        }
        if self.session.is_some() {
            debug!("Restarting real-time session");
        }
        self.session = Some(Session::new(&self.params, source, listener, orientation));
        self.stats = TracingStats::default();
        info!("Real-time session started");
        Ok(())
    }

    /// Ends the session and discards all partial state.
    pub fn stop(&mut self) {
        if self.session.take().is_some() {
            info!("Real-time session stopped");
        }
        self.stats = TracingStats::default();
    }

    pub fn set_source(&mut self, source: Point) {
        if !source.is_finite() {
            warn!("Ignoring non-finite source position");
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.source = source;
        }
    }

    pub fn set_listener(&mut self, listener: Point, orientation: ListenerOrientation) {
        if !listener.is_finite() {
            warn!("Ignoring non-finite listener position");
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.listener = listener;
            session.orientation = orientation;
        }
    }

    /// Advances the session by one frame.
    ///
    /// Traces at most `max_rays_per_frame` rays and stops early once
    /// `frame_time_budget` is spent; at least one small chunk always runs.
    pub fn update(&mut self, delta_time: f64) -> FrameReport {
        let frame_start = Instant::now();
        let params = &self.params;
        let Some(session) = self.session.as_mut() else {
            return FrameReport::default();
        };
        session.elapsed += delta_time.max(0.0);
        let snapshot = self.scene.load();
        let mut report = FrameReport::default();

        let moved = session
            .source
            .distance(&session.anchor_source)
            .max(session.listener.distance(&session.anchor_listener));
        let repositioned =
            session.source != session.applied_source || session.listener != session.applied_listener;
        if session.needs_rebuild
            || session.scene_version != snapshot.version
            || moved > params.movement_threshold
            || (repositioned && session.evicted > 0)
        {
            debug!(
                "Real-time rebuild: scene v{}, moved {moved:.3} m, {} paths evicted",
                snapshot.version, session.evicted
            );
            session.rebuild(params, &snapshot);
            report.rebuilt = true;
        } else if repositioned {
            session.relocate(params, &snapshot);
            report.relocated = true;
        }

        let budget = params.max_rays_per_frame;
        let mut traced = 0;
        if snapshot.has_structure() && params.max_bounces > 0 {
            let ctx = TraceContext::new(&snapshot, params, Some(session.listener), 1.0);
            let bands = params.band_count();
            let mut batch = BatchTrace::new(bands);
            while traced < budget {
                if traced > 0 && frame_start.elapsed() >= params.frame_time_budget {
                    break;
                }
                let n = FRAME_CHUNK.min(budget - traced);
                let rays: Vec<AudioRay> =
                    generate_range(session.source, session.next_ray, n, params.num_rays, params.seed)
                        .into_iter()
                        .map(|(i, r)| AudioRay::new(i, &r, vec![1.0; bands], params.max_bounces))
                        .collect();
                session.next_ray += n;
                batch.merge(trace_batch(&ctx, &rays, None));
                traced += n;
            }
            self.stats.merge(&batch.stats);
            if traced > 0 {
                session.blend(params, batch, traced);
            }
        }

        report.rays_traced = traced;
        report.rays_deferred = if snapshot.has_structure() && params.max_bounces > 0 {
            budget - traced
        } else {
            0
        };
        if report.rays_deferred > 0 {
            debug!("Frame budget spent, {} rays deferred", report.rays_deferred);
        }
        report.cached_paths = session.cache.len();
        report.elapsed = frame_start.elapsed();
        self.stats.trace_time += report.elapsed;
        report
    }

    /// Current live impulse response, rendered on demand.
    ///
    /// `None` while Idle.
    pub fn impulse_response(&mut self) -> Option<&RayTracingImpulseResponse> {
        let params = &self.params;
        let session = self.session.as_mut()?;
        if session.dirty || session.response.is_none() {
            let snapshot = self.scene.load();
            let ctx = TraceContext::new(&snapshot, params, Some(session.listener), 1.0);
            let rt60 = band_rt60(&session.decay, &ctx);
            session.response = Some(session.accumulator.finish(
                params.seed,
                params.early_reflection_window,
                rt60,
            ));
            session.dirty = false;
        }
        session.response.as_ref()
    }
}
