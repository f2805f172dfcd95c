use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::Point;
use crate::error::{AcousticError, Result};
use crate::sim::acoustics::{
    ImpulseResponseAccumulator, ListenerOrientation, RayTracingImpulseResponse,
};
use crate::sim::diagnostics::{
    BatchSummary, DebugRayPath, QueryCounters, TraceWarning, TracingStats,
};
use crate::sim::engine::diffraction::calculate_diffracted_rays;
use crate::sim::engine::early_reflections::calculate_early_reflections;
use crate::sim::engine::tracer::{BatchTrace, DecayStats, direct_path, trace_batch};
use crate::sim::engine::{ListenerCapture, TraceContext};
use crate::sim::scene::{AcousticGeometry, SceneSnapshot, SharedScene};

use super::config::TracingParameters;
use super::generator;
use super::ray::AudioRay;

/// Cooperative cancellation flag for long offline traces.
///
/// Clones share the flag. Workers check it between rays.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Result of one offline trace.
#[derive(Debug, Clone)]
pub struct TraceOutcome {
    pub impulse_response: RayTracingImpulseResponse,
    pub summary: BatchSummary,
    /// Empty unless `record_debug_paths` is set.
    pub debug_paths: Vec<DebugRayPath>,
}

/// Exact arrivals for one source/listener pair.
#[derive(Debug, Clone, Default)]
pub struct DeterministicPaths {
    pub direct: Option<ListenerCapture>,
    pub early: Vec<ListenerCapture>,
    pub diffracted: Vec<ListenerCapture>,
}

impl DeterministicPaths {
    pub fn iter(&self) -> impl Iterator<Item = &ListenerCapture> {
        self.direct
            .iter()
            .chain(self.early.iter())
            .chain(self.diffracted.iter())
    }

    pub fn len(&self) -> usize {
        self.direct.iter().count() + self.early.len() + self.diffracted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds every arrival to `acc` and sets the direct reference.
    pub fn add_to(&self, acc: &mut ImpulseResponseAccumulator) {
        if let Some(d) = &self.direct {
            acc.set_direct(d.delay, d.total_energy());
        }
        for capture in self.iter() {
            acc.capture(capture);
        }
    }
}

/// Direct path, image sources and (when occluded) diffraction.
///
/// Without an acceleration structure only the direct path is produced.
pub(crate) fn deterministic_paths(
    ctx: &TraceContext,
    source: Point,
    listener: Point,
    summary: &mut BatchSummary,
) -> DeterministicPaths {
    let params = ctx.params;
    let mut counters = QueryCounters::default();
    let mut paths = DeterministicPaths {
        direct: direct_path(ctx, source, listener, &mut counters),
        ..Default::default()
    };
    if !ctx.scene.has_structure() {
        return paths;
    }

    let order = params.early_reflection_order.min(params.max_bounces);
    if order > 0 {
        let images = calculate_early_reflections(ctx, source, listener, order, &mut counters);
        summary.stats.image_sources_evaluated += images.evaluated;
        if images.limit_reached {
            summary.push_warning(TraceWarning::ImageSourceLimit {
                limit: params.max_image_sources,
            });
        }
        paths.early = images.captures;
    }
    if params.enable_diffraction && paths.direct.is_none() {
        paths.diffracted = calculate_diffracted_rays(ctx, source, listener, &mut counters);
        summary.stats.diffraction_paths += paths.diffracted.len() as u64;
    }
    summary.stats.queries.merge(&counters);
    paths
}

/// Statistical RT60 per band from the traced decay statistics.
pub(crate) fn band_rt60(decay: &DecayStats, ctx: &TraceContext) -> Vec<Option<f64>> {
    (0..ctx.band_count())
        .map(|b| {
            let air_db = ctx.air.attenuation_per_meter.get(b).copied().unwrap_or(0.0);
            decay.rt60(b, ctx.params.speed_of_sound, air_db)
        })
        .collect()
}

/// Primary rays over the full sphere, each carrying `ray_energy` per band.
pub(crate) fn primary_rays(
    source: Point,
    count: usize,
    params: &TracingParameters,
    ray_energy: f64,
) -> Vec<AudioRay> {
    generator::generate(source, count, PI, params.seed)
        .iter()
        .enumerate()
        .map(|(i, r)| AudioRay::new(i, r, vec![ray_energy; params.band_count()], params.max_bounces))
        .collect()
}

/// Offline acoustic ray tracer.
///
/// Owns the tracing parameters, the published scene and an optional
/// dedicated worker pool.
pub struct AcousticRayTracer {
    params: TracingParameters,
    scene: Arc<SharedScene>,
    degenerate: Vec<usize>,
    pool: Option<rayon::ThreadPool>,
    build_time: Duration,
    stats: TracingStats,
    debug_paths: Vec<DebugRayPath>,
}

fn build_pool(thread_count: usize) -> Result<Option<rayon::ThreadPool>> {
    if thread_count == 0 {
        return Ok(None);
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .map(Some)
        .map_err(|e| AcousticError::Configuration(format!("cannot start worker pool: {e}")))
}

fn validate_materials(geometry: &[AcousticGeometry], band_count: usize) -> Result<()> {
    for (i, g) in geometry.iter().enumerate() {
        g.material.validate(band_count).map_err(|e| {
            AcousticError::Configuration(format!(
                "primitive #{i} material '{}': {e}",
                g.material.name
            ))
        })?;
    }
    Ok(())
}

impl AcousticRayTracer {
    pub fn new(params: TracingParameters) -> Result<Self> {
        params.validate()?;
        let pool = build_pool(params.thread_count)?;
        Ok(Self {
            params,
            scene: Arc::new(SharedScene::default()),
            degenerate: Vec::new(),
            pool,
            build_time: Duration::ZERO,
            stats: TracingStats::default(),
            debug_paths: Vec::new(),
        })
    }

    pub fn parameters(&self) -> &TracingParameters {
        &self.params
    }

    /// Handle to the published scene, shared with real-time sessions.
    pub fn shared_scene(&self) -> Arc<SharedScene> {
        Arc::clone(&self.scene)
    }

    pub fn snapshot(&self) -> Arc<SceneSnapshot> {
        self.scene.load()
    }

    /// Statistics of the most recent trace.
    pub fn stats(&self) -> &TracingStats {
        &self.stats
    }

    /// Ray paths of the most recent trace, if recording was enabled.
    pub fn debug_paths(&self) -> &[DebugRayPath] {
        &self.debug_paths
    }

    /// Replaces the parameters wholesale.
    ///
    /// Fails without changing anything if the new band layout does not fit
    /// the loaded materials.
    pub fn set_tracing_parameters(&mut self, params: TracingParameters) -> Result<()> {
        params.validate()?;
        let snapshot = self.scene.load();
        if params.band_count() != self.params.band_count() {
            validate_materials(&snapshot.geometry, params.band_count())?;
        }
        if params.thread_count != self.params.thread_count {
            self.pool = build_pool(params.thread_count)?;
        }
        let rebuild = snapshot.has_structure() && params.acceleration != self.params.acceleration;
        self.params = params;
        if rebuild {
            self.build_acceleration_structure();
        }
        Ok(())
    }

    /// Replaces the whole scene. The acceleration structure is dropped until
    /// [`build_acceleration_structure`](Self::build_acceleration_structure) runs.
    pub fn set_scene_geometry(
        &mut self,
        geometry: Vec<AcousticGeometry>,
    ) -> Result<Vec<TraceWarning>> {
        validate_materials(&geometry, self.params.band_count())?;
        let version = self.scene.version() + 1;
        let count = geometry.len();
        let (snapshot, degenerate) = SceneSnapshot::new(version, geometry);
        debug!(
            "Scene v{version}: {count} primitives, {} faces, {} edges",
            snapshot.faces.len(),
            snapshot.edges.len()
        );
        self.scene.publish(snapshot);
        self.degenerate = degenerate;
        Ok(self
            .degenerate
            .iter()
            .map(|&index| TraceWarning::DegeneratePrimitive { index })
            .collect())
    }

    /// Builds the configured acceleration structure over the current scene.
    pub fn build_acceleration_structure(&mut self) -> Duration {
        let start = Instant::now();
        let current = self.scene.load();
        let built = current.with_structure(&self.params.acceleration);
        self.build_time = start.elapsed();
        info!(
            "Built {:?} over {} primitives in {:.2?}",
            self.params.acceleration.kind,
            built.geometry.len(),
            self.build_time
        );
        self.scene.publish(built);
        self.build_time
    }

    /// Replaces individual primitives and refits the structure in place.
    pub fn update_dynamic_geometry(
        &mut self,
        updates: Vec<(usize, AcousticGeometry)>,
    ) -> Result<Vec<TraceWarning>> {
        let new_geometry: Vec<AcousticGeometry> =
            updates.iter().map(|(_, g)| g.clone()).collect();
        validate_materials(&new_geometry, self.params.band_count())?;
        let current = self.scene.load();
        let count = updates.len();
        let (next, degenerate) = current.with_updates(current.version + 1, updates)?;
        debug!("Scene v{}: {count} primitives updated", next.version);
        self.scene.publish(next);
        self.degenerate = degenerate;
        Ok(self
            .degenerate
            .iter()
            .map(|&index| TraceWarning::DegeneratePrimitive { index })
            .collect())
    }

    fn run<T: Send>(&self, f: impl FnOnce() -> T + Send) -> T {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    fn clamp_rays(&self, requested: usize, summary: &mut BatchSummary) -> usize {
        let budget = self.params.max_rays_per_call;
        if requested <= budget {
            return requested;
        }
        warn!("{requested} rays requested, clamped to the per-call budget of {budget}");
        summary.push_warning(TraceWarning::ResourceExhaustion {
            requested,
            granted: budget,
        });
        budget
    }

    /// Traces `num_rays` rays from `source` without a listener.
    ///
    /// Useful for statistics and debug paths; nothing is captured.
    pub fn trace_rays_from_source(&mut self, source: Point, num_rays: usize) -> Result<BatchTrace> {
        if !source.is_finite() {
            return Err(AcousticError::Geometry("source position is not finite".to_string()));
        }
        if num_rays == 0 {
            self.stats = TracingStats::default();
            self.debug_paths.clear();
            return Ok(BatchTrace::new(self.params.band_count()));
        }
        let params = self.params.clone();
        let snapshot = self.scene.load();
        let mut summary = BatchSummary::default();
        let granted = self.clamp_rays(num_rays, &mut summary);
        let start = Instant::now();
        let ray_energy = 1.0 / granted as f64;
        let ctx = TraceContext::new(&snapshot, &params, None, ray_energy);
        let rays = primary_rays(source, granted, &params, ray_energy);
        let mut batch = self.run(|| trace_batch(&ctx, &rays, None));
        batch.stats.trace_time = start.elapsed();
        batch.stats.build_time = self.build_time;
        batch.stats.memory_usage_bytes = snapshot.memory_bytes();
        self.stats = batch.stats.clone();
        self.debug_paths = batch.debug_paths.clone();
        Ok(batch)
    }

    /// Full impulse response between `source` and `listener`.
    pub fn trace_impulse_response(
        &mut self,
        source: Point,
        listener: Point,
        orientation: ListenerOrientation,
    ) -> Result<TraceOutcome> {
        self.trace(source, listener, orientation, None)
    }

    /// Same as [`trace_impulse_response`](Self::trace_impulse_response), stopping
    /// with [`AcousticError::Cancelled`] once `cancel` fires.
    pub fn trace_impulse_response_with_cancel(
        &mut self,
        source: Point,
        listener: Point,
        orientation: ListenerOrientation,
        cancel: &CancellationToken,
    ) -> Result<TraceOutcome> {
        self.trace(source, listener, orientation, Some(cancel))
    }

    fn trace(
        &mut self,
        source: Point,
        listener: Point,
        orientation: ListenerOrientation,
        cancel: Option<&CancellationToken>,
    ) -> Result<TraceOutcome> {
        if !source.is_finite() || !listener.is_finite() {
            return Err(AcousticError::Geometry(
                "source or listener position is not finite".to_string(),
            ));
        }
        let start = Instant::now();
        let params = self.params.clone();
        let snapshot = self.scene.load();

        let mut summary = BatchSummary {
            rays_requested: params.num_rays,
            ..Default::default()
        };
        for &index in &self.degenerate {
            summary.push_warning(TraceWarning::DegeneratePrimitive { index });
        }
        let granted = self.clamp_rays(params.num_rays, &mut summary);
        let ray_energy = 1.0 / granted as f64;
        let ctx = TraceContext::new(&snapshot, &params, Some(listener), ray_energy);
        let mut acc = ImpulseResponseAccumulator::new(&params, orientation);

        if !snapshot.has_structure() {
            warn!(
                "No acceleration structure for scene v{}, tracing in free field",
                snapshot.version
            );
            summary.push_warning(TraceWarning::StaleStructure);
        }
        deterministic_paths(&ctx, source, listener, &mut summary).add_to(&mut acc);

        let mut decay = DecayStats::new(ctx.band_count());
        let mut debug_paths = Vec::new();
        if snapshot.has_structure() && params.max_bounces > 0 {
            let rays = primary_rays(source, granted, &params, ray_energy);
            let batch = self.run(|| trace_batch(&ctx, &rays, cancel));
            if batch.cancelled {
                info!("Trace cancelled after {} rays", batch.rays_completed);
                return Err(AcousticError::Cancelled {
                    rays_completed: batch.rays_completed,
                });
            }
            for &ray_index in &batch.discarded {
                summary.push_warning(TraceWarning::DiscardedRay { ray_index });
            }
            for capture in &batch.captures {
                acc.capture(capture);
            }
            summary.rays_traced = batch.rays_completed;
            summary.stats.merge(&batch.stats);
            decay = batch.decay;
            debug_paths = batch.debug_paths;
        }

        let ir = acc.finish(
            params.seed,
            params.early_reflection_window,
            band_rt60(&decay, &ctx),
        );
        summary.stats.trace_time = start.elapsed();
        summary.stats.build_time = self.build_time;
        summary.stats.memory_usage_bytes = snapshot.memory_bytes() + acc.memory_bytes();
        debug!(
            "Traced {} rays in {:.2?}: {} captures, {} warnings, RT60 {:?}",
            summary.rays_traced,
            summary.stats.trace_time,
            summary.stats.listener_captures,
            summary.warnings.len() + summary.suppressed_warnings,
            ir.estimated_rt60
        );

        self.stats = summary.stats.clone();
        self.debug_paths = debug_paths.clone();
        Ok(TraceOutcome {
            impulse_response: ir,
            summary,
            debug_paths,
        })
    }

    /// Image-source arrivals up to `max_order` reflections.
    pub fn calculate_early_reflections(
        &self,
        source: Point,
        listener: Point,
        max_order: usize,
    ) -> Vec<ListenerCapture> {
        let snapshot = self.scene.load();
        let ctx = TraceContext::new(&snapshot, &self.params, Some(listener), 1.0);
        let mut counters = QueryCounters::default();
        calculate_early_reflections(&ctx, source, listener, max_order, &mut counters).captures
    }

    /// Diffracted arrivals, whether or not the direct path is occluded.
    pub fn calculate_diffracted_rays(&self, source: Point, listener: Point) -> Vec<ListenerCapture> {
        let snapshot = self.scene.load();
        let ctx = TraceContext::new(&snapshot, &self.params, Some(listener), 1.0);
        let mut counters = QueryCounters::default();
        calculate_diffracted_rays(&ctx, source, listener, &mut counters)
    }
}
