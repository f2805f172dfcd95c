//! Tracing statistics, non-fatal warnings and debug ray paths.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::Point;
use crate::sim::rays::RayKind;

/// Individual warnings kept per batch; further ones are only counted.
pub const MAX_RECORDED_WARNINGS: usize = 64;

/// Per-query counters filled by the acceleration structures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryCounters {
    pub intersection_tests: u64,
    pub intersections_found: u64,
    pub node_visits: u64,
}

impl QueryCounters {
    pub fn merge(&mut self, other: &Self) {
        self.intersection_tests += other.intersection_tests;
        self.intersections_found += other.intersections_found;
        self.node_visits += other.node_visits;
    }
}

/// Snapshot of what the tracer did, for telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TracingStats {
    pub rays_traced: u64,
    pub rays_escaped: u64,
    /// Rays stopped by `max_trace_distance` while still inside the scene.
    pub rays_truncated: u64,
    pub rays_discarded: u64,
    pub transmitted_rays: u64,
    pub total_bounces: u64,
    pub listener_captures: u64,
    pub image_sources_evaluated: u64,
    pub diffraction_paths: u64,
    pub queries: QueryCounters,
    pub build_time: Duration,
    pub trace_time: Duration,
    pub memory_usage_bytes: usize,
}

impl TracingStats {
    pub fn merge(&mut self, other: &Self) {
        self.rays_traced += other.rays_traced;
        self.rays_escaped += other.rays_escaped;
        self.rays_truncated += other.rays_truncated;
        self.rays_discarded += other.rays_discarded;
        self.transmitted_rays += other.transmitted_rays;
        self.total_bounces += other.total_bounces;
        self.listener_captures += other.listener_captures;
        self.image_sources_evaluated += other.image_sources_evaluated;
        self.diffraction_paths += other.diffraction_paths;
        self.queries.merge(&other.queries);
        self.trace_time += other.trace_time;
    }

    pub fn intersections_tested(&self) -> u64 {
        self.queries.intersection_tests
    }

    pub fn intersections_found(&self) -> u64 {
        self.queries.intersections_found
    }

    pub fn memory_usage_mb(&self) -> f64 {
        self.memory_usage_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn average_bounces(&self) -> f64 {
        if self.rays_traced == 0 {
            return 0.0;
        }
        self.total_bounces as f64 / self.rays_traced as f64
    }

    pub fn rays_per_second(&self) -> f64 {
        let secs = self.trace_time.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.rays_traced as f64 / secs
    }
}

/// Non-fatal condition reported alongside a trace result.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceWarning {
    /// Zero-area or malformed primitive, skipped during intersection.
    DegeneratePrimitive { index: usize },
    /// No acceleration structure: the trace ran in free field.
    StaleStructure,
    /// Requested ray count above the per-call budget, clamped.
    ResourceExhaustion { requested: usize, granted: usize },
    /// A ray produced a non-finite value and was dropped.
    DiscardedRay { ray_index: usize },
    /// Image-source enumeration stopped at the configured cap.
    ImageSourceLimit { limit: usize },
}

impl fmt::Display for TraceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceWarning::DegeneratePrimitive { index } => {
                write!(f, "degenerate primitive #{index} skipped")
            }
            TraceWarning::StaleStructure => {
                write!(f, "no acceleration structure built, traced in free field")
            }
            TraceWarning::ResourceExhaustion { requested, granted } => {
                write!(f, "{requested} rays requested, clamped to {granted}")
            }
            TraceWarning::DiscardedRay { ray_index } => {
                write!(f, "ray #{ray_index} discarded after a numerical failure")
            }
            TraceWarning::ImageSourceLimit { limit } => {
                write!(f, "image-source enumeration capped at {limit}")
            }
        }
    }
}

/// Aggregated outcome of one batch of rays.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub rays_requested: usize,
    pub rays_traced: usize,
    pub warnings: Vec<TraceWarning>,
    /// Warnings dropped after `MAX_RECORDED_WARNINGS`.
    pub suppressed_warnings: usize,
    pub stats: TracingStats,
}

impl BatchSummary {
    pub fn push_warning(&mut self, warning: TraceWarning) {
        if self.warnings.len() < MAX_RECORDED_WARNINGS {
            self.warnings.push(warning);
        } else {
            self.suppressed_warnings += 1;
        }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.suppressed_warnings == 0
    }

    pub fn has_warning(&self, pred: impl Fn(&TraceWarning) -> bool) -> bool {
        self.warnings.iter().any(pred)
    }
}

/// Recorded path of one ray, for visualization collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugRayPath {
    pub ray_index: usize,
    /// Classification of the last segment.
    pub kind: RayKind,
    pub points: Vec<Point>,
    /// Whether any segment reached the listener.
    pub captured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_cap() {
        let mut summary = BatchSummary::default();
        for i in 0..(MAX_RECORDED_WARNINGS + 5) {
            summary.push_warning(TraceWarning::DiscardedRay { ray_index: i });
        }
        assert_eq!(summary.warnings.len(), MAX_RECORDED_WARNINGS);
        assert_eq!(summary.suppressed_warnings, 5);
        assert!(!summary.is_clean());
        assert!(summary.has_warning(|w| matches!(w, TraceWarning::DiscardedRay { ray_index: 0 })));
    }

    #[test]
    fn test_stats_merge() {
        let mut a = TracingStats {
            rays_traced: 10,
            total_bounces: 40,
            ..Default::default()
        };
        let b = TracingStats {
            rays_traced: 10,
            total_bounces: 20,
            queries: QueryCounters {
                intersection_tests: 7,
                intersections_found: 3,
                node_visits: 11,
            },
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.rays_traced, 20);
        assert!((a.average_bounces() - 3.0).abs() < 1e-12);
        assert_eq!(a.intersections_tested(), 7);
        assert_eq!(a.intersections_found(), 3);
    }

    #[test]
    fn test_memory_mb() {
        let stats = TracingStats {
            memory_usage_bytes: 3 * 1024 * 1024,
            ..Default::default()
        };
        assert!((stats.memory_usage_mb() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_warning_display() {
        let w = TraceWarning::ResourceExhaustion {
            requested: 100,
            granted: 10,
        };
        assert_eq!(w.to_string(), "100 rays requested, clamped to 10");
    }
}
