//! Ray configuration, generation and the offline tracing facade.

pub mod config;
pub mod generator;
pub mod ray;
mod simulation;

pub use config::{ChannelLayout, MAX_BOUNCES_LIMIT, TracingParameters};
pub use ray::{AudioRay, RayKind};
pub use simulation::{AcousticRayTracer, CancellationToken, DeterministicPaths, TraceOutcome};
pub(crate) use simulation::{band_rt60, deterministic_paths};
