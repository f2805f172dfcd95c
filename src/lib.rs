//! Stochastic acoustic ray tracing.
//!
//! Sound rays are traced from a source through a scene of primitives with
//! frequency-dependent materials and collected at a listener sphere. The
//! result is a time-domain impulse response for an external convolution stage.

pub mod error;
pub mod geom;
pub mod sim;

// Prelude
pub use error::{AcousticError, Result};
pub use geom::point::Point;
pub use geom::vector::Vector;
pub use sim::accel::{AccelerationConfig, AccelerationKind};
pub use sim::{
    AcousticGeometry, AcousticMaterial, AcousticRayTracer, CancellationToken, ChannelLayout,
    FrequencyBands, ListenerOrientation, RayTracingImpulseResponse, RealtimeScheduler,
    TraceOutcome, TracingParameters,
};
