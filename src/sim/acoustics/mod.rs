//! Listener-side processing: accumulation, rendering and room metrics.

pub mod accumulator;
pub mod filters;
pub mod impulse_response;
pub mod metrics;

pub use accumulator::{ImpulseResponseAccumulator, ListenerOrientation};
pub use impulse_response::RayTracingImpulseResponse;
pub use metrics::RoomAcousticReport;
