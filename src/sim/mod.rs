pub mod accel;
pub mod acoustics;
pub mod cache;
pub mod diagnostics;
pub mod engine;
pub mod materials;
pub mod rays;
pub mod realtime;
pub mod scene;

pub use acoustics::{ListenerOrientation, RayTracingImpulseResponse, RoomAcousticReport};
pub use cache::{CacheKey, ImpulseResponseCache};
pub use diagnostics::{BatchSummary, DebugRayPath, TraceWarning, TracingStats};
pub use materials::{AcousticMaterial, FrequencyBands, MaterialLibrary};
pub use rays::{AcousticRayTracer, CancellationToken, ChannelLayout, TraceOutcome, TracingParameters};
pub use realtime::{FrameReport, RealtimeScheduler, SchedulerState};
pub use scene::{AcousticGeometry, PrimitiveShape, SceneSnapshot, SharedScene};
