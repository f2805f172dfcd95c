//! Error types for sonotrace

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcousticError {
    /// Invalid parameters or materials, surfaced before any tracing starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Trace cancelled after {rays_completed} rays")]
    Cancelled { rays_completed: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AcousticError>;
