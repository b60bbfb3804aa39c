// SPDX-License-Identifier: MPL-2.0

//! Error types for the capture pipeline
//!
//! Nothing in this crate panics across the capture boundary: per-frame
//! failures degrade to skip/fallback/log. These types exist so the degraded
//! paths can still report what happened.

use std::fmt;

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Main pipeline error type
#[derive(Debug, Clone)]
pub enum PipelineError {
    /// Geometry solver errors
    Geometry(GeometryError),
    /// Buffer pool errors
    Pool(PoolError),
    /// Compositor errors
    Compose(ComposeError),
    /// Continuity generator errors
    Continuity(ContinuityError),
    /// Session-level errors (start/stop, configuration)
    Session(String),
    /// Generic error with message
    Other(String),
}

/// Geometry solver errors
#[derive(Debug, Clone)]
pub enum GeometryError {
    /// Transform is not invertible (determinant too close to zero)
    Degenerate { det: f64 },
}

/// Buffer pool errors
#[derive(Debug, Clone)]
pub enum PoolError {
    /// Destination buffer allocation failed
    AllocationFailed { bytes: usize },
}

/// Compositor errors
#[derive(Debug, Clone)]
pub enum ComposeError {
    /// GPU context/pipeline unavailable at session start
    GpuUnavailable(String),
    /// A per-frame GPU dispatch failed
    DispatchFailed(String),
    /// Source/target dimensions or formats are unusable
    BadRequest(String),
}

/// Continuity generator errors
#[derive(Debug, Clone)]
pub enum ContinuityError {
    /// Silent PCM block allocation failed
    BlockAllocationFailed { bytes: usize },
    /// Audio format is not synthesizable (only 16-bit PCM is supported)
    UnsupportedFormat(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Geometry(e) => write!(f, "Geometry error: {}", e),
            PipelineError::Pool(e) => write!(f, "Pool error: {}", e),
            PipelineError::Compose(e) => write!(f, "Compositor error: {}", e),
            PipelineError::Continuity(e) => write!(f, "Continuity error: {}", e),
            PipelineError::Session(msg) => write!(f, "Session error: {}", msg),
            PipelineError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryError::Degenerate { det } => {
                write!(f, "Transform not invertible (det = {})", det)
            }
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::AllocationFailed { bytes } => {
                write!(f, "Failed to allocate {} byte destination buffer", bytes)
            }
        }
    }
}

impl fmt::Display for ComposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComposeError::GpuUnavailable(msg) => write!(f, "GPU unavailable: {}", msg),
            ComposeError::DispatchFailed(msg) => write!(f, "GPU dispatch failed: {}", msg),
            ComposeError::BadRequest(msg) => write!(f, "Bad composition request: {}", msg),
        }
    }
}

impl fmt::Display for ContinuityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContinuityError::BlockAllocationFailed { bytes } => {
                write!(f, "Failed to allocate {} byte silent block", bytes)
            }
            ContinuityError::UnsupportedFormat(msg) => {
                write!(f, "Unsupported audio format: {}", msg)
            }
        }
    }
}

impl std::error::Error for PipelineError {}
impl std::error::Error for GeometryError {}
impl std::error::Error for PoolError {}
impl std::error::Error for ComposeError {}
impl std::error::Error for ContinuityError {}

impl From<GeometryError> for PipelineError {
    fn from(err: GeometryError) -> Self {
        PipelineError::Geometry(err)
    }
}

impl From<PoolError> for PipelineError {
    fn from(err: PoolError) -> Self {
        PipelineError::Pool(err)
    }
}

impl From<ComposeError> for PipelineError {
    fn from(err: ComposeError) -> Self {
        PipelineError::Compose(err)
    }
}

impl From<ContinuityError> for PipelineError {
    fn from(err: ContinuityError) -> Self {
        PipelineError::Continuity(err)
    }
}

impl From<String> for PipelineError {
    fn from(msg: String) -> Self {
        PipelineError::Other(msg)
    }
}

impl From<&str> for PipelineError {
    fn from(msg: &str) -> Self {
        PipelineError::Other(msg.to_string())
    }
}
