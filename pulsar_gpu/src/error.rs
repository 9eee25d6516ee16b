//! Error types for the Pulsar GPU device layer
//!
//! This module defines the error types used throughout the device layer,
//! covering initialization, resource creation and frame synchronization.

use std::fmt;

/// Result type for Pulsar GPU operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pulsar GPU errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan, ...)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (buffer, texture, shader, ...)
    InvalidResource(String),

    /// Initialization failed (device creation, missing capability)
    InitializationFailed(String),

    /// A bounded fence/semaphore wait exceeded its timeout
    SyncTimeout(String),

    /// Pipeline state rejected (no valid shader stage, backend refusal)
    PipelineCreationFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::SyncTimeout(msg) => write!(f, "Synchronization timeout: {}", msg),
            Error::PipelineCreationFailed(msg) => write!(f, "Pipeline creation failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
