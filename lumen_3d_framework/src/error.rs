//! Error types for the Lumen3D framework
//!
//! This module defines the error types used throughout the framework,
//! including device backends, resource management, and frame scheduling.

use std::fmt;

/// Result type for Lumen3D framework operations
pub type Result<T> = std::result::Result<T, Error>;

/// Lumen3D framework errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan, software device, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (image, buffer, shader, etc.)
    InvalidResource(String),

    /// Initialization failed (device, swapchain, subsystems)
    InitializationFailed(String),

    /// The GPU device was lost; unrecoverable
    DeviceLost(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
