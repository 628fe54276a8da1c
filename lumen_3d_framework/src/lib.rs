/*!
# Lumen 3D Framework

Core types for the Lumen 3D rendering framework.

This crate provides the platform-agnostic rendering framework: resource
stores with batched GPU uploads, lazily finalized pipelines, multi-copy
framebuffers with a built-in two-pass Gaussian blur, and a non-blocking
frame scheduler. Backends implement the `GraphicsDevice` trait; a
Vulkan backend ships separately and a software backend is built in for
headless rendering and tests.

## Architecture

- **GraphicsDevice**: Factory and submission trait every backend implements
- **ImageStore**: Memoized image loading and batched host-to-GPU uploads
- **TargetManager / Framebuffer**: Render targets, render pass state, blur
- **Pipeline**: Lazily finalized, cloneable pipeline configuration
- **FrameScheduler**: Begin/end-frame protocol with pooled, polled fences
- **VertexManager**: Per-attribute vertex and index buffers
- **RenderContext**: Top-level RAII owner tying the pieces together
*/

// Internal modules
mod context;
mod error;
mod frame;
mod vertex;
pub mod device;
pub mod image;
pub mod log;
pub mod pipeline;
pub mod target;

// Main lumen3d namespace module
pub mod lumen3d {
    // Error types
    pub use crate::error::{Error, Result};

    // Top-level context
    pub use crate::context::RenderContext;

    // Device seam
    pub use crate::device::GraphicsDevice;

    // Frame recording
    pub use crate::frame::{BoundPipeline, Frame, FrameScheduler};

    // Vertex data
    pub use crate::vertex::{AttributeData, GeometryInfo, VertexManager};

    // Logging sub-module (types and the dispatch functions the macros
    // expand to; the lumen_* macros themselves live at the crate root)
    pub mod log {
        pub use crate::log::{
            log, log_detailed, reset_logger, set_logger, DefaultLogger, LogEntry, LogSeverity,
            Logger,
        };
    }

    // Device sub-module with the backend-facing types
    pub mod device {
        pub use crate::device::*;
    }

    // Image sub-module
    pub mod image {
        pub use crate::image::*;
    }

    // Pipeline sub-module
    pub mod pipeline {
        pub use crate::pipeline::*;
    }

    // Target sub-module
    pub mod target {
        pub use crate::target::*;
    }
}

// Flat re-exports for the common path
pub use context::RenderContext;
pub use error::{Error, Result};
pub use frame::{BoundPipeline, Frame, FrameScheduler};
pub use vertex::{AttributeData, GeometryInfo, VertexManager};

// Re-export math library at crate root
pub use glam;
