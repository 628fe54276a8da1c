/// Pipeline module - render target descriptors and lazily built pipelines

pub mod render_target_descriptor;
pub mod pipeline;

pub use render_target_descriptor::RenderTargetDescriptor;
pub use pipeline::{ComputePipeline, GraphicsPipeline, Pipeline};
