/// RenderTargetDescriptor - one attachment format/load-op contract
///
/// Immutable once constructed. A framebuffer owns six of these
/// ({all-layers, single-layer} x {discard, keep, clear}); pipelines are
/// finalized against one and may then record into any framebuffer whose
/// descriptors are compatible.

use std::sync::Arc;

use crate::device::{
    DeviceRenderPass, GraphicsDevice, ImageFormat, ImageLayout, LoadOp, RenderPassDesc,
    SampleCount,
};
use crate::error::Result;

/// Attachment layout/load-op combination a pipeline is built against
pub struct RenderTargetDescriptor {
    name: String,
    color_format: ImageFormat,
    depth_format: Option<ImageFormat>,
    /// Number of color attachments (one per drawn layer)
    layer_count: u32,
    sample_count: SampleCount,
    load_op: LoadOp,
    /// Target dimensions, used for default pipeline viewports
    width: u32,
    height: u32,
    handle: Arc<dyn DeviceRenderPass>,
}

impl RenderTargetDescriptor {
    /// Build a descriptor and its backend render pass.
    ///
    /// `presentation` marks descriptors for the window's framebuffer:
    /// their passes leave color attachments in `Present` layout, while
    /// offscreen passes leave attachments in attachment layout for the
    /// explicit post-pass transitions.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &Arc<dyn GraphicsDevice>,
        name: &str,
        color_format: ImageFormat,
        depth_format: Option<ImageFormat>,
        layer_count: u32,
        sample_count: SampleCount,
        load_op: LoadOp,
        width: u32,
        height: u32,
        presentation: bool,
    ) -> Result<Arc<Self>> {
        let final_color_layout = if presentation {
            ImageLayout::Present
        } else {
            ImageLayout::ColorAttachment
        };
        let handle = device.create_render_pass(&RenderPassDesc {
            color_format,
            color_attachment_count: layer_count,
            depth_format,
            sample_count,
            load_op,
            final_color_layout,
            final_depth_layout: ImageLayout::DepthStencilAttachment,
            presentation_target: presentation,
        })?;

        Ok(Arc::new(Self {
            name: name.to_string(),
            color_format,
            depth_format,
            layer_count,
            sample_count,
            load_op,
            width,
            height,
            handle,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color_format(&self) -> ImageFormat {
        self.color_format
    }

    pub fn depth_format(&self) -> Option<ImageFormat> {
        self.depth_format
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    pub fn sample_count(&self) -> SampleCount {
        self.sample_count
    }

    pub fn load_op(&self) -> LoadOp {
        self.load_op
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn device_handle(&self) -> &Arc<dyn DeviceRenderPass> {
        &self.handle
    }

    /// Two descriptors are interchangeable with the same physical target
    /// when formats, sample counts, attachment counts and depth usage
    /// match. Load ops and layouts may differ.
    pub fn is_compatible_with(&self, other: &RenderTargetDescriptor) -> bool {
        self.color_format == other.color_format
            && self.depth_format == other.depth_format
            && self.layer_count == other.layer_count
            && self.sample_count == other.sample_count
    }
}

#[cfg(test)]
#[path = "render_target_descriptor_tests.rs"]
mod tests;
