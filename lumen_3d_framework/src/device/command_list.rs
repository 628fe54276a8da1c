/// CommandList trait - GPU command recording
///
/// One command list is recorded per frame (plus short-lived lists for
/// uploads). Recording order is execution order; layout barriers are the
/// only intra-frame synchronization primitive exposed.

use std::sync::Arc;

use crate::error::Result;
use super::device::{
    BindingGroup, DeviceBuffer, DeviceFramebuffer, DeviceImage, DevicePipeline,
    DeviceRenderPass, StagingBuffer,
};
use super::types::{ClearValue, ImageAspect, ImageLayout, IndexType, Rect2D, ShaderStages};

/// A contiguous layer/mip region of an image
#[derive(Debug, Clone, Copy)]
pub struct ImageRegion {
    pub base_layer: u32,
    pub layer_count: u32,
    pub base_mip: u32,
    pub mip_count: u32,
}

/// GPU command recording interface
pub trait CommandList: Send {
    /// Begin recording
    fn begin(&mut self) -> Result<()>;

    /// Finish recording
    fn end(&mut self) -> Result<()>;

    /// Open a render pass over `framebuffer`, clearing attachments whose
    /// load op requests it with the supplied values (colors first, depth last)
    fn begin_render_pass(
        &mut self,
        render_pass: &Arc<dyn DeviceRenderPass>,
        framebuffer: &Arc<dyn DeviceFramebuffer>,
        render_area: Rect2D,
        clear_values: &[ClearValue],
    ) -> Result<()>;

    /// Close the open render pass
    fn end_render_pass(&mut self) -> Result<()>;

    /// Record a layout transition barrier over a layer/mip region
    fn image_barrier(
        &mut self,
        image: &Arc<dyn DeviceImage>,
        aspect: ImageAspect,
        region: ImageRegion,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> Result<()>;

    /// Copy staged pixel bytes into one mip of one layer
    /// (the mip must be in `TransferDst` layout)
    fn copy_buffer_to_image(
        &mut self,
        src: &Arc<dyn StagingBuffer>,
        dst: &Arc<dyn DeviceImage>,
        aspect: ImageAspect,
        layer: u32,
        mip: u32,
        width: u32,
        height: u32,
    ) -> Result<()>;

    /// Blit one mip to another of the same image with linear filtering
    /// (source must be `TransferSrc`, destination `TransferDst`)
    #[allow(clippy::too_many_arguments)]
    fn blit_image_mip(
        &mut self,
        image: &Arc<dyn DeviceImage>,
        layer: u32,
        src_mip: u32,
        src_width: u32,
        src_height: u32,
        dst_mip: u32,
        dst_width: u32,
        dst_height: u32,
    ) -> Result<()>;

    /// Bind a graphics or compute pipeline
    fn bind_pipeline(&mut self, pipeline: &Arc<dyn DevicePipeline>) -> Result<()>;

    /// Bind a binding group to descriptor set `set`
    fn bind_binding_group(
        &mut self,
        pipeline: &Arc<dyn DevicePipeline>,
        set: u32,
        group: &Arc<dyn BindingGroup>,
    ) -> Result<()>;

    /// Bind vertex buffers to consecutive bindings starting at 0
    fn bind_vertex_buffers(&mut self, buffers: &[Arc<dyn DeviceBuffer>]) -> Result<()>;

    /// Bind an index buffer
    fn bind_index_buffer(
        &mut self,
        buffer: &Arc<dyn DeviceBuffer>,
        index_type: IndexType,
    ) -> Result<()>;

    /// Update push constants visible to `stages`
    fn push_constants(&mut self, stages: ShaderStages, offset: u32, data: &[u8]) -> Result<()>;

    /// Non-indexed draw
    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()>;

    /// Indexed draw
    fn draw_indexed(
        &mut self,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) -> Result<()>;

    /// Compute dispatch
    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) -> Result<()>;

    /// Open a named debug region (no-op on backends without debug utils)
    fn begin_debug_region(&mut self, name: &str);

    /// Close the innermost debug region
    fn end_debug_region(&mut self);

    fn as_any(&self) -> &dyn std::any::Any;
}
