/// VulkanCommandList - Vulkan implementation of the CommandList trait

use std::sync::Arc;

use ash::vk;
use lumen_3d_framework::lumen3d::device::{
    BindingGroup, ClearValue, CommandList, DeviceBuffer, DeviceFramebuffer, DeviceImage,
    DevicePipeline, DeviceRenderPass, ImageAspect, ImageLayout, ImageRegion, IndexType, Rect2D,
    ShaderStages, StagingBuffer,
};
use lumen_3d_framework::lumen3d::Result;
use lumen_3d_framework::{lumen_bail, lumen_err};

use crate::vulkan::{
    aspect_to_vk, layout_to_vk, shader_stages_to_vk, vulkan_binding_group, vulkan_buffer,
    vulkan_framebuffer, vulkan_image, vulkan_pipeline, vulkan_render_pass, vulkan_staging_buffer,
};
use crate::vulkan_context::GpuContext;

const SOURCE: &str = "lumen3d::vulkan";

/// Records rendering commands for later submission to the GPU
pub struct VulkanCommandList {
    ctx: Arc<GpuContext>,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    is_recording: bool,
    in_render_pass: bool,
    /// Layout and bind point of the currently bound pipeline
    bound_layout: Option<(vk::PipelineLayout, vk::PipelineBindPoint)>,
}

impl VulkanCommandList {
    pub(crate) fn new(ctx: Arc<GpuContext>) -> Result<Self> {
        unsafe {
            let pool_create_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(ctx.graphics_queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

            let command_pool = ctx
                .device
                .create_command_pool(&pool_create_info, None)
                .map_err(|e| lumen_err!(SOURCE, "Failed to create command pool: {:?}", e))?;

            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let command_buffers = ctx
                .device
                .allocate_command_buffers(&allocate_info)
                .map_err(|e| {
                    ctx.device.destroy_command_pool(command_pool, None);
                    lumen_err!(SOURCE, "Failed to allocate command buffer: {:?}", e)
                })?;

            Ok(Self {
                ctx,
                command_pool,
                command_buffer: command_buffers[0],
                is_recording: false,
                in_render_pass: false,
                bound_layout: None,
            })
        }
    }

    /// The underlying Vulkan command buffer (for submission)
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    fn require_recording(&self) -> Result<()> {
        if !self.is_recording {
            lumen_bail!(SOURCE, "Command list is not recording");
        }
        Ok(())
    }
}

impl CommandList for VulkanCommandList {
    fn begin(&mut self) -> Result<()> {
        if self.is_recording {
            lumen_bail!(SOURCE, "begin() called while already recording");
        }

        unsafe {
            self.ctx
                .device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| lumen_err!(SOURCE, "Failed to reset command buffer: {:?}", e))?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            self.ctx
                .device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(|e| lumen_err!(SOURCE, "Failed to begin command buffer: {:?}", e))?;
        }

        self.is_recording = true;
        self.in_render_pass = false;
        self.bound_layout = None;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if !self.is_recording {
            lumen_bail!(SOURCE, "end() called while not recording");
        }
        if self.in_render_pass {
            lumen_bail!(SOURCE, "end() called with a render pass still open");
        }

        unsafe {
            self.ctx
                .device
                .end_command_buffer(self.command_buffer)
                .map_err(|e| lumen_err!(SOURCE, "Failed to end command buffer: {:?}", e))?;
        }

        self.is_recording = false;
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        render_pass: &Arc<dyn DeviceRenderPass>,
        framebuffer: &Arc<dyn DeviceFramebuffer>,
        render_area: Rect2D,
        clear_values: &[ClearValue],
    ) -> Result<()> {
        self.require_recording()?;
        if self.in_render_pass {
            lumen_bail!(SOURCE, "begin_render_pass() called with a pass already open");
        }

        let vk_render_pass = vulkan_render_pass(render_pass)?;
        let vk_framebuffer = vulkan_framebuffer(framebuffer)?;

        let vk_clear_values: Vec<vk::ClearValue> = clear_values
            .iter()
            .map(|cv| match cv {
                ClearValue::Color(color) => vk::ClearValue {
                    color: vk::ClearColorValue { float32: *color },
                },
                ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: *depth,
                        stencil: *stencil,
                    },
                },
            })
            .collect();

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(vk_render_pass.render_pass)
            .framebuffer(vk_framebuffer.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D {
                    x: render_area.x,
                    y: render_area.y,
                },
                extent: vk::Extent2D {
                    width: render_area.width,
                    height: render_area.height,
                },
            })
            .clear_values(&vk_clear_values);

        unsafe {
            self.ctx.device.cmd_begin_render_pass(
                self.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }

        self.in_render_pass = true;
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.require_recording()?;
        if !self.in_render_pass {
            lumen_bail!(SOURCE, "end_render_pass() called with no pass open");
        }

        unsafe {
            self.ctx.device.cmd_end_render_pass(self.command_buffer);
        }

        self.in_render_pass = false;
        Ok(())
    }

    fn image_barrier(
        &mut self,
        image: &Arc<dyn DeviceImage>,
        aspect: ImageAspect,
        region: ImageRegion,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> Result<()> {
        self.require_recording()?;
        let vk_image = vulkan_image(image)?;

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(layout_to_vk(old_layout))
            .new_layout(layout_to_vk(new_layout))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vk_image.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_to_vk(aspect),
                base_mip_level: region.base_mip,
                level_count: region.mip_count,
                base_array_layer: region.base_layer,
                layer_count: region.layer_count,
            })
            .src_access_mask(access_mask_for(old_layout))
            .dst_access_mask(access_mask_for(new_layout));

        unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        Ok(())
    }

    fn copy_buffer_to_image(
        &mut self,
        src: &Arc<dyn StagingBuffer>,
        dst: &Arc<dyn DeviceImage>,
        aspect: ImageAspect,
        layer: u32,
        mip: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.require_recording()?;
        let staging = vulkan_staging_buffer(src)?;
        let vk_image = vulkan_image(dst)?;

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: aspect_to_vk(aspect),
                mip_level: mip,
                base_array_layer: layer,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });

        unsafe {
            self.ctx.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                staging.buffer,
                vk_image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }

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
    ) -> Result<()> {
        self.require_recording()?;
        let vk_image = vulkan_image(image)?;

        let region = vk::ImageBlit {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: src_mip,
                base_array_layer: layer,
                layer_count: 1,
            },
            src_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: src_width as i32,
                    y: src_height as i32,
                    z: 1,
                },
            ],
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: dst_mip,
                base_array_layer: layer,
                layer_count: 1,
            },
            dst_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: dst_width as i32,
                    y: dst_height as i32,
                    z: 1,
                },
            ],
        };

        unsafe {
            self.ctx.device.cmd_blit_image(
                self.command_buffer,
                vk_image.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk_image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );
        }
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn DevicePipeline>) -> Result<()> {
        self.require_recording()?;
        let vk_pipeline = vulkan_pipeline(pipeline)?;

        unsafe {
            self.ctx.device.cmd_bind_pipeline(
                self.command_buffer,
                vk_pipeline.bind_point,
                vk_pipeline.pipeline,
            );
        }

        self.bound_layout = Some((vk_pipeline.pipeline_layout, vk_pipeline.bind_point));
        Ok(())
    }

    fn bind_binding_group(
        &mut self,
        pipeline: &Arc<dyn DevicePipeline>,
        set: u32,
        group: &Arc<dyn BindingGroup>,
    ) -> Result<()> {
        self.require_recording()?;
        let vk_pipeline = vulkan_pipeline(pipeline)?;
        let vk_group = vulkan_binding_group(group)?;

        unsafe {
            self.ctx.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk_pipeline.bind_point,
                vk_pipeline.pipeline_layout,
                set,
                &[vk_group.descriptor_set],
                &[],
            );
        }
        Ok(())
    }

    fn bind_vertex_buffers(&mut self, buffers: &[Arc<dyn DeviceBuffer>]) -> Result<()> {
        self.require_recording()?;

        let mut vk_buffers = Vec::with_capacity(buffers.len());
        for buffer in buffers {
            vk_buffers.push(vulkan_buffer(buffer)?.buffer);
        }
        let offsets = vec![0u64; vk_buffers.len()];

        unsafe {
            self.ctx
                .device
                .cmd_bind_vertex_buffers(self.command_buffer, 0, &vk_buffers, &offsets);
        }
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        buffer: &Arc<dyn DeviceBuffer>,
        index_type: IndexType,
    ) -> Result<()> {
        self.require_recording()?;
        let vk_buffer = vulkan_buffer(buffer)?;

        unsafe {
            self.ctx.device.cmd_bind_index_buffer(
                self.command_buffer,
                vk_buffer.buffer,
                0,
                match index_type {
                    IndexType::U16 => vk::IndexType::UINT16,
                    IndexType::U32 => vk::IndexType::UINT32,
                },
            );
        }
        Ok(())
    }

    fn push_constants(&mut self, stages: ShaderStages, offset: u32, data: &[u8]) -> Result<()> {
        self.require_recording()?;
        let (layout, _) = match self.bound_layout {
            Some(bound) => bound,
            None => lumen_bail!(SOURCE, "No pipeline bound for push constants"),
        };

        unsafe {
            self.ctx.device.cmd_push_constants(
                self.command_buffer,
                layout,
                shader_stages_to_vk(stages),
                offset,
                data,
            );
        }
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        self.require_recording()?;
        if !self.in_render_pass {
            lumen_bail!(SOURCE, "Draw recorded outside a render pass");
        }

        unsafe {
            self.ctx
                .device
                .cmd_draw(self.command_buffer, vertex_count, 1, first_vertex, 0);
        }
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) -> Result<()> {
        self.require_recording()?;
        if !self.in_render_pass {
            lumen_bail!(SOURCE, "Draw recorded outside a render pass");
        }

        unsafe {
            self.ctx.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                1,
                first_index,
                vertex_offset,
                0,
            );
        }
        Ok(())
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) -> Result<()> {
        self.require_recording()?;

        unsafe {
            self.ctx
                .device
                .cmd_dispatch(self.command_buffer, groups_x, groups_y, groups_z);
        }
        Ok(())
    }

    fn begin_debug_region(&mut self, _name: &str) {
        // Debug regions need VK_EXT_debug_utils device commands; not wired up
    }

    fn end_debug_region(&mut self) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for VulkanCommandList {
    fn drop(&mut self) {
        unsafe {
            // The command buffer is freed with its pool
            self.ctx.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Access mask a layout's contents are produced/consumed with
fn access_mask_for(layout: ImageLayout) -> vk::AccessFlags {
    match layout {
        ImageLayout::Undefined => vk::AccessFlags::empty(),
        ImageLayout::TransferSrc => vk::AccessFlags::TRANSFER_READ,
        ImageLayout::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
        ImageLayout::ColorAttachment => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        ImageLayout::DepthStencilAttachment => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        ImageLayout::ShaderReadOnly => vk::AccessFlags::SHADER_READ,
        ImageLayout::Present => vk::AccessFlags::empty(),
    }
}
