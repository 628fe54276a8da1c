/// VulkanRenderPass - Vulkan implementation of the DeviceRenderPass trait
///
/// Multi-layer targets attach each layer as a separate color attachment,
/// so the pass carries `color_attachment_count` identical color slots.

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use lumen_3d_framework::lumen3d::device::{DeviceRenderPass, LoadOp, RenderPassDesc};
use lumen_3d_framework::lumen3d::Result;
use lumen_3d_framework::lumen_err;

use crate::vulkan::{format_to_vk, layout_to_vk, sample_count_to_vk};
use crate::vulkan_context::GpuContext;

const SOURCE: &str = "lumen3d::vulkan";

pub struct VulkanRenderPass {
    pub(crate) render_pass: vk::RenderPass,
    pub(crate) desc: RenderPassDesc,
    pub(crate) ctx: Arc<GpuContext>,
}

impl VulkanRenderPass {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &RenderPassDesc) -> Result<Self> {
        let load_op = match desc.load_op {
            LoadOp::Discard => vk::AttachmentLoadOp::DONT_CARE,
            LoadOp::Keep => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        };
        let initial_color_layout = match desc.load_op {
            LoadOp::Keep => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            _ => vk::ImageLayout::UNDEFINED,
        };

        let mut attachments = Vec::new();
        let mut color_refs = Vec::new();
        for index in 0..desc.color_attachment_count {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(format_to_vk(desc.color_format))
                    .samples(sample_count_to_vk(desc.sample_count))
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(initial_color_layout)
                    .final_layout(if desc.presentation_target {
                        vk::ImageLayout::PRESENT_SRC_KHR
                    } else {
                        layout_to_vk(desc.final_color_layout)
                    }),
            );
            color_refs.push(
                vk::AttachmentReference::default()
                    .attachment(index)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
        }

        let depth_ref;
        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);

        if let Some(depth_format) = desc.depth_format {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(format_to_vk(depth_format))
                    .samples(sample_count_to_vk(desc.sample_count))
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(match desc.load_op {
                        LoadOp::Keep => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                        _ => vk::ImageLayout::UNDEFINED,
                    })
                    .final_layout(layout_to_vk(desc.final_depth_layout)),
            );
            depth_ref = vk::AttachmentReference::default()
                .attachment(desc.color_attachment_count)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }

        // External dependency so attachment writes are visible to later
        // sampling and transfer without extra barriers from the caller
        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                )
                .src_access_mask(vk::AccessFlags::empty())
                .dst_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                )
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                ),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                )
                .src_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .dst_stage_mask(
                    vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::TRANSFER,
                )
                .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ),
        ];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(&dependencies);

        let render_pass = unsafe {
            ctx.device
                .create_render_pass(&create_info, None)
                .map_err(|e| lumen_err!(SOURCE, "Failed to create render pass: {:?}", e))?
        };

        Ok(Self {
            render_pass,
            desc: desc.clone(),
            ctx,
        })
    }
}

impl DeviceRenderPass for VulkanRenderPass {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanRenderPass {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_render_pass(self.render_pass, None);
        }
    }
}
