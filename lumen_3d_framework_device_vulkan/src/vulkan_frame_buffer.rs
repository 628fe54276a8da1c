/// VulkanFramebuffer - Vulkan implementation of the DeviceFramebuffer trait

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use lumen_3d_framework::lumen3d::device::{DeviceFramebuffer, FramebufferDesc};
use lumen_3d_framework::lumen3d::Result;
use lumen_3d_framework::lumen_err;

use crate::vulkan::{vulkan_image_view, vulkan_render_pass};
use crate::vulkan_context::GpuContext;

const SOURCE: &str = "lumen3d::vulkan";

pub struct VulkanFramebuffer {
    pub(crate) framebuffer: vk::Framebuffer,
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// Keeps the attachment views alive for the framebuffer's lifetime
    pub(crate) _desc: FramebufferDesc,
    pub(crate) ctx: Arc<GpuContext>,
}

impl VulkanFramebuffer {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &FramebufferDesc) -> Result<Self> {
        let render_pass = vulkan_render_pass(&desc.render_pass)?;

        let mut attachments = Vec::with_capacity(desc.color_views.len() + 1);
        for view in &desc.color_views {
            attachments.push(vulkan_image_view(view)?.view);
        }
        if let Some(depth_view) = &desc.depth_view {
            attachments.push(vulkan_image_view(depth_view)?.view);
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.render_pass)
            .attachments(&attachments)
            .width(desc.width)
            .height(desc.height)
            .layers(1);

        let framebuffer = unsafe {
            ctx.device
                .create_framebuffer(&create_info, None)
                .map_err(|e| lumen_err!(SOURCE, "Failed to create framebuffer: {:?}", e))?
        };

        Ok(Self {
            framebuffer,
            width: desc.width,
            height: desc.height,
            _desc: desc.clone(),
            ctx,
        })
    }
}

impl DeviceFramebuffer for VulkanFramebuffer {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanFramebuffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}
