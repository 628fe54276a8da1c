/// VulkanPipeline - Vulkan implementation of the DevicePipeline trait
///
/// Creation logic lives in `vulkan.rs`; this type owns the handles.

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use lumen_3d_framework::lumen3d::device::DevicePipeline;

use crate::vulkan_context::GpuContext;

pub struct VulkanPipeline {
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    /// Descriptor set layouts indexed by set number (empty sets allowed)
    pub(crate) set_layouts: Vec<vk::DescriptorSetLayout>,
    pub(crate) bind_point: vk::PipelineBindPoint,
    pub(crate) ctx: Arc<GpuContext>,
}

impl DevicePipeline for VulkanPipeline {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline, None);
            self.ctx
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            for layout in self.set_layouts.drain(..) {
                self.ctx.device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}
