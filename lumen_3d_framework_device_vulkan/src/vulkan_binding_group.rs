/// VulkanBindingGroup - Vulkan implementation of the BindingGroup trait
///
/// Descriptor sets are allocated from the device's shared pools and are
/// reclaimed when the pools are destroyed; individual sets are not freed.

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use lumen_3d_framework::lumen3d::device::BindingGroup;

use crate::vulkan_context::GpuContext;

pub struct VulkanBindingGroup {
    pub(crate) descriptor_set: vk::DescriptorSet,
    /// Keeps the pipeline's set layout alive while the group is bound
    pub(crate) _ctx: Arc<GpuContext>,
}

impl BindingGroup for VulkanBindingGroup {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
