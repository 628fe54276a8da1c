/// VulkanImage / VulkanImageView - Vulkan implementations of the image traits

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use lumen_3d_framework::lumen3d::device::{DeviceImage, DeviceImageView, DeviceMemory, ImageDesc};

use crate::vulkan_context::GpuContext;

/// Vulkan image implementation
///
/// Created without backing memory; the framework allocates one block per
/// upload batch and binds each image at its computed offset. Swapchain
/// images are wrapped with `owned = false` and are never destroyed here.
pub struct VulkanImage {
    pub(crate) image: vk::Image,
    pub(crate) desc: ImageDesc,
    /// False for swapchain-owned images
    pub(crate) owned: bool,
    pub(crate) ctx: Arc<GpuContext>,
}

impl DeviceImage for VulkanImage {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                self.ctx.device.destroy_image(self.image, None);
            }
        }
    }
}

/// Vulkan image view implementation
pub struct VulkanImageView {
    pub(crate) view: vk::ImageView,
    /// Keeps the viewed image alive for the lifetime of the view
    pub(crate) _image: Arc<dyn DeviceImage>,
    pub(crate) ctx: Arc<GpuContext>,
}

impl DeviceImageView for VulkanImageView {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanImageView {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_image_view(self.view, None);
        }
    }
}

/// One block of device memory images are bound into
pub struct VulkanMemory {
    pub(crate) allocation: Option<gpu_allocator::vulkan::Allocation>,
    pub(crate) ctx: Arc<GpuContext>,
}

impl VulkanMemory {
    /// The underlying VkDeviceMemory and its base offset
    pub(crate) fn memory_and_offset(&self) -> Option<(vk::DeviceMemory, u64)> {
        self.allocation
            .as_ref()
            .map(|a| (unsafe { a.memory() }, a.offset()))
    }
}

impl DeviceMemory for VulkanMemory {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanMemory {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            // Don't panic if the lock is poisoned; the memory still has to go
            if let Ok(mut allocator) = self.ctx.allocator.lock() {
                allocator.free(allocation).ok();
            }
        }
    }
}
