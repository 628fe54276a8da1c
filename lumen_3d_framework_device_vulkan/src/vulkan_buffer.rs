/// VulkanBuffer / VulkanStagingBuffer - Vulkan buffer implementations

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use lumen_3d_framework::lumen3d::device::{DeviceBuffer, StagingBuffer};
use lumen_3d_framework::lumen3d::Result;
use lumen_3d_framework::lumen_bail;

use crate::vulkan_context::GpuContext;

const SOURCE: &str = "lumen3d::vulkan";

/// Device-local buffer (vertex/index/uniform/storage)
pub struct VulkanBuffer {
    pub(crate) buffer: vk::Buffer,
    pub(crate) allocation: Option<Allocation>,
    pub(crate) ctx: Arc<GpuContext>,
}

impl DeviceBuffer for VulkanBuffer {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe {
            if let Some(allocation) = self.allocation.take() {
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }
            self.ctx.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Host-visible buffer used to stream pixel data to the GPU
pub struct VulkanStagingBuffer {
    pub(crate) buffer: vk::Buffer,
    pub(crate) allocation: Option<Allocation>,
    pub(crate) size: u64,
    pub(crate) ctx: Arc<GpuContext>,
}

impl StagingBuffer for VulkanStagingBuffer {
    fn write(&self, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.size {
            lumen_bail!(
                SOURCE,
                "Staging write of {} bytes exceeds the buffer's {} bytes",
                data.len(),
                self.size
            );
        }
        let allocation = match &self.allocation {
            Some(allocation) => allocation,
            None => lumen_bail!(SOURCE, "Staging buffer has no allocation"),
        };
        let mapped = match allocation.mapped_ptr() {
            Some(ptr) => ptr.as_ptr() as *mut u8,
            None => lumen_bail!(SOURCE, "Staging buffer is not CPU-accessible"),
        };
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len());
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanStagingBuffer {
    fn drop(&mut self) {
        unsafe {
            if let Some(allocation) = self.allocation.take() {
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }
            self.ctx.device.destroy_buffer(self.buffer, None);
        }
    }
}
