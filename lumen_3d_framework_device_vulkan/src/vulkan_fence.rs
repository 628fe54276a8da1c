/// VulkanFence - Vulkan implementation of the Fence trait

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use lumen_3d_framework::lumen3d::device::{Fence, FenceStatus};
use lumen_3d_framework::lumen3d::{Error, Result};
use lumen_3d_framework::lumen_err;

use crate::vulkan_context::GpuContext;

const SOURCE: &str = "lumen3d::vulkan";

pub struct VulkanFence {
    pub(crate) fence: vk::Fence,
    pub(crate) ctx: Arc<GpuContext>,
}

impl Fence for VulkanFence {
    fn status(&self) -> Result<FenceStatus> {
        // get_fence_status returns Ok(true) for signaled, Ok(false) for not ready
        match unsafe { self.ctx.device.get_fence_status(self.fence) } {
            Ok(true) => Ok(FenceStatus::Signaled),
            Ok(false) => Ok(FenceStatus::Unsignaled),
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                Err(Error::DeviceLost("Fence query reported device loss".to_string()))
            }
            Err(e) => Err(lumen_err!(SOURCE, "Failed to query fence status: {:?}", e)),
        }
    }

    fn reset(&self) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .reset_fences(&[self.fence])
                .map_err(|e| lumen_err!(SOURCE, "Failed to reset fence: {:?}", e))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_fence(self.fence, None);
        }
    }
}
