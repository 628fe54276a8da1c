/// GpuContext - Shared GPU resources for all Vulkan objects
///
/// Contains everything resources need for their own lifetime management:
/// - Device for Vulkan API calls
/// - Allocator for memory management
/// - Queue and command pool for one-shot upload/readback operations

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

/// Shared GPU context for all Vulkan resources.
///
/// Shared (via `Arc`) by all GPU resources so each can destroy its own
/// handles on drop without holding a reference to the device object.
///
/// Note: device and instance destruction is handled by `VulkanDevice::drop()`
/// to keep the teardown order in one place.
pub struct GpuContext {
    /// Vulkan logical device
    pub device: ash::Device,

    /// GPU memory allocator (shared, requires mutex for thread safety)
    /// Wrapped in ManuallyDrop so it is dropped BEFORE the device is destroyed
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Graphics queue for one-shot submissions
    pub graphics_queue: vk::Queue,

    /// Graphics queue family index
    pub graphics_queue_family: u32,

    /// Reusable command pool for one-shot upload/readback operations
    /// (created with TRANSIENT + RESET_COMMAND_BUFFER flags)
    pub upload_command_pool: Mutex<vk::CommandPool>,

    /// Vulkan instance (kept for reference, destroyed by VulkanDevice)
    #[allow(dead_code)]
    instance: ash::Instance,

    /// Debug utils loader (for validation layers)
    pub(crate) debug_utils_loader: Option<ash::ext::debug_utils::Instance>,

    /// Debug messenger handle
    pub(crate) debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl GpuContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        graphics_queue: vk::Queue,
        graphics_queue_family: u32,
        upload_command_pool: vk::CommandPool,
        instance: ash::Instance,
        debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
        debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    ) -> Self {
        Self {
            device,
            allocator: ManuallyDrop::new(allocator),
            graphics_queue,
            graphics_queue_family,
            upload_command_pool: Mutex::new(upload_command_pool),
            instance,
            debug_utils_loader,
            debug_messenger,
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        // NOTE: device and instance destruction is handled by VulkanDevice::drop()
        // so the teardown order lives in one place. Intentionally empty.
    }
}
