/*!
# Lumen 3D Framework - Vulkan Device Backend

Vulkan implementation of the Lumen 3D `GraphicsDevice` trait.

This crate provides a Vulkan backend using the Ash bindings and
gpu-allocator for memory management. Resources created through the
device are trait objects that release their Vulkan handles on drop.

The framework's built-in blur shaders ship as GLSL sources in
`lumen_3d_framework/shaders/`; this backend loads their precompiled
SPIR-V at runtime (see `VulkanDevice::blur_shaders`).
*/

// Vulkan implementation modules
mod vulkan;
mod vulkan_context;
mod vulkan_image;
mod vulkan_buffer;
mod vulkan_shader;
mod vulkan_pipeline;
mod vulkan_sampler;
mod vulkan_render_pass;
mod vulkan_frame_buffer;
mod vulkan_binding_group;
mod vulkan_fence;
mod vulkan_command_list;
mod vulkan_swapchain;
mod debug;

pub use vulkan::{VulkanConfig, VulkanDevice};
pub use vulkan_command_list::VulkanCommandList;
pub use vulkan_swapchain::VulkanSwapchain;

// Re-export validation statistics helpers
pub use debug::{get_validation_stats, ValidationStats};
