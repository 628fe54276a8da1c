//! Unit tests for the VulkanDevice backend
//!
//! These tests verify that VulkanDevice correctly implements the
//! GraphicsDevice trait. All tests require a GPU and are marked with
//! #[ignore].
//!
//! Run with: cargo test --test vulkan_device_tests -- --ignored

use lumen_3d_framework::lumen3d::device::{
    BufferDesc, BufferUsage, FenceStatus, GraphicsDevice, ImageAspect, ImageDesc, ImageFormat,
    ImageLayout, ImageUsage, ImageViewDesc, ImageViewKind, LoadOp, RenderPassDesc, SampleCount,
};
use lumen_3d_framework_device_vulkan::{VulkanConfig, VulkanDevice};
use winit::event_loop::EventLoop;
use winit::window::Window;

/// Helper to create a test window for Vulkan
#[allow(deprecated)]
fn create_test_window() -> (Window, EventLoop<()>) {
    let event_loop = EventLoop::new().unwrap();
    let window_attrs = Window::default_attributes()
        .with_title("Vulkan GraphicsDevice Test")
        .with_inner_size(winit::dpi::LogicalSize::new(800, 600))
        .with_visible(false); // Hidden window for tests
    let window = event_loop.create_window(window_attrs).unwrap();
    (window, event_loop)
}

fn test_config() -> VulkanConfig {
    VulkanConfig {
        // Validation layers are not guaranteed on CI machines
        enable_validation: false,
        app_name: "Vulkan GraphicsDevice Test".to_string(),
    }
}

fn color_image_desc(name: &str, width: u32, height: u32) -> ImageDesc {
    ImageDesc {
        name: name.to_string(),
        width,
        height,
        layer_count: 1,
        mip_count: 1,
        format: ImageFormat::R8G8B8A8_UNORM,
        usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
        aspect: ImageAspect::Color,
        view_kind: ImageViewKind::D2,
        sample_count: SampleCount::S1,
    }
}

// ============================================================================
// DEVICE LIFECYCLE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_device_creation() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    assert_eq!(device.name(), "vulkan");
    device.wait_idle().unwrap();
}

// ============================================================================
// IMAGE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_image_allocate_bind_view() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let image = device.create_image(&color_image_desc("test_image", 256, 256)).unwrap();

    let requirements = device.image_memory_requirements(&image).unwrap();
    assert!(requirements.size >= 256 * 256 * 4);

    let memory = device
        .allocate_memory(requirements.size, requirements.memory_type_bits)
        .unwrap();
    device.bind_image_memory(&image, &memory, 0).unwrap();

    let view = device
        .create_image_view(
            &image,
            &ImageViewDesc {
                kind: ImageViewKind::D2,
                aspect: ImageAspect::Color,
                base_layer: 0,
                layer_count: 1,
                base_mip: 0,
                mip_count: 1,
            },
        )
        .unwrap();
    drop(view);
    device.wait_idle().unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_image_view_out_of_range() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let image = device.create_image(&color_image_desc("small_image", 64, 64)).unwrap();

    // Mip 1 does not exist on a single-mip image
    let result = device.create_image_view(
        &image,
        &ImageViewDesc {
            kind: ImageViewKind::D2,
            aspect: ImageAspect::Color,
            base_layer: 0,
            layer_count: 1,
            base_mip: 1,
            mip_count: 1,
        },
    );
    assert!(result.is_err());
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_create_depth_image() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let image = device
        .create_image(&ImageDesc {
            name: "depth_image".to_string(),
            width: 512,
            height: 512,
            layer_count: 1,
            mip_count: 1,
            format: ImageFormat::D32_SFLOAT,
            usage: ImageUsage::DEPTH_STENCIL_ATTACHMENT,
            aspect: ImageAspect::Depth,
            view_kind: ImageViewKind::D2,
            sample_count: SampleCount::S1,
        })
        .unwrap();

    let requirements = device.image_memory_requirements(&image).unwrap();
    let memory = device
        .allocate_memory(requirements.size, requirements.memory_type_bits)
        .unwrap();
    device.bind_image_memory(&image, &memory, 0).unwrap();
}

// ============================================================================
// BUFFER TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_staging_buffer_write() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let staging = device.create_staging_buffer(1024).unwrap();
    let data: Vec<u8> = (0..=255).collect();
    staging.write(&data).unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_staging_buffer_overflow() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let staging = device.create_staging_buffer(16).unwrap();
    let data = vec![0u8; 32];
    assert!(staging.write(&data).is_err());
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_create_vertex_buffer() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let vertices: Vec<u8> = vec![0u8; 3 * 32];
    let buffer = device
        .create_buffer(&BufferDesc {
            name: "triangle_vertices".to_string(),
            usage: BufferUsage::Vertex,
            data: vertices,
        })
        .unwrap();
    drop(buffer);
    device.wait_idle().unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_create_empty_buffer_fails() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let result = device.create_buffer(&BufferDesc {
        name: "empty".to_string(),
        usage: BufferUsage::Uniform,
        data: Vec::new(),
    });
    assert!(result.is_err());
}

// ============================================================================
// COMMAND LIST TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_command_list_begin_end() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let mut cmd = device.create_command_list().unwrap();
    cmd.begin().unwrap();
    cmd.end().unwrap();

    // Command lists are resettable
    cmd.begin().unwrap();
    cmd.end().unwrap();
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_command_list_double_begin_fails() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let mut cmd = device.create_command_list().unwrap();
    cmd.begin().unwrap();
    assert!(cmd.begin().is_err());
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_submit_empty_command_list() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let mut cmd = device.create_command_list().unwrap();
    cmd.begin().unwrap();
    cmd.end().unwrap();

    device.submit_and_wait(cmd.as_mut()).unwrap();
}

// ============================================================================
// FENCE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_fence_starts_unsignaled() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let fence = device.create_fence().unwrap();
    assert_eq!(fence.status().unwrap(), FenceStatus::Unsignaled);
}

#[test]
#[ignore] // Requires GPU
fn test_vulkan_fence_signaled_after_submit() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let fence = device.create_fence().unwrap();

    let mut cmd = device.create_command_list().unwrap();
    cmd.begin().unwrap();
    cmd.end().unwrap();
    device.submit(cmd.as_mut(), Some(fence.as_ref())).unwrap();
    device.wait_idle().unwrap();

    assert_eq!(fence.status().unwrap(), FenceStatus::Signaled);
    fence.reset().unwrap();
    assert_eq!(fence.status().unwrap(), FenceStatus::Unsignaled);
}

// ============================================================================
// RENDER PASS TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_create_render_pass() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let render_pass = device.create_render_pass(&RenderPassDesc {
        color_format: ImageFormat::R8G8B8A8_UNORM,
        color_attachment_count: 1,
        depth_format: Some(ImageFormat::D32_SFLOAT),
        sample_count: SampleCount::S1,
        load_op: LoadOp::Clear,
        final_color_layout: ImageLayout::ShaderReadOnly,
        final_depth_layout: ImageLayout::DepthStencilAttachment,
        presentation_target: false,
    });
    assert!(render_pass.is_ok());
}

// ============================================================================
// SWAPCHAIN TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_vulkan_create_swapchain() {
    let (window, _event_loop) = create_test_window();
    let device = VulkanDevice::new(&window, test_config()).unwrap();

    let swapchain = device.create_swapchain(&window, 3).unwrap();

    assert!(swapchain.image_count() >= 2);
    assert!(swapchain.width() > 0);
    assert!(swapchain.height() > 0);
    assert_eq!(swapchain.images().len() as u32, swapchain.image_count());
}
