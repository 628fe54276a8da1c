/// Tests for the top-level render context

use super::*;
use crate::device::software::SoftwareDevice;
use crate::device::ImageAspect;
use crate::target::BlurParams;

fn context() -> (Arc<SoftwareDevice>, RenderContext) {
    let device = Arc::new(SoftwareDevice::new());
    let swapchain = device.create_offscreen_swapchain(16, 16, 2).unwrap();
    let context =
        RenderContext::new(device.clone() as Arc<dyn GraphicsDevice>, swapchain).unwrap();
    (device, context)
}

// ============================================================================
// Tests: Construction
// ============================================================================

#[test]
fn test_context_creates_the_default_target() {
    let (_, ctx) = context();
    let default = ctx.targets.get(ctx.default_target()).unwrap();
    assert!(default.is_default());
    assert_eq!(default.copy_count(), 2);
    assert_eq!(default.width(), 16);
    assert_eq!(default.height(), 16);
}

#[test]
fn test_framebuffers_get_one_copy_per_swapchain_image() {
    let (_, mut ctx) = context();
    let key = ctx
        .create_framebuffer("scene", 8, 8, 1, ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    assert_eq!(ctx.targets.get(key).unwrap().copy_count(), 2);
}

// ============================================================================
// Tests: Frame Lifecycle
// ============================================================================

#[test]
fn test_begin_frame_twice_fails() {
    let (_, mut ctx) = context();
    ctx.push_to_gpu().unwrap();
    let _frame = ctx.begin_frame().unwrap();
    assert!(ctx
        .begin_frame()
        .unwrap_err()
        .to_string()
        .contains("begin_frame() called twice"));
}

#[test]
fn test_frames_cycle_through_the_swapchain() {
    let (_, mut ctx) = context();
    ctx.push_to_gpu().unwrap();
    for expected in [0, 1, 0] {
        let frame = ctx.begin_frame().unwrap();
        assert_eq!(frame.image_index(), expected);
        ctx.end_frame(frame).unwrap();
    }
    assert_eq!(ctx.scheduler.current_frame_id(), 3);
}

// ============================================================================
// Tests: Rendering Through the Context
// ============================================================================

#[test]
fn test_clear_and_blur_through_the_context() {
    let (device, mut ctx) = context();
    let key = ctx
        .create_framebuffer("scene", 16, 16, 1, ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    ctx.push_to_gpu().unwrap();

    let mut frame = ctx.begin_frame().unwrap();
    {
        let framebuffer = ctx.targets.get_mut(key).unwrap();
        framebuffer
            .begin_render_pass_clear(&mut frame, &mut ctx.images, [0.4, 0.2, 0.8, 1.0])
            .unwrap();
        framebuffer
            .end_render_pass(&mut frame, &mut ctx.images)
            .unwrap();
    }
    ctx.blur(key, &mut frame, BlurParams { radius: 6, ..Default::default() }, None)
        .unwrap();
    ctx.end_frame(frame).unwrap();

    let image_key = ctx.targets.get(key).unwrap().current_image().unwrap();
    let image = ctx.images.get(image_key).unwrap();
    let pixels = device
        .read_image_pixels(image.device_handle(), ImageAspect::Color, 0, 0)
        .unwrap();
    for texel in pixels.chunks_exact(4) {
        assert!(texel[0].abs_diff(102) <= 3);
        assert!(texel[1].abs_diff(51) <= 3);
        assert!(texel[2].abs_diff(204) <= 3);
        assert_eq!(texel[3], 255);
    }
}

#[test]
fn test_push_to_gpu_is_repeatable() {
    let (_, mut ctx) = context();
    ctx.create_framebuffer("a", 8, 8, 1, ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    ctx.push_to_gpu().unwrap();

    // Loading more resources and pushing again only uploads the new ones
    ctx.create_framebuffer("b", 8, 8, 1, ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    ctx.push_to_gpu().unwrap();
    assert!(ctx.targets.framebuffer_count() >= 3);
}
