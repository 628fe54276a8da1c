/// Tests for the framebuffer pass state machine and mip regeneration

use super::*;
use crate::device::software::SoftwareDevice;
use crate::frame::FrameScheduler;

struct Harness {
    device: Arc<SoftwareDevice>,
    images: ImageStore,
    scheduler: FrameScheduler,
    swapchain: Box<dyn Swapchain>,
}

fn harness(width: u32, height: u32) -> Harness {
    let device = Arc::new(SoftwareDevice::new());
    let dyn_device: Arc<dyn GraphicsDevice> = device.clone();
    let swapchain = device.create_offscreen_swapchain(width, height, 2).unwrap();
    Harness {
        images: ImageStore::new(dyn_device.clone()),
        scheduler: FrameScheduler::new(dyn_device),
        device,
        swapchain,
    }
}

impl Harness {
    fn offscreen(&mut self, width: u32, height: u32, layer_count: u32) -> Framebuffer {
        let mut framebuffer = Framebuffer::new(
            self.device.clone() as Arc<dyn GraphicsDevice>,
            &mut self.images,
            "offscreen",
            width,
            height,
            layer_count,
            ImageFormat::R8G8B8A8_UNORM,
            2,
        )
        .unwrap();
        self.images.push_to_gpu().unwrap();
        framebuffer.realize(&self.images).unwrap();
        framebuffer
    }

    fn frame(&mut self) -> Frame {
        self.scheduler.begin_frame(&mut *self.swapchain).unwrap()
    }

    fn read_color(&self, framebuffer: &Framebuffer, mip: u32) -> Vec<u8> {
        let key = framebuffer.current_image().unwrap();
        let image = self.images.get(key).unwrap();
        self.device
            .read_image_pixels(
                image.device_handle(),
                crate::device::ImageAspect::Color,
                0,
                mip,
            )
            .unwrap()
    }
}

fn solid_bytes(count: usize, color: [u8; 4]) -> Vec<u8> {
    color.iter().copied().cycle().take(count * 4).collect()
}

// ============================================================================
// Tests: Construction
// ============================================================================

#[test]
fn test_layer_count_clamps_to_the_limit() {
    let mut h = harness(4, 4);
    let framebuffer = h.offscreen(4, 4, MAX_TARGET_LAYERS + 4);
    assert_eq!(framebuffer.layer_count(), MAX_TARGET_LAYERS);
}

#[test]
fn test_at_least_one_copy_required() {
    let mut h = harness(4, 4);
    let result = Framebuffer::new(
        h.device.clone() as Arc<dyn GraphicsDevice>,
        &mut h.images,
        "none",
        4,
        4,
        1,
        ImageFormat::R8G8B8A8_UNORM,
        0,
    );
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("at least one copy"));
}

#[test]
fn test_default_framebuffer_tracks_the_swapchain() {
    let mut h = harness(8, 8);
    let framebuffer =
        Framebuffer::new_default(h.device.clone() as Arc<dyn GraphicsDevice>, &mut h.images, &*h.swapchain)
            .unwrap();
    assert!(framebuffer.is_default());
    assert_eq!(framebuffer.copy_count(), 2);
    assert_eq!(framebuffer.width(), 8);
    assert_eq!(framebuffer.layer_count(), 1);
}

// ============================================================================
// Tests: Pass State Machine
// ============================================================================

#[test]
fn test_begin_before_realize_fails() {
    let mut h = harness(4, 4);
    let mut framebuffer = Framebuffer::new(
        h.device.clone() as Arc<dyn GraphicsDevice>,
        &mut h.images,
        "unrealized",
        4,
        4,
        1,
        ImageFormat::R8G8B8A8_UNORM,
        2,
    )
    .unwrap();
    let mut frame = h.frame();
    let result = framebuffer.begin_render_pass_discard(&mut frame, &mut h.images);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("has not been pushed to the GPU"));
}

#[test]
fn test_one_pass_at_a_time() {
    let mut h = harness(4, 4);
    let mut framebuffer = h.offscreen(4, 4, 1);
    let mut frame = h.frame();

    framebuffer
        .begin_render_pass_discard(&mut frame, &mut h.images)
        .unwrap();
    assert!(framebuffer.is_recording());

    let result = framebuffer.begin_render_pass_keep(&mut frame, &mut h.images);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("already recording"));

    framebuffer
        .end_render_pass_no_mipmaps(&mut frame, &mut h.images)
        .unwrap();
    assert!(!framebuffer.is_recording());

    let result = framebuffer.end_render_pass(&mut frame, &mut h.images);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("No render pass is recording"));
}

#[test]
fn test_single_layer_target_rejects_layer_passes() {
    let mut h = harness(4, 4);
    let mut framebuffer = h.offscreen(4, 4, 1);
    let mut frame = h.frame();
    let result =
        framebuffer.begin_one_layer_render_pass_discard(&mut frame, &mut h.images, 1);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("not a layered render target"));
}

#[test]
fn test_layer_out_of_range_rejected() {
    let mut h = harness(4, 4);
    let mut framebuffer = h.offscreen(4, 4, 4);
    let mut frame = h.frame();
    let result =
        framebuffer.begin_one_layer_render_pass_keep(&mut frame, &mut h.images, 7);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("has no layer 7 (4 layers)"));
}

// ============================================================================
// Tests: Sampling the Completed Copy
// ============================================================================

#[test]
fn test_current_image_requires_a_completed_pass() {
    let mut h = harness(4, 4);
    let framebuffer = h.offscreen(4, 4, 1);
    assert_eq!(framebuffer.completed_index(), None);
    assert!(framebuffer
        .current_image()
        .unwrap_err()
        .to_string()
        .contains("has not completed a render pass"));
}

#[test]
fn test_default_framebuffer_cannot_be_sampled() {
    let mut h = harness(4, 4);
    let framebuffer =
        Framebuffer::new_default(h.device.clone() as Arc<dyn GraphicsDevice>, &mut h.images, &*h.swapchain)
            .unwrap();
    assert!(framebuffer
        .current_image()
        .unwrap_err()
        .to_string()
        .contains("cannot be sampled"));
}

#[test]
fn test_clear_pass_writes_the_clear_color() {
    let mut h = harness(4, 4);
    let mut framebuffer = h.offscreen(4, 4, 1);
    let mut frame = h.frame();

    framebuffer
        .begin_render_pass_clear(&mut frame, &mut h.images, [1.0, 0.0, 0.0, 1.0])
        .unwrap();
    framebuffer.end_render_pass(&mut frame, &mut h.images).unwrap();

    assert_eq!(framebuffer.completed_index(), Some(frame.image_index()));
    assert_eq!(h.read_color(&framebuffer, 0), solid_bytes(16, [255, 0, 0, 255]));
    assert!(framebuffer.current_depth_image().is_ok());
    assert!(framebuffer.current_depth_view(&h.images).is_ok());
}

#[test]
fn test_current_image_tracks_the_completed_copy_not_the_recording_one() {
    let mut h = harness(4, 4);
    let mut framebuffer = h.offscreen(4, 4, 1);

    // Complete a red pass on the first copy
    let mut frame = h.frame();
    framebuffer
        .begin_render_pass_clear(&mut frame, &mut h.images, [1.0, 0.0, 0.0, 1.0])
        .unwrap();
    framebuffer
        .end_render_pass_no_mipmaps(&mut frame, &mut h.images)
        .unwrap();
    let completed_copy = framebuffer.completed_index().unwrap();
    let completed_image = framebuffer.current_image().unwrap();
    h.scheduler.end_frame(frame, &mut *h.swapchain).unwrap();

    // Open (but do not end) a blue pass on the other copy
    let mut frame = h.frame();
    assert_ne!(frame.image_index(), completed_copy);
    framebuffer
        .begin_render_pass_clear(&mut frame, &mut h.images, [0.0, 0.0, 1.0, 1.0])
        .unwrap();

    assert_eq!(framebuffer.completed_index(), Some(completed_copy));
    assert_eq!(framebuffer.current_image().unwrap(), completed_image);
    assert_eq!(h.read_color(&framebuffer, 0), solid_bytes(16, [255, 0, 0, 255]));

    // Ending the pass moves the completed copy forward
    framebuffer
        .end_render_pass_no_mipmaps(&mut frame, &mut h.images)
        .unwrap();
    assert_eq!(framebuffer.completed_index(), Some(frame.image_index()));
    assert_ne!(framebuffer.current_image().unwrap(), completed_image);
    assert_eq!(h.read_color(&framebuffer, 0), solid_bytes(16, [0, 0, 255, 255]));
}

// ============================================================================
// Tests: Mip Regeneration
// ============================================================================

#[test]
fn test_end_pass_regenerates_the_mip_chain() {
    let mut h = harness(4, 4);
    let mut framebuffer = h.offscreen(4, 4, 1);
    let mut frame = h.frame();

    framebuffer
        .begin_render_pass_clear(&mut frame, &mut h.images, [0.0, 1.0, 0.0, 1.0])
        .unwrap();
    framebuffer.end_render_pass(&mut frame, &mut h.images).unwrap();

    assert_eq!(h.read_color(&framebuffer, 1), solid_bytes(4, [0, 255, 0, 255]));
    assert_eq!(h.read_color(&framebuffer, 2), solid_bytes(1, [0, 255, 0, 255]));
}

#[test]
fn test_no_mipmaps_variant_skips_the_blits() {
    let mut h = harness(4, 4);
    let mut framebuffer = h.offscreen(4, 4, 1);
    let mut frame = h.frame();

    framebuffer
        .begin_render_pass_clear(&mut frame, &mut h.images, [0.0, 1.0, 0.0, 1.0])
        .unwrap();
    framebuffer
        .end_render_pass_no_mipmaps(&mut frame, &mut h.images)
        .unwrap();

    // The base mip has the clear; the chain below it was never written
    assert_eq!(h.read_color(&framebuffer, 0), solid_bytes(16, [0, 255, 0, 255]));
    assert_eq!(h.read_color(&framebuffer, 1), solid_bytes(4, [0, 0, 0, 0]));
}
