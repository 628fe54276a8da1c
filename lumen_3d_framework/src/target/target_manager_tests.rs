/// Tests for helper sharing and the two-pass blur

use super::*;
use crate::device::software::SoftwareDevice;
use crate::device::ImageAspect;
use crate::frame::FrameScheduler;

struct Harness {
    device: Arc<SoftwareDevice>,
    images: ImageStore,
    manager: TargetManager,
    scheduler: FrameScheduler,
    swapchain: Box<dyn crate::device::Swapchain>,
}

fn harness() -> Harness {
    let device = Arc::new(SoftwareDevice::new());
    let dyn_device: Arc<dyn GraphicsDevice> = device.clone();
    let swapchain = device.create_offscreen_swapchain(16, 16, 2).unwrap();
    Harness {
        images: ImageStore::new(dyn_device.clone()),
        manager: TargetManager::new(dyn_device.clone()),
        scheduler: FrameScheduler::new(dyn_device),
        device,
        swapchain,
    }
}

impl Harness {
    fn create_target(&mut self, name: &str, width: u32, height: u32) -> FramebufferKey {
        self.manager
            .create_framebuffer(
                &mut self.images,
                name,
                width,
                height,
                1,
                ImageFormat::R8G8B8A8_UNORM,
                2,
            )
            .unwrap()
    }

    fn push_all(&mut self) {
        self.images.push_to_gpu().unwrap();
        self.manager.push_to_gpu(&self.images).unwrap();
    }

    fn frame(&mut self) -> Frame {
        self.scheduler.begin_frame(&mut *self.swapchain).unwrap()
    }

    /// Clear the target and complete the pass so it can be blurred
    fn clear_target(&mut self, key: FramebufferKey, frame: &mut Frame, color: [f32; 4]) {
        let framebuffer = self.manager.get_mut(key).unwrap();
        framebuffer
            .begin_render_pass_clear(frame, &mut self.images, color)
            .unwrap();
        framebuffer.end_render_pass(frame, &mut self.images).unwrap();
    }

    fn read_target(&self, key: FramebufferKey) -> Vec<u8> {
        let image_key = self.manager.get(key).unwrap().current_image().unwrap();
        let image = self.images.get(image_key).unwrap();
        self.device
            .read_image_pixels(image.device_handle(), ImageAspect::Color, 0, 0)
            .unwrap()
    }
}

fn assert_uniform(pixels: &[u8], expected: [u8; 4], tolerance: u8) {
    for (index, texel) in pixels.chunks_exact(4).enumerate() {
        for channel in 0..4 {
            let delta = texel[channel].abs_diff(expected[channel]);
            assert!(
                delta <= tolerance,
                "texel {} channel {} is {}, expected {} (±{})",
                index, channel, texel[channel], expected[channel], tolerance
            );
        }
    }
}

// ============================================================================
// Tests: Helper Sharing
// ============================================================================

#[test]
fn test_same_key_targets_share_one_helper() {
    let mut h = harness();
    let first = h.create_target("first", 16, 16);
    let second = h.create_target("second", 16, 16);

    // Two targets plus exactly one helper
    assert_eq!(h.manager.framebuffer_count(), 3);
    let first_helper = h.manager.get(first).unwrap().helper.unwrap();
    let second_helper = h.manager.get(second).unwrap().helper.unwrap();
    assert_eq!(first_helper, second_helper);
}

#[test]
fn test_different_sizes_get_their_own_helpers() {
    let mut h = harness();
    let small = h.create_target("small", 8, 8);
    let large = h.create_target("large", 16, 16);

    assert_eq!(h.manager.framebuffer_count(), 4);
    let small_helper = h.manager.get(small).unwrap().helper.unwrap();
    let large_helper = h.manager.get(large).unwrap().helper.unwrap();
    assert_ne!(small_helper, large_helper);
}

#[test]
fn test_helpers_are_single_layer() {
    let mut h = harness();
    let target = h.create_target("layered", 16, 16);
    let helper = h.manager.get(target).unwrap().helper.unwrap();
    let helper_fb = h.manager.get(helper).unwrap();
    assert_eq!(helper_fb.layer_count(), 1);
    assert!(helper_fb.helper.is_none());
}

#[test]
fn test_default_framebuffer_gets_no_helper() {
    let mut h = harness();
    let device = h.device.clone();
    let swapchain = device.create_offscreen_swapchain(16, 16, 2).unwrap();
    let key = h
        .manager
        .create_default_framebuffer(&mut h.images, &*swapchain)
        .unwrap();
    assert!(h.manager.get(key).unwrap().helper.is_none());
}

// ============================================================================
// Tests: Blur Validation
// ============================================================================

#[test]
fn test_blur_radius_bounds() {
    let mut h = harness();
    let target = h.create_target("target", 16, 16);
    h.push_all();
    let mut frame = h.frame();

    for radius in [0, MAX_BLUR_RADIUS + 1] {
        let params = BlurParams { radius, ..Default::default() };
        let result = h
            .manager
            .blur(target, &mut frame, &mut h.images, params, None);
        assert!(result.unwrap_err().to_string().contains("out of range"));
    }
}

#[test]
fn test_default_framebuffer_cannot_be_blurred() {
    let mut h = harness();
    let device = h.device.clone();
    let swapchain = device.create_offscreen_swapchain(16, 16, 2).unwrap();
    let key = h
        .manager
        .create_default_framebuffer(&mut h.images, &*swapchain)
        .unwrap();
    h.push_all();
    let mut frame = h.frame();

    let result = h
        .manager
        .blur(key, &mut frame, &mut h.images, BlurParams::default(), None);
    assert!(result.unwrap_err().to_string().contains("cannot be blurred"));
}

#[test]
fn test_blur_before_push_to_gpu_fails() {
    let mut h = harness();
    let target = h.create_target("target", 16, 16);
    let mut frame = h.frame();

    let result = h
        .manager
        .blur(target, &mut frame, &mut h.images, BlurParams::default(), None);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("has not been pushed to the GPU"));
}

#[test]
fn test_blur_requires_a_completed_pass() {
    let mut h = harness();
    let target = h.create_target("target", 16, 16);
    h.push_all();
    let mut frame = h.frame();

    let result = h
        .manager
        .blur(target, &mut frame, &mut h.images, BlurParams::default(), None);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("has not completed a render pass"));
}

#[test]
fn test_blur_layer_out_of_range() {
    let mut h = harness();
    let target = h.create_target("target", 16, 16);
    h.push_all();
    let mut frame = h.frame();

    let params = BlurParams { layer: 3, ..Default::default() };
    let result = h
        .manager
        .blur(target, &mut frame, &mut h.images, params, None);
    assert!(result.unwrap_err().to_string().contains("has no layer 3"));
}

// ============================================================================
// Tests: Blur Semantics
// ============================================================================

#[test]
fn test_uniform_target_blurs_to_itself() {
    let mut h = harness();
    let target = h.create_target("target", 16, 16);
    h.push_all();
    let mut frame = h.frame();
    h.clear_target(target, &mut frame, [0.2, 0.4, 0.6, 1.0]);

    for radius in [1, 5, MAX_BLUR_RADIUS] {
        let params = BlurParams { radius, ..Default::default() };
        h.manager
            .blur(target, &mut frame, &mut h.images, params, None)
            .unwrap();
        assert_uniform(&h.read_target(target), [51, 102, 153, 255], 3);
    }
}

#[test]
fn test_blur_multiplier_scales_the_result() {
    let mut h = harness();
    let target = h.create_target("target", 16, 16);
    h.push_all();
    let mut frame = h.frame();
    h.clear_target(target, &mut frame, [0.1, 0.2, 0.3, 0.5]);

    let params = BlurParams { radius: 4, multiplier: 2.0, ..Default::default() };
    h.manager
        .blur(target, &mut frame, &mut h.images, params, None)
        .unwrap();
    assert_uniform(&h.read_target(target), [51, 102, 153, 255], 3);
}

#[test]
fn test_depth_gated_blur_keeps_a_uniform_target() {
    let mut h = harness();
    let target = h.create_target("target", 16, 16);
    h.push_all();
    let mut frame = h.frame();
    h.clear_target(target, &mut frame, [0.8, 0.1, 0.1, 1.0]);

    let params = BlurParams { radius: 8, depth_gated: true, ..Default::default() };
    h.manager
        .blur(target, &mut frame, &mut h.images, params, None)
        .unwrap();
    assert_uniform(&h.read_target(target), [204, 26, 26, 255], 3);
}

#[test]
fn test_blur_reuses_its_lazily_built_pipelines() {
    let mut h = harness();
    let target = h.create_target("target", 16, 16);
    h.push_all();
    let mut frame = h.frame();
    h.clear_target(target, &mut frame, [0.5, 0.5, 0.5, 1.0]);

    h.manager
        .blur(target, &mut frame, &mut h.images, BlurParams::default(), None)
        .unwrap();
    let pipelines_after_first = h
        .device
        .counters()
        .pipelines
        .load(std::sync::atomic::Ordering::Relaxed);

    h.manager
        .blur(target, &mut frame, &mut h.images, BlurParams::default(), None)
        .unwrap();
    assert_eq!(
        h.device
            .counters()
            .pipelines
            .load(std::sync::atomic::Ordering::Relaxed),
        pipelines_after_first
    );
}
