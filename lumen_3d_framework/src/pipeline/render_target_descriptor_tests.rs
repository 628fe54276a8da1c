/// Tests for render target descriptor compatibility

use super::*;
use crate::device::software::SoftwareDevice;

fn test_device() -> Arc<dyn GraphicsDevice> {
    Arc::new(SoftwareDevice::new())
}

fn descriptor(
    device: &Arc<dyn GraphicsDevice>,
    color_format: ImageFormat,
    depth_format: Option<ImageFormat>,
    layer_count: u32,
    load_op: LoadOp,
) -> Arc<RenderTargetDescriptor> {
    RenderTargetDescriptor::new(
        device,
        "descriptor",
        color_format,
        depth_format,
        layer_count,
        SampleCount::S1,
        load_op,
        64,
        32,
        false,
    )
    .unwrap()
}

// ============================================================================
// Tests: Accessors
// ============================================================================

#[test]
fn test_descriptor_reports_its_configuration() {
    let device = test_device();
    let descriptor = descriptor(
        &device,
        ImageFormat::R8G8B8A8_UNORM,
        Some(ImageFormat::D32_SFLOAT),
        3,
        LoadOp::Clear,
    );
    assert_eq!(descriptor.name(), "descriptor");
    assert_eq!(descriptor.color_format(), ImageFormat::R8G8B8A8_UNORM);
    assert_eq!(descriptor.depth_format(), Some(ImageFormat::D32_SFLOAT));
    assert_eq!(descriptor.layer_count(), 3);
    assert_eq!(descriptor.load_op(), LoadOp::Clear);
    assert_eq!(descriptor.width(), 64);
    assert_eq!(descriptor.height(), 32);
}

// ============================================================================
// Tests: Compatibility
// ============================================================================

#[test]
fn test_compatibility_ignores_the_load_op() {
    let device = test_device();
    let depth = Some(ImageFormat::D32_SFLOAT);
    let discard = descriptor(&device, ImageFormat::R8G8B8A8_UNORM, depth, 1, LoadOp::Discard);
    let keep = descriptor(&device, ImageFormat::R8G8B8A8_UNORM, depth, 1, LoadOp::Keep);
    let clear = descriptor(&device, ImageFormat::R8G8B8A8_UNORM, depth, 1, LoadOp::Clear);
    assert!(discard.is_compatible_with(&keep));
    assert!(keep.is_compatible_with(&clear));
    assert!(clear.is_compatible_with(&discard));
}

#[test]
fn test_compatibility_requires_matching_color_formats() {
    let device = test_device();
    let depth = Some(ImageFormat::D32_SFLOAT);
    let unorm = descriptor(&device, ImageFormat::R8G8B8A8_UNORM, depth, 1, LoadOp::Keep);
    let srgb = descriptor(&device, ImageFormat::R8G8B8A8_SRGB, depth, 1, LoadOp::Keep);
    assert!(!unorm.is_compatible_with(&srgb));
}

#[test]
fn test_compatibility_requires_matching_depth_usage() {
    let device = test_device();
    let with_depth = descriptor(
        &device,
        ImageFormat::R8G8B8A8_UNORM,
        Some(ImageFormat::D32_SFLOAT),
        1,
        LoadOp::Keep,
    );
    let without_depth =
        descriptor(&device, ImageFormat::R8G8B8A8_UNORM, None, 1, LoadOp::Keep);
    assert!(!with_depth.is_compatible_with(&without_depth));
}

#[test]
fn test_compatibility_requires_matching_layer_counts() {
    let device = test_device();
    let depth = Some(ImageFormat::D32_SFLOAT);
    let single = descriptor(&device, ImageFormat::R8G8B8A8_UNORM, depth, 1, LoadOp::Keep);
    let layered = descriptor(&device, ImageFormat::R8G8B8A8_UNORM, depth, 4, LoadOp::Keep);
    assert!(!single.is_compatible_with(&layered));
}
