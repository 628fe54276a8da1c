/// Tests for mip chain construction and per-mip layout tracking

use std::sync::Arc;

use super::*;
use crate::device::software::SoftwareDevice;

fn test_device() -> Arc<dyn GraphicsDevice> {
    Arc::new(SoftwareDevice::new())
}

fn solid_pixels(width: u32, height: u32, value: u8) -> Vec<u8> {
    vec![value; (width * height * 4) as usize]
}

fn make_image(device: &Arc<dyn GraphicsDevice>, width: u32, height: u32) -> Image {
    Image::new(
        device,
        "test_image",
        width,
        height,
        ImageFormat::R8G8B8A8_UNORM,
        ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
        ImageAspect::Color,
        ImageViewKind::D2,
        vec![solid_pixels(width, height, 128)],
        ImageLayout::ShaderReadOnly,
    )
    .unwrap()
}

// ============================================================================
// Tests: Construction
// ============================================================================

#[test]
fn test_mip_chain_reaches_one_by_one() {
    let device = test_device();
    let image = make_image(&device, 16, 8);
    assert_eq!(image.mip_count(), 5);
    let dims: Vec<(u32, u32)> = image.layers[0]
        .mips
        .iter()
        .map(|mip| (mip.width, mip.height))
        .collect();
    assert_eq!(dims, vec![(16, 8), (8, 4), (4, 2), (2, 1), (1, 1)]);
}

#[test]
fn test_mip_pixels_shrink_with_the_chain() {
    let device = test_device();
    let image = make_image(&device, 4, 4);
    assert_eq!(image.layers[0].mips[0].pixels.len(), 4 * 4 * 4);
    assert_eq!(image.layers[0].mips[1].pixels.len(), 2 * 2 * 4);
    assert_eq!(image.layers[0].mips[2].pixels.len(), 4);
}

#[test]
fn test_empty_mip_zero_stays_empty_down_the_chain() {
    let device = test_device();
    let image = Image::new(
        &device,
        "attachment",
        8,
        8,
        ImageFormat::R8G8B8A8_UNORM,
        ImageUsage::COLOR_ATTACHMENT,
        ImageAspect::Color,
        ImageViewKind::D2Array,
        vec![Vec::new(), Vec::new()],
        ImageLayout::Undefined,
    )
    .unwrap();
    assert_eq!(image.layer_count(), 2);
    assert_eq!(image.mip_count(), 4);
    for layer in &image.layers {
        assert!(layer.mips.iter().all(|mip| mip.pixels.is_empty()));
    }
}

#[test]
fn test_zero_dimension_rejected() {
    let device = test_device();
    let result = Image::new(
        &device,
        "bad",
        0,
        4,
        ImageFormat::R8G8B8A8_UNORM,
        ImageUsage::SAMPLED,
        ImageAspect::Color,
        ImageViewKind::D2,
        vec![Vec::new()],
        ImageLayout::Undefined,
    );
    assert!(result.unwrap_err().to_string().contains("zero dimension"));
}

#[test]
fn test_oversized_image_rejected() {
    let device = test_device();
    let result = Image::new(
        &device,
        "huge",
        MAX_IMAGE_DIMENSION + 1,
        4,
        ImageFormat::R8G8B8A8_UNORM,
        ImageUsage::SAMPLED,
        ImageAspect::Color,
        ImageViewKind::D2,
        vec![Vec::new()],
        ImageLayout::Undefined,
    );
    assert!(result.unwrap_err().to_string().contains("too large"));
}

#[test]
fn test_limit_sized_image_accepted() {
    let device = test_device();
    let result = Image::new(
        &device,
        "widest",
        MAX_IMAGE_DIMENSION,
        4,
        ImageFormat::R8G8B8A8_UNORM,
        ImageUsage::SAMPLED,
        ImageAspect::Color,
        ImageViewKind::D2,
        vec![Vec::new()],
        ImageLayout::Undefined,
    );
    assert!(result.is_ok());
}

#[test]
fn test_no_layers_rejected() {
    let device = test_device();
    let result = Image::new(
        &device,
        "empty",
        4,
        4,
        ImageFormat::R8G8B8A8_UNORM,
        ImageUsage::SAMPLED,
        ImageAspect::Color,
        ImageViewKind::D2,
        Vec::new(),
        ImageLayout::Undefined,
    );
    assert!(result.unwrap_err().to_string().contains("has no layers"));
}

#[test]
fn test_mismatched_layer_byte_count_rejected() {
    let device = test_device();
    let result = Image::new(
        &device,
        "short",
        4,
        4,
        ImageFormat::R8G8B8A8_UNORM,
        ImageUsage::SAMPLED,
        ImageAspect::Color,
        ImageViewKind::D2,
        vec![vec![0u8; 7]],
        ImageLayout::ShaderReadOnly,
    );
    let message = result.unwrap_err().to_string();
    assert!(message.contains("layer data is 7 bytes"));
}

// ============================================================================
// Tests: Views
// ============================================================================

#[test]
fn test_views_error_before_upload() {
    let device = test_device();
    let image = make_image(&device, 4, 4);
    assert!(image
        .view()
        .unwrap_err()
        .to_string()
        .contains("has not been pushed to the GPU"));
    assert!(image
        .layer_view(0)
        .unwrap_err()
        .to_string()
        .contains("has not been pushed to the GPU"));
    assert!(!image.is_uploaded());
}

// ============================================================================
// Tests: Layout Transitions
// ============================================================================

#[test]
fn test_full_transition_covers_every_mip() {
    let device = test_device();
    let mut image = make_image(&device, 8, 8);
    let mut cmd = device.create_command_list().unwrap();
    cmd.begin().unwrap();

    image
        .layout_transition(ImageLayout::TransferDst, &mut *cmd)
        .unwrap();
    for mip in 0..image.mip_count() {
        assert_eq!(image.layout(0, mip).unwrap(), ImageLayout::TransferDst);
    }
    cmd.end().unwrap();
}

#[test]
fn test_single_mip_transition_leaves_the_rest() {
    let device = test_device();
    let mut image = make_image(&device, 8, 8);
    let mut cmd = device.create_command_list().unwrap();
    cmd.begin().unwrap();

    image
        .layout_transition(ImageLayout::TransferDst, &mut *cmd)
        .unwrap();
    image
        .layout_transition_mip(0, 0, ImageLayout::TransferSrc, &mut *cmd)
        .unwrap();
    assert_eq!(image.layout(0, 0).unwrap(), ImageLayout::TransferSrc);
    assert_eq!(image.layout(0, 1).unwrap(), ImageLayout::TransferDst);
    cmd.end().unwrap();
}

#[test]
fn test_mixed_region_transitions_to_a_uniform_layout() {
    let device = test_device();
    let mut image = make_image(&device, 8, 8);
    let mut cmd = device.create_command_list().unwrap();
    cmd.begin().unwrap();

    // Make the layouts disagree, then transition the whole chain
    image
        .layout_transition_mip(0, 1, ImageLayout::TransferDst, &mut *cmd)
        .unwrap();
    image
        .layout_transition(ImageLayout::ShaderReadOnly, &mut *cmd)
        .unwrap();
    for mip in 0..image.mip_count() {
        assert_eq!(image.layout(0, mip).unwrap(), ImageLayout::ShaderReadOnly);
    }
    cmd.end().unwrap();
}

#[test]
fn test_invalid_ranges_rejected() {
    let device = test_device();
    let mut image = make_image(&device, 8, 8);
    let mut cmd = device.create_command_list().unwrap();
    cmd.begin().unwrap();

    let result =
        image.layout_transition_range(0..2, 0..1, ImageLayout::TransferDst, &mut *cmd);
    assert!(result.unwrap_err().to_string().contains("layer range"));

    let result =
        image.layout_transition_range(0..1, 3..9, ImageLayout::TransferDst, &mut *cmd);
    assert!(result.unwrap_err().to_string().contains("mip range"));

    let result =
        image.layout_transition_range(0..1, 1..1, ImageLayout::TransferDst, &mut *cmd);
    assert!(result.is_err());
    cmd.end().unwrap();
}

#[test]
fn test_layout_query_bounds() {
    let device = test_device();
    let image = make_image(&device, 8, 8);
    assert!(image
        .layout(1, 0)
        .unwrap_err()
        .to_string()
        .contains("has no layer 1"));
    assert!(image
        .layout(0, 40)
        .unwrap_err()
        .to_string()
        .contains("has no mip 40"));
}
