/// Tests for memoized loads and batched uploads

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use super::*;
use crate::device::software::SoftwareDevice;

fn harness() -> (Arc<SoftwareDevice>, ImageStore) {
    let device = Arc::new(SoftwareDevice::new());
    let store = ImageStore::new(device.clone() as Arc<dyn GraphicsDevice>);
    (device, store)
}

fn solid(width: u32, height: u32, color: [u8; 4]) -> PixelData {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        pixels.extend_from_slice(&color);
    }
    PixelData { width, height, pixels }
}

// ============================================================================
// Tests: Memoization
// ============================================================================

#[test]
fn test_loads_are_memoized_by_name() {
    let (device, mut store) = harness();
    let first = store
        .load_from_pixels("wall", solid(2, 2, [1, 2, 3, 4]), ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    let second = store
        .load_from_pixels("wall", solid(2, 2, [9, 9, 9, 9]), ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(store.image_count(), 1);
    assert_eq!(device.counters().images.load(std::sync::atomic::Ordering::Relaxed), 1);
    assert_eq!(store.key_by_name("wall"), Some(first));
}

#[test]
fn test_memoized_load_rejects_a_format_conflict() {
    let (_, mut store) = harness();
    store
        .load_from_pixels("wall", solid(2, 2, [0, 0, 0, 0]), ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    let result =
        store.load_from_pixels("wall", solid(2, 2, [0, 0, 0, 0]), ImageFormat::R8G8B8A8_SRGB);
    assert!(result.unwrap_err().to_string().contains("different formats"));
}

#[test]
fn test_memoized_load_rejects_a_view_kind_conflict() {
    let (_, mut store) = harness();
    store
        .load_from_pixels("sky", solid(2, 2, [0, 0, 0, 0]), ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    let faces = (0..6).map(|_| solid(2, 2, [0, 0, 0, 0])).collect();
    let result = store.load_cube("sky", faces, ImageFormat::R8G8B8A8_UNORM);
    assert!(result.unwrap_err().to_string().contains("different view kinds"));
}

#[test]
fn test_solid_colors_are_memoized_by_value() {
    let (_, mut store) = harness();
    let red = store.create_solid_color([255, 0, 0, 255]).unwrap();
    let red_again = store.create_solid_color([255, 0, 0, 255]).unwrap();
    let blue = store.create_solid_color([0, 0, 255, 255]).unwrap();
    assert_eq!(red, red_again);
    assert_ne!(red, blue);
    assert_eq!(store.image_count(), 2);
}

#[test]
fn test_uninitialized_images_are_never_shared() {
    let (_, mut store) = harness();
    let usage = ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED;
    let first = store
        .create_uninitialized(4, 4, 1, ImageFormat::R8G8B8A8_UNORM, usage, ImageAspect::Color, ImageViewKind::D2Array)
        .unwrap();
    let second = store
        .create_uninitialized(4, 4, 1, ImageFormat::R8G8B8A8_UNORM, usage, ImageAspect::Color, ImageViewKind::D2Array)
        .unwrap();
    assert_ne!(first, second);
}

// ============================================================================
// Tests: Cube Validation
// ============================================================================

#[test]
fn test_cube_needs_six_faces() {
    let (_, mut store) = harness();
    let faces = (0..5).map(|_| solid(2, 2, [0, 0, 0, 0])).collect();
    let result = store.load_cube("partial", faces, ImageFormat::R8G8B8A8_UNORM);
    assert!(result.unwrap_err().to_string().contains("needs 6 faces, got 5"));
}

#[test]
fn test_cube_faces_must_be_square() {
    let (_, mut store) = harness();
    let faces = (0..6).map(|_| solid(4, 2, [0, 0, 0, 0])).collect();
    let result = store.load_cube("wide", faces, ImageFormat::R8G8B8A8_UNORM);
    assert!(result.unwrap_err().to_string().contains("must be square"));
}

#[test]
fn test_cube_faces_must_all_match() {
    let (_, mut store) = harness();
    let mut faces: Vec<PixelData> = (0..5).map(|_| solid(2, 2, [0, 0, 0, 0])).collect();
    faces.push(solid(4, 4, [0, 0, 0, 0]));
    let result = store.load_cube("mixed", faces, ImageFormat::R8G8B8A8_UNORM);
    assert!(result.unwrap_err().to_string().contains("face 5 is 4x4"));
}

#[test]
fn test_cube_gets_six_layers() {
    let (_, mut store) = harness();
    let faces = (0..6).map(|_| solid(2, 2, [7, 7, 7, 7])).collect();
    let key = store.load_cube("box", faces, ImageFormat::R8G8B8A8_UNORM).unwrap();
    let image = store.get(key).unwrap();
    assert_eq!(image.layer_count(), 6);
    assert_eq!(image.view_kind(), ImageViewKind::Cube);
}

// ============================================================================
// Tests: Upload Batching
// ============================================================================

#[test]
fn test_push_to_gpu_uploads_and_creates_views() {
    let (_, mut store) = harness();
    let key = store
        .load_from_pixels("tex", solid(2, 2, [10, 20, 30, 40]), ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    assert!(!store.get(key).unwrap().is_uploaded());

    store.push_to_gpu().unwrap();

    let image = store.get(key).unwrap();
    assert!(image.is_uploaded());
    assert!(image.view().is_ok());
    assert!(image.layer_view(0).is_ok());
    assert!(image
        .layer_view(1)
        .unwrap_err()
        .to_string()
        .contains("has no layer 1"));
}

#[test]
fn test_push_to_gpu_readback_matches_the_source() {
    let (device, mut store) = harness();
    let key = store
        .load_from_pixels("tex", solid(2, 2, [10, 20, 30, 40]), ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    store.push_to_gpu().unwrap();

    let image = store.get(key).unwrap();
    let mip0 = device
        .read_image_pixels(image.device_handle(), ImageAspect::Color, 0, 0)
        .unwrap();
    assert_eq!(mip0, solid(2, 2, [10, 20, 30, 40]).pixels);

    // Host-generated mip 1 of a uniform image is the same color
    let mip1 = device
        .read_image_pixels(image.device_handle(), ImageAspect::Color, 0, 1)
        .unwrap();
    assert_eq!(mip1, vec![10, 20, 30, 40]);
}

#[test]
fn test_push_to_gpu_skips_already_uploaded_images() {
    let (device, mut store) = harness();
    store
        .load_from_pixels("a", solid(2, 2, [1, 1, 1, 1]), ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    store.push_to_gpu().unwrap();

    let submits = device.counters().submits.load(std::sync::atomic::Ordering::Relaxed);
    store.push_to_gpu().unwrap();
    assert_eq!(
        device.counters().submits.load(std::sync::atomic::Ordering::Relaxed),
        submits
    );
}

#[test]
fn test_second_batch_only_uploads_new_images() {
    let (_, mut store) = harness();
    let first = store
        .load_from_pixels("a", solid(2, 2, [1, 1, 1, 1]), ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    store.push_to_gpu().unwrap();

    let second = store
        .load_from_pixels("b", solid(4, 4, [2, 2, 2, 2]), ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    store.push_to_gpu().unwrap();

    assert!(store.get(first).unwrap().is_uploaded());
    assert!(store.get(second).unwrap().is_uploaded());
}

#[test]
fn test_upload_callbacks_fire_once_per_batch() {
    let (_, mut store) = harness();
    let batches = Rc::new(Cell::new(0u32));
    let counter = batches.clone();
    store.add_upload_callback(Box::new(move || counter.set(counter.get() + 1)));

    store
        .load_from_pixels("a", solid(2, 2, [1, 1, 1, 1]), ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    store.push_to_gpu().unwrap();
    assert_eq!(batches.get(), 1);

    // An empty batch does not fire callbacks
    store.push_to_gpu().unwrap();
    assert_eq!(batches.get(), 1);

    store
        .load_from_pixels("b", solid(2, 2, [2, 2, 2, 2]), ImageFormat::R8G8B8A8_UNORM)
        .unwrap();
    store.push_to_gpu().unwrap();
    assert_eq!(batches.get(), 2);
}

// ============================================================================
// Tests: Offset Packing
// ============================================================================

#[test]
fn test_padding_aligns_up() {
    assert_eq!(compute_padding(0, 256), 0);
    assert_eq!(compute_padding(1, 256), 255);
    assert_eq!(compute_padding(256, 256), 0);
    assert_eq!(compute_padding(300, 256), 212);
    assert_eq!(compute_padding(300, 0), 0);
}
