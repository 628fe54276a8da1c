/// Tests for per-attribute vertex buffers and geometry batching

use super::*;
use crate::device::software::SoftwareDevice;

fn test_device() -> Arc<dyn GraphicsDevice> {
    Arc::new(SoftwareDevice::new())
}

fn positions_and_uvs(device: &Arc<dyn GraphicsDevice>) -> VertexManager {
    VertexManager::new(
        device.clone(),
        vec![ImageFormat::R32G32B32_SFLOAT, ImageFormat::R32G32_SFLOAT],
    )
    .unwrap()
}

fn triangle() -> (Vec<glam::Vec3>, Vec<glam::Vec2>) {
    (
        vec![
            glam::Vec3::new(0.0, 0.0, 0.0),
            glam::Vec3::new(1.0, 0.0, 0.0),
            glam::Vec3::new(0.0, 1.0, 0.0),
        ],
        vec![
            glam::Vec2::new(0.0, 0.0),
            glam::Vec2::new(1.0, 0.0),
            glam::Vec2::new(0.0, 1.0),
        ],
    )
}

// ============================================================================
// Tests: Construction
// ============================================================================

#[test]
fn test_at_least_one_attribute_required() {
    let device = test_device();
    let result = VertexManager::new(device, Vec::new());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("at least one attribute"));
}

#[test]
fn test_non_float_formats_rejected() {
    let device = test_device();
    let result = VertexManager::new(device, vec![ImageFormat::R8G8B8A8_UNORM]);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("not a vertex attribute format"));
}

// ============================================================================
// Tests: Geometry Batching
// ============================================================================

#[test]
fn test_batches_accumulate_offsets() {
    let device = test_device();
    let mut manager = positions_and_uvs(&device);
    let (positions, uvs) = triangle();

    let first = manager
        .add_indexed_data(
            &[0, 1, 2],
            &[AttributeData::Vec3(&positions), AttributeData::Vec2(&uvs)],
        )
        .unwrap();
    assert_eq!(first.vertex_offset, 0);
    assert_eq!(first.index_offset, 0);
    assert_eq!(first.index_count, 3);

    let second = manager
        .add_indexed_data(
            &[0, 2, 1],
            &[AttributeData::Vec3(&positions), AttributeData::Vec2(&uvs)],
        )
        .unwrap();
    assert_eq!(second.vertex_offset, 3);
    assert_eq!(second.index_offset, 3);
    assert_eq!(manager.vertex_count(), 6);
}

#[test]
fn test_attribute_count_must_match_the_formats() {
    let device = test_device();
    let mut manager = positions_and_uvs(&device);
    let (positions, _) = triangle();
    let result = manager.add_indexed_data(&[0, 1, 2], &[AttributeData::Vec3(&positions)]);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("Expected 2 attributes, got 1"));
}

#[test]
fn test_attribute_format_must_match() {
    let device = test_device();
    let mut manager = positions_and_uvs(&device);
    let (_, uvs) = triangle();
    let result = manager.add_indexed_data(
        &[0, 1, 2],
        &[AttributeData::Vec2(&uvs), AttributeData::Vec2(&uvs)],
    );
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("expected R32G32B32_SFLOAT"));
}

#[test]
fn test_attributes_must_agree_on_vertex_count() {
    let device = test_device();
    let mut manager = positions_and_uvs(&device);
    let (positions, mut uvs) = triangle();
    uvs.pop();
    let result = manager.add_indexed_data(
        &[0, 1, 2],
        &[AttributeData::Vec3(&positions), AttributeData::Vec2(&uvs)],
    );
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("same number of vertices"));
}

#[test]
fn test_empty_batch_rejected() {
    let device = test_device();
    let mut manager = positions_and_uvs(&device);
    let result = manager.add_indexed_data(
        &[],
        &[AttributeData::Vec3(&[]), AttributeData::Vec2(&[])],
    );
    assert!(result.unwrap_err().to_string().contains("no vertices"));
}

#[test]
fn test_indices_must_stay_in_the_batch() {
    let device = test_device();
    let mut manager = positions_and_uvs(&device);
    let (positions, uvs) = triangle();
    let result = manager.add_indexed_data(
        &[0, 1, 3],
        &[AttributeData::Vec3(&positions), AttributeData::Vec2(&uvs)],
    );
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("Index 3 out of range"));
}

// ============================================================================
// Tests: GPU Push
// ============================================================================

#[test]
fn test_push_is_legal_exactly_once() {
    let device = test_device();
    let mut manager = positions_and_uvs(&device);
    let (positions, uvs) = triangle();
    manager
        .add_indexed_data(
            &[0, 1, 2],
            &[AttributeData::Vec3(&positions), AttributeData::Vec2(&uvs)],
        )
        .unwrap();

    assert!(!manager.is_pushed());
    manager.push_to_gpu().unwrap();
    assert!(manager.is_pushed());

    let result = manager.push_to_gpu();
    assert!(result.unwrap_err().to_string().contains("called twice"));
}

#[test]
fn test_push_without_data_fails() {
    let device = test_device();
    let mut manager = positions_and_uvs(&device);
    let result = manager.push_to_gpu();
    assert!(result.unwrap_err().to_string().contains("no vertex data"));
}

#[test]
fn test_adding_after_push_fails() {
    let device = test_device();
    let mut manager = positions_and_uvs(&device);
    let (positions, uvs) = triangle();
    manager
        .add_indexed_data(
            &[0, 1, 2],
            &[AttributeData::Vec3(&positions), AttributeData::Vec2(&uvs)],
        )
        .unwrap();
    manager.push_to_gpu().unwrap();

    let result = manager.add_indexed_data(
        &[0, 1, 2],
        &[AttributeData::Vec3(&positions), AttributeData::Vec2(&uvs)],
    );
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("after push_to_gpu()"));
}

// ============================================================================
// Tests: Pipeline Layout
// ============================================================================

#[test]
fn test_vertex_layout_mirrors_the_formats() {
    let device = test_device();
    let manager = positions_and_uvs(&device);
    let layout = manager.vertex_layout();

    assert_eq!(layout.bindings.len(), 2);
    assert_eq!(layout.attributes.len(), 2);
    assert_eq!(layout.bindings[0].stride, 12);
    assert_eq!(layout.bindings[1].stride, 8);
    assert_eq!(layout.attributes[0].location, 0);
    assert_eq!(layout.attributes[1].binding, 1);
    assert_eq!(layout.attributes[1].format, ImageFormat::R32G32_SFLOAT);
    assert!(layout.attributes.iter().all(|a| a.offset == 0));
}
