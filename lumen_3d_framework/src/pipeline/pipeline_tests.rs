/// Tests for lazily finalized pipelines and clone fallback

use std::sync::atomic::Ordering;

use super::*;
use crate::device::software::SoftwareDevice;
use crate::device::{ImageFormat, LoadOp, SampleCount, ShaderDesc, ShaderStage};

fn harness() -> (Arc<SoftwareDevice>, Arc<dyn GraphicsDevice>) {
    let device = Arc::new(SoftwareDevice::new());
    let dyn_device: Arc<dyn GraphicsDevice> = device.clone();
    (device, dyn_device)
}

fn shader(device: &Arc<dyn GraphicsDevice>, stage: ShaderStage) -> Arc<dyn ShaderModule> {
    device
        .create_shader(&ShaderDesc {
            code: vec![0x03, 0x02, 0x23, 0x07],
            stage,
            entry_point: "main".to_string(),
        })
        .unwrap()
}

fn descriptor(
    device: &Arc<dyn GraphicsDevice>,
    layer_count: u32,
) -> Arc<RenderTargetDescriptor> {
    RenderTargetDescriptor::new(
        device,
        "target",
        ImageFormat::R8G8B8A8_UNORM,
        Some(ImageFormat::D32_SFLOAT),
        layer_count,
        SampleCount::S1,
        LoadOp::Clear,
        64,
        64,
        false,
    )
    .unwrap()
}

fn configured(device: &Arc<dyn GraphicsDevice>, layer_count: u32) -> GraphicsPipeline {
    let mut pipeline = GraphicsPipeline::new(device.clone(), "test");
    pipeline
        .set_vertex_shader(shader(device, ShaderStage::Vertex))
        .unwrap()
        .set_fragment_shader(shader(device, ShaderStage::Fragment))
        .unwrap()
        .set_render_target_descriptor(descriptor(device, layer_count))
        .unwrap();
    pipeline
}

// ============================================================================
// Tests: Finalization
// ============================================================================

#[test]
fn test_finalize_builds_exactly_once() {
    let (device, dyn_device) = harness();
    let mut pipeline = configured(&dyn_device, 1);
    assert!(!pipeline.is_finalized());

    pipeline.finalize().unwrap();
    assert!(pipeline.is_finalized());
    pipeline.finalize().unwrap();
    assert_eq!(device.counters().pipelines.load(Ordering::Relaxed), 1);
}

#[test]
fn test_setters_fail_after_first_use() {
    let (_, device) = harness();
    let mut pipeline = configured(&device, 1);
    pipeline.finalize().unwrap();

    let result = pipeline.set_topology(crate::device::PrimitiveTopology::TriangleStrip);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("after it has been used"));
}

#[test]
fn test_finalize_without_shaders_fails() {
    let (_, device) = harness();

    let mut no_vertex = GraphicsPipeline::new(device.clone(), "no_vertex");
    no_vertex
        .set_render_target_descriptor(descriptor(&device, 1))
        .unwrap();
    assert!(no_vertex
        .finalize()
        .unwrap_err()
        .to_string()
        .contains("no vertex shader"));

    let mut no_fragment = GraphicsPipeline::new(device.clone(), "no_fragment");
    no_fragment
        .set_vertex_shader(shader(&device, ShaderStage::Vertex))
        .unwrap()
        .set_render_target_descriptor(descriptor(&device, 1))
        .unwrap();
    assert!(no_fragment
        .finalize()
        .unwrap_err()
        .to_string()
        .contains("no fragment shader"));
}

#[test]
fn test_finalize_without_a_descriptor_fails() {
    let (_, device) = harness();
    let mut pipeline = GraphicsPipeline::new(device.clone(), "floating");
    pipeline
        .set_vertex_shader(shader(&device, ShaderStage::Vertex))
        .unwrap()
        .set_fragment_shader(shader(&device, ShaderStage::Fragment))
        .unwrap();
    assert!(pipeline
        .finalize()
        .unwrap_err()
        .to_string()
        .contains("no render target descriptor"));
}

#[test]
fn test_device_handle_errors_before_finalization() {
    let (_, device) = harness();
    let pipeline = configured(&device, 1);
    assert!(pipeline
        .device_handle()
        .unwrap_err()
        .to_string()
        .contains("has not been finalized"));
}

// ============================================================================
// Tests: Clone Fallback
// ============================================================================

#[test]
fn test_clone_falls_back_to_the_parent_descriptor() {
    let (_, device) = harness();
    let parent = configured(&device, 1);
    let mut clone = parent.clone_pipeline("clone");
    assert!(clone.finalize().is_ok());
}

#[test]
fn test_clone_chain_falls_back_recursively() {
    let (_, device) = harness();
    let parent = configured(&device, 1);
    let middle = parent.clone_pipeline("middle");
    let mut leaf = middle.clone_pipeline("leaf");
    assert!(leaf.finalize().is_ok());
}

#[test]
fn test_clone_descriptor_overrides_the_fallback() {
    let (_, device) = harness();
    let parent = configured(&device, 1);
    let mut clone = parent.clone_pipeline("clone");
    let own = descriptor(&device, 1);
    clone.set_render_target_descriptor(own.clone()).unwrap();
    assert!(Arc::ptr_eq(clone.resolved_descriptor().unwrap(), &own));
}

#[test]
fn test_clone_of_a_used_pipeline_is_editable() {
    let (device, dyn_device) = harness();
    let mut parent = configured(&dyn_device, 1);
    parent.finalize().unwrap();

    let mut clone = parent.clone_pipeline("clone");
    assert!(!clone.is_finalized());
    clone
        .set_depth_stencil(crate::device::DepthStencilState::default())
        .unwrap();
    clone.finalize().unwrap();
    assert_eq!(device.counters().pipelines.load(Ordering::Relaxed), 2);
}

// ============================================================================
// Tests: Blend Replication
// ============================================================================

#[test]
fn test_single_blend_state_replicates_across_layers() {
    let (_, device) = harness();
    let mut pipeline = configured(&device, 3);
    pipeline.set_blend_state(ColorBlendState::default()).unwrap();
    assert!(pipeline.finalize().is_ok());
}

#[test]
fn test_blend_state_count_mismatch_fails() {
    let (_, device) = harness();
    let mut pipeline = configured(&device, 3);
    pipeline
        .set_blend_states(vec![ColorBlendState::default(); 2])
        .unwrap();
    let message = pipeline.finalize().unwrap_err().to_string();
    assert!(message.contains("uses 3 layers"));
    assert!(message.contains("2 attachments"));
}

// ============================================================================
// Tests: Push Constants
// ============================================================================

#[test]
fn test_push_constant_stages_union() {
    let (_, device) = harness();
    let mut pipeline = GraphicsPipeline::new(device.clone(), "push");
    pipeline
        .set_push_constant_ranges(vec![
            PushConstantRange {
                stages: ShaderStages::VERTEX,
                offset: 0,
                size: 16,
            },
            PushConstantRange {
                stages: ShaderStages::FRAGMENT,
                offset: 16,
                size: 16,
            },
        ])
        .unwrap();
    assert_eq!(
        pipeline.push_constant_stages(),
        ShaderStages::VERTEX | ShaderStages::FRAGMENT
    );
}

// ============================================================================
// Tests: Compute
// ============================================================================

#[test]
fn test_compute_finalize_without_a_shader_fails() {
    let (_, device) = harness();
    let mut pipeline = ComputePipeline::new(device.clone(), "compute");
    assert!(pipeline
        .finalize()
        .unwrap_err()
        .to_string()
        .contains("no compute shader"));
}

#[test]
fn test_compute_finalize_is_idempotent() {
    let (device, dyn_device) = harness();
    let mut pipeline = ComputePipeline::new(dyn_device.clone(), "compute");
    pipeline
        .set_shader(shader(&dyn_device, ShaderStage::Compute))
        .unwrap();
    pipeline.finalize().unwrap();
    pipeline.finalize().unwrap();
    assert_eq!(device.counters().pipelines.load(Ordering::Relaxed), 1);
    assert!(pipeline.device_handle().is_ok());
}
