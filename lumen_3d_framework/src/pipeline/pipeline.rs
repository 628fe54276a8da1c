/// Lazily finalized pipelines
///
/// A pipeline is configured through chained setters, then built exactly
/// once on first use. Setters fail after that point. Cloning produces an
/// editable copy whose render-target descriptor is deferred: if the clone
/// never receives one, finalization falls back to the parent's descriptor
/// (recursively, through chains of clones).

use std::sync::Arc;

use crate::device::{
    ColorBlendState, ComputePipelineDesc, DepthStencilState, DevicePipeline, GraphicsDevice,
    GraphicsPipelineDesc, MultisampleState, PrimitiveTopology, PushConstantRange,
    RasterizationState, Rect2D, ShaderModule, ShaderStages, VertexLayout, Viewport,
};
use crate::error::Result;
use crate::frame::Frame;
use crate::lumen_bail;
use super::render_target_descriptor::RenderTargetDescriptor;

const SOURCE: &str = "lumen3d::Pipeline";

/// Capability shared by graphics and compute pipelines:
/// build-on-first-use with idempotent activation.
pub trait Pipeline {
    fn name(&self) -> &str;

    /// Build the backend pipeline if it has not been built yet
    fn finalize(&mut self) -> Result<()>;

    fn is_finalized(&self) -> bool;
}

// ===== GRAPHICS =====

pub struct GraphicsPipeline {
    device: Arc<dyn GraphicsDevice>,
    name: String,
    vertex_shader: Option<Arc<dyn ShaderModule>>,
    fragment_shader: Option<Arc<dyn ShaderModule>>,
    vertex_layout: VertexLayout,
    topology: PrimitiveTopology,
    rasterization: RasterizationState,
    depth_stencil: DepthStencilState,
    color_blend: Vec<ColorBlendState>,
    multisample: MultisampleState,
    viewport: Option<Viewport>,
    push_constant_ranges: Vec<PushConstantRange>,
    descriptor: Option<Arc<RenderTargetDescriptor>>,
    fallback_descriptor: Option<Arc<RenderTargetDescriptor>>,
    built: Option<Arc<dyn DevicePipeline>>,
}

impl std::fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsPipeline").field("name", &self.name).finish_non_exhaustive()
    }
}

impl GraphicsPipeline {
    pub fn new(device: Arc<dyn GraphicsDevice>, name: &str) -> Self {
        Self {
            device,
            name: name.to_string(),
            vertex_shader: None,
            fragment_shader: None,
            vertex_layout: VertexLayout::default(),
            topology: PrimitiveTopology::TriangleList,
            rasterization: RasterizationState::default(),
            depth_stencil: DepthStencilState::default(),
            color_blend: vec![ColorBlendState::default()],
            multisample: MultisampleState::default(),
            viewport: None,
            push_constant_ranges: Vec::new(),
            descriptor: None,
            fallback_descriptor: None,
            built: None,
        }
    }

    /// Editable copy sharing this pipeline's state. The clone has no
    /// descriptor of its own; at finalization it falls back to this
    /// pipeline's descriptor, or recursively to its fallback.
    pub fn clone_pipeline(&self, name: &str) -> GraphicsPipeline {
        GraphicsPipeline {
            device: self.device.clone(),
            name: name.to_string(),
            vertex_shader: self.vertex_shader.clone(),
            fragment_shader: self.fragment_shader.clone(),
            vertex_layout: self.vertex_layout.clone(),
            topology: self.topology,
            rasterization: self.rasterization,
            depth_stencil: self.depth_stencil,
            color_blend: self.color_blend.clone(),
            multisample: self.multisample,
            viewport: self.viewport,
            push_constant_ranges: self.push_constant_ranges.clone(),
            descriptor: None,
            fallback_descriptor: self
                .descriptor
                .clone()
                .or_else(|| self.fallback_descriptor.clone()),
            built: None,
        }
    }

    fn check_settable(&self) -> Result<()> {
        if self.built.is_some() {
            lumen_bail!(
                SOURCE,
                "Cannot set options on pipeline '{}' after it has been used",
                self.name
            );
        }
        Ok(())
    }

    // ----- setters (legal until first use) -----

    pub fn set_vertex_shader(&mut self, shader: Arc<dyn ShaderModule>) -> Result<&mut Self> {
        self.check_settable()?;
        self.vertex_shader = Some(shader);
        Ok(self)
    }

    pub fn set_fragment_shader(&mut self, shader: Arc<dyn ShaderModule>) -> Result<&mut Self> {
        self.check_settable()?;
        self.fragment_shader = Some(shader);
        Ok(self)
    }

    pub fn set_vertex_layout(&mut self, layout: VertexLayout) -> Result<&mut Self> {
        self.check_settable()?;
        self.vertex_layout = layout;
        Ok(self)
    }

    pub fn set_topology(&mut self, topology: PrimitiveTopology) -> Result<&mut Self> {
        self.check_settable()?;
        self.topology = topology;
        Ok(self)
    }

    pub fn set_rasterization(&mut self, state: RasterizationState) -> Result<&mut Self> {
        self.check_settable()?;
        self.rasterization = state;
        Ok(self)
    }

    pub fn set_depth_stencil(&mut self, state: DepthStencilState) -> Result<&mut Self> {
        self.check_settable()?;
        self.depth_stencil = state;
        Ok(self)
    }

    /// One blend state applied to every attachment (replicated at
    /// finalization for multi-layer targets)
    pub fn set_blend_state(&mut self, state: ColorBlendState) -> Result<&mut Self> {
        self.check_settable()?;
        self.color_blend = vec![state];
        Ok(self)
    }

    /// Explicit per-attachment blend states
    pub fn set_blend_states(&mut self, states: Vec<ColorBlendState>) -> Result<&mut Self> {
        self.check_settable()?;
        self.color_blend = states;
        Ok(self)
    }

    pub fn set_multisample(&mut self, state: MultisampleState) -> Result<&mut Self> {
        self.check_settable()?;
        self.multisample = state;
        Ok(self)
    }

    /// Explicit viewport; defaults to the full render target
    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<&mut Self> {
        self.check_settable()?;
        self.viewport = Some(viewport);
        Ok(self)
    }

    pub fn set_push_constant_ranges(
        &mut self,
        ranges: Vec<PushConstantRange>,
    ) -> Result<&mut Self> {
        self.check_settable()?;
        self.push_constant_ranges = ranges;
        Ok(self)
    }

    pub fn set_render_target_descriptor(
        &mut self,
        descriptor: Arc<RenderTargetDescriptor>,
    ) -> Result<&mut Self> {
        self.check_settable()?;
        self.descriptor = Some(descriptor);
        Ok(self)
    }

    // ----- activation -----

    /// The descriptor finalization will resolve to, without finalizing
    pub fn resolved_descriptor(&self) -> Option<&Arc<RenderTargetDescriptor>> {
        self.descriptor.as_ref().or(self.fallback_descriptor.as_ref())
    }

    /// The backend pipeline; errors before finalization
    pub fn device_handle(&self) -> Result<&Arc<dyn DevicePipeline>> {
        match &self.built {
            Some(handle) => Ok(handle),
            None => Err(crate::lumen_err!(
                SOURCE,
                "Pipeline '{}' has not been finalized",
                self.name
            )),
        }
    }

    /// Union of the stages named by the push constant ranges
    pub fn push_constant_stages(&self) -> ShaderStages {
        self.push_constant_ranges
            .iter()
            .fold(ShaderStages::empty(), |acc, range| acc | range.stages)
    }

    /// Finalize if needed, bind on the frame's command list, and make
    /// this the frame's current pipeline
    pub fn bind(&mut self, frame: &mut Frame) -> Result<()> {
        self.finalize()?;
        let handle = match &self.built {
            Some(handle) => handle.clone(),
            // finalize() above either built the pipeline or returned Err
            None => unreachable!(),
        };
        let stages = self.push_constant_stages();
        frame.set_current_pipeline(&self.name, handle.clone(), stages);
        frame.command_list().bind_pipeline(&handle)
    }
}

impl Pipeline for GraphicsPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn finalize(&mut self) -> Result<()> {
        if self.built.is_some() {
            return Ok(());
        }

        let descriptor = match self.resolved_descriptor() {
            Some(descriptor) => descriptor.clone(),
            None => lumen_bail!(
                SOURCE,
                "Pipeline '{}' has no render target descriptor and no fallback",
                self.name
            ),
        };
        let vertex_shader = match &self.vertex_shader {
            Some(shader) => shader.clone(),
            None => lumen_bail!(SOURCE, "Pipeline '{}' has no vertex shader", self.name),
        };
        let fragment_shader = match &self.fragment_shader {
            Some(shader) => shader.clone(),
            None => lumen_bail!(SOURCE, "Pipeline '{}' has no fragment shader", self.name),
        };

        // A single blend state is replicated across the target's layers
        let layer_count = descriptor.layer_count() as usize;
        let mut color_blend = self.color_blend.clone();
        if color_blend.len() == 1 && layer_count > 1 {
            color_blend = vec![color_blend[0]; layer_count];
        }
        if color_blend.len() != layer_count {
            lumen_bail!(
                SOURCE,
                "Render target of pipeline '{}' uses {} layers, but the blend state only specifies values for {} attachments",
                self.name, layer_count, color_blend.len()
            );
        }

        let viewport = self.viewport.unwrap_or(Viewport {
            x: 0.0,
            y: 0.0,
            width: descriptor.width() as f32,
            height: descriptor.height() as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        let scissor = Rect2D {
            x: 0,
            y: 0,
            width: descriptor.width(),
            height: descriptor.height(),
        };

        let built = self.device.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: self.name.clone(),
            vertex_shader,
            fragment_shader,
            vertex_layout: self.vertex_layout.clone(),
            topology: self.topology,
            rasterization: self.rasterization,
            depth_stencil: self.depth_stencil,
            color_blend,
            multisample: self.multisample,
            viewport,
            scissor,
            push_constant_ranges: self.push_constant_ranges.clone(),
            render_pass: descriptor.device_handle().clone(),
        })?;
        self.built = Some(built);
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.built.is_some()
    }
}

// ===== COMPUTE =====

pub struct ComputePipeline {
    device: Arc<dyn GraphicsDevice>,
    name: String,
    shader: Option<Arc<dyn ShaderModule>>,
    push_constant_ranges: Vec<PushConstantRange>,
    built: Option<Arc<dyn DevicePipeline>>,
}

impl ComputePipeline {
    pub fn new(device: Arc<dyn GraphicsDevice>, name: &str) -> Self {
        Self {
            device,
            name: name.to_string(),
            shader: None,
            push_constant_ranges: Vec::new(),
            built: None,
        }
    }

    fn check_settable(&self) -> Result<()> {
        if self.built.is_some() {
            lumen_bail!(
                SOURCE,
                "Cannot set options on pipeline '{}' after it has been used",
                self.name
            );
        }
        Ok(())
    }

    pub fn set_shader(&mut self, shader: Arc<dyn ShaderModule>) -> Result<&mut Self> {
        self.check_settable()?;
        self.shader = Some(shader);
        Ok(self)
    }

    pub fn set_push_constant_ranges(
        &mut self,
        ranges: Vec<PushConstantRange>,
    ) -> Result<&mut Self> {
        self.check_settable()?;
        self.push_constant_ranges = ranges;
        Ok(self)
    }

    pub fn device_handle(&self) -> Result<&Arc<dyn DevicePipeline>> {
        match &self.built {
            Some(handle) => Ok(handle),
            None => Err(crate::lumen_err!(
                SOURCE,
                "Pipeline '{}' has not been finalized",
                self.name
            )),
        }
    }

    pub fn push_constant_stages(&self) -> ShaderStages {
        self.push_constant_ranges
            .iter()
            .fold(ShaderStages::empty(), |acc, range| acc | range.stages)
    }

    /// Finalize if needed, bind, and make this the frame's current pipeline
    pub fn bind(&mut self, frame: &mut Frame) -> Result<()> {
        self.finalize()?;
        let handle = match &self.built {
            Some(handle) => handle.clone(),
            None => unreachable!(),
        };
        let stages = self.push_constant_stages();
        frame.set_current_pipeline(&self.name, handle.clone(), stages);
        frame.command_list().bind_pipeline(&handle)
    }
}

impl Pipeline for ComputePipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn finalize(&mut self) -> Result<()> {
        if self.built.is_some() {
            return Ok(());
        }
        let shader = match &self.shader {
            Some(shader) => shader.clone(),
            None => lumen_bail!(SOURCE, "Pipeline '{}' has no compute shader", self.name),
        };
        let built = self.device.create_compute_pipeline(&ComputePipelineDesc {
            name: self.name.clone(),
            shader,
            push_constant_ranges: self.push_constant_ranges.clone(),
        })?;
        self.built = Some(built);
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.built.is_some()
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
