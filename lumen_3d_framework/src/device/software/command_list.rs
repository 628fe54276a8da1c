/// Command list of the software device
///
/// Commands execute eagerly at record time. Submission order equals
/// record order for a single list, and the core's upload and frame
/// paths submit lists in the order they record them, so eager execution
/// observes the same state a deferred GPU would.
///
/// Draws run only when the bound pipeline's fragment stage carries a
/// host evaluator (the blur stages do); SPIR-V-only pipelines record
/// their draws as no-ops. A draw invokes the evaluator once per texel
/// of the pass's render area, which is exact for the full-screen passes
/// this device exists to test.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::device::{
    BindingGroup, BindingResource, ClearValue, CommandList, DeviceBuffer, DeviceFramebuffer,
    DeviceImage, DeviceImageView, DevicePipeline, DeviceRenderPass, FragmentInput,
    FragmentResources, ImageAspect, ImageLayout, ImageRegion, IndexType, Rect2D, ShaderStages,
    StagingBuffer,
};
use crate::error::Result;
use crate::lumen_bail;
use super::resources::{
    decode_texels, mip_dim, software_framebuffer, software_image, software_pipeline,
    software_view, SoftwarePipelineKind, SoftwareShader, SoftwareStagingBuffer,
};

const SOURCE: &str = "lumen3d::SoftwareCommandList";

struct PassState {
    color_views: Vec<Arc<dyn DeviceImageView>>,
    depth_view: Option<Arc<dyn DeviceImageView>>,
    width: u32,
    height: u32,
}

pub(super) struct SoftwareCommandList {
    recording: bool,
    pass: Option<PassState>,
    pipeline: Option<Arc<dyn DevicePipeline>>,
    groups: FxHashMap<u32, Arc<dyn BindingGroup>>,
    push_constants: Vec<u8>,
}

impl SoftwareCommandList {
    pub fn new() -> Self {
        Self {
            recording: false,
            pass: None,
            pipeline: None,
            groups: FxHashMap::default(),
            push_constants: Vec::new(),
        }
    }

    /// Write one texel through a single-layer attachment view
    fn write_texel(
        view: &Arc<dyn DeviceImageView>,
        x: u32,
        y: u32,
        value: [f32; 4],
    ) -> Result<()> {
        let view = software_view(view)?;
        let image = software_image(&view.image)?;
        let mip = view.desc.base_mip;
        let width = mip_dim(image.desc.width, mip);
        let mut texels = match image.texels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let layer = view.desc.base_layer as usize;
        texels[layer][mip as usize][(y * width + x) as usize] = value;
        Ok(())
    }

    /// Fill every texel a view covers
    fn fill_view(view: &Arc<dyn DeviceImageView>, value: [f32; 4]) -> Result<()> {
        let view = software_view(view)?;
        let image = software_image(&view.image)?;
        let mut texels = match image.texels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for layer in view.desc.base_layer..view.desc.base_layer + view.desc.layer_count {
            for mip in view.desc.base_mip..view.desc.base_mip + view.desc.mip_count {
                for texel in texels[layer as usize][mip as usize].iter_mut() {
                    *texel = value;
                }
            }
        }
        Ok(())
    }

    /// Run the bound host fragment stage over the whole render area
    fn execute_fullscreen_draw(&mut self) -> Result<()> {
        let pass = match &self.pass {
            Some(pass) => pass,
            None => lumen_bail!(SOURCE, "Draw recorded outside a render pass"),
        };
        let pipeline = match &self.pipeline {
            Some(pipeline) => software_pipeline(pipeline)?,
            None => lumen_bail!(SOURCE, "Draw recorded with no pipeline bound"),
        };
        let desc = match &pipeline.kind {
            SoftwarePipelineKind::Graphics(desc) => desc,
            SoftwarePipelineKind::Compute(_) => {
                lumen_bail!(SOURCE, "Draw recorded with a compute pipeline bound")
            }
        };

        let fragment = match desc.fragment_shader.as_any().downcast_ref::<SoftwareShader>() {
            Some(shader) => shader,
            None => lumen_bail!(SOURCE, "Foreign shader passed to the software device"),
        };
        let host = match &fragment.host {
            Some(host) => host.clone(),
            // SPIR-V pipelines cannot run on this device; their draws
            // leave the attachments untouched.
            None => return Ok(()),
        };

        let resources = match self.groups.get(&0) {
            Some(group) => match group.as_any().downcast_ref::<super::resources::SoftwareBindingGroup>() {
                Some(group) => GroupResources { bindings: &group.bindings },
                None => lumen_bail!(SOURCE, "Foreign binding group passed to the software device"),
            },
            None => lumen_bail!(SOURCE, "Draw recorded with no binding group on set 0"),
        };

        let depth_write = desc.depth_stencil.depth_write_enable;
        for y in 0..pass.height {
            for x in 0..pass.width {
                let input = FragmentInput {
                    u: (x as f32 + 0.5) / pass.width as f32,
                    v: (y as f32 + 0.5) / pass.height as f32,
                    push_constants: &self.push_constants,
                    resources: &resources,
                };
                let output = host(&input);
                for view in &pass.color_views {
                    Self::write_texel(view, x, y, output.color)?;
                }
                if depth_write {
                    if let (Some(depth), Some(view)) = (output.depth, &pass.depth_view) {
                        Self::write_texel(view, x, y, [depth, 0.0, 0.0, 0.0])?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Set-0 bindings exposed to a host fragment stage. Sampling is nearest
/// with edge clamping, which coincides with linear filtering at texel
/// centers (exactly where the blur taps land).
struct GroupResources<'a> {
    bindings: &'a [crate::device::BindingDesc],
}

impl GroupResources<'_> {
    fn view_at(&self, binding: u32) -> Option<&Arc<dyn DeviceImageView>> {
        self.bindings.iter().find_map(|desc| {
            if desc.binding != binding {
                return None;
            }
            match &desc.resource {
                BindingResource::SampledImage(view) => Some(view),
                _ => None,
            }
        })
    }
}

impl FragmentResources for GroupResources<'_> {
    fn sample(&self, binding: u32, layer: u32, u: f32, v: f32) -> [f32; 4] {
        let view = match self.view_at(binding) {
            Some(view) => view,
            None => return [0.0; 4],
        };
        let view = match software_view(view) {
            Ok(view) => view,
            Err(_) => return [0.0; 4],
        };
        let image = match software_image(&view.image) {
            Ok(image) => image,
            Err(_) => return [0.0; 4],
        };

        let layer = view.desc.base_layer + layer.min(view.desc.layer_count.saturating_sub(1));
        let mip = view.desc.base_mip;
        let width = mip_dim(image.desc.width, mip);
        let height = mip_dim(image.desc.height, mip);
        let x = (u * width as f32).floor().clamp(0.0, (width - 1) as f32) as u32;
        let y = (v * height as f32).floor().clamp(0.0, (height - 1) as f32) as u32;

        let texels = match image.texels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        texels[layer as usize][mip as usize][(y * width + x) as usize]
    }

    fn source_size(&self, binding: u32) -> (u32, u32) {
        let Some(view) = self.view_at(binding) else {
            return (0, 0);
        };
        let Ok(view) = software_view(view) else {
            return (0, 0);
        };
        let Ok(image) = software_image(&view.image) else {
            return (0, 0);
        };
        let mip = view.desc.base_mip;
        (mip_dim(image.desc.width, mip), mip_dim(image.desc.height, mip))
    }
}

impl CommandList for SoftwareCommandList {
    fn begin(&mut self) -> Result<()> {
        if self.recording {
            lumen_bail!(SOURCE, "begin() called while already recording");
        }
        self.recording = true;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if !self.recording {
            lumen_bail!(SOURCE, "end() called while not recording");
        }
        if self.pass.is_some() {
            lumen_bail!(SOURCE, "end() called with a render pass still open");
        }
        self.recording = false;
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        _render_pass: &Arc<dyn DeviceRenderPass>,
        framebuffer: &Arc<dyn DeviceFramebuffer>,
        _render_area: Rect2D,
        clear_values: &[ClearValue],
    ) -> Result<()> {
        if self.pass.is_some() {
            lumen_bail!(SOURCE, "begin_render_pass() called with a pass already open");
        }
        let framebuffer = software_framebuffer(framebuffer)?;

        // Clear values arrive colors-first, depth last, only when the
        // pass's load op asks for a clear.
        if !clear_values.is_empty() {
            for (view, value) in framebuffer.color_views.iter().zip(clear_values) {
                if let ClearValue::Color(color) = value {
                    Self::fill_view(view, *color)?;
                }
            }
            if let (Some(view), Some(ClearValue::DepthStencil { depth, .. })) =
                (&framebuffer.depth_view, clear_values.last())
            {
                Self::fill_view(view, [*depth, 0.0, 0.0, 0.0])?;
            }
        }

        self.pass = Some(PassState {
            color_views: framebuffer.color_views.clone(),
            depth_view: framebuffer.depth_view.clone(),
            width: framebuffer.width,
            height: framebuffer.height,
        });
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        if self.pass.take().is_none() {
            lumen_bail!(SOURCE, "end_render_pass() called with no pass open");
        }
        Ok(())
    }

    fn image_barrier(
        &mut self,
        image: &Arc<dyn DeviceImage>,
        _aspect: ImageAspect,
        region: ImageRegion,
        _old_layout: ImageLayout,
        _new_layout: ImageLayout,
    ) -> Result<()> {
        // Execution is eager, so a barrier only validates its region.
        let image = software_image(image)?;
        if region.base_layer + region.layer_count > image.desc.layer_count
            || region.base_mip + region.mip_count > image.desc.mip_count
        {
            lumen_bail!(
                SOURCE,
                "Barrier region exceeds image '{}' ({} layers, {} mips)",
                image.desc.name, image.desc.layer_count, image.desc.mip_count
            );
        }
        Ok(())
    }

    fn copy_buffer_to_image(
        &mut self,
        src: &Arc<dyn StagingBuffer>,
        dst: &Arc<dyn DeviceImage>,
        _aspect: ImageAspect,
        layer: u32,
        mip: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let staging = match src.as_any().downcast_ref::<SoftwareStagingBuffer>() {
            Some(staging) => staging,
            None => lumen_bail!(SOURCE, "Foreign staging buffer passed to the software device"),
        };
        let image = software_image(dst)?;

        let bytes = {
            let guard = match staging.data.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };
        let decoded = decode_texels(image.desc.format, &bytes, (width * height) as usize)?;

        let mut texels = match image.texels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let target = &mut texels[layer as usize][mip as usize];
        if decoded.len() != target.len() {
            lumen_bail!(
                SOURCE,
                "Upload of {} texels does not match mip {} of image '{}' ({} texels)",
                decoded.len(), mip, image.desc.name, target.len()
            );
        }
        target.copy_from_slice(&decoded);
        Ok(())
    }

    fn blit_image_mip(
        &mut self,
        image: &Arc<dyn DeviceImage>,
        layer: u32,
        src_mip: u32,
        src_width: u32,
        src_height: u32,
        dst_mip: u32,
        dst_width: u32,
        dst_height: u32,
    ) -> Result<()> {
        let image = software_image(image)?;
        let mut texels = match image.texels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let source = texels[layer as usize][src_mip as usize].clone();

        // 2x2 box filter with edge clamping
        let destination = &mut texels[layer as usize][dst_mip as usize];
        for dy in 0..dst_height {
            for dx in 0..dst_width {
                let sx0 = (dx * 2).min(src_width - 1);
                let sy0 = (dy * 2).min(src_height - 1);
                let sx1 = (sx0 + 1).min(src_width - 1);
                let sy1 = (sy0 + 1).min(src_height - 1);

                let mut sum = [0.0f32; 4];
                for (sy, sx) in [(sy0, sx0), (sy0, sx1), (sy1, sx0), (sy1, sx1)] {
                    let texel = source[(sy * src_width + sx) as usize];
                    for channel in 0..4 {
                        sum[channel] += texel[channel];
                    }
                }
                for channel in sum.iter_mut() {
                    *channel *= 0.25;
                }
                destination[(dy * dst_width + dx) as usize] = sum;
            }
        }
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn DevicePipeline>) -> Result<()> {
        self.pipeline = Some(pipeline.clone());
        Ok(())
    }

    fn bind_binding_group(
        &mut self,
        _pipeline: &Arc<dyn DevicePipeline>,
        set: u32,
        group: &Arc<dyn BindingGroup>,
    ) -> Result<()> {
        self.groups.insert(set, group.clone());
        Ok(())
    }

    fn bind_vertex_buffers(&mut self, _buffers: &[Arc<dyn DeviceBuffer>]) -> Result<()> {
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        _buffer: &Arc<dyn DeviceBuffer>,
        _index_type: IndexType,
    ) -> Result<()> {
        Ok(())
    }

    fn push_constants(&mut self, _stages: ShaderStages, offset: u32, data: &[u8]) -> Result<()> {
        let end = offset as usize + data.len();
        if self.push_constants.len() < end {
            self.push_constants.resize(end, 0);
        }
        self.push_constants[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn draw(&mut self, _vertex_count: u32, _first_vertex: u32) -> Result<()> {
        self.execute_fullscreen_draw()
    }

    fn draw_indexed(
        &mut self,
        _index_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
    ) -> Result<()> {
        self.execute_fullscreen_draw()
    }

    fn dispatch(&mut self, _groups_x: u32, _groups_y: u32, _groups_z: u32) -> Result<()> {
        Ok(())
    }

    fn begin_debug_region(&mut self, _name: &str) {}

    fn end_debug_region(&mut self) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
