/// TargetManager - framebuffer ownership, blur helper sharing, and the
/// two-pass blur itself
///
/// Framebuffers live in a slot map. Every offscreen framebuffer gets a
/// shared blur helper, deduplicated by `(width, height, color format)`:
/// two targets with the same key blur through the same scratch images.
/// The helper is not locked; blurring two same-keyed targets from
/// different threads in the same frame is the caller's responsibility
/// to avoid.
///
/// The blur resources (fullscreen quad, shader set, samplers, kernel
/// cache) are built once per manager and shared by every blur call.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::device::{
    AddressMode, BindingDesc, BindingResource, BlurShaderSet, CompareOp, DepthStencilState,
    Filter, GraphicsDevice, ImageFormat, LoadOp, Sampler, SamplerDesc, Swapchain,
};
use crate::error::Result;
use crate::frame::Frame;
use crate::image::ImageStore;
use crate::lumen_bail;
use crate::vertex::{AttributeData, VertexManager};
use super::blur::{
    self, blur_push_constant_ranges, BlurPushConstants, MAX_BLUR_RADIUS,
};
use super::framebuffer::{BlurPipelines, Framebuffer};

const SOURCE: &str = "lumen3d::TargetManager";

slotmap::new_key_type! {
    /// Handle to a framebuffer owned by a `TargetManager`
    pub struct FramebufferKey;
}

/// Parameters of one blur invocation
#[derive(Debug, Clone, Copy)]
pub struct BlurParams {
    /// Taps per side, in `1..=MAX_BLUR_RADIUS`
    pub radius: u32,
    /// Target layer to blur
    pub layer: u32,
    /// Output scale factor
    pub multiplier: f32,
    /// Exclude taps behind the center's depth instead of mixing them in
    pub depth_gated: bool,
}

impl Default for BlurParams {
    fn default() -> Self {
        Self {
            radius: 4,
            layer: 0,
            multiplier: 1.0,
            depth_gated: false,
        }
    }
}

/// Shared state every blur call uses
struct BlurResources {
    quad: VertexManager,
    shaders: BlurShaderSet,
    linear_sampler: Arc<dyn Sampler>,
    nearest_sampler: Arc<dyn Sampler>,
    /// Packed kernels memoized by radius
    kernels: FxHashMap<u32, [[u32; 4]; 7]>,
}

pub struct TargetManager {
    device: Arc<dyn GraphicsDevice>,
    framebuffers: SlotMap<FramebufferKey, Framebuffer>,
    /// Blur helpers deduplicated by (width, height, color format)
    helpers: FxHashMap<(u32, u32, ImageFormat), FramebufferKey>,
    blur_resources: Option<BlurResources>,
}

impl TargetManager {
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Self {
        Self {
            device,
            framebuffers: SlotMap::with_key(),
            helpers: FxHashMap::default(),
            blur_resources: None,
        }
    }

    // ===== ACCESS =====

    pub fn get(&self, key: FramebufferKey) -> Result<&Framebuffer> {
        match self.framebuffers.get(key) {
            Some(framebuffer) => Ok(framebuffer),
            None => Err(crate::lumen_err!(SOURCE, "Unknown framebuffer key")),
        }
    }

    pub fn get_mut(&mut self, key: FramebufferKey) -> Result<&mut Framebuffer> {
        match self.framebuffers.get_mut(key) {
            Some(framebuffer) => Ok(framebuffer),
            None => Err(crate::lumen_err!(SOURCE, "Unknown framebuffer key")),
        }
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    // ===== CREATION =====

    /// Create an offscreen framebuffer and wire up its shared blur
    /// helper, creating the helper on first use of its key.
    #[allow(clippy::too_many_arguments)]
    pub fn create_framebuffer(
        &mut self,
        images: &mut ImageStore,
        name: &str,
        width: u32,
        height: u32,
        layer_count: u32,
        color_format: ImageFormat,
        copy_count: u32,
    ) -> Result<FramebufferKey> {
        let helper = self.helper_for(images, width, height, color_format, copy_count)?;
        let mut framebuffer = Framebuffer::new(
            self.device.clone(),
            images,
            name,
            width,
            height,
            layer_count,
            color_format,
            copy_count,
        )?;
        framebuffer.helper = Some(helper);
        Ok(self.framebuffers.insert(framebuffer))
    }

    /// Create the default framebuffer over the swapchain. It gets no
    /// blur helper; it cannot be sampled.
    pub fn create_default_framebuffer(
        &mut self,
        images: &mut ImageStore,
        swapchain: &dyn Swapchain,
    ) -> Result<FramebufferKey> {
        let framebuffer = Framebuffer::new_default(self.device.clone(), images, swapchain)?;
        Ok(self.framebuffers.insert(framebuffer))
    }

    /// The shared helper for a (width, height, format) key.
    /// Helpers are single-layer and have no helper of their own.
    fn helper_for(
        &mut self,
        images: &mut ImageStore,
        width: u32,
        height: u32,
        color_format: ImageFormat,
        copy_count: u32,
    ) -> Result<FramebufferKey> {
        if let Some(key) = self.helpers.get(&(width, height, color_format)) {
            return Ok(*key);
        }
        let helper = Framebuffer::new(
            self.device.clone(),
            images,
            &format!("$blur_helper_{}x{}_{:?}", width, height, color_format),
            width,
            height,
            1,
            color_format,
            copy_count,
        )?;
        let key = self.framebuffers.insert(helper);
        self.helpers.insert((width, height, color_format), key);
        Ok(key)
    }

    // ===== REALIZATION =====

    /// Realize every framebuffer and build the shared blur resources.
    /// The backing images must already be uploaded; no-op on repeat.
    pub fn push_to_gpu(&mut self, images: &ImageStore) -> Result<()> {
        for (_, framebuffer) in self.framebuffers.iter_mut() {
            framebuffer.realize(images)?;
        }
        if self.blur_resources.is_none() && !self.framebuffers.is_empty() {
            self.blur_resources = Some(Self::make_blur_resources(&self.device)?);
        }
        Ok(())
    }

    fn make_blur_resources(device: &Arc<dyn GraphicsDevice>) -> Result<BlurResources> {
        let mut quad = VertexManager::new(
            device.clone(),
            vec![ImageFormat::R32G32_SFLOAT],
        )?;
        let corners = [
            glam::Vec2::new(-1.0, -1.0),
            glam::Vec2::new(1.0, -1.0),
            glam::Vec2::new(1.0, 1.0),
            glam::Vec2::new(-1.0, 1.0),
        ];
        quad.add_indexed_data(&[0, 1, 2, 2, 3, 0], &[AttributeData::Vec2(&corners)])?;
        quad.push_to_gpu()?;

        let shaders = device.blur_shaders()?;
        let linear_sampler = device.create_sampler(&SamplerDesc {
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            mipmap_filter: Filter::Nearest,
            address_mode: AddressMode::ClampToEdge,
        })?;
        let nearest_sampler = device.create_sampler(&SamplerDesc {
            min_filter: Filter::Nearest,
            mag_filter: Filter::Nearest,
            mipmap_filter: Filter::Nearest,
            address_mode: AddressMode::ClampToEdge,
        })?;

        Ok(BlurResources {
            quad,
            shaders,
            linear_sampler,
            nearest_sampler,
            kernels: FxHashMap::default(),
        })
    }

    // ===== BLUR =====

    /// Gaussian-blur one layer of `target` in place: a horizontal pass
    /// into the shared helper, then a vertical pass back into the
    /// target's most recently completed copy. Binds its own quad
    /// geometry; `restore` is re-bound afterwards when given.
    pub fn blur(
        &mut self,
        target: FramebufferKey,
        frame: &mut Frame,
        images: &mut ImageStore,
        params: BlurParams,
        restore: Option<&VertexManager>,
    ) -> Result<()> {
        if params.radius < 1 || params.radius > MAX_BLUR_RADIUS {
            lumen_bail!(
                SOURCE,
                "Blur radius {} is out of range (1..={})",
                params.radius, MAX_BLUR_RADIUS
            );
        }

        let helper_key = {
            let framebuffer = self.get(target)?;
            if framebuffer.is_default() {
                lumen_bail!(SOURCE, "The default framebuffer cannot be blurred");
            }
            if framebuffer.is_recording() {
                lumen_bail!(
                    SOURCE,
                    "Cannot blur framebuffer '{}' while its render pass is recording",
                    framebuffer.name()
                );
            }
            if params.layer >= framebuffer.layer_count() {
                lumen_bail!(
                    SOURCE,
                    "Framebuffer '{}' has no layer {} ({} layers)",
                    framebuffer.name(), params.layer, framebuffer.layer_count()
                );
            }
            match framebuffer.helper {
                Some(key) => key,
                None => lumen_bail!(
                    SOURCE,
                    "Framebuffer '{}' has no blur helper",
                    framebuffer.name()
                ),
            }
        };

        let resources = match self.blur_resources.as_mut() {
            Some(resources) => resources,
            None => lumen_bail!(SOURCE, "TargetManager has not been pushed to the GPU"),
        };
        let packed_weights = *resources
            .kernels
            .entry(params.radius)
            .or_insert_with(|| blur::pack_kernel(params.radius));

        let [target_fb, helper_fb] =
            match self.framebuffers.get_disjoint_mut([target, helper_key]) {
                Some(pair) => pair,
                None => lumen_bail!(SOURCE, "Unknown framebuffer key"),
            };
        let source_copy = match target_fb.completed_index() {
            Some(copy) => copy,
            None => lumen_bail!(
                SOURCE,
                "Framebuffer '{}' has not completed a render pass yet",
                target_fb.name()
            ),
        };
        if helper_fb.is_recording() {
            lumen_bail!(
                SOURCE,
                "Blur helper '{}' is already recording a render pass",
                helper_fb.name()
            );
        }

        if target_fb.blur_pipelines.is_none() {
            let pipelines =
                Self::make_blur_pipelines(&self.device, target_fb, helper_fb, resources)?;
            target_fb.blur_pipelines = Some(pipelines);
        }

        let iterations = blur::iterations_for_radius(params.radius);
        let width = target_fb.width();
        let height = target_fb.height();

        // ----- horizontal pass into the helper -----

        let (source_color, source_depth) = {
            let color = images.get(target_fb.color_key(source_copy)?)?;
            let depth_key = {
                // The completed copy's depth; same index as color
                target_fb.current_depth_image()?
            };
            (color.view()?.clone(), images.get(depth_key)?.view()?.clone())
        };

        helper_fb.begin_one_layer_pass_on_copy(
            frame,
            images,
            0,
            LoadOp::Discard,
            source_copy,
        )?;
        {
            let pipelines = match target_fb.blur_pipelines.as_mut() {
                Some(pipelines) => pipelines,
                None => unreachable!(),
            };
            let pipeline = if params.depth_gated {
                &mut pipelines.depth_write_helper
            } else {
                &mut pipelines.plain
            };
            pipeline.bind(frame)?;
            let handle = pipeline.device_handle()?.clone();
            let group = self.device.create_binding_group(
                &handle,
                0,
                &[
                    BindingDesc {
                        binding: 0,
                        resource: BindingResource::Sampler(resources.linear_sampler.clone()),
                    },
                    BindingDesc {
                        binding: 1,
                        resource: BindingResource::SampledImage(source_color),
                    },
                    BindingDesc {
                        binding: 2,
                        resource: BindingResource::Sampler(resources.nearest_sampler.clone()),
                    },
                    BindingDesc {
                        binding: 3,
                        resource: BindingResource::SampledImage(source_depth),
                    },
                ],
            )?;
            frame.command_list().bind_binding_group(&handle, 0, &group)?;
            resources.quad.bind(frame)?;

            let constants = BlurPushConstants {
                packed_weights,
                delta: [1.0 / width as f32, 0.0],
                multiplier: 1.0,
                layer_and_iterations: blur::pack_layer_and_iterations(params.layer, iterations),
            };
            frame.push_constants(0, bytemuck::bytes_of(&constants))?;
            frame.command_list().draw_indexed(6, 0, 0)?;
        }
        helper_fb.end_render_pass(frame, images)?;

        // ----- vertical pass back into the target -----

        let (helper_color, helper_depth) = {
            let color = images.get(helper_fb.color_key(source_copy)?)?;
            let depth_key = helper_fb.current_depth_image()?;
            (color.view()?.clone(), images.get(depth_key)?.view()?.clone())
        };

        target_fb.begin_one_layer_pass_on_copy(
            frame,
            images,
            params.layer,
            LoadOp::Keep,
            source_copy,
        )?;
        {
            let pipelines = match target_fb.blur_pipelines.as_mut() {
                Some(pipelines) => pipelines,
                None => unreachable!(),
            };
            let pipeline = if params.depth_gated {
                &mut pipelines.depth_write_target
            } else {
                &mut pipelines.plain
            };
            pipeline.bind(frame)?;
            let handle = pipeline.device_handle()?.clone();
            let group = self.device.create_binding_group(
                &handle,
                0,
                &[
                    BindingDesc {
                        binding: 0,
                        resource: BindingResource::Sampler(resources.linear_sampler.clone()),
                    },
                    BindingDesc {
                        binding: 1,
                        resource: BindingResource::SampledImage(helper_color),
                    },
                    BindingDesc {
                        binding: 2,
                        resource: BindingResource::Sampler(resources.nearest_sampler.clone()),
                    },
                    BindingDesc {
                        binding: 3,
                        resource: BindingResource::SampledImage(helper_depth),
                    },
                ],
            )?;
            frame.command_list().bind_binding_group(&handle, 0, &group)?;
            resources.quad.bind(frame)?;

            let constants = BlurPushConstants {
                packed_weights,
                delta: [0.0, 1.0 / height as f32],
                multiplier: params.multiplier,
                layer_and_iterations: blur::pack_layer_and_iterations(0, iterations),
            };
            frame.push_constants(0, bytemuck::bytes_of(&constants))?;
            frame.command_list().draw_indexed(6, 0, 0)?;
        }
        target_fb.end_render_pass(frame, images)?;

        if let Some(vertex_manager) = restore {
            vertex_manager.bind(frame)?;
        }
        Ok(())
    }

    /// The three pipelines of one target's blur. The plain pipeline is
    /// compatible with both directions (helper and target passes share
    /// formats); the depth-gated pair differ only in depth writes.
    fn make_blur_pipelines(
        device: &Arc<dyn GraphicsDevice>,
        target: &Framebuffer,
        helper: &Framebuffer,
        resources: &BlurResources,
    ) -> Result<BlurPipelines> {
        let no_depth = DepthStencilState {
            depth_test_enable: false,
            depth_write_enable: false,
            depth_compare_op: CompareOp::Always,
        };
        let write_depth = DepthStencilState {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: CompareOp::Always,
        };

        let mut plain =
            crate::pipeline::GraphicsPipeline::new(device.clone(), &format!("{}/blur", target.name()));
        plain
            .set_vertex_shader(resources.shaders.fullscreen_vertex.clone())?
            .set_fragment_shader(resources.shaders.blur_fragment.clone())?
            .set_vertex_layout(resources.quad.vertex_layout())?
            .set_depth_stencil(no_depth)?
            .set_push_constant_ranges(blur_push_constant_ranges())?
            .set_render_target_descriptor(helper.descriptors().single_discard.clone())?;

        let mut depth_write_helper = plain.clone_pipeline(&format!("{}/blur_dd_h", target.name()));
        depth_write_helper
            .set_fragment_shader(resources.shaders.blur_depth_gated_fragment.clone())?
            .set_depth_stencil(write_depth)?
            .set_render_target_descriptor(helper.descriptors().single_discard.clone())?;

        let mut depth_write_target = plain.clone_pipeline(&format!("{}/blur_dd_v", target.name()));
        depth_write_target
            .set_fragment_shader(resources.shaders.blur_depth_gated_fragment.clone())?
            .set_depth_stencil(no_depth)?
            .set_render_target_descriptor(target.descriptors().single_keep.clone())?;

        Ok(BlurPipelines {
            plain,
            depth_write_helper,
            depth_write_target,
        })
    }
}

#[cfg(test)]
#[path = "target_manager_tests.rs"]
mod tests;
