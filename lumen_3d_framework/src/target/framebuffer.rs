/// Framebuffer - a logical render target with one physical copy per
/// frame in flight
///
/// An offscreen framebuffer owns color and depth images in the
/// `ImageStore`, six render-target descriptors (all-layers and
/// single-layer, each in discard/keep/clear flavors), and the blur
/// pipelines built against its shared helper. The default framebuffer
/// wraps swapchain images instead and only allocates depth; it cannot
/// be sampled or blurred.
///
/// Render passes are a two-state machine per framebuffer: exactly one
/// pass may be recording at a time, and the copy it renders into is
/// the frame's swapchain image index. Ending a pass records which copy
/// completed, moves the attachments to shader-read-only, and (unless
/// the no-mipmaps variant is used) regenerates the color mip chain
/// with per-layer blits.

use std::sync::Arc;

use crate::device::{
    ClearValue, DeviceFramebuffer, DeviceImage, DeviceImageView, FramebufferDesc,
    GraphicsDevice, ImageAspect, ImageFormat, ImageLayout, ImageUsage, ImageViewDesc,
    ImageViewKind, LoadOp, Rect2D, Swapchain,
};
use crate::error::Result;
use crate::frame::Frame;
use crate::image::{scale, ImageKey, ImageStore};
use crate::lumen_bail;
use crate::pipeline::{GraphicsPipeline, RenderTargetDescriptor};
use super::target_manager::FramebufferKey;

const SOURCE: &str = "lumen3d::Framebuffer";

/// Most layers a render target may have (each layer becomes its own
/// color attachment)
pub const MAX_TARGET_LAYERS: u32 = 8;

/// Depth format every framebuffer uses
pub const TARGET_DEPTH_FORMAT: ImageFormat = ImageFormat::D32_SFLOAT;

/// The six descriptors of one framebuffer: full-target and single-layer
/// passes, each with its load behavior
pub struct TargetDescriptors {
    pub all_discard: Arc<RenderTargetDescriptor>,
    pub all_keep: Arc<RenderTargetDescriptor>,
    pub all_clear: Arc<RenderTargetDescriptor>,
    pub single_discard: Arc<RenderTargetDescriptor>,
    pub single_keep: Arc<RenderTargetDescriptor>,
    pub single_clear: Arc<RenderTargetDescriptor>,
}

/// The three pipelines one framebuffer's blur uses: the plain pass
/// (compatible with both blur directions), the depth-gated horizontal
/// pass writing reference depth into the helper, and the depth-gated
/// vertical pass writing back into the target.
pub(crate) struct BlurPipelines {
    pub plain: GraphicsPipeline,
    pub depth_write_helper: GraphicsPipeline,
    pub depth_write_target: GraphicsPipeline,
}

/// Backend framebuffers of one copy
struct RealizedCopy {
    all_layers: Arc<dyn DeviceFramebuffer>,
    per_layer: Vec<Arc<dyn DeviceFramebuffer>>,
}

struct ActivePass {
    copy: u32,
    /// `None` for an all-layers pass
    layer: Option<u32>,
}

enum Attachments {
    Offscreen {
        /// One color image per copy
        color: Vec<ImageKey>,
        /// One single-layer depth image per copy
        depth: Vec<ImageKey>,
    },
    Default {
        swapchain_images: Vec<Arc<dyn DeviceImage>>,
        depth: Vec<ImageKey>,
    },
}

pub struct Framebuffer {
    device: Arc<dyn GraphicsDevice>,
    name: String,
    width: u32,
    height: u32,
    layer_count: u32,
    color_format: ImageFormat,
    copy_count: u32,
    attachments: Attachments,
    descriptors: TargetDescriptors,
    realized: Vec<RealizedCopy>,
    active: Option<ActivePass>,
    /// Copy index of the most recently completed render pass
    completed: Option<u32>,
    /// Shared blur helper, assigned by the target manager
    pub(crate) helper: Option<FramebufferKey>,
    pub(crate) blur_pipelines: Option<BlurPipelines>,
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer").field("name", &self.name).finish_non_exhaustive()
    }
}

fn make_descriptors(
    device: &Arc<dyn GraphicsDevice>,
    name: &str,
    color_format: ImageFormat,
    layer_count: u32,
    width: u32,
    height: u32,
    presentation: bool,
) -> Result<TargetDescriptors> {
    let make = |suffix: &str, layers: u32, load_op: LoadOp| {
        RenderTargetDescriptor::new(
            device,
            &format!("{}/{}", name, suffix),
            color_format,
            Some(TARGET_DEPTH_FORMAT),
            layers,
            crate::device::SampleCount::S1,
            load_op,
            width,
            height,
            presentation,
        )
    };
    Ok(TargetDescriptors {
        all_discard: make("all_discard", layer_count, LoadOp::Discard)?,
        all_keep: make("all_keep", layer_count, LoadOp::Keep)?,
        all_clear: make("all_clear", layer_count, LoadOp::Clear)?,
        single_discard: make("single_discard", 1, LoadOp::Discard)?,
        single_keep: make("single_keep", 1, LoadOp::Keep)?,
        single_clear: make("single_clear", 1, LoadOp::Clear)?,
    })
}

impl Framebuffer {
    /// Create an offscreen framebuffer with `copy_count` physical copies.
    /// Layer counts above `MAX_TARGET_LAYERS` are clamped with a warning.
    pub fn new(
        device: Arc<dyn GraphicsDevice>,
        images: &mut ImageStore,
        name: &str,
        width: u32,
        height: u32,
        layer_count: u32,
        color_format: ImageFormat,
        copy_count: u32,
    ) -> Result<Self> {
        if copy_count == 0 {
            lumen_bail!(SOURCE, "Framebuffer '{}' needs at least one copy", name);
        }
        let mut layer_count = layer_count.max(1);
        if layer_count > MAX_TARGET_LAYERS {
            crate::lumen_warn!(
                SOURCE,
                "Framebuffer '{}' asked for {} layers, clamping to {}",
                name, layer_count, MAX_TARGET_LAYERS
            );
            layer_count = MAX_TARGET_LAYERS;
        }

        let mut color = Vec::with_capacity(copy_count as usize);
        let mut depth = Vec::with_capacity(copy_count as usize);
        for _ in 0..copy_count {
            color.push(images.create_uninitialized(
                width,
                height,
                layer_count,
                color_format,
                ImageUsage::COLOR_ATTACHMENT
                    | ImageUsage::SAMPLED
                    | ImageUsage::TRANSFER_SRC
                    | ImageUsage::TRANSFER_DST,
                ImageAspect::Color,
                ImageViewKind::D2Array,
            )?);
            depth.push(images.create_uninitialized(
                width,
                height,
                1,
                TARGET_DEPTH_FORMAT,
                ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SAMPLED,
                ImageAspect::Depth,
                ImageViewKind::D2Array,
            )?);
        }

        let descriptors =
            make_descriptors(&device, name, color_format, layer_count, width, height, false)?;

        Ok(Self {
            device,
            name: name.to_string(),
            width,
            height,
            layer_count,
            color_format,
            copy_count,
            attachments: Attachments::Offscreen { color, depth },
            descriptors,
            realized: Vec::new(),
            active: None,
            completed: None,
            helper: None,
            blur_pipelines: None,
        })
    }

    /// Create the default framebuffer over a swapchain: one copy per
    /// swapchain image, depth allocated here, color borrowed from the
    /// swapchain.
    pub fn new_default(
        device: Arc<dyn GraphicsDevice>,
        images: &mut ImageStore,
        swapchain: &dyn Swapchain,
    ) -> Result<Self> {
        let width = swapchain.width();
        let height = swapchain.height();
        let copy_count = swapchain.image_count();

        let mut depth = Vec::with_capacity(copy_count as usize);
        for _ in 0..copy_count {
            depth.push(images.create_uninitialized(
                width,
                height,
                1,
                TARGET_DEPTH_FORMAT,
                ImageUsage::DEPTH_STENCIL_ATTACHMENT,
                ImageAspect::Depth,
                ImageViewKind::D2Array,
            )?);
        }

        let descriptors = make_descriptors(
            &device,
            "$default",
            swapchain.format(),
            1,
            width,
            height,
            true,
        )?;

        Ok(Self {
            device,
            name: "$default".to_string(),
            width,
            height,
            layer_count: 1,
            color_format: swapchain.format(),
            copy_count,
            attachments: Attachments::Default {
                swapchain_images: swapchain.images(),
                depth,
            },
            descriptors,
            realized: Vec::new(),
            active: None,
            completed: None,
            helper: None,
            blur_pipelines: None,
        })
    }

    // ===== ACCESSORS =====

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    pub fn color_format(&self) -> ImageFormat {
        self.color_format
    }

    pub fn copy_count(&self) -> u32 {
        self.copy_count
    }

    pub fn is_default(&self) -> bool {
        matches!(self.attachments, Attachments::Default { .. })
    }

    pub fn descriptors(&self) -> &TargetDescriptors {
        &self.descriptors
    }

    /// True while a render pass is recording into this framebuffer
    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Copy index of the most recently completed render pass, if any
    pub fn completed_index(&self) -> Option<u32> {
        self.completed
    }

    /// Color image of the most recently completed copy.
    /// Errors on the default framebuffer and before any completed pass.
    pub fn current_image(&self) -> Result<ImageKey> {
        let copy = self.completed_copy()?;
        match &self.attachments {
            Attachments::Offscreen { color, .. } => Ok(color[copy as usize]),
            Attachments::Default { .. } => unreachable!(),
        }
    }

    /// Depth image of the most recently completed copy
    pub fn current_depth_image(&self) -> Result<ImageKey> {
        let copy = self.completed_copy()?;
        match &self.attachments {
            Attachments::Offscreen { depth, .. } => Ok(depth[copy as usize]),
            Attachments::Default { .. } => unreachable!(),
        }
    }

    /// Sampled view over the most recently completed copy's depth
    pub fn current_depth_view(
        &self,
        images: &ImageStore,
    ) -> Result<Arc<dyn DeviceImageView>> {
        let key = self.current_depth_image()?;
        Ok(images.get(key)?.view()?.clone())
    }

    fn completed_copy(&self) -> Result<u32> {
        if self.is_default() {
            lumen_bail!(SOURCE, "The default framebuffer's attachments cannot be sampled");
        }
        match self.completed {
            Some(copy) => Ok(copy),
            None => Err(crate::lumen_err!(
                SOURCE,
                "Framebuffer '{}' has not completed a render pass yet",
                self.name
            )),
        }
    }

    pub(crate) fn color_key(&self, copy: u32) -> Result<ImageKey> {
        match &self.attachments {
            Attachments::Offscreen { color, .. } => Ok(color[copy as usize]),
            Attachments::Default { .. } => Err(crate::lumen_err!(
                SOURCE,
                "The default framebuffer's attachments cannot be sampled"
            )),
        }
    }

    // ===== REALIZATION =====

    /// Build the backend framebuffers for every copy: one all-layers
    /// framebuffer plus one per layer. No-op when already realized;
    /// the backing images must have been pushed to the GPU first.
    pub(crate) fn realize(&mut self, images: &ImageStore) -> Result<()> {
        if !self.realized.is_empty() {
            return Ok(());
        }

        match &self.attachments {
            Attachments::Offscreen { color, depth } => {
                for copy in 0..self.copy_count as usize {
                    let color_image = images.get(color[copy])?;
                    let depth_image = images.get(depth[copy])?;
                    if !color_image.is_uploaded() || !depth_image.is_uploaded() {
                        lumen_bail!(
                            SOURCE,
                            "Framebuffer '{}': images have not been pushed to the GPU",
                            self.name
                        );
                    }

                    // Attachment views cover exactly one mip; the sampled
                    // views in the store cover the whole chain.
                    let mut layer_views = Vec::with_capacity(self.layer_count as usize);
                    for layer in 0..self.layer_count {
                        layer_views.push(self.device.create_image_view(
                            color_image.device_handle(),
                            &ImageViewDesc {
                                kind: ImageViewKind::D2,
                                aspect: ImageAspect::Color,
                                base_layer: layer,
                                layer_count: 1,
                                base_mip: 0,
                                mip_count: 1,
                            },
                        )?);
                    }
                    let depth_view = self.device.create_image_view(
                        depth_image.device_handle(),
                        &ImageViewDesc {
                            kind: ImageViewKind::D2,
                            aspect: ImageAspect::Depth,
                            base_layer: 0,
                            layer_count: 1,
                            base_mip: 0,
                            mip_count: 1,
                        },
                    )?;

                    let all_layers = self.device.create_framebuffer(&FramebufferDesc {
                        render_pass: self.descriptors.all_discard.device_handle().clone(),
                        color_views: layer_views.clone(),
                        depth_view: Some(depth_view.clone()),
                        width: self.width,
                        height: self.height,
                    })?;
                    let mut per_layer = Vec::with_capacity(self.layer_count as usize);
                    for view in &layer_views {
                        per_layer.push(self.device.create_framebuffer(&FramebufferDesc {
                            render_pass: self.descriptors.single_discard.device_handle().clone(),
                            color_views: vec![view.clone()],
                            depth_view: Some(depth_view.clone()),
                            width: self.width,
                            height: self.height,
                        })?);
                    }
                    self.realized.push(RealizedCopy { all_layers, per_layer });
                }
            }
            Attachments::Default { swapchain_images, depth } => {
                for copy in 0..self.copy_count as usize {
                    let depth_image = images.get(depth[copy])?;
                    if !depth_image.is_uploaded() {
                        lumen_bail!(
                            SOURCE,
                            "Framebuffer '{}': images have not been pushed to the GPU",
                            self.name
                        );
                    }
                    let color_view = self.device.create_image_view(
                        &swapchain_images[copy],
                        &ImageViewDesc {
                            kind: ImageViewKind::D2,
                            aspect: ImageAspect::Color,
                            base_layer: 0,
                            layer_count: 1,
                            base_mip: 0,
                            mip_count: 1,
                        },
                    )?;
                    let depth_view = self.device.create_image_view(
                        depth_image.device_handle(),
                        &ImageViewDesc {
                            kind: ImageViewKind::D2,
                            aspect: ImageAspect::Depth,
                            base_layer: 0,
                            layer_count: 1,
                            base_mip: 0,
                            mip_count: 1,
                        },
                    )?;
                    let fb = self.device.create_framebuffer(&FramebufferDesc {
                        render_pass: self.descriptors.all_discard.device_handle().clone(),
                        color_views: vec![color_view],
                        depth_view: Some(depth_view),
                        width: self.width,
                        height: self.height,
                    })?;
                    self.realized.push(RealizedCopy {
                        all_layers: fb.clone(),
                        per_layer: vec![fb],
                    });
                }
            }
        }

        crate::lumen_trace!(
            SOURCE,
            "Realized framebuffer '{}' ({} copies, {} layers)",
            self.name, self.copy_count, self.layer_count
        );
        Ok(())
    }

    // ===== RENDER PASSES =====

    pub fn begin_render_pass_discard(
        &mut self,
        frame: &mut Frame,
        images: &mut ImageStore,
    ) -> Result<()> {
        let copy = frame.image_index();
        self.begin_pass(frame, images, LoadOp::Discard, None, [0.0; 4], copy)
    }

    pub fn begin_render_pass_keep(
        &mut self,
        frame: &mut Frame,
        images: &mut ImageStore,
    ) -> Result<()> {
        let copy = frame.image_index();
        self.begin_pass(frame, images, LoadOp::Keep, None, [0.0; 4], copy)
    }

    pub fn begin_render_pass_clear(
        &mut self,
        frame: &mut Frame,
        images: &mut ImageStore,
        clear_color: [f32; 4],
    ) -> Result<()> {
        let copy = frame.image_index();
        self.begin_pass(frame, images, LoadOp::Clear, None, clear_color, copy)
    }

    pub fn begin_one_layer_render_pass_discard(
        &mut self,
        frame: &mut Frame,
        images: &mut ImageStore,
        layer: u32,
    ) -> Result<()> {
        let copy = frame.image_index();
        self.begin_pass(frame, images, LoadOp::Discard, Some(layer), [0.0; 4], copy)
    }

    pub fn begin_one_layer_render_pass_keep(
        &mut self,
        frame: &mut Frame,
        images: &mut ImageStore,
        layer: u32,
    ) -> Result<()> {
        let copy = frame.image_index();
        self.begin_pass(frame, images, LoadOp::Keep, Some(layer), [0.0; 4], copy)
    }

    pub fn begin_one_layer_render_pass_clear(
        &mut self,
        frame: &mut Frame,
        images: &mut ImageStore,
        layer: u32,
        clear_color: [f32; 4],
    ) -> Result<()> {
        let copy = frame.image_index();
        self.begin_pass(frame, images, LoadOp::Clear, Some(layer), clear_color, copy)
    }

    /// Single-layer pass on an explicit copy. The blur uses this to
    /// render into the same copy it samples from.
    pub(crate) fn begin_one_layer_pass_on_copy(
        &mut self,
        frame: &mut Frame,
        images: &mut ImageStore,
        layer: u32,
        load_op: LoadOp,
        copy: u32,
    ) -> Result<()> {
        self.begin_pass(frame, images, load_op, Some(layer), [0.0; 4], copy)
    }

    #[allow(clippy::too_many_arguments)]
    fn begin_pass(
        &mut self,
        frame: &mut Frame,
        images: &mut ImageStore,
        load_op: LoadOp,
        layer: Option<u32>,
        clear_color: [f32; 4],
        copy: u32,
    ) -> Result<()> {
        if self.active.is_some() {
            lumen_bail!(
                SOURCE,
                "A render pass is already recording on framebuffer '{}'",
                self.name
            );
        }
        if self.realized.is_empty() {
            lumen_bail!(SOURCE, "Framebuffer '{}' has not been pushed to the GPU", self.name);
        }
        if let Some(layer) = layer {
            if layer >= self.layer_count {
                if self.layer_count == 1 {
                    lumen_bail!(
                        SOURCE,
                        "Framebuffer '{}' is not a layered render target (layer {} requested)",
                        self.name, layer
                    );
                }
                lumen_bail!(
                    SOURCE,
                    "Framebuffer '{}' has no layer {} ({} layers)",
                    self.name, layer, self.layer_count
                );
            }
        }
        if copy >= self.copy_count {
            lumen_bail!(
                SOURCE,
                "Frame image index {} exceeds the {} copies of framebuffer '{}'",
                copy, self.copy_count, self.name
            );
        }

        // The default framebuffer's color layouts are handled entirely by
        // its presentation render pass.
        if let Attachments::Offscreen { color, depth } = &self.attachments {
            let layer_range = match layer {
                Some(layer) => layer..layer + 1,
                None => 0..self.layer_count,
            };
            images.get_mut(color[copy as usize])?.layout_transition_range(
                layer_range,
                0..1,
                ImageLayout::ColorAttachment,
                frame.command_list(),
            )?;
            images.get_mut(depth[copy as usize])?.layout_transition_range(
                0..1,
                0..1,
                ImageLayout::DepthStencilAttachment,
                frame.command_list(),
            )?;
        }

        let (descriptor, attachment_count) = match layer {
            Some(_) => (
                match load_op {
                    LoadOp::Discard => &self.descriptors.single_discard,
                    LoadOp::Keep => &self.descriptors.single_keep,
                    LoadOp::Clear => &self.descriptors.single_clear,
                },
                1,
            ),
            None => (
                match load_op {
                    LoadOp::Discard => &self.descriptors.all_discard,
                    LoadOp::Keep => &self.descriptors.all_keep,
                    LoadOp::Clear => &self.descriptors.all_clear,
                },
                self.layer_count as usize,
            ),
        };

        let mut clear_values = Vec::new();
        if load_op == LoadOp::Clear {
            for _ in 0..attachment_count {
                clear_values.push(ClearValue::Color(clear_color));
            }
            clear_values.push(ClearValue::DepthStencil { depth: 1.0, stencil: 0 });
        }

        let realized = &self.realized[copy as usize];
        let framebuffer = match layer {
            Some(layer) => &realized.per_layer[layer as usize],
            None => &realized.all_layers,
        };

        frame.command_list().begin_render_pass(
            descriptor.device_handle(),
            framebuffer,
            Rect2D { x: 0, y: 0, width: self.width, height: self.height },
            &clear_values,
        )?;

        self.active = Some(ActivePass { copy, layer });
        Ok(())
    }

    /// Close the recording pass, move the attachments to shader-read-only,
    /// and regenerate the color mip chain with per-layer blits.
    pub fn end_render_pass(&mut self, frame: &mut Frame, images: &mut ImageStore) -> Result<()> {
        self.end_pass(frame, images, true)
    }

    /// Close the recording pass without touching the mip chain; the base
    /// mip still becomes sampleable.
    pub fn end_render_pass_no_mipmaps(
        &mut self,
        frame: &mut Frame,
        images: &mut ImageStore,
    ) -> Result<()> {
        self.end_pass(frame, images, false)
    }

    fn end_pass(
        &mut self,
        frame: &mut Frame,
        images: &mut ImageStore,
        regenerate_mips: bool,
    ) -> Result<()> {
        let pass = match self.active.take() {
            Some(pass) => pass,
            None => lumen_bail!(
                SOURCE,
                "No render pass is recording on framebuffer '{}'",
                self.name
            ),
        };

        frame.command_list().end_render_pass()?;
        self.completed = Some(pass.copy);

        if let Attachments::Offscreen { color, depth } = &self.attachments {
            let layer_range = match pass.layer {
                Some(layer) => layer..layer + 1,
                None => 0..self.layer_count,
            };
            let cmd = frame.command_list();

            if regenerate_mips {
                let image = images.get_mut(color[pass.copy as usize])?;
                let mip_count = image.mip_count();
                for layer in layer_range.clone() {
                    image.layout_transition_mip(layer, 0, ImageLayout::TransferSrc, cmd)?;
                    let (mut width, mut height) = (self.width, self.height);
                    for mip in 1..mip_count {
                        let (dst_w, dst_h) = scale::next_mip_size(width, height);
                        image.layout_transition_mip(layer, mip, ImageLayout::TransferDst, cmd)?;
                        cmd.blit_image_mip(
                            image.device_handle(),
                            layer,
                            mip - 1,
                            width,
                            height,
                            mip,
                            dst_w,
                            dst_h,
                        )?;
                        // Promote so the next level can blit from it
                        image.layout_transition_mip(layer, mip, ImageLayout::TransferSrc, cmd)?;
                        width = dst_w;
                        height = dst_h;
                    }
                }
            }

            let image = images.get_mut(color[pass.copy as usize])?;
            let mip_count = image.mip_count();
            image.layout_transition_range(
                layer_range,
                0..mip_count,
                ImageLayout::ShaderReadOnly,
                cmd,
            )?;
            let depth_image = images.get_mut(depth[pass.copy as usize])?;
            let depth_mips = depth_image.mip_count();
            depth_image.layout_transition_range(
                0..1,
                0..depth_mips,
                ImageLayout::ShaderReadOnly,
                cmd,
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "framebuffer_tests.rs"]
mod tests;
