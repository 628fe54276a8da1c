/// SoftwareDevice - a CPU implementation of `GraphicsDevice`
///
/// Every resource is host memory and every command executes eagerly, so
/// the full core (uploads, render passes, mip blits, the blur) runs and
/// is observable without a GPU. Fences signal at submission. Creation
/// counters let tests assert caching behavior (memoized loads, lazily
/// finalized pipelines).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::device::{
    BindingDesc, BindingGroup, BlurShaderSet, BufferDesc, CommandList, ComputePipelineDesc,
    DeviceBuffer, DeviceFramebuffer, DeviceImage, DeviceImageView, DeviceMemory, DevicePipeline,
    DeviceRenderPass, Fence, FragmentInput, FramebufferDesc, GraphicsDevice,
    GraphicsPipelineDesc, ImageAspect, ImageDesc, ImageFormat, ImageViewDesc,
    MemoryRequirements, RenderPassDesc, Sampler, SamplerDesc, ShaderDesc, ShaderModule,
    ShaderStage, StagingBuffer, Swapchain,
};
use crate::error::Result;
use crate::lumen_bail;
use crate::target::blur;
use super::command_list::SoftwareCommandList;
use super::resources::{
    encode_texels, software_image, SoftwareBindingGroup, SoftwareBuffer, SoftwareFence,
    SoftwareFramebuffer, SoftwareImage, SoftwareImageView, SoftwareMemory, SoftwarePipeline,
    SoftwarePipelineKind, SoftwareRenderPass, SoftwareSampler, SoftwareShader,
    SoftwareStagingBuffer, SoftwareSwapchain,
};

const SOURCE: &str = "lumen3d::SoftwareDevice";

/// Resource creation counters, for cache-behavior assertions in tests
#[derive(Default)]
pub struct SoftwareCounters {
    pub images: AtomicUsize,
    pub pipelines: AtomicUsize,
    pub submits: AtomicUsize,
}

#[derive(Default)]
pub struct SoftwareDevice {
    counters: SoftwareCounters,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> &SoftwareCounters {
        &self.counters
    }

    /// A headless swapchain for tests and offscreen rendering
    pub fn create_offscreen_swapchain(
        &self,
        width: u32,
        height: u32,
        image_count: u32,
    ) -> Result<Box<dyn Swapchain>> {
        if image_count == 0 {
            lumen_bail!(SOURCE, "A swapchain needs at least one image");
        }
        let format = ImageFormat::B8G8R8A8_UNORM;
        let mut images: Vec<Arc<dyn DeviceImage>> = Vec::with_capacity(image_count as usize);
        for index in 0..image_count {
            self.counters.images.fetch_add(1, Ordering::Relaxed);
            images.push(Arc::new(SoftwareImage::new(ImageDesc {
                name: format!("$swapchain{}", index),
                width,
                height,
                layer_count: 1,
                mip_count: 1,
                format,
                usage: crate::device::ImageUsage::COLOR_ATTACHMENT,
                aspect: ImageAspect::Color,
                view_kind: crate::device::ImageViewKind::D2,
                sample_count: crate::device::SampleCount::S1,
            })));
        }
        Ok(Box::new(SoftwareSwapchain {
            images,
            width,
            height,
            format,
            current: AtomicU32::new(0),
        }))
    }
}

impl GraphicsDevice for SoftwareDevice {
    fn name(&self) -> &str {
        "software"
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn DeviceImage>> {
        self.counters.images.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(SoftwareImage::new(desc.clone())))
    }

    fn image_memory_requirements(
        &self,
        image: &Arc<dyn DeviceImage>,
    ) -> Result<MemoryRequirements> {
        let image = software_image(image)?;
        Ok(MemoryRequirements {
            size: image.byte_size().max(4),
            alignment: 256,
            memory_type_bits: 1,
        })
    }

    fn allocate_memory(&self, size: u64, memory_type_bits: u32) -> Result<Arc<dyn DeviceMemory>> {
        if memory_type_bits == 0 {
            lumen_bail!(SOURCE, "No memory type requested");
        }
        Ok(Arc::new(SoftwareMemory { size }))
    }

    fn bind_image_memory(
        &self,
        image: &Arc<dyn DeviceImage>,
        _memory: &Arc<dyn DeviceMemory>,
        _offset: u64,
    ) -> Result<()> {
        software_image(image)?.bound.store(true, Ordering::Release);
        Ok(())
    }

    fn create_image_view(
        &self,
        image: &Arc<dyn DeviceImage>,
        desc: &ImageViewDesc,
    ) -> Result<Arc<dyn DeviceImageView>> {
        let software = software_image(image)?;
        if desc.base_layer + desc.layer_count > software.desc.layer_count
            || desc.base_mip + desc.mip_count > software.desc.mip_count
        {
            lumen_bail!(
                SOURCE,
                "View range exceeds image '{}' ({} layers, {} mips)",
                software.desc.name, software.desc.layer_count, software.desc.mip_count
            );
        }
        Ok(Arc::new(SoftwareImageView {
            image: image.clone(),
            desc: desc.clone(),
        }))
    }

    fn create_staging_buffer(&self, size: u64) -> Result<Arc<dyn StagingBuffer>> {
        Ok(Arc::new(SoftwareStagingBuffer {
            data: Mutex::new(Vec::new()),
            capacity: size,
        }))
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn DeviceBuffer>> {
        Ok(Arc::new(SoftwareBuffer { desc: desc.clone() }))
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn ShaderModule>> {
        if desc.code.is_empty() {
            lumen_bail!(SOURCE, "Shader module has no code");
        }
        Ok(Arc::new(SoftwareShader::spirv(desc)))
    }

    /// Host-evaluated blur stages; the vertex stage is a placeholder
    /// since the rasterizer covers the full render area by construction.
    fn blur_shaders(&self) -> Result<BlurShaderSet> {
        let fullscreen_vertex: Arc<dyn ShaderModule> = Arc::new(SoftwareShader::host(
            ShaderStage::Vertex,
            Arc::new(|_input: &FragmentInput| crate::device::FragmentOutput {
                color: [0.0; 4],
                depth: None,
            }),
        ));
        let blur_fragment: Arc<dyn ShaderModule> = Arc::new(SoftwareShader::host(
            ShaderStage::Fragment,
            Arc::new(blur::blur_fragment),
        ));
        let blur_depth_gated_fragment: Arc<dyn ShaderModule> = Arc::new(SoftwareShader::host(
            ShaderStage::Fragment,
            Arc::new(blur::blur_depth_gated_fragment),
        ));
        Ok(BlurShaderSet {
            fullscreen_vertex,
            blur_fragment,
            blur_depth_gated_fragment,
        })
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<Arc<dyn DeviceRenderPass>> {
        Ok(Arc::new(SoftwareRenderPass { desc: desc.clone() }))
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn DeviceFramebuffer>> {
        Ok(Arc::new(SoftwareFramebuffer {
            color_views: desc.color_views.clone(),
            depth_view: desc.depth_view.clone(),
            width: desc.width,
            height: desc.height,
        }))
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> Result<Arc<dyn DevicePipeline>> {
        self.counters.pipelines.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(SoftwarePipeline {
            kind: SoftwarePipelineKind::Graphics(desc.clone()),
        }))
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
    ) -> Result<Arc<dyn DevicePipeline>> {
        self.counters.pipelines.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(SoftwarePipeline {
            kind: SoftwarePipelineKind::Compute(desc.clone()),
        }))
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<Arc<dyn Sampler>> {
        Ok(Arc::new(SoftwareSampler { desc: *desc }))
    }

    fn create_binding_group(
        &self,
        _pipeline: &Arc<dyn DevicePipeline>,
        _set: u32,
        bindings: &[BindingDesc],
    ) -> Result<Arc<dyn BindingGroup>> {
        Ok(Arc::new(SoftwareBindingGroup {
            bindings: bindings.to_vec(),
        }))
    }

    fn create_command_list(&self) -> Result<Box<dyn CommandList>> {
        Ok(Box::new(SoftwareCommandList::new()))
    }

    fn create_fence(&self) -> Result<Box<dyn Fence>> {
        Ok(Box::new(SoftwareFence {
            signaled: AtomicBool::new(false),
        }))
    }

    fn create_swapchain(
        &self,
        window: &winit::window::Window,
        image_count: u32,
    ) -> Result<Box<dyn Swapchain>> {
        let size = window.inner_size();
        self.create_offscreen_swapchain(size.width.max(1), size.height.max(1), image_count)
    }

    fn submit(&self, _commands: &mut dyn CommandList, fence: Option<&dyn Fence>) -> Result<()> {
        // Commands already executed at record time
        self.counters.submits.fetch_add(1, Ordering::Relaxed);
        if let Some(fence) = fence {
            signal(fence)?;
        }
        Ok(())
    }

    fn submit_and_wait(&self, _commands: &mut dyn CommandList) -> Result<()> {
        self.counters.submits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn submit_with_swapchain(
        &self,
        _commands: &mut dyn CommandList,
        fence: &dyn Fence,
        _swapchain: &mut dyn Swapchain,
        _image_index: u32,
    ) -> Result<()> {
        self.counters.submits.fetch_add(1, Ordering::Relaxed);
        signal(fence)
    }

    fn read_image_pixels(
        &self,
        image: &Arc<dyn DeviceImage>,
        _aspect: ImageAspect,
        layer: u32,
        mip: u32,
    ) -> Result<Vec<u8>> {
        let image = software_image(image)?;
        if layer >= image.desc.layer_count || mip >= image.desc.mip_count {
            lumen_bail!(
                SOURCE,
                "Readback of layer {} mip {} exceeds image '{}' ({} layers, {} mips)",
                layer, mip, image.desc.name, image.desc.layer_count, image.desc.mip_count
            );
        }
        let texels = match image.texels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        encode_texels(image.desc.format, &texels[layer as usize][mip as usize])
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }
}

fn signal(fence: &dyn Fence) -> Result<()> {
    match fence.as_any().downcast_ref::<SoftwareFence>() {
        Some(fence) => {
            fence.signaled.store(true, Ordering::Release);
            Ok(())
        }
        None => Err(crate::lumen_err!(
            SOURCE,
            "Foreign fence passed to the software device"
        )),
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
