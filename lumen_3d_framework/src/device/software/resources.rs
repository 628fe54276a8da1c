/// Resource objects of the software device
///
/// Images store RGBA f32 texels per (layer, mip) behind a mutex; every
/// other resource is a thin descriptor holder. Commands execute against
/// these structures directly, so a "GPU" readback is a lock and a copy.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::device::{
    BindingDesc, BindingGroup, BufferDesc, ComputePipelineDesc, DeviceBuffer, DeviceFramebuffer,
    DeviceImage, DeviceImageView, DeviceMemory, DevicePipeline, DeviceRenderPass, Fence,
    FenceStatus, GraphicsPipelineDesc, HostFragmentFn, ImageDesc, ImageFormat, ImageViewDesc,
    RenderPassDesc, Sampler, SamplerDesc, ShaderDesc, ShaderModule, ShaderStage, StagingBuffer,
    Swapchain,
};
use crate::error::Result;
use crate::lumen_bail;

const SOURCE: &str = "lumen3d::SoftwareDevice";

/// Dimension of `mip` given the base dimension
pub(super) fn mip_dim(base: u32, mip: u32) -> u32 {
    (base >> mip).max(1)
}

// ===== IMAGE =====

pub(super) struct SoftwareImage {
    pub desc: ImageDesc,
    /// Texels per layer, per mip, RGBA f32 (depth in the red channel)
    pub texels: Mutex<Vec<Vec<Vec<[f32; 4]>>>>,
    pub bound: AtomicBool,
}

impl SoftwareImage {
    pub fn new(desc: ImageDesc) -> Self {
        let mut layers = Vec::with_capacity(desc.layer_count as usize);
        for _ in 0..desc.layer_count {
            let mut mips = Vec::with_capacity(desc.mip_count as usize);
            for mip in 0..desc.mip_count {
                let width = mip_dim(desc.width, mip);
                let height = mip_dim(desc.height, mip);
                mips.push(vec![[0.0f32; 4]; (width * height) as usize]);
            }
            layers.push(mips);
        }
        Self {
            desc,
            texels: Mutex::new(layers),
            bound: AtomicBool::new(false),
        }
    }

    /// Byte size of the image in its native format
    pub fn byte_size(&self) -> u64 {
        let texel = self.desc.format.bytes_per_element() as u64;
        let mut total = 0u64;
        for mip in 0..self.desc.mip_count {
            let width = mip_dim(self.desc.width, mip) as u64;
            let height = mip_dim(self.desc.height, mip) as u64;
            total += width * height * texel;
        }
        total * self.desc.layer_count as u64
    }
}

impl DeviceImage for SoftwareImage {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Downcast a device image to the software implementation
pub(super) fn software_image(image: &Arc<dyn DeviceImage>) -> Result<&SoftwareImage> {
    match image.as_any().downcast_ref::<SoftwareImage>() {
        Some(image) => Ok(image),
        None => Err(crate::lumen_err!(
            SOURCE,
            "Foreign image passed to the software device"
        )),
    }
}

// ===== IMAGE VIEW =====

pub(super) struct SoftwareImageView {
    pub image: Arc<dyn DeviceImage>,
    pub desc: ImageViewDesc,
}

impl DeviceImageView for SoftwareImageView {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) fn software_view(view: &Arc<dyn DeviceImageView>) -> Result<&SoftwareImageView> {
    match view.as_any().downcast_ref::<SoftwareImageView>() {
        Some(view) => Ok(view),
        None => Err(crate::lumen_err!(
            SOURCE,
            "Foreign image view passed to the software device"
        )),
    }
}

// ===== FORMAT CONVERSION =====

/// Decode native-format bytes into RGBA f32 texels
pub(super) fn decode_texels(
    format: ImageFormat,
    bytes: &[u8],
    count: usize,
) -> Result<Vec<[f32; 4]>> {
    let mut out = Vec::with_capacity(count);
    match format {
        ImageFormat::R8G8B8A8_SRGB | ImageFormat::R8G8B8A8_UNORM => {
            for texel in bytes.chunks_exact(4).take(count) {
                out.push([
                    texel[0] as f32 / 255.0,
                    texel[1] as f32 / 255.0,
                    texel[2] as f32 / 255.0,
                    texel[3] as f32 / 255.0,
                ]);
            }
        }
        ImageFormat::B8G8R8A8_SRGB | ImageFormat::B8G8R8A8_UNORM => {
            for texel in bytes.chunks_exact(4).take(count) {
                out.push([
                    texel[2] as f32 / 255.0,
                    texel[1] as f32 / 255.0,
                    texel[0] as f32 / 255.0,
                    texel[3] as f32 / 255.0,
                ]);
            }
        }
        ImageFormat::D32_SFLOAT | ImageFormat::R32_SFLOAT => {
            for texel in bytes.chunks_exact(4).take(count) {
                let value = f32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
                out.push([value, 0.0, 0.0, 0.0]);
            }
        }
        ImageFormat::R32G32B32A32_SFLOAT => {
            for texel in bytes.chunks_exact(16).take(count) {
                let mut channels = [0.0f32; 4];
                for (channel, chunk) in channels.iter_mut().zip(texel.chunks_exact(4)) {
                    *channel = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
                out.push(channels);
            }
        }
        _ => lumen_bail!(
            SOURCE,
            "{:?} uploads are not supported by the software device",
            format
        ),
    }
    Ok(out)
}

/// Encode RGBA f32 texels into native-format bytes
pub(super) fn encode_texels(format: ImageFormat, texels: &[[f32; 4]]) -> Result<Vec<u8>> {
    let quantize = |value: f32| -> u8 { (value.clamp(0.0, 1.0) * 255.0 + 0.5) as u8 };
    let mut out = Vec::new();
    match format {
        ImageFormat::R8G8B8A8_SRGB | ImageFormat::R8G8B8A8_UNORM => {
            for texel in texels {
                out.extend_from_slice(&[
                    quantize(texel[0]),
                    quantize(texel[1]),
                    quantize(texel[2]),
                    quantize(texel[3]),
                ]);
            }
        }
        ImageFormat::B8G8R8A8_SRGB | ImageFormat::B8G8R8A8_UNORM => {
            for texel in texels {
                out.extend_from_slice(&[
                    quantize(texel[2]),
                    quantize(texel[1]),
                    quantize(texel[0]),
                    quantize(texel[3]),
                ]);
            }
        }
        ImageFormat::D32_SFLOAT | ImageFormat::R32_SFLOAT => {
            for texel in texels {
                out.extend_from_slice(&texel[0].to_le_bytes());
            }
        }
        ImageFormat::R32G32B32A32_SFLOAT => {
            for texel in texels {
                for channel in texel {
                    out.extend_from_slice(&channel.to_le_bytes());
                }
            }
        }
        _ => lumen_bail!(
            SOURCE,
            "{:?} readbacks are not supported by the software device",
            format
        ),
    }
    Ok(out)
}

// ===== MEMORY AND BUFFERS =====

pub(super) struct SoftwareMemory {
    pub size: u64,
}

impl DeviceMemory for SoftwareMemory {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) struct SoftwareBuffer {
    pub desc: BufferDesc,
}

impl DeviceBuffer for SoftwareBuffer {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) struct SoftwareStagingBuffer {
    pub data: Mutex<Vec<u8>>,
    pub capacity: u64,
}

impl StagingBuffer for SoftwareStagingBuffer {
    fn write(&self, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.capacity {
            lumen_bail!(
                SOURCE,
                "Staging write of {} bytes exceeds the buffer's {} bytes",
                data.len(),
                self.capacity
            );
        }
        let mut guard = match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clear();
        guard.extend_from_slice(data);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.capacity
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== SHADERS AND PIPELINES =====

/// A shader stage: either opaque SPIR-V (ignored by this device) or a
/// host evaluator the rasterizer can run per texel
pub(super) struct SoftwareShader {
    pub stage: ShaderStage,
    pub host: Option<Arc<HostFragmentFn>>,
}

impl SoftwareShader {
    pub fn spirv(desc: &ShaderDesc) -> Self {
        Self {
            stage: desc.stage,
            host: None,
        }
    }

    pub fn host(stage: ShaderStage, host: Arc<HostFragmentFn>) -> Self {
        Self {
            stage,
            host: Some(host),
        }
    }
}

impl ShaderModule for SoftwareShader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) struct SoftwareRenderPass {
    pub desc: RenderPassDesc,
}

impl DeviceRenderPass for SoftwareRenderPass {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) struct SoftwareFramebuffer {
    pub color_views: Vec<Arc<dyn DeviceImageView>>,
    pub depth_view: Option<Arc<dyn DeviceImageView>>,
    pub width: u32,
    pub height: u32,
}

impl DeviceFramebuffer for SoftwareFramebuffer {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) fn software_framebuffer(
    framebuffer: &Arc<dyn DeviceFramebuffer>,
) -> Result<&SoftwareFramebuffer> {
    match framebuffer.as_any().downcast_ref::<SoftwareFramebuffer>() {
        Some(framebuffer) => Ok(framebuffer),
        None => Err(crate::lumen_err!(
            SOURCE,
            "Foreign framebuffer passed to the software device"
        )),
    }
}

pub(super) enum SoftwarePipelineKind {
    Graphics(GraphicsPipelineDesc),
    Compute(ComputePipelineDesc),
}

pub(super) struct SoftwarePipeline {
    pub kind: SoftwarePipelineKind,
}

impl DevicePipeline for SoftwarePipeline {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) fn software_pipeline(pipeline: &Arc<dyn DevicePipeline>) -> Result<&SoftwarePipeline> {
    match pipeline.as_any().downcast_ref::<SoftwarePipeline>() {
        Some(pipeline) => Ok(pipeline),
        None => Err(crate::lumen_err!(
            SOURCE,
            "Foreign pipeline passed to the software device"
        )),
    }
}

pub(super) struct SoftwareSampler {
    #[allow(dead_code)]
    pub desc: SamplerDesc,
}

impl Sampler for SoftwareSampler {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(super) struct SoftwareBindingGroup {
    pub bindings: Vec<BindingDesc>,
}

impl BindingGroup for SoftwareBindingGroup {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== FENCE =====

pub(super) struct SoftwareFence {
    pub signaled: AtomicBool,
}

impl Fence for SoftwareFence {
    fn status(&self) -> Result<FenceStatus> {
        if self.signaled.load(Ordering::Acquire) {
            Ok(FenceStatus::Signaled)
        } else {
            Ok(FenceStatus::Unsignaled)
        }
    }

    fn reset(&self) -> Result<()> {
        self.signaled.store(false, Ordering::Release);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== SWAPCHAIN =====

/// A headless swapchain: plain software images handed out round-robin.
/// Presentation is a no-op beyond advancing the image cursor.
pub(super) struct SoftwareSwapchain {
    pub images: Vec<Arc<dyn DeviceImage>>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub current: AtomicU32,
}

impl Swapchain for SoftwareSwapchain {
    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> ImageFormat {
        self.format
    }

    fn images(&self) -> Vec<Arc<dyn DeviceImage>> {
        self.images.clone()
    }

    fn acquire_next_image(&mut self) -> Result<u32> {
        Ok(self.current.load(Ordering::Acquire))
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        let count = self.images.len() as u32;
        self.current.store((image_index + 1) % count, Ordering::Release);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
