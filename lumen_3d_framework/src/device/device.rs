/// GraphicsDevice trait and resource descriptors
///
/// This is the seam between the platform-agnostic core and GPU backends.
/// Resources are trait objects created by the device; dropping the last
/// `Arc` releases the backend handle. All device methods take `&self`;
/// backends are internally synchronized.

use std::any::Any;
use std::sync::Arc;

use crate::error::Result;
use super::command_list::CommandList;
use super::types::*;

// ===== RESOURCE TRAITS =====

/// GPU image resource
pub trait DeviceImage: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// View over a layer/mip range of an image
pub trait DeviceImageView: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl std::fmt::Debug for dyn DeviceImageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeviceImageView")
    }
}

/// A block of device memory images are bound into
pub trait DeviceMemory: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Device-local buffer (vertex/index/uniform/storage)
pub trait DeviceBuffer: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Host-visible buffer used to stream pixel data to the GPU
pub trait StagingBuffer: Send + Sync {
    /// Copy `data` into the buffer starting at byte 0
    fn write(&self, data: &[u8]) -> Result<()>;

    /// Capacity in bytes
    fn size(&self) -> u64;

    fn as_any(&self) -> &dyn Any;
}

/// Compiled shader stage
pub trait ShaderModule: Send + Sync {
    fn stage(&self) -> ShaderStage;

    fn as_any(&self) -> &dyn Any;
}

impl std::fmt::Debug for dyn ShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ShaderModule")
    }
}

/// Backend render pass object
pub trait DeviceRenderPass: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Backend framebuffer object (a set of attachment views)
pub trait DeviceFramebuffer: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Backend pipeline object (graphics or compute)
pub trait DevicePipeline: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl std::fmt::Debug for dyn DevicePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DevicePipeline")
    }
}

/// Texture sampler
pub trait Sampler: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// A bound set of shader-visible resources (one descriptor set)
pub trait BindingGroup: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// GPU completion fence
pub trait Fence: Send + Sync {
    /// Non-blocking status query. Device loss surfaces as `Error::DeviceLost`.
    fn status(&self) -> Result<FenceStatus>;

    /// Return the fence to the unsignaled state
    fn reset(&self) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Presentation swapchain
pub trait Swapchain: Send + Sync {
    fn image_count(&self) -> u32;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> ImageFormat;

    /// The swapchain's presentable images, one per frame in flight
    fn images(&self) -> Vec<Arc<dyn DeviceImage>>;

    /// Acquire the next presentable image, returning its index
    fn acquire_next_image(&mut self) -> Result<u32>;

    /// Queue the given image for presentation
    fn present(&mut self, image_index: u32) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

impl std::fmt::Debug for dyn Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Swapchain")
    }
}

// ===== DESCRIPTORS =====

/// Descriptor for creating an image
#[derive(Debug, Clone)]
pub struct ImageDesc {
    /// Debug name
    pub name: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Number of array layers
    pub layer_count: u32,
    /// Number of mip levels
    pub mip_count: u32,
    /// Pixel format
    pub format: ImageFormat,
    /// Usage flags
    pub usage: ImageUsage,
    /// Component aspect
    pub aspect: ImageAspect,
    /// Default view dimensionality
    pub view_kind: ImageViewKind,
    /// Samples per texel
    pub sample_count: SampleCount,
}

/// Descriptor for creating an image view
#[derive(Debug, Clone)]
pub struct ImageViewDesc {
    pub kind: ImageViewKind,
    pub aspect: ImageAspect,
    pub base_layer: u32,
    pub layer_count: u32,
    pub base_mip: u32,
    pub mip_count: u32,
}

/// Descriptor for creating a render pass
///
/// Multi-layer targets attach each layer as a separate color attachment,
/// so `color_attachment_count` equals the layer count being drawn.
#[derive(Debug, Clone)]
pub struct RenderPassDesc {
    pub color_format: ImageFormat,
    pub color_attachment_count: u32,
    pub depth_format: Option<ImageFormat>,
    pub sample_count: SampleCount,
    pub load_op: LoadOp,
    /// Layout color attachments are left in when the pass ends
    pub final_color_layout: ImageLayout,
    /// Layout the depth attachment is left in when the pass ends
    pub final_depth_layout: ImageLayout,
    /// True for passes rendering to the window's swapchain images
    pub presentation_target: bool,
}

/// Descriptor for creating a backend framebuffer
#[derive(Clone)]
pub struct FramebufferDesc {
    pub render_pass: Arc<dyn DeviceRenderPass>,
    /// One view per color attachment (per layer for multi-layer targets)
    pub color_views: Vec<Arc<dyn DeviceImageView>>,
    pub depth_view: Option<Arc<dyn DeviceImageView>>,
    pub width: u32,
    pub height: u32,
}

/// Descriptor for creating a shader module from precompiled SPIR-V
#[derive(Clone)]
pub struct ShaderDesc {
    /// SPIR-V bytecode
    pub code: Vec<u8>,
    /// Which stage this module implements
    pub stage: ShaderStage,
    /// Entry point function name
    pub entry_point: String,
}

/// The device's built-in full-screen blur stages
///
/// Backends ship these precompiled (GLSL sources live under `shaders/`);
/// the software device returns host-evaluated stages instead.
#[derive(Clone)]
pub struct BlurShaderSet {
    pub fullscreen_vertex: Arc<dyn ShaderModule>,
    pub blur_fragment: Arc<dyn ShaderModule>,
    pub blur_depth_gated_fragment: Arc<dyn ShaderModule>,
}

/// Descriptor for creating a device-local buffer with initial contents
#[derive(Clone)]
pub struct BufferDesc {
    pub name: String,
    pub usage: BufferUsage,
    pub data: Vec<u8>,
}

/// Texture filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Texture addressing outside [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
}

/// Descriptor for creating a sampler
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mipmap_filter: Filter,
    pub address_mode: AddressMode,
}

/// Descriptor for creating a graphics pipeline
#[derive(Clone)]
pub struct GraphicsPipelineDesc {
    pub name: String,
    pub vertex_shader: Arc<dyn ShaderModule>,
    pub fragment_shader: Arc<dyn ShaderModule>,
    pub vertex_layout: VertexLayout,
    pub topology: PrimitiveTopology,
    pub rasterization: RasterizationState,
    pub depth_stencil: DepthStencilState,
    /// One blend state per color attachment
    pub color_blend: Vec<ColorBlendState>,
    pub multisample: MultisampleState,
    pub viewport: Viewport,
    pub scissor: Rect2D,
    pub push_constant_ranges: Vec<PushConstantRange>,
    pub render_pass: Arc<dyn DeviceRenderPass>,
}

/// Descriptor for creating a compute pipeline
#[derive(Clone)]
pub struct ComputePipelineDesc {
    pub name: String,
    pub shader: Arc<dyn ShaderModule>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

/// A resource bound into a binding group
#[derive(Clone)]
pub enum BindingResource {
    Sampler(Arc<dyn Sampler>),
    SampledImage(Arc<dyn DeviceImageView>),
    UniformBuffer(Arc<dyn DeviceBuffer>),
    StorageBuffer(Arc<dyn DeviceBuffer>),
}

/// One binding slot of a binding group
#[derive(Clone)]
pub struct BindingDesc {
    pub binding: u32,
    pub resource: BindingResource,
}

// ===== HOST FRAGMENT EVALUATION =====

/// Resources visible to a host-evaluated fragment stage
pub trait FragmentResources {
    /// Sample the image bound at `binding` with normalized coordinates,
    /// clamped to the edge, using the filtering of the paired sampler.
    fn sample(&self, binding: u32, layer: u32, u: f32, v: f32) -> [f32; 4];

    /// Dimensions of the image bound at `binding`
    fn source_size(&self, binding: u32) -> (u32, u32);
}

/// Input to one host fragment invocation
pub struct FragmentInput<'a> {
    /// Normalized texel-center coordinates
    pub u: f32,
    pub v: f32,
    /// Raw push constant bytes set on the command list
    pub push_constants: &'a [u8],
    /// Bound resources (set 0)
    pub resources: &'a dyn FragmentResources,
}

/// Output of one host fragment invocation
pub struct FragmentOutput {
    pub color: [f32; 4],
    /// Written to the depth attachment when depth writes are enabled
    pub depth: Option<f32>,
}

/// Host-side fragment stage, invoked once per covered texel
pub type HostFragmentFn = dyn Fn(&FragmentInput) -> FragmentOutput + Send + Sync;

// ===== DEVICE TRAIT =====

/// Factory and submission interface implemented by every GPU backend
pub trait GraphicsDevice: Send + Sync {
    /// Human-readable backend name ("vulkan", "software", ...)
    fn name(&self) -> &str;

    // ----- resource creation -----

    /// Create an image without backing memory
    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn DeviceImage>>;

    /// Query size/alignment/type requirements for an unbound image
    fn image_memory_requirements(
        &self,
        image: &Arc<dyn DeviceImage>,
    ) -> Result<MemoryRequirements>;

    /// Allocate one block of device memory
    fn allocate_memory(
        &self,
        size: u64,
        memory_type_bits: u32,
    ) -> Result<Arc<dyn DeviceMemory>>;

    /// Bind an image into previously allocated memory at `offset`
    fn bind_image_memory(
        &self,
        image: &Arc<dyn DeviceImage>,
        memory: &Arc<dyn DeviceMemory>,
        offset: u64,
    ) -> Result<()>;

    /// Create a view over a bound image
    fn create_image_view(
        &self,
        image: &Arc<dyn DeviceImage>,
        desc: &ImageViewDesc,
    ) -> Result<Arc<dyn DeviceImageView>>;

    /// Create a host-visible staging buffer
    fn create_staging_buffer(&self, size: u64) -> Result<Arc<dyn StagingBuffer>>;

    /// Create a device-local buffer initialized with `desc.data`
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn DeviceBuffer>>;

    /// Create a shader module from precompiled SPIR-V
    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn ShaderModule>>;

    /// The device's built-in full-screen blur stages
    fn blur_shaders(&self) -> Result<BlurShaderSet>;

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<Arc<dyn DeviceRenderPass>>;

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn DeviceFramebuffer>>;

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> Result<Arc<dyn DevicePipeline>>;

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
    ) -> Result<Arc<dyn DevicePipeline>>;

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<Arc<dyn Sampler>>;

    /// Create a binding group for descriptor set `set` of `pipeline`
    fn create_binding_group(
        &self,
        pipeline: &Arc<dyn DevicePipeline>,
        set: u32,
        bindings: &[BindingDesc],
    ) -> Result<Arc<dyn BindingGroup>>;

    fn create_command_list(&self) -> Result<Box<dyn CommandList>>;

    /// Create a fence in the unsignaled state
    fn create_fence(&self) -> Result<Box<dyn Fence>>;

    /// Create a swapchain for a window surface
    fn create_swapchain(
        &self,
        window: &winit::window::Window,
        image_count: u32,
    ) -> Result<Box<dyn Swapchain>>;

    // ----- submission -----

    /// Submit a recorded command list; `fence` signals on completion
    fn submit(&self, commands: &mut dyn CommandList, fence: Option<&dyn Fence>) -> Result<()>;

    /// Submit and block until the GPU has finished
    fn submit_and_wait(&self, commands: &mut dyn CommandList) -> Result<()>;

    /// Submit a frame's commands synchronized against swapchain acquire,
    /// signaling `fence` and the present semaphore for `image_index`
    fn submit_with_swapchain(
        &self,
        commands: &mut dyn CommandList,
        fence: &dyn Fence,
        swapchain: &mut dyn Swapchain,
        image_index: u32,
    ) -> Result<()>;

    // ----- readback / shutdown -----

    /// Read back one mip of one layer, in the image's native format
    fn read_image_pixels(
        &self,
        image: &Arc<dyn DeviceImage>,
        aspect: ImageAspect,
        layer: u32,
        mip: u32,
    ) -> Result<Vec<u8>>;

    /// Block until all submitted GPU work has completed
    fn wait_idle(&self) -> Result<()>;
}
