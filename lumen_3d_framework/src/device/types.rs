/// Device-level vocabulary: formats, layouts, fixed-function state

use bitflags::bitflags;

/// Image and vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum ImageFormat {
    // Color formats
    R8G8B8A8_SRGB,
    R8G8B8A8_UNORM,
    B8G8R8A8_SRGB,
    B8G8R8A8_UNORM,
    R16G16B16A16_SFLOAT,

    // Depth formats
    D32_SFLOAT,
    D24_UNORM_S8_UINT,

    // Vertex attribute formats
    R32_SFLOAT,
    R32G32_SFLOAT,
    R32G32B32_SFLOAT,
    R32G32B32A32_SFLOAT,
}

impl ImageFormat {
    /// Size in bytes of one texel or vertex element
    pub fn bytes_per_element(&self) -> u32 {
        match self {
            ImageFormat::R8G8B8A8_SRGB
            | ImageFormat::R8G8B8A8_UNORM
            | ImageFormat::B8G8R8A8_SRGB
            | ImageFormat::B8G8R8A8_UNORM => 4,
            ImageFormat::R16G16B16A16_SFLOAT => 8,
            ImageFormat::D32_SFLOAT => 4,
            ImageFormat::D24_UNORM_S8_UINT => 4,
            ImageFormat::R32_SFLOAT => 4,
            ImageFormat::R32G32_SFLOAT => 8,
            ImageFormat::R32G32B32_SFLOAT => 12,
            ImageFormat::R32G32B32A32_SFLOAT => 16,
        }
    }

    /// Returns true for depth and depth/stencil formats
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            ImageFormat::D32_SFLOAT | ImageFormat::D24_UNORM_S8_UINT
        )
    }

    /// Returns true if the format carries a stencil component
    pub fn has_stencil(&self) -> bool {
        matches!(self, ImageFormat::D24_UNORM_S8_UINT)
    }
}

/// Which component planes of an image are addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageAspect {
    Color,
    Depth,
    DepthStencil,
}

/// Access layout of image memory, tracked per mip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Initial state; contents undefined
    Undefined,
    /// Source of transfer (blit/copy) operations
    TransferSrc,
    /// Destination of transfer operations
    TransferDst,
    /// Color attachment of a render pass
    ColorAttachment,
    /// Depth/stencil attachment of a render pass
    DepthStencilAttachment,
    /// Sampled from shaders
    ShaderReadOnly,
    /// Ready for presentation
    Present,
}

/// Dimensionality of an image view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageViewKind {
    D2,
    D2Array,
    Cube,
}

/// What happens to attachment contents when a render pass begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    /// Previous contents are thrown away
    Discard,
    /// Previous contents are preserved
    Keep,
    /// Attachment is cleared to a supplied value
    Clear,
}

/// Clear value for a render pass attachment
#[derive(Debug, Clone, Copy)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// Viewport rectangle with depth range
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// Integer rectangle (scissor, render area)
#[derive(Debug, Clone, Copy)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Memory requirements of an image, as reported by the backend
#[derive(Debug, Clone, Copy)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    pub memory_type_bits: u32,
}

/// Result of a non-blocking fence query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    Unsignaled,
}

bitflags! {
    /// Image usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ImageUsage: u32 {
        const SAMPLED                  = 1 << 0;
        const COLOR_ATTACHMENT         = 1 << 1;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 2;
        const TRANSFER_SRC             = 1 << 3;
        const TRANSFER_DST             = 1 << 4;
        const STORAGE                  = 1 << 5;
    }
}

bitflags! {
    /// Shader stage mask (push constant visibility)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShaderStages: u32 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE  = 1 << 2;
    }
}

/// A single shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Buffer usage class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Storage,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    /// Triangle list
    TriangleList,
    /// Triangle strip
    TriangleStrip,
    /// Line list
    LineList,
    /// Point list
    PointList,
}

/// Index buffer element type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// 16-bit indices (max 65535 vertices)
    U16,
    /// 32-bit indices (max ~4 billion vertices)
    U32,
}

impl IndexType {
    /// Size in bytes of one index element
    pub fn size_bytes(&self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Vertex input rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputRate {
    /// Data is per-vertex
    Vertex,
    /// Data is per-instance
    Instance,
}

/// Vertex attribute description
#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute {
    /// Attribute location in shader
    pub location: u32,
    /// Binding index
    pub binding: u32,
    /// Format of the attribute (data type and component count)
    pub format: ImageFormat,
    /// Offset in bytes from the start of the vertex
    pub offset: u32,
}

/// Vertex binding description
#[derive(Debug, Clone, Copy)]
pub struct VertexBinding {
    /// Binding index
    pub binding: u32,
    /// Stride in bytes between consecutive elements
    pub stride: u32,
    /// Input rate (per-vertex or per-instance)
    pub input_rate: VertexInputRate,
}

/// Vertex input layout
#[derive(Debug, Clone, Default)]
pub struct VertexLayout {
    /// Vertex bindings
    pub bindings: Vec<VertexBinding>,
    /// Vertex attributes
    pub attributes: Vec<VertexAttribute>,
}

/// Push constant range descriptor
#[derive(Debug, Clone)]
pub struct PushConstantRange {
    /// Shader stages that can access these push constants
    pub stages: ShaderStages,
    /// Offset in bytes
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
}

// ===== RASTERIZATION ENUMS =====

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    Back,
}

/// Front face winding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    /// Counter-clockwise vertices define front face
    CounterClockwise,
    /// Clockwise vertices define front face
    Clockwise,
}

/// Polygon rendering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonMode {
    /// Fill polygons
    Fill,
    /// Draw edges only (wireframe)
    Line,
    /// Draw vertices only
    Point,
}

// ===== DEPTH/STENCIL ENUMS =====

/// Comparison operator for depth and stencil tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Never pass
    Never,
    /// Pass if value < reference
    Less,
    /// Pass if value == reference
    Equal,
    /// Pass if value <= reference
    LessOrEqual,
    /// Pass if value > reference
    Greater,
    /// Pass if value != reference
    NotEqual,
    /// Pass if value >= reference
    GreaterOrEqual,
    /// Always pass
    Always,
}

// ===== COLOR BLEND ENUMS =====

/// Blend factor for color blending equations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Blend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendOp {
    /// result = src * srcFactor + dst * dstFactor
    Add,
    /// result = src * srcFactor - dst * dstFactor
    Subtract,
    /// result = dst * dstFactor - src * srcFactor
    ReverseSubtract,
    /// result = min(src, dst)
    Min,
    /// result = max(src, dst)
    Max,
}

// ===== MULTISAMPLE ENUMS =====

/// Multisample count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleCount {
    /// 1 sample (no multisampling)
    S1,
    /// 2 samples
    S2,
    /// 4 samples
    S4,
    /// 8 samples
    S8,
}

// ===== RASTERIZATION STATE =====

/// Depth bias parameters
#[derive(Debug, Clone, Copy)]
pub struct DepthBias {
    /// Constant depth offset
    pub constant_factor: f32,
    /// Slope-based depth offset
    pub slope_factor: f32,
    /// Maximum depth bias clamp
    pub clamp: f32,
}

/// Rasterization fixed-function state
#[derive(Debug, Clone, Copy)]
pub struct RasterizationState {
    /// Face culling mode
    pub cull_mode: CullMode,
    /// Front face winding order
    pub front_face: FrontFace,
    /// Polygon rendering mode
    pub polygon_mode: PolygonMode,
    /// Line width in pixels
    pub line_width: f32,
    /// Depth bias (None = disabled)
    pub depth_bias: Option<DepthBias>,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::None,
            front_face: FrontFace::CounterClockwise,
            polygon_mode: PolygonMode::Fill,
            line_width: 1.0,
            depth_bias: None,
        }
    }
}

// ===== DEPTH/STENCIL STATE =====

/// Depth testing state
#[derive(Debug, Clone, Copy)]
pub struct DepthStencilState {
    /// Enable depth testing
    pub depth_test_enable: bool,
    /// Enable writing to depth buffer
    pub depth_write_enable: bool,
    /// Depth comparison operator
    pub depth_compare_op: CompareOp,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: CompareOp::LessOrEqual,
        }
    }
}

// ===== COLOR BLEND STATE =====

/// Color write mask
#[derive(Debug, Clone, Copy)]
pub struct ColorWriteMask {
    pub r: bool,
    pub g: bool,
    pub b: bool,
    pub a: bool,
}

impl ColorWriteMask {
    /// All channels enabled
    pub const ALL: Self = Self { r: true, g: true, b: true, a: true };
    /// No channels enabled
    pub const NONE: Self = Self { r: false, g: false, b: false, a: false };
}

impl Default for ColorWriteMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Color blending state for one attachment
#[derive(Debug, Clone, Copy)]
pub struct ColorBlendState {
    /// Enable blending
    pub blend_enable: bool,
    /// Source color blend factor
    pub src_color_factor: BlendFactor,
    /// Destination color blend factor
    pub dst_color_factor: BlendFactor,
    /// Color blend operation
    pub color_blend_op: BlendOp,
    /// Source alpha blend factor
    pub src_alpha_factor: BlendFactor,
    /// Destination alpha blend factor
    pub dst_alpha_factor: BlendFactor,
    /// Alpha blend operation
    pub alpha_blend_op: BlendOp,
    /// Color write mask
    pub color_write_mask: ColorWriteMask,
}

impl Default for ColorBlendState {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_factor: BlendFactor::One,
            dst_color_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            color_write_mask: ColorWriteMask::ALL,
        }
    }
}

// ===== MULTISAMPLE STATE =====

/// Multisampling state
#[derive(Debug, Clone, Copy)]
pub struct MultisampleState {
    /// Number of samples per pixel
    pub sample_count: SampleCount,
    /// Enable alpha-to-coverage
    pub alpha_to_coverage: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            sample_count: SampleCount::S1,
            alpha_to_coverage: false,
        }
    }
}
