/// Descriptor types and fixed-function state shared by every device backend

use bitflags::bitflags;
use glam::Vec4;

bitflags! {
    /// Pipeline binding points a resource may be attached to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BindFlags: u32 {
        const VERTEX_BUFFER   = 1 << 0;
        const INDEX_BUFFER    = 1 << 1;
        const CONSTANT_BUFFER = 1 << 2;
        const RENDER_TARGET   = 1 << 3;
        const DEPTH_STENCIL   = 1 << 4;
        const SHADER_RESOURCE = 1 << 5;
    }
}

bitflags! {
    /// Additional buffer interpretation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResourceMiscFlags: u32 {
        const BUFFER_RAW        = 1 << 0;
        const BUFFER_STRUCTURED = 1 << 1;
    }
}

bitflags! {
    /// Logical resource state used for layout transitions and barriers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResourceState: u32 {
        /// Invalid state (don't preserve contents)
        const UNDEFINED               = 0;
        /// Shader resource, read only
        const SHADER_RESOURCE         = 1 << 0;
        /// Shader resource, read only, non-pixel shader
        const SHADER_RESOURCE_COMPUTE = 1 << 1;
        /// Shader resource, write enabled
        const UNORDERED_ACCESS        = 1 << 2;
        /// Copy from
        const COPY_SRC                = 1 << 3;
        /// Copy to
        const COPY_DST                = 1 << 4;

        // Texture specific resource states:
        /// Render target, write enabled
        const RENDER_TARGET           = 1 << 5;
        /// Depth stencil, write enabled
        const DEPTH_STENCIL           = 1 << 6;
        /// Depth stencil, read only
        const DEPTH_STENCIL_READONLY  = 1 << 7;

        // Buffer specific resource states:
        /// Vertex buffer, read only
        const VERTEX_BUFFER           = 1 << 9;
        /// Index buffer, read only
        const INDEX_BUFFER            = 1 << 10;
        /// Constant buffer, read only
        const CONSTANT_BUFFER         = 1 << 11;
    }
}

/// Who may access a resource's memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryAccess {
    /// CPU no access, GPU read/write
    #[default]
    Default,
    /// CPU write, GPU read
    Upload,
    /// CPU read, GPU write
    Readback,
}

/// Texture sampling filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFilter {
    #[default]
    Point,
    Bilinear,
    Trilinear,
    AnisotropicLinear,
}

/// Texture coordinate addressing outside [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureAddressMode {
    Clamp,
    #[default]
    Wrap,
    Mirror,
    Border,
}

/// Pixel/texel formats understood by the device layer
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Unknown,
    /// Four-component, 128-bit floating-point format with 32-bit channels
    R32G32B32A32_FLOAT,
    /// Four-component, 32-bit unsigned-integer format with 8-bit channels
    R8G8B8A8_UINT,
    /// Four-component, 32-bit unsigned-normalized integer format with 8-bit channels
    R8G8B8A8_UNORM,
    /// Two-component, 32-bit floating-point format with 16-bit channels
    R16G16_FLOAT,
    /// Two-component, 64-bit floating-point format with 32-bit channels
    R32G32_FLOAT,
    /// Single-component, 8-bit unsigned-normalized integer swizzled to { r, r, r, 1 }
    R8_UNORM,
    /// Single-component, 32-bit floating-point format swizzled to { r, r, r, 1 }
    R32_FLOAT,
    /// Single-component, 16-bit floating-point format swizzled to { r, r, r, 1 }
    R16_FLOAT,
    /// Single-component, 32-bit floating-point format for depth
    D32_FLOAT,
    /// Depth (32-bit) + stencil (8-bit)
    D32_FLOAT_S8_UINT,
    B8G8R8A8_UNORM,
    R32G32B32_FLOAT,
}

impl Format {
    /// Size in bytes of one element of this format
    pub const fn stride(self) -> u32 {
        match self {
            Format::R32G32B32A32_FLOAT => 16,
            Format::R32G32B32_FLOAT => 12,
            Format::R32G32_FLOAT => 8,
            Format::R8G8B8A8_UINT
            | Format::R8G8B8A8_UNORM
            | Format::R16G16_FLOAT
            | Format::R32_FLOAT
            | Format::D32_FLOAT
            | Format::B8G8R8A8_UNORM => 4,
            Format::R16_FLOAT => 2,
            Format::R8_UNORM => 1,
            // Depth+stencil formats have no single linear element stride
            Format::D32_FLOAT_S8_UINT | Format::Unknown => 0,
        }
    }

    /// True for depth and depth/stencil formats
    pub const fn is_depth(self) -> bool {
        matches!(self, Format::D32_FLOAT | Format::D32_FLOAT_S8_UINT)
    }

    /// True for formats carrying a stencil aspect
    pub const fn has_stencil(self) -> bool {
        matches!(self, Format::D32_FLOAT_S8_UINT)
    }
}

/// Index buffer element format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBufferFormat {
    Uint16,
    Uint32,
}

/// View kinds that may be created over a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubresourceType {
    /// Shader resource view
    Srv,
    /// Render target view
    Rtv,
    /// Depth stencil view
    Dsv,
}

/// Polygon rendering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    Wireframe,
    #[default]
    Solid,
}

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

/// Front face winding order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    /// Counter clockwise
    #[default]
    Ccw,
    /// Clockwise
    Cw,
}

/// Primitive assembly topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    PointList,
    LineList,
    LineStrip,
}

/// Comparison operator for depth and stencil tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ComparisonFunc {
    #[default]
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Depth buffer write control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthWriteMask {
    /// Disables depth write
    #[default]
    Zero,
    /// Enables depth write
    All,
}

/// Stencil operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrSat,
    DecrSat,
    Invert,
    Incr,
    Decr,
}

/// Shader pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader
    Vertex,
    /// Geometry shader
    Geometry,
    /// Fragment shader
    Fragment,
}

/// Hardware queue a command list is recorded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueType {
    #[default]
    Graphics,
    Compute,
    Copy,
}

/// Number of hardware queue types
pub const QUEUE_COUNT: usize = 3;

impl QueueType {
    /// Stable index into per-queue arrays
    pub const fn index(self) -> usize {
        match self {
            QueueType::Graphics => 0,
            QueueType::Compute => 1,
            QueueType::Copy => 2,
        }
    }

    /// All queue types in index order
    pub const ALL: [QueueType; QUEUE_COUNT] =
        [QueueType::Graphics, QueueType::Compute, QueueType::Copy];
}

/// Viewport dimensions and depth range (top-left origin)
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 2D rectangle in pixels
#[derive(Debug, Clone, Copy, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// One element of a vertex input layout
#[derive(Debug, Clone)]
pub struct VertexElement {
    /// Shader input name (debug only; location is element order)
    pub input_name: String,
    /// Vertex buffer binding slot
    pub input_slot: u32,
    /// Format of the attribute
    pub format: Format,
    /// Offset in bytes from the start of the vertex, or
    /// [`VertexInputLayout::APPEND_ALIGNED_ELEMENT`]
    pub aligned_byte_offset: u32,
}

/// Vertex input layout
#[derive(Debug, Clone, Default)]
pub struct VertexInputLayout {
    pub elements: Vec<VertexElement>,
}

impl VertexInputLayout {
    /// Automatically figure out the byte offset from the preceding elements
    pub const APPEND_ALIGNED_ELEMENT: u32 = u32::MAX;

    pub fn new(elements: Vec<VertexElement>) -> Self {
        Self { elements }
    }
}

/// Sampler state descriptor
#[derive(Debug, Clone)]
pub struct SamplerDesc {
    pub filter: TextureFilter,
    pub address_u: TextureAddressMode,
    pub address_v: TextureAddressMode,
    pub address_w: TextureAddressMode,
    pub lod_bias: f32,
    pub max_anisotropy: f32,
    pub border_color: Vec4,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: TextureFilter::Point,
            address_u: TextureAddressMode::Wrap,
            address_v: TextureAddressMode::Wrap,
            address_w: TextureAddressMode::Wrap,
            lod_bias: 0.0,
            max_anisotropy: 16.0,
            border_color: Vec4::ONE,
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

/// Texture dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureKind {
    Texture1D,
    #[default]
    Texture2D,
    Texture3D,
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub array_size: u32,
    pub format: Format,
    pub mip_levels: u32,
    pub bind_flags: BindFlags,
    /// Layout the texture is transitioned to after creation/upload
    pub layout: ResourceState,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            kind: TextureKind::Texture2D,
            width: 0,
            height: 0,
            array_size: 1,
            format: Format::Unknown,
            mip_levels: 1,
            bind_flags: BindFlags::empty(),
            layout: ResourceState::SHADER_RESOURCE,
        }
    }
}

/// Buffer descriptor
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuBufferDesc {
    pub size: u64,
    pub usage: MemoryAccess,
    pub bind_flags: BindFlags,
    pub misc_flags: ResourceMiscFlags,
    /// Element stride, needed for structured buffer types
    pub stride: u32,
}

/// Rasterizer fixed-function state
#[derive(Debug, Clone, Copy)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub line_width: f32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::None,
            front_face: FrontFace::Ccw,
            line_width: 1.0,
        }
    }
}

/// Per-face stencil operation state
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthStencilOp {
    pub stencil_fail_op: StencilOp,
    pub stencil_depth_fail_op: StencilOp,
    pub stencil_pass_op: StencilOp,
    pub stencil_func: ComparisonFunc,
}

/// Depth and stencil testing state
#[derive(Debug, Clone, Copy)]
pub struct DepthStencilState {
    pub depth_enable: bool,
    pub depth_write_mask: DepthWriteMask,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front_face: DepthStencilOp,
    pub back_face: DepthStencilOp,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_enable: false,
            depth_write_mask: DepthWriteMask::Zero,
            depth_func: ComparisonFunc::Never,
            stencil_enable: false,
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
            front_face: DepthStencilOp::default(),
            back_face: DepthStencilOp::default(),
        }
    }
}

/// Swapchain descriptor
#[derive(Debug, Clone)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub format: Format,
    pub fullscreen: bool,
    pub vsync: bool,
    pub clear_color: Vec4,
}

impl Default for SwapChainDesc {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            buffer_count: 2,
            format: Format::B8G8R8A8_UNORM,
            fullscreen: false,
            vsync: true,
            clear_color: Vec4::new(0.4, 0.4, 0.4, 1.0),
        }
    }
}

/// One subresource worth of initial texture data
#[derive(Debug, Clone, Copy)]
pub struct SubresourceData<'a> {
    /// Data for this subresource (mip/layer)
    pub mem: &'a [u8],
    /// Bytes between two rows of a texture (2D and 3D textures)
    pub row_pitch: u32,
    /// Bytes between two depth slices of a texture (3D textures only)
    pub slice_pitch: u32,
}

/// Round `value` up to the next multiple of `alignment`
pub const fn align_to(value: u64, alignment: u64) -> u64 {
    ((value + alignment - 1) / alignment) * alignment
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
