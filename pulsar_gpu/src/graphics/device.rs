/// GraphicsDevice trait - the device API recorded against by the engine
///
/// One device instance is created at startup, owned explicitly by the
/// application (no global accessor), and destroyed once at shutdown after
/// draining all queues. All methods take `&self`; resource creation is
/// internally synchronized and safe from any thread, while a command list
/// is owned by exactly one recording thread between begin and submit.

use winit::window::Window;

use crate::error::Result;
use crate::graphics::render_pass::{RenderPass, RenderPassDesc};
use crate::graphics::resource::{
    GpuBuffer, GpuResource, PipelineState, PipelineStateDesc, Sampler, Shader, SwapChain, Texture,
};
use crate::graphics::types::{
    GpuBufferDesc, IndexBufferFormat, QueueType, Rect, SamplerDesc, ShaderStage, SubresourceData,
    SwapChainDesc, TextureDesc, Viewport,
};

/// Frames of GPU work that may be in flight at once (the buffering depth)
///
/// Bounds both resource retirement delay and the frame-pacing wait.
pub const BUFFER_COUNT: u32 = 2;

/// Handle to a pooled command list, valid until the next `submit_command_lists`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandList {
    index: u32,
}

impl CommandList {
    pub fn new(index: u32) -> Self {
        Self { index }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Video memory statistics, polled by tooling
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryUsage {
    /// Total video memory available to the application (in bytes)
    pub budget: u64,
    /// Video memory used by the application (in bytes)
    pub usage: u64,
}

/// Per-frame draw statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    /// Number of draw calls this frame
    pub draw_calls: u32,
    /// Number of triangles drawn this frame
    pub triangle_count: u64,
}

/// Validation message severities forwarded to the logger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSeverity {
    ErrorsOnly,
    ErrorsAndWarnings,
    All,
}

/// Device configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Enable validation/debug layers
    pub enable_validation: bool,
    /// Application name
    pub app_name: String,
    /// Application version (major, minor, patch)
    pub app_version: (u32, u32, u32),
    /// Which validation messages reach the logger
    pub debug_severity: DebugSeverity,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            app_name: "Pulsar Application".to_string(),
            app_version: (1, 0, 0),
            debug_severity: DebugSeverity::ErrorsAndWarnings,
        }
    }
}

/// One-frame transient allocation in CPU-writable, GPU-readable memory
///
/// Produced by [`GraphicsDevice::allocate_gpu`]; automatically invalidated
/// when the owning command list's frame slot is reused.
#[derive(Clone, Default)]
pub struct GpuAllocation {
    /// Buffer the allocation lives in; bindable like any other buffer
    pub buffer: GpuBuffer,
    /// Allocation's offset from the buffer's beginning
    pub offset: u64,
    /// Allocation size in bytes
    pub size: u64,
}

impl GpuAllocation {
    /// Whether the allocation succeeded
    pub fn is_valid(&self) -> bool {
        self.buffer.is_valid() && self.buffer.mapped().is_some()
    }

    /// Copy `data` into the allocation (CPU side, visible to this frame's GPU work)
    pub fn write(&self, data: &[u8]) {
        debug_assert!(data.len() as u64 <= self.size);
        if let Some(mapped) = self.buffer.mapped() {
            mapped.write(self.offset, data);
        }
    }
}

/// Main graphics device trait
///
/// Implemented by backend devices (e.g. `VulkanDevice`). Creation methods
/// fill the supplied handle and return `Err` on failure, leaving the handle
/// invalid; they never panic except on unrecoverable device loss.
pub trait GraphicsDevice: Send + Sync {
    // ===== RESOURCE CREATION (any thread) =====

    /// Create a swapchain for a window, or rebuild the one `swapchain`
    /// already refers to in place (same handle identity).
    fn create_swapchain(
        &self,
        desc: &SwapChainDesc,
        window: &Window,
        swapchain: &mut SwapChain,
    ) -> Result<()>;

    /// Create a buffer; initial data is uploaded through the copy allocator
    /// without blocking on GPU completion.
    fn create_buffer(
        &self,
        desc: &GpuBufferDesc,
        init_data: Option<&[u8]>,
        buffer: &mut GpuBuffer,
    ) -> Result<()>;

    /// Create a texture; one `SubresourceData` per array layer and mip level.
    fn create_texture(
        &self,
        desc: &TextureDesc,
        init_data: Option<&[SubresourceData<'_>]>,
        texture: &mut Texture,
    ) -> Result<()>;

    /// Create a shader module from opaque bytecode
    fn create_shader(&self, stage: ShaderStage, bytecode: &[u8], shader: &mut Shader)
        -> Result<()>;

    /// Create a sampler state
    fn create_sampler(&self, desc: &SamplerDesc, sampler: &mut Sampler) -> Result<()>;

    /// Create a pipeline state
    ///
    /// Fails (without caching partial state) when no valid shader stage is
    /// attached or the backend rejects the description.
    fn create_pipeline_state(&self, desc: &PipelineStateDesc, pso: &mut PipelineState)
        -> Result<()>;

    /// Create a render pass over a fixed set of texture attachments
    fn create_render_pass(&self, desc: &RenderPassDesc, render_pass: &mut RenderPass)
        -> Result<()>;

    // ===== FRAME LIFECYCLE =====

    /// Begin a pooled command list for `queue`
    ///
    /// Thread-safe; an atomic counter selects (or creates) the next pooled
    /// list and resets its per-buffered-frame state. The returned handle is
    /// owned by the calling thread until `submit_command_lists`.
    fn begin_command_list(&self, queue: QueueType) -> Result<CommandList>;

    /// Submit every command list begun since the previous call
    ///
    /// Called once per application frame from a single thread: ends all
    /// lists, groups them by queue, attaches swapchain acquire/release
    /// synchronization, submits each queue signaling its tracking counter,
    /// inserts the cross-queue barrier for the next frame, advances the
    /// frame counter, performs the bounded frame-pacing wait and finally
    /// runs deferred destruction and the pipeline cache merge.
    fn submit_command_lists(&self) -> Result<()>;

    /// Wait for all GPU queues to drain (shutdown path)
    fn wait_idle(&self) -> Result<()>;

    // ===== COMMAND RECORDING (single thread per list) =====

    /// Begin rendering to a swapchain (implicit image acquire)
    ///
    /// A stale surface is rebuilt in place and the acquire retried once; a
    /// second consecutive failure drops only this frame's presentation.
    fn begin_render_pass_to_swapchain(&self, swapchain: &SwapChain, cmd: CommandList)
        -> Result<()>;

    /// Begin an offscreen render pass
    fn begin_render_pass(&self, render_pass: &RenderPass, cmd: CommandList) -> Result<()>;

    /// End the active render pass
    fn end_render_pass(&self, cmd: CommandList);

    fn bind_viewports(&self, viewports: &[Viewport], cmd: CommandList);
    fn bind_scissor_rects(&self, rects: &[Rect], cmd: CommandList);
    fn bind_stencil_ref(&self, value: u32, cmd: CommandList);
    fn bind_pipeline_state(&self, pso: &PipelineState, cmd: CommandList);
    fn bind_vertex_buffers(
        &self,
        buffers: &[&GpuBuffer],
        strides: &[u32],
        offsets: Option<&[u64]>,
        cmd: CommandList,
    );
    fn bind_index_buffer(
        &self,
        buffer: &GpuBuffer,
        format: IndexBufferFormat,
        offset: u64,
        cmd: CommandList,
    );
    fn bind_resource(&self, resource: &GpuResource, slot: u32, cmd: CommandList);
    fn bind_sampler(&self, sampler: &Sampler, slot: u32, cmd: CommandList);
    fn bind_constant_buffer(&self, buffer: &GpuBuffer, slot: u32, cmd: CommandList, offset: u64);

    /// Record a buffer-to-buffer copy; not allowed inside a render pass
    fn copy_buffer(
        &self,
        dst: &GpuBuffer,
        dst_offset: u64,
        src: &GpuBuffer,
        src_offset: u64,
        size: u64,
        cmd: CommandList,
    );

    fn draw(&self, vertex_count: u32, start_vertex: u32, cmd: CommandList);
    fn draw_indexed(&self, index_count: u32, start_index: u32, base_vertex: i32, cmd: CommandList);

    // ===== TRANSIENT MEMORY =====

    /// Allocate one-frame CPU-writable, GPU-readable memory for `cmd`
    ///
    /// Backed by a per-command-list linear allocator that grows by doubling;
    /// contents are valid until the command list's frame slot is reused.
    fn allocate_gpu(&self, size: u64, cmd: CommandList) -> Result<GpuAllocation>;

    /// Minimum required alignment for offsets into buffers of this kind
    fn min_offset_alignment(&self, desc: &GpuBufferDesc) -> u64;

    /// Update a `MemoryAccess::Default` buffer through a staging allocation
    /// and a GPU copy. Cannot be used inside a render pass.
    fn update_buffer(&self, buffer: &GpuBuffer, data: &[u8], cmd: CommandList) -> Result<()> {
        if !buffer.is_valid() || data.is_empty() {
            return Ok(());
        }
        let size = (data.len() as u64).min(buffer.desc.size);
        let allocation = self.allocate_gpu(size, cmd)?;
        allocation.write(&data[..size as usize]);
        self.copy_buffer(buffer, 0, &allocation.buffer, allocation.offset, size, cmd);
        Ok(())
    }

    /// Bind a constant buffer filled with `data` for this command list only
    ///
    /// CPU-writes into an UPLOAD allocation, so this is legal inside a
    /// render pass; the slot is bound with the allocation's dynamic offset.
    fn bind_dynamic_constant_buffer(
        &self,
        data: &[u8],
        slot: u32,
        cmd: CommandList,
    ) -> Result<()> {
        let allocation = self.allocate_gpu(data.len() as u64, cmd)?;
        allocation.write(data);
        self.bind_constant_buffer(&allocation.buffer, slot, cmd, allocation.offset);
        Ok(())
    }

    // ===== DIAGNOSTICS & TELEMETRY =====

    /// Attach a debug label to a resource for backend tooling
    fn set_name(&self, resource: &GpuResource, name: &str);

    /// Open a profiling marker scope on a command list
    fn begin_event(&self, name: &str, cmd: CommandList);

    /// Close the innermost profiling marker scope
    fn end_event(&self, cmd: CommandList);

    /// Video memory statistics
    fn memory_usage(&self) -> MemoryUsage;

    /// Frames submitted so far
    fn frame_count(&self) -> u64;

    /// Index into per-buffered-frame arrays for the current frame
    fn buffer_index(&self) -> u32 {
        (self.frame_count() % BUFFER_COUNT as u64) as u32
    }

    /// Draw statistics for the last submitted frame
    fn frame_stats(&self) -> FrameStats;
}
