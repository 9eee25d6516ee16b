/// Pooled command list state
///
/// One of these is handed out per `begin_command_list` call; the handle the
/// application sees is just an index into the device's pool. Each list owns
/// one backend command pool per buffered frame (so recording frame N can
/// overlap frame N-1 executing), its descriptor binder and pools, its
/// worker-local pipeline cache and its transient-memory linear allocator.
/// All of it is owned exclusively by the recording thread between begin and
/// submit.

use ash::vk;
use pulsar_gpu::graphics::{
    DescriptorBinder, GpuBuffer, PipelineState, QueueType, SwapChain, BUFFER_COUNT,
};
use rustc_hash::FxHashMap;

use crate::binder::DescriptorBinderPool;

/// Per-command-list transient upload memory, grown by doubling
#[derive(Default)]
pub(crate) struct GpuLinearAllocator {
    pub buffer: GpuBuffer,
    pub offset: u64,
    pub alignment: u64,
}

pub(crate) struct CommandListVulkan {
    pub queue: QueueType,
    pub command_pools: [vk::CommandPool; BUFFER_COUNT as usize],
    pub command_buffers: [vk::CommandBuffer; BUFFER_COUNT as usize],
    /// Queue family the command pools were created for
    pub pool_family: u32,
    /// Buffer index captured at begin; selects pool/buffer/binder pool
    pub current: usize,

    pub binder: DescriptorBinder,
    pub binder_pools: [DescriptorBinderPool; BUFFER_COUNT as usize],
    /// Last materialized binding set (re-bound on offset-only changes)
    pub descriptor_set: vk::DescriptorSet,

    pub active_pso: Option<PipelineState>,
    pub active_render_pass: vk::RenderPass,
    pub active_render_pass_hash: u64,
    pub in_render_pass: bool,

    pub dirty_pso: bool,
    /// PSO content hash + active render pass hash, set at bind
    pub prev_pipeline_hash: u64,
    pub vertexbuffer_hash: u64,
    pub vertexbuffer_strides: [u32; 8],

    /// Worker-local pipelines, merged into the global cache at submission
    pub pipelines_local: FxHashMap<u64, vk::Pipeline>,

    pub prev_swapchains: Vec<SwapChain>,
    pub present_skipped: bool,

    pub frame_allocators: [GpuLinearAllocator; BUFFER_COUNT as usize],

    pub draw_calls: u32,
    pub triangle_count: u64,
}

impl CommandListVulkan {
    pub fn new(queue: QueueType) -> Self {
        Self {
            queue,
            command_pools: [vk::CommandPool::null(); BUFFER_COUNT as usize],
            command_buffers: [vk::CommandBuffer::null(); BUFFER_COUNT as usize],
            pool_family: u32::MAX,
            current: 0,
            binder: DescriptorBinder::new(),
            binder_pools: Default::default(),
            descriptor_set: vk::DescriptorSet::null(),
            active_pso: None,
            active_render_pass: vk::RenderPass::null(),
            active_render_pass_hash: 0,
            in_render_pass: false,
            dirty_pso: false,
            prev_pipeline_hash: 0,
            vertexbuffer_hash: 0,
            vertexbuffer_strides: [0; 8],
            pipelines_local: FxHashMap::default(),
            prev_swapchains: Vec::new(),
            present_skipped: false,
            frame_allocators: Default::default(),
            draw_calls: 0,
            triangle_count: 0,
        }
    }

    /// Whether the backend objects for this list exist yet
    pub fn is_initialized(&self) -> bool {
        self.command_buffers[0] != vk::CommandBuffer::null()
    }

    /// Command buffer for the current reuse cycle
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffers[self.current]
    }

    /// Clear per-cycle recording state; backend pools are reset separately
    pub fn reset(&mut self, queue: QueueType, buffer_index: usize) {
        self.queue = queue;
        self.current = buffer_index;
        self.binder.reset();
        self.descriptor_set = vk::DescriptorSet::null();
        self.active_pso = None;
        self.active_render_pass = vk::RenderPass::null();
        self.active_render_pass_hash = 0;
        self.in_render_pass = false;
        self.dirty_pso = false;
        self.prev_pipeline_hash = 0;
        self.vertexbuffer_hash = 0;
        self.vertexbuffer_strides = [0; 8];
        self.prev_swapchains.clear();
        self.present_skipped = false;
        self.frame_allocators[buffer_index].offset = 0;
        self.draw_calls = 0;
        self.triangle_count = 0;
    }
}
