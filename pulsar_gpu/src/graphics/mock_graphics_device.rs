/// Mock GraphicsDevice for unit tests (no GPU required)
///
/// Implements the full device trait over a simulated GPU: backend objects
/// live in slotmap arenas, queues are counters that complete instantly at
/// submission (unless a test holds copy completion back), and recorded
/// command lists execute their copies byte-accurately at the frame
/// boundary. This exercises the same machinery the real backends use -
/// deferred destruction, the descriptor binder, the pipeline cache merge
/// and the copy allocator - without any graphics driver.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use winit::window::Window;

use crate::error::{Error, Result};
use crate::graphics::binder::DescriptorBinder;
use crate::graphics::copy::{CopyCommand, CopyCommandPool};
use crate::graphics::deferred::DeferredDestroyQueue;
use crate::graphics::device::{
    CommandList, DeviceConfig, FrameStats, GpuAllocation, GraphicsDevice, MemoryUsage,
    BUFFER_COUNT,
};
use crate::graphics::frame_sync::{frame_pace_target, CrossQueueSync};
use crate::graphics::pipeline_cache::PipelineStateCache;
use crate::graphics::render_pass::{compute_render_pass_hash, RenderPass, RenderPassDesc};
use crate::graphics::resource::{
    compute_pso_hash, hash_combine, GpuBuffer, GpuResource, MappedMemory, PipelineState,
    PipelineStateDesc, ResourceKind, Sampler, Shader, SwapChain, Texture,
};
use crate::graphics::types::{
    align_to, GpuBufferDesc, IndexBufferFormat, MemoryAccess, QueueType, Rect, SamplerDesc,
    ShaderStage, SubresourceData, SwapChainDesc, TextureDesc, Viewport,
};
use crate::{gpu_error, gpu_warn};

const LOG_SOURCE: &str = "pulsar::mock";

new_key_type! {
    pub struct BufferKey;
    pub struct TextureKey;
    pub struct ShaderKey;
    pub struct SamplerKey;
    pub struct PipelineKey;
    pub struct BinderPoolKey;
}

/// Simulated GPU object storage
#[derive(Default)]
struct MockGpuStorage {
    buffers: SlotMap<BufferKey, Vec<u8>>,
    textures: SlotMap<TextureKey, Vec<u8>>,
    shaders: SlotMap<ShaderKey, ()>,
    samplers: SlotMap<SamplerKey, ()>,
    pipelines: SlotMap<PipelineKey, ()>,
    binder_pools: SlotMap<BinderPoolKey, u32>,
}

/// Per-kind deferred destruction queues, one lock over all of them
#[derive(Default)]
struct MockDestroyers {
    buffers: DeferredDestroyQueue<BufferKey>,
    textures: DeferredDestroyQueue<TextureKey>,
    shaders: DeferredDestroyQueue<ShaderKey>,
    samplers: DeferredDestroyQueue<SamplerKey>,
    pipelines: DeferredDestroyQueue<PipelineKey>,
    binder_pools: DeferredDestroyQueue<BinderPoolKey>,
}

/// Owns simulated backend objects and their deferred destruction
///
/// Handle drops retire objects here from any thread; `update` finalizes
/// entries whose retirement frame has aged out of the buffering depth.
pub struct MockAllocationHandler {
    gpu: Mutex<MockGpuStorage>,
    destroyers: Mutex<MockDestroyers>,
    frame_count: AtomicU64,

    // Destruction counters observed by tests
    pub destroyed_buffers: AtomicU64,
    pub destroyed_textures: AtomicU64,
    pub destroyed_shaders: AtomicU64,
    pub destroyed_samplers: AtomicU64,
    pub destroyed_pipelines: AtomicU64,
    pub destroyed_binder_pools: AtomicU64,
}

impl MockAllocationHandler {
    fn new() -> Self {
        Self {
            gpu: Mutex::new(MockGpuStorage::default()),
            destroyers: Mutex::new(MockDestroyers::default()),
            frame_count: AtomicU64::new(0),
            destroyed_buffers: AtomicU64::new(0),
            destroyed_textures: AtomicU64::new(0),
            destroyed_shaders: AtomicU64::new(0),
            destroyed_samplers: AtomicU64::new(0),
            destroyed_pipelines: AtomicU64::new(0),
            destroyed_binder_pools: AtomicU64::new(0),
        }
    }

    fn frame(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    fn retire_pipeline(&self, key: PipelineKey) {
        let mut destroyers = self.destroyers.lock().unwrap();
        destroyers.pipelines.push(key, self.frame());
    }

    fn retire_binder_pool(&self, key: BinderPoolKey) {
        let mut destroyers = self.destroyers.lock().unwrap();
        destroyers.binder_pools.push(key, self.frame());
    }

    /// Finalize everything retired more than `buffer_count` frames ago
    fn update(&self, frame_count: u64, buffer_count: u64) {
        self.frame_count.store(frame_count, Ordering::Release);
        let mut destroyers = self.destroyers.lock().unwrap();
        let mut gpu = self.gpu.lock().unwrap();

        destroyers.buffers.drain_expired(frame_count, buffer_count, |key| {
            gpu.buffers.remove(key);
            self.destroyed_buffers.fetch_add(1, Ordering::Relaxed);
        });
        destroyers.textures.drain_expired(frame_count, buffer_count, |key| {
            gpu.textures.remove(key);
            self.destroyed_textures.fetch_add(1, Ordering::Relaxed);
        });
        destroyers.shaders.drain_expired(frame_count, buffer_count, |key| {
            gpu.shaders.remove(key);
            self.destroyed_shaders.fetch_add(1, Ordering::Relaxed);
        });
        destroyers.samplers.drain_expired(frame_count, buffer_count, |key| {
            gpu.samplers.remove(key);
            self.destroyed_samplers.fetch_add(1, Ordering::Relaxed);
        });
        destroyers.pipelines.drain_expired(frame_count, buffer_count, |key| {
            gpu.pipelines.remove(key);
            self.destroyed_pipelines.fetch_add(1, Ordering::Relaxed);
        });
        destroyers.binder_pools.drain_expired(frame_count, buffer_count, |key| {
            gpu.binder_pools.remove(key);
            self.destroyed_binder_pools.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Live simulated objects of each kind (for leak assertions)
    pub fn live_counts(&self) -> (usize, usize, usize, usize, usize, usize) {
        let gpu = self.gpu.lock().unwrap();
        (
            gpu.buffers.len(),
            gpu.textures.len(),
            gpu.shaders.len(),
            gpu.samplers.len(),
            gpu.pipelines.len(),
            gpu.binder_pools.len(),
        )
    }
}

// ===== BACKEND STATE OBJECTS =====

struct MockBufferState {
    handler: Arc<MockAllocationHandler>,
    key: BufferKey,
    /// CPU-visible storage (UPLOAD/READBACK); DEFAULT buffers live in the arena
    _storage: Option<Box<[u8]>>,
}

impl Drop for MockBufferState {
    fn drop(&mut self) {
        let mut destroyers = self.handler.destroyers.lock().unwrap();
        let frame = self.handler.frame();
        destroyers.buffers.push(self.key, frame);
    }
}

struct MockTextureState {
    handler: Arc<MockAllocationHandler>,
    key: TextureKey,
}

impl Drop for MockTextureState {
    fn drop(&mut self) {
        let mut destroyers = self.handler.destroyers.lock().unwrap();
        let frame = self.handler.frame();
        destroyers.textures.push(self.key, frame);
    }
}

struct MockShaderState {
    handler: Arc<MockAllocationHandler>,
    key: ShaderKey,
}

impl Drop for MockShaderState {
    fn drop(&mut self) {
        let mut destroyers = self.handler.destroyers.lock().unwrap();
        let frame = self.handler.frame();
        destroyers.shaders.push(self.key, frame);
    }
}

struct MockSamplerState {
    handler: Arc<MockAllocationHandler>,
    key: SamplerKey,
}

impl Drop for MockSamplerState {
    fn drop(&mut self) {
        let mut destroyers = self.handler.destroyers.lock().unwrap();
        let frame = self.handler.frame();
        destroyers.samplers.push(self.key, frame);
    }
}

/// Pipeline state handles carry no arena object; backend pipelines are
/// created lazily at draw time and owned by the cache.
struct MockPipelineStateState;

struct MockRenderPassState;

struct MockSwapchainState {
    inner: Mutex<MockSwapchainInner>,
    /// Number of acquires a test wants to fail with "out of date"
    fail_next_acquires: AtomicU32,
    pub rebuild_count: AtomicU64,
    pub present_count: AtomicU64,
}

struct MockSwapchainInner {
    image_count: u32,
    image_index: u32,
    width: u32,
    height: u32,
}

// ===== COPY ALLOCATOR =====

#[derive(Clone)]
struct RecordedCopy {
    dst: GpuBuffer,
    dst_offset: u64,
    src: GpuBuffer,
    src_offset: u64,
    size: u64,
}

struct MockCopyPayload {
    staging: GpuBuffer,
    copies: Vec<RecordedCopy>,
    executed: bool,
}

struct MockCopyAllocator {
    pool: CopyCommandPool<MockCopyPayload>,
    /// Copy counter value the "GPU" has completed
    completed: u64,
    /// While set, `completed` does not advance at flush (test control)
    hold_completion: bool,
}

// ===== COMMAND LISTS =====

enum RecordedCommand {
    CopyBuffer(RecordedCopy),
    Draw { vertex_count: u32 },
    DrawIndexed { index_count: u32 },
}

#[derive(Default)]
struct MockBinderPool {
    key: Option<BinderPoolKey>,
    capacity: u32,
    allocated: u32,
}

#[derive(Default)]
struct LinearAllocatorSlot {
    buffer: GpuBuffer,
    offset: u64,
    alignment: u64,
}

struct MockCommandListState {
    queue: QueueType,
    binder: DescriptorBinder,
    binder_pools: [MockBinderPool; BUFFER_COUNT as usize],
    frame_allocators: [LinearAllocatorSlot; BUFFER_COUNT as usize],

    active_pso: Option<PipelineState>,
    active_renderpass_hash: u64,
    in_render_pass: bool,
    dirty_pso: bool,
    prev_pipeline_hash: u64,
    vertexbuffer_hash: u64,
    vertexbuffer_strides: [u32; 8],

    pipelines_local: FxHashMap<u64, PipelineKey>,
    recorded: Vec<RecordedCommand>,
    prev_swapchains: Vec<SwapChain>,
    present_skipped: bool,

    /// Binding-set allocations performed (test observability)
    descriptor_allocations: u64,
    pool_growths: u64,
    events: Vec<String>,
}

impl MockCommandListState {
    fn new(queue: QueueType) -> Self {
        Self {
            queue,
            binder: DescriptorBinder::new(),
            binder_pools: Default::default(),
            frame_allocators: Default::default(),
            active_pso: None,
            active_renderpass_hash: 0,
            in_render_pass: false,
            dirty_pso: false,
            prev_pipeline_hash: 0,
            vertexbuffer_hash: 0,
            vertexbuffer_strides: [0; 8],
            pipelines_local: FxHashMap::default(),
            recorded: Vec::new(),
            prev_swapchains: Vec::new(),
            present_skipped: false,
            descriptor_allocations: 0,
            pool_growths: 0,
            events: Vec::new(),
        }
    }

    /// Dynamic offset currently bound to a CBV slot (test inspection)
    fn table_cbv_offset(&self, slot: usize) -> u64 {
        self.binder.table.cbv_offset[slot]
    }

    fn reset(&mut self, queue: QueueType, buffer_index: usize) {
        self.queue = queue;
        self.binder.reset();
        self.binder_pools[buffer_index].allocated = 0;
        self.frame_allocators[buffer_index].offset = 0;
        self.active_pso = None;
        self.active_renderpass_hash = 0;
        self.in_render_pass = false;
        self.dirty_pso = false;
        self.prev_pipeline_hash = 0;
        self.vertexbuffer_hash = 0;
        self.vertexbuffer_strides = [0; 8];
        self.recorded.clear();
        self.prev_swapchains.clear();
        self.present_skipped = false;
        self.events.clear();
    }
}

// ===== THE DEVICE =====

/// Mock device implementing [`GraphicsDevice`] over simulated hardware
pub struct MockGraphicsDevice {
    handler: Arc<MockAllocationHandler>,
    config: DeviceConfig,

    frame_count: AtomicU64,
    cmd_count: AtomicU32,
    commandlists: RwLock<Vec<Arc<Mutex<MockCommandListState>>>>,

    pso_cache: Mutex<PipelineStateCache<PipelineKey>>,
    copy_allocator: Mutex<MockCopyAllocator>,
    queue_sync: Mutex<CrossQueueSync>,

    last_frame_stats: Mutex<FrameStats>,
    names: Mutex<FxHashMap<usize, String>>,

    /// Binding sets one binder pool holds before it must grow
    binder_pool_capacity: u32,
    /// Video memory the simulated adapter reports
    memory_budget: u64,
    memory_used: AtomicU64,
}

impl MockGraphicsDevice {
    pub fn new() -> Self {
        Self::with_binder_pool_capacity(256)
    }

    pub fn with_binder_pool_capacity(capacity: u32) -> Self {
        Self {
            handler: Arc::new(MockAllocationHandler::new()),
            config: DeviceConfig::default(),
            frame_count: AtomicU64::new(0),
            cmd_count: AtomicU32::new(0),
            commandlists: RwLock::new(Vec::new()),
            pso_cache: Mutex::new(PipelineStateCache::new()),
            copy_allocator: Mutex::new(MockCopyAllocator {
                pool: CopyCommandPool::new(),
                completed: 0,
                hold_completion: false,
            }),
            queue_sync: Mutex::new(CrossQueueSync::new()),
            last_frame_stats: Mutex::new(FrameStats::default()),
            names: Mutex::new(FxHashMap::default()),
            binder_pool_capacity: capacity,
            memory_budget: 256 * 1024 * 1024,
            memory_used: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn allocation_handler(&self) -> &MockAllocationHandler {
        &self.handler
    }

    /// Stop the simulated copy queue from completing until released
    pub fn hold_copy_completion(&self, hold: bool) {
        self.copy_allocator.lock().unwrap().hold_completion = hold;
    }

    pub fn copy_free_count(&self) -> usize {
        self.copy_allocator.lock().unwrap().pool.free_count()
    }

    pub fn copy_in_flight(&self) -> usize {
        self.copy_allocator.lock().unwrap().pool.in_flight()
    }

    /// Merged pipelines in the global cache
    pub fn pipeline_cache_len(&self) -> usize {
        self.pso_cache.lock().unwrap().len()
    }

    /// Arm `count` consecutive "surface out of date" acquire failures
    pub fn fail_next_swapchain_acquires(&self, swapchain: &SwapChain, count: u32) {
        if let Some(state) = swapchain.resource.internal_as::<MockSwapchainState>() {
            state.fail_next_acquires.store(count, Ordering::Release);
        }
    }

    pub fn swapchain_rebuild_count(&self, swapchain: &SwapChain) -> u64 {
        swapchain
            .resource
            .internal_as::<MockSwapchainState>()
            .map(|s| s.rebuild_count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn swapchain_extent(&self, swapchain: &SwapChain) -> (u32, u32) {
        swapchain
            .resource
            .internal_as::<MockSwapchainState>()
            .map(|s| {
                let inner = s.inner.lock().unwrap();
                (inner.width, inner.height)
            })
            .unwrap_or((0, 0))
    }

    pub fn swapchain_present_count(&self, swapchain: &SwapChain) -> u64 {
        swapchain
            .resource
            .internal_as::<MockSwapchainState>()
            .map(|s| s.present_count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn descriptor_allocation_count(&self, cmd: CommandList) -> u64 {
        let state = self.cmd_state(cmd);
        let state = state.lock().unwrap();
        state.descriptor_allocations
    }

    pub fn binder_pool_growths(&self, cmd: CommandList) -> u64 {
        let state = self.cmd_state(cmd);
        let state = state.lock().unwrap();
        state.pool_growths
    }

    pub fn debug_name(&self, resource: &GpuResource) -> Option<String> {
        self.names.lock().unwrap().get(&resource.backing_id()).cloned()
    }

    fn cmd_state(&self, cmd: CommandList) -> Arc<Mutex<MockCommandListState>> {
        let lists = self.commandlists.read().unwrap();
        lists[cmd.index()].clone()
    }

    fn buffer_index_now(&self) -> usize {
        (self.frame_count.load(Ordering::Acquire) % BUFFER_COUNT as u64) as usize
    }

    /// Read `size` bytes out of a simulated buffer (mapped storage or arena)
    fn read_buffer_bytes(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8> {
        let mut out = vec![0u8; size as usize];
        if let Some(mapped) = buffer.mapped() {
            mapped.read(offset, &mut out);
        } else if let Some(state) = buffer.resource.internal_as::<MockBufferState>() {
            let gpu = self.handler.gpu.lock().unwrap();
            if let Some(bytes) = gpu.buffers.get(state.key) {
                let start = offset as usize;
                out.copy_from_slice(&bytes[start..start + size as usize]);
            }
        }
        out
    }

    fn write_buffer_bytes(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        if let Some(mapped) = buffer.mapped() {
            mapped.write(offset, data);
        } else if let Some(state) = buffer.resource.internal_as::<MockBufferState>() {
            let mut gpu = self.handler.gpu.lock().unwrap();
            if let Some(bytes) = gpu.buffers.get_mut(state.key) {
                let start = offset as usize;
                bytes[start..start + data.len()].copy_from_slice(data);
            }
        }
    }

    /// Read the full contents of a simulated buffer (test helper)
    pub fn read_buffer(&self, buffer: &GpuBuffer) -> Vec<u8> {
        self.read_buffer_bytes(buffer, 0, buffer.desc.size)
    }

    /// Create or rebuild a swapchain without a window (test helper; the
    /// simulated surface has no platform handle to bind to)
    pub fn create_headless_swapchain(
        &self,
        desc: &SwapChainDesc,
        swapchain: &mut SwapChain,
    ) -> Result<()> {
        self.create_swapchain_internal(desc, swapchain)
    }

    fn create_swapchain_internal(
        &self,
        desc: &SwapChainDesc,
        swapchain: &mut SwapChain,
    ) -> Result<()> {
        if let Some(state) = swapchain.resource.internal_as::<MockSwapchainState>() {
            // Rebuild in place: same handle identity, new extent
            let mut inner = state.inner.lock().unwrap();
            inner.width = desc.width;
            inner.height = desc.height;
            inner.image_count = desc.buffer_count;
            state.rebuild_count.fetch_add(1, Ordering::AcqRel);
        } else {
            let state = Arc::new(MockSwapchainState {
                inner: Mutex::new(MockSwapchainInner {
                    image_count: desc.buffer_count,
                    image_index: 0,
                    width: desc.width,
                    height: desc.height,
                }),
                fail_next_acquires: AtomicU32::new(0),
                rebuild_count: AtomicU64::new(0),
                present_count: AtomicU64::new(0),
            });
            swapchain.resource = GpuResource {
                kind: ResourceKind::Swapchain,
                internal: Some(state),
                mapped: None,
            };
        }
        swapchain.desc = desc.clone();
        Ok(())
    }

    fn execute_copy(&self, copy: &RecordedCopy) {
        let bytes = self.read_buffer_bytes(&copy.src, copy.src_offset, copy.size);
        self.write_buffer_bytes(&copy.dst, copy.dst_offset, &bytes);
    }

    /// Lazy pipeline + binding-set materialization before a draw
    fn predraw(&self, state: &mut MockCommandListState) {
        // Pipeline: look up global cache, then the worker-local one, then create
        if state.dirty_pso {
            if state.active_pso.is_some() {
                let mut pipeline_hash = state.prev_pipeline_hash;
                hash_combine(&mut pipeline_hash, &state.vertexbuffer_hash);

                let in_global = self.pso_cache.lock().unwrap().contains(pipeline_hash);
                if !in_global && !state.pipelines_local.contains_key(&pipeline_hash) {
                    let key = self.handler.gpu.lock().unwrap().pipelines.insert(());
                    state.pipelines_local.insert(pipeline_hash, key);
                }
            }
            state.dirty_pso = false;
        }

        // Binding set: only when something changed since the previous draw
        if state.binder.is_dirty() {
            let dirty = state.binder.clear_dirty();
            if dirty.contains(crate::graphics::binder::BinderDirtyFlags::DESCRIPTOR) {
                let buffer_index = self.buffer_index_now();
                let pool = &mut state.binder_pools[buffer_index];
                if pool.key.is_none() {
                    pool.capacity = self.binder_pool_capacity;
                    pool.key =
                        Some(self.handler.gpu.lock().unwrap().binder_pools.insert(pool.capacity));
                }
                if pool.allocated >= pool.capacity {
                    // Pool exhausted: double it, defer-destroy the old one, retry
                    let old = pool.key.take().unwrap();
                    self.handler.retire_binder_pool(old);
                    pool.capacity *= 2;
                    pool.allocated = 0;
                    pool.key =
                        Some(self.handler.gpu.lock().unwrap().binder_pools.insert(pool.capacity));
                    state.pool_growths += 1;
                }
                pool.allocated += 1;
                state.descriptor_allocations += 1;
            }
            // OFFSET-only changes re-bind the existing set; no allocation
        }
    }

    fn make_buffer_handle(
        &self,
        desc: &GpuBufferDesc,
        init_data: Option<&[u8]>,
    ) -> Result<GpuBuffer> {
        let cpu_visible = matches!(desc.usage, MemoryAccess::Upload | MemoryAccess::Readback);

        let (storage, mapped, key) = if cpu_visible {
            let mut storage = vec![0u8; desc.size as usize].into_boxed_slice();
            let ptr = storage.as_mut_ptr();
            let key = self.handler.gpu.lock().unwrap().buffers.insert(Vec::new());
            (Some(storage), Some(MappedMemory::new(ptr, desc.size)), key)
        } else {
            let key = self
                .handler
                .gpu
                .lock()
                .unwrap()
                .buffers
                .insert(vec![0u8; desc.size as usize]);
            (None, None, key)
        };

        self.memory_used.fetch_add(desc.size, Ordering::Relaxed);

        let state = Arc::new(MockBufferState {
            handler: self.handler.clone(),
            key,
            _storage: storage,
        });

        let buffer = GpuBuffer {
            resource: GpuResource {
                kind: ResourceKind::Buffer,
                internal: Some(state),
                mapped,
            },
            desc: *desc,
        };

        if let Some(data) = init_data {
            if cpu_visible {
                buffer.mapped().unwrap().write(0, data);
            } else {
                self.stage_upload(&buffer, data)?;
            }
        }

        Ok(buffer)
    }

    /// Route initial data through the copy allocator (never blocks)
    fn stage_upload(&self, dst: &GpuBuffer, data: &[u8]) -> Result<()> {
        let mut allocator = self.copy_allocator.lock().unwrap();

        let mut cmd = match allocator.pool.acquire(data.len() as u64) {
            Some(cmd) if cmd.staging_capacity >= data.len() as u64 => cmd,
            reuse => {
                // No pooled command fits: build (or rebuild) the staging buffer
                let capacity = (data.len() as u64).next_power_of_two();
                let staging_desc = GpuBufferDesc {
                    size: capacity,
                    usage: MemoryAccess::Upload,
                    ..Default::default()
                };
                let staging = self.make_buffer_handle(&staging_desc, None)?;
                match reuse {
                    Some(mut cmd) => {
                        cmd.staging_capacity = capacity;
                        cmd.payload.staging = staging;
                        cmd
                    }
                    None => CopyCommand {
                        staging_capacity: capacity,
                        target: 0,
                        payload: MockCopyPayload {
                            staging,
                            copies: Vec::new(),
                            executed: false,
                        },
                    },
                }
            }
        };

        cmd.payload.staging.mapped().unwrap().write(0, data);
        cmd.payload.executed = false;
        cmd.payload.copies = vec![RecordedCopy {
            dst: dst.clone(),
            dst_offset: 0,
            src: cmd.payload.staging.clone(),
            src_offset: 0,
            size: data.len() as u64,
        }];

        allocator.pool.submit(cmd);
        Ok(())
    }

    /// Execute + reclaim the copy batch; returns the counter value queues
    /// must wait on to see this batch's copies
    fn flush_copies(&self) -> u64 {
        let mut allocator = self.copy_allocator.lock().unwrap();

        let mut pending = Vec::new();
        allocator.pool.for_each_in_flight(|cmd| {
            if !cmd.payload.executed {
                cmd.payload.executed = true;
                pending.extend(cmd.payload.copies.iter().cloned());
            }
        });
        for copy in &pending {
            self.execute_copy(copy);
        }

        if !allocator.hold_completion {
            allocator.completed = allocator.pool.fence_value();
        }
        let completed = allocator.completed;
        allocator.pool.flush(completed)
    }
}

impl Default for MockGraphicsDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for MockGraphicsDevice {
    fn create_swapchain(
        &self,
        desc: &SwapChainDesc,
        _window: &Window,
        swapchain: &mut SwapChain,
    ) -> Result<()> {
        self.create_swapchain_internal(desc, swapchain)
    }

    fn create_buffer(
        &self,
        desc: &GpuBufferDesc,
        init_data: Option<&[u8]>,
        buffer: &mut GpuBuffer,
    ) -> Result<()> {
        *buffer = self.make_buffer_handle(desc, init_data)?;
        Ok(())
    }

    fn create_texture(
        &self,
        desc: &TextureDesc,
        init_data: Option<&[SubresourceData<'_>]>,
        texture: &mut Texture,
    ) -> Result<()> {
        let mut bytes = Vec::new();
        if let Some(subresources) = init_data {
            for subresource in subresources {
                bytes.extend_from_slice(subresource.mem);
            }
        }
        self.memory_used.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        let key = self.handler.gpu.lock().unwrap().textures.insert(bytes);
        texture.resource = GpuResource {
            kind: ResourceKind::Texture,
            internal: Some(Arc::new(MockTextureState {
                handler: self.handler.clone(),
                key,
            })),
            mapped: None,
        };
        texture.desc = desc.clone();
        Ok(())
    }

    fn create_shader(
        &self,
        stage: ShaderStage,
        bytecode: &[u8],
        shader: &mut Shader,
    ) -> Result<()> {
        if bytecode.is_empty() {
            gpu_error!(LOG_SOURCE, "create_shader: empty bytecode");
            return Err(Error::InvalidResource("empty shader bytecode".to_string()));
        }
        let key = self.handler.gpu.lock().unwrap().shaders.insert(());
        shader.resource = GpuResource {
            kind: ResourceKind::Shader,
            internal: Some(Arc::new(MockShaderState {
                handler: self.handler.clone(),
                key,
            })),
            mapped: None,
        };
        shader.stage = stage;
        Ok(())
    }

    fn create_sampler(&self, desc: &SamplerDesc, sampler: &mut Sampler) -> Result<()> {
        let key = self.handler.gpu.lock().unwrap().samplers.insert(());
        sampler.resource = GpuResource {
            kind: ResourceKind::Sampler,
            internal: Some(Arc::new(MockSamplerState {
                handler: self.handler.clone(),
                key,
            })),
            mapped: None,
        };
        sampler.desc = desc.clone();
        Ok(())
    }

    fn create_pipeline_state(
        &self,
        desc: &PipelineStateDesc,
        pso: &mut PipelineState,
    ) -> Result<()> {
        let has_stage = desc.vs.as_ref().map_or(false, |s| s.is_valid())
            || desc.gs.as_ref().map_or(false, |s| s.is_valid())
            || desc.fs.as_ref().map_or(false, |s| s.is_valid());
        if !has_stage {
            gpu_error!(LOG_SOURCE, "Pipeline has no valid shader attached!");
            return Err(Error::PipelineCreationFailed(
                "no valid shader stage".to_string(),
            ));
        }

        pso.resource = GpuResource {
            kind: ResourceKind::PipelineState,
            internal: Some(Arc::new(MockPipelineStateState)),
            mapped: None,
        };
        pso.desc = desc.clone();
        pso.hash = compute_pso_hash(desc);
        Ok(())
    }

    fn create_render_pass(
        &self,
        desc: &RenderPassDesc,
        render_pass: &mut RenderPass,
    ) -> Result<()> {
        render_pass.resource = GpuResource {
            kind: ResourceKind::Unknown,
            internal: Some(Arc::new(MockRenderPassState)),
            mapped: None,
        };
        render_pass.desc = desc.clone();
        render_pass.hash = compute_render_pass_hash(desc);
        Ok(())
    }

    fn begin_command_list(&self, queue: QueueType) -> Result<CommandList> {
        let index = self.cmd_count.fetch_add(1, Ordering::AcqRel);

        {
            let lists = self.commandlists.read().unwrap();
            if (index as usize) < lists.len() {
                let state = lists[index as usize].clone();
                drop(lists);
                state.lock().unwrap().reset(queue, self.buffer_index_now());
                return Ok(CommandList::new(index));
            }
        }

        let mut lists = self.commandlists.write().unwrap();
        while lists.len() <= index as usize {
            lists.push(Arc::new(Mutex::new(MockCommandListState::new(queue))));
        }
        let state = lists[index as usize].clone();
        drop(lists);
        state.lock().unwrap().reset(queue, self.buffer_index_now());
        Ok(CommandList::new(index))
    }

    fn submit_command_lists(&self) -> Result<()> {
        let cmd_last = self.cmd_count.swap(0, Ordering::AcqRel);

        // Flush pending uploads so queue work sees their results
        let _copy_sync = self.flush_copies();

        // Execute every recorded list in submission order and merge caches
        let lists: Vec<Arc<Mutex<MockCommandListState>>> = {
            let lists = self.commandlists.read().unwrap();
            lists.iter().take(cmd_last as usize).cloned().collect()
        };

        let mut frame_stats = FrameStats::default();
        for queue in QueueType::ALL {
            for list in &lists {
                let mut state = list.lock().unwrap();
                if state.queue != queue {
                    continue;
                }
                for command in state.recorded.drain(..).collect::<Vec<_>>() {
                    match command {
                        RecordedCommand::CopyBuffer(copy) => self.execute_copy(&copy),
                        RecordedCommand::Draw { vertex_count } => {
                            frame_stats.draw_calls += 1;
                            frame_stats.triangle_count += vertex_count as u64 / 3;
                        }
                        RecordedCommand::DrawIndexed { index_count } => {
                            frame_stats.draw_calls += 1;
                            frame_stats.triangle_count += index_count as u64 / 3;
                        }
                    }
                }

                // Present swapchains touched by this list
                if !state.present_skipped {
                    for swapchain in &state.prev_swapchains {
                        if let Some(sc) = swapchain.resource.internal_as::<MockSwapchainState>() {
                            let mut inner = sc.inner.lock().unwrap();
                            inner.image_index = (inner.image_index + 1) % inner.image_count.max(1);
                            sc.present_count.fetch_add(1, Ordering::AcqRel);
                        }
                    }
                }
                state.prev_swapchains.clear();

                // Worker-local pipelines merge into the global cache; losers
                // are deferred-destroyed, never leaked
                let mut local = std::mem::take(&mut state.pipelines_local);
                self.pso_cache
                    .lock()
                    .unwrap()
                    .merge(&mut local, |key| self.handler.retire_pipeline(key));
            }
        }

        // Every queue signals its counter once per frame, then the cross-queue
        // barrier makes each queue's next submission wait on the others
        {
            let mut sync = self.queue_sync.lock().unwrap();
            for queue in QueueType::ALL {
                let next = sync.signaled(queue) + 1;
                sync.record_signal(queue, next);
            }
        }

        let frame_count = self.frame_count.fetch_add(1, Ordering::AcqRel) + 1;

        // Frame pacing: simulated queues complete instantly, so the bounded
        // wait reduces to checking the counters already reached the target
        if let Some(target) = frame_pace_target(frame_count, BUFFER_COUNT as u64) {
            let sync = self.queue_sync.lock().unwrap();
            for queue in QueueType::ALL {
                debug_assert!(sync.signaled(queue) >= target);
            }
        }

        self.handler.update(frame_count, BUFFER_COUNT as u64);

        *self.last_frame_stats.lock().unwrap() = frame_stats;
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }

    fn begin_render_pass_to_swapchain(
        &self,
        swapchain: &SwapChain,
        cmd: CommandList,
    ) -> Result<()> {
        let Some(sc) = swapchain.resource.internal_as::<MockSwapchainState>() else {
            gpu_error!(LOG_SOURCE, "begin_render_pass_to_swapchain: invalid swapchain");
            return Err(Error::InvalidResource("invalid swapchain".to_string()));
        };

        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();

        // Acquire with one rebuild-and-retry on a stale surface
        let mut attempts = 0;
        loop {
            let stale = sc.fail_next_acquires.load(Ordering::Acquire) > 0;
            if stale {
                sc.fail_next_acquires.fetch_sub(1, Ordering::AcqRel);
                sc.rebuild_count.fetch_add(1, Ordering::AcqRel);
                attempts += 1;
                if attempts > 1 {
                    gpu_error!(
                        LOG_SOURCE,
                        "Swapchain acquire failed after rebuild; skipping this frame's present"
                    );
                    state.present_skipped = true;
                    return Err(Error::BackendError("swapchain acquire failed".to_string()));
                }
                continue;
            }
            break;
        }

        let mut hash = 0u64;
        hash_combine(&mut hash, &swapchain.desc.format);
        state.active_renderpass_hash = hash;
        state.in_render_pass = true;
        state.prev_swapchains.push(swapchain.clone());
        Ok(())
    }

    fn begin_render_pass(&self, render_pass: &RenderPass, cmd: CommandList) -> Result<()> {
        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();
        state.active_renderpass_hash = render_pass.hash;
        state.in_render_pass = true;
        Ok(())
    }

    fn end_render_pass(&self, cmd: CommandList) {
        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();
        state.in_render_pass = false;
        state.active_renderpass_hash = 0;
    }

    fn bind_viewports(&self, _viewports: &[Viewport], _cmd: CommandList) {}

    fn bind_scissor_rects(&self, _rects: &[Rect], _cmd: CommandList) {}

    fn bind_stencil_ref(&self, _value: u32, _cmd: CommandList) {}

    fn bind_pipeline_state(&self, pso: &PipelineState, cmd: CommandList) {
        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();

        let mut pipeline_hash = pso.hash;
        hash_combine(&mut pipeline_hash, &state.active_renderpass_hash);
        if pipeline_hash == state.prev_pipeline_hash && state.active_pso.is_some() {
            return;
        }

        state.prev_pipeline_hash = pipeline_hash;
        state.active_pso = Some(pso.clone());
        state.dirty_pso = true;
    }

    fn bind_vertex_buffers(
        &self,
        buffers: &[&GpuBuffer],
        strides: &[u32],
        _offsets: Option<&[u64]>,
        cmd: CommandList,
    ) {
        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();

        let mut hash = 0u64;
        for (i, _buffer) in buffers.iter().enumerate().take(8) {
            let stride = strides.get(i).copied().unwrap_or(0);
            hash_combine(&mut hash, &stride);
            state.vertexbuffer_strides[i] = stride;
        }
        for i in buffers.len()..8 {
            state.vertexbuffer_strides[i] = 0;
        }

        if hash != state.vertexbuffer_hash {
            state.vertexbuffer_hash = hash;
            state.dirty_pso = true;
        }
    }

    fn bind_index_buffer(
        &self,
        _buffer: &GpuBuffer,
        _format: IndexBufferFormat,
        _offset: u64,
        _cmd: CommandList,
    ) {
    }

    fn bind_resource(&self, resource: &GpuResource, slot: u32, cmd: CommandList) {
        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();
        state.binder.bind_resource(slot as usize, resource);
    }

    fn bind_sampler(&self, sampler: &Sampler, slot: u32, cmd: CommandList) {
        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();
        state.binder.bind_sampler(slot as usize, sampler);
    }

    fn bind_constant_buffer(&self, buffer: &GpuBuffer, slot: u32, cmd: CommandList, offset: u64) {
        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();
        state.binder.bind_constant_buffer(slot as usize, buffer, offset);
    }

    fn copy_buffer(
        &self,
        dst: &GpuBuffer,
        dst_offset: u64,
        src: &GpuBuffer,
        src_offset: u64,
        size: u64,
        cmd: CommandList,
    ) {
        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();
        if state.in_render_pass {
            gpu_warn!(LOG_SOURCE, "copy_buffer recorded inside a render pass");
        }
        state.recorded.push(RecordedCommand::CopyBuffer(RecordedCopy {
            dst: dst.clone(),
            dst_offset,
            src: src.clone(),
            src_offset,
            size,
        }));
    }

    fn draw(&self, vertex_count: u32, _start_vertex: u32, cmd: CommandList) {
        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();
        self.predraw(&mut state);
        state.recorded.push(RecordedCommand::Draw { vertex_count });
    }

    fn draw_indexed(
        &self,
        index_count: u32,
        _start_index: u32,
        _base_vertex: i32,
        cmd: CommandList,
    ) {
        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();
        self.predraw(&mut state);
        state.recorded.push(RecordedCommand::DrawIndexed { index_count });
    }

    fn allocate_gpu(&self, size: u64, cmd: CommandList) -> Result<GpuAllocation> {
        if size == 0 {
            return Ok(GpuAllocation::default());
        }

        let state = self.cmd_state(cmd);
        let mut state = state.lock().unwrap();
        let buffer_index = self.buffer_index_now();
        let allocator = &mut state.frame_allocators[buffer_index];

        let free_space = allocator.buffer.desc.size.saturating_sub(allocator.offset);
        if size > free_space {
            let desc = GpuBufferDesc {
                usage: MemoryAccess::Upload,
                bind_flags: crate::graphics::types::BindFlags::CONSTANT_BUFFER
                    | crate::graphics::types::BindFlags::VERTEX_BUFFER
                    | crate::graphics::types::BindFlags::INDEX_BUFFER
                    | crate::graphics::types::BindFlags::SHADER_RESOURCE,
                ..Default::default()
            };
            let alignment = self.min_offset_alignment(&desc);
            let grown = GpuBufferDesc {
                size: align_to((allocator.buffer.desc.size + size) * 2, alignment),
                ..desc
            };
            allocator.buffer = self.make_buffer_handle(&grown, None)?;
            allocator.alignment = alignment;
            allocator.offset = 0;
        }

        let allocation = GpuAllocation {
            buffer: allocator.buffer.clone(),
            offset: allocator.offset,
            size,
        };
        allocator.offset += align_to(size, allocator.alignment.max(1));

        debug_assert!(allocation.is_valid());
        Ok(allocation)
    }

    fn min_offset_alignment(&self, desc: &GpuBufferDesc) -> u64 {
        if desc
            .bind_flags
            .contains(crate::graphics::types::BindFlags::CONSTANT_BUFFER)
        {
            256
        } else {
            16
        }
    }

    fn set_name(&self, resource: &GpuResource, name: &str) {
        if resource.is_valid() {
            self.names
                .lock()
                .unwrap()
                .insert(resource.backing_id(), name.to_string());
        }
    }

    fn begin_event(&self, name: &str, cmd: CommandList) {
        let state = self.cmd_state(cmd);
        state.lock().unwrap().events.push(name.to_string());
    }

    fn end_event(&self, _cmd: CommandList) {}

    fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            budget: self.memory_budget,
            usage: self.memory_used.load(Ordering::Relaxed),
        }
    }

    fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    fn frame_stats(&self) -> FrameStats {
        *self.last_frame_stats.lock().unwrap()
    }
}

#[cfg(test)]
#[path = "mock_graphics_device_tests.rs"]
mod tests;
