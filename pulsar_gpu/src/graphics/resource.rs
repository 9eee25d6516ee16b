/// GPU resource handles with shared, type-erased backing objects
///
/// A handle owns a reference-counted, backend-defined state object. Copying
/// a handle is an `Arc` bump; dropping the last copy runs the backing
/// object's `Drop`, which enqueues a deferred-destroy request on the owning
/// device rather than freeing anything immediately (the GPU may still be
/// reading the object for up to the buffering depth).

use std::any::Any;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use rustc_hash::FxHasher;

use crate::graphics::types::{
    DepthStencilState, Format, GpuBufferDesc, PrimitiveTopology, RasterizerState, SamplerDesc,
    ShaderStage, SwapChainDesc, TextureDesc, VertexInputLayout,
};

/// What kind of backend object a [`GpuResource`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Shader,
    Sampler,
    PipelineState,
    Swapchain,
    #[default]
    Unknown,
}

/// CPU mapping of an UPLOAD/READBACK buffer
///
/// The pointer stays valid for the lifetime of the backing allocation, which
/// the owning handle keeps alive. Concurrent writes to disjoint ranges are
/// the caller's responsibility, same as any mapped GPU memory.
#[derive(Debug, Clone, Copy)]
pub struct MappedMemory {
    ptr: *mut u8,
    size: u64,
}

// SAFETY: the mapping targets persistently mapped allocation memory owned by
// the backing object; the raw pointer itself may be sent/shared freely.
unsafe impl Send for MappedMemory {}
unsafe impl Sync for MappedMemory {}

impl MappedMemory {
    pub fn new(ptr: *mut u8, size: u64) -> Self {
        Self { ptr, size }
    }

    /// Size of the mapped range in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Raw pointer to the start of the mapped range
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Copy `data` into the mapping at `offset`, bounds-checked
    pub fn write(&self, offset: u64, data: &[u8]) {
        assert!(offset + data.len() as u64 <= self.size, "mapped write out of range");
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.add(offset as usize),
                data.len(),
            );
        }
    }

    /// Copy bytes out of the mapping at `offset`, bounds-checked
    pub fn read(&self, offset: u64, out: &mut [u8]) {
        assert!(offset + out.len() as u64 <= self.size, "mapped read out of range");
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.add(offset as usize),
                out.as_mut_ptr(),
                out.len(),
            );
        }
    }
}

/// Base of every device-created object
///
/// `internal` is the backend's state object; the device layer never looks
/// inside it, only the backend that created it does (via [`GpuResource::internal_as`]).
#[derive(Clone, Default)]
pub struct GpuResource {
    pub kind: ResourceKind,
    pub internal: Option<Arc<dyn Any + Send + Sync>>,
    /// Present only for CPU-visible (UPLOAD/READBACK) buffers
    pub mapped: Option<MappedMemory>,
}

impl GpuResource {
    /// Whether a backing object exists
    pub fn is_valid(&self) -> bool {
        self.internal.is_some()
    }

    pub fn is_buffer(&self) -> bool {
        self.kind == ResourceKind::Buffer
    }

    pub fn is_texture(&self) -> bool {
        self.kind == ResourceKind::Texture
    }

    /// Whether two handles reference the same backing object
    pub fn shares_backing(&self, other: &GpuResource) -> bool {
        match (&self.internal, &other.internal) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Stable identity of the backing object (0 for invalid handles)
    pub fn backing_id(&self) -> usize {
        self.internal
            .as_ref()
            .map(|arc| Arc::as_ptr(arc) as *const () as usize)
            .unwrap_or(0)
    }

    /// Borrow the backend state as a concrete type
    pub fn internal_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.internal.as_ref()?.downcast_ref::<T>()
    }

    /// Clone the backend state `Arc` as a concrete type
    pub fn internal_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let arc = self.internal.clone()?;
        arc.downcast::<T>().ok()
    }

    /// Drop the backing reference, making the handle invalid
    pub fn release(&mut self) {
        self.internal = None;
        self.mapped = None;
        self.kind = ResourceKind::Unknown;
    }
}

/// GPU buffer handle
#[derive(Clone, Default)]
pub struct GpuBuffer {
    pub resource: GpuResource,
    pub desc: GpuBufferDesc,
}

impl GpuBuffer {
    pub fn is_valid(&self) -> bool {
        self.resource.is_valid()
    }

    pub fn desc(&self) -> &GpuBufferDesc {
        &self.desc
    }

    /// CPU mapping, present for UPLOAD/READBACK buffers
    pub fn mapped(&self) -> Option<&MappedMemory> {
        self.resource.mapped.as_ref()
    }
}

/// Texture handle
#[derive(Clone, Default)]
pub struct Texture {
    pub resource: GpuResource,
    pub desc: TextureDesc,
}

impl Texture {
    pub fn is_valid(&self) -> bool {
        self.resource.is_valid()
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

/// Shader module handle
#[derive(Clone)]
pub struct Shader {
    pub resource: GpuResource,
    pub stage: ShaderStage,
}

impl Default for Shader {
    fn default() -> Self {
        Self {
            resource: GpuResource::default(),
            stage: ShaderStage::Vertex,
        }
    }
}

impl Shader {
    pub fn is_valid(&self) -> bool {
        self.resource.is_valid()
    }
}

/// Sampler state handle
#[derive(Clone, Default)]
pub struct Sampler {
    pub resource: GpuResource,
    pub desc: SamplerDesc,
}

impl Sampler {
    pub fn is_valid(&self) -> bool {
        self.resource.is_valid()
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

/// Pipeline state descriptor
///
/// Shaders and fixed-function state blocks are optional; a pipeline without
/// any valid shader stage is rejected by `create_pipeline_state`.
#[derive(Clone, Default)]
pub struct PipelineStateDesc {
    pub vs: Option<Shader>,
    pub gs: Option<Shader>,
    pub fs: Option<Shader>,
    pub rasterizer_state: Option<RasterizerState>,
    pub depth_stencil_state: Option<DepthStencilState>,
    pub input_layout: Option<VertexInputLayout>,
    pub primitive_topology: PrimitiveTopology,
}

/// Pipeline state handle
///
/// `hash` is the content hash over the descriptor (shader identities,
/// fixed-function state, vertex layout, topology). The backend combines it
/// with the active render target formats to key its pipeline cache.
#[derive(Clone, Default)]
pub struct PipelineState {
    pub resource: GpuResource,
    pub desc: PipelineStateDesc,
    pub hash: u64,
}

impl PipelineState {
    pub fn is_valid(&self) -> bool {
        self.resource.is_valid()
    }
}

/// Swapchain handle
///
/// Rebuilt in place (same handle identity) when the backend reports the
/// surface is stale.
#[derive(Clone, Default)]
pub struct SwapChain {
    pub resource: GpuResource,
    pub desc: SwapChainDesc,
}

impl SwapChain {
    pub fn is_valid(&self) -> bool {
        self.resource.is_valid()
    }

    pub fn desc(&self) -> &SwapChainDesc {
        &self.desc
    }
}

// ===== CONTENT HASHING =====

/// Fold `value` into `seed` (FxHasher based, the device layer's hash of choice)
pub fn hash_combine<T: Hash>(seed: &mut u64, value: &T) {
    let mut hasher = FxHasher::default();
    seed.hash(&mut hasher);
    value.hash(&mut hasher);
    *seed = hasher.finish();
}

fn hash_rasterizer(seed: &mut u64, rs: &RasterizerState) {
    hash_combine(seed, &rs.fill_mode);
    hash_combine(seed, &rs.cull_mode);
    hash_combine(seed, &rs.front_face);
    hash_combine(seed, &rs.line_width.to_bits());
}

fn hash_depth_stencil(seed: &mut u64, dss: &DepthStencilState) {
    hash_combine(seed, &dss.depth_enable);
    hash_combine(seed, &dss.depth_write_mask);
    hash_combine(seed, &dss.depth_func);
    hash_combine(seed, &dss.stencil_enable);
    hash_combine(seed, &dss.stencil_read_mask);
    hash_combine(seed, &dss.stencil_write_mask);
    for face in [&dss.front_face, &dss.back_face] {
        hash_combine(seed, &face.stencil_fail_op);
        hash_combine(seed, &face.stencil_depth_fail_op);
        hash_combine(seed, &face.stencil_pass_op);
        hash_combine(seed, &face.stencil_func);
    }
}

fn hash_input_layout(seed: &mut u64, layout: &VertexInputLayout) {
    hash_combine(seed, &layout.elements.len());
    for element in &layout.elements {
        hash_combine(seed, &element.input_slot);
        hash_combine(seed, &element.format);
        hash_combine(seed, &element.aligned_byte_offset);
    }
}

/// Content hash of a pipeline state descriptor
///
/// Shaders contribute by backing identity (two pipelines using the same
/// shader module handles hash equal), fixed-function state by value.
pub fn compute_pso_hash(desc: &PipelineStateDesc) -> u64 {
    let mut hash = 0u64;
    hash_combine(&mut hash, &desc.vs.as_ref().map(|s| s.resource.backing_id()).unwrap_or(0));
    hash_combine(&mut hash, &desc.gs.as_ref().map(|s| s.resource.backing_id()).unwrap_or(0));
    hash_combine(&mut hash, &desc.fs.as_ref().map(|s| s.resource.backing_id()).unwrap_or(0));
    if let Some(rs) = &desc.rasterizer_state {
        hash_rasterizer(&mut hash, rs);
    }
    if let Some(dss) = &desc.depth_stencil_state {
        hash_depth_stencil(&mut hash, dss);
    }
    if let Some(layout) = &desc.input_layout {
        hash_input_layout(&mut hash, layout);
    }
    hash_combine(&mut hash, &desc.primitive_topology);
    hash
}

/// Content hash of a render target format set, folded into the pipeline key
/// since backend pipeline objects are format specific
pub fn hash_format_set(seed: &mut u64, color_formats: &[Format], depth_format: Option<Format>) {
    hash_combine(seed, &color_formats.len());
    for format in color_formats {
        hash_combine(seed, format);
    }
    hash_combine(seed, &depth_format);
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
