/// Internal backing states for device-created objects
///
/// Each state owns the raw Vulkan objects for one resource; dropping the
/// last handle runs the state's `Drop`, which enqueues everything on the
/// allocation handler rather than calling any destroy function directly.
/// In-flight GPU work may still reference the objects for up to the
/// buffering depth.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use pulsar_gpu::graphics::{SwapChainDesc, BINDER_CBV_COUNT};

use crate::allocation::AllocationHandler;

/// One reflected descriptor binding, stored in a thread-safe plain form
/// (the raw `vk::DescriptorSetLayoutBinding` carries a pointer and is
/// rebuilt on demand)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

impl LayoutBinding {
    pub fn to_vk(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.descriptor_count)
            .stage_flags(self.stage_flags)
    }
}

pub(crate) struct BufferVulkan {
    pub handler: Arc<AllocationHandler>,
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
}

impl Drop for BufferVulkan {
    fn drop(&mut self) {
        self.handler.retire_buffer(self.buffer, self.allocation.take());
    }
}

pub(crate) struct TextureVulkan {
    pub handler: Arc<AllocationHandler>,
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    /// Shader resource view
    pub srv: vk::ImageView,
    /// Render target view
    pub rtv: vk::ImageView,
    /// Depth stencil view
    pub dsv: vk::ImageView,
}

impl Drop for TextureVulkan {
    fn drop(&mut self) {
        if self.srv != vk::ImageView::null() {
            self.handler.retire_image_view(self.srv);
        }
        if self.rtv != vk::ImageView::null() {
            self.handler.retire_image_view(self.rtv);
        }
        if self.dsv != vk::ImageView::null() {
            self.handler.retire_image_view(self.dsv);
        }
        self.handler.retire_image(self.image, self.allocation.take());
    }
}

pub(crate) struct ShaderVulkan {
    pub handler: Arc<AllocationHandler>,
    pub module: vk::ShaderModule,
    pub stage_flags: vk::ShaderStageFlags,
    /// Descriptor bindings reflected from the bytecode
    pub layout_bindings: Vec<LayoutBinding>,
    /// Uniform block sizes per CBV slot (0 = whole size)
    pub uniform_buffer_sizes: [u64; BINDER_CBV_COUNT],
    /// Slots bound as dynamic uniform buffers
    pub uniform_buffer_dynamic_slots: Vec<u32>,
}

impl Drop for ShaderVulkan {
    fn drop(&mut self) {
        self.handler.retire_shader_module(self.module);
    }
}

pub(crate) struct SamplerVulkan {
    pub handler: Arc<AllocationHandler>,
    pub sampler: vk::Sampler,
}

impl Drop for SamplerVulkan {
    fn drop(&mut self) {
        self.handler.retire_sampler(self.sampler);
    }
}

/// Pipeline state backing
///
/// The pipeline layout and descriptor-set layout are owned by the device's
/// layout cache (shared across pipeline states with the same binding set),
/// so this state has no lifetime management of its own; the actual
/// `vk::Pipeline` objects are synthesized at draw time and owned by the
/// pipeline cache.
pub(crate) struct PipelineStateVulkan {
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub layout_bindings: Vec<LayoutBinding>,
    pub uniform_buffer_sizes: [u64; BINDER_CBV_COUNT],
    /// Sorted: the dynamic offsets array is packed in slot order
    pub uniform_buffer_dynamic_slots: Vec<u32>,
    pub binding_hash: u64,
}

pub(crate) struct RenderPassVulkan {
    pub handler: Arc<AllocationHandler>,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_values: Vec<vk::ClearValue>,
}

// SAFETY: vk::ClearValue is a plain data union; the raw handles are plain
// integers. Nothing here is touched concurrently without the device's locks.
unsafe impl Send for RenderPassVulkan {}
unsafe impl Sync for RenderPassVulkan {}

impl Drop for RenderPassVulkan {
    fn drop(&mut self) {
        self.handler.retire_render_pass(self.render_pass);
        self.handler.retire_framebuffer(self.framebuffer);
    }
}

/// Swapchain backing, rebuilt in place behind a mutex when the surface goes
/// stale (the external handle keeps its identity)
pub(crate) struct SwapChainVulkan {
    pub handler: Arc<AllocationHandler>,
    pub inner: Mutex<SwapChainInner>,
}

pub(crate) struct SwapChainInner {
    pub swapchain: vk::SwapchainKHR,
    pub surface: vk::SurfaceKHR,
    pub render_pass: vk::RenderPass,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub image_index: u32,
    pub semaphore_acquire: vk::Semaphore,
    pub semaphore_release: vk::Semaphore,
    pub desc: SwapChainDesc,
}

impl Drop for SwapChainVulkan {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap();
        for framebuffer in inner.framebuffers.drain(..) {
            self.handler.retire_framebuffer(framebuffer);
        }
        for view in inner.image_views.drain(..) {
            self.handler.retire_image_view(view);
        }
        self.handler.retire_render_pass(inner.render_pass);
        self.handler.retire_swapchain(inner.swapchain);
        self.handler.retire_surface(inner.surface);
        self.handler.retire_semaphore(inner.semaphore_acquire);
        self.handler.retire_semaphore(inner.semaphore_release);
    }
}
