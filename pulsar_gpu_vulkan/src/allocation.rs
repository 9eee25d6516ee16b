/// Deferred destruction of Vulkan objects
///
/// Every backend object retired by a handle drop lands in one of these
/// frame-tagged FIFO queues; `update` runs once per frame and destroys only
/// entries older than the buffering depth, so the GPU can never observe a
/// freed object. Retirement happens from whatever thread drops the last
/// handle; one mutex serializes all queues against the per-frame drain.

use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator};
use pulsar_gpu::graphics::DeferredDestroyQueue;

#[derive(Default)]
struct Destroyers {
    buffers: DeferredDestroyQueue<(vk::Buffer, Option<Allocation>)>,
    images: DeferredDestroyQueue<(vk::Image, Option<Allocation>)>,
    image_views: DeferredDestroyQueue<vk::ImageView>,
    samplers: DeferredDestroyQueue<vk::Sampler>,
    shader_modules: DeferredDestroyQueue<vk::ShaderModule>,
    pipelines: DeferredDestroyQueue<vk::Pipeline>,
    descriptor_pools: DeferredDestroyQueue<vk::DescriptorPool>,
    render_passes: DeferredDestroyQueue<vk::RenderPass>,
    framebuffers: DeferredDestroyQueue<vk::Framebuffer>,
    swapchains: DeferredDestroyQueue<vk::SwapchainKHR>,
    surfaces: DeferredDestroyQueue<vk::SurfaceKHR>,
    semaphores: DeferredDestroyQueue<vk::Semaphore>,
    command_pools: DeferredDestroyQueue<vk::CommandPool>,
}

/// Owns the GPU memory allocator and all deferred-destroy queues
pub(crate) struct AllocationHandler {
    pub device: Arc<ash::Device>,
    pub allocator: Mutex<ManuallyDrop<Allocator>>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    destroyers: Mutex<Destroyers>,
    /// Mirror of the device frame counter, read at retirement time
    frame_count: AtomicU64,
    /// Bytes currently allocated through the allocator
    used_bytes: AtomicU64,
}

impl AllocationHandler {
    pub fn new(
        device: Arc<ash::Device>,
        allocator: Allocator,
        surface_loader: ash::khr::surface::Instance,
        swapchain_loader: ash::khr::swapchain::Device,
    ) -> Self {
        Self {
            device,
            allocator: Mutex::new(ManuallyDrop::new(allocator)),
            surface_loader,
            swapchain_loader,
            destroyers: Mutex::new(Destroyers::default()),
            frame_count: AtomicU64::new(0),
            used_bytes: AtomicU64::new(0),
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    pub fn track_allocated(&self, bytes: u64) {
        self.used_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    // ===== RETIREMENT (any thread) =====

    pub fn retire_buffer(&self, buffer: vk::Buffer, allocation: Option<Allocation>) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.buffers.push((buffer, allocation), frame);
    }

    pub fn retire_image(&self, image: vk::Image, allocation: Option<Allocation>) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.images.push((image, allocation), frame);
    }

    pub fn retire_image_view(&self, view: vk::ImageView) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.image_views.push(view, frame);
    }

    pub fn retire_sampler(&self, sampler: vk::Sampler) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.samplers.push(sampler, frame);
    }

    pub fn retire_shader_module(&self, module: vk::ShaderModule) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.shader_modules.push(module, frame);
    }

    pub fn retire_pipeline(&self, pipeline: vk::Pipeline) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.pipelines.push(pipeline, frame);
    }

    pub fn retire_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.descriptor_pools.push(pool, frame);
    }

    pub fn retire_render_pass(&self, render_pass: vk::RenderPass) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.render_passes.push(render_pass, frame);
    }

    pub fn retire_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.framebuffers.push(framebuffer, frame);
    }

    pub fn retire_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.swapchains.push(swapchain, frame);
    }

    pub fn retire_surface(&self, surface: vk::SurfaceKHR) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.surfaces.push(surface, frame);
    }

    pub fn retire_semaphore(&self, semaphore: vk::Semaphore) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.semaphores.push(semaphore, frame);
    }

    pub fn retire_command_pool(&self, pool: vk::CommandPool) {
        let mut destroyers = self.destroyers.lock().unwrap();
        let frame = self.frame();
        destroyers.command_pools.push(pool, frame);
    }

    // ===== PER-FRAME DRAIN =====

    /// Destroy everything retired more than `buffer_count` frames ago.
    /// This path cannot fail; a rejected free indicates a lifetime bug.
    pub fn update(&self, frame_count: u64, buffer_count: u64) {
        self.frame_count.store(frame_count, Ordering::Release);
        let mut d = self.destroyers.lock().unwrap();

        // Views before their images, framebuffers before their passes
        d.image_views
            .drain_expired(frame_count, buffer_count, |view| self.destroy_view(view));
        d.framebuffers
            .drain_expired(frame_count, buffer_count, |fb| self.destroy_framebuffer(fb));
        d.render_passes
            .drain_expired(frame_count, buffer_count, |rp| self.destroy_render_pass(rp));
        d.buffers
            .drain_expired(frame_count, buffer_count, |(b, a)| self.destroy_buffer(b, a));
        d.images
            .drain_expired(frame_count, buffer_count, |(i, a)| self.destroy_image(i, a));
        d.samplers
            .drain_expired(frame_count, buffer_count, |s| self.destroy_sampler(s));
        d.shader_modules
            .drain_expired(frame_count, buffer_count, |m| self.destroy_shader_module(m));
        d.pipelines
            .drain_expired(frame_count, buffer_count, |p| self.destroy_pipeline(p));
        d.descriptor_pools
            .drain_expired(frame_count, buffer_count, |p| self.destroy_descriptor_pool(p));
        d.swapchains
            .drain_expired(frame_count, buffer_count, |s| self.destroy_swapchain(s));
        d.surfaces
            .drain_expired(frame_count, buffer_count, |s| self.destroy_surface(s));
        d.semaphores
            .drain_expired(frame_count, buffer_count, |s| self.destroy_semaphore(s));
        d.command_pools
            .drain_expired(frame_count, buffer_count, |p| self.destroy_command_pool(p));
    }

    /// Destroy every pending entry regardless of age. Only valid after all
    /// queues have drained (device teardown).
    pub fn destroy_all(&self) {
        let mut d = self.destroyers.lock().unwrap();
        d.image_views.drain_all(|view| self.destroy_view(view));
        d.framebuffers.drain_all(|fb| self.destroy_framebuffer(fb));
        d.render_passes.drain_all(|rp| self.destroy_render_pass(rp));
        d.buffers.drain_all(|(b, a)| self.destroy_buffer(b, a));
        d.images.drain_all(|(i, a)| self.destroy_image(i, a));
        d.samplers.drain_all(|s| self.destroy_sampler(s));
        d.shader_modules.drain_all(|m| self.destroy_shader_module(m));
        d.pipelines.drain_all(|p| self.destroy_pipeline(p));
        d.descriptor_pools.drain_all(|p| self.destroy_descriptor_pool(p));
        d.swapchains.drain_all(|s| self.destroy_swapchain(s));
        d.surfaces.drain_all(|s| self.destroy_surface(s));
        d.semaphores.drain_all(|s| self.destroy_semaphore(s));
        d.command_pools.drain_all(|p| self.destroy_command_pool(p));
    }

    /// Drop the allocator ahead of device destruction (teardown only)
    pub fn release_allocator(&self) {
        let mut allocator = self.allocator.lock().unwrap();
        unsafe {
            ManuallyDrop::drop(&mut *allocator);
        }
    }

    // ===== KIND-SPECIFIC FREES =====

    fn free_allocation(&self, allocation: Option<Allocation>) {
        if let Some(allocation) = allocation {
            self.used_bytes.fetch_sub(allocation.size(), Ordering::Relaxed);
            let _ = self.allocator.lock().unwrap().free(allocation);
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: Option<Allocation>) {
        self.free_allocation(allocation);
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    fn destroy_image(&self, image: vk::Image, allocation: Option<Allocation>) {
        self.free_allocation(allocation);
        unsafe { self.device.destroy_image(image, None) };
    }

    fn destroy_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface_loader.destroy_surface(surface, None) };
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }
}
