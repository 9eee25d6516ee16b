/// VulkanDevice - Vulkan implementation of the GraphicsDevice trait
///
/// Central object for creating resources and submitting command lists.
/// Multiple threads may create resources and record distinct command lists
/// concurrently; exactly one thread calls `submit_command_lists` per frame.
/// Cross-queue ordering uses one timeline semaphore per hardware queue:
/// every queue submits once per frame signaling its counter, and each
/// queue's next submission waits on every other queue's last-signaled
/// value.

use std::ffi::CString;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use rustc_hash::FxHashMap;
use winit::window::Window;

use pulsar_gpu::graphics::{
    align_to, compute_pso_hash, compute_render_pass_hash, frame_pace_target, hash_combine,
    AttachmentKind, BindFlags, CommandList, CrossQueueSync, DeviceConfig, FrameStats,
    GpuAllocation, GpuBuffer, GpuBufferDesc, GpuResource, GraphicsDevice, IndexBufferFormat,
    MappedMemory, MemoryAccess, MemoryUsage, PipelineState, PipelineStateCache, PipelineStateDesc,
    QueueType, Rect, RenderPass, RenderPassDesc, ResourceKind, ResourceMiscFlags, Sampler,
    SamplerDesc, Shader, ShaderStage, SubresourceData, SwapChain, SwapChainDesc, Texture,
    TextureDesc, TextureFilter, TextureKind, Viewport, BINDER_CBV_COUNT, BUFFER_COUNT,
    QUEUE_COUNT,
};
use pulsar_gpu::{gpu_err, gpu_error, gpu_info, gpu_warn, Error, Result};

use crate::allocation::AllocationHandler;
use crate::binder::flush_binder;
use crate::commandlist::CommandListVulkan;
use crate::converts::{
    convert_address_mode, convert_comparison_func, convert_cull_mode, convert_fill_mode,
    convert_format, convert_front_face, convert_image_layout, convert_load_op,
    convert_primitive_topology, convert_stencil_op, convert_store_op, parse_resource_state,
};
use crate::copy::CopyAllocator;
use crate::resources::{
    BufferVulkan, LayoutBinding, PipelineStateVulkan, RenderPassVulkan, SamplerVulkan,
    ShaderVulkan, SwapChainInner, SwapChainVulkan, TextureVulkan,
};
use crate::shader_reflect::{bytecode_to_words, reflect_shader};
use crate::swapchain::build_swapchain;

const LOG_SOURCE: &str = "pulsar::vulkan";

/// Bounded wait applied to every fence/semaphore wait
const SYNC_TIMEOUT_NS: u64 = 1_000_000_000;
/// Consecutive timeouts before a wait escalates to a hard error
const MAX_SYNC_RETRIES: u32 = 8;
/// Binding sets a fresh descriptor pool holds before growing
const BINDER_POOL_START_SIZE: u32 = 256;

/// Cached pipeline layout + descriptor set layout, shared by every pipeline
/// state with the same reflected binding set
struct PsoLayout {
    pipeline_layout: vk::PipelineLayout,
    descriptor_set_layout: vk::DescriptorSetLayout,
}

struct CommandQueueVulkan {
    queue: vk::Queue,
    semaphore: vk::Semaphore,
    /// Monotonically increasing value signaled on every submission
    last_signaled: u64,
    /// Cross-queue waits to attach to the next submission
    next_waits: Vec<(vk::Semaphore, u64)>,
}

struct QueueSet {
    queues: [CommandQueueVulkan; QUEUE_COUNT],
    sync: CrossQueueSync,
}

/// Per-buffered-frame transition command buffer; layout transitions for
/// freshly created textures are recorded here and submitted ahead of the
/// frame's graphics work
struct FrameResources {
    init_command_pool: vk::CommandPool,
    init_command_buffer: vk::CommandBuffer,
}

struct FrameResourceSet {
    frames: [FrameResources; BUFFER_COUNT as usize],
    init_submits: bool,
}

/// Vulkan graphics device
pub struct VulkanDevice {
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,

    graphics_family: u32,
    compute_family: u32,
    copy_family: u32,

    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    /// Device-level debug utils (object names, marker labels)
    debug_utils: Option<ash::ext::debug_utils::Device>,
    #[cfg(feature = "vulkan-validation")]
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    handler: Arc<AllocationHandler>,
    copy_allocator: CopyAllocator,

    frame_count: AtomicU64,
    cmd_count: AtomicU32,
    commandlists: RwLock<Vec<Arc<Mutex<CommandListVulkan>>>>,

    queues: Mutex<QueueSet>,
    frames: Mutex<FrameResourceSet>,

    pso_cache: RwLock<PipelineStateCache<vk::Pipeline>>,
    pso_layout_cache: Mutex<FxHashMap<u64, PsoLayout>>,
    pipeline_cache: vk::PipelineCache,

    last_frame_stats: Mutex<FrameStats>,
    config: DeviceConfig,
}

impl VulkanDevice {
    /// Create the device
    ///
    /// This is the one fatal initialization path: no usable Vulkan device
    /// (or a missing timeline-semaphore capability) returns `Err` and the
    /// application cannot render.
    pub fn new(window: &Window, config: DeviceConfig) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load().map_err(|e| {
                gpu_error!(LOG_SOURCE, "Failed to load Vulkan library: {:?}", e);
                Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
            })?;

            // Instance
            let app_name = CString::new(config.app_name.as_str())
                .unwrap_or_else(|_| CString::new("Pulsar Application").unwrap());
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(
                    0,
                    config.app_version.0,
                    config.app_version.1,
                    config.app_version.2,
                ))
                .engine_name(c"Pulsar")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_2);

            let display_handle = window.display_handle().map_err(|e| {
                gpu_error!(LOG_SOURCE, "Failed to get display handle: {}", e);
                Error::InitializationFailed(format!("Failed to get display handle: {}", e))
            })?;
            #[allow(unused_mut)]
            let mut extension_names =
                ash_window::enumerate_required_extensions(display_handle.as_raw())
                    .map_err(|e| {
                        gpu_error!(LOG_SOURCE, "Failed to get required extensions: {}", e);
                        Error::InitializationFailed(format!(
                            "Failed to get required extensions: {}",
                            e
                        ))
                    })?
                    .to_vec();

            #[allow(unused_mut)]
            let mut layer_names: Vec<*const std::ffi::c_char> = Vec::new();
            #[cfg(feature = "vulkan-validation")]
            if config.enable_validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
                layer_names.push(c"VK_LAYER_KHRONOS_validation".as_ptr());
            }

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                gpu_error!(LOG_SOURCE, "Failed to create Vulkan instance: {:?}", e);
                Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
            })?;

            #[cfg(feature = "vulkan-validation")]
            let debug_messenger = if config.enable_validation {
                let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
                let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(crate::debug::messenger::severity_flags(
                        config.debug_severity,
                    ))
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(crate::debug::messenger::debug_callback));
                match loader.create_debug_utils_messenger(&messenger_info, None) {
                    Ok(messenger) => {
                        gpu_warn!(
                            LOG_SOURCE,
                            "Vulkan validation layers enabled; expect a performance hit"
                        );
                        Some((loader, messenger))
                    }
                    Err(e) => {
                        gpu_warn!(LOG_SOURCE, "Debug messenger unavailable: {:?}", e);
                        None
                    }
                }
            } else {
                None
            };

            // Physical device: prefer a discrete GPU, settle for anything
            let physical_devices = instance.enumerate_physical_devices().map_err(|e| {
                gpu_error!(LOG_SOURCE, "Failed to enumerate physical devices: {:?}", e);
                Error::InitializationFailed(format!(
                    "Failed to enumerate physical devices: {:?}",
                    e
                ))
            })?;
            if physical_devices.is_empty() {
                gpu_error!(LOG_SOURCE, "No Vulkan-capable GPU found");
                return Err(Error::InitializationFailed(
                    "No Vulkan-capable GPU found".to_string(),
                ));
            }

            let mut physical_device = vk::PhysicalDevice::null();
            for candidate in &physical_devices {
                let props = instance.get_physical_device_properties(*candidate);
                let discrete = props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
                if discrete || physical_device == vk::PhysicalDevice::null() {
                    physical_device = *candidate;
                    if discrete {
                        break;
                    }
                }
            }
            let properties = instance.get_physical_device_properties(physical_device);
            let memory_properties =
                instance.get_physical_device_memory_properties(physical_device);

            // Timeline semaphores are load-bearing for all cross-queue sync
            let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
            let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features12);
            instance.get_physical_device_features2(physical_device, &mut features2);
            if features12.timeline_semaphore == vk::FALSE {
                gpu_error!(LOG_SOURCE, "Device lacks timeline semaphore support");
                return Err(Error::InitializationFailed(
                    "timeline semaphores unsupported".to_string(),
                ));
            }

            // Queue families: base selection first, then dedicated
            // transfer/compute families when the hardware has them
            let queue_families =
                instance.get_physical_device_queue_family_properties(physical_device);

            let mut graphics_family = u32::MAX;
            let mut compute_family = u32::MAX;
            let mut copy_family = u32::MAX;
            for (i, family) in queue_families.iter().enumerate() {
                let i = i as u32;
                if graphics_family == u32::MAX
                    && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                {
                    graphics_family = i;
                }
                if compute_family == u32::MAX
                    && family.queue_flags.contains(vk::QueueFlags::COMPUTE)
                {
                    compute_family = i;
                }
                if copy_family == u32::MAX
                    && family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                {
                    copy_family = i;
                }
            }
            for (i, family) in queue_families.iter().enumerate() {
                let i = i as u32;
                if family.queue_count > 0
                    && family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    && !family.queue_flags.contains(vk::QueueFlags::COMPUTE)
                {
                    copy_family = i;
                }
                if family.queue_count > 0
                    && family.queue_flags.contains(vk::QueueFlags::COMPUTE)
                    && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                {
                    compute_family = i;
                }
            }
            if graphics_family == u32::MAX {
                gpu_error!(LOG_SOURCE, "No graphics queue family found");
                return Err(Error::InitializationFailed(
                    "No graphics queue family found".to_string(),
                ));
            }

            let queue_priority = [1.0f32];
            let mut unique_families = vec![graphics_family];
            for family in [compute_family, copy_family] {
                if !unique_families.contains(&family) {
                    unique_families.push(family);
                }
            }
            let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
                .iter()
                .map(|family| {
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(*family)
                        .queue_priorities(&queue_priority)
                })
                .collect();

            let device_extension_names = [ash::khr::swapchain::NAME.as_ptr()];
            let mut enabled_features12 =
                vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
            let enabled_features = vk::PhysicalDeviceFeatures::default();
            let mut enabled_features2 = vk::PhysicalDeviceFeatures2::default()
                .features(enabled_features)
                .push_next(&mut enabled_features12);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .push_next(&mut enabled_features2);

            let device = Arc::new(
                instance
                    .create_device(physical_device, &device_create_info, None)
                    .map_err(|e| {
                        gpu_error!(LOG_SOURCE, "Failed to create logical device: {:?}", e);
                        Error::InitializationFailed(format!("Failed to create device: {:?}", e))
                    })?,
            );

            let graphics_queue = device.get_device_queue(graphics_family, 0);
            let compute_queue = device.get_device_queue(compute_family, 0);
            let copy_queue = device.get_device_queue(copy_family, 0);

            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
            let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
            let debug_utils = if cfg!(feature = "vulkan-validation") && config.enable_validation {
                Some(ash::ext::debug_utils::Device::new(&instance, &device))
            } else {
                None
            };

            // GPU memory allocator
            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: (*device).clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| {
                gpu_error!(LOG_SOURCE, "Failed to create GPU allocator: {:?}", e);
                Error::InitializationFailed(format!("Failed to create GPU allocator: {:?}", e))
            })?;

            let handler = Arc::new(AllocationHandler::new(
                device.clone(),
                allocator,
                surface_loader.clone(),
                swapchain_loader.clone(),
            ));

            let copy_allocator = CopyAllocator::new(device.clone(), copy_queue, copy_family)?;

            // One timeline semaphore per hardware queue
            let make_queue = |queue: vk::Queue| -> Result<CommandQueueVulkan> {
                let mut timeline_info = vk::SemaphoreTypeCreateInfo::default()
                    .semaphore_type(vk::SemaphoreType::TIMELINE)
                    .initial_value(0);
                let semaphore_info =
                    vk::SemaphoreCreateInfo::default().push_next(&mut timeline_info);
                let semaphore = device
                    .create_semaphore(&semaphore_info, None)
                    .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create queue semaphore: {:?}", e))?;
                Ok(CommandQueueVulkan {
                    queue,
                    semaphore,
                    last_signaled: 0,
                    next_waits: Vec::new(),
                })
            };
            let queues = QueueSet {
                queues: [
                    make_queue(graphics_queue)?,
                    make_queue(compute_queue)?,
                    make_queue(copy_queue)?,
                ],
                sync: CrossQueueSync::new(),
            };

            // Per-buffered-frame transition command buffers, recording from
            // the start so texture creation can drop barriers in at any time
            let make_frame = || -> Result<FrameResources> {
                let pool_info = vk::CommandPoolCreateInfo::default()
                    .queue_family_index(graphics_family)
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT);
                let init_command_pool = device
                    .create_command_pool(&pool_info, None)
                    .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create init command pool: {:?}", e))?;
                let alloc_info = vk::CommandBufferAllocateInfo::default()
                    .command_pool(init_command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1);
                let init_command_buffer = device
                    .allocate_command_buffers(&alloc_info)
                    .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to allocate init command buffer: {:?}", e))?[0];
                let begin_info = vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                device
                    .begin_command_buffer(init_command_buffer, &begin_info)
                    .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to begin init command buffer: {:?}", e))?;
                Ok(FrameResources {
                    init_command_pool,
                    init_command_buffer,
                })
            };
            let frames = FrameResourceSet {
                frames: [make_frame()?, make_frame()?],
                init_submits: false,
            };

            let pipeline_cache = device
                .create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create pipeline cache: {:?}", e))?;

            let api_version = properties.api_version;
            gpu_info!(
                LOG_SOURCE,
                "Initialized Vulkan {}.{}",
                vk::api_version_major(api_version),
                vk::api_version_minor(api_version)
            );
            let device_name = std::ffi::CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .into_owned();
            gpu_info!(LOG_SOURCE, "Using {}", device_name);

            Ok(Self {
                entry,
                instance,
                physical_device,
                device,
                properties,
                memory_properties,
                graphics_family,
                compute_family,
                copy_family,
                surface_loader,
                swapchain_loader,
                debug_utils,
                #[cfg(feature = "vulkan-validation")]
                debug_messenger,
                handler,
                copy_allocator,
                frame_count: AtomicU64::new(0),
                cmd_count: AtomicU32::new(0),
                commandlists: RwLock::new(Vec::new()),
                queues: Mutex::new(queues),
                frames: Mutex::new(frames),
                pso_cache: RwLock::new(PipelineStateCache::new()),
                pso_layout_cache: Mutex::new(FxHashMap::default()),
                pipeline_cache,
                last_frame_stats: Mutex::new(FrameStats::default()),
                config,
            })
        }
    }

    fn family_for(&self, queue: QueueType) -> u32 {
        match queue {
            QueueType::Graphics => self.graphics_family,
            QueueType::Compute => self.compute_family,
            QueueType::Copy => self.copy_family,
        }
    }

    fn cmd_state(&self, cmd: CommandList) -> Arc<Mutex<CommandListVulkan>> {
        let lists = self.commandlists.read().unwrap();
        lists[cmd.index()].clone()
    }

    /// Allocate a buffer + memory and wrap it into a handle. The staging
    /// and linear-allocator paths reuse this for their UPLOAD buffers.
    fn make_buffer(&self, desc: &GpuBufferDesc) -> Result<GpuBuffer> {
        let mut usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        if desc.bind_flags.contains(BindFlags::VERTEX_BUFFER) {
            usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if desc.bind_flags.contains(BindFlags::INDEX_BUFFER) {
            usage |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if desc.bind_flags.contains(BindFlags::CONSTANT_BUFFER) {
            usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if desc.bind_flags.contains(BindFlags::SHADER_RESOURCE)
            || desc.misc_flags.contains(ResourceMiscFlags::BUFFER_RAW)
            || desc.misc_flags.contains(ResourceMiscFlags::BUFFER_STRUCTURED)
        {
            usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            self.device
                .create_buffer(&buffer_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create buffer: {:?}", e))?
        };

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let location = match desc.usage {
            MemoryAccess::Default => MemoryLocation::GpuOnly,
            MemoryAccess::Upload => MemoryLocation::CpuToGpu,
            MemoryAccess::Readback => MemoryLocation::GpuToCpu,
        };

        let allocation = self
            .handler
            .allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name: "buffer",
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { self.device.destroy_buffer(buffer, None) };
                gpu_error!(LOG_SOURCE, "Buffer allocation failed: {:?}", e);
                Error::OutOfMemory
            })?;

        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to bind buffer memory: {:?}", e))?;
        }

        self.handler.track_allocated(allocation.size());
        let mapped = allocation
            .mapped_ptr()
            .map(|ptr| MappedMemory::new(ptr.as_ptr() as *mut u8, desc.size));

        Ok(GpuBuffer {
            resource: GpuResource {
                kind: ResourceKind::Buffer,
                internal: Some(Arc::new(BufferVulkan {
                    handler: self.handler.clone(),
                    buffer,
                    allocation: Some(allocation),
                })),
                mapped,
            },
            desc: *desc,
        })
    }

    /// Create an image view over one aspect of a texture
    fn create_texture_view(
        &self,
        image: vk::Image,
        desc: &TextureDesc,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(convert_format(desc.format))
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(desc.mip_levels)
                    .base_array_layer(0)
                    .layer_count(desc.array_size),
            );
        unsafe {
            self.device
                .create_image_view(&view_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create image view: {:?}", e))
        }
    }

    /// Record a layout transition on the current frame's transition buffer
    fn record_init_barrier(&self, barrier: vk::ImageMemoryBarrier<'_>) {
        let mut frames = self.frames.lock().unwrap();
        let buffer_index = self.buffer_index() as usize;
        unsafe {
            self.device.cmd_pipeline_barrier(
                frames.frames[buffer_index].init_command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        frames.init_submits = true;
    }

    /// Fold the per-shader reflected bindings of one stage into the
    /// pipeline's merged binding set
    fn merge_shader_bindings(internal: &mut PipelineStateVulkan, shader: &Shader) {
        let Some(shader_internal) = shader.resource.internal_as::<ShaderVulkan>() else {
            return;
        };

        for shader_binding in &shader_internal.layout_bindings {
            let mut found = false;
            for pipeline_binding in &mut internal.layout_bindings {
                if shader_binding.binding == pipeline_binding.binding {
                    debug_assert_eq!(
                        shader_binding.descriptor_count,
                        pipeline_binding.descriptor_count
                    );
                    debug_assert_eq!(
                        shader_binding.descriptor_type,
                        pipeline_binding.descriptor_type
                    );
                    pipeline_binding.stage_flags |= shader_binding.stage_flags;
                    found = true;
                    break;
                }
            }

            if !found {
                internal.layout_bindings.push(*shader_binding);

                if shader_binding.descriptor_type == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC {
                    for k in 0..shader_binding.descriptor_count {
                        let slot = (shader_binding.binding + k) as usize;
                        if slot < BINDER_CBV_COUNT {
                            internal.uniform_buffer_sizes[slot] =
                                shader_internal.uniform_buffer_sizes[slot];
                            internal
                                .uniform_buffer_dynamic_slots
                                .push(shader_binding.binding + k);
                        }
                    }
                }
            }
        }
    }

    /// Synthesize the backend pipeline for the current draw state
    fn build_pipeline(
        &self,
        pso: &PipelineState,
        render_pass: vk::RenderPass,
        strides: &[u32; 8],
    ) -> Result<vk::Pipeline> {
        if render_pass == vk::RenderPass::null() {
            return Err(Error::InvalidResource(
                "draw recorded outside a render pass".to_string(),
            ));
        }
        let internal = pso
            .resource
            .internal_as::<PipelineStateVulkan>()
            .ok_or_else(|| Error::InvalidResource("invalid pipeline state".to_string()))?;

        // Shader stages
        let mut stages: Vec<vk::PipelineShaderStageCreateInfo<'_>> = Vec::new();
        for shader in [&pso.desc.vs, &pso.desc.gs, &pso.desc.fs].into_iter().flatten() {
            if let Some(shader_internal) = shader.resource.internal_as::<ShaderVulkan>() {
                stages.push(
                    vk::PipelineShaderStageCreateInfo::default()
                        .stage(shader_internal.stage_flags)
                        .module(shader_internal.module)
                        .name(c"main"),
                );
            }
        }

        // Vertex layout: one binding per input slot, strides taken from the
        // most recent bind_vertex_buffers call
        let mut bindings: Vec<vk::VertexInputBindingDescription> = Vec::new();
        let mut attributes: Vec<vk::VertexInputAttributeDescription> = Vec::new();
        if let Some(layout) = &pso.desc.input_layout {
            let mut binding_prev = u32::MAX;
            for element in &layout.elements {
                if element.input_slot == binding_prev {
                    continue;
                }
                binding_prev = element.input_slot;
                bindings.push(
                    vk::VertexInputBindingDescription::default()
                        .binding(element.input_slot)
                        .input_rate(vk::VertexInputRate::VERTEX)
                        .stride(strides[element.input_slot as usize]),
                );
            }

            let mut offset = 0u32;
            let mut location = 0u32;
            binding_prev = u32::MAX;
            for element in &layout.elements {
                if element.input_slot != binding_prev {
                    binding_prev = element.input_slot;
                    offset = 0;
                }
                let byte_offset = if element.aligned_byte_offset
                    == pulsar_gpu::graphics::VertexInputLayout::APPEND_ALIGNED_ELEMENT
                {
                    let resolved = offset;
                    offset += element.format.stride();
                    resolved
                } else {
                    element.aligned_byte_offset
                };
                attributes.push(
                    vk::VertexInputAttributeDescription::default()
                        .binding(element.input_slot)
                        .location(location)
                        .format(convert_format(element.format))
                        .offset(byte_offset),
                );
                location += 1;
            }
        }
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(convert_primitive_topology(pso.desc.primitive_topology))
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rs = pso.desc.rasterizer_state.unwrap_or_default();
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(convert_fill_mode(rs.fill_mode))
            .cull_mode(convert_cull_mode(rs.cull_mode))
            .front_face(convert_front_face(rs.front_face))
            .line_width(rs.line_width)
            .depth_bias_enable(false);

        let dss = pso.desc.depth_stencil_state.unwrap_or_default();
        let make_stencil_face = |face: &pulsar_gpu::graphics::DepthStencilOp| {
            vk::StencilOpState::default()
                .fail_op(convert_stencil_op(face.stencil_fail_op))
                .pass_op(convert_stencil_op(face.stencil_pass_op))
                .depth_fail_op(convert_stencil_op(face.stencil_depth_fail_op))
                .compare_op(convert_comparison_func(face.stencil_func))
                .compare_mask(dss.stencil_read_mask as u32)
                .write_mask(dss.stencil_write_mask as u32)
                .reference(0)
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(dss.depth_enable)
            .depth_write_enable(matches!(
                dss.depth_write_mask,
                pulsar_gpu::graphics::DepthWriteMask::All
            ))
            .depth_compare_op(convert_comparison_func(dss.depth_func))
            .stencil_test_enable(dss.stencil_enable)
            .front(make_stencil_face(&dss.front_face))
            .back(make_stencil_face(&dss.back_face));

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::STENCIL_REFERENCE,
            vk::DynamicState::BLEND_CONSTANTS,
        ];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .depth_stencil_state(&depth_stencil)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(internal.pipeline_layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(self.pipeline_cache, &[pipeline_info], None)
                .map_err(|(_, e)| {
                    gpu_error!(LOG_SOURCE, "vkCreateGraphicsPipelines failed: {:?}", e);
                    Error::PipelineCreationFailed(format!("{:?}", e))
                })?
        };
        Ok(pipelines[0])
    }

    /// Bind the correct backend pipeline before a draw: global cache, then
    /// the worker-local cache, then synthesize and append locally
    fn validate_pso(&self, state: &mut CommandListVulkan) -> Result<()> {
        if !state.dirty_pso {
            return Ok(());
        }

        let mut pipeline_hash = state.prev_pipeline_hash;
        hash_combine(&mut pipeline_hash, &state.vertexbuffer_hash);

        let mut pipeline = self.pso_cache.read().unwrap().get(pipeline_hash).copied();
        if pipeline.is_none() {
            pipeline = state.pipelines_local.get(&pipeline_hash).copied();
        }
        let pipeline = match pipeline {
            Some(pipeline) => pipeline,
            None => {
                let render_pass = state.active_render_pass;
                let strides = state.vertexbuffer_strides;
                let pso = state
                    .active_pso
                    .as_ref()
                    .ok_or_else(|| Error::InvalidResource("no pipeline state bound".to_string()))?;
                let pipeline = self.build_pipeline(pso, render_pass, &strides)?;
                state.pipelines_local.insert(pipeline_hash, pipeline);
                pipeline
            }
        };

        unsafe {
            self.device.cmd_bind_pipeline(
                state.command_buffer(),
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
        state.dirty_pso = false;
        Ok(())
    }

    /// Pipeline + binding-set materialization ahead of a draw
    fn predraw(&self, state: &mut CommandListVulkan) -> Result<()> {
        self.validate_pso(state)?;

        let command_buffer = state.command_buffer();
        let current = state.current;
        let pso = state
            .active_pso
            .as_ref()
            .ok_or_else(|| Error::InvalidResource("no pipeline state bound".to_string()))?;
        let internal = pso
            .resource
            .internal_as::<PipelineStateVulkan>()
            .ok_or_else(|| Error::InvalidResource("invalid pipeline state".to_string()))?;

        flush_binder(
            &self.device,
            &self.handler,
            command_buffer,
            &mut state.binder,
            internal,
            &mut state.binder_pools[current],
            &mut state.descriptor_set,
            BINDER_POOL_START_SIZE,
        )
    }

    /// Acquire the next swapchain image, rebuilding the swapchain in place
    /// and retrying once when the surface is stale
    fn acquire_swapchain_image(&self, inner: &mut SwapChainInner) -> Result<u32> {
        let mut rebuilt = false;
        let mut timeouts = 0u32;
        loop {
            let acquired = unsafe {
                self.swapchain_loader.acquire_next_image(
                    inner.swapchain,
                    SYNC_TIMEOUT_NS,
                    inner.semaphore_acquire,
                    vk::Fence::null(),
                )
            };

            match acquired {
                Ok((index, false)) => return Ok(index),
                Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
                | Err(vk::Result::SUBOPTIMAL_KHR) => {
                    if rebuilt {
                        return Err(gpu_err!(
                            LOG_SOURCE,
                            "Swapchain still stale after rebuild; dropping this frame's present"
                        ));
                    }
                    gpu_warn!(LOG_SOURCE, "Swapchain out of date, rebuilding in place");
                    build_swapchain(
                        self.physical_device,
                        &self.device,
                        &self.surface_loader,
                        &self.swapchain_loader,
                        &self.handler,
                        inner,
                    )?;
                    rebuilt = true;
                }
                Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                    timeouts += 1;
                    gpu_error!(LOG_SOURCE, "Swapchain acquire timed out (attempt {})", timeouts);
                    if timeouts >= MAX_SYNC_RETRIES {
                        return Err(Error::SyncTimeout("swapchain acquire".to_string()));
                    }
                    std::thread::yield_now();
                }
                Err(e) => {
                    return Err(gpu_err!(LOG_SOURCE, "vkAcquireNextImageKHR failed: {:?}", e));
                }
            }
        }
    }

    /// Bounded wait for one queue's counter to reach `target`
    fn wait_queue_counter(&self, semaphore: vk::Semaphore, target: u64) -> Result<()> {
        let semaphores = [semaphore];
        let values = [target];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        let mut attempts = 0u32;
        loop {
            match unsafe { self.device.wait_semaphores(&wait_info, SYNC_TIMEOUT_NS) } {
                Ok(()) => return Ok(()),
                Err(vk::Result::TIMEOUT) => {
                    attempts += 1;
                    gpu_error!(
                        LOG_SOURCE,
                        "Frame pacing wait timed out (attempt {}/{})",
                        attempts,
                        MAX_SYNC_RETRIES
                    );
                    if attempts >= MAX_SYNC_RETRIES {
                        return Err(Error::SyncTimeout("queue tracking counter".to_string()));
                    }
                    std::thread::yield_now();
                }
                Err(e) => {
                    return Err(gpu_err!(LOG_SOURCE, "vkWaitSemaphores failed: {:?}", e));
                }
            }
        }
    }
}

impl GraphicsDevice for VulkanDevice {
    fn create_swapchain(
        &self,
        desc: &SwapChainDesc,
        window: &Window,
        swapchain: &mut SwapChain,
    ) -> Result<()> {
        // Rebuild in place when the handle already refers to a swapchain
        if let Some(internal) = swapchain.resource.internal_arc::<SwapChainVulkan>() {
            let mut inner = internal.inner.lock().unwrap();
            inner.desc = desc.clone();
            build_swapchain(
                self.physical_device,
                &self.device,
                &self.surface_loader,
                &self.swapchain_loader,
                &self.handler,
                &mut inner,
            )?;
            swapchain.desc = desc.clone();
            return Ok(());
        }

        let display_handle = window
            .display_handle()
            .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to get display handle: {}", e))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to get window handle: {}", e))?;
        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create surface: {:?}", e))?
        };

        // Presentation runs on the graphics queue in this design
        let supported = unsafe {
            self.surface_loader
                .get_physical_device_surface_support(
                    self.physical_device,
                    self.graphics_family,
                    surface,
                )
                .unwrap_or(false)
        };
        if !supported {
            unsafe { self.surface_loader.destroy_surface(surface, None) };
            return Err(gpu_err!(
                LOG_SOURCE,
                "Graphics queue family cannot present to this surface"
            ));
        }

        let mut inner = SwapChainInner {
            swapchain: vk::SwapchainKHR::null(),
            surface,
            render_pass: vk::RenderPass::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            image_index: 0,
            semaphore_acquire: vk::Semaphore::null(),
            semaphore_release: vk::Semaphore::null(),
            desc: desc.clone(),
        };
        build_swapchain(
            self.physical_device,
            &self.device,
            &self.surface_loader,
            &self.swapchain_loader,
            &self.handler,
            &mut inner,
        )?;

        swapchain.resource = GpuResource {
            kind: ResourceKind::Swapchain,
            internal: Some(Arc::new(SwapChainVulkan {
                handler: self.handler.clone(),
                inner: Mutex::new(inner),
            })),
            mapped: None,
        };
        swapchain.desc = desc.clone();
        Ok(())
    }

    fn create_buffer(
        &self,
        desc: &GpuBufferDesc,
        init_data: Option<&[u8]>,
        buffer: &mut GpuBuffer,
    ) -> Result<()> {
        *buffer = self.make_buffer(desc)?;

        let Some(data) = init_data else {
            return Ok(());
        };
        let size = (data.len() as u64).min(desc.size);
        if size == 0 {
            return Ok(());
        }

        // CPU-visible buffers take their contents through the mapping
        if let Some(mapped) = buffer.mapped() {
            mapped.write(0, &data[..size as usize]);
            return Ok(());
        }

        // Everything else goes through the copy allocator, fire-and-forget
        let cmd = self.copy_allocator.allocate(size, |capacity| {
            self.make_buffer(&GpuBufferDesc {
                size: capacity,
                usage: MemoryAccess::Upload,
                ..Default::default()
            })
        })?;

        let staging_mapped = cmd
            .payload
            .staging
            .mapped()
            .ok_or_else(|| Error::InvalidResource("staging buffer not mapped".to_string()))?;
        staging_mapped.write(0, &data[..size as usize]);

        let staging_raw = cmd
            .payload
            .staging
            .resource
            .internal_as::<BufferVulkan>()
            .ok_or_else(|| Error::InvalidResource("invalid staging buffer".to_string()))?
            .buffer;
        let dst_raw = buffer
            .resource
            .internal_as::<BufferVulkan>()
            .ok_or_else(|| Error::InvalidResource("invalid destination buffer".to_string()))?
            .buffer;

        unsafe {
            let to_transfer = vk::BufferMemoryBarrier::default()
                .buffer(dst_raw)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .size(vk::WHOLE_SIZE)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);
            self.device.cmd_pipeline_barrier(
                cmd.payload.command_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[to_transfer],
                &[],
            );

            let region = vk::BufferCopy::default().size(size);
            self.device.cmd_copy_buffer(
                cmd.payload.command_buffer,
                staging_raw,
                dst_raw,
                &[region],
            );

            let mut read_access = vk::AccessFlags::TRANSFER_READ;
            if desc.bind_flags.contains(BindFlags::CONSTANT_BUFFER) {
                read_access |= vk::AccessFlags::UNIFORM_READ;
            }
            if desc.bind_flags.contains(BindFlags::VERTEX_BUFFER) {
                read_access |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
            }
            if desc.bind_flags.contains(BindFlags::INDEX_BUFFER) {
                read_access |= vk::AccessFlags::INDEX_READ;
            }
            let to_read = vk::BufferMemoryBarrier::default()
                .buffer(dst_raw)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(read_access)
                .size(vk::WHOLE_SIZE)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);
            self.device.cmd_pipeline_barrier(
                cmd.payload.command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[to_read],
                &[],
            );
        }

        self.copy_allocator.submit(cmd)?;
        Ok(())
    }

    fn create_texture(
        &self,
        desc: &TextureDesc,
        init_data: Option<&[SubresourceData<'_>]>,
        texture: &mut Texture,
    ) -> Result<()> {
        if desc.format == pulsar_gpu::graphics::Format::Unknown {
            return Err(gpu_err!(LOG_SOURCE, "create_texture: format must be known"));
        }

        let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        if desc.bind_flags.contains(BindFlags::SHADER_RESOURCE) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        if desc.bind_flags.contains(BindFlags::RENDER_TARGET) {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if desc.bind_flags.contains(BindFlags::DEPTH_STENCIL) {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }

        let image_type = match desc.kind {
            TextureKind::Texture1D => vk::ImageType::TYPE_1D,
            TextureKind::Texture2D => vk::ImageType::TYPE_2D,
            TextureKind::Texture3D => vk::ImageType::TYPE_3D,
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(convert_format(desc.format))
            .extent(vk::Extent3D {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth: 1,
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(desc.array_size.max(1))
            .tiling(vk::ImageTiling::OPTIMAL)
            .samples(vk::SampleCountFlags::TYPE_1)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .usage(usage);

        let image = unsafe {
            self.device
                .create_image(&image_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create image: {:?}", e))?
        };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = self
            .handler
            .allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name: "texture",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { self.device.destroy_image(image, None) };
                gpu_error!(LOG_SOURCE, "Texture allocation failed: {:?}", e);
                Error::OutOfMemory
            })?;
        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to bind image memory: {:?}", e))?;
        }
        self.handler.track_allocated(allocation.size());

        let aspect = if desc.format.is_depth() {
            let mut aspect = vk::ImageAspectFlags::DEPTH;
            if desc.format.has_stencil() {
                aspect |= vk::ImageAspectFlags::STENCIL;
            }
            aspect
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let srv = if desc.bind_flags.contains(BindFlags::SHADER_RESOURCE) {
            // Depth formats sample from the depth aspect only
            let view_aspect = if desc.format.is_depth() {
                vk::ImageAspectFlags::DEPTH
            } else {
                vk::ImageAspectFlags::COLOR
            };
            self.create_texture_view(image, desc, view_aspect)?
        } else {
            vk::ImageView::null()
        };
        let rtv = if desc.bind_flags.contains(BindFlags::RENDER_TARGET) {
            self.create_texture_view(image, desc, vk::ImageAspectFlags::COLOR)?
        } else {
            vk::ImageView::null()
        };
        let dsv = if desc.bind_flags.contains(BindFlags::DEPTH_STENCIL) {
            self.create_texture_view(image, desc, vk::ImageAspectFlags::DEPTH)?
        } else {
            vk::ImageView::null()
        };

        let subresource_range = vk::ImageSubresourceRange::default()
            .aspect_mask(aspect)
            .base_mip_level(0)
            .level_count(desc.mip_levels.max(1))
            .base_array_layer(0)
            .layer_count(desc.array_size.max(1));

        match init_data {
            Some(subresources) if !subresources.is_empty() => {
                // Compute the tightly packed staging footprint
                let stride = desc.format.stride() as u64;
                let mut staging_size = 0u64;
                for _layer in 0..desc.array_size.max(1) {
                    let mut w = desc.width.max(1) as u64;
                    let mut h = desc.height.max(1) as u64;
                    for _mip in 0..desc.mip_levels.max(1) {
                        staging_size += w * stride * h;
                        w = (w / 2).max(1);
                        h = (h / 2).max(1);
                    }
                }

                let cmd = self.copy_allocator.allocate(staging_size, |capacity| {
                    self.make_buffer(&GpuBufferDesc {
                        size: capacity,
                        usage: MemoryAccess::Upload,
                        ..Default::default()
                    })
                })?;
                let staging_mapped = cmd.payload.staging.mapped().ok_or_else(|| {
                    Error::InvalidResource("staging buffer not mapped".to_string())
                })?;
                let staging_raw = cmd
                    .payload
                    .staging
                    .resource
                    .internal_as::<BufferVulkan>()
                    .ok_or_else(|| Error::InvalidResource("invalid staging buffer".to_string()))?
                    .buffer;

                // Pack rows per subresource and record one copy region each
                let mut copy_regions: Vec<vk::BufferImageCopy> = Vec::new();
                let mut copy_offset = 0u64;
                let mut subresource_index = 0usize;
                for layer in 0..desc.array_size.max(1) {
                    let mut width = desc.width.max(1);
                    let mut height = desc.height.max(1);
                    for mip in 0..desc.mip_levels.max(1) {
                        let Some(subresource) = subresources.get(subresource_index) else {
                            break;
                        };
                        subresource_index += 1;

                        let dst_row_pitch = width as u64 * stride;
                        let src_row_pitch = subresource.row_pitch as u64;
                        for row in 0..height as u64 {
                            let src_start = (row * src_row_pitch) as usize;
                            let src_end = src_start + dst_row_pitch as usize;
                            if src_end <= subresource.mem.len() {
                                staging_mapped.write(
                                    copy_offset + row * dst_row_pitch,
                                    &subresource.mem[src_start..src_end],
                                );
                            }
                        }

                        copy_regions.push(
                            vk::BufferImageCopy::default()
                                .buffer_offset(copy_offset)
                                .buffer_row_length(0)
                                .buffer_image_height(0)
                                .image_subresource(
                                    vk::ImageSubresourceLayers::default()
                                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                                        .mip_level(mip)
                                        .base_array_layer(layer)
                                        .layer_count(1),
                                )
                                .image_extent(vk::Extent3D {
                                    width,
                                    height,
                                    depth: 1,
                                }),
                        );
                        copy_offset += dst_row_pitch * height as u64;

                        width = (width / 2).max(1);
                        height = (height / 2).max(1);
                    }
                }

                unsafe {
                    let to_transfer = vk::ImageMemoryBarrier::default()
                        .image(image)
                        .old_layout(vk::ImageLayout::UNDEFINED)
                        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                        .src_access_mask(vk::AccessFlags::empty())
                        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                        .subresource_range(subresource_range)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);
                    self.device.cmd_pipeline_barrier(
                        cmd.payload.command_buffer,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[to_transfer],
                    );
                    self.device.cmd_copy_buffer_to_image(
                        cmd.payload.command_buffer,
                        staging_raw,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &copy_regions,
                    );
                }

                self.copy_allocator.submit(cmd)?;

                // Final layout transition rides the frame's transition buffer
                let to_final = vk::ImageMemoryBarrier::default()
                    .image(image)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(convert_image_layout(desc.layout))
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(parse_resource_state(desc.layout))
                    .subresource_range(subresource_range)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);
                self.record_init_barrier(to_final);
            }
            _ => {
                let to_final = vk::ImageMemoryBarrier::default()
                    .image(image)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(convert_image_layout(desc.layout))
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(parse_resource_state(desc.layout))
                    .subresource_range(subresource_range)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);
                self.record_init_barrier(to_final);
            }
        }

        texture.resource = GpuResource {
            kind: ResourceKind::Texture,
            internal: Some(Arc::new(TextureVulkan {
                handler: self.handler.clone(),
                image,
                allocation: Some(allocation),
                srv,
                rtv,
                dsv,
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
            return Err(gpu_err!(LOG_SOURCE, "create_shader: empty bytecode"));
        }

        let words = bytecode_to_words(bytecode)?;
        let stage_flags = match stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        };
        let reflected = reflect_shader(&words, stage_flags)?;

        let module_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe {
            self.device
                .create_shader_module(&module_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create shader module: {:?}", e))?
        };

        shader.resource = GpuResource {
            kind: ResourceKind::Shader,
            internal: Some(Arc::new(ShaderVulkan {
                handler: self.handler.clone(),
                module,
                stage_flags,
                layout_bindings: reflected.layout_bindings,
                uniform_buffer_sizes: reflected.uniform_buffer_sizes,
                uniform_buffer_dynamic_slots: reflected.uniform_buffer_dynamic_slots,
            })),
            mapped: None,
        };
        shader.stage = stage;
        Ok(())
    }

    fn create_sampler(&self, desc: &SamplerDesc, sampler: &mut Sampler) -> Result<()> {
        let (min_filter, mag_filter, mipmap_mode, anisotropy) = match desc.filter {
            TextureFilter::Point => (
                vk::Filter::NEAREST,
                vk::Filter::NEAREST,
                vk::SamplerMipmapMode::LINEAR,
                false,
            ),
            TextureFilter::Bilinear => (
                vk::Filter::LINEAR,
                vk::Filter::LINEAR,
                vk::SamplerMipmapMode::NEAREST,
                false,
            ),
            TextureFilter::Trilinear => (
                vk::Filter::LINEAR,
                vk::Filter::LINEAR,
                vk::SamplerMipmapMode::LINEAR,
                false,
            ),
            TextureFilter::AnisotropicLinear => (
                vk::Filter::LINEAR,
                vk::Filter::LINEAR,
                vk::SamplerMipmapMode::LINEAR,
                true,
            ),
        };

        // The fixed border palette only has white and black to offer
        let border_color = if desc.border_color.w == 0.0 {
            vk::BorderColor::FLOAT_TRANSPARENT_BLACK
        } else if desc.border_color.x >= 0.5 {
            vk::BorderColor::FLOAT_OPAQUE_WHITE
        } else {
            vk::BorderColor::FLOAT_OPAQUE_BLACK
        };

        let max_lod = if desc.max_lod == f32::MAX {
            vk::LOD_CLAMP_NONE
        } else {
            desc.max_lod
        };

        let sampler_info = vk::SamplerCreateInfo::default()
            .min_filter(min_filter)
            .mag_filter(mag_filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(convert_address_mode(desc.address_u))
            .address_mode_v(convert_address_mode(desc.address_v))
            .address_mode_w(convert_address_mode(desc.address_w))
            .mip_lod_bias(desc.lod_bias)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy { desc.max_anisotropy } else { 1.0 })
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(desc.min_lod)
            .max_lod(max_lod)
            .border_color(border_color)
            .unnormalized_coordinates(false);

        let raw = unsafe {
            self.device
                .create_sampler(&sampler_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create sampler: {:?}", e))?
        };

        sampler.resource = GpuResource {
            kind: ResourceKind::Sampler,
            internal: Some(Arc::new(SamplerVulkan {
                handler: self.handler.clone(),
                sampler: raw,
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
        let mut internal = PipelineStateVulkan {
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            layout_bindings: Vec::new(),
            uniform_buffer_sizes: [0; BINDER_CBV_COUNT],
            uniform_buffer_dynamic_slots: Vec::new(),
            binding_hash: 0,
        };

        let mut stage_count = 0;
        for shader in [&desc.vs, &desc.gs, &desc.fs].into_iter().flatten() {
            if shader.is_valid() {
                stage_count += 1;
                Self::merge_shader_bindings(&mut internal, shader);
            }
        }
        if stage_count == 0 {
            gpu_error!(LOG_SOURCE, "Pipeline has no valid shader attached!");
            return Err(Error::PipelineCreationFailed(
                "no valid shader stage".to_string(),
            ));
        }

        // The dynamic offsets array is tightly packed to match slot numbers
        internal.uniform_buffer_dynamic_slots.sort_unstable();

        let mut binding_hash = 0u64;
        for binding in &internal.layout_bindings {
            hash_combine(&mut binding_hash, &binding.binding);
            hash_combine(&mut binding_hash, &binding.descriptor_count);
            hash_combine(&mut binding_hash, &binding.descriptor_type.as_raw());
            hash_combine(&mut binding_hash, &binding.stage_flags.as_raw());
        }
        internal.binding_hash = binding_hash;

        // Layouts are shared across pipeline states with the same bindings
        {
            let mut layout_cache = self.pso_layout_cache.lock().unwrap();
            if let Some(cached) = layout_cache.get(&binding_hash) {
                internal.pipeline_layout = cached.pipeline_layout;
                internal.descriptor_set_layout = cached.descriptor_set_layout;
            } else {
                let vk_bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> =
                    internal.layout_bindings.iter().map(LayoutBinding::to_vk).collect();
                let dsl_info =
                    vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
                let descriptor_set_layout = unsafe {
                    self.device
                        .create_descriptor_set_layout(&dsl_info, None)
                        .map_err(|e| {
                            gpu_err!(LOG_SOURCE, "Failed to create descriptor set layout: {:?}", e)
                        })?
                };

                let set_layouts = [descriptor_set_layout];
                let layout_info =
                    vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
                let pipeline_layout = unsafe {
                    self.device
                        .create_pipeline_layout(&layout_info, None)
                        .map_err(|e| {
                            gpu_err!(LOG_SOURCE, "Failed to create pipeline layout: {:?}", e)
                        })?
                };

                layout_cache.insert(
                    binding_hash,
                    PsoLayout {
                        pipeline_layout,
                        descriptor_set_layout,
                    },
                );
                internal.pipeline_layout = pipeline_layout;
                internal.descriptor_set_layout = descriptor_set_layout;
            }
        }

        pso.resource = GpuResource {
            kind: ResourceKind::PipelineState,
            internal: Some(Arc::new(internal)),
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
        if desc.attachments.is_empty() {
            return Err(gpu_err!(LOG_SOURCE, "create_render_pass: no attachments"));
        }

        let mut attachment_descs: Vec<vk::AttachmentDescription> = Vec::new();
        let mut views: Vec<vk::ImageView> = Vec::new();
        let mut color_refs: Vec<vk::AttachmentReference> = Vec::new();
        let mut depth_ref: Option<vk::AttachmentReference> = None;
        let mut clear_values: Vec<vk::ClearValue> = Vec::new();

        for attachment in &desc.attachments {
            let texture_internal = attachment
                .texture
                .resource
                .internal_as::<TextureVulkan>()
                .ok_or_else(|| {
                    Error::InvalidResource("render pass attachment has no backing".to_string())
                })?;

            let index = attachment_descs.len() as u32;
            attachment_descs.push(
                vk::AttachmentDescription::default()
                    .format(convert_format(attachment.texture.desc.format))
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(convert_load_op(attachment.load_op))
                    .store_op(convert_store_op(attachment.store_op))
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(convert_image_layout(attachment.initial_layout))
                    .final_layout(convert_image_layout(attachment.final_layout)),
            );

            match attachment.kind {
                AttachmentKind::RenderTarget => {
                    views.push(texture_internal.rtv);
                    color_refs.push(
                        vk::AttachmentReference::default()
                            .attachment(index)
                            .layout(convert_image_layout(attachment.subpass_layout)),
                    );
                    clear_values.push(vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: [0.0, 0.0, 0.0, 0.0],
                        },
                    });
                }
                AttachmentKind::DepthStencil => {
                    views.push(texture_internal.dsv);
                    depth_ref = Some(
                        vk::AttachmentReference::default()
                            .attachment(index)
                            .layout(convert_image_layout(attachment.subpass_layout)),
                    );
                    clear_values.push(vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: 0.0,
                            stencil: 0,
                        },
                    });
                }
            }
        }

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = &depth_ref {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let subpasses = [subpass];
        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachment_descs)
            .subpasses(&subpasses);

        let raw_render_pass = unsafe {
            self.device
                .create_render_pass(&render_pass_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create render pass: {:?}", e))?
        };

        let first_desc = &desc.attachments[0].texture.desc;
        let extent = vk::Extent2D {
            width: first_desc.width.max(1),
            height: first_desc.height.max(1),
        };
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(raw_render_pass)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe {
            self.device
                .create_framebuffer(&framebuffer_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create framebuffer: {:?}", e))?
        };

        render_pass.resource = GpuResource {
            kind: ResourceKind::Unknown,
            internal: Some(Arc::new(RenderPassVulkan {
                handler: self.handler.clone(),
                render_pass: raw_render_pass,
                framebuffer,
                extent,
                clear_values,
            })),
            mapped: None,
        };
        render_pass.desc = desc.clone();
        render_pass.hash = compute_render_pass_hash(desc);
        Ok(())
    }

    fn begin_command_list(&self, queue: QueueType) -> Result<CommandList> {
        let index = self.cmd_count.fetch_add(1, Ordering::AcqRel);

        let state_arc = {
            let lists = self.commandlists.read().unwrap();
            if (index as usize) < lists.len() {
                Some(lists[index as usize].clone())
            } else {
                None
            }
        };
        let state_arc = match state_arc {
            Some(arc) => arc,
            None => {
                let mut lists = self.commandlists.write().unwrap();
                while lists.len() <= index as usize {
                    lists.push(Arc::new(Mutex::new(CommandListVulkan::new(queue))));
                }
                lists[index as usize].clone()
            }
        };

        let mut state = state_arc.lock().unwrap();
        let buffer_index = self.buffer_index() as usize;
        let family = self.family_for(queue);

        // A pooled list reused on a different queue family rebuilds its pools
        if state.is_initialized() && state.pool_family != family {
            for i in 0..BUFFER_COUNT as usize {
                self.handler.retire_command_pool(state.command_pools[i]);
                state.command_pools[i] = vk::CommandPool::null();
                state.command_buffers[i] = vk::CommandBuffer::null();
            }
        }

        if !state.is_initialized() {
            for i in 0..BUFFER_COUNT as usize {
                let pool_info = vk::CommandPoolCreateInfo::default()
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT)
                    .queue_family_index(family);
                let pool = unsafe {
                    self.device
                        .create_command_pool(&pool_info, None)
                        .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create command pool: {:?}", e))?
                };
                let alloc_info = vk::CommandBufferAllocateInfo::default()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1);
                let command_buffer = unsafe {
                    self.device
                        .allocate_command_buffers(&alloc_info)
                        .map_err(|e| {
                            gpu_err!(LOG_SOURCE, "Failed to allocate command buffer: {:?}", e)
                        })?[0]
                };
                state.command_pools[i] = pool;
                state.command_buffers[i] = command_buffer;
            }
            state.pool_family = family;
        }

        state.reset(queue, buffer_index);
        // Recycle this frame slot's binding sets along with its commands
        state.binder_pools[buffer_index].reset(&self.device);

        unsafe {
            self.device
                .reset_command_pool(
                    state.command_pools[buffer_index],
                    vk::CommandPoolResetFlags::empty(),
                )
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to reset command pool: {:?}", e))?;
            let begin_info = vk::CommandBufferBeginInfo::default();
            self.device
                .begin_command_buffer(state.command_buffer(), &begin_info)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to begin command buffer: {:?}", e))?;

            // Full-surface default scissor so draws work before the first
            // explicit bind
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: 65535,
                    height: 65535,
                },
            };
            self.device.cmd_set_scissor(state.command_buffer(), 0, &[scissor]);
        }

        Ok(CommandList::new(index))
    }

    fn submit_command_lists(&self) -> Result<()> {
        let cmd_last = self.cmd_count.swap(0, Ordering::AcqRel) as usize;
        let buffer_index = self.buffer_index() as usize;

        // Copy uploads first; queues that consume them wait on the counter
        let mut copy_sync = self.copy_allocator.flush()?;

        let lists: Vec<Arc<Mutex<CommandListVulkan>>> = {
            let lists = self.commandlists.read().unwrap();
            lists.iter().take(cmd_last).cloned().collect()
        };

        #[derive(Default)]
        struct Submission {
            cmds: Vec<vk::CommandBuffer>,
            wait_semaphores: Vec<vk::Semaphore>,
            wait_values: Vec<u64>,
            wait_stages: Vec<vk::PipelineStageFlags>,
            signal_semaphores: Vec<vk::Semaphore>,
            signal_values: Vec<u64>,
        }
        let mut submissions: [Submission; QUEUE_COUNT] = Default::default();
        let mut presents: Vec<(vk::SwapchainKHR, u32, vk::Semaphore)> = Vec::new();
        let mut stats = FrameStats::default();

        let mut frames = self.frames.lock().unwrap();
        if frames.init_submits {
            // Transition buffer runs ahead of the frame's graphics work
            unsafe {
                self.device
                    .end_command_buffer(frames.frames[buffer_index].init_command_buffer)
                    .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to end init command buffer: {:?}", e))?;
            }
            submissions[QueueType::Graphics.index()]
                .cmds
                .push(frames.frames[buffer_index].init_command_buffer);
        }

        for list in &lists {
            let mut state = list.lock().unwrap();
            unsafe {
                self.device
                    .end_command_buffer(state.command_buffer())
                    .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to end command buffer: {:?}", e))?;
            }

            let queue_index = state.queue.index();
            let present_skipped = state.present_skipped;
            for swapchain in state.prev_swapchains.drain(..) {
                if present_skipped {
                    continue;
                }
                let Some(internal) = swapchain.resource.internal_as::<SwapChainVulkan>() else {
                    continue;
                };
                let inner = internal.inner.lock().unwrap();
                let graphics = &mut submissions[QueueType::Graphics.index()];
                graphics.wait_semaphores.push(inner.semaphore_acquire);
                graphics.wait_values.push(0); // binary semaphore
                graphics
                    .wait_stages
                    .push(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
                graphics.signal_semaphores.push(inner.semaphore_release);
                graphics.signal_values.push(0); // binary semaphore
                presents.push((inner.swapchain, inner.image_index, inner.semaphore_release));
            }

            submissions[queue_index].cmds.push(state.command_buffer());
            stats.draw_calls += state.draw_calls;
            stats.triangle_count += state.triangle_count;
        }

        let graphics_queue_raw;
        {
            let mut queues = self.queues.lock().unwrap();
            let QueueSet { queues: qs, sync } = &mut *queues;
            graphics_queue_raw = qs[QueueType::Graphics.index()].queue;

            // Every queue submits every frame (work or not) so counter
            // values stay aligned with frame numbers
            for queue_type in QueueType::ALL {
                let queue_index = queue_type.index();
                let submission = &mut submissions[queue_index];
                let command_queue = &mut qs[queue_index];

                // Cross-queue barrier recorded at the previous frame boundary
                for (semaphore, value) in command_queue.next_waits.drain(..) {
                    submission.wait_semaphores.push(semaphore);
                    submission.wait_values.push(value);
                    submission
                        .wait_stages
                        .push(vk::PipelineStageFlags::ALL_COMMANDS);
                }

                // The first queue with work this frame orders after the copy
                // allocator's batch
                if copy_sync > 0 && !submission.cmds.is_empty() {
                    submission
                        .wait_semaphores
                        .push(self.copy_allocator.semaphore);
                    submission.wait_values.push(copy_sync);
                    submission.wait_stages.push(vk::PipelineStageFlags::TRANSFER);
                    copy_sync = 0;
                }

                let next_value = command_queue.last_signaled + 1;
                submission.signal_semaphores.push(command_queue.semaphore);
                submission.signal_values.push(next_value);

                let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
                    .wait_semaphore_values(&submission.wait_values)
                    .signal_semaphore_values(&submission.signal_values);
                let submit_info = vk::SubmitInfo::default()
                    .command_buffers(&submission.cmds)
                    .wait_semaphores(&submission.wait_semaphores)
                    .wait_dst_stage_mask(&submission.wait_stages)
                    .signal_semaphores(&submission.signal_semaphores)
                    .push_next(&mut timeline_info);

                unsafe {
                    self.device
                        .queue_submit(command_queue.queue, &[submit_info], vk::Fence::null())
                        .map_err(|e| gpu_err!(LOG_SOURCE, "Queue submit failed: {:?}", e))?;
                }

                command_queue.last_signaled = next_value;
                sync.record_signal(queue_type, next_value);
            }

            // Present after the consumer queue's submission
            if !presents.is_empty() {
                let wait_semaphores: Vec<vk::Semaphore> =
                    presents.iter().map(|p| p.2).collect();
                let swapchains: Vec<vk::SwapchainKHR> = presents.iter().map(|p| p.0).collect();
                let image_indices: Vec<u32> = presents.iter().map(|p| p.1).collect();
                let present_info = vk::PresentInfoKHR::default()
                    .wait_semaphores(&wait_semaphores)
                    .swapchains(&swapchains)
                    .image_indices(&image_indices);
                match unsafe {
                    self.swapchain_loader
                        .queue_present(graphics_queue_raw, &present_info)
                } {
                    Ok(false) => {}
                    Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                        gpu_warn!(
                            LOG_SOURCE,
                            "Present reported stale surface; next acquire rebuilds"
                        );
                    }
                    Err(e) => {
                        return Err(gpu_err!(LOG_SOURCE, "vkQueuePresentKHR failed: {:?}", e));
                    }
                }
            }

            // Cross-queue barrier for the next frame: every queue waits on
            // every other queue's just-signaled counter value
            let targets: Vec<Vec<(vk::Semaphore, u64)>> = QueueType::ALL
                .iter()
                .map(|queue_type| {
                    sync.wait_targets(*queue_type)
                        .map(|(other, value)| (qs[other.index()].semaphore, value))
                        .collect()
                })
                .collect();
            for (queue_index, waits) in targets.into_iter().enumerate() {
                qs[queue_index].next_waits = waits;
            }
        }

        let frame_count = self.frame_count.fetch_add(1, Ordering::AcqRel) + 1;

        // Bounded frame pacing: block until every queue's counter reaches
        // the value that retires frame (frame_count - BUFFER_COUNT)
        if let Some(target) = frame_pace_target(frame_count, BUFFER_COUNT as u64) {
            let semaphores: Vec<vk::Semaphore> = {
                let queues = self.queues.lock().unwrap();
                queues.queues.iter().map(|q| q.semaphore).collect()
            };
            for semaphore in semaphores {
                self.wait_queue_counter(semaphore, target)?;
            }
        }

        // Deferred destruction advances with the frame
        self.handler.update(frame_count, BUFFER_COUNT as u64);

        // Merge worker-local pipeline caches; losing duplicates are
        // deferred-destroyed, never leaked
        {
            let mut cache = self.pso_cache.write().unwrap();
            for list in &lists {
                let mut state = list.lock().unwrap();
                let mut local = std::mem::take(&mut state.pipelines_local);
                cache.merge(&mut local, |pipeline| self.handler.retire_pipeline(pipeline));
            }
        }

        // Restart the transition buffer for the new frame slot (safe now:
        // the pacing wait retired the frame that used it)
        {
            frames.init_submits = false;
            let next_index = (frame_count % BUFFER_COUNT as u64) as usize;
            let frame = &frames.frames[next_index];
            unsafe {
                self.device
                    .reset_command_pool(
                        frame.init_command_pool,
                        vk::CommandPoolResetFlags::empty(),
                    )
                    .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to reset init pool: {:?}", e))?;
                let begin_info = vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                self.device
                    .begin_command_buffer(frame.init_command_buffer, &begin_info)
                    .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to restart init buffer: {:?}", e))?;
            }
        }
        drop(frames);

        *self.last_frame_stats.lock().unwrap() = stats;
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| gpu_err!(LOG_SOURCE, "vkDeviceWaitIdle failed: {:?}", e))
        }
    }

    fn begin_render_pass_to_swapchain(
        &self,
        swapchain: &SwapChain,
        cmd: CommandList,
    ) -> Result<()> {
        let state_arc = self.cmd_state(cmd);
        let mut state = state_arc.lock().unwrap();

        let internal = swapchain
            .resource
            .internal_as::<SwapChainVulkan>()
            .ok_or_else(|| Error::InvalidResource("invalid swapchain".to_string()))?;
        let mut inner = internal.inner.lock().unwrap();

        let image_index = match self.acquire_swapchain_image(&mut inner) {
            Ok(index) => index,
            Err(e) => {
                state.present_skipped = true;
                return Err(e);
            }
        };
        inner.image_index = image_index;

        let clear_color = swapchain.desc.clear_color;
        let clear_value = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [clear_color.x, clear_color.y, clear_color.z, clear_color.w],
            },
        };
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(inner.render_pass)
            .framebuffer(inner.framebuffers[image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: inner.extent,
            })
            .clear_values(std::slice::from_ref(&clear_value));

        unsafe {
            self.device.cmd_begin_render_pass(
                state.command_buffer(),
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }

        let mut pass_hash = 0u64;
        hash_combine(&mut pass_hash, &swapchain.desc.format);
        state.active_render_pass = inner.render_pass;
        state.active_render_pass_hash = pass_hash;
        state.in_render_pass = true;
        state.prev_swapchains.push(swapchain.clone());
        Ok(())
    }

    fn begin_render_pass(&self, render_pass: &RenderPass, cmd: CommandList) -> Result<()> {
        let state_arc = self.cmd_state(cmd);
        let mut state = state_arc.lock().unwrap();

        let internal = render_pass
            .resource
            .internal_as::<RenderPassVulkan>()
            .ok_or_else(|| Error::InvalidResource("invalid render pass".to_string()))?;

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(internal.render_pass)
            .framebuffer(internal.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: internal.extent,
            })
            .clear_values(&internal.clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                state.command_buffer(),
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }

        state.active_render_pass = internal.render_pass;
        state.active_render_pass_hash = render_pass.hash;
        state.in_render_pass = true;
        Ok(())
    }

    fn end_render_pass(&self, cmd: CommandList) {
        let state_arc = self.cmd_state(cmd);
        let mut state = state_arc.lock().unwrap();
        if !state.in_render_pass {
            gpu_warn!(LOG_SOURCE, "end_render_pass without an active render pass");
            return;
        }
        unsafe {
            self.device.cmd_end_render_pass(state.command_buffer());
        }
        state.in_render_pass = false;
        state.active_render_pass = vk::RenderPass::null();
        state.active_render_pass_hash = 0;
    }

    fn bind_viewports(&self, viewports: &[Viewport], cmd: CommandList) {
        let state_arc = self.cmd_state(cmd);
        let state = state_arc.lock().unwrap();

        // Flip Y so that screen space matches the top-left convention
        let vk_viewports: Vec<vk::Viewport> = viewports
            .iter()
            .map(|vp| vk::Viewport {
                x: vp.x,
                y: vp.y + vp.height,
                width: vp.width,
                height: -vp.height,
                min_depth: vp.min_depth,
                max_depth: vp.max_depth,
            })
            .collect();
        unsafe {
            self.device
                .cmd_set_viewport(state.command_buffer(), 0, &vk_viewports);
        }
    }

    fn bind_scissor_rects(&self, rects: &[Rect], cmd: CommandList) {
        let state_arc = self.cmd_state(cmd);
        let state = state_arc.lock().unwrap();

        let scissors: Vec<vk::Rect2D> = rects
            .iter()
            .map(|rect| vk::Rect2D {
                offset: vk::Offset2D {
                    x: rect.left.max(0),
                    y: rect.top.max(0),
                },
                extent: vk::Extent2D {
                    width: (rect.right - rect.left).unsigned_abs(),
                    height: (rect.bottom - rect.top).unsigned_abs(),
                },
            })
            .collect();
        unsafe {
            self.device
                .cmd_set_scissor(state.command_buffer(), 0, &scissors);
        }
    }

    fn bind_stencil_ref(&self, value: u32, cmd: CommandList) {
        let state_arc = self.cmd_state(cmd);
        let state = state_arc.lock().unwrap();
        unsafe {
            self.device.cmd_set_stencil_reference(
                state.command_buffer(),
                vk::StencilFaceFlags::FRONT_AND_BACK,
                value,
            );
        }
    }

    fn bind_pipeline_state(&self, pso: &PipelineState, cmd: CommandList) {
        let state_arc = self.cmd_state(cmd);
        let mut state = state_arc.lock().unwrap();

        let mut pipeline_hash = pso.hash;
        hash_combine(&mut pipeline_hash, &state.active_render_pass_hash);
        if pipeline_hash == state.prev_pipeline_hash && state.active_pso.is_some() {
            return;
        }

        // A changed binding layout invalidates whatever set was bound
        let binding_changed = match (&state.active_pso, pso.resource.internal_as::<PipelineStateVulkan>()) {
            (Some(active), Some(new_internal)) => active
                .resource
                .internal_as::<PipelineStateVulkan>()
                .map(|active_internal| active_internal.binding_hash != new_internal.binding_hash)
                .unwrap_or(true),
            _ => true,
        };
        if binding_changed {
            state.binder.reset();
        }

        state.prev_pipeline_hash = pipeline_hash;
        state.active_pso = Some(pso.clone());
        state.dirty_pso = true;
    }

    fn bind_vertex_buffers(
        &self,
        buffers: &[&GpuBuffer],
        strides: &[u32],
        offsets: Option<&[u64]>,
        cmd: CommandList,
    ) {
        let state_arc = self.cmd_state(cmd);
        let mut state = state_arc.lock().unwrap();

        let count = buffers.len().min(8);
        let mut raw_buffers: Vec<vk::Buffer> = Vec::with_capacity(count);
        let mut raw_offsets: Vec<u64> = Vec::with_capacity(count);
        let mut hash = 0u64;

        for i in 0..count {
            let stride = strides.get(i).copied().unwrap_or(0);
            hash_combine(&mut hash, &stride);
            state.vertexbuffer_strides[i] = stride;

            let Some(internal) = buffers[i].resource.internal_as::<BufferVulkan>() else {
                gpu_error!(LOG_SOURCE, "bind_vertex_buffers: invalid buffer in slot {}", i);
                return;
            };
            raw_buffers.push(internal.buffer);
            raw_offsets.push(offsets.and_then(|o| o.get(i)).copied().unwrap_or(0));
        }
        for i in count..8 {
            state.vertexbuffer_strides[i] = 0;
        }

        unsafe {
            self.device.cmd_bind_vertex_buffers(
                state.command_buffer(),
                0,
                &raw_buffers,
                &raw_offsets,
            );
        }

        if hash != state.vertexbuffer_hash {
            state.vertexbuffer_hash = hash;
            state.dirty_pso = true;
        }
    }

    fn bind_index_buffer(
        &self,
        buffer: &GpuBuffer,
        format: IndexBufferFormat,
        offset: u64,
        cmd: CommandList,
    ) {
        let Some(internal) = buffer.resource.internal_as::<BufferVulkan>() else {
            gpu_error!(LOG_SOURCE, "bind_index_buffer: invalid buffer");
            return;
        };
        let state_arc = self.cmd_state(cmd);
        let state = state_arc.lock().unwrap();
        let index_type = match format {
            IndexBufferFormat::Uint16 => vk::IndexType::UINT16,
            IndexBufferFormat::Uint32 => vk::IndexType::UINT32,
        };
        unsafe {
            self.device.cmd_bind_index_buffer(
                state.command_buffer(),
                internal.buffer,
                offset,
                index_type,
            );
        }
    }

    fn bind_resource(&self, resource: &GpuResource, slot: u32, cmd: CommandList) {
        let state_arc = self.cmd_state(cmd);
        let mut state = state_arc.lock().unwrap();
        state.binder.bind_resource(slot as usize, resource);
    }

    fn bind_sampler(&self, sampler: &Sampler, slot: u32, cmd: CommandList) {
        let state_arc = self.cmd_state(cmd);
        let mut state = state_arc.lock().unwrap();
        state.binder.bind_sampler(slot as usize, sampler);
    }

    fn bind_constant_buffer(&self, buffer: &GpuBuffer, slot: u32, cmd: CommandList, offset: u64) {
        let state_arc = self.cmd_state(cmd);
        let mut state = state_arc.lock().unwrap();
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
        let (Some(dst_internal), Some(src_internal)) = (
            dst.resource.internal_as::<BufferVulkan>(),
            src.resource.internal_as::<BufferVulkan>(),
        ) else {
            gpu_error!(LOG_SOURCE, "copy_buffer: invalid buffer handle");
            return;
        };

        let state_arc = self.cmd_state(cmd);
        let state = state_arc.lock().unwrap();
        if state.in_render_pass {
            gpu_warn!(LOG_SOURCE, "copy_buffer recorded inside a render pass");
        }

        let region = vk::BufferCopy::default()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(size);
        unsafe {
            self.device.cmd_copy_buffer(
                state.command_buffer(),
                src_internal.buffer,
                dst_internal.buffer,
                &[region],
            );
        }
    }

    fn draw(&self, vertex_count: u32, start_vertex: u32, cmd: CommandList) {
        let state_arc = self.cmd_state(cmd);
        let mut state = state_arc.lock().unwrap();
        if let Err(e) = self.predraw(&mut state) {
            gpu_error!(LOG_SOURCE, "draw skipped: {}", e);
            return;
        }
        unsafe {
            self.device
                .cmd_draw(state.command_buffer(), vertex_count, 1, start_vertex, 0);
        }
        state.draw_calls += 1;
        state.triangle_count += (vertex_count / 3) as u64;
    }

    fn draw_indexed(&self, index_count: u32, start_index: u32, base_vertex: i32, cmd: CommandList) {
        let state_arc = self.cmd_state(cmd);
        let mut state = state_arc.lock().unwrap();
        if let Err(e) = self.predraw(&mut state) {
            gpu_error!(LOG_SOURCE, "draw_indexed skipped: {}", e);
            return;
        }
        unsafe {
            self.device.cmd_draw_indexed(
                state.command_buffer(),
                index_count,
                1,
                start_index,
                base_vertex,
                0,
            );
        }
        state.draw_calls += 1;
        state.triangle_count += (index_count / 3) as u64;
    }

    fn allocate_gpu(&self, size: u64, cmd: CommandList) -> Result<GpuAllocation> {
        if size == 0 {
            return Ok(GpuAllocation::default());
        }

        let state_arc = self.cmd_state(cmd);
        let mut state = state_arc.lock().unwrap();
        let buffer_index = state.current;
        let allocator = &mut state.frame_allocators[buffer_index];

        let free_space = allocator.buffer.desc.size.saturating_sub(allocator.offset);
        if size > free_space {
            let base_desc = GpuBufferDesc {
                usage: MemoryAccess::Upload,
                bind_flags: BindFlags::CONSTANT_BUFFER
                    | BindFlags::VERTEX_BUFFER
                    | BindFlags::INDEX_BUFFER
                    | BindFlags::SHADER_RESOURCE,
                misc_flags: ResourceMiscFlags::BUFFER_RAW,
                ..Default::default()
            };
            let alignment = self.min_offset_alignment(&base_desc);
            let grown_desc = GpuBufferDesc {
                size: align_to((allocator.buffer.desc.size + size) * 2, alignment),
                ..base_desc
            };
            // The old buffer handle drops here and retires through the
            // allocation handler
            allocator.buffer = self.make_buffer(&grown_desc)?;
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
        let limits = &self.properties.limits;
        if desc.bind_flags.contains(BindFlags::CONSTANT_BUFFER) {
            limits.min_uniform_buffer_offset_alignment.max(1)
        } else {
            limits.min_texel_buffer_offset_alignment.max(1)
        }
    }

    fn set_name(&self, resource: &GpuResource, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name_c) = CString::new(name) else {
            return;
        };

        let result = match resource.kind {
            ResourceKind::Buffer => resource.internal_as::<BufferVulkan>().map(|internal| {
                let info = vk::DebugUtilsObjectNameInfoEXT::default()
                    .object_handle(internal.buffer)
                    .object_name(&name_c);
                unsafe { debug_utils.set_debug_utils_object_name(&info) }
            }),
            ResourceKind::Texture => resource.internal_as::<TextureVulkan>().map(|internal| {
                let info = vk::DebugUtilsObjectNameInfoEXT::default()
                    .object_handle(internal.image)
                    .object_name(&name_c);
                unsafe { debug_utils.set_debug_utils_object_name(&info) }
            }),
            _ => None,
        };
        if let Some(Err(e)) = result {
            gpu_warn!(LOG_SOURCE, "set_name failed: {:?}", e);
        }
    }

    fn begin_event(&self, name: &str, cmd: CommandList) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name_c) = CString::new(name) else {
            return;
        };

        let state_arc = self.cmd_state(cmd);
        let state = state_arc.lock().unwrap();

        // Stable per-name color so profiler scopes are recognizable
        let mut name_hash = 0u64;
        hash_combine(&mut name_hash, &name);
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name_c).color([
            ((name_hash >> 24) & 0xFF) as f32 / 255.0,
            ((name_hash >> 16) & 0xFF) as f32 / 255.0,
            ((name_hash >> 8) & 0xFF) as f32 / 255.0,
            1.0,
        ]);
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(state.command_buffer(), &label);
        }
    }

    fn end_event(&self, cmd: CommandList) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let state_arc = self.cmd_state(cmd);
        let state = state_arc.lock().unwrap();
        unsafe {
            debug_utils.cmd_end_debug_utils_label(state.command_buffer());
        }
    }

    fn memory_usage(&self) -> MemoryUsage {
        let mut budget = 0u64;
        for i in 0..self.memory_properties.memory_heap_count as usize {
            let heap = self.memory_properties.memory_heaps[i];
            if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
                budget += heap.size;
            }
        }
        MemoryUsage {
            budget,
            usage: self.handler.used_bytes(),
        }
    }

    fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    fn frame_stats(&self) -> FrameStats {
        *self.last_frame_stats.lock().unwrap()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        // Drain every queue, then tear down in dependency order. All
        // resource handles must have been released by the application.
        unsafe {
            let _ = self.device.device_wait_idle();

            // Command lists: pools, binder pools, then the recording state
            // (whose buffer handles retire into the allocation handler)
            {
                let mut lists = self.commandlists.write().unwrap();
                for list in lists.drain(..) {
                    let mut state = list.lock().unwrap();
                    for pool in state.command_pools {
                        if pool != vk::CommandPool::null() {
                            self.device.destroy_command_pool(pool, None);
                        }
                    }
                    for binder_pool in &mut state.binder_pools {
                        binder_pool.destroy_immediate(&self.device);
                    }
                }
            }

            self.copy_allocator.destroy();

            {
                let frames = self.frames.lock().unwrap();
                for frame in &frames.frames {
                    self.device.destroy_command_pool(frame.init_command_pool, None);
                }
            }

            {
                let queues = self.queues.lock().unwrap();
                for queue in &queues.queues {
                    self.device.destroy_semaphore(queue.semaphore, None);
                }
            }

            self.pso_cache
                .write()
                .unwrap()
                .drain_all(|pipeline| self.device.destroy_pipeline(pipeline, None));

            {
                let mut layouts = self.pso_layout_cache.lock().unwrap();
                for (_, layout) in layouts.drain() {
                    self.device.destroy_pipeline_layout(layout.pipeline_layout, None);
                    self.device
                        .destroy_descriptor_set_layout(layout.descriptor_set_layout, None);
                }
            }

            self.device.destroy_pipeline_cache(self.pipeline_cache, None);

            // Everything queued for deferred destruction goes now
            self.handler.destroy_all();
            self.handler.release_allocator();

            #[cfg(feature = "vulkan-validation")]
            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
