/// Swapchain construction and in-place rebuild
///
/// A swapchain keeps its external handle identity forever; when the surface
/// goes stale the backing objects are rebuilt behind the handle's mutex,
/// with everything the GPU may still touch routed through deferred
/// destruction rather than freed immediately.

use ash::vk;
use pulsar_gpu::{gpu_err, Result};

use crate::allocation::AllocationHandler;
use crate::converts::convert_format;
use crate::resources::SwapChainInner;

const LOG_SOURCE: &str = "pulsar::vulkan";

/// Build (or rebuild, when `inner` already holds objects) the swapchain for
/// `inner.surface` according to `inner.desc`.
pub(crate) fn build_swapchain(
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
    surface_loader: &ash::khr::surface::Instance,
    swapchain_loader: &ash::khr::swapchain::Device,
    handler: &AllocationHandler,
    inner: &mut SwapChainInner,
) -> Result<()> {
    let capabilities = unsafe {
        surface_loader
            .get_physical_device_surface_capabilities(physical_device, inner.surface)
            .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to query surface capabilities: {:?}", e))?
    };
    let formats = unsafe {
        surface_loader
            .get_physical_device_surface_formats(physical_device, inner.surface)
            .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to query surface formats: {:?}", e))?
    };
    let present_modes = unsafe {
        surface_loader
            .get_physical_device_surface_present_modes(physical_device, inner.surface)
            .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to query present modes: {:?}", e))?
    };

    // Pick the requested format with an SRGB-nonlinear color space, falling
    // back to BGRA8 which every surface supports in practice
    let requested = convert_format(inner.desc.format);
    let surface_format = formats
        .iter()
        .copied()
        .find(|f| f.format == requested && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });

    let extent = if capabilities.current_extent.width != u32::MAX
        && capabilities.current_extent.height != u32::MAX
    {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: inner.desc.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: inner.desc.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    };

    let mut image_count = inner.desc.buffer_count.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        image_count = image_count.min(capabilities.max_image_count);
    }

    // FIFO is the only mode that is always available; without vsync prefer
    // mailbox, then immediate
    let mut present_mode = vk::PresentModeKHR::FIFO;
    if !inner.desc.vsync {
        for mode in &present_modes {
            if *mode == vk::PresentModeKHR::MAILBOX {
                present_mode = vk::PresentModeKHR::MAILBOX;
                break;
            }
            if *mode == vk::PresentModeKHR::IMMEDIATE {
                present_mode = vk::PresentModeKHR::IMMEDIATE;
            }
        }
    }

    let old_swapchain = inner.swapchain;
    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(inner.surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .pre_transform(capabilities.current_transform)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    inner.swapchain = unsafe {
        swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| gpu_err!(LOG_SOURCE, "vkCreateSwapchainKHR failed: {:?}", e))?
    };

    // Anything from the previous incarnation may still be in flight
    if old_swapchain != vk::SwapchainKHR::null() {
        handler.retire_swapchain(old_swapchain);
    }
    for framebuffer in inner.framebuffers.drain(..) {
        handler.retire_framebuffer(framebuffer);
    }
    for view in inner.image_views.drain(..) {
        handler.retire_image_view(view);
    }

    let format_changed = inner.format != surface_format.format;
    inner.format = surface_format.format;
    inner.extent = extent;
    inner.images = unsafe {
        swapchain_loader
            .get_swapchain_images(inner.swapchain)
            .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to get swapchain images: {:?}", e))?
    };
    inner.image_index = 0;

    // The implicit render pass is format specific; rebuild it only when the
    // surface format actually changed
    if inner.render_pass == vk::RenderPass::null() || format_changed {
        if inner.render_pass != vk::RenderPass::null() {
            handler.retire_render_pass(inner.render_pass);
        }

        let color_attachment = vk::AttachmentDescription::default()
            .format(inner.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let color_ref = vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let color_refs = [color_ref];
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);

        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let attachments = [color_attachment];
        let subpasses = [subpass];
        let dependencies = [dependency];
        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        inner.render_pass = unsafe {
            device
                .create_render_pass(&render_pass_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create swapchain render pass: {:?}", e))?
        };
    }

    // One view + framebuffer per swapchain image
    for image in &inner.images {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(*image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(inner.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe {
            device
                .create_image_view(&view_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create swapchain image view: {:?}", e))?
        };
        inner.image_views.push(view);

        let attachments = [view];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(inner.render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device
                .create_framebuffer(&framebuffer_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create swapchain framebuffer: {:?}", e))?
        };
        inner.framebuffers.push(framebuffer);
    }

    // The acquire semaphore of the old incarnation may be pending a signal;
    // both binary semaphores are replaced on rebuild
    if inner.semaphore_acquire != vk::Semaphore::null() {
        handler.retire_semaphore(inner.semaphore_acquire);
    }
    if inner.semaphore_release != vk::Semaphore::null() {
        handler.retire_semaphore(inner.semaphore_release);
    }
    let semaphore_info = vk::SemaphoreCreateInfo::default();
    unsafe {
        inner.semaphore_acquire = device
            .create_semaphore(&semaphore_info, None)
            .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create acquire semaphore: {:?}", e))?;
        inner.semaphore_release = device
            .create_semaphore(&semaphore_info, None)
            .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create release semaphore: {:?}", e))?;
    }

    Ok(())
}
