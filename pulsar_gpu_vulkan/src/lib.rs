/*!
# Pulsar GPU - Vulkan device

Vulkan implementation of the `pulsar_gpu` [`GraphicsDevice`] trait on top of
`ash` and `gpu-allocator`.

One `VulkanDevice` is created at application startup and owned explicitly by
the caller; every subsystem that records GPU work receives a reference to
it. The device drains all queues and destroys its objects on drop, so all
resource handles must be released before the device goes away.

[`GraphicsDevice`]: pulsar_gpu::graphics::GraphicsDevice
*/

mod allocation;
mod binder;
mod commandlist;
mod converts;
mod copy;
mod debug;
mod device;
mod resources;
mod shader_reflect;
mod swapchain;

pub use device::VulkanDevice;
