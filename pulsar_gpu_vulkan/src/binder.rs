/// Lazy descriptor-set materialization
///
/// Bind calls only touch the CPU-side binding table; right before a draw
/// the dirty state is flushed here: a descriptor set is allocated from the
/// command list's per-buffered-frame pool, written in one
/// `vkUpdateDescriptorSets` call and bound together with the packed dynamic
/// offsets. An offset-only change re-binds the existing set without
/// allocating or writing anything.

use ash::vk;
use pulsar_gpu::graphics::{BinderDirtyFlags, DescriptorBinder, BINDER_CBV_COUNT, BINDER_SRV_COUNT};
use pulsar_gpu::{gpu_err, gpu_warn, Error, Result};

use crate::allocation::AllocationHandler;
use crate::resources::{BufferVulkan, PipelineStateVulkan, SamplerVulkan, TextureVulkan};

const LOG_SOURCE: &str = "pulsar::vulkan";

/// Descriptor pool a command list allocates binding sets from; doubled in
/// size (old pool deferred-destroyed) when an allocation fails
pub(crate) struct DescriptorBinderPool {
    pub descriptor_pool: vk::DescriptorPool,
    pub max_sets: u32,
}

impl Default for DescriptorBinderPool {
    fn default() -> Self {
        Self {
            descriptor_pool: vk::DescriptorPool::null(),
            max_sets: 0,
        }
    }
}

impl DescriptorBinderPool {
    pub fn init(&mut self, device: &ash::Device, max_sets: u32) -> Result<()> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: BINDER_CBV_COUNT as u32 * max_sets,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: BINDER_CBV_COUNT as u32 * max_sets,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: BINDER_SRV_COUNT as u32 * max_sets,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: BINDER_SRV_COUNT as u32 * max_sets,
            },
        ];
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);

        self.descriptor_pool = unsafe {
            self.max_sets = max_sets;
            device
                .create_descriptor_pool(&create_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create descriptor pool: {:?}", e))?
        };
        Ok(())
    }

    /// Hand the pool to deferred destruction; in-flight sets may still use it
    pub fn destroy(&mut self, handler: &AllocationHandler) {
        if self.descriptor_pool != vk::DescriptorPool::null() {
            handler.retire_descriptor_pool(self.descriptor_pool);
            self.descriptor_pool = vk::DescriptorPool::null();
        }
    }

    /// Destroy the pool right away (device teardown, queues drained)
    pub fn destroy_immediate(&mut self, device: &ash::Device) {
        if self.descriptor_pool != vk::DescriptorPool::null() {
            unsafe {
                device.destroy_descriptor_pool(self.descriptor_pool, None);
            }
            self.descriptor_pool = vk::DescriptorPool::null();
        }
    }

    /// Recycle every set for the next reuse cycle of this frame slot
    pub fn reset(&mut self, device: &ash::Device) {
        if self.descriptor_pool != vk::DescriptorPool::null() {
            unsafe {
                let _ = device
                    .reset_descriptor_pool(self.descriptor_pool, vk::DescriptorPoolResetFlags::empty());
            }
        }
    }
}

enum PlannedWrite {
    Image { binding: u32, array_element: u32, info_index: usize },
    Buffer {
        binding: u32,
        array_element: u32,
        descriptor_type: vk::DescriptorType,
        info_index: usize,
    },
}

/// Materialize and bind the binding table for the next draw
#[allow(clippy::too_many_arguments)]
pub(crate) fn flush_binder(
    device: &ash::Device,
    handler: &AllocationHandler,
    command_buffer: vk::CommandBuffer,
    binder: &mut DescriptorBinder,
    pso: &PipelineStateVulkan,
    pool: &mut DescriptorBinderPool,
    last_set: &mut vk::DescriptorSet,
    default_pool_size: u32,
) -> Result<()> {
    if !binder.is_dirty() {
        return Ok(());
    }
    if pso.layout_bindings.is_empty() {
        return Ok(());
    }

    // Dynamic offsets are packed in slot order to match the sorted dynamic
    // slot list baked into the pipeline layout
    let dynamic_offsets: Vec<u32> = pso
        .uniform_buffer_dynamic_slots
        .iter()
        .map(|slot| binder.table.cbv_offset[*slot as usize] as u32)
        .collect();

    let dirty = binder.clear_dirty();
    let mut descriptor_set = *last_set;

    if dirty.contains(BinderDirtyFlags::DESCRIPTOR)
        || descriptor_set == vk::DescriptorSet::null()
    {
        if pool.descriptor_pool == vk::DescriptorPool::null() {
            pool.init(device, default_pool_size)?;
        }

        // Allocate, growing the pool on exhaustion
        let layouts = [pso.descriptor_set_layout];
        descriptor_set = loop {
            let alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(pool.descriptor_pool)
                .set_layouts(&layouts);
            match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
                Ok(sets) => break sets[0],
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
                | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                    let grown = pool.max_sets * 2;
                    gpu_warn!(
                        LOG_SOURCE,
                        "Descriptor pool exhausted, growing to {} sets",
                        grown
                    );
                    pool.destroy(handler);
                    pool.init(device, grown)?;
                }
                Err(e) => {
                    return Err(gpu_err!(LOG_SOURCE, "Failed to allocate descriptor set: {:?}", e));
                }
            }
        };

        // First pass: gather infos, second pass: writes referencing them
        // (the info vectors must not move once referenced)
        let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::new();
        let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::new();
        let mut planned: Vec<PlannedWrite> = Vec::new();

        for layout_binding in &pso.layout_bindings {
            for descriptor_index in 0..layout_binding.descriptor_count {
                let unrolled = (layout_binding.binding + descriptor_index) as usize;
                let slot_limit = match layout_binding.descriptor_type {
                    vk::DescriptorType::UNIFORM_BUFFER
                    | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => BINDER_CBV_COUNT,
                    _ => BINDER_SRV_COUNT,
                };
                if unrolled >= slot_limit {
                    return Err(gpu_err!(
                        LOG_SOURCE,
                        "Shader binding {} exceeds the binder's slot table",
                        unrolled
                    ));
                }

                match layout_binding.descriptor_type {
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER => {
                        let resource = &binder.table.srv[unrolled];
                        let Some(texture) = resource.internal_as::<TextureVulkan>() else {
                            return Err(Error::InvalidResource(format!(
                                "no texture bound to SRV slot {}",
                                unrolled
                            )));
                        };
                        let sampler = binder.table.sam[unrolled]
                            .resource
                            .internal_as::<SamplerVulkan>()
                            .map(|s| s.sampler)
                            .ok_or_else(|| {
                                Error::InvalidResource(format!(
                                    "no sampler bound to slot {}",
                                    unrolled
                                ))
                            })?;
                        image_infos.push(
                            vk::DescriptorImageInfo::default()
                                .sampler(sampler)
                                .image_view(texture.srv)
                                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                        );
                        planned.push(PlannedWrite::Image {
                            binding: layout_binding.binding,
                            array_element: descriptor_index,
                            info_index: image_infos.len() - 1,
                        });
                    }

                    vk::DescriptorType::UNIFORM_BUFFER
                    | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => {
                        let bound = &binder.table.cbv[unrolled];
                        let Some(buffer) = bound.resource.internal_as::<BufferVulkan>() else {
                            return Err(Error::InvalidResource(format!(
                                "no buffer bound to CBV slot {}",
                                unrolled
                            )));
                        };
                        // Dynamic descriptors take their offset at bind time
                        let offset = if layout_binding.descriptor_type
                            == vk::DescriptorType::UNIFORM_BUFFER
                        {
                            binder.table.cbv_offset[unrolled]
                        } else {
                            0
                        };
                        let range = match pso.uniform_buffer_sizes[unrolled] {
                            0 => vk::WHOLE_SIZE,
                            size => size,
                        };
                        buffer_infos.push(
                            vk::DescriptorBufferInfo::default()
                                .buffer(buffer.buffer)
                                .offset(offset)
                                .range(range),
                        );
                        planned.push(PlannedWrite::Buffer {
                            binding: layout_binding.binding,
                            array_element: descriptor_index,
                            descriptor_type: layout_binding.descriptor_type,
                            info_index: buffer_infos.len() - 1,
                        });
                    }

                    vk::DescriptorType::STORAGE_BUFFER => {
                        let resource = &binder.table.srv[unrolled];
                        let Some(buffer) = resource.internal_as::<BufferVulkan>() else {
                            return Err(Error::InvalidResource(format!(
                                "no buffer bound to SRV slot {}",
                                unrolled
                            )));
                        };
                        buffer_infos.push(
                            vk::DescriptorBufferInfo::default()
                                .buffer(buffer.buffer)
                                .offset(0)
                                .range(vk::WHOLE_SIZE),
                        );
                        planned.push(PlannedWrite::Buffer {
                            binding: layout_binding.binding,
                            array_element: descriptor_index,
                            descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                            info_index: buffer_infos.len() - 1,
                        });
                    }

                    other => {
                        return Err(gpu_err!(
                            LOG_SOURCE,
                            "Unhandled descriptor type in binder flush: {:?}",
                            other
                        ));
                    }
                }
            }
        }

        let writes: Vec<vk::WriteDescriptorSet<'_>> = planned
            .iter()
            .map(|plan| match plan {
                PlannedWrite::Image {
                    binding,
                    array_element,
                    info_index,
                } => vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(*binding)
                    .dst_array_element(*array_element)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(&image_infos[*info_index])),
                PlannedWrite::Buffer {
                    binding,
                    array_element,
                    descriptor_type,
                    info_index,
                } => vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(*binding)
                    .dst_array_element(*array_element)
                    .descriptor_type(*descriptor_type)
                    .buffer_info(std::slice::from_ref(&buffer_infos[*info_index])),
            })
            .collect();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }

    unsafe {
        device.cmd_bind_descriptor_sets(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            pso.pipeline_layout,
            0,
            &[descriptor_set],
            &dynamic_offsets,
        );
    }

    *last_set = descriptor_set;
    Ok(())
}
