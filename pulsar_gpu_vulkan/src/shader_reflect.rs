/// SPIR-V descriptor reflection
///
/// Shaders arrive as opaque bytecode; the descriptor-set layout is derived
/// here so pipeline creation and the descriptor binder agree on slots.
/// Uniform buffers are always promoted to DYNAMIC descriptors - that is
/// what gives the binding table's per-slot offsets meaning and lets
/// transient constant data re-suballocate per draw without new sets.

use ash::vk;
use pulsar_gpu::graphics::BINDER_CBV_COUNT;
use pulsar_gpu::{gpu_err, Result};

use crate::resources::LayoutBinding;

pub(crate) struct ReflectedShader {
    pub layout_bindings: Vec<LayoutBinding>,
    pub uniform_buffer_sizes: [u64; BINDER_CBV_COUNT],
    pub uniform_buffer_dynamic_slots: Vec<u32>,
}

/// Enumerate the descriptor bindings of a shader stage
pub(crate) fn reflect_shader(
    code: &[u32],
    stage_flags: vk::ShaderStageFlags,
) -> Result<ReflectedShader> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(code.to_vec())
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| gpu_err!("pulsar::vulkan", "SPIR-V reflection failed: {:?}", e))?;

    let mut reflected = ReflectedShader {
        layout_bindings: Vec::new(),
        uniform_buffer_sizes: [0; BINDER_CBV_COUNT],
        uniform_buffer_dynamic_slots: Vec::new(),
    };

    for entry_point in &entry_points {
        for var in entry_point.vars.iter() {
            if let spirq::var::Variable::Descriptor {
                desc_bind,
                desc_ty,
                ty,
                nbind,
                ..
            } = var
            {
                if desc_bind.set() > 0 {
                    // Single-set binding model; no bindless tables
                    return Err(gpu_err!(
                        "pulsar::vulkan",
                        "Descriptor set {} used; only set 0 is supported",
                        desc_bind.set()
                    ));
                }

                let (descriptor_type, block_size) = match desc_ty {
                    spirq::ty::DescriptorType::UniformBuffer() => {
                        // Promoted to DYNAMIC so per-slot offsets apply
                        (
                            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                            ty.nbyte().unwrap_or(0) as u64,
                        )
                    }
                    spirq::ty::DescriptorType::StorageBuffer(..) => {
                        (vk::DescriptorType::STORAGE_BUFFER, 0)
                    }
                    spirq::ty::DescriptorType::CombinedImageSampler()
                    | spirq::ty::DescriptorType::SampledImage()
                    | spirq::ty::DescriptorType::Sampler() => {
                        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 0)
                    }
                    other => {
                        return Err(gpu_err!(
                            "pulsar::vulkan",
                            "Unsupported SPIR-V descriptor type: {:?}",
                            other
                        ));
                    }
                };

                let binding = desc_bind.bind();
                reflected.layout_bindings.push(LayoutBinding {
                    binding,
                    descriptor_type,
                    descriptor_count: *nbind,
                    stage_flags,
                });

                if descriptor_type == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC {
                    for i in 0..*nbind {
                        let slot = (binding + i) as usize;
                        if slot < BINDER_CBV_COUNT {
                            reflected.uniform_buffer_sizes[slot] = block_size;
                            reflected.uniform_buffer_dynamic_slots.push(binding + i);
                        }
                    }
                }
            }
        }
    }

    Ok(reflected)
}

/// Pack shader bytecode into the 32-bit words Vulkan and the reflector expect
pub(crate) fn bytecode_to_words(bytecode: &[u8]) -> Result<Vec<u32>> {
    if bytecode.len() % 4 != 0 {
        return Err(gpu_err!(
            "pulsar::vulkan",
            "Shader bytecode length {} is not a multiple of 4",
            bytecode.len()
        ));
    }
    Ok(bytecode
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
