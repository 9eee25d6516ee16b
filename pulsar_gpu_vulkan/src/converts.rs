/// Conversions from device-layer descriptor types to Vulkan enums

use ash::vk;
use pulsar_gpu::graphics::{
    ComparisonFunc, CullMode, FillMode, Format, FrontFace, LoadOp, PrimitiveTopology,
    ResourceState, StencilOp, StoreOp, TextureAddressMode,
};

pub(crate) fn convert_format(value: Format) -> vk::Format {
    match value {
        Format::Unknown => vk::Format::UNDEFINED,
        Format::R32G32B32A32_FLOAT => vk::Format::R32G32B32A32_SFLOAT,
        Format::R32G32_FLOAT => vk::Format::R32G32_SFLOAT,
        Format::R8G8B8A8_UNORM => vk::Format::R8G8B8A8_UNORM,
        Format::R8G8B8A8_UINT => vk::Format::R8G8B8A8_UINT,
        Format::R16G16_FLOAT => vk::Format::R16G16_SFLOAT,
        Format::D32_FLOAT => vk::Format::D32_SFLOAT,
        Format::D32_FLOAT_S8_UINT => vk::Format::D32_SFLOAT_S8_UINT,
        Format::R32_FLOAT => vk::Format::R32_SFLOAT,
        Format::R16_FLOAT => vk::Format::R16_SFLOAT,
        Format::R8_UNORM => vk::Format::R8_UNORM,
        Format::B8G8R8A8_UNORM => vk::Format::B8G8R8A8_UNORM,
        Format::R32G32B32_FLOAT => vk::Format::R32G32B32_SFLOAT,
    }
}

pub(crate) fn convert_comparison_func(value: ComparisonFunc) -> vk::CompareOp {
    match value {
        ComparisonFunc::Never => vk::CompareOp::NEVER,
        ComparisonFunc::Less => vk::CompareOp::LESS,
        ComparisonFunc::Equal => vk::CompareOp::EQUAL,
        ComparisonFunc::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        ComparisonFunc::Greater => vk::CompareOp::GREATER,
        ComparisonFunc::NotEqual => vk::CompareOp::NOT_EQUAL,
        ComparisonFunc::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        ComparisonFunc::Always => vk::CompareOp::ALWAYS,
    }
}

pub(crate) fn convert_stencil_op(value: StencilOp) -> vk::StencilOp {
    match value {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::IncrSat => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::DecrSat => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::Invert => vk::StencilOp::INVERT,
        StencilOp::Incr => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::Decr => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

pub(crate) fn convert_load_op(value: LoadOp) -> vk::AttachmentLoadOp {
    match value {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub(crate) fn convert_store_op(value: StoreOp) -> vk::AttachmentStoreOp {
    match value {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub(crate) fn convert_fill_mode(value: FillMode) -> vk::PolygonMode {
    match value {
        FillMode::Wireframe => vk::PolygonMode::LINE,
        FillMode::Solid => vk::PolygonMode::FILL,
    }
}

pub(crate) fn convert_cull_mode(value: CullMode) -> vk::CullModeFlags {
    match value {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub(crate) fn convert_front_face(value: FrontFace) -> vk::FrontFace {
    match value {
        FrontFace::Ccw => vk::FrontFace::COUNTER_CLOCKWISE,
        FrontFace::Cw => vk::FrontFace::CLOCKWISE,
    }
}

pub(crate) fn convert_primitive_topology(value: PrimitiveTopology) -> vk::PrimitiveTopology {
    match value {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
    }
}

pub(crate) fn convert_address_mode(value: TextureAddressMode) -> vk::SamplerAddressMode {
    match value {
        TextureAddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        TextureAddressMode::Wrap => vk::SamplerAddressMode::REPEAT,
        TextureAddressMode::Mirror => vk::SamplerAddressMode::MIRRORED_REPEAT,
        TextureAddressMode::Border => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

/// Image layout a logical resource state maps to
pub(crate) fn convert_image_layout(value: ResourceState) -> vk::ImageLayout {
    if value == ResourceState::UNDEFINED {
        return vk::ImageLayout::UNDEFINED;
    }
    if value.contains(ResourceState::RENDER_TARGET) {
        return vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
    }
    if value.contains(ResourceState::DEPTH_STENCIL) {
        return vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
    }
    if value.contains(ResourceState::DEPTH_STENCIL_READONLY) {
        return vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL;
    }
    if value.contains(ResourceState::SHADER_RESOURCE)
        || value.contains(ResourceState::SHADER_RESOURCE_COMPUTE)
    {
        return vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    }
    if value.contains(ResourceState::UNORDERED_ACCESS) {
        return vk::ImageLayout::GENERAL;
    }
    if value.contains(ResourceState::COPY_SRC) {
        return vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
    }
    if value.contains(ResourceState::COPY_DST) {
        return vk::ImageLayout::TRANSFER_DST_OPTIMAL;
    }
    vk::ImageLayout::UNDEFINED
}

/// Access mask for all the uses a logical resource state allows
pub(crate) fn parse_resource_state(value: ResourceState) -> vk::AccessFlags {
    let mut flags = vk::AccessFlags::empty();

    if value.contains(ResourceState::SHADER_RESOURCE)
        || value.contains(ResourceState::SHADER_RESOURCE_COMPUTE)
    {
        flags |= vk::AccessFlags::SHADER_READ;
    }
    if value.contains(ResourceState::UNORDERED_ACCESS) {
        flags |= vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE;
    }
    if value.contains(ResourceState::COPY_SRC) {
        flags |= vk::AccessFlags::TRANSFER_READ;
    }
    if value.contains(ResourceState::COPY_DST) {
        flags |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if value.contains(ResourceState::RENDER_TARGET) {
        flags |= vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if value.contains(ResourceState::DEPTH_STENCIL) {
        flags |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if value.contains(ResourceState::DEPTH_STENCIL_READONLY) {
        flags |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
    }
    if value.contains(ResourceState::VERTEX_BUFFER) {
        flags |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
    }
    if value.contains(ResourceState::INDEX_BUFFER) {
        flags |= vk::AccessFlags::INDEX_READ;
    }
    if value.contains(ResourceState::CONSTANT_BUFFER) {
        flags |= vk::AccessFlags::UNIFORM_READ;
    }

    flags
}

#[cfg(test)]
#[path = "converts_tests.rs"]
mod tests;
