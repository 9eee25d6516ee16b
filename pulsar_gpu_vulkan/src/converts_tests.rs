//! Unit tests for descriptor-to-Vulkan conversions
//!
//! These are pure tables, so they run without a GPU.

use super::*;

#[test]
fn test_format_conversions() {
    assert_eq!(convert_format(Format::Unknown), vk::Format::UNDEFINED);
    assert_eq!(
        convert_format(Format::R32G32B32A32_FLOAT),
        vk::Format::R32G32B32A32_SFLOAT
    );
    assert_eq!(convert_format(Format::R8G8B8A8_UNORM), vk::Format::R8G8B8A8_UNORM);
    assert_eq!(convert_format(Format::B8G8R8A8_UNORM), vk::Format::B8G8R8A8_UNORM);
    assert_eq!(convert_format(Format::D32_FLOAT), vk::Format::D32_SFLOAT);
    assert_eq!(
        convert_format(Format::D32_FLOAT_S8_UINT),
        vk::Format::D32_SFLOAT_S8_UINT
    );
    assert_eq!(convert_format(Format::R16_FLOAT), vk::Format::R16_SFLOAT);
    assert_eq!(convert_format(Format::R8_UNORM), vk::Format::R8_UNORM);
}

#[test]
fn test_comparison_func_conversions() {
    assert_eq!(convert_comparison_func(ComparisonFunc::Never), vk::CompareOp::NEVER);
    assert_eq!(
        convert_comparison_func(ComparisonFunc::LessEqual),
        vk::CompareOp::LESS_OR_EQUAL
    );
    assert_eq!(convert_comparison_func(ComparisonFunc::Always), vk::CompareOp::ALWAYS);
}

#[test]
fn test_stencil_op_conversions() {
    assert_eq!(convert_stencil_op(StencilOp::Keep), vk::StencilOp::KEEP);
    assert_eq!(
        convert_stencil_op(StencilOp::IncrSat),
        vk::StencilOp::INCREMENT_AND_CLAMP
    );
    assert_eq!(convert_stencil_op(StencilOp::Decr), vk::StencilOp::DECREMENT_AND_WRAP);
}

#[test]
fn test_load_store_op_conversions() {
    assert_eq!(convert_load_op(LoadOp::Clear), vk::AttachmentLoadOp::CLEAR);
    assert_eq!(convert_load_op(LoadOp::DontCare), vk::AttachmentLoadOp::DONT_CARE);
    assert_eq!(convert_store_op(StoreOp::Store), vk::AttachmentStoreOp::STORE);
    assert_eq!(convert_store_op(StoreOp::DontCare), vk::AttachmentStoreOp::DONT_CARE);
}

#[test]
fn test_rasterizer_conversions() {
    assert_eq!(convert_fill_mode(FillMode::Wireframe), vk::PolygonMode::LINE);
    assert_eq!(convert_cull_mode(CullMode::Back), vk::CullModeFlags::BACK);
    assert_eq!(convert_cull_mode(CullMode::None), vk::CullModeFlags::NONE);
    assert_eq!(
        convert_front_face(FrontFace::Ccw),
        vk::FrontFace::COUNTER_CLOCKWISE
    );
}

#[test]
fn test_topology_conversions() {
    assert_eq!(
        convert_primitive_topology(PrimitiveTopology::TriangleList),
        vk::PrimitiveTopology::TRIANGLE_LIST
    );
    assert_eq!(
        convert_primitive_topology(PrimitiveTopology::LineStrip),
        vk::PrimitiveTopology::LINE_STRIP
    );
}

#[test]
fn test_image_layout_conversions() {
    assert_eq!(
        convert_image_layout(ResourceState::UNDEFINED),
        vk::ImageLayout::UNDEFINED
    );
    assert_eq!(
        convert_image_layout(ResourceState::RENDER_TARGET),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    );
    assert_eq!(
        convert_image_layout(ResourceState::SHADER_RESOURCE),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
    assert_eq!(
        convert_image_layout(ResourceState::COPY_DST),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    );
}

#[test]
fn test_access_flags_accumulate() {
    let state = ResourceState::SHADER_RESOURCE | ResourceState::COPY_DST;
    let flags = parse_resource_state(state);
    assert!(flags.contains(vk::AccessFlags::SHADER_READ));
    assert!(flags.contains(vk::AccessFlags::TRANSFER_WRITE));
    assert!(!flags.contains(vk::AccessFlags::INDEX_READ));
}

#[test]
fn test_buffer_state_access_flags() {
    let state = ResourceState::VERTEX_BUFFER | ResourceState::INDEX_BUFFER;
    let flags = parse_resource_state(state);
    assert!(flags.contains(vk::AccessFlags::VERTEX_ATTRIBUTE_READ));
    assert!(flags.contains(vk::AccessFlags::INDEX_READ));
}

