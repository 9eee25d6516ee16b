//! Unit tests for descriptor types
//!
//! Covers Format::stride() for every variant, depth/stencil format queries
//! and the alignment helper.

use super::*;

#[test]
fn test_format_stride_all_variants() {
    let expected = [
        (Format::R32G32B32A32_FLOAT, 16),
        (Format::R32G32B32_FLOAT, 12),
        (Format::R32G32_FLOAT, 8),
        (Format::R8G8B8A8_UINT, 4),
        (Format::R8G8B8A8_UNORM, 4),
        (Format::R16G16_FLOAT, 4),
        (Format::R32_FLOAT, 4),
        (Format::D32_FLOAT, 4),
        (Format::B8G8R8A8_UNORM, 4),
        (Format::R16_FLOAT, 2),
        (Format::R8_UNORM, 1),
    ];
    for (format, stride) in expected {
        assert_eq!(format.stride(), stride, "stride mismatch for {:?}", format);
    }
}

#[test]
fn test_format_depth_queries() {
    assert!(Format::D32_FLOAT.is_depth());
    assert!(Format::D32_FLOAT_S8_UINT.is_depth());
    assert!(!Format::R8G8B8A8_UNORM.is_depth());

    assert!(Format::D32_FLOAT_S8_UINT.has_stencil());
    assert!(!Format::D32_FLOAT.has_stencil());
}

#[test]
fn test_align_to() {
    assert_eq!(align_to(0, 256), 0);
    assert_eq!(align_to(1, 256), 256);
    assert_eq!(align_to(256, 256), 256);
    assert_eq!(align_to(257, 256), 512);
    assert_eq!(align_to(100, 1), 100);
}

#[test]
fn test_queue_type_indices_are_distinct() {
    let indices: Vec<usize> = QueueType::ALL.iter().map(|q| q.index()).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(QueueType::ALL.len(), QUEUE_COUNT);
}

#[test]
fn test_bind_flags_combine() {
    let flags = BindFlags::VERTEX_BUFFER | BindFlags::SHADER_RESOURCE;
    assert!(flags.contains(BindFlags::VERTEX_BUFFER));
    assert!(flags.contains(BindFlags::SHADER_RESOURCE));
    assert!(!flags.contains(BindFlags::INDEX_BUFFER));
}

#[test]
fn test_swapchain_desc_defaults() {
    let desc = SwapChainDesc::default();
    assert_eq!(desc.buffer_count, 2);
    assert_eq!(desc.format, Format::B8G8R8A8_UNORM);
    assert!(desc.vsync);
}

#[test]
fn test_sampler_desc_defaults() {
    let desc = SamplerDesc::default();
    assert_eq!(desc.filter, TextureFilter::Point);
    assert_eq!(desc.address_u, TextureAddressMode::Wrap);
    assert_eq!(desc.max_anisotropy, 16.0);
}
