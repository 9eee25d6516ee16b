/// Render pass descriptors and handle
///
/// A render pass owns the backend pass + framebuffer over a fixed set of
/// texture attachments. Swapchains carry their own implicit render pass.

use crate::graphics::resource::{hash_combine, GpuResource, Texture};
use crate::graphics::types::ResourceState;

/// What happens to an attachment's contents when the pass begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadOp {
    #[default]
    Load,
    Clear,
    DontCare,
}

/// What happens to an attachment's contents when the pass ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

/// Attachment role within a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachmentKind {
    #[default]
    RenderTarget,
    DepthStencil,
}

/// One attachment of a render pass
#[derive(Clone)]
pub struct RenderPassAttachment {
    pub kind: AttachmentKind,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    /// Layout before the render pass
    pub initial_layout: ResourceState,
    /// Layout within the render pass
    pub subpass_layout: ResourceState,
    /// Layout after the render pass
    pub final_layout: ResourceState,
    pub texture: Texture,
}

impl RenderPassAttachment {
    /// Color attachment with the usual shader-resource round trip
    pub fn render_target(texture: &Texture, load_op: LoadOp, store_op: StoreOp) -> Self {
        Self {
            kind: AttachmentKind::RenderTarget,
            load_op,
            store_op,
            initial_layout: ResourceState::SHADER_RESOURCE,
            subpass_layout: ResourceState::RENDER_TARGET,
            final_layout: ResourceState::SHADER_RESOURCE,
            texture: texture.clone(),
        }
    }

    /// Depth/stencil attachment that stays in depth-stencil layout
    pub fn depth_stencil(texture: &Texture, load_op: LoadOp, store_op: StoreOp) -> Self {
        Self {
            kind: AttachmentKind::DepthStencil,
            load_op,
            store_op,
            initial_layout: ResourceState::DEPTH_STENCIL,
            subpass_layout: ResourceState::DEPTH_STENCIL,
            final_layout: ResourceState::DEPTH_STENCIL,
            texture: texture.clone(),
        }
    }
}

/// Render pass descriptor
#[derive(Clone, Default)]
pub struct RenderPassDesc {
    pub attachments: Vec<RenderPassAttachment>,
}

/// Render pass handle
///
/// `hash` covers the attachment format set; it is folded into pipeline cache
/// keys because backend pipelines are format specific.
#[derive(Clone, Default)]
pub struct RenderPass {
    pub resource: GpuResource,
    pub desc: RenderPassDesc,
    pub hash: u64,
}

impl RenderPass {
    pub fn is_valid(&self) -> bool {
        self.resource.is_valid()
    }
}

/// Content hash of a render pass attachment format set
pub fn compute_render_pass_hash(desc: &RenderPassDesc) -> u64 {
    let mut hash = 0u64;
    hash_combine(&mut hash, &desc.attachments.len());
    for attachment in &desc.attachments {
        hash_combine(&mut hash, &attachment.texture.desc.format);
    }
    hash
}
