/*!
# Pulsar GPU

Core types and traits for the Pulsar GPU device layer.

This crate provides the backend-agnostic graphics device API: opaque
reference-counted resource handles, descriptor types, the
[`GraphicsDevice`](graphics::GraphicsDevice) trait recorded against by the
rest of the engine, and the device-independent machinery every backend
shares (deferred destruction queues, the descriptor binding table,
pipeline-state caching, copy-command recycling and cross-queue counter
bookkeeping). Backend implementations (Vulkan, ...) live in sibling crates.

## Architecture

- **GraphicsDevice**: factory + command recording trait
- **GpuResource family**: Buffer, Texture, Shader, Sampler, PipelineState,
  SwapChain handles with shared, type-erased backing objects
- **DeferredDestroyQueue**: frame-tagged retirement of backend objects
- **DescriptorBinder**: per-command-list binding table with dirty tracking
- **PipelineStateCache**: worker-local caches merged at frame submission
- **CopyCommandPool**: recycling staging/upload command allocator
*/

// Internal modules
mod error;
pub mod log;
pub mod graphics;

// Error types at crate root
pub use error::{Error, Result};

// Re-export math library at crate root
pub use glam;
