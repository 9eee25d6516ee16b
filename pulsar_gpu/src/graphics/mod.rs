/// Graphics device module - all device-facing types and traits

// Module declarations
pub mod types;
pub mod resource;
pub mod render_pass;
pub mod device;

// Device-independent machinery shared by backend implementations
pub mod deferred;
pub mod binder;
pub mod pipeline_cache;
pub mod copy;
pub mod frame_sync;

// Re-export everything from the public-facing modules
pub use types::*;
pub use resource::*;
pub use render_pass::*;
pub use device::*;

// Re-export machinery types
pub use deferred::*;
pub use binder::*;
pub use pipeline_cache::*;
pub use copy::*;
pub use frame_sync::*;

// Mock graphics device for tests (no GPU required)
#[cfg(test)]
pub mod mock_graphics_device;
