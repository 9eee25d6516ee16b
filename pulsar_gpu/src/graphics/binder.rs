/// Per-command-list descriptor binding table with dirty tracking
///
/// Bind calls only mutate this CPU-side table; the backend materializes an
/// actual binding set lazily right before a draw, and only when something
/// changed since the previous draw. Re-binding an identical value is a no-op
/// and sets no dirty bit.

use bitflags::bitflags;

use crate::graphics::resource::{GpuBuffer, GpuResource, Sampler};

/// Constant buffer slots per command list
pub const BINDER_CBV_COUNT: usize = 14;
/// Shader resource slots per command list
pub const BINDER_SRV_COUNT: usize = 16;
/// Sampler slots per command list
pub const BINDER_SAMPLER_COUNT: usize = 16;

bitflags! {
    /// What must be re-materialized before the next draw
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BinderDirtyFlags: u32 {
        /// A table slot changed; a binding set must be (re)allocated and written
        const DESCRIPTOR = 1 << 0;
        /// Only a dynamic offset changed; the existing set can be re-bound
        const OFFSET = 1 << 1;
    }
}

/// Fixed-size slot arrays for the resources currently bound to a command list
#[derive(Default)]
pub struct DescriptorBindingTable {
    pub cbv: [GpuBuffer; BINDER_CBV_COUNT],
    pub cbv_offset: [u64; BINDER_CBV_COUNT],
    pub srv: [GpuResource; BINDER_SRV_COUNT],
    pub sam: [Sampler; BINDER_SAMPLER_COUNT],
}

/// Binding table plus dirty state, owned exclusively by the recording thread
#[derive(Default)]
pub struct DescriptorBinder {
    pub table: DescriptorBindingTable,
    pub dirty: BinderDirtyFlags,
}

impl DescriptorBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the table and mark everything dirty; called when a command list
    /// enters a new reuse cycle.
    pub fn reset(&mut self) {
        self.table = DescriptorBindingTable::default();
        self.dirty = BinderDirtyFlags::all();
    }

    /// Bind a shader resource (texture or buffer view)
    pub fn bind_resource(&mut self, slot: usize, resource: &GpuResource) {
        assert!(slot < BINDER_SRV_COUNT, "SRV slot {} out of range", slot);
        if !self.table.srv[slot].shares_backing(resource) {
            self.table.srv[slot] = resource.clone();
            self.dirty |= BinderDirtyFlags::DESCRIPTOR;
        }
    }

    /// Bind a sampler
    pub fn bind_sampler(&mut self, slot: usize, sampler: &Sampler) {
        assert!(slot < BINDER_SAMPLER_COUNT, "sampler slot {} out of range", slot);
        if !self.table.sam[slot].resource.shares_backing(&sampler.resource) {
            self.table.sam[slot] = sampler.clone();
            self.dirty |= BinderDirtyFlags::DESCRIPTOR;
        }
    }

    /// Bind a constant buffer with a dynamic offset
    ///
    /// An offset-only change on an already-bound buffer marks just the
    /// OFFSET bit, letting the backend re-bind the existing set with new
    /// dynamic offsets instead of writing a fresh one.
    pub fn bind_constant_buffer(&mut self, slot: usize, buffer: &GpuBuffer, offset: u64) {
        assert!(slot < BINDER_CBV_COUNT, "CBV slot {} out of range", slot);
        if !self.table.cbv[slot].resource.shares_backing(&buffer.resource) {
            self.table.cbv[slot] = buffer.clone();
            self.dirty |= BinderDirtyFlags::DESCRIPTOR;
        }
        if self.table.cbv_offset[slot] != offset {
            self.table.cbv_offset[slot] = offset;
            self.dirty |= BinderDirtyFlags::OFFSET;
        }
    }

    /// Whether the next draw needs any binding work at all
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Consume the dirty state after the backend flushed it
    pub fn clear_dirty(&mut self) -> BinderDirtyFlags {
        std::mem::take(&mut self.dirty)
    }
}

#[cfg(test)]
#[path = "binder_tests.rs"]
mod tests;
