/// Pipeline state cache with worker-local accumulation
///
/// Backend pipeline objects are expensive to create, so they are cached by a
/// content hash over {shaders, fixed-function state, vertex layout, render
/// target formats}. During recording each command list appends misses to its
/// own worker-local map without any locking; at frame submission all local
/// maps are merged into the global map under a single short critical
/// section. Once merged, entries are never mutated, so recording threads may
/// read the global map without synchronization in the next frames.

use rustc_hash::FxHashMap;

/// The shared, merged pipeline map plus the merge policy
pub struct PipelineStateCache<P> {
    global: FxHashMap<u64, P>,
}

impl<P> Default for PipelineStateCache<P> {
    fn default() -> Self {
        Self {
            global: FxHashMap::default(),
        }
    }
}

impl<P> PipelineStateCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a merged pipeline by key
    pub fn get(&self, hash: u64) -> Option<&P> {
        self.global.get(&hash)
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.global.contains_key(&hash)
    }

    /// Merge one worker-local map into the global cache
    ///
    /// First writer wins: a local entry whose key is already present loses
    /// the race and is handed to `discard`, which must route it into
    /// deferred destruction. Every created pipeline is therefore destroyed
    /// exactly once, never leaked and never double-registered.
    pub fn merge(&mut self, local: &mut FxHashMap<u64, P>, mut discard: impl FnMut(P)) {
        for (hash, pipeline) in local.drain() {
            match self.global.entry(hash) {
                std::collections::hash_map::Entry::Occupied(_) => discard(pipeline),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(pipeline);
                }
            }
        }
    }

    /// Number of merged entries
    pub fn len(&self) -> usize {
        self.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }

    /// Tear down every merged pipeline (device shutdown, queues drained)
    pub fn drain_all(&mut self, mut destroy: impl FnMut(P)) {
        for (_, pipeline) in self.global.drain() {
            destroy(pipeline);
        }
    }
}

#[cfg(test)]
#[path = "pipeline_cache_tests.rs"]
mod tests;
