/// Recycling pool for staging/upload command allocations
///
/// Every resource-initialization upload records into a copy command paired
/// with a CPU-visible staging buffer. Submissions are batched: each gets a
/// monotonically increasing target value on the copy queue's counter, and an
/// entry returns to the freelist only once the observed completed value has
/// reached its target. The payload type `C` carries whatever the backend
/// needs (command pool, staging buffer, ...); this pool only manages the
/// reuse bookkeeping.

/// One pooled copy command
pub struct CopyCommand<C> {
    /// Size in bytes of the paired staging buffer
    pub staging_capacity: u64,
    /// Counter value that marks this command's completion; 0 while unsubmitted
    pub target: u64,
    pub payload: C,
}

/// Freelist/worklist bookkeeping shared by every backend's copy allocator
pub struct CopyCommandPool<C> {
    freelist: Vec<CopyCommand<C>>,
    worklist: Vec<CopyCommand<C>>,
    fence_value: u64,
    submit_wait: u64,
}

impl<C> Default for CopyCommandPool<C> {
    fn default() -> Self {
        Self {
            freelist: Vec::new(),
            worklist: Vec::new(),
            fence_value: 0,
            submit_wait: 0,
        }
    }
}

impl<C> CopyCommandPool<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a confirmed-idle command off the freelist, preferring one whose
    /// staging buffer already fits `min_capacity`.
    ///
    /// Returns `None` when the freelist is empty; the caller then creates a
    /// fresh command. The returned command may still be smaller than
    /// requested, in which case the caller replaces its staging buffer (the
    /// rest of the payload is reused).
    pub fn acquire(&mut self, min_capacity: u64) -> Option<CopyCommand<C>> {
        if self.freelist.is_empty() {
            return None;
        }

        let last = self.freelist.len() - 1;
        if self.freelist[last].staging_capacity < min_capacity {
            // Search for one that can fit the request
            for i in 0..self.freelist.len() {
                if self.freelist[i].staging_capacity >= min_capacity {
                    self.freelist.swap(i, last);
                    break;
                }
            }
        }

        self.freelist.pop()
    }

    /// Queue a recorded command for the next batched submission
    ///
    /// Assigns the next counter value as its completion target and folds it
    /// into the batch's wait value. Never blocks.
    pub fn submit(&mut self, mut cmd: CopyCommand<C>) -> u64 {
        self.fence_value += 1;
        cmd.target = self.fence_value;
        self.submit_wait = self.submit_wait.max(cmd.target);
        let target = cmd.target;
        self.worklist.push(cmd);
        target
    }

    /// Reclaim completed commands and take the batch wait value
    ///
    /// `completed` is the copy counter value the backend has observed as
    /// finished. Every worklist entry with `target <= completed` returns to
    /// the freelist. The returned value is what downstream queues must wait
    /// for to see this batch's copies; it resets to zero for the next batch.
    pub fn flush(&mut self, completed: u64) -> u64 {
        let mut i = 0;
        while i < self.worklist.len() {
            if self.worklist[i].target <= completed {
                let cmd = self.worklist.swap_remove(i);
                self.freelist.push(cmd);
            } else {
                i += 1;
            }
        }

        std::mem::take(&mut self.submit_wait)
    }

    /// Visit every submitted-but-unreclaimed command
    pub fn for_each_in_flight(&mut self, mut visit: impl FnMut(&mut CopyCommand<C>)) {
        for cmd in &mut self.worklist {
            visit(cmd);
        }
    }

    /// Highest counter value handed out so far
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// Commands submitted but not yet reclaimed
    pub fn in_flight(&self) -> usize {
        self.worklist.len()
    }

    pub fn free_count(&self) -> usize {
        self.freelist.len()
    }

    /// Tear down every pooled command (backend waits for queue idle first)
    pub fn drain_all(&mut self, mut destroy: impl FnMut(C)) {
        for cmd in self.freelist.drain(..).chain(self.worklist.drain(..)) {
            destroy(cmd.payload);
        }
    }
}

#[cfg(test)]
#[path = "copy_tests.rs"]
mod tests;
