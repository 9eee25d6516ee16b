/// Cross-queue ordering bookkeeping
///
/// Each hardware queue owns a monotonically increasing counter (timeline
/// semaphore) signaled on every submission. After all queues submit a
/// frame, every queue's *next* submission waits for every other queue's
/// just-signaled value, so no queue starts overlapping work with another
/// queue's still-pending frame-boundary effects while independent queues
/// still run ahead within the buffering depth.

use crate::graphics::types::{QueueType, QUEUE_COUNT};

/// Last-signaled counter value per queue plus the derived wait lists
#[derive(Debug, Default, Clone)]
pub struct CrossQueueSync {
    signaled: [u64; QUEUE_COUNT],
}

impl CrossQueueSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `queue` signaled `value` on its counter this frame
    pub fn record_signal(&mut self, queue: QueueType, value: u64) {
        debug_assert!(
            value >= self.signaled[queue.index()],
            "queue counters are monotonic"
        );
        self.signaled[queue.index()] = value;
    }

    /// Last value `queue` signaled
    pub fn signaled(&self, queue: QueueType) -> u64 {
        self.signaled[queue.index()]
    }

    /// Wait targets for `queue`'s next submission: every *other* queue's
    /// last-signaled value (zero entries are skipped; nothing was submitted
    /// there yet, and counters start at zero).
    pub fn wait_targets(&self, queue: QueueType) -> impl Iterator<Item = (QueueType, u64)> + '_ {
        QueueType::ALL
            .into_iter()
            .filter(move |other| *other != queue)
            .map(|other| (other, self.signaled[other.index()]))
            .filter(|(_, value)| *value > 0)
    }
}

/// Counter value every queue must have reached before the CPU may start
/// recording frame `frame_count`, bounding outstanding GPU work to the
/// buffering depth. `None` while fewer than `buffer_count` frames exist.
///
/// With one submission per queue per frame, the counter value after
/// submitting frame `n` (zero based) is `n + 1`; recording frame
/// `frame_count` may begin once frame `frame_count - buffer_count` has
/// fully executed.
pub fn frame_pace_target(frame_count: u64, buffer_count: u64) -> Option<u64> {
    if frame_count >= buffer_count {
        Some(frame_count - buffer_count + 1)
    } else {
        None
    }
}

#[cfg(test)]
#[path = "frame_sync_tests.rs"]
mod tests;
