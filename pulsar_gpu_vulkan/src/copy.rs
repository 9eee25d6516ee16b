/// Copy/upload allocator on the dedicated transfer queue
///
/// All resource initialization and explicit updates record into pooled
/// transient command buffers paired with UPLOAD staging buffers. Submits
/// are batched: `flush` issues one queue submission per frame signaling the
/// copy timeline semaphore, then reclaims every command whose target value
/// the semaphore has passed. Other queues order against this work by
/// waiting on the returned semaphore value, never by blocking the CPU.

use std::sync::{Arc, Mutex};

use ash::vk;
use pulsar_gpu::graphics::{CopyCommand, CopyCommandPool, GpuBuffer};
use pulsar_gpu::{gpu_err, Result};

const LOG_SOURCE: &str = "pulsar::vulkan";

pub(crate) struct CopyCmdVulkan {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub staging: GpuBuffer,
}

struct CopyInner {
    pool: CopyCommandPool<CopyCmdVulkan>,
    /// Command buffers recorded since the last flush
    submit_cmds: Vec<vk::CommandBuffer>,
}

pub(crate) struct CopyAllocator {
    device: Arc<ash::Device>,
    pub queue: vk::Queue,
    pub family: u32,
    /// Timeline semaphore tracking copy completion
    pub semaphore: vk::Semaphore,
    inner: Mutex<CopyInner>,
}

impl CopyAllocator {
    pub fn new(device: Arc<ash::Device>, queue: vk::Queue, family: u32) -> Result<Self> {
        let mut timeline_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_info);

        let semaphore = unsafe {
            device
                .create_semaphore(&semaphore_info, None)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to create copy semaphore: {:?}", e))?
        };

        Ok(Self {
            device,
            queue,
            family,
            semaphore,
            inner: Mutex::new(CopyInner {
                pool: CopyCommandPool::new(),
                submit_cmds: Vec::new(),
            }),
        })
    }

    /// Take a pooled copy command whose staging buffer holds at least
    /// `staging_size` bytes, creating pool/buffer pieces as needed, and
    /// begin recording. `create_staging` builds a new UPLOAD buffer of the
    /// given capacity when no pooled one fits.
    pub fn allocate(
        &self,
        staging_size: u64,
        create_staging: impl FnOnce(u64) -> Result<GpuBuffer>,
    ) -> Result<CopyCommand<CopyCmdVulkan>> {
        let reused = self.inner.lock().unwrap().pool.acquire(staging_size);

        let mut cmd = match reused {
            Some(cmd) => cmd,
            None => {
                // Fresh command pool + primary buffer on the copy family
                let pool_info = vk::CommandPoolCreateInfo::default()
                    .queue_family_index(self.family)
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT);
                let command_pool = unsafe {
                    self.device
                        .create_command_pool(&pool_info, None)
                        .map_err(|e| {
                            gpu_err!(LOG_SOURCE, "Failed to create copy command pool: {:?}", e)
                        })?
                };

                let alloc_info = vk::CommandBufferAllocateInfo::default()
                    .command_pool(command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1);
                let command_buffer = unsafe {
                    self.device
                        .allocate_command_buffers(&alloc_info)
                        .map_err(|e| {
                            gpu_err!(LOG_SOURCE, "Failed to allocate copy command buffer: {:?}", e)
                        })?[0]
                };

                CopyCommand {
                    staging_capacity: 0,
                    target: 0,
                    payload: CopyCmdVulkan {
                        command_pool,
                        command_buffer,
                        staging: GpuBuffer::default(),
                    },
                }
            }
        };

        // Replace the staging buffer when the pooled one cannot fit the
        // request; the next power of two amortizes similar future sizes
        if cmd.staging_capacity < staging_size {
            let capacity = staging_size.next_power_of_two();
            cmd.payload.staging = create_staging(capacity)?;
            cmd.staging_capacity = capacity;
        }

        // Begin recording so the caller can issue copies immediately
        unsafe {
            self.device
                .reset_command_pool(cmd.payload.command_pool, vk::CommandPoolResetFlags::empty())
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to reset copy command pool: {:?}", e))?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(cmd.payload.command_buffer, &begin_info)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to begin copy command buffer: {:?}", e))?;
        }

        Ok(cmd)
    }

    /// End recording and queue the command for the next batched submission;
    /// never blocks the calling thread.
    pub fn submit(&self, cmd: CopyCommand<CopyCmdVulkan>) -> Result<u64> {
        unsafe {
            self.device
                .end_command_buffer(cmd.payload.command_buffer)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to end copy command buffer: {:?}", e))?;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.submit_cmds.push(cmd.payload.command_buffer);
        Ok(inner.pool.submit(cmd))
    }

    /// Issue the accumulated batch and reclaim completed commands
    ///
    /// Returns the semaphore value other queues must wait on to observe
    /// this batch's copies (0 when nothing was pending).
    pub fn flush(&self) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.submit_cmds.is_empty() {
            let signal_value = inner.pool.fence_value();
            let signal_values = [signal_value];
            let signal_semaphores = [self.semaphore];

            let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
                .signal_semaphore_values(&signal_values);
            let submit_info = vk::SubmitInfo::default()
                .command_buffers(&inner.submit_cmds)
                .signal_semaphores(&signal_semaphores)
                .push_next(&mut timeline_info);

            unsafe {
                self.device
                    .queue_submit(self.queue, &[submit_info], vk::Fence::null())
                    .map_err(|e| gpu_err!(LOG_SOURCE, "Copy queue submit failed: {:?}", e))?;
            }
            inner.submit_cmds.clear();
        }

        let completed = unsafe {
            self.device
                .get_semaphore_counter_value(self.semaphore)
                .map_err(|e| gpu_err!(LOG_SOURCE, "Failed to read copy semaphore: {:?}", e))?
        };

        Ok(inner.pool.flush(completed))
    }

    /// Tear down every pooled command (device shutdown)
    pub fn destroy(&self) {
        unsafe {
            let _ = self.device.queue_wait_idle(self.queue);
            let mut inner = self.inner.lock().unwrap();
            inner.pool.drain_all(|payload| {
                // Staging buffers drop with the payload and retire through
                // the allocation handler
                self.device.destroy_command_pool(payload.command_pool, None);
            });
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
