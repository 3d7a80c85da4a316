//! Command buffer recording and submission.
//!
//! The engine records one-time-submit command buffers only. Submission
//! comes in two flavors: a timeline submit that waits on one semaphore
//! value and signals another, and a blocking submit used once at context
//! setup for the initial layout transitions.

use ash::vk;

use super::{DescriptorSet, Fence, VulkanContext};

/// Primary command buffer allocated from the shared pool.
pub struct CommandBuffer {
    device: ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocate a primary command buffer.
    pub fn new(vk: &VulkanContext) -> Result<Self, String> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(vk.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        // SAFETY: pool is valid; the buffer is freed in Drop.
        let buffer = unsafe {
            vk.device
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| format!("Failed to allocate command buffer: {:?}", e))?[0]
        };

        Ok(Self {
            device: vk.device.clone(),
            pool: vk.command_pool,
            queue: vk.queue,
            buffer,
        })
    }

    /// Begin one-time-submit recording.
    pub fn begin(&self) -> Result<(), String> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        // SAFETY: valid command buffer in the initial state.
        unsafe {
            self.device
                .begin_command_buffer(self.buffer, &begin_info)
                .map_err(|e| format!("Failed to begin command buffer: {:?}", e))
        }
    }

    /// End recording.
    pub fn end(&self) -> Result<(), String> {
        // SAFETY: valid command buffer in the recording state.
        unsafe {
            self.device
                .end_command_buffer(self.buffer)
                .map_err(|e| format!("Failed to end command buffer: {:?}", e))
        }
    }

    /// Record a standalone barrier batch covering the whole pipeline.
    pub fn pipeline_barriers(&self, barriers: &[vk::ImageMemoryBarrier]) {
        // SAFETY: recording state; barriers reference live image handles.
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                barriers,
            );
        }
    }

    /// Record one compute dispatch: compute-to-compute barriers, then
    /// bind pipeline and set, then dispatch `x`×`y`×1 workgroups.
    pub fn dispatch_compute(
        &self,
        shader_pipeline: vk::Pipeline,
        shader_layout: vk::PipelineLayout,
        set: &DescriptorSet,
        barriers: &[vk::ImageMemoryBarrier],
        x: u32,
        y: u32,
    ) {
        // SAFETY: recording state; all handles outlive the submission.
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                barriers,
            );
            self.device.cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::COMPUTE,
                shader_pipeline,
            );
            self.device.cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::COMPUTE,
                shader_layout,
                0,
                &[set.handle()],
                &[],
            );
            self.device.cmd_dispatch(self.buffer, x, y, 1);
        }
    }

    /// Submit, waiting for `wait.0 == wait.1` and signalling
    /// `signal.0 := signal.1` on the timeline. The fence, when given, is
    /// signalled on completion.
    pub fn submit_timeline(
        &self,
        wait: (vk::Semaphore, u64),
        signal: (vk::Semaphore, u64),
        fence: Option<&Fence>,
    ) -> Result<(), String> {
        let wait_semaphores = [wait.0];
        let wait_values = [wait.1];
        let wait_stages = [vk::PipelineStageFlags::TOP_OF_PIPE];
        let signal_semaphores = [signal.0];
        let signal_values = [signal.1];
        let buffers = [self.buffer];

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        // SAFETY: every referenced array lives until the call returns;
        // the driver copies the submission.
        unsafe {
            self.device
                .queue_submit(
                    self.queue,
                    &[submit_info],
                    fence.map_or(vk::Fence::null(), |f| f.handle()),
                )
                .map_err(|e| format!("Failed to submit command buffer: {:?}", e))
        }
    }

    /// Submit without synchronization and block until the work finished.
    pub fn submit_blocking(&self, vk: &VulkanContext) -> Result<(), String> {
        let buffers = [self.buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);

        let fence = Fence::new(vk)?;

        // SAFETY: submission arrays live until the call returns.
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], fence.handle())
                .map_err(|e| format!("Failed to submit command buffer: {:?}", e))?;
        }

        if !fence.wait(u64::MAX)? {
            return Err("Timed out waiting for blocking submission".to_string());
        }
        Ok(())
    }

    /// Raw command buffer handle.
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        // SAFETY: the buffer was allocated from this pool on this device.
        unsafe {
            self.device.free_command_buffers(self.pool, &[self.buffer]);
        }
    }
}
