//! Fences and timeline semaphores.
//!
//! Timeline semaphores carry the whole cross-submission ordering of the
//! engine; the one the host shares arrives as an opaque FD.

use ash::vk;
use std::os::fd::RawFd;

use super::VulkanContext;

/// Unsignaled fence.
pub struct Fence {
    device: ash::Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create an unsignaled fence.
    pub fn new(vk: &VulkanContext) -> Result<Self, String> {
        let fence_info = vk::FenceCreateInfo::default();

        // SAFETY: create info is fully initialized above.
        let fence = unsafe {
            vk.device
                .create_fence(&fence_info, None)
                .map_err(|e| format!("Failed to create fence: {:?}", e))?
        };

        Ok(Self {
            device: vk.device.clone(),
            fence,
        })
    }

    /// Wait for the fence. Returns `false` on timeout.
    pub fn wait(&self, timeout_ns: u64) -> Result<bool, String> {
        // SAFETY: valid fence handle.
        let result = unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout_ns)
        };

        match result {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(format!("Failed to wait for fence: {:?}", e)),
        }
    }

    /// Reset the fence to unsignaled.
    pub fn reset(&self) -> Result<(), String> {
        // SAFETY: valid fence handle.
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(|e| format!("Failed to reset fence: {:?}", e))
        }
    }

    /// Raw fence handle.
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        // SAFETY: handle was created by this struct on this device.
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Timeline semaphore, optionally shared through an opaque FD.
pub struct TimelineSemaphore {
    device: ash::Device,
    semaphore: vk::Semaphore,
}

impl TimelineSemaphore {
    /// Create a process-local timeline semaphore.
    pub fn new(vk: &VulkanContext, initial_value: u64) -> Result<Self, String> {
        Self::create(vk, initial_value, false)
    }

    /// Create a timeline semaphore and adopt the payload exported by
    /// another process. The descriptor is consumed on success.
    pub fn import(vk: &VulkanContext, initial_value: u64, fd: RawFd) -> Result<Self, String> {
        let sem = Self::create(vk, initial_value, true)?;

        let import_info = vk::ImportSemaphoreFdInfoKHR::default()
            .semaphore(sem.semaphore)
            .handle_type(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD)
            .fd(fd);

        // SAFETY: the semaphore was created exportable above; Vulkan
        // takes ownership of the descriptor.
        unsafe {
            vk.external_semaphore_fd
                .import_semaphore_fd(&import_info)
                .map_err(|e| format!("Failed to import timeline semaphore: {:?}", e))?;
        }

        Ok(sem)
    }

    /// Create an exportable timeline semaphore, returning the opaque FD
    /// referencing it.
    pub fn exported(vk: &VulkanContext, initial_value: u64) -> Result<(Self, RawFd), String> {
        let sem = Self::create(vk, initial_value, true)?;

        let fd_info = vk::SemaphoreGetFdInfoKHR::default()
            .semaphore(sem.semaphore)
            .handle_type(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD);

        // SAFETY: the semaphore was created exportable above.
        let fd = unsafe {
            vk.external_semaphore_fd
                .get_semaphore_fd(&fd_info)
                .map_err(|e| format!("Failed to export timeline semaphore: {:?}", e))?
        };

        Ok((sem, fd))
    }

    fn create(vk: &VulkanContext, initial_value: u64, external: bool) -> Result<Self, String> {
        let mut export_info = vk::ExportSemaphoreCreateInfo::default()
            .handle_types(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD);
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);

        let mut create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        if external {
            create_info = create_info.push_next(&mut export_info);
        }

        // SAFETY: the chained structs stay alive until the call returns.
        let semaphore = unsafe {
            vk.device
                .create_semaphore(&create_info, None)
                .map_err(|e| format!("Failed to create timeline semaphore: {:?}", e))?
        };

        Ok(Self {
            device: vk.device.clone(),
            semaphore,
        })
    }

    /// Signal a value from the CPU.
    pub fn signal(&self, value: u64) -> Result<(), String> {
        let signal_info = vk::SemaphoreSignalInfo::default()
            .semaphore(self.semaphore)
            .value(value);

        // SAFETY: valid semaphore handle.
        unsafe {
            self.device
                .signal_semaphore(&signal_info)
                .map_err(|e| format!("Failed to signal timeline semaphore: {:?}", e))
        }
    }

    /// Wait on the CPU until the semaphore reaches `value`. Returns
    /// `false` on timeout.
    pub fn wait(&self, value: u64, timeout_ns: u64) -> Result<bool, String> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        // SAFETY: valid semaphore handle.
        let result = unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) };

        match result {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(format!("Failed to wait on timeline semaphore: {:?}", e)),
        }
    }

    /// Query the current counter value.
    pub fn value(&self) -> Result<u64, String> {
        // SAFETY: valid semaphore handle.
        unsafe {
            self.device
                .get_semaphore_counter_value(self.semaphore)
                .map_err(|e| format!("Failed to query timeline semaphore: {:?}", e))
        }
    }

    /// Raw semaphore handle.
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        // SAFETY: handle was created by this struct on this device.
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
