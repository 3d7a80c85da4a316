//! Vulkan object layer for the framegen backend.
//!
//! This crate wraps the small set of Vulkan objects the frame-generation
//! engine needs: instance/device bring-up on a compute queue, images and
//! buffers with optionally shared (opaque FD) memory, samplers, compute
//! pipelines, descriptor pools and sets, fences, timeline semaphores and
//! command buffers. Every wrapper owns its handle and releases it in
//! `Drop` through a captured `ash::Device` clone.
//!
//! Failures are reported as `Result<T, String>`; the backend crate
//! attaches structured context on top.

pub mod commands;
pub mod context;
pub mod descriptors;
pub mod memory;
pub mod samplers;
pub mod shader;
pub mod sync;

pub use commands::CommandBuffer;
pub use context::{default_cache_path, DeviceInfo, VulkanContext};
pub use descriptors::{DescriptorPool, DescriptorSet, PoolLimits};
pub use memory::{Buffer, Image};
pub use samplers::Sampler;
pub use shader::{ComputeShader, DescriptorCounts};
pub use sync::{Fence, TimelineSemaphore};

use ash::vk;

/// Application name reported to the Vulkan instance.
pub const APP_NAME: &std::ffi::CStr = c"framegen";

/// Engine name reported to the Vulkan instance.
pub const ENGINE_NAME: &std::ffi::CStr = c"framegen-engine";

/// Instance/engine version.
pub const ENGINE_VERSION: u32 = vk::make_api_version(0, 2, 0, 0);

/// Requested Vulkan API version. 1.2 carries timeline semaphores and is
/// available on every Vulkan-capable GPU the shaders run on.
pub const REQUIRED_VK_VERSION: u32 = vk::API_VERSION_1_2;

/// Subresource range covering the single mip/layer every engine image has.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
