//! Descriptor pool and descriptor sets.
//!
//! Sets are written once at creation, following the binding convention
//! of `shader`: uniform buffers from 0, samplers from 16, sampled images
//! from 32, storage images from 48.

use ash::vk;

use super::shader::{
    BINDING_BASE_SAMPLED, BINDING_BASE_SAMPLER, BINDING_BASE_STORAGE, BINDING_BASE_UNIFORM,
};
use super::{Buffer, ComputeShader, Image, Sampler, VulkanContext};

/// Capacity of a descriptor pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolLimits {
    pub sets: u32,
    pub uniform_buffers: u32,
    pub samplers: u32,
    pub sampled_images: u32,
    pub storage_images: u32,
}

/// Descriptor pool with individually freeable sets.
pub struct DescriptorPool {
    device: ash::Device,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a pool sized to the given limits.
    pub fn new(vk: &VulkanContext, limits: PoolLimits) -> Result<Self, String> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: limits.samplers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: limits.sampled_images,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: limits.storage_images,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: limits.uniform_buffers,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(limits.sets)
            .pool_sizes(&pool_sizes);

        // SAFETY: create info is fully initialized above.
        let pool = unsafe {
            vk.device
                .create_descriptor_pool(&pool_info, None)
                .map_err(|e| format!("Failed to create descriptor pool: {:?}", e))?
        };

        Ok(Self {
            device: vk.device.clone(),
            pool,
        })
    }

    /// Raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        // SAFETY: handle was created by this struct on this device; all
        // sets allocated from it must already be gone.
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// A descriptor set bound to concrete resources at creation.
pub struct DescriptorSet {
    device: ash::Device,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
}

impl DescriptorSet {
    /// Allocate a set with the shader's layout and write every binding.
    pub fn new(
        vk: &VulkanContext,
        pool: &DescriptorPool,
        shader: &ComputeShader,
        sampled_images: &[&Image],
        storage_images: &[&Image],
        samplers: &[&Sampler],
        uniform_buffers: &[&Buffer],
    ) -> Result<Self, String> {
        let set_layouts = [shader.set_layout()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.handle())
            .set_layouts(&set_layouts);

        // SAFETY: pool and layout are valid; the set is freed in Drop.
        let set = unsafe {
            vk.device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| format!("Failed to allocate descriptor set: {:?}", e))?[0]
        };

        // Collect all infos up front so the write entries can borrow
        // stable slices.
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = uniform_buffers
            .iter()
            .map(|buf| {
                vk::DescriptorBufferInfo::default()
                    .buffer(buf.handle())
                    .range(buf.size())
            })
            .collect();

        let sampler_infos: Vec<vk::DescriptorImageInfo> = samplers
            .iter()
            .map(|samp| vk::DescriptorImageInfo::default().sampler(samp.handle()))
            .collect();

        let sampled_infos: Vec<vk::DescriptorImageInfo> = sampled_images
            .iter()
            .map(|img| {
                vk::DescriptorImageInfo::default()
                    .image_view(img.view())
                    .image_layout(vk::ImageLayout::GENERAL)
            })
            .collect();

        let storage_infos: Vec<vk::DescriptorImageInfo> = storage_images
            .iter()
            .map(|img| {
                vk::DescriptorImageInfo::default()
                    .image_view(img.view())
                    .image_layout(vk::ImageLayout::GENERAL)
            })
            .collect();

        let mut writes = Vec::with_capacity(
            buffer_infos.len() + sampler_infos.len() + sampled_infos.len() + storage_infos.len(),
        );

        for (i, info) in buffer_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(BINDING_BASE_UNIFORM + i as u32)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info)),
            );
        }
        for (i, info) in sampler_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(BINDING_BASE_SAMPLER + i as u32)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(std::slice::from_ref(info)),
            );
        }
        for (i, info) in sampled_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(BINDING_BASE_SAMPLED + i as u32)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(std::slice::from_ref(info)),
            );
        }
        for (i, info) in storage_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(BINDING_BASE_STORAGE + i as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(std::slice::from_ref(info)),
            );
        }

        // SAFETY: every write references infos that live to the end of
        // this call.
        unsafe {
            vk.device.update_descriptor_sets(&writes, &[]);
        }

        Ok(Self {
            device: vk.device.clone(),
            pool: pool.handle(),
            set,
        })
    }

    /// Raw descriptor set handle.
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        // SAFETY: the pool was created with FREE_DESCRIPTOR_SET and must
        // outlive its sets.
        unsafe {
            let _ = self.device.free_descriptor_sets(self.pool, &[self.set]);
        }
    }
}
