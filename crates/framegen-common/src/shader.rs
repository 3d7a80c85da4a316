//! Compute shader: SPIR-V module, descriptor layout and pipeline.
//!
//! The proprietary shaders follow one descriptor-set convention: uniform
//! buffers start at binding 0, samplers at 16, sampled images at 32 and
//! storage images at 48. A shader is therefore fully described by four
//! counts.

use ash::vk;

use super::VulkanContext;

/// Binding bases of the shared descriptor-set convention.
pub const BINDING_BASE_UNIFORM: u32 = 0;
pub const BINDING_BASE_SAMPLER: u32 = 16;
pub const BINDING_BASE_SAMPLED: u32 = 32;
pub const BINDING_BASE_STORAGE: u32 = 48;

/// Descriptor arity of one shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorCounts {
    pub sampled_images: u32,
    pub storage_images: u32,
    pub uniform_buffers: u32,
    pub samplers: u32,
}

/// A compiled compute pipeline with its descriptor layout.
pub struct ComputeShader {
    device: ash::Device,
    module: vk::ShaderModule,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    counts: DescriptorCounts,
}

impl ComputeShader {
    /// Build a compute pipeline from SPIR-V words against the shared
    /// pipeline cache.
    pub fn new(
        vk: &VulkanContext,
        code: &[u32],
        counts: DescriptorCounts,
    ) -> Result<Self, String> {
        let module_info = vk::ShaderModuleCreateInfo::default().code(code);

        // SAFETY: create infos reference locals alive until each call
        // returns; partial objects are destroyed on failure paths.
        unsafe {
            let module = vk
                .device
                .create_shader_module(&module_info, None)
                .map_err(|e| format!("Failed to create shader module: {:?}", e))?;

            let bindings = layout_bindings(counts);
            let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            let set_layout = match vk.device.create_descriptor_set_layout(&layout_info, None) {
                Ok(layout) => layout,
                Err(e) => {
                    vk.device.destroy_shader_module(module, None);
                    return Err(format!("Failed to create descriptor set layout: {:?}", e));
                }
            };

            let set_layouts = [set_layout];
            let pipeline_layout_info =
                vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
            let pipeline_layout =
                match vk.device.create_pipeline_layout(&pipeline_layout_info, None) {
                    Ok(layout) => layout,
                    Err(e) => {
                        vk.device.destroy_descriptor_set_layout(set_layout, None);
                        vk.device.destroy_shader_module(module, None);
                        return Err(format!("Failed to create pipeline layout: {:?}", e));
                    }
                };

            let stage_info = vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::COMPUTE)
                .module(module)
                .name(c"main");
            let pipeline_info = vk::ComputePipelineCreateInfo::default()
                .stage(stage_info)
                .layout(pipeline_layout);
            let pipeline = match vk.device.create_compute_pipelines(
                vk.pipeline_cache,
                &[pipeline_info],
                None,
            ) {
                Ok(pipelines) => pipelines[0],
                Err((_, e)) => {
                    vk.device.destroy_pipeline_layout(pipeline_layout, None);
                    vk.device.destroy_descriptor_set_layout(set_layout, None);
                    vk.device.destroy_shader_module(module, None);
                    return Err(format!("Failed to create compute pipeline: {:?}", e));
                }
            };

            Ok(Self {
                device: vk.device.clone(),
                module,
                set_layout,
                pipeline_layout,
                pipeline,
                counts,
            })
        }
    }

    /// Compute pipeline handle.
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Pipeline layout handle.
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Descriptor set layout handle.
    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    /// Descriptor arity the shader was declared with.
    pub fn counts(&self) -> DescriptorCounts {
        self.counts
    }
}

impl Drop for ComputeShader {
    fn drop(&mut self) {
        // SAFETY: handles were created by this struct on this device.
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_descriptor_set_layout(self.set_layout, None);
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Expand the four counts into explicit layout bindings.
fn layout_bindings(counts: DescriptorCounts) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    let mut bindings = Vec::with_capacity(
        (counts.uniform_buffers + counts.samplers + counts.sampled_images + counts.storage_images)
            as usize,
    );

    let groups = [
        (
            BINDING_BASE_UNIFORM,
            counts.uniform_buffers,
            vk::DescriptorType::UNIFORM_BUFFER,
        ),
        (
            BINDING_BASE_SAMPLER,
            counts.samplers,
            vk::DescriptorType::SAMPLER,
        ),
        (
            BINDING_BASE_SAMPLED,
            counts.sampled_images,
            vk::DescriptorType::SAMPLED_IMAGE,
        ),
        (
            BINDING_BASE_STORAGE,
            counts.storage_images,
            vk::DescriptorType::STORAGE_IMAGE,
        ),
    ];

    for (base, count, ty) in groups {
        for i in 0..count {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(base + i)
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE),
            );
        }
    }

    bindings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_bindings_bases() {
        let bindings = layout_bindings(DescriptorCounts {
            sampled_images: 2,
            storage_images: 3,
            uniform_buffers: 1,
            samplers: 2,
        });

        assert_eq!(bindings.len(), 8);
        // Declaration order: uniforms, samplers, sampled, storage.
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].binding, 16);
        assert_eq!(bindings[2].binding, 17);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::SAMPLER);
        assert_eq!(bindings[3].binding, 32);
        assert_eq!(bindings[4].binding, 33);
        assert_eq!(bindings[3].descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(bindings[5].binding, 48);
        assert_eq!(bindings[7].binding, 50);
        assert_eq!(bindings[5].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
    }

    #[test]
    fn test_layout_bindings_empty_groups_are_skipped() {
        let bindings = layout_bindings(DescriptorCounts {
            sampled_images: 1,
            storage_images: 7,
            uniform_buffers: 1,
            samplers: 1,
        });

        // Mipmaps shape: 1 uniform, 1 sampler, 1 sampled, 7 storage.
        assert_eq!(bindings.len(), 10);
        assert!(bindings.iter().all(|b| b.descriptor_count == 1));
        assert!(bindings
            .iter()
            .all(|b| b.stage_flags == vk::ShaderStageFlags::COMPUTE));
    }
}
