//! Managed shader: a compute pipeline bundled with its resources.
//!
//! A `ManagedShader` holds everything one dispatch needs: the pipeline,
//! a descriptor set bound to concrete images/samplers/buffers, and the
//! image barriers that must precede the dispatch. The barriers are
//! precomputed at build time so that recording a frame allocates
//! nothing.

use ash::vk;
use framegen_common::{
    color_subresource_range, Buffer, CommandBuffer, ComputeShader, DescriptorSet, Image, Sampler,
};

use crate::chains::ChainCtx;
use crate::error::Error;

/// A compute pipeline with bound resources and pre-dispatch barriers.
pub struct ManagedShader {
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    barriers: Vec<vk::ImageMemoryBarrier<'static>>,
    set: DescriptorSet,
}

impl ManagedShader {
    /// Record the barriers and the dispatch of `extent.width` ×
    /// `extent.height` workgroups.
    pub fn dispatch(&self, cmd: &CommandBuffer, extent: vk::Extent2D) {
        cmd.dispatch_compute(
            self.pipeline,
            self.pipeline_layout,
            &self.set,
            &self.barriers,
            extent.width,
            extent.height,
        );
    }
}

/// Accumulates bindings in declaration order, then builds the set and
/// barrier list.
#[derive(Default)]
pub struct ManagedShaderBuilder<'a> {
    sampled_images: Vec<&'a Image>,
    storage_images: Vec<&'a Image>,
    samplers: Vec<&'a Sampler>,
    uniform_buffers: Vec<&'a Buffer>,
}

impl<'a> ManagedShaderBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind one sampled image.
    pub fn sampled(mut self, image: &'a Image) -> Self {
        self.sampled_images.push(image);
        self
    }

    /// Bind a run of sampled images.
    pub fn sampleds(mut self, images: &'a [Image]) -> Self {
        self.sampled_images.extend(images.iter());
        self
    }

    /// Bind the first `count` of a slice as sampled images.
    pub fn sampleds_front(mut self, images: &'a [Image], count: usize) -> Self {
        self.sampled_images.extend(images[..count].iter());
        self
    }

    /// Bind one storage image.
    pub fn storage(mut self, image: &'a Image) -> Self {
        self.storage_images.push(image);
        self
    }

    /// Bind a run of storage images.
    pub fn storages(mut self, images: &'a [Image]) -> Self {
        self.storage_images.extend(images.iter());
        self
    }

    /// Bind the first `count` of a slice as storage images.
    pub fn storages_front(mut self, images: &'a [Image], count: usize) -> Self {
        self.storage_images.extend(images[..count].iter());
        self
    }

    /// Bind one sampler.
    pub fn sampler(mut self, sampler: &'a Sampler) -> Self {
        self.samplers.push(sampler);
        self
    }

    /// Bind one uniform buffer.
    pub fn buffer(mut self, buffer: &'a Buffer) -> Self {
        self.uniform_buffers.push(buffer);
        self
    }

    /// Allocate the descriptor set and compute the barrier list: inputs
    /// wait for the write that produced them, outputs wait for the
    /// reads of the previous cycle. All images stay in GENERAL.
    pub fn build(self, ctx: &ChainCtx, shader: &ComputeShader) -> Result<ManagedShader, Error> {
        let mut barriers =
            Vec::with_capacity(self.sampled_images.len() + self.storage_images.len());

        for image in &self.sampled_images {
            barriers.push(image_barrier(
                image.handle(),
                vk::AccessFlags::SHADER_WRITE,
                vk::AccessFlags::SHADER_READ,
            ));
        }
        for image in &self.storage_images {
            barriers.push(image_barrier(
                image.handle(),
                vk::AccessFlags::SHADER_READ,
                vk::AccessFlags::SHADER_WRITE,
            ));
        }

        let set = DescriptorSet::new(
            ctx.vk,
            &ctx.pool,
            shader,
            &self.sampled_images,
            &self.storage_images,
            &self.samplers,
            &self.uniform_buffers,
        )
        .map_err(|e| Error::device("unable to bind shader resources").because(e))?;

        Ok(ManagedShader {
            pipeline: shader.pipeline(),
            pipeline_layout: shader.pipeline_layout(),
            barriers,
            set,
        })
    }
}

fn image_barrier(
    image: vk::Image,
    src: vk::AccessFlags,
    dst: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(src)
        .dst_access_mask(dst)
        .old_layout(vk::ImageLayout::GENERAL)
        .new_layout(vk::ImageLayout::GENERAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range())
}
