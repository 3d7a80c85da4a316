//! Alpha chains: per-mip-level feature extraction.
//!
//! `Alpha0` reduces one pyramid level through half- and quarter-extent
//! temporaries into a set of quarter-extent feature images. `Alpha1`
//! combines those features into one of `temporal` output vectors,
//! rotating through them by frame index so the consumers can look back
//! at previous cycles.

use ash::vk;
use framegen_common::{CommandBuffer, Image};

use super::{ceil_shift_extent, chain_image, ChainCtx};
use crate::error::Error;
use crate::managed::{ManagedShader, ManagedShaderBuilder};

pub struct Alpha0 {
    temp_images0: Vec<Image>,
    temp_images1: Vec<Image>,
    images: Vec<Image>,
    sets: Vec<ManagedShader>,
    dispatch_extent0: vk::Extent2D,
    dispatch_extent1: vk::Extent2D,
}

impl Alpha0 {
    pub fn new(ctx: &ChainCtx, source_image: &Image) -> Result<Self, Error> {
        let m = if ctx.perf { 1 } else { 2 };
        let half_extent = ceil_shift_extent(source_image.extent(), 1, 1);
        let quarter_extent = ceil_shift_extent(half_extent, 1, 1);

        let mut temp_images0 = Vec::with_capacity(m);
        let mut temp_images1 = Vec::with_capacity(m);
        for _ in 0..m {
            temp_images0.push(chain_image(ctx, half_extent, vk::Format::R8G8B8A8_UNORM)?);
            temp_images1.push(chain_image(ctx, half_extent, vk::Format::R8G8B8A8_UNORM)?);
        }

        let mut images = Vec::with_capacity(2 * m);
        for _ in 0..(2 * m) {
            images.push(chain_image(ctx, quarter_extent, vk::Format::R8G8B8A8_UNORM)?);
        }

        let shaders = ctx.shader_set();
        let sets = vec![
            ManagedShaderBuilder::new()
                .sampled(source_image)
                .storages(&temp_images0)
                .sampler(&ctx.border_black)
                .build(ctx, &shaders.alpha[0])?,
            ManagedShaderBuilder::new()
                .sampleds(&temp_images0)
                .storages(&temp_images1)
                .sampler(&ctx.border_black)
                .build(ctx, &shaders.alpha[1])?,
            ManagedShaderBuilder::new()
                .sampleds(&temp_images1)
                .storages(&images)
                .sampler(&ctx.border_black)
                .build(ctx, &shaders.alpha[2])?,
        ];

        Ok(Self {
            temp_images0,
            temp_images1,
            images,
            sets,
            dispatch_extent0: ceil_shift_extent(half_extent, 7, 3),
            dispatch_extent1: ceil_shift_extent(quarter_extent, 7, 3),
        })
    }

    pub fn prepare(&self, images: &mut Vec<vk::Image>) {
        for i in 0..self.temp_images0.len() {
            images.push(self.temp_images0[i].handle());
            images.push(self.temp_images1[i].handle());
        }
        for image in &self.images {
            images.push(image.handle());
        }
    }

    pub fn render(&self, cmd: &CommandBuffer) {
        self.sets[0].dispatch(cmd, self.dispatch_extent0);
        self.sets[1].dispatch(cmd, self.dispatch_extent0);
        self.sets[2].dispatch(cmd, self.dispatch_extent1);
    }

    /// Quarter-extent feature images.
    pub fn images(&self) -> &[Image] {
        &self.images
    }
}

pub struct Alpha1 {
    images: Vec<Vec<Image>>,
    sets: Vec<ManagedShader>,
    dispatch_extent: vk::Extent2D,
}

impl Alpha1 {
    pub fn new(
        ctx: &ChainCtx,
        temporal: usize,
        source_images: &[Image],
    ) -> Result<Self, Error> {
        let m = if ctx.perf { 1 } else { 2 };
        let quarter_extent = source_images[0].extent();

        // One output vector per temporal cycle.
        let mut images = Vec::with_capacity(temporal);
        for _ in 0..temporal {
            let mut vec = Vec::with_capacity(2 * m);
            for _ in 0..(2 * m) {
                vec.push(chain_image(ctx, quarter_extent, vk::Format::R8G8B8A8_UNORM)?);
            }
            images.push(vec);
        }

        let shaders = ctx.shader_set();
        let mut sets = Vec::with_capacity(temporal);
        for cycle in &images {
            sets.push(
                ManagedShaderBuilder::new()
                    .sampleds(source_images)
                    .storages(cycle)
                    .sampler(&ctx.border_black)
                    .build(ctx, &shaders.alpha[3])?,
            );
        }

        Ok(Self {
            images,
            sets,
            dispatch_extent: ceil_shift_extent(quarter_extent, 7, 3),
        })
    }

    pub fn prepare(&self, images: &mut Vec<vk::Image>) {
        for cycle in &self.images {
            for image in cycle {
                images.push(image.handle());
            }
        }
    }

    pub fn render(&self, cmd: &CommandBuffer, fidx: usize) {
        self.sets[fidx % self.sets.len()].dispatch(cmd, self.dispatch_extent);
    }

    /// All temporal output vectors.
    pub fn images(&self) -> &[Vec<Image>] {
        &self.images
    }
}
