//! Delta chains: occlusion-aware refinement on the finest levels.
//!
//! From pyramid level 4 down, a `(Delta0, Delta1)` pair runs next to the
//! gamma pair. `Delta0` produces two image groups from the level's
//! features, the previous delta estimate and the current gamma estimate.
//! `Delta1` interleaves two four-stage chains — the second working on
//! the narrower group — and emits two float motion/occlusion fields that
//! feed the next level and, at the end, the generate pass.

use ash::vk;
use framegen_common::{CommandBuffer, Image};

use super::{ceil_shift_extent, chain_image, ChainCtx};
use crate::error::Error;
use crate::managed::{ManagedShader, ManagedShaderBuilder};

pub struct Delta0 {
    images0: Vec<Image>,
    images1: Vec<Image>,
    sets0: Vec<ManagedShader>,
    sets1: Vec<ManagedShader>,
    dispatch_extent: vk::Extent2D,
}

impl Delta0 {
    pub fn new(
        ctx: &ChainCtx,
        idx: usize,
        source_images: &[Vec<Image>],
        additional_input0: &Image,
        additional_input1: &Image,
    ) -> Result<Self, Error> {
        let m = if ctx.perf { 1 } else { 2 };
        let extent = source_images[0][0].extent();
        let n = source_images.len();

        let mut images0 = Vec::with_capacity(3);
        for _ in 0..3 {
            images0.push(chain_image(ctx, extent, vk::Format::R8G8B8A8_UNORM)?);
        }
        let mut images1 = Vec::with_capacity(m);
        for _ in 0..m {
            images1.push(chain_image(ctx, extent, vk::Format::R8G8B8A8_UNORM)?);
        }

        let shaders = &ctx.shader_set().delta;

        let mut sets0 = Vec::with_capacity(n);
        for i in 0..n {
            sets0.push(
                ManagedShaderBuilder::new()
                    .sampleds(&source_images[(i + n - 1) % n])
                    .sampleds(&source_images[i % n])
                    .sampled(additional_input0)
                    .storages(&images0)
                    .sampler(&ctx.border_white)
                    .sampler(&ctx.edge_compare)
                    .buffer(&ctx.frame_constants[idx])
                    .build(ctx, &shaders[0])?,
            );
        }

        let mut sets1 = Vec::with_capacity(n);
        for i in 0..n {
            sets1.push(
                ManagedShaderBuilder::new()
                    .sampleds(&source_images[(i + n - 1) % n])
                    .sampleds(&source_images[i % n])
                    .sampled(additional_input1)
                    .sampled(additional_input0)
                    .storages(&images1)
                    .sampler(&ctx.border_white)
                    .sampler(&ctx.edge_compare)
                    .buffer(&ctx.frame_constants[idx])
                    .build(ctx, &shaders[5])?,
            );
        }

        Ok(Self {
            images0,
            images1,
            sets0,
            sets1,
            dispatch_extent: ceil_shift_extent(extent, 7, 3),
        })
    }

    pub fn prepare(&self, images: &mut Vec<vk::Image>) {
        for image in &self.images0 {
            images.push(image.handle());
        }
        for image in &self.images1 {
            images.push(image.handle());
        }
    }

    pub fn render(&self, cmd: &CommandBuffer, fidx: usize) {
        self.sets0[fidx % self.sets0.len()].dispatch(cmd, self.dispatch_extent);
        self.sets1[fidx % self.sets1.len()].dispatch(cmd, self.dispatch_extent);
    }

    pub fn images0(&self) -> &[Image] {
        &self.images0
    }

    pub fn images1(&self) -> &[Image] {
        &self.images1
    }
}

pub struct Delta1 {
    temp_images0: Vec<Image>,
    temp_images1: Vec<Image>,
    image0: Image,
    image1: Image,
    sets: Vec<ManagedShader>,
    dispatch_extent: vk::Extent2D,
}

impl Delta1 {
    pub fn new(
        ctx: &ChainCtx,
        idx: usize,
        source_images0: &[Image],
        source_images1: &[Image],
        additional_input0: &Image,
        additional_input1: &Image,
        additional_input2: &Image,
    ) -> Result<Self, Error> {
        let m = if ctx.perf { 1 } else { 2 };
        let extent = source_images0[0].extent();

        let mut temp_images0 = Vec::with_capacity(2 * m);
        let mut temp_images1 = Vec::with_capacity(2 * m);
        for _ in 0..(2 * m) {
            temp_images0.push(chain_image(ctx, extent, vk::Format::R8G8B8A8_UNORM)?);
            temp_images1.push(chain_image(ctx, extent, vk::Format::R8G8B8A8_UNORM)?);
        }
        let image0 = chain_image(ctx, extent, vk::Format::R16G16B16A16_SFLOAT)?;
        let image1 = chain_image(ctx, extent, vk::Format::R16G16B16A16_SFLOAT)?;

        let shaders = &ctx.shader_set().delta;
        let sets = vec![
            // Primary chain over the full ping-pong width.
            ManagedShaderBuilder::new()
                .sampleds(source_images0)
                .storages(&temp_images0)
                .sampler(&ctx.border_black)
                .build(ctx, &shaders[1])?,
            ManagedShaderBuilder::new()
                .sampleds(&temp_images0)
                .storages(&temp_images1)
                .sampler(&ctx.border_black)
                .build(ctx, &shaders[2])?,
            ManagedShaderBuilder::new()
                .sampleds(&temp_images1)
                .storages(&temp_images0)
                .sampler(&ctx.border_black)
                .build(ctx, &shaders[3])?,
            ManagedShaderBuilder::new()
                .sampleds(&temp_images0)
                .sampled(additional_input0)
                .sampled(additional_input1)
                .storage(&image0)
                .sampler(&ctx.border_black)
                .sampler(&ctx.edge_compare)
                .buffer(&ctx.frame_constants[idx])
                .build(ctx, &shaders[4])?,
            // Secondary chain over the front half of the same images.
            ManagedShaderBuilder::new()
                .sampleds(source_images1)
                .storages_front(&temp_images0, m)
                .sampler(&ctx.border_black)
                .build(ctx, &shaders[6])?,
            ManagedShaderBuilder::new()
                .sampleds_front(&temp_images0, m)
                .storages_front(&temp_images1, m)
                .sampler(&ctx.border_black)
                .build(ctx, &shaders[7])?,
            ManagedShaderBuilder::new()
                .sampleds_front(&temp_images1, m)
                .storages_front(&temp_images0, m)
                .sampler(&ctx.border_black)
                .build(ctx, &shaders[8])?,
            ManagedShaderBuilder::new()
                .sampleds_front(&temp_images0, m)
                .sampled(additional_input2)
                .storage(&image1)
                .sampler(&ctx.border_black)
                .sampler(&ctx.edge_compare)
                .buffer(&ctx.frame_constants[idx])
                .build(ctx, &shaders[9])?,
        ];

        Ok(Self {
            temp_images0,
            temp_images1,
            image0,
            image1,
            sets,
            dispatch_extent: ceil_shift_extent(extent, 7, 3),
        })
    }

    pub fn prepare(&self, images: &mut Vec<vk::Image>) {
        for i in 0..self.temp_images0.len() {
            images.push(self.temp_images0[i].handle());
            images.push(self.temp_images1[i].handle());
        }
        images.push(self.image0.handle());
        images.push(self.image1.handle());
    }

    pub fn render(&self, cmd: &CommandBuffer) {
        for set in &self.sets {
            set.dispatch(cmd, self.dispatch_extent);
        }
    }

    pub fn image0(&self) -> &Image {
        &self.image0
    }

    pub fn image1(&self) -> &Image {
        &self.image1
    }
}
