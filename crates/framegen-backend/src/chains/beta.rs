//! Beta chains: temporal aggregation of the finest alpha features.
//!
//! `Beta0` folds three temporal cycles of alpha output into two working
//! images, one descriptor set per cyclic rotation of the inputs.
//! `Beta1` ping-pongs those through four refinement dispatches into a
//! six-level R8 pyramid consumed by every gamma/delta stage.

use ash::vk;
use framegen_common::{CommandBuffer, Image};

use super::{ceil_shift_extent, chain_image, shift_extent, ChainCtx};
use crate::error::Error;
use crate::managed::{ManagedShader, ManagedShaderBuilder};

pub struct Beta0 {
    images: Vec<Image>,
    sets: Vec<ManagedShader>,
    dispatch_extent: vk::Extent2D,
}

impl Beta0 {
    pub fn new(ctx: &ChainCtx, source_images: &[Vec<Image>]) -> Result<Self, Error> {
        let extent = source_images[0][0].extent();
        let n = source_images.len();

        let mut images = Vec::with_capacity(2);
        for _ in 0..2 {
            images.push(chain_image(ctx, extent, vk::Format::R8G8B8A8_UNORM)?);
        }

        // Set i sees the cycles at offsets i-2, i-1, i.
        let shader = &ctx.shader_set().beta[0];
        let mut sets = Vec::with_capacity(n);
        for i in 0..n {
            sets.push(
                ManagedShaderBuilder::new()
                    .sampleds(&source_images[(i + n - 2) % n])
                    .sampleds(&source_images[(i + n - 1) % n])
                    .sampleds(&source_images[i % n])
                    .storages(&images)
                    .sampler(&ctx.border_white)
                    .build(ctx, shader)?,
            );
        }

        Ok(Self {
            images,
            sets,
            dispatch_extent: ceil_shift_extent(extent, 7, 3),
        })
    }

    pub fn prepare(&self, images: &mut Vec<vk::Image>) {
        for image in &self.images {
            images.push(image.handle());
        }
    }

    pub fn render(&self, cmd: &CommandBuffer, fidx: usize) {
        self.sets[fidx % self.sets.len()].dispatch(cmd, self.dispatch_extent);
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }
}

pub struct Beta1 {
    temp_images0: Vec<Image>,
    temp_images1: Vec<Image>,
    images: Vec<Image>,
    sets: Vec<ManagedShader>,
    dispatch_extent0: vk::Extent2D,
    dispatch_extent1: vk::Extent2D,
}

impl Beta1 {
    pub fn new(ctx: &ChainCtx, source_images: &[Image]) -> Result<Self, Error> {
        let extent = source_images[0].extent();

        let mut temp_images0 = Vec::with_capacity(2);
        let mut temp_images1 = Vec::with_capacity(2);
        for _ in 0..2 {
            temp_images0.push(chain_image(ctx, extent, vk::Format::R8G8B8A8_UNORM)?);
            temp_images1.push(chain_image(ctx, extent, vk::Format::R8G8B8A8_UNORM)?);
        }

        let mut images = Vec::with_capacity(6);
        for i in 0..6 {
            images.push(chain_image(
                ctx,
                shift_extent(extent, i),
                vk::Format::R8_UNORM,
            )?);
        }

        let shaders = &ctx.shader_set().beta;
        let sets = vec![
            ManagedShaderBuilder::new()
                .sampleds(source_images)
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
                .storages(&images)
                .sampler(&ctx.border_black)
                .buffer(&ctx.shared_constants)
                .build(ctx, &shaders[4])?,
        ];

        Ok(Self {
            temp_images0,
            temp_images1,
            images,
            sets,
            dispatch_extent0: ceil_shift_extent(extent, 7, 3),
            dispatch_extent1: ceil_shift_extent(extent, 31, 5),
        })
    }

    pub fn prepare(&self, images: &mut Vec<vk::Image>) {
        for i in 0..2 {
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
        self.sets[2].dispatch(cmd, self.dispatch_extent0);
        self.sets[3].dispatch(cmd, self.dispatch_extent1);
    }

    /// The six-level pyramid, finest first.
    pub fn images(&self) -> &[Image] {
        &self.images
    }
}
