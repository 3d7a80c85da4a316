//! Gamma chains: coarse-to-fine motion refinement.
//!
//! One `(Gamma0, Gamma1)` pair runs per pyramid level and per generated
//! frame. `Gamma0` correlates neighboring temporal cycles of the level's
//! alpha features with the previous level's estimate; `Gamma1` runs a
//! four-stage refinement over the correlation and produces the level's
//! motion field.

use ash::vk;
use framegen_common::{CommandBuffer, Image};

use super::{ceil_shift_extent, chain_image, ChainCtx};
use crate::error::Error;
use crate::managed::{ManagedShader, ManagedShaderBuilder};

pub struct Gamma0 {
    images: Vec<Image>,
    sets: Vec<ManagedShader>,
    dispatch_extent: vk::Extent2D,
}

impl Gamma0 {
    pub fn new(
        ctx: &ChainCtx,
        idx: usize,
        source_images: &[Vec<Image>],
        additional_input: &Image,
    ) -> Result<Self, Error> {
        let extent = source_images[0][0].extent();
        let n = source_images.len();

        let mut images = Vec::with_capacity(3);
        for _ in 0..3 {
            images.push(chain_image(ctx, extent, vk::Format::R8G8B8A8_UNORM)?);
        }

        // Set i pairs cycle i with its predecessor.
        let shader = &ctx.shader_set().gamma[0];
        let mut sets = Vec::with_capacity(n);
        for i in 0..n {
            sets.push(
                ManagedShaderBuilder::new()
                    .sampleds(&source_images[(i + n - 1) % n])
                    .sampleds(&source_images[i % n])
                    .sampled(additional_input)
                    .storages(&images)
                    .sampler(&ctx.border_white)
                    .sampler(&ctx.edge_compare)
                    .buffer(&ctx.frame_constants[idx])
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

pub struct Gamma1 {
    temp_images0: Vec<Image>,
    temp_images1: Vec<Image>,
    image: Image,
    sets: Vec<ManagedShader>,
    dispatch_extent: vk::Extent2D,
}

impl Gamma1 {
    pub fn new(
        ctx: &ChainCtx,
        idx: usize,
        source_images: &[Image],
        additional_input0: &Image,
        additional_input1: &Image,
    ) -> Result<Self, Error> {
        let m = if ctx.perf { 1 } else { 2 };
        let extent = source_images[0].extent();

        let mut temp_images0 = Vec::with_capacity(2 * m);
        let mut temp_images1 = Vec::with_capacity(2 * m);
        for _ in 0..(2 * m) {
            temp_images0.push(chain_image(ctx, extent, vk::Format::R8G8B8A8_UNORM)?);
            temp_images1.push(chain_image(ctx, extent, vk::Format::R8G8B8A8_UNORM)?);
        }
        let image = chain_image(ctx, extent, vk::Format::R16G16B16A16_SFLOAT)?;

        let shaders = &ctx.shader_set().gamma;
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
                .sampled(additional_input0)
                .sampled(additional_input1)
                .storage(&image)
                .sampler(&ctx.border_black)
                .sampler(&ctx.edge_compare)
                .buffer(&ctx.frame_constants[idx])
                .build(ctx, &shaders[4])?,
        ];

        Ok(Self {
            temp_images0,
            temp_images1,
            image,
            sets,
            dispatch_extent: ceil_shift_extent(extent, 7, 3),
        })
    }

    pub fn prepare(&self, images: &mut Vec<vk::Image>) {
        for i in 0..self.temp_images0.len() {
            images.push(self.temp_images0[i].handle());
            images.push(self.temp_images1[i].handle());
        }
        images.push(self.image.handle());
    }

    pub fn render(&self, cmd: &CommandBuffer) {
        for set in &self.sets {
            set.dispatch(cmd, self.dispatch_extent);
        }
    }

    /// The level's refined motion field.
    pub fn image(&self) -> &Image {
        &self.image
    }
}
