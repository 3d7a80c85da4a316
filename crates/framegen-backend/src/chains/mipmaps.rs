//! Mipmap pyramid over the two source frames.
//!
//! One dispatch writes a seven-level R8 luminance pyramid at the flow
//! resolution. Two descriptor sets exist, one per source image; the
//! frame index picks which source is "current".

use ash::vk;
use framegen_common::{CommandBuffer, Image};

use super::{ceil_shift_extent, chain_image, shift_extent, ChainCtx};
use crate::error::Error;
use crate::managed::{ManagedShader, ManagedShaderBuilder};

pub struct Mipmaps {
    images: Vec<Image>,
    sets: Vec<ManagedShader>,
    dispatch_extent: vk::Extent2D,
}

impl Mipmaps {
    pub fn new(ctx: &ChainCtx, source_images: &(Image, Image)) -> Result<Self, Error> {
        // Base level plus six mips.
        let mut images = Vec::with_capacity(7);
        for i in 0..7 {
            images.push(chain_image(
                ctx,
                shift_extent(ctx.flow_extent, i),
                vk::Format::R8_UNORM,
            )?);
        }

        let mut sets = Vec::with_capacity(2);
        for source in [&source_images.0, &source_images.1] {
            sets.push(
                ManagedShaderBuilder::new()
                    .sampled(source)
                    .storages(&images)
                    .sampler(&ctx.border_black)
                    .buffer(&ctx.shared_constants)
                    .build(ctx, &ctx.shaders.mipmaps)?,
            );
        }

        Ok(Self {
            images,
            sets,
            dispatch_extent: ceil_shift_extent(ctx.flow_extent, 63, 6),
        })
    }

    /// Collect image handles for the initial layout transition.
    pub fn prepare(&self, images: &mut Vec<vk::Image>) {
        for image in &self.images {
            images.push(image.handle());
        }
    }

    pub fn render(&self, cmd: &CommandBuffer, fidx: usize) {
        self.sets[fidx % 2].dispatch(cmd, self.dispatch_extent);
    }

    /// The seven pyramid levels, coarsest last.
    pub fn images(&self) -> &[Image] {
        &self.images
    }
}
