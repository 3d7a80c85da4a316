//! Generate pass: composite one interpolated frame.
//!
//! Samples both source frames, the finest gamma motion field and the
//! two delta fields, and writes the destination image. Two descriptor
//! sets exist for the two orientations of the source pair; even frame
//! indices run with the pair swapped.

use ash::vk;
use framegen_common::{CommandBuffer, Image};

use super::{ceil_shift_extent, ChainCtx};
use crate::error::Error;
use crate::managed::{ManagedShader, ManagedShaderBuilder};

pub struct Generate {
    sets: Vec<ManagedShader>,
    dispatch_extent: vk::Extent2D,
}

impl Generate {
    pub fn new(
        ctx: &ChainCtx,
        idx: usize,
        source_images: &(Image, Image),
        input_image1: &Image,
        input_image2: &Image,
        input_image3: &Image,
        output_image: &Image,
    ) -> Result<Self, Error> {
        let shader = if ctx.hdr {
            &ctx.shaders.generate_hdr
        } else {
            &ctx.shaders.generate
        };

        let mut sets = Vec::with_capacity(2);
        for pair in [
            [&source_images.1, &source_images.0],
            [&source_images.0, &source_images.1],
        ] {
            sets.push(
                ManagedShaderBuilder::new()
                    .sampled(pair[0])
                    .sampled(pair[1])
                    .sampled(input_image1)
                    .sampled(input_image2)
                    .sampled(input_image3)
                    .storage(output_image)
                    .sampler(&ctx.border_black)
                    .sampler(&ctx.edge_compare)
                    .buffer(&ctx.frame_constants[idx])
                    .build(ctx, shader)?,
            );
        }

        Ok(Self {
            sets,
            dispatch_extent: ceil_shift_extent(ctx.source_extent, 15, 4),
        })
    }

    pub fn render(&self, cmd: &CommandBuffer, fidx: usize) {
        self.sets[fidx % 2].dispatch(cmd, self.dispatch_extent);
    }
}
