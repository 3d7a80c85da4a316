//! Shaderchains: the fixed dispatch graph.
//!
//! A shaderchain is a short sequence of compute dispatches with a
//! declared set of input and output images. The pre-pass chains
//! (mipmaps, alpha, beta) run once per real frame pair; gamma, delta
//! and generate run once per generated frame. Chains own their output
//! images; inputs are borrowed from the producing chain at construction
//! and captured as raw handles in descriptor sets.

pub mod alpha;
pub mod beta;
pub mod delta;
pub mod gamma;
pub mod generate;
pub mod mipmaps;

pub use alpha::{Alpha0, Alpha1};
pub use beta::{Beta0, Beta1};
pub use delta::{Delta0, Delta1};
pub use gamma::{Gamma0, Gamma1};
pub use generate::Generate;
pub use mipmaps::Mipmaps;

use ash::vk;
use framegen_common::{Buffer, DescriptorPool, Image, Sampler, VulkanContext};

use crate::error::Error;
use crate::registry::{ShaderRegistry, ShaderSet};

/// Shared per-context data every chain is built against.
pub struct ChainCtx<'a> {
    pub vk: &'a VulkanContext,
    pub shaders: &'a ShaderRegistry,
    pub pool: DescriptorPool,

    /// Constant buffer for passes whose timestamp does not vary.
    pub shared_constants: Buffer,
    /// One constant buffer per generated-frame slot.
    pub frame_constants: Vec<Buffer>,

    /// Clamp-to-border, black, no compare.
    pub border_black: Sampler,
    /// Clamp-to-border, white, no compare.
    pub border_white: Sampler,
    /// Clamp-to-edge, always compare, black.
    pub edge_compare: Sampler,

    pub source_extent: vk::Extent2D,
    pub flow_extent: vk::Extent2D,

    pub hdr: bool,
    pub flow: f32,
    pub perf: bool,
    /// Destination image count (generated frames per call).
    pub count: usize,
}

impl ChainCtx<'_> {
    /// The shader tier selected for this context.
    pub fn shader_set(&self) -> &ShaderSet {
        if self.perf {
            &self.shaders.performance
        } else {
            &self.shaders.quality
        }
    }
}

/// Shader constant block shared by every dispatch.
///
/// `input_offset`, `first_iter` and `first_iter_s` exist in the shader
/// interface but are never assigned by the engine and stay zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameConstants {
    pub input_offset: [u32; 2],
    pub first_iter: u32,
    pub first_iter_s: u32,
    /// 2 when the swapchain is HDR, 0 otherwise.
    pub advanced_color_kind: u32,
    /// 1 when HDR, 0 otherwise.
    pub hdr_support: u32,
    /// Reciprocal of the flow scale.
    pub resolution_inv_scale: f32,
    /// Temporal position of this generated frame, `(k+1)/(M+1)`.
    pub timestamp: f32,
    pub ui_threshold: f32,
    pub pad: [u32; 3],
}

impl FrameConstants {
    /// Fill the block for generated-frame slot `index` of `total`.
    pub fn new(index: usize, total: usize, hdr: bool, inv_flow: f32) -> Self {
        Self {
            input_offset: [0, 0],
            first_iter: 0,
            first_iter_s: 0,
            advanced_color_kind: if hdr { 2 } else { 0 },
            hdr_support: u32::from(hdr),
            resolution_inv_scale: inv_flow,
            timestamp: (index as f32 + 1.0) / (total as f32 + 1.0),
            ui_threshold: 0.5,
            pad: [0; 3],
        }
    }
}

/// Round an extent down by a power of two.
pub fn shift_extent(extent: vk::Extent2D, i: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width >> i,
        height: extent.height >> i,
    }
}

/// Round an extent up by a power of two: `(x + add) >> i`.
pub fn ceil_shift_extent(extent: vk::Extent2D, add: u32, i: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: (extent.width + add) >> i,
        height: (extent.height + add) >> i,
    }
}

/// Create one chain-owned image.
pub(crate) fn chain_image(
    ctx: &ChainCtx,
    extent: vk::Extent2D,
    format: vk::Format,
) -> Result<Image, Error> {
    Image::new(ctx.vk, extent, format)
        .map_err(|e| Error::device("unable to create chain image").because(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // Constant block
    // ============================================================

    #[test]
    fn test_frame_constants_layout() {
        // 12 tightly packed 32-bit words.
        assert_eq!(std::mem::size_of::<FrameConstants>(), 48);
    }

    #[test]
    fn test_frame_constants_sdr() {
        let constants = FrameConstants::new(0, 1, false, 1.0);
        assert_eq!(constants.advanced_color_kind, 0);
        assert_eq!(constants.hdr_support, 0);
        assert_eq!(constants.resolution_inv_scale, 1.0);
        assert_eq!(constants.timestamp, 0.5);
        assert_eq!(constants.ui_threshold, 0.5);
    }

    #[test]
    fn test_frame_constants_hdr() {
        let constants = FrameConstants::new(0, 1, true, 2.0);
        assert_eq!(constants.advanced_color_kind, 2);
        assert_eq!(constants.hdr_support, 1);
        assert_eq!(constants.resolution_inv_scale, 2.0);
    }

    #[test]
    fn test_frame_constants_unused_fields_stay_zero() {
        let constants = FrameConstants::new(2, 3, true, 4.0);
        assert_eq!(constants.input_offset, [0, 0]);
        assert_eq!(constants.first_iter, 0);
        assert_eq!(constants.first_iter_s, 0);
        assert_eq!(constants.pad, [0; 3]);
    }

    #[test]
    fn test_timestamps_divide_the_interval() {
        // Three generated frames between a pair: 1/4, 2/4, 3/4.
        for (index, expected) in [(0, 0.25), (1, 0.5), (2, 0.75)] {
            let constants = FrameConstants::new(index, 3, false, 1.0);
            assert!((constants.timestamp - expected).abs() < 1e-6);
        }
    }

    // ============================================================
    // Extent math
    // ============================================================

    #[test]
    fn test_shift_extent_rounds_down() {
        let extent = vk::Extent2D {
            width: 1921,
            height: 1080,
        };
        let half = shift_extent(extent, 1);
        assert_eq!((half.width, half.height), (960, 540));
    }

    #[test]
    fn test_ceil_shift_extent_rounds_up() {
        let extent = vk::Extent2D {
            width: 1921,
            height: 1080,
        };
        let groups = ceil_shift_extent(extent, 7, 3);
        assert_eq!((groups.width, groups.height), (241, 135));
    }

    #[test]
    fn test_ceil_shift_extent_never_hits_zero() {
        let one = vk::Extent2D {
            width: 1,
            height: 1,
        };
        for (add, i) in [(7, 3), (15, 4), (31, 5), (63, 6)] {
            let groups = ceil_shift_extent(one, add, i);
            assert_eq!((groups.width, groups.height), (1, 1), "divisor 2^{}", i);
        }
    }

    #[test]
    fn test_ceil_shift_is_exact_on_multiples() {
        let extent = vk::Extent2D {
            width: 256,
            height: 64,
        };
        let groups = ceil_shift_extent(extent, 7, 3);
        assert_eq!((groups.width, groups.height), (32, 8));
    }
}
