//! Immutable samplers for the compute chains.

use ash::vk;

use super::VulkanContext;

/// Immutable linear-filtering sampler.
pub struct Sampler {
    device: ash::Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Create a sampler. All filtering is linear with unclamped LOD; the
    /// address mode, compare op and border color are what distinguish
    /// the three samplers the engine uses.
    pub fn new(
        vk: &VulkanContext,
        address_mode: vk::SamplerAddressMode,
        compare_op: vk::CompareOp,
        white_border: bool,
    ) -> Result<Self, String> {
        let border_color = if white_border {
            vk::BorderColor::FLOAT_OPAQUE_WHITE
        } else {
            vk::BorderColor::FLOAT_TRANSPARENT_BLACK
        };

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .compare_op(compare_op)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(border_color);

        // SAFETY: create info is fully initialized above.
        let sampler = unsafe {
            vk.device
                .create_sampler(&create_info, None)
                .map_err(|e| format!("Failed to create sampler: {:?}", e))?
        };

        Ok(Self {
            device: vk.device.clone(),
            sampler,
        })
    }

    /// Raw sampler handle.
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        // SAFETY: handle was created by this struct on this device.
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}
