//! Shader registry: resource selection, SPIR-V patching and pipeline
//! construction.
//!
//! Each logical shader exists in four variants (quality/performance ×
//! fp32/fp16) stored under distinct resource ids. The generate shader
//! additionally needs a byte-level rewrite: it is compiled against
//! `StorageImageWriteWithoutFormat`, which not every target device
//! offers, so the capability is downgraded and an explicit storage
//! format is written into its image types instead — RGBA16F for the HDR
//! copy, RGBA8 for the SDR copy.

use std::collections::HashMap;

use framegen_common::{ComputeShader, DescriptorCounts, VulkanContext};

use crate::error::Error;

/// Base offset of every shader resource id.
const ID_BASE: u32 = 49;
/// Added for the performance-mode variant.
const ID_OFFSET_PERF: u32 = 23;
/// Added for the fp16 variant.
const ID_OFFSET_FP16: u32 = 49;

/// Logical id of the mipmaps shader.
const ID_MIPMAPS: u32 = 255;
/// Logical id of the generate shader.
const ID_GENERATE: u32 = 256;

/// One quality tier of the four analysis shaderchains.
pub struct ShaderSet {
    pub alpha: [ComputeShader; 4],
    pub beta: [ComputeShader; 5],
    pub gamma: [ComputeShader; 5],
    pub delta: [ComputeShader; 10],
}

/// Every compute pipeline the engine dispatches.
pub struct ShaderRegistry {
    pub mipmaps: ComputeShader,
    pub generate: ComputeShader,
    pub generate_hdr: ComputeShader,
    pub quality: ShaderSet,
    pub performance: ShaderSet,
    /// Whether the fp16 variant set was loaded.
    pub fp16: bool,
}

/// Map a logical shader id to its resource key.
pub fn resource_id(logical_id: u32, perf: bool, fp16: bool) -> u32 {
    ID_BASE
        + logical_id
        + if perf { ID_OFFSET_PERF } else { 0 }
        + if fp16 { ID_OFFSET_FP16 } else { 0 }
}

/// Fetch a shader's SPIR-V as 32-bit words.
fn shader_words(
    resources: &HashMap<u32, Vec<u8>>,
    logical_id: u32,
    perf: bool,
    fp16: bool,
) -> Result<Vec<u32>, Error> {
    let key = resource_id(logical_id, perf, fp16);
    let bytes = resources.get(&key).ok_or_else(|| {
        Error::config(format!(
            "unable to find shader with id {} (resource {})",
            logical_id, key
        ))
    })?;

    if bytes.len() % 4 != 0 {
        return Err(Error::config(format!(
            "shader {} is not a SPIR-V module (size {})",
            logical_id,
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Rewrite the generate shader in place for a fixed storage format.
///
/// The instruction stream starts at word 5; each instruction is
/// `op = low16, word count = high16`. Every
/// `OpCapability StorageImageWriteWithoutFormat` becomes
/// `OpCapability Shader`, and every `OpTypeImage` used as a storage
/// image (sampled operand 2) gets its format operand overwritten.
pub fn patch_generate_shader(words: &mut [u32], hdr: bool) {
    const OP_CAPABILITY: u32 = 17;
    const OP_TYPE_IMAGE: u32 = 25;
    const CAP_STORAGE_IMAGE_WRITE_WITHOUT_FORMAT: u32 = 56;
    const CAP_SHADER: u32 = 1;
    const FORMAT_RGBA16F: u32 = 2;
    const FORMAT_RGBA8: u32 = 4;

    let mut i = 5;
    while i < words.len() {
        let word = words[i];
        let word_count = (word >> 16) as usize;
        let op = word & 0xFFFF;

        if op == OP_CAPABILITY && word_count >= 2 && i + 1 < words.len() {
            if words[i + 1] == CAP_STORAGE_IMAGE_WRITE_WITHOUT_FORMAT {
                words[i + 1] = CAP_SHADER;
            }
        }

        if op == OP_TYPE_IMAGE && word_count >= 9 && i + 8 < words.len() {
            let sampled = words[i + 7];
            if sampled == 2 {
                words[i + 8] = if hdr { FORMAT_RGBA16F } else { FORMAT_RGBA8 };
            }
        }

        i += if word_count == 0 { 1 } else { word_count };
    }
}

/// Build the full registry from an extracted resource table.
pub fn build_registry(
    vk: &VulkanContext,
    fp16: bool,
    resources: &HashMap<u32, Vec<u8>>,
) -> Result<ShaderRegistry, Error> {
    let load = |logical_id: u32,
                perf: bool,
                sampled: u32,
                storage: u32,
                uniforms: u32,
                samplers: u32|
     -> Result<ComputeShader, Error> {
        let words = shader_words(resources, logical_id, perf, fp16)?;
        ComputeShader::new(
            vk,
            &words,
            DescriptorCounts {
                sampled_images: sampled,
                storage_images: storage,
                uniform_buffers: uniforms,
                samplers,
            },
        )
        .map_err(|e| {
            Error::device(format!("unable to build pipeline for shader {}", logical_id))
                .because(e)
        })
    };

    // The generate shader is duplicated and patched for both dynamic
    // ranges before pipeline creation.
    let mut generate_words = shader_words(resources, ID_GENERATE, false, fp16)?;
    let mut generate_hdr_words = generate_words.clone();
    patch_generate_shader(&mut generate_words, false);
    patch_generate_shader(&mut generate_hdr_words, true);

    let generate_counts = DescriptorCounts {
        sampled_images: 5,
        storage_images: 1,
        uniform_buffers: 1,
        samplers: 2,
    };
    let generate = ComputeShader::new(vk, &generate_words, generate_counts)
        .map_err(|e| Error::device("unable to build generate pipeline").because(e))?;
    let generate_hdr = ComputeShader::new(vk, &generate_hdr_words, generate_counts)
        .map_err(|e| Error::device("unable to build HDR generate pipeline").because(e))?;

    Ok(ShaderRegistry {
        mipmaps: load(ID_MIPMAPS, false, 1, 7, 1, 1)?,
        generate,
        generate_hdr,
        quality: ShaderSet {
            alpha: [
                load(267, false, 1, 2, 0, 1)?,
                load(268, false, 2, 2, 0, 1)?,
                load(269, false, 2, 4, 0, 1)?,
                load(270, false, 4, 4, 0, 1)?,
            ],
            beta: [
                load(275, false, 12, 2, 0, 1)?,
                load(276, false, 2, 2, 0, 1)?,
                load(277, false, 2, 2, 0, 1)?,
                load(278, false, 2, 2, 0, 1)?,
                load(279, false, 2, 6, 1, 1)?,
            ],
            gamma: [
                load(257, false, 9, 3, 1, 2)?,
                load(259, false, 3, 4, 0, 1)?,
                load(260, false, 4, 4, 0, 1)?,
                load(261, false, 4, 4, 0, 1)?,
                load(262, false, 6, 1, 1, 2)?,
            ],
            delta: [
                load(257, false, 9, 3, 1, 2)?,
                load(263, false, 3, 4, 0, 1)?,
                load(264, false, 4, 4, 0, 1)?,
                load(265, false, 4, 4, 0, 1)?,
                load(266, false, 6, 1, 1, 2)?,
                load(258, false, 10, 2, 1, 2)?,
                load(271, false, 2, 2, 0, 1)?,
                load(272, false, 2, 2, 0, 1)?,
                load(273, false, 2, 2, 0, 1)?,
                load(274, false, 3, 1, 1, 2)?,
            ],
        },
        performance: ShaderSet {
            alpha: [
                load(267, true, 1, 1, 0, 1)?,
                load(268, true, 1, 1, 0, 1)?,
                load(269, true, 1, 2, 0, 1)?,
                load(270, true, 2, 2, 0, 1)?,
            ],
            beta: [
                load(275, true, 6, 2, 0, 1)?,
                load(276, true, 2, 2, 0, 1)?,
                load(277, true, 2, 2, 0, 1)?,
                load(278, true, 2, 2, 0, 1)?,
                load(279, true, 2, 6, 1, 1)?,
            ],
            gamma: [
                load(257, true, 5, 3, 1, 2)?,
                load(259, true, 3, 2, 0, 1)?,
                load(260, true, 2, 2, 0, 1)?,
                load(261, true, 2, 2, 0, 1)?,
                load(262, true, 4, 1, 1, 2)?,
            ],
            delta: [
                load(257, true, 5, 3, 1, 2)?,
                load(263, true, 3, 2, 0, 1)?,
                load(264, true, 2, 2, 0, 1)?,
                load(265, true, 2, 2, 0, 1)?,
                load(266, true, 4, 1, 1, 2)?,
                load(258, true, 6, 1, 1, 2)?,
                load(271, true, 1, 1, 0, 1)?,
                load(272, true, 1, 1, 0, 1)?,
                load(273, true, 1, 1, 0, 1)?,
                load(274, true, 2, 1, 1, 2)?,
            ],
        },
        fp16,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Logical ids referenced by the registry, with whether the
    /// quality/performance split applies to them.
    fn used_logical_ids() -> Vec<(u32, bool)> {
        let mut ids = vec![(ID_MIPMAPS, false), (ID_GENERATE, false)];
        ids.extend((257..=279).map(|id| (id, true)));
        ids
    }

    // ============================================================
    // Resource id formula
    // ============================================================

    #[test]
    fn test_resource_id_formula() {
        assert_eq!(resource_id(255, false, false), 304);
        assert_eq!(resource_id(256, false, false), 305);
        assert_eq!(resource_id(267, false, false), 316);
        assert_eq!(resource_id(267, true, false), 339);
        assert_eq!(resource_id(267, false, true), 365);
        assert_eq!(resource_id(267, true, true), 388);
    }

    #[test]
    fn test_resource_ids_distinct_per_variant() {
        for perf in [false, true] {
            for fp16 in [false, true] {
                let keys: HashSet<u32> = used_logical_ids()
                    .into_iter()
                    .map(|(id, split)| resource_id(id, perf && split, fp16))
                    .collect();
                assert_eq!(keys.len(), 25, "collision for perf={} fp16={}", perf, fp16);
            }
        }
    }

    #[test]
    fn test_missing_shader_reports_resource_key() {
        let resources = HashMap::new();
        let err = shader_words(&resources, 267, true, true).unwrap_err();
        assert!(err.message().contains("267"));
        assert!(err.message().contains("388"));
    }

    #[test]
    fn test_rejects_unaligned_module() {
        let mut resources = HashMap::new();
        resources.insert(resource_id(267, false, false), vec![1, 2, 3]);
        let err = shader_words(&resources, 267, false, false).unwrap_err();
        assert!(err.message().contains("not a SPIR-V module"));
    }

    #[test]
    fn test_words_are_little_endian() {
        let mut resources = HashMap::new();
        resources.insert(
            resource_id(267, false, false),
            vec![0x03, 0x02, 0x23, 0x07],
        );
        let words = shader_words(&resources, 267, false, false).unwrap();
        assert_eq!(words, vec![0x0723_0203]);
    }

    // ============================================================
    // Generate shader patching
    // ============================================================

    fn instruction(op: u32, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![((operands.len() as u32 + 1) << 16) | op];
        words.extend_from_slice(operands);
        words
    }

    /// Minimal module: 5-word header, one capability, two image types
    /// (one storage, one sampled), one opaque trailing instruction.
    fn test_module() -> Vec<u32> {
        let mut words = vec![0x0723_0203, 0x0001_0000, 0, 100, 0];
        words.extend(instruction(17, &[56])); // OpCapability StorageImageWriteWithoutFormat
        words.extend(instruction(17, &[1])); // OpCapability Shader
        // OpTypeImage %id %type dim depth arrayed ms sampled format
        words.extend(instruction(25, &[10, 6, 1, 0, 0, 0, 2, 0])); // storage image
        words.extend(instruction(25, &[11, 6, 1, 0, 0, 0, 1, 0])); // sampled image
        words.extend(instruction(54, &[1, 2, 3])); // unrelated instruction
        words
    }

    #[test]
    fn test_patch_rewrites_capability() {
        let mut words = test_module();
        patch_generate_shader(&mut words, false);
        assert!(!words_contain_capability(&words, 56));
    }

    #[test]
    fn test_patch_sdr_format() {
        let mut words = test_module();
        patch_generate_shader(&mut words, false);
        assert_eq!(storage_image_formats(&words), vec![4]); // Rgba8
    }

    #[test]
    fn test_patch_hdr_format() {
        let mut words = test_module();
        patch_generate_shader(&mut words, true);
        assert_eq!(storage_image_formats(&words), vec![2]); // Rgba16f
    }

    #[test]
    fn test_patch_leaves_sampled_images_alone() {
        let mut words = test_module();
        let first_image = words
            .iter()
            .position(|&w| w == ((9u32 << 16) | 25))
            .unwrap();
        let sampled_image = first_image + 9; // second OpTypeImage follows the first
        patch_generate_shader(&mut words, true);
        // The sampled-operand-1 image keeps format Unknown.
        assert_eq!(words[sampled_image + 8], 0);
    }

    #[test]
    fn test_patch_is_deterministic() {
        let mut a = test_module();
        let mut b = test_module();
        patch_generate_shader(&mut a, true);
        patch_generate_shader(&mut b, true);
        assert_eq!(a, b);
    }

    #[test]
    fn test_patch_is_idempotent() {
        let mut once = test_module();
        patch_generate_shader(&mut once, false);
        let mut twice = once.clone();
        patch_generate_shader(&mut twice, false);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_patch_handles_truncated_stream() {
        // A word count pointing past the end must not panic.
        let mut words = vec![0x0723_0203, 0, 0, 0, 0, (20u32 << 16) | 25];
        patch_generate_shader(&mut words, false);
        let mut words = vec![0x0723_0203, 0, 0, 0, 0, (2u32 << 16) | 17];
        patch_generate_shader(&mut words, false);
    }

    #[test]
    fn test_patch_skips_zero_word_count() {
        // A zero word count advances by one instead of looping forever.
        let mut words = vec![0x0723_0203, 0, 0, 0, 0, 17, 56];
        patch_generate_shader(&mut words, false);
        // The bare op has no declared operands, so nothing is rewritten.
        assert_eq!(words[6], 56);
    }

    fn words_contain_capability(words: &[u32], capability: u32) -> bool {
        let mut i = 5;
        while i < words.len() {
            let wc = (words[i] >> 16) as usize;
            let op = words[i] & 0xFFFF;
            if op == 17 && wc >= 2 && i + 1 < words.len() && words[i + 1] == capability {
                return true;
            }
            i += if wc == 0 { 1 } else { wc };
        }
        false
    }

    fn storage_image_formats(words: &[u32]) -> Vec<u32> {
        let mut formats = Vec::new();
        let mut i = 5;
        while i < words.len() {
            let wc = (words[i] >> 16) as usize;
            let op = words[i] & 0xFFFF;
            if op == 25 && wc >= 9 && i + 8 < words.len() && words[i + 7] == 2 {
                formats.push(words[i + 8]);
            }
            i += if wc == 0 { 1 } else { wc };
        }
        formats
    }
}
