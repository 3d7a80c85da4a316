//! Descriptor-pool budgets.
//!
//! The chain graph is static, so the descriptor demand of a context is
//! known up front: a fixed base for the shared pre-pass chains plus a
//! per-destination-image increment for each generation pass. Performance
//! mode halves most image bindings, which shows up in the two image
//! columns only.

use framegen_common::PoolLimits;

/// Demand of the shared pre-pass chains.
const BASE: PoolLimits = PoolLimits {
    sets: 51,
    uniform_buffers: 3,
    samplers: 51,
    sampled_images: 165,
    storage_images: 172,
};

/// Per-destination demand of one generation pass.
const GEN: PoolLimits = PoolLimits {
    sets: 93,
    uniform_buffers: 54,
    samplers: 147,
    sampled_images: 567,
    storage_images: 261,
};

/// Image-column overrides in performance mode.
const BASE_PERF: (u32, u32) = (91, 102);
const GEN_PERF: (u32, u32) = (339, 183);

/// Pool budget for a context generating into `count` destination images.
pub fn pool_limits(count: usize, perf: bool) -> PoolLimits {
    let m = count as u32;

    let mut base = BASE;
    let mut gen = GEN;
    if perf {
        (base.sampled_images, base.storage_images) = BASE_PERF;
        (gen.sampled_images, gen.storage_images) = GEN_PERF;
    }

    PoolLimits {
        sets: base.sets + gen.sets * m,
        uniform_buffers: base.uniform_buffers + gen.uniform_buffers * m,
        samplers: base.samplers + gen.samplers * m,
        sampled_images: base.sampled_images + gen.sampled_images * m,
        storage_images: base.storage_images + gen.storage_images * m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // Quality-mode budgets
    // ============================================================

    #[test]
    fn test_single_destination_quality() {
        let limits = pool_limits(1, false);
        assert_eq!(limits.sets, 51 + 93);
        assert_eq!(limits.uniform_buffers, 3 + 54);
        assert_eq!(limits.samplers, 51 + 147);
        assert_eq!(limits.sampled_images, 165 + 567);
        assert_eq!(limits.storage_images, 172 + 261);
    }

    #[test]
    fn test_three_destinations_quality() {
        let limits = pool_limits(3, false);
        assert_eq!(limits.sets, 51 + 3 * 93);
        assert_eq!(limits.uniform_buffers, 3 + 3 * 54);
        assert_eq!(limits.samplers, 51 + 3 * 147);
        assert_eq!(limits.sampled_images, 165 + 3 * 567);
        assert_eq!(limits.storage_images, 172 + 3 * 261);
    }

    // ============================================================
    // Performance-mode budgets
    // ============================================================

    #[test]
    fn test_single_destination_performance() {
        let limits = pool_limits(1, true);
        assert_eq!(limits.sets, 51 + 93);
        assert_eq!(limits.uniform_buffers, 3 + 54);
        assert_eq!(limits.samplers, 51 + 147);
        assert_eq!(limits.sampled_images, 91 + 339);
        assert_eq!(limits.storage_images, 102 + 183);
    }

    #[test]
    fn test_performance_only_changes_image_columns() {
        for count in 1..=15 {
            let quality = pool_limits(count, false);
            let perf = pool_limits(count, true);
            assert_eq!(quality.sets, perf.sets);
            assert_eq!(quality.uniform_buffers, perf.uniform_buffers);
            assert_eq!(quality.samplers, perf.samplers);
            assert!(perf.sampled_images < quality.sampled_images);
            assert!(perf.storage_images < quality.storage_images);
        }
    }

    #[test]
    fn test_budget_grows_linearly() {
        for perf in [false, true] {
            for count in 1..=14 {
                let a = pool_limits(count, perf);
                let b = pool_limits(count + 1, perf);
                let gen_sampled = if perf { 339 } else { 567 };
                assert_eq!(b.sets - a.sets, 93);
                assert_eq!(b.uniform_buffers - a.uniform_buffers, 54);
                assert_eq!(b.samplers - a.samplers, 147);
                assert_eq!(b.sampled_images - a.sampled_images, gen_sampled);
            }
        }
    }

    // ============================================================
    // Budget vs. the chain graph's actual demand
    // ============================================================

    /// Descriptor demand of one context, derived from the chain
    /// topology: set counts, binding arities and the per-destination
    /// stage structure. Kept independent from the chain code so it
    /// catches drift on either side.
    fn chain_demand(count: u32, perf: bool) -> PoolLimits {
        let m: u32 = if perf { 1 } else { 2 };
        let temporal: [u32; 7] = [3, 2, 2, 2, 2, 2, 2];
        let temporal_sum: u32 = temporal.iter().sum();

        let mut d = PoolLimits::default();
        let mut add = |sets: u32, sampled: u32, storage: u32, uniforms: u32, samplers: u32| {
            d.sets += sets;
            d.sampled_images += sets * sampled;
            d.storage_images += sets * storage;
            d.uniform_buffers += sets * uniforms;
            d.samplers += sets * samplers;
        };

        // Mipmaps: two sets over the seven-level pyramid.
        add(2, 1, 7, 1, 1);
        // Alpha0 per level: three dispatches through half/quarter temps.
        add(7, 1, m, 0, 1);
        add(7, m, m, 0, 1);
        add(7, m, 2 * m, 0, 1);
        // Alpha1: one set per temporal cycle.
        add(temporal_sum, 2 * m, 2 * m, 0, 1);
        // Beta0: three cyclic rotations over alpha1[0]'s cycles.
        add(temporal[0], temporal[0] * 2 * m, 2, 0, 1);
        // Beta1: three ping-pong stages plus the pyramid writer.
        add(3, 2, 2, 0, 1);
        add(1, 2, 6, 1, 1);

        for _ in 0..count {
            for j in 0..7usize {
                let n = temporal[6 - j];
                // Gamma0: neighbor pair + prior estimate.
                add(n, 4 * m + 1, 3, 1, 2);
                // Gamma1: correlation intake, two ping-pongs, the
                // field writer.
                add(1, 3, 2 * m, 0, 1);
                add(2, 2 * m, 2 * m, 0, 1);
                add(1, 2 * m + 2, 1, 1, 2);

                if j >= 4 {
                    // Delta0: two set groups over the same rotations.
                    add(n, 4 * m + 1, 3, 1, 2);
                    add(n, 4 * m + 2, m, 1, 2);
                    // Delta1: full-width chain plus the front-half chain.
                    add(1, 3, 2 * m, 0, 1);
                    add(2, 2 * m, 2 * m, 0, 1);
                    add(1, 2 * m + 2, 1, 1, 2);
                    add(1, m, m, 0, 1);
                    add(2, m, m, 0, 1);
                    add(1, m + 1, 1, 1, 2);
                }
            }
            // Generate: both source-pair orientations.
            add(2, 5, 1, 1, 2);
        }

        d
    }

    #[test]
    fn test_budget_covers_static_chain_demand() {
        for perf in [false, true] {
            for count in 1..=15 {
                let budget = pool_limits(count as usize, perf);
                let demand = chain_demand(count, perf);
                assert!(
                    demand.sets <= budget.sets,
                    "sets {} > {} (count {} perf {})",
                    demand.sets, budget.sets, count, perf
                );
                assert!(demand.uniform_buffers <= budget.uniform_buffers);
                assert!(demand.samplers <= budget.samplers);
                assert!(
                    demand.sampled_images <= budget.sampled_images,
                    "sampled {} > {} (count {} perf {})",
                    demand.sampled_images, budget.sampled_images, count, perf
                );
                assert!(
                    demand.storage_images <= budget.storage_images,
                    "storage {} > {} (count {} perf {})",
                    demand.storage_images, budget.storage_images, count, perf
                );
            }
        }
    }
}
