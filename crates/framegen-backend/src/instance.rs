//! Process-wide instance: device, shader registry, context vending.

use std::path::Path;

use framegen_common::{default_cache_path, DeviceInfo, VulkanContext};

use crate::context::{ContextParams, FrameContext};
use crate::error::Error;
use crate::registry::{build_registry, ShaderRegistry};
use crate::resources::extract_resources;

/// Valid range of the flow scale.
const FLOW_RANGE: std::ops::RangeInclusive<f32> = 0.25..=1.0;
/// Valid range of destination-image counts (multiplier 2..=16).
const DEST_COUNT_RANGE: std::ops::RangeInclusive<usize> = 1..=15;

/// Main entry point of the library.
///
/// Owns the Vulkan device and the compiled shader registry, and vends
/// [`FrameContext`]s that borrow both. Multiple contexts may coexist as
/// long as they do not share image or semaphore descriptors.
pub struct Instance {
    // Pipelines drop before the device they were built on.
    shaders: ShaderRegistry,
    vk: VulkanContext,
}

impl Instance {
    /// Create an instance.
    ///
    /// `picker` selects the physical device; the first device it
    /// accepts is used. `shader_library` is the PE binary holding the
    /// compute shaders. When `allow_low_precision` is set and the
    /// device supports fp16 arithmetic, the fp16 shader variants are
    /// loaded.
    pub fn new(
        picker: impl Fn(&DeviceInfo) -> bool,
        shader_library: &Path,
        allow_low_precision: bool,
    ) -> Result<Self, Error> {
        let vk = VulkanContext::new(&picker, Some(default_cache_path())).map_err(|e| {
            // Nothing matching the picker is a caller problem, not a
            // driver one.
            if e.contains("No suitable physical device") {
                Error::config("Unable to initialize Vulkan").because(e)
            } else {
                Error::device("Unable to initialize Vulkan").because(e)
            }
        })?;

        let resources = extract_resources(shader_library)
            .map_err(|e| e.context("Unable to parse shader library"))?;

        let fp16 = allow_low_precision && vk.supports_fp16();
        let shaders = build_registry(&vk, fp16, &resources)
            .map_err(|e| e.context("Unable to build shader registry"))?;

        // Registry construction compiled every pipeline; flush the
        // cache now so a crash later does not lose it.
        vk.persist_pipeline_cache();

        Ok(Self { shaders, vk })
    }

    /// Open a frame-generation context over imported images.
    ///
    /// The host alternates the two source images between calls and
    /// pre-signals the sync timeline before each `schedule_frames`;
    /// every generated frame signals the next integer in turn.
    pub fn open_context(&self, params: &ContextParams) -> Result<FrameContext<'_>, Error> {
        validate_params(params.flow, params.dest_fds.len())?;
        FrameContext::new(&self.vk, &self.shaders, params)
    }

    /// Schedule one batch of generated frames on a context.
    pub fn schedule_frames(&self, context: &mut FrameContext) -> Result<(), Error> {
        context
            .schedule_frames()
            .map_err(|e| e.context("Unable to schedule frames"))
    }

    /// Tear down a context after draining the device.
    pub fn close_context(&self, context: FrameContext) {
        self.vk.wait_idle();
        drop(context);
    }

    /// Whether the fp16 shader variants were loaded.
    pub fn is_low_precision(&self) -> bool {
        self.shaders.fp16
    }
}

/// Check the caller-supplied context parameters.
fn validate_params(flow: f32, dest_count: usize) -> Result<(), Error> {
    if !FLOW_RANGE.contains(&flow) {
        return Err(Error::config(format!(
            "flow scale {} out of range [0.25, 1.0]",
            flow
        )));
    }
    if !DEST_COUNT_RANGE.contains(&dest_count) {
        return Err(Error::config(format!(
            "frame multiplier {} out of range [2, 16]",
            dest_count + 1
        )));
    }
    Ok(())
}

#[cfg(feature = "leak-workaround")]
mod leak {
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(super) static LEAK_INSTANCES: AtomicBool = AtomicBool::new(false);

    /// Make every [`super::Instance`] leak its Vulkan instance and
    /// device at teardown. Works around a host loader that crashes in
    /// `vkDestroyInstance` when called from a layered process.
    pub fn make_leaking() {
        LEAK_INSTANCES.store(true, Ordering::SeqCst);
    }
}

#[cfg(feature = "leak-workaround")]
pub use leak::make_leaking;

#[cfg(feature = "leak-workaround")]
impl Drop for Instance {
    fn drop(&mut self) {
        if leak::LEAK_INSTANCES.load(std::sync::atomic::Ordering::SeqCst) {
            self.vk.set_leak_on_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    // ============================================================
    // Parameter validation
    // ============================================================

    #[test]
    fn test_flow_range_accepted() {
        for flow in [0.25, 0.5, 0.75, 1.0] {
            assert!(validate_params(flow, 1).is_ok());
        }
    }

    #[test]
    fn test_flow_out_of_range_rejected() {
        for flow in [0.0, 0.2, 1.01, -1.0, f32::NAN] {
            let err = validate_params(flow, 1).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "flow {}", flow);
        }
    }

    #[test]
    fn test_multiplier_range_accepted() {
        for count in 1..=15 {
            assert!(validate_params(1.0, count).is_ok());
        }
    }

    #[test]
    fn test_multiplier_out_of_range_rejected() {
        for count in [0, 16, 100] {
            let err = validate_params(1.0, count).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "count {}", count);
        }
    }

    #[test]
    fn test_multiplier_error_reports_multiplier_not_count() {
        let err = validate_params(1.0, 16).unwrap_err();
        assert!(err.message().contains("17"));
    }
}
