//! Vulkan context: instance, physical device, logical device and queue.
//!
//! The context is built for headless compute: no surface, no swapchain.
//! The physical device is chosen by a caller-supplied predicate that
//! receives the device name, hex vendor/device ids and the PCI location
//! when the driver reports one.

use ash::{vk, Device, Entry, Instance};
use std::ffi::CStr;
use std::fs;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};

use super::{APP_NAME, ENGINE_NAME, ENGINE_VERSION, REQUIRED_VK_VERSION};

/// File name of the on-disk pipeline cache blob.
pub const PIPELINE_CACHE_FILE: &str = "lsfg-vk_pipeline_cache.bin";

/// Identity of a physical device, handed to the device picker.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name as reported by the driver.
    pub name: String,
    /// Vendor id formatted as `0xXXXX`.
    pub vendor_id: String,
    /// Device id formatted as `0xXXXX`.
    pub device_id: String,
    /// PCI location `bus:dev.func` if `VK_EXT_pci_bus_info` is available.
    pub pci: Option<String>,
}

/// Main Vulkan context holding all process-wide Vulkan objects.
pub struct VulkanContext {
    pub entry: Entry,
    pub instance: Instance,
    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,
    pub device: Device,
    pub queue: vk::Queue,
    pub command_pool: vk::CommandPool,
    pub pipeline_cache: vk::PipelineCache,

    // Extension loaders for opaque-FD interop.
    pub external_memory_fd: ash::khr::external_memory_fd::Device,
    pub external_semaphore_fd: ash::khr::external_semaphore_fd::Device,

    /// Whether the device supports `shaderFloat16`.
    supports_fp16: bool,
    /// Where the pipeline cache is persisted, if anywhere.
    cache_path: Option<PathBuf>,
    /// When set, teardown leaks the instance and device.
    leak_on_drop: bool,
}

impl VulkanContext {
    /// Create a new Vulkan context on the first physical device the
    /// picker accepts.
    pub fn new(
        picker: &dyn Fn(&DeviceInfo) -> bool,
        cache_path: Option<PathBuf>,
    ) -> Result<Self, String> {
        // SAFETY: loads libvulkan at runtime; the entry stays alive for
        // the lifetime of the context.
        let entry = unsafe {
            Entry::load().map_err(|e| format!("Failed to load Vulkan library: {:?}", e))?
        };

        let instance = Self::create_instance(&entry)?;

        let physical_device = match Self::pick_physical_device(&instance, picker) {
            Ok(dev) => dev,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let queue_family_index =
            match Self::find_compute_queue_family(&instance, physical_device) {
                Ok(idx) => idx,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };

        let supports_fp16 = Self::check_fp16(&instance, physical_device);

        let device = match Self::create_logical_device(
            &instance,
            physical_device,
            queue_family_index,
            supports_fp16,
        ) {
            Ok(dev) => dev,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        // SAFETY: queue family index was validated above; the pool and
        // cache are created on the device we just built. On failure the
        // partial context is torn down before returning.
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let destroy_partial = |pool: Option<vk::CommandPool>| unsafe {
            if let Some(pool) = pool {
                device.destroy_command_pool(pool, None);
            }
            device.destroy_device(None);
            instance.destroy_instance(None);
        };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                destroy_partial(None);
                return Err(format!("Failed to create command pool: {:?}", e));
            }
        };

        let initial = cache_path.as_deref().and_then(read_cache_file);
        let cache_info = match initial {
            Some(ref data) => vk::PipelineCacheCreateInfo::default().initial_data(data),
            None => vk::PipelineCacheCreateInfo::default(),
        };
        let pipeline_cache = match unsafe { device.create_pipeline_cache(&cache_info, None) } {
            Ok(cache) => cache,
            Err(e) => {
                destroy_partial(Some(command_pool));
                return Err(format!("Failed to create pipeline cache: {:?}", e));
            }
        };

        let external_memory_fd = ash::khr::external_memory_fd::Device::new(&instance, &device);
        let external_semaphore_fd =
            ash::khr::external_semaphore_fd::Device::new(&instance, &device);

        Ok(Self {
            entry,
            instance,
            physical_device,
            queue_family_index,
            device,
            queue,
            command_pool,
            pipeline_cache,
            external_memory_fd,
            external_semaphore_fd,
            supports_fp16,
            cache_path,
            leak_on_drop: false,
        })
    }

    /// Create the Vulkan instance. No extensions: the engine never
    /// touches a surface.
    fn create_instance(entry: &Entry) -> Result<Instance, String> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .application_version(ENGINE_VERSION)
            .engine_name(ENGINE_NAME)
            .engine_version(ENGINE_VERSION)
            .api_version(REQUIRED_VK_VERSION);

        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);

        // SAFETY: create info is fully initialized above.
        unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(|e| format!("Failed to create Vulkan instance: {:?}", e))
        }
    }

    /// Enumerate physical devices and return the first one the picker
    /// accepts.
    fn pick_physical_device(
        instance: &Instance,
        picker: &dyn Fn(&DeviceInfo) -> bool,
    ) -> Result<vk::PhysicalDevice, String> {
        // SAFETY: instance is valid; property queries write into structs
        // we own.
        unsafe {
            let devices = instance
                .enumerate_physical_devices()
                .map_err(|e| format!("Failed to enumerate physical devices: {:?}", e))?;

            if devices.is_empty() {
                return Err("No Vulkan-capable GPU found".to_string());
            }

            for device in devices {
                let info = Self::describe_device(instance, device);
                if picker(&info) {
                    return Ok(device);
                }
            }
        }

        Err("No suitable physical device found".to_string())
    }

    /// Build the identity record for one physical device.
    unsafe fn describe_device(instance: &Instance, device: vk::PhysicalDevice) -> DeviceInfo {
        let has_pci_ext = instance
            .enumerate_device_extension_properties(device)
            .map(|exts| {
                exts.iter().any(|ext| {
                    CStr::from_ptr(ext.extension_name.as_ptr()) == ash::ext::pci_bus_info::NAME
                })
            })
            .unwrap_or(false);

        let mut pci_info = vk::PhysicalDevicePCIBusInfoPropertiesEXT::default();
        let mut props2 = vk::PhysicalDeviceProperties2::default();
        if has_pci_ext {
            props2 = props2.push_next(&mut pci_info);
        }
        instance.get_physical_device_properties2(device, &mut props2);

        let props = props2.properties;
        let name = CStr::from_ptr(props.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        DeviceInfo {
            name,
            vendor_id: to_hex_id(props.vendor_id),
            device_id: to_hex_id(props.device_id),
            pci: has_pci_ext.then(|| {
                format!(
                    "{}:{}.{}",
                    pci_info.pci_bus, pci_info.pci_device, pci_info.pci_function
                )
            }),
        }
    }

    /// Find the first queue family with compute support.
    fn find_compute_queue_family(
        instance: &Instance,
        device: vk::PhysicalDevice,
    ) -> Result<u32, String> {
        // SAFETY: valid instance and device handles.
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::COMPUTE))
            .map(|i| i as u32)
            .ok_or_else(|| "No queue family with compute support found".to_string())
    }

    /// Probe for `shaderFloat16` support.
    fn check_fp16(instance: &Instance, device: vk::PhysicalDevice) -> bool {
        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan12);

        // SAFETY: valid instance and device handles.
        unsafe { instance.get_physical_device_features2(device, &mut features2) };

        vulkan12.shader_float16 == vk::TRUE
    }

    /// Create the logical device with the interop extensions and the
    /// timeline-semaphore feature (plus fp16 when the device has it).
    fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        fp16: bool,
    ) -> Result<Device, String> {
        let queue_priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)];

        let extensions: [*const c_char; 3] = [
            ash::khr::external_memory_fd::NAME.as_ptr(),
            ash::khr::external_semaphore_fd::NAME.as_ptr(),
            ash::khr::timeline_semaphore::NAME.as_ptr(),
        ];

        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default()
            .shader_float16(fp16)
            .timeline_semaphore(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut vulkan12);

        // SAFETY: create info chains only stack-local structs kept alive
        // until the call returns.
        unsafe {
            instance
                .create_device(physical_device, &create_info, None)
                .map_err(|e| format!("Failed to create logical device: {:?}", e))
        }
    }

    /// Whether the device supports half-precision shader arithmetic.
    pub fn supports_fp16(&self) -> bool {
        self.supports_fp16
    }

    /// Write the pipeline cache blob to disk. Best effort: every failure
    /// is swallowed.
    pub fn persist_pipeline_cache(&self) {
        let Some(path) = self.cache_path.as_deref() else {
            return;
        };

        // SAFETY: valid device and cache handles.
        let data = match unsafe { self.device.get_pipeline_cache_data(self.pipeline_cache) } {
            Ok(data) if !data.is_empty() => data,
            _ => return,
        };

        let _ = fs::write(path, data);
    }

    /// Make teardown leak the instance and device. Used to work around a
    /// host loader that crashes on `vkDestroyInstance`.
    pub fn set_leak_on_drop(&mut self) {
        self.leak_on_drop = true;
    }

    /// Wait for all device operations to complete.
    pub fn wait_idle(&self) {
        // SAFETY: valid device handle.
        unsafe {
            let _ = self.device.device_wait_idle();
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        self.persist_pipeline_cache();

        if self.leak_on_drop {
            // The host loader cannot survive instance destruction; leave
            // everything to the OS.
            return;
        }

        // SAFETY: children are destroyed before the device, the device
        // before the instance; callers guarantee no dependent object
        // outlives the context.
        unsafe {
            self.wait_idle();
            self.device.destroy_pipeline_cache(self.pipeline_cache, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Format a vendor/device id as `0xXXXX`.
pub fn to_hex_id(id: u32) -> String {
    format!("0x{:04X}", id & 0xFFFF)
}

/// Resolve the pipeline-cache file location from the environment:
/// `$XDG_CACHE_HOME`, then `$HOME/.cache`, then `/tmp`.
pub fn default_cache_path() -> PathBuf {
    cache_path_from(
        std::env::var_os("XDG_CACHE_HOME"),
        std::env::var_os("HOME"),
    )
}

fn cache_path_from(
    xdg_cache_home: Option<std::ffi::OsString>,
    home: Option<std::ffi::OsString>,
) -> PathBuf {
    if let Some(dir) = xdg_cache_home {
        if !dir.is_empty() {
            return PathBuf::from(dir).join(PIPELINE_CACHE_FILE);
        }
    }

    if let Some(dir) = home {
        if !dir.is_empty() {
            return PathBuf::from(dir).join(".cache").join(PIPELINE_CACHE_FILE);
        }
    }

    PathBuf::from("/tmp").join(PIPELINE_CACHE_FILE)
}

fn read_cache_file(path: &Path) -> Option<Vec<u8>> {
    fs::read(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // Hex id formatting
    // ============================================================

    #[test]
    fn test_hex_id_basic() {
        assert_eq!(to_hex_id(0x10DE), "0x10DE");
        assert_eq!(to_hex_id(0x1002), "0x1002");
        assert_eq!(to_hex_id(0x8086), "0x8086");
    }

    #[test]
    fn test_hex_id_pads_to_four_digits() {
        assert_eq!(to_hex_id(0), "0x0000");
        assert_eq!(to_hex_id(0xF), "0x000F");
        assert_eq!(to_hex_id(0xAB), "0x00AB");
    }

    #[test]
    fn test_hex_id_masks_high_bits() {
        assert_eq!(to_hex_id(0x0001_10DE), "0x10DE");
    }

    // ============================================================
    // Cache path resolution
    // ============================================================

    #[test]
    fn test_cache_path_prefers_xdg() {
        let path = cache_path_from(
            Some("/custom/cache".into()),
            Some("/home/user".into()),
        );
        assert_eq!(
            path,
            PathBuf::from("/custom/cache").join(PIPELINE_CACHE_FILE)
        );
    }

    #[test]
    fn test_cache_path_falls_back_to_home() {
        let path = cache_path_from(None, Some("/home/user".into()));
        assert_eq!(
            path,
            PathBuf::from("/home/user/.cache").join(PIPELINE_CACHE_FILE)
        );
    }

    #[test]
    fn test_cache_path_ignores_empty_vars() {
        let path = cache_path_from(Some("".into()), Some("".into()));
        assert_eq!(path, PathBuf::from("/tmp").join(PIPELINE_CACHE_FILE));
    }

    #[test]
    fn test_cache_path_last_resort_tmp() {
        let path = cache_path_from(None, None);
        assert_eq!(path, PathBuf::from("/tmp").join(PIPELINE_CACHE_FILE));
    }
}
