//! Images and buffers with dedicated memory.
//!
//! Every image the engine touches is a single-mip 2D color image whose
//! memory may be shared with another process through an opaque FD, so
//! each one gets a dedicated allocation instead of going through a
//! sub-allocator.

use ash::vk;
use std::os::fd::RawFd;

use super::{color_subresource_range, VulkanContext};

/// How an image's memory relates to the outside world.
enum ExternalMemory {
    /// Plain device-local allocation.
    None,
    /// Adopt memory exported by another process. Vulkan takes ownership
    /// of the descriptor on success.
    Import(RawFd),
    /// Allocate exportable memory and hand back a descriptor for it.
    Export,
}

/// 2D storage+sampled image with its memory and view.
pub struct Image {
    device: ash::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl Image {
    /// Create a device-local image with the default storage+sampled usage.
    pub fn new(vk: &VulkanContext, extent: vk::Extent2D, format: vk::Format) -> Result<Self, String> {
        Self::create(
            vk,
            extent,
            format,
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
            ExternalMemory::None,
        )
        .map(|(image, _)| image)
    }

    /// Import an image whose memory was exported by another process as
    /// an opaque FD. The descriptor is consumed on success.
    pub fn import(
        vk: &VulkanContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        fd: RawFd,
    ) -> Result<Self, String> {
        Self::create(vk, extent, format, usage, ExternalMemory::Import(fd))
            .map(|(image, _)| image)
    }

    /// Create an image with exportable memory, returning the image and
    /// the opaque FD referencing its memory.
    pub fn exported(
        vk: &VulkanContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<(Self, RawFd), String> {
        let (image, fd) = Self::create(vk, extent, format, usage, ExternalMemory::Export)?;
        let fd = fd.ok_or_else(|| "Failed to export image memory".to_string())?;
        Ok((image, fd))
    }

    fn create(
        vk: &VulkanContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        external: ExternalMemory,
    ) -> Result<(Self, Option<RawFd>), String> {
        let is_external = !matches!(external, ExternalMemory::None);

        let mut external_info = vk::ExternalMemoryImageCreateInfo::default()
            .handle_types(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
        let mut image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        if is_external {
            image_info = image_info.push_next(&mut external_info);
        }

        // SAFETY: create info and the memory chain below reference only
        // locals that outlive the calls; on any failure the handles
        // created so far are destroyed before returning.
        unsafe {
            let image = vk
                .device
                .create_image(&image_info, None)
                .map_err(|e| format!("Failed to create image: {:?}", e))?;

            let (memory, exported_fd) = match Self::allocate(vk, image, external) {
                Ok(pair) => pair,
                Err(e) => {
                    vk.device.destroy_image(image, None);
                    return Err(e);
                }
            };

            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(color_subresource_range());
            let view = match vk.device.create_image_view(&view_info, None) {
                Ok(view) => view,
                Err(e) => {
                    vk.device.destroy_image(image, None);
                    vk.device.free_memory(memory, None);
                    return Err(format!("Failed to create image view: {:?}", e));
                }
            };

            Ok((
                Self {
                    device: vk.device.clone(),
                    image,
                    memory,
                    view,
                    extent,
                    format,
                },
                exported_fd,
            ))
        }
    }

    /// Allocate and bind dedicated memory, importing or exporting the
    /// backing descriptor as requested.
    unsafe fn allocate(
        vk: &VulkanContext,
        image: vk::Image,
        external: ExternalMemory,
    ) -> Result<(vk::DeviceMemory, Option<RawFd>), String> {
        let reqs = vk.device.get_image_memory_requirements(image);

        let memory_type = find_memory_type(
            vk,
            reqs.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .ok_or_else(|| "No suitable memory type found for image".to_string())?;

        let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::default().image(image);
        let mut import_info = vk::ImportMemoryFdInfoKHR::default()
            .handle_type(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
        let mut export_info = vk::ExportMemoryAllocateInfo::default()
            .handle_types(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);

        let wants_export = matches!(external, ExternalMemory::Export);

        let mut alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(reqs.size)
            .memory_type_index(memory_type);
        match external {
            ExternalMemory::None => {}
            ExternalMemory::Import(fd) => {
                import_info = import_info.fd(fd);
                alloc_info = alloc_info.push_next(&mut dedicated_info).push_next(&mut import_info);
            }
            ExternalMemory::Export => {
                alloc_info = alloc_info.push_next(&mut dedicated_info).push_next(&mut export_info);
            }
        }

        let memory = vk
            .device
            .allocate_memory(&alloc_info, None)
            .map_err(|e| format!("Failed to allocate image memory: {:?}", e))?;

        if let Err(e) = vk.device.bind_image_memory(image, memory, 0) {
            vk.device.free_memory(memory, None);
            return Err(format!("Failed to bind image memory: {:?}", e));
        }

        let exported_fd = if wants_export {
            let fd_info = vk::MemoryGetFdInfoKHR::default()
                .memory(memory)
                .handle_type(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
            match vk.external_memory_fd.get_memory_fd(&fd_info) {
                Ok(fd) => Some(fd),
                Err(e) => {
                    vk.device.free_memory(memory, None);
                    return Err(format!("Failed to export image memory: {:?}", e));
                }
            }
        } else {
            None
        };

        Ok((memory, exported_fd))
    }

    /// Raw image handle.
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Image view covering the whole image.
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Extent in pixels.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Pixel format.
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        // SAFETY: handles were created by this struct on this device.
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Host-visible buffer filled once at creation.
pub struct Buffer {
    device: ash::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a uniform buffer holding one copy of `data`.
    pub fn uniform<T: Copy>(vk: &VulkanContext, data: &T) -> Result<Self, String> {
        // SAFETY: T is Copy and fully initialized; its bytes are read
        // exactly once into the mapped allocation.
        let bytes = unsafe {
            std::slice::from_raw_parts(data as *const T as *const u8, std::mem::size_of::<T>())
        };
        Self::from_bytes(vk, bytes, vk::BufferUsageFlags::UNIFORM_BUFFER)
    }

    /// Create a buffer with the given usage and contents.
    pub fn from_bytes(
        vk: &VulkanContext,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, String> {
        let size = data.len() as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: handles created here are destroyed on every failure
        // path; the mapped range matches the allocation.
        unsafe {
            let buffer = vk
                .device
                .create_buffer(&buffer_info, None)
                .map_err(|e| format!("Failed to create buffer: {:?}", e))?;

            let reqs = vk.device.get_buffer_memory_requirements(buffer);
            let memory_type = match find_memory_type(
                vk,
                reqs.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ) {
                Some(idx) => idx,
                None => {
                    vk.device.destroy_buffer(buffer, None);
                    return Err("No suitable memory type found for buffer".to_string());
                }
            };

            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(reqs.size)
                .memory_type_index(memory_type);
            let memory = match vk.device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    vk.device.destroy_buffer(buffer, None);
                    return Err(format!("Failed to allocate buffer memory: {:?}", e));
                }
            };

            let result = vk
                .device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(|e| format!("Failed to bind buffer memory: {:?}", e))
                .and_then(|_| {
                    let ptr = vk
                        .device
                        .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
                        .map_err(|e| format!("Failed to map buffer memory: {:?}", e))?;
                    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
                    vk.device.unmap_memory(memory);
                    Ok(())
                });

            if let Err(e) = result {
                vk.device.destroy_buffer(buffer, None);
                vk.device.free_memory(memory, None);
                return Err(e);
            }

            Ok(Self {
                device: vk.device.clone(),
                buffer,
                memory,
                size,
            })
        }
    }

    /// Raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: handles were created by this struct on this device.
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Find a memory type index matching the requirement bits and property
/// flags.
fn find_memory_type(
    vk: &VulkanContext,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    // SAFETY: valid instance and physical device handles.
    let mem_props = unsafe {
        vk.instance
            .get_physical_device_memory_properties(vk.physical_device)
    };

    (0..mem_props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && mem_props.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}
