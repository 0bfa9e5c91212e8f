// Depth/stencil surface - one image + device-local memory + view, sized to
// the window. Recreated from scratch on resize (destroy, then new).

use anyhow::Result;
use ash::vk;

use super::device::VulkanDevice;
use super::error::SetupError;
use super::memory::{self, DeviceMemoryAllocation};

/// 24-bit depth with 8-bit stencil, packed.
pub const DEPTH_STENCIL_FORMAT: vk::Format = vk::Format::D24_UNORM_S8_UINT;

pub struct DepthStencilSurface {
    pub format: vk::Format,
    pub image: vk::Image,
    pub memory: DeviceMemoryAllocation,
    pub view: vk::ImageView,
}

impl DepthStencilSurface {
    pub fn new(device: &VulkanDevice, extent: vk::Extent2D) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DEPTH_STENCIL_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .map_err(SetupError::ImageCreationFailed)?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = memory::allocate(
            &device.device,
            &device.memory_properties,
            requirements,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        unsafe {
            device
                .device
                .bind_image_memory(image, allocation.handle, 0)
        }
        .map_err(SetupError::BindFailed)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_STENCIL_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { device.device.create_image_view(&view_info, None) }
            .map_err(SetupError::ImageCreationFailed)?;

        let surface = Self {
            format: DEPTH_STENCIL_FORMAT,
            image,
            memory: allocation,
            view,
        };
        surface.record_initial_transition(device);

        log::info!(
            "Depth/stencil surface created: {}x{} {:?}",
            extent.width,
            extent.height,
            DEPTH_STENCIL_FORMAT
        );
        Ok(surface)
    }

    /// Record the UNDEFINED -> DEPTH_STENCIL_ATTACHMENT_OPTIMAL transition
    /// into the open setup command buffer, if it is still recording.
    fn record_initial_transition(&self, device: &VulkanDevice) {
        let Some(cmd) = device.setup_cmd() else {
            return;
        };

        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        unsafe {
            device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Destroy view, then image, then free memory. The memory must outlive
    /// everything bound to it.
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory.handle, None);
        }
    }
}
