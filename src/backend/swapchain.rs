// Swapchain - surface negotiation and presentable image management
//
// Negotiates format/extent/present-mode against the surface capabilities,
// owns the per-image views and fences plus the per-slot semaphore sets, and
// rotates the frame index that paces CPU/GPU overlap.

use anyhow::{Context, Result};
use ash::vk;

use super::device::VulkanDevice;
use super::error::SetupError;
use super::sync::FrameSlotSync;

/// Fallback when the surface reports no format preference.
pub const DEFAULT_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// Resolve the surface format. A single UNDEFINED entry means the surface
/// has no preference, so the default BGRA format is used with the reported
/// color space. Otherwise an sRGB BGRA entry wins regardless of position,
/// then plain BGRA, then the default.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        log::info!("Surface has no preferred format, using BGRA8");
        return vk::SurfaceFormatKHR {
            format: DEFAULT_FORMAT,
            color_space: formats[0].color_space,
        };
    }

    if let Some(srgb) = formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB)
    {
        log::info!("Using BGRA8 sRGB surface format");
        return *srgb;
    }

    if let Some(unorm) = formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
    {
        return *unorm;
    }

    vk::SurfaceFormatKHR {
        format: DEFAULT_FORMAT,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }
}

/// Clamp the requested back-buffer count into the surface's supported range.
/// A max of 0 means the surface imposes no upper bound.
pub fn clamp_backbuffer_count(requested: u32, min_count: u32, max_count: u32) -> u32 {
    let mut count = requested.max(min_count);
    if max_count > 0 && count > max_count {
        count = max_count;
    }
    count
}

/// Resolve the swapchain extent. When the surface reports the undefined-size
/// sentinel the window extent is clamped into the supported range; otherwise
/// the window must fit within the surface's current extent.
pub fn resolve_extent(
    window_extent: vk::Extent2D,
    caps: &vk::SurfaceCapabilitiesKHR,
) -> Result<vk::Extent2D, SetupError> {
    if caps.current_extent.width == u32::MAX {
        return Ok(vk::Extent2D {
            width: window_extent.width.clamp(
                caps.min_image_extent.width,
                caps.max_image_extent.width,
            ),
            height: window_extent.height.clamp(
                caps.min_image_extent.height,
                caps.max_image_extent.height,
            ),
        });
    }

    if caps.current_extent.width < window_extent.width
        || caps.current_extent.height < window_extent.height
    {
        return Err(SetupError::UnsupportedExtent {
            width: window_extent.width,
            height: window_extent.height,
        });
    }

    Ok(window_extent)
}

/// Identity transform when supported, else whatever the surface is using.
pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// One frame-pacing step. The fence wait must complete before the acquire
/// semaphore is reused, and the fence is reset only once an image is actually
/// handed out so a skipped frame leaves the slot ready to retry.
fn pace_acquire<W, A, R>(wait_fence: W, acquire: A, reset_fence: R) -> Result<Option<u32>>
where
    W: FnOnce() -> Result<()>,
    A: FnOnce() -> Result<Option<u32>>,
    R: FnOnce() -> Result<()>,
{
    wait_fence()?;
    let Some(image_index) = acquire()? else {
        return Ok(None);
    };
    reset_fence()?;
    Ok(Some(image_index))
}

/// One presentable image. The image handle is owned by the swapchain; the
/// view and fence are ours to destroy.
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub fence: vk::Fence,
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub loader: ash::extensions::khr::Swapchain,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<SwapchainImage>,
    /// Per-back-buffer-slot synchronization, indexed by `frame_index`.
    pub slots: Vec<FrameSlotSync>,
    pub frame_index: usize,
}

impl Swapchain {
    pub fn new(
        device: &VulkanDevice,
        window_extent: vk::Extent2D,
        desired_backbuffers: u32,
    ) -> Result<Self> {
        let formats = unsafe {
            device.surface_loader.get_physical_device_surface_formats(
                device.physical_device,
                device.surface,
            )
        }
        .map_err(SetupError::SurfaceFormatQueryFailed)?;
        if formats.is_empty() {
            return Err(SetupError::SurfaceFormatQueryFailed(
                vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            )
            .into());
        }
        let surface_format = choose_surface_format(&formats);

        let caps = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, device.surface)
        }
        .context("Failed to query surface capabilities")?;

        let num_backbuffers =
            clamp_backbuffer_count(desired_backbuffers, caps.min_image_count, caps.max_image_count);
        if num_backbuffers != desired_backbuffers {
            log::warn!(
                "Surface limits back buffers to [{}, {}], using {} instead of {}",
                caps.min_image_count,
                caps.max_image_count,
                num_backbuffers,
                desired_backbuffers
            );
        }

        let extent = resolve_extent(window_extent, &caps)?;

        // FIFO is vsync-locked and treated as always available; the reported
        // list is only consulted for the log.
        let present_modes = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, device.surface)
        }
        .context("Failed to query present modes")?;
        let present_mode = vk::PresentModeKHR::FIFO;
        if present_modes.contains(&present_mode) {
            log::info!("Found desired present mode FIFO");
        }

        let pre_transform = choose_pre_transform(&caps);

        log::info!(
            "Creating swapchain: {}x{}, {} back buffers, {:?}",
            extent.width,
            extent.height,
            num_backbuffers,
            surface_format.format
        );

        let loader = ash::extensions::khr::Swapchain::new(&device.instance, &device.device);
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(num_backbuffers)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(SetupError::SwapchainCreationFailed)?;

        let raw_images = unsafe { loader.get_swapchain_images(handle) }
            .context("Failed to retrieve swapchain images")?;
        log::info!("Swapchain delivered {} images", raw_images.len());

        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let mut images = Vec::with_capacity(raw_images.len());
        for &image in &raw_images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { device.device.create_image_view(&view_info, None) }
                .context("Failed to create swapchain image view")?;
            let fence = unsafe { device.device.create_fence(&fence_info, None) }
                .context("Failed to create swapchain image fence")?;
            images.push(SwapchainImage { image, view, fence });
        }

        let slots = (0..num_backbuffers)
            .map(|_| FrameSlotSync::new(&device.device, device.queues.separate_present))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            handle,
            loader,
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode,
            extent,
            images,
            slots,
            frame_index: 0,
        })
    }

    pub fn current_slot(&self) -> &FrameSlotSync {
        &self.slots[self.frame_index]
    }

    /// Acquire the next presentable image. The slot fence is waited first:
    /// the previous submission on this slot waited on `image_acquired`, and
    /// that wait must have retired before the semaphore can be handed back to
    /// the presentation engine. Returns None when the swapchain is out of
    /// date and the frame should be skipped.
    pub fn acquire_next_image(&self, device: &ash::Device) -> Result<Option<u32>> {
        let slot = self.current_slot();

        pace_acquire(
            || unsafe {
                device
                    .wait_for_fences(&[slot.in_flight_fence], true, u64::MAX)
                    .context("Failed waiting on frame fence")
            },
            || {
                let acquired = unsafe {
                    self.loader.acquire_next_image(
                        self.handle,
                        u64::MAX,
                        slot.image_acquired,
                        vk::Fence::null(),
                    )
                };
                match acquired {
                    Ok((index, suboptimal)) => {
                        if suboptimal {
                            log::debug!("Swapchain suboptimal on acquire");
                        }
                        Ok(Some(index))
                    }
                    Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                        log::warn!("Swapchain out of date on acquire, skipping frame");
                        Ok(None)
                    }
                    Err(e) => Err(e).context("Failed to acquire swapchain image"),
                }
            },
            || unsafe {
                device
                    .reset_fences(&[slot.in_flight_fence])
                    .context("Failed resetting frame fence")
            },
        )
    }

    /// Present `image_index`, waiting on `wait_semaphore`. Returns false when
    /// the swapchain went out of date (frame still counts as presented).
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };
        match result {
            Ok(suboptimal) => Ok(!suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date on present");
                Ok(false)
            }
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }

    /// Rotate to the next back-buffer slot.
    pub fn advance_frame(&mut self) {
        self.frame_index = (self.frame_index + 1) % self.slots.len();
    }

    /// Destroy everything in reverse creation order. Views over swapchain
    /// images must go before the swapchain, and all of it before the surface.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for slot in &self.slots {
                slot.destroy(device);
            }
            for image in &self.images {
                device.destroy_image_view(image.view, None);
                device.destroy_fence(image.fence, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
        self.images.clear();
        self.slots.clear();
    }
}
