// Backend module - Vulkan abstraction layer
//
// Device/swapchain lifecycle plus the concrete GraphicsBackend the frame
// loop drives. Creation order: device -> swapchain -> depth/stencil ->
// command buffers; destruction runs in reverse.

pub mod depth;
pub mod device;
pub mod error;
pub mod memory;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use error::SetupError;
pub use swapchain::Swapchain;

use anyhow::{Context, Result};
use ash::vk;

use crate::config::Config;
use crate::engine::GraphicsBackend;

use depth::DepthStencilSurface;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.1, 0.2, 1.0];

/// Concrete Vulkan backend: one device, one swapchain, one depth/stencil
/// surface, and a pre-recorded clear pass per backbuffer.
pub struct VulkanBackend {
    device: VulkanDevice,
    swapchain: Swapchain,
    depth: DepthStencilSurface,
    /// One pre-recorded command buffer per swapchain image.
    draw_cmd_buffers: Vec<vk::CommandBuffer>,
    /// Image index acquired by begin_frame, consumed by draw/end_frame.
    current_image: Option<u32>,
    needs_resize: bool,
    wait_stages: [vk::PipelineStageFlags; 1],
}

impl VulkanBackend {
    pub fn new(window: &winit::window::Window, config: &Config) -> Result<Self> {
        let mut device =
            VulkanDevice::new(window, &config.window.title, config.debug.validation)?;

        let size = window.inner_size();
        let window_extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };

        let swapchain = Swapchain::new(&device, window_extent, config.graphics.backbuffers)?;
        let depth = DepthStencilSurface::new(&device, swapchain.extent)?;

        let draw_cmd_buffers = Self::record_draw_commands(&device, &swapchain)?;

        // Layout transitions queued during setup must land before rendering.
        device.flush_setup_commands()?;

        log::info!("Graphics backend initialized");
        Ok(Self {
            device,
            swapchain,
            depth,
            draw_cmd_buffers,
            current_image: None,
            needs_resize: false,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        })
    }

    /// Record one clear pass per swapchain image: transition to TRANSFER_DST,
    /// clear, transition to PRESENT_SRC.
    fn record_draw_commands(
        device: &VulkanDevice,
        swapchain: &Swapchain,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(device.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(swapchain.images.len() as u32);
        let cmd_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate draw command buffers")?;

        let clear_color = vk::ClearColorValue {
            float32: CLEAR_COLOR,
        };
        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        for (i, &cmd) in cmd_buffers.iter().enumerate() {
            let image = swapchain.images[i].image;

            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::builder();
                device
                    .device
                    .begin_command_buffer(cmd, &begin_info)
                    .context("Failed to begin draw command buffer")?;

                let barrier_to_transfer = vk::ImageMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(subresource_range)
                    .build();
                device.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier_to_transfer],
                );

                device.device.cmd_clear_color_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear_color,
                    &[subresource_range],
                );

                let barrier_to_present = vk::ImageMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::empty())
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(subresource_range)
                    .build();
                device.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier_to_present],
                );

                device
                    .device
                    .end_command_buffer(cmd)
                    .context("Failed to end draw command buffer")?;
            }
        }

        Ok(cmd_buffers)
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl GraphicsBackend for VulkanBackend {
    fn begin_frame(&mut self) -> Result<bool> {
        if self.needs_resize {
            log::debug!("Swapchain flagged for recreation, presenting anyway");
        }
        match self.swapchain.acquire_next_image(&self.device.device)? {
            Some(index) => {
                self.current_image = Some(index);
                Ok(true)
            }
            None => {
                self.needs_resize = true;
                Ok(false)
            }
        }
    }

    fn draw(&mut self) -> Result<()> {
        let image_index = self
            .current_image
            .context("draw called without begin_frame")?;
        let slot = self.swapchain.current_slot();

        let wait_semaphores = [slot.image_acquired];
        let signal_semaphores = [slot.draw_complete];
        let command_buffers = [self.draw_cmd_buffers[image_index as usize]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    slot.in_flight_fence,
                )
                .context("Failed to submit draw commands")?;
        }
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        let image_index = self
            .current_image
            .take()
            .context("end_frame called without begin_frame")?;
        let slot = self.swapchain.current_slot();

        // With a separate present family, chain draw-complete through the
        // ownership semaphore on the present queue.
        let mut present_wait = slot.draw_complete;
        if let Some(ownership) = slot.image_ownership {
            let wait_semaphores = [slot.draw_complete];
            let signal_semaphores = [ownership];
            let submit_info = vk::SubmitInfo::builder()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&self.wait_stages)
                .signal_semaphores(&signal_semaphores);
            unsafe {
                self.device
                    .device
                    .queue_submit(
                        self.device.present_queue,
                        &[submit_info.build()],
                        vk::Fence::null(),
                    )
                    .context("Failed to submit ownership transfer")?;
            }
            present_wait = ownership;
        }

        let presented =
            self.swapchain
                .present(self.device.present_queue, image_index, present_wait)?;
        if !presented {
            self.needs_resize = true;
        }

        self.swapchain.advance_frame();
        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) {
        // Swapchain recreation is deliberately out of scope; flag it so the
        // presentation engine's out-of-date reports are expected.
        log::info!("Window resized to {}x{}", width, height);
        self.needs_resize = true;
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        log::info!("Tearing down graphics backend...");
        // Drain in-flight frames before touching any resource.
        let _ = self.device.wait_idle();

        unsafe {
            self.device
                .device
                .free_command_buffers(self.device.command_pool, &self.draw_cmd_buffers);
        }
        self.depth.destroy(&self.device.device);
        self.swapchain.destroy(&self.device.device);
        // Device (pool, surface, instance) tears itself down last.
    }
}
