// Synchronization primitives
//
// One FrameSlotSync per back-buffer slot: semaphores order GPU work
// (acquire -> draw -> present), the fence throttles the CPU when it gets
// ahead of the presentation engine.

use anyhow::Result;
use ash::vk;

pub struct FrameSlotSync {
    pub image_acquired: vk::Semaphore,
    pub draw_complete: vk::Semaphore,
    /// Present-queue ownership transfer; only when graphics and present live
    /// on different queue families.
    pub image_ownership: Option<vk::Semaphore>,
    pub in_flight_fence: vk::Fence,
}

impl FrameSlotSync {
    pub fn new(device: &ash::Device, separate_present: bool) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Fences start signaled so the first wait on each slot passes.
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_acquired: device.create_semaphore(&semaphore_info, None)?,
                draw_complete: device.create_semaphore(&semaphore_info, None)?,
                image_ownership: if separate_present {
                    Some(device.create_semaphore(&semaphore_info, None)?)
                } else {
                    None
                },
                in_flight_fence: device.create_fence(&fence_info, None)?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_acquired, None);
            device.destroy_semaphore(self.draw_complete, None);
            if let Some(ownership) = self.image_ownership {
                device.destroy_semaphore(ownership, None);
            }
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
