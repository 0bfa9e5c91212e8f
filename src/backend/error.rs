// Setup failure taxonomy. Every setup-phase operation reports one of these;
// the caller logs it and aborts startup. Per-frame conditions (out-of-date
// swapchain) are not errors and are signalled separately.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no Vulkan-capable GPU of any kind found")]
    NoDeviceFound,

    #[error("no queue family provides graphics and/or present support")]
    NoSuitableQueueFamily,

    #[error("physical device does not support {0}")]
    MissingSwapchainExtension(&'static str),

    #[error("device creation failed: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("no memory type matches bits {type_bits:#x} with flags {flags:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("device memory allocation of {size} bytes failed: {result}")]
    AllocationFailed { size: u64, result: vk::Result },

    #[error("surface format query failed: {0}")]
    SurfaceFormatQueryFailed(vk::Result),

    #[error("surface does not support swapchains of {width}x{height}")]
    UnsupportedExtent { width: u32, height: u32 },

    #[error("swapchain creation failed: {0}")]
    SwapchainCreationFailed(vk::Result),

    #[error("image creation failed: {0}")]
    ImageCreationFailed(vk::Result),

    #[error("binding image memory failed: {0}")]
    BindFailed(vk::Result),
}
