// Vulkan device - instance, adapter selection, logical device and queues
//
// Responsibilities:
// - Instance creation with optional validation layer
// - Physical device selection (type buckets, API version tie-break,
//   battery-aware discrete vs. integrated choice)
// - Logical device + graphics/present queue creation
// - Command pool and the open setup command buffer

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};

use crate::power::{system_battery_status, PowerStatus};

use super::error::SetupError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Resolved queue family roles. Both indices are always valid; they are equal
/// unless `separate_present` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAssignment {
    pub graphics_family: u32,
    pub present_family: u32,
    pub separate_present: bool,
}

/// Capability summary for one queue family, as seen against our surface.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyInfo {
    pub graphics: bool,
    pub present: bool,
}

/// Pick queue families: the first family supporting both graphics and present
/// wins outright; otherwise the first graphics-capable and first
/// present-capable families are paired up.
pub fn assign_queues(families: &[QueueFamilyInfo]) -> Result<QueueAssignment, SetupError> {
    let mut graphics_family = None;
    let mut present_family = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if family.graphics && family.present {
            return Ok(QueueAssignment {
                graphics_family: index,
                present_family: index,
                separate_present: false,
            });
        }
        if family.graphics && graphics_family.is_none() {
            graphics_family = Some(index);
        }
        if family.present && present_family.is_none() {
            present_family = Some(index);
        }
    }

    match (graphics_family, present_family) {
        (Some(graphics), Some(present)) => Ok(QueueAssignment {
            graphics_family: graphics,
            present_family: present,
            separate_present: true,
        }),
        _ => Err(SetupError::NoSuitableQueueFamily),
    }
}

/// Selection-relevant properties of one enumerated physical device.
#[derive(Debug, Clone, Copy)]
pub struct AdapterInfo {
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
}

/// Which of two adapters to prefer (0 or 1). Discrete beats integrated when
/// the types differ; otherwise the higher API version wins, major compared
/// before minor. Equal versions resolve to slot 1.
pub fn compare_gpus(gpu_0: &AdapterInfo, gpu_1: &AdapterInfo) -> usize {
    if gpu_0.device_type != gpu_1.device_type {
        if gpu_0.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            return 0;
        } else if gpu_1.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            return 1;
        } else if gpu_0.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            return 0;
        } else if gpu_1.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            return 1;
        }
    }

    let major_0 = vk::api_version_major(gpu_0.api_version);
    let major_1 = vk::api_version_major(gpu_1.api_version);
    if major_0 != major_1 {
        return if major_0 > major_1 { 0 } else { 1 };
    }
    if vk::api_version_minor(gpu_0.api_version) > vk::api_version_minor(gpu_1.api_version) {
        0
    } else {
        1
    }
}

/// Choose an adapter index from the enumerated list.
///
/// Adapters are bucketed into per-type "best so far" slots. When both a
/// discrete and an integrated candidate exist, a draining battery tips the
/// choice to integrated for power savings; otherwise discrete > integrated >
/// virtual.
pub fn pick_adapter(adapters: &[AdapterInfo], power: PowerStatus) -> Option<usize> {
    let mut best_integrated: Option<usize> = None;
    let mut best_discrete: Option<usize> = None;
    let mut best_virtual: Option<usize> = None;

    for (index, adapter) in adapters.iter().enumerate() {
        let slot = match adapter.device_type {
            vk::PhysicalDeviceType::INTEGRATED_GPU => {
                log::info!("Integrated GPU found");
                &mut best_integrated
            }
            vk::PhysicalDeviceType::DISCRETE_GPU => {
                log::info!("Discrete GPU found");
                &mut best_discrete
            }
            vk::PhysicalDeviceType::VIRTUAL_GPU => {
                log::info!("Virtual GPU found");
                &mut best_virtual
            }
            other => {
                log::info!("Unranked device type {:?} found", other);
                continue;
            }
        };
        match *slot {
            Some(best) if compare_gpus(&adapters[best], adapter) == 0 => {}
            _ => *slot = Some(index),
        }
    }

    match (best_discrete, best_integrated) {
        (Some(discrete), Some(integrated)) => {
            if power.is_discharging() {
                log::info!("On battery ({:?}), preferring integrated GPU", power);
                Some(integrated)
            } else {
                Some(discrete)
            }
        }
        (Some(discrete), None) => Some(discrete),
        (None, Some(integrated)) => Some(integrated),
        (None, None) => best_virtual,
    }
}

/// Vulkan device wrapper. Owns the instance, logical device, queues and the
/// command pool; destroyed in reverse creation order on drop.
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queues: QueueAssignment,

    pub command_pool: vk::CommandPool,
    setup_cmd: vk::CommandBuffer,
    setup_cmd_recording: bool,

    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    pub fn new(
        window: &winit::window::Window,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<Self> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let display_handle = window.raw_display_handle();
        let window_handle = window.raw_window_handle();

        let instance = Self::create_instance(&entry, app_name, display_handle, enable_validation)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let physical_device = Self::pick_physical_device(&instance)?;
        Self::check_swapchain_support(&instance, physical_device)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);

        let queues = Self::resolve_queue_families(
            &instance,
            &surface_loader,
            physical_device,
            surface,
        )?;
        if queues.separate_present {
            log::info!(
                "Using separate graphics ({}) and present ({}) queue families",
                queues.graphics_family,
                queues.present_family
            );
        }

        let device = Self::create_logical_device(&instance, physical_device, queues)?;

        let graphics_queue = unsafe { device.get_device_queue(queues.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(queues.present_family, 0) };

        let (command_pool, setup_cmd) = Self::create_command_pool(&device, queues)?;

        Ok(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            graphics_queue,
            present_queue,
            queues,
            command_pool,
            setup_cmd,
            setup_cmd_recording: true,
            debug_utils,
            properties,
            memory_properties,
        })
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display_handle: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("Prism Engine")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("No supported surface extensions for this display")?
            .to_vec();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger =
            unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        let adapters: Vec<AdapterInfo> = devices
            .iter()
            .map(|&device| {
                let props = unsafe { instance.get_physical_device_properties(device) };
                AdapterInfo {
                    device_type: props.device_type,
                    api_version: props.api_version,
                }
            })
            .collect();

        let chosen = pick_adapter(&adapters, system_battery_status())
            .ok_or(SetupError::NoDeviceFound)?;
        Ok(devices[chosen])
    }

    fn check_swapchain_support(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<(), SetupError> {
        let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .map_err(SetupError::DeviceCreationFailed)?;

        let swapchain_name = ash::extensions::khr::Swapchain::name();
        let found = available.iter().any(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == swapchain_name
        });
        if !found {
            return Err(SetupError::MissingSwapchainExtension(
                "VK_KHR_swapchain",
            ));
        }
        Ok(())
    }

    fn resolve_queue_families(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<QueueAssignment> {
        let family_props =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let mut families = Vec::with_capacity(family_props.len());
        for (index, props) in family_props.iter().enumerate() {
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(
                    physical_device,
                    index as u32,
                    surface,
                )
            }
            .context("Failed to query surface support")?;
            families.push(QueueFamilyInfo {
                graphics: props.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present,
            });
        }

        Ok(assign_queues(&families)?)
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queues: QueueAssignment,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queues.graphics_family)
            .queue_priorities(&queue_priorities)
            .build()];
        if queues.separate_present {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(queues.present_family)
                    .queue_priorities(&queue_priorities)
                    .build(),
            );
        }

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .map_err(SetupError::DeviceCreationFailed)?;

        Ok(device)
    }

    fn create_command_pool(
        device: &ash::Device,
        queues: QueueAssignment,
    ) -> Result<(vk::CommandPool, vk::CommandBuffer)> {
        let pool_info =
            vk::CommandPoolCreateInfo::builder().queue_family_index(queues.graphics_family);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let setup_cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate setup command buffer")?[0];

        // Resource setup (layout transitions etc.) records into this buffer
        // until it is flushed before the first frame.
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { device.begin_command_buffer(setup_cmd, &begin_info) }
            .context("Failed to begin setup command buffer")?;

        Ok((command_pool, setup_cmd))
    }

    /// The open setup command buffer, for one-time initialization commands.
    pub fn setup_cmd(&self) -> Option<vk::CommandBuffer> {
        self.setup_cmd_recording.then_some(self.setup_cmd)
    }

    /// End and submit the setup command buffer, waiting for completion.
    /// Safe to call more than once; later calls are no-ops.
    pub fn flush_setup_commands(&mut self) -> Result<()> {
        if !self.setup_cmd_recording {
            return Ok(());
        }
        self.setup_cmd_recording = false;

        unsafe {
            self.device
                .end_command_buffer(self.setup_cmd)
                .context("Failed to end setup command buffer")?;

            let command_buffers = [self.setup_cmd];
            let submit_info = vk::SubmitInfo::builder()
                .command_buffers(&command_buffers)
                .build();
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], vk::Fence::null())
                .context("Failed to submit setup command buffer")?;
            self.device
                .queue_wait_idle(self.graphics_queue)
                .context("Failed to wait for setup commands")?;
        }
        log::debug!("Setup command buffer flushed");
        Ok(())
    }

    /// Wait for the device to go idle (e.g. before teardown).
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");
        let _ = self.wait_idle();

        unsafe {
            if self.setup_cmd_recording {
                let _ = self.device.end_command_buffer(self.setup_cmd);
            }
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);

            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(device_type: vk::PhysicalDeviceType, major: u32, minor: u32) -> AdapterInfo {
        AdapterInfo {
            device_type,
            api_version: vk::make_api_version(0, major, minor, 0),
        }
    }

    #[test]
    fn combined_queue_family_wins() {
        let families = [QueueFamilyInfo {
            graphics: true,
            present: true,
        }];
        let assignment = assign_queues(&families).unwrap();
        assert_eq!(assignment.graphics_family, 0);
        assert_eq!(assignment.present_family, 0);
        assert!(!assignment.separate_present);
    }

    #[test]
    fn split_queue_families_pair_up() {
        let families = [
            QueueFamilyInfo {
                graphics: true,
                present: false,
            },
            QueueFamilyInfo {
                graphics: false,
                present: true,
            },
        ];
        let assignment = assign_queues(&families).unwrap();
        assert_eq!(assignment.graphics_family, 0);
        assert_eq!(assignment.present_family, 1);
        assert!(assignment.separate_present);
    }

    #[test]
    fn later_combined_family_preferred_over_split_pair() {
        let families = [
            QueueFamilyInfo {
                graphics: true,
                present: false,
            },
            QueueFamilyInfo {
                graphics: true,
                present: true,
            },
        ];
        let assignment = assign_queues(&families).unwrap();
        assert_eq!(assignment.graphics_family, 1);
        assert!(!assignment.separate_present);
    }

    #[test]
    fn missing_role_is_an_error() {
        let graphics_only = [QueueFamilyInfo {
            graphics: true,
            present: false,
        }];
        assert!(matches!(
            assign_queues(&graphics_only),
            Err(SetupError::NoSuitableQueueFamily)
        ));
        assert!(matches!(
            assign_queues(&[]),
            Err(SetupError::NoSuitableQueueFamily)
        ));
    }

    #[test]
    fn higher_major_version_wins() {
        let a = adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 2, 0);
        let b = adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 3);
        assert_eq!(compare_gpus(&a, &b), 0);
        assert_eq!(compare_gpus(&b, &a), 1);
    }

    #[test]
    fn minor_version_breaks_major_ties() {
        let a = adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 2);
        let b = adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 1);
        assert_eq!(compare_gpus(&a, &b), 0);
        assert_eq!(compare_gpus(&b, &a), 1);
    }

    #[test]
    fn equal_versions_resolve_to_slot_one() {
        let a = adapter(vk::PhysicalDeviceType::INTEGRATED_GPU, 1, 1);
        let b = adapter(vk::PhysicalDeviceType::INTEGRATED_GPU, 1, 1);
        assert_eq!(compare_gpus(&a, &b), 1);
    }

    #[test]
    fn discrete_type_outranks_version() {
        let discrete = adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 0);
        let integrated = adapter(vk::PhysicalDeviceType::INTEGRATED_GPU, 1, 3);
        assert_eq!(compare_gpus(&discrete, &integrated), 0);
        assert_eq!(compare_gpus(&integrated, &discrete), 1);
    }

    #[test]
    fn discrete_preferred_on_mains_power() {
        let adapters = [
            adapter(vk::PhysicalDeviceType::INTEGRATED_GPU, 1, 1),
            adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 0),
        ];
        assert_eq!(pick_adapter(&adapters, PowerStatus::None), Some(1));
        assert_eq!(pick_adapter(&adapters, PowerStatus::Charging), Some(1));
    }

    #[test]
    fn integrated_preferred_on_battery() {
        let adapters = [
            adapter(vk::PhysicalDeviceType::INTEGRATED_GPU, 1, 1),
            adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 0),
        ];
        assert_eq!(
            pick_adapter(&adapters, PowerStatus::DischargingLow),
            Some(0)
        );
        assert_eq!(
            pick_adapter(&adapters, PowerStatus::DischargingHigh),
            Some(0)
        );
    }

    #[test]
    fn best_in_category_is_kept() {
        let adapters = [
            adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 0),
            adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 2),
            adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 1),
        ];
        assert_eq!(pick_adapter(&adapters, PowerStatus::None), Some(1));
    }

    #[test]
    fn virtual_gpu_is_last_resort() {
        let adapters = [adapter(vk::PhysicalDeviceType::VIRTUAL_GPU, 1, 0)];
        assert_eq!(pick_adapter(&adapters, PowerStatus::None), Some(0));
    }

    #[test]
    fn cpu_and_other_types_are_never_chosen() {
        let adapters = [
            adapter(vk::PhysicalDeviceType::CPU, 1, 0),
            adapter(vk::PhysicalDeviceType::OTHER, 1, 0),
        ];
        assert_eq!(pick_adapter(&adapters, PowerStatus::None), None);
        assert_eq!(pick_adapter(&[], PowerStatus::None), None);
    }
}
