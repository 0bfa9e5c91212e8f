// Device memory allocator
//
// Finds a memory type satisfying the requested property flags and backs
// image/buffer resources with a single vkAllocateMemory call.

use ash::vk;

use super::error::SetupError;

/// Platform cap on the number of memory-type slots.
const MAX_MEMORY_TYPES: u32 = vk::MAX_MEMORY_TYPES as u32;

/// One device-memory allocation, recorded with the parameters that produced it.
pub struct DeviceMemoryAllocation {
    pub handle: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub memory_type_index: u32,
}

/// Scan the memory types for the lowest index that is enabled in `type_bits`
/// and whose property flags are a superset of `desired_flags`.
///
/// The bitmask is shifted right each iteration so bit 0 always refers to the
/// slot currently under test.
pub fn find_memory_type_index(
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    mut type_bits: u32,
    desired_flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    for mem_type in 0..MAX_MEMORY_TYPES {
        if type_bits & 0x1 != 0
            && mem_props.memory_types[mem_type as usize]
                .property_flags
                .contains(desired_flags)
        {
            return Some(mem_type);
        }
        type_bits >>= 1;
    }
    None
}

/// Allocate `requirements.size` bytes from a memory type matching both the
/// requirement bitmask and the desired property flags.
pub fn allocate(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    requirements: vk::MemoryRequirements,
    desired_flags: vk::MemoryPropertyFlags,
) -> Result<DeviceMemoryAllocation, SetupError> {
    let memory_type_index =
        find_memory_type_index(mem_props, requirements.memory_type_bits, desired_flags).ok_or(
            SetupError::NoSuitableMemoryType {
                type_bits: requirements.memory_type_bits,
                flags: desired_flags,
            },
        )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let handle = unsafe { device.allocate_memory(&alloc_info, None) }.map_err(|result| {
        SetupError::AllocationFailed {
            size: requirements.size,
            result,
        }
    })?;

    log::debug!(
        "Allocated {} bytes from memory type {}",
        requirements.size,
        memory_type_index
    );

    Ok(DeviceMemoryAllocation {
        handle,
        size: requirements.size,
        memory_type_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props_with(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = f;
        }
        props
    }

    #[test]
    fn picks_lowest_matching_index() {
        let props = props_with(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        let found =
            find_memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(found, Some(1));
    }

    #[test]
    fn respects_requirement_bitmask() {
        let props = props_with(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        // Type 0 matches the flags but is excluded by the bitmask.
        let found =
            find_memory_type_index(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(found, Some(1));
    }

    #[test]
    fn requires_flag_superset() {
        let props = props_with(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type_index(&props, 0b11, wanted), Some(1));
    }

    #[test]
    fn fails_when_nothing_matches() {
        let props = props_with(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        let found =
            find_memory_type_index(&props, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(found, None);
    }

    #[test]
    fn empty_bitmask_never_matches() {
        let props = props_with(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let found = find_memory_type_index(&props, 0, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(found, None);
    }
}
