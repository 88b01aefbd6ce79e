//! 内存需求与分配
//!
//! `SimpleAllocator` 每次分配都是独立的 `VkDeviceMemory`，不做子分配。
//! memory type 的选择总是取满足条件的最低位，保证同样的驱动报告在每次运行中选择同一个 memory type。

use std::{ffi::c_void, ptr::NonNull, rc::Rc};

use ash::vk;
use bitflags::bitflags;

use crate::{
    error::{VktError, VktResult},
    handle::{Deleter, Move, check},
    interface::DeviceInterface,
};

bitflags! {
    /// 语义化的内存需求
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryRequirement: u32 {
        const ANY = 0;
        const HOST_VISIBLE = 1 << 0;
        const COHERENT = 1 << 1;
        const LAZY_ALLOCATION = 1 << 2;
        const PROTECTED = 1 << 3;
        const LOCAL = 1 << 4;
        const CACHED = 1 << 5;
        const NON_LOCAL = 1 << 6;
        const DEVICE_ADDRESS = 1 << 7;
        const DEVICE_ADDRESS_CAPTURE_REPLAY = 1 << 8;
    }
}

impl MemoryRequirement {
    /// 组合是否自洽
    ///
    /// - coherent 必须同时 host visible
    /// - host visible 与 lazily allocated 互斥
    /// - protected 与 host visible 互斥
    /// - local 与 non-local 互斥
    pub fn is_consistent(&self) -> bool {
        if self.contains(Self::COHERENT) && !self.contains(Self::HOST_VISIBLE) {
            return false;
        }
        if self.contains(Self::HOST_VISIBLE | Self::LAZY_ALLOCATION) {
            return false;
        }
        if self.contains(Self::PROTECTED | Self::HOST_VISIBLE) {
            return false;
        }
        if self.contains(Self::LOCAL | Self::NON_LOCAL) {
            return false;
        }
        true
    }

    /// memory type 的 property flags 是否满足需求
    pub fn matches_heap(&self, flags: vk::MemoryPropertyFlags) -> bool {
        if !self.is_consistent() {
            log::warn!("inconsistent memory requirement {:?}", self);
            return false;
        }

        let required = |req: Self, bit: vk::MemoryPropertyFlags| !self.contains(req) || flags.contains(bit);

        required(Self::HOST_VISIBLE, vk::MemoryPropertyFlags::HOST_VISIBLE)
            && required(Self::COHERENT, vk::MemoryPropertyFlags::HOST_COHERENT)
            && required(Self::LAZY_ALLOCATION, vk::MemoryPropertyFlags::LAZILY_ALLOCATED)
            && required(Self::LOCAL, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            && required(Self::CACHED, vk::MemoryPropertyFlags::HOST_CACHED)
            && !(self.contains(Self::NON_LOCAL) && flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL))
            // protected 内存只能在明确要求时使用
            && self.contains(Self::PROTECTED) == flags.contains(vk::MemoryPropertyFlags::PROTECTED)
    }
}

/// 所有满足需求的 memory type 组成的位掩码
pub fn get_compatible_memory_types(props: &vk::PhysicalDeviceMemoryProperties, requirement: MemoryRequirement) -> u32 {
    props.memory_types[..props.memory_type_count as usize]
        .iter()
        .enumerate()
        .filter(|(_, ty)| requirement.matches_heap(ty.property_flags))
        .fold(0u32, |bits, (idx, _)| bits | (1 << idx))
}

/// 取 `allowed_bits` 中满足需求的最低位
pub fn select_matching_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    allowed_bits: u32,
    requirement: MemoryRequirement,
) -> VktResult<u32> {
    let candidates = allowed_bits & get_compatible_memory_types(props, requirement);
    if candidates == 0 {
        return Err(VktError::not_supported(format!(
            "no matching memory type found for {:?} in bits {:#b}",
            requirement, allowed_bits
        )));
    }
    Ok(candidates.trailing_zeros())
}

/// 一段 `VkDeviceMemory`，unmap 与 free 都在 drop 中恰好执行一次
pub struct Allocation {
    device: Rc<dyn DeviceInterface>,
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    host_ptr: Option<NonNull<c_void>>,
}

// 构造与销毁
impl Allocation {
    fn new(
        device: Rc<dyn DeviceInterface>,
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
        host_ptr: Option<NonNull<c_void>>,
    ) -> Self {
        Self {
            device,
            memory,
            offset: 0,
            size,
            host_ptr,
        }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.host_ptr.take().is_some() {
            self.device.unmap_memory(self.memory);
        }
        self.device.free_memory(self.memory);
    }
}

// getters
impl Allocation {
    #[inline]
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    #[inline]
    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn is_host_visible(&self) -> bool {
        self.host_ptr.is_some()
    }

    /// 只有以 HOST_VISIBLE 分配的内存才有 host 指针
    pub fn host_ptr(&self) -> VktResult<NonNull<c_void>> {
        self.host_ptr
            .ok_or_else(|| VktError::internal("host pointer requested for an allocation without HOST_VISIBLE"))
    }
}

// tools
impl Allocation {
    fn mapped_range(&self) -> vk::MappedMemoryRange<'static> {
        vk::MappedMemoryRange::default().memory(self.memory).offset(self.offset).size(vk::WHOLE_SIZE)
    }

    pub fn flush_mapped_range(&self) -> VktResult<()> {
        self.host_ptr()?;
        self.device.flush_mapped_memory_ranges(&[self.mapped_range()])
    }

    pub fn invalidate_mapped_range(&self) -> VktResult<()> {
        self.host_ptr()?;
        self.device.invalidate_mapped_memory_ranges(&[self.mapped_range()])
    }
}

pub trait Allocator {
    /// 按原始的分配信息分配，不做 map
    fn allocate(&self, info: &vk::MemoryAllocateInfo<'_>, alignment: vk::DeviceSize) -> VktResult<Allocation>;

    /// 按内存需求分配，HOST_VISIBLE 时整体 map
    fn allocate_for(&self, reqs: &vk::MemoryRequirements, requirement: MemoryRequirement) -> VktResult<Allocation>;

    fn allocate_dedicated_buffer(&self, buffer: vk::Buffer, requirement: MemoryRequirement) -> VktResult<Allocation>;

    fn allocate_dedicated_image(&self, image: vk::Image, requirement: MemoryRequirement) -> VktResult<Allocation>;
}

/// 每次分配都是独立的 `VkDeviceMemory`
pub struct SimpleAllocator {
    device: Rc<dyn DeviceInterface>,
    mem_props: vk::PhysicalDeviceMemoryProperties,
}

impl SimpleAllocator {
    pub fn new(device: Rc<dyn DeviceInterface>, mem_props: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self { device, mem_props }
    }

    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.mem_props
    }

    fn allocate_impl(
        &self,
        reqs: &vk::MemoryRequirements,
        requirement: MemoryRequirement,
        dedicated: Option<&mut vk::MemoryDedicatedAllocateInfo<'_>>,
    ) -> VktResult<Allocation> {
        let memory_type_index = select_matching_memory_type(&self.mem_props, reqs.memory_type_bits, requirement)?;

        let mut flags_info = vk::MemoryAllocateFlagsInfo::default();
        if requirement.contains(MemoryRequirement::DEVICE_ADDRESS) {
            flags_info.flags |= vk::MemoryAllocateFlags::DEVICE_ADDRESS;
        }
        if requirement.contains(MemoryRequirement::DEVICE_ADDRESS_CAPTURE_REPLAY) {
            flags_info.flags |= vk::MemoryAllocateFlags::DEVICE_ADDRESS_CAPTURE_REPLAY;
        }

        let mut alloc_info =
            vk::MemoryAllocateInfo::default().allocation_size(reqs.size).memory_type_index(memory_type_index);
        if !flags_info.flags.is_empty() {
            alloc_info = alloc_info.push_next(&mut flags_info);
        }
        if let Some(dedicated) = dedicated {
            alloc_info = alloc_info.push_next(dedicated);
        }

        let memory = self.device.allocate_memory(&alloc_info)?;
        let host_ptr = if requirement.contains(MemoryRequirement::HOST_VISIBLE) {
            match self.device.map_memory(memory, 0, vk::WHOLE_SIZE) {
                Ok(ptr) => NonNull::new(ptr),
                Err(e) => {
                    self.device.free_memory(memory);
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Allocation::new(self.device.clone(), memory, reqs.size, host_ptr))
    }
}

impl Allocator for SimpleAllocator {
    fn allocate(&self, info: &vk::MemoryAllocateInfo<'_>, _alignment: vk::DeviceSize) -> VktResult<Allocation> {
        let memory = self.device.allocate_memory(info)?;
        Ok(Allocation::new(self.device.clone(), memory, info.allocation_size, None))
    }

    fn allocate_for(&self, reqs: &vk::MemoryRequirements, requirement: MemoryRequirement) -> VktResult<Allocation> {
        self.allocate_impl(reqs, requirement, None)
    }

    fn allocate_dedicated_buffer(&self, buffer: vk::Buffer, requirement: MemoryRequirement) -> VktResult<Allocation> {
        let reqs = self.device.get_buffer_memory_requirements(buffer);
        let mut dedicated = vk::MemoryDedicatedAllocateInfo::default().buffer(buffer);
        self.allocate_impl(&reqs, requirement, Some(&mut dedicated))
    }

    fn allocate_dedicated_image(&self, image: vk::Image, requirement: MemoryRequirement) -> VktResult<Allocation> {
        let reqs = self.device.get_image_memory_requirements(image);
        let mut dedicated = vk::MemoryDedicatedAllocateInfo::default().image(image);
        self.allocate_impl(&reqs, requirement, Some(&mut dedicated))
    }
}

#[inline]
pub fn bind_buffer_memory(vkd: &dyn DeviceInterface, buffer: vk::Buffer, allocation: &Allocation) -> VktResult<()> {
    vkd.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
}

#[inline]
pub fn bind_image_memory(vkd: &dyn DeviceInterface, image: vk::Image, allocation: &Allocation) -> VktResult<()> {
    vkd.bind_image_memory(image, allocation.memory(), allocation.offset())
}

/// buffer 与它的内存，先销毁 buffer 再释放内存
pub struct BufferWithMemory {
    buffer: Move<vk::Buffer>,
    allocation: Allocation,
}

impl BufferWithMemory {
    pub fn new(
        vkd: &Rc<dyn DeviceInterface>,
        allocator: &dyn Allocator,
        info: &vk::BufferCreateInfo<'_>,
        requirement: MemoryRequirement,
    ) -> VktResult<Self> {
        let buffer = Move::new(
            check(vkd.create_buffer(info)?)?,
            Deleter::device_child(vkd.clone(), |d, b| d.destroy_buffer(b)),
        );
        let reqs = vkd.get_buffer_memory_requirements(*buffer);
        let allocation = allocator.allocate_for(&reqs, requirement)?;
        bind_buffer_memory(vkd.as_ref(), *buffer, &allocation)?;
        Ok(Self { buffer, allocation })
    }

    #[inline]
    pub fn buffer(&self) -> vk::Buffer {
        *self.buffer
    }

    #[inline]
    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }
}

/// image 与它的内存，先销毁 image 再释放内存
pub struct ImageWithMemory {
    image: Move<vk::Image>,
    allocation: Allocation,
}

impl ImageWithMemory {
    pub fn new(
        vkd: &Rc<dyn DeviceInterface>,
        allocator: &dyn Allocator,
        info: &vk::ImageCreateInfo<'_>,
        requirement: MemoryRequirement,
    ) -> VktResult<Self> {
        let image = Move::new(
            check(vkd.create_image(info)?)?,
            Deleter::device_child(vkd.clone(), |d, i| d.destroy_image(i)),
        );
        let reqs = vkd.get_image_memory_requirements(*image);
        let allocation = allocator.allocate_for(&reqs, requirement)?;
        bind_image_memory(vkd.as_ref(), *image, &allocation)?;
        Ok(Self { image, allocation })
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        *self.image
    }

    #[inline]
    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }
}
