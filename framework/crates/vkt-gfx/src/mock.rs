//! 内存中的确定性 vulkan 驱动
//!
//! 实现三层 dispatch 接口，所有 handle 来自一个递增计数器。
//! 驱动记录 instance / device 的创建参数以及每一个存活的对象，供测试断言。

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    ffi::{CStr, c_void},
    rc::Rc,
};

use ash::vk::{self, Handle};
use itertools::Itertools;

use crate::{
    device_features::{FeatureStruct, FeaturesVar},
    device_properties::{PropertiesVar, PropertyStruct},
    error::{VktError, VktResult},
    interface::{DeviceInterface, InstanceInterface, PlatformInterface},
    query::string_to_c_chars,
};

/// 驱动报告的能力
#[derive(Clone, Debug)]
pub struct MockDriverConfig {
    pub instance_version: u32,
    pub device_api_version: u32,
    pub instance_extensions: Vec<(String, u32)>,
    pub instance_layers: Vec<String>,
    pub device_extensions: Vec<(String, u32)>,
    pub physical_device_count: u32,
    pub device_name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub memory_types: Vec<(vk::MemoryPropertyFlags, u32)>,
    pub memory_heaps: Vec<(vk::DeviceSize, vk::MemoryHeapFlags)>,
    /// 超过该大小的分配返回 `ERROR_OUT_OF_DEVICE_MEMORY`
    pub max_allocation_size: vk::DeviceSize,
    pub core_features: vk::PhysicalDeviceFeatures,
    /// 查询时按 sType 填入链表，不在列表中的结构体保持零值
    pub features: Vec<FeaturesVar>,
    pub properties: Vec<PropertiesVar>,
}

fn ext(name: &str, spec_version: u32) -> (String, u32) {
    (name.to_string(), spec_version)
}

impl Default for MockDriverConfig {
    fn default() -> Self {
        Self {
            instance_version: vk::API_VERSION_1_3,
            device_api_version: vk::API_VERSION_1_3,
            instance_extensions: vec![
                ext("VK_KHR_get_physical_device_properties2", 2),
                ext("VK_EXT_debug_utils", 2),
                ext("VK_KHR_surface", 25),
            ],
            instance_layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            device_extensions: vec![
                ext("VK_KHR_swapchain", 70),
                ext("VK_KHR_timeline_semaphore", 2),
                ext("VK_KHR_vulkan_memory_model", 3),
                ext("VK_KHR_buffer_device_address", 1),
                ext("VK_EXT_buffer_device_address", 2),
                ext("VK_EXT_extended_dynamic_state", 1),
                ext("VK_EXT_robustness2", 1),
            ],
            physical_device_count: 1,
            device_name: "VKT Mock Device".to_string(),
            vendor_id: 0x1234,
            device_id: 0x5678,
            queue_families: vec![
                vk::QueueFamilyProperties::default()
                    .queue_flags(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)
                    .queue_count(4)
                    .timestamp_valid_bits(64),
                vk::QueueFamilyProperties::default()
                    .queue_flags(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)
                    .queue_count(2)
                    .timestamp_valid_bits(64),
                vk::QueueFamilyProperties::default().queue_flags(vk::QueueFlags::TRANSFER).queue_count(1),
            ],
            memory_types: vec![
                (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
                (vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT, 1),
                (
                    vk::MemoryPropertyFlags::DEVICE_LOCAL
                        | vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                    0,
                ),
                (
                    vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT
                        | vk::MemoryPropertyFlags::HOST_CACHED,
                    1,
                ),
                (vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::PROTECTED, 0),
            ],
            memory_heaps: vec![(4 << 30, vk::MemoryHeapFlags::DEVICE_LOCAL), (8 << 30, vk::MemoryHeapFlags::empty())],
            max_allocation_size: 256 << 20,
            core_features: vk::PhysicalDeviceFeatures::default()
                .robust_buffer_access(true)
                .geometry_shader(true)
                .tessellation_shader(true)
                .sampler_anisotropy(true)
                .shader_int64(true)
                .fill_mode_non_solid(true),
            features: vec![
                vk::PhysicalDeviceVulkan11Features::default().multiview(true).shader_draw_parameters(true).into_var(),
                vk::PhysicalDeviceVulkan12Features::default()
                    .timeline_semaphore(true)
                    .buffer_device_address(true)
                    .host_query_reset(true)
                    .vulkan_memory_model(true)
                    .shader_float16(true)
                    .into_var(),
                vk::PhysicalDeviceVulkan13Features::default()
                    .dynamic_rendering(true)
                    .synchronization2(true)
                    .maintenance4(true)
                    .into_var(),
                vk::PhysicalDeviceMultiviewFeatures::default().multiview(true).into_var(),
                vk::PhysicalDeviceShaderDrawParametersFeatures::default().shader_draw_parameters(true).into_var(),
                vk::PhysicalDeviceTimelineSemaphoreFeatures::default().timeline_semaphore(true).into_var(),
                vk::PhysicalDeviceBufferDeviceAddressFeatures::default().buffer_device_address(true).into_var(),
                vk::PhysicalDeviceHostQueryResetFeatures::default().host_query_reset(true).into_var(),
                vk::PhysicalDeviceVulkanMemoryModelFeatures::default().vulkan_memory_model(true).into_var(),
                vk::PhysicalDeviceShaderFloat16Int8Features::default().shader_float16(true).into_var(),
                vk::PhysicalDeviceDynamicRenderingFeatures::default().dynamic_rendering(true).into_var(),
                vk::PhysicalDeviceSynchronization2Features::default().synchronization2(true).into_var(),
                vk::PhysicalDeviceMaintenance4Features::default().maintenance4(true).into_var(),
                vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::default().extended_dynamic_state(true).into_var(),
                vk::PhysicalDeviceRobustness2FeaturesEXT::default().null_descriptor(true).into_var(),
            ],
            properties: vec![
                vk::PhysicalDeviceVulkan11Properties::default().subgroup_size(32).max_multiview_view_count(6).into_var(),
                vk::PhysicalDeviceTimelineSemaphoreProperties::default()
                    .max_timeline_semaphore_value_difference(u64::MAX >> 1)
                    .into_var(),
                vk::PhysicalDeviceSubgroupProperties::default().subgroup_size(32).into_var(),
            ],
        }
    }
}

/// 一次 `vkCreateDevice` 的参数快照
#[derive(Clone, Debug, Default)]
pub struct RecordedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
    /// `(family, priorities)`
    pub queue_infos: Vec<(u32, Vec<f32>)>,
    pub p_next_stypes: Vec<vk::StructureType>,
    /// `pEnabledFeatures`
    pub enabled_features: Option<vk::PhysicalDeviceFeatures>,
    /// 链上的 feature 结构体的拷贝，`VkPhysicalDeviceFeatures2` 也在其中
    pub chained_features: Vec<FeaturesVar>,
}

impl RecordedDevice {
    pub fn feature<T: FeatureStruct>(&self) -> Option<T> {
        self.chained_features.iter().find_map(T::from_var).copied()
    }

    /// `VkPhysicalDeviceFeatures2::features`
    pub fn features2(&self) -> Option<vk::PhysicalDeviceFeatures> {
        self.feature::<vk::PhysicalDeviceFeatures2>().map(|f| f.features)
    }
}

/// 驱动的全部可观察状态
#[derive(Debug, Default)]
pub struct MockState {
    pub instances_created: u32,
    pub instances_destroyed: u32,
    pub last_instance_api_version: u32,
    pub last_instance_extensions: Vec<String>,
    pub last_instance_layers: Vec<String>,
    pub validation_enabled: bool,

    pub devices_created: u32,
    pub devices_destroyed: u32,
    pub last_device: Option<RecordedDevice>,

    /// 存活的 device 子对象
    pub live_objects: BTreeMap<u64, vk::ObjectType>,
    pub shader_modules_created: u32,
    pub pipelines_created: u32,
    pub allocations: u32,

    next_handle: u64,
    buffer_sizes: HashMap<u64, vk::DeviceSize>,
    image_sizes: HashMap<u64, vk::DeviceSize>,
    memory_sizes: HashMap<u64, vk::DeviceSize>,
    mapped: HashMap<u64, Box<[u8]>>,
    pipeline_cache_data: HashMap<u64, Vec<u8>>,
}

impl MockState {
    fn next_handle(&mut self) -> u64 {
        // 从 0x1000 开始，与 null 以及常见的小整数区分
        self.next_handle += 1;
        0x1000 + self.next_handle
    }

    fn create_object(&mut self, object_type: vk::ObjectType) -> u64 {
        let handle = self.next_handle();
        self.live_objects.insert(handle, object_type);
        handle
    }

    fn destroy_object(&mut self, handle: u64, object_type: vk::ObjectType) {
        if handle == 0 {
            return;
        }
        match self.live_objects.remove(&handle) {
            Some(t) if t == object_type => {}
            other => log::error!("mock driver: destroying {object_type:?} {handle:#x}, found {other:?}"),
        }
    }

    fn is_live(&self, handle: u64, object_type: vk::ObjectType) -> bool {
        self.live_objects.get(&handle) == Some(&object_type)
    }

    /// 某种类型的存活对象数量
    pub fn live_count(&self, object_type: vk::ObjectType) -> usize {
        self.live_objects.values().filter(|t| **t == object_type).count()
    }
}

fn extension_properties(extensions: &[(String, u32)]) -> Vec<vk::ExtensionProperties> {
    extensions
        .iter()
        .map(|(name, spec_version)| {
            let mut props = vk::ExtensionProperties::default().spec_version(*spec_version);
            string_to_c_chars(name, &mut props.extension_name);
            props
        })
        .collect_vec()
}

/// # Safety
/// 指针数组中的每一项都必须是有效的 C 字符串
unsafe fn c_string_array(ptrs: *const *const std::ffi::c_char, count: u32) -> Vec<String> {
    if ptrs.is_null() {
        return vec![];
    }
    unsafe { std::slice::from_raw_parts(ptrs, count as usize) }
        .iter()
        .map(|&p| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
        .collect_vec()
}

/// # Safety
/// `count` 不为 0 时 `ptr` 必须指向 `count` 个元素
unsafe fn slice_or_empty<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 { &[] } else { unsafe { std::slice::from_raw_parts(ptr, count as usize) } }
}

/// 入口：相当于 vulkan loader
pub struct MockPlatform {
    config: Rc<MockDriverConfig>,
    state: Rc<RefCell<MockState>>,
}

impl MockPlatform {
    pub fn new(config: MockDriverConfig) -> Self {
        Self {
            config: Rc::new(config),
            state: Rc::new(RefCell::new(MockState::default())),
        }
    }

    #[inline]
    pub fn state(&self) -> Rc<RefCell<MockState>> {
        self.state.clone()
    }

    #[inline]
    pub fn config(&self) -> &MockDriverConfig {
        &self.config
    }

    /// 跳过 instance，直接得到一个 device，用于只关心 device 调用的测试
    pub fn create_test_device(&self) -> Rc<dyn DeviceInterface> {
        let handle = self.state.borrow_mut().next_handle();
        Rc::new(MockDevice {
            handle: vk::Device::from_raw(handle),
            config: self.config.clone(),
            state: self.state.clone(),
        })
    }
}

impl PlatformInterface for MockPlatform {
    fn enumerate_instance_version(&self) -> VktResult<u32> {
        Ok(self.config.instance_version)
    }

    fn enumerate_instance_extension_properties(&self) -> VktResult<Vec<vk::ExtensionProperties>> {
        Ok(extension_properties(&self.config.instance_extensions))
    }

    fn enumerate_instance_layer_properties(&self) -> VktResult<Vec<vk::LayerProperties>> {
        Ok(self
            .config
            .instance_layers
            .iter()
            .map(|name| {
                let mut props = vk::LayerProperties::default().spec_version(self.config.instance_version);
                string_to_c_chars(name, &mut props.layer_name);
                props
            })
            .collect_vec())
    }

    fn create_instance(
        &self,
        create_info: &vk::InstanceCreateInfo,
        enable_validation: bool,
    ) -> VktResult<Rc<dyn InstanceInterface>> {
        let extensions =
            unsafe { c_string_array(create_info.pp_enabled_extension_names, create_info.enabled_extension_count) };
        let layers = unsafe { c_string_array(create_info.pp_enabled_layer_names, create_info.enabled_layer_count) };
        let api_version = if create_info.p_application_info.is_null() {
            vk::API_VERSION_1_0
        } else {
            unsafe { (*create_info.p_application_info).api_version }
        };

        for name in &extensions {
            if !self.config.instance_extensions.iter().any(|(e, _)| e == name) {
                return Err(VktError::from_vk(vk::Result::ERROR_EXTENSION_NOT_PRESENT, "vkCreateInstance"));
            }
        }
        for name in &layers {
            if !self.config.instance_layers.contains(name) {
                return Err(VktError::from_vk(vk::Result::ERROR_LAYER_NOT_PRESENT, "vkCreateInstance"));
            }
        }

        let mut state = self.state.borrow_mut();
        state.instances_created += 1;
        state.last_instance_api_version = api_version;
        state.last_instance_extensions = extensions;
        state.last_instance_layers = layers;
        state.validation_enabled = enable_validation;
        let handle = state.next_handle();

        Ok(Rc::new(MockInstance {
            handle: vk::Instance::from_raw(handle),
            config: self.config.clone(),
            state: self.state.clone(),
        }))
    }
}

pub struct MockInstance {
    handle: vk::Instance,
    config: Rc<MockDriverConfig>,
    state: Rc<RefCell<MockState>>,
}

impl MockInstance {
    fn physical_devices(&self) -> Vec<vk::PhysicalDevice> {
        (0..self.config.physical_device_count as u64).map(|i| vk::PhysicalDevice::from_raw(0x10 + i)).collect_vec()
    }

    fn core_properties(&self, pdevice: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        let mut props = vk::PhysicalDeviceProperties::default()
            .api_version(self.config.device_api_version)
            .driver_version(1)
            .vendor_id(self.config.vendor_id)
            .device_id(self.config.device_id + (pdevice.as_raw() - 0x10) as u32)
            .device_type(vk::PhysicalDeviceType::DISCRETE_GPU);
        props.limits.max_bound_descriptor_sets = 8;
        props.limits.timestamp_period = 1.0;
        props.limits.non_coherent_atom_size = 64;
        string_to_c_chars(&self.config.device_name, &mut props.device_name);
        props
    }
}

impl InstanceInterface for MockInstance {
    #[inline]
    fn handle(&self) -> vk::Instance {
        self.handle
    }

    fn destroy_instance(&self) {
        self.state.borrow_mut().instances_destroyed += 1;
    }

    fn enumerate_physical_devices(&self) -> VktResult<Vec<vk::PhysicalDevice>> {
        Ok(self.physical_devices())
    }

    fn get_physical_device_properties(&self, pdevice: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        self.core_properties(pdevice)
    }

    fn get_physical_device_properties2(
        &self,
        pdevice: vk::PhysicalDevice,
        properties: &mut vk::PhysicalDeviceProperties2<'_>,
    ) {
        properties.properties = self.core_properties(pdevice);
        let mut node = properties.p_next as *mut vk::BaseOutStructure<'static>;
        while !node.is_null() {
            unsafe {
                if let Some(var) = self.config.properties.iter().find(|p| p.desc().s_type == (*node).s_type) {
                    var.write_into(node);
                }
                node = (*node).p_next;
            }
        }
    }

    fn get_physical_device_features(&self, _pdevice: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        self.config.core_features
    }

    fn get_physical_device_features2(&self, _pdevice: vk::PhysicalDevice, features: &mut vk::PhysicalDeviceFeatures2<'_>) {
        features.features = self.config.core_features;
        let mut node = features.p_next as *mut vk::BaseOutStructure<'static>;
        while !node.is_null() {
            unsafe {
                if let Some(var) = self.config.features.iter().find(|f| f.s_type() == (*node).s_type) {
                    var.write_into(node);
                }
                node = (*node).p_next;
            }
        }
    }

    fn get_physical_device_memory_properties(
        &self,
        _pdevice: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: self.config.memory_types.len() as u32,
            memory_heap_count: self.config.memory_heaps.len() as u32,
            ..Default::default()
        };
        for (dst, (flags, heap)) in props.memory_types.iter_mut().zip(&self.config.memory_types) {
            *dst = vk::MemoryType::default().property_flags(*flags).heap_index(*heap);
        }
        for (dst, (size, flags)) in props.memory_heaps.iter_mut().zip(&self.config.memory_heaps) {
            *dst = vk::MemoryHeap::default().size(*size).flags(*flags);
        }
        props
    }

    fn get_physical_device_queue_family_properties(
        &self,
        _pdevice: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        self.config.queue_families.clone()
    }

    fn enumerate_device_extension_properties(
        &self,
        _pdevice: vk::PhysicalDevice,
    ) -> VktResult<Vec<vk::ExtensionProperties>> {
        Ok(extension_properties(&self.config.device_extensions))
    }

    fn create_device(
        &self,
        pdevice: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> VktResult<Rc<dyn DeviceInterface>> {
        if !self.physical_devices().contains(&pdevice) {
            return Err(VktError::from_vk(vk::Result::ERROR_INITIALIZATION_FAILED, "vkCreateDevice"));
        }

        let mut recorded = RecordedDevice {
            physical_device: pdevice,
            extensions: unsafe {
                c_string_array(create_info.pp_enabled_extension_names, create_info.enabled_extension_count)
            },
            layers: unsafe { c_string_array(create_info.pp_enabled_layer_names, create_info.enabled_layer_count) },
            ..Default::default()
        };

        for name in &recorded.extensions {
            if !self.config.device_extensions.iter().any(|(e, _)| e == name) {
                return Err(VktError::from_vk(vk::Result::ERROR_EXTENSION_NOT_PRESENT, "vkCreateDevice"));
            }
        }

        let queue_infos = unsafe { slice_or_empty(create_info.p_queue_create_infos, create_info.queue_create_info_count) };
        for info in queue_infos {
            let family = self.config.queue_families.get(info.queue_family_index as usize);
            if family.is_none_or(|f| info.queue_count > f.queue_count) {
                return Err(VktError::from_vk(vk::Result::ERROR_INITIALIZATION_FAILED, "vkCreateDevice"));
            }
            let priorities = unsafe { slice_or_empty(info.p_queue_priorities, info.queue_count) };
            recorded.queue_infos.push((info.queue_family_index, priorities.to_vec()));
        }

        if !create_info.p_enabled_features.is_null() {
            recorded.enabled_features = Some(unsafe { *create_info.p_enabled_features });
        }

        let mut node = create_info.p_next as *const vk::BaseInStructure<'static>;
        while !node.is_null() {
            unsafe {
                recorded.p_next_stypes.push((*node).s_type);
                if let Some(var) = FeaturesVar::read_from(node) {
                    recorded.chained_features.push(var);
                }
                node = (*node).p_next;
            }
        }

        let mut state = self.state.borrow_mut();
        state.devices_created += 1;
        state.last_device = Some(recorded);
        let handle = state.next_handle();
        log::debug!("mock driver: device {handle:#x} created");

        Ok(Rc::new(MockDevice {
            handle: vk::Device::from_raw(handle),
            config: self.config.clone(),
            state: self.state.clone(),
        }))
    }
}

pub struct MockDevice {
    handle: vk::Device,
    config: Rc<MockDriverConfig>,
    state: Rc<RefCell<MockState>>,
}

impl MockDevice {
    fn requirements(size: vk::DeviceSize, memory_type_count: usize) -> vk::MemoryRequirements {
        vk::MemoryRequirements::default()
            .size(size.div_ceil(256) * 256)
            .alignment(256)
            .memory_type_bits((1u32 << memory_type_count) - 1)
    }

    fn create_pipelines(&self, cache: vk::PipelineCache, modules: &[Vec<vk::ShaderModule>]) -> VktResult<Vec<vk::Pipeline>> {
        let mut state = self.state.borrow_mut();
        // 没有真实创建的 module 说明调用方把伪造的 handle 交给了驱动
        if modules.iter().flatten().any(|m| !state.is_live(m.as_raw(), vk::ObjectType::SHADER_MODULE)) {
            return Err(VktError::from_vk(vk::Result::ERROR_UNKNOWN, "vkCreatePipelines"));
        }

        let pipelines = modules
            .iter()
            .map(|_| vk::Pipeline::from_raw(state.create_object(vk::ObjectType::PIPELINE)))
            .collect_vec();
        state.pipelines_created += pipelines.len() as u32;
        if let Some(data) = state.pipeline_cache_data.get_mut(&cache.as_raw()) {
            for pipeline in &pipelines {
                data.extend_from_slice(&pipeline.as_raw().to_le_bytes());
            }
        }
        Ok(pipelines)
    }
}

impl DeviceInterface for MockDevice {
    #[inline]
    fn handle(&self) -> vk::Device {
        self.handle
    }

    fn destroy_device(&self) {
        let mut state = self.state.borrow_mut();
        state.devices_destroyed += 1;
        log::debug!("mock driver: device {:#x} destroyed", self.handle.as_raw());
    }

    fn device_wait_idle(&self) -> VktResult<()> {
        Ok(())
    }

    fn get_device_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x0F00_0000 | ((queue_family_index as u64) << 8) | queue_index as u64)
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VktResult<vk::DeviceMemory> {
        if info.memory_type_index as usize >= self.config.memory_types.len() {
            return Err(VktError::from_vk(vk::Result::ERROR_UNKNOWN, "vkAllocateMemory"));
        }
        if info.allocation_size > self.config.max_allocation_size {
            return Err(VktError::from_vk(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "vkAllocateMemory"));
        }
        let mut state = self.state.borrow_mut();
        let handle = state.create_object(vk::ObjectType::DEVICE_MEMORY);
        state.memory_sizes.insert(handle, info.allocation_size);
        state.allocations += 1;
        Ok(vk::DeviceMemory::from_raw(handle))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.borrow_mut();
        state.memory_sizes.remove(&memory.as_raw());
        state.mapped.remove(&memory.as_raw());
        state.destroy_object(memory.as_raw(), vk::ObjectType::DEVICE_MEMORY);
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        _size: vk::DeviceSize,
    ) -> VktResult<*mut c_void> {
        let mut state = self.state.borrow_mut();
        let Some(&size) = state.memory_sizes.get(&memory.as_raw()) else {
            return Err(VktError::from_vk(vk::Result::ERROR_MEMORY_MAP_FAILED, "vkMapMemory"));
        };
        if offset >= size || state.mapped.contains_key(&memory.as_raw()) {
            return Err(VktError::from_vk(vk::Result::ERROR_MEMORY_MAP_FAILED, "vkMapMemory"));
        }
        let storage = state.mapped.entry(memory.as_raw()).or_insert_with(|| vec![0u8; size as usize].into_boxed_slice());
        Ok(unsafe { storage.as_mut_ptr().add(offset as usize) } as *mut c_void)
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        self.state.borrow_mut().mapped.remove(&memory.as_raw());
    }

    fn flush_mapped_memory_ranges(&self, _ranges: &[vk::MappedMemoryRange<'_>]) -> VktResult<()> {
        Ok(())
    }

    fn invalidate_mapped_memory_ranges(&self, _ranges: &[vk::MappedMemoryRange<'_>]) -> VktResult<()> {
        Ok(())
    }

    fn get_buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let size = self.state.borrow().buffer_sizes.get(&buffer.as_raw()).copied().unwrap_or(0);
        Self::requirements(size, self.config.memory_types.len())
    }

    fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let size = self.state.borrow().image_sizes.get(&image.as_raw()).copied().unwrap_or(0);
        Self::requirements(size, self.config.memory_types.len())
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> VktResult<()> {
        let state = self.state.borrow();
        if !state.is_live(buffer.as_raw(), vk::ObjectType::BUFFER)
            || !state.is_live(memory.as_raw(), vk::ObjectType::DEVICE_MEMORY)
        {
            return Err(VktError::from_vk(vk::Result::ERROR_UNKNOWN, "vkBindBufferMemory"));
        }
        Ok(())
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, _offset: vk::DeviceSize) -> VktResult<()> {
        let state = self.state.borrow();
        if !state.is_live(image.as_raw(), vk::ObjectType::IMAGE)
            || !state.is_live(memory.as_raw(), vk::ObjectType::DEVICE_MEMORY)
        {
            return Err(VktError::from_vk(vk::Result::ERROR_UNKNOWN, "vkBindImageMemory"));
        }
        Ok(())
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VktResult<vk::Buffer> {
        let mut state = self.state.borrow_mut();
        let handle = state.create_object(vk::ObjectType::BUFFER);
        state.buffer_sizes.insert(handle, info.size);
        Ok(vk::Buffer::from_raw(handle))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.borrow_mut();
        state.buffer_sizes.remove(&buffer.as_raw());
        state.destroy_object(buffer.as_raw(), vk::ObjectType::BUFFER);
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VktResult<vk::Image> {
        let mut state = self.state.borrow_mut();
        let handle = state.create_object(vk::ObjectType::IMAGE);
        // 所有格式按 4 字节每 texel 估算
        let extent = info.extent;
        let size = extent.width as u64 * extent.height as u64 * extent.depth as u64 * info.array_layers as u64 * 4;
        state.image_sizes.insert(handle, size);
        Ok(vk::Image::from_raw(handle))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.borrow_mut();
        state.image_sizes.remove(&image.as_raw());
        state.destroy_object(image.as_raw(), vk::ObjectType::IMAGE);
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> VktResult<vk::Sampler> {
        Ok(vk::Sampler::from_raw(self.state.borrow_mut().create_object(vk::ObjectType::SAMPLER)))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state.borrow_mut().destroy_object(sampler.as_raw(), vk::ObjectType::SAMPLER);
    }

    fn create_shader_module(&self, info: &vk::ShaderModuleCreateInfo<'_>) -> VktResult<vk::ShaderModule> {
        if info.code_size == 0 || info.code_size % 4 != 0 {
            return Err(VktError::from_vk(vk::Result::ERROR_INITIALIZATION_FAILED, "vkCreateShaderModule"));
        }
        let mut state = self.state.borrow_mut();
        state.shader_modules_created += 1;
        Ok(vk::ShaderModule::from_raw(state.create_object(vk::ObjectType::SHADER_MODULE)))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state.borrow_mut().destroy_object(module.as_raw(), vk::ObjectType::SHADER_MODULE);
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo<'_>) -> VktResult<vk::RenderPass> {
        Ok(vk::RenderPass::from_raw(self.state.borrow_mut().create_object(vk::ObjectType::RENDER_PASS)))
    }

    fn create_render_pass2(&self, _info: &vk::RenderPassCreateInfo2<'_>) -> VktResult<vk::RenderPass> {
        Ok(vk::RenderPass::from_raw(self.state.borrow_mut().create_object(vk::ObjectType::RENDER_PASS)))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state.borrow_mut().destroy_object(render_pass.as_raw(), vk::ObjectType::RENDER_PASS);
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VktResult<vk::DescriptorSetLayout> {
        let mut state = self.state.borrow_mut();
        let bindings = unsafe { slice_or_empty(info.p_bindings, info.binding_count) };
        for binding in bindings {
            let samplers = unsafe { slice_or_empty(binding.p_immutable_samplers, binding.descriptor_count) };
            if samplers.iter().any(|s| !state.is_live(s.as_raw(), vk::ObjectType::SAMPLER)) {
                return Err(VktError::from_vk(vk::Result::ERROR_UNKNOWN, "vkCreateDescriptorSetLayout"));
            }
        }
        Ok(vk::DescriptorSetLayout::from_raw(state.create_object(vk::ObjectType::DESCRIPTOR_SET_LAYOUT)))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.borrow_mut().destroy_object(layout.as_raw(), vk::ObjectType::DESCRIPTOR_SET_LAYOUT);
    }

    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo<'_>) -> VktResult<vk::PipelineLayout> {
        let mut state = self.state.borrow_mut();
        let set_layouts = unsafe { slice_or_empty(info.p_set_layouts, info.set_layout_count) };
        if set_layouts.iter().any(|l| !state.is_live(l.as_raw(), vk::ObjectType::DESCRIPTOR_SET_LAYOUT)) {
            return Err(VktError::from_vk(vk::Result::ERROR_UNKNOWN, "vkCreatePipelineLayout"));
        }
        Ok(vk::PipelineLayout::from_raw(state.create_object(vk::ObjectType::PIPELINE_LAYOUT)))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.borrow_mut().destroy_object(layout.as_raw(), vk::ObjectType::PIPELINE_LAYOUT);
    }

    fn create_pipeline_cache(&self, info: &vk::PipelineCacheCreateInfo<'_>) -> VktResult<vk::PipelineCache> {
        let initial = unsafe { slice_or_empty(info.p_initial_data as *const u8, info.initial_data_size as u32) };
        let mut state = self.state.borrow_mut();
        let handle = state.create_object(vk::ObjectType::PIPELINE_CACHE);
        state.pipeline_cache_data.insert(handle, initial.to_vec());
        Ok(vk::PipelineCache::from_raw(handle))
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        let mut state = self.state.borrow_mut();
        state.pipeline_cache_data.remove(&cache.as_raw());
        state.destroy_object(cache.as_raw(), vk::ObjectType::PIPELINE_CACHE);
    }

    fn get_pipeline_cache_data(&self, cache: vk::PipelineCache) -> VktResult<Vec<u8>> {
        self.state
            .borrow()
            .pipeline_cache_data
            .get(&cache.as_raw())
            .cloned()
            .ok_or_else(|| VktError::from_vk(vk::Result::ERROR_UNKNOWN, "vkGetPipelineCacheData"))
    }

    fn create_graphics_pipelines(
        &self,
        cache: vk::PipelineCache,
        infos: &[vk::GraphicsPipelineCreateInfo<'_>],
    ) -> VktResult<Vec<vk::Pipeline>> {
        let modules = infos
            .iter()
            .map(|info| {
                unsafe { slice_or_empty(info.p_stages, info.stage_count) }.iter().map(|s| s.module).collect_vec()
            })
            .collect_vec();
        self.create_pipelines(cache, &modules)
    }

    fn create_compute_pipelines(
        &self,
        cache: vk::PipelineCache,
        infos: &[vk::ComputePipelineCreateInfo<'_>],
    ) -> VktResult<Vec<vk::Pipeline>> {
        let modules = infos.iter().map(|info| vec![info.stage.module]).collect_vec();
        self.create_pipelines(cache, &modules)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state.borrow_mut().destroy_object(pipeline.as_raw(), vk::ObjectType::PIPELINE);
    }

    fn create_fence(&self, _info: &vk::FenceCreateInfo<'_>) -> VktResult<vk::Fence> {
        Ok(vk::Fence::from_raw(self.state.borrow_mut().create_object(vk::ObjectType::FENCE)))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state.borrow_mut().destroy_object(fence.as_raw(), vk::ObjectType::FENCE);
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], _wait_all: bool, _timeout: u64) -> VktResult<()> {
        let state = self.state.borrow();
        if fences.iter().any(|f| !state.is_live(f.as_raw(), vk::ObjectType::FENCE)) {
            return Err(VktError::from_vk(vk::Result::ERROR_DEVICE_LOST, "vkWaitForFences"));
        }
        Ok(())
    }

    fn reset_fences(&self, _fences: &[vk::Fence]) -> VktResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_features::DeviceFeatures;

    #[test]
    fn test_features2_chain_is_filled_by_stype() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let instance = platform.create_instance(&vk::InstanceCreateInfo::default(), false).unwrap();
        let pdevice = instance.enumerate_physical_devices().unwrap()[0];
        let extensions = instance.enumerate_device_extension_properties(pdevice).unwrap();

        let features = DeviceFeatures::new(instance.as_ref(), vk::API_VERSION_1_3, pdevice, &[], &extensions);
        let timeline = features.get::<vk::PhysicalDeviceTimelineSemaphoreFeatures>().unwrap();
        assert_eq!(timeline.timeline_semaphore, vk::TRUE);
        assert!(timeline.p_next.is_null());
        assert!(features.get::<vk::PhysicalDeviceMeshShaderFeaturesEXT>().is_none());
        // 查询之后 robustBufferAccess 总是关闭
        assert_eq!(features.core_features().robust_buffer_access, vk::FALSE);
        assert_eq!(features.core_features().geometry_shader, vk::TRUE);
    }

    #[test]
    fn test_unknown_instance_extension_is_rejected() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let names = [c"VK_KHR_not_a_thing".as_ptr()];
        let info = vk::InstanceCreateInfo::default().enabled_extension_names(&names);
        let err = platform.create_instance(&info, false).err().unwrap();
        assert!(matches!(err, VktError::Vk { result: vk::Result::ERROR_EXTENSION_NOT_PRESENT, .. }));
        assert_eq!(platform.state().borrow().instances_created, 0);
    }

    #[test]
    fn test_device_creation_is_recorded() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let instance = platform.create_instance(&vk::InstanceCreateInfo::default(), false).unwrap();
        let pdevice = instance.enumerate_physical_devices().unwrap()[0];

        let priorities = [1.0, 0.5];
        let queue_infos = [vk::DeviceQueueCreateInfo::default().queue_family_index(0).queue_priorities(&priorities)];
        let names = [c"VK_EXT_robustness2".as_ptr()];
        let mut timeline = vk::PhysicalDeviceTimelineSemaphoreFeatures::default().timeline_semaphore(true);
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(vk::PhysicalDeviceFeatures::default().geometry_shader(true));
        let info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&names)
            .push_next(&mut timeline)
            .push_next(&mut features2);

        let device = instance.create_device(pdevice, &info).unwrap();
        device.destroy_device();

        let state = platform.state();
        let state = state.borrow();
        let recorded = state.last_device.as_ref().unwrap();
        assert_eq!(recorded.extensions, vec!["VK_EXT_robustness2"]);
        assert_eq!(recorded.queue_infos, vec![(0, vec![1.0, 0.5])]);
        assert_eq!(
            recorded.p_next_stypes,
            vec![
                vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
                vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES
            ]
        );
        assert_eq!(recorded.features2().unwrap().geometry_shader, vk::TRUE);
        assert_eq!(
            recorded.feature::<vk::PhysicalDeviceTimelineSemaphoreFeatures>().unwrap().timeline_semaphore,
            vk::TRUE
        );
        assert_eq!((state.devices_created, state.devices_destroyed), (1, 1));
    }

    #[test]
    fn test_pipelines_reject_unknown_modules() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let device = platform.create_test_device();
        let info = vk::ComputePipelineCreateInfo::default().stage(
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::COMPUTE)
                .module(vk::ShaderModule::from_raw(0xdead))
                .name(c"main"),
        );
        let err = device.create_compute_pipelines(vk::PipelineCache::null(), &[info]).unwrap_err();
        assert!(matches!(err, VktError::Vk { result: vk::Result::ERROR_UNKNOWN, .. }));
    }
}
