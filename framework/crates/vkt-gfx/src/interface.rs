//! vulkan 函数表
//!
//! `PlatformInterface` / `InstanceInterface` / `DeviceInterface` 是对 `vkGetInstanceProcAddr` /
//! `vkGetDeviceProcAddr` 得到的函数表的抽象。真实驱动由 [`crate::driver`] 基于 ash 实现，
//! 测试中使用 `mock` 中的内存驱动。
//!
//! 所有 `pNext` 链只在这些调用的内部被驱动读取，调用方保证链在调用期间有效。

use std::{ffi::c_void, rc::Rc};

use ash::vk;

use crate::error::VktResult;

pub trait PlatformInterface {
    /// `vkEnumerateInstanceVersion`，1.0 的 loader 返回 `VK_API_VERSION_1_0`
    fn enumerate_instance_version(&self) -> VktResult<u32>;
    fn enumerate_instance_extension_properties(&self) -> VktResult<Vec<vk::ExtensionProperties>>;
    fn enumerate_instance_layer_properties(&self) -> VktResult<Vec<vk::LayerProperties>>;

    /// `enable_validation` 为 true 时，实现需要同时创建 debug messenger 把 validation 消息输出到日志
    fn create_instance(
        &self,
        create_info: &vk::InstanceCreateInfo,
        enable_validation: bool,
    ) -> VktResult<Rc<dyn InstanceInterface>>;
}

pub trait InstanceInterface {
    fn handle(&self) -> vk::Instance;
    fn destroy_instance(&self);

    fn enumerate_physical_devices(&self) -> VktResult<Vec<vk::PhysicalDevice>>;
    fn get_physical_device_properties(&self, pdevice: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;
    fn get_physical_device_properties2(
        &self,
        pdevice: vk::PhysicalDevice,
        properties: &mut vk::PhysicalDeviceProperties2<'_>,
    );
    fn get_physical_device_features(&self, pdevice: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures;
    fn get_physical_device_features2(&self, pdevice: vk::PhysicalDevice, features: &mut vk::PhysicalDeviceFeatures2<'_>);
    fn get_physical_device_memory_properties(&self, pdevice: vk::PhysicalDevice)
    -> vk::PhysicalDeviceMemoryProperties;
    fn get_physical_device_queue_family_properties(&self, pdevice: vk::PhysicalDevice)
    -> Vec<vk::QueueFamilyProperties>;
    fn enumerate_device_extension_properties(
        &self,
        pdevice: vk::PhysicalDevice,
    ) -> VktResult<Vec<vk::ExtensionProperties>>;

    fn create_device(
        &self,
        pdevice: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> VktResult<Rc<dyn DeviceInterface>>;
}

pub trait DeviceInterface {
    fn handle(&self) -> vk::Device;
    fn destroy_device(&self);
    fn device_wait_idle(&self) -> VktResult<()>;
    fn get_device_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue;

    // memory
    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VktResult<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn map_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize)
    -> VktResult<*mut c_void>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);
    fn flush_mapped_memory_ranges(&self, ranges: &[vk::MappedMemoryRange<'_>]) -> VktResult<()>;
    fn invalidate_mapped_memory_ranges(&self, ranges: &[vk::MappedMemoryRange<'_>]) -> VktResult<()>;
    fn get_buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: vk::DeviceSize)
    -> VktResult<()>;
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VktResult<()>;

    // resources
    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VktResult<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VktResult<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> VktResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // pipeline 相关
    fn create_shader_module(&self, info: &vk::ShaderModuleCreateInfo<'_>) -> VktResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VktResult<vk::RenderPass>;
    fn create_render_pass2(&self, info: &vk::RenderPassCreateInfo2<'_>) -> VktResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VktResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo<'_>) -> VktResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_pipeline_cache(&self, info: &vk::PipelineCacheCreateInfo<'_>) -> VktResult<vk::PipelineCache>;
    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache);
    fn get_pipeline_cache_data(&self, cache: vk::PipelineCache) -> VktResult<Vec<u8>>;
    fn create_graphics_pipelines(
        &self,
        cache: vk::PipelineCache,
        infos: &[vk::GraphicsPipelineCreateInfo<'_>],
    ) -> VktResult<Vec<vk::Pipeline>>;
    fn create_compute_pipelines(
        &self,
        cache: vk::PipelineCache,
        infos: &[vk::ComputePipelineCreateInfo<'_>],
    ) -> VktResult<Vec<vk::Pipeline>>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // sync
    fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VktResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fences(&self, fences: &[vk::Fence], wait_all: bool, timeout: u64) -> VktResult<()>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> VktResult<()>;
}
