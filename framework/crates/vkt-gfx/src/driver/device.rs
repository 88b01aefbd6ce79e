use std::ffi::c_void;

use ash::vk;

use crate::{error::VktResult, interface::DeviceInterface, vk_check};

/// 核心 Vulkan 设备 API
pub struct AshDevice {
    device: ash::Device,
}

impl AshDevice {
    pub fn new(device: ash::Device) -> Self {
        Self { device }
    }

    #[inline]
    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }
}

impl DeviceInterface for AshDevice {
    #[inline]
    fn handle(&self) -> vk::Device {
        self.device.handle()
    }

    fn destroy_device(&self) {
        log::info!("destroying device {:?}", self.device.handle());
        unsafe { self.device.destroy_device(None) };
    }

    fn device_wait_idle(&self) -> VktResult<()> {
        vk_check!(unsafe { self.device.device_wait_idle() })
    }

    fn get_device_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        unsafe { self.device.get_device_queue(queue_family_index, queue_index) }
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VktResult<vk::DeviceMemory> {
        vk_check!(unsafe { self.device.allocate_memory(info, None) })
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VktResult<*mut c_void> {
        vk_check!(unsafe { self.device.map_memory(memory, offset, size, vk::MemoryMapFlags::empty()) })
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    fn flush_mapped_memory_ranges(&self, ranges: &[vk::MappedMemoryRange<'_>]) -> VktResult<()> {
        vk_check!(unsafe { self.device.flush_mapped_memory_ranges(ranges) })
    }

    fn invalidate_mapped_memory_ranges(&self, ranges: &[vk::MappedMemoryRange<'_>]) -> VktResult<()> {
        vk_check!(unsafe { self.device.invalidate_mapped_memory_ranges(ranges) })
    }

    fn get_buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VktResult<()> {
        vk_check!(unsafe { self.device.bind_buffer_memory(buffer, memory, offset) })
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VktResult<()> {
        vk_check!(unsafe { self.device.bind_image_memory(image, memory, offset) })
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VktResult<vk::Buffer> {
        vk_check!(unsafe { self.device.create_buffer(info, None) })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VktResult<vk::Image> {
        vk_check!(unsafe { self.device.create_image(info, None) })
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> VktResult<vk::Sampler> {
        vk_check!(unsafe { self.device.create_sampler(info, None) })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn create_shader_module(&self, info: &vk::ShaderModuleCreateInfo<'_>) -> VktResult<vk::ShaderModule> {
        vk_check!(unsafe { self.device.create_shader_module(info, None) })
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VktResult<vk::RenderPass> {
        vk_check!(unsafe { self.device.create_render_pass(info, None) })
    }

    fn create_render_pass2(&self, info: &vk::RenderPassCreateInfo2<'_>) -> VktResult<vk::RenderPass> {
        vk_check!(unsafe { self.device.create_render_pass2(info, None) })
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VktResult<vk::DescriptorSetLayout> {
        vk_check!(unsafe { self.device.create_descriptor_set_layout(info, None) })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo<'_>) -> VktResult<vk::PipelineLayout> {
        vk_check!(unsafe { self.device.create_pipeline_layout(info, None) })
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_pipeline_cache(&self, info: &vk::PipelineCacheCreateInfo<'_>) -> VktResult<vk::PipelineCache> {
        vk_check!(unsafe { self.device.create_pipeline_cache(info, None) })
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        unsafe { self.device.destroy_pipeline_cache(cache, None) }
    }

    fn get_pipeline_cache_data(&self, cache: vk::PipelineCache) -> VktResult<Vec<u8>> {
        vk_check!(unsafe { self.device.get_pipeline_cache_data(cache) })
    }

    fn create_graphics_pipelines(
        &self,
        cache: vk::PipelineCache,
        infos: &[vk::GraphicsPipelineCreateInfo<'_>],
    ) -> VktResult<Vec<vk::Pipeline>> {
        let result = unsafe { self.device.create_graphics_pipelines(cache, infos, None) };
        vk_check!(result.map_err(|(partial, err)| {
            partial.into_iter().filter(|p| *p != vk::Pipeline::null()).for_each(|p| self.destroy_pipeline(p));
            err
        }))
    }

    fn create_compute_pipelines(
        &self,
        cache: vk::PipelineCache,
        infos: &[vk::ComputePipelineCreateInfo<'_>],
    ) -> VktResult<Vec<vk::Pipeline>> {
        let result = unsafe { self.device.create_compute_pipelines(cache, infos, None) };
        vk_check!(result.map_err(|(partial, err)| {
            partial.into_iter().filter(|p| *p != vk::Pipeline::null()).for_each(|p| self.destroy_pipeline(p));
            err
        }))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VktResult<vk::Fence> {
        vk_check!(unsafe { self.device.create_fence(info, None) })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], wait_all: bool, timeout: u64) -> VktResult<()> {
        vk_check!(unsafe { self.device.wait_for_fences(fences, wait_all, timeout) })
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VktResult<()> {
        vk_check!(unsafe { self.device.reset_fences(fences) })
    }
}
