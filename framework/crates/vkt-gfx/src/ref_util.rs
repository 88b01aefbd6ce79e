//! 创建 device 子对象并立即交给 [`Move`]
//!
//! 每个函数只做一件事：调用驱动，检查 handle，绑定对应的 `vkDestroyXxx`。

use std::rc::Rc;

use ash::vk;

use crate::{
    error::{VktError, VktResult},
    handle::{Deleter, Move, check},
    interface::DeviceInterface,
};

pub fn create_buffer(vkd: &Rc<dyn DeviceInterface>, info: &vk::BufferCreateInfo<'_>) -> VktResult<Move<vk::Buffer>> {
    let buffer = check(vkd.create_buffer(info)?)?;
    Ok(Move::new(buffer, Deleter::device_child(vkd.clone(), |d, h| d.destroy_buffer(h))))
}

pub fn create_image(vkd: &Rc<dyn DeviceInterface>, info: &vk::ImageCreateInfo<'_>) -> VktResult<Move<vk::Image>> {
    let image = check(vkd.create_image(info)?)?;
    Ok(Move::new(image, Deleter::device_child(vkd.clone(), |d, h| d.destroy_image(h))))
}

pub fn create_sampler(vkd: &Rc<dyn DeviceInterface>, info: &vk::SamplerCreateInfo<'_>) -> VktResult<Move<vk::Sampler>> {
    let sampler = check(vkd.create_sampler(info)?)?;
    Ok(Move::new(sampler, Deleter::device_child(vkd.clone(), |d, h| d.destroy_sampler(h))))
}

pub fn create_shader_module(
    vkd: &Rc<dyn DeviceInterface>,
    info: &vk::ShaderModuleCreateInfo<'_>,
) -> VktResult<Move<vk::ShaderModule>> {
    let module = check(vkd.create_shader_module(info)?)?;
    Ok(Move::new(module, Deleter::device_child(vkd.clone(), |d, h| d.destroy_shader_module(h))))
}

/// 从 SPIR-V 字节创建 shader module，长度必须是 4 的倍数
pub fn create_shader_module_from_spirv(vkd: &Rc<dyn DeviceInterface>, spirv: &[u8]) -> VktResult<Move<vk::ShaderModule>> {
    if spirv.is_empty() || spirv.len() % 4 != 0 {
        return Err(VktError::internal(format!("invalid SPIR-V binary size: {}", spirv.len())));
    }
    let code = spirv.chunks_exact(4).map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]])).collect::<Vec<_>>();
    create_shader_module(vkd, &vk::ShaderModuleCreateInfo::default().code(&code))
}

pub fn create_pipeline_layout(
    vkd: &Rc<dyn DeviceInterface>,
    info: &vk::PipelineLayoutCreateInfo<'_>,
) -> VktResult<Move<vk::PipelineLayout>> {
    let layout = check(vkd.create_pipeline_layout(info)?)?;
    Ok(Move::new(layout, Deleter::device_child(vkd.clone(), |d, h| d.destroy_pipeline_layout(h))))
}

pub fn create_descriptor_set_layout(
    vkd: &Rc<dyn DeviceInterface>,
    info: &vk::DescriptorSetLayoutCreateInfo<'_>,
) -> VktResult<Move<vk::DescriptorSetLayout>> {
    let layout = check(vkd.create_descriptor_set_layout(info)?)?;
    Ok(Move::new(layout, Deleter::device_child(vkd.clone(), |d, h| d.destroy_descriptor_set_layout(h))))
}

pub fn create_render_pass(
    vkd: &Rc<dyn DeviceInterface>,
    info: &vk::RenderPassCreateInfo<'_>,
) -> VktResult<Move<vk::RenderPass>> {
    let render_pass = check(vkd.create_render_pass(info)?)?;
    Ok(Move::new(render_pass, Deleter::device_child(vkd.clone(), |d, h| d.destroy_render_pass(h))))
}

pub fn create_render_pass2(
    vkd: &Rc<dyn DeviceInterface>,
    info: &vk::RenderPassCreateInfo2<'_>,
) -> VktResult<Move<vk::RenderPass>> {
    let render_pass = check(vkd.create_render_pass2(info)?)?;
    Ok(Move::new(render_pass, Deleter::device_child(vkd.clone(), |d, h| d.destroy_render_pass(h))))
}

pub fn create_pipeline_cache(
    vkd: &Rc<dyn DeviceInterface>,
    info: &vk::PipelineCacheCreateInfo<'_>,
) -> VktResult<Move<vk::PipelineCache>> {
    let cache = check(vkd.create_pipeline_cache(info)?)?;
    Ok(Move::new(cache, Deleter::device_child(vkd.clone(), |d, h| d.destroy_pipeline_cache(h))))
}

pub fn create_graphics_pipeline(
    vkd: &Rc<dyn DeviceInterface>,
    cache: vk::PipelineCache,
    info: &vk::GraphicsPipelineCreateInfo<'_>,
) -> VktResult<Move<vk::Pipeline>> {
    let pipelines = vkd.create_graphics_pipelines(cache, std::slice::from_ref(info))?;
    let pipeline = pipelines
        .first()
        .copied()
        .ok_or_else(|| VktError::internal("vkCreateGraphicsPipelines returned no pipeline"))?;
    Ok(Move::new(check(pipeline)?, Deleter::device_child(vkd.clone(), |d, h| d.destroy_pipeline(h))))
}

pub fn create_compute_pipeline(
    vkd: &Rc<dyn DeviceInterface>,
    cache: vk::PipelineCache,
    info: &vk::ComputePipelineCreateInfo<'_>,
) -> VktResult<Move<vk::Pipeline>> {
    let pipelines = vkd.create_compute_pipelines(cache, std::slice::from_ref(info))?;
    let pipeline = pipelines
        .first()
        .copied()
        .ok_or_else(|| VktError::internal("vkCreateComputePipelines returned no pipeline"))?;
    Ok(Move::new(check(pipeline)?, Deleter::device_child(vkd.clone(), |d, h| d.destroy_pipeline(h))))
}

pub fn create_fence(vkd: &Rc<dyn DeviceInterface>, flags: vk::FenceCreateFlags) -> VktResult<Move<vk::Fence>> {
    let fence = check(vkd.create_fence(&vk::FenceCreateInfo::default().flags(flags))?)?;
    Ok(Move::new(fence, Deleter::device_child(vkd.clone(), |d, h| d.destroy_fence(h))))
}
