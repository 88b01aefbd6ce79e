//! 在一个真实的 device 上重建捕获的对象，得到 pipeline cache 数据
//!
//! 捕获时记录的 handle 只在捕获的进程中有意义，重建时按依赖顺序把它们替换为新 device 上的 handle：
//! sampler → descriptor set layout → pipeline layout，shader module、render pass、pipeline layout → pipeline。
//! 所有重建的对象在构建结束时通过 RAII 销毁，只留下 cache 数据。

use std::{collections::BTreeMap, rc::Rc};

use ash::vk::{self, Handle};
use vkt_gfx::{
    error::{VktError, VktResult},
    handle::{Deleter, Move, check},
    interface::DeviceInterface,
    ref_util,
    resource_interface::{CacheBuilder, CreateCacheRequest, CreateCacheResponse, FABRICATED_HANDLE_TAG},
    resource_json::{PipelineCacheInput, PipelineDesc, PipelineSize, RawHandle, estimate_pipeline_size},
};

/// 捕获时的 handle 到重建后的对象
struct HandleMap<T: Handle + Copy> {
    kind: &'static str,
    objects: BTreeMap<RawHandle, Move<T>>,
}

impl<T: Handle + Copy> HandleMap<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            objects: BTreeMap::new(),
        }
    }

    fn insert(&mut self, captured: RawHandle, object: Move<T>) {
        self.objects.insert(captured, object);
    }

    /// null 保持为 null；没有被重建的 handle 说明对象图不完整
    fn remap(&self, captured: RawHandle) -> VktResult<RawHandle> {
        if captured == 0 {
            return Ok(0);
        }
        match self.objects.get(&captured) {
            Some(object) => Ok(object.get().as_raw()),
            None if captured & FABRICATED_HANDLE_TAG == FABRICATED_HANDLE_TAG => Err(VktError::internal(format!(
                "fabricated {} {captured:#x} is not part of the captured data",
                self.kind
            ))),
            None => Err(VktError::internal(format!("unknown {} {captured:#x}", self.kind))),
        }
    }

    fn len(&self) -> usize {
        self.objects.len()
    }
}

/// 在本进程的 device 上构建 pipeline cache
pub struct LocalCacheBuilder {
    device: Rc<dyn DeviceInterface>,
}

impl LocalCacheBuilder {
    pub fn new(device: Rc<dyn DeviceInterface>) -> Self {
        Self { device }
    }

    #[inline]
    pub fn device(&self) -> &Rc<dyn DeviceInterface> {
        &self.device
    }

    fn build(&self, input: &PipelineCacheInput) -> VktResult<CreateCacheResponse> {
        let vkd = &self.device;

        let mut samplers = HandleMap::<vk::Sampler>::new("sampler");
        for (&captured, desc) in &input.samplers {
            samplers.insert(captured, ref_util::create_sampler(vkd, &desc.to_vk())?);
        }

        let mut set_layouts = HandleMap::<vk::DescriptorSetLayout>::new("descriptor set layout");
        for (&captured, desc) in &input.descriptor_set_layouts {
            let mut desc = desc.clone();
            for binding in &mut desc.bindings {
                for sampler in &mut binding.immutable_samplers {
                    *sampler = samplers.remap(*sampler)?;
                }
            }
            let layout = check(desc.create(vkd.as_ref())?)?;
            set_layouts.insert(
                captured,
                Move::new(layout, Deleter::device_child(vkd.clone(), |d, h| d.destroy_descriptor_set_layout(h))),
            );
        }

        let mut pipeline_layouts = HandleMap::<vk::PipelineLayout>::new("pipeline layout");
        for (&captured, desc) in &input.pipeline_layouts {
            let mut desc = desc.clone();
            for set_layout in &mut desc.set_layouts {
                *set_layout = set_layouts.remap(*set_layout)?;
            }
            let layout = check(desc.create(vkd.as_ref())?)?;
            pipeline_layouts.insert(
                captured,
                Move::new(layout, Deleter::device_child(vkd.clone(), |d, h| d.destroy_pipeline_layout(h))),
            );
        }

        let mut shader_modules = HandleMap::<vk::ShaderModule>::new("shader module");
        for (&captured, desc) in &input.shader_modules {
            let module = check(desc.create(vkd.as_ref())?)?;
            shader_modules.insert(
                captured,
                Move::new(module, Deleter::device_child(vkd.clone(), |d, h| d.destroy_shader_module(h))),
            );
        }

        let mut render_passes = HandleMap::<vk::RenderPass>::new("render pass");
        for (&captured, desc) in &input.render_passes {
            let render_pass = check(desc.create(vkd.as_ref())?)?;
            render_passes.insert(
                captured,
                Move::new(render_pass, Deleter::device_child(vkd.clone(), |d, h| d.destroy_render_pass(h))),
            );
        }

        log::info!(
            "recreated {} samplers, {} set layouts, {} pipeline layouts, {} shader modules, {} render passes",
            samplers.len(),
            set_layouts.len(),
            pipeline_layouts.len(),
            shader_modules.len(),
            render_passes.len()
        );

        let cache = ref_util::create_pipeline_cache(vkd, &vk::PipelineCacheCreateInfo::default())?;
        let mut pipelines = Vec::with_capacity(input.pipelines.len());
        let mut pipeline_sizes = Vec::with_capacity(input.pipelines.len());
        for entry in &input.pipelines {
            let json = entry.desc.to_json()?;

            let mut desc = entry.desc.clone();
            match &mut desc {
                PipelineDesc::Graphics(g) => {
                    for stage in &mut g.stages {
                        stage.module = shader_modules.remap(stage.module)?;
                    }
                    g.layout = pipeline_layouts.remap(g.layout)?;
                    g.render_pass = render_passes.remap(g.render_pass)?;
                }
                PipelineDesc::Compute(c) => {
                    c.stage.module = shader_modules.remap(c.stage.module)?;
                    c.layout = pipeline_layouts.remap(c.layout)?;
                }
            }

            let pipeline = check(desc.create(vkd.as_ref(), cache.get())?)?;
            pipelines.push(Move::new(pipeline, Deleter::device_child(vkd.clone(), |d, h| d.destroy_pipeline(h))));
            pipeline_sizes.push(PipelineSize {
                identifier: entry.identifier,
                size: estimate_pipeline_size(json.len()),
                count: 1,
            });
        }

        let binary = vkd.get_pipeline_cache_data(cache.get())?;
        log::info!("built pipeline cache of {} bytes from {} pipelines", binary.len(), pipelines.len());

        // pipeline 先于它引用的对象销毁
        drop(pipelines);
        Ok(CreateCacheResponse {
            status: true,
            binary,
            pipeline_sizes,
        })
    }
}

impl CacheBuilder for LocalCacheBuilder {
    fn create_pipeline_cache(&self, request: &CreateCacheRequest) -> VktResult<CreateCacheResponse> {
        log::debug!(
            "building pipeline cache for case fraction {} ({} pipelines)",
            request.case_fraction_index,
            request.input.pipelines.len()
        );
        self.build(&request.input)
    }
}
