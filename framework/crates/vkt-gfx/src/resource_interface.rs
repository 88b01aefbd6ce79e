//! Vulkan SC 的 pipeline 捕获与 pipeline cache 导入
//!
//! 主进程中所有与 pipeline 相关的创建调用都会被记录到 [`ResourceRegistry`]：
//! shader module 与 pipeline 不会真正创建，而是返回一个伪造的 handle；
//! render pass / layout / sampler 在真实调用之后按返回的 handle 记录。
//! 子进程中，记录的对象图交给 [`CacheBuilder`] 构建 pipeline cache，之后所有 pipeline 都从这个 cache 中创建。

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    rc::Rc,
};

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{VktError, VktResult},
    handle::Move,
    resource_json::{
        ComputePipelineDesc, DescriptorSetLayoutDesc, GraphicsPipelineDesc, ObjectReservation, PipelineCacheInput,
        PipelineDesc, PipelineEntry, PipelineIdentifier, PipelineLayoutDesc, PipelinePoolSize, PipelineSize, RawHandle,
        RenderPassDesc, SamplerDesc, ShaderModuleDesc, pipeline_pool_sizes,
    },
    interface::DeviceInterface,
    ref_util,
};

/// Vulkan SC 的 `READ_ONLY | USE_APPLICATION_STORAGE`
pub const SC_PIPELINE_CACHE_CREATE_FLAGS: vk::PipelineCacheCreateFlags =
    vk::PipelineCacheCreateFlags::from_raw(0x2 | 0x4);

/// 伪造 handle 的高位标记，与驱动返回的 handle 区分
pub const FABRICATED_HANDLE_TAG: u64 = 0xFAB0 << 48;

/// 被计入 object reservation 的对象种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Semaphore,
    CommandBuffer,
    Fence,
    DeviceMemory,
    Buffer,
    Image,
    Event,
    QueryPool,
    BufferView,
    ImageView,
    PipelineCache,
    PipelineLayout,
    RenderPass,
    GraphicsPipeline,
    ComputePipeline,
    DescriptorSetLayout,
    Sampler,
    DescriptorPool,
    DescriptorSet,
    Framebuffer,
    CommandPool,
    SamplerYcbcrConversion,
}

fn reservation_counter(reservation: &mut ObjectReservation, kind: ObjectKind) -> &mut u32 {
    match kind {
        ObjectKind::Semaphore => &mut reservation.semaphore_request_count,
        ObjectKind::CommandBuffer => &mut reservation.command_buffer_request_count,
        ObjectKind::Fence => &mut reservation.fence_request_count,
        ObjectKind::DeviceMemory => &mut reservation.device_memory_request_count,
        ObjectKind::Buffer => &mut reservation.buffer_request_count,
        ObjectKind::Image => &mut reservation.image_request_count,
        ObjectKind::Event => &mut reservation.event_request_count,
        ObjectKind::QueryPool => &mut reservation.query_pool_request_count,
        ObjectKind::BufferView => &mut reservation.buffer_view_request_count,
        ObjectKind::ImageView => &mut reservation.image_view_request_count,
        ObjectKind::PipelineCache => &mut reservation.pipeline_cache_request_count,
        ObjectKind::PipelineLayout => &mut reservation.pipeline_layout_request_count,
        ObjectKind::RenderPass => &mut reservation.render_pass_request_count,
        ObjectKind::GraphicsPipeline => &mut reservation.graphics_pipeline_request_count,
        ObjectKind::ComputePipeline => &mut reservation.compute_pipeline_request_count,
        ObjectKind::DescriptorSetLayout => &mut reservation.descriptor_set_layout_request_count,
        ObjectKind::Sampler => &mut reservation.sampler_request_count,
        ObjectKind::DescriptorPool => &mut reservation.descriptor_pool_request_count,
        ObjectKind::DescriptorSet => &mut reservation.descriptor_set_request_count,
        ObjectKind::Framebuffer => &mut reservation.framebuffer_request_count,
        ObjectKind::CommandPool => &mut reservation.command_pool_request_count,
        ObjectKind::SamplerYcbcrConversion => &mut reservation.sampler_ycbcr_conversion_request_count,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultLevel {
    Unassigned,
    Critical,
    Recoverable,
    Warning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultType {
    Invalid,
    Unassigned,
    Implementation,
    System,
    PhysicalDevice,
    CommandBufferFull,
    InvalidApiUsage,
}

/// 驱动通过 fault callback 报告的一条错误
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultData {
    pub level: FaultLevel,
    pub kind: FaultType,
    pub description: String,
}

/// 把 shader 源码编译为 SPIR-V
pub trait ProgramCompiler {
    fn compile(&self, source: &str, source_type: &str, build_options: &str) -> VktResult<Vec<u8>>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateCacheRequest {
    pub input: PipelineCacheInput,
    /// 子进程对应的用例分片，-1 表示全部
    pub case_fraction_index: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCacheResponse {
    pub status: bool,
    pub binary: Vec<u8>,
    pub pipeline_sizes: Vec<PipelineSize>,
}

/// 由捕获的对象图构建 pipeline cache，可以在本进程中，也可以在远端
pub trait CacheBuilder {
    fn create_pipeline_cache(&self, request: &CreateCacheRequest) -> VktResult<CreateCacheResponse>;
}

/// 捕获的对象图，以及伪造 handle 的记录
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    input: PipelineCacheInput,
    fabricated: BTreeSet<RawHandle>,
    fabricated_counter: u64,
}

impl ResourceRegistry {
    #[inline]
    pub fn input(&self) -> &PipelineCacheInput {
        &self.input
    }

    fn fabricate(&mut self) -> RawHandle {
        self.fabricated_counter += 1;
        let handle = FABRICATED_HANDLE_TAG | self.fabricated_counter;
        self.fabricated.insert(handle);
        handle
    }

    fn add_pipeline(&mut self, entry: PipelineEntry) {
        // identifier 由用例路径和描述共同决定，同一个用例中完全相同的 pipeline 只保留一份
        if !self.input.pipelines.iter().any(|p| p.identifier == entry.identifier && p.desc == entry.desc) {
            self.input.pipelines.push(entry);
        }
    }

    /// mark-and-sweep：只保留被 pipeline 直接或间接引用的对象
    ///
    /// pipeline → shader module / render pass / pipeline layout → descriptor set layout → immutable sampler
    pub fn remove_redundant_objects(&mut self) {
        let input = &mut self.input;

        let shaders = input.pipelines.iter().flat_map(|p| p.desc.shader_modules()).collect::<BTreeSet<_>>();
        let render_passes = input.pipelines.iter().filter_map(|p| p.desc.render_pass()).collect::<BTreeSet<_>>();
        let pipeline_layouts = input.pipelines.iter().map(|p| p.desc.layout()).collect::<BTreeSet<_>>();

        input.shader_modules.retain(|h, _| shaders.contains(h));
        input.render_passes.retain(|h, _| render_passes.contains(h));
        input.pipeline_layouts.retain(|h, _| pipeline_layouts.contains(h));

        let set_layouts = input
            .pipeline_layouts
            .values()
            .flat_map(|l| l.set_layouts.iter().copied())
            .collect::<BTreeSet<_>>();
        input.descriptor_set_layouts.retain(|h, _| set_layouts.contains(h));

        let samplers = input
            .descriptor_set_layouts
            .values()
            .flat_map(DescriptorSetLayoutDesc::referenced_samplers)
            .collect::<BTreeSet<_>>();
        input.samplers.retain(|h, _| samplers.contains(h));
    }
}

#[derive(Debug, Default)]
struct ReservationStats {
    current: ObjectReservation,
    max: ObjectReservation,
}

/// 捕获、导出、导入 pipeline 相关对象，并统计 object reservation
pub struct ResourceInterface {
    current_test_path: Mutex<String>,
    registry: Mutex<ResourceRegistry>,
    /// fault callback 可能不在测试线程上调用
    stats: Mutex<ReservationStats>,
    faults: Mutex<Vec<FaultData>>,

    cache_data: Mutex<Vec<u8>>,
    pool_sizes: Mutex<Vec<PipelinePoolSize>>,
    /// 导入的 pipeline cache 以及创建它的 device
    pipeline_cache: Mutex<Option<(vk::Device, Move<vk::PipelineCache>)>>,

    compiler: Option<Box<dyn ProgramCompiler>>,
}

// 构造
impl ResourceInterface {
    pub fn new() -> Self {
        Self {
            current_test_path: Mutex::new(String::new()),
            registry: Mutex::new(ResourceRegistry::default()),
            stats: Mutex::new(ReservationStats::default()),
            faults: Mutex::new(vec![]),
            cache_data: Mutex::new(vec![]),
            pool_sizes: Mutex::new(vec![]),
            pipeline_cache: Mutex::new(None),
            compiler: None,
        }
    }

    pub fn with_compiler(compiler: Box<dyn ProgramCompiler>) -> Self {
        Self {
            compiler: Some(compiler),
            ..Self::new()
        }
    }
}

impl Default for ResourceInterface {
    fn default() -> Self {
        Self::new()
    }
}

// 生命周期
impl ResourceInterface {
    pub fn init_test_case(&self, case_path: &str) {
        *self.current_test_path.lock() = case_path.to_string();
    }

    pub fn current_test_path(&self) -> String {
        self.current_test_path.lock().clone()
    }

    /// 子进程中用导入的 cache 数据创建只读的 pipeline cache
    pub fn init_device(&self, vkd: &Rc<dyn DeviceInterface>, subprocess: bool) -> VktResult<()> {
        if !subprocess {
            return Ok(());
        }
        let cache_data = self.cache_data.lock().clone();
        let info = vk::PipelineCacheCreateInfo::default().flags(SC_PIPELINE_CACHE_CREATE_FLAGS).initial_data(&cache_data);
        let cache = ref_util::create_pipeline_cache(vkd, &info)?;
        log::debug!("pipeline cache {:?} created from {} bytes", *cache, cache_data.len());
        *self.pipeline_cache.lock() = Some((vkd.handle(), cache));
        Ok(())
    }

    /// 在 device 销毁之前调用
    ///
    /// 多个 context 共享同一个 resource interface，只有 pipeline cache 所属的 device 才会清理它。
    pub fn deinit_device(&self, device: vk::Device) {
        let mut pipeline_cache = self.pipeline_cache.lock();
        if pipeline_cache.as_ref().is_some_and(|(owner, _)| *owner != device) {
            return;
        }
        pipeline_cache.take();
        self.cache_data.lock().clear();
    }

    /// 只有子进程中 `init_device` 之后才存在
    pub fn pipeline_cache(&self) -> VktResult<vk::PipelineCache> {
        self.pipeline_cache
            .lock()
            .as_ref()
            .map(|(_, c)| c.get())
            .ok_or_else(|| VktError::internal("pipeline cache requested before it was imported"))
    }

    /// 清空所有捕获的对象与统计
    pub fn reset_objects(&self) {
        *self.registry.lock() = ResourceRegistry::default();
        *self.stats.lock() = ReservationStats::default();
    }
}

// 捕获
impl ResourceInterface {
    /// `normal_mode` 时真实创建；否则记录描述并返回伪造的 handle
    pub fn create_shader_module(
        &self,
        vkd: &dyn DeviceInterface,
        info: &vk::ShaderModuleCreateInfo<'_>,
        normal_mode: bool,
    ) -> VktResult<vk::ShaderModule> {
        if normal_mode {
            return vkd.create_shader_module(info);
        }
        let mut registry = self.registry.lock();
        let handle = registry.fabricate();
        registry.input.shader_modules.insert(handle, ShaderModuleDesc::from_vk(info));
        Ok(vk::ShaderModule::from_raw(handle))
    }

    pub fn create_graphics_pipelines(
        &self,
        vkd: &dyn DeviceInterface,
        cache: vk::PipelineCache,
        infos: &[vk::GraphicsPipelineCreateInfo<'_>],
        normal_mode: bool,
    ) -> VktResult<Vec<vk::Pipeline>> {
        let descs = infos.iter().map(|info| PipelineDesc::Graphics(GraphicsPipelineDesc::from_vk(info))).collect();
        self.create_pipelines(descs, normal_mode, |cache_to_use| vkd.create_graphics_pipelines(cache_to_use, infos), cache)
    }

    pub fn create_compute_pipelines(
        &self,
        vkd: &dyn DeviceInterface,
        cache: vk::PipelineCache,
        infos: &[vk::ComputePipelineCreateInfo<'_>],
        normal_mode: bool,
    ) -> VktResult<Vec<vk::Pipeline>> {
        let descs = infos.iter().map(|info| PipelineDesc::Compute(ComputePipelineDesc::from_vk(info))).collect();
        self.create_pipelines(descs, normal_mode, |cache_to_use| vkd.create_compute_pipelines(cache_to_use, infos), cache)
    }

    fn create_pipelines(
        &self,
        descs: Vec<PipelineDesc>,
        normal_mode: bool,
        create: impl FnOnce(vk::PipelineCache) -> VktResult<Vec<vk::Pipeline>>,
        cache: vk::PipelineCache,
    ) -> VktResult<Vec<vk::Pipeline>> {
        let test_path = self.current_test_path();
        let entries = descs
            .into_iter()
            .map(|desc| {
                let json = desc.to_json()?;
                Ok(PipelineEntry {
                    identifier: PipelineIdentifier::new(&test_path, &json),
                    desc,
                })
            })
            .collect::<VktResult<Vec<_>>>()?;

        if normal_mode {
            // 导入的 cache 优先
            let imported = self.pipeline_cache.lock().as_ref().map(|(_, c)| c.get());
            if imported.is_some() {
                let registry = self.registry.lock();
                for entry in &entries {
                    if !registry.input.pipelines.iter().any(|p| p.identifier == entry.identifier) {
                        log::warn!("pipeline {:?} for {} is not in the imported cache", entry.identifier, test_path);
                    }
                }
            }
            for entry in &entries {
                log::debug!("pipeline {:?} for {}", entry.identifier, test_path);
            }
            return create(imported.unwrap_or(cache));
        }

        let mut registry = self.registry.lock();
        let handles = entries
            .into_iter()
            .map(|entry| {
                registry.add_pipeline(entry);
                vk::Pipeline::from_raw(registry.fabricate())
            })
            .collect();
        Ok(handles)
    }

    /// 记录已经由驱动创建的 render pass
    pub fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>, render_pass: vk::RenderPass) {
        self.registry
            .lock()
            .input
            .render_passes
            .entry(render_pass.as_raw())
            .or_insert_with(|| RenderPassDesc::from_vk(info));
    }

    pub fn create_render_pass2(&self, info: &vk::RenderPassCreateInfo2<'_>, render_pass: vk::RenderPass) {
        self.registry
            .lock()
            .input
            .render_passes
            .entry(render_pass.as_raw())
            .or_insert_with(|| RenderPassDesc::from_vk2(info));
    }

    pub fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo<'_>, layout: vk::PipelineLayout) {
        self.registry
            .lock()
            .input
            .pipeline_layouts
            .entry(layout.as_raw())
            .or_insert_with(|| PipelineLayoutDesc::from_vk(info));
    }

    pub fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
        layout: vk::DescriptorSetLayout,
    ) {
        self.registry
            .lock()
            .input
            .descriptor_set_layouts
            .entry(layout.as_raw())
            .or_insert_with(|| DescriptorSetLayoutDesc::from_vk(info));
    }

    pub fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>, sampler: vk::Sampler) {
        self.registry
            .lock()
            .input
            .samplers
            .entry(sampler.as_raw())
            .or_insert_with(|| SamplerDesc::from_vk(info));
    }

    #[inline]
    pub fn is_fabricated(&self, handle: RawHandle) -> bool {
        self.registry.lock().fabricated.contains(&handle)
    }

    /// 伪造的 handle 被销毁时调用，返回 false 表示不是伪造的 handle
    pub fn release_fabricated(&self, handle: RawHandle) -> bool {
        self.registry.lock().fabricated.remove(&handle)
    }

    pub fn remove_redundant_objects(&self) {
        self.registry.lock().remove_redundant_objects();
    }

    /// 当前捕获的对象图，memory reservation 使用统计到的最大值
    pub fn cache_input(&self) -> PipelineCacheInput {
        let mut input = self.registry.lock().input.clone();
        input.memory_reservation = self.stat_max();
        input
    }
}

// 导入导出
impl ResourceInterface {
    pub fn export_data_to_file(&self, path: &Path) -> VktResult<()> {
        let json = self.cache_input().to_json()?;
        std::fs::write(path, json)
            .map_err(|e| VktError::Resource(format!("failed to write {}: {e}", path.display())))?;
        log::info!("pipeline data exported to {}", path.display());
        Ok(())
    }

    /// 读入之前导出的对象图，替换当前捕获的所有对象
    pub fn import_data_from_file(&self, path: &Path) -> VktResult<()> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| VktError::Resource(format!("failed to read {}: {e}", path.display())))?;
        let input = PipelineCacheInput::from_json(&json)?;

        let fabricated = input
            .shader_modules
            .keys()
            .copied()
            .filter(|h| h & FABRICATED_HANDLE_TAG == FABRICATED_HANDLE_TAG)
            .collect::<BTreeSet<_>>();
        let counter = fabricated.iter().map(|h| h & !FABRICATED_HANDLE_TAG).max().unwrap_or(0);

        self.stats.lock().max = input.memory_reservation;
        *self.registry.lock() = ResourceRegistry {
            input,
            fabricated,
            fabricated_counter: counter,
        };
        Ok(())
    }

    /// 把捕获的对象图交给 `builder`，保存返回的 cache 数据与 pipeline pool 大小
    pub fn import_pipeline_cache_data(&self, builder: &dyn CacheBuilder, case_fraction_index: i32) -> VktResult<()> {
        let request = CreateCacheRequest {
            input: self.cache_input(),
            case_fraction_index,
        };
        let response = builder.create_pipeline_cache(&request)?;
        if !response.status {
            return Err(VktError::internal("pipeline cache builder reported a failure"));
        }

        log::info!(
            "imported pipeline cache: {} bytes, {} pipelines",
            response.binary.len(),
            response.pipeline_sizes.len()
        );
        *self.pool_sizes.lock() = pipeline_pool_sizes(&response.pipeline_sizes);
        *self.cache_data.lock() = response.binary;
        Ok(())
    }

    pub fn cache_data(&self) -> Vec<u8> {
        self.cache_data.lock().clone()
    }

    pub fn pipeline_pool_sizes(&self) -> Vec<PipelinePoolSize> {
        self.pool_sizes.lock().clone()
    }
}

// object reservation
impl ResourceInterface {
    pub fn register_object(&self, kind: ObjectKind) {
        let mut stats = self.stats.lock();
        let current = {
            let counter = reservation_counter(&mut stats.current, kind);
            *counter += 1;
            *counter
        };
        let max = reservation_counter(&mut stats.max, kind);
        *max = (*max).max(current);
    }

    pub fn unregister_object(&self, kind: ObjectKind) {
        let mut stats = self.stats.lock();
        let counter = reservation_counter(&mut stats.current, kind);
        *counter = counter.saturating_sub(1);
    }

    pub fn stat_current(&self) -> ObjectReservation {
        self.stats.lock().current
    }

    pub fn stat_max(&self) -> ObjectReservation {
        self.stats.lock().max
    }
}

// fault 与编译
impl ResourceInterface {
    pub fn record_fault(&self, fault: FaultData) {
        log::warn!("device fault: {:?} {:?} {}", fault.level, fault.kind, fault.description);
        self.faults.lock().push(fault);
    }

    pub fn faults(&self) -> Vec<FaultData> {
        self.faults.lock().clone()
    }

    pub fn compile_program(&self, source: &str, source_type: &str, build_options: &str) -> VktResult<Vec<u8>> {
        match self.compiler.as_ref() {
            Some(compiler) => compiler.compile(source, source_type, build_options),
            None => Err(VktError::not_supported("no shader compiler configured")),
        }
    }
}

/// 把 pipeline 相关的创建调用转给 [`ResourceInterface`] 的 device 函数表
///
/// 其余调用原样转发，并统计 object reservation。
pub struct DeviceDriverSc {
    device: Rc<dyn DeviceInterface>,
    resource_interface: Rc<ResourceInterface>,
    normal_mode: bool,
    pipeline_kinds: Mutex<BTreeMap<RawHandle, ObjectKind>>,
}

impl DeviceDriverSc {
    pub fn new(device: Rc<dyn DeviceInterface>, resource_interface: Rc<ResourceInterface>, normal_mode: bool) -> Self {
        Self {
            device,
            resource_interface,
            normal_mode,
            pipeline_kinds: Mutex::new(BTreeMap::new()),
        }
    }

    #[inline]
    pub fn is_normal_mode(&self) -> bool {
        self.normal_mode
    }

    fn created<T: Handle + Copy>(&self, kind: ObjectKind, result: VktResult<T>) -> VktResult<T> {
        if result.is_ok() {
            self.resource_interface.register_object(kind);
        }
        result
    }

    fn register_pipelines(&self, kind: ObjectKind, pipelines: &[vk::Pipeline]) {
        let mut kinds = self.pipeline_kinds.lock();
        for pipeline in pipelines {
            kinds.insert(pipeline.as_raw(), kind);
            self.resource_interface.register_object(kind);
        }
    }
}

impl DeviceInterface for DeviceDriverSc {
    #[inline]
    fn handle(&self) -> vk::Device {
        self.device.handle()
    }

    fn destroy_device(&self) {
        self.device.destroy_device()
    }

    fn device_wait_idle(&self) -> VktResult<()> {
        self.device.device_wait_idle()
    }

    fn get_device_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        self.device.get_device_queue(queue_family_index, queue_index)
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VktResult<vk::DeviceMemory> {
        self.created(ObjectKind::DeviceMemory, self.device.allocate_memory(info))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.resource_interface.unregister_object(ObjectKind::DeviceMemory);
        self.device.free_memory(memory)
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VktResult<*mut std::ffi::c_void> {
        self.device.map_memory(memory, offset, size)
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        self.device.unmap_memory(memory)
    }

    fn flush_mapped_memory_ranges(&self, ranges: &[vk::MappedMemoryRange<'_>]) -> VktResult<()> {
        self.device.flush_mapped_memory_ranges(ranges)
    }

    fn invalidate_mapped_memory_ranges(&self, ranges: &[vk::MappedMemoryRange<'_>]) -> VktResult<()> {
        self.device.invalidate_mapped_memory_ranges(ranges)
    }

    fn get_buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        self.device.get_buffer_memory_requirements(buffer)
    }

    fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        self.device.get_image_memory_requirements(image)
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VktResult<()> {
        self.device.bind_buffer_memory(buffer, memory, offset)
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VktResult<()> {
        self.device.bind_image_memory(image, memory, offset)
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VktResult<vk::Buffer> {
        self.created(ObjectKind::Buffer, self.device.create_buffer(info))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.resource_interface.unregister_object(ObjectKind::Buffer);
        self.device.destroy_buffer(buffer)
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VktResult<vk::Image> {
        self.created(ObjectKind::Image, self.device.create_image(info))
    }

    fn destroy_image(&self, image: vk::Image) {
        self.resource_interface.unregister_object(ObjectKind::Image);
        self.device.destroy_image(image)
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> VktResult<vk::Sampler> {
        let sampler = self.created(ObjectKind::Sampler, self.device.create_sampler(info))?;
        self.resource_interface.create_sampler(info, sampler);
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.resource_interface.unregister_object(ObjectKind::Sampler);
        self.device.destroy_sampler(sampler)
    }

    fn create_shader_module(&self, info: &vk::ShaderModuleCreateInfo<'_>) -> VktResult<vk::ShaderModule> {
        self.resource_interface.create_shader_module(self.device.as_ref(), info, self.normal_mode)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        if !self.resource_interface.release_fabricated(module.as_raw()) {
            self.device.destroy_shader_module(module)
        }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VktResult<vk::RenderPass> {
        let render_pass = self.created(ObjectKind::RenderPass, self.device.create_render_pass(info))?;
        self.resource_interface.create_render_pass(info, render_pass);
        Ok(render_pass)
    }

    fn create_render_pass2(&self, info: &vk::RenderPassCreateInfo2<'_>) -> VktResult<vk::RenderPass> {
        let render_pass = self.created(ObjectKind::RenderPass, self.device.create_render_pass2(info))?;
        self.resource_interface.create_render_pass2(info, render_pass);
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.resource_interface.unregister_object(ObjectKind::RenderPass);
        self.device.destroy_render_pass(render_pass)
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VktResult<vk::DescriptorSetLayout> {
        let layout = self.created(ObjectKind::DescriptorSetLayout, self.device.create_descriptor_set_layout(info))?;
        self.resource_interface.create_descriptor_set_layout(info, layout);
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.resource_interface.unregister_object(ObjectKind::DescriptorSetLayout);
        self.device.destroy_descriptor_set_layout(layout)
    }

    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo<'_>) -> VktResult<vk::PipelineLayout> {
        let layout = self.created(ObjectKind::PipelineLayout, self.device.create_pipeline_layout(info))?;
        self.resource_interface.create_pipeline_layout(info, layout);
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.resource_interface.unregister_object(ObjectKind::PipelineLayout);
        self.device.destroy_pipeline_layout(layout)
    }

    fn create_pipeline_cache(&self, info: &vk::PipelineCacheCreateInfo<'_>) -> VktResult<vk::PipelineCache> {
        self.created(ObjectKind::PipelineCache, self.device.create_pipeline_cache(info))
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        self.resource_interface.unregister_object(ObjectKind::PipelineCache);
        self.device.destroy_pipeline_cache(cache)
    }

    fn get_pipeline_cache_data(&self, cache: vk::PipelineCache) -> VktResult<Vec<u8>> {
        self.device.get_pipeline_cache_data(cache)
    }

    fn create_graphics_pipelines(
        &self,
        cache: vk::PipelineCache,
        infos: &[vk::GraphicsPipelineCreateInfo<'_>],
    ) -> VktResult<Vec<vk::Pipeline>> {
        let pipelines =
            self.resource_interface.create_graphics_pipelines(self.device.as_ref(), cache, infos, self.normal_mode)?;
        self.register_pipelines(ObjectKind::GraphicsPipeline, &pipelines);
        Ok(pipelines)
    }

    fn create_compute_pipelines(
        &self,
        cache: vk::PipelineCache,
        infos: &[vk::ComputePipelineCreateInfo<'_>],
    ) -> VktResult<Vec<vk::Pipeline>> {
        let pipelines =
            self.resource_interface.create_compute_pipelines(self.device.as_ref(), cache, infos, self.normal_mode)?;
        self.register_pipelines(ObjectKind::ComputePipeline, &pipelines);
        Ok(pipelines)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        if let Some(kind) = self.pipeline_kinds.lock().remove(&pipeline.as_raw()) {
            self.resource_interface.unregister_object(kind);
        }
        if !self.resource_interface.release_fabricated(pipeline.as_raw()) {
            self.device.destroy_pipeline(pipeline)
        }
    }

    fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VktResult<vk::Fence> {
        self.created(ObjectKind::Fence, self.device.create_fence(info))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.resource_interface.unregister_object(ObjectKind::Fence);
        self.device.destroy_fence(fence)
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], wait_all: bool, timeout: u64) -> VktResult<()> {
        self.device.wait_for_fences(fences, wait_all, timeout)
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VktResult<()> {
        self.device.reset_fences(fences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDriverConfig, MockPlatform};

    fn sampler_info() -> vk::SamplerCreateInfo<'static> {
        vk::SamplerCreateInfo::default().mag_filter(vk::Filter::LINEAR).min_filter(vk::Filter::LINEAR)
    }

    fn shader_info(code: &[u32]) -> vk::ShaderModuleCreateInfo<'_> {
        vk::ShaderModuleCreateInfo::default().code(code)
    }

    /// 捕获一个 compute pipeline：shader module、set layout（带 sampler）、pipeline layout
    fn capture_compute(ri: &ResourceInterface, vkd: &dyn DeviceInterface) -> (vk::ShaderModule, vk::Pipeline) {
        let sampler = vk::Sampler::from_raw(0x100);
        ri.create_sampler(&sampler_info(), sampler);
        ri.create_sampler(&sampler_info(), vk::Sampler::from_raw(0x101));

        let samplers = [sampler];
        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .immutable_samplers(&samplers)];
        let set_layout = vk::DescriptorSetLayout::from_raw(0x200);
        ri.create_descriptor_set_layout(&vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings), set_layout);
        ri.create_descriptor_set_layout(
            &vk::DescriptorSetLayoutCreateInfo::default(),
            vk::DescriptorSetLayout::from_raw(0x201),
        );

        let set_layouts = [set_layout];
        let layout = vk::PipelineLayout::from_raw(0x300);
        ri.create_pipeline_layout(&vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts), layout);
        ri.create_pipeline_layout(&vk::PipelineLayoutCreateInfo::default(), vk::PipelineLayout::from_raw(0x301));

        let module = ri.create_shader_module(vkd, &shader_info(&[0x0723_0203, 0, 1]), false).unwrap();
        let _unused = ri.create_shader_module(vkd, &shader_info(&[0x0723_0203, 0, 2]), false).unwrap();

        let info = vk::ComputePipelineCreateInfo::default()
            .stage(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::COMPUTE)
                    .module(module)
                    .name(c"main"),
            )
            .layout(layout);
        let pipelines = ri.create_compute_pipelines(vkd, vk::PipelineCache::null(), &[info], false).unwrap();
        (module, pipelines[0])
    }

    #[test]
    fn test_capture_fabricates_handles() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let vkd = platform.create_test_device();
        let ri = ResourceInterface::new();
        ri.init_test_case("dEQP-VK.capture.compute");

        let (module, pipeline) = capture_compute(&ri, vkd.as_ref());
        assert!(ri.is_fabricated(module.as_raw()));
        assert!(ri.is_fabricated(pipeline.as_raw()));
        assert_ne!(module.as_raw() & FABRICATED_HANDLE_TAG, 0);
        // 捕获模式不会调用驱动
        assert_eq!(platform.state().borrow().pipelines_created, 0);

        let input = ri.cache_input();
        assert_eq!(input.pipelines.len(), 1);
        assert_eq!(input.shader_modules.len(), 2);
    }

    #[test]
    fn test_remove_redundant_objects() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let vkd = platform.create_test_device();
        let ri = ResourceInterface::new();
        let (module, _) = capture_compute(&ri, vkd.as_ref());

        ri.remove_redundant_objects();
        let input = ri.cache_input();
        assert_eq!(input.shader_modules.keys().copied().collect::<Vec<_>>(), vec![module.as_raw()]);
        assert_eq!(input.pipeline_layouts.keys().copied().collect::<Vec<_>>(), vec![0x300]);
        assert_eq!(input.descriptor_set_layouts.keys().copied().collect::<Vec<_>>(), vec![0x200]);
        assert_eq!(input.samplers.keys().copied().collect::<Vec<_>>(), vec![0x100]);
        assert!(input.render_passes.is_empty());
    }

    #[test]
    fn test_reused_handle_keeps_first_description() {
        let ri = ResourceInterface::new();
        let sampler = vk::Sampler::from_raw(0x100);
        ri.create_sampler(&sampler_info(), sampler);
        ri.create_sampler(&vk::SamplerCreateInfo::default().mag_filter(vk::Filter::NEAREST), sampler);

        let input = ri.cache_input();
        assert_eq!(input.samplers.len(), 1);
        assert_eq!(input.samplers[&0x100].mag_filter, vk::Filter::LINEAR.as_raw());
    }

    #[test]
    fn test_identical_pipelines_are_deduplicated() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let vkd = platform.create_test_device();
        let ri = ResourceInterface::new();

        let info = vk::ComputePipelineCreateInfo::default()
            .stage(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::COMPUTE)
                    .module(vk::ShaderModule::from_raw(FABRICATED_HANDLE_TAG | 1))
                    .name(c"main"),
            )
            .layout(vk::PipelineLayout::from_raw(0x300));
        ri.init_test_case("a");
        let first = ri.create_compute_pipelines(vkd.as_ref(), vk::PipelineCache::null(), &[info], false).unwrap();
        let again = ri.create_compute_pipelines(vkd.as_ref(), vk::PipelineCache::null(), &[info], false).unwrap();
        assert_ne!(first[0], again[0]);
        assert_eq!(ri.cache_input().pipelines.len(), 1);

        // 另一个用例中相同的描述有自己的 identifier
        ri.init_test_case("b");
        ri.create_compute_pipelines(vkd.as_ref(), vk::PipelineCache::null(), &[info], false).unwrap();
        let pipelines = ri.cache_input().pipelines;
        assert_eq!(pipelines.len(), 2);
        assert_eq!(pipelines[0].desc, pipelines[1].desc);
        let json = pipelines[0].desc.to_json().unwrap();
        assert_eq!(pipelines[0].identifier, PipelineIdentifier::new("a", &json));
        assert_eq!(pipelines[1].identifier, PipelineIdentifier::new("b", &json));
    }

    #[test]
    fn test_export_import_round_trip() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let vkd = platform.create_test_device();
        let ri = ResourceInterface::new();
        capture_compute(&ri, vkd.as_ref());
        ri.register_object(ObjectKind::Buffer);
        ri.remove_redundant_objects();

        let path = std::env::temp_dir().join(format!("vkt-resource-interface-{}.json", std::process::id()));
        ri.export_data_to_file(&path).unwrap();

        let imported = ResourceInterface::new();
        imported.import_data_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(imported.cache_input(), ri.cache_input());
        assert_eq!(imported.stat_max().buffer_request_count, 1);
        let module = *imported.cache_input().shader_modules.keys().next().unwrap();
        assert!(imported.is_fabricated(module));
    }

    #[test]
    fn test_import_missing_file_is_resource_error() {
        let ri = ResourceInterface::new();
        let err = ri.import_data_from_file(Path::new("/nonexistent/vkt/pipelines.json")).unwrap_err();
        assert!(err.is_resource_error());
    }

    #[test]
    fn test_reservation_statistics() {
        let ri = ResourceInterface::new();
        ri.register_object(ObjectKind::Sampler);
        ri.register_object(ObjectKind::Sampler);
        ri.unregister_object(ObjectKind::Sampler);
        ri.register_object(ObjectKind::Sampler);
        ri.unregister_object(ObjectKind::Fence);

        assert_eq!(ri.stat_current().sampler_request_count, 2);
        assert_eq!(ri.stat_max().sampler_request_count, 2);
        assert_eq!(ri.stat_current().fence_request_count, 0);

        ri.reset_objects();
        assert_eq!(ri.stat_max(), ObjectReservation::default());
    }

    #[test]
    fn test_pipeline_cache_requires_import() {
        let ri = ResourceInterface::new();
        assert!(matches!(ri.pipeline_cache(), Err(VktError::Internal(_))));
        assert!(ri.compile_program("void main() {}", "comp", "").unwrap_err().is_not_supported());
    }

    struct FixedBuilder(bool);

    impl CacheBuilder for FixedBuilder {
        fn create_pipeline_cache(&self, request: &CreateCacheRequest) -> VktResult<CreateCacheResponse> {
            let sizes = request
                .input
                .pipelines
                .iter()
                .map(|p| PipelineSize {
                    identifier: p.identifier,
                    size: 4096,
                    count: 1,
                })
                .collect();
            Ok(CreateCacheResponse {
                status: self.0,
                binary: vec![1, 2, 3, 4],
                pipeline_sizes: sizes,
            })
        }
    }

    #[test]
    fn test_import_pipeline_cache_data() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let vkd = platform.create_test_device();
        let ri = ResourceInterface::new();
        capture_compute(&ri, vkd.as_ref());

        assert!(matches!(ri.import_pipeline_cache_data(&FixedBuilder(false), -1), Err(VktError::Internal(_))));

        ri.import_pipeline_cache_data(&FixedBuilder(true), -1).unwrap();
        assert_eq!(ri.cache_data(), vec![1, 2, 3, 4]);
        assert_eq!(
            ri.pipeline_pool_sizes(),
            vec![PipelinePoolSize {
                pool_entry_size: 4096,
                pool_entry_count: 1
            }]
        );

        // 子进程：用导入的数据创建只读 cache
        ri.init_device(&vkd, true).unwrap();
        assert!(ri.pipeline_cache().is_ok());

        // 其他 device 销毁时 cache 保持不变
        ri.deinit_device(vk::Device::from_raw(0xDEAD));
        assert!(ri.pipeline_cache().is_ok());
        assert_eq!(ri.cache_data(), vec![1, 2, 3, 4]);

        ri.deinit_device(vkd.handle());
        assert!(ri.pipeline_cache().is_err());
        assert!(ri.cache_data().is_empty());
    }

    #[test]
    fn test_device_driver_sc_routes_through_resource_interface() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let vkd = platform.create_test_device();
        let ri = Rc::new(ResourceInterface::new());
        let sc: Rc<dyn DeviceInterface> = Rc::new(DeviceDriverSc::new(vkd.clone(), ri.clone(), false));

        {
            let sampler = ref_util::create_sampler(&sc, &sampler_info()).unwrap();
            assert_eq!(ri.stat_current().sampler_request_count, 1);
            assert!(ri.cache_input().samplers.contains_key(&sampler.as_raw()));

            let module = ref_util::create_shader_module(&sc, &shader_info(&[0x0723_0203])).unwrap();
            assert!(ri.is_fabricated(module.as_raw()));
        }

        // 伪造的 shader module 不会到达驱动
        assert_eq!(ri.stat_current().sampler_request_count, 0);
        assert_eq!(ri.stat_max().sampler_request_count, 1);
        let state = platform.state();
        let state = state.borrow();
        assert_eq!(state.shader_modules_created, 0);
        assert!(state.live_objects.is_empty());
    }
}
