//! 内置的设备能力用例

use std::rc::Rc;

use ash::vk::{self, Handle};
use vkt_context::{
    context::Context,
    dev_caps::DevCaps,
    test_case::{TestCase, TestInstance, TestStatus},
};
use vkt_gfx::{
    error::{VktError, VktResult},
    mem_util::{Allocator, MemoryRequirement},
    query::{format_api_version, wait_for_fence},
    ref_util,
};

/// 一次迭代就得出结果
struct Immediate(Option<TestStatus>);

impl Immediate {
    fn boxed(status: TestStatus) -> Box<dyn TestInstance> {
        Box::new(Self(Some(status)))
    }
}

impl TestInstance for Immediate {
    fn iterate(&mut self) -> VktResult<TestStatus> {
        self.0.take().ok_or_else(|| VktError::internal("iterated after the result was reported"))
    }
}

/// 打印 default context 的基本信息
pub struct DeviceInfoCase;

impl TestCase for DeviceInfoCase {
    fn name(&self) -> &str {
        "info.device"
    }

    fn create_instance(&self, context: &Rc<Context>) -> VktResult<Box<dyn TestInstance>> {
        let props = context.device_properties().core_properties();
        log::info!(
            "device {:?}, vendor {:#x}, api {}",
            props.device_name_as_c_str().unwrap_or(c"unknown"),
            props.vendor_id,
            format_api_version(context.used_api_version())
        );
        log::info!("{} device extensions enabled", context.device_extensions().len());
        Ok(Immediate::boxed(TestStatus::Pass(format!(
            "{} queue(s), {} memory types",
            context.queue_count(),
            context.memory_properties().memory_type_count
        ))))
    }
}

pub struct TimelineSemaphoreCase;

impl TestCase for TimelineSemaphoreCase {
    fn name(&self) -> &str {
        "api.features.timeline_semaphore"
    }

    fn check_support(&self, context: &Context) -> VktResult<()> {
        context.require_device_functionality("VK_KHR_timeline_semaphore")
    }

    fn init_device_capabilities(&self, caps: &mut DevCaps) -> VktResult<()> {
        caps.add_extension("VK_KHR_timeline_semaphore", true);
        caps.add_feature_with::<vk::PhysicalDeviceTimelineSemaphoreFeatures>(|f| f.timeline_semaphore = vk::TRUE)
    }

    fn required_capabilities_id(&self) -> String {
        "timeline_semaphore".to_string()
    }

    fn create_instance(&self, context: &Rc<Context>) -> VktResult<Box<dyn TestInstance>> {
        let status = if context.caps_id() == self.required_capabilities_id() {
            TestStatus::Pass("timeline semaphores enabled".to_string())
        } else {
            TestStatus::Fail(format!("ran on context '{}'", context.caps_id()))
        };
        Ok(Immediate::boxed(status))
    }
}

pub struct NullDescriptorCase;

impl TestCase for NullDescriptorCase {
    fn name(&self) -> &str {
        "api.features.robustness2.null_descriptor"
    }

    fn check_support(&self, context: &Context) -> VktResult<()> {
        context.require_device_functionality("VK_EXT_robustness2")
    }

    fn init_device_capabilities(&self, caps: &mut DevCaps) -> VktResult<()> {
        if !caps.add_extension("VK_EXT_robustness2", true) {
            return Err(VktError::not_supported("VK_EXT_robustness2"));
        }
        let added = caps.add_feature_if_supported::<vk::PhysicalDeviceRobustness2FeaturesEXT>(
            |f| f.null_descriptor,
            |f| f.null_descriptor = vk::TRUE,
        )?;
        if !added {
            return Err(VktError::not_supported("nullDescriptor"));
        }
        Ok(())
    }

    fn required_capabilities_id(&self) -> String {
        "robustness2.null_descriptor".to_string()
    }

    fn create_instance(&self, _context: &Rc<Context>) -> VktResult<Box<dyn TestInstance>> {
        Ok(Immediate::boxed(TestStatus::Pass("nullDescriptor enabled".to_string())))
    }
}

/// 写入 host visible 内存再读回
pub struct HostVisibleMemoryCase;

impl TestCase for HostVisibleMemoryCase {
    fn name(&self) -> &str {
        "memory.allocation.host_visible"
    }

    fn create_instance(&self, context: &Rc<Context>) -> VktResult<Box<dyn TestInstance>> {
        const SIZE: usize = 4096;
        let reqs = vk::MemoryRequirements {
            size: SIZE as vk::DeviceSize,
            alignment: 256,
            memory_type_bits: !0,
        };
        let allocation = context.default_allocator().allocate_for(&reqs, MemoryRequirement::HOST_VISIBLE)?;

        let ptr = allocation.host_ptr()?.as_ptr() as *mut u8;
        // SAFETY: allocation 映射了至少 SIZE 字节，且在本函数内保持映射
        let data = unsafe { std::slice::from_raw_parts_mut(ptr, SIZE) };
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        allocation.flush_mapped_range()?;
        allocation.invalidate_mapped_range()?;

        let status = match data.iter().enumerate().find(|(i, b)| **b != (*i % 251) as u8) {
            None => TestStatus::Pass(format!("{SIZE} bytes verified")),
            Some((i, b)) => TestStatus::Fail(format!("byte {i} reads back as {b:#x}")),
        };
        Ok(Immediate::boxed(status))
    }
}

/// 只包含一个空 main 的 compute shader
const EMPTY_COMPUTE_SPIRV: [u32; 35] = [
    // header：magic、1.0、generator、bound、schema
    0x0723_0203, 0x0001_0000, 0, 5, 0,
    // OpCapability Shader
    0x0002_0011, 1,
    // OpMemoryModel Logical GLSL450
    0x0003_000E, 0, 1,
    // OpEntryPoint GLCompute %1 "main"
    0x0005_000F, 5, 1, 0x6E69_616D, 0,
    // OpExecutionMode %1 LocalSize 1 1 1
    0x0006_0010, 1, 17, 1, 1, 1,
    // %2 = OpTypeVoid; %3 = OpTypeFunction %2
    0x0002_0013, 2, 0x0003_0021, 3, 2,
    // %1 = OpFunction %2 None %3; OpLabel; OpReturn; OpFunctionEnd
    0x0005_0036, 2, 1, 0, 3, 0x0002_00F8, 4, 0x0001_00FD, 0x0001_0038,
];

/// sampler → descriptor set layout → pipeline layout → compute pipeline
///
/// Vulkan SC 的主进程中这些对象会被捕获，子进程中 pipeline 从导入的 cache 创建。
pub struct ComputePipelineCase;

impl TestCase for ComputePipelineCase {
    fn name(&self) -> &str {
        "pipeline.compute.empty_shader"
    }

    fn create_instance(&self, context: &Rc<Context>) -> VktResult<Box<dyn TestInstance>> {
        let vkd = context.device_interface();
        let sampler = ref_util::create_sampler(
            vkd,
            &vk::SamplerCreateInfo::default().mag_filter(vk::Filter::LINEAR).min_filter(vk::Filter::LINEAR),
        )?;

        let samplers = [sampler.get()];
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .immutable_samplers(&samplers),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
        ];
        let set_layout = ref_util::create_descriptor_set_layout(
            vkd,
            &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
        )?;

        let set_layouts = [set_layout.get()];
        let push_constants = [vk::PushConstantRange::default().stage_flags(vk::ShaderStageFlags::COMPUTE).size(16)];
        let layout = ref_util::create_pipeline_layout(
            vkd,
            &vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts).push_constant_ranges(&push_constants),
        )?;

        let module =
            ref_util::create_shader_module(vkd, &vk::ShaderModuleCreateInfo::default().code(&EMPTY_COMPUTE_SPIRV))?;
        let info = vk::ComputePipelineCreateInfo::default()
            .stage(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::COMPUTE)
                    .module(module.get())
                    .name(c"main"),
            )
            .layout(layout.get());
        let pipeline = ref_util::create_compute_pipeline(vkd, vk::PipelineCache::null(), &info)?;

        log::debug!("compute pipeline {:#x} created", pipeline.get().as_raw());
        Ok(Immediate::boxed(TestStatus::Pass("compute pipeline created".to_string())))
    }
}

pub struct FenceCase;

impl TestCase for FenceCase {
    fn name(&self) -> &str {
        "synchronization.fence.signaled_wait"
    }

    fn create_instance(&self, context: &Rc<Context>) -> VktResult<Box<dyn TestInstance>> {
        let vkd = context.device_interface();
        let fence = ref_util::create_fence(vkd, vk::FenceCreateFlags::SIGNALED)?;
        wait_for_fence(vkd.as_ref(), fence.get(), Some(1_000_000_000))?;
        vkd.reset_fences(&[fence.get()])?;
        Ok(Immediate::boxed(TestStatus::Pass("signaled fence waited".to_string())))
    }
}

/// 所有内置用例，按执行顺序
pub fn builtin_cases() -> Vec<Box<dyn TestCase>> {
    vec![
        Box::new(DeviceInfoCase),
        Box::new(HostVisibleMemoryCase),
        Box::new(FenceCase),
        Box::new(ComputePipelineCase),
        Box::new(TimelineSemaphoreCase),
        Box::new(NullDescriptorCase),
    ]
}
