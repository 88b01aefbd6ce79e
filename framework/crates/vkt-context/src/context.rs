use std::rc::Rc;

use ash::vk;
use vkt_gfx::{
    device_features::DeviceFeatures,
    device_properties::DeviceProperties,
    error::{VktError, VktResult},
    handle::Move,
    interface::{DeviceInterface, InstanceInterface},
    mem_util::SimpleAllocator,
    query::{api_version_supports, is_core_device_extension, is_instance_extension_supported},
    resource_interface::{FaultData, ResourceInterface},
};

use crate::{
    app_params::{ApplicationParameter, ParamScope},
    context_manager::{ContextManager, CreatedDevice, InstanceState},
    dev_caps::{DevCaps, QueueInfo, RuntimeData},
};

/// 测试实例运行时看到的一切：instance、physical device、logical device 以及它们的能力
pub struct Context {
    resource_interface: Rc<ResourceInterface>,

    caps_id: String,
    device_extensions: Vec<String>,
    runtime_data: RuntimeData,
    universal_queue: QueueInfo,
    sc_device: bool,

    allocator: SimpleAllocator,
    device_interface: Rc<dyn DeviceInterface>,
    device: Move<vk::Device>,
    /// 字段按声明顺序销毁，instance 必须在 device 之后
    instance: Rc<InstanceState>,
}

impl Context {
    pub fn new(manager: &ContextManager, caps: &DevCaps, runtime_data: RuntimeData, created: CreatedDevice) -> Self {
        let CreatedDevice {
            device_interface,
            device,
        } = created;

        let instance = manager.instance_state().clone();
        let allocator = SimpleAllocator::new(device_interface.clone(), *instance.memory_properties());
        // 第一个请求的队列总是 universal queue
        let universal_queue = runtime_data.get_queue(device_interface.as_ref(), 0).unwrap_or(QueueInfo {
            queue: vk::Queue::null(),
            family_index: vk::QUEUE_FAMILY_IGNORED,
        });

        log::info!("context '{}' ready, device {:?}", caps.id, device.get());
        Self {
            resource_interface: manager.resource_interface().clone(),
            caps_id: caps.id.clone(),
            device_extensions: caps.physical_device_extensions().to_vec(),
            runtime_data,
            universal_queue,
            sc_device: manager.command_line().is_vksc(),
            allocator,
            device_interface,
            device,
            instance,
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        log::debug!("destroying context '{}'", self.caps_id);
        if self.sc_device {
            self.resource_interface.deinit_device(self.device.get());
        }
    }
}

// device
impl Context {
    #[inline]
    pub fn device(&self) -> vk::Device {
        self.device.get()
    }

    #[inline]
    pub fn device_interface(&self) -> &Rc<dyn DeviceInterface> {
        &self.device_interface
    }

    #[inline]
    pub fn universal_queue(&self) -> vk::Queue {
        self.universal_queue.queue
    }

    #[inline]
    pub fn universal_queue_family_index(&self) -> u32 {
        self.universal_queue.family_index
    }

    /// 按请求顺序编号的队列
    pub fn queue(&self, index: u32) -> VktResult<QueueInfo> {
        self.runtime_data.get_queue(self.device_interface.as_ref(), index)
    }

    #[inline]
    pub fn queue_count(&self) -> usize {
        self.runtime_data.queue_count()
    }

    #[inline]
    pub fn default_allocator(&self) -> &SimpleAllocator {
        &self.allocator
    }

    #[inline]
    pub fn device_extensions(&self) -> &[String] {
        &self.device_extensions
    }

    #[inline]
    pub fn is_default_context(&self) -> bool {
        self.caps_id == DevCaps::DEF_DEV_ID
    }

    #[inline]
    pub fn caps_id(&self) -> &str {
        &self.caps_id
    }
}

// instance / physical device
impl Context {
    #[inline]
    pub fn instance(&self) -> vk::Instance {
        self.instance.instance()
    }

    #[inline]
    pub fn instance_interface(&self) -> &dyn InstanceInterface {
        self.instance.vki()
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.instance.physical_device()
    }

    pub fn instance_extensions(&self) -> Vec<String> {
        self.instance.inst_caps().extensions()
    }

    #[inline]
    pub fn used_api_version(&self) -> u32 {
        self.instance.used_api_version()
    }

    #[inline]
    pub fn context_supports(&self, api_version: u32) -> bool {
        api_version_supports(self.used_api_version(), api_version)
    }

    #[inline]
    pub fn device_features(&self) -> &DeviceFeatures {
        self.instance.device_features()
    }

    #[inline]
    pub fn device_properties(&self) -> &DeviceProperties {
        self.instance.device_properties()
    }

    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        self.instance.memory_properties()
    }

    pub fn application_parameters(&self, scope: ParamScope) -> Vec<ApplicationParameter> {
        self.instance.application_parameters(scope)
    }
}

// 功能查询
impl Context {
    /// 扩展已经进入 core，或者在这个 device 上被启用
    pub fn is_device_functionality_supported(&self, name: &str) -> bool {
        is_core_device_extension(self.used_api_version(), name) || self.device_extensions.iter().any(|e| e == name)
    }

    pub fn require_device_functionality(&self, name: &str) -> VktResult<()> {
        if self.is_device_functionality_supported(name) {
            Ok(())
        } else {
            Err(VktError::not_supported(format!("{name} is not supported")))
        }
    }

    pub fn is_instance_functionality_supported(&self, name: &str) -> bool {
        is_instance_extension_supported(self.used_api_version(), &self.instance_extensions(), name)
    }

    pub fn require_instance_functionality(&self, name: &str) -> VktResult<()> {
        if self.is_instance_functionality_supported(name) {
            Ok(())
        } else {
            Err(VktError::not_supported(format!("{name} is not supported")))
        }
    }
}

// Vulkan SC
impl Context {
    #[inline]
    pub fn resource_interface(&self) -> &Rc<ResourceInterface> {
        &self.resource_interface
    }

    pub fn record_fault(&self, fault: FaultData) {
        self.resource_interface.record_fault(fault);
    }

    pub fn faults(&self) -> Vec<FaultData> {
        self.resource_interface.faults()
    }
}
