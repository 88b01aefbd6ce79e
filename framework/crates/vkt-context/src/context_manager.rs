//! instance 的创建与 device 的缓存
//!
//! 每个 [`ContextManager`] 对应一个 instance（一组 [`InstCaps`]），按能力 id 缓存 device：
//! - 已经创建过的 id 直接返回缓存的 [`Context`]，但仍然重新执行 `check_support`
//! - 新的 id 由测试填写 [`DevCaps`] 并创建 device；测试可以通过 `EnforceDefaultContext` 退回 default device
//! - default device 在第一次需要时创建，永远不会被淘汰；其余 device 按加入顺序淘汰，最多保留 `max_custom_devices` 个

use std::{
    cell::RefCell,
    collections::VecDeque,
    ffi::CString,
    fmt::Write,
    rc::Rc,
};

use ash::vk;
use itertools::Itertools;
use vkt_gfx::{
    device_features::{DeviceFeatures, FeatureChain, FeaturesVar, enabled_features10_names},
    device_properties::DeviceProperties,
    error::{VktError, VktResult},
    handle::{Deleter, Move, check},
    interface::{DeviceInterface, InstanceInterface, PlatformInterface},
    query::{c_chars_to_string, extension_name, format_api_version},
    resource_interface::{CacheBuilder, DeviceDriverSc, ResourceInterface},
};

use crate::{
    app_params::{ApplicationParameter, ParamScope, filter_application_parameters, read_application_parameters},
    command_line::CommandLine,
    context::Context,
    default_device::DefaultDevice,
    dev_caps::{DevCaps, RuntimeData},
    inst_caps::InstCaps,
    test_case::TestCase,
};

/// instance 级别的状态，由 manager、它创建的所有 context 与 caps 共享
///
/// 最后一个持有者释放时销毁 instance，因此 instance 总是晚于它的 device 销毁。
pub struct InstanceState {
    vkp: Rc<dyn PlatformInterface>,
    vki: Rc<dyn InstanceInterface>,
    inst_caps: InstCaps,

    physical_device: vk::PhysicalDevice,
    used_api_version: u32,

    device_extension_properties: Vec<vk::ExtensionProperties>,
    device_extensions: Vec<String>,
    device_features: DeviceFeatures,
    device_properties: DeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,

    application_parameters: Vec<ApplicationParameter>,

    _instance: Move<vk::Instance>,
}

impl InstanceState {
    fn new(vkp: Rc<dyn PlatformInterface>, cmd: &CommandLine, inst_caps: InstCaps) -> VktResult<Self> {
        let application_parameters = match cmd.app_params_input_file.as_deref() {
            Some(path) => read_application_parameters(path)?,
            None => vec![],
        };

        let to_cstrings = |names: &[String]| {
            names
                .iter()
                .map(|name| CString::new(name.as_str()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| VktError::internal(format!("invalid name: {e}")))
        };
        let extension_names = to_cstrings(&inst_caps.extensions())?;
        let layer_names = to_cstrings(inst_caps.layers())?;
        let extension_ptrs = extension_names.iter().map(|name| name.as_ptr()).collect_vec();
        let layer_ptrs = layer_names.iter().map(|name| name.as_ptr()).collect_vec();

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"vkt")
            .application_version(1)
            .engine_name(c"vkt")
            .engine_version(1)
            .api_version(inst_caps.used_api_version);
        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let vki = vkp.create_instance(&create_info, cmd.is_validation_enabled())?;
        let instance = Move::new(check(vki.handle())?, Deleter::instance(vki.clone()));
        log::info!(
            "instance '{}' created: api {}, extensions [{}], layers [{}]",
            inst_caps.id,
            format_api_version(inst_caps.used_api_version),
            inst_caps.extensions().iter().join(", "),
            inst_caps.layers().iter().join(", ")
        );

        let physical_devices = vki.enumerate_physical_devices()?;
        let physical_device = cmd
            .device_id
            .checked_sub(1)
            .and_then(|idx| physical_devices.get(idx as usize))
            .copied()
            .ok_or_else(|| {
                VktError::internal(format!(
                    "invalid --deqp-vk-device-id {}, {} physical devices available",
                    cmd.device_id,
                    physical_devices.len()
                ))
            })?;

        let core_properties = vki.get_physical_device_properties(physical_device);
        let used_api_version = inst_caps.used_api_version.min(core_properties.api_version);

        let device_extension_properties = vki.enumerate_device_extension_properties(physical_device)?;
        let device_extensions = device_extension_properties.iter().map(extension_name).collect_vec();
        let instance_extensions = inst_caps.extensions();
        let device_features = DeviceFeatures::new(
            vki.as_ref(),
            used_api_version,
            physical_device,
            &instance_extensions,
            &device_extension_properties,
        );
        let device_properties = DeviceProperties::new(
            vki.as_ref(),
            used_api_version,
            physical_device,
            &instance_extensions,
            &device_extension_properties,
        );
        let memory_properties = vki.get_physical_device_memory_properties(physical_device);

        log::info!(
            "physical device {}: {} (vendor {:#x}, device {:#x}), used api {}",
            cmd.device_id,
            c_chars_to_string(&core_properties.device_name),
            core_properties.vendor_id,
            core_properties.device_id,
            format_api_version(used_api_version)
        );
        let instance_params = filter_application_parameters(
            &application_parameters,
            ParamScope::Instance,
            core_properties.vendor_id,
            core_properties.device_id,
        );
        for param in instance_params {
            log::info!("instance application parameter {:#x} = {:#x}", param.key, param.value);
        }

        Ok(Self {
            vkp,
            vki,
            inst_caps,
            physical_device,
            used_api_version,
            device_extension_properties,
            device_extensions,
            device_features,
            device_properties,
            memory_properties,
            application_parameters,
            _instance: instance,
        })
    }
}

// getters
impl InstanceState {
    #[inline]
    pub fn vkp(&self) -> &dyn PlatformInterface {
        self.vkp.as_ref()
    }

    #[inline]
    pub fn vki(&self) -> &dyn InstanceInterface {
        self.vki.as_ref()
    }

    #[inline]
    pub fn instance(&self) -> vk::Instance {
        self.vki.handle()
    }

    #[inline]
    pub fn inst_caps(&self) -> &InstCaps {
        &self.inst_caps
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn used_api_version(&self) -> u32 {
        self.used_api_version
    }

    #[inline]
    pub fn device_extension_properties(&self) -> &[vk::ExtensionProperties] {
        &self.device_extension_properties
    }

    #[inline]
    pub fn device_extensions(&self) -> &[String] {
        &self.device_extensions
    }

    #[inline]
    pub fn device_features(&self) -> &DeviceFeatures {
        &self.device_features
    }

    #[inline]
    pub fn device_properties(&self) -> &DeviceProperties {
        &self.device_properties
    }

    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// 对当前 physical device 有效的参数
    pub fn application_parameters(&self, scope: ParamScope) -> Vec<ApplicationParameter> {
        let props = self.device_properties.core_properties();
        filter_application_parameters(&self.application_parameters, scope, props.vendor_id, props.device_id)
    }
}

/// 一个新创建的 device：dispatch 接口与负责销毁的 handle
pub struct CreatedDevice {
    pub device_interface: Rc<dyn DeviceInterface>,
    pub device: Move<vk::Device>,
}

pub struct ContextManager {
    command_line: Rc<CommandLine>,
    resource_interface: Rc<ResourceInterface>,
    max_custom_devices: u32,
    instance: Rc<InstanceState>,

    /// default context 总是第一项
    contexts: RefCell<Vec<(Rc<Context>, Rc<DevCaps>)>>,
    custom_managers: RefCell<VecDeque<Rc<ContextManager>>>,
    cache_builder: RefCell<Option<Rc<dyn CacheBuilder>>>,
}

// 创建
impl ContextManager {
    pub fn create(
        platform: Rc<dyn PlatformInterface>,
        command_line: Rc<CommandLine>,
        resource_interface: Rc<ResourceInterface>,
        max_custom_devices: u32,
        inst_caps: InstCaps,
    ) -> VktResult<Rc<Self>> {
        if max_custom_devices == 0 {
            return Err(VktError::internal("max custom devices must be greater than 0"));
        }

        let instance = InstanceState::new(platform, &command_line, inst_caps)?;
        Ok(Rc::new(Self {
            command_line,
            resource_interface,
            max_custom_devices,
            instance: Rc::new(instance),
            contexts: RefCell::new(vec![]),
            custom_managers: RefCell::new(VecDeque::new()),
            cache_builder: RefCell::new(None),
        }))
    }

    /// 子进程中构建 pipeline cache 的方式，自定义 instance 的 manager 会继承
    pub fn set_cache_builder(&self, builder: Rc<dyn CacheBuilder>) {
        *self.cache_builder.borrow_mut() = Some(builder);
    }
}

// getters
impl ContextManager {
    #[inline]
    pub fn instance_state(&self) -> &Rc<InstanceState> {
        &self.instance
    }

    #[inline]
    pub fn command_line(&self) -> &CommandLine {
        &self.command_line
    }

    #[inline]
    pub fn resource_interface(&self) -> &Rc<ResourceInterface> {
        &self.resource_interface
    }

    #[inline]
    pub fn max_custom_devices(&self) -> u32 {
        self.max_custom_devices
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.instance.inst_caps().id
    }

    #[inline]
    pub fn used_api_version(&self) -> u32 {
        self.instance.used_api_version()
    }

    #[inline]
    pub fn device_extensions(&self) -> &[String] {
        self.instance.device_extensions()
    }

    /// 包括 default context
    #[inline]
    pub fn context_count(&self) -> usize {
        self.contexts.borrow().len()
    }

    /// 已缓存的能力 id，按加入顺序
    pub fn context_ids(&self) -> Vec<String> {
        self.contexts.borrow().iter().map(|(_, caps)| caps.id.clone()).collect_vec()
    }

    #[inline]
    pub fn custom_manager_count(&self) -> usize {
        self.custom_managers.borrow().len()
    }
}

// 查找
impl ContextManager {
    /// 测试请求的 instance 不是默认的时候，查找或者创建对应的 manager
    pub fn find_custom_manager(self: &Rc<Self>, test_case: &dyn TestCase) -> VktResult<Rc<ContextManager>> {
        let inst_caps_id = test_case.instance_capabilities_id();
        if inst_caps_id == InstCaps::DEF_INST_ID {
            return Ok(self.clone());
        }

        if let Some(manager) = self.custom_managers.borrow().iter().find(|m| m.id() == inst_caps_id) {
            return Ok(manager.clone());
        }

        let mut inst_caps = InstCaps::new(self.instance.vkp(), &self.command_line, inst_caps_id)?;
        test_case.init_instance_capabilities(&mut inst_caps)?;
        let manager = ContextManager::create(
            self.instance.vkp.clone(),
            self.command_line.clone(),
            self.resource_interface.clone(),
            self.max_custom_devices,
            inst_caps,
        )?;
        if let Some(builder) = self.cache_builder.borrow().clone() {
            manager.set_cache_builder(builder);
        }

        let mut managers = self.custom_managers.borrow_mut();
        if managers.len() > self.max_custom_devices as usize {
            managers.pop_front();
        }
        managers.push_back(manager.clone());
        Ok(manager)
    }

    /// default context，第一次调用时创建
    pub fn default_context(&self) -> VktResult<Rc<Context>> {
        if let Some((ctx, _)) = self.contexts.borrow().iter().find(|(ctx, _)| ctx.is_default_context()) {
            return Ok(ctx.clone());
        }

        let default_device = DefaultDevice::new(self)?;
        let caps = Rc::new(default_device.caps().clone());
        let ctx = Rc::new(default_device.into_context(self));
        self.contexts.borrow_mut().insert(0, (ctx.clone(), caps));
        Ok(ctx)
    }

    fn cached_context(&self, caps_id: &str) -> Option<Rc<Context>> {
        self.contexts.borrow().iter().find(|(_, caps)| caps.id == caps_id).map(|(ctx, _)| ctx.clone())
    }

    /// 为测试找到合适的 context
    ///
    /// `default_context` 总是被设置为 default context，测试失败时调用者可以用它报告结果。
    /// 解析过程中任何一步返回 `EnforceDefaultContext`，都退回到当前用于检查的 context。
    pub fn find_context(
        &self,
        test_case: &dyn TestCase,
        default_context: &mut Option<Rc<Context>>,
    ) -> VktResult<Rc<Context>> {
        let def = self.default_context()?;
        *default_context = Some(def.clone());

        let mut check_context = def;
        match self.resolve_context(test_case, &mut check_context) {
            Err(VktError::EnforceDefaultContext) => {
                log::debug!("'{}' falls back to context '{}'", test_case.name(), check_context.caps_id());
                *default_context = Some(check_context.clone());
                Ok(check_context)
            }
            other => other,
        }
    }

    fn resolve_context(&self, test_case: &dyn TestCase, check_context: &mut Rc<Context>) -> VktResult<Rc<Context>> {
        let searched_id = test_case.required_capabilities_id();
        if let Some(ctx) = self.cached_context(&searched_id) {
            *check_context = ctx.clone();
            test_case.delayed_init()?;
            test_case.check_support(&ctx)?;
            return Ok(ctx);
        }

        test_case.delayed_init()?;
        test_case.check_support(check_context)?;

        let mut caps = DevCaps::new(searched_id, self);
        test_case.init_device_capabilities(&mut caps)?;

        let mut runtime_data = RuntimeData::default();
        let created = self.create_device(&caps, &mut runtime_data)?;
        let ctx = Rc::new(Context::new(self, &caps, runtime_data, created));

        self.keep_max_custom_device_count();
        self.contexts.borrow_mut().push((ctx.clone(), Rc::new(caps)));
        Ok(ctx)
    }

    /// 为即将加入的 context 腾出位置，default context 不会被移除
    pub fn keep_max_custom_device_count(&self) {
        let mut contexts = self.contexts.borrow_mut();
        while contexts.len() > self.max_custom_devices as usize {
            let Some(idx) = contexts.iter().position(|(ctx, _)| !ctx.is_default_context()) else {
                break;
            };
            let (_, caps) = contexts.remove(idx);
            log::debug!("evicting device '{}'", caps.id);
        }
    }
}

// device 创建
impl ContextManager {
    pub fn create_device(&self, caps: &DevCaps, runtime_data: &mut RuntimeData) -> VktResult<CreatedDevice> {
        let cmd = &self.command_line;
        let vki = self.instance.vki();

        if cmd.is_vksc() && cmd.is_subprocess() {
            let builder = self
                .cache_builder
                .borrow()
                .clone()
                .ok_or_else(|| VktError::internal("no pipeline cache builder configured"))?;
            self.resource_interface.import_pipeline_cache_data(builder.as_ref(), cmd.case_fraction_index)?;
            log::info!("object reservation for '{}': {:?}", caps.id, self.resource_interface.stat_max());
        }

        let queue_requests = runtime_data.reset_queues(caps)?;
        let queue_infos = queue_requests.create_infos();

        let extension_names = caps
            .physical_device_extensions()
            .iter()
            .map(|name| CString::new(name.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VktError::internal(format!("invalid extension name: {e}")))?;
        let extension_ptrs = extension_names.iter().map(|name| name.as_ptr()).collect_vec();

        let mut chain = caps.device_create_chain();
        self.log_device_recipe(caps, &extension_names, &queue_infos, &chain);
        for param in self.instance.application_parameters(ParamScope::Device) {
            log::info!("device application parameter {:#x} = {:#x}", param.key, param.value);
        }

        let raw = chain.with_chain(|head| {
            let mut create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_infos)
                .enabled_extension_names(&extension_ptrs);
            create_info.p_next = head;
            vki.create_device(self.instance.physical_device(), &create_info)
        })?;
        let device = Move::new(check(raw.handle())?, Deleter::device(raw.clone()));

        let device_interface: Rc<dyn DeviceInterface> = if cmd.is_vksc() {
            self.resource_interface.init_device(&raw, cmd.is_subprocess())?;
            Rc::new(DeviceDriverSc::new(raw, self.resource_interface.clone(), cmd.is_subprocess()))
        } else {
            raw
        };

        Ok(CreatedDevice {
            device_interface,
            device,
        })
    }

    /// 日志文件名中包含 devcaps 时以 info 级别输出
    fn log_device_recipe(
        &self,
        caps: &DevCaps,
        extensions: &[CString],
        queue_infos: &[vk::DeviceQueueCreateInfo<'_>],
        chain: &FeatureChain,
    ) {
        let level = if self.command_line.log_filename.contains("devcaps") {
            log::Level::Info
        } else {
            log::Level::Debug
        };
        if !log::log_enabled!(level) {
            return;
        }
        log::log!(level, "{}", device_recipe(&caps.id, extensions, queue_infos, chain.items()));
    }
}

fn device_recipe(
    id: &str,
    extensions: &[CString],
    queue_infos: &[vk::DeviceQueueCreateInfo<'_>],
    features: &[FeaturesVar],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Trying to create logical device '{id}'");
    let _ = writeln!(out, "      queueCreateInfoCount:  {}", queue_infos.len());
    for (i, info) in queue_infos.iter().enumerate() {
        let _ = writeln!(out, "        {i}: family {}, count {}", info.queue_family_index, info.queue_count);
    }
    let _ = writeln!(out, "      enabledExtensionCount: {}", extensions.len());
    for (i, name) in extensions.iter().enumerate() {
        let _ = writeln!(out, "        {i}: {}", name.to_string_lossy());
    }
    let _ = writeln!(out, "      pEnabledFeatures: nullptr");
    for (i, feature) in features.iter().enumerate() {
        let prefix = if i == 0 { "      pNext: " } else { "             " };
        let _ = writeln!(out, "{prefix}{}", feature.name());
        if let FeaturesVar::Features2(f2) = feature {
            for name in enabled_features10_names(&f2.features) {
                let _ = writeln!(out, "               {name}: true");
            }
        }
    }
    out
}
