//! 创建 device 所需的能力：扩展、feature 结构体、队列
//!
//! feature 结构体以 sType 为身份保存在有序列表中，同一个 sType 最多出现一次。
//! 同一组 feature 可以由 Vulkan 1.x 的 blob 结构体或者单独的扩展结构体表达，两者不能同时出现在 pNext 链中，
//! 加入新结构体之前由 [`DevCaps::verify_feature`] 检查冲突。

use std::{collections::HashMap, fmt, rc::Rc};

use ash::vk;
use itertools::Itertools;
use vkt_gfx::{
    device_features::{
        BlobKind, ChainItem, FEATURES10_STYPE, FeatureChain, FeatureDesc, FeatureStruct, FeaturesVar,
        blob_for_api_version, feature_desc, features10_bools, features10_bools_mut, version_blob_features,
    },
    error::{VktError, VktResult},
    interface::DeviceInterface,
    query::{api_version_major_minor, find_queue_family_index_with_caps, is_core_device_extension},
};

use crate::context_manager::{ContextManager, InstanceState};

/// 一组队列的请求
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueueCreateInfo {
    /// queue family 必须包含的能力
    pub required: vk::QueueFlags,
    /// queue family 不能包含的能力
    pub excluded: vk::QueueFlags,
    pub count: u32,
    pub priority: f32,
}

/// [`DevCaps::verify_feature`] 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureStatus {
    Ok,
    AlreadyExists,
    WrongApiVersion,
    BlobInFeatures,
    FeatureInBlob,
}

impl FeatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::AlreadyExists => "AlreadyExists",
            Self::WrongApiVersion => "WrongApiVersion",
            Self::BlobInFeatures => "BlobInFeatures",
            Self::FeatureInBlob => "FeatureInBlob",
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已加入的 feature 结构体
#[derive(Clone, Copy, Debug)]
pub struct FeatureInfo<'a> {
    pub desc: &'static FeatureDesc,
    pub value: &'a FeaturesVar,
    /// 在加入顺序中的位置
    pub index: usize,
}

/// device 的能力请求
#[derive(Clone)]
pub struct DevCaps {
    pub id: String,

    instance: Rc<InstanceState>,
    compute_only: bool,

    /// 自有模式下的扩展列表
    extensions: Vec<String>,
    /// 继承模式：使用 device 报告的所有扩展
    inherited_extensions: bool,

    features: Vec<FeaturesVar>,
    queue_create_infos: Vec<QueueCreateInfo>,
}

impl DevCaps {
    pub const DEF_DEV_ID: &'static str = "default";

    pub fn new(id: impl Into<String>, manager: &ContextManager) -> Self {
        let mut caps = Self {
            id: id.into(),
            instance: manager.instance_state().clone(),
            compute_only: manager.command_line().is_compute_only(),
            extensions: vec![],
            inherited_extensions: true,
            features: vec![],
            queue_create_infos: vec![],
        };
        caps.reset();
        caps
    }

    /// 继承所有扩展，没有 feature，一个 universal queue
    pub fn reset(&mut self) {
        self.features.clear();
        self.set_inherited_extensions();
        self.queue_create_infos = vec![QueueCreateInfo {
            required: if self.compute_only {
                vk::QueueFlags::COMPUTE
            } else {
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE
            },
            excluded: vk::QueueFlags::empty(),
            count: 1,
            priority: 1.0,
        }];
    }

    #[inline]
    pub fn is_default(&self) -> bool {
        self.id == Self::DEF_DEV_ID
    }

    #[inline]
    pub fn used_api_version(&self) -> u32 {
        self.instance.used_api_version()
    }
}

// 扩展
impl DevCaps {
    /// 扩展不可用时返回 false
    ///
    /// `check_if_in_core` 时，已经进入 core 的扩展不需要加入。
    /// 第一次加入扩展时从继承模式切换到自有模式，之后只启用显式加入的扩展。
    pub fn add_extension(&mut self, name: &str, check_if_in_core: bool) -> bool {
        if check_if_in_core && is_core_device_extension(self.used_api_version(), name) {
            return true;
        }
        if !self.instance.device_extensions().iter().any(|e| e == name) {
            log::debug!("caps '{}': extension {name} is not available", self.id);
            return false;
        }

        if self.inherited_extensions {
            self.set_own_extensions();
        }
        if !self.extensions.iter().any(|e| e == name) {
            self.extensions.push(name.to_string());
        }
        true
    }

    pub fn set_inherited_extensions(&mut self) {
        self.extensions.clear();
        self.inherited_extensions = true;
    }

    fn set_own_extensions(&mut self) {
        self.inherited_extensions = false;
    }

    #[inline]
    pub fn has_inherited_extensions(&self) -> bool {
        self.inherited_extensions
    }

    /// 创建 device 时启用的扩展
    pub fn physical_device_extensions(&self) -> &[String] {
        if self.inherited_extensions { self.instance.device_extensions() } else { &self.extensions }
    }
}

// features
impl DevCaps {
    /// device 报告的 `T`，`VkPhysicalDeviceFeatures` 与 `VkPhysicalDeviceFeatures2` 总是存在
    fn device_value<T: FeatureStruct>(&self) -> Option<T> {
        let device_features = self.instance.device_features();
        if T::DESC.s_type == FEATURES10_STYPE {
            T::from_var(&device_features.core_features().into_var()).copied()
        } else if T::DESC.s_type == vk::StructureType::PHYSICAL_DEVICE_FEATURES_2 {
            T::from_var(&device_features.core_features2().into_var()).copied()
        } else {
            device_features.get::<T>().copied()
        }
    }

    fn position(&self, s_type: vk::StructureType) -> Option<usize> {
        self.features.iter().position(|f| f.s_type() == s_type)
    }

    /// 保存的结构体不能带有外部的 pNext
    fn detached(mut var: FeaturesVar) -> FeaturesVar {
        if let Some(p) = var.base_out_ptr() {
            unsafe { (*p).p_next = std::ptr::null_mut() };
        }
        var
    }

    fn insert_or_replace(&mut self, var: FeaturesVar) -> VktResult<()> {
        let var = Self::detached(var);
        match self.position(var.s_type()) {
            Some(idx) => self.features[idx] = var,
            None => {
                self.verify_feature(var.s_type(), false)?;
                self.features.push(var);
            }
        }
        Ok(())
    }

    /// 启用 device 对 `T` 报告的所有 feature
    pub fn add_feature<T: FeatureStruct>(&mut self) -> VktResult<&mut T> {
        let value = self
            .device_value::<T>()
            .ok_or_else(|| VktError::not_supported(format!("{} is not supported by the device", T::DESC.name)))?;
        self.insert_or_replace(value.into_var())?;
        self.feature_mut::<T>()
    }

    /// 已存在时在原值上修改，否则从零值开始
    pub fn add_feature_with<T: FeatureStruct>(&mut self, setter: impl FnOnce(&mut T)) -> VktResult<()> {
        if self.position(T::DESC.s_type).is_none() {
            self.verify_feature(T::DESC.s_type, false)?;
            self.features.push(T::default().into_var());
        }
        setter(self.feature_mut::<T>()?);
        Ok(())
    }

    /// 用完整的结构体覆盖
    pub fn add_feature_value<T: FeatureStruct>(&mut self, value: T) -> VktResult<()> {
        self.insert_or_replace(value.into_var())
    }

    pub fn add_feature_var(&mut self, var: FeaturesVar) -> VktResult<()> {
        self.insert_or_replace(var)
    }

    /// device 报告的值满足 `getter` 时才加入，返回是否加入
    pub fn add_feature_if_supported<T: FeatureStruct>(
        &mut self,
        getter: impl Fn(&T) -> vk::Bool32,
        setter: impl FnOnce(&mut T),
    ) -> VktResult<bool> {
        let supported = self.device_value::<T>().is_some_and(|value| getter(&value) != vk::FALSE);
        if !supported {
            return Ok(false);
        }
        self.add_feature_with(setter)?;
        Ok(true)
    }

    /// 已存在同 sType 的结构体时报告 `AlreadyExists`
    pub fn add_unique_feature<T: FeatureStruct>(&mut self, value: T) -> VktResult<()> {
        self.verify_feature(T::DESC.s_type, false)?;
        self.features.push(Self::detached(value.into_var()));
        Ok(())
    }

    #[inline]
    pub fn has_feature<T: FeatureStruct>(&self) -> bool {
        self.position(T::DESC.s_type).is_some()
    }

    pub fn get_feature<T: FeatureStruct>(&self) -> Option<T> {
        self.features.iter().find_map(T::from_var).copied()
    }

    fn feature_mut<T: FeatureStruct>(&mut self) -> VktResult<&mut T> {
        self.features
            .iter_mut()
            .find_map(T::from_var_mut)
            .ok_or_else(|| VktError::internal(format!("{} vanished from caps", T::DESC.name)))
    }

    pub fn remove_feature<T: FeatureStruct>(&mut self) -> bool {
        match self.position(T::DESC.s_type) {
            Some(idx) => {
                self.features.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn features(&self) -> &[FeaturesVar] {
        &self.features
    }

    pub fn feature_info(&self, s_type: vk::StructureType) -> Option<FeatureInfo<'_>> {
        let index = self.position(s_type)?;
        Some(FeatureInfo {
            desc: self.features[index].desc(),
            value: &self.features[index],
            index,
        })
    }

    /// 检查加入 `s_type` 是否与已有的结构体冲突
    pub fn feature_status(&self, s_type: vk::StructureType, check_runtime_api_version: bool) -> VktResult<FeatureStatus> {
        let desc = feature_desc(s_type)
            .ok_or_else(|| VktError::internal(format!("unregistered feature structure {s_type:?}")))?;

        if self.position(s_type).is_some() {
            if !check_runtime_api_version {
                return Ok(FeatureStatus::AlreadyExists);
            }
            let runtime = api_version_major_minor(self.used_api_version());
            if desc.core_version().is_some_and(|min| api_version_major_minor(min) < runtime) {
                return Ok(FeatureStatus::WrongApiVersion);
            }
        }

        let status = match desc.blob {
            BlobKind::Blob(api) => {
                let folded = version_blob_features(api);
                if self.features.iter().any(|f| folded.contains(&f.s_type())) {
                    FeatureStatus::FeatureInBlob
                } else {
                    FeatureStatus::Ok
                }
            }
            BlobKind::InBlob(api) => {
                let blob = blob_for_api_version(api);
                if self.features.iter().any(|f| Some(f.s_type()) == blob) {
                    FeatureStatus::BlobInFeatures
                } else {
                    FeatureStatus::Ok
                }
            }
            BlobKind::Standalone => FeatureStatus::Ok,
        };
        Ok(status)
    }

    /// 冲突时以 `NotSupported(状态名)` 报告
    pub fn verify_feature(&self, s_type: vk::StructureType, check_runtime_api_version: bool) -> VktResult<()> {
        match self.feature_status(s_type, check_runtime_api_version)? {
            FeatureStatus::Ok => Ok(()),
            status => {
                log::debug!(
                    "caps '{}': {} rejected with {status}",
                    self.id,
                    feature_desc(s_type).map_or("<unknown>", |d| d.name)
                );
                Err(VktError::not_supported(status.as_str()))
            }
        }
    }

    /// 创建 device 时的 pNext 链，总是以 `VkPhysicalDeviceFeatures2` 开头
    ///
    /// `VkPhysicalDeviceFeatures` 没有 sType，它的字段被合并进 `VkPhysicalDeviceFeatures2::features`，
    /// 所有非零的 VkBool32 都被规范为 `VK_TRUE`。
    pub fn device_create_chain(&self) -> FeatureChain {
        let mut features2 = self.get_feature::<vk::PhysicalDeviceFeatures2>().unwrap_or_default();
        let features10 = self.get_feature::<vk::PhysicalDeviceFeatures>().unwrap_or_default();

        let dst = features10_bools_mut(&mut features2.features);
        for (d, s) in dst.iter_mut().zip(features10_bools(&features10)) {
            if *d != vk::FALSE || *s != vk::FALSE {
                *d = vk::TRUE;
            }
        }

        let items = std::iter::once(features2.into_var())
            .chain(self.features.iter().copied().filter(|f| {
                f.s_type() != FEATURES10_STYPE && f.s_type() != vk::StructureType::PHYSICAL_DEVICE_FEATURES_2
            }))
            .collect_vec();
        FeatureChain::new(items)
    }
}

// 队列
impl DevCaps {
    pub fn reset_queues(&mut self, infos: &[QueueCreateInfo]) {
        self.queue_create_infos = infos.to_vec();
    }

    #[inline]
    pub fn queue_create_infos(&self) -> &[QueueCreateInfo] {
        &self.queue_create_infos
    }
}

/// 一次 device 创建的队列参数，`create_infos` 中的优先级指向这里
#[derive(Clone, Debug, Default)]
pub struct QueueRequests {
    priorities: Vec<f32>,
    /// `(family, 优先级的起始位置, count)`
    families: Vec<(u32, usize, u32)>,
}

impl QueueRequests {
    pub fn create_infos(&self) -> Vec<vk::DeviceQueueCreateInfo<'_>> {
        self.families
            .iter()
            .map(|&(family, offset, count)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&self.priorities[offset..offset + count as usize])
            })
            .collect_vec()
    }

    #[inline]
    pub fn priorities(&self) -> &[f32] {
        &self.priorities
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueInfo {
    pub queue: vk::Queue,
    pub family_index: u32,
}

/// device 创建之后才能确定的数据：每个请求的队列对应的 `(family, index-in-family)`
#[derive(Clone, Debug, Default)]
pub struct RuntimeData {
    family_to_queue_indices: Vec<(u32, u32)>,
}

impl RuntimeData {
    /// 为 caps 中的每一组队列找到 queue family，队列按请求顺序编号
    pub fn reset_queues(&mut self, caps: &DevCaps) -> VktResult<QueueRequests> {
        let vki = caps.instance.vki();
        let physical_device = caps.instance.physical_device();

        let mut requests = QueueRequests::default();
        let mut next_index_in_family = HashMap::<u32, u32>::new();
        self.family_to_queue_indices.clear();

        for qci in caps.queue_create_infos() {
            let family = find_queue_family_index_with_caps(vki, physical_device, qci.required, qci.excluded)?;

            requests.families.push((family, requests.priorities.len(), qci.count));
            let next = next_index_in_family.entry(family).or_default();
            for _ in 0..qci.count {
                requests.priorities.push(qci.priority);
                self.family_to_queue_indices.push((family, *next));
                *next += 1;
            }
        }
        Ok(requests)
    }

    #[inline]
    pub fn queue_count(&self) -> usize {
        self.family_to_queue_indices.len()
    }

    pub fn get_queue(&self, vkd: &dyn DeviceInterface, queue_index: u32) -> VktResult<QueueInfo> {
        let &(family_index, index_in_family) = self
            .family_to_queue_indices
            .get(queue_index as usize)
            .ok_or_else(|| VktError::internal(format!("queue {queue_index} was not requested")))?;
        Ok(QueueInfo {
            queue: vkd.get_device_queue(family_index, index_in_family),
            family_index,
        })
    }
}
