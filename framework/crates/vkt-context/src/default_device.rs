use itertools::Itertools;
use vkt_gfx::error::VktResult;

use crate::{
    context::Context,
    context_manager::{ContextManager, CreatedDevice},
    dev_caps::{DevCaps, RuntimeData},
};

const KHR_BUFFER_DEVICE_ADDRESS: &str = "VK_KHR_buffer_device_address";
const EXT_BUFFER_DEVICE_ADDRESS: &str = "VK_EXT_buffer_device_address";

/// default device 启用的扩展：device 报告的全部扩展
///
/// KHR 与 EXT 版本的 buffer device address 不能同时启用，KHR 存在时去掉 EXT。
pub fn default_extensions(available: &[String]) -> Vec<String> {
    let has_khr_bda = available.iter().any(|e| e == KHR_BUFFER_DEVICE_ADDRESS);
    available
        .iter()
        .filter(|e| !(has_khr_bda && *e == EXT_BUFFER_DEVICE_ADDRESS))
        .cloned()
        .collect_vec()
}

/// 启用了 device 支持的所有扩展与 feature 的 device
pub struct DefaultDevice {
    caps: DevCaps,
    runtime_data: RuntimeData,
    created: CreatedDevice,
}

impl DefaultDevice {
    pub fn new(manager: &ContextManager) -> VktResult<Self> {
        let instance = manager.instance_state();
        let mut caps = DevCaps::new(DevCaps::DEF_DEV_ID, manager);

        for name in default_extensions(instance.device_extensions()) {
            caps.add_extension(&name, false);
        }

        // robustBufferAccess 在查询时已经被关闭
        caps.add_feature_value(instance.device_features().core_features2())?;
        for var in instance.device_features().device_creation_features() {
            caps.add_feature_var(var)?;
        }

        let mut runtime_data = RuntimeData::default();
        let created = manager.create_device(&caps, &mut runtime_data)?;
        log::info!(
            "default device created with {} extensions and {} feature structures",
            caps.physical_device_extensions().len(),
            caps.features().len()
        );

        Ok(Self {
            caps,
            runtime_data,
            created,
        })
    }

    #[inline]
    pub fn caps(&self) -> &DevCaps {
        &self.caps
    }

    pub fn into_context(self, manager: &ContextManager) -> Context {
        Context::new(manager, &self.caps, self.runtime_data, self.created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect_vec()
    }

    #[test]
    fn test_ext_bda_is_dropped_when_khr_is_present() {
        let available = names(&[
            "VK_KHR_swapchain",
            "VK_KHR_buffer_device_address",
            "VK_EXT_buffer_device_address",
        ]);
        assert_eq!(
            default_extensions(&available),
            names(&["VK_KHR_swapchain", "VK_KHR_buffer_device_address"])
        );
    }

    #[test]
    fn test_ext_bda_alone_is_kept() {
        let available = names(&["VK_EXT_buffer_device_address"]);
        assert_eq!(default_extensions(&available), available);
    }
}
