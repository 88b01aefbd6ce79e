use ash::vk;
use itertools::Itertools;
use vkt_gfx::{
    error::{VktError, VktResult},
    interface::PlatformInterface,
    query::{
        enumerate_instance_extension_names, enumerate_instance_layer_names, format_api_version,
        is_core_instance_extension, is_instance_extension_supported,
    },
};

use crate::command_line::CommandLine;

/// 框架能描述的最高 api 版本
pub const MAX_API_VERSION: u32 = vk::API_VERSION_1_3;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const DEBUG_UTILS_EXTENSION: &str = "VK_EXT_debug_utils";

/// 创建 instance 所需的能力
///
/// 默认启用所有已经进入 core 的 instance extension，测试可以额外请求扩展与 layer。
#[derive(Clone, Debug)]
pub struct InstCaps {
    pub id: String,
    pub used_api_version: u32,

    available_extensions: Vec<String>,
    available_layers: Vec<String>,
    core_extensions: Vec<String>,

    extensions: Vec<String>,
    layers: Vec<String>,
}

impl InstCaps {
    pub const DEF_INST_ID: &'static str = "default";

    pub fn new(vkp: &dyn PlatformInterface, cmd: &CommandLine, id: impl Into<String>) -> VktResult<Self> {
        let used_api_version = vkp.enumerate_instance_version()?.min(MAX_API_VERSION);
        let available_extensions = enumerate_instance_extension_names(vkp)?;
        let available_layers = enumerate_instance_layer_names(vkp)?;
        let core_extensions = available_extensions
            .iter()
            .filter(|name| is_core_instance_extension(used_api_version, name))
            .cloned()
            .collect_vec();

        let mut caps = Self {
            id: id.into(),
            used_api_version,
            available_extensions,
            available_layers,
            core_extensions,
            extensions: vec![],
            layers: vec![],
        };

        if cmd.is_validation_enabled() {
            if !caps.add_layer(VALIDATION_LAYER) {
                return Err(VktError::not_supported(format!("{VALIDATION_LAYER} is not available")));
            }
            if !caps.add_extension(DEBUG_UTILS_EXTENSION) {
                return Err(VktError::not_supported(format!("{DEBUG_UTILS_EXTENSION} is not available")));
            }
        }

        log::debug!(
            "instance caps '{}': api {}, core extensions [{}]",
            caps.id,
            format_api_version(used_api_version),
            caps.core_extensions.iter().join(", ")
        );
        Ok(caps)
    }

    /// 扩展可用时加入请求
    pub fn add_extension(&mut self, name: &str) -> bool {
        if !is_instance_extension_supported(self.used_api_version, &self.available_extensions, name) {
            return false;
        }
        if !self.core_extensions.iter().chain(&self.extensions).any(|e| e == name) {
            self.extensions.push(name.to_string());
        }
        true
    }

    pub fn add_layer(&mut self, name: &str) -> bool {
        if !self.available_layers.iter().any(|l| l == name) {
            return false;
        }
        if !self.layers.iter().any(|l| l == name) {
            self.layers.push(name.to_string());
        }
        true
    }
}

// getters
impl InstCaps {
    #[inline]
    pub fn is_default(&self) -> bool {
        self.id == Self::DEF_INST_ID
    }

    #[inline]
    pub fn core_extensions(&self) -> &[String] {
        &self.core_extensions
    }

    /// core extension 在前，之后是按请求顺序加入的扩展
    pub fn extensions(&self) -> Vec<String> {
        self.core_extensions.iter().chain(&self.extensions).cloned().collect_vec()
    }

    #[inline]
    pub fn layers(&self) -> &[String] {
        &self.layers
    }
}

#[cfg(test)]
mod tests {
    use vkt_gfx::mock::{MockDriverConfig, MockPlatform};

    use super::*;

    #[test]
    fn test_core_extensions_are_enabled_by_default() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let caps = InstCaps::new(&platform, &CommandLine::default(), InstCaps::DEF_INST_ID).unwrap();

        assert!(caps.is_default());
        assert_eq!(caps.used_api_version, vk::API_VERSION_1_3);
        assert_eq!(caps.extensions(), vec!["VK_KHR_get_physical_device_properties2".to_string()]);
        assert!(caps.layers().is_empty());
    }

    #[test]
    fn test_add_extension_and_layer() {
        let platform = MockPlatform::new(MockDriverConfig::default());
        let mut caps = InstCaps::new(&platform, &CommandLine::default(), "surface").unwrap();

        assert!(caps.add_extension("VK_KHR_surface"));
        assert!(caps.add_extension("VK_KHR_surface"));
        assert!(!caps.add_extension("VK_KHR_win32_surface"));
        assert_eq!(caps.extensions().iter().filter(|e| *e == "VK_KHR_surface").count(), 1);

        assert!(caps.add_layer("VK_LAYER_KHRONOS_validation"));
        assert!(!caps.add_layer("VK_LAYER_unknown"));
        assert_eq!(caps.layers(), ["VK_LAYER_KHRONOS_validation".to_string()]);
    }

    #[test]
    fn test_validation_requires_layer() {
        let cmd = CommandLine {
            validation: crate::command_line::Validation::Enable,
            ..Default::default()
        };

        let platform = MockPlatform::new(MockDriverConfig::default());
        let caps = InstCaps::new(&platform, &cmd, InstCaps::DEF_INST_ID).unwrap();
        assert!(caps.extensions().contains(&"VK_EXT_debug_utils".to_string()));

        let platform = MockPlatform::new(MockDriverConfig {
            instance_layers: vec![],
            ..Default::default()
        });
        assert!(InstCaps::new(&platform, &cmd, InstCaps::DEF_INST_ID).unwrap_err().is_not_supported());
    }

    #[test]
    fn test_api_version_is_clamped() {
        let platform = MockPlatform::new(MockDriverConfig {
            instance_version: vk::make_api_version(0, 1, 4, 0),
            ..Default::default()
        });
        let caps = InstCaps::new(&platform, &CommandLine::default(), InstCaps::DEF_INST_ID).unwrap();
        assert_eq!(caps.used_api_version, MAX_API_VERSION);
    }
}
