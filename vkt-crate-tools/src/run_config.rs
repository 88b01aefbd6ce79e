use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// TOML 运行配置
///
/// 所有字段都是可选的，未给出的字段使用命令行的默认值。
/// 命令行显式给出的参数总是覆盖这里的值。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// 需要执行的 case 名字，为空表示全部执行
    pub cases: Vec<String>,

    /// 1-based physical device 序号
    pub device_id: Option<u32>,
    pub validation: Option<bool>,
    pub compute_only: Option<bool>,
    pub log_filename: Option<String>,
    pub app_params_input_file: Option<String>,
    pub server_address: Option<String>,
    pub pipeline_cache_file: Option<String>,
    pub max_custom_devices: Option<u32>,
}

impl RunConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).with_context(|| format!("读取配置文件失败: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path.as_ref()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// case 是否在过滤列表中
    pub fn accepts_case(&self, name: &str) -> bool {
        self.cases.is_empty() || self.cases.iter().any(|c| c == name)
    }
}
