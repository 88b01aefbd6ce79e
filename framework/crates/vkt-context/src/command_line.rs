use std::{ffi::OsString, path::PathBuf};

use clap::{CommandFactory, FromArgMatches, Parser, ValueEnum, parser::ValueSource};
use vkt_crate_tools::run_config::RunConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Validation {
    Enable,
    Disable,
}

/// 测试框架的命令行
///
/// 所有参数都可以由 `--deqp-run-config` 指定的 TOML 文件给出默认值，命令行显式给出的值优先。
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct CommandLine {
    /// 1-based physical device 序号
    #[arg(long = "deqp-vk-device-id", default_value_t = 1)]
    pub device_id: u32,

    /// 是否启用 validation layer
    #[arg(long = "deqp-validation", value_enum, default_value_t = Validation::Disable)]
    pub validation: Validation,

    /// 默认队列只要求 compute
    #[arg(long = "deqp-compute-only")]
    pub compute_only: bool,

    #[arg(long = "deqp-log-filename", default_value = "TestResults.qpa")]
    pub log_filename: String,

    /// `instance|device, vendorID, deviceID, key, value` 格式的 CSV
    #[arg(long = "deqp-app-params-input-file")]
    pub app_params_input_file: Option<PathBuf>,

    /// pipeline cache 构建服务的地址，不给出时在本进程内构建
    #[arg(long = "deqp-server-address")]
    pub server_address: Option<String>,

    #[arg(long = "deqp-subprocess")]
    pub subprocess: bool,

    /// 主进程导出、子进程导入的捕获数据
    #[arg(long = "deqp-pipeline-cache-file")]
    pub pipeline_cache_file: Option<PathBuf>,

    /// 以 Vulkan SC 模式运行
    #[arg(long = "deqp-vksc")]
    pub vksc: bool,

    /// 除 default device 之外最多缓存的 device 数量
    #[arg(long = "deqp-max-custom-devices", default_value_t = 5)]
    pub max_custom_devices: u32,

    #[arg(long = "deqp-run-config")]
    pub run_config: Option<PathBuf>,

    /// 子进程对应的用例分片，-1 表示全部
    #[arg(long = "deqp-case-fraction-index", default_value_t = -1, allow_negative_numbers = true)]
    pub case_fraction_index: i32,

    /// 只执行这些 case，可以重复给出
    #[arg(long = "deqp-case")]
    pub cases: Vec<String>,
}

impl Default for CommandLine {
    fn default() -> Self {
        Self {
            device_id: 1,
            validation: Validation::Disable,
            compute_only: false,
            log_filename: "TestResults.qpa".to_string(),
            app_params_input_file: None,
            server_address: None,
            subprocess: false,
            pipeline_cache_file: None,
            vksc: false,
            max_custom_devices: 5,
            run_config: None,
            case_fraction_index: -1,
            cases: vec![],
        }
    }
}

// 解析
impl CommandLine {
    /// 解析命令行，并合并 `--deqp-run-config` 给出的配置
    pub fn from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        let mut cmd = Self::from_arg_matches(&matches)?;

        if let Some(path) = cmd.run_config.clone() {
            let config = RunConfig::from_file(&path)
                .map_err(|e| clap::Error::raw(clap::error::ErrorKind::Io, format!("{e:#}\n")))?;
            cmd.apply_run_config(&matches, &config);
        }
        Ok(cmd)
    }

    /// 用配置文件中的值覆盖没有在命令行中显式给出的参数
    pub fn apply_run_config(&mut self, matches: &clap::ArgMatches, config: &RunConfig) {
        let from_default = |id: &str| matches.value_source(id) != Some(ValueSource::CommandLine);

        if let Some(device_id) = config.device_id.filter(|_| from_default("device_id")) {
            self.device_id = device_id;
        }
        if let Some(validation) = config.validation.filter(|_| from_default("validation")) {
            self.validation = if validation { Validation::Enable } else { Validation::Disable };
        }
        if let Some(compute_only) = config.compute_only.filter(|_| from_default("compute_only")) {
            self.compute_only = compute_only;
        }
        if let Some(log_filename) = config.log_filename.as_ref().filter(|_| from_default("log_filename")) {
            self.log_filename = log_filename.clone();
        }
        if let Some(file) = config.app_params_input_file.as_ref().filter(|_| from_default("app_params_input_file")) {
            self.app_params_input_file = Some(PathBuf::from(file));
        }
        if let Some(address) = config.server_address.as_ref().filter(|_| from_default("server_address")) {
            self.server_address = Some(address.clone());
        }
        if let Some(file) = config.pipeline_cache_file.as_ref().filter(|_| from_default("pipeline_cache_file")) {
            self.pipeline_cache_file = Some(PathBuf::from(file));
        }
        if let Some(max) = config.max_custom_devices.filter(|_| from_default("max_custom_devices")) {
            self.max_custom_devices = max;
        }
        if self.cases.is_empty() {
            self.cases = config.cases.clone();
        }
    }
}

// getters
impl CommandLine {
    #[inline]
    pub fn is_validation_enabled(&self) -> bool {
        self.validation == Validation::Enable
    }

    #[inline]
    pub fn is_compute_only(&self) -> bool {
        self.compute_only
    }

    #[inline]
    pub fn is_subprocess(&self) -> bool {
        self.subprocess
    }

    #[inline]
    pub fn is_vksc(&self) -> bool {
        self.vksc
    }

    /// case 是否需要执行
    pub fn accepts_case(&self, name: &str) -> bool {
        self.cases.is_empty() || self.cases.iter().any(|c| c == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cmd = CommandLine::from_args(["vkt"]).unwrap();
        assert_eq!(cmd.device_id, 1);
        assert_eq!(cmd.max_custom_devices, 5);
        assert_eq!(cmd.case_fraction_index, -1);
        assert!(!cmd.is_validation_enabled());
        assert!(!cmd.is_compute_only());
        assert!(cmd.accepts_case("anything"));

        let def = CommandLine::default();
        assert_eq!(def.log_filename, cmd.log_filename);
        assert_eq!(def.validation, cmd.validation);
    }

    #[test]
    fn test_explicit_flags() {
        let cmd = CommandLine::from_args([
            "vkt",
            "--deqp-vk-device-id",
            "2",
            "--deqp-validation",
            "enable",
            "--deqp-compute-only",
            "--deqp-vksc",
            "--deqp-subprocess",
            "--deqp-case-fraction-index",
            "-1",
            "--deqp-case",
            "a.b",
            "--deqp-case",
            "c.d",
        ])
        .unwrap();
        assert_eq!(cmd.device_id, 2);
        assert!(cmd.is_validation_enabled());
        assert!(cmd.is_compute_only());
        assert!(cmd.is_vksc() && cmd.is_subprocess());
        assert_eq!(cmd.cases, vec!["a.b".to_string(), "c.d".to_string()]);
        assert!(!cmd.accepts_case("e.f"));
    }

    #[test]
    fn test_run_config_fills_defaults_only() {
        let config = RunConfig::from_toml_str(
            r#"
            cases = ["x.y"]
            device_id = 3
            max_custom_devices = 2
            validation = true
            "#,
        )
        .unwrap();

        let args = ["vkt", "--deqp-vk-device-id", "4"];
        let matches = CommandLine::command().try_get_matches_from(args).unwrap();
        let mut cmd = CommandLine::from_arg_matches(&matches).unwrap();
        cmd.apply_run_config(&matches, &config);

        assert_eq!(cmd.device_id, 4);
        assert_eq!(cmd.max_custom_devices, 2);
        assert!(cmd.is_validation_enabled());
        assert_eq!(cmd.cases, vec!["x.y".to_string()]);
    }

    #[test]
    fn test_missing_run_config_is_an_error() {
        let result = CommandLine::from_args(["vkt", "--deqp-run-config", "/nonexistent/vkt-run-config.toml"]);
        assert!(result.is_err());
    }
}
