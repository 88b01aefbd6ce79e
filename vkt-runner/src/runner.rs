//! 用例执行：创建 context manager，按命令行过滤用例，收集结果
//!
//! Vulkan SC 下的两个阶段：
//! - 主进程（`--deqp-vksc`）捕获 pipeline 相关对象，结束时导出到 `--deqp-pipeline-cache-file`；
//! - 子进程（`--deqp-vksc --deqp-subprocess`）导入该文件，在创建 device 之前构建 pipeline cache。

use std::{fmt::Write as _, path::Path, rc::Rc};

use itertools::Itertools;
use vkt_context::{
    command_line::CommandLine,
    context::Context,
    context_manager::ContextManager,
    inst_caps::InstCaps,
    test_case::{TestCase, TestExecutor, TestVerdict},
};
use vkt_gfx::{
    error::{VktError, VktResult},
    interface::PlatformInterface,
    resource_interface::{CacheBuilder, CreateCacheRequest, CreateCacheResponse, ProgramCompiler, ResourceInterface},
};
use vkt_sc_server::{
    cache_builder::LocalCacheBuilder,
    compiler::GlslcCompiler,
    remote::{RemoteCacheBuilder, RemoteCompiler},
};

/// 在本进程的一个普通 device 上构建 pipeline cache，并让该 device 活得和 builder 一样久
struct InProcessCacheBuilder {
    builder: LocalCacheBuilder,
    _context: Rc<Context>,
}

impl InProcessCacheBuilder {
    /// 用不带 Vulkan SC 的命令行创建一个独立的 default device
    fn create(platform: Rc<dyn PlatformInterface>, command_line: &CommandLine) -> VktResult<Self> {
        let plain = CommandLine {
            vksc: false,
            subprocess: false,
            ..command_line.clone()
        };
        let inst_caps = InstCaps::new(platform.as_ref(), &plain, InstCaps::DEF_INST_ID)?;
        let manager = ContextManager::create(platform, Rc::new(plain), Rc::new(ResourceInterface::new()), 1, inst_caps)?;
        let context = manager.default_context()?;
        Ok(Self {
            builder: LocalCacheBuilder::new(context.device_interface().clone()),
            _context: context,
        })
    }
}

impl CacheBuilder for InProcessCacheBuilder {
    fn create_pipeline_cache(&self, request: &CreateCacheRequest) -> VktResult<CreateCacheResponse> {
        self.builder.create_pipeline_cache(request)
    }
}

/// 所有用例的结果，按执行顺序
#[derive(Debug, Default)]
pub struct RunSummary {
    results: Vec<(String, TestVerdict)>,
}

impl RunSummary {
    #[inline]
    pub fn results(&self) -> &[(String, TestVerdict)] {
        &self.results
    }

    pub fn verdict(&self, name: &str) -> Option<&TestVerdict> {
        self.results.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// 每种结果的数量
    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        self.results.iter().map(|(_, v)| v.code()).counts().into_iter().sorted().collect_vec()
    }

    /// 有 Fail、ResourceError 或 InternalError
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|(_, v)| {
            matches!(v, TestVerdict::Fail(_) | TestVerdict::ResourceError(_) | TestVerdict::InternalError(_))
        })
    }

    /// qpa 风格的结果日志
    pub fn to_log(&self) -> String {
        let mut log = String::from("#beginSession\n");
        for (name, verdict) in &self.results {
            let _ = writeln!(log, "#beginTestCaseResult {name}");
            let _ = writeln!(log, "{} {}", verdict.code(), verdict.description());
            let _ = writeln!(log, "#endTestCaseResult");
        }
        log.push_str("#endSession\n");
        log
    }

    pub fn write_log(&self, path: &Path) -> VktResult<()> {
        std::fs::write(path, self.to_log())
            .map_err(|e| VktError::Resource(format!("failed to write {}: {e}", path.display())))
    }
}

pub struct Runner {
    command_line: Rc<CommandLine>,
    resource_interface: Rc<ResourceInterface>,
    manager: Rc<ContextManager>,
}

impl Runner {
    pub fn new(platform: Rc<dyn PlatformInterface>, command_line: CommandLine) -> VktResult<Self> {
        let compiler: Box<dyn ProgramCompiler> = match command_line.server_address.as_ref() {
            Some(address) => Box::new(RemoteCompiler::new(address.clone())),
            None => Box::new(GlslcCompiler::default()),
        };
        let resource_interface = Rc::new(ResourceInterface::with_compiler(compiler));

        let sc_subprocess = command_line.is_vksc() && command_line.is_subprocess();
        if sc_subprocess {
            if let Some(path) = command_line.pipeline_cache_file.as_ref() {
                resource_interface.import_data_from_file(path)?;
                log::info!("imported captured pipeline data from {}", path.display());
            }
        }

        let inst_caps = InstCaps::new(platform.as_ref(), &command_line, InstCaps::DEF_INST_ID)?;
        let max_custom_devices = command_line.max_custom_devices;
        let command_line = Rc::new(command_line);
        let manager = ContextManager::create(
            platform.clone(),
            command_line.clone(),
            resource_interface.clone(),
            max_custom_devices,
            inst_caps,
        )?;

        if sc_subprocess {
            let builder: Rc<dyn CacheBuilder> = match command_line.server_address.as_ref() {
                Some(address) => Rc::new(RemoteCacheBuilder::new(address.clone())),
                None => Rc::new(InProcessCacheBuilder::create(platform, &command_line)?),
            };
            manager.set_cache_builder(builder);
        }

        Ok(Self {
            command_line,
            resource_interface,
            manager,
        })
    }

    #[inline]
    pub fn manager(&self) -> &Rc<ContextManager> {
        &self.manager
    }

    #[inline]
    pub fn resource_interface(&self) -> &Rc<ResourceInterface> {
        &self.resource_interface
    }

    /// 执行命令行接受的用例；Vulkan SC 主进程在最后导出捕获的数据
    pub fn run(&self, cases: &[Box<dyn TestCase>]) -> VktResult<RunSummary> {
        let executor = TestExecutor::new(self.manager.clone());
        let mut summary = RunSummary::default();
        for case in cases.iter().filter(|c| self.command_line.accepts_case(c.name())) {
            let verdict = executor.execute(case.as_ref());
            summary.results.push((case.name().to_string(), verdict));
        }

        let cmd = &self.command_line;
        if cmd.is_vksc() && !cmd.is_subprocess() {
            if let Some(path) = cmd.pipeline_cache_file.as_ref() {
                self.resource_interface.remove_redundant_objects();
                self.resource_interface.export_data_to_file(path)?;
            }
            let max = self.resource_interface.stat_max();
            log::info!("object reservation: {max:?}");
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use vkt_gfx::mock::{MockDriverConfig, MockPlatform};

    use super::*;
    use crate::cases::builtin_cases;

    fn mock_platform() -> Rc<MockPlatform> {
        vkt_crate_tools::init_log::init_log_with_filter(log::LevelFilter::Debug);
        Rc::new(MockPlatform::new(MockDriverConfig::default()))
    }

    fn temp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("vkt-runner-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_builtin_cases_pass_on_mock() {
        let runner = Runner::new(mock_platform(), CommandLine::default()).unwrap();
        let summary = runner.run(&builtin_cases()).unwrap();

        assert_eq!(summary.results().len(), builtin_cases().len());
        for (name, verdict) in summary.results() {
            assert!(verdict.is_pass(), "{name}: {verdict}");
        }
        assert!(!summary.has_failures());
        assert_eq!(summary.counts(), vec![("Pass", builtin_cases().len())]);

        // default 加上两个自定义 device
        assert_eq!(runner.manager().context_count(), 3);
    }

    #[test]
    fn test_case_filter() {
        let cmd = CommandLine {
            cases: vec!["info.device".to_string(), "memory.allocation.host_visible".to_string()],
            ..Default::default()
        };
        let runner = Runner::new(mock_platform(), cmd).unwrap();
        let summary = runner.run(&builtin_cases()).unwrap();
        assert_eq!(summary.results().iter().map(|(n, _)| n.as_str()).collect_vec(), vec![
            "info.device",
            "memory.allocation.host_visible"
        ]);
    }

    #[test]
    fn test_unsupported_feature_is_not_supported() {
        let mut config = MockDriverConfig::default();
        config.device_extensions.retain(|(name, _)| name != "VK_EXT_robustness2");
        let runner = Runner::new(Rc::new(MockPlatform::new(config)), CommandLine::default()).unwrap();

        let summary = runner.run(&builtin_cases()).unwrap();
        assert!(matches!(
            summary.verdict("api.features.robustness2.null_descriptor"),
            Some(TestVerdict::NotSupported(_))
        ));
        assert!(!summary.has_failures());
    }

    #[test]
    fn test_vksc_capture_then_subprocess() {
        let path = temp_file("pipelines.json");

        let capture = CommandLine {
            vksc: true,
            pipeline_cache_file: Some(path.clone()),
            ..Default::default()
        };
        let runner = Runner::new(mock_platform(), capture).unwrap();
        let summary = runner.run(&builtin_cases()).unwrap();
        assert!(!summary.has_failures(), "{summary:?}");
        assert!(path.exists());
        // 只保留被 pipeline 引用的对象
        let captured = runner.resource_interface().cache_input();
        assert_eq!(captured.pipelines.len(), 1);
        assert_eq!(captured.shader_modules.len(), 1);
        assert_eq!(captured.pipeline_layouts.len(), 1);
        assert_eq!(captured.descriptor_set_layouts.len(), 1);
        assert_eq!(captured.samplers.len(), 1);
        drop(runner);

        let subprocess = CommandLine {
            vksc: true,
            subprocess: true,
            pipeline_cache_file: Some(path.clone()),
            ..Default::default()
        };
        let platform = mock_platform();
        let runner = Runner::new(platform.clone(), subprocess).unwrap();
        assert_eq!(runner.resource_interface().cache_input().pipeline_layouts.len(), 1);
        let summary = runner.run(&builtin_cases()).unwrap();
        assert!(!summary.has_failures(), "{summary:?}");

        // mock 驱动为 cache 中的每个 pipeline 写入 8 字节
        assert_eq!(runner.resource_interface().cache_data().len(), 8);
        assert!(platform.state().borrow().pipelines_created >= 2);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_subprocess_with_missing_file_fails() {
        let cmd = CommandLine {
            vksc: true,
            subprocess: true,
            pipeline_cache_file: Some(temp_file("missing.json")),
            ..Default::default()
        };
        assert!(Runner::new(mock_platform(), cmd).err().unwrap().is_resource_error());
    }

    #[test]
    fn test_result_log() {
        let summary = RunSummary {
            results: vec![
                ("a".to_string(), TestVerdict::Pass("ok".to_string())),
                ("b".to_string(), TestVerdict::NotSupported("VK_EXT_mesh_shader".to_string())),
            ],
        };
        let log = summary.to_log();
        assert!(log.starts_with("#beginSession\n"));
        assert!(log.contains("#beginTestCaseResult b\nNotSupported VK_EXT_mesh_shader\n#endTestCaseResult\n"));

        let path = temp_file("results.qpa");
        summary.write_log(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), log);
        std::fs::remove_file(&path).unwrap();
    }
}
