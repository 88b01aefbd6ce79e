//! 测试用例接口与执行
//!
//! 一个用例先声明自己需要的 instance 与 device 能力，再由 [`TestExecutor`] 找到（或者创建）满足这些能力的
//! context，最后在 context 上创建 [`TestInstance`] 并迭代到得出结果。
//! 执行过程中出现的任何错误都会被映射为唯一的 [`TestVerdict`]。

use std::{fmt, rc::Rc};

use vkt_gfx::error::{VktError, VktResult};

use crate::{context::Context, context_manager::ContextManager, dev_caps::DevCaps, inst_caps::InstCaps};

/// 一次迭代的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestStatus {
    Pass(String),
    Fail(String),
    QualityWarning(String),
    CompatibilityWarning(String),
    /// 需要继续迭代
    Incomplete,
}

pub trait TestInstance {
    fn iterate(&mut self) -> VktResult<TestStatus>;
}

pub trait TestCase {
    fn name(&self) -> &str;

    /// 在查找 context 之前调用
    fn delayed_init(&self) -> VktResult<()> {
        Ok(())
    }

    fn check_support(&self, _context: &Context) -> VktResult<()> {
        Ok(())
    }

    /// 不重写时使用 default context
    fn init_device_capabilities(&self, _caps: &mut DevCaps) -> VktResult<()> {
        Err(VktError::EnforceDefaultContext)
    }

    fn init_instance_capabilities(&self, _caps: &mut InstCaps) -> VktResult<()> {
        Ok(())
    }

    /// 相同 id 的用例共享同一个 device
    fn required_capabilities_id(&self) -> String {
        DevCaps::DEF_DEV_ID.to_string()
    }

    fn instance_capabilities_id(&self) -> String {
        InstCaps::DEF_INST_ID.to_string()
    }

    fn create_instance(&self, context: &Rc<Context>) -> VktResult<Box<dyn TestInstance>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestVerdict {
    Pass(String),
    Fail(String),
    QualityWarning(String),
    CompatibilityWarning(String),
    NotSupported(String),
    ResourceError(String),
    InternalError(String),
}

impl TestVerdict {
    pub fn from_error(err: &VktError) -> Self {
        match err {
            VktError::NotSupported(msg) => Self::NotSupported(msg.clone()),
            VktError::TestFailed(_) | VktError::Vk { .. } => Self::Fail(err.to_string()),
            VktError::OutOfMemory { .. } | VktError::Resource(_) => Self::ResourceError(err.to_string()),
            VktError::Internal(msg) => Self::InternalError(msg.clone()),
            // 只应该在 context 查找中被消化
            VktError::EnforceDefaultContext => {
                Self::InternalError("default context fallback escaped the context manager".to_string())
            }
        }
    }

    fn from_status(status: TestStatus) -> Option<Self> {
        match status {
            TestStatus::Pass(msg) => Some(Self::Pass(msg)),
            TestStatus::Fail(msg) => Some(Self::Fail(msg)),
            TestStatus::QualityWarning(msg) => Some(Self::QualityWarning(msg)),
            TestStatus::CompatibilityWarning(msg) => Some(Self::CompatibilityWarning(msg)),
            TestStatus::Incomplete => None,
        }
    }

    /// 结果的名字，与 qpa 日志中的写法一致
    pub fn code(&self) -> &'static str {
        match self {
            Self::Pass(_) => "Pass",
            Self::Fail(_) => "Fail",
            Self::QualityWarning(_) => "QualityWarning",
            Self::CompatibilityWarning(_) => "CompatibilityWarning",
            Self::NotSupported(_) => "NotSupported",
            Self::ResourceError(_) => "ResourceError",
            Self::InternalError(_) => "InternalError",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Pass(d)
            | Self::Fail(d)
            | Self::QualityWarning(d)
            | Self::CompatibilityWarning(d)
            | Self::NotSupported(d)
            | Self::ResourceError(d)
            | Self::InternalError(d) => d,
        }
    }

    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass(_))
    }
}

impl fmt::Display for TestVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// 在 context manager 上依次执行用例
pub struct TestExecutor {
    manager: Rc<ContextManager>,
}

impl TestExecutor {
    pub fn new(manager: Rc<ContextManager>) -> Self {
        Self { manager }
    }

    #[inline]
    pub fn manager(&self) -> &Rc<ContextManager> {
        &self.manager
    }

    pub fn execute(&self, test_case: &dyn TestCase) -> TestVerdict {
        let verdict = self.run(test_case).unwrap_or_else(|err| TestVerdict::from_error(&err));
        match &verdict {
            TestVerdict::Pass(_) | TestVerdict::NotSupported(_) => log::info!("{}: {verdict}", test_case.name()),
            _ => log::warn!("{}: {verdict}", test_case.name()),
        }
        verdict
    }

    fn run(&self, test_case: &dyn TestCase) -> VktResult<TestVerdict> {
        let manager = self.manager.find_custom_manager(test_case)?;
        let mut default_context = None;
        let context = manager.find_context(test_case, &mut default_context)?;
        log::debug!("{} runs on context '{}'", test_case.name(), context.caps_id());

        context.resource_interface().init_test_case(test_case.name());
        let mut instance = test_case.create_instance(&context)?;
        loop {
            if let Some(verdict) = TestVerdict::from_status(instance.iterate()?) {
                return Ok(verdict);
            }
        }
    }
}
