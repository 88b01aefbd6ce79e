#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use vkt_context::{
    command_line::CommandLine,
    context::Context,
    context_manager::ContextManager,
    dev_caps::DevCaps,
    inst_caps::InstCaps,
    test_case::{TestCase, TestInstance, TestStatus},
};
use vkt_gfx::{
    error::VktResult,
    mock::{MockDriverConfig, MockPlatform, MockState},
    resource_interface::ResourceInterface,
};

pub struct Harness {
    pub platform: Rc<MockPlatform>,
    pub state: Rc<RefCell<MockState>>,
    pub resource_interface: Rc<ResourceInterface>,
    pub manager: Rc<ContextManager>,
}

pub fn harness() -> Harness {
    harness_with(MockDriverConfig::default(), CommandLine::default(), 5)
}

pub fn harness_with(config: MockDriverConfig, cmd: CommandLine, max_custom_devices: u32) -> Harness {
    vkt_crate_tools::init_log::init_log_with_filter(log::LevelFilter::Debug);

    let platform = Rc::new(MockPlatform::new(config));
    let state = platform.state();
    let inst_caps = InstCaps::new(platform.as_ref(), &cmd, InstCaps::DEF_INST_ID).unwrap();
    let resource_interface = Rc::new(ResourceInterface::new());
    let manager = ContextManager::create(
        platform.clone(),
        Rc::new(cmd),
        resource_interface.clone(),
        max_custom_devices,
        inst_caps,
    )
    .unwrap();

    Harness {
        platform,
        state,
        resource_interface,
        manager,
    }
}

type DevInit = Box<dyn Fn(&mut DevCaps) -> VktResult<()>>;
type InstInit = Box<dyn Fn(&mut InstCaps) -> VktResult<()>>;
type SupportCheck = Box<dyn Fn(&Context) -> VktResult<()>>;
type DelayedInit = Box<dyn Fn() -> VktResult<()>>;

/// 能力由闭包给出的用例
pub struct CapsCase {
    pub name: String,
    pub caps_id: String,
    pub inst_id: String,
    pub init_dev: Option<DevInit>,
    pub init_inst: Option<InstInit>,
    pub support: Option<SupportCheck>,
    pub delayed: Option<DelayedInit>,
    pub statuses: RefCell<Vec<TestStatus>>,

    pub check_support_calls: Cell<u32>,
    pub init_dev_calls: Cell<u32>,
    pub seen_context: RefCell<Option<String>>,
}

impl CapsCase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            caps_id: DevCaps::DEF_DEV_ID.to_string(),
            inst_id: InstCaps::DEF_INST_ID.to_string(),
            init_dev: None,
            init_inst: None,
            support: None,
            delayed: None,
            statuses: RefCell::new(vec![TestStatus::Pass("ok".to_string())]),
            check_support_calls: Cell::new(0),
            init_dev_calls: Cell::new(0),
            seen_context: RefCell::new(None),
        }
    }

    pub fn with_caps(mut self, id: &str, init: impl Fn(&mut DevCaps) -> VktResult<()> + 'static) -> Self {
        self.caps_id = id.to_string();
        self.init_dev = Some(Box::new(init));
        self
    }

    /// 声明了 id 但是不重写 init_device_capabilities
    pub fn with_caps_id(mut self, id: &str) -> Self {
        self.caps_id = id.to_string();
        self
    }

    pub fn with_instance(mut self, id: &str, init: impl Fn(&mut InstCaps) -> VktResult<()> + 'static) -> Self {
        self.inst_id = id.to_string();
        self.init_inst = Some(Box::new(init));
        self
    }

    pub fn with_support(mut self, check: impl Fn(&Context) -> VktResult<()> + 'static) -> Self {
        self.support = Some(Box::new(check));
        self
    }

    pub fn with_delayed_init(mut self, init: impl Fn() -> VktResult<()> + 'static) -> Self {
        self.delayed = Some(Box::new(init));
        self
    }

    /// 依次返回的状态，最后一个之后重复最后一个
    pub fn with_statuses(self, statuses: Vec<TestStatus>) -> Self {
        *self.statuses.borrow_mut() = statuses;
        self
    }
}

impl TestCase for CapsCase {
    fn name(&self) -> &str {
        &self.name
    }

    fn delayed_init(&self) -> VktResult<()> {
        match self.delayed.as_ref() {
            Some(init) => init(),
            None => Ok(()),
        }
    }

    fn check_support(&self, context: &Context) -> VktResult<()> {
        self.check_support_calls.set(self.check_support_calls.get() + 1);
        match self.support.as_ref() {
            Some(check) => check(context),
            None => Ok(()),
        }
    }

    fn init_device_capabilities(&self, caps: &mut DevCaps) -> VktResult<()> {
        self.init_dev_calls.set(self.init_dev_calls.get() + 1);
        match self.init_dev.as_ref() {
            Some(init) => init(caps),
            None => Err(vkt_gfx::error::VktError::EnforceDefaultContext),
        }
    }

    fn init_instance_capabilities(&self, caps: &mut InstCaps) -> VktResult<()> {
        match self.init_inst.as_ref() {
            Some(init) => init(caps),
            None => Ok(()),
        }
    }

    fn required_capabilities_id(&self) -> String {
        self.caps_id.clone()
    }

    fn instance_capabilities_id(&self) -> String {
        self.inst_id.clone()
    }

    fn create_instance(&self, context: &Rc<Context>) -> VktResult<Box<dyn TestInstance>> {
        *self.seen_context.borrow_mut() = Some(context.caps_id().to_string());
        Ok(Box::new(ScriptedInstance {
            statuses: self.statuses.borrow().clone(),
            next: 0,
        }))
    }
}

struct ScriptedInstance {
    statuses: Vec<TestStatus>,
    next: usize,
}

impl TestInstance for ScriptedInstance {
    fn iterate(&mut self) -> VktResult<TestStatus> {
        let idx = self.next.min(self.statuses.len().saturating_sub(1));
        self.next += 1;
        Ok(self.statuses.get(idx).cloned().unwrap_or(TestStatus::Pass(String::new())))
    }
}
