//! VKT 的 vkt 层
//!
//! 测试用例通过 [`dev_caps::DevCaps`] 声明自己需要的扩展、feature 与队列，
//! [`context_manager::ContextManager`] 按能力 id 缓存 device，相同需求的用例共享同一个 [`context::Context`]。
//! 不需要特殊能力的用例使用 default context，它启用了 device 支持的全部扩展与 feature。

pub mod app_params;
pub mod command_line;
pub mod context;
pub mod context_manager;
pub mod default_device;
pub mod dev_caps;
pub mod inst_caps;
pub mod test_case;
