//! 内置用例的执行器
//!
//! 命令行与 `vkt-context` 相同，另外在 Vulkan SC 模式下负责捕获数据的导出与导入。

pub mod cases;
pub mod runner;
