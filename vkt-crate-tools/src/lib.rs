//! VKT 工具集
//!
//! 提供日志初始化、TOML 运行配置等在各个 crate 之间共享的工具。
//!
//! # 运行配置
//! 通过 TOML 文件给出默认的命令行参数以及需要执行的 case 列表，命令行参数优先。

pub mod init_log;
pub mod run_config;
