//! Vulkan SC 的 pipeline cache 构建
//!
//! 子进程把捕获的对象图交给 [`cache_builder::LocalCacheBuilder`]（本进程）或者
//! [`remote::RemoteCacheBuilder`]（vksc-server），得到 pipeline cache 数据与 pipeline pool 大小。

pub mod cache_builder;
pub mod compiler;
pub mod protocol;
pub mod remote;
pub mod server;
