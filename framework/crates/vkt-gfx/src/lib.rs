//! VKT 的 vk 层
//!
//! 提供对 Vulkan API 的薄封装：错误分类、RAII 句柄、dispatch 接口（ash 实现与 mock 实现）、
//! 设备能力查询、内存分配，以及 Vulkan SC 的 pipeline 资源捕获。
//! 所有 `pNext` 链只在调用驱动的瞬间链接，其余时间以有序容器的形式存在。

pub mod device_features;
pub mod device_properties;
pub mod driver;
pub mod error;
pub mod handle;
pub mod interface;
pub mod mem_util;
pub mod query;
pub mod ref_util;
pub mod resource_interface;
pub mod resource_json;

#[cfg(any(test, feature = "mock-driver"))]
pub mod mock;
