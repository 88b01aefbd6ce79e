use std::fmt;

use ash::vk;

/// VKT 中所有可恢复错误的分类
///
/// - `NotSupported`：设备或驱动缺少所需能力，测试标记为 NotSupported，整个 suite 继续
/// - `TestFailed`：观察到的结果违反了测试的正确性断言
/// - `OutOfMemory`：`VK_ERROR_OUT_OF_HOST_MEMORY` / `VK_ERROR_OUT_OF_DEVICE_MEMORY`，属于资源错误
/// - `Resource`：其他资源耗尽
/// - `Internal`：框架自身的不变量被破坏
/// - `EnforceDefaultContext`：测试要求回退到默认设备，不是真正的错误
/// - `Vk`：其余非 `VK_SUCCESS` 的返回值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VktError {
    NotSupported(String),
    TestFailed(String),
    OutOfMemory { result: vk::Result, message: String },
    Resource(String),
    Internal(String),
    EnforceDefaultContext,
    Vk { result: vk::Result, message: String },
}

pub type VktResult<T> = Result<T, VktError>;

// 构造
impl VktError {
    #[inline]
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    #[inline]
    pub fn test_failed(msg: impl Into<String>) -> Self {
        Self::TestFailed(msg.into())
    }

    #[inline]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 把一个失败的 `vk::Result` 转换为对应的错误
    pub fn from_vk(result: vk::Result, expr: &str) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfMemory {
                result,
                message: expr.to_string(),
            },
            _ => Self::Vk {
                result,
                message: expr.to_string(),
            },
        }
    }
}

// 分类
impl VktError {
    /// harness 可以选择重试或者跳过，而不是计为逻辑错误
    #[inline]
    pub fn is_resource_error(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::Resource(_))
    }

    #[inline]
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported(_))
    }

    /// 错误携带的描述，`EnforceDefaultContext` 为空
    pub fn message(&self) -> &str {
        match self {
            Self::NotSupported(msg) | Self::TestFailed(msg) | Self::Resource(msg) | Self::Internal(msg) => msg,
            Self::OutOfMemory { message, .. } | Self::Vk { message, .. } => message,
            Self::EnforceDefaultContext => "",
        }
    }
}

impl fmt::Display for VktError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSupported(msg) => write!(f, "not supported: {msg}"),
            Self::TestFailed(msg) => write!(f, "test failed: {msg}"),
            Self::OutOfMemory { result, message } => write!(f, "out of memory ({result:?}): {message}"),
            Self::Resource(msg) => write!(f, "resource error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::EnforceDefaultContext => write!(f, "enforce default context"),
            Self::Vk { result, message } => write!(f, "{result:?} at {message}"),
        }
    }
}

impl std::error::Error for VktError {}

/// 把 ash 的返回值转换为 `VktResult`
///
/// 除了 `VK_SUCCESS` 以外的返回值都不会被忽略
#[inline]
pub fn check_result<T>(result: Result<T, vk::Result>, expr: &str) -> VktResult<T> {
    result.map_err(|err| VktError::from_vk(err, expr))
}

/// 针对只返回 `vk::Result` 的调用
#[inline]
pub fn vk_check(result: vk::Result, expr: &str) -> VktResult<()> {
    if result == vk::Result::SUCCESS {
        Ok(())
    } else {
        Err(VktError::from_vk(result, expr))
    }
}

/// `vk_check!(device.create_xxx(..))`，失败时把表达式文本作为错误信息
#[macro_export]
macro_rules! vk_check {
    ($e:expr) => {
        $crate::error::check_result($e, stringify!($e))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_is_resource_error() {
        let err = VktError::from_vk(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "vkAllocateMemory");
        assert!(err.is_resource_error());
        assert!(matches!(err, VktError::OutOfMemory { .. }));

        let err = VktError::from_vk(vk::Result::ERROR_OUT_OF_HOST_MEMORY, "vkCreateSampler");
        assert!(err.is_resource_error());
    }

    #[test]
    fn test_other_results_are_test_errors() {
        let err = VktError::from_vk(vk::Result::ERROR_DEVICE_LOST, "vkQueueSubmit");
        assert!(!err.is_resource_error());
        assert_eq!(
            err,
            VktError::Vk {
                result: vk::Result::ERROR_DEVICE_LOST,
                message: "vkQueueSubmit".to_string()
            }
        );
    }

    #[test]
    fn test_vk_check_macro() {
        let ok: Result<u32, vk::Result> = Ok(7);
        assert_eq!(vk_check!(ok).unwrap(), 7);

        let failed: Result<u32, vk::Result> = Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        let err = vk_check!(failed).unwrap_err();
        assert_eq!(err.message(), "failed");

        assert!(vk_check(vk::Result::SUCCESS, "noop").is_ok());
        assert!(vk_check(vk::Result::TIMEOUT, "vkWaitForFences").is_err());
    }
}
