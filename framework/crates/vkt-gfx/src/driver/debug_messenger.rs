use std::ffi::CStr;

use ash::vk;

use crate::error::VktResult;

/// validation layer 消息输出到日志
pub struct DebugMsger {
    vk_debug_utils_instance: ash::ext::debug_utils::Instance,
    vk_debug_utils_messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMsger {
    pub fn new(vk_pf: &ash::Entry, instance: &ash::Instance) -> VktResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(vk_pf, instance);

        let create_info = Self::debug_utils_messenger_ci();
        let debug_messenger = crate::vk_check!(unsafe { loader.create_debug_utils_messenger(&create_info, None) })?;

        Ok(Self {
            vk_debug_utils_instance: loader,
            vk_debug_utils_messenger: debug_messenger,
        })
    }
}

impl Drop for DebugMsger {
    fn drop(&mut self) {
        unsafe {
            log::debug!("destroying debug messenger");
            self.vk_debug_utils_instance.destroy_debug_utils_messenger(self.vk_debug_utils_messenger, None);
        }
    }
}

/// debug messenger 的回调函数
/// # Safety
/// 由驱动调用，`p_callback_data` 在回调期间有效
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };

    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    // 提取 json 里面的 MainMessage 字段，这个字段里面有换行符，需要单独输出
    let mut json_value = serde_json::from_str::<serde_json::Value>(msg.as_ref());
    let mut json_obj = json_value.as_mut().map_or(None, |v| v.as_object_mut());
    let mut main_msg_value = None;
    if let Some(obj) = &mut json_obj {
        main_msg_value = obj.remove("MainMessage");
    }
    let main_msg_str = main_msg_value.as_ref().and_then(|value| value.as_str()).unwrap_or_default();
    let total_msg_str =
        json_obj.and_then(|obj| serde_json::to_string_pretty(&obj).ok()).unwrap_or_else(|| msg.to_string());

    let format_msg = format!("[{:?}]\n{}\n{}\n", message_type, total_msg_str, main_msg_str);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", format_msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

// 构造过程辅助函数
impl DebugMsger {
    /// 用于创建 debug messenger 的结构体，也可以放进 instance create info 的 pNext 中
    pub fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR)
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}
