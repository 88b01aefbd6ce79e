use std::{ffi::c_void, rc::Rc};

use ash::vk;

use crate::{
    driver::{AshInstance, DebugMsger},
    error::{VktError, VktResult},
    interface::{InstanceInterface, PlatformInterface},
    vk_check,
};

/// 持有 `ash::Entry`
///
/// 在 drop 之后，会卸载 dll，因此所有 instance 都持有一份 clone
pub struct AshPlatform {
    vk_entry: ash::Entry,
}

impl AshPlatform {
    /// 在运行时动态加载 vulkan loader
    pub fn load() -> VktResult<Self> {
        let vk_entry = unsafe { ash::Entry::load() }
            .map_err(|e| VktError::not_supported(format!("failed to load vulkan entry: {e}")))?;
        Ok(Self { vk_entry })
    }
}

impl PlatformInterface for AshPlatform {
    fn enumerate_instance_version(&self) -> VktResult<u32> {
        let version = vk_check!(unsafe { self.vk_entry.try_enumerate_instance_version() })?;
        Ok(version.unwrap_or(vk::API_VERSION_1_0))
    }

    fn enumerate_instance_extension_properties(&self) -> VktResult<Vec<vk::ExtensionProperties>> {
        vk_check!(unsafe { self.vk_entry.enumerate_instance_extension_properties(None) })
    }

    fn enumerate_instance_layer_properties(&self) -> VktResult<Vec<vk::LayerProperties>> {
        vk_check!(unsafe { self.vk_entry.enumerate_instance_layer_properties() })
    }

    fn create_instance(
        &self,
        create_info: &vk::InstanceCreateInfo,
        enable_validation: bool,
    ) -> VktResult<Rc<dyn InstanceInterface>> {
        // 为 instance info 添加 debug messenger，覆盖 instance 创建与销毁期间的消息
        let mut instance_ci = *create_info;
        let mut debug_utils_messenger_ci = DebugMsger::debug_utils_messenger_ci();
        if enable_validation {
            debug_utils_messenger_ci.p_next = instance_ci.p_next;
            instance_ci.p_next = &debug_utils_messenger_ci as *const _ as *const c_void;
        }

        let instance = vk_check!(unsafe { self.vk_entry.create_instance(&instance_ci, None) })?;
        let debug_msger = if enable_validation {
            match DebugMsger::new(&self.vk_entry, &instance) {
                Ok(msger) => Some(msger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Rc::new(AshInstance::new(self.vk_entry.clone(), instance, debug_msger)))
    }
}
