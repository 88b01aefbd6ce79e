use std::{cell::RefCell, rc::Rc};

use ash::vk;

use crate::{
    driver::{AshDevice, DebugMsger},
    error::VktResult,
    interface::{DeviceInterface, InstanceInterface},
    vk_check,
};

pub struct AshInstance {
    /// 保证 loader 在 instance 销毁之前不会被卸载
    _vk_entry: ash::Entry,
    ash_instance: ash::Instance,
    debug_msger: RefCell<Option<DebugMsger>>,
}

impl AshInstance {
    pub fn new(vk_entry: ash::Entry, ash_instance: ash::Instance, debug_msger: Option<DebugMsger>) -> Self {
        Self {
            _vk_entry: vk_entry,
            ash_instance,
            debug_msger: RefCell::new(debug_msger),
        }
    }

    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }
}

impl InstanceInterface for AshInstance {
    #[inline]
    fn handle(&self) -> vk::Instance {
        self.ash_instance.handle()
    }

    fn destroy_instance(&self) {
        log::info!("destroying instance");
        // messenger 必须在 instance 之前销毁
        self.debug_msger.borrow_mut().take();
        unsafe { self.ash_instance.destroy_instance(None) };
    }

    fn enumerate_physical_devices(&self) -> VktResult<Vec<vk::PhysicalDevice>> {
        vk_check!(unsafe { self.ash_instance.enumerate_physical_devices() })
    }

    fn get_physical_device_properties(&self, pdevice: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        unsafe { self.ash_instance.get_physical_device_properties(pdevice) }
    }

    fn get_physical_device_properties2(
        &self,
        pdevice: vk::PhysicalDevice,
        properties: &mut vk::PhysicalDeviceProperties2<'_>,
    ) {
        unsafe { self.ash_instance.get_physical_device_properties2(pdevice, properties) }
    }

    fn get_physical_device_features(&self, pdevice: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        unsafe { self.ash_instance.get_physical_device_features(pdevice) }
    }

    fn get_physical_device_features2(&self, pdevice: vk::PhysicalDevice, features: &mut vk::PhysicalDeviceFeatures2<'_>) {
        unsafe { self.ash_instance.get_physical_device_features2(pdevice, features) }
    }

    fn get_physical_device_memory_properties(
        &self,
        pdevice: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        unsafe { self.ash_instance.get_physical_device_memory_properties(pdevice) }
    }

    fn get_physical_device_queue_family_properties(
        &self,
        pdevice: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        unsafe { self.ash_instance.get_physical_device_queue_family_properties(pdevice) }
    }

    fn enumerate_device_extension_properties(
        &self,
        pdevice: vk::PhysicalDevice,
    ) -> VktResult<Vec<vk::ExtensionProperties>> {
        vk_check!(unsafe { self.ash_instance.enumerate_device_extension_properties(pdevice) })
    }

    fn create_device(
        &self,
        pdevice: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> VktResult<Rc<dyn DeviceInterface>> {
        let device = vk_check!(unsafe { self.ash_instance.create_device(pdevice, create_info, None) })?;
        log::info!("device created: {:?}", device.handle());
        Ok(Rc::new(AshDevice::new(device)))
    }
}
