//! physical device property 结构体的注册表与查询，机制与 [`crate::device_features`] 相同

use std::ptr;

use ash::vk;
use itertools::Itertools;

use crate::{
    device_features::{BlobKind, ChainItem, FeatureDesc, StructChain},
    error::{VktError, VktResult},
    interface::InstanceInterface,
    query::{api_version_supports, extension_name},
};

/// 与 feature 共用同一种描述
pub type PropertyDesc = FeatureDesc;

pub trait PropertyStruct: Copy + Default + std::fmt::Debug + 'static {
    const DESC: PropertyDesc;

    fn into_var(self) -> PropertiesVar;
    fn from_var(var: &PropertiesVar) -> Option<&Self>;
}

macro_rules! property_registry {
    ($(
        $variant:ident => $ty:ty {
            name: $name:literal,
            s_type: $stype:expr,
            extension: $ext:expr,
            blob: $blob:expr $(,)?
        }
    ),* $(,)?) => {
        #[derive(Clone, Copy, Debug)]
        pub enum PropertiesVar {
            $( $variant($ty), )*
        }

        $(
            impl PropertyStruct for $ty {
                const DESC: PropertyDesc = PropertyDesc {
                    name: $name,
                    s_type: $stype,
                    extension: $ext,
                    exact_spec_version: 0,
                    blob: $blob,
                    chainable: true,
                };

                #[inline]
                fn into_var(self) -> PropertiesVar {
                    PropertiesVar::$variant(self)
                }

                #[inline]
                fn from_var(var: &PropertiesVar) -> Option<&Self> {
                    match var {
                        PropertiesVar::$variant(v) => Some(v),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )*

        pub const PROPERTY_REGISTRY: &[PropertyDesc] = &[ $( <$ty as PropertyStruct>::DESC, )* ];

        impl ChainItem for PropertiesVar {
            fn base_out_ptr(&mut self) -> Option<*mut vk::BaseOutStructure<'static>> {
                match self {
                    $( Self::$variant(v) => Some(v as *mut $ty as *mut vk::BaseOutStructure<'static>), )*
                }
            }
        }

        impl PropertiesVar {
            pub fn desc(&self) -> &'static PropertyDesc {
                match self {
                    $( Self::$variant(_) => &<$ty as PropertyStruct>::DESC, )*
                }
            }

            pub fn default_for(s_type: vk::StructureType) -> Option<Self> {
                $(
                    if s_type == <$ty as PropertyStruct>::DESC.s_type {
                        return Some(Self::$variant(<$ty>::default()));
                    }
                )*
                None
            }

            /// # Safety
            /// `dst` 必须指向与 `self` 同类型（sType 相同）的有效结构体
            pub unsafe fn write_into(&self, dst: *mut vk::BaseOutStructure<'static>) {
                unsafe {
                    let p_next = (*dst).p_next;
                    match self {
                        $( Self::$variant(v) => ptr::write(dst as *mut $ty, *v), )*
                    }
                    (*dst).p_next = p_next;
                }
            }
        }
    };
}

property_registry! {
    Vulkan11 => vk::PhysicalDeviceVulkan11Properties<'static> {
        name: "VkPhysicalDeviceVulkan11Properties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_1_PROPERTIES,
        extension: None, blob: BlobKind::Blob(vk::API_VERSION_1_1),
    },
    Vulkan12 => vk::PhysicalDeviceVulkan12Properties<'static> {
        name: "VkPhysicalDeviceVulkan12Properties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_PROPERTIES,
        extension: None, blob: BlobKind::Blob(vk::API_VERSION_1_2),
    },
    Vulkan13 => vk::PhysicalDeviceVulkan13Properties<'static> {
        name: "VkPhysicalDeviceVulkan13Properties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_PROPERTIES,
        extension: None, blob: BlobKind::Blob(vk::API_VERSION_1_3),
    },
    Id => vk::PhysicalDeviceIDProperties<'static> {
        name: "VkPhysicalDeviceIDProperties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_ID_PROPERTIES,
        extension: None, blob: BlobKind::InBlob(vk::API_VERSION_1_1),
    },
    Subgroup => vk::PhysicalDeviceSubgroupProperties<'static> {
        name: "VkPhysicalDeviceSubgroupProperties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SUBGROUP_PROPERTIES,
        extension: None, blob: BlobKind::InBlob(vk::API_VERSION_1_1),
    },
    Multiview => vk::PhysicalDeviceMultiviewProperties<'static> {
        name: "VkPhysicalDeviceMultiviewProperties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_MULTIVIEW_PROPERTIES,
        extension: Some("VK_KHR_multiview"), blob: BlobKind::InBlob(vk::API_VERSION_1_1),
    },
    ProtectedMemory => vk::PhysicalDeviceProtectedMemoryProperties<'static> {
        name: "VkPhysicalDeviceProtectedMemoryProperties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_PROTECTED_MEMORY_PROPERTIES,
        extension: None, blob: BlobKind::InBlob(vk::API_VERSION_1_1),
    },
    Maintenance3 => vk::PhysicalDeviceMaintenance3Properties<'static> {
        name: "VkPhysicalDeviceMaintenance3Properties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_MAINTENANCE_3_PROPERTIES,
        extension: Some("VK_KHR_maintenance3"), blob: BlobKind::InBlob(vk::API_VERSION_1_1),
    },
    Driver => vk::PhysicalDeviceDriverProperties<'static> {
        name: "VkPhysicalDeviceDriverProperties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_DRIVER_PROPERTIES,
        extension: Some("VK_KHR_driver_properties"), blob: BlobKind::InBlob(vk::API_VERSION_1_2),
    },
    FloatControls => vk::PhysicalDeviceFloatControlsProperties<'static> {
        name: "VkPhysicalDeviceFloatControlsProperties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_FLOAT_CONTROLS_PROPERTIES,
        extension: Some("VK_KHR_shader_float_controls"), blob: BlobKind::InBlob(vk::API_VERSION_1_2),
    },
    DescriptorIndexing => vk::PhysicalDeviceDescriptorIndexingProperties<'static> {
        name: "VkPhysicalDeviceDescriptorIndexingProperties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_DESCRIPTOR_INDEXING_PROPERTIES,
        extension: Some("VK_EXT_descriptor_indexing"), blob: BlobKind::InBlob(vk::API_VERSION_1_2),
    },
    TimelineSemaphore => vk::PhysicalDeviceTimelineSemaphoreProperties<'static> {
        name: "VkPhysicalDeviceTimelineSemaphoreProperties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_PROPERTIES,
        extension: Some("VK_KHR_timeline_semaphore"), blob: BlobKind::InBlob(vk::API_VERSION_1_2),
    },
    Maintenance4 => vk::PhysicalDeviceMaintenance4Properties<'static> {
        name: "VkPhysicalDeviceMaintenance4Properties",
        s_type: vk::StructureType::PHYSICAL_DEVICE_MAINTENANCE_4_PROPERTIES,
        extension: Some("VK_KHR_maintenance4"), blob: BlobKind::InBlob(vk::API_VERSION_1_3),
    },
    MeshShader => vk::PhysicalDeviceMeshShaderPropertiesEXT<'static> {
        name: "VkPhysicalDeviceMeshShaderPropertiesEXT",
        s_type: vk::StructureType::PHYSICAL_DEVICE_MESH_SHADER_PROPERTIES_EXT,
        extension: Some("VK_EXT_mesh_shader"), blob: BlobKind::Standalone,
    },
    RayTracingPipeline => vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static> {
        name: "VkPhysicalDeviceRayTracingPipelinePropertiesKHR",
        s_type: vk::StructureType::PHYSICAL_DEVICE_RAY_TRACING_PIPELINE_PROPERTIES_KHR,
        extension: Some("VK_KHR_ray_tracing_pipeline"), blob: BlobKind::Standalone,
    },
    AccelerationStructure => vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'static> {
        name: "VkPhysicalDeviceAccelerationStructurePropertiesKHR",
        s_type: vk::StructureType::PHYSICAL_DEVICE_ACCELERATION_STRUCTURE_PROPERTIES_KHR,
        extension: Some("VK_KHR_acceleration_structure"), blob: BlobKind::Standalone,
    },
}

pub fn property_desc(s_type: vk::StructureType) -> Option<&'static PropertyDesc> {
    PROPERTY_REGISTRY.iter().find(|desc| desc.s_type == s_type)
}

/// 一次查询得到的 physical device properties
pub struct DeviceProperties {
    core_properties: vk::PhysicalDeviceProperties,
    properties: Vec<PropertiesVar>,
}

impl DeviceProperties {
    pub fn new(
        vki: &dyn InstanceInterface,
        api_version: u32,
        pdevice: vk::PhysicalDevice,
        instance_extensions: &[String],
        device_extensions: &[vk::ExtensionProperties],
    ) -> Self {
        let can_query2 = api_version_supports(api_version, vk::API_VERSION_1_1)
            || instance_extensions.iter().any(|e| e == "VK_KHR_get_physical_device_properties2");

        let mut core_properties = vki.get_physical_device_properties(pdevice);
        let mut properties = vec![];

        if can_query2 {
            let available = |desc: &PropertyDesc| {
                desc.core_version().is_some_and(|core| api_version_supports(api_version, core))
                    || desc.extension.is_some_and(|ext| device_extensions.iter().any(|p| extension_name(p) == ext))
            };
            let mut chain = StructChain::new(
                PROPERTY_REGISTRY
                    .iter()
                    .filter(|desc| available(desc))
                    .filter_map(|desc| PropertiesVar::default_for(desc.s_type))
                    .collect_vec(),
            );

            let mut properties2 = vk::PhysicalDeviceProperties2::default();
            chain.with_chain(|head| {
                properties2.p_next = head;
                vki.get_physical_device_properties2(pdevice, &mut properties2);
                properties2.p_next = ptr::null_mut();
            });

            core_properties = properties2.properties;
            properties = chain.into_items();
        }

        Self {
            core_properties,
            properties,
        }
    }

    #[inline]
    pub fn core_properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.core_properties
    }

    #[inline]
    pub fn properties(&self) -> &[PropertiesVar] {
        &self.properties
    }

    pub fn get<T: PropertyStruct>(&self) -> Option<&T> {
        self.properties.iter().find_map(T::from_var)
    }

    /// 按结构体名线性查找，`VkPhysicalDeviceProperties` 总是存在
    pub fn contains(&self, name: &str, throw_if_not_exists: bool) -> VktResult<bool> {
        let found = name == "VkPhysicalDeviceProperties" || self.properties.iter().any(|p| p.desc().name == name);
        if !found && throw_if_not_exists {
            return Err(VktError::not_supported(format!("{name} is not supported")));
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_registry() {
        let desc = property_desc(vk::StructureType::PHYSICAL_DEVICE_DRIVER_PROPERTIES).unwrap();
        assert_eq!(desc.name, "VkPhysicalDeviceDriverProperties");
        assert_eq!(desc.core_version(), Some(vk::API_VERSION_1_2));

        let var = vk::PhysicalDeviceMeshShaderPropertiesEXT::default().max_task_work_group_total_count(128).into_var();
        assert_eq!(vk::PhysicalDeviceMeshShaderPropertiesEXT::from_var(&var).unwrap().max_task_work_group_total_count, 128);
        assert!(vk::PhysicalDeviceDriverProperties::from_var(&var).is_none());
    }
}
