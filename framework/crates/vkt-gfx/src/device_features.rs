//! physical device feature 结构体的注册表与查询
//!
//! 每一个 feature 结构体都以 `sType` 作为身份，`FeaturesVar` 是它们的和类型。
//! 注册表记录了结构体所属的扩展、要求的 spec version，以及与 Vulkan 1.x blob 结构体的关系：
//! - `Blob(api)`：结构体本身就是 `VkPhysicalDeviceVulkan1xFeatures`
//! - `InBlob(api)`：结构体的所有字段都被折叠进了 api 版本的 blob
//! - `Standalone`：与 blob 无关

use std::{ffi::c_void, fmt, ptr};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{VktError, VktResult},
    interface::InstanceInterface,
    query::{api_version_supports, extension_name, format_api_version},
};

/// `VkPhysicalDeviceFeatures` 没有 sType，使用 `VK_STRUCTURE_TYPE_MAX_ENUM` 作为它的身份
pub const FEATURES10_STYPE: vk::StructureType = vk::StructureType::from_raw(0x7FFF_FFFF);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobKind {
    Standalone,
    Blob(u32),
    InBlob(u32),
}

/// 注册表中的一项
#[derive(Clone, Copy, Debug)]
pub struct FeatureDesc {
    pub name: &'static str,
    pub s_type: vk::StructureType,
    /// 所属扩展，None 表示只存在于 core 中
    pub extension: Option<&'static str>,
    /// 不为 0 时，扩展的 specVersion 必须恰好等于该值
    pub exact_spec_version: u32,
    pub blob: BlobKind,
    /// 有 sType/pNext，可以放进 pNext 链
    pub chainable: bool,
}

impl FeatureDesc {
    /// 结构体成为 core 的版本
    pub fn core_version(&self) -> Option<u32> {
        match self.blob {
            BlobKind::Blob(api) | BlobKind::InBlob(api) => Some(api),
            BlobKind::Standalone => None,
        }
    }
}

/// 可以被放进 `FeaturesVar` 的 feature 结构体
pub trait FeatureStruct: Copy + Default + fmt::Debug + 'static {
    const DESC: FeatureDesc;

    fn into_var(self) -> FeaturesVar;
    fn from_var(var: &FeaturesVar) -> Option<&Self>;
    fn from_var_mut(var: &mut FeaturesVar) -> Option<&mut Self>;
}

macro_rules! feature_registry {
    ($(
        $variant:ident => $ty:ty {
            name: $name:literal,
            s_type: $stype:expr,
            extension: $ext:expr,
            spec: $spec:literal,
            blob: $blob:expr,
            chainable: $chainable:literal $(,)?
        }
    ),* $(,)?) => {
        /// feature 结构体的和类型
        #[derive(Clone, Copy, Debug)]
        pub enum FeaturesVar {
            $( $variant($ty), )*
        }

        $(
            impl FeatureStruct for $ty {
                const DESC: FeatureDesc = FeatureDesc {
                    name: $name,
                    s_type: $stype,
                    extension: $ext,
                    exact_spec_version: $spec,
                    blob: $blob,
                    chainable: $chainable,
                };

                #[inline]
                fn into_var(self) -> FeaturesVar {
                    FeaturesVar::$variant(self)
                }

                #[inline]
                fn from_var(var: &FeaturesVar) -> Option<&Self> {
                    match var {
                        FeaturesVar::$variant(v) => Some(v),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                #[inline]
                fn from_var_mut(var: &mut FeaturesVar) -> Option<&mut Self> {
                    match var {
                        FeaturesVar::$variant(v) => Some(v),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )*

        impl ChainItem for FeaturesVar {
            fn base_out_ptr(&mut self) -> Option<*mut vk::BaseOutStructure<'static>> {
                if !self.desc().chainable {
                    return None;
                }
                match self {
                    $( Self::$variant(v) => Some(v as *mut $ty as *mut vk::BaseOutStructure<'static>), )*
                }
            }
        }

        /// 注册表，顺序即查询时链接的顺序
        pub const FEATURE_REGISTRY: &[FeatureDesc] = &[ $( <$ty as FeatureStruct>::DESC, )* ];

        impl FeaturesVar {
            pub fn desc(&self) -> &'static FeatureDesc {
                match self {
                    $( Self::$variant(_) => &<$ty as FeatureStruct>::DESC, )*
                }
            }

            /// sType 对应的零值结构体（只设置了 sType）
            pub fn default_for(s_type: vk::StructureType) -> Option<Self> {
                $(
                    if s_type == <$ty as FeatureStruct>::DESC.s_type {
                        return Some(Self::$variant(<$ty>::default()));
                    }
                )*
                None
            }

            /// 把当前值写入驱动给出的链表节点，保留节点原有的 pNext
            ///
            /// # Safety
            /// `dst` 必须指向与 `self` 同类型（sType 相同）的有效结构体
            pub unsafe fn write_into(&self, dst: *mut vk::BaseOutStructure<'static>) {
                if !self.desc().chainable {
                    return;
                }
                unsafe {
                    let p_next = (*dst).p_next;
                    match self {
                        $( Self::$variant(v) => ptr::write(dst as *mut $ty, *v), )*
                    }
                    (*dst).p_next = p_next;
                }
            }

            /// 从链表节点拷贝出结构体，拷贝的 pNext 被清空；未注册的 sType 返回 None
            ///
            /// # Safety
            /// `src` 必须指向有效的、带 sType 的结构体
            pub unsafe fn read_from(src: *const vk::BaseInStructure<'static>) -> Option<Self> {
                let s_type = unsafe { (*src).s_type };
                $(
                    if <$ty as FeatureStruct>::DESC.chainable && s_type == <$ty as FeatureStruct>::DESC.s_type {
                        let mut var = Self::$variant(unsafe { ptr::read(src as *const $ty) });
                        if let Some(p) = var.base_out_ptr() {
                            unsafe { (*p).p_next = ptr::null_mut() };
                        }
                        return Some(var);
                    }
                )*
                None
            }
        }
    };
}

feature_registry! {
    // core 1.0
    Features10 => vk::PhysicalDeviceFeatures {
        name: "VkPhysicalDeviceFeatures", s_type: FEATURES10_STYPE, extension: None, spec: 0,
        blob: BlobKind::Standalone, chainable: false,
    },
    Features2 => vk::PhysicalDeviceFeatures2<'static> {
        name: "VkPhysicalDeviceFeatures2", s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
        extension: None, spec: 0, blob: BlobKind::Standalone, chainable: true,
    },

    // blob
    Vulkan11 => vk::PhysicalDeviceVulkan11Features<'static> {
        name: "VkPhysicalDeviceVulkan11Features", s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_1_FEATURES,
        extension: None, spec: 0, blob: BlobKind::Blob(vk::API_VERSION_1_1), chainable: true,
    },
    Vulkan12 => vk::PhysicalDeviceVulkan12Features<'static> {
        name: "VkPhysicalDeviceVulkan12Features", s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES,
        extension: None, spec: 0, blob: BlobKind::Blob(vk::API_VERSION_1_2), chainable: true,
    },
    Vulkan13 => vk::PhysicalDeviceVulkan13Features<'static> {
        name: "VkPhysicalDeviceVulkan13Features", s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
        extension: None, spec: 0, blob: BlobKind::Blob(vk::API_VERSION_1_3), chainable: true,
    },

    // 折叠进 1.1 blob
    Storage16Bit => vk::PhysicalDevice16BitStorageFeatures<'static> {
        name: "VkPhysicalDevice16BitStorageFeatures", s_type: vk::StructureType::PHYSICAL_DEVICE_16BIT_STORAGE_FEATURES,
        extension: Some("VK_KHR_16bit_storage"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_1), chainable: true,
    },
    Multiview => vk::PhysicalDeviceMultiviewFeatures<'static> {
        name: "VkPhysicalDeviceMultiviewFeatures", s_type: vk::StructureType::PHYSICAL_DEVICE_MULTIVIEW_FEATURES,
        extension: Some("VK_KHR_multiview"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_1), chainable: true,
    },
    VariablePointers => vk::PhysicalDeviceVariablePointersFeatures<'static> {
        name: "VkPhysicalDeviceVariablePointersFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_VARIABLE_POINTERS_FEATURES,
        extension: Some("VK_KHR_variable_pointers"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_1),
        chainable: true,
    },
    ProtectedMemory => vk::PhysicalDeviceProtectedMemoryFeatures<'static> {
        name: "VkPhysicalDeviceProtectedMemoryFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_PROTECTED_MEMORY_FEATURES,
        extension: None, spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_1), chainable: true,
    },
    SamplerYcbcrConversion => vk::PhysicalDeviceSamplerYcbcrConversionFeatures<'static> {
        name: "VkPhysicalDeviceSamplerYcbcrConversionFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SAMPLER_YCBCR_CONVERSION_FEATURES,
        extension: Some("VK_KHR_sampler_ycbcr_conversion"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_1),
        chainable: true,
    },
    ShaderDrawParameters => vk::PhysicalDeviceShaderDrawParametersFeatures<'static> {
        name: "VkPhysicalDeviceShaderDrawParametersFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SHADER_DRAW_PARAMETERS_FEATURES,
        extension: Some("VK_KHR_shader_draw_parameters"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_1),
        chainable: true,
    },

    // 折叠进 1.2 blob
    Storage8Bit => vk::PhysicalDevice8BitStorageFeatures<'static> {
        name: "VkPhysicalDevice8BitStorageFeatures", s_type: vk::StructureType::PHYSICAL_DEVICE_8BIT_STORAGE_FEATURES,
        extension: Some("VK_KHR_8bit_storage"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_2), chainable: true,
    },
    ShaderAtomicInt64 => vk::PhysicalDeviceShaderAtomicInt64Features<'static> {
        name: "VkPhysicalDeviceShaderAtomicInt64Features",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SHADER_ATOMIC_INT64_FEATURES,
        extension: Some("VK_KHR_shader_atomic_int64"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_2),
        chainable: true,
    },
    ShaderFloat16Int8 => vk::PhysicalDeviceShaderFloat16Int8Features<'static> {
        name: "VkPhysicalDeviceShaderFloat16Int8Features",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SHADER_FLOAT16_INT8_FEATURES,
        extension: Some("VK_KHR_shader_float16_int8"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_2),
        chainable: true,
    },
    DescriptorIndexing => vk::PhysicalDeviceDescriptorIndexingFeatures<'static> {
        name: "VkPhysicalDeviceDescriptorIndexingFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_DESCRIPTOR_INDEXING_FEATURES,
        extension: Some("VK_EXT_descriptor_indexing"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_2),
        chainable: true,
    },
    ScalarBlockLayout => vk::PhysicalDeviceScalarBlockLayoutFeatures<'static> {
        name: "VkPhysicalDeviceScalarBlockLayoutFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SCALAR_BLOCK_LAYOUT_FEATURES,
        extension: Some("VK_EXT_scalar_block_layout"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_2),
        chainable: true,
    },
    ImagelessFramebuffer => vk::PhysicalDeviceImagelessFramebufferFeatures<'static> {
        name: "VkPhysicalDeviceImagelessFramebufferFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_IMAGELESS_FRAMEBUFFER_FEATURES,
        extension: Some("VK_KHR_imageless_framebuffer"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_2),
        chainable: true,
    },
    UniformBufferStandardLayout => vk::PhysicalDeviceUniformBufferStandardLayoutFeatures<'static> {
        name: "VkPhysicalDeviceUniformBufferStandardLayoutFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_UNIFORM_BUFFER_STANDARD_LAYOUT_FEATURES,
        extension: Some("VK_KHR_uniform_buffer_standard_layout"), spec: 0,
        blob: BlobKind::InBlob(vk::API_VERSION_1_2), chainable: true,
    },
    ShaderSubgroupExtendedTypes => vk::PhysicalDeviceShaderSubgroupExtendedTypesFeatures<'static> {
        name: "VkPhysicalDeviceShaderSubgroupExtendedTypesFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SHADER_SUBGROUP_EXTENDED_TYPES_FEATURES,
        extension: Some("VK_KHR_shader_subgroup_extended_types"), spec: 0,
        blob: BlobKind::InBlob(vk::API_VERSION_1_2), chainable: true,
    },
    SeparateDepthStencilLayouts => vk::PhysicalDeviceSeparateDepthStencilLayoutsFeatures<'static> {
        name: "VkPhysicalDeviceSeparateDepthStencilLayoutsFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SEPARATE_DEPTH_STENCIL_LAYOUTS_FEATURES,
        extension: Some("VK_KHR_separate_depth_stencil_layouts"), spec: 0,
        blob: BlobKind::InBlob(vk::API_VERSION_1_2), chainable: true,
    },
    HostQueryReset => vk::PhysicalDeviceHostQueryResetFeatures<'static> {
        name: "VkPhysicalDeviceHostQueryResetFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_HOST_QUERY_RESET_FEATURES,
        extension: Some("VK_EXT_host_query_reset"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_2),
        chainable: true,
    },
    TimelineSemaphore => vk::PhysicalDeviceTimelineSemaphoreFeatures<'static> {
        name: "VkPhysicalDeviceTimelineSemaphoreFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES,
        extension: Some("VK_KHR_timeline_semaphore"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_2),
        chainable: true,
    },
    BufferDeviceAddress => vk::PhysicalDeviceBufferDeviceAddressFeatures<'static> {
        name: "VkPhysicalDeviceBufferDeviceAddressFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_BUFFER_DEVICE_ADDRESS_FEATURES,
        extension: Some("VK_KHR_buffer_device_address"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_2),
        chainable: true,
    },
    // 早期版本的扩展字段不同，只接受 specVersion 3
    VulkanMemoryModel => vk::PhysicalDeviceVulkanMemoryModelFeatures<'static> {
        name: "VkPhysicalDeviceVulkanMemoryModelFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_MEMORY_MODEL_FEATURES,
        extension: Some("VK_KHR_vulkan_memory_model"), spec: 3, blob: BlobKind::InBlob(vk::API_VERSION_1_2),
        chainable: true,
    },

    // 折叠进 1.3 blob
    DynamicRendering => vk::PhysicalDeviceDynamicRenderingFeatures<'static> {
        name: "VkPhysicalDeviceDynamicRenderingFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_DYNAMIC_RENDERING_FEATURES,
        extension: Some("VK_KHR_dynamic_rendering"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_3),
        chainable: true,
    },
    Synchronization2 => vk::PhysicalDeviceSynchronization2Features<'static> {
        name: "VkPhysicalDeviceSynchronization2Features",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SYNCHRONIZATION_2_FEATURES,
        extension: Some("VK_KHR_synchronization2"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_3),
        chainable: true,
    },
    Maintenance4 => vk::PhysicalDeviceMaintenance4Features<'static> {
        name: "VkPhysicalDeviceMaintenance4Features",
        s_type: vk::StructureType::PHYSICAL_DEVICE_MAINTENANCE_4_FEATURES,
        extension: Some("VK_KHR_maintenance4"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_3),
        chainable: true,
    },
    ShaderIntegerDotProduct => vk::PhysicalDeviceShaderIntegerDotProductFeatures<'static> {
        name: "VkPhysicalDeviceShaderIntegerDotProductFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SHADER_INTEGER_DOT_PRODUCT_FEATURES,
        extension: Some("VK_KHR_shader_integer_dot_product"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_3),
        chainable: true,
    },
    PipelineCreationCacheControl => vk::PhysicalDevicePipelineCreationCacheControlFeatures<'static> {
        name: "VkPhysicalDevicePipelineCreationCacheControlFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_PIPELINE_CREATION_CACHE_CONTROL_FEATURES,
        extension: Some("VK_EXT_pipeline_creation_cache_control"), spec: 0,
        blob: BlobKind::InBlob(vk::API_VERSION_1_3), chainable: true,
    },
    PrivateData => vk::PhysicalDevicePrivateDataFeatures<'static> {
        name: "VkPhysicalDevicePrivateDataFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_PRIVATE_DATA_FEATURES,
        extension: Some("VK_EXT_private_data"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_3),
        chainable: true,
    },
    ShaderDemoteToHelperInvocation => vk::PhysicalDeviceShaderDemoteToHelperInvocationFeatures<'static> {
        name: "VkPhysicalDeviceShaderDemoteToHelperInvocationFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SHADER_DEMOTE_TO_HELPER_INVOCATION_FEATURES,
        extension: Some("VK_EXT_shader_demote_to_helper_invocation"), spec: 0,
        blob: BlobKind::InBlob(vk::API_VERSION_1_3), chainable: true,
    },
    SubgroupSizeControl => vk::PhysicalDeviceSubgroupSizeControlFeatures<'static> {
        name: "VkPhysicalDeviceSubgroupSizeControlFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SUBGROUP_SIZE_CONTROL_FEATURES,
        extension: Some("VK_EXT_subgroup_size_control"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_3),
        chainable: true,
    },
    InlineUniformBlock => vk::PhysicalDeviceInlineUniformBlockFeatures<'static> {
        name: "VkPhysicalDeviceInlineUniformBlockFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_INLINE_UNIFORM_BLOCK_FEATURES,
        extension: Some("VK_EXT_inline_uniform_block"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_3),
        chainable: true,
    },
    ImageRobustness => vk::PhysicalDeviceImageRobustnessFeatures<'static> {
        name: "VkPhysicalDeviceImageRobustnessFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_IMAGE_ROBUSTNESS_FEATURES,
        extension: Some("VK_EXT_image_robustness"), spec: 0, blob: BlobKind::InBlob(vk::API_VERSION_1_3),
        chainable: true,
    },
    ZeroInitializeWorkgroupMemory => vk::PhysicalDeviceZeroInitializeWorkgroupMemoryFeatures<'static> {
        name: "VkPhysicalDeviceZeroInitializeWorkgroupMemoryFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_ZERO_INITIALIZE_WORKGROUP_MEMORY_FEATURES,
        extension: Some("VK_KHR_zero_initialize_workgroup_memory"), spec: 0,
        blob: BlobKind::InBlob(vk::API_VERSION_1_3), chainable: true,
    },
    ShaderTerminateInvocation => vk::PhysicalDeviceShaderTerminateInvocationFeatures<'static> {
        name: "VkPhysicalDeviceShaderTerminateInvocationFeatures",
        s_type: vk::StructureType::PHYSICAL_DEVICE_SHADER_TERMINATE_INVOCATION_FEATURES,
        extension: Some("VK_KHR_shader_terminate_invocation"), spec: 0,
        blob: BlobKind::InBlob(vk::API_VERSION_1_3), chainable: true,
    },

    // 扩展
    MeshShader => vk::PhysicalDeviceMeshShaderFeaturesEXT<'static> {
        name: "VkPhysicalDeviceMeshShaderFeaturesEXT",
        s_type: vk::StructureType::PHYSICAL_DEVICE_MESH_SHADER_FEATURES_EXT,
        extension: Some("VK_EXT_mesh_shader"), spec: 0, blob: BlobKind::Standalone, chainable: true,
    },
    RayTracingPipeline => vk::PhysicalDeviceRayTracingPipelineFeaturesKHR<'static> {
        name: "VkPhysicalDeviceRayTracingPipelineFeaturesKHR",
        s_type: vk::StructureType::PHYSICAL_DEVICE_RAY_TRACING_PIPELINE_FEATURES_KHR,
        extension: Some("VK_KHR_ray_tracing_pipeline"), spec: 0, blob: BlobKind::Standalone, chainable: true,
    },
    AccelerationStructure => vk::PhysicalDeviceAccelerationStructureFeaturesKHR<'static> {
        name: "VkPhysicalDeviceAccelerationStructureFeaturesKHR",
        s_type: vk::StructureType::PHYSICAL_DEVICE_ACCELERATION_STRUCTURE_FEATURES_KHR,
        extension: Some("VK_KHR_acceleration_structure"), spec: 0, blob: BlobKind::Standalone, chainable: true,
    },
    RayQuery => vk::PhysicalDeviceRayQueryFeaturesKHR<'static> {
        name: "VkPhysicalDeviceRayQueryFeaturesKHR",
        s_type: vk::StructureType::PHYSICAL_DEVICE_RAY_QUERY_FEATURES_KHR,
        extension: Some("VK_KHR_ray_query"), spec: 0, blob: BlobKind::Standalone, chainable: true,
    },
    FragmentShadingRate => vk::PhysicalDeviceFragmentShadingRateFeaturesKHR<'static> {
        name: "VkPhysicalDeviceFragmentShadingRateFeaturesKHR",
        s_type: vk::StructureType::PHYSICAL_DEVICE_FRAGMENT_SHADING_RATE_FEATURES_KHR,
        extension: Some("VK_KHR_fragment_shading_rate"), spec: 0, blob: BlobKind::Standalone, chainable: true,
    },
    TransformFeedback => vk::PhysicalDeviceTransformFeedbackFeaturesEXT<'static> {
        name: "VkPhysicalDeviceTransformFeedbackFeaturesEXT",
        s_type: vk::StructureType::PHYSICAL_DEVICE_TRANSFORM_FEEDBACK_FEATURES_EXT,
        extension: Some("VK_EXT_transform_feedback"), spec: 0, blob: BlobKind::Standalone, chainable: true,
    },
    ExtendedDynamicState => vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT<'static> {
        name: "VkPhysicalDeviceExtendedDynamicStateFeaturesEXT",
        s_type: vk::StructureType::PHYSICAL_DEVICE_EXTENDED_DYNAMIC_STATE_FEATURES_EXT,
        extension: Some("VK_EXT_extended_dynamic_state"), spec: 0, blob: BlobKind::Standalone, chainable: true,
    },
    Robustness2 => vk::PhysicalDeviceRobustness2FeaturesEXT<'static> {
        name: "VkPhysicalDeviceRobustness2FeaturesEXT",
        s_type: vk::StructureType::PHYSICAL_DEVICE_ROBUSTNESS_2_FEATURES_EXT,
        extension: Some("VK_EXT_robustness2"), spec: 0, blob: BlobKind::Standalone, chainable: true,
    },
    Maintenance5 => vk::PhysicalDeviceMaintenance5FeaturesKHR<'static> {
        name: "VkPhysicalDeviceMaintenance5FeaturesKHR",
        s_type: vk::StructureType::PHYSICAL_DEVICE_MAINTENANCE_5_FEATURES_KHR,
        extension: Some("VK_KHR_maintenance5"), spec: 0, blob: BlobKind::Standalone, chainable: true,
    },
}

// 注册表查询
impl FeaturesVar {
    #[inline]
    pub fn s_type(&self) -> vk::StructureType {
        self.desc().s_type
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.desc().name
    }
}

pub fn feature_desc(s_type: vk::StructureType) -> Option<&'static FeatureDesc> {
    FEATURE_REGISTRY.iter().find(|desc| desc.s_type == s_type)
}

pub fn feature_desc_by_name(name: &str) -> Option<&'static FeatureDesc> {
    FEATURE_REGISTRY.iter().find(|desc| desc.name == name)
}

/// blob 结构体返回 `Some(0)`；折叠进 blob 的结构体返回 blob 的 api 版本；其他返回 None
pub fn blob_feature_version(s_type: vk::StructureType) -> Option<u32> {
    feature_desc(s_type).and_then(|desc| match desc.blob {
        BlobKind::Blob(_) => Some(0),
        BlobKind::InBlob(api) => Some(api),
        BlobKind::Standalone => None,
    })
}

/// api 版本的 blob 结构体
pub fn blob_for_api_version(api_version: u32) -> Option<vk::StructureType> {
    FEATURE_REGISTRY.iter().find(|desc| desc.blob == BlobKind::Blob(api_version)).map(|desc| desc.s_type)
}

/// 折叠进 api 版本 blob 的所有结构体
pub fn version_blob_features(api_version: u32) -> Vec<vk::StructureType> {
    FEATURE_REGISTRY
        .iter()
        .filter(|desc| desc.blob == BlobKind::InBlob(api_version))
        .map(|desc| desc.s_type)
        .collect_vec()
}

/// `VkPhysicalDeviceFeatures` 中字段的数量，所有字段都是 VkBool32
pub const FEATURES10_FIELD_COUNT: usize = 55;
const _: () = assert!(std::mem::size_of::<vk::PhysicalDeviceFeatures>() == FEATURES10_FIELD_COUNT * 4);

pub const FEATURES10_FIELD_NAMES: [&str; FEATURES10_FIELD_COUNT] = [
    "robustBufferAccess",
    "fullDrawIndexUint32",
    "imageCubeArray",
    "independentBlend",
    "geometryShader",
    "tessellationShader",
    "sampleRateShading",
    "dualSrcBlend",
    "logicOp",
    "multiDrawIndirect",
    "drawIndirectFirstInstance",
    "depthClamp",
    "depthBiasClamp",
    "fillModeNonSolid",
    "depthBounds",
    "wideLines",
    "largePoints",
    "alphaToOne",
    "multiViewport",
    "samplerAnisotropy",
    "textureCompressionETC2",
    "textureCompressionASTC_LDR",
    "textureCompressionBC",
    "occlusionQueryPrecise",
    "pipelineStatisticsQuery",
    "vertexPipelineStoresAndAtomics",
    "fragmentStoresAndAtomics",
    "shaderTessellationAndGeometryPointSize",
    "shaderImageGatherExtended",
    "shaderStorageImageExtendedFormats",
    "shaderStorageImageMultisample",
    "shaderStorageImageReadWithoutFormat",
    "shaderStorageImageWriteWithoutFormat",
    "shaderUniformBufferArrayDynamicIndexing",
    "shaderSampledImageArrayDynamicIndexing",
    "shaderStorageBufferArrayDynamicIndexing",
    "shaderStorageImageArrayDynamicIndexing",
    "shaderClipDistance",
    "shaderCullDistance",
    "shaderFloat64",
    "shaderInt64",
    "shaderInt16",
    "shaderResourceResidency",
    "shaderResourceMinLod",
    "sparseBinding",
    "sparseResidencyBuffer",
    "sparseResidencyImage2D",
    "sparseResidencyImage3D",
    "sparseResidency2Samples",
    "sparseResidency4Samples",
    "sparseResidency8Samples",
    "sparseResidency16Samples",
    "sparseResidencyAliased",
    "variableMultisampleRate",
    "inheritedQueries",
];

/// `VkPhysicalDeviceFeatures` 是 55 个连续的 VkBool32，没有 padding
#[inline]
pub fn features10_bools(features: &vk::PhysicalDeviceFeatures) -> &[vk::Bool32; FEATURES10_FIELD_COUNT] {
    unsafe { &*(features as *const vk::PhysicalDeviceFeatures as *const [vk::Bool32; FEATURES10_FIELD_COUNT]) }
}

#[inline]
pub fn features10_bools_mut(features: &mut vk::PhysicalDeviceFeatures) -> &mut [vk::Bool32; FEATURES10_FIELD_COUNT] {
    unsafe { &mut *(features as *mut vk::PhysicalDeviceFeatures as *mut [vk::Bool32; FEATURES10_FIELD_COUNT]) }
}

/// 被启用的 `VkPhysicalDeviceFeatures` 字段名
pub fn enabled_features10_names(features: &vk::PhysicalDeviceFeatures) -> Vec<&'static str> {
    features10_bools(features)
        .iter()
        .zip(FEATURES10_FIELD_NAMES)
        .filter(|(value, _)| **value != vk::FALSE)
        .map(|(_, name)| name)
        .collect_vec()
}

/// 可以被放进 pNext 链的和类型
pub trait ChainItem {
    /// 指向结构体开头的指针，没有 sType/pNext 的结构体返回 None
    fn base_out_ptr(&mut self) -> Option<*mut vk::BaseOutStructure<'static>>;
}

/// 拥有一组结构体，只在调用驱动之前临时串起 pNext
///
/// 链接后的指针只在 [`StructChain::with_chain`] 的闭包中有效，闭包返回后所有 pNext 被清空。
#[derive(Debug, Clone)]
pub struct StructChain<V: ChainItem> {
    items: Vec<V>,
}

pub type FeatureChain = StructChain<FeaturesVar>;

impl<V: ChainItem> StructChain<V> {
    pub fn new(items: Vec<V>) -> Self {
        Self { items }
    }

    #[inline]
    pub fn items(&self) -> &[V] {
        &self.items
    }

    #[inline]
    pub fn into_items(self) -> Vec<V> {
        self.items
    }

    /// 按顺序链接所有可链接的结构体，把链表头交给 `f`
    pub fn with_chain<R>(&mut self, f: impl FnOnce(*mut c_void) -> R) -> R {
        let ptrs = self.items.iter_mut().filter_map(ChainItem::base_out_ptr).collect_vec();
        unsafe {
            for (cur, next) in ptrs.iter().tuple_windows() {
                (**cur).p_next = *next;
            }
            if let Some(last) = ptrs.last() {
                (**last).p_next = ptr::null_mut();
            }
        }
        let head = ptrs.first().map_or(ptr::null_mut(), |p| *p as *mut c_void);

        let result = f(head);

        unsafe {
            for p in &ptrs {
                (**p).p_next = ptr::null_mut();
            }
        }
        result
    }
}

/// 一次查询得到的 physical device features
pub struct DeviceFeatures {
    core_features: vk::PhysicalDeviceFeatures,
    features: Vec<FeaturesVar>,
    api_version: u32,
}

// 构造
impl DeviceFeatures {
    /// 根据扩展列表构建完整的 `VkPhysicalDeviceFeatures2` 链，一次查询填充所有结构体
    pub fn new(
        vki: &dyn InstanceInterface,
        api_version: u32,
        pdevice: vk::PhysicalDevice,
        instance_extensions: &[String],
        device_extensions: &[vk::ExtensionProperties],
    ) -> Self {
        let can_query2 = api_version_supports(api_version, vk::API_VERSION_1_1)
            || instance_extensions.iter().any(|e| e == "VK_KHR_get_physical_device_properties2");

        let mut core_features = vki.get_physical_device_features(pdevice);
        let mut features = vec![];

        if can_query2 {
            let mut chain = FeatureChain::new(
                FEATURE_REGISTRY
                    .iter()
                    .filter(|desc| desc.chainable && desc.s_type != vk::StructureType::PHYSICAL_DEVICE_FEATURES_2)
                    .filter(|desc| Self::is_struct_available(desc, api_version, device_extensions))
                    .filter_map(|desc| FeaturesVar::default_for(desc.s_type))
                    .collect_vec(),
            );

            let mut features2 = vk::PhysicalDeviceFeatures2::default();
            chain.with_chain(|head| {
                features2.p_next = head;
                vki.get_physical_device_features2(pdevice, &mut features2);
                features2.p_next = ptr::null_mut();
            });

            core_features = features2.features;
            features = chain.into_items();
        }

        // robustness 必须由每个测试显式开启
        core_features.robust_buffer_access = vk::FALSE;

        log::debug!(
            "device features ({}): {}",
            format_api_version(api_version),
            features.iter().map(FeaturesVar::name).join(", ")
        );

        Self {
            core_features,
            features,
            api_version,
        }
    }

    /// 结构体所属的扩展存在，或者已经进入 core
    fn is_struct_available(desc: &FeatureDesc, api_version: u32, device_extensions: &[vk::ExtensionProperties]) -> bool {
        if desc.core_version().is_some_and(|core| api_version_supports(api_version, core)) {
            return true;
        }
        let Some(ext) = desc.extension else {
            return false;
        };
        device_extensions.iter().any(|props| {
            extension_name(props) == ext && (desc.exact_spec_version == 0 || props.spec_version == desc.exact_spec_version)
        })
    }
}

// getters
impl DeviceFeatures {
    #[inline]
    pub fn core_features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.core_features
    }

    /// `pNext` 为空的 `VkPhysicalDeviceFeatures2`
    pub fn core_features2(&self) -> vk::PhysicalDeviceFeatures2<'static> {
        vk::PhysicalDeviceFeatures2::default().features(self.core_features)
    }

    #[inline]
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// 所有查询到的扩展结构体
    #[inline]
    pub fn features(&self) -> &[FeaturesVar] {
        &self.features
    }

    pub fn get<T: FeatureStruct>(&self) -> Option<&T> {
        self.features.iter().find_map(T::from_var)
    }

    /// 按 sType 查找
    pub fn get_var(&self, s_type: vk::StructureType) -> Option<&FeaturesVar> {
        self.features.iter().find(|f| f.s_type() == s_type)
    }

    /// 按结构体名线性查找，`VkPhysicalDeviceFeatures` 总是存在
    pub fn contains(&self, name: &str, throw_if_not_exists: bool) -> VktResult<bool> {
        let found = name == <vk::PhysicalDeviceFeatures as FeatureStruct>::DESC.name
            || (name == <vk::PhysicalDeviceFeatures2 as FeatureStruct>::DESC.name
                && api_version_supports(self.api_version, vk::API_VERSION_1_1))
            || self.features.iter().any(|f| f.name() == name);
        if !found && throw_if_not_exists {
            return Err(VktError::not_supported(format!("{name} is not supported")));
        }
        Ok(found)
    }

    /// 用于创建 device 的结构体：blob 存在时去掉已经折叠进 blob 的结构体，避免重复的 sType
    pub fn device_creation_features(&self) -> Vec<FeaturesVar> {
        let blob_present = |api: u32| {
            blob_for_api_version(api).is_some_and(|blob| self.features.iter().any(|f| f.s_type() == blob))
        };
        self.features
            .iter()
            .filter(|f| match f.desc().blob {
                BlobKind::InBlob(api) => !blob_present(api),
                _ => true,
            })
            .copied()
            .collect_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let desc = feature_desc(vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES).unwrap();
        assert_eq!(desc.name, "VkPhysicalDeviceTimelineSemaphoreFeatures");
        assert_eq!(desc.blob, BlobKind::InBlob(vk::API_VERSION_1_2));

        assert_eq!(blob_feature_version(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES), Some(0));
        assert_eq!(
            blob_feature_version(vk::StructureType::PHYSICAL_DEVICE_SHADER_FLOAT16_INT8_FEATURES),
            Some(vk::API_VERSION_1_2)
        );
        assert_eq!(blob_feature_version(vk::StructureType::PHYSICAL_DEVICE_MESH_SHADER_FEATURES_EXT), None);
        assert_eq!(
            blob_for_api_version(vk::API_VERSION_1_3),
            Some(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES)
        );
    }

    #[test]
    fn test_registry_stypes_are_unique() {
        let stypes = FEATURE_REGISTRY.iter().map(|d| d.s_type).collect_vec();
        assert_eq!(stypes.len(), stypes.iter().unique().count());
    }

    #[test]
    fn test_version_blob_features() {
        let in_12 = version_blob_features(vk::API_VERSION_1_2);
        assert!(in_12.contains(&vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES));
        assert!(in_12.contains(&vk::StructureType::PHYSICAL_DEVICE_VULKAN_MEMORY_MODEL_FEATURES));
        assert!(!in_12.contains(&vk::StructureType::PHYSICAL_DEVICE_MULTIVIEW_FEATURES));
    }

    #[test]
    fn test_var_round_trip_through_trait() {
        let var = vk::PhysicalDeviceTimelineSemaphoreFeatures::default().timeline_semaphore(true).into_var();
        assert_eq!(var.s_type(), vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES);
        let t = vk::PhysicalDeviceTimelineSemaphoreFeatures::from_var(&var).unwrap();
        assert_eq!(t.timeline_semaphore, vk::TRUE);
        assert!(vk::PhysicalDeviceVulkan12Features::from_var(&var).is_none());
    }

    #[test]
    fn test_features10_bools() {
        let mut f = vk::PhysicalDeviceFeatures::default().geometry_shader(true).inherited_queries(true);
        assert_eq!(enabled_features10_names(&f), vec!["geometryShader", "inheritedQueries"]);
        features10_bools_mut(&mut f)[0] = vk::TRUE;
        assert_eq!(f.robust_buffer_access, vk::TRUE);
    }

    #[test]
    fn test_chain_links_and_unlinks() {
        let mut chain = FeatureChain::new(vec![
            vk::PhysicalDeviceFeatures::default().into_var(),
            vk::PhysicalDeviceMultiviewFeatures::default().into_var(),
            vk::PhysicalDeviceMeshShaderFeaturesEXT::default().into_var(),
        ]);

        let stypes = chain.with_chain(|head| {
            let mut stypes = vec![];
            let mut node = head as *const vk::BaseOutStructure;
            while !node.is_null() {
                unsafe {
                    stypes.push((*node).s_type);
                    node = (*node).p_next;
                }
            }
            stypes
        });
        assert_eq!(
            stypes,
            vec![
                vk::StructureType::PHYSICAL_DEVICE_MULTIVIEW_FEATURES,
                vk::StructureType::PHYSICAL_DEVICE_MESH_SHADER_FEATURES_EXT
            ]
        );

        match chain.items()[1] {
            FeaturesVar::Multiview(m) => assert!(m.p_next.is_null()),
            _ => panic!("unexpected variant"),
        }
    }
}
