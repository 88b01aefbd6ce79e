//! 只读查询工具：扩展枚举、core 扩展判断、queue family 选择、fence 等待

use std::ffi::c_char;

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{VktError, VktResult},
    interface::{DeviceInterface, InstanceInterface, PlatformInterface},
};

/// 已经提升到 core-1.1 的 device extension
const DEVICE_EXTENSIONS_1_1: &[&str] = &[
    "VK_KHR_16bit_storage",
    "VK_KHR_bind_memory2",
    "VK_KHR_dedicated_allocation",
    "VK_KHR_descriptor_update_template",
    "VK_KHR_device_group",
    "VK_KHR_external_fence",
    "VK_KHR_external_memory",
    "VK_KHR_external_semaphore",
    "VK_KHR_get_memory_requirements2",
    "VK_KHR_maintenance1",
    "VK_KHR_maintenance2",
    "VK_KHR_maintenance3",
    "VK_KHR_multiview",
    "VK_KHR_relaxed_block_layout",
    "VK_KHR_sampler_ycbcr_conversion",
    "VK_KHR_shader_draw_parameters",
    "VK_KHR_storage_buffer_storage_class",
    "VK_KHR_variable_pointers",
];

/// 已经提升到 core-1.2 的 device extension
const DEVICE_EXTENSIONS_1_2: &[&str] = &[
    "VK_KHR_8bit_storage",
    "VK_KHR_buffer_device_address",
    "VK_KHR_create_renderpass2",
    "VK_KHR_depth_stencil_resolve",
    "VK_KHR_draw_indirect_count",
    "VK_KHR_driver_properties",
    "VK_KHR_image_format_list",
    "VK_KHR_imageless_framebuffer",
    "VK_KHR_sampler_mirror_clamp_to_edge",
    "VK_KHR_separate_depth_stencil_layouts",
    "VK_KHR_shader_atomic_int64",
    "VK_KHR_shader_float16_int8",
    "VK_KHR_shader_float_controls",
    "VK_KHR_shader_subgroup_extended_types",
    "VK_KHR_spirv_1_4",
    "VK_KHR_timeline_semaphore",
    "VK_KHR_uniform_buffer_standard_layout",
    "VK_KHR_vulkan_memory_model",
    "VK_EXT_descriptor_indexing",
    "VK_EXT_host_query_reset",
    "VK_EXT_sampler_filter_minmax",
    "VK_EXT_scalar_block_layout",
    "VK_EXT_separate_stencil_usage",
    "VK_EXT_shader_viewport_index_layer",
];

/// 已经提升到 core-1.3 的 device extension
const DEVICE_EXTENSIONS_1_3: &[&str] = &[
    "VK_KHR_copy_commands2",
    "VK_KHR_dynamic_rendering",
    "VK_KHR_format_feature_flags2",
    "VK_KHR_maintenance4",
    "VK_KHR_shader_integer_dot_product",
    "VK_KHR_shader_non_semantic_info",
    "VK_KHR_shader_terminate_invocation",
    "VK_KHR_synchronization2",
    "VK_KHR_zero_initialize_workgroup_memory",
    "VK_EXT_4444_formats",
    "VK_EXT_extended_dynamic_state",
    "VK_EXT_extended_dynamic_state2",
    "VK_EXT_image_robustness",
    "VK_EXT_inline_uniform_block",
    "VK_EXT_pipeline_creation_cache_control",
    "VK_EXT_pipeline_creation_feedback",
    "VK_EXT_private_data",
    "VK_EXT_shader_demote_to_helper_invocation",
    "VK_EXT_subgroup_size_control",
    "VK_EXT_texel_buffer_alignment",
    "VK_EXT_texture_compression_astc_hdr",
    "VK_EXT_tooling_info",
    "VK_EXT_ycbcr_2plane_444_formats",
];

/// 已经提升到 core-1.1 的 instance extension
const INSTANCE_EXTENSIONS_1_1: &[&str] = &[
    "VK_KHR_device_group_creation",
    "VK_KHR_external_fence_capabilities",
    "VK_KHR_external_memory_capabilities",
    "VK_KHR_external_semaphore_capabilities",
    "VK_KHR_get_physical_device_properties2",
];

// 版本
/// 去掉 variant 和 patch，只保留 major.minor，用于版本比较
#[inline]
pub fn api_version_major_minor(api_version: u32) -> u32 {
    vk::make_api_version(0, vk::api_version_major(api_version), vk::api_version_minor(api_version), 0)
}

#[inline]
pub fn format_api_version(api_version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(api_version),
        vk::api_version_minor(api_version),
        vk::api_version_patch(api_version)
    )
}

/// `api_version` 是否至少是 `required`，忽略 patch
#[inline]
pub fn api_version_supports(api_version: u32, required: u32) -> bool {
    api_version_major_minor(api_version) >= api_version_major_minor(required)
}

// core 扩展
/// device extension 被提升到的 core 版本
pub fn device_extension_promoted_version(name: &str) -> Option<u32> {
    if DEVICE_EXTENSIONS_1_1.contains(&name) {
        Some(vk::API_VERSION_1_1)
    } else if DEVICE_EXTENSIONS_1_2.contains(&name) {
        Some(vk::API_VERSION_1_2)
    } else if DEVICE_EXTENSIONS_1_3.contains(&name) {
        Some(vk::API_VERSION_1_3)
    } else {
        None
    }
}

pub fn is_core_device_extension(api_version: u32, name: &str) -> bool {
    device_extension_promoted_version(name).is_some_and(|core| api_version_supports(api_version, core))
}

pub fn is_core_instance_extension(api_version: u32, name: &str) -> bool {
    INSTANCE_EXTENSIONS_1_1.contains(&name) && api_version_supports(api_version, vk::API_VERSION_1_1)
}

/// core 中的或者 instance 列出的 extension
pub fn is_instance_extension_supported(api_version: u32, available: &[String], name: &str) -> bool {
    is_core_instance_extension(api_version, name) || available.iter().any(|e| e == name)
}

/// 所有 `api_version` 下属于 core 的 device extension
pub fn core_device_extensions(api_version: u32) -> Vec<&'static str> {
    [DEVICE_EXTENSIONS_1_1, DEVICE_EXTENSIONS_1_2, DEVICE_EXTENSIONS_1_3]
        .iter()
        .flat_map(|exts| exts.iter().copied())
        .filter(|name| is_core_device_extension(api_version, name))
        .collect_vec()
}

// 字符串
/// vulkan 中定长的 `char[N]` 转换为 String
pub fn c_chars_to_string(chars: &[c_char]) -> String {
    let bytes = chars.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect_vec();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// 写入定长的 `char[N]`，超长时截断并保留结尾的 0
pub fn string_to_c_chars<const N: usize>(value: &str, dst: &mut [c_char; N]) {
    dst.fill(0);
    for (d, b) in dst.iter_mut().zip(value.bytes().take(N.saturating_sub(1))) {
        *d = b as c_char;
    }
}

#[inline]
pub fn extension_name(props: &vk::ExtensionProperties) -> String {
    c_chars_to_string(&props.extension_name)
}

// 枚举
pub fn enumerate_instance_extension_names(vkp: &dyn PlatformInterface) -> VktResult<Vec<String>> {
    Ok(vkp.enumerate_instance_extension_properties()?.iter().map(extension_name).collect())
}

pub fn enumerate_instance_layer_names(vkp: &dyn PlatformInterface) -> VktResult<Vec<String>> {
    Ok(vkp.enumerate_instance_layer_properties()?.iter().map(|l| c_chars_to_string(&l.layer_name)).collect())
}

pub fn enumerate_device_extension_names(
    vki: &dyn InstanceInterface,
    pdevice: vk::PhysicalDevice,
) -> VktResult<Vec<String>> {
    Ok(vki.enumerate_device_extension_properties(pdevice)?.iter().map(extension_name).collect())
}

/// 第一个包含所有 `required` 且不包含任何 `excluded` 的 queue family
pub fn find_queue_family_index_with_caps(
    vki: &dyn InstanceInterface,
    pdevice: vk::PhysicalDevice,
    required: vk::QueueFlags,
    excluded: vk::QueueFlags,
) -> VktResult<u32> {
    let queue_family_props = vki.get_physical_device_queue_family_properties(pdevice);
    queue_family_props
        .iter()
        .position(|props| {
            props.queue_count > 0 && props.queue_flags.contains(required) && !props.queue_flags.intersects(excluded)
        })
        .map(|idx| idx as u32)
        .ok_or_else(|| {
            VktError::not_supported(format!(
                "no matching queue found: required {:?}, excluded {:?}",
                required, excluded
            ))
        })
}

/// 阻塞等待 fence，超时作为测试错误
pub fn wait_for_fence(vkd: &dyn DeviceInterface, fence: vk::Fence, timeout: Option<u64>) -> VktResult<()> {
    vkd.wait_for_fences(&[fence], true, timeout.unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_device_extension() {
        assert!(is_core_device_extension(vk::API_VERSION_1_2, "VK_KHR_timeline_semaphore"));
        assert!(!is_core_device_extension(vk::API_VERSION_1_1, "VK_KHR_timeline_semaphore"));
        assert!(is_core_device_extension(vk::make_api_version(0, 1, 3, 250), "VK_KHR_dynamic_rendering"));
        assert!(!is_core_device_extension(vk::API_VERSION_1_3, "VK_EXT_mesh_shader"));
    }

    #[test]
    fn test_instance_extension_supported() {
        let available = vec!["VK_EXT_debug_utils".to_string()];
        assert!(is_instance_extension_supported(vk::API_VERSION_1_0, &available, "VK_EXT_debug_utils"));
        assert!(is_instance_extension_supported(
            vk::API_VERSION_1_1,
            &available,
            "VK_KHR_get_physical_device_properties2"
        ));
        assert!(!is_instance_extension_supported(
            vk::API_VERSION_1_0,
            &available,
            "VK_KHR_get_physical_device_properties2"
        ));
    }

    #[test]
    fn test_c_chars_round_trip() {
        let mut chars = [0 as c_char; vk::MAX_EXTENSION_NAME_SIZE];
        string_to_c_chars("VK_KHR_swapchain", &mut chars);
        assert_eq!(c_chars_to_string(&chars), "VK_KHR_swapchain");

        let mut short = [0 as c_char; 4];
        string_to_c_chars("abcdef", &mut short);
        assert_eq!(c_chars_to_string(&short), "abc");
    }
}
