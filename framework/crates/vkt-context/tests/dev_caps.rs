mod common;

use ash::vk;
use common::{CapsCase, harness};
use itertools::Itertools;
use vkt_context::dev_caps::{DevCaps, FeatureStatus, QueueCreateInfo};
use vkt_gfx::{error::VktError, mock::RecordedDevice};

fn build(h: &common::Harness, case: &CapsCase) -> RecordedDevice {
    let mut def = None;
    h.manager.find_context(case, &mut def).unwrap();
    h.state.borrow().last_device.clone().unwrap()
}

#[test]
fn test_unavailable_extension_is_not_requested() {
    let h = harness();
    let case = CapsCase::new("robustness").with_caps("robustness", |caps| {
        assert!(!caps.add_extension("VK_EXT_mesh_shader", true));
        assert!(caps.has_inherited_extensions());
        assert!(caps.add_extension("VK_EXT_robustness2", true));
        assert!(!caps.has_inherited_extensions());
        // 已经进入 1.2 core
        assert!(caps.add_extension("VK_KHR_timeline_semaphore", true));
        Ok(())
    });

    let recorded = build(&h, &case);
    assert_eq!(recorded.extensions, vec!["VK_EXT_robustness2"]);
}

#[test]
fn test_inherited_extensions_enable_everything() {
    let h = harness();
    let case = CapsCase::new("inherit").with_caps("inherit", |_| Ok(()));

    let recorded = build(&h, &case);
    assert_eq!(recorded.extensions.len(), h.platform.config().device_extensions.len());
    assert!(recorded.extensions.contains(&"VK_EXT_buffer_device_address".to_string()));
}

#[test]
fn test_blob_and_folded_struct_conflict() {
    let h = harness();

    let mut caps = DevCaps::new("conflict", &h.manager);
    caps.add_feature_with::<vk::PhysicalDeviceTimelineSemaphoreFeatures>(|f| f.timeline_semaphore = vk::TRUE)
        .unwrap();
    assert_eq!(
        caps.feature_status(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES, false).unwrap(),
        FeatureStatus::FeatureInBlob
    );
    let err = caps.add_feature::<vk::PhysicalDeviceVulkan12Features>().err().unwrap();
    assert_eq!(err, VktError::NotSupported("FeatureInBlob".to_string()));

    let mut caps = DevCaps::new("conflict", &h.manager);
    caps.add_feature::<vk::PhysicalDeviceVulkan12Features>().unwrap();
    let err = caps
        .add_feature_with::<vk::PhysicalDeviceVulkanMemoryModelFeatures>(|f| f.vulkan_memory_model = vk::TRUE)
        .unwrap_err();
    assert_eq!(err, VktError::NotSupported("BlobInFeatures".to_string()));

    // 1.1 的结构体与 1.2 blob 无关
    caps.add_feature::<vk::PhysicalDeviceMultiviewFeatures>().unwrap();
}

#[test]
fn test_unique_feature_rejects_duplicates() {
    let h = harness();
    let mut caps = DevCaps::new("unique", &h.manager);

    let value = vk::PhysicalDeviceRobustness2FeaturesEXT::default().null_descriptor(true);
    caps.add_unique_feature(value).unwrap();
    let err = caps.add_unique_feature(value).unwrap_err();
    assert_eq!(err.message(), "AlreadyExists");

    // 覆盖已有的值不是冲突
    caps.add_feature_value(vk::PhysicalDeviceRobustness2FeaturesEXT::default().robust_image_access2(true))
        .unwrap();
    let stored = caps.get_feature::<vk::PhysicalDeviceRobustness2FeaturesEXT>().unwrap();
    assert_eq!(stored.robust_image_access2, vk::TRUE);
    assert_eq!(stored.null_descriptor, vk::FALSE);

    assert!(caps.remove_feature::<vk::PhysicalDeviceRobustness2FeaturesEXT>());
    assert!(!caps.has_feature::<vk::PhysicalDeviceRobustness2FeaturesEXT>());
}

#[test]
fn test_feature_info_and_runtime_api_check() {
    let h = harness();
    let mut caps = DevCaps::new("info", &h.manager);
    caps.add_feature::<vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT>().unwrap();
    caps.add_feature::<vk::PhysicalDeviceTimelineSemaphoreFeatures>().unwrap();

    let info = caps.feature_info(vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES).unwrap();
    assert_eq!(info.index, 1);
    assert_eq!(info.desc.name, "VkPhysicalDeviceTimelineSemaphoreFeatures");
    assert!(caps.feature_info(vk::StructureType::PHYSICAL_DEVICE_MESH_SHADER_FEATURES_EXT).is_none());

    // 1.2 的结构体在 1.3 的运行时上重复加入
    assert_eq!(
        caps.feature_status(vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES, true).unwrap(),
        FeatureStatus::WrongApiVersion
    );
    assert_eq!(
        caps.feature_status(vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES, false).unwrap(),
        FeatureStatus::AlreadyExists
    );
}

#[test]
fn test_add_feature_if_supported() {
    let h = harness();
    let mut caps = DevCaps::new("conditional", &h.manager);

    let added = caps
        .add_feature_if_supported::<vk::PhysicalDeviceRobustness2FeaturesEXT>(
            |f| f.null_descriptor,
            |f| f.null_descriptor = vk::TRUE,
        )
        .unwrap();
    assert!(added);

    let added = caps
        .add_feature_if_supported::<vk::PhysicalDeviceRobustness2FeaturesEXT>(
            |f| f.robust_buffer_access2,
            |f| f.robust_buffer_access2 = vk::TRUE,
        )
        .unwrap();
    assert!(!added);

    let added = caps
        .add_feature_if_supported::<vk::PhysicalDeviceMeshShaderFeaturesEXT>(
            |f| f.mesh_shader,
            |f| f.mesh_shader = vk::TRUE,
        )
        .unwrap();
    assert!(!added);
    assert_eq!(caps.features().len(), 1);
}

#[test]
fn test_chain_has_distinct_stypes_behind_features2() {
    let h = harness();
    let case = CapsCase::new("chain").with_caps("chain", |caps| {
        caps.add_feature::<vk::PhysicalDeviceTimelineSemaphoreFeatures>()?;
        caps.add_feature::<vk::PhysicalDeviceRobustness2FeaturesEXT>()?;
        caps.add_feature::<vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT>()?;
        Ok(())
    });

    let recorded = build(&h, &case);
    assert_eq!(
        recorded.p_next_stypes,
        vec![
            vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
            vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES,
            vk::StructureType::PHYSICAL_DEVICE_ROBUSTNESS_2_FEATURES_EXT,
            vk::StructureType::PHYSICAL_DEVICE_EXTENDED_DYNAMIC_STATE_FEATURES_EXT,
        ]
    );
    assert_eq!(recorded.p_next_stypes.iter().unique().count(), recorded.p_next_stypes.len());
    assert!(recorded.enabled_features.is_none());
    assert_eq!(
        recorded.feature::<vk::PhysicalDeviceTimelineSemaphoreFeatures>().unwrap().timeline_semaphore,
        vk::TRUE
    );
}

#[test]
fn test_features10_is_merged_into_features2() {
    let h = harness();
    let case = CapsCase::new("merge").with_caps("merge", |caps| {
        caps.add_feature_with::<vk::PhysicalDeviceFeatures>(|f| f.geometry_shader = 7)?;
        caps.add_feature_with::<vk::PhysicalDeviceFeatures2>(|f| f.features.sampler_anisotropy = vk::TRUE)?;
        Ok(())
    });

    let recorded = build(&h, &case);
    assert_eq!(recorded.p_next_stypes, vec![vk::StructureType::PHYSICAL_DEVICE_FEATURES_2]);

    let features = recorded.features2().unwrap();
    assert_eq!(features.geometry_shader, vk::TRUE);
    assert_eq!(features.sampler_anisotropy, vk::TRUE);
    assert_eq!(features.tessellation_shader, vk::FALSE);
    assert_eq!(features.robust_buffer_access, vk::FALSE);
}

#[test]
fn test_queue_requests_follow_caps() {
    let h = harness();
    let case = CapsCase::new("queues")
        .with_caps("queues", |caps| {
            caps.reset_queues(&[
                QueueCreateInfo {
                    required: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                    excluded: vk::QueueFlags::empty(),
                    count: 2,
                    priority: 1.0,
                },
                QueueCreateInfo {
                    required: vk::QueueFlags::COMPUTE,
                    excluded: vk::QueueFlags::GRAPHICS,
                    count: 2,
                    priority: 0.5,
                },
                QueueCreateInfo {
                    required: vk::QueueFlags::TRANSFER,
                    excluded: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                    count: 1,
                    priority: 0.25,
                },
            ]);
            Ok(())
        });

    let mut def = None;
    let ctx = h.manager.find_context(&case, &mut def).unwrap();
    let recorded = h.state.borrow().last_device.clone().unwrap();

    assert_eq!(
        recorded.queue_infos,
        vec![(0, vec![1.0, 1.0]), (1, vec![0.5, 0.5]), (2, vec![0.25])]
    );
    assert_eq!(recorded.queue_infos.iter().map(|(_, p)| p.len()).sum::<usize>(), 5);

    assert_eq!(ctx.queue_count(), 5);
    assert_eq!(ctx.universal_queue_family_index(), 0);
    assert_eq!(ctx.queue(3).unwrap().family_index, 1);
    assert_eq!(ctx.queue(4).unwrap().family_index, 2);
    assert!(matches!(ctx.queue(5), Err(VktError::Internal(_))));
}

#[test]
fn test_missing_queue_family_is_not_supported() {
    let h = harness();
    let case = CapsCase::new("sparse").with_caps("sparse", |caps| {
        caps.reset_queues(&[QueueCreateInfo {
            required: vk::QueueFlags::SPARSE_BINDING,
            excluded: vk::QueueFlags::empty(),
            count: 1,
            priority: 1.0,
        }]);
        Ok(())
    });

    let mut def = None;
    assert!(h.manager.find_context(&case, &mut def).err().expect("expected find_context to fail").is_not_supported());
}

#[test]
fn test_reset_restores_defaults() {
    let h = harness();
    let mut caps = DevCaps::new("reset", &h.manager);
    caps.add_extension("VK_EXT_robustness2", true);
    caps.add_feature::<vk::PhysicalDeviceRobustness2FeaturesEXT>().unwrap();
    caps.reset_queues(&[]);

    caps.reset();
    assert!(caps.has_inherited_extensions());
    assert!(caps.features().is_empty());
    assert_eq!(caps.queue_create_infos().len(), 1);
    assert_eq!(caps.queue_create_infos()[0].required, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE);
}
