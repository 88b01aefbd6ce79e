mod common;

use ash::vk;
use common::{CapsCase, harness, harness_with};
use vkt_context::{
    app_params::ParamScope,
    command_line::CommandLine,
    test_case::{TestExecutor, TestStatus, TestVerdict},
};
use vkt_gfx::{
    error::VktError,
    mem_util::{Allocator, MemoryRequirement},
    mock::MockDriverConfig,
};

#[test]
fn test_default_device_enables_everything_supported() {
    let h = harness();
    let ctx = h.manager.default_context().unwrap();
    let recorded = h.state.borrow().last_device.clone().unwrap();

    assert!(!recorded.extensions.contains(&"VK_EXT_buffer_device_address".to_string()));
    assert!(recorded.extensions.contains(&"VK_KHR_buffer_device_address".to_string()));
    assert_eq!(recorded.extensions, ctx.device_extensions());

    assert_eq!(recorded.p_next_stypes[0], vk::StructureType::PHYSICAL_DEVICE_FEATURES_2);
    for s_type in [
        vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_1_FEATURES,
        vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES,
        vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
        vk::StructureType::PHYSICAL_DEVICE_ROBUSTNESS_2_FEATURES_EXT,
    ] {
        assert!(recorded.p_next_stypes.contains(&s_type), "{s_type:?} missing");
    }
    // 已经折叠进 blob 的结构体不会重复出现
    assert!(!recorded.p_next_stypes.contains(&vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES));

    let features = recorded.features2().unwrap();
    assert_eq!(features.robust_buffer_access, vk::FALSE);
    assert_eq!(features.geometry_shader, vk::TRUE);

    assert_eq!(recorded.queue_infos, vec![(0, vec![1.0])]);
    assert_eq!(ctx.universal_queue_family_index(), 0);
    assert_ne!(ctx.universal_queue(), vk::Queue::null());
}

#[test]
fn test_compute_only_default_queue() {
    let cmd = CommandLine {
        compute_only: true,
        ..Default::default()
    };
    let h = harness_with(MockDriverConfig::default(), cmd, 5);
    let ctx = h.manager.default_context().unwrap();
    // 第一个包含 compute 的 family
    assert_eq!(ctx.universal_queue_family_index(), 0);
}

#[test]
fn test_functionality_queries() {
    let h = harness();
    let ctx = h.manager.default_context().unwrap();

    assert!(ctx.is_device_functionality_supported("VK_KHR_timeline_semaphore"));
    assert!(ctx.is_device_functionality_supported("VK_EXT_robustness2"));
    assert!(!ctx.is_device_functionality_supported("VK_EXT_mesh_shader"));
    assert!(ctx.require_device_functionality("VK_EXT_mesh_shader").unwrap_err().is_not_supported());

    assert!(ctx.is_instance_functionality_supported("VK_KHR_get_physical_device_properties2"));
    assert!(!ctx.is_instance_functionality_supported("VK_KHR_surface"));
    assert!(ctx.require_instance_functionality("VK_KHR_surface").is_err());

    assert_eq!(ctx.device_properties().core_properties().vendor_id, 0x1234);
    assert!(ctx.device_features().contains("VkPhysicalDeviceVulkan12Features", false).unwrap());
    assert_eq!(ctx.memory_properties().memory_type_count, 5);
    assert!(ctx.application_parameters(ParamScope::Device).is_empty());
}

#[test]
fn test_default_allocator_works_on_context_device() {
    let h = harness();
    let ctx = h.manager.default_context().unwrap();

    let reqs = vk::MemoryRequirements {
        size: 4096,
        alignment: 256,
        memory_type_bits: !0,
    };
    let allocation = ctx.default_allocator().allocate_for(&reqs, MemoryRequirement::HOST_VISIBLE).unwrap();
    assert!(allocation.is_host_visible());
    assert!(allocation.host_ptr().is_ok());
}

#[test]
fn test_executor_verdicts() {
    let h = harness();
    let executor = TestExecutor::new(h.manager.clone());

    let pass = CapsCase::new("pass");
    assert_eq!(executor.execute(&pass), TestVerdict::Pass("ok".to_string()));
    assert_eq!(pass.seen_context.borrow().as_deref(), Some("default"));
    assert_eq!(h.resource_interface.current_test_path(), "pass");

    let iterated = CapsCase::new("iterated").with_statuses(vec![
        TestStatus::Incomplete,
        TestStatus::Incomplete,
        TestStatus::Fail("mismatch".to_string()),
    ]);
    assert_eq!(executor.execute(&iterated), TestVerdict::Fail("mismatch".to_string()));

    let mesh = CapsCase::new("mesh").with_support(|ctx| ctx.require_device_functionality("VK_EXT_mesh_shader"));
    assert!(matches!(executor.execute(&mesh), TestVerdict::NotSupported(_)));

    let custom = CapsCase::new("custom").with_caps("robustness", |caps| {
        caps.add_feature::<vk::PhysicalDeviceRobustness2FeaturesEXT>()?;
        Ok(())
    });
    assert!(executor.execute(&custom).is_pass());
    assert_eq!(custom.seen_context.borrow().as_deref(), Some("robustness"));

    let broken = CapsCase::new("broken").with_caps("broken", |_| Err(VktError::internal("bad caps")));
    assert_eq!(executor.execute(&broken), TestVerdict::InternalError("bad caps".to_string()));

    let warn = CapsCase::new("warn").with_statuses(vec![TestStatus::QualityWarning("slow".to_string())]);
    assert_eq!(executor.execute(&warn).code(), "QualityWarning");
}
