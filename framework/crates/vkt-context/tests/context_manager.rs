mod common;

use std::rc::Rc;

use ash::vk;
use common::{CapsCase, harness, harness_with};
use vkt_context::{
    command_line::CommandLine, context_manager::ContextManager, dev_caps::DevCaps, inst_caps::InstCaps,
};
use vkt_gfx::{
    error::VktError,
    mock::{MockDriverConfig, MockPlatform},
    resource_interface::ResourceInterface,
};

fn timeline_case(name: &str, id: &str) -> CapsCase {
    CapsCase::new(name).with_caps(id, |caps| {
        caps.add_feature::<vk::PhysicalDeviceTimelineSemaphoreFeatures>()?;
        Ok(())
    })
}

#[test]
fn test_default_context_is_created_once() {
    let h = harness();

    let a = h.manager.default_context().unwrap();
    let b = h.manager.default_context().unwrap();
    assert!(Rc::ptr_eq(&a, &b));
    assert!(a.is_default_context());
    assert_eq!(h.state.borrow().devices_created, 1);
    assert_eq!(h.manager.context_count(), 1);
}

#[test]
fn test_default_context_survives_eviction() {
    let h = harness_with(MockDriverConfig::default(), CommandLine::default(), 2);
    let default_device = h.manager.default_context().unwrap().device();

    for i in 0..5 {
        let case = timeline_case(&format!("case.{i}"), &format!("timeline.{i}"));
        let mut def = None;
        let ctx = h.manager.find_context(&case, &mut def).unwrap();
        assert_eq!(ctx.caps_id(), format!("timeline.{i}"));
        assert_eq!(def.unwrap().device(), default_device);
    }

    // default + 最多 2 个自定义 device
    assert_eq!(h.manager.context_count(), 3);
    assert_eq!(h.manager.context_ids(), vec!["default", "timeline.3", "timeline.4"]);
    assert_eq!(h.manager.default_context().unwrap().device(), default_device);

    let state = h.state.borrow();
    assert_eq!(state.devices_created, 6);
    assert_eq!(state.devices_destroyed, 3);
}

#[test]
fn test_same_caps_id_reuses_the_device() {
    let h = harness();
    let case = timeline_case("timeline.a", "timeline");

    let mut def = None;
    let first = h.manager.find_context(&case, &mut def).unwrap();
    let second = h.manager.find_context(&case, &mut def).unwrap();

    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(h.state.borrow().devices_created, 2);
    // 第一次在 default context 上检查，第二次在缓存的 context 上检查
    assert_eq!(case.check_support_calls.get(), 2);
    assert_eq!(case.init_dev_calls.get(), 1);
}

#[test]
fn test_enforce_default_context_falls_back() {
    let h = harness();
    let case = CapsCase::new("plain").with_caps_id("never-built");

    let mut def = None;
    let ctx = h.manager.find_context(&case, &mut def).unwrap();

    assert!(ctx.is_default_context());
    assert_eq!(case.init_dev_calls.get(), 1);
    assert_eq!(h.manager.context_count(), 1);
    assert_eq!(h.state.borrow().devices_created, 1);
}

#[test]
fn test_unsupported_case_still_reports_default_context() {
    let h = harness();
    let case = timeline_case("mesh", "mesh")
        .with_support(|ctx| ctx.require_device_functionality("VK_EXT_mesh_shader"));

    let mut def = None;
    let err = h.manager.find_context(&case, &mut def).err().expect("expected find_context to fail");

    assert!(err.is_not_supported());
    assert!(def.is_some_and(|ctx| ctx.is_default_context()));
    assert_eq!(case.init_dev_calls.get(), 0);
}

#[test]
fn test_caps_errors_propagate() {
    let h = harness();
    let case = CapsCase::new("mesh").with_caps("mesh", |caps| {
        caps.add_feature::<vk::PhysicalDeviceMeshShaderFeaturesEXT>()?;
        Ok(())
    });

    let mut def = None;
    let err = h.manager.find_context(&case, &mut def).err().expect("expected find_context to fail");
    assert!(err.is_not_supported());
    assert_eq!(h.manager.context_count(), 1);
}

#[test]
fn test_custom_instance_managers_are_bounded() {
    let h = harness_with(MockDriverConfig::default(), CommandLine::default(), 2);

    let surface = CapsCase::new("surface").with_instance("surface", |caps| {
        assert!(caps.add_extension("VK_KHR_surface"));
        Ok(())
    });
    let manager = h.manager.find_custom_manager(&surface).unwrap();
    assert_eq!(manager.id(), "surface");
    assert!(h.state.borrow().last_instance_extensions.contains(&"VK_KHR_surface".to_string()));

    let again = h.manager.find_custom_manager(&surface).unwrap();
    assert!(Rc::ptr_eq(&manager, &again));

    for id in ["a", "b", "c"] {
        let case = CapsCase::new(id).with_instance(id, |_| Ok(()));
        h.manager.find_custom_manager(&case).unwrap();
    }
    // 超过上限之后才淘汰最早的 manager
    assert_eq!(h.manager.custom_manager_count(), 3);
    assert_eq!(h.state.borrow().instances_created, 5);
    let again = h.manager.find_custom_manager(&surface).unwrap();
    assert!(!Rc::ptr_eq(&manager, &again));
    assert_eq!(h.state.borrow().instances_created, 6);

    let default_case = CapsCase::new("default");
    let same = h.manager.find_custom_manager(&default_case).unwrap();
    assert!(Rc::ptr_eq(&same, &h.manager));
}

#[test]
fn test_instance_is_destroyed_after_devices() {
    let h = harness();
    let case = timeline_case("timeline", "timeline");
    let mut def = None;
    let ctx = h.manager.find_context(&case, &mut def).unwrap();

    let state = h.state.clone();
    drop(h);
    drop(def);
    {
        let state = state.borrow();
        // context 仍然持有 instance
        assert_eq!(state.devices_destroyed, 1);
        assert_eq!(state.instances_destroyed, 0);
    }

    drop(ctx);
    let state = state.borrow();
    assert_eq!(state.devices_destroyed, 2);
    assert_eq!(state.instances_destroyed, 1);
}

#[test]
fn test_zero_custom_devices_is_rejected() {
    let platform = Rc::new(MockPlatform::new(MockDriverConfig::default()));
    let cmd = CommandLine::default();
    let inst_caps = InstCaps::new(platform.as_ref(), &cmd, InstCaps::DEF_INST_ID).unwrap();

    let err = ContextManager::create(platform, Rc::new(cmd), Rc::new(ResourceInterface::new()), 0, inst_caps)
        .err()
        .unwrap();
    assert!(matches!(err, VktError::Internal(_)));
}

#[test]
fn test_invalid_device_id_is_rejected() {
    let platform = Rc::new(MockPlatform::new(MockDriverConfig::default()));
    let cmd = CommandLine {
        device_id: 2,
        ..Default::default()
    };
    let inst_caps = InstCaps::new(platform.as_ref(), &cmd, InstCaps::DEF_INST_ID).unwrap();

    let err = ContextManager::create(platform, Rc::new(cmd), Rc::new(ResourceInterface::new()), 5, inst_caps)
        .err()
        .unwrap();
    assert!(matches!(err, VktError::Internal(_)));
}

#[test]
fn test_used_api_version_is_the_lower_one() {
    let h = harness_with(
        MockDriverConfig {
            device_api_version: vk::API_VERSION_1_1,
            ..Default::default()
        },
        CommandLine::default(),
        5,
    );
    assert_eq!(h.manager.used_api_version(), vk::API_VERSION_1_1);

    let ctx = h.manager.default_context().unwrap();
    assert!(ctx.context_supports(vk::API_VERSION_1_1));
    assert!(!ctx.context_supports(vk::API_VERSION_1_2));
    assert_eq!(DevCaps::new("x", &h.manager).used_api_version(), vk::API_VERSION_1_1);
}

#[test]
fn test_enforce_default_from_check_support() {
    let h = harness();
    let case = timeline_case("timeline", "timeline").with_support(|_| Err(VktError::EnforceDefaultContext));

    let mut def = None;
    let ctx = h.manager.find_context(&case, &mut def).unwrap();
    assert!(ctx.is_default_context());
    assert!(Rc::ptr_eq(&ctx, def.as_ref().unwrap()));
    assert_eq!(case.init_dev_calls.get(), 0);
    assert_eq!(h.manager.context_count(), 1);
}

#[test]
fn test_enforce_default_from_delayed_init() {
    let h = harness();
    let case = timeline_case("timeline", "timeline").with_delayed_init(|| Err(VktError::EnforceDefaultContext));

    let mut def = None;
    let ctx = h.manager.find_context(&case, &mut def).unwrap();
    assert_eq!(ctx.caps_id(), DevCaps::DEF_DEV_ID);
    assert_eq!(case.check_support_calls.get(), 0);
    assert_eq!(h.state.borrow().devices_created, 1);
}

#[test]
fn test_enforce_default_on_cached_context_returns_it() {
    let h = harness();
    let first = timeline_case("first", "timeline");
    let mut def = None;
    let created = h.manager.find_context(&first, &mut def).unwrap();

    // 命中缓存之后再退回，得到的是正在检查的 context
    let second = timeline_case("second", "timeline").with_support(|_| Err(VktError::EnforceDefaultContext));
    let mut def = None;
    let ctx = h.manager.find_context(&second, &mut def).unwrap();
    assert!(Rc::ptr_eq(&ctx, &created));
    assert!(Rc::ptr_eq(def.as_ref().unwrap(), &created));
    assert_eq!(h.state.borrow().devices_created, 2);
}
