use std::rc::Rc;

use anyhow::Context as _;
use clap::Parser;
use vkt_context::{
    command_line::{CommandLine, Validation},
    context_manager::ContextManager,
    inst_caps::InstCaps,
};
use vkt_gfx::{driver::AshPlatform, interface::PlatformInterface, resource_interface::ResourceInterface};
use vkt_sc_server::{cache_builder::LocalCacheBuilder, compiler::GlslcCompiler, server::Server};

/// Vulkan SC 的 pipeline cache 构建服务
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct ServerArgs {
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:59333")]
    address: String,

    /// 1-based physical device 序号
    #[arg(long = "deqp-vk-device-id", default_value_t = 1)]
    device_id: u32,

    #[arg(long = "deqp-validation", value_enum, default_value_t = Validation::Disable)]
    validation: Validation,

    /// 用于 CompileShader 请求的 glslc
    #[arg(long, default_value = "glslc")]
    glslc: String,
}

fn main() -> anyhow::Result<()> {
    vkt_crate_tools::init_log::init_log();
    let args = ServerArgs::parse();

    let command_line = CommandLine {
        device_id: args.device_id,
        validation: args.validation,
        ..Default::default()
    };
    let platform: Rc<dyn PlatformInterface> = Rc::new(AshPlatform::load()?);
    let inst_caps = InstCaps::new(platform.as_ref(), &command_line, InstCaps::DEF_INST_ID)?;
    let manager = ContextManager::create(
        platform,
        Rc::new(command_line),
        Rc::new(ResourceInterface::new()),
        1,
        inst_caps,
    )
    .context("failed to create the context manager")?;

    // context 持有 device，必须比 server 活得久
    let context = manager.default_context().context("failed to create the default device")?;
    let properties = context.device_properties().core_properties();
    log::info!(
        "building pipeline caches on {:?}",
        properties.device_name_as_c_str().unwrap_or(c"unknown device")
    );

    let builder = LocalCacheBuilder::new(context.device_interface().clone());
    let server = Server::bind(&args.address, builder)?.with_compiler(Box::new(GlslcCompiler::new(args.glslc)));
    server.run()?;
    Ok(())
}
