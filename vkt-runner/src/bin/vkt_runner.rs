use std::{path::Path, rc::Rc};

use anyhow::Context as _;
use vkt_context::command_line::CommandLine;
use vkt_gfx::driver::AshPlatform;
use vkt_runner::{cases::builtin_cases, runner::Runner};

fn main() -> anyhow::Result<()> {
    let command_line = CommandLine::from_args(std::env::args_os()).unwrap_or_else(|e| e.exit());
    vkt_crate_tools::init_log::init_log();

    let log_filename = command_line.log_filename.clone();
    let platform = Rc::new(AshPlatform::load().context("vulkan loader is not available")?);
    let runner = Runner::new(platform, command_line).context("failed to initialize the test runner")?;
    let summary = runner.run(&builtin_cases())?;

    for (name, verdict) in summary.results() {
        println!("{name}: {verdict}");
    }
    let counts = summary.counts().into_iter().map(|(code, n)| format!("{code}: {n}")).collect::<Vec<_>>();
    println!("{} cases, {}", summary.results().len(), counts.join(", "));

    summary.write_log(Path::new(&log_filename))?;
    if summary.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}
