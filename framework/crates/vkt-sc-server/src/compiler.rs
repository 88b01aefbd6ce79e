//! 调用 glslc 把 GLSL 编译为 SPIR-V

use std::{
    io::Write,
    process::{Command, Stdio},
};

use itertools::Itertools;
use vkt_gfx::{
    error::{VktError, VktResult},
    resource_interface::ProgramCompiler,
};

pub struct GlslcCompiler {
    executable: String,
    target_env: String,
}

impl Default for GlslcCompiler {
    fn default() -> Self {
        Self {
            executable: "glslc".to_string(),
            target_env: "vulkan1.2".to_string(),
        }
    }
}

impl GlslcCompiler {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Default::default()
        }
    }

    /// glslc 的参数，源码从 stdin 读入，SPIR-V 写到 stdout
    fn args(&self, source_type: &str, build_options: &str) -> Vec<String> {
        [
            format!("-fshader-stage={source_type}"),
            format!("--target-env={}", self.target_env),
        ]
        .into_iter()
        .chain(build_options.split_whitespace().map(str::to_string))
        .chain(["-".to_string(), "-o".to_string(), "-".to_string()])
        .collect_vec()
    }
}

impl ProgramCompiler for GlslcCompiler {
    fn compile(&self, source: &str, source_type: &str, build_options: &str) -> VktResult<Vec<u8>> {
        let mut child = Command::new(&self.executable)
            .args(self.args(source_type, build_options))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VktError::not_supported(format!("failed to start {}: {e}", self.executable)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(source.as_bytes())
                .map_err(|e| VktError::Resource(format!("failed to write shader source: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| VktError::Resource(format!("failed to wait for {}: {e}", self.executable)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::error!("{} failed:\n{stderr}", self.executable);
            return Err(VktError::test_failed(format!("shader compilation failed: {stderr}")));
        }
        if output.stdout.is_empty() || output.stdout.len() % 4 != 0 {
            return Err(VktError::internal(format!("{} produced {} bytes of SPIR-V", self.executable, output.stdout.len())));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let compiler = GlslcCompiler::default();
        assert_eq!(
            compiler.args("comp", " -O  -DLOCAL_SIZE=64 "),
            vec!["-fshader-stage=comp", "--target-env=vulkan1.2", "-O", "-DLOCAL_SIZE=64", "-", "-o", "-"]
        );
    }

    #[test]
    fn test_missing_executable_is_not_supported() {
        let compiler = GlslcCompiler::new("/nonexistent/vkt/glslc");
        let err = compiler.compile("void main() {}", "comp", "").unwrap_err();
        assert!(err.is_not_supported());
    }
}
