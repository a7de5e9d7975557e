//! GLSL to SPIR-V compiler backends.

use crate::error::{Result, ToolError};
use crate::scan::ShaderSource;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Environment variable overriding the `glslc` executable.
pub const GLSLC_ENV: &str = "KEEL_GLSLC";

/// Compiles one shader source file into a SPIR-V binary on disk.
pub trait ShaderCompiler {
    /// Compile `source` and write the binary to `output`.
    ///
    /// `include_dir` is searched for `#include` directives.
    fn compile(&self, source: &ShaderSource, output: &Path, include_dir: &Path) -> Result<()>;
}

/// Runs the external `glslc` executable.
#[derive(Debug, Clone)]
pub struct Glslc {
    program: PathBuf,
}

impl Default for Glslc {
    fn default() -> Self {
        Self::new("glslc")
    }
}

impl Glslc {
    /// Use the given executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `$KEEL_GLSLC` if set, otherwise `glslc` from `PATH`.
    pub fn from_env() -> Self {
        std::env::var_os(GLSLC_ENV).map_or_else(Self::default, Self::new)
    }

    /// The executable this backend launches.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ShaderCompiler for Glslc {
    fn compile(&self, source: &ShaderSource, output: &Path, include_dir: &Path) -> Result<()> {
        let result = Command::new(&self.program)
            .arg(&source.path)
            .arg("-o")
            .arg(output)
            .arg("-I")
            .arg(include_dir)
            .output()
            .map_err(|source| ToolError::CompilerSpawn {
                program: self.program.clone(),
                source,
            })?;

        for line in String::from_utf8_lossy(&result.stderr).lines() {
            tracing::warn!("glslc: {line}");
        }
        for line in String::from_utf8_lossy(&result.stdout).lines() {
            tracing::debug!("glslc: {line}");
        }

        if !result.status.success() {
            // Killed by a signal has no code.
            let status = result.status.code().unwrap_or(-1);
            return Err(ToolError::CompilerFailed {
                shader: source.file_name.clone(),
                status,
            });
        }

        Ok(())
    }
}

#[cfg(feature = "shaderc")]
pub use self::in_process::ShadercCompiler;

#[cfg(feature = "shaderc")]
mod in_process {
    use super::{Path, Result, ShaderCompiler, ShaderSource, ToolError};
    use crate::scan::ShaderStage;
    use shaderc::{CompileOptions, Compiler, ResolvedInclude, ShaderKind};

    /// Compiles through libshaderc without spawning a process.
    pub struct ShadercCompiler {
        compiler: Compiler,
    }

    impl ShadercCompiler {
        /// Create the in-process compiler.
        pub fn new() -> Result<Self> {
            let compiler = Compiler::new().ok_or_else(|| ToolError::CompilerSpawn {
                program: "libshaderc".into(),
                source: std::io::Error::other("failed to create shaderc compiler"),
            })?;
            Ok(Self { compiler })
        }
    }

    impl ShaderCompiler for ShadercCompiler {
        fn compile(&self, source: &ShaderSource, output: &Path, include_dir: &Path) -> Result<()> {
            let text = std::fs::read_to_string(&source.path)
                .map_err(|e| ToolError::io(&source.path, e))?;

            let kind = match source.stage {
                ShaderStage::Vertex => ShaderKind::Vertex,
                ShaderStage::Fragment => ShaderKind::Fragment,
            };

            let failed = |status| ToolError::CompilerFailed {
                shader: source.file_name.clone(),
                status,
            };

            let mut options = CompileOptions::new().ok_or_else(|| failed(-1))?;
            options.set_target_env(
                shaderc::TargetEnv::Vulkan,
                shaderc::EnvVersion::Vulkan1_3 as u32,
            );
            let include_dir = include_dir.to_path_buf();
            options.set_include_callback(move |name, _kind, _from, _depth| {
                let path = include_dir.join(name);
                std::fs::read_to_string(&path)
                    .map(|content| ResolvedInclude {
                        resolved_name: path.display().to_string(),
                        content,
                    })
                    .map_err(|e| format!("{}: {e}", path.display()))
            });

            let artifact = self
                .compiler
                .compile_into_spirv(&text, kind, &source.file_name, "main", Some(&options))
                .map_err(|e| {
                    tracing::error!("shaderc: {e}");
                    failed(1)
                })?;

            if artifact.get_num_warnings() > 0 {
                tracing::warn!("shaderc: {}", artifact.get_warning_messages());
            }

            std::fs::write(output, artifact.as_binary_u8()).map_err(|e| ToolError::io(output, e))
        }
    }
}
