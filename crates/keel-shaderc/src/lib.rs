//! Offline shader pipeline for the Keel renderer.
//!
//! Discovers GLSL sources, compiles them to SPIR-V, and serializes each
//! binary into a source-embeddable byte array. All generated files are
//! aggregated into one include surface.
//!
//! This crate provides:
//! - Source discovery (`*.vert`, `*.frag`)
//! - Compiler backends (`glslc`, optionally libshaderc)
//! - Deterministic hex encoding and naming
//! - C++ header and Rust module emitters

pub mod compiler;
pub mod emit;
pub mod encode;
pub mod error;
pub mod scan;

pub use compiler::{Glslc, ShaderCompiler, GLSLC_ENV};
#[cfg(feature = "shaderc")]
pub use compiler::ShadercCompiler;
pub use emit::HeaderFlavor;
pub use error::{Result, ToolError};
pub use scan::{check_unique_names, scan_shaders, ShaderSource, ShaderStage};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Tool configuration.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Directory scanned recursively for shader sources.
    pub src_dir: PathBuf,
    /// Output directory; removed and recreated on every run.
    pub out_dir: PathBuf,
    /// Output language.
    pub flavor: HeaderFlavor,
}

impl ToolConfig {
    /// Create a config producing C++ headers.
    pub fn new(src_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            src_dir: src_dir.into(),
            out_dir: out_dir.into(),
            flavor: HeaderFlavor::C,
        }
    }

    /// Set the output flavor.
    pub fn with_flavor(mut self, flavor: HeaderFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Path of the aggregate include file.
    pub fn aggregate_path(&self) -> PathBuf {
        self.out_dir.join(self.flavor.aggregate_file_name())
    }
}

/// A generated artifact.
#[derive(Debug, Clone)]
pub struct GeneratedShader {
    /// Source file name, e.g. `simple.vert`.
    pub file_name: String,
    /// Compiled SPIR-V path.
    pub spirv_path: PathBuf,
    /// Generated header or module path.
    pub artifact_path: PathBuf,
    /// Size of the SPIR-V binary in bytes.
    pub len: usize,
}

/// Result of a full run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Artifacts in scan order.
    pub shaders: Vec<GeneratedShader>,
    /// Aggregate include file.
    pub aggregate_path: PathBuf,
}

/// Remove `out_dir` if present and create it empty.
pub fn prepare_out_dir(out_dir: &Path) -> Result<()> {
    if out_dir.exists() {
        tracing::info!("Removing existing target directory '{}'", out_dir.display());
        fs::remove_dir_all(out_dir).map_err(|e| ToolError::io(out_dir, e))?;
    }

    tracing::info!("Creating target directory '{}'", out_dir.display());
    fs::create_dir_all(out_dir).map_err(|e| ToolError::io(out_dir, e))
}

/// Compile and embed one shader.
pub fn generate_shader(
    config: &ToolConfig,
    compiler: &dyn ShaderCompiler,
    source: &ShaderSource,
    timestamp: &str,
) -> Result<GeneratedShader> {
    tracing::info!("Compiling '{}'", source.file_name);

    let spirv_path = config.out_dir.join(format!("{}.spv", source.file_name));
    compiler.compile(source, &spirv_path, &config.src_dir)?;
    tracing::info!("Wrote SPV '{}'", spirv_path.display());

    let spirv = fs::read(&spirv_path).map_err(|e| ToolError::io(&spirv_path, e))?;

    let artifact_path = config
        .out_dir
        .join(config.flavor.artifact_file_name(&source.file_name));
    let contents = emit::render_shader(config.flavor, &source.file_name, &spirv, timestamp);
    fs::write(&artifact_path, contents).map_err(|e| ToolError::io(&artifact_path, e))?;
    tracing::info!("Wrote header '{}'", artifact_path.display());

    Ok(GeneratedShader {
        file_name: source.file_name.clone(),
        spirv_path,
        artifact_path,
        len: spirv.len(),
    })
}

/// Run the whole pipeline: clear output, scan, compile, emit, aggregate.
///
/// Stops at the first failure and leaves any partial output in place;
/// the next run clears it.
pub fn run(config: &ToolConfig, compiler: &dyn ShaderCompiler) -> Result<RunSummary> {
    prepare_out_dir(&config.out_dir)?;
    let sources = scan_shaders(&config.src_dir)?;
    let timestamp = encode::format_timestamp(SystemTime::now());

    let mut shaders = Vec::with_capacity(sources.len());
    for source in &sources {
        shaders.push(generate_shader(config, compiler, source, &timestamp)?);
    }

    let includes: Vec<String> = shaders
        .iter()
        .map(|s| config.flavor.artifact_file_name(&s.file_name))
        .collect();
    let aggregate_path = config.aggregate_path();
    let aggregate = emit::render_aggregate(config.flavor, &includes, &timestamp);
    fs::write(&aggregate_path, aggregate).map_err(|e| ToolError::io(&aggregate_path, e))?;
    tracing::info!("Wrote single include '{}'", aggregate_path.display());

    Ok(RunSummary {
        shaders,
        aggregate_path,
    })
}
