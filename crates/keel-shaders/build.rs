//! Build script compiling the GLSL shaders into embedded SPIR-V arrays.

use keel_shaderc::{
    emit, encode, prepare_out_dir, run, scan_shaders, Glslc, HeaderFlavor, ToolConfig, ToolError,
    GLSLC_ENV,
};
use anyhow::Context;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

fn main() -> anyhow::Result<()> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR is not set")?);
    let config = ToolConfig::new("shaders", out_dir).with_flavor(HeaderFlavor::Rust);

    // Rerun if shaders change
    println!("cargo:rerun-if-changed=shaders/");
    println!("cargo:rerun-if-env-changed={GLSLC_ENV}");

    match run(&config, &Glslc::from_env()) {
        Ok(summary) => {
            for shader in &summary.shaders {
                println!("Compiled {} ({} bytes)", shader.file_name, shader.len);
            }
        }
        Err(ToolError::CompilerSpawn { program, source }) => {
            println!(
                "cargo:warning=Shader compiler '{}' unavailable ({source}); embedding empty shaders",
                program.display()
            );
            write_placeholders(&config).context("Failed to write placeholder shaders")?;
        }
        Err(e) => return Err(e).context("Failed to compile shaders"),
    }

    Ok(())
}

/// Emit zero-length arrays so the crate still builds without a compiler.
fn write_placeholders(config: &ToolConfig) -> keel_shaderc::Result<()> {
    prepare_out_dir(&config.out_dir)?;
    let timestamp = encode::format_timestamp(SystemTime::now());

    let mut includes = Vec::new();
    for source in scan_shaders(&config.src_dir)? {
        let file = config.flavor.artifact_file_name(&source.file_name);
        let path = config.out_dir.join(&file);
        let contents = emit::render_shader(config.flavor, &source.file_name, &[], &timestamp);
        fs::write(&path, contents).map_err(|e| ToolError::io(&path, e))?;
        includes.push(file);
    }

    let path = config.aggregate_path();
    let aggregate = emit::render_aggregate(config.flavor, &includes, &timestamp);
    fs::write(&path, aggregate).map_err(|e| ToolError::io(&path, e))
}
