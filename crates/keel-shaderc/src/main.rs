//! `keel-shaderc` command line.
//!
//! # Usage
//!
//! ```bash
//! keel-shaderc <src_dir> <out_dir>
//! ```
//!
//! Exits with `0` on success and `-1` on any failure. Diagnostics are
//! logged to stderr; set `RUST_LOG` to adjust verbosity.

use std::ffi::OsString;

use keel_shaderc::{run, Glslc, ToolConfig, ToolError};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match try_main(std::env::args_os().skip(1).collect()) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{e}");
            -1
        }
    };

    std::process::exit(code);
}

fn try_main(args: Vec<OsString>) -> Result<(), ToolError> {
    let [src_dir, out_dir]: [OsString; 2] = args.try_into().map_err(|_| ToolError::Usage)?;

    let compiler = Glslc::from_env();
    tracing::debug!("Using compiler '{}'", compiler.program().display());

    let summary = run(&ToolConfig::new(src_dir, out_dir), &compiler)?;
    tracing::info!("Generated {} shader(s)", summary.shaders.len());
    Ok(())
}
