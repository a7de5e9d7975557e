//! Generated source rendering.
//!
//! Two flavors share the same naming and byte encoding: C++ headers for
//! external consumers and Rust modules for `include!` from build scripts.

use crate::encode::{array_name, hex_rows, length_name};
use std::fmt::Write;

/// Namespace wrapping every generated C++ header.
pub const NAMESPACE: &str = "keel";

/// Output language of generated files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderFlavor {
    /// `<name>.spv.h` headers aggregated by `Shaders.h`.
    #[default]
    C,
    /// `<name>.spv.rs` modules aggregated by `shaders.rs`.
    Rust,
}

impl HeaderFlavor {
    /// File name of the generated artifact for a shader file.
    pub fn artifact_file_name(self, shader_file: &str) -> String {
        match self {
            Self::C => format!("{shader_file}.spv.h"),
            Self::Rust => format!("{shader_file}.spv.rs"),
        }
    }

    /// File name of the aggregate include surface.
    pub const fn aggregate_file_name(self) -> &'static str {
        match self {
            Self::C => "Shaders.h",
            Self::Rust => "shaders.rs",
        }
    }
}

fn banner(out: &mut String, flavor: HeaderFlavor, timestamp: &str) {
    out.push_str("// Generated by keel-shaderc\n");
    let _ = writeln!(out, "// {timestamp} UTC");
    out.push('\n');
    if flavor == HeaderFlavor::C {
        out.push_str("#pragma once\n");
    }
}

/// Render the artifact for one compiled shader.
pub fn render_shader(
    flavor: HeaderFlavor,
    shader_file: &str,
    spirv: &[u8],
    timestamp: &str,
) -> String {
    let array = array_name(shader_file);
    let length = length_name(shader_file);
    let mut out = String::new();

    let _ = writeln!(out, "// Shader: {shader_file}");
    banner(&mut out, flavor, timestamp);

    match flavor {
        HeaderFlavor::C => {
            let _ = writeln!(out, "namespace {NAMESPACE}\n{{");
            let _ = writeln!(out, "constexpr static unsigned char {array}[] = {{");
            out.push_str(&hex_rows(spirv));
            out.push_str("};\n");
            let _ = writeln!(
                out,
                "constexpr static unsigned int {length} = {};",
                spirv.len()
            );
            let _ = writeln!(out, "}}; // namespace {NAMESPACE}");
        }
        HeaderFlavor::Rust => {
            out.push_str("#[allow(non_upper_case_globals)]\n");
            let _ = writeln!(out, "pub static {array}: [u8; {}] = [", spirv.len());
            out.push_str(&hex_rows(spirv));
            out.push_str("];\n");
            out.push_str("#[allow(non_upper_case_globals)]\n");
            let _ = writeln!(out, "pub const {length}: u32 = {};", spirv.len());
        }
    }

    out
}

/// Render the aggregate file including every artifact in order.
pub fn render_aggregate(flavor: HeaderFlavor, artifact_files: &[String], timestamp: &str) -> String {
    let mut out = String::new();
    banner(&mut out, flavor, timestamp);

    for file in artifact_files {
        match flavor {
            HeaderFlavor::C => {
                let _ = writeln!(out, "#include \"{file}\"");
            }
            HeaderFlavor::Rust => {
                let _ = writeln!(out, "include!(concat!(env!(\"OUT_DIR\"), \"/{file}\"));");
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAMP: &str = "2024-01-02 03:04:05";

    #[test]
    fn c_header_layout() {
        let header = render_shader(HeaderFlavor::C, "foo.vert", &[1, 2, 3], STAMP);
        let expected = "// Shader: foo.vert\n\
                        // Generated by keel-shaderc\n\
                        // 2024-01-02 03:04:05 UTC\n\
                        \n\
                        #pragma once\n\
                        namespace keel\n\
                        {\n\
                        constexpr static unsigned char foo_vert_spv[] = {\n    \
                        0x01, 0x02, 0x03\n\
                        };\n\
                        constexpr static unsigned int foo_vert_spv_len = 3;\n\
                        }; // namespace keel\n";
        assert_eq!(header, expected);
    }

    #[test]
    fn rust_module_layout() {
        let module = render_shader(HeaderFlavor::Rust, "foo.frag", &[0xFF; 9], STAMP);
        assert!(module.contains("pub static foo_frag_spv: [u8; 9] = [\n"));
        assert!(module.contains("pub const foo_frag_spv_len: u32 = 9;\n"));
        assert!(module.contains("    0xFF\n];\n"));
        assert!(!module.contains("#pragma once"));
    }

    #[test]
    fn aggregate_includes_in_order() {
        let files = vec!["a.vert.spv.h".to_string(), "a.frag.spv.h".to_string()];
        let aggregate = render_aggregate(HeaderFlavor::C, &files, STAMP);
        let includes: Vec<&str> = aggregate
            .lines()
            .filter(|l| l.starts_with("#include"))
            .collect();
        assert_eq!(
            includes,
            ["#include \"a.vert.spv.h\"", "#include \"a.frag.spv.h\""]
        );
    }

    #[test]
    fn artifact_names_per_flavor() {
        assert_eq!(HeaderFlavor::C.artifact_file_name("a.vert"), "a.vert.spv.h");
        assert_eq!(HeaderFlavor::Rust.artifact_file_name("a.vert"), "a.vert.spv.rs");
        assert_eq!(HeaderFlavor::C.aggregate_file_name(), "Shaders.h");
        assert_eq!(HeaderFlavor::Rust.aggregate_file_name(), "shaders.rs");
    }
}
