//! Shader source discovery.

use crate::error::{Result, ToolError};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Pipeline stage a source file targets, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Stage for a file name ending in `.vert` or `.frag`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".vert") {
            Some(Self::Vertex)
        } else if name.ends_with(".frag") {
            Some(Self::Fragment)
        } else {
            None
        }
    }
}

/// A shader source file found during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    /// Full path to the source file.
    pub path: PathBuf,
    /// File name including extension, e.g. `simple.vert`.
    pub file_name: String,
    /// Stage implied by the extension.
    pub stage: ShaderStage,
}

/// Recursively collect `*.vert` and `*.frag` files under `src_dir`.
///
/// Entries are visited depth-first and sorted by file name within each
/// directory, so the result is stable across runs and platforms. This order
/// is part of the output contract: artifacts are generated and listed in
/// the aggregate include in exactly this order (`a.frag` before `a.vert`).
///
/// Artifacts are named after the file name alone, so two sources with the
/// same name in different directories fail with
/// [`ToolError::DuplicateShader`].
pub fn scan_shaders(src_dir: &Path) -> Result<Vec<ShaderSource>> {
    let mut shaders = Vec::new();

    tracing::info!("Shaders in '{}':", src_dir.display());
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(file_name) = entry.file_name().to_str() else {
            tracing::warn!("Skipping non UTF-8 file name {:?}", entry.path());
            continue;
        };
        let Some(stage) = ShaderStage::from_file_name(file_name) else {
            continue;
        };

        tracing::info!("  {file_name}");
        shaders.push(ShaderSource {
            file_name: file_name.to_string(),
            path: entry.into_path(),
            stage,
        });
    }

    check_unique_names(&shaders)?;
    Ok(shaders)
}

/// Reject sources whose artifacts would overwrite each other.
pub fn check_unique_names(shaders: &[ShaderSource]) -> Result<()> {
    for (i, shader) in shaders.iter().enumerate() {
        if let Some(first) = shaders[..i].iter().find(|s| s.file_name == shader.file_name) {
            return Err(ToolError::DuplicateShader {
                name: shader.file_name.clone(),
                first: first.path.clone(),
                second: shader.path.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_from_extension() {
        assert_eq!(
            ShaderStage::from_file_name("a.vert"),
            Some(ShaderStage::Vertex)
        );
        assert_eq!(
            ShaderStage::from_file_name("sky.frag"),
            Some(ShaderStage::Fragment)
        );
        assert_eq!(ShaderStage::from_file_name("common.glsl"), None);
        assert_eq!(ShaderStage::from_file_name("a.vert.bak"), None);
        assert_eq!(ShaderStage::from_file_name("a.comp"), None);
    }

    fn source(path: &str) -> ShaderSource {
        let path = PathBuf::from(path);
        let file_name = path.file_name().unwrap().to_str().unwrap().to_string();
        ShaderSource {
            stage: ShaderStage::from_file_name(&file_name).unwrap(),
            file_name,
            path,
        }
    }

    #[test]
    fn same_name_in_two_directories_is_rejected() {
        let shaders = [source("src/a/x.vert"), source("src/a/y.frag"), source("src/b/x.vert")];
        match check_unique_names(&shaders) {
            Err(ToolError::DuplicateShader { name, first, second }) => {
                assert_eq!(name, "x.vert");
                assert_eq!(first, PathBuf::from("src/a/x.vert"));
                assert_eq!(second, PathBuf::from("src/b/x.vert"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn same_stem_different_stage_is_allowed() {
        let shaders = [source("src/a.frag"), source("src/a.vert")];
        assert!(check_unique_names(&shaders).is_ok());
    }
}
