//! Shader tool error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while generating embedded shader artifacts.
#[derive(Error, Debug)]
pub enum ToolError {
    /// Wrong command line.
    #[error("Invalid number of arguments\nUsage: keel-shaderc <src_dir> <out_dir>")]
    Usage,

    /// File system failure on a specific path.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory traversal failed.
    #[error("Failed to scan shader directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// The external compiler could not be started.
    #[error("Failed to launch shader compiler '{}': {source}", program.display())]
    CompilerSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The compiler ran and reported failure.
    #[error("Shader compiler failed on '{shader}': exit status {status}")]
    CompilerFailed { shader: String, status: i32 },

    /// Two sources share a file name and would write the same artifact.
    #[error("Duplicate shader name '{name}': '{}' and '{}'", first.display(), second.display())]
    DuplicateShader {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
}

impl ToolError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ToolError>;
