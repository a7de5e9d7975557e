//! GPU error types.

use ash::vk;
use keel_shaders::ArtifactError;
use thiserror::Error;

/// GPU-related errors.
///
/// Apart from swapchain staleness (which never surfaces here) every one of
/// these is fatal to the renderer; see [`crate::fatal`].
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Shader module creation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Embedded bytecode is unusable.
    #[error("Invalid shader artifact: {0}")]
    InvalidShaderArtifact(#[from] ArtifactError),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// A write or copy larger than the destination buffer.
    #[error("Buffer capacity exceeded: {requested} elements into capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    /// Per-frame resource accessed with an invalid frame index.
    #[error("Frame index {index} out of range ({frames} frames in flight)")]
    FrameIndexOutOfRange { index: usize, frames: usize },

    /// A pipeline bound with a descriptor set it was not built against.
    #[error("Pipeline layout built for descriptor set {expected}, bound with {actual}")]
    IncompatibleDescriptorSet { expected: u64, actual: u64 },

    /// Render target formats differ from the pipeline's attachment formats.
    #[error("Attachment format mismatch: pipeline {pipeline:?}, target {target:?}")]
    AttachmentFormatMismatch {
        pipeline: vk::Format,
        target: vk::Format,
    },

    /// Depth testing requested without a depth attachment.
    #[error("Depth enabled but the render target has no depth format")]
    MissingDepthFormat,

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Keep `error` as the outcome of a failed operation whose cleanup also ran.
///
/// A cleanup failure is logged and dropped.
pub fn after_cleanup<E>(error: E, cleanup: Result<()>, what: &str) -> E {
    if let Err(cleanup_error) = cleanup {
        tracing::error!("Cleanup of {what} failed: {cleanup_error}");
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_cleanup_keeps_original_error() {
        let error = after_cleanup(
            GpuError::MissingDepthFormat,
            Err(GpuError::AllocationFailed("out of memory".to_string())),
            "pipeline",
        );
        assert!(matches!(error, GpuError::MissingDepthFormat));
    }

    #[test]
    fn successful_cleanup_keeps_original_error() {
        let error = after_cleanup(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST), Ok(()), "buffer");
        assert!(matches!(error, GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
    }
}
