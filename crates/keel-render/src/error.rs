//! Renderer error types.

use crate::backend::RenderPipeline;
use crate::frame::FrameState;
use keel_gpu::GpuError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// A frame operation called in the wrong state.
    #[error("Cannot {operation} while {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: FrameState,
    },

    /// The pipeline is declared but was never built.
    #[error("Pipeline {0:?} is not available")]
    PipelineUnavailable(RenderPipeline),
}

pub type Result<T> = std::result::Result<T, RenderError>;
