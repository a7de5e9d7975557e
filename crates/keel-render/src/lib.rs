//! Frame orchestration for the Keel renderer.
//!
//! This crate provides:
//! - Vertex formats and per-frame uniforms for the built-in pipelines
//! - The frame state machine (`begin`, record, `submit`, `present`)
//! - [`VulkanRenderer`] over any [`keel_gpu::RenderDevice`]
//! - [`NullRenderer`] for headless runs and tests

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod null;
pub mod renderer;
pub mod uniforms;
pub mod vertex;

pub use backend::{
    check_draw, BackendType, BufferData, BufferKind, RenderBackend, RenderPipeline, VertexFormat,
};
pub use config::{RendererConfig, RetentionPolicy};
pub use error::{RenderError, Result};
pub use frame::{FrameCycle, FrameState};
pub use null::{NullRenderer, SimBuffer};
pub use renderer::{MeshBuffer, VulkanRenderer};
pub use uniforms::{CameraView, UniformBufferObject};
pub use vertex::{EmptyVertex, MeshIndex, SimpleVertex, TerrainVertex};
