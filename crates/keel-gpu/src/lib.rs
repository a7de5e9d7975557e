//! Vulkan resource and pipeline core for the Keel renderer.
//!
//! This crate provides:
//! - Typed vertex and index buffers with host/device residency
//! - Per-frame uniform descriptor sets
//! - Graphics pipeline construction over dynamic rendering
//! - Frame-slot retention of resources still referenced by the GPU
//! - The [`RenderDevice`] contract the renderer drives
//!
//! Instance, surface and swapchain bring-up belong to the device
//! collaborator implementing [`RenderDevice`].

pub mod buffer;
pub mod command;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod fatal;
#[cfg(any(test, feature = "headless"))]
pub mod headless;
pub mod memory;
pub mod pipeline;
pub mod retention;
pub mod shader;
pub mod sync;

pub use buffer::{
    Buffer, BufferRole, DeviceIndexBuffer, DeviceLocal, DeviceVertexBuffer, Host, HostIndexBuffer,
    HostVertexBuffer, Index, IndexElement, Residency, Vertex,
};
pub use command::{execute_single_time_commands, CommandPool};
pub use descriptors::{write_uniform_buffer, DescriptorPool, DescriptorSet, DescriptorSetLayoutBuilder};
pub use device::{FrameAcquire, PresentOutcome, RenderDevice};
pub use error::{after_cleanup, GpuError, Result};
pub use fatal::OrAbort;
#[cfg(any(test, feature = "headless"))]
pub use headless::HeadlessDevice;
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{
    GraphicsPipeline, PipelineBuilder, PipelineState, VertexAttribute, VertexLayout,
    VertexLayoutDesc,
};
pub use retention::{FrameRetention, RetentionPolicy, RetentionRing};
pub use shader::ShaderModules;
pub use sync::{wait_for_fence, wait_for_queue, NO_TIMEOUT};
