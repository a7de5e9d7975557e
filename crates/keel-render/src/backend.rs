//! Backend-agnostic renderer contract.

use crate::error::Result;
use crate::frame::FrameState;
use crate::uniforms::CameraView;
use crate::vertex::{MeshIndex, SimpleVertex, TerrainVertex};
use keel_gpu::GpuError;

/// Which implementation sits behind a [`RenderBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// No GPU; frames run against a simulated timeline.
    Empty,
    Vulkan,
}

/// Built-in visual styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPipeline {
    /// Unlit colored geometry, used by the test quad.
    Test,
    /// Lit terrain meshes.
    Terrain,
    /// Full-viewport clear, no vertex input.
    Fullscreen,
    /// Reserved; never built.
    Sky,
}

impl RenderPipeline {
    /// Pipelines created at renderer start.
    pub const BUILT: [RenderPipeline; 3] = [Self::Test, Self::Terrain, Self::Fullscreen];

    pub fn name(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Terrain => "terrain",
            Self::Fullscreen => "fullscreen",
            Self::Sky => "sky",
        }
    }

    pub fn is_built(self) -> bool {
        Self::BUILT.contains(&self)
    }

    /// Vertex format the pipeline reads, `None` if it takes no vertex input.
    pub fn vertex_format(self) -> Option<VertexFormat> {
        match self {
            Self::Test => Some(VertexFormat::Simple),
            Self::Terrain => Some(VertexFormat::Terrain),
            Self::Fullscreen | Self::Sky => None,
        }
    }
}

/// Vertex formats a backend buffer can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// [`SimpleVertex`]
    Simple,
    /// [`TerrainVertex`]
    Terrain,
}

/// What a backend buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertices(VertexFormat),
    Indices,
}

/// Contents for [`RenderBackend::create_buffer`].
#[derive(Debug, Clone, Copy)]
pub enum BufferData<'a> {
    SimpleVertices(&'a [SimpleVertex]),
    TerrainVertices(&'a [TerrainVertex]),
    Indices(&'a [MeshIndex]),
}

impl BufferData<'_> {
    pub fn kind(&self) -> BufferKind {
        match self {
            Self::SimpleVertices(_) => BufferKind::Vertices(VertexFormat::Simple),
            Self::TerrainVertices(_) => BufferKind::Vertices(VertexFormat::Terrain),
            Self::Indices(_) => BufferKind::Indices,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Self::SimpleVertices(data) => data.len(),
            Self::TerrainVertices(data) => data.len(),
            Self::Indices(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Check that `vertices` and `indices` can be drawn with the `bound` pipeline.
pub fn check_draw(
    bound: Option<RenderPipeline>,
    vertices: BufferKind,
    indices: BufferKind,
) -> std::result::Result<(), GpuError> {
    let Some(pipeline) = bound else {
        return Err(GpuError::InvalidState("Draw without a bound pipeline".to_string()));
    };

    let BufferKind::Vertices(format) = vertices else {
        return Err(GpuError::InvalidState(
            "Draw with an index buffer in the vertex slot".to_string(),
        ));
    };
    if indices != BufferKind::Indices {
        return Err(GpuError::InvalidState(
            "Draw with a vertex buffer in the index slot".to_string(),
        ));
    }

    match pipeline.vertex_format() {
        Some(expected) if expected == format => Ok(()),
        expected => Err(GpuError::InvalidState(format!(
            "Pipeline '{}' reads {expected:?} vertices, buffer holds {format:?}",
            pipeline.name()
        ))),
    }
}

/// Frame-level operations shared by every backend.
///
/// A frame is `begin`, any number of recording calls, `submit`, `present`.
/// Calls out of that order fail with
/// [`RenderError::InvalidTransition`](crate::RenderError::InvalidTransition).
pub trait RenderBackend {
    /// Backend-owned mesh buffer.
    type Buffer;

    fn backend_type(&self) -> BackendType;

    fn state(&self) -> FrameState;

    /// Start recording a frame.
    ///
    /// Returns `false` if the swapchain stayed out of date and the frame
    /// was skipped; the state is unchanged in that case.
    fn begin(&mut self) -> Result<bool>;

    fn submit(&mut self) -> Result<()>;

    /// Queue the frame for display. A stale swapchain triggers a resize.
    fn present(&mut self) -> Result<()>;

    /// Rebuild swapchain-dependent resources. Pipelines are kept.
    fn resize(&mut self) -> Result<()>;

    fn aspect(&self) -> f32;

    /// Upload camera matrices for the frame being recorded.
    fn update_uniforms(&mut self, camera: &dyn CameraView) -> Result<()>;

    fn bind_pipeline(&mut self, pipeline: RenderPipeline) -> Result<()>;

    /// Fill the viewport with the fullscreen pipeline.
    fn clear_viewport(&mut self) -> Result<()>;

    /// Draw the built-in test quad.
    fn draw_test(&mut self) -> Result<()>;

    /// Create a buffer filled with `data`.
    ///
    /// Allowed in any state except destroyed; an empty `data` is rejected.
    fn create_buffer(&mut self, data: BufferData<'_>, name: &str) -> Result<Self::Buffer>;

    /// Draw every index of `indices` from `vertices` with the bound pipeline.
    ///
    /// The vertex format must match the bound pipeline. Both buffers are
    /// retained until the frame completes on the GPU.
    fn draw_with_buffers(&mut self, vertices: &Self::Buffer, indices: &Self::Buffer) -> Result<()>;

    /// Hand a buffer back for destruction.
    ///
    /// Freed now if no in-flight frame draws from it, otherwise once the
    /// last such frame completes.
    fn destroy_buffer(&mut self, buffer: Self::Buffer) -> Result<()>;

    fn wait_for_idle(&mut self) -> Result<()>;
}
