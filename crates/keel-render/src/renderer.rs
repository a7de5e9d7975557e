//! Vulkan renderer.

use crate::backend::{
    check_draw, BackendType, BufferData, BufferKind, RenderBackend, RenderPipeline, VertexFormat,
};
use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::frame::{FrameCycle, FrameState};
use crate::uniforms::{CameraView, UniformBufferObject};
use crate::vertex::{
    EmptyVertex, MeshIndex, SimpleVertex, TerrainVertex, TEST_QUAD_INDICES, TEST_QUAD_VERTICES,
};
use ash::vk;
use bytemuck::Pod;
use keel_gpu::{
    after_cleanup, wait_for_fence, wait_for_queue, Buffer, DescriptorSet, DeviceIndexBuffer,
    DeviceVertexBuffer, FrameAcquire, FrameRetention, GpuBuffer, GpuError, GraphicsPipeline,
    IndexElement, PipelineBuilder, PresentOutcome, RenderDevice, Residency, ShaderModules,
    VertexLayout, NO_TIMEOUT,
};
use keel_shaders::ShaderArtifact;

/// Device-local mesh buffer owned by a [`VulkanRenderer`].
pub enum MeshBuffer {
    SimpleVertices(DeviceVertexBuffer<SimpleVertex>),
    TerrainVertices(DeviceVertexBuffer<TerrainVertex>),
    Indices(DeviceIndexBuffer<MeshIndex>),
}

impl MeshBuffer {
    pub fn kind(&self) -> BufferKind {
        match self {
            Self::SimpleVertices(_) => BufferKind::Vertices(VertexFormat::Simple),
            Self::TerrainVertices(_) => BufferKind::Vertices(VertexFormat::Terrain),
            Self::Indices(_) => BufferKind::Indices,
        }
    }

    pub fn handle(&self) -> vk::Buffer {
        match self {
            Self::SimpleVertices(buffer) => buffer.handle(),
            Self::TerrainVertices(buffer) => buffer.handle(),
            Self::Indices(buffer) => buffer.handle(),
        }
    }

    /// Elements written.
    pub fn count(&self) -> usize {
        match self {
            Self::SimpleVertices(buffer) => buffer.count(),
            Self::TerrainVertices(buffer) => buffer.count(),
            Self::Indices(buffer) => buffer.count(),
        }
    }

    /// # Safety
    /// The returned buffer must be freed only once no command buffer uses it.
    unsafe fn into_raw(self) -> GpuBuffer {
        // SAFETY: forwarded to the caller
        unsafe {
            match self {
                Self::SimpleVertices(buffer) => buffer.into_raw(),
                Self::TerrainVertices(buffer) => buffer.into_raw(),
                Self::Indices(buffer) => buffer.into_raw(),
            }
        }
    }
}

/// Renderer over a [`RenderDevice`].
///
/// Owns the descriptor set, the built-in pipelines and their shader
/// modules, the test quad, and the retention ring that keeps buffers alive
/// until the frames drawing them have finished on the GPU.
pub struct VulkanRenderer<D: RenderDevice> {
    device: D,
    config: RendererConfig,
    cycle: FrameCycle,
    descriptors: DescriptorSet<UniformBufferObject>,
    pipelines: Vec<(RenderPipeline, GraphicsPipeline)>,
    shader_modules: ShaderModules,
    test_vertices: DeviceVertexBuffer<SimpleVertex>,
    test_indices: DeviceIndexBuffer<MeshIndex>,
    retention: FrameRetention<vk::Buffer, GpuBuffer>,
    bound: Option<RenderPipeline>,
}

impl<D: RenderDevice> VulkanRenderer<D> {
    /// Build the descriptor set, shader modules, pipelines and test quad.
    ///
    /// Any failure is fatal to the device; objects created before it are
    /// destroyed before returning.
    pub fn new(device: D, config: RendererConfig) -> Result<Self> {
        tracing::info!("Creating Vulkan renderer");

        let frames = device.frames_in_flight();
        if frames != config.frames_in_flight {
            return Err(GpuError::InvalidState(format!(
                "Device has {frames} frames in flight, renderer configured for {}",
                config.frames_in_flight
            ))
            .into());
        }

        // SAFETY: the device outlives every object created here
        let mut descriptors = unsafe {
            DescriptorSet::<UniformBufferObject>::new(
                device.device(),
                &mut device.allocator().lock(),
                frames,
            )?
        };

        let mut shader_modules = ShaderModules::new();
        let pipelines = match unsafe { build_pipelines(&device, &descriptors, &mut shader_modules) } {
            Ok(pipelines) => pipelines,
            Err(e) => {
                // SAFETY: no pipeline was left referencing these
                let cleanup = unsafe {
                    shader_modules.destroy(device.device());
                    descriptors.destroy(device.device(), &mut device.allocator().lock())
                };
                return Err(after_cleanup(e, cleanup, "descriptor set").into());
            }
        };

        let quad = DeviceVertexBuffer::<SimpleVertex>::upload(
            &device,
            &TEST_QUAD_VERTICES,
            "test quad vertices",
        )
        .and_then(|vertices| {
            match DeviceIndexBuffer::<MeshIndex>::upload(
                &device,
                &TEST_QUAD_INDICES,
                "test quad indices",
            ) {
                Ok(indices) => Ok((vertices, indices)),
                Err(e) => {
                    // SAFETY: never recorded into a command buffer
                    let cleanup = unsafe { vertices.destroy(&mut device.allocator().lock()) };
                    Err(after_cleanup(e, cleanup, "test quad vertices"))
                }
            }
        });
        let (test_vertices, test_indices) = match quad {
            Ok(quad) => quad,
            Err(e) => {
                // SAFETY: nothing has been recorded with these yet
                let cleanup = unsafe {
                    for (_, pipeline) in &pipelines {
                        pipeline.destroy(device.device());
                    }
                    shader_modules.destroy(device.device());
                    descriptors.destroy(device.device(), &mut device.allocator().lock())
                };
                return Err(after_cleanup(e, cleanup, "descriptor set").into());
            }
        };

        tracing::info!(
            "Vulkan renderer ready ({frames} frames in flight, {:?} retention)",
            config.retention
        );

        Ok(Self {
            device,
            retention: FrameRetention::new(frames, config.retention),
            config,
            cycle: FrameCycle::new(),
            descriptors,
            pipelines,
            shader_modules,
            test_vertices,
            test_indices,
            bound: None,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Command buffer of the frame being recorded.
    pub fn command_buffer(&self) -> Result<vk::CommandBuffer> {
        self.cycle.check_recording("get command buffer")?;
        Ok(self.device.command_buffer())
    }

    fn pipeline(&self, which: RenderPipeline) -> Result<&GraphicsPipeline> {
        self.pipelines
            .iter()
            .find(|(kind, _)| *kind == which)
            .map(|(_, pipeline)| pipeline)
            .ok_or(RenderError::PipelineUnavailable(which))
    }

    /// Free buffers the retention ring released.
    fn release(&self, buffers: Vec<GpuBuffer>) -> Result<()> {
        if buffers.is_empty() {
            return Ok(());
        }

        let mut allocator = self.device.allocator().lock();
        for mut buffer in buffers {
            allocator.free_buffer(&mut buffer)?;
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        let released = self.retention.after_idle();
        self.release(released)?;

        self.device.recreate_swapchain()?;
        let extent = self.device.swapchain_extent();
        tracing::info!("Swapchain recreated ({}x{})", extent.width, extent.height);
        Ok(())
    }

    fn set_full_viewport(&self) {
        let extent = self.device.swapchain_extent();
        let viewport = vk::Viewport::default()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        let scissor = vk::Rect2D::default().extent(extent);

        let vk_device = self.device.device();
        let cmd = self.device.command_buffer();
        // SAFETY: the frame's command buffer is recording
        unsafe {
            vk_device.cmd_set_viewport(cmd, 0, &[viewport]);
            vk_device.cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn check_formats(&self) -> Result<()> {
        let color = self.device.swapchain_format();
        let depth = self.device.depth_format();
        for (_, pipeline) in &self.pipelines {
            pipeline.check_formats(color, depth)?;
        }
        Ok(())
    }

    /// Number of destroyed buffers waiting on in-flight frames.
    pub fn pending_frees(&self) -> usize {
        self.retention.pending_count()
    }

    /// Wait for the device, then destroy everything in dependency order.
    ///
    /// Returns the device so its owner can tear it down.
    pub fn destroy(mut self) -> Result<D> {
        tracing::info!("Destroying Vulkan renderer");

        self.device.wait_idle()?;
        let released = self.retention.after_idle();
        self.release(released)?;

        let Self {
            device,
            mut cycle,
            mut descriptors,
            pipelines,
            mut shader_modules,
            test_vertices,
            test_indices,
            ..
        } = self;

        let vk_device = device.device();
        // SAFETY: the device is idle
        unsafe {
            for (_, pipeline) in &pipelines {
                pipeline.destroy(vk_device);
            }
            descriptors.destroy(vk_device, &mut device.allocator().lock())?;
            shader_modules.destroy(vk_device);
        }

        {
            let mut allocator = device.allocator().lock();
            // SAFETY: the device is idle
            unsafe {
                test_vertices.destroy(&mut allocator)?;
                test_indices.destroy(&mut allocator)?;
            }
        }

        cycle.tear_down();
        Ok(device)
    }
}

impl<D: RenderDevice> RenderBackend for VulkanRenderer<D> {
    type Buffer = MeshBuffer;

    fn backend_type(&self) -> BackendType {
        BackendType::Vulkan
    }

    fn state(&self) -> FrameState {
        self.cycle.state()
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(skip_all))]
    fn begin(&mut self) -> Result<bool> {
        self.cycle.check_begin()?;

        let slot = self.device.current_frame();
        let device = &self.device;
        let released = self.retention.before_record(slot, || -> Result<()> {
            // SAFETY: the fence belongs to the device and is not being reset
            unsafe { wait_for_fence(device.device(), device.frame_fence(slot), NO_TIMEOUT)? };
            Ok(())
        })?;
        self.release(released)?;

        let mut attempts = 0;
        while self.device.begin_frame()? == FrameAcquire::OutOfDate {
            attempts += 1;
            self.recreate_swapchain()?;
            if attempts >= self.config.max_acquire_attempts {
                tracing::warn!("Swapchain still out of date after {attempts} attempts, skipping frame");
                return Ok(false);
            }
        }

        self.cycle.begin()?;
        self.bound = None;
        self.set_full_viewport();
        self.check_formats()?;
        Ok(true)
    }

    fn submit(&mut self) -> Result<()> {
        self.cycle.check_recording("submit")?;
        self.device.submit_frame()?;
        self.cycle.submit()?;

        let slot = self.device.current_frame();
        let device = &self.device;
        let released = self.retention.after_submit(slot, || -> Result<()> {
            // SAFETY: the queue is owned by the device
            unsafe { wait_for_queue(device.device(), device.graphics_queue())? };
            Ok(())
        })?;
        self.release(released)
    }

    fn present(&mut self) -> Result<()> {
        self.cycle.present()?;

        if self.device.present_frame()? == PresentOutcome::OutOfDate {
            tracing::warn!("Swapchain out of date at present, resizing");
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    fn resize(&mut self) -> Result<()> {
        self.cycle.check_idle("resize")?;
        self.recreate_swapchain()
    }

    fn aspect(&self) -> f32 {
        self.device.aspect()
    }

    fn update_uniforms(&mut self, camera: &dyn CameraView) -> Result<()> {
        self.cycle.check_recording("update uniforms")?;

        let ubo = UniformBufferObject::from_camera(camera);
        self.descriptors
            .update_ubo(self.device.current_frame(), &ubo)?;
        Ok(())
    }

    fn bind_pipeline(&mut self, which: RenderPipeline) -> Result<()> {
        self.cycle.check_recording("bind pipeline")?;

        let pipeline = self.pipeline(which)?;
        // SAFETY: the frame's command buffer is recording
        unsafe {
            pipeline.bind(
                self.device.device(),
                self.device.command_buffer(),
                &self.descriptors,
                self.device.current_frame(),
            )?;
        }
        self.bound = Some(which);
        Ok(())
    }

    fn clear_viewport(&mut self) -> Result<()> {
        self.bind_pipeline(RenderPipeline::Fullscreen)?;

        // SAFETY: the fullscreen pipeline is bound and takes no vertex input
        unsafe {
            self.device
                .device()
                .cmd_draw(self.device.command_buffer(), 3, 1, 0, 0);
        }
        Ok(())
    }

    fn draw_test(&mut self) -> Result<()> {
        self.bind_pipeline(RenderPipeline::Test)?;
        record_indexed(
            &self.device,
            &mut self.retention,
            &self.test_vertices,
            &self.test_indices,
        )
    }

    fn create_buffer(&mut self, data: BufferData<'_>, name: &str) -> Result<MeshBuffer> {
        self.cycle.check_alive("create buffer")?;
        if data.is_empty() {
            return Err(GpuError::InvalidState(format!("Buffer '{name}' has no data")).into());
        }

        let buffer = match data {
            BufferData::SimpleVertices(data) => {
                MeshBuffer::SimpleVertices(Buffer::upload(&self.device, data, name)?)
            }
            BufferData::TerrainVertices(data) => {
                MeshBuffer::TerrainVertices(Buffer::upload(&self.device, data, name)?)
            }
            BufferData::Indices(data) => MeshBuffer::Indices(Buffer::upload(&self.device, data, name)?),
        };
        tracing::debug!("Created {:?} buffer '{name}' ({} elements)", buffer.kind(), buffer.count());
        Ok(buffer)
    }

    fn draw_with_buffers(&mut self, vertices: &MeshBuffer, indices: &MeshBuffer) -> Result<()> {
        self.cycle.check_recording("draw")?;
        check_draw(self.bound, vertices.kind(), indices.kind())?;

        let MeshBuffer::Indices(indices) = indices else {
            return Err(GpuError::InvalidState("Draw without an index buffer".to_string()).into());
        };
        match vertices {
            MeshBuffer::SimpleVertices(vertices) => {
                record_indexed(&self.device, &mut self.retention, vertices, indices)
            }
            MeshBuffer::TerrainVertices(vertices) => {
                record_indexed(&self.device, &mut self.retention, vertices, indices)
            }
            MeshBuffer::Indices(_) => {
                Err(GpuError::InvalidState("Draw without a vertex buffer".to_string()).into())
            }
        }
    }

    fn destroy_buffer(&mut self, buffer: MeshBuffer) -> Result<()> {
        self.cycle.check_alive("destroy buffer")?;

        let key = buffer.handle();
        // SAFETY: the retention ring hands the buffer back only once no frame uses it
        let raw = unsafe { buffer.into_raw() };
        match self.retention.retire(key, raw) {
            Some(raw) => self.release(vec![raw]),
            None => {
                tracing::debug!("Buffer {key:?} still in flight, deferring free");
                Ok(())
            }
        }
    }

    fn wait_for_idle(&mut self) -> Result<()> {
        self.cycle.check_alive("wait for idle")?;
        self.device.wait_idle()?;
        Ok(())
    }
}

fn record_indexed<D, V, I, LV, LI>(
    device: &D,
    retention: &mut FrameRetention<vk::Buffer, GpuBuffer>,
    vertices: &Buffer<V, keel_gpu::Vertex, LV>,
    indices: &Buffer<I, keel_gpu::Index, LI>,
) -> Result<()>
where
    D: RenderDevice,
    V: Pod,
    I: IndexElement,
    LV: Residency,
    LI: Residency,
{
    let slot = device.current_frame();
    retention.retain(slot, vertices.handle())?;
    retention.retain(slot, indices.handle())?;

    let vk_device = device.device();
    let cmd = device.command_buffer();
    // SAFETY: recording, and both buffers are retained until the slot completes
    unsafe {
        vertices.bind(vk_device, cmd);
        indices.bind(vk_device, cmd);
        indices.draw(vk_device, cmd);
    }
    Ok(())
}

/// Create shader modules and the built-in pipelines.
///
/// On failure, pipelines built so far are destroyed; the caller owns the
/// modules created so far.
unsafe fn build_pipelines<D: RenderDevice>(
    device: &D,
    descriptors: &DescriptorSet<UniformBufferObject>,
    modules: &mut ShaderModules,
) -> keel_gpu::Result<Vec<(RenderPipeline, GraphicsPipeline)>> {
    let mut pipelines = Vec::with_capacity(RenderPipeline::BUILT.len());

    for which in RenderPipeline::BUILT {
        match unsafe { build_pipeline(device, descriptors, modules, which) } {
            Ok(pipeline) => pipelines.push((which, pipeline)),
            Err(e) => {
                for (_, pipeline) in &pipelines {
                    unsafe { pipeline.destroy(device.device()) };
                }
                return Err(e);
            }
        }
    }

    Ok(pipelines)
}

unsafe fn build_pipeline<D: RenderDevice>(
    device: &D,
    descriptors: &DescriptorSet<UniformBufferObject>,
    modules: &mut ShaderModules,
    which: RenderPipeline,
) -> keel_gpu::Result<GraphicsPipeline> {
    let name = which.name();
    let (builder, vert, frag): (PipelineBuilder, ShaderArtifact, ShaderArtifact) = match which {
        RenderPipeline::Test => (
            styled::<SimpleVertex>(name, true),
            keel_shaders::simple_vert(),
            keel_shaders::simple_frag(),
        ),
        RenderPipeline::Terrain => (
            styled::<TerrainVertex>(name, true),
            keel_shaders::terrain_vert(),
            keel_shaders::terrain_frag(),
        ),
        RenderPipeline::Fullscreen => (
            styled::<EmptyVertex>(name, false),
            keel_shaders::fullscreen_vert(),
            keel_shaders::fullscreen_frag(),
        ),
        RenderPipeline::Sky => {
            return Err(GpuError::PipelineCreation(format!(
                "No shaders for pipeline '{name}'"
            )))
        }
    };

    let vk_device = device.device();
    let vert = unsafe { modules.create(vk_device, &vert)? };
    let frag = unsafe { modules.create(vk_device, &frag)? };

    unsafe {
        builder
            .stage(vk::ShaderStageFlags::VERTEX, vert)
            .stage(vk::ShaderStageFlags::FRAGMENT, frag)
            .formats(device.swapchain_format(), device.depth_format())
            .build(vk_device, descriptors)
    }
}

/// Scene geometry culls back faces and depth tests; the fullscreen pass does neither.
fn styled<V: VertexLayout>(name: &'static str, scene: bool) -> PipelineBuilder {
    PipelineBuilder::new::<V>(name).culling(scene).depth(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionPolicy;
    use crate::frame::FrameState;
    use glam::{Mat4, Vec3};
    use keel_gpu::HeadlessDevice;

    struct Origin;

    impl CameraView for Origin {
        fn view_matrix(&self) -> Mat4 {
            Mat4::IDENTITY
        }

        fn projection_matrix(&self) -> Mat4 {
            Mat4::IDENTITY
        }

        fn position(&self) -> Vec3 {
            Vec3::ZERO
        }
    }

    fn renderer(device: HeadlessDevice, policy: RetentionPolicy) -> VulkanRenderer<HeadlessDevice> {
        VulkanRenderer::new(device, RendererConfig::default().with_retention(policy)).unwrap()
    }

    fn quad(renderer: &mut VulkanRenderer<HeadlessDevice>) -> (MeshBuffer, MeshBuffer) {
        let vertices = renderer
            .create_buffer(BufferData::SimpleVertices(&TEST_QUAD_VERTICES), "quad vertices")
            .unwrap();
        let indices = renderer
            .create_buffer(BufferData::Indices(&TEST_QUAD_INDICES), "quad indices")
            .unwrap();
        (vertices, indices)
    }

    fn frame(renderer: &mut VulkanRenderer<HeadlessDevice>, mesh: Option<&(MeshBuffer, MeshBuffer)>) {
        assert!(renderer.begin().unwrap());
        renderer.clear_viewport().unwrap();
        renderer.update_uniforms(&Origin).unwrap();
        if let Some((vertices, indices)) = mesh {
            renderer.bind_pipeline(RenderPipeline::Test).unwrap();
            renderer.draw_with_buffers(vertices, indices).unwrap();
        }
        renderer.submit().unwrap();
        renderer.present().unwrap();
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn clear_viewport_fills_target() {
        let device = HeadlessDevice::new(16, 16, 2).unwrap();
        let mut renderer = renderer(device, RetentionPolicy::PerFrameFence);
        assert_eq!(renderer.backend_type(), BackendType::Vulkan);

        assert!(renderer.begin().unwrap());
        renderer.clear_viewport().unwrap();
        renderer.draw_test().unwrap();
        renderer.submit().unwrap();

        let pixels = renderer.device().read_color().unwrap();
        assert_eq!(pixels.len(), 16 * 16 * 4);
        assert!(pixels.chunks_exact(4).all(|pixel| pixel[3] == 255));
        assert!(pixels.chunks_exact(4).all(|pixel| pixel[..3] != [0, 0, 0]));

        renderer.present().unwrap();
        renderer.destroy().unwrap();
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn destroyed_buffers_outlive_their_frame() {
        for policy in [RetentionPolicy::PerFrameFence, RetentionPolicy::IdleAfterSubmit] {
            let device = HeadlessDevice::new(16, 16, 2).unwrap();
            let mut renderer = renderer(device, policy);
            let mesh = quad(&mut renderer);
            assert_eq!(mesh.1.count(), TEST_QUAD_INDICES.len());

            frame(&mut renderer, Some(&mesh));
            let (vertices, indices) = mesh;
            renderer.destroy_buffer(vertices).unwrap();
            renderer.destroy_buffer(indices).unwrap();

            // Idle-after-submit already waited, the fence policy defers until slot 0 comes round
            let expected = match policy {
                RetentionPolicy::PerFrameFence => 2,
                RetentionPolicy::IdleAfterSubmit => 0,
            };
            assert_eq!(renderer.pending_frees(), expected, "{policy:?}");

            frame(&mut renderer, None);
            frame(&mut renderer, None);
            assert_eq!(renderer.pending_frees(), 0, "{policy:?}");

            renderer.destroy().unwrap();
        }
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn draw_checks_vertex_format() {
        let device = HeadlessDevice::new(16, 16, 2).unwrap();
        let mut renderer = renderer(device, RetentionPolicy::PerFrameFence);
        let (vertices, indices) = quad(&mut renderer);
        assert!(renderer
            .create_buffer(BufferData::TerrainVertices(&[]), "empty")
            .is_err());

        assert!(renderer.begin().unwrap());
        renderer.bind_pipeline(RenderPipeline::Terrain).unwrap();
        assert!(renderer.draw_with_buffers(&vertices, &indices).is_err());
        assert!(renderer.draw_with_buffers(&indices, &vertices).is_err());
        renderer.submit().unwrap();
        renderer.present().unwrap();

        renderer.destroy_buffer(vertices).unwrap();
        renderer.destroy_buffer(indices).unwrap();
        renderer.destroy().unwrap();
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn stale_acquire_recreates_swapchain() {
        let mut device = HeadlessDevice::new(16, 16, 2).unwrap();
        device.inject_stale_acquires(2);
        let mut renderer = renderer(device, RetentionPolicy::PerFrameFence);

        assert!(renderer.begin().unwrap());
        assert_eq!(renderer.device().recreations(), 2);
        assert_eq!(renderer.state(), FrameState::Recording);
        renderer.submit().unwrap();
        renderer.present().unwrap();

        let device = renderer.destroy().unwrap();
        assert_eq!(device.recreations(), 2);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn frame_count_must_match_device() {
        let device = HeadlessDevice::new(16, 16, 3).unwrap();
        let result = VulkanRenderer::new(device, RendererConfig::default());
        assert!(matches!(result, Err(RenderError::Gpu(GpuError::InvalidState(_)))));
    }
}
