//! GPU-less renderer.
//!
//! Runs the same frame state machine and retention ring as the Vulkan
//! renderer, against a simulated GPU timeline: a submission stays in flight
//! until the renderer observes its completion (the slot's fence at the next
//! `begin`, or a queue idle). Freeing a buffer that an in-flight submission
//! still references is reported as an error, which makes retention bugs
//! visible in headless tests.

use crate::backend::{check_draw, BackendType, BufferData, BufferKind, RenderBackend, RenderPipeline};
use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::frame::{FrameCycle, FrameState};
use crate::uniforms::{CameraView, UniformBufferObject};
use keel_gpu::{FrameRetention, GpuError};

/// Handle to a simulated buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimBuffer(u64);

/// Headless [`RenderBackend`].
pub struct NullRenderer {
    config: RendererConfig,
    cycle: FrameCycle,
    current_frame: usize,
    retention: FrameRetention<SimBuffer, SimBuffer>,
    /// Buffers referenced by the recording in progress.
    recording: Vec<SimBuffer>,
    /// Buffers referenced by each slot's submitted, unfinished work.
    in_flight: Vec<Option<Vec<SimBuffer>>>,
    uniforms: Vec<Option<UniformBufferObject>>,
    bound: Option<RenderPipeline>,
    next_buffer: u64,
    live: Vec<(SimBuffer, BufferKind)>,
    freed: Vec<SimBuffer>,
    stale_acquires: u32,
    stale_present: bool,
    resizes: u32,
    extent: (u32, u32),
}

impl NullRenderer {
    pub fn new(config: RendererConfig) -> Self {
        let frames = config.frames_in_flight.max(1);
        tracing::info!("Creating null renderer ({frames} frames in flight)");

        Self {
            cycle: FrameCycle::new(),
            current_frame: 0,
            retention: FrameRetention::new(frames, config.retention),
            recording: Vec::new(),
            in_flight: vec![None; frames],
            uniforms: vec![None; frames],
            bound: None,
            next_buffer: 1,
            live: Vec::new(),
            freed: Vec::new(),
            stale_acquires: 0,
            stale_present: false,
            resizes: 0,
            extent: (1280, 720),
            config,
        }
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Whether `buffer` has been freed.
    pub fn is_freed(&self, buffer: SimBuffer) -> bool {
        self.freed.contains(&buffer)
    }

    /// Freed buffers, in release order.
    pub fn freed(&self) -> &[SimBuffer] {
        &self.freed
    }

    pub fn pending_frees(&self) -> usize {
        self.retention.pending_count()
    }

    /// Number of swapchain recreations so far.
    pub fn resizes(&self) -> u32 {
        self.resizes
    }

    /// Uniforms last written for `slot`.
    pub fn uniforms(&self, slot: usize) -> Option<&UniformBufferObject> {
        self.uniforms.get(slot).and_then(Option::as_ref)
    }

    /// Make the next `count` acquisitions report an out-of-date swapchain.
    pub fn inject_stale_acquires(&mut self, count: u32) {
        self.stale_acquires = count;
    }

    /// Make the next present report an out-of-date swapchain.
    pub fn inject_stale_present(&mut self) {
        self.stale_present = true;
    }

    pub fn set_extent(&mut self, width: u32, height: u32) {
        self.extent = (width, height);
    }

    /// Idle the simulated GPU and release everything.
    pub fn destroy(mut self) -> Result<Vec<SimBuffer>> {
        tracing::info!("Destroying null renderer");
        self.complete_all();
        let released = self.retention.after_idle();
        self.release(released)?;
        self.cycle.tear_down();
        Ok(self.freed)
    }

    fn release(&mut self, buffers: Vec<SimBuffer>) -> Result<()> {
        for buffer in buffers {
            if self
                .in_flight
                .iter()
                .flatten()
                .any(|submitted| submitted.contains(&buffer))
            {
                return Err(GpuError::InvalidState(format!(
                    "{buffer:?} freed while an in-flight submission uses it"
                ))
                .into());
            }
            self.live.retain(|(live, _)| *live != buffer);
            self.freed.push(buffer);
        }
        Ok(())
    }

    fn complete_all(&mut self) {
        for slot in &mut self.in_flight {
            *slot = None;
        }
    }

    fn kind(&self, buffer: SimBuffer) -> Result<BufferKind> {
        self.live
            .iter()
            .find(|(live, _)| *live == buffer)
            .map(|&(_, kind)| kind)
            .ok_or_else(|| GpuError::InvalidState(format!("Draw with dead buffer {buffer:?}")).into())
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        self.complete_all();
        let released = self.retention.after_idle();
        self.release(released)?;
        self.resizes += 1;
        Ok(())
    }
}

impl RenderBackend for NullRenderer {
    type Buffer = SimBuffer;

    fn backend_type(&self) -> BackendType {
        BackendType::Empty
    }

    fn state(&self) -> FrameState {
        self.cycle.state()
    }

    fn begin(&mut self) -> Result<bool> {
        self.cycle.check_begin()?;

        let slot = self.current_frame;
        let in_flight = &mut self.in_flight;
        let released = self.retention.before_record(slot, || -> Result<()> {
            // Fence wait
            in_flight[slot] = None;
            Ok(())
        })?;
        self.release(released)?;

        let mut attempts = 0;
        while self.stale_acquires > 0 {
            self.stale_acquires -= 1;
            attempts += 1;
            self.recreate_swapchain()?;
            if attempts >= self.config.max_acquire_attempts {
                tracing::warn!("Swapchain still out of date after {attempts} attempts, skipping frame");
                return Ok(false);
            }
        }

        self.cycle.begin()?;
        self.bound = None;
        Ok(true)
    }

    fn submit(&mut self) -> Result<()> {
        self.cycle.submit()?;

        let slot = self.current_frame;
        self.in_flight[slot] = Some(std::mem::take(&mut self.recording));

        let in_flight = &mut self.in_flight;
        let released = self.retention.after_submit(slot, || -> Result<()> {
            // Queue idle
            in_flight.fill(None);
            Ok(())
        })?;
        self.release(released)
    }

    fn present(&mut self) -> Result<()> {
        self.cycle.present()?;
        self.current_frame = (self.current_frame + 1) % self.in_flight.len();

        if std::mem::take(&mut self.stale_present) {
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
        self.extent.0 as f32 / self.extent.1.max(1) as f32
    }

    fn update_uniforms(&mut self, camera: &dyn CameraView) -> Result<()> {
        self.cycle.check_recording("update uniforms")?;
        if self.in_flight[self.current_frame].is_some() {
            return Err(GpuError::InvalidState(
                "Uniforms written while the slot is still in flight".to_string(),
            )
            .into());
        }
        self.uniforms[self.current_frame] = Some(UniformBufferObject::from_camera(camera));
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: RenderPipeline) -> Result<()> {
        self.cycle.check_recording("bind pipeline")?;
        if !pipeline.is_built() {
            return Err(RenderError::PipelineUnavailable(pipeline));
        }
        self.bound = Some(pipeline);
        Ok(())
    }

    fn clear_viewport(&mut self) -> Result<()> {
        self.bind_pipeline(RenderPipeline::Fullscreen)
    }

    fn draw_test(&mut self) -> Result<()> {
        self.bind_pipeline(RenderPipeline::Test)
    }

    fn create_buffer(&mut self, data: BufferData<'_>, name: &str) -> Result<SimBuffer> {
        self.cycle.check_alive("create buffer")?;
        if data.is_empty() {
            return Err(GpuError::InvalidState(format!("Buffer '{name}' has no data")).into());
        }

        let buffer = SimBuffer(self.next_buffer);
        self.next_buffer += 1;
        self.live.push((buffer, data.kind()));
        Ok(buffer)
    }

    fn draw_with_buffers(&mut self, vertices: &SimBuffer, indices: &SimBuffer) -> Result<()> {
        self.cycle.check_recording("draw")?;
        check_draw(self.bound, self.kind(*vertices)?, self.kind(*indices)?)?;

        for buffer in [*vertices, *indices] {
            self.retention.retain(self.current_frame, buffer)?;
            if !self.recording.contains(&buffer) {
                self.recording.push(buffer);
            }
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: SimBuffer) -> Result<()> {
        self.cycle.check_alive("destroy buffer")?;
        if let Some(buffer) = self.retention.retire(buffer, buffer) {
            self.release(vec![buffer])?;
        }
        Ok(())
    }

    fn wait_for_idle(&mut self) -> Result<()> {
        self.cycle.check_alive("wait for idle")?;
        self.complete_all();
        Ok(())
    }
}
