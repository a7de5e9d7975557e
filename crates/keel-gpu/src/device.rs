//! Device collaborator contract.
//!
//! Instance creation, physical device selection, queue discovery, surface
//! and swapchain management live outside this crate. The renderer core only
//! needs the narrow surface described by [`RenderDevice`].

use crate::command::CommandPool;
use crate::error::Result;
use crate::memory::GpuAllocator;
use ash::vk;
use parking_lot::Mutex;

/// Outcome of acquiring the next swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAcquire {
    /// Image acquired, command buffer recording inside a dynamic rendering scope.
    Ready,
    /// Swapchain is stale; nothing was acquired and no fence was reset.
    OutOfDate,
}

/// Outcome of presenting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented (or dropped) on a stale or suboptimal swapchain.
    OutOfDate,
}

/// A logical device with a swapchain and per-frame command buffers.
///
/// Frame slots cycle through `0..frames_in_flight()`. For the slot returned
/// by [`current_frame`](Self::current_frame):
///
/// - [`begin_frame`](Self::begin_frame) acquires an image, resets the slot's
///   fence, begins the slot's command buffer and starts dynamic rendering on
///   the swapchain color attachment plus the depth attachment (if any);
/// - [`submit_frame`](Self::submit_frame) ends rendering and submits the
///   command buffer, signaling [`frame_fence`](Self::frame_fence) on
///   completion;
/// - [`present_frame`](Self::present_frame) queues the image for display
///   and advances `current_frame` to the next slot.
pub trait RenderDevice {
    /// Logical device handle.
    fn device(&self) -> &ash::Device;

    /// Allocator for buffer memory.
    fn allocator(&self) -> &Mutex<GpuAllocator>;

    /// Queue used for rendering and one-shot transfers.
    fn graphics_queue(&self) -> vk::Queue;

    /// Pool for one-shot transfer command buffers on the graphics family.
    fn transfer_pool(&self) -> &CommandPool;

    /// Number of frame slots.
    fn frames_in_flight(&self) -> usize;

    /// Slot currently being (or about to be) recorded.
    fn current_frame(&self) -> usize;

    /// Command buffer of the current slot.
    fn command_buffer(&self) -> vk::CommandBuffer;

    /// Fence signaled when the last submission of `frame` completes.
    ///
    /// Fences are created signaled so the first wait on each slot returns.
    fn frame_fence(&self, frame: usize) -> vk::Fence;

    /// Color attachment format of the swapchain.
    fn swapchain_format(&self) -> vk::Format;

    /// Depth attachment format, if the render target has one.
    fn depth_format(&self) -> Option<vk::Format>;

    /// Current swapchain extent.
    fn swapchain_extent(&self) -> vk::Extent2D;

    fn begin_frame(&mut self) -> Result<FrameAcquire>;

    fn submit_frame(&mut self) -> Result<()>;

    fn present_frame(&mut self) -> Result<PresentOutcome>;

    /// Rebuild the swapchain and its dependent images.
    ///
    /// Called with the device idle.
    fn recreate_swapchain(&mut self) -> Result<()>;

    /// Block until the whole device is idle.
    fn wait_idle(&self) -> Result<()> {
        // SAFETY: the device handle is valid for the collaborator's lifetime
        unsafe { self.device().device_wait_idle()? };
        Ok(())
    }

    /// Swapchain width over height.
    fn aspect(&self) -> f32 {
        let extent = self.swapchain_extent();
        extent.width as f32 / extent.height.max(1) as f32
    }
}
