//! Synchronization primitives.

use crate::error::Result;
use ash::vk;

/// Wait forever.
pub const NO_TIMEOUT: u64 = u64::MAX;

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_fence(device: &ash::Device, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
    unsafe { device.wait_for_fences(&[fence], true, timeout_ns)? };
    Ok(())
}

/// Block until every submission on `queue` has completed.
///
/// # Safety
/// The device and queue must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_queue(device: &ash::Device, queue: vk::Queue) -> Result<()> {
    unsafe { device.queue_wait_idle(queue)? };
    Ok(())
}
