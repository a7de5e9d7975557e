//! Offscreen [`RenderDevice`] for running the renderer on real hardware
//! without a window.
//!
//! Every frame slot renders into one color image and one depth image in
//! place of a swapchain. Stale-swapchain reports can be injected to drive
//! the renderer's recovery paths.

use crate::command::CommandPool;
use crate::device::{FrameAcquire, PresentOutcome, RenderDevice};
use crate::error::{GpuError, Result};
use crate::memory::{GpuAllocator, GpuImage};
use crate::sync::{wait_for_fence, NO_TIMEOUT};
use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

/// Color attachment format of the offscreen target.
pub const COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
/// Depth attachment format of the offscreen target.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

struct RenderTarget {
    color: GpuImage,
    color_view: vk::ImageView,
    depth: GpuImage,
    depth_view: vk::ImageView,
}

/// A Vulkan 1.3 device rendering into offscreen images.
pub struct HeadlessDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    device: Arc<ash::Device>,
    allocator: Mutex<GpuAllocator>,
    queue: vk::Queue,
    transfer_pool: CommandPool,
    frame_pool: CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    fences: Vec<vk::Fence>,
    current: usize,
    extent: vk::Extent2D,
    target: Option<RenderTarget>,
    stale_acquires: u32,
    stale_present: bool,
    recreations: u32,
}

impl HeadlessDevice {
    /// Create a device with `frames` slots rendering at `width` x `height`.
    pub fn new(width: u32, height: u32, frames: usize) -> Result<Self> {
        if frames == 0 {
            return Err(GpuError::InvalidState(
                "Headless device needs at least one frame".to_string(),
            ));
        }

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;
        let instance = unsafe { create_instance(&entry)? };

        let (physical_device, family) = unsafe { select_device(&instance) }.inspect_err(|_| {
            unsafe { instance.destroy_instance(None) };
        })?;
        let device = unsafe { create_device(&instance, physical_device, family) }.inspect_err(|_| {
            unsafe { instance.destroy_instance(None) };
        })?;
        let device = Arc::new(device);
        let queue = unsafe { device.get_device_queue(family, 0) };

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device)? };
        let transfer_pool =
            unsafe { CommandPool::new(&device, family, vk::CommandPoolCreateFlags::TRANSIENT)? };
        let frame_pool = unsafe {
            CommandPool::new(
                &device,
                family,
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?
        };

        let mut headless = Self {
            _entry: entry,
            instance,
            device,
            allocator: Mutex::new(allocator),
            queue,
            transfer_pool,
            frame_pool,
            command_buffers: Vec::with_capacity(frames),
            fences: Vec::with_capacity(frames),
            current: 0,
            extent: vk::Extent2D { width, height },
            target: None,
            stale_acquires: 0,
            stale_present: false,
            recreations: 0,
        };

        let signaled = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        for _ in 0..frames {
            let cmd = unsafe { headless.frame_pool.allocate_command_buffer(&headless.device)? };
            headless.command_buffers.push(cmd);
            let fence = unsafe { headless.device.create_fence(&signaled, None)? };
            headless.fences.push(fence);
        }
        headless.target = Some(headless.create_target()?);

        tracing::info!("Headless device ready ({width}x{height}, {frames} frames in flight)");
        Ok(headless)
    }

    /// Make the next `count` acquisitions report an out-of-date swapchain.
    pub fn inject_stale_acquires(&mut self, count: u32) {
        self.stale_acquires = count;
    }

    /// Make the next present report an out-of-date swapchain.
    pub fn inject_stale_present(&mut self) {
        self.stale_present = true;
    }

    /// Extent used by the next recreation.
    pub fn set_extent(&mut self, width: u32, height: u32) {
        self.extent = vk::Extent2D { width, height };
    }

    /// Number of target recreations so far.
    pub fn recreations(&self) -> u32 {
        self.recreations
    }

    /// RGBA8 pixels of the last submitted frame, row by row.
    pub fn read_color(&self) -> Result<Vec<u8>> {
        let target = self.target()?;
        self.wait_idle()?;

        let size = u64::from(self.extent.width) * u64::from(self.extent.height) * 4;
        let mut readback = self.allocator.lock().create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "color readback",
        )?;

        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .layer_count(1),
            )
            .image_extent(target.color.extent);
        let (image, buffer) = (target.color.image, readback.buffer);

        // SAFETY: the device is idle and the image was left in TRANSFER_SRC_OPTIMAL
        let result = unsafe {
            crate::command::execute_single_time_commands(
                &self.device,
                &self.transfer_pool,
                self.queue,
                |cmd| {
                    self.device.cmd_copy_image_to_buffer(
                        cmd,
                        image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        buffer,
                        &[region],
                    );
                },
            )
        }
        .and_then(|()| readback.read::<u8>(size as usize));

        let cleanup = self.allocator.lock().free_buffer(&mut readback);
        result.and_then(|pixels| cleanup.map(|()| pixels))
    }

    fn target(&self) -> Result<&RenderTarget> {
        self.target
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Headless target missing".to_string()))
    }

    fn create_target(&self) -> Result<RenderTarget> {
        let extent = vk::Extent3D {
            width: self.extent.width,
            height: self.extent.height,
            depth: 1,
        };
        let image_info = |format, usage| {
            vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format)
                .extent(extent)
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
        };

        let mut allocator = self.allocator.lock();
        let mut color = allocator.create_image(
            &image_info(
                COLOR_FORMAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            ),
            MemoryLocation::GpuOnly,
            "headless color",
        )?;
        let depth = allocator.create_image(
            &image_info(DEPTH_FORMAT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
            MemoryLocation::GpuOnly,
            "headless depth",
        );
        let mut depth = match depth {
            Ok(depth) => depth,
            Err(e) => {
                let cleanup = allocator.free_image(&mut color);
                return Err(crate::error::after_cleanup(e, cleanup, "headless color"));
            }
        };
        drop(allocator);

        let views = unsafe { self.create_view(color.image, COLOR_FORMAT, vk::ImageAspectFlags::COLOR) }
            .and_then(|color_view| {
                unsafe { self.create_view(depth.image, DEPTH_FORMAT, vk::ImageAspectFlags::DEPTH) }
                    .map(|depth_view| (color_view, depth_view))
                    .inspect_err(|_| unsafe { self.device.destroy_image_view(color_view, None) })
            });
        let (color_view, depth_view) = match views {
            Ok(views) => views,
            Err(e) => {
                let mut allocator = self.allocator.lock();
                let cleanup = allocator
                    .free_image(&mut color)
                    .and_then(|()| allocator.free_image(&mut depth));
                return Err(crate::error::after_cleanup(e, cleanup, "headless images"));
            }
        };

        Ok(RenderTarget {
            color,
            color_view,
            depth,
            depth_view,
        })
    }

    unsafe fn create_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(subresource_range(aspect));
        Ok(unsafe { self.device.create_image_view(&info, None)? })
    }

    fn destroy_target(&mut self) -> Result<()> {
        let Some(mut target) = self.target.take() else {
            return Ok(());
        };

        // SAFETY: callers only destroy the target with the device idle
        unsafe {
            self.device.destroy_image_view(target.color_view, None);
            self.device.destroy_image_view(target.depth_view, None);
        }
        let mut allocator = self.allocator.lock();
        allocator.free_image(&mut target.color)?;
        allocator.free_image(&mut target.depth)
    }
}

impl RenderDevice for HeadlessDevice {
    fn device(&self) -> &ash::Device {
        &self.device
    }

    fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    fn graphics_queue(&self) -> vk::Queue {
        self.queue
    }

    fn transfer_pool(&self) -> &CommandPool {
        &self.transfer_pool
    }

    fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }

    fn current_frame(&self) -> usize {
        self.current
    }

    fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffers[self.current]
    }

    fn frame_fence(&self, frame: usize) -> vk::Fence {
        self.fences[frame]
    }

    fn swapchain_format(&self) -> vk::Format {
        COLOR_FORMAT
    }

    fn depth_format(&self) -> Option<vk::Format> {
        Some(DEPTH_FORMAT)
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn begin_frame(&mut self) -> Result<FrameAcquire> {
        if self.stale_acquires > 0 {
            self.stale_acquires -= 1;
            return Ok(FrameAcquire::OutOfDate);
        }

        let target = self.target()?;
        let cmd = self.command_buffers[self.current];
        let fence = self.fences[self.current];

        unsafe {
            // Resetting an in-flight fence is invalid
            wait_for_fence(&self.device, fence, NO_TIMEOUT)?;
            self.device.reset_fences(&[fence])?;
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            self.device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;

            // Earlier frames may still use the shared target
            let barriers = [
                layout_barrier(
                    target.color.image,
                    vk::ImageAspectFlags::COLOR,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                ),
                layout_barrier(
                    target.depth.image,
                    vk::ImageAspectFlags::DEPTH,
                    vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
                ),
            ];
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );

            let color_attachment = vk::RenderingAttachmentInfo::default()
                .image_view(target.color_view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [0.0, 0.0, 0.0, 1.0],
                    },
                });
            let depth_attachment = vk::RenderingAttachmentInfo::default()
                .image_view(target.depth_view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                });
            let color_attachments = [color_attachment];
            let rendering_info = vk::RenderingInfo::default()
                .render_area(vk::Rect2D::default().extent(self.extent))
                .layer_count(1)
                .color_attachments(&color_attachments)
                .depth_attachment(&depth_attachment);
            self.device.cmd_begin_rendering(cmd, &rendering_info);
        }

        Ok(FrameAcquire::Ready)
    }

    fn submit_frame(&mut self) -> Result<()> {
        let target = self.target()?;
        let cmd = self.command_buffers[self.current];

        unsafe {
            self.device.cmd_end_rendering(cmd);

            let to_transfer = vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(target.color.image)
                .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR));
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            self.device.end_command_buffer(cmd)?;

            let cmds = [cmd];
            let submit = vk::SubmitInfo::default().command_buffers(&cmds);
            self.device
                .queue_submit(self.queue, &[submit], self.fences[self.current])?;
        }
        Ok(())
    }

    fn present_frame(&mut self) -> Result<PresentOutcome> {
        self.current = (self.current + 1) % self.fences.len();
        if std::mem::take(&mut self.stale_present) {
            return Ok(PresentOutcome::OutOfDate);
        }
        Ok(PresentOutcome::Presented)
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        self.destroy_target()?;
        self.target = Some(self.create_target()?);
        self.recreations += 1;
        Ok(())
    }
}

impl Drop for HeadlessDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            if let Err(e) = self.destroy_target() {
                tracing::error!("Failed to destroy headless target: {e}");
            }
            for &fence in &self.fences {
                self.device.destroy_fence(fence, None);
            }
            self.frame_pool.destroy(&self.device);
            self.transfer_pool.destroy(&self.device);

            // Allocator memory must go before the device
            self.allocator.lock().shutdown();
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .level_count(1)
        .layer_count(1)
}

fn layout_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    new_layout: vk::ImageLayout,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
        .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect))
}

unsafe fn create_instance(entry: &ash::Entry) -> Result<ash::Instance> {
    let app_info = vk::ApplicationInfo::default()
        .application_name(c"keel-headless")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Keel")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let validation = c"VK_LAYER_KHRONOS_validation";
    let available = unsafe { entry.enumerate_instance_layer_properties()? };
    let layers: Vec<*const std::ffi::c_char> = if available
        .iter()
        .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == validation))
    {
        vec![validation.as_ptr()]
    } else {
        tracing::warn!("Validation layer not available");
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layers);

    Ok(unsafe { entry.create_instance(&create_info, None)? })
}

/// First Vulkan 1.3 device with a graphics queue family.
unsafe fn select_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
    for physical_device in unsafe { instance.enumerate_physical_devices()? } {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        if properties.api_version < vk::API_VERSION_1_3 {
            continue;
        }

        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        if let Some(family) = families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        {
            if let Ok(name) = properties.device_name_as_c_str() {
                tracing::info!("Selected GPU: {}", name.to_string_lossy());
            }
            return Ok((physical_device, family as u32));
        }
    }

    Err(GpuError::Other("No Vulkan 1.3 device with a graphics queue".to_string()))
}

unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    family: u32,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(family)
        .queue_priorities(&priorities);

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);
    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .push_next(&mut vulkan_1_3_features);

    Ok(unsafe { instance.create_device(physical_device, &create_info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn headless_device_creation() {
        let device = HeadlessDevice::new(64, 32, 2).unwrap();
        assert_eq!(device.frames_in_flight(), 2);
        assert_eq!(device.swapchain_extent(), vk::Extent2D { width: 64, height: 32 });
        assert_eq!(device.depth_format(), Some(DEPTH_FORMAT));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn empty_frame_clears_to_black() {
        let mut device = HeadlessDevice::new(8, 8, 2).unwrap();
        assert_eq!(device.begin_frame().unwrap(), FrameAcquire::Ready);
        device.submit_frame().unwrap();
        assert_eq!(device.present_frame().unwrap(), PresentOutcome::Presented);
        assert_eq!(device.current_frame(), 1);

        let pixels = device.read_color().unwrap();
        assert_eq!(pixels.len(), 8 * 8 * 4);
        assert!(pixels.chunks(4).all(|p| p == [0, 0, 0, 255]));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn injected_staleness_and_recreation() {
        let mut device = HeadlessDevice::new(8, 8, 1).unwrap();
        device.inject_stale_acquires(1);
        assert_eq!(device.begin_frame().unwrap(), FrameAcquire::OutOfDate);

        device.set_extent(16, 4);
        device.recreate_swapchain().unwrap();
        assert_eq!(device.recreations(), 1);
        assert!((device.aspect() - 4.0).abs() < f32::EPSILON);
    }
}
