//! Typed vertex and index buffers.
//!
//! A [`Buffer`] is tagged at the type level with its element type, its
//! role ([`Vertex`] or [`Index`]) and its residency ([`Host`] or
//! [`DeviceLocal`]). Only host buffers expose [`Buffer::write`]; device-local
//! buffers are filled through [`Buffer::copy_to_device`]. Only index buffers
//! can issue draws, so one vertex buffer can be reused under several index
//! buffers.

use crate::command::execute_single_time_commands;
use crate::device::RenderDevice;
use crate::error::{after_cleanup, GpuError, Result};
use crate::memory::{GpuAllocator, GpuBuffer};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use std::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// Where a buffer's memory lives.
pub trait Residency: sealed::Sealed {
    const LOCATION: MemoryLocation;
    const USAGE: vk::BufferUsageFlags;
    const NAME: &'static str;
}

/// What a buffer is bound as.
pub trait BufferRole: sealed::Sealed {
    const USAGE: vk::BufferUsageFlags;
    const NAME: &'static str;
}

/// CPU-writable staging memory.
#[derive(Debug)]
pub enum Host {}

/// GPU-local memory, populated only by copies.
#[derive(Debug)]
pub enum DeviceLocal {}

/// Vertex attribute data.
#[derive(Debug)]
pub enum Vertex {}

/// Index data; the only role that can draw.
#[derive(Debug)]
pub enum Index {}

impl sealed::Sealed for Host {}
impl sealed::Sealed for DeviceLocal {}
impl sealed::Sealed for Vertex {}
impl sealed::Sealed for Index {}

impl Residency for Host {
    const LOCATION: MemoryLocation = MemoryLocation::CpuToGpu;
    const USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::TRANSFER_SRC;
    const NAME: &'static str = "host";
}

impl Residency for DeviceLocal {
    const LOCATION: MemoryLocation = MemoryLocation::GpuOnly;
    const USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
        vk::BufferUsageFlags::TRANSFER_DST.as_raw() | vk::BufferUsageFlags::TRANSFER_SRC.as_raw(),
    );
    const NAME: &'static str = "device";
}

impl BufferRole for Vertex {
    const USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::VERTEX_BUFFER;
    const NAME: &'static str = "vertex";
}

impl BufferRole for Index {
    const USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::INDEX_BUFFER;
    const NAME: &'static str = "index";
}

/// Element types usable in an index buffer.
pub trait IndexElement: Pod {
    const INDEX_TYPE: vk::IndexType;
}

impl IndexElement for u16 {
    const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT16;
}

impl IndexElement for u32 {
    const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT32;
}

/// Vertex buffer in host memory.
pub type HostVertexBuffer<T> = Buffer<T, Vertex, Host>;
/// Index buffer in host memory.
pub type HostIndexBuffer<T> = Buffer<T, Index, Host>;
/// Vertex buffer in device-local memory.
pub type DeviceVertexBuffer<T> = Buffer<T, Vertex, DeviceLocal>;
/// Index buffer in device-local memory.
pub type DeviceIndexBuffer<T> = Buffer<T, Index, DeviceLocal>;

/// Usage flags for a role/residency pair.
pub fn usage_flags<R: BufferRole, L: Residency>() -> vk::BufferUsageFlags {
    R::USAGE | L::USAGE
}

/// A typed GPU buffer.
///
/// Memory is released by handing the buffer to the renderer, which defers
/// the free until no in-flight frame references it, or through the unsafe
/// [`Buffer::destroy`]. Dropping a buffer leaks it.
pub struct Buffer<T, R, L> {
    raw: GpuBuffer,
    capacity: usize,
    count: usize,
    _marker: PhantomData<(fn() -> T, R, L)>,
}

impl<T: Pod, R: BufferRole, L: Residency> Buffer<T, R, L> {
    /// Allocate an empty buffer holding up to `capacity` elements.
    pub fn new(allocator: &mut GpuAllocator, capacity: usize, name: &str) -> Result<Self> {
        let element_size = std::mem::size_of::<T>();
        if capacity == 0 || element_size == 0 {
            return Err(GpuError::InvalidState(format!(
                "Buffer '{name}' needs a non-zero capacity and element size"
            )));
        }

        let size = capacity
            .checked_mul(element_size)
            .ok_or_else(|| GpuError::InvalidState(format!("Buffer '{name}' size overflow")))?;

        let raw = allocator.create_buffer(
            size as u64,
            usage_flags::<R, L>(),
            L::LOCATION,
            &format!("{name} ({} {})", L::NAME, R::NAME),
        )?;

        Ok(Self {
            raw,
            capacity,
            count: 0,
            _marker: PhantomData,
        })
    }

    /// Raw Vulkan handle.
    pub fn handle(&self) -> vk::Buffer {
        self.raw.buffer
    }

    /// Maximum number of elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of valid elements.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Size of one element in bytes.
    pub const fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    /// Release the untyped allocation.
    ///
    /// # Safety
    /// The caller takes over the obligation to free the allocation only
    /// after every command buffer referencing it has completed.
    pub unsafe fn into_raw(self) -> GpuBuffer {
        self.raw
    }

    /// Free the buffer immediately.
    ///
    /// ```compile_fail
    /// # fn free(buffer: keel_gpu::HostVertexBuffer<f32>, allocator: &mut keel_gpu::GpuAllocator) {
    /// // Freeing bypasses frame retention, so it needs an unsafe block.
    /// let _ = buffer.destroy(allocator);
    /// # }
    /// ```
    ///
    /// # Safety
    /// No submitted command buffer that has not yet completed may reference
    /// the buffer.
    pub unsafe fn destroy(mut self, allocator: &mut GpuAllocator) -> Result<()> {
        allocator.free_buffer(&mut self.raw)
    }
}

impl<T: Pod, R: BufferRole> Buffer<T, R, Host> {
    /// Copy `data` into the buffer, replacing its contents.
    pub fn write(&mut self, data: &[T]) -> Result<()> {
        if data.len() > self.capacity {
            return Err(GpuError::CapacityExceeded {
                requested: data.len(),
                capacity: self.capacity,
            });
        }

        self.raw.write(data)?;
        self.count = data.len();
        Ok(())
    }

    /// Copy the valid elements into a device-local twin.
    ///
    /// Blocks until the transfer has completed; afterwards this staging
    /// buffer may be reused or destroyed. An empty source records no copy
    /// and leaves the target empty.
    pub fn copy_to_device<D>(&self, device: &D, target: &mut Buffer<T, R, DeviceLocal>) -> Result<()>
    where
        D: RenderDevice + ?Sized,
    {
        if self.count > target.capacity {
            return Err(GpuError::CapacityExceeded {
                requested: self.count,
                capacity: target.capacity,
            });
        }
        if self.count == 0 {
            target.count = 0;
            return Ok(());
        }

        let region = vk::BufferCopy::default()
            .src_offset(0)
            .dst_offset(0)
            .size((self.count * std::mem::size_of::<T>()) as u64);
        let (src, dst) = (self.raw.buffer, target.raw.buffer);
        let vk_device = device.device();

        // SAFETY: both buffers are alive and the helper waits for completion
        unsafe {
            execute_single_time_commands(
                vk_device,
                device.transfer_pool(),
                device.graphics_queue(),
                |cmd| vk_device.cmd_copy_buffer(cmd, src, dst, &[region]),
            )?;
        }

        target.count = self.count;
        Ok(())
    }
}

impl<T: Pod, R: BufferRole> Buffer<T, R, DeviceLocal> {
    /// Stage `data` through a temporary host buffer into a new device buffer.
    pub fn upload<D>(device: &D, data: &[T], name: &str) -> Result<Self>
    where
        D: RenderDevice + ?Sized,
    {
        let mut allocator = device.allocator().lock();
        let mut staging = Buffer::<T, R, Host>::new(&mut allocator, data.len(), name)?;
        let target = Self::new(&mut allocator, data.len(), name);
        drop(allocator);

        let result = target.and_then(|mut target| {
            let copied = staging
                .write(data)
                .and_then(|()| staging.copy_to_device(device, &mut target));
            match copied {
                Ok(()) => Ok(target),
                Err(e) => {
                    // SAFETY: the failed copy has completed or was never submitted
                    let cleanup = unsafe { target.destroy(&mut device.allocator().lock()) };
                    Err(after_cleanup(e, cleanup, "upload target"))
                }
            }
        });

        // SAFETY: copy_to_device waits for the transfer before returning
        let cleanup = unsafe { staging.destroy(&mut device.allocator().lock()) };
        match result {
            Ok(target) => cleanup.map(|()| target),
            Err(e) => Err(after_cleanup(e, cleanup, "staging buffer")),
        }
    }

    /// Copy the valid elements back into host memory.
    ///
    /// Blocks until the transfer has completed.
    pub fn read_back<D>(&self, device: &D) -> Result<Vec<T>>
    where
        D: RenderDevice + ?Sized,
    {
        if self.count == 0 {
            return Ok(Vec::new());
        }

        let size = (self.count * std::mem::size_of::<T>()) as u64;
        let mut readback = device.allocator().lock().create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "readback",
        )?;

        let region = vk::BufferCopy::default().size(size);
        let (src, dst) = (self.raw.buffer, readback.buffer);
        let vk_device = device.device();

        // SAFETY: both buffers are alive and the helper waits for completion
        let result = unsafe {
            execute_single_time_commands(
                vk_device,
                device.transfer_pool(),
                device.graphics_queue(),
                |cmd| vk_device.cmd_copy_buffer(cmd, src, dst, &[region]),
            )
        }
        .and_then(|()| readback.read(self.count));

        let cleanup = device.allocator().lock().free_buffer(&mut readback);
        match result {
            Ok(data) => cleanup.map(|()| data),
            Err(e) => Err(after_cleanup(e, cleanup, "readback buffer")),
        }
    }
}

impl<T: Pod, L: Residency> Buffer<T, Vertex, L> {
    /// Bind at vertex binding 0.
    ///
    /// # Safety
    /// `cmd` must be recording and the buffer must outlive its execution.
    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe { device.cmd_bind_vertex_buffers(cmd, 0, &[self.raw.buffer], &[0]) };
    }
}

impl<I: IndexElement, L: Residency> Buffer<I, Index, L> {
    /// Bind as the index buffer.
    ///
    /// # Safety
    /// `cmd` must be recording and the buffer must outlive its execution.
    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe { device.cmd_bind_index_buffer(cmd, self.raw.buffer, 0, I::INDEX_TYPE) };
    }

    /// Indexed draw of every valid index, one instance.
    ///
    /// # Safety
    /// `cmd` must be recording with a pipeline and vertex buffer bound.
    pub unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe { device.cmd_draw_indexed(cmd, self.count as u32, 1, 0, 0, 0) };
    }
}
