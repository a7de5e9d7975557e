//! Descriptor set management.

use crate::error::{after_cleanup, GpuError, Result};
use crate::memory::{GpuAllocator, GpuBuffer};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_DESCRIPTOR_SET_ID: AtomicU64 = AtomicU64::new(1);

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };
        Ok(layout)
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&create_info, None)? };
        Ok(Self { pool })
    }

    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate one descriptor set per layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }

    /// Destroy the pool and every set allocated from it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// Write a uniform buffer descriptor.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(std::slice::from_ref(&buffer_info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

/// Per-frame uniform data bound at set 0, binding 0.
///
/// Holds one descriptor set and one host-visible uniform buffer of `U` per
/// frame in flight. Pipelines built against this set record its
/// [`id`](Self::id) and refuse to bind alongside any other set.
pub struct DescriptorSet<U> {
    id: u64,
    layout: vk::DescriptorSetLayout,
    pool: DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    uniforms: Vec<GpuBuffer>,
    _marker: PhantomData<fn() -> U>,
}

impl<U: Pod> DescriptorSet<U> {
    /// Create the layout, pool, sets and uniform buffers for `frames` slots.
    ///
    /// # Safety
    /// The device must be valid and own the allocator's memory.
    pub unsafe fn new(
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        frames: usize,
    ) -> Result<Self> {
        if frames == 0 {
            return Err(GpuError::InvalidState(
                "Descriptor set needs at least one frame".to_string(),
            ));
        }

        let layout = unsafe {
            DescriptorSetLayoutBuilder::new()
                .uniform_buffer(
                    0,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                )
                .build(device)?
        };

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: frames as u32,
        }];
        let pool = match unsafe { DescriptorPool::new(device, frames as u32, &pool_sizes) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(e);
            }
        };

        let mut set = Self {
            id: NEXT_DESCRIPTOR_SET_ID.fetch_add(1, Ordering::Relaxed),
            layout,
            pool,
            sets: Vec::new(),
            uniforms: Vec::with_capacity(frames),
            _marker: PhantomData,
        };

        if let Err(e) = unsafe { set.populate(device, allocator, frames) } {
            let cleanup = unsafe { set.destroy(device, allocator) };
            return Err(after_cleanup(e, cleanup, "descriptor set"));
        }

        tracing::debug!(
            "Created descriptor set {} ({frames} frames, {} byte uniforms)",
            set.id,
            std::mem::size_of::<U>()
        );

        Ok(set)
    }

    unsafe fn populate(
        &mut self,
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        frames: usize,
    ) -> Result<()> {
        let size = std::mem::size_of::<U>() as u64;

        for frame in 0..frames {
            self.uniforms.push(allocator.create_buffer(
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                &format!("uniforms[{frame}]"),
            )?);
        }

        let layouts = vec![self.layout; frames];
        self.sets = unsafe { self.pool.allocate(device, &layouts)? };

        for (set, buffer) in self.sets.iter().zip(&self.uniforms) {
            unsafe { write_uniform_buffer(device, *set, 0, buffer.buffer, 0, size) };
        }

        Ok(())
    }

    /// Identity used for pipeline compatibility checks.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of frame slots.
    pub fn frames(&self) -> usize {
        self.uniforms.len()
    }

    /// Set layouts for deriving pipeline layouts.
    pub fn layouts(&self) -> &[vk::DescriptorSetLayout] {
        std::slice::from_ref(&self.layout)
    }

    /// Copy `ubo` into the uniform buffer of `frame_index`.
    ///
    /// The slot's previous command buffer must have completed.
    pub fn update_ubo(&self, frame_index: usize, ubo: &U) -> Result<()> {
        let buffer = self
            .uniforms
            .get(frame_index)
            .ok_or(GpuError::FrameIndexOutOfRange {
                index: frame_index,
                frames: self.uniforms.len(),
            })?;

        buffer.write(std::slice::from_ref(ubo))
    }

    /// Bind the set of `frame_index` at set 0.
    ///
    /// # Safety
    /// `cmd` must be recording and `layout` must be derived from
    /// [`layouts`](Self::layouts).
    pub unsafe fn bind(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        frame_index: usize,
    ) -> Result<()> {
        let set = self
            .sets
            .get(frame_index)
            .ok_or(GpuError::FrameIndexOutOfRange {
                index: frame_index,
                frames: self.sets.len(),
            })?;

        unsafe { device.cmd_bind_descriptor_sets(cmd, bind_point, layout, 0, &[*set], &[]) };
        Ok(())
    }

    /// Free uniform buffers, then the pool (and its sets), then the layout.
    ///
    /// # Safety
    /// The device must be idle with respect to this set.
    pub unsafe fn destroy(&mut self, device: &ash::Device, allocator: &mut GpuAllocator) -> Result<()> {
        for buffer in &mut self.uniforms {
            allocator.free_buffer(buffer)?;
        }
        self.uniforms.clear();
        self.sets.clear();

        if self.pool.handle() != vk::DescriptorPool::null() {
            unsafe { self.pool.destroy(device) };
            self.pool = DescriptorPool {
                pool: vk::DescriptorPool::null(),
            };
        }
        if self.layout != vk::DescriptorSetLayout::null() {
            unsafe { device.destroy_descriptor_set_layout(self.layout, None) };
            self.layout = vk::DescriptorSetLayout::null();
        }

        tracing::debug!("Destroyed descriptor set {}", self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RenderDevice;
    use crate::headless::HeadlessDevice;

    #[test]
    fn uniform_binding_shape() {
        let builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);

        assert_eq!(builder.bindings.len(), 1);
        let binding = &builder.bindings[0];
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert!(binding.stage_flags.contains(vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn ids_are_unique() {
        let a = NEXT_DESCRIPTOR_SET_ID.fetch_add(1, Ordering::Relaxed);
        let b = NEXT_DESCRIPTOR_SET_ID.fetch_add(1, Ordering::Relaxed);
        assert_ne!(a, b);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn uniform_updates_are_per_frame() {
        let device = HeadlessDevice::new(4, 4, 2).unwrap();
        let mut allocator = device.allocator().lock();
        let mut set =
            unsafe { DescriptorSet::<[f32; 4]>::new(device.device(), &mut allocator, 2).unwrap() };
        let mut other =
            unsafe { DescriptorSet::<[f32; 4]>::new(device.device(), &mut allocator, 2).unwrap() };

        assert_eq!(set.frames(), 2);
        assert_eq!(set.layouts().len(), 1);
        assert_ne!(set.id(), other.id());

        set.update_ubo(0, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        set.update_ubo(1, &[5.0, 6.0, 7.0, 8.0]).unwrap();
        assert_eq!(set.uniforms[1].read::<[f32; 4]>(1).unwrap(), vec![[5.0, 6.0, 7.0, 8.0]]);
        assert!(matches!(
            set.update_ubo(2, &[0.0; 4]),
            Err(GpuError::FrameIndexOutOfRange { index: 2, frames: 2 })
        ));

        unsafe {
            set.destroy(device.device(), &mut allocator).unwrap();
            other.destroy(device.device(), &mut allocator).unwrap();
        }
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn zero_frames_is_rejected() {
        let device = HeadlessDevice::new(4, 4, 1).unwrap();
        let result = unsafe {
            DescriptorSet::<[f32; 4]>::new(device.device(), &mut device.allocator().lock(), 0)
        };
        assert!(matches!(result, Err(GpuError::InvalidState(_))));
    }
}
