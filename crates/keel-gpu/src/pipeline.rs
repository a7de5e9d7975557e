//! Graphics pipeline creation.
//!
//! Every pipeline shares one fixed-function policy: triangle lists, filled
//! polygons, alpha blending, dynamic viewport and scissor, and dynamic
//! rendering (no render pass objects). Back-face culling and depth
//! test/write are the only per-pipeline toggles.

use crate::descriptors::DescriptorSet;
use crate::error::{GpuError, Result};
use crate::shader::stage_info;
use ash::vk;
use bytemuck::Pod;

/// One vertex attribute at binding 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub offset: u32,
    pub format: vk::Format,
}

impl VertexAttribute {
    pub const fn new(location: u32, offset: u32, format: vk::Format) -> Self {
        Self {
            location,
            offset,
            format,
        }
    }
}

/// Vertex input layout: a per-vertex binding stride and its attributes.
///
/// A zero stride means the pipeline takes no vertex input at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayoutDesc {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayoutDesc {
    pub fn new(stride: u32, attributes: Vec<VertexAttribute>) -> Self {
        Self { stride, attributes }
    }

    /// Layout for shaders that synthesize their vertices.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Binding 0 description, if the layout has vertex data.
    pub fn binding(&self) -> Option<vk::VertexInputBindingDescription> {
        (self.stride > 0).then(|| {
            vk::VertexInputBindingDescription::default()
                .binding(0)
                .stride(self.stride)
                .input_rate(vk::VertexInputRate::VERTEX)
        })
    }

    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .map(|attribute| {
                vk::VertexInputAttributeDescription::default()
                    .binding(0)
                    .location(attribute.location)
                    .format(attribute.format)
                    .offset(attribute.offset)
            })
            .collect()
    }
}

/// A vertex type usable with [`PipelineBuilder`].
pub trait VertexLayout {
    fn layout() -> VertexLayoutDesc;
}

/// Fixed-function state derived from the culling and depth toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineState {
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
}

impl PipelineState {
    pub fn from_flags(enable_culling: bool, enable_depth: bool) -> Self {
        Self {
            cull_mode: if enable_culling {
                vk::CullModeFlags::BACK
            } else {
                vk::CullModeFlags::NONE
            },
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: enable_depth,
            depth_write: enable_depth,
            depth_compare_op: vk::CompareOp::LESS,
        }
    }

    pub fn culling(&self) -> bool {
        self.cull_mode != vk::CullModeFlags::NONE
    }
}

pub fn rasterization_state(state: &PipelineState) -> vk::PipelineRasterizationStateCreateInfo<'static> {
    vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(state.cull_mode)
        .front_face(state.front_face)
        .depth_bias_enable(false)
        .line_width(1.0)
}

pub fn depth_stencil_state(state: &PipelineState) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
    vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(state.depth_test)
        .depth_write_enable(state.depth_write)
        .depth_compare_op(state.depth_compare_op)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false)
}

/// Straight alpha blending on color; source alpha replaces destination alpha.
pub fn color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

/// Builder for a [`GraphicsPipeline`].
pub struct PipelineBuilder {
    name: &'static str,
    vertex_layout: VertexLayoutDesc,
    stages: Vec<vk::PipelineShaderStageCreateInfo<'static>>,
    enable_culling: bool,
    enable_depth: bool,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
}

impl PipelineBuilder {
    /// Start a pipeline for the vertex type `V`.
    pub fn new<V: VertexLayout>(name: &'static str) -> Self {
        Self::with_layout(name, V::layout())
    }

    pub fn with_layout(name: &'static str, vertex_layout: VertexLayoutDesc) -> Self {
        Self {
            name,
            vertex_layout,
            stages: Vec::new(),
            enable_culling: false,
            enable_depth: false,
            color_format: vk::Format::UNDEFINED,
            depth_format: None,
        }
    }

    /// Add a shader stage with the `main` entry point.
    pub fn stage(mut self, stage: vk::ShaderStageFlags, module: vk::ShaderModule) -> Self {
        self.stages.push(stage_info(module, stage));
        self
    }

    pub fn culling(mut self, enable: bool) -> Self {
        self.enable_culling = enable;
        self
    }

    pub fn depth(mut self, enable: bool) -> Self {
        self.enable_depth = enable;
        self
    }

    /// Attachment formats of the render target.
    pub fn formats(mut self, color: vk::Format, depth: Option<vk::Format>) -> Self {
        self.color_format = color;
        self.depth_format = depth;
        self
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_flags(self.enable_culling, self.enable_depth)
    }

    /// Create the pipeline layout from `descriptors` and then the pipeline.
    ///
    /// # Safety
    /// The device must be valid and every stage module must be alive.
    pub unsafe fn build<U: Pod>(
        &self,
        device: &ash::Device,
        descriptors: &DescriptorSet<U>,
    ) -> Result<GraphicsPipeline> {
        if self.enable_depth && self.depth_format.is_none() {
            return Err(GpuError::MissingDepthFormat);
        }
        if self.stages.is_empty() {
            return Err(GpuError::PipelineCreation(format!(
                "Pipeline '{}' has no shader stages",
                self.name
            )));
        }

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(descriptors.layouts());
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| GpuError::PipelineCreation(format!("{}: {e}", self.name)))?;

        match unsafe { self.create_pipeline(device, layout) } {
            Ok(pipeline) => {
                tracing::debug!(
                    "Created pipeline '{}' (culling: {}, depth: {})",
                    self.name,
                    self.enable_culling,
                    self.enable_depth
                );
                Ok(GraphicsPipeline {
                    name: self.name,
                    pipeline,
                    layout,
                    descriptor_set_id: descriptors.id(),
                    color_format: self.color_format,
                    depth_format: self.depth_format,
                    state: self.state(),
                })
            }
            Err(e) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(e)
            }
        }
    }

    unsafe fn create_pipeline(
        &self,
        device: &ash::Device,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let state = self.state();

        let bindings: Vec<_> = self.vertex_layout.binding().into_iter().collect();
        let attributes = self.vertex_layout.attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = rasterization_state(&state);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = depth_stencil_state(&state);

        let color_blend_attachments = [color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [self.color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);
        if let Some(depth_format) = self.depth_format {
            rendering_info = rendering_info.depth_attachment_format(depth_format);
        }

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&self.stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_pipelines, e)| GpuError::PipelineCreation(format!("{}: {e}", self.name)))?;

        pipelines
            .first()
            .copied()
            .ok_or_else(|| GpuError::PipelineCreation(format!("{}: no pipeline returned", self.name)))
    }
}

/// A built graphics pipeline and its layout.
pub struct GraphicsPipeline {
    name: &'static str,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    descriptor_set_id: u64,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    state: PipelineState,
}

impl GraphicsPipeline {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Identity of the descriptor set the layout was derived from.
    pub fn descriptor_set_id(&self) -> u64 {
        self.descriptor_set_id
    }

    /// Fail unless the render target matches the formats given at creation.
    pub fn check_formats(&self, color: vk::Format, depth: Option<vk::Format>) -> Result<()> {
        check_attachment_formats(
            (self.color_format, self.depth_format),
            (color, depth),
        )
    }

    /// Bind the pipeline and the frame's descriptor set.
    ///
    /// # Safety
    /// `cmd` must be recording inside a dynamic rendering scope.
    pub unsafe fn bind<U: Pod>(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        descriptors: &DescriptorSet<U>,
        frame_index: usize,
    ) -> Result<()> {
        if descriptors.id() != self.descriptor_set_id {
            return Err(GpuError::IncompatibleDescriptorSet {
                expected: self.descriptor_set_id,
                actual: descriptors.id(),
            });
        }

        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            descriptors.bind(
                device,
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                frame_index,
            )
        }
    }

    /// Destroy the pipeline, then its layout.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
        tracing::debug!("Destroyed pipeline '{}'", self.name);
    }
}

fn check_attachment_formats(
    pipeline: (vk::Format, Option<vk::Format>),
    target: (vk::Format, Option<vk::Format>),
) -> Result<()> {
    if pipeline.0 != target.0 {
        return Err(GpuError::AttachmentFormatMismatch {
            pipeline: pipeline.0,
            target: target.0,
        });
    }

    let or_undefined = |format: Option<vk::Format>| format.unwrap_or(vk::Format::UNDEFINED);
    if pipeline.1 != target.1 {
        return Err(GpuError::AttachmentFormatMismatch {
            pipeline: or_undefined(pipeline.1),
            target: or_undefined(target.1),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RenderDevice;
    use crate::headless::{HeadlessDevice, COLOR_FORMAT, DEPTH_FORMAT};
    use crate::shader::ShaderModules;

    #[test]
    fn flag_combinations() {
        for (culling, depth) in [(false, false), (true, false), (false, true), (true, true)] {
            let state = PipelineState::from_flags(culling, depth);
            let raster = rasterization_state(&state);
            let depth_stencil = depth_stencil_state(&state);

            let expected_cull = if culling {
                vk::CullModeFlags::BACK
            } else {
                vk::CullModeFlags::NONE
            };
            assert_eq!(raster.cull_mode, expected_cull, "culling={culling}");
            assert_eq!(raster.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
            assert_eq!(raster.polygon_mode, vk::PolygonMode::FILL);
            assert_eq!(raster.line_width, 1.0);
            assert_eq!(state.culling(), culling);

            let expected_depth = if depth { vk::TRUE } else { vk::FALSE };
            assert_eq!(depth_stencil.depth_test_enable, expected_depth, "depth={depth}");
            assert_eq!(depth_stencil.depth_write_enable, expected_depth, "depth={depth}");
            assert_eq!(depth_stencil.depth_compare_op, vk::CompareOp::LESS);
            assert_eq!(depth_stencil.stencil_test_enable, vk::FALSE);
            assert_eq!(depth_stencil.depth_bounds_test_enable, vk::FALSE);
        }
    }

    #[test]
    fn blending_is_alpha_over() {
        let blend = color_blend_attachment();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(blend.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(blend.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(blend.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn empty_layout_has_no_binding() {
        let layout = VertexLayoutDesc::empty();
        assert!(layout.binding().is_none());
        assert!(layout.attribute_descriptions().is_empty());
    }

    #[test]
    fn layout_descriptions() {
        let layout = VertexLayoutDesc::new(
            24,
            vec![
                VertexAttribute::new(0, 0, vk::Format::R32G32B32_SFLOAT),
                VertexAttribute::new(1, 12, vk::Format::R32G32B32_SFLOAT),
            ],
        );

        let binding = layout.binding().unwrap();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 24);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);

        let attributes = layout.attribute_descriptions();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[1].location, 1);
        assert_eq!(attributes[1].offset, 12);
        assert!(attributes.iter().all(|a| a.binding == 0));
    }

    #[test]
    fn builder_defaults() {
        let builder = PipelineBuilder::with_layout("test", VertexLayoutDesc::empty());
        assert_eq!(builder.state(), PipelineState::from_flags(false, false));

        let builder = builder.culling(true).depth(true);
        assert!(builder.state().culling());
        assert!(builder.state().depth_test);
    }

    #[test]
    fn attachment_formats() {
        let color = vk::Format::B8G8R8A8_SRGB;
        let depth = Some(vk::Format::D32_SFLOAT);

        assert!(check_attachment_formats((color, depth), (color, depth)).is_ok());
        assert!(check_attachment_formats((color, None), (color, None)).is_ok());

        assert!(matches!(
            check_attachment_formats((color, depth), (vk::Format::R8G8B8A8_UNORM, depth)),
            Err(GpuError::AttachmentFormatMismatch { .. })
        ));
        assert!(matches!(
            check_attachment_formats((color, depth), (color, None)),
            Err(GpuError::AttachmentFormatMismatch {
                target: vk::Format::UNDEFINED,
                ..
            })
        ));
    }

    fn position_color_layout() -> VertexLayoutDesc {
        VertexLayoutDesc::new(
            24,
            vec![
                VertexAttribute::new(0, 0, vk::Format::R32G32B32_SFLOAT),
                VertexAttribute::new(1, 12, vk::Format::R32G32B32_SFLOAT),
            ],
        )
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn build_every_flag_combination() {
        let device = HeadlessDevice::new(4, 4, 2).unwrap();
        let vk_device = device.device();
        let mut descriptors = unsafe {
            DescriptorSet::<[[f32; 4]; 13]>::new(vk_device, &mut device.allocator().lock(), 2)
                .unwrap()
        };
        let mut modules = ShaderModules::new();
        let vert = unsafe { modules.create(vk_device, &keel_shaders::simple_vert()).unwrap() };
        let frag = unsafe { modules.create(vk_device, &keel_shaders::simple_frag()).unwrap() };

        for (culling, depth) in [(false, false), (true, false), (false, true), (true, true)] {
            let pipeline = unsafe {
                PipelineBuilder::with_layout("combo", position_color_layout())
                    .stage(vk::ShaderStageFlags::VERTEX, vert)
                    .stage(vk::ShaderStageFlags::FRAGMENT, frag)
                    .culling(culling)
                    .depth(depth)
                    .formats(COLOR_FORMAT, Some(DEPTH_FORMAT))
                    .build(vk_device, &descriptors)
                    .unwrap()
            };

            assert_ne!(pipeline.handle(), vk::Pipeline::null());
            assert_eq!(*pipeline.state(), PipelineState::from_flags(culling, depth));
            assert_eq!(pipeline.descriptor_set_id(), descriptors.id());
            pipeline.check_formats(COLOR_FORMAT, Some(DEPTH_FORMAT)).unwrap();
            unsafe { pipeline.destroy(vk_device) };
        }

        // Depth testing needs a depth attachment
        let missing_depth = unsafe {
            PipelineBuilder::with_layout("no-depth", position_color_layout())
                .stage(vk::ShaderStageFlags::VERTEX, vert)
                .stage(vk::ShaderStageFlags::FRAGMENT, frag)
                .depth(true)
                .formats(COLOR_FORMAT, None)
                .build(vk_device, &descriptors)
        };
        assert!(matches!(missing_depth, Err(GpuError::MissingDepthFormat)));

        unsafe {
            modules.destroy(vk_device);
            descriptors
                .destroy(vk_device, &mut device.allocator().lock())
                .unwrap();
        }
    }
}
