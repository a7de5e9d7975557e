//! Shader module ownership.

use crate::error::{GpuError, Result};
use ash::vk;
use keel_shaders::ShaderArtifact;

/// Shader modules created from embedded artifacts.
///
/// Owned by the renderer and destroyed after every pipeline that uses them.
#[derive(Default)]
pub struct ShaderModules {
    modules: Vec<(&'static str, vk::ShaderModule)>,
}

impl ShaderModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `artifact` and create a module from it.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn create(
        &mut self,
        device: &ash::Device,
        artifact: &ShaderArtifact,
    ) -> Result<vk::ShaderModule> {
        let code = artifact.words()?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

        let module = unsafe { device.create_shader_module(&create_info, None) }
            .map_err(|e| GpuError::ShaderCompilation(format!("{}: {e}", artifact.name)))?;

        tracing::debug!(
            "Created shader module '{}' ({} bytes)",
            artifact.name,
            artifact.bytes.len()
        );
        self.modules.push((artifact.name, module));
        Ok(module)
    }

    /// Look up a module by source file name.
    pub fn get(&self, name: &str) -> Option<vk::ShaderModule> {
        self.modules
            .iter()
            .find(|(module_name, _)| *module_name == name)
            .map(|(_, module)| *module)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Destroy every module.
    ///
    /// # Safety
    /// No pipeline creation using these modules may be in progress.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for (name, module) in self.modules.drain(..) {
            unsafe { device.destroy_shader_module(module, None) };
            tracing::debug!("Destroyed shader module '{name}'");
        }
    }
}

/// Stage description with the `main` entry point.
pub fn stage_info(
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
) -> vk::PipelineShaderStageCreateInfo<'static> {
    vk::PipelineShaderStageCreateInfo::default()
        .stage(stage)
        .module(module)
        .name(c"main")
}
