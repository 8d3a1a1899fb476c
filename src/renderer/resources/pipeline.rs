use std::ffi::CString;
use std::sync::Arc;
use ash::vk;
use bytemuck::Pod;
use color_eyre::eyre::eyre;
use color_eyre::Result;

pub struct ShaderStageDesc {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: CString,
}

impl ShaderStageDesc {
    pub fn new(stage: vk::ShaderStageFlags, module: vk::ShaderModule, entry_point: &str) -> Result<Self> {
        Ok(Self {
            stage,
            module,
            entry_point: CString::new(entry_point)?,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    #[default]
    Disabled,
    /// Standard transparency, draw after opaque geometry
    Alpha,
    Additive,
}

/// Every piece of state a graphics pipeline for dynamic rendering is built from.
/// Viewport and scissor are always dynamic.
pub struct GraphicsPipelineDesc {
    pub stages: Vec<ShaderStageDesc>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub blending: BlendMode,
    pub color_attachment_format: vk::Format,
    pub depth_attachment_format: vk::Format,
    /// `None` disables depth testing and writes
    pub depth_test: Option<vk::CompareOp>,
    pub layout: vk::PipelineLayout,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            blending: BlendMode::Disabled,
            color_attachment_format: vk::Format::UNDEFINED,
            depth_attachment_format: vk::Format::UNDEFINED,
            depth_test: None,
            layout: vk::PipelineLayout::null(),
        }
    }
}

impl GraphicsPipelineDesc {
    /// Rejects combinations the driver would refuse or that cannot draw anything
    pub fn validate(&self) -> Result<()> {
        if self.layout == vk::PipelineLayout::null() {
            return Err(eyre!("Graphics pipeline has no layout"));
        }
        if !self.stages.iter().any(|s| s.stage == vk::ShaderStageFlags::VERTEX) {
            return Err(eyre!("Graphics pipeline has no vertex stage"));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.module == vk::ShaderModule::null() {
                return Err(eyre!("Shader stage {:?} has no module", stage.stage));
            }
            if stage.entry_point.as_bytes().is_empty() {
                return Err(eyre!("Shader stage {:?} has no entry point", stage.stage));
            }
            if self.stages[..i].iter().any(|other| other.stage == stage.stage) {
                return Err(eyre!("Shader stage {:?} given more than once", stage.stage));
            }
        }
        if self.color_attachment_format == vk::Format::UNDEFINED {
            return Err(eyre!("Graphics pipeline has no color attachment format"));
        }
        if self.depth_test.is_some() && self.depth_attachment_format == vk::Format::UNDEFINED {
            return Err(eyre!("Depth testing needs a depth attachment format"));
        }
        Ok(())
    }

    pub fn build(&self, device: Arc<ash::Device>) -> Result<Pipeline> {
        self.validate()?;

        let shader_stages = self.stages
            .iter()
            .map(|stage| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage.stage)
                    .module(stage.module)
                    .name(&stage.entry_point)
            })
            .collect::<Vec<_>>();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false);
        let depth_stencil = match self.depth_test {
            Some(compare) => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(true)
                .depth_write_enable(true)
                .depth_compare_op(compare),
            None => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(false)
                .depth_write_enable(false)
                .depth_compare_op(vk::CompareOp::ALWAYS),
        }
        .min_depth_bounds(0.0)
        .max_depth_bounds(1.0);

        let color_blend_attachments = [color_blend_attachment(self.blending)];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_info = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let color_formats = [self.color_attachment_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(self.depth_attachment_format);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .push_next(&mut rendering_info)
            .stages(&shader_stages)
            .layout(self.layout)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic_info);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, err)| eyre!("Failed to create graphics pipeline: {}", err))?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| eyre!("Driver returned no graphics pipeline"))?;

        Ok(Pipeline {
            pipeline,
            layout: self.layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            device,
        })
    }
}

/// A single compute stage and the layout it runs with
pub struct ComputePipelineDesc {
    pub stage: ShaderStageDesc,
    pub layout: vk::PipelineLayout,
}

impl ComputePipelineDesc {
    pub fn validate(&self) -> Result<()> {
        if self.layout == vk::PipelineLayout::null() {
            return Err(eyre!("Compute pipeline has no layout"));
        }
        if self.stage.stage != vk::ShaderStageFlags::COMPUTE {
            return Err(eyre!("Compute pipeline given a {:?} stage", self.stage.stage));
        }
        if self.stage.module == vk::ShaderModule::null() {
            return Err(eyre!("Compute stage has no module"));
        }
        if self.stage.entry_point.as_bytes().is_empty() {
            return Err(eyre!("Compute stage has no entry point"));
        }
        Ok(())
    }

    pub fn build(&self, device: Arc<ash::Device>) -> Result<Pipeline> {
        self.validate()?;

        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(self.stage.module)
            .name(&self.stage.entry_point);
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .layout(self.layout)
            .stage(stage_info);

        let pipelines = unsafe {
            device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, err)| eyre!("Failed to create compute pipeline: {}", err))?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| eyre!("Driver returned no compute pipeline"))?;

        Ok(Pipeline {
            pipeline,
            layout: self.layout,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            device,
        })
    }
}

/// Workgroup counts that cover `extent` with `local_size` x `local_size` groups
pub fn dispatch_size(extent: vk::Extent2D, local_size: u32) -> (u32, u32) {
    (extent.width.div_ceil(local_size), extent.height.div_ceil(local_size))
}

fn color_blend_attachment(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let attachment = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    match mode {
        BlendMode::Disabled => attachment.blend_enable(false),
        BlendMode::Alpha => attachment
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD),
        BlendMode::Additive => attachment
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::DST_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD),
    }
}

/// Pipeline object built from a [`GraphicsPipelineDesc`] or a [`ComputePipelineDesc`].
/// The layout stays owned by whoever created it.
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
    device: Arc<ash::Device>,
}

impl Pipeline {
    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_bind_pipeline(cmd, self.bind_point, self.pipeline);
        }
    }

    pub fn bind_descriptor_sets(&self, cmd: vk::CommandBuffer, first_set: u32, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                self.bind_point,
                self.layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    /// Pushes `data` at offset 0 of the layout's push constant range
    pub fn push_constants<T: Pod>(&self, cmd: vk::CommandBuffer, stages: vk::ShaderStageFlags, data: &T) {
        unsafe {
            self.device.cmd_push_constants(cmd, self.layout, stages, 0, bytemuck::bytes_of(data));
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

/// Push constant range holding one `T` at offset 0
pub fn push_constant_range<T: Pod>(stages: vk::ShaderStageFlags) -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: stages,
        offset: 0,
        size: size_of::<T>() as u32,
    }
}

pub fn create_pipeline_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);
    Ok(unsafe { device.create_pipeline_layout(&layout_info, None)? })
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use super::*;

    fn complete_desc() -> GraphicsPipelineDesc {
        let module = vk::ShaderModule::from_raw(1);
        GraphicsPipelineDesc {
            stages: vec![
                ShaderStageDesc::new(vk::ShaderStageFlags::VERTEX, module, "vs_main").unwrap(),
                ShaderStageDesc::new(vk::ShaderStageFlags::FRAGMENT, module, "fs_main").unwrap(),
            ],
            color_attachment_format: vk::Format::R16G16B16A16_SFLOAT,
            layout: vk::PipelineLayout::from_raw(2),
            ..Default::default()
        }
    }

    #[test]
    fn complete_description_validates() {
        assert!(complete_desc().validate().is_ok());
    }

    #[test]
    fn default_description_is_rejected() {
        assert!(GraphicsPipelineDesc::default().validate().is_err());
    }

    #[test]
    fn vertex_stage_is_required() {
        let mut desc = complete_desc();
        desc.stages.retain(|s| s.stage != vk::ShaderStageFlags::VERTEX);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn duplicate_stages_are_rejected() {
        let mut desc = complete_desc();
        desc.stages.push(
            ShaderStageDesc::new(vk::ShaderStageFlags::FRAGMENT, vk::ShaderModule::from_raw(3), "other").unwrap(),
        );
        assert!(desc.validate().is_err());
    }

    #[test]
    fn depth_test_needs_depth_format() {
        let mut desc = complete_desc();
        desc.depth_test = Some(vk::CompareOp::LESS_OR_EQUAL);
        assert!(desc.validate().is_err());

        desc.depth_attachment_format = vk::Format::D32_SFLOAT;
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn missing_color_format_is_rejected() {
        let mut desc = complete_desc();
        desc.color_attachment_format = vk::Format::UNDEFINED;
        assert!(desc.validate().is_err());
    }

    fn compute_desc() -> ComputePipelineDesc {
        ComputePipelineDesc {
            stage: ShaderStageDesc::new(vk::ShaderStageFlags::COMPUTE, vk::ShaderModule::from_raw(4), "cs_main")
                .unwrap(),
            layout: vk::PipelineLayout::from_raw(5),
        }
    }

    #[test]
    fn compute_description_validates() {
        assert!(compute_desc().validate().is_ok());
    }

    #[test]
    fn compute_pipeline_needs_a_compute_stage_and_layout() {
        let mut desc = compute_desc();
        desc.stage.stage = vk::ShaderStageFlags::FRAGMENT;
        assert!(desc.validate().is_err());

        let mut desc = compute_desc();
        desc.layout = vk::PipelineLayout::null();
        assert!(desc.validate().is_err());

        let mut desc = compute_desc();
        desc.stage.module = vk::ShaderModule::null();
        assert!(desc.validate().is_err());
    }

    #[test]
    fn dispatch_covers_partial_workgroups() {
        assert_eq!(dispatch_size(vk::Extent2D { width: 1280, height: 720 }, 16), (80, 45));
        assert_eq!(dispatch_size(vk::Extent2D { width: 1281, height: 1 }, 16), (81, 1));
        assert_eq!(dispatch_size(vk::Extent2D { width: 0, height: 0 }, 16), (0, 0));
    }

    #[test]
    fn push_constant_range_matches_type_size() {
        let range = push_constant_range::<[f32; 8]>(vk::ShaderStageFlags::COMPUTE);
        assert_eq!((range.offset, range.size), (0, 32));
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn blending_modes_set_blend_enable() {
        assert_eq!(color_blend_attachment(BlendMode::Disabled).blend_enable, vk::FALSE);
        assert_eq!(color_blend_attachment(BlendMode::Alpha).blend_enable, vk::TRUE);
        assert_eq!(
            color_blend_attachment(BlendMode::Alpha).dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        );
    }
}
