use std::sync::Arc;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use glam::{Mat4, Vec3, Vec4};
use winit::keyboard::{Key, NamedKey};
use kindle::app::config::AppConfig;
use kindle::app::input_state::InputState;
use kindle::renderer::deletion_queue::DeletionQueue;
use kindle::renderer::resources::buffer::GpuBuffer;
use kindle::renderer::resources::descriptor::{
    write_buffer, DescriptorAllocator, DescriptorSetLayoutBuilder, PoolSizeRatio,
};
use kindle::renderer::resources::image::GpuImage;
use kindle::renderer::resources::pipeline::{
    create_pipeline_layout, dispatch_size, push_constant_range, ComputePipelineDesc,
    GraphicsPipelineDesc, Pipeline, ShaderStageDesc,
};
use kindle::renderer::resources::shader::Shader;
use kindle::renderer::resources::MemoryAllocator;
use kindle::{App, AppControl, AppHandler, Frame, Renderer};

/// Workgroup edge of `cs_main` in gradient.wgsl
const GRADIENT_LOCAL_SIZE: u32 = 16;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FrameUniforms {
    transform: Mat4,
    tint: Vec4,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BackgroundParams {
    color_top: Vec4,
    color_bottom: Vec4,
}

/// GPU objects owned by the demo, released in field order
struct DemoResources {
    background: Pipeline,
    triangle: Pipeline,
    uniform_layout: vk::DescriptorSetLayout,
    /// One pool per ring slot, reset when the slot comes around again
    frame_allocators: Vec<DescriptorAllocator>,
    frame_sets: Vec<vk::DescriptorSet>,
    memory: MemoryAllocator,
    device: Arc<ash::Device>,
    layouts: DeletionQueue,
}

#[derive(Default)]
struct Demo {
    elapsed: f32,
    resources: Option<DemoResources>,
}

impl Demo {
    fn create_resources(renderer: &Renderer) -> Result<DemoResources> {
        let device = renderer.device().clone();
        let mut layouts = DeletionQueue::new();

        let uniform_layout = DescriptorSetLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .build(&device, vk::ShaderStageFlags::VERTEX)?;
        {
            let device = device.clone();
            layouts.push_back(
                move || unsafe { device.destroy_descriptor_set_layout(uniform_layout, None) },
                "demo descriptor set layout",
            );
        }
        let triangle_layout = create_pipeline_layout(&device, &[uniform_layout], &[])?;
        {
            let device = device.clone();
            layouts.push_back(
                move || unsafe { device.destroy_pipeline_layout(triangle_layout, None) },
                "demo triangle pipeline layout",
            );
        }
        let background_layout = create_pipeline_layout(
            &device,
            &[renderer.draw_image_layout()],
            &[push_constant_range::<BackgroundParams>(vk::ShaderStageFlags::COMPUTE)],
        )?;
        {
            let device = device.clone();
            layouts.push_back(
                move || unsafe { device.destroy_pipeline_layout(background_layout, None) },
                "demo background pipeline layout",
            );
        }

        // Modules are only needed until the pipelines exist
        let gradient = Shader::load("gradient", device.clone())?;
        let background = ComputePipelineDesc {
            stage: ShaderStageDesc::new(vk::ShaderStageFlags::COMPUTE, gradient.module, "cs_main")?,
            layout: background_layout,
        }
        .build(device.clone())?;

        let shader = Shader::load("triangle", device.clone())?;
        let triangle = GraphicsPipelineDesc {
            stages: vec![
                ShaderStageDesc::new(vk::ShaderStageFlags::VERTEX, shader.module, "vs_main")?,
                ShaderStageDesc::new(vk::ShaderStageFlags::FRAGMENT, shader.module, "fs_main")?,
            ],
            color_attachment_format: renderer.draw_format(),
            layout: triangle_layout,
            ..Default::default()
        }
        .build(device.clone())?;

        let ring_size = renderer.config().frames_in_flight;
        let frame_allocators = (0..ring_size)
            .map(|_| {
                DescriptorAllocator::init(
                    device.clone(),
                    1,
                    &[PoolSizeRatio {
                        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                        ratio: 1.0,
                    }],
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DemoResources {
            background,
            triangle,
            uniform_layout,
            frame_allocators,
            frame_sets: vec![vk::DescriptorSet::null(); ring_size],
            memory: renderer.allocator()?,
            device,
            layouts,
        })
    }
}

impl AppHandler for Demo {
    fn init(&mut self, renderer: &mut Renderer) -> Result<()> {
        log::info!("Demo running on {}", renderer.device_name());

        // Clear the draw target once before the first frame
        let draw_image = renderer.draw_image().image;
        renderer.immediate_submit(|cmd, device| {
            GpuImage::transition(
                device,
                cmd,
                draw_image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
            );
            let range = vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            };
            unsafe {
                device.cmd_clear_color_image(
                    cmd,
                    draw_image,
                    vk::ImageLayout::GENERAL,
                    &vk::ClearColorValue::default(),
                    &[range],
                );
            }
            Ok(())
        })?;

        self.resources = Some(Self::create_resources(renderer)?);
        Ok(())
    }

    fn tick(&mut self, control: &mut AppControl, input: &InputState, dt: f32) -> Result<()> {
        if input.key_just_pressed(&Key::Named(NamedKey::Escape)) {
            control.exit();
        }
        self.elapsed += dt;
        Ok(())
    }

    fn pre_render(&mut self, frame: &mut Frame<'_>, _dt: f32) -> Result<()> {
        let resources = self.resources.as_mut().ok_or_eyre("Demo resources missing")?;
        let extent = frame.draw_image.extent;
        let aspect = extent.height as f32 / extent.width.max(1) as f32;

        let uniforms = FrameUniforms {
            transform: Mat4::from_scale(Vec3::new(aspect, 1.0, 1.0))
                * Mat4::from_rotation_z(self.elapsed),
            tint: Vec4::ONE,
        };

        // This slot's previous frame has retired, so its set can be recycled
        let allocator = &resources.frame_allocators[frame.slot];
        allocator.reset()?;

        let mut buffer = GpuBuffer::new(
            size_of::<FrameUniforms>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            &format!("Frame {} uniforms", frame.frame_number),
            resources.memory.clone(),
            resources.device.clone(),
        )?;
        buffer.write(&[uniforms], 0)?;

        let set = allocator.allocate(resources.uniform_layout)?;
        write_buffer(
            frame.device,
            set,
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            buffer.buffer,
            buffer.size,
        );
        resources.frame_sets[frame.slot] = set;

        frame.defer_release(move || drop(buffer), "frame uniforms");
        Ok(())
    }

    fn render(&mut self, frame: &mut Frame<'_>, _dt: f32) -> Result<()> {
        let resources = self.resources.as_ref().ok_or_eyre("Demo resources missing")?;
        let device = frame.device;
        let cmd = frame.cmd;
        let image = frame.draw_image;
        let extent = image.extent_2d();

        let top = hue_to_rgb(self.elapsed * 0.1) * 0.4;
        let params = BackgroundParams {
            color_top: top.extend(1.0),
            color_bottom: (top * 0.15).extend(1.0),
        };
        let (groups_x, groups_y) = dispatch_size(extent, GRADIENT_LOCAL_SIZE);
        resources.background.bind(cmd);
        resources.background.bind_descriptor_sets(cmd, 0, &[frame.draw_image_set]);
        resources.background.push_constants(cmd, vk::ShaderStageFlags::COMPUTE, &params);
        unsafe {
            device.cmd_dispatch(cmd, groups_x, groups_y, 1);
        }

        // Also orders the compute writes before the triangle is blended on top
        GpuImage::transition(
            device,
            cmd,
            image.image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(image.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_set_viewport(cmd, 0, &[vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            }]);
            device.cmd_set_scissor(cmd, 0, &[vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            }]);
        }
        resources.triangle.bind(cmd);
        resources.triangle.bind_descriptor_sets(cmd, 0, &[resources.frame_sets[frame.slot]]);
        unsafe {
            device.cmd_draw(cmd, 3, 1, 0, 0);
            device.cmd_end_rendering(cmd);
        }

        GpuImage::transition(
            device,
            cmd,
            image.image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::GENERAL,
        );
        Ok(())
    }

    fn shutdown(&mut self, _renderer: &mut Renderer) {
        if self.resources.take().is_some() {
            log::info!("Demo resources released after {:.1}s", self.elapsed);
        }
    }
}

fn hue_to_rgb(hue: f32) -> Vec3 {
    let h = hue.rem_euclid(1.0) * 6.0;
    let channel = |offset: f32| (((h + offset) % 6.0 - 3.0).abs() - 1.0).clamp(0.0, 1.0);
    Vec3::new(channel(0.0), channel(4.0), channel(2.0))
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let mut config = AppConfig::default();
    config.window.title = "kindle demo".into();
    config.render.app_name = "kindle demo".into();

    let mut app = App::new(config, Demo::default());
    app.initialize()?;
    app.run()?;

    Ok(())
}
