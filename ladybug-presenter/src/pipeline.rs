//! Fixed-function graphics pipeline. All state here is a fixed description;
//! the only inputs that vary are the shader bytes, the render pass and the
//! negotiated extent.

use std::ffi::CString;
use std::sync::Arc;

use ash::{vk, Device};

use crate::error::PresenterError;
use crate::utils;

pub struct GraphicsPipeline {
    device: Arc<Device>,
    pub layout: vk::PipelineLayout,
    pub handle: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Builds the pipeline from one SPIR-V module carrying both the vertex
    /// and fragment `main` entry points. Viewport and scissor are fixed to
    /// the negotiated extent; nothing is dynamic, so the pipeline is only
    /// valid for the swapchain it was built against.
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        shader_spirv: &[u8],
    ) -> Result<Self, PresenterError> {
        let shader_module = utils::load_shader_module(&device, shader_spirv)?;

        let entry_point = CString::new("main")?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(shader_module)
                .name(&entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(shader_module)
                .name(&entry_point)
                .build(),
        ];

        // No vertex buffers; the triangle is generated in the shader.
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0)
            .build()];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments)
            .blend_constants([1.0, 1.0, 1.0, 1.0]);

        // No descriptor sets or push constants.
        let pipeline_layout_create_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = unsafe { device.create_pipeline_layout(&pipeline_layout_create_info, None)? };

        let pipeline_create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipeline_results = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_create_info],
                None,
            )
        };

        // The module is only needed while the pipeline is being created.
        unsafe {
            device.destroy_shader_module(shader_module, None);
        }

        let handle = match pipeline_results {
            Ok(pipelines) => pipelines.into_iter().next().ok_or_else(|| {
                PresenterError::Internal(
                    "create_graphics_pipelines returned no pipelines".to_string(),
                )
            })?,
            Err((_, result)) => {
                unsafe {
                    device.destroy_pipeline_layout(layout, None);
                }
                return Err(PresenterError::Vk(result));
            }
        };

        Ok(Self {
            device,
            layout,
            handle,
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
