//! Command pool and the fixed command-buffer-per-image table.
//!
//! Every buffer is recorded once, before the frame loop starts, and replayed
//! unchanged each time its image is acquired.

use std::sync::Arc;

use ash::{vk, Device};
use tracing::info;

use crate::error::PresenterError;

pub struct CommandTable {
    device: Arc<Device>,
    pool: vk::CommandPool,
    pub buffers: Vec<vk::CommandBuffer>,
}

impl CommandTable {
    /// Allocates one primary buffer per framebuffer and prerecords the fixed
    /// render step for each: begin the pass with a black clear, bind the
    /// pipeline, draw the three-vertex triangle, end.
    pub fn new(
        device: Arc<Device>,
        queue_family_index: u32,
        render_pass: vk::RenderPass,
        framebuffers: &[vk::Framebuffer],
        pipeline: vk::Pipeline,
        extent: vk::Extent2D,
    ) -> Result<Self, PresenterError> {
        let pool_create_info =
            vk::CommandPoolCreateInfo::builder().queue_family_index(queue_family_index);
        let pool = unsafe { device.create_command_pool(&pool_create_info, None)? };

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(framebuffers.len() as u32);

        let buffers = match unsafe { device.allocate_command_buffers(&allocate_info) } {
            Ok(buffers) => buffers,
            Err(result) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(PresenterError::Vk(result));
            }
        };

        let table = Self {
            device,
            pool,
            buffers,
        };
        table.record(render_pass, framebuffers, pipeline, extent)?;

        info!("Recorded {} command buffers", table.buffers.len());
        Ok(table)
    }

    fn record(
        &self,
        render_pass: vk::RenderPass,
        framebuffers: &[vk::Framebuffer],
        pipeline: vk::Pipeline,
        extent: vk::Extent2D,
    ) -> Result<(), PresenterError> {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 0.0],
            },
        }];

        for (&buffer, &framebuffer) in self.buffers.iter().zip(framebuffers) {
            let begin_info = vk::CommandBufferBeginInfo::builder();

            let render_pass_begin = vk::RenderPassBeginInfo::builder()
                .render_pass(render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);

            unsafe {
                self.device.begin_command_buffer(buffer, &begin_info)?;
                self.device.cmd_begin_render_pass(
                    buffer,
                    &render_pass_begin,
                    vk::SubpassContents::INLINE,
                );
                self.device
                    .cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
                self.device.cmd_draw(buffer, 3, 1, 0, 0);
                self.device.cmd_end_render_pass(buffer);
                self.device.end_command_buffer(buffer)?;
            }
        }

        Ok(())
    }
}

impl Drop for CommandTable {
    fn drop(&mut self) {
        // Destroying the pool frees the buffers allocated from it.
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}
