//! Swapchain ownership: the image ring, one view per image, and one
//! framebuffer per view, torn down in a single atomic operation.

use std::sync::Arc;

use ash::{vk, Device};
use tracing::info;

use crate::error::PresenterError;
use crate::surface::SurfaceConfiguration;

/// The swapchain plus everything created against its images.
///
/// The presentation engine owns the images themselves; this struct owns the
/// `vk::SwapchainKHR`, the views and the framebuffers, and destroys them in
/// reverse dependency order on drop. The caller must drop `Swapchain` before
/// destroying the device.
pub struct Swapchain {
    device: Arc<Device>,
    pub loader: ash::extensions::khr::Swapchain,
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    /// Builds the swapchain for a negotiated configuration and creates one
    /// view and one framebuffer per image, in the order the device reports
    /// the images.
    ///
    /// Sharing is exclusive to the single selected queue family; there is
    /// exactly one queue in this design, so no cross-queue ownership
    /// transfer ever happens.
    pub fn new(
        instance: &ash::Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        queue_family_index: u32,
        config: &SurfaceConfiguration,
        render_pass: vk::RenderPass,
    ) -> Result<Self, PresenterError> {
        let loader = ash::extensions::khr::Swapchain::new(instance, &device);

        let queue_family_indices = [queue_family_index];
        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(config.min_image_count)
            .image_format(config.format.format)
            .image_color_space(config.format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let handle = unsafe { loader.create_swapchain(&swapchain_create_info, None)? };

        let images = unsafe { loader.get_swapchain_images(handle)? };

        let image_views = create_views(&images, config.format.format, |create_info| unsafe {
            device.create_image_view(create_info, None)
        })?;

        let mut framebuffers = Vec::with_capacity(image_views.len());
        for &view in &image_views {
            let attachments = [view];
            let framebuffer_create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(config.extent.width)
                .height(config.extent.height)
                .layers(1);

            let framebuffer =
                unsafe { device.create_framebuffer(&framebuffer_create_info, None)? };
            framebuffers.push(framebuffer);
        }

        info!(
            "Swapchain created with {} images ({}x{}, {:?})",
            images.len(),
            config.extent.width,
            config.extent.height,
            config.format.format
        );

        Ok(Self {
            device,
            loader,
            handle,
            format: config.format.format,
            extent: config.extent,
            images,
            image_views,
            framebuffers,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

/// One 2D color view per image, device order preserved, every view carrying
/// the configuration format. Generic over the create call so the fan-out is
/// testable.
fn create_views<F>(
    images: &[vk::Image],
    format: vk::Format,
    mut create: F,
) -> Result<Vec<vk::ImageView>, PresenterError>
where
    F: FnMut(&vk::ImageViewCreateInfo) -> Result<vk::ImageView, vk::Result>,
{
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        views.push(create(&create_info)?);
    }
    Ok(views)
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}
