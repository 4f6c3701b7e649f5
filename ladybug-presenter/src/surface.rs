//! Surface configuration negotiation.
//!
//! Resolves a format/present-mode/extent/image-count tuple that both the
//! selected device and the display compositor accept. Pure over the reported
//! capabilities so the rules are testable without a driver.

use ash::vk;
use tracing::info;

use crate::error::PresenterError;

/// The negotiated, immutable surface configuration a swapchain is built from.
///
/// Invariants: the extent lies within the surface's reported bounds, and the
/// format is one the device reported for this surface.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceConfiguration {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
}

/// Resolves a [`SurfaceConfiguration`] from the surface's reported
/// capabilities and present modes.
///
/// - Extent: when the surface reports the follow-window sentinel
///   (`current_extent.width == u32::MAX`), the requested extent is clamped
///   into the reported `[min, max]` bounds; otherwise the current extent is
///   used verbatim and the requested size is advisory only.
/// - Present mode: FIFO is the required baseline. The reported list is
///   scanned in order and the first FIFO entry accepted; absence is a hard
///   [`PresenterError::NoCompatiblePresentMode`], not a fallback.
/// - Image count: the reported minimum, taken directly.
pub fn negotiate(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    present_modes: &[vk::PresentModeKHR],
    format: vk::SurfaceFormatKHR,
    requested_extent: vk::Extent2D,
) -> Result<SurfaceConfiguration, PresenterError> {
    let extent = if capabilities.current_extent.width == u32::MAX {
        vk::Extent2D {
            width: requested_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: requested_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    } else {
        capabilities.current_extent
    };

    let present_mode = present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::FIFO)
        .ok_or(PresenterError::NoCompatiblePresentMode)?;

    info!(
        "Negotiated surface configuration: {:?} {:?}, {}x{}, {} images minimum",
        format.format, present_mode, extent.width, extent.height, capabilities.min_image_count
    );

    Ok(SurfaceConfiguration {
        format,
        present_mode,
        extent,
        min_image_count: capabilities.min_image_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(
        current: (u32, u32),
        min: (u32, u32),
        max: (u32, u32),
        min_image_count: u32,
    ) -> vk::SurfaceCapabilitiesKHR {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.current_extent = vk::Extent2D {
            width: current.0,
            height: current.1,
        };
        caps.min_image_extent = vk::Extent2D {
            width: min.0,
            height: min.1,
        };
        caps.max_image_extent = vk::Extent2D {
            width: max.0,
            height: max.1,
        };
        caps.min_image_count = min_image_count;
        caps
    }

    fn bgra_unorm() -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    const FIFO_ONLY: &[vk::PresentModeKHR] = &[vk::PresentModeKHR::FIFO];

    #[test]
    fn sentinel_extent_uses_the_clamped_request() {
        let caps = capabilities((u32::MAX, u32::MAX), (1, 1), (4096, 4096), 2);
        let config = negotiate(
            &caps,
            FIFO_ONLY,
            bgra_unorm(),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
        .unwrap();
        assert_eq!((config.extent.width, config.extent.height), (800, 600));
    }

    #[test]
    fn sentinel_extent_clamps_into_reported_bounds() {
        let caps = capabilities((u32::MAX, u32::MAX), (640, 480), (1920, 1080), 2);

        let too_small = negotiate(
            &caps,
            FIFO_ONLY,
            bgra_unorm(),
            vk::Extent2D {
                width: 100,
                height: 100,
            },
        )
        .unwrap();
        assert_eq!(
            (too_small.extent.width, too_small.extent.height),
            (640, 480)
        );

        let too_large = negotiate(
            &caps,
            FIFO_ONLY,
            bgra_unorm(),
            vk::Extent2D {
                width: 4000,
                height: 3000,
            },
        )
        .unwrap();
        assert_eq!(
            (too_large.extent.width, too_large.extent.height),
            (1920, 1080)
        );
    }

    #[test]
    fn reported_current_extent_wins_over_the_request() {
        let caps = capabilities((1280, 720), (1, 1), (4096, 4096), 2);
        let config = negotiate(
            &caps,
            FIFO_ONLY,
            bgra_unorm(),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
        .unwrap();
        assert_eq!((config.extent.width, config.extent.height), (1280, 720));
    }

    #[test]
    fn fifo_is_accepted_regardless_of_position() {
        let caps = capabilities((800, 600), (1, 1), (4096, 4096), 2);
        let modes = [
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
        ];
        let config = negotiate(
            &caps,
            &modes,
            bgra_unorm(),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
        .unwrap();
        assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn missing_fifo_is_a_hard_error() {
        let caps = capabilities((800, 600), (1, 1), (4096, 4096), 2);
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        let result = negotiate(
            &caps,
            &modes,
            bgra_unorm(),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert!(matches!(
            result,
            Err(PresenterError::NoCompatiblePresentMode)
        ));
    }

    #[test]
    fn minimum_image_count_is_taken_verbatim() {
        let caps = capabilities((800, 600), (1, 1), (4096, 4096), 3);
        let config = negotiate(
            &caps,
            FIFO_ONLY,
            bgra_unorm(),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
        .unwrap();
        assert_eq!(config.min_image_count, 3);
    }
}
