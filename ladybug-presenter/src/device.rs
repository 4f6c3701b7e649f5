//! First-match device and queue-family selection.
//!
//! Candidates are scanned in enumeration order and queue families in index
//! order; the first pair that satisfies the queue requirement, supports
//! presentation to the surface, and exposes at least one surface format wins.
//! Selection is deterministic given enumeration order; there is no scoring.

use ash::vk;
use tracing::{info, warn};

use crate::error::PresenterError;
use crate::inventory::DeviceCandidate;

/// Default surface format to look for, matching the attachment format the
/// fixed pipeline is built around.
pub const PREFERRED_SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// Capability flags a queue family must carry. Used purely as a filter
/// predicate during selection.
#[derive(Debug, Clone, Copy)]
pub struct QueueRequirement {
    pub flags: vk::QueueFlags,
}

impl QueueRequirement {
    pub fn satisfied_by(&self, family: &vk::QueueFamilyProperties) -> bool {
        family.queue_flags.contains(self.flags)
    }
}

impl Default for QueueRequirement {
    fn default() -> Self {
        Self {
            flags: vk::QueueFlags::GRAPHICS
                | vk::QueueFlags::COMPUTE
                | vk::QueueFlags::TRANSFER,
        }
    }
}

/// Surface-side facts selection has to ask for per candidate. The production
/// implementation wraps the `VK_KHR_surface` loader; tests provide mocks.
pub trait SurfaceSupport {
    fn supports_present(
        &self,
        device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<bool, PresenterError>;

    fn surface_formats(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, PresenterError>;
}

/// [`SurfaceSupport`] backed by the `VK_KHR_surface` extension loader.
pub struct AshSurfaceSupport<'a> {
    pub loader: &'a ash::extensions::khr::Surface,
    pub surface: vk::SurfaceKHR,
}

impl SurfaceSupport for AshSurfaceSupport<'_> {
    fn supports_present(
        &self,
        device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<bool, PresenterError> {
        let supported = unsafe {
            self.loader
                .get_physical_device_surface_support(device, queue_family_index, self.surface)?
        };
        Ok(supported)
    }

    fn surface_formats(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, PresenterError> {
        let formats = unsafe {
            self.loader
                .get_physical_device_surface_formats(device, self.surface)?
        };
        Ok(formats)
    }
}

/// Outcome of a successful selection.
#[derive(Debug, Clone, Copy)]
pub struct DeviceSelection {
    /// Index into the candidate list passed to [`select_device`].
    pub device_index: usize,
    pub queue_family_index: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    /// True when the preferred format was absent and the first reported
    /// format was used instead.
    pub format_fell_back: bool,
}

/// Picks the first candidate/queue-family pair satisfying all predicates.
///
/// A family is eligible iff its capability flags are a superset of the
/// requirement, it reports presentation support for the surface, and the
/// candidate enumerates at least one surface format. The first eligible pair
/// wins and is never reconsidered. Fails with
/// [`PresenterError::NoSuitableDevice`] when no pair qualifies.
pub fn select_device(
    candidates: &[DeviceCandidate],
    requirement: QueueRequirement,
    surface: &dyn SurfaceSupport,
    preferred_format: vk::Format,
) -> Result<DeviceSelection, PresenterError> {
    for (device_index, candidate) in candidates.iter().enumerate() {
        for (family_index, family) in candidate.queue_families.iter().enumerate() {
            let queue_family_index = family_index as u32;

            if !requirement.satisfied_by(family) {
                continue;
            }
            if !surface.supports_present(candidate.handle, queue_family_index)? {
                continue;
            }

            let formats = surface.surface_formats(candidate.handle)?;
            let Some(&first) = formats.first() else {
                // A presentable family on a device with no surface formats is
                // unusable; keep scanning.
                continue;
            };

            let (surface_format, format_fell_back) =
                match formats.iter().find(|f| f.format == preferred_format) {
                    Some(&preferred) => (preferred, false),
                    None => {
                        warn!(
                            "Preferred surface format {:?} not offered; using {:?} instead",
                            preferred_format, first.format
                        );
                        (first, true)
                    }
                };

            info!(
                "Selected device '{}' (queue family {})",
                candidate.name(),
                queue_family_index
            );
            return Ok(DeviceSelection {
                device_index,
                queue_family_index,
                surface_format,
                format_fell_back,
            });
        }
    }

    Err(PresenterError::NoSuitableDevice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::ApiVersion;
    use ash::vk::Handle;

    fn candidate(raw_handle: u64, families: &[vk::QueueFlags]) -> DeviceCandidate {
        DeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw_handle),
            properties: vk::PhysicalDeviceProperties::default(),
            version: ApiVersion::from_raw(vk::API_VERSION_1_1),
            features: vk::PhysicalDeviceFeatures::default(),
            memory: vk::PhysicalDeviceMemoryProperties::default(),
            queue_families: families
                .iter()
                .map(|&queue_flags| {
                    let mut family = vk::QueueFamilyProperties::default();
                    family.queue_flags = queue_flags;
                    family.queue_count = 1;
                    family
                })
                .collect(),
            extensions: Vec::new(),
        }
    }

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    /// Mock surface: which (device, family) pairs can present, and which
    /// formats each device reports.
    struct MockSurface {
        present: Vec<(u64, u32)>,
        formats: Vec<(u64, Vec<vk::SurfaceFormatKHR>)>,
    }

    impl SurfaceSupport for MockSurface {
        fn supports_present(
            &self,
            device: vk::PhysicalDevice,
            queue_family_index: u32,
        ) -> Result<bool, PresenterError> {
            Ok(self
                .present
                .iter()
                .any(|&(raw, family)| raw == device.as_raw() && family == queue_family_index))
        }

        fn surface_formats(
            &self,
            device: vk::PhysicalDevice,
        ) -> Result<Vec<vk::SurfaceFormatKHR>, PresenterError> {
            Ok(self
                .formats
                .iter()
                .find(|(raw, _)| *raw == device.as_raw())
                .map(|(_, formats)| formats.clone())
                .unwrap_or_default())
        }
    }

    fn all_caps() -> vk::QueueFlags {
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER
    }

    #[test]
    fn first_eligible_candidate_and_family_win() {
        let candidates = vec![
            candidate(1, &[all_caps()]),
            candidate(2, &[all_caps()]),
        ];
        let surface = MockSurface {
            present: vec![(1, 0), (2, 0)],
            formats: vec![
                (1, vec![format(vk::Format::B8G8R8A8_UNORM)]),
                (2, vec![format(vk::Format::B8G8R8A8_UNORM)]),
            ],
        };

        let selection = select_device(
            &candidates,
            QueueRequirement::default(),
            &surface,
            PREFERRED_SURFACE_FORMAT,
        )
        .unwrap();
        assert_eq!(selection.device_index, 0);
        assert_eq!(selection.queue_family_index, 0);
        assert!(!selection.format_fell_back);
    }

    #[test]
    fn families_are_scanned_in_index_order() {
        // Family 0 lacks compute; family 1 qualifies.
        let candidates = vec![candidate(
            7,
            &[
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                all_caps(),
                all_caps(),
            ],
        )];
        let surface = MockSurface {
            present: vec![(7, 1), (7, 2)],
            formats: vec![(7, vec![format(vk::Format::B8G8R8A8_UNORM)])],
        };

        let selection = select_device(
            &candidates,
            QueueRequirement::default(),
            &surface,
            PREFERRED_SURFACE_FORMAT,
        )
        .unwrap();
        assert_eq!(selection.queue_family_index, 1);
    }

    #[test]
    fn presentation_support_is_required() {
        let candidates = vec![candidate(1, &[all_caps()]), candidate(2, &[all_caps()])];
        // Device 1 has the capabilities but cannot present; device 2 can.
        let surface = MockSurface {
            present: vec![(2, 0)],
            formats: vec![
                (1, vec![format(vk::Format::B8G8R8A8_UNORM)]),
                (2, vec![format(vk::Format::B8G8R8A8_UNORM)]),
            ],
        };

        let selection = select_device(
            &candidates,
            QueueRequirement::default(),
            &surface,
            PREFERRED_SURFACE_FORMAT,
        )
        .unwrap();
        assert_eq!(selection.device_index, 1);
    }

    #[test]
    fn empty_format_list_rejects_the_candidate() {
        let candidates = vec![candidate(1, &[all_caps()]), candidate(2, &[all_caps()])];
        let surface = MockSurface {
            present: vec![(1, 0), (2, 0)],
            formats: vec![(1, Vec::new()), (2, vec![format(vk::Format::R8G8B8A8_UNORM)])],
        };

        let selection = select_device(
            &candidates,
            QueueRequirement::default(),
            &surface,
            PREFERRED_SURFACE_FORMAT,
        )
        .unwrap();
        assert_eq!(selection.device_index, 1);
    }

    #[test]
    fn no_qualifying_pair_is_reported_as_no_suitable_device() {
        let candidates = vec![candidate(1, &[vk::QueueFlags::TRANSFER])];
        let surface = MockSurface {
            present: vec![(1, 0)],
            formats: vec![(1, vec![format(vk::Format::B8G8R8A8_UNORM)])],
        };

        let result = select_device(
            &candidates,
            QueueRequirement::default(),
            &surface,
            PREFERRED_SURFACE_FORMAT,
        );
        assert!(matches!(result, Err(PresenterError::NoSuitableDevice)));
    }

    #[test]
    fn single_family_device_with_undesired_format_still_selects() {
        // End-to-end fixture: one family with graphics|compute|transfer and
        // presentation, one reported format that differs from the preferred
        // one. Selection succeeds with the reported format and notes the
        // fallback.
        let candidates = vec![candidate(3, &[all_caps()])];
        let reported = format(vk::Format::R8G8B8A8_SRGB);
        let surface = MockSurface {
            present: vec![(3, 0)],
            formats: vec![(3, vec![reported])],
        };

        let selection = select_device(
            &candidates,
            QueueRequirement::default(),
            &surface,
            PREFERRED_SURFACE_FORMAT,
        )
        .unwrap();
        assert_eq!(selection.surface_format.format, vk::Format::R8G8B8A8_SRGB);
        assert!(selection.format_fell_back);
    }

    #[test]
    fn preferred_format_is_found_regardless_of_position() {
        let candidates = vec![candidate(4, &[all_caps()])];
        let surface = MockSurface {
            present: vec![(4, 0)],
            formats: vec![(
                4,
                vec![
                    format(vk::Format::R8G8B8A8_SRGB),
                    format(vk::Format::B8G8R8A8_SRGB),
                    format(vk::Format::B8G8R8A8_UNORM),
                ],
            )],
        };

        let selection = select_device(
            &candidates,
            QueueRequirement::default(),
            &surface,
            PREFERRED_SURFACE_FORMAT,
        )
        .unwrap();
        assert_eq!(selection.surface_format.format, vk::Format::B8G8R8A8_UNORM);
        assert!(!selection.format_fell_back);
    }
}
