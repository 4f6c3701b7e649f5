//! Error handling for the Ladybug presenter.
//!
//! Every fallible operation in this crate returns [`PresenterError`]. There is
//! no retry policy anywhere: callers are expected to propagate the error to
//! the top level, report it, and terminate with [`PresenterError::exit_code`].

use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

use crate::inventory::ApiVersion;

/// Which kind of capability was found missing during startup checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    InstanceExtension,
    InstanceLayer,
    DeviceExtension,
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityKind::InstanceExtension => write!(f, "instance extension"),
            CapabilityKind::InstanceLayer => write!(f, "instance layer"),
            CapabilityKind::DeviceExtension => write!(f, "device extension"),
        }
    }
}

/// Failure taxonomy for presenter bring-up and the frame loop.
///
/// All variants are fatal from the presenter's point of view; none of them
/// has a recovery path in this design.
#[derive(Debug, Error)]
pub enum PresenterError {
    /// A required extension or layer is absent from the running system.
    /// Raised before any device-level work begins.
    #[error("Required {kind} is not available: {name}")]
    CapabilityMissing { kind: CapabilityKind, name: String },

    /// The Vulkan loader reports an instance version older than 1.1.
    #[error("Vulkan instance version {found} is older than the required 1.1")]
    UnsupportedApiVersion { found: ApiVersion },

    /// No physical device offers a queue family that satisfies the queue
    /// requirement, supports presentation to the surface, and exposes at
    /// least one surface format.
    #[error("No suitable physical device / queue family combination was found")]
    NoSuitableDevice,

    /// The surface does not report the FIFO present mode, which this design
    /// treats as a required baseline rather than something to fall back from.
    #[error("The surface does not offer the FIFO present mode")]
    NoCompatiblePresentMode,

    /// Acquire or present reported that the swapchain no longer matches the
    /// surface. Re-negotiation is not implemented; this variant is the seam
    /// where it would hook in.
    #[error("The swapchain no longer matches the surface and must be re-negotiated")]
    SwapchainStale,

    /// A presentation target handed out a null native handle.
    #[error("Presentation target handle is null")]
    NullTargetHandle,

    /// The shader file (or another startup input) does not exist.
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),

    /// The file was shorter than its reported size.
    #[error("Short read on {path:?}: expected {expected} bytes, read {read}")]
    ReadIncomplete {
        path: PathBuf,
        expected: u64,
        read: u64,
    },

    /// The shader bytes are not a valid SPIR-V word stream.
    #[error("Shader binary is not valid SPIR-V: {0}")]
    InvalidShader(String),

    /// I/O errors not covered by the more specific variants.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A name passed to the Vulkan API contained an interior NUL byte.
    #[error("Invalid name string: {0}")]
    InvalidName(#[from] std::ffi::NulError),

    /// The Vulkan shared library could not be loaded.
    #[error("Failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    /// A raw Vulkan call failed with a result code not mapped to a more
    /// specific variant.
    #[error("Vulkan call failed: {0}")]
    Vk(#[from] vk::Result),

    /// Catch-all for unexpected internal errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl PresenterError {
    /// Process exit status for this error. Always non-zero; a clean quit of
    /// the frame loop is the only way to exit with status 0.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_is_nonzero_for_every_fatal_kind() {
        let errors = [
            PresenterError::CapabilityMissing {
                kind: CapabilityKind::InstanceLayer,
                name: "VK_LAYER_KHRONOS_validation".to_string(),
            },
            PresenterError::NoSuitableDevice,
            PresenterError::NoCompatiblePresentMode,
            PresenterError::SwapchainStale,
            PresenterError::FileNotFound(PathBuf::from("shaders/shader.spv")),
        ];
        for error in errors {
            assert_ne!(error.exit_code(), 0);
        }
    }

    #[test]
    fn capability_kind_reads_naturally_in_messages() {
        let error = PresenterError::CapabilityMissing {
            kind: CapabilityKind::DeviceExtension,
            name: "VK_KHR_swapchain".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Required device extension is not available: VK_KHR_swapchain"
        );
    }
}
