//! Capability facts queried once at startup: instance version, layers and
//! extensions, and one [`DeviceCandidate`] per physical adapter.
//!
//! Everything here is an immutable value object; the lookup predicates are
//! pure over the queried data so selection logic can be exercised on
//! hand-built inventories.

use std::borrow::Cow;
use std::ffi::CStr;
use std::fmt;

use ash::vk;

use crate::error::PresenterError;

/// An unpacked Vulkan version triple, retaining the packed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersion {
    pub raw: u32,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ApiVersion {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            raw,
            major: vk::api_version_major(raw),
            minor: vk::api_version_minor(raw),
            patch: vk::api_version_patch(raw),
        }
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A layer together with the extensions that layer provides.
#[derive(Clone)]
pub struct LayerInventory {
    pub properties: vk::LayerProperties,
    pub extensions: Vec<vk::ExtensionProperties>,
}

impl LayerInventory {
    pub fn name(&self) -> &CStr {
        unsafe { CStr::from_ptr(self.properties.layer_name.as_ptr()) }
    }
}

/// Instance-level facts: loader version, global extensions, layers.
#[derive(Clone)]
pub struct InstanceInventory {
    pub version: ApiVersion,
    pub extensions: Vec<vk::ExtensionProperties>,
    pub layers: Vec<LayerInventory>,
}

impl InstanceInventory {
    pub fn query(entry: &ash::Entry) -> Result<Self, PresenterError> {
        // A loader that predates vkEnumerateInstanceVersion is Vulkan 1.0.
        let raw_version = entry
            .try_enumerate_instance_version()?
            .unwrap_or(vk::API_VERSION_1_0);

        let extensions = entry.enumerate_instance_extension_properties(None)?;

        let layer_properties = entry.enumerate_instance_layer_properties()?;
        let mut layers = Vec::with_capacity(layer_properties.len());
        for properties in layer_properties {
            let layer_name =
                unsafe { CStr::from_ptr(properties.layer_name.as_ptr()) }.to_owned();
            let extensions =
                entry.enumerate_instance_extension_properties(Some(&layer_name))?;
            layers.push(LayerInventory {
                properties,
                extensions,
            });
        }

        Ok(Self {
            version: ApiVersion::from_raw(raw_version),
            extensions,
            layers,
        })
    }

    pub fn has_extension(&self, name: &CStr) -> bool {
        contains_extension(&self.extensions, name)
    }

    pub fn has_layer(&self, name: &CStr) -> bool {
        self.layers.iter().any(|layer| layer.name() == name)
    }
}

/// Everything selection needs to know about one physical adapter.
/// Queried once; never mutated afterwards.
#[derive(Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub version: ApiVersion,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub extensions: Vec<vk::ExtensionProperties>,
}

impl DeviceCandidate {
    pub fn query(
        instance: &ash::Instance,
        handle: vk::PhysicalDevice,
    ) -> Result<Self, PresenterError> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let features = unsafe { instance.get_physical_device_features(handle) };
        let memory = unsafe { instance.get_physical_device_memory_properties(handle) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let extensions = unsafe { instance.enumerate_device_extension_properties(handle)? };

        Ok(Self {
            handle,
            version: ApiVersion::from_raw(properties.api_version),
            properties,
            features,
            memory,
            queue_families,
            extensions,
        })
    }

    pub fn query_all(instance: &ash::Instance) -> Result<Vec<Self>, PresenterError> {
        let handles = unsafe { instance.enumerate_physical_devices()? };
        handles
            .into_iter()
            .map(|handle| Self::query(instance, handle))
            .collect()
    }

    pub fn name(&self) -> Cow<'_, str> {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }.to_string_lossy()
    }

    pub fn has_extension(&self, name: &CStr) -> bool {
        contains_extension(&self.extensions, name)
    }
}

pub(crate) fn contains_extension(list: &[vk::ExtensionProperties], name: &CStr) -> bool {
    list.iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
}
