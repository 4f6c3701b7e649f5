//! Vulkan presentation bring-up for the Ladybug engine: pick a capable
//! device, negotiate a surface configuration the compositor accepts, build
//! the swapchain and fixed pipeline, and run the synchronized frame loop.
//!
//! Window management, shader compilation and event dispatch are external
//! collaborators reached through [`PresentationTarget`] and the shader byte
//! buffer; this crate owns everything between the native surface handles and
//! the presented image.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use tracing::info;

mod commands;
pub mod device;
mod error;
pub mod frame;
pub mod inventory;
mod pipeline;
mod render_pass;
pub mod surface;
mod swapchain;
pub mod utils;

pub use commands::CommandTable;
pub use device::{
    select_device, AshSurfaceSupport, DeviceSelection, QueueRequirement, SurfaceSupport,
    PREFERRED_SURFACE_FORMAT,
};
pub use error::{CapabilityKind, PresenterError};
pub use frame::{FrameDriver, FrameScheduler, FrameSync, VulkanFrameDriver};
pub use inventory::{ApiVersion, DeviceCandidate, InstanceInventory};
pub use pipeline::GraphicsPipeline;
pub use render_pass::RenderPass;
pub use surface::{negotiate, SurfaceConfiguration};
pub use swapchain::Swapchain;

const VALIDATION_LAYER_NAME: &str = "VK_LAYER_KHRONOS_validation";

/// Result of one pump of the windowing collaborator's event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    Continue,
    Quit,
}

/// The narrow interface to the windowing collaborator: stable native
/// handles, the advisory window size, and a non-blocking event pump that
/// reports quit requests. Pumped once per frame-loop iteration.
pub trait PresentationTarget {
    fn raw_display(&self) -> *mut c_void;
    fn raw_surface(&self) -> *mut c_void;
    /// Requested pixel extent. Only honored when the surface reports the
    /// follow-window sentinel; otherwise the surface's own extent wins.
    fn extent(&self) -> vk::Extent2D;
    fn pump(&mut self) -> PumpStatus;
}

/// Startup configuration. The defaults reproduce the engine's stock
/// windowed-triangle setup.
#[derive(Debug, Clone)]
pub struct PresenterOptions {
    pub application_name: String,
    pub engine_name: String,
    pub preferred_format: vk::Format,
    pub shader_path: PathBuf,
    pub enable_validation: bool,
}

impl Default for PresenterOptions {
    fn default() -> Self {
        Self {
            application_name: "Ladybug".to_string(),
            engine_name: "LadybugEngine".to_string(),
            preferred_format: PREFERRED_SURFACE_FORMAT,
            shader_path: PathBuf::from("shaders/shader.spv"),
            enable_validation: true,
        }
    }
}

// Forward validation-layer output into tracing.
unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let callback_data = *p_callback_data;

    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::debug!(target: "vulkan", "type: {:?}, message: {}", message_type, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(target: "vulkan", "type: {:?}, message: {}", message_type, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "vulkan", "type: {:?}, message: {}", message_type, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "vulkan", "type: {:?}, message: {}", message_type, message);
        }
        _ => {
            tracing::trace!(target: "vulkan", "type: {:?}, message: {}", message_type, message);
        }
    }
    vk::FALSE
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
        .build()
}

/// Instance extensions the presenter cannot run without.
fn required_instance_extensions(enable_validation: bool) -> Vec<&'static CStr> {
    let mut extensions = vec![
        ash::extensions::khr::Surface::name(),
        ash::extensions::khr::WaylandSurface::name(),
    ];
    if enable_validation {
        extensions.push(ash::extensions::ext::DebugUtils::name());
    }
    extensions
}

/// The fully initialized presentation pipeline.
///
/// Construction runs the whole negotiation chain: capability inventory,
/// instance, surface, device selection, surface negotiation, swapchain,
/// fixed pipeline, command recording, sync primitives. Any failure along the
/// way aborts construction with the taxonomy error for that stage; there is
/// no partial success.
pub struct Presenter {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils_loader: Option<ash::extensions::ext::DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface_loader: ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
    #[allow(dead_code)]
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
    device: Arc<ash::Device>,
    queue: vk::Queue,
    configuration: SurfaceConfiguration,

    render_pass: Option<RenderPass>,
    swapchain: Option<Swapchain>,
    pipeline: Option<GraphicsPipeline>,
    commands: Option<CommandTable>,
    sync: Option<FrameSync>,
}

impl Presenter {
    pub fn new(
        options: &PresenterOptions,
        target: &dyn PresentationTarget,
    ) -> Result<Self, PresenterError> {
        let entry = unsafe { ash::Entry::load()? };

        let inventory = InstanceInventory::query(&entry)?;
        if !inventory.version.at_least(1, 1) {
            return Err(PresenterError::UnsupportedApiVersion {
                found: inventory.version,
            });
        }
        info!("Vulkan instance version {}", inventory.version);

        let instance = Self::create_instance(&entry, options, &inventory)?;

        // From here on Bringup owns the instance-level handles and releases
        // them if a later stage fails.
        let mut bringup = Bringup {
            entry,
            instance,
            debug_utils_loader: None,
            debug_messenger: None,
            surface_loader: None,
            surface: vk::SurfaceKHR::null(),
            device: None,
            finished: false,
        };

        if options.enable_validation {
            let loader =
                ash::extensions::ext::DebugUtils::new(&bringup.entry, &bringup.instance);
            let messenger = unsafe {
                loader.create_debug_utils_messenger(&debug_messenger_create_info(), None)?
            };
            bringup.debug_utils_loader = Some(loader);
            bringup.debug_messenger = Some(messenger);
        }

        bringup.finish(options, target)
    }

    fn create_instance(
        entry: &ash::Entry,
        options: &PresenterOptions,
        inventory: &InstanceInventory,
    ) -> Result<ash::Instance, PresenterError> {
        let required_extensions = required_instance_extensions(options.enable_validation);
        for &name in &required_extensions {
            if !inventory.has_extension(name) {
                return Err(PresenterError::CapabilityMissing {
                    kind: CapabilityKind::InstanceExtension,
                    name: name.to_string_lossy().into_owned(),
                });
            }
        }

        let validation_layer_name = CString::new(VALIDATION_LAYER_NAME)?;
        let mut enabled_layer_names: Vec<*const c_char> = Vec::new();
        if options.enable_validation {
            if !inventory.has_layer(&validation_layer_name) {
                return Err(PresenterError::CapabilityMissing {
                    kind: CapabilityKind::InstanceLayer,
                    name: VALIDATION_LAYER_NAME.to_string(),
                });
            }
            enabled_layer_names.push(validation_layer_name.as_ptr());
        }

        let app_name = CString::new(options.application_name.as_str())?;
        let engine_name = CString::new(options.engine_name.as_str())?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(1)
            .engine_name(&engine_name)
            .engine_version(1)
            .api_version(vk::API_VERSION_1_1);

        let extension_names: Vec<*const c_char> = required_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let mut instance_create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&enabled_layer_names);

        let mut debug_create_info = debug_messenger_create_info();
        if options.enable_validation {
            instance_create_info = instance_create_info.push_next(&mut debug_create_info);
        }

        let instance = unsafe { entry.create_instance(&instance_create_info, None)? };
        info!("Vulkan instance created");
        Ok(instance)
    }

    /// The negotiated configuration the swapchain was built from.
    pub fn configuration(&self) -> &SurfaceConfiguration {
        &self.configuration
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Runs the frame loop until `target` reports a quit request or a frame
    /// step fails. A clean quit is the only `Ok` outcome; callers map it to
    /// process exit status 0 and any error through
    /// [`PresenterError::exit_code`].
    pub fn run(&self, target: &mut dyn PresentationTarget) -> Result<(), PresenterError> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| PresenterError::Internal("swapchain not initialized".to_string()))?;
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| PresenterError::Internal("command table not initialized".to_string()))?;
        let sync = self
            .sync
            .as_ref()
            .ok_or_else(|| PresenterError::Internal("frame sync not initialized".to_string()))?;

        let driver = VulkanFrameDriver {
            device: &self.device,
            queue: self.queue,
            swapchain_loader: &swapchain.loader,
            swapchain: swapchain.handle,
            command_buffers: &commands.buffers,
        };
        let mut scheduler = FrameScheduler::new(driver, sync);
        scheduler.run(target)
    }
}

/// Instance-level handles held during the device bring-up stages. Cleans up
/// on drop unless `finish` handed everything to the `Presenter`.
struct Bringup {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils_loader: Option<ash::extensions::ext::DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface_loader: Option<ash::extensions::khr::Surface>,
    surface: vk::SurfaceKHR,
    device: Option<ash::Device>,
    finished: bool,
}

impl Bringup {
    fn finish(
        &mut self,
        options: &PresenterOptions,
        target: &dyn PresentationTarget,
    ) -> Result<Presenter, PresenterError> {
        // Surface from the target's native handles.
        let raw_display = target.raw_display();
        let raw_surface = target.raw_surface();
        if raw_display.is_null() || raw_surface.is_null() {
            return Err(PresenterError::NullTargetHandle);
        }

        let surface_loader = ash::extensions::khr::Surface::new(&self.entry, &self.instance);
        let wayland_surface_loader =
            ash::extensions::khr::WaylandSurface::new(&self.entry, &self.instance);
        let surface_create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
            .display(raw_display)
            .surface(raw_surface);
        self.surface =
            unsafe { wayland_surface_loader.create_wayland_surface(&surface_create_info, None)? };
        self.surface_loader = Some(surface_loader);
        info!("Wayland surface created");

        // Device selection over the queried candidates.
        let candidates = DeviceCandidate::query_all(&self.instance)?;
        info!("Found {} physical devices", candidates.len());

        let selection = {
            let surface_loader = self.surface_loader.as_ref().ok_or_else(|| {
                PresenterError::Internal("surface loader not initialized".to_string())
            })?;
            let surface_support = AshSurfaceSupport {
                loader: surface_loader,
                surface: self.surface,
            };
            select_device(
                &candidates,
                QueueRequirement::default(),
                &surface_support,
                options.preferred_format,
            )?
        };
        let candidate = &candidates[selection.device_index];

        let swapchain_extension = ash::extensions::khr::Swapchain::name();
        if !candidate.has_extension(swapchain_extension) {
            return Err(PresenterError::CapabilityMissing {
                kind: CapabilityKind::DeviceExtension,
                name: swapchain_extension.to_string_lossy().into_owned(),
            });
        }

        // Logical device with the single selected queue.
        let queue_priorities = [0.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(selection.queue_family_index)
            .queue_priorities(&queue_priorities)
            .build()];
        let device_extension_names = [swapchain_extension.as_ptr()];
        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_extension_names);

        let device = unsafe {
            self.instance
                .create_device(candidate.handle, &device_create_info, None)?
        };
        self.device = Some(device.clone());
        let device = Arc::new(device);
        let queue = unsafe { device.get_device_queue(selection.queue_family_index, 0) };
        info!(
            "Logical device created, queue family {}",
            selection.queue_family_index
        );

        // Surface negotiation against the selected device.
        let surface_loader = self.surface_loader.as_ref().ok_or_else(|| {
            PresenterError::Internal("surface loader not initialized".to_string())
        })?;
        let capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(candidate.handle, self.surface)?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(candidate.handle, self.surface)?
        };
        let configuration = negotiate(
            &capabilities,
            &present_modes,
            selection.surface_format,
            target.extent(),
        )?;

        // Fixed pipeline and the presentable image ring.
        let shader_bytes = utils::read_binary_file(&options.shader_path)?;

        let render_pass = RenderPass::new(device.clone(), configuration.format.format)?;
        let swapchain = Swapchain::new(
            &self.instance,
            device.clone(),
            self.surface,
            selection.queue_family_index,
            &configuration,
            render_pass.handle,
        )?;
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            render_pass.handle,
            configuration.extent,
            &shader_bytes,
        )?;
        let commands = CommandTable::new(
            device.clone(),
            selection.queue_family_index,
            render_pass.handle,
            &swapchain.framebuffers,
            pipeline.handle,
            configuration.extent,
        )?;
        let sync = FrameSync::new(device.clone())?;

        let presenter = Presenter {
            entry: self.entry.clone(),
            instance: self.instance.clone(),
            debug_utils_loader: self.debug_utils_loader.take(),
            debug_messenger: self.debug_messenger.take(),
            surface_loader: self.surface_loader.take().ok_or_else(|| {
                PresenterError::Internal("surface loader not initialized".to_string())
            })?,
            surface: std::mem::replace(&mut self.surface, vk::SurfaceKHR::null()),
            physical_device: candidate.handle,
            queue_family_index: selection.queue_family_index,
            device,
            queue,
            configuration,
            render_pass: Some(render_pass),
            swapchain: Some(swapchain),
            pipeline: Some(pipeline),
            commands: Some(commands),
            sync: Some(sync),
        };
        self.device = None;
        self.finished = true;
        Ok(presenter)
    }
}

impl Drop for Bringup {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        unsafe {
            if let Some(device) = self.device.take() {
                device.destroy_device(None);
            }
            if let Some(loader) = &self.surface_loader {
                if self.surface != vk::SurfaceKHR::null() {
                    loader.destroy_surface(self.surface, None);
                }
            }
            if let (Some(loader), Some(messenger)) =
                (&self.debug_utils_loader, self.debug_messenger)
            {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        unsafe {
            // Device children first, in reverse order of creation.
            drop(self.sync.take());
            drop(self.commands.take());
            drop(self.pipeline.take());
            drop(self.swapchain.take());
            drop(self.render_pass.take());

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let (Some(loader), Some(messenger)) =
                (&self.debug_utils_loader, self.debug_messenger)
            {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
            info!("Presenter torn down");
        }
    }
}
