//! The steady-state frame loop: acquire, submit, present, drain.
//!
//! One frame in flight. The two binary semaphores of [`FrameSync`] are the
//! only coordination between the CPU, the GPU and the display engine; the
//! end-of-iteration idle wait serializes them completely, so no primitive is
//! ever reused while the GPU might still consume it.

use std::sync::Arc;

use ash::{vk, Device};
use tracing::warn;

use crate::error::PresenterError;
use crate::{PresentationTarget, PumpStatus};

/// The per-frame semaphore pair: image-available and render-finished.
/// Created once, reused every iteration. At most one acquire may be
/// outstanding against `image_available` at any time, which the scheduler's
/// full drain per iteration guarantees.
pub struct FrameSync {
    device: Arc<Device>,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    pub fn new(device: Arc<Device>) -> Result<Self, PresenterError> {
        let semaphore_create_info = vk::SemaphoreCreateInfo::builder();
        let image_available = unsafe { device.create_semaphore(&semaphore_create_info, None)? };
        let render_finished = match unsafe { device.create_semaphore(&semaphore_create_info, None) }
        {
            Ok(semaphore) => semaphore,
            Err(result) => {
                unsafe { device.destroy_semaphore(image_available, None) };
                return Err(PresenterError::Vk(result));
            }
        };

        Ok(Self {
            device,
            image_available,
            render_finished,
        })
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.image_available, None);
            self.device.destroy_semaphore(self.render_finished, None);
        }
    }
}

/// The queue-facing operations one frame iteration consists of. The
/// production implementation talks to Vulkan; tests substitute a recorder to
/// check call ordering.
pub trait FrameDriver {
    /// Requests the next presentable image index, blocking without bound
    /// until the display engine signals `image_available`.
    fn acquire(&mut self, image_available: vk::Semaphore) -> Result<u32, PresenterError>;

    /// Enqueues the prerecorded command buffer for `image_index`, waiting on
    /// `wait` at color-attachment output and signalling `signal` on
    /// completion.
    fn submit(
        &mut self,
        image_index: u32,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
    ) -> Result<(), PresenterError>;

    /// Queues presentation of `image_index`, waiting on `wait`.
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<(), PresenterError>;

    /// Blocks until the queue is fully idle.
    fn wait_idle(&mut self) -> Result<(), PresenterError>;
}

/// [`FrameDriver`] backed by the single Vulkan queue. Borrows everything it
/// sequences; owns nothing.
pub struct VulkanFrameDriver<'a> {
    pub device: &'a Device,
    pub queue: vk::Queue,
    pub swapchain_loader: &'a ash::extensions::khr::Swapchain,
    pub swapchain: vk::SwapchainKHR,
    pub command_buffers: &'a [vk::CommandBuffer],
}

/// A surface-invalidation result becomes [`PresenterError::SwapchainStale`],
/// the seam where re-negotiation would hook in. Everything else passes
/// through as a raw Vulkan error.
fn map_presentation_result(result: vk::Result) -> PresenterError {
    match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR => {
            PresenterError::SwapchainStale
        }
        other => PresenterError::Vk(other),
    }
}

impl FrameDriver for VulkanFrameDriver<'_> {
    fn acquire(&mut self, image_available: vk::Semaphore) -> Result<u32, PresenterError> {
        let acquired = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    warn!("Acquired a suboptimal swapchain image");
                }
                Ok(image_index)
            }
            Err(result) => Err(map_presentation_result(result)),
        }
    }

    fn submit(
        &mut self,
        image_index: u32,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
    ) -> Result<(), PresenterError> {
        let buffer = self
            .command_buffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                PresenterError::Internal(format!(
                    "acquired image index {image_index} has no command buffer"
                ))
            })?;

        let wait_semaphores = [wait];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [buffer];
        let signal_semaphores = [signal];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())?;
        }
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<(), PresenterError> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let presented = unsafe { self.swapchain_loader.queue_present(self.queue, &present_info) };
        match presented {
            Ok(suboptimal) => {
                if suboptimal {
                    warn!("Presented to a suboptimal swapchain");
                }
                Ok(())
            }
            Err(result) => Err(map_presentation_result(result)),
        }
    }

    fn wait_idle(&mut self) -> Result<(), PresenterError> {
        unsafe { self.device.queue_wait_idle(self.queue)? };
        Ok(())
    }
}

/// Drives the repeating render step over a [`FrameDriver`]. Holds the
/// semaphore handles it sequences but never owns them; [`FrameSync`] keeps
/// ownership and destroys them.
pub struct FrameScheduler<D: FrameDriver> {
    driver: D,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
}

impl<D: FrameDriver> FrameScheduler<D> {
    pub fn new(driver: D, sync: &FrameSync) -> Self {
        Self {
            driver,
            image_available: sync.image_available,
            render_finished: sync.render_finished,
        }
    }

    #[cfg(test)]
    fn with_semaphores(
        driver: D,
        image_available: vk::Semaphore,
        render_finished: vk::Semaphore,
    ) -> Self {
        Self {
            driver,
            image_available,
            render_finished,
        }
    }

    /// One iteration: acquire, submit, present, then drain the queue.
    ///
    /// The drain serializes CPU and GPU entirely; the next acquire can never
    /// start while any of this iteration's work is still in flight.
    pub fn render_frame(&mut self) -> Result<u32, PresenterError> {
        let image_index = self.driver.acquire(self.image_available)?;
        self.driver
            .submit(image_index, self.image_available, self.render_finished)?;
        self.driver.present(image_index, self.render_finished)?;
        self.driver.wait_idle()?;
        Ok(image_index)
    }

    /// Runs iterations until the target's pump reports a quit request. Quit
    /// is only observed between iterations, never mid-frame.
    pub fn run(&mut self, target: &mut dyn PresentationTarget) -> Result<(), PresenterError> {
        loop {
            if matches!(target.pump(), PumpStatus::Quit) {
                return Ok(());
            }
            self.render_frame()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Acquire,
        Submit(u32),
        Present(u32),
        WaitIdle,
    }

    /// Records every queue-facing call in order.
    struct RecordingDriver {
        calls: Vec<Call>,
        next_image: u32,
        fail_acquire_with: Option<PresenterError>,
    }

    impl RecordingDriver {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                next_image: 0,
                fail_acquire_with: None,
            }
        }
    }

    impl FrameDriver for RecordingDriver {
        fn acquire(&mut self, _image_available: vk::Semaphore) -> Result<u32, PresenterError> {
            self.calls.push(Call::Acquire);
            if let Some(error) = self.fail_acquire_with.take() {
                return Err(error);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % 3;
            Ok(index)
        }

        fn submit(
            &mut self,
            image_index: u32,
            _wait: vk::Semaphore,
            _signal: vk::Semaphore,
        ) -> Result<(), PresenterError> {
            self.calls.push(Call::Submit(image_index));
            Ok(())
        }

        fn present(
            &mut self,
            image_index: u32,
            _wait: vk::Semaphore,
        ) -> Result<(), PresenterError> {
            self.calls.push(Call::Present(image_index));
            Ok(())
        }

        fn wait_idle(&mut self) -> Result<(), PresenterError> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }
    }

    fn scheduler(driver: RecordingDriver) -> FrameScheduler<RecordingDriver> {
        FrameScheduler::with_semaphores(driver, vk::Semaphore::null(), vk::Semaphore::null())
    }

    /// Presentation target that requests quit after a fixed number of pumps.
    struct CountdownTarget {
        pumps_before_quit: usize,
    }

    impl PresentationTarget for CountdownTarget {
        fn raw_display(&self) -> *mut std::ffi::c_void {
            std::ptr::null_mut()
        }

        fn raw_surface(&self) -> *mut std::ffi::c_void {
            std::ptr::null_mut()
        }

        fn extent(&self) -> vk::Extent2D {
            vk::Extent2D {
                width: 800,
                height: 600,
            }
        }

        fn pump(&mut self) -> PumpStatus {
            if self.pumps_before_quit == 0 {
                PumpStatus::Quit
            } else {
                self.pumps_before_quit -= 1;
                PumpStatus::Continue
            }
        }
    }

    #[test]
    fn each_iteration_runs_acquire_submit_present_drain_in_order() {
        let mut scheduler = scheduler(RecordingDriver::new());
        let image_index = scheduler.render_frame().unwrap();

        assert_eq!(image_index, 0);
        assert_eq!(
            scheduler.driver.calls,
            vec![
                Call::Acquire,
                Call::Submit(0),
                Call::Present(0),
                Call::WaitIdle,
            ]
        );
    }

    #[test]
    fn the_next_acquire_only_starts_after_the_previous_drain() {
        let mut scheduler = scheduler(RecordingDriver::new());
        for _ in 0..3 {
            scheduler.render_frame().unwrap();
        }

        let calls = &scheduler.driver.calls;
        assert_eq!(calls.len(), 12);
        for (position, call) in calls.iter().enumerate() {
            match position % 4 {
                0 => assert_eq!(*call, Call::Acquire),
                3 => assert_eq!(*call, Call::WaitIdle),
                _ => {}
            }
        }
        // Every acquire after the first is directly preceded by a drain.
        for window in calls.windows(2) {
            if window[1] == Call::Acquire {
                assert_eq!(window[0], Call::WaitIdle);
            }
        }
    }

    #[test]
    fn the_submitted_and_presented_image_is_the_acquired_one() {
        let mut scheduler = scheduler(RecordingDriver::new());
        for _ in 0..3 {
            scheduler.render_frame().unwrap();
        }

        assert_eq!(scheduler.driver.calls[1], Call::Submit(0));
        assert_eq!(scheduler.driver.calls[2], Call::Present(0));
        assert_eq!(scheduler.driver.calls[5], Call::Submit(1));
        assert_eq!(scheduler.driver.calls[6], Call::Present(1));
        assert_eq!(scheduler.driver.calls[9], Call::Submit(2));
        assert_eq!(scheduler.driver.calls[10], Call::Present(2));
    }

    #[test]
    fn a_failed_acquire_stops_the_iteration_before_submit() {
        let mut driver = RecordingDriver::new();
        driver.fail_acquire_with = Some(PresenterError::SwapchainStale);
        let mut scheduler = scheduler(driver);

        let result = scheduler.render_frame();
        assert!(matches!(result, Err(PresenterError::SwapchainStale)));
        assert_eq!(scheduler.driver.calls, vec![Call::Acquire]);
    }

    #[test]
    fn the_loop_renders_once_per_pump_and_quits_between_iterations() {
        let mut scheduler = scheduler(RecordingDriver::new());
        let mut target = CountdownTarget {
            pumps_before_quit: 4,
        };

        scheduler.run(&mut target).unwrap();

        let calls = &scheduler.driver.calls;
        assert_eq!(calls.len(), 16); // 4 frames, 4 calls each
        assert_eq!(calls.last(), Some(&Call::WaitIdle));
    }

    #[test]
    fn invalidation_results_map_to_the_stale_seam() {
        assert!(matches!(
            map_presentation_result(vk::Result::ERROR_OUT_OF_DATE_KHR),
            PresenterError::SwapchainStale
        ));
        assert!(matches!(
            map_presentation_result(vk::Result::ERROR_SURFACE_LOST_KHR),
            PresenterError::SwapchainStale
        ));
        assert!(matches!(
            map_presentation_result(vk::Result::ERROR_DEVICE_LOST),
            PresenterError::Vk(vk::Result::ERROR_DEVICE_LOST)
        ));
    }
}
