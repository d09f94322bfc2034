use crate::config::VrConfig;
use crate::gpu::{GraphicsDevice, GraphicsQueue, SharedGraphics, SurfaceHandle};
use crate::vr::{Eye, VrSession};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

/// Capture progress for the double-checked first-call path. Presentation can
/// in principle reenter before capture completes, so the three states and
/// their transitions are explicit rather than ad hoc booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Uncaptured = 0,
    Capturing = 1,
    Captured = 2,
}

impl CaptureState {
    fn from_u8(value: u8) -> CaptureState {
        match value {
            1 => CaptureState::Capturing,
            2 => CaptureState::Captured,
            _ => CaptureState::Uncaptured,
        }
    }
}

#[derive(Default)]
struct CapturedResources {
    device: Option<GraphicsDevice>,
    queue: Option<GraphicsQueue>,
    surface: Option<SurfaceHandle>,
}

/// Intercept for the host's frame-presentation entry point.
///
/// Every invocation runs on the host's render thread; the caller always
/// forwards to the real presentation function afterwards, whatever this
/// returns. The return value reports which eye (if any) was submitted so
/// callers and tests can observe the schedule.
pub struct PresentHook {
    session: Arc<VrSession>,
    graphics: SharedGraphics,
    config: Arc<VrConfig>,
    capture: Mutex<CapturedResources>,
    capture_state: AtomicU8,
    shutdown_requested: AtomicBool,
    frame_count: AtomicU64,
    warned_capture: AtomicBool,
    warned_back_buffer: AtomicBool,
}

impl PresentHook {
    pub fn new(
        session: Arc<VrSession>,
        graphics: SharedGraphics,
        config: Arc<VrConfig>,
    ) -> Self {
        Self {
            session,
            graphics,
            config,
            capture: Mutex::new(CapturedResources::default()),
            capture_state: AtomicU8::new(CaptureState::Uncaptured as u8),
            shutdown_requested: AtomicBool::new(false),
            frame_count: AtomicU64::new(0),
            warned_capture: AtomicBool::new(false),
            warned_back_buffer: AtomicBool::new(false),
        }
    }

    pub fn capture_state(&self) -> CaptureState {
        CaptureState::from_u8(self.capture_state.load(Ordering::Acquire))
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn captured_queue(&self) -> Option<GraphicsQueue> {
        self.capture.lock().ok().and_then(|c| c.queue)
    }

    /// Hook body for the presentation call. Returns the eye submitted this
    /// tick, or `None` when the call was pure pass-through.
    pub fn on_present(&self, surface: SurfaceHandle) -> Option<Eye> {
        if self.shutdown_requested.load(Ordering::Acquire) || !self.config.vr_enabled() {
            return None;
        }
        if surface.is_null() {
            if !self.warned_back_buffer.swap(true, Ordering::Relaxed) {
                log::warn!("[present] called with a null swap surface");
            }
            return None;
        }

        if self.capture_state() != CaptureState::Captured {
            self.try_capture(surface);
        }
        if self.capture_state() != CaptureState::Captured {
            return None;
        }

        // Submit only while the camera-driven update has a frame open. The
        // eye counter here and the camera hook's offset counter tick under
        // the same condition, which is what keeps the two independently
        // derived parities describing the same logical eye.
        if !self.session.frame_in_progress() {
            return None;
        }

        // The host rotates its buffers, so the color target is re-fetched on
        // every call rather than cached at capture time.
        let back_buffer = {
            let Ok(mut graphics) = self.graphics.lock() else {
                return None;
            };
            match graphics.back_buffer(surface) {
                Ok(handle) => {
                    self.warned_back_buffer.store(false, Ordering::Relaxed);
                    handle
                }
                Err(err) => {
                    if !self.warned_back_buffer.swap(true, Ordering::Relaxed) {
                        log::warn!("[present] failed to fetch back buffer: {err}");
                    }
                    return None;
                }
            }
        };

        let frame = self.frame_count.fetch_add(1, Ordering::Relaxed);
        let eye = Eye::from_frame(frame);
        self.session.submit_frame(back_buffer, eye);
        Some(eye)
    }

    fn try_capture(&self, surface: SurfaceHandle) {
        let Ok(mut captured) = self.capture.lock() else {
            return;
        };
        // Double-check under the lock; a racing call may have finished.
        if self.capture_state() != CaptureState::Uncaptured {
            return;
        }
        self.capture_state
            .store(CaptureState::Capturing as u8, Ordering::Release);

        let result = {
            let Ok(mut graphics) = self.graphics.lock() else {
                self.capture_state
                    .store(CaptureState::Uncaptured as u8, Ordering::Release);
                return;
            };
            graphics.device_from_surface(surface).and_then(|device| {
                graphics
                    .create_command_queue(device)
                    .map(|queue| (device, queue))
            })
        };

        match result {
            Ok((device, queue)) => {
                captured.device = Some(device);
                captured.queue = Some(queue);
                captured.surface = Some(surface);
                self.capture_state
                    .store(CaptureState::Captured as u8, Ordering::Release);
                log::info!(
                    "[present] resources captured, device={:#x} queue={:#x}",
                    device.raw(),
                    queue.raw()
                );

                if let Err(err) = self.session.initialize(Some(queue)) {
                    log::error!("[present] session initialize failed: {err}");
                }
            }
            Err(err) => {
                self.capture_state
                    .store(CaptureState::Uncaptured as u8, Ordering::Release);
                if !self.warned_capture.swap(true, Ordering::Relaxed) {
                    log::error!("[present] resource capture failed: {err}");
                }
            }
        }
    }

    /// Signal shutdown, give any in-flight invocation a moment to finish,
    /// then release captured resources under the capture lock. The sleep is
    /// a bounded grace period, not a true join.
    pub fn shutdown(&self) {
        if self.shutdown_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("[present] shutting down");
        std::thread::sleep(Duration::from_millis(50));

        if let Ok(mut captured) = self.capture.lock() {
            if let Ok(mut graphics) = self.graphics.lock() {
                graphics.release();
            }
            captured.device = None;
            captured.queue = None;
            captured.surface = None;
            self.capture_state
                .store(CaptureState::Uncaptured as u8, Ordering::Release);
        }
        log::info!("[present] shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NullGraphics;
    use crate::vr::NullRuntime;

    fn make_hook() -> (PresentHook, Arc<VrSession>) {
        let config = Arc::new(VrConfig::new());
        let (graphics, _) = NullGraphics::new().into_shared();
        let session = Arc::new(VrSession::new(
            Box::new(NullRuntime::new()),
            Arc::clone(&graphics),
            Arc::clone(&config),
        ));
        (
            PresentHook::new(Arc::clone(&session), graphics, config),
            session,
        )
    }

    fn surface() -> SurfaceHandle {
        SurfaceHandle::from_raw(0x5000)
    }

    #[test]
    fn first_present_captures_and_initializes_session() {
        let (hook, session) = make_hook();
        assert_eq!(hook.capture_state(), CaptureState::Uncaptured);

        hook.on_present(surface());
        assert_eq!(hook.capture_state(), CaptureState::Captured);
        assert!(session.is_session_ready());
        assert!(hook.captured_queue().is_some());
    }

    #[test]
    fn eye_parity_alternates_by_frame_counter() {
        let (hook, session) = make_hook();
        // Capture on the first call; no frame is open yet, so nothing
        // submits until the per-frame update runs.
        assert_eq!(hook.on_present(surface()), None);

        session.update().expect("open frame");
        assert_eq!(hook.on_present(surface()), Some(Eye::Left));
        session.update().expect("mid-frame refresh");
        assert_eq!(hook.on_present(surface()), Some(Eye::Right));
        session.update().expect("next frame");
        assert_eq!(hook.on_present(surface()), Some(Eye::Left));
    }

    #[test]
    fn disabled_vr_is_pure_pass_through() {
        let (hook, session) = make_hook();
        hook.config.set_vr_enabled(false);

        assert_eq!(hook.on_present(surface()), None);
        assert_eq!(hook.capture_state(), CaptureState::Uncaptured);
        assert!(!session.is_session_ready());
    }

    #[test]
    fn null_surface_is_pass_through() {
        let (hook, _session) = make_hook();
        assert_eq!(hook.on_present(SurfaceHandle::NULL), None);
        assert_eq!(hook.capture_state(), CaptureState::Uncaptured);
    }

    #[test]
    fn shutdown_stops_submission_and_releases_capture() {
        let (hook, _session) = make_hook();
        hook.on_present(surface());
        assert_eq!(hook.capture_state(), CaptureState::Captured);
        assert_eq!(hook.frame_count(), 0);

        hook.shutdown();
        assert!(hook.is_shutdown_requested());
        assert_eq!(hook.capture_state(), CaptureState::Uncaptured);
        assert_eq!(hook.on_present(surface()), None);
    }

    #[test]
    fn capture_happens_exactly_once() {
        let config = Arc::new(VrConfig::new());
        let (graphics, graphics_handle) = NullGraphics::new().into_shared();
        let session = Arc::new(VrSession::new(
            Box::new(NullRuntime::new()),
            Arc::clone(&graphics),
            Arc::clone(&config),
        ));
        let hook = PresentHook::new(session, graphics, config);

        hook.on_present(surface());
        hook.on_present(surface());
        hook.on_present(surface());

        // One dedicated queue despite three presentations.
        assert_eq!(graphics_handle.lock().unwrap().queues_created(), 1);
    }
}
