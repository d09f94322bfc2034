use crate::config::VrConfig;
use crate::coords;
use crate::gpu::{Extent2d, GraphicsQueue, SharedGraphics, TextureHandle};
use crate::vr::{
    ControllerSample, Eye, EyeView, FrameState, HeadPose, RuntimeBackend, SessionEvent,
    SessionResult, SessionState, TrackingSpaceKind,
};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

/// Fixed bound on the swapchain image wait. Distinct from the configurable
/// GPU fence timeout; a hung acquire must never freeze the host's render
/// thread.
const SWAPCHAIN_IMAGE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    /// Instance exists, still waiting for a graphics queue.
    AwaitingQueue,
    /// Session, swapchains and copy resources are all in place.
    Ready,
}

struct SwapchainState {
    extent: Extent2d,
}

struct OpenFrame {
    frame: FrameState,
    views: [EyeView; 2],
    expected_eye: Eye,
    refreshes: u32,
}

struct SessionInner {
    runtime: Box<dyn RuntimeBackend>,
    swapchains: [Option<SwapchainState>; 2],
    tracking_space: Option<TrackingSpaceKind>,
    open_frame: Option<OpenFrame>,
    head_pose: HeadPose,
    latest_sample: Option<ControllerSample>,
}

/// Owner of the VR runtime lifecycle, the session state machine, and the
/// per-eye submission path.
///
/// All runtime handles stay inside; the public surface deals in plain pose
/// and controller values. The host's render thread drives `update` and
/// `submit_frame`; readiness checks cross threads through atomics so the hot
/// path never touches the initialize mutex. Lock order is `inner` before the
/// shared graphics backend, everywhere.
pub struct VrSession {
    config: Arc<VrConfig>,
    graphics: SharedGraphics,
    inner: Mutex<SessionInner>,
    instance_ready: AtomicBool,
    session_ready: AtomicBool,
    frame_in_progress: AtomicBool,
    state: AtomicU8,
    warned_wait_frame: AtomicBool,
    warned_locate: AtomicBool,
    warned_acquire: AtomicBool,
    warned_image_wait: AtomicBool,
    warned_copy: AtomicBool,
    warned_parity: AtomicBool,
    warned_stale: AtomicBool,
}

impl VrSession {
    pub fn new(
        runtime: Box<dyn RuntimeBackend>,
        graphics: SharedGraphics,
        config: Arc<VrConfig>,
    ) -> Self {
        Self {
            config,
            graphics,
            inner: Mutex::new(SessionInner {
                runtime,
                swapchains: [None, None],
                tracking_space: None,
                open_frame: None,
                head_pose: HeadPose::default(),
                latest_sample: None,
            }),
            instance_ready: AtomicBool::new(false),
            session_ready: AtomicBool::new(false),
            frame_in_progress: AtomicBool::new(false),
            state: AtomicU8::new(SessionState::Unknown.to_u8()),
            warned_wait_frame: AtomicBool::new(false),
            warned_locate: AtomicBool::new(false),
            warned_acquire: AtomicBool::new(false),
            warned_image_wait: AtomicBool::new(false),
            warned_copy: AtomicBool::new(false),
            warned_parity: AtomicBool::new(false),
            warned_stale: AtomicBool::new(false),
        }
    }

    pub fn session_state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_session_running(&self) -> bool {
        self.session_state().is_running()
    }

    pub fn is_session_ready(&self) -> bool {
        self.session_ready.load(Ordering::Acquire)
    }

    pub fn frame_in_progress(&self) -> bool {
        self.frame_in_progress.load(Ordering::Acquire)
    }

    pub fn tracking_space(&self) -> Option<TrackingSpaceKind> {
        self.inner.lock().ok().and_then(|inner| inner.tracking_space)
    }

    /// Two-phase initialization. Phase 1 creates the runtime instance and
    /// can run before any graphics queue exists; phase 2 runs once a queue
    /// is available and is idempotent. Calling again after full success is a
    /// no-op returning `Ready`.
    pub fn initialize(&self, queue: Option<GraphicsQueue>) -> SessionResult<InitPhase> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| crate::vr::SessionError::Runtime("session mutex poisoned".into()))?;

        if !self.instance_ready.load(Ordering::Acquire) {
            inner.runtime.create_instance()?;
            self.instance_ready.store(true, Ordering::Release);
            log::info!("[session] runtime instance created ({})", inner.runtime.label());
        }

        let Some(queue) = queue else {
            log::warn!("[session] waiting for a graphics command queue");
            return Ok(InitPhase::AwaitingQueue);
        };

        if self.session_ready.load(Ordering::Acquire) {
            return Ok(InitPhase::Ready);
        }

        inner.runtime.request_system()?;

        let device = {
            let mut graphics = self
                .graphics
                .lock()
                .map_err(|_| crate::vr::SessionError::Runtime("graphics mutex poisoned".into()))?;
            graphics.device_for_queue(queue)?
        };

        inner.runtime.create_session(device, queue)?;

        let space = inner.runtime.create_tracking_space()?;
        if space == TrackingSpaceKind::Local {
            log::warn!("[session] stage tracking space unavailable, using local space");
        }
        inner.tracking_space = Some(space);

        let views = inner.runtime.view_configurations()?;
        if views.len() != 2 {
            return Err(crate::vr::SessionError::UnsupportedViewConfiguration(
                views.len() as u32,
            ));
        }

        for (index, extent) in views.into_iter().enumerate() {
            let eye = if index == 0 { Eye::Left } else { Eye::Right };
            let info = inner.runtime.create_swapchain(eye, extent)?;
            log::info!(
                "[session] swapchain {}: {}x{} ({} images)",
                index,
                info.extent.width,
                info.extent.height,
                info.image_count
            );
            inner.swapchains[index] = Some(SwapchainState {
                extent: info.extent,
            });
        }

        {
            let mut graphics = self
                .graphics
                .lock()
                .map_err(|_| crate::vr::SessionError::Runtime("graphics mutex poisoned".into()))?;
            graphics.create_copy_resources(device, queue)?;
        }

        self.session_ready.store(true, Ordering::Release);
        log::info!("[session] fully initialized");
        Ok(InitPhase::Ready)
    }

    /// Per-frame update: drain runtime events, then open the next frame and
    /// locate views. Returns the head pose in host space, or `None` when the
    /// session is not running or the frame could not be opened; recoverable
    /// either way.
    ///
    /// While a frame is open and the left eye has already been submitted,
    /// the call refreshes nothing and returns the pose captured at
    /// begin-frame time, so one begin/end pair spans both eye submissions.
    pub fn update(&self) -> Option<HeadPose> {
        if !self.session_ready.load(Ordering::Acquire) {
            return None;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };

        self.drain_events(&mut inner);

        if !self.is_session_running() {
            if self.frame_in_progress.load(Ordering::Acquire) {
                self.discard_open_frame(&mut inner);
            }
            return None;
        }

        if self.frame_in_progress.load(Ordering::Acquire) {
            match inner.open_frame.as_mut() {
                Some(open) if open.expected_eye == Eye::Right && open.refreshes == 0 => {
                    // Mid logical frame: left eye submitted, right pending.
                    open.refreshes += 1;
                    return Some(inner.head_pose);
                }
                _ => {
                    // Begun but never progressed, or refreshed twice without
                    // a submission. Drop it and resynchronize.
                    if !self.warned_stale.swap(true, Ordering::Relaxed) {
                        log::warn!("[session] discarding stale open frame");
                    }
                    self.discard_open_frame(&mut inner);
                }
            }
        }

        let frame = match inner.runtime.wait_frame() {
            Ok(frame) => {
                self.warned_wait_frame.store(false, Ordering::Relaxed);
                frame
            }
            Err(err) => {
                if !self.warned_wait_frame.swap(true, Ordering::Relaxed) {
                    log::warn!("[session] wait-frame failed: {err}");
                }
                return None;
            }
        };

        if let Err(err) = inner.runtime.begin_frame() {
            if !self.warned_wait_frame.swap(true, Ordering::Relaxed) {
                log::warn!("[session] begin-frame failed: {err}");
            }
            return None;
        }

        let views = match inner.runtime.locate_views(frame.predicted_display_time) {
            Ok(views) => {
                self.warned_locate.store(false, Ordering::Relaxed);
                views
            }
            Err(err) => {
                if !self.warned_locate.swap(true, Ordering::Relaxed) {
                    log::warn!("[session] view locate failed: {err}");
                }
                // Pair the begin we just issued.
                let _ = inner.runtime.end_frame(&frame, None);
                return None;
            }
        };

        // Action layer synchronizes once per update cycle, at the predicted
        // display time.
        if inner
            .runtime
            .sync_actions(frame.predicted_display_time)
            .is_ok()
        {
            inner.latest_sample = inner
                .runtime
                .controller_sample(frame.predicted_display_time);
        }

        let head = HeadPose {
            pose: coords::pose_to_host(views[0].pose),
            valid: true,
        };
        inner.head_pose = head;
        inner.open_frame = Some(OpenFrame {
            frame,
            views,
            expected_eye: Eye::Left,
            refreshes: 0,
        });
        self.frame_in_progress.store(true, Ordering::Release);
        Some(head)
    }

    /// Copy the host's color target into the given eye's swapchain and,
    /// after the right eye, close the open frame.
    ///
    /// No-op when the session is not running, the texture is null, or the
    /// eye's swapchain does not exist. A submission for an eye other than
    /// the expected one discards the open frame and waits for the next
    /// `update`.
    pub fn submit_frame(&self, host_texture: TextureHandle, eye: Eye) {
        if !self.session_ready.load(Ordering::Acquire) || !self.is_session_running() {
            return;
        }
        if host_texture.is_null() {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let Some(dest_extent) = inner.swapchains[eye.index()]
            .as_ref()
            .map(|swapchain| swapchain.extent)
        else {
            return;
        };

        if self.frame_in_progress.load(Ordering::Acquire) {
            let expected = inner.open_frame.as_ref().map(|open| open.expected_eye);
            if expected != Some(eye) {
                if !self.warned_parity.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "[session] out-of-order {} submission, dropping open frame",
                        if eye.is_left() { "left-eye" } else { "right-eye" }
                    );
                }
                self.discard_open_frame(&mut inner);
                return;
            }
        }

        let image = match inner.runtime.acquire_image(eye) {
            Ok(image) => {
                self.warned_acquire.store(false, Ordering::Relaxed);
                image
            }
            Err(err) => {
                if !self.warned_acquire.swap(true, Ordering::Relaxed) {
                    log::warn!("[session] swapchain acquire failed: {err}");
                }
                return;
            }
        };

        if let Err(err) = inner.runtime.wait_image(eye, SWAPCHAIN_IMAGE_TIMEOUT) {
            if !self.warned_image_wait.swap(true, Ordering::Relaxed) {
                log::warn!("[session] swapchain wait timed out: {err}");
            }
            return;
        }

        let dest = inner.runtime.swapchain_texture(eye, image);
        if !dest.is_null() {
            let timeout = Duration::from_millis(self.config.gpu_wait_timeout_ms());
            if let Ok(mut graphics) = self.graphics.lock() {
                match graphics.copy_texture(host_texture, dest, dest_extent, timeout) {
                    Ok(_) => self.warned_copy.store(false, Ordering::Relaxed),
                    Err(err) => {
                        // Frame content is stale but the swapchain cycle
                        // continues; the copy is the only casualty.
                        if !self.warned_copy.swap(true, Ordering::Relaxed) {
                            log::warn!("[session] texture copy failed: {err}");
                        }
                    }
                }
            }
        }

        let _ = inner.runtime.release_image(eye);

        match eye {
            Eye::Left => {
                if let Some(open) = inner.open_frame.as_mut() {
                    open.expected_eye = Eye::Right;
                }
            }
            Eye::Right => {
                if self.frame_in_progress.load(Ordering::Acquire) {
                    if let Some(open) = inner.open_frame.take() {
                        let views = if open.frame.should_render {
                            Some(&open.views)
                        } else {
                            None
                        };
                        let _ = inner.runtime.end_frame(&open.frame, views);
                        self.frame_in_progress.store(false, Ordering::Release);
                    }
                }
            }
        }
    }

    /// Latest controller sample, copied out. `None` until the action layer
    /// has synchronized at least once.
    pub fn controller_state(&self) -> Option<ControllerSample> {
        self.inner.lock().ok().and_then(|inner| inner.latest_sample)
    }

    /// Graceful teardown: drain the GPU, close any open frame, end a running
    /// session, drop swapchains and session.
    pub fn shutdown(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        if let Ok(mut graphics) = self.graphics.lock() {
            let timeout = Duration::from_millis(self.config.gpu_wait_timeout_ms());
            let _ = graphics.wait_idle(timeout);
        }

        if let Some(open) = inner.open_frame.take() {
            let _ = inner.runtime.end_frame(&open.frame, None);
        }
        self.frame_in_progress.store(false, Ordering::Release);

        if self.is_session_running() {
            if let Err(err) = inner.runtime.end_session() {
                log::warn!("[session] failed to end session gracefully: {err}");
            }
        }

        inner.runtime.destroy_session();
        inner.swapchains = [None, None];
        inner.latest_sample = None;
        self.session_ready.store(false, Ordering::Release);
        self.set_state(SessionState::Unknown);
        log::info!("[session] shut down");
    }

    fn discard_open_frame(&self, inner: &mut SessionInner) {
        if let Some(open) = inner.open_frame.take() {
            let _ = inner.runtime.end_frame(&open.frame, None);
        }
        self.frame_in_progress.store(false, Ordering::Release);
    }

    fn drain_events(&self, inner: &mut SessionInner) {
        while let Some(event) = inner.runtime.poll_event() {
            match event {
                SessionEvent::StateChanged(new_state) => self.apply_state(inner, new_state),
                SessionEvent::EventsLost(count) => {
                    log::warn!("[session] runtime lost {count} events");
                }
            }
        }
    }

    fn apply_state(&self, inner: &mut SessionInner, new_state: SessionState) {
        self.set_state(new_state);
        match new_state {
            SessionState::Ready => {
                log::info!("[session] state READY, beginning session");
                if let Err(err) = inner.runtime.begin_session() {
                    log::error!("[session] failed to begin session: {err}");
                }
            }
            SessionState::Stopping => {
                log::info!("[session] state STOPPING, ending session");
                if let Err(err) = inner.runtime.end_session() {
                    log::warn!("[session] failed to end session gracefully: {err}");
                }
            }
            SessionState::LossPending => {
                log::warn!("[session] state LOSS_PENDING, headset may have disconnected");
            }
            other => {
                log::info!("[session] state {}", other.as_str());
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{self, NullGraphics};
    use crate::vr::NullRuntime;

    fn make_session() -> VrSession {
        VrSession::new(
            Box::new(NullRuntime::new()),
            gpu::shared(Box::new(NullGraphics::new())),
            Arc::new(VrConfig::new()),
        )
    }

    fn queue() -> GraphicsQueue {
        GraphicsQueue::from_raw(0x0c00_0001)
    }

    #[test]
    fn initialize_without_queue_stops_after_phase_one() {
        let session = make_session();
        let phase = session.initialize(None).expect("phase 1");
        assert_eq!(phase, InitPhase::AwaitingQueue);
        assert!(!session.is_session_ready());

        // Reentrant: phase 1 repeated is still fine.
        let phase = session.initialize(None).expect("phase 1 again");
        assert_eq!(phase, InitPhase::AwaitingQueue);
    }

    #[test]
    fn initialize_with_queue_completes_and_is_idempotent() {
        let session = make_session();
        let phase = session.initialize(Some(queue())).expect("full init");
        assert_eq!(phase, InitPhase::Ready);
        assert!(session.is_session_ready());
        assert_eq!(session.tracking_space(), Some(TrackingSpaceKind::Stage));

        let phase = session.initialize(Some(queue())).expect("repeat init");
        assert_eq!(phase, InitPhase::Ready);
    }

    #[test]
    fn missing_headset_fails_phase_two_without_swapchains() {
        let session = VrSession::new(
            Box::new(NullRuntime::without_headset()),
            gpu::shared(Box::new(NullGraphics::new())),
            Arc::new(VrConfig::new()),
        );

        // Phase 1 succeeds even with no headset.
        assert_eq!(
            session.initialize(None).expect("phase 1"),
            InitPhase::AwaitingQueue
        );

        let err = session.initialize(Some(queue())).unwrap_err();
        assert!(matches!(err, crate::vr::SessionError::NoHeadsetFound));
        assert!(!session.is_session_ready());
    }

    #[test]
    fn non_stereo_runtime_is_rejected() {
        let mut runtime = NullRuntime::new();
        runtime.set_view_count(1);
        let session = VrSession::new(
            Box::new(runtime),
            gpu::shared(Box::new(NullGraphics::new())),
            Arc::new(VrConfig::new()),
        );

        let err = session.initialize(Some(queue())).unwrap_err();
        assert!(matches!(
            err,
            crate::vr::SessionError::UnsupportedViewConfiguration(1)
        ));
    }

    #[test]
    fn local_space_degradation_is_not_an_error() {
        let mut runtime = NullRuntime::new();
        runtime.set_stage_supported(false);
        let session = VrSession::new(
            Box::new(runtime),
            gpu::shared(Box::new(NullGraphics::new())),
            Arc::new(VrConfig::new()),
        );

        session.initialize(Some(queue())).expect("init");
        assert_eq!(session.tracking_space(), Some(TrackingSpaceKind::Local));
    }

    #[test]
    fn update_before_initialize_returns_none() {
        let session = make_session();
        assert!(session.update().is_none());
    }

    #[test]
    fn update_runs_only_after_session_running() {
        let session = make_session();
        session.initialize(Some(queue())).expect("init");

        // First update drains Idle/Ready, triggers begin, then the runtime
        // reports Synchronized/Visible/Focused in the same drain.
        let pose = session.update();
        assert!(pose.is_some());
        assert!(session.is_session_running());
        assert_eq!(session.session_state(), SessionState::Focused);
    }

    #[test]
    fn submit_with_null_texture_changes_nothing() {
        let session = make_session();
        session.initialize(Some(queue())).expect("init");
        session.update().expect("frame open");

        session.submit_frame(TextureHandle::NULL, Eye::Left);
        assert!(session.frame_in_progress());
    }

    #[test]
    fn wait_frame_failure_is_recoverable() {
        let (runtime, handle) = NullRuntime::new().into_shared();
        let session = VrSession::new(
            runtime,
            gpu::shared(Box::new(NullGraphics::new())),
            Arc::new(VrConfig::new()),
        );
        session.initialize(Some(queue())).expect("init");

        handle.lock().unwrap().fail_next_wait_frame();
        assert!(session.update().is_none());
        assert!(!session.frame_in_progress());

        // Next tick succeeds.
        assert!(session.update().is_some());
        assert!(session.frame_in_progress());
    }

    #[test]
    fn locate_failure_still_pairs_begin_and_end() {
        let (runtime, handle) = NullRuntime::new().into_shared();
        let session = VrSession::new(
            runtime,
            gpu::shared(Box::new(NullGraphics::new())),
            Arc::new(VrConfig::new()),
        );
        session.initialize(Some(queue())).expect("init");

        handle.lock().unwrap().fail_next_locate_views();
        assert!(session.update().is_none());

        let runtime = handle.lock().unwrap();
        assert_eq!(runtime.end_frames().len(), 1);
        assert!(!runtime.end_frames()[0].layered);
    }

    #[test]
    fn controller_sample_refreshes_once_per_update_cycle() {
        let (runtime, handle) = NullRuntime::new().into_shared();
        let session = VrSession::new(
            runtime,
            gpu::shared(Box::new(NullGraphics::new())),
            Arc::new(VrConfig::new()),
        );
        session.initialize(Some(queue())).expect("init");
        assert!(session.controller_state().is_none());

        session.update().expect("frame");
        assert!(session.controller_state().is_some());
        assert_eq!(handle.lock().unwrap().actions_synced(), 1);
    }
}
