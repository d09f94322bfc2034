use crate::coords::{Pose, Vec3};
use crate::gpu::{Extent2d, GraphicsDevice, GraphicsQueue, TextureHandle};
use crate::vr::{
    ControllerSample, Eye, EyeView, Fov, FrameState, HandState, SessionError, SessionEvent,
    SessionResult, SessionState, TrackingSpaceKind, buttons, GRIP_CLICK_THRESHOLD,
};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub extent: Extent2d,
    pub image_count: u32,
}

/// The opaque seam in front of the VR runtime.
///
/// Everything runtime-specific (instance, session, swapchain and space
/// handles) stays behind this trait; the session manager sees only plain
/// data. Call order is owned by the session manager: instance before
/// session, session before swapchains, wait-frame before begin-frame.
pub trait RuntimeBackend: Send {
    fn label(&self) -> &'static str;

    /// Phase-1 initialization. Failure means no compatible runtime exists.
    fn create_instance(&mut self) -> SessionResult<()>;

    /// Headset discovery. `NoHeadsetFound` until one is connected.
    fn request_system(&mut self) -> SessionResult<()>;

    /// Bind a session to the plugin's device/queue pair.
    fn create_session(&mut self, device: GraphicsDevice, queue: GraphicsQueue)
    -> SessionResult<()>;

    /// Prefer a room-scale stage space, degrade to a seated local space.
    fn create_tracking_space(&mut self) -> SessionResult<TrackingSpaceKind>;

    /// Recommended per-view extents; stereo runtimes report exactly two.
    fn view_configurations(&mut self) -> SessionResult<Vec<Extent2d>>;

    fn create_swapchain(&mut self, eye: Eye, extent: Extent2d) -> SessionResult<SwapchainInfo>;

    fn poll_event(&mut self) -> Option<SessionEvent>;

    fn begin_session(&mut self) -> SessionResult<()>;

    fn end_session(&mut self) -> SessionResult<()>;

    fn wait_frame(&mut self) -> SessionResult<FrameState>;

    fn begin_frame(&mut self) -> SessionResult<()>;

    fn locate_views(&mut self, display_time: i64) -> SessionResult<[EyeView; 2]>;

    fn acquire_image(&mut self, eye: Eye) -> SessionResult<u32>;

    fn wait_image(&mut self, eye: Eye, timeout: Duration) -> SessionResult<()>;

    fn swapchain_texture(&self, eye: Eye, image_index: u32) -> TextureHandle;

    fn release_image(&mut self, eye: Eye) -> SessionResult<()>;

    /// Close the frame opened by `begin_frame`. `views` carries the two
    /// projection views to composite; `None` discards the frame (no layers).
    fn end_frame(&mut self, frame: &FrameState, views: Option<&[EyeView; 2]>) -> SessionResult<()>;

    fn sync_actions(&mut self, display_time: i64) -> SessionResult<()>;

    fn controller_sample(&mut self, display_time: i64) -> Option<ControllerSample>;

    fn destroy_session(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndFrameRecord {
    pub display_time: i64,
    pub layered: bool,
}

struct NullSwapchain {
    extent: Extent2d,
    image_count: u32,
    acquired: Option<u32>,
    next_image: u32,
}

/// In-process runtime used by the default build and the state-machine and
/// frame-pipeline tests. Event flow and failures are scriptable; when left
/// alone it behaves like a healthy runtime with a connected headset.
pub struct NullRuntime {
    headset_present: bool,
    stage_supported: bool,
    view_count: u32,
    instance_created: bool,
    session_created: bool,
    session_began: bool,
    begin_session_requests: u32,
    end_session_requests: u32,
    events: VecDeque<SessionEvent>,
    next_display_time: i64,
    fail_wait_frames: u32,
    fail_locate_views: u32,
    fail_image_waits: u32,
    swapchains: [Option<NullSwapchain>; 2],
    end_frames: Vec<EndFrameRecord>,
    head_pose: Pose,
    controller: ControllerSample,
    actions_synced: u32,
}

impl Default for NullRuntime {
    fn default() -> Self {
        let mut controller = ControllerSample::default();
        controller.left = HandState {
            pose: Pose::new(Vec3::new(-0.25, 1.4, 0.3), Default::default()),
            valid: true,
            ..Default::default()
        };
        controller.right = HandState {
            pose: Pose::new(Vec3::new(0.25, 1.4, 0.3), Default::default()),
            valid: true,
            ..Default::default()
        };
        Self {
            headset_present: true,
            stage_supported: true,
            view_count: 2,
            instance_created: false,
            session_created: false,
            session_began: false,
            begin_session_requests: 0,
            end_session_requests: 0,
            events: VecDeque::new(),
            next_display_time: 1_000_000,
            fail_wait_frames: 0,
            fail_locate_views: 0,
            fail_image_waits: 0,
            swapchains: [None, None],
            end_frames: Vec::new(),
            head_pose: Pose::new(Vec3::new(0.0, 1.6, 0.0), Default::default()),
            controller,
            actions_synced: 0,
        }
    }
}

impl NullRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_headset() -> Self {
        Self {
            headset_present: false,
            ..Self::default()
        }
    }

    pub fn set_headset_present(&mut self, present: bool) {
        self.headset_present = present;
    }

    pub fn set_stage_supported(&mut self, supported: bool) {
        self.stage_supported = supported;
    }

    pub fn set_view_count(&mut self, count: u32) {
        self.view_count = count;
    }

    pub fn push_event(&mut self, state: SessionState) {
        self.events.push_back(SessionEvent::StateChanged(state));
    }

    pub fn fail_next_wait_frame(&mut self) {
        self.fail_wait_frames += 1;
    }

    pub fn fail_next_locate_views(&mut self) {
        self.fail_locate_views += 1;
    }

    pub fn fail_next_image_wait(&mut self) {
        self.fail_image_waits += 1;
    }

    pub fn set_head_pose(&mut self, pose: Pose) {
        self.head_pose = pose;
    }

    pub fn set_controller(&mut self, sample: ControllerSample) {
        self.controller = sample;
    }

    /// Raw grip scalars applied with the shoulder-bit synthesis policy.
    pub fn set_grips(&mut self, left: f32, right: f32) {
        self.controller.left.grip = left;
        self.controller.right.grip = right;
        apply_grip_click(&mut self.controller.left, buttons::LEFT_SHOULDER);
        apply_grip_click(&mut self.controller.right, buttons::RIGHT_SHOULDER);
    }

    pub fn end_frames(&self) -> &[EndFrameRecord] {
        &self.end_frames
    }

    pub fn begin_session_requests(&self) -> u32 {
        self.begin_session_requests
    }

    pub fn end_session_requests(&self) -> u32 {
        self.end_session_requests
    }

    pub fn actions_synced(&self) -> u32 {
        self.actions_synced
    }

    pub fn swapchain_count(&self) -> usize {
        self.swapchains.iter().flatten().count()
    }

    fn swapchain_mut(&mut self, eye: Eye) -> SessionResult<&mut NullSwapchain> {
        self.swapchains[eye.index()]
            .as_mut()
            .ok_or_else(|| SessionError::Runtime("swapchain not created".into()))
    }

    /// Split into a boxed backend plus an inspection handle, for tests that
    /// need to script failures or read submission records afterwards.
    pub fn into_shared(
        self,
    ) -> (
        Box<dyn RuntimeBackend>,
        std::sync::Arc<std::sync::Mutex<NullRuntime>>,
    ) {
        let handle = std::sync::Arc::new(std::sync::Mutex::new(self));
        (
            Box::new(SharedNullRuntime(std::sync::Arc::clone(&handle))),
            handle,
        )
    }
}

struct SharedNullRuntime(std::sync::Arc<std::sync::Mutex<NullRuntime>>);

impl SharedNullRuntime {
    fn with<R>(&self, f: impl FnOnce(&mut NullRuntime) -> R) -> R {
        let mut inner = self.0.lock().expect("null runtime mutex should not poison");
        f(&mut inner)
    }
}

impl RuntimeBackend for SharedNullRuntime {
    fn label(&self) -> &'static str {
        "Null VR Runtime"
    }

    fn create_instance(&mut self) -> SessionResult<()> {
        self.with(|r| r.create_instance())
    }

    fn request_system(&mut self) -> SessionResult<()> {
        self.with(|r| r.request_system())
    }

    fn create_session(
        &mut self,
        device: GraphicsDevice,
        queue: GraphicsQueue,
    ) -> SessionResult<()> {
        self.with(|r| r.create_session(device, queue))
    }

    fn create_tracking_space(&mut self) -> SessionResult<TrackingSpaceKind> {
        self.with(|r| r.create_tracking_space())
    }

    fn view_configurations(&mut self) -> SessionResult<Vec<Extent2d>> {
        self.with(|r| r.view_configurations())
    }

    fn create_swapchain(&mut self, eye: Eye, extent: Extent2d) -> SessionResult<SwapchainInfo> {
        self.with(|r| r.create_swapchain(eye, extent))
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.with(|r| r.poll_event())
    }

    fn begin_session(&mut self) -> SessionResult<()> {
        self.with(|r| r.begin_session())
    }

    fn end_session(&mut self) -> SessionResult<()> {
        self.with(|r| r.end_session())
    }

    fn wait_frame(&mut self) -> SessionResult<FrameState> {
        self.with(|r| r.wait_frame())
    }

    fn begin_frame(&mut self) -> SessionResult<()> {
        self.with(|r| r.begin_frame())
    }

    fn locate_views(&mut self, display_time: i64) -> SessionResult<[EyeView; 2]> {
        self.with(|r| r.locate_views(display_time))
    }

    fn acquire_image(&mut self, eye: Eye) -> SessionResult<u32> {
        self.with(|r| r.acquire_image(eye))
    }

    fn wait_image(&mut self, eye: Eye, timeout: Duration) -> SessionResult<()> {
        self.with(|r| r.wait_image(eye, timeout))
    }

    fn swapchain_texture(&self, eye: Eye, image_index: u32) -> TextureHandle {
        let inner = self.0.lock().expect("null runtime mutex should not poison");
        inner.swapchain_texture(eye, image_index)
    }

    fn release_image(&mut self, eye: Eye) -> SessionResult<()> {
        self.with(|r| r.release_image(eye))
    }

    fn end_frame(&mut self, frame: &FrameState, views: Option<&[EyeView; 2]>) -> SessionResult<()> {
        self.with(|r| r.end_frame(frame, views))
    }

    fn sync_actions(&mut self, display_time: i64) -> SessionResult<()> {
        self.with(|r| r.sync_actions(display_time))
    }

    fn controller_sample(&mut self, display_time: i64) -> Option<ControllerSample> {
        self.with(|r| r.controller_sample(display_time))
    }

    fn destroy_session(&mut self) {
        self.with(|r| r.destroy_session());
    }
}

fn apply_grip_click(hand: &mut HandState, shoulder_bit: u16) {
    if hand.grip > GRIP_CLICK_THRESHOLD {
        hand.buttons |= shoulder_bit;
    } else {
        hand.buttons &= !shoulder_bit;
    }
}

impl RuntimeBackend for NullRuntime {
    fn label(&self) -> &'static str {
        "Null VR Runtime"
    }

    fn create_instance(&mut self) -> SessionResult<()> {
        self.instance_created = true;
        Ok(())
    }

    fn request_system(&mut self) -> SessionResult<()> {
        if !self.instance_created {
            return Err(SessionError::Runtime("instance not created".into()));
        }
        if !self.headset_present {
            return Err(SessionError::NoHeadsetFound);
        }
        Ok(())
    }

    fn create_session(
        &mut self,
        _device: GraphicsDevice,
        queue: GraphicsQueue,
    ) -> SessionResult<()> {
        if queue.raw() == 0 {
            return Err(SessionError::Runtime("null command queue".into()));
        }
        self.session_created = true;
        // A healthy runtime announces readiness as soon as a session exists.
        self.events
            .push_back(SessionEvent::StateChanged(SessionState::Idle));
        self.events
            .push_back(SessionEvent::StateChanged(SessionState::Ready));
        Ok(())
    }

    fn create_tracking_space(&mut self) -> SessionResult<TrackingSpaceKind> {
        if !self.session_created {
            return Err(SessionError::Runtime("session not created".into()));
        }
        Ok(if self.stage_supported {
            TrackingSpaceKind::Stage
        } else {
            TrackingSpaceKind::Local
        })
    }

    fn view_configurations(&mut self) -> SessionResult<Vec<Extent2d>> {
        Ok((0..self.view_count)
            .map(|_| Extent2d::new(1440, 1600))
            .collect())
    }

    fn create_swapchain(&mut self, eye: Eye, extent: Extent2d) -> SessionResult<SwapchainInfo> {
        if !self.session_created {
            return Err(SessionError::Runtime("session not created".into()));
        }
        let info = SwapchainInfo {
            extent,
            image_count: 3,
        };
        self.swapchains[eye.index()] = Some(NullSwapchain {
            extent,
            image_count: info.image_count,
            acquired: None,
            next_image: 0,
        });
        Ok(info)
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    fn begin_session(&mut self) -> SessionResult<()> {
        self.begin_session_requests += 1;
        self.session_began = true;
        // The runtime synchronizes and surfaces the app over the next ticks.
        self.events
            .push_back(SessionEvent::StateChanged(SessionState::Synchronized));
        self.events
            .push_back(SessionEvent::StateChanged(SessionState::Visible));
        self.events
            .push_back(SessionEvent::StateChanged(SessionState::Focused));
        Ok(())
    }

    fn end_session(&mut self) -> SessionResult<()> {
        self.end_session_requests += 1;
        self.session_began = false;
        Ok(())
    }

    fn wait_frame(&mut self) -> SessionResult<FrameState> {
        if self.fail_wait_frames > 0 {
            self.fail_wait_frames -= 1;
            return Err(SessionError::Runtime("wait-frame failed".into()));
        }
        self.next_display_time += 11_111_111; // ~90Hz tick
        Ok(FrameState {
            predicted_display_time: self.next_display_time,
            should_render: true,
        })
    }

    fn begin_frame(&mut self) -> SessionResult<()> {
        Ok(())
    }

    fn locate_views(&mut self, _display_time: i64) -> SessionResult<[EyeView; 2]> {
        if self.fail_locate_views > 0 {
            self.fail_locate_views -= 1;
            return Err(SessionError::Runtime("view locate failed".into()));
        }
        let fov = Fov {
            angle_left: -0.8,
            angle_right: 0.8,
            angle_up: 0.8,
            angle_down: -0.8,
        };
        Ok([
            EyeView {
                pose: self.head_pose,
                fov,
            },
            EyeView {
                pose: self.head_pose,
                fov,
            },
        ])
    }

    fn acquire_image(&mut self, eye: Eye) -> SessionResult<u32> {
        let swapchain = self.swapchain_mut(eye)?;
        if swapchain.acquired.is_some() {
            return Err(SessionError::Runtime("image already acquired".into()));
        }
        let index = swapchain.next_image;
        swapchain.next_image = (swapchain.next_image + 1) % swapchain.image_count;
        swapchain.acquired = Some(index);
        Ok(index)
    }

    fn wait_image(&mut self, eye: Eye, _timeout: Duration) -> SessionResult<()> {
        if self.fail_image_waits > 0 {
            self.fail_image_waits -= 1;
            return Err(SessionError::Runtime("swapchain wait timed out".into()));
        }
        self.swapchain_mut(eye)?;
        Ok(())
    }

    fn swapchain_texture(&self, eye: Eye, image_index: u32) -> TextureHandle {
        match &self.swapchains[eye.index()] {
            Some(_) => TextureHandle::from_raw(0x1000 * (eye.index() + 1) + image_index as usize),
            None => TextureHandle::NULL,
        }
    }

    fn release_image(&mut self, eye: Eye) -> SessionResult<()> {
        let swapchain = self.swapchain_mut(eye)?;
        swapchain.acquired = None;
        Ok(())
    }

    fn end_frame(&mut self, frame: &FrameState, views: Option<&[EyeView; 2]>) -> SessionResult<()> {
        self.end_frames.push(EndFrameRecord {
            display_time: frame.predicted_display_time,
            layered: views.is_some(),
        });
        Ok(())
    }

    fn sync_actions(&mut self, _display_time: i64) -> SessionResult<()> {
        self.actions_synced += 1;
        Ok(())
    }

    fn controller_sample(&mut self, _display_time: i64) -> Option<ControllerSample> {
        Some(self.controller)
    }

    fn destroy_session(&mut self) {
        self.session_created = false;
        self.session_began = false;
        self.swapchains = [None, None];
    }
}
