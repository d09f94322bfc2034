use crate::coords::{Pose, Quat, Vec3};
use crate::gpu::{Extent2d, GraphicsDevice, GraphicsQueue, TextureHandle};
use crate::vr::{
    ControllerSample, Eye, EyeView, Fov, FrameState, GRIP_CLICK_THRESHOLD, HandState,
    RuntimeBackend, SessionError, SessionEvent, SessionResult, SessionState, SwapchainInfo,
    TrackingSpaceKind, buttons,
};
use openxr as xr;
use std::time::Duration;

// DXGI_FORMAT_R8G8B8A8_UNORM; must match the host's back-buffer format so
// the copy is a plain region transfer.
const SWAPCHAIN_FORMAT: u32 = 28;

const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

fn xr_err(context: &str, err: impl std::fmt::Display) -> SessionError {
    SessionError::Runtime(format!("{context}: {err}"))
}

fn to_pose(pose: xr::Posef) -> Pose {
    Pose::new(
        Vec3::new(pose.position.x, pose.position.y, pose.position.z),
        Quat::new(
            pose.orientation.x,
            pose.orientation.y,
            pose.orientation.z,
            pose.orientation.w,
        ),
    )
}

fn to_session_state(state: xr::SessionState) -> Option<SessionState> {
    match state {
        xr::SessionState::IDLE => Some(SessionState::Idle),
        xr::SessionState::READY => Some(SessionState::Ready),
        xr::SessionState::SYNCHRONIZED => Some(SessionState::Synchronized),
        xr::SessionState::VISIBLE => Some(SessionState::Visible),
        xr::SessionState::FOCUSED => Some(SessionState::Focused),
        xr::SessionState::STOPPING => Some(SessionState::Stopping),
        xr::SessionState::LOSS_PENDING => Some(SessionState::LossPending),
        xr::SessionState::EXITING => Some(SessionState::Exiting),
        _ => None,
    }
}

struct EyeSwapchain {
    handle: xr::Swapchain<xr::D3D12>,
    extent: Extent2d,
    images: Vec<usize>,
}

struct HandActions {
    subaction: xr::Path,
    space: xr::Space,
    shoulder_bit: u16,
    primary_bit: u16,
    secondary_bit: u16,
    thumb_bit: u16,
}

struct ActionLayer {
    action_set: xr::ActionSet,
    hand_pose: xr::Action<xr::Posef>,
    trigger: xr::Action<f32>,
    grip: xr::Action<f32>,
    stick: xr::Action<xr::Vector2f>,
    stick_click: xr::Action<bool>,
    primary: xr::Action<bool>,
    secondary: xr::Action<bool>,
    menu: xr::Action<bool>,
    hands: [HandActions; 2],
}

/// Live OpenXR backend bound to the host's D3D12 device and the plugin's
/// command queue. All handles stay private to this module.
pub struct OpenXrRuntime {
    entry: Option<xr::Entry>,
    instance: Option<xr::Instance>,
    system: Option<xr::SystemId>,
    session: Option<xr::Session<xr::D3D12>>,
    frame_waiter: Option<xr::FrameWaiter>,
    frame_stream: Option<xr::FrameStream<xr::D3D12>>,
    space: Option<xr::Space>,
    swapchains: [Option<EyeSwapchain>; 2],
    actions: Option<ActionLayer>,
    event_storage: xr::EventDataBuffer,
    blend_mode: xr::EnvironmentBlendMode,
}

impl Default for OpenXrRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenXrRuntime {
    pub fn new() -> Self {
        Self {
            entry: None,
            instance: None,
            system: None,
            session: None,
            frame_waiter: None,
            frame_stream: None,
            space: None,
            swapchains: [None, None],
            actions: None,
            event_storage: xr::EventDataBuffer::new(),
            blend_mode: xr::EnvironmentBlendMode::OPAQUE,
        }
    }

    fn instance(&self) -> SessionResult<&xr::Instance> {
        self.instance
            .as_ref()
            .ok_or_else(|| SessionError::Runtime("instance not created".into()))
    }

    fn session(&self) -> SessionResult<&xr::Session<xr::D3D12>> {
        self.session
            .as_ref()
            .ok_or_else(|| SessionError::Runtime("session not created".into()))
    }

    fn swapchain(&self, eye: Eye) -> SessionResult<&EyeSwapchain> {
        self.swapchains[eye.index()]
            .as_ref()
            .ok_or_else(|| SessionError::Runtime("swapchain not created".into()))
    }

    fn swapchain_mut(&mut self, eye: Eye) -> SessionResult<&mut EyeSwapchain> {
        self.swapchains[eye.index()]
            .as_mut()
            .ok_or_else(|| SessionError::Runtime("swapchain not created".into()))
    }

    fn path(&self, path: &str) -> SessionResult<xr::Path> {
        self.instance()?
            .string_to_path(path)
            .map_err(|err| xr_err("string_to_path", err))
    }

    fn setup_actions(&mut self) -> SessionResult<()> {
        let instance = self.instance()?.clone();
        let session = self.session()?.clone();

        let left_path = self.path("/user/hand/left")?;
        let right_path = self.path("/user/hand/right")?;
        let subactions = [left_path, right_path];

        let action_set = instance
            .create_action_set("gameplay", "Gameplay", 0)
            .map_err(|err| xr_err("create_action_set", err))?;

        let hand_pose = action_set
            .create_action::<xr::Posef>("hand_pose", "Hand Pose", &subactions)
            .map_err(|err| xr_err("create_action", err))?;
        let trigger = action_set
            .create_action::<f32>("trigger", "Trigger", &subactions)
            .map_err(|err| xr_err("create_action", err))?;
        let grip = action_set
            .create_action::<f32>("grip", "Grip", &subactions)
            .map_err(|err| xr_err("create_action", err))?;
        let stick = action_set
            .create_action::<xr::Vector2f>("thumbstick", "Thumbstick", &subactions)
            .map_err(|err| xr_err("create_action", err))?;
        let stick_click = action_set
            .create_action::<bool>("thumbstick_click", "Thumbstick Click", &subactions)
            .map_err(|err| xr_err("create_action", err))?;
        let primary = action_set
            .create_action::<bool>("primary_button", "Primary Button", &subactions)
            .map_err(|err| xr_err("create_action", err))?;
        let secondary = action_set
            .create_action::<bool>("secondary_button", "Secondary Button", &subactions)
            .map_err(|err| xr_err("create_action", err))?;
        let menu = action_set
            .create_action::<bool>("menu_button", "Menu", &subactions)
            .map_err(|err| xr_err("create_action", err))?;

        // Bindings are suggested per interaction profile because button
        // paths differ between controller families: Touch has x/y on the
        // left hand and a/b on the right, Index has a/b on both. A profile
        // that fails to bind is skipped; the others still work.
        let touch_bindings = [
            ("/user/hand/left/input/grip/pose", &hand_pose as &dyn BindingSource),
            ("/user/hand/right/input/grip/pose", &hand_pose),
            ("/user/hand/left/input/trigger/value", &trigger),
            ("/user/hand/right/input/trigger/value", &trigger),
            ("/user/hand/left/input/squeeze/value", &grip),
            ("/user/hand/right/input/squeeze/value", &grip),
            ("/user/hand/left/input/thumbstick", &stick),
            ("/user/hand/right/input/thumbstick", &stick),
            ("/user/hand/left/input/thumbstick/click", &stick_click),
            ("/user/hand/right/input/thumbstick/click", &stick_click),
            ("/user/hand/left/input/x/click", &primary),
            ("/user/hand/right/input/a/click", &primary),
            ("/user/hand/left/input/y/click", &secondary),
            ("/user/hand/right/input/b/click", &secondary),
            ("/user/hand/left/input/menu/click", &menu),
        ];
        let index_bindings = [
            ("/user/hand/left/input/grip/pose", &hand_pose as &dyn BindingSource),
            ("/user/hand/right/input/grip/pose", &hand_pose),
            ("/user/hand/left/input/trigger/value", &trigger),
            ("/user/hand/right/input/trigger/value", &trigger),
            ("/user/hand/left/input/squeeze/value", &grip),
            ("/user/hand/right/input/squeeze/value", &grip),
            ("/user/hand/left/input/thumbstick", &stick),
            ("/user/hand/right/input/thumbstick", &stick),
            ("/user/hand/left/input/thumbstick/click", &stick_click),
            ("/user/hand/right/input/thumbstick/click", &stick_click),
            ("/user/hand/left/input/a/click", &primary),
            ("/user/hand/right/input/a/click", &primary),
            ("/user/hand/left/input/b/click", &secondary),
            ("/user/hand/right/input/b/click", &secondary),
        ];

        let mut bound_profiles = 0;
        for (profile, bindings) in [
            ("/interaction_profiles/oculus/touch_controller", &touch_bindings[..]),
            ("/interaction_profiles/valve/index_controller", &index_bindings[..]),
        ] {
            match self.suggest_profile(&instance, profile, bindings) {
                Ok(()) => bound_profiles += 1,
                Err(err) => {
                    log::warn!("[openxr] binding suggestion failed for {profile}: {err}");
                }
            }
        }
        if bound_profiles == 0 {
            return Err(SessionError::Runtime(
                "no interaction profile accepted bindings".into(),
            ));
        }

        session
            .attach_action_sets(&[&action_set])
            .map_err(|err| xr_err("attach_action_sets", err))?;

        let left_space = hand_pose
            .create_space(&session, left_path, xr::Posef::IDENTITY)
            .map_err(|err| xr_err("create_space", err))?;
        let right_space = hand_pose
            .create_space(&session, right_path, xr::Posef::IDENTITY)
            .map_err(|err| xr_err("create_space", err))?;

        self.actions = Some(ActionLayer {
            action_set,
            hand_pose,
            trigger,
            grip,
            stick,
            stick_click,
            primary,
            secondary,
            menu,
            hands: [
                HandActions {
                    subaction: left_path,
                    space: left_space,
                    shoulder_bit: buttons::LEFT_SHOULDER,
                    primary_bit: buttons::X,
                    secondary_bit: buttons::Y,
                    thumb_bit: buttons::LEFT_THUMB,
                },
                HandActions {
                    subaction: right_path,
                    space: right_space,
                    shoulder_bit: buttons::RIGHT_SHOULDER,
                    primary_bit: buttons::A,
                    secondary_bit: buttons::B,
                    thumb_bit: buttons::RIGHT_THUMB,
                },
            ],
        });
        Ok(())
    }

    fn suggest_profile(
        &self,
        instance: &xr::Instance,
        profile: &str,
        bindings: &[(&str, &dyn BindingSource)],
    ) -> SessionResult<()> {
        let profile_path = instance
            .string_to_path(profile)
            .map_err(|err| xr_err("string_to_path", err))?;
        let mut suggested = Vec::with_capacity(bindings.len());
        for (path, action) in bindings {
            let binding_path = instance
                .string_to_path(path)
                .map_err(|err| xr_err("string_to_path", err))?;
            suggested.push(action.binding(binding_path));
        }
        instance
            .suggest_interaction_profile_bindings(profile_path, &suggested)
            .map_err(|err| xr_err("suggest_interaction_profile_bindings", err))
    }

    fn read_hand(
        &self,
        layer: &ActionLayer,
        hand_index: usize,
        display_time: i64,
    ) -> HandState {
        let session = match self.session() {
            Ok(session) => session,
            Err(_) => return HandState::default(),
        };
        let hand = &layer.hands[hand_index];
        let mut state = HandState::default();

        if let Ok(value) = layer.trigger.state(session, hand.subaction) {
            state.trigger = value.current_state;
        }
        if let Ok(value) = layer.grip.state(session, hand.subaction) {
            state.grip = value.current_state;
        }
        if let Ok(value) = layer.stick.state(session, hand.subaction) {
            state.stick = [value.current_state.x, value.current_state.y];
        }
        if let Ok(value) = layer.stick_click.state(session, hand.subaction) {
            if value.current_state {
                state.buttons |= hand.thumb_bit;
            }
        }
        if let Ok(value) = layer.primary.state(session, hand.subaction) {
            if value.current_state {
                state.buttons |= hand.primary_bit;
            }
        }
        if let Ok(value) = layer.secondary.state(session, hand.subaction) {
            if value.current_state {
                state.buttons |= hand.secondary_bit;
            }
        }
        if hand_index == 0 {
            if let Ok(value) = layer.menu.state(session, hand.subaction) {
                if value.current_state {
                    state.buttons |= buttons::START;
                }
            }
        }
        if state.grip > GRIP_CLICK_THRESHOLD {
            state.buttons |= hand.shoulder_bit;
        }

        if let Some(space) = self.space.as_ref() {
            if let Ok(location) = hand
                .space
                .locate(space, xr::Time::from_nanos(display_time))
            {
                state.valid = location
                    .location_flags
                    .contains(xr::SpaceLocationFlags::POSITION_VALID);
                if state.valid {
                    state.pose = to_pose(location.pose);
                }
            }
        }
        state
    }
}

/// Erases the action value type so one table drives both profiles.
trait BindingSource {
    fn binding(&self, path: xr::Path) -> xr::Binding<'_>;
}

impl<T: xr::ActionTy> BindingSource for xr::Action<T> {
    fn binding(&self, path: xr::Path) -> xr::Binding<'_> {
        xr::Binding::new(self, path)
    }
}

impl RuntimeBackend for OpenXrRuntime {
    fn label(&self) -> &'static str {
        "OpenXR"
    }

    fn create_instance(&mut self) -> SessionResult<()> {
        if self.instance.is_some() {
            return Ok(());
        }
        let entry = xr::Entry::load()
            .map_err(|err| SessionError::RuntimeUnavailable(format!("loader: {err}")))?;

        let available = entry
            .enumerate_extensions()
            .map_err(|err| SessionError::RuntimeUnavailable(format!("extensions: {err}")))?;
        if !available.khr_d3d12_enable {
            return Err(SessionError::RuntimeUnavailable(
                "runtime lacks XR_KHR_D3D12_enable".into(),
            ));
        }
        let mut extensions = xr::ExtensionSet::default();
        extensions.khr_d3d12_enable = true;

        let instance = entry
            .create_instance(
                &xr::ApplicationInfo {
                    application_name: "parallax_vr",
                    application_version: 1,
                    engine_name: "parallax_vr",
                    engine_version: 1,
                },
                &extensions,
                &[],
            )
            .map_err(|err| SessionError::RuntimeUnavailable(format!("instance: {err}")))?;

        if let Ok(props) = instance.properties() {
            log::info!(
                "[openxr] runtime {} v{}",
                props.runtime_name,
                props.runtime_version
            );
        }

        self.entry = Some(entry);
        self.instance = Some(instance);
        Ok(())
    }

    fn request_system(&mut self) -> SessionResult<()> {
        let instance = self.instance()?;
        match instance.system(xr::FormFactor::HEAD_MOUNTED_DISPLAY) {
            Ok(system) => {
                if let Ok(props) = instance.system_properties(system) {
                    log::info!(
                        "[openxr] headset: {} (vendor {:#x})",
                        props.system_name,
                        props.vendor_id
                    );
                }
                self.system = Some(system);
                Ok(())
            }
            Err(xr::sys::Result::ERROR_FORM_FACTOR_UNAVAILABLE) => {
                Err(SessionError::NoHeadsetFound)
            }
            Err(err) => Err(xr_err("xrGetSystem", err)),
        }
    }

    fn create_session(
        &mut self,
        device: GraphicsDevice,
        queue: GraphicsQueue,
    ) -> SessionResult<()> {
        let instance = self.instance()?.clone();
        let system = self
            .system
            .ok_or(SessionError::NoHeadsetFound)?;

        let requirements = instance
            .graphics_requirements::<xr::D3D12>(system)
            .map_err(|err| xr_err("graphics_requirements", err))?;
        log::info!(
            "[openxr] D3D12 min feature level {:#x}",
            requirements.min_feature_level
        );

        let (session, frame_waiter, frame_stream) = unsafe {
            instance
                .create_session::<xr::D3D12>(
                    system,
                    &xr::d3d::SessionCreateInfoD3D12 {
                        device: device.raw() as *mut _,
                        queue: queue.raw() as *mut _,
                    },
                )
                .map_err(|err| xr_err("xrCreateSession", err))?
        };

        self.session = Some(session);
        self.frame_waiter = Some(frame_waiter);
        self.frame_stream = Some(frame_stream);

        self.blend_mode = instance
            .enumerate_environment_blend_modes(system, VIEW_TYPE)
            .ok()
            .and_then(|modes| modes.first().copied())
            .unwrap_or(xr::EnvironmentBlendMode::OPAQUE);

        if let Err(err) = self.setup_actions() {
            // Controllers degrade; head tracking and submission still work.
            log::warn!("[openxr] action layer unavailable: {err}");
        }
        Ok(())
    }

    fn create_tracking_space(&mut self) -> SessionResult<TrackingSpaceKind> {
        let session = self.session()?;
        match session.create_reference_space(xr::ReferenceSpaceType::STAGE, xr::Posef::IDENTITY) {
            Ok(space) => {
                self.space = Some(space);
                Ok(TrackingSpaceKind::Stage)
            }
            Err(_) => {
                let space = session
                    .create_reference_space(xr::ReferenceSpaceType::LOCAL, xr::Posef::IDENTITY)
                    .map_err(|err| xr_err("xrCreateReferenceSpace", err))?;
                self.space = Some(space);
                Ok(TrackingSpaceKind::Local)
            }
        }
    }

    fn view_configurations(&mut self) -> SessionResult<Vec<Extent2d>> {
        let instance = self.instance()?;
        let system = self.system.ok_or(SessionError::NoHeadsetFound)?;
        let views = instance
            .enumerate_view_configuration_views(system, VIEW_TYPE)
            .map_err(|err| xr_err("enumerate_view_configuration_views", err))?;
        Ok(views
            .iter()
            .map(|view| {
                Extent2d::new(
                    view.recommended_image_rect_width,
                    view.recommended_image_rect_height,
                )
            })
            .collect())
    }

    fn create_swapchain(&mut self, eye: Eye, extent: Extent2d) -> SessionResult<SwapchainInfo> {
        let session = self.session()?;
        let handle = session
            .create_swapchain(&xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT
                    | xr::SwapchainUsageFlags::TRANSFER_DST,
                format: SWAPCHAIN_FORMAT,
                sample_count: 1,
                width: extent.width,
                height: extent.height,
                face_count: 1,
                array_size: 1,
                mip_count: 1,
            })
            .map_err(|err| xr_err("xrCreateSwapchain", err))?;

        let images = handle
            .enumerate_images()
            .map_err(|err| xr_err("enumerate_images", err))?
            .into_iter()
            .map(|image| image as usize)
            .collect::<Vec<_>>();
        let info = SwapchainInfo {
            extent,
            image_count: images.len() as u32,
        };
        self.swapchains[eye.index()] = Some(EyeSwapchain {
            handle,
            extent,
            images,
        });
        Ok(info)
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        let instance = self.instance.as_ref()?;
        loop {
            let event = instance.poll_event(&mut self.event_storage).ok()??;
            match event {
                xr::Event::SessionStateChanged(changed) => {
                    if let Some(state) = to_session_state(changed.state()) {
                        return Some(SessionEvent::StateChanged(state));
                    }
                }
                xr::Event::InstanceLossPending(_) => {
                    return Some(SessionEvent::StateChanged(SessionState::LossPending));
                }
                xr::Event::EventsLost(lost) => {
                    return Some(SessionEvent::EventsLost(lost.lost_event_count()));
                }
                _ => {}
            }
        }
    }

    fn begin_session(&mut self) -> SessionResult<()> {
        self.session()?
            .begin(VIEW_TYPE)
            .map_err(|err| xr_err("xrBeginSession", err))
    }

    fn end_session(&mut self) -> SessionResult<()> {
        self.session()?
            .end()
            .map_err(|err| xr_err("xrEndSession", err))
    }

    fn wait_frame(&mut self) -> SessionResult<FrameState> {
        let waiter = self
            .frame_waiter
            .as_mut()
            .ok_or_else(|| SessionError::Runtime("frame waiter missing".into()))?;
        let state = waiter.wait().map_err(|err| xr_err("xrWaitFrame", err))?;
        Ok(FrameState {
            predicted_display_time: state.predicted_display_time.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self) -> SessionResult<()> {
        let stream = self
            .frame_stream
            .as_mut()
            .ok_or_else(|| SessionError::Runtime("frame stream missing".into()))?;
        stream.begin().map_err(|err| xr_err("xrBeginFrame", err))?;
        Ok(())
    }

    fn locate_views(&mut self, display_time: i64) -> SessionResult<[EyeView; 2]> {
        let session = self.session()?;
        let space = self
            .space
            .as_ref()
            .ok_or_else(|| SessionError::Runtime("tracking space missing".into()))?;
        let (_flags, views) = session
            .locate_views(VIEW_TYPE, xr::Time::from_nanos(display_time), space)
            .map_err(|err| xr_err("xrLocateViews", err))?;
        if views.len() < 2 {
            return Err(SessionError::Runtime(format!(
                "located {} views",
                views.len()
            )));
        }
        let convert = |view: &xr::View| EyeView {
            pose: to_pose(view.pose),
            fov: Fov {
                angle_left: view.fov.angle_left,
                angle_right: view.fov.angle_right,
                angle_up: view.fov.angle_up,
                angle_down: view.fov.angle_down,
            },
        };
        Ok([convert(&views[0]), convert(&views[1])])
    }

    fn acquire_image(&mut self, eye: Eye) -> SessionResult<u32> {
        self.swapchain_mut(eye)?
            .handle
            .acquire_image()
            .map_err(|err| xr_err("xrAcquireSwapchainImage", err))
    }

    fn wait_image(&mut self, eye: Eye, timeout: Duration) -> SessionResult<()> {
        self.swapchain_mut(eye)?
            .handle
            .wait_image(xr::Duration::from_nanos(timeout.as_nanos() as i64))
            .map_err(|err| xr_err("xrWaitSwapchainImage", err))
    }

    fn swapchain_texture(&self, eye: Eye, image_index: u32) -> TextureHandle {
        match self.swapchain(eye) {
            Ok(swapchain) => swapchain
                .images
                .get(image_index as usize)
                .copied()
                .map(TextureHandle::from_raw)
                .unwrap_or(TextureHandle::NULL),
            Err(_) => TextureHandle::NULL,
        }
    }

    fn release_image(&mut self, eye: Eye) -> SessionResult<()> {
        self.swapchain_mut(eye)?
            .handle
            .release_image()
            .map_err(|err| xr_err("xrReleaseSwapchainImage", err))
    }

    fn end_frame(&mut self, frame: &FrameState, views: Option<&[EyeView; 2]>) -> SessionResult<()> {
        let space = self
            .space
            .as_ref()
            .ok_or_else(|| SessionError::Runtime("tracking space missing".into()))?;
        let stream = self
            .frame_stream
            .as_mut()
            .ok_or_else(|| SessionError::Runtime("frame stream missing".into()))?;
        let display_time = xr::Time::from_nanos(frame.predicted_display_time);

        let (Some(views), Some(left), Some(right)) = (
            views,
            self.swapchains[0].as_ref(),
            self.swapchains[1].as_ref(),
        ) else {
            return stream
                .end(display_time, self.blend_mode, &[])
                .map_err(|err| xr_err("xrEndFrame", err));
        };

        let to_xr_pose = |pose: &Pose| xr::Posef {
            position: xr::Vector3f {
                x: pose.position.x,
                y: pose.position.y,
                z: pose.position.z,
            },
            orientation: xr::Quaternionf {
                x: pose.orientation.x,
                y: pose.orientation.y,
                z: pose.orientation.z,
                w: pose.orientation.w,
            },
        };
        let to_xr_fov = |fov: &Fov| xr::Fovf {
            angle_left: fov.angle_left,
            angle_right: fov.angle_right,
            angle_up: fov.angle_up,
            angle_down: fov.angle_down,
        };
        let rect = |swapchain: &EyeSwapchain| xr::Rect2Di {
            offset: xr::Offset2Di { x: 0, y: 0 },
            extent: xr::Extent2Di {
                width: swapchain.extent.width as i32,
                height: swapchain.extent.height as i32,
            },
        };

        let projection_views = [
            xr::CompositionLayerProjectionView::new()
                .pose(to_xr_pose(&views[0].pose))
                .fov(to_xr_fov(&views[0].fov))
                .sub_image(
                    xr::SwapchainSubImage::new()
                        .swapchain(&left.handle)
                        .image_array_index(0)
                        .image_rect(rect(left)),
                ),
            xr::CompositionLayerProjectionView::new()
                .pose(to_xr_pose(&views[1].pose))
                .fov(to_xr_fov(&views[1].fov))
                .sub_image(
                    xr::SwapchainSubImage::new()
                        .swapchain(&right.handle)
                        .image_array_index(0)
                        .image_rect(rect(right)),
                ),
        ];
        let layer = xr::CompositionLayerProjection::new()
            .space(space)
            .views(&projection_views);

        stream
            .end(display_time, self.blend_mode, &[&layer])
            .map_err(|err| xr_err("xrEndFrame", err))
    }

    fn sync_actions(&mut self, _display_time: i64) -> SessionResult<()> {
        let layer = self
            .actions
            .as_ref()
            .ok_or_else(|| SessionError::Runtime("action layer missing".into()))?;
        self.session()?
            .sync_actions(&[(&layer.action_set).into()])
            .map_err(|err| xr_err("xrSyncActions", err))
    }

    fn controller_sample(&mut self, display_time: i64) -> Option<ControllerSample> {
        let layer = self.actions.take()?;
        let sample = ControllerSample {
            left: self.read_hand(&layer, 0, display_time),
            right: self.read_hand(&layer, 1, display_time),
        };
        self.actions = Some(layer);
        Some(sample)
    }

    fn destroy_session(&mut self) {
        self.actions = None;
        self.swapchains = [None, None];
        self.space = None;
        self.frame_stream = None;
        self.frame_waiter = None;
        self.session = None;
        self.system = None;
    }
}
