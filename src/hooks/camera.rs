use crate::config::{AtomicF32, VrConfig};
use crate::coords::{self, Quat, Vec3};
use crate::vr::VrSession;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Yaw/pitch magnitude that maps to full thumbstick deflection.
const AIM_FULL_DEFLECTION_RADIANS: f32 = 0.785;

/// The host camera transform as seen by the hook: written in place, then the
/// real update function runs so host-side dependent logic still executes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraTransform {
    pub position: Vec3,
    pub orientation: Quat,
}

/// Decoupled-aiming state shared between the camera override (writer) and
/// the input intercept (reader). A baseline view direction is captured on
/// the first valid pose or on a recenter request; the smoothed delta from
/// that baseline becomes a synthetic right-thumbstick deflection.
pub struct AimState {
    baseline_yaw: AtomicF32,
    baseline_pitch: AtomicF32,
    smoothed_yaw: AtomicF32,
    smoothed_pitch: AtomicF32,
    has_baseline: AtomicBool,
}

impl Default for AimState {
    fn default() -> Self {
        Self {
            baseline_yaw: AtomicF32::new(0.0),
            baseline_pitch: AtomicF32::new(0.0),
            smoothed_yaw: AtomicF32::new(0.0),
            smoothed_pitch: AtomicF32::new(0.0),
            has_baseline: AtomicBool::new(false),
        }
    }
}

impl AimState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the baseline; the next valid pose re-centers.
    pub fn recenter(&self) {
        self.has_baseline.store(false, Ordering::Release);
        self.smoothed_yaw.store(0.0);
        self.smoothed_pitch.store(0.0);
    }

    pub fn has_baseline(&self) -> bool {
        self.has_baseline.load(Ordering::Acquire)
    }

    /// Feed one head orientation sample; `smoothing` in [0, 0.95].
    pub fn update(&self, orientation: Quat, smoothing: f32) {
        let (yaw, pitch) = coords::host_yaw_pitch(orientation);

        if !self.has_baseline.swap(true, Ordering::AcqRel) {
            self.baseline_yaw.store(yaw);
            self.baseline_pitch.store(pitch);
            self.smoothed_yaw.store(0.0);
            self.smoothed_pitch.store(0.0);
            return;
        }

        let target_yaw = coords::wrap_angle(yaw - self.baseline_yaw.load());
        let target_pitch = pitch - self.baseline_pitch.load();
        let gain = 1.0 - smoothing;

        let smoothed_yaw = self.smoothed_yaw.load() + (target_yaw - self.smoothed_yaw.load()) * gain;
        let smoothed_pitch =
            self.smoothed_pitch.load() + (target_pitch - self.smoothed_pitch.load()) * gain;
        self.smoothed_yaw.store(smoothed_yaw);
        self.smoothed_pitch.store(smoothed_pitch);
    }

    /// Current aim as a right-thumbstick deflection in [-1, 1] per axis.
    pub fn stick_output(&self) -> [f32; 2] {
        [
            (self.smoothed_yaw.load() / AIM_FULL_DEFLECTION_RADIANS).clamp(-1.0, 1.0),
            (self.smoothed_pitch.load() / AIM_FULL_DEFLECTION_RADIANS).clamp(-1.0, 1.0),
        ]
    }
}

/// Intercept for the host's per-frame camera update.
///
/// Runs on the host's render thread before presentation. Queries the session
/// for the current head pose; when VR is disabled or no pose is available
/// the transform is left untouched and the host's native camera stands.
pub struct CameraHook {
    session: Arc<VrSession>,
    config: Arc<VrConfig>,
    aim: Arc<AimState>,
    frame_count: AtomicU64,
}

impl CameraHook {
    pub fn new(session: Arc<VrSession>, config: Arc<VrConfig>, aim: Arc<AimState>) -> Self {
        Self {
            session,
            config,
            aim,
            frame_count: AtomicU64::new(0),
        }
    }

    pub fn aim(&self) -> &Arc<AimState> {
        &self.aim
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Hook body for the camera update. Returns true when the transform was
    /// overridden; the caller forwards to the real update either way.
    pub fn on_camera_update(&self, transform: &mut CameraTransform) -> bool {
        if !self.config.vr_enabled() {
            return false;
        }
        let Some(head) = self.session.update() else {
            return false;
        };
        if !head.valid {
            return false;
        }

        let world_scale = self.config.world_scale();
        let ipd = self.config.ipd_meters();

        let mut position = head.pose.position.scaled(world_scale);

        // Same even/odd schedule as the presentation hook's submission; the
        // counter is independent but describes the same logical eye.
        let frame = self.frame_count.fetch_add(1, Ordering::Relaxed);
        let offset = if frame % 2 == 0 {
            -(ipd / 2.0)
        } else {
            ipd / 2.0
        };
        position.x += offset;

        transform.position = position;
        transform.orientation = head.pose.orientation;

        if self.config.decoupled_aiming() {
            self.aim.update(head.pose.orientation, self.config.aim_smoothing());
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{self, GraphicsQueue, NullGraphics};
    use crate::vr::NullRuntime;

    fn make_hook() -> CameraHook {
        let config = Arc::new(VrConfig::new());
        let graphics = gpu::shared(Box::new(NullGraphics::new()));
        let session = Arc::new(VrSession::new(
            Box::new(NullRuntime::new()),
            graphics,
            Arc::clone(&config),
        ));
        session
            .initialize(Some(GraphicsQueue::from_raw(1)))
            .expect("init");
        CameraHook::new(session, config, Arc::new(AimState::new()))
    }

    #[test]
    fn no_pose_leaves_transform_untouched() {
        let config = Arc::new(VrConfig::new());
        let graphics = gpu::shared(Box::new(NullGraphics::new()));
        let session = Arc::new(VrSession::new(
            Box::new(NullRuntime::new()),
            graphics,
            Arc::clone(&config),
        ));
        let hook = CameraHook::new(session, config, Arc::new(AimState::new()));

        let original = CameraTransform {
            position: Vec3::new(10.0, 20.0, 30.0),
            orientation: Quat::IDENTITY,
        };
        let mut transform = original;
        assert!(!hook.on_camera_update(&mut transform));
        assert_eq!(transform, original);
    }

    #[test]
    fn disabled_vr_leaves_transform_untouched() {
        let hook = make_hook();
        hook.config.set_vr_enabled(false);

        let mut transform = CameraTransform::default();
        assert!(!hook.on_camera_update(&mut transform));
        assert_eq!(transform, CameraTransform::default());
    }

    #[test]
    fn eye_offset_alternates_sign_with_frame_parity() {
        let hook = make_hook();
        let half_ipd = hook.config.ipd_meters() / 2.0;

        let mut transform = CameraTransform::default();
        assert!(hook.on_camera_update(&mut transform));
        let left_x = transform.position.x;

        assert!(hook.on_camera_update(&mut transform));
        let right_x = transform.position.x;

        // Head pose is stationary, so the two reads differ by exactly IPD.
        assert!((right_x - left_x - 2.0 * half_ipd).abs() < 1e-5);
        assert!(left_x < right_x);
    }

    #[test]
    fn world_scale_scales_position() {
        let hook = make_hook();
        hook.config.set_world_scale(2.0);
        hook.config.set_ipd_meters(0.064);

        let mut transform = CameraTransform::default();
        assert!(hook.on_camera_update(&mut transform));
        // Null runtime head height is 1.6m in runtime space, mapped to host
        // up (z), then doubled.
        assert!((transform.position.z - 3.2).abs() < 1e-4);
    }

    #[test]
    fn aim_baseline_recenter_on_first_valid_sample() {
        let aim = AimState::new();
        assert!(!aim.has_baseline());

        aim.update(Quat::IDENTITY, 0.5);
        assert!(aim.has_baseline());
        assert_eq!(aim.stick_output(), [0.0, 0.0]);
    }

    #[test]
    fn aim_smoothing_converges_toward_target() {
        let aim = AimState::new();
        // Yaw the head 0.4 radians right of baseline.
        let half = 0.2f32;
        let yawed = Quat::new(0.0, 0.0, -half.sin(), half.cos());

        aim.update(Quat::IDENTITY, 0.5);
        let mut last = 0.0;
        for _ in 0..32 {
            aim.update(yawed, 0.5);
            let [x, _] = aim.stick_output();
            assert!(x >= last);
            last = x;
        }
        // 0.4 rad of 0.785 full deflection, fully converged.
        assert!((last - 0.4 / AIM_FULL_DEFLECTION_RADIANS).abs() < 0.01);
    }

    #[test]
    fn recenter_clears_baseline_and_output() {
        let aim = AimState::new();
        aim.update(Quat::IDENTITY, 0.0);
        let yawed = Quat::new(0.0, 0.0, 0.3, 0.954);
        aim.update(yawed, 0.0);
        assert_ne!(aim.stick_output()[0], 0.0);

        aim.recenter();
        assert!(!aim.has_baseline());
        assert_eq!(aim.stick_output(), [0.0, 0.0]);
    }
}
