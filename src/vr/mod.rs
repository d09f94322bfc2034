#[cfg(all(windows, feature = "vr-openxr"))]
pub mod openxr;
pub mod runtime;
pub mod session;

pub use runtime::{NullRuntime, RuntimeBackend, SwapchainInfo};
pub use session::{InitPhase, VrSession};

use crate::coords::Pose;
use crate::gpu::GraphicsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which eye a given tick's camera offset and texture submission target.
/// Parity rule: even frame counter selects the left eye.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    Left = 0,
    Right = 1,
}

impl Eye {
    pub fn from_frame(frame: u64) -> Eye {
        if frame % 2 == 0 { Eye::Left } else { Eye::Right }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_left(self) -> bool {
        matches!(self, Eye::Left)
    }
}

/// Session lifecycle, mirroring the runtime's own states. Transitions are
/// applied only from events drained off the runtime's event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl SessionState {
    /// Frame operations are meaningful only while running.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            SessionState::Synchronized | SessionState::Visible | SessionState::Focused
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Idle => "idle",
            SessionState::Ready => "ready",
            SessionState::Synchronized => "synchronized",
            SessionState::Visible => "visible",
            SessionState::Focused => "focused",
            SessionState::Stopping => "stopping",
            SessionState::LossPending => "loss-pending",
            SessionState::Exiting => "exiting",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            SessionState::Unknown => 0,
            SessionState::Idle => 1,
            SessionState::Ready => 2,
            SessionState::Synchronized => 3,
            SessionState::Visible => 4,
            SessionState::Focused => 5,
            SessionState::Stopping => 6,
            SessionState::LossPending => 7,
            SessionState::Exiting => 8,
        }
    }

    pub(crate) fn from_u8(value: u8) -> SessionState {
        match value {
            1 => SessionState::Idle,
            2 => SessionState::Ready,
            3 => SessionState::Synchronized,
            4 => SessionState::Visible,
            5 => SessionState::Focused,
            6 => SessionState::Stopping,
            7 => SessionState::LossPending,
            8 => SessionState::Exiting,
            _ => SessionState::Unknown,
        }
    }
}

/// Event drained from the runtime's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    EventsLost(u32),
}

/// Head pose in host space, refreshed once per logical frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub pose: Pose,
    pub valid: bool,
}

/// Gamepad-compatible button bits produced by the runtime's action layer.
/// Values match the host's native gamepad flags so merging is a plain OR.
pub mod buttons {
    pub const DPAD_UP: u16 = 0x0001;
    pub const DPAD_DOWN: u16 = 0x0002;
    pub const DPAD_LEFT: u16 = 0x0004;
    pub const DPAD_RIGHT: u16 = 0x0008;
    pub const START: u16 = 0x0010;
    pub const BACK: u16 = 0x0020;
    pub const LEFT_THUMB: u16 = 0x0040;
    pub const RIGHT_THUMB: u16 = 0x0080;
    pub const LEFT_SHOULDER: u16 = 0x0100;
    pub const RIGHT_SHOULDER: u16 = 0x0200;
    pub const A: u16 = 0x1000;
    pub const B: u16 = 0x2000;
    pub const X: u16 = 0x4000;
    pub const Y: u16 = 0x8000;
}

/// Per-hand controller reading; scalars in [0, 1], stick axes in [-1, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HandState {
    pub pose: Pose,
    pub valid: bool,
    pub buttons: u16,
    pub trigger: f32,
    pub grip: f32,
    pub stick: [f32; 2],
}

/// Latest controller sample; copied by value, never queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerSample {
    pub left: HandState,
    pub right: HandState,
}

impl ControllerSample {
    pub fn combined_buttons(&self) -> u16 {
        self.left.buttons | self.right.buttons
    }
}

/// Ephemeral per-tick record produced by wait-frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameState {
    pub predicted_display_time: i64,
    pub should_render: bool,
}

/// Asymmetric field of view, angles in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

/// One eye's located view in runtime space, reused at end-frame time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeView {
    pub pose: Pose,
    pub fov: Fov,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingSpaceKind {
    Stage,
    Local,
}

/// Grip value above this synthesizes the shoulder-button bit; most
/// controllers have no native grip click.
pub const GRIP_CLICK_THRESHOLD: f32 = 0.8;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no compatible VR runtime present: {0}")]
    RuntimeUnavailable(String),
    #[error("no headset found")]
    NoHeadsetFound,
    #[error("runtime reported {0} views, expected stereo")]
    UnsupportedViewConfiguration(u32),
    #[error("runtime call failed: {0}")]
    Runtime(String),
    #[error(transparent)]
    Graphics(#[from] GraphicsError),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eye_parity_follows_frame_counter() {
        assert_eq!(Eye::from_frame(0), Eye::Left);
        assert_eq!(Eye::from_frame(1), Eye::Right);
        assert_eq!(Eye::from_frame(2), Eye::Left);
        assert_eq!(Eye::from_frame(u64::MAX), Eye::Right);
    }

    #[test]
    fn only_synchronized_visible_focused_run() {
        let running = [
            SessionState::Synchronized,
            SessionState::Visible,
            SessionState::Focused,
        ];
        let stopped = [
            SessionState::Unknown,
            SessionState::Idle,
            SessionState::Ready,
            SessionState::Stopping,
            SessionState::LossPending,
            SessionState::Exiting,
        ];
        for state in running {
            assert!(state.is_running(), "{state:?} should run");
        }
        for state in stopped {
            assert!(!state.is_running(), "{state:?} should not run");
        }
    }

    #[test]
    fn state_round_trips_through_atomic_encoding() {
        for state in [
            SessionState::Unknown,
            SessionState::Idle,
            SessionState::Ready,
            SessionState::Synchronized,
            SessionState::Visible,
            SessionState::Focused,
            SessionState::Stopping,
            SessionState::LossPending,
            SessionState::Exiting,
        ] {
            assert_eq!(SessionState::from_u8(state.to_u8()), state);
        }
    }
}
