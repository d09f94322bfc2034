use crate::config::VrConfig;
use crate::hooks::camera::AimState;
use crate::vr::{ControllerSample, VrSession, buttons};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

const STICK_DEADZONE: f32 = 0.15;

/// Gamepad state in the host's native wire layout. `repr(C)` so the live
/// hook can reinterpret the host's output buffer in place.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GamepadState {
    pub packet_number: u32,
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub thumb_lx: i16,
    pub thumb_ly: i16,
    pub thumb_rx: i16,
    pub thumb_ry: i16,
}

/// Status of the native gamepad query this call forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamepadStatus {
    Connected,
    NotConnected,
}

/// Remap a stick axis out of its deadzone: [deadzone, 1] -> [0, 1].
fn apply_deadzone(value: f32) -> f32 {
    if value.abs() < STICK_DEADZONE {
        return 0.0;
    }
    let sign = if value > 0.0 { 1.0 } else { -1.0 };
    sign * (value.abs() - STICK_DEADZONE) / (1.0 - STICK_DEADZONE)
}

fn float_to_short(value: f32) -> i16 {
    let value = value.clamp(-1.0, 1.0);
    if value >= 0.0 {
        (value * 32767.0) as i16
    } else {
        (value * 32768.0) as i16
    }
}

fn float_to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0) as u8
}

fn short_to_float(value: i16) -> f32 {
    value as f32 / 32767.0
}

/// Replace an axis only when the candidate's magnitude beats the current
/// one, so native and VR input interleave instead of fighting.
fn merge_axis(native: i16, vr_value: f32) -> i16 {
    if vr_value.abs() > short_to_float(native).abs() {
        float_to_short(vr_value)
    } else {
        native
    }
}

/// Intercept for the host's gamepad-state query.
///
/// The caller forwards the real query first and hands its result in; VR
/// controller state is merged on top for controller index 0 only.
pub struct InputHook {
    session: Arc<VrSession>,
    config: Arc<VrConfig>,
    aim: Arc<AimState>,
    last_vr_buttons: AtomicU16,
}

impl InputHook {
    pub fn new(session: Arc<VrSession>, config: Arc<VrConfig>, aim: Arc<AimState>) -> Self {
        Self {
            session,
            config,
            aim,
            last_vr_buttons: AtomicU16::new(0),
        }
    }

    /// Hook body for the gamepad query. `native_status` is the real
    /// function's result for this call; the returned status is what the
    /// host sees.
    pub fn on_gamepad_state(
        &self,
        user_index: u32,
        state: &mut GamepadState,
        native_status: GamepadStatus,
    ) -> GamepadStatus {
        if !self.config.vr_enabled() || user_index != 0 {
            return native_status;
        }
        let Some(sample) = self.session.controller_state() else {
            return native_status;
        };

        // Native controller absent: start from a clean buffer and report
        // success anyway, since VR is supplying a state.
        if native_status == GamepadStatus::NotConnected {
            *state = GamepadState::default();
        }

        self.merge(state, &sample);
        GamepadStatus::Connected
    }

    fn merge(&self, state: &mut GamepadState, sample: &ControllerSample) {
        let vr_buttons = sample.combined_buttons();
        let previous_buttons = self.last_vr_buttons.load(Ordering::Relaxed);
        state.buttons |= vr_buttons;

        // Pressing the right stick re-centers the decoupled-aim baseline.
        if self.config.decoupled_aiming()
            && (vr_buttons & buttons::RIGHT_THUMB) != 0
            && (previous_buttons & buttons::RIGHT_THUMB) == 0
        {
            self.aim.recenter();
        }

        state.left_trigger = state.left_trigger.max(float_to_byte(sample.left.trigger));
        state.right_trigger = state.right_trigger.max(float_to_byte(sample.right.trigger));

        let left_x = apply_deadzone(sample.left.stick[0]);
        let left_y = apply_deadzone(sample.left.stick[1]);
        state.thumb_lx = merge_axis(state.thumb_lx, left_x);
        state.thumb_ly = merge_axis(state.thumb_ly, left_y);

        // Decoupled aiming routes the smoothed head delta onto the right
        // stick in place of the controller's own thumbstick.
        let (right_x, right_y) = if self.config.decoupled_aiming() && self.aim.has_baseline() {
            let [aim_x, aim_y] = self.aim.stick_output();
            (aim_x, aim_y)
        } else {
            (
                apply_deadzone(sample.right.stick[0]),
                apply_deadzone(sample.right.stick[1]),
            )
        };
        state.thumb_rx = merge_axis(state.thumb_rx, right_x);
        state.thumb_ry = merge_axis(state.thumb_ry, right_y);

        // Signal an input-state change whenever the VR-derived buttons
        // differ from the previous tick; the host compares packet numbers.
        self.last_vr_buttons.store(vr_buttons, Ordering::Relaxed);
        if previous_buttons != vr_buttons {
            state.packet_number = state.packet_number.wrapping_add(1);
        }
    }
}
