use serde::{Deserialize, Serialize};

/// Plain 3-component vector, host or runtime space depending on context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            z: self.z * factor,
        }
    }

    pub fn approx_eq(self, other: Vec3, epsilon: f32) -> bool {
        (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.z - other.z).abs() <= epsilon
    }
}

/// Unit quaternion stored as (x, y, z, w).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotate a vector by this quaternion (q * v * q^-1, assuming unit length).
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let s = self.w;
        let dot_uv = u.x * v.x + u.y * v.y + u.z * v.z;
        let dot_uu = u.x * u.x + u.y * u.y + u.z * u.z;
        let cross = Vec3::new(
            u.y * v.z - u.z * v.y,
            u.z * v.x - u.x * v.z,
            u.x * v.y - u.y * v.x,
        );
        Vec3::new(
            2.0 * dot_uv * u.x + (s * s - dot_uu) * v.x + 2.0 * s * cross.x,
            2.0 * dot_uv * u.y + (s * s - dot_uu) * v.y + 2.0 * s * cross.y,
            2.0 * dot_uv * u.z + (s * s - dot_uu) * v.z + 2.0 * s * cross.z,
        )
    }

    pub fn approx_eq(self, other: Quat, epsilon: f32) -> bool {
        (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.z - other.z).abs() <= epsilon
            && (self.w - other.w).abs() <= epsilon
    }
}

/// Position plus orientation as one value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }
}

// The VR runtime tracks in a right-handed space: X-right, Y-up, Z-back.
// The host engine is left-handed: X-right, Y-forward, Z-up. Both mappings
// are pure component shuffles, so the round trip is exact.

pub fn position_to_host(runtime: Vec3) -> Vec3 {
    Vec3::new(runtime.x, -runtime.z, runtime.y)
}

pub fn position_to_runtime(host: Vec3) -> Vec3 {
    Vec3::new(host.x, host.z, -host.y)
}

pub fn orientation_to_host(runtime: Quat) -> Quat {
    Quat::new(runtime.x, -runtime.z, runtime.y, runtime.w)
}

pub fn orientation_to_runtime(host: Quat) -> Quat {
    Quat::new(host.x, host.z, -host.y, host.w)
}

pub fn pose_to_host(runtime: Pose) -> Pose {
    Pose::new(
        position_to_host(runtime.position),
        orientation_to_host(runtime.orientation),
    )
}

pub fn pose_to_runtime(host: Pose) -> Pose {
    Pose::new(
        position_to_runtime(host.position),
        orientation_to_runtime(host.orientation),
    )
}

/// Yaw/pitch of the host-space forward axis (+Y) after rotation.
///
/// Yaw is positive turning toward +X (the host's right), pitch positive
/// looking up toward +Z. Used by the decoupled-aiming path.
pub fn host_yaw_pitch(orientation: Quat) -> (f32, f32) {
    let forward = orientation.rotate(Vec3::new(0.0, 1.0, 0.0));
    let yaw = forward.x.atan2(forward.y);
    let pitch = forward.z.clamp(-1.0, 1.0).asin();
    (yaw, pitch)
}

/// Wrap an angle difference into (-pi, pi].
pub fn wrap_angle(radians: f32) -> f32 {
    let mut value = radians;
    while value > std::f32::consts::PI {
        value -= std::f32::consts::TAU;
    }
    while value <= -std::f32::consts::PI {
        value += std::f32::consts::TAU;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPSILON: f32 = 1e-6;

    #[test]
    fn identity_pose_round_trips() {
        let pose = Pose::default();
        let back = pose_to_runtime(pose_to_host(pose));
        assert!(back.position.approx_eq(pose.position, EPSILON));
        assert!(back.orientation.approx_eq(pose.orientation, EPSILON));
    }

    #[test]
    fn axis_aligned_positions_map_between_conventions() {
        // Runtime "up" (+Y) becomes host "up" (+Z).
        let up = position_to_host(Vec3::new(0.0, 1.0, 0.0));
        assert!(up.approx_eq(Vec3::new(0.0, 0.0, 1.0), EPSILON));

        // Runtime "back" (+Z) becomes host "behind" (-Y).
        let back = position_to_host(Vec3::new(0.0, 0.0, 1.0));
        assert!(back.approx_eq(Vec3::new(0.0, -1.0, 0.0), EPSILON));

        // X-right is shared.
        let right = position_to_host(Vec3::new(1.0, 0.0, 0.0));
        assert!(right.approx_eq(Vec3::new(1.0, 0.0, 0.0), EPSILON));
    }

    #[test]
    fn yaw_pitch_of_identity_is_zero() {
        let (yaw, pitch) = host_yaw_pitch(Quat::IDENTITY);
        assert!(yaw.abs() < EPSILON);
        assert!(pitch.abs() < EPSILON);
    }

    #[test]
    fn wrap_angle_keeps_range() {
        assert!((wrap_angle(3.0 * std::f32::consts::PI) - std::f32::consts::PI).abs() < 1e-5);
        assert!(wrap_angle(-3.5 * std::f32::consts::PI) <= std::f32::consts::PI);
        assert!((wrap_angle(0.25) - 0.25).abs() < EPSILON);
    }

    proptest! {
        #[test]
        fn position_round_trip(x in -100.0f32..100.0, y in -100.0f32..100.0, z in -100.0f32..100.0) {
            let original = Vec3::new(x, y, z);
            let back = position_to_runtime(position_to_host(original));
            prop_assert!(back.approx_eq(original, EPSILON));

            let back_host = position_to_host(position_to_runtime(original));
            prop_assert!(back_host.approx_eq(original, EPSILON));
        }

        #[test]
        fn orientation_round_trip(x in -1.0f32..1.0, y in -1.0f32..1.0, z in -1.0f32..1.0, w in -1.0f32..1.0) {
            let original = Quat::new(x, y, z, w);
            let back = orientation_to_runtime(orientation_to_host(original));
            prop_assert!(back.approx_eq(original, EPSILON));
        }
    }
}
