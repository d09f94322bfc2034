use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// f32 stored as its bit pattern in an `AtomicU32`.
///
/// Configuration fields are read on the host's render and input threads every
/// frame; each field is independently atomic and no cross-field consistency
/// is promised.
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub const fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

pub const IPD_MIN_METERS: f32 = 0.050;
pub const IPD_MAX_METERS: f32 = 0.080;
pub const WORLD_SCALE_MIN: f32 = 0.5;
pub const WORLD_SCALE_MAX: f32 = 2.0;
pub const AIM_SMOOTHING_MIN: f32 = 0.0;
pub const AIM_SMOOTHING_MAX: f32 = 0.95;

const DEFAULT_IPD_METERS: f32 = 0.064;
const DEFAULT_GPU_WAIT_TIMEOUT_MS: u64 = 5000;

/// Process-wide VR settings, written by the settings bridge and read by every
/// hook. Constructed once and handed out as `Arc<VrConfig>`.
pub struct VrConfig {
    ipd_meters: AtomicF32,
    world_scale: AtomicF32,
    vr_enabled: AtomicBool,
    decoupled_aiming: AtomicBool,
    aim_smoothing: AtomicF32,
    gpu_wait_timeout_ms: AtomicU64,
}

impl Default for VrConfig {
    fn default() -> Self {
        Self {
            ipd_meters: AtomicF32::new(DEFAULT_IPD_METERS),
            world_scale: AtomicF32::new(1.0),
            vr_enabled: AtomicBool::new(true),
            decoupled_aiming: AtomicBool::new(true),
            aim_smoothing: AtomicF32::new(0.5),
            gpu_wait_timeout_ms: AtomicU64::new(DEFAULT_GPU_WAIT_TIMEOUT_MS),
        }
    }
}

impl VrConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ipd_meters(&self) -> f32 {
        self.ipd_meters.load()
    }

    /// Clamped to [50mm, 80mm] before storing.
    pub fn set_ipd_meters(&self, meters: f32) {
        self.ipd_meters
            .store(meters.clamp(IPD_MIN_METERS, IPD_MAX_METERS));
    }

    pub fn ipd_millimeters(&self) -> f32 {
        self.ipd_meters() * 1000.0
    }

    pub fn set_ipd_millimeters(&self, millimeters: f32) {
        self.set_ipd_meters(millimeters / 1000.0);
    }

    pub fn world_scale(&self) -> f32 {
        self.world_scale.load()
    }

    /// Clamped to [0.5, 2.0] before storing.
    pub fn set_world_scale(&self, scale: f32) {
        self.world_scale
            .store(scale.clamp(WORLD_SCALE_MIN, WORLD_SCALE_MAX));
    }

    pub fn vr_enabled(&self) -> bool {
        self.vr_enabled.load(Ordering::Relaxed)
    }

    pub fn set_vr_enabled(&self, enabled: bool) {
        self.vr_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn decoupled_aiming(&self) -> bool {
        self.decoupled_aiming.load(Ordering::Relaxed)
    }

    pub fn set_decoupled_aiming(&self, enabled: bool) {
        self.decoupled_aiming.store(enabled, Ordering::Relaxed);
    }

    pub fn aim_smoothing(&self) -> f32 {
        self.aim_smoothing.load()
    }

    /// Clamped to [0.0, 0.95] before storing.
    pub fn set_aim_smoothing(&self, factor: f32) {
        self.aim_smoothing
            .store(factor.clamp(AIM_SMOOTHING_MIN, AIM_SMOOTHING_MAX));
    }

    pub fn gpu_wait_timeout_ms(&self) -> u64 {
        self.gpu_wait_timeout_ms.load(Ordering::Relaxed)
    }

    pub fn set_gpu_wait_timeout_ms(&self, millis: u64) {
        self.gpu_wait_timeout_ms.store(millis, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            ipd_mm: self.ipd_millimeters(),
            world_scale: self.world_scale(),
            vr_enabled: self.vr_enabled(),
            decoupled_aiming: self.decoupled_aiming(),
            aim_smoothing: self.aim_smoothing(),
            gpu_wait_timeout_ms: self.gpu_wait_timeout_ms(),
        }
    }
}

/// Point-in-time copy of every field, for the scripting console.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub ipd_mm: f32,
    pub world_scale: f32,
    pub vr_enabled: bool,
    pub decoupled_aiming: bool,
    pub aim_smoothing: f32,
    pub gpu_wait_timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipd_setter_clamps_to_documented_range() {
        let config = VrConfig::new();

        config.set_ipd_millimeters(40.0);
        assert_eq!(config.ipd_millimeters(), 50.0);

        config.set_ipd_millimeters(90.0);
        assert_eq!(config.ipd_millimeters(), 80.0);

        config.set_ipd_millimeters(64.0);
        assert!((config.ipd_millimeters() - 64.0).abs() < 1e-4);
    }

    #[test]
    fn world_scale_and_smoothing_clamp() {
        let config = VrConfig::new();

        config.set_world_scale(0.1);
        assert_eq!(config.world_scale(), WORLD_SCALE_MIN);
        config.set_world_scale(5.0);
        assert_eq!(config.world_scale(), WORLD_SCALE_MAX);

        config.set_aim_smoothing(-1.0);
        assert_eq!(config.aim_smoothing(), AIM_SMOOTHING_MIN);
        config.set_aim_smoothing(1.0);
        assert_eq!(config.aim_smoothing(), AIM_SMOOTHING_MAX);
    }

    #[test]
    fn atomic_f32_round_trips_exact_bits() {
        let value = AtomicF32::new(0.064);
        assert_eq!(value.load(), 0.064);
        value.store(-3.25);
        assert_eq!(value.load(), -3.25);
    }

    #[test]
    fn snapshot_reflects_current_fields() {
        let config = VrConfig::new();
        config.set_vr_enabled(false);
        config.set_world_scale(1.5);

        let snapshot = config.snapshot();
        assert!(!snapshot.vr_enabled);
        assert_eq!(snapshot.world_scale, 1.5);
        assert_eq!(snapshot.gpu_wait_timeout_ms, 5000);
    }
}
