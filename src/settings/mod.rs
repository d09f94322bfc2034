use crate::config::VrConfig;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),
    #[error("setting '{name}' expects a {expected} value")]
    TypeMismatch {
        name: &'static str,
        expected: &'static str,
    },
}

/// Value passed over the scripting-console boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Float(f32),
    Int(u64),
}

/// Named get/set surface over [`VrConfig`] for the host's scripting console.
///
/// Every setter clamps through the config's own validation before storing;
/// an unknown name is an error status, never a panic, since calls originate
/// from user scripts.
pub struct SettingsRegistry {
    config: Arc<VrConfig>,
}

pub const SETTING_NAMES: &[&str] = &[
    "enabled",
    "ipd_mm",
    "world_scale",
    "decoupled_aiming",
    "aim_smoothing",
    "gpu_wait_timeout_ms",
];

impl SettingsRegistry {
    pub fn new(config: Arc<VrConfig>) -> Self {
        Self { config }
    }

    pub fn names(&self) -> &'static [&'static str] {
        SETTING_NAMES
    }

    pub fn get(&self, name: &str) -> Result<SettingValue, SettingsError> {
        match name {
            "enabled" => Ok(SettingValue::Bool(self.config.vr_enabled())),
            "ipd_mm" => Ok(SettingValue::Float(self.config.ipd_millimeters())),
            "world_scale" => Ok(SettingValue::Float(self.config.world_scale())),
            "decoupled_aiming" => Ok(SettingValue::Bool(self.config.decoupled_aiming())),
            "aim_smoothing" => Ok(SettingValue::Float(self.config.aim_smoothing())),
            "gpu_wait_timeout_ms" => Ok(SettingValue::Int(self.config.gpu_wait_timeout_ms())),
            other => Err(SettingsError::UnknownSetting(other.to_string())),
        }
    }

    pub fn set(&self, name: &str, value: SettingValue) -> Result<(), SettingsError> {
        match (name, value) {
            ("enabled", SettingValue::Bool(enabled)) => {
                self.config.set_vr_enabled(enabled);
                log::info!(
                    "[settings] VR {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                Ok(())
            }
            ("enabled", _) => Err(SettingsError::TypeMismatch {
                name: "enabled",
                expected: "bool",
            }),
            ("ipd_mm", SettingValue::Float(millimeters)) => {
                self.config.set_ipd_millimeters(millimeters);
                log::info!(
                    "[settings] IPD set to {:.1}mm",
                    self.config.ipd_millimeters()
                );
                Ok(())
            }
            ("ipd_mm", _) => Err(SettingsError::TypeMismatch {
                name: "ipd_mm",
                expected: "float",
            }),
            ("world_scale", SettingValue::Float(scale)) => {
                self.config.set_world_scale(scale);
                log::info!(
                    "[settings] world scale set to {:.2}",
                    self.config.world_scale()
                );
                Ok(())
            }
            ("world_scale", _) => Err(SettingsError::TypeMismatch {
                name: "world_scale",
                expected: "float",
            }),
            ("decoupled_aiming", SettingValue::Bool(enabled)) => {
                self.config.set_decoupled_aiming(enabled);
                log::info!(
                    "[settings] decoupled aiming {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                Ok(())
            }
            ("decoupled_aiming", _) => Err(SettingsError::TypeMismatch {
                name: "decoupled_aiming",
                expected: "bool",
            }),
            ("aim_smoothing", SettingValue::Float(factor)) => {
                self.config.set_aim_smoothing(factor);
                log::info!(
                    "[settings] aim smoothing set to {:.2}",
                    self.config.aim_smoothing()
                );
                Ok(())
            }
            ("aim_smoothing", _) => Err(SettingsError::TypeMismatch {
                name: "aim_smoothing",
                expected: "float",
            }),
            ("gpu_wait_timeout_ms", SettingValue::Int(millis)) => {
                self.config.set_gpu_wait_timeout_ms(millis);
                log::info!("[settings] GPU wait timeout set to {millis}ms");
                Ok(())
            }
            ("gpu_wait_timeout_ms", _) => Err(SettingsError::TypeMismatch {
                name: "gpu_wait_timeout_ms",
                expected: "int",
            }),
            (other, _) => Err(SettingsError::UnknownSetting(other.to_string())),
        }
    }

    /// All current values as JSON, for console display.
    pub fn snapshot_json(&self) -> String {
        serde_json::to_string_pretty(&self.config.snapshot())
            .unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_clamp_through_config() {
        let registry = SettingsRegistry::new(Arc::new(VrConfig::new()));

        registry
            .set("ipd_mm", SettingValue::Float(40.0))
            .expect("set");
        assert_eq!(registry.get("ipd_mm").unwrap(), SettingValue::Float(50.0));

        registry
            .set("world_scale", SettingValue::Float(9.0))
            .expect("set");
        assert_eq!(
            registry.get("world_scale").unwrap(),
            SettingValue::Float(2.0)
        );

        registry
            .set("aim_smoothing", SettingValue::Float(0.99))
            .expect("set");
        assert_eq!(
            registry.get("aim_smoothing").unwrap(),
            SettingValue::Float(0.95)
        );
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = SettingsRegistry::new(Arc::new(VrConfig::new()));
        assert!(matches!(
            registry.get("nonsense"),
            Err(SettingsError::UnknownSetting(_))
        ));
        assert!(matches!(
            registry.set("nonsense", SettingValue::Bool(true)),
            Err(SettingsError::UnknownSetting(_))
        ));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let registry = SettingsRegistry::new(Arc::new(VrConfig::new()));
        assert!(matches!(
            registry.set("enabled", SettingValue::Float(1.0)),
            Err(SettingsError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn snapshot_serializes_every_field() {
        let registry = SettingsRegistry::new(Arc::new(VrConfig::new()));
        let json = registry.snapshot_json();
        for name in ["ipd_mm", "world_scale", "vr_enabled", "aim_smoothing"] {
            assert!(json.contains(name), "snapshot missing {name}");
        }
    }
}
