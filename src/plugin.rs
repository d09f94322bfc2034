use crate::config::VrConfig;
use crate::gpu::{self, GraphicsBackend, SharedGraphics};
use crate::hooks::{
    AimState, CameraHook, HookBackend, HookError, HookRegistry, InputHook, PresentHook,
};
use crate::settings::SettingsRegistry;
use crate::vr::{RuntimeBackend, SessionError, VrSession};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Hook(#[from] HookError),
}

/// A resolved hook point: where to patch and what to patch in.
#[derive(Debug, Clone, Copy)]
pub struct HookPoint {
    pub target: usize,
    pub replacement: usize,
}

/// Addresses produced by the locator layer. Presentation is mandatory;
/// the other two degrade gracefully when their patterns were not found.
#[derive(Debug, Clone, Copy)]
pub struct HookTargets {
    pub present: HookPoint,
    pub camera_update: Option<HookPoint>,
    pub gamepad_query: Option<HookPoint>,
}

/// Top-level wiring, in the load/unload shape the host's plugin loader
/// expects. Construction order: config, session phase 1, presentation hook
/// (fatal on failure), camera hook (degraded-ok), input hook (warn only),
/// settings bridge. Teardown runs in reverse.
pub struct VrPlugin {
    config: Arc<VrConfig>,
    graphics: SharedGraphics,
    session: Arc<VrSession>,
    aim: Arc<AimState>,
    present: Arc<PresentHook>,
    camera: Arc<CameraHook>,
    input: Arc<InputHook>,
    settings: SettingsRegistry,
    registry: HookRegistry,
    head_tracking: bool,
    controller_merge: bool,
    unloaded: bool,
}

impl VrPlugin {
    pub fn load(
        runtime: Box<dyn RuntimeBackend>,
        graphics: Box<dyn GraphicsBackend>,
        hook_backend: Box<dyn HookBackend>,
        targets: HookTargets,
    ) -> Result<Self, PluginError> {
        log::info!("[plugin] initializing VR layer");

        let config = Arc::new(VrConfig::new());
        let graphics = gpu::shared(graphics);
        let session = Arc::new(VrSession::new(
            runtime,
            Arc::clone(&graphics),
            Arc::clone(&config),
        ));

        // Phase 1 only; the command queue arrives with the first captured
        // presentation.
        session.initialize(None)?;

        let registry = HookRegistry::new(hook_backend);

        let present = Arc::new(PresentHook::new(
            Arc::clone(&session),
            Arc::clone(&graphics),
            Arc::clone(&config),
        ));
        registry.install(
            "present",
            targets.present.target,
            targets.present.replacement,
        )?;

        let aim = Arc::new(AimState::new());
        let camera = Arc::new(CameraHook::new(
            Arc::clone(&session),
            Arc::clone(&config),
            Arc::clone(&aim),
        ));
        let head_tracking = match targets.camera_update {
            Some(point) => match registry.install("camera-update", point.target, point.replacement)
            {
                Ok(_) => true,
                Err(err) => {
                    log::warn!("[plugin] camera hook unavailable: {err}");
                    false
                }
            },
            None => {
                log::warn!("[plugin] camera update target not found; head tracking disabled");
                false
            }
        };

        let input = Arc::new(InputHook::new(
            Arc::clone(&session),
            Arc::clone(&config),
            Arc::clone(&aim),
        ));
        let controller_merge = match targets.gamepad_query {
            Some(point) => match registry.install("gamepad-query", point.target, point.replacement)
            {
                Ok(_) => true,
                Err(err) => {
                    log::warn!("[plugin] input hook unavailable: {err}");
                    false
                }
            },
            None => {
                log::warn!("[plugin] gamepad query target not found; controller merge disabled");
                false
            }
        };

        let settings = SettingsRegistry::new(Arc::clone(&config));

        log::info!("[plugin] all systems initialized");
        Ok(Self {
            config,
            graphics,
            session,
            aim,
            present,
            camera,
            input,
            settings,
            registry,
            head_tracking,
            controller_merge,
            unloaded: false,
        })
    }

    pub fn config(&self) -> &Arc<VrConfig> {
        &self.config
    }

    pub fn graphics(&self) -> &SharedGraphics {
        &self.graphics
    }

    pub fn session(&self) -> &Arc<VrSession> {
        &self.session
    }

    pub fn aim(&self) -> &Arc<AimState> {
        &self.aim
    }

    pub fn present_hook(&self) -> &Arc<PresentHook> {
        &self.present
    }

    pub fn camera_hook(&self) -> &Arc<CameraHook> {
        &self.camera
    }

    pub fn input_hook(&self) -> &Arc<InputHook> {
        &self.input
    }

    pub fn settings(&self) -> &SettingsRegistry {
        &self.settings
    }

    pub fn head_tracking_enabled(&self) -> bool {
        self.head_tracking
    }

    pub fn controller_merge_enabled(&self) -> bool {
        self.controller_merge
    }

    pub fn installed_hooks(&self) -> usize {
        self.registry.installed_count()
    }

    /// Trampoline address recorded for an installed hook, for the raw shims
    /// to forward through.
    pub fn trampoline(&self, name: &str) -> Option<usize> {
        self.registry.trampoline_for(name)
    }

    /// Teardown in reverse of load: stop intercepting, let in-flight hook
    /// invocations drain, release captured resources, end the session.
    pub fn unload(&mut self) {
        if self.unloaded {
            return;
        }
        self.unloaded = true;
        log::info!("[plugin] unloading VR layer");

        self.registry.remove_all();
        self.present.shutdown();
        self.session.shutdown();

        log::info!("[plugin] unloaded");
    }
}

impl Drop for VrPlugin {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NullGraphics;
    use crate::hooks::RecordingHookBackend;
    use crate::vr::NullRuntime;

    fn targets() -> HookTargets {
        HookTargets {
            present: HookPoint {
                target: 0x1000,
                replacement: 0x2000,
            },
            camera_update: Some(HookPoint {
                target: 0x3000,
                replacement: 0x4000,
            }),
            gamepad_query: Some(HookPoint {
                target: 0x5000,
                replacement: 0x6000,
            }),
        }
    }

    #[test]
    fn load_installs_all_available_hooks() {
        let plugin = VrPlugin::load(
            Box::new(NullRuntime::new()),
            Box::new(NullGraphics::new()),
            Box::new(RecordingHookBackend::new()),
            targets(),
        )
        .expect("load");

        assert_eq!(plugin.installed_hooks(), 3);
        assert!(plugin.head_tracking_enabled());
        assert!(plugin.controller_merge_enabled());
    }

    #[test]
    fn missing_camera_target_degrades_not_fails() {
        let mut degraded = targets();
        degraded.camera_update = None;

        let plugin = VrPlugin::load(
            Box::new(NullRuntime::new()),
            Box::new(NullGraphics::new()),
            Box::new(RecordingHookBackend::new()),
            degraded,
        )
        .expect("load");

        assert!(!plugin.head_tracking_enabled());
        assert_eq!(plugin.installed_hooks(), 2);
    }

    #[test]
    fn present_attach_failure_is_fatal() {
        let backend = RecordingHookBackend::new();
        backend.fail_next_attach();

        let result = VrPlugin::load(
            Box::new(NullRuntime::new()),
            Box::new(NullGraphics::new()),
            Box::new(backend),
            targets(),
        );
        assert!(matches!(result, Err(PluginError::Hook(_))));
    }

    #[test]
    fn unload_is_idempotent() {
        let mut plugin = VrPlugin::load(
            Box::new(NullRuntime::new()),
            Box::new(NullGraphics::new()),
            Box::new(RecordingHookBackend::new()),
            targets(),
        )
        .expect("load");

        plugin.unload();
        assert_eq!(plugin.installed_hooks(), 0);
        assert!(plugin.present_hook().is_shutdown_requested());
        plugin.unload();
    }
}
