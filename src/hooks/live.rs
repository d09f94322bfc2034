//! Raw hook shims for the live build: the extern "system" functions patched
//! into the host, plus target resolution for the three entry points. Each
//! shim swallows internal failures and always forwards to the trampoline;
//! nothing here may unwind into host frames.

use crate::coords::{Quat, Vec3};
use crate::gpu::SurfaceHandle;
use crate::hooks::camera::CameraTransform;
use crate::hooks::input::{GamepadState, GamepadStatus};
use crate::hooks::{HookBackend, HookError};
use crate::plugin::{HookPoint, HookTargets, PluginError, VrPlugin};
use crate::scan::Pattern;
use once_cell::sync::OnceCell;
use retour::RawDetour;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const ERROR_DEVICE_NOT_CONNECTED: u32 = 1167;

/// Byte signature of the host's camera update prologue, with fallbacks for
/// older builds. Not found means head tracking stays off.
const CAMERA_UPDATE_PATTERNS: &[&str] = &[
    "40 53 48 83 EC 20 48 8B D9 E8 ?? ?? ?? ?? 48 8B CB",
    "48 89 5C 24 ?? 57 48 83 EC ?? 48 8B D9 48 8B 89 ?? ?? ?? ?? 48 85 C9",
    "F3 0F 10 ?? ?? ?? ?? ?? F3 0F 10 ?? ?? ?? ?? ?? 48 8D ?? ?? ?? ?? ??",
];

/// Offset of the world transform inside the host's camera component.
const CAMERA_TRANSFORM_OFFSET: usize = 0x60;

/// World transform as laid out in host memory: position as a 4-float vector,
/// orientation quaternion after it.
#[repr(C)]
struct HostWorldTransform {
    position: [f32; 4],
    orientation: [f32; 4],
}

type PresentFn = unsafe extern "system" fn(*mut c_void, u32, u32) -> i32;
type CameraUpdateFn = unsafe extern "system" fn(*mut c_void);
type GamepadQueryFn = unsafe extern "system" fn(u32, *mut GamepadState) -> u32;

struct LiveHooks {
    present: Arc<crate::hooks::PresentHook>,
    camera: Arc<crate::hooks::CameraHook>,
    input: Arc<crate::hooks::InputHook>,
    present_trampoline: AtomicUsize,
    camera_trampoline: AtomicUsize,
    gamepad_trampoline: AtomicUsize,
}

static LIVE: OnceCell<LiveHooks> = OnceCell::new();

unsafe extern "system" fn present_shim(
    swapchain: *mut c_void,
    sync_interval: u32,
    flags: u32,
) -> i32 {
    let Some(live) = LIVE.get() else {
        return 0;
    };
    live.present
        .on_present(SurfaceHandle::from_raw(swapchain as usize));

    let trampoline = live.present_trampoline.load(Ordering::Acquire);
    if trampoline == 0 {
        return 0;
    }
    let real: PresentFn = unsafe { std::mem::transmute(trampoline) };
    unsafe { real(swapchain, sync_interval, flags) }
}

unsafe extern "system" fn camera_update_shim(component: *mut c_void) {
    if let Some(live) = LIVE.get() {
        if !component.is_null() {
            let raw = unsafe {
                &mut *((component as *mut u8).add(CAMERA_TRANSFORM_OFFSET)
                    as *mut HostWorldTransform)
            };
            let mut transform = CameraTransform {
                position: Vec3::new(raw.position[0], raw.position[1], raw.position[2]),
                orientation: Quat::new(
                    raw.orientation[0],
                    raw.orientation[1],
                    raw.orientation[2],
                    raw.orientation[3],
                ),
            };
            if live.camera.on_camera_update(&mut transform) {
                raw.position = [
                    transform.position.x,
                    transform.position.y,
                    transform.position.z,
                    1.0,
                ];
                raw.orientation = [
                    transform.orientation.x,
                    transform.orientation.y,
                    transform.orientation.z,
                    transform.orientation.w,
                ];
            }
        }

        let trampoline = live.camera_trampoline.load(Ordering::Acquire);
        if trampoline != 0 {
            let real: CameraUpdateFn = unsafe { std::mem::transmute(trampoline) };
            unsafe { real(component) };
        }
    }
}

unsafe extern "system" fn gamepad_query_shim(user_index: u32, state: *mut GamepadState) -> u32 {
    let Some(live) = LIVE.get() else {
        return ERROR_DEVICE_NOT_CONNECTED;
    };
    let trampoline = live.gamepad_trampoline.load(Ordering::Acquire);
    if trampoline == 0 {
        return ERROR_DEVICE_NOT_CONNECTED;
    }

    // Native query runs first so a physical pad keeps working untouched.
    let real: GamepadQueryFn = unsafe { std::mem::transmute(trampoline) };
    let native = unsafe { real(user_index, state) };
    if state.is_null() {
        return native;
    }

    let native_status = if native == 0 {
        GamepadStatus::Connected
    } else {
        GamepadStatus::NotConnected
    };
    let merged = live
        .input
        .on_gamepad_state(user_index, unsafe { &mut *state }, native_status);
    match merged {
        GamepadStatus::Connected => 0,
        GamepadStatus::NotConnected => native,
    }
}

/// Detour installer with deferred enabling: hooks are created at attach time
/// but only redirect once [`activate`] has published the shim state, so a
/// presentation call can never race an empty trampoline.
pub struct RetourBackend {
    detours: Arc<Mutex<Vec<(usize, RawDetour)>>>,
}

// RawDetour is kept behind the mutex and only toggled from the load path.
unsafe impl Send for RetourBackend {}
unsafe impl Sync for RetourBackend {}

impl Default for RetourBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RetourBackend {
    pub fn new() -> Self {
        Self {
            detours: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn handle(&self) -> Arc<Mutex<Vec<(usize, RawDetour)>>> {
        Arc::clone(&self.detours)
    }
}

impl HookBackend for RetourBackend {
    fn attach(&self, target: usize, replacement: usize) -> Result<usize, String> {
        let detour = unsafe {
            RawDetour::new(target as *const (), replacement as *const ())
                .map_err(|err| err.to_string())?
        };
        let trampoline = detour.trampoline() as *const () as usize;
        self.detours
            .lock()
            .map_err(|_| "detour list poisoned".to_string())?
            .push((target, detour));
        Ok(trampoline)
    }

    fn detach(&self, target: usize) -> Result<(), String> {
        let mut detours = self
            .detours
            .lock()
            .map_err(|_| "detour list poisoned".to_string())?;
        if let Some(index) = detours.iter().position(|(t, _)| *t == target) {
            let (_, detour) = detours.remove(index);
            if detour.is_enabled() {
                unsafe { detour.disable().map_err(|err| err.to_string())? };
            }
        }
        Ok(())
    }
}

/// Resolve the three hook targets inside the running host process.
#[cfg(feature = "host-d3d12")]
pub fn resolve_targets() -> Result<HookTargets, PluginError> {
    let present_target = crate::gpu::d3d12::present_vtable_address()
        .map_err(|err| HookError::AttachFailed {
            name: "present",
            reason: err.to_string(),
        })?;

    let camera_target = CAMERA_UPDATE_PATTERNS.iter().find_map(|text| {
        let pattern: Pattern = text.parse().ok()?;
        crate::scan::find_in_module(None, &pattern)
    });
    if camera_target.is_none() {
        log::warn!("[hooks] camera update pattern not found; host may have been updated");
    }

    let gamepad_target = locate_gamepad_query();

    Ok(HookTargets {
        present: HookPoint {
            target: present_target,
            replacement: present_shim as usize,
        },
        camera_update: camera_target.map(|target| HookPoint {
            target,
            replacement: camera_update_shim as usize,
        }),
        gamepad_query: gamepad_target.map(|target| HookPoint {
            target,
            replacement: gamepad_query_shim as usize,
        }),
    })
}

/// XInput 1.4 first (Win8+), 1.3 as the fallback.
#[cfg(feature = "host-d3d12")]
fn locate_gamepad_query() -> Option<usize> {
    use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryA};
    use windows::core::s;

    let module = unsafe { LoadLibraryA(s!("XInput1_4.dll")) }
        .or_else(|_| unsafe { LoadLibraryA(s!("XInput1_3.dll")) })
        .ok()?;
    let address = unsafe { GetProcAddress(module, s!("XInputGetState")) }?;
    Some(address as usize)
}

/// Fully wired live plugin: resolved targets, live backends, enabled detours.
pub struct LivePlugin {
    plugin: VrPlugin,
}

impl LivePlugin {
    /// Load against the real runtime and graphics API. Fatal when the VR
    /// runtime is missing or the presentation hook cannot attach; degraded
    /// hooks are reported by the inner plugin.
    #[cfg(all(feature = "host-d3d12", feature = "vr-openxr"))]
    pub fn load() -> Result<Self, PluginError> {
        let targets = resolve_targets()?;

        let backend = RetourBackend::new();
        let detours = backend.handle();

        let plugin = VrPlugin::load(
            Box::new(crate::vr::openxr::OpenXrRuntime::new()),
            Box::new(crate::gpu::d3d12::D3d12Graphics::new()),
            Box::new(backend),
            targets,
        )?;

        let hooks = LiveHooks {
            present: Arc::clone(plugin.present_hook()),
            camera: Arc::clone(plugin.camera_hook()),
            input: Arc::clone(plugin.input_hook()),
            present_trampoline: AtomicUsize::new(plugin.trampoline("present").unwrap_or(0)),
            camera_trampoline: AtomicUsize::new(plugin.trampoline("camera-update").unwrap_or(0)),
            gamepad_trampoline: AtomicUsize::new(plugin.trampoline("gamepad-query").unwrap_or(0)),
        };
        if LIVE.set(hooks).is_err() {
            return Err(PluginError::Hook(HookError::AlreadyInstalled {
                name: "present",
            }));
        }

        // Shim state is published; redirecting is now safe.
        let enabled = detours
            .lock()
            .map_err(|_| HookError::AttachFailed {
                name: "present",
                reason: "detour list poisoned".into(),
            })?
            .iter()
            .try_for_each(|(_, detour)| unsafe { detour.enable() });
        enabled.map_err(|err| {
            PluginError::Hook(HookError::AttachFailed {
                name: "present",
                reason: err.to_string(),
            })
        })?;

        log::info!("[hooks] live detours enabled");
        Ok(Self { plugin })
    }

    pub fn plugin(&self) -> &VrPlugin {
        &self.plugin
    }

    pub fn unload(&mut self) {
        self.plugin.unload();
    }
}
