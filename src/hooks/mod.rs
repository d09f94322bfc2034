pub mod camera;
pub mod input;
#[cfg(all(windows, feature = "hook-live"))]
pub mod live;
pub mod present;

pub use camera::{AimState, CameraHook, CameraTransform};
pub use input::{GamepadState, GamepadStatus, InputHook};
pub use present::PresentHook;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook '{name}' attach failed: {reason}")]
    AttachFailed { name: &'static str, reason: String },
    #[error("hook '{name}' detach failed: {reason}")]
    DetachFailed { name: &'static str, reason: String },
    #[error("hook '{name}' is already installed")]
    AlreadyInstalled { name: &'static str },
    #[error("pattern for hook '{name}' not found")]
    PatternNotFound { name: &'static str },
}

pub type HookResult<T> = Result<T, HookError>;

/// Installs and removes trampolines at raw addresses. The live installer
/// lives behind the `hook-live` feature; tests use [`RecordingHookBackend`].
pub trait HookBackend: Send + Sync {
    /// Patch `target` to jump to `replacement`; returns the trampoline
    /// address that reaches the original code.
    fn attach(&self, target: usize, replacement: usize) -> Result<usize, String>;

    fn detach(&self, target: usize) -> Result<(), String>;
}

/// One hook target has exactly one owner for the process lifetime: the
/// target address, the installed callback, and the trampoline back to the
/// original. Never virtual dispatch; there is one implementation per target.
pub struct HookEntry {
    pub name: &'static str,
    pub target: usize,
    pub replacement: usize,
    trampoline: AtomicUsize,
    installed: AtomicBool,
}

impl HookEntry {
    pub fn trampoline(&self) -> usize {
        self.trampoline.load(Ordering::Acquire)
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }
}

/// Created once at startup, torn down once at shutdown.
pub struct HookRegistry {
    backend: Box<dyn HookBackend>,
    entries: Mutex<Vec<HookEntry>>,
}

impl HookRegistry {
    pub fn new(backend: Box<dyn HookBackend>) -> Self {
        Self {
            backend,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Install a hook and record its registry entry. Returns the trampoline
    /// address for the caller to forward through.
    pub fn install(
        &self,
        name: &'static str,
        target: usize,
        replacement: usize,
    ) -> HookResult<usize> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| HookError::AttachFailed {
                name,
                reason: "registry mutex poisoned".into(),
            })?;
        if entries.iter().any(|entry| entry.target == target) {
            return Err(HookError::AlreadyInstalled { name });
        }

        let trampoline = self
            .backend
            .attach(target, replacement)
            .map_err(|reason| HookError::AttachFailed { name, reason })?;

        log::info!("[hooks] '{name}' installed at {target:#x}");
        let entry = HookEntry {
            name,
            target,
            replacement,
            trampoline: AtomicUsize::new(trampoline),
            installed: AtomicBool::new(true),
        };
        entries.push(entry);
        Ok(trampoline)
    }

    pub fn trampoline_for(&self, name: &str) -> Option<usize> {
        self.entries.lock().ok().and_then(|entries| {
            entries
                .iter()
                .find(|entry| entry.name == name && entry.is_installed())
                .map(|entry| entry.trampoline())
        })
    }

    pub fn installed_count(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.iter().filter(|e| e.is_installed()).count())
            .unwrap_or(0)
    }

    /// Detach everything, in reverse installation order.
    pub fn remove_all(&self) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        for entry in entries.iter().rev() {
            if !entry.installed.swap(false, Ordering::AcqRel) {
                continue;
            }
            match self.backend.detach(entry.target) {
                Ok(()) => log::info!("[hooks] '{}' removed", entry.name),
                Err(reason) => {
                    log::warn!("[hooks] failed to remove '{}': {reason}", entry.name)
                }
            }
        }
        entries.clear();
    }
}

/// Test double: records attachments and fabricates trampoline addresses.
#[derive(Default)]
pub struct RecordingHookBackend {
    attached: Mutex<Vec<(usize, usize)>>,
    fail_attach: AtomicBool,
}

impl RecordingHookBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_attach(&self) {
        self.fail_attach.store(true, Ordering::Relaxed);
    }

    pub fn attached(&self) -> Vec<(usize, usize)> {
        self.attached.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl HookBackend for RecordingHookBackend {
    fn attach(&self, target: usize, replacement: usize) -> Result<usize, String> {
        if self.fail_attach.swap(false, Ordering::Relaxed) {
            return Err("attach rejected".into());
        }
        if let Ok(mut attached) = self.attached.lock() {
            attached.push((target, replacement));
        }
        // Synthetic trampoline: distinct from the target but derived from it.
        Ok(target | 1)
    }

    fn detach(&self, _target: usize) -> Result<(), String> {
        Ok(())
    }
}
