#[cfg(all(windows, feature = "host-d3d12"))]
pub mod d3d12;

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Pointer-sized opaque id for a GPU texture owned by either side.
///
/// In the live backend this is a raw `ID3D12Resource` pointer; the null
/// backend hands out synthetic ids. Zero is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(usize);

impl TextureHandle {
    pub const NULL: TextureHandle = TextureHandle(0);

    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphicsDevice(usize);

impl GraphicsDevice {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphicsQueue(usize);

impl GraphicsQueue {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

/// The host's swap surface as passed to the presentation entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(usize);

impl SurfaceHandle {
    pub const NULL: SurfaceHandle = SurfaceHandle(0);

    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn min(self, other: Extent2d) -> Extent2d {
        Extent2d {
            width: self.width.min(other.width),
            height: self.height.min(other.height),
        }
    }
}

#[derive(Debug, Error)]
pub enum GraphicsError {
    #[error("no graphics device available from surface")]
    DeviceUnavailable,
    #[error("command queue creation failed: {0}")]
    QueueCreation(String),
    #[error("copy resource creation failed: {0}")]
    CopyResources(String),
    #[error("texture copy failed: {0}")]
    CopyFailed(String),
    #[error("GPU fence wait timed out after {waited_ms}ms")]
    FenceTimeout { waited_ms: u64 },
    #[error("graphics backend error: {0}")]
    Backend(String),
}

pub type GraphicsResult<T> = Result<T, GraphicsError>;

/// Seam between the pipeline and the concrete graphics API.
///
/// The presentation hook uses the surface-side operations to capture the
/// device and create the plugin's own queue; the session manager uses the
/// copy-side operations for per-eye texture transfer. A single host render
/// thread drives both, so implementations are not required to tolerate
/// concurrent copies.
pub trait GraphicsBackend: Send {
    fn label(&self) -> &'static str;

    fn device_from_surface(&mut self, surface: SurfaceHandle) -> GraphicsResult<GraphicsDevice>;

    fn device_for_queue(&mut self, queue: GraphicsQueue) -> GraphicsResult<GraphicsDevice>;

    /// Create the plugin-owned high-priority queue. The host's internal queue
    /// is never reused.
    fn create_command_queue(&mut self, device: GraphicsDevice) -> GraphicsResult<GraphicsQueue>;

    /// Current back buffer of the surface. Buffer identity rotates, so this
    /// must be called again on every presentation.
    fn back_buffer(&mut self, surface: SurfaceHandle) -> GraphicsResult<TextureHandle>;

    fn create_copy_resources(
        &mut self,
        device: GraphicsDevice,
        queue: GraphicsQueue,
    ) -> GraphicsResult<()>;

    /// Blocking barrier-copy-barrier-execute-fence sequence. The copy region
    /// is the minimum of the source and destination extents; the fence wait
    /// is bounded by `timeout`. Returns the region actually copied.
    fn copy_texture(
        &mut self,
        source: TextureHandle,
        dest: TextureHandle,
        dest_extent: Extent2d,
        timeout: Duration,
    ) -> GraphicsResult<Extent2d>;

    fn wait_idle(&mut self, timeout: Duration) -> GraphicsResult<()>;

    /// Drop every captured reference. Called once at shutdown under the
    /// presentation hook's capture lock.
    fn release(&mut self);
}

/// Shared handle used by the presentation hook and the session manager.
pub type SharedGraphics = Arc<Mutex<Box<dyn GraphicsBackend>>>;

pub fn shared(backend: Box<dyn GraphicsBackend>) -> SharedGraphics {
    Arc::new(Mutex::new(backend))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRecord {
    pub source: TextureHandle,
    pub dest: TextureHandle,
    pub region: Extent2d,
}

/// In-process stand-in that records every operation. Used by the default
/// build and by the pipeline tests; fence timeouts are injectable.
pub struct NullGraphics {
    back_buffers: [TextureHandle; 3],
    back_buffer_cursor: usize,
    source_extent: Extent2d,
    copy_resources_ready: bool,
    queues_created: u32,
    copies: Vec<CopyRecord>,
    fail_next_fence: bool,
}

impl Default for NullGraphics {
    fn default() -> Self {
        Self {
            back_buffers: [
                TextureHandle::from_raw(0x0b00_0001),
                TextureHandle::from_raw(0x0b00_0002),
                TextureHandle::from_raw(0x0b00_0003),
            ],
            back_buffer_cursor: 0,
            source_extent: Extent2d::new(1440, 1600),
            copy_resources_ready: false,
            queues_created: 0,
            copies: Vec::new(),
            fail_next_fence: false,
        }
    }
}

impl NullGraphics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_source_extent(&mut self, extent: Extent2d) {
        self.source_extent = extent;
    }

    pub fn fail_next_fence(&mut self) {
        self.fail_next_fence = true;
    }

    pub fn copies(&self) -> &[CopyRecord] {
        &self.copies
    }

    pub fn queues_created(&self) -> u32 {
        self.queues_created
    }

    pub fn copy_resources_ready(&self) -> bool {
        self.copy_resources_ready
    }

    /// Split into a boxed backend plus an inspection handle, for tests that
    /// need to read copy records or inject fence timeouts afterwards.
    pub fn into_backend(self) -> (Box<dyn GraphicsBackend>, Arc<Mutex<NullGraphics>>) {
        let handle = Arc::new(Mutex::new(self));
        (
            Box::new(SharedNullGraphics(Arc::clone(&handle))),
            handle,
        )
    }

    /// Like [`NullGraphics::into_backend`] but already wrapped for direct
    /// session wiring.
    pub fn into_shared(self) -> (SharedGraphics, Arc<Mutex<NullGraphics>>) {
        let (backend, handle) = self.into_backend();
        (shared(backend), handle)
    }
}

struct SharedNullGraphics(Arc<Mutex<NullGraphics>>);

impl SharedNullGraphics {
    fn with<R>(&self, f: impl FnOnce(&mut NullGraphics) -> R) -> R {
        let mut inner = self.0.lock().expect("null graphics mutex should not poison");
        f(&mut inner)
    }
}

impl GraphicsBackend for SharedNullGraphics {
    fn label(&self) -> &'static str {
        "Null Graphics"
    }

    fn device_from_surface(&mut self, surface: SurfaceHandle) -> GraphicsResult<GraphicsDevice> {
        self.with(|g| g.device_from_surface(surface))
    }

    fn device_for_queue(&mut self, queue: GraphicsQueue) -> GraphicsResult<GraphicsDevice> {
        self.with(|g| g.device_for_queue(queue))
    }

    fn create_command_queue(&mut self, device: GraphicsDevice) -> GraphicsResult<GraphicsQueue> {
        self.with(|g| g.create_command_queue(device))
    }

    fn back_buffer(&mut self, surface: SurfaceHandle) -> GraphicsResult<TextureHandle> {
        self.with(|g| g.back_buffer(surface))
    }

    fn create_copy_resources(
        &mut self,
        device: GraphicsDevice,
        queue: GraphicsQueue,
    ) -> GraphicsResult<()> {
        self.with(|g| g.create_copy_resources(device, queue))
    }

    fn copy_texture(
        &mut self,
        source: TextureHandle,
        dest: TextureHandle,
        dest_extent: Extent2d,
        timeout: Duration,
    ) -> GraphicsResult<Extent2d> {
        self.with(|g| g.copy_texture(source, dest, dest_extent, timeout))
    }

    fn wait_idle(&mut self, timeout: Duration) -> GraphicsResult<()> {
        self.with(|g| g.wait_idle(timeout))
    }

    fn release(&mut self) {
        self.with(|g| g.release());
    }
}

impl GraphicsBackend for NullGraphics {
    fn label(&self) -> &'static str {
        "Null Graphics"
    }

    fn device_from_surface(&mut self, surface: SurfaceHandle) -> GraphicsResult<GraphicsDevice> {
        if surface.is_null() {
            return Err(GraphicsError::DeviceUnavailable);
        }
        Ok(GraphicsDevice::from_raw(0x0d00_0001))
    }

    fn device_for_queue(&mut self, queue: GraphicsQueue) -> GraphicsResult<GraphicsDevice> {
        if queue.raw() == 0 {
            return Err(GraphicsError::DeviceUnavailable);
        }
        Ok(GraphicsDevice::from_raw(0x0d00_0001))
    }

    fn create_command_queue(&mut self, _device: GraphicsDevice) -> GraphicsResult<GraphicsQueue> {
        self.queues_created += 1;
        Ok(GraphicsQueue::from_raw(0x0c00_0000 + self.queues_created as usize))
    }

    fn back_buffer(&mut self, surface: SurfaceHandle) -> GraphicsResult<TextureHandle> {
        if surface.is_null() {
            return Err(GraphicsError::DeviceUnavailable);
        }
        let handle = self.back_buffers[self.back_buffer_cursor];
        self.back_buffer_cursor = (self.back_buffer_cursor + 1) % self.back_buffers.len();
        Ok(handle)
    }

    fn create_copy_resources(
        &mut self,
        _device: GraphicsDevice,
        _queue: GraphicsQueue,
    ) -> GraphicsResult<()> {
        self.copy_resources_ready = true;
        Ok(())
    }

    fn copy_texture(
        &mut self,
        source: TextureHandle,
        dest: TextureHandle,
        dest_extent: Extent2d,
        timeout: Duration,
    ) -> GraphicsResult<Extent2d> {
        if !self.copy_resources_ready {
            return Err(GraphicsError::CopyResources(
                "copy resources not created".into(),
            ));
        }
        if source.is_null() || dest.is_null() {
            return Err(GraphicsError::CopyFailed("null texture handle".into()));
        }
        if self.fail_next_fence {
            self.fail_next_fence = false;
            return Err(GraphicsError::FenceTimeout {
                waited_ms: timeout.as_millis() as u64,
            });
        }
        let region = self.source_extent.min(dest_extent);
        self.copies.push(CopyRecord {
            source,
            dest,
            region,
        });
        Ok(region)
    }

    fn wait_idle(&mut self, _timeout: Duration) -> GraphicsResult<()> {
        Ok(())
    }

    fn release(&mut self) {
        self.copy_resources_ready = false;
        self.copies.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_buffer_identity_rotates_per_call() {
        let mut graphics = NullGraphics::new();
        let surface = SurfaceHandle::from_raw(0x5000);

        let first = graphics.back_buffer(surface).expect("back buffer");
        let second = graphics.back_buffer(surface).expect("back buffer");
        assert_ne!(first, second);
    }

    #[test]
    fn copy_region_is_minimum_of_extents() {
        let mut graphics = NullGraphics::new();
        graphics.set_source_extent(Extent2d::new(2560, 1440));
        graphics
            .create_copy_resources(
                GraphicsDevice::from_raw(1),
                GraphicsQueue::from_raw(2),
            )
            .expect("resources");

        let region = graphics
            .copy_texture(
                TextureHandle::from_raw(10),
                TextureHandle::from_raw(20),
                Extent2d::new(1832, 1920),
                Duration::from_millis(5000),
            )
            .expect("copy");

        assert_eq!(region, Extent2d::new(1832, 1440));
    }

    #[test]
    fn fence_timeout_is_reported_not_hung() {
        let mut graphics = NullGraphics::new();
        graphics
            .create_copy_resources(
                GraphicsDevice::from_raw(1),
                GraphicsQueue::from_raw(2),
            )
            .expect("resources");
        graphics.fail_next_fence();

        let result = graphics.copy_texture(
            TextureHandle::from_raw(10),
            TextureHandle::from_raw(20),
            Extent2d::new(100, 100),
            Duration::from_millis(5000),
        );
        assert!(matches!(
            result,
            Err(GraphicsError::FenceTimeout { waited_ms: 5000 })
        ));
    }
}
