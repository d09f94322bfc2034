use crate::gpu::{
    Extent2d, GraphicsBackend, GraphicsDevice, GraphicsError, GraphicsQueue, GraphicsResult,
    SurfaceHandle, TextureHandle,
};
use std::mem::ManuallyDrop;
use std::time::Duration;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::{
    D3D12CreateDevice, D3D12_COMMAND_LIST_TYPE_DIRECT, D3D12_COMMAND_QUEUE_DESC,
    D3D12_COMMAND_QUEUE_FLAG_NONE, D3D12_COMMAND_QUEUE_PRIORITY_HIGH, D3D12_FENCE_FLAG_NONE,
    D3D12_RESOURCE_BARRIER, D3D12_RESOURCE_BARRIER_0, D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
    D3D12_RESOURCE_BARRIER_FLAG_NONE, D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
    D3D12_RESOURCE_STATES, D3D12_RESOURCE_STATE_COPY_DEST, D3D12_RESOURCE_STATE_COPY_SOURCE,
    D3D12_RESOURCE_STATE_PRESENT, D3D12_RESOURCE_STATE_RENDER_TARGET,
    D3D12_RESOURCE_TRANSITION_BARRIER, D3D12_TEXTURE_COPY_LOCATION, D3D12_TEXTURE_COPY_LOCATION_0,
    D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX, ID3D12CommandAllocator, ID3D12CommandList,
    ID3D12CommandQueue, ID3D12Device, ID3D12Fence, ID3D12GraphicsCommandList, ID3D12Resource,
    D3D12_BOX,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ADAPTER_FLAG_SOFTWARE, DXGI_SWAP_CHAIN_DESC1,
    DXGI_SWAP_EFFECT_FLIP_DISCARD, DXGI_USAGE_RENDER_TARGET_OUTPUT, IDXGIAdapter1, IDXGIFactory4,
    IDXGISwapChain1, IDXGISwapChain3,
};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExA, DestroyWindow, WINDOW_EX_STYLE, WS_OVERLAPPEDWINDOW,
};
use windows::core::{Interface, PCSTR, s};

fn win_err(context: &str, err: impl std::fmt::Display) -> GraphicsError {
    GraphicsError::Backend(format!("{context}: {err}"))
}

fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                // Borrowed reference; the barrier must not own a refcount.
                pResource: unsafe { std::mem::transmute_copy(resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            }),
        },
    }
}

fn copy_location(resource: &ID3D12Resource) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            SubresourceIndex: 0,
        },
    }
}

/// Live D3D12 backend. Wraps the host's swap chain and device plus the
/// plugin's own queue, allocator, command list and fence.
///
/// Not internally synchronized: the host's render thread is the only caller
/// of the copy path, per the pipeline's single-writer rule.
pub struct D3d12Graphics {
    device: Option<ID3D12Device>,
    queue: Option<ID3D12CommandQueue>,
    allocator: Option<ID3D12CommandAllocator>,
    list: Option<ID3D12GraphicsCommandList>,
    fence: Option<ID3D12Fence>,
    fence_event: HANDLE,
    fence_value: u64,
}

// COM pointers move between the load thread and the host's render thread but
// are never used concurrently; see the pipeline's single-writer rule.
unsafe impl Send for D3d12Graphics {}

impl Default for D3d12Graphics {
    fn default() -> Self {
        Self::new()
    }
}

impl D3d12Graphics {
    pub fn new() -> Self {
        Self {
            device: None,
            queue: None,
            allocator: None,
            list: None,
            fence: None,
            fence_event: HANDLE::default(),
            fence_value: 0,
        }
    }

    fn swapchain3(surface: SurfaceHandle) -> GraphicsResult<IDXGISwapChain3> {
        if surface.is_null() {
            return Err(GraphicsError::DeviceUnavailable);
        }
        let raw = surface.raw() as *mut std::ffi::c_void;
        let swapchain = unsafe { IDXGISwapChain1::from_raw_borrowed(&raw) }
            .ok_or(GraphicsError::DeviceUnavailable)?;
        swapchain
            .cast::<IDXGISwapChain3>()
            .map_err(|err| win_err("IDXGISwapChain3 query", err))
    }

    fn borrowed_resource(handle: TextureHandle) -> Option<ID3D12Resource> {
        let raw = handle.raw() as *mut std::ffi::c_void;
        unsafe { ID3D12Resource::from_raw_borrowed(&raw) }.cloned()
    }

    /// Bounded wait for the fence to reach the value just signaled.
    fn wait_for_gpu(&mut self, timeout: Duration) -> GraphicsResult<()> {
        let (Some(fence), Some(queue)) = (self.fence.as_ref(), self.queue.as_ref()) else {
            return Err(GraphicsError::Backend("fence not created".into()));
        };

        self.fence_value += 1;
        let target = self.fence_value;
        unsafe { queue.Signal(fence, target) }.map_err(|err| win_err("Signal", err))?;

        if unsafe { fence.GetCompletedValue() } < target {
            unsafe { fence.SetEventOnCompletion(target, self.fence_event) }
                .map_err(|err| win_err("SetEventOnCompletion", err))?;
            let waited_ms = timeout.as_millis() as u32;
            let result = unsafe { WaitForSingleObject(self.fence_event, waited_ms) };
            if result == WAIT_TIMEOUT {
                return Err(GraphicsError::FenceTimeout {
                    waited_ms: waited_ms as u64,
                });
            }
            if result != WAIT_OBJECT_0 {
                return Err(GraphicsError::Backend("fence wait failed".into()));
            }
        }
        Ok(())
    }
}

impl Drop for D3d12Graphics {
    fn drop(&mut self) {
        if !self.fence_event.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.fence_event);
            }
        }
    }
}

impl GraphicsBackend for D3d12Graphics {
    fn label(&self) -> &'static str {
        "D3D12"
    }

    fn device_from_surface(&mut self, surface: SurfaceHandle) -> GraphicsResult<GraphicsDevice> {
        let swapchain = Self::swapchain3(surface)?;
        let device: ID3D12Device = unsafe { swapchain.GetDevice() }
            .map_err(|err| win_err("GetDevice", err))?;
        let handle = GraphicsDevice::from_raw(device.as_raw() as usize);
        self.device = Some(device);
        Ok(handle)
    }

    fn device_for_queue(&mut self, queue: GraphicsQueue) -> GraphicsResult<GraphicsDevice> {
        if let Some(device) = self.device.as_ref() {
            return Ok(GraphicsDevice::from_raw(device.as_raw() as usize));
        }
        let raw = queue.raw() as *mut std::ffi::c_void;
        let queue = unsafe { ID3D12CommandQueue::from_raw_borrowed(&raw) }
            .ok_or(GraphicsError::DeviceUnavailable)?;
        let device: ID3D12Device =
            unsafe { queue.GetDevice() }.map_err(|err| win_err("GetDevice", err))?;
        let handle = GraphicsDevice::from_raw(device.as_raw() as usize);
        self.device = Some(device);
        Ok(handle)
    }

    fn create_command_queue(&mut self, _device: GraphicsDevice) -> GraphicsResult<GraphicsQueue> {
        let device = self
            .device
            .as_ref()
            .ok_or(GraphicsError::DeviceUnavailable)?;
        let desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            Priority: D3D12_COMMAND_QUEUE_PRIORITY_HIGH.0,
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            NodeMask: 0,
        };
        let queue: ID3D12CommandQueue = unsafe { device.CreateCommandQueue(&desc) }
            .map_err(|err| GraphicsError::QueueCreation(err.to_string()))?;
        let handle = GraphicsQueue::from_raw(queue.as_raw() as usize);
        self.queue = Some(queue);
        Ok(handle)
    }

    fn back_buffer(&mut self, surface: SurfaceHandle) -> GraphicsResult<TextureHandle> {
        let swapchain = Self::swapchain3(surface)?;
        let index = unsafe { swapchain.GetCurrentBackBufferIndex() };
        let buffer: ID3D12Resource = unsafe { swapchain.GetBuffer(index) }
            .map_err(|err| win_err("GetBuffer", err))?;
        // Hand back a borrowed-style handle; the swap chain keeps the
        // buffer alive for the duration of the presentation call.
        let handle = TextureHandle::from_raw(buffer.as_raw() as usize);
        Ok(handle)
    }

    fn create_copy_resources(
        &mut self,
        _device: GraphicsDevice,
        _queue: GraphicsQueue,
    ) -> GraphicsResult<()> {
        if self.allocator.is_some() {
            return Ok(());
        }
        let device = self
            .device
            .as_ref()
            .ok_or(GraphicsError::DeviceUnavailable)?;

        let allocator: ID3D12CommandAllocator =
            unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                .map_err(|err| GraphicsError::CopyResources(err.to_string()))?;
        let list: ID3D12GraphicsCommandList = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)
        }
        .map_err(|err| GraphicsError::CopyResources(err.to_string()))?;
        unsafe { list.Close() }.map_err(|err| GraphicsError::CopyResources(err.to_string()))?;

        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }
            .map_err(|err| GraphicsError::CopyResources(err.to_string()))?;
        let event = unsafe { CreateEventW(None, false, false, None) }
            .map_err(|err| GraphicsError::CopyResources(err.to_string()))?;

        self.allocator = Some(allocator);
        self.list = Some(list);
        self.fence = Some(fence);
        self.fence_event = event;
        log::info!("[d3d12] copy resources created");
        Ok(())
    }

    fn copy_texture(
        &mut self,
        source: TextureHandle,
        dest: TextureHandle,
        dest_extent: Extent2d,
        timeout: Duration,
    ) -> GraphicsResult<Extent2d> {
        let source = Self::borrowed_resource(source)
            .ok_or_else(|| GraphicsError::CopyFailed("null source texture".into()))?;
        let dest = Self::borrowed_resource(dest)
            .ok_or_else(|| GraphicsError::CopyFailed("null destination texture".into()))?;
        let (Some(allocator), Some(list), Some(queue)) =
            (self.allocator.as_ref(), self.list.as_ref(), self.queue.as_ref())
        else {
            return Err(GraphicsError::CopyResources(
                "copy resources not created".into(),
            ));
        };

        unsafe { allocator.Reset() }.map_err(|err| win_err("allocator Reset", err))?;
        unsafe { list.Reset(allocator, None) }.map_err(|err| win_err("list Reset", err))?;

        let into_copy = [
            transition_barrier(
                &source,
                D3D12_RESOURCE_STATE_PRESENT,
                D3D12_RESOURCE_STATE_COPY_SOURCE,
            ),
            transition_barrier(
                &dest,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
                D3D12_RESOURCE_STATE_COPY_DEST,
            ),
        ];
        unsafe { list.ResourceBarrier(&into_copy) };

        let src_desc = unsafe { source.GetDesc() };
        let region = Extent2d::new(src_desc.Width as u32, src_desc.Height).min(dest_extent);
        let src_box = D3D12_BOX {
            left: 0,
            top: 0,
            front: 0,
            right: region.width,
            bottom: region.height,
            back: 1,
        };

        let src_location = copy_location(&source);
        let dst_location = copy_location(&dest);
        unsafe { list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, Some(&src_box)) };

        let out_of_copy = [
            transition_barrier(
                &source,
                D3D12_RESOURCE_STATE_COPY_SOURCE,
                D3D12_RESOURCE_STATE_PRESENT,
            ),
            transition_barrier(
                &dest,
                D3D12_RESOURCE_STATE_COPY_DEST,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            ),
        ];
        unsafe { list.ResourceBarrier(&out_of_copy) };
        unsafe { list.Close() }.map_err(|err| win_err("list Close", err))?;

        let lists = [Some(
            list.cast::<ID3D12CommandList>()
                .map_err(|err| win_err("command list cast", err))?,
        )];
        unsafe { queue.ExecuteCommandLists(&lists) };

        self.wait_for_gpu(timeout)?;
        Ok(region)
    }

    fn wait_idle(&mut self, timeout: Duration) -> GraphicsResult<()> {
        if self.fence.is_none() {
            return Ok(());
        }
        self.wait_for_gpu(timeout)
    }

    fn release(&mut self) {
        self.fence = None;
        self.list = None;
        self.allocator = None;
        self.queue = None;
        self.device = None;
        if !self.fence_event.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.fence_event);
            }
            self.fence_event = HANDLE::default();
        }
    }
}

/// Locate the process-wide `Present` entry by walking a throwaway swap
/// chain's vtable, the standard trick when the host's own swap chain is not
/// yet reachable. Slot 8 on IDXGISwapChain is Present.
pub fn present_vtable_address() -> GraphicsResult<usize> {
    const PRESENT_VTABLE_INDEX: usize = 8;

    let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory1() }
        .map_err(|err| win_err("CreateDXGIFactory1", err))?;

    let mut adapter: Option<IDXGIAdapter1> = None;
    let mut index = 0u32;
    while let Ok(candidate) = unsafe { factory.EnumAdapters1(index) } {
        index += 1;
        let desc = unsafe { candidate.GetDesc1() }
            .map_err(|err| win_err("GetDesc1", err))?;
        if (desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32) == 0 {
            adapter = Some(candidate);
            break;
        }
    }
    let adapter = adapter.ok_or_else(|| GraphicsError::Backend("no hardware adapter".into()))?;

    let mut device: Option<ID3D12Device> = None;
    unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }
        .map_err(|err| win_err("D3D12CreateDevice", err))?;
    let device = device.ok_or(GraphicsError::DeviceUnavailable)?;

    let queue_desc = D3D12_COMMAND_QUEUE_DESC {
        Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
        ..Default::default()
    };
    let queue: ID3D12CommandQueue = unsafe { device.CreateCommandQueue(&queue_desc) }
        .map_err(|err| GraphicsError::QueueCreation(err.to_string()))?;

    // A hidden window using the predefined STATIC class is enough to back a
    // temporary swap chain.
    let window: HWND = unsafe {
        CreateWindowExA(
            WINDOW_EX_STYLE(0),
            s!("STATIC"),
            PCSTR::null(),
            WS_OVERLAPPEDWINDOW,
            0,
            0,
            100,
            100,
            None,
            None,
            None,
            None,
        )
    }
    .map_err(|err| win_err("CreateWindowExA", err))?;

    let swap_desc = DXGI_SWAP_CHAIN_DESC1 {
        Width: 100,
        Height: 100,
        Format: DXGI_FORMAT_R8G8B8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: 2,
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
        ..Default::default()
    };

    let swapchain: Result<IDXGISwapChain1, _> =
        unsafe { factory.CreateSwapChainForHwnd(&queue, window, &swap_desc, None, None) };
    let address = match swapchain {
        Ok(swapchain) => {
            let vtable = swapchain.as_raw() as *const *const usize;
            let address = unsafe { *(*vtable).add(PRESENT_VTABLE_INDEX) };
            drop(swapchain);
            Ok(address)
        }
        Err(err) => Err(win_err("CreateSwapChainForHwnd", err)),
    };

    unsafe {
        let _ = DestroyWindow(window);
    }
    address
}
