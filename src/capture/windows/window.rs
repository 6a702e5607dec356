//! Windows window capture using Windows.Graphics.Capture
//!
//! `CreateForWindow` captures the window's own DWM surface, so overlapping
//! windows never bleed into the frames. Frames are pulled from a
//! free-threaded frame pool on the capture thread and copied to the CPU
//! through a staging texture. The pool is recreated when the window's
//! content size changes.

use crate::capture::window::{
    CaptureBackend, CaptureError, CaptureResult, RawFrame, WindowHandle, WindowRect,
    WindowStream,
};
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use windows::core::{factory, Interface};
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{
    Direct3D11CaptureFrame, Direct3D11CaptureFramePool, GraphicsCaptureItem,
    GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::SizeInt32;
use windows::Win32::Foundation::{E_POINTER, HWND, RECT};
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dwm::{DwmGetWindowAttribute, DWMWA_EXTENDED_FRAME_BOUNDS};
use windows::Win32::Graphics::Dxgi::IDXGIDevice;
use windows::Win32::System::WinRT::Direct3D11::{
    CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess,
};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::Win32::UI::WindowsAndMessaging::IsWindow;

const PIXEL_FORMAT: DirectXPixelFormat = DirectXPixelFormat::B8G8R8A8UIntNormalized;
const FRAME_POOL_BUFFERS: i32 = 2;
/// How often the frame pool is checked while waiting for a frame
const POLL_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Debug, Default)]
pub struct GraphicsCaptureBackend;

fn to_hwnd(raw: isize) -> HWND {
    HWND(raw as *mut c_void)
}

fn backend_error(context: &str, e: windows::core::Error) -> CaptureError {
    CaptureError::BackendUnavailable(format!("{}: {}", context, e))
}

fn window_alive(hwnd: HWND) -> bool {
    unsafe { IsWindow(hwnd) }.as_bool()
}

/// Visible bounds without the drop shadow, in physical pixels
fn window_rect(hwnd: HWND) -> windows::core::Result<WindowRect> {
    let mut rect = RECT::default();
    unsafe {
        DwmGetWindowAttribute(
            hwnd,
            DWMWA_EXTENDED_FRAME_BOUNDS,
            &mut rect as *mut RECT as *mut c_void,
            std::mem::size_of::<RECT>() as u32,
        )?;
    }
    Ok(WindowRect::from_edges(rect.left, rect.top, rect.right, rect.bottom))
}

struct Direct3D {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    winrt_device: IDirect3DDevice,
}

fn create_device() -> windows::core::Result<Direct3D> {
    let mut device = None;
    let mut context = None;
    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            None,
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )?;
    }
    let device: ID3D11Device = device.ok_or_else(|| windows::core::Error::from(E_POINTER))?;
    let context = context.ok_or_else(|| windows::core::Error::from(E_POINTER))?;

    let dxgi: IDXGIDevice = device.cast()?;
    let winrt_device: IDirect3DDevice = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi)? }.cast()?;
    Ok(Direct3D {
        device,
        context,
        winrt_device,
    })
}

impl CaptureBackend for GraphicsCaptureBackend {
    fn name(&self) -> &str {
        "windows-graphics-capture"
    }

    fn open(&mut self, window: WindowHandle) -> CaptureResult<Box<dyn WindowStream>> {
        super::dpi::ensure_per_monitor_aware();

        let raw = isize::try_from(window.0).map_err(|_| CaptureError::WindowNotFound)?;
        let hwnd = to_hwnd(raw);
        if !window_alive(hwnd) {
            return Err(CaptureError::WindowNotFound);
        }
        if !GraphicsCaptureSession::IsSupported().unwrap_or(false) {
            return Err(CaptureError::BackendUnavailable(
                "Windows.Graphics.Capture requires Windows 10 1903 or later".to_string(),
            ));
        }

        let d3d = create_device().map_err(|e| backend_error("Failed to create D3D11 device", e))?;
        let interop = factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
            .map_err(|e| backend_error("Capture interop unavailable", e))?;
        let item: GraphicsCaptureItem = unsafe { interop.CreateForWindow(hwnd) }
            .map_err(|e| backend_error("Failed to create capture item", e))?;
        let size = item
            .Size()
            .map_err(|e| backend_error("Failed to read window size", e))?;

        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &d3d.winrt_device,
            PIXEL_FORMAT,
            FRAME_POOL_BUFFERS,
            size,
        )
        .map_err(|e| backend_error("Failed to create frame pool", e))?;
        let session = frame_pool
            .CreateCaptureSession(&item)
            .map_err(|e| backend_error("Failed to create capture session", e))?;

        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = closed.clone();
        item.Closed(&TypedEventHandler::new(move |_, _| {
            closed_flag.store(true, Ordering::SeqCst);
            Ok(())
        }))
        .map_err(|e| backend_error("Failed to watch window close", e))?;

        // older builds always draw the cursor
        if let Err(e) = session.SetIsCursorCaptureEnabled(false) {
            tracing::debug!("Cursor stays in captured frames: {}", e);
        }
        session
            .StartCapture()
            .map_err(|e| backend_error("Failed to start capture", e))?;

        tracing::info!(
            "Windows.Graphics.Capture stream started for window {} ({}x{})",
            window,
            size.Width,
            size.Height
        );

        Ok(Box::new(GraphicsCaptureStream {
            hwnd: raw,
            d3d,
            frame_pool,
            session: Some(session),
            _item: item,
            pool_size: size,
            closed,
            staging: None,
        }))
    }
}

struct GraphicsCaptureStream {
    hwnd: isize,
    d3d: Direct3D,
    frame_pool: Direct3D11CaptureFramePool,
    session: Option<GraphicsCaptureSession>,
    _item: GraphicsCaptureItem,
    pool_size: SizeInt32,
    closed: Arc<AtomicBool>,
    staging: Option<(ID3D11Texture2D, u32, u32)>,
}

// The immediate context is only used from the thread that owns the stream.
unsafe impl Send for GraphicsCaptureStream {}

impl GraphicsCaptureStream {
    fn staging_texture(
        &mut self,
        source: &D3D11_TEXTURE2D_DESC,
    ) -> windows::core::Result<ID3D11Texture2D> {
        if let Some((texture, width, height)) = &self.staging {
            if (*width, *height) == (source.Width, source.Height) {
                return Ok(texture.clone());
            }
        }

        let mut desc = *source;
        desc.Usage = D3D11_USAGE_STAGING;
        desc.BindFlags = 0;
        desc.CPUAccessFlags = D3D11_CPU_ACCESS_READ.0 as u32;
        desc.MiscFlags = 0;

        let mut texture = None;
        unsafe { self.d3d.device.CreateTexture2D(&desc, None, Some(&mut texture))? };
        let texture = texture.ok_or_else(|| windows::core::Error::from(E_POINTER))?;
        self.staging = Some((texture.clone(), desc.Width, desc.Height));
        Ok(texture)
    }

    fn read_frame(
        &mut self,
        frame: &Direct3D11CaptureFrame,
        captured_at: Instant,
    ) -> windows::core::Result<RawFrame> {
        let content = frame.ContentSize()?;
        if (content.Width, content.Height) != (self.pool_size.Width, self.pool_size.Height) {
            self.frame_pool.Recreate(
                &self.d3d.winrt_device,
                PIXEL_FORMAT,
                FRAME_POOL_BUFFERS,
                content,
            )?;
            self.pool_size = content;
            tracing::debug!(
                "Window {:#x} frame pool recreated at {}x{}",
                self.hwnd,
                content.Width,
                content.Height
            );
        }

        let access: IDirect3DDxgiInterfaceAccess = frame.Surface()?.cast()?;
        let texture: ID3D11Texture2D = unsafe { access.GetInterface()? };
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut desc) };

        // until the pool is recreated the surface keeps its old size; only
        // the content region is valid
        let width = (content.Width.max(1) as u32).min(desc.Width);
        let height = (content.Height.max(1) as u32).min(desc.Height);

        let staging = self.staging_texture(&desc)?;
        let context = &self.d3d.context;
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        let data = unsafe {
            context.CopyResource(&staging, &texture);
            context.Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))?;
            let len = mapped.RowPitch as usize * height as usize;
            let data = std::slice::from_raw_parts(mapped.pData as *const u8, len).to_vec();
            context.Unmap(&staging, 0);
            data
        };

        Ok(RawFrame {
            data,
            width,
            height,
            bytes_per_row: mapped.RowPitch,
            captured_at,
            window_rect: window_rect(to_hwnd(self.hwnd)).ok(),
        })
    }
}

impl WindowStream for GraphicsCaptureStream {
    fn next_frame(&mut self, timeout: Duration) -> CaptureResult<Option<RawFrame>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::SeqCst) || !window_alive(to_hwnd(self.hwnd)) {
                return Err(CaptureError::WindowClosed);
            }

            // an empty pool reports an error rather than a null frame
            if let Ok(frame) = self.frame_pool.TryGetNextFrame() {
                let captured_at = Instant::now();
                let raw = self
                    .read_frame(&frame, captured_at)
                    .map_err(|e| backend_error("Failed to read captured frame", e))?;
                return Ok(Some(raw));
            }

            // minimized and unchanged windows stop producing frames
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.Close() {
                tracing::warn!("Failed to stop window capture {:#x}: {}", self.hwnd, e);
            }
            let _ = self.frame_pool.Close();
        }
    }
}
