//! Single-window capture
//!
//! A [`CaptureBackend`] opens a compositor-level stream for exactly one window,
//! so windows overlapping it on screen never appear in its frames. The
//! [`CaptureSession`] wraps a stream with the session state machine
//! (`Created -> Opened -> Closed`), stamps frames against the shared session
//! clock and makes `WindowClosed` terminal.

use crate::capture::input::types::SessionClock;
use crate::recorder::channel::CapturedFrame;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// Opaque OS window identifier chosen by the window picker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Window not found")]
    WindowNotFound,

    #[error("Window closed")]
    WindowClosed,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Capture backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("No frame within {0:?}")]
    Timeout(Duration),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Window bounds in top-left-origin screen coordinates, the same space
/// mouse positions are logged in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl WindowRect {
    pub fn origin(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// From left/top/right/bottom edges; inverted edges give an empty size
    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            x: left,
            y: top,
            width: u32::try_from(i64::from(right) - i64::from(left)).unwrap_or(0),
            height: u32::try_from(i64::from(bottom) - i64::from(top)).unwrap_or(0),
        }
    }
}

/// A frame as delivered by a backend, before session stamping
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub captured_at: Instant,
    /// Where the window was on screen when the frame was taken, if known
    pub window_rect: Option<WindowRect>,
}

/// Platform capture mechanism
pub trait CaptureBackend: Send {
    fn name(&self) -> &str;

    /// Open a stream for `window`; fails with `WindowNotFound` if the handle
    /// does not name a live window.
    fn open(&mut self, window: WindowHandle) -> CaptureResult<Box<dyn WindowStream>>;
}

/// Live frame stream of one window
pub trait WindowStream: Send {
    /// Wait up to `timeout` for the next frame. `Ok(None)` means nothing new
    /// arrived (minimized or static window); `Err(WindowClosed)` means the
    /// window is gone.
    fn next_frame(&mut self, timeout: Duration) -> CaptureResult<Option<RawFrame>>;

    fn close(&mut self);
}

/// Follows a window's screen bounds by re-reading them at a fixed interval
///
/// Backends whose streams are configured with a fixed output size use this to
/// notice a resize and reconfigure.
#[derive(Debug, Clone)]
pub struct BoundsTracker {
    rect: WindowRect,
    interval: Duration,
    checked_at: Instant,
}

impl BoundsTracker {
    pub fn new(rect: WindowRect, interval: Duration) -> Self {
        Self {
            rect,
            interval,
            checked_at: Instant::now(),
        }
    }

    pub fn rect(&self) -> WindowRect {
        self.rect
    }

    /// Re-read the bounds with `query` once `interval` has passed since the
    /// last read. Returns the new size when it changed; a move alone only
    /// updates [`rect`](Self::rect).
    pub fn refresh(
        &mut self,
        now: Instant,
        query: impl FnOnce() -> CaptureResult<WindowRect>,
    ) -> CaptureResult<Option<(u32, u32)>> {
        if now.saturating_duration_since(self.checked_at) < self.interval {
            return Ok(None);
        }
        self.checked_at = now;

        let next = query()?;
        let resized = next.size() != self.rect.size();
        self.rect = next;
        Ok(resized.then_some(next.size()))
    }
}

/// Backend for platforms without window capture support
#[derive(Debug, Default)]
pub struct UnavailableBackend;

impl CaptureBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn open(&mut self, _window: WindowHandle) -> CaptureResult<Box<dyn WindowStream>> {
        Err(CaptureError::BackendUnavailable(
            "window capture is not supported on this platform".to_string(),
        ))
    }
}

/// The best capture backend available on this platform
pub fn platform_backend() -> Box<dyn CaptureBackend> {
    #[cfg(target_os = "macos")]
    {
        Box::new(crate::capture::macos::window::ScreenCaptureKitBackend::default())
    }

    #[cfg(target_os = "windows")]
    {
        Box::new(crate::capture::windows::window::GraphicsCaptureBackend::default())
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        Box::new(UnavailableBackend)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Created,
    Opened,
    Closed,
}

pub struct CaptureSession {
    window: WindowHandle,
    clock: SessionClock,
    state: SessionState,
    stream: Option<Box<dyn WindowStream>>,
    frame_timeout: Duration,
    last_dimensions: Option<(u32, u32)>,
    last_rect: Option<WindowRect>,
    frames_delivered: u64,
}

impl CaptureSession {
    pub fn new(window: WindowHandle, clock: SessionClock) -> Self {
        Self {
            window,
            clock,
            state: SessionState::Created,
            stream: None,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            last_dimensions: None,
            last_rect: None,
            frames_delivered: 0,
        }
    }

    /// Create and open in one step
    pub fn open_with(
        backend: &mut dyn CaptureBackend,
        window: WindowHandle,
        clock: SessionClock,
    ) -> CaptureResult<Self> {
        let mut session = Self::new(window, clock);
        session.open(backend)?;
        Ok(session)
    }

    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    pub fn open(&mut self, backend: &mut dyn CaptureBackend) -> CaptureResult<()> {
        match self.state {
            SessionState::Created => {}
            SessionState::Opened => return Ok(()),
            SessionState::Closed => return Err(CaptureError::WindowClosed),
        }

        let stream = backend.open(self.window)?;
        self.stream = Some(stream);
        self.state = SessionState::Opened;
        tracing::info!(
            "Capture session opened for window {} via {}",
            self.window,
            backend.name()
        );
        Ok(())
    }

    /// Block until the next frame or the frame timeout.
    ///
    /// `Timeout` leaves the session open. Any other stream error closes the
    /// session and is returned as is; every later call returns `WindowClosed`.
    pub fn next_frame(&mut self) -> CaptureResult<CapturedFrame> {
        let stream = match (self.state, self.stream.as_mut()) {
            (SessionState::Opened, Some(stream)) => stream,
            (SessionState::Created, _) => {
                return Err(CaptureError::BackendUnavailable(
                    "session is not open".to_string(),
                ))
            }
            _ => return Err(CaptureError::WindowClosed),
        };

        match stream.next_frame(self.frame_timeout) {
            Ok(Some(raw)) => Ok(self.stamp(raw)),
            Ok(None) => Err(CaptureError::Timeout(self.frame_timeout)),
            Err(CaptureError::Timeout(d)) => Err(CaptureError::Timeout(d)),
            Err(e) => {
                tracing::warn!("Capture of window {} ended: {}", self.window, e);
                self.close();
                Err(e)
            }
        }
    }

    fn stamp(&mut self, raw: RawFrame) -> CapturedFrame {
        let dims = (raw.width, raw.height);
        if let Some(prev) = self.last_dimensions {
            if prev != dims {
                tracing::debug!(
                    "Window {} resized: {}x{} -> {}x{}",
                    self.window,
                    prev.0,
                    prev.1,
                    dims.0,
                    dims.1
                );
            }
        }
        self.last_dimensions = Some(dims);
        if let Some(rect) = raw.window_rect {
            if self.last_rect.is_some_and(|prev| prev.origin() != rect.origin()) {
                tracing::debug!("Window {} moved to ({}, {})", self.window, rect.x, rect.y);
            }
            self.last_rect = Some(rect);
        }
        self.frames_delivered += 1;

        CapturedFrame {
            data: raw.data,
            width: raw.width,
            height: raw.height,
            timestamp: self.clock.stamp(raw.captured_at),
            bytes_per_row: raw.bytes_per_row,
        }
    }

    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        if self.state != SessionState::Closed {
            tracing::info!(
                "Capture session for window {} closed after {} frames",
                self.window,
                self.frames_delivered
            );
        }
        self.state = SessionState::Closed;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn window(&self) -> WindowHandle {
        self.window
    }

    pub fn last_dimensions(&self) -> Option<(u32, u32)> {
        self.last_dimensions
    }

    /// Screen bounds reported with the most recent frame
    pub fn window_rect(&self) -> Option<WindowRect> {
        self.last_rect
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }
}
