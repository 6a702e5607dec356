//! macOS window capture using ScreenCaptureKit
//!
//! A desktop-independent window filter captures the window's own compositor
//! surface, so overlapping windows never bleed into the frames. Frames are
//! handed from the ScreenCaptureKit callback to the capture thread through a
//! small bounded queue; when the queue is full the newest frame is dropped.
//!
//! The stream's output size is fixed by its configuration, so the window's
//! bounds are re-read periodically and the stream is reconfigured on resize.

use crate::capture::window::{
    BoundsTracker, CaptureBackend, CaptureError, CaptureResult, RawFrame, WindowHandle,
    WindowRect, WindowStream,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use screencapturekit::cv::CVPixelBufferLockFlags;
use screencapturekit::prelude::*;
use std::time::{Duration, Instant};

const FRAME_QUEUE_DEPTH: usize = 3;
const DEFAULT_FPS: i32 = 30;
/// How often the window's bounds are re-read
const BOUNDS_REFRESH_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
pub struct ScreenCaptureKitBackend;

fn find_window(window_id: u32) -> CaptureResult<SCWindow> {
    let content = SCShareableContent::get().map_err(|e| {
        CaptureError::PermissionDenied(format!("Failed to get shareable content: {}", e))
    })?;

    content
        .windows()
        .into_iter()
        .find(|w| w.window_id() == window_id)
        .ok_or(CaptureError::WindowNotFound)
}

/// Window frame in points; ScreenCaptureKit already uses a top-left origin
fn window_rect(window: &SCWindow) -> WindowRect {
    let frame = window.frame();
    WindowRect {
        x: frame.x.round() as i32,
        y: frame.y.round() as i32,
        width: frame.width.max(1.0) as u32,
        height: frame.height.max(1.0) as u32,
    }
}

fn stream_configuration(width: u32, height: u32) -> SCStreamConfiguration {
    let frame_interval = CMTime::new(1, DEFAULT_FPS);
    SCStreamConfiguration::new()
        .with_width(width)
        .with_height(height)
        .with_pixel_format(PixelFormat::BGRA)
        .with_minimum_frame_interval(&frame_interval)
        .with_shows_cursor(false)
}

impl CaptureBackend for ScreenCaptureKitBackend {
    fn name(&self) -> &str {
        "screencapturekit"
    }

    fn open(&mut self, window: WindowHandle) -> CaptureResult<Box<dyn WindowStream>> {
        if !super::permissions::has_screen_recording_permission() {
            super::permissions::request_screen_recording_permission();
            return Err(CaptureError::PermissionDenied(
                "Screen recording permission not granted. Please allow in System Settings."
                    .to_string(),
            ));
        }

        let window_id = u32::try_from(window.0).map_err(|_| CaptureError::WindowNotFound)?;
        let sc_window = find_window(window_id)?;
        let rect = window_rect(&sc_window);
        let (width, height) = rect.size();

        let filter = SCContentFilter::create().with_window(&sc_window).build();
        let config = stream_configuration(width, height);

        let (tx, rx) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
        let handler = FrameHandler { tx };

        let mut stream = SCStream::new(&filter, &config);
        stream.add_output_handler(handler, SCStreamOutputType::Screen);
        stream.start_capture().map_err(|e| {
            CaptureError::BackendUnavailable(format!("Failed to start capture: {}", e))
        })?;

        tracing::info!(
            "ScreenCaptureKit window stream started for window {} ({}x{} at {},{} @ {}fps)",
            window_id,
            width,
            height,
            rect.x,
            rect.y,
            DEFAULT_FPS
        );

        Ok(Box::new(ScreenCaptureKitStream {
            window_id,
            stream: Some(stream),
            frames: rx,
            bounds: BoundsTracker::new(rect, BOUNDS_REFRESH_INTERVAL),
        }))
    }
}

/// Frame handler for ScreenCaptureKit
struct FrameHandler {
    tx: Sender<RawFrame>,
}

impl SCStreamOutputTrait for FrameHandler {
    fn did_output_sample_buffer(&self, sample: CMSampleBuffer, output_type: SCStreamOutputType) {
        if !matches!(output_type, SCStreamOutputType::Screen) {
            return;
        }

        let Some(pixel_buffer) = sample.image_buffer() else {
            return;
        };

        let width = pixel_buffer.width() as u32;
        let height = pixel_buffer.height() as u32;
        let bytes_per_row = pixel_buffer.bytes_per_row() as u32;

        // Lock pixel buffer for CPU access
        let Ok(guard) = pixel_buffer.lock(CVPixelBufferLockFlags::READ_ONLY) else {
            return;
        };

        let data = guard.as_slice();
        let expected = bytes_per_row as usize * height as usize;
        if width == 0 || height == 0 || data.len() < expected {
            return;
        }

        // the capture thread is behind; dropping is preferable to blocking the callback
        let _ = self.tx.try_send(RawFrame {
            data: data[..expected].to_vec(),
            width,
            height,
            bytes_per_row,
            captured_at: Instant::now(),
            window_rect: None,
        });
    }
}

struct ScreenCaptureKitStream {
    window_id: u32,
    stream: Option<SCStream>,
    frames: Receiver<RawFrame>,
    bounds: BoundsTracker,
}

impl ScreenCaptureKitStream {
    /// Pick up moves and resizes; a vanished window ends the stream
    fn refresh_bounds(&mut self, force: bool) -> CaptureResult<()> {
        let window_id = self.window_id;
        let query = || {
            find_window(window_id)
                .map(|w| window_rect(&w))
                .map_err(|e| match e {
                    CaptureError::WindowNotFound => CaptureError::WindowClosed,
                    other => other,
                })
        };
        let now = if force {
            Instant::now() + BOUNDS_REFRESH_INTERVAL
        } else {
            Instant::now()
        };

        let Some((width, height)) = self.bounds.refresh(now, query)? else {
            return Ok(());
        };
        if let Some(stream) = self.stream.as_ref() {
            stream
                .update_configuration(&stream_configuration(width, height))
                .map_err(|e| {
                    CaptureError::BackendUnavailable(format!("Failed to resize capture: {}", e))
                })?;
            tracing::debug!(
                "Window {} stream reconfigured to {}x{}",
                window_id,
                width,
                height
            );
        }
        Ok(())
    }
}

impl WindowStream for ScreenCaptureKitStream {
    fn next_frame(&mut self, timeout: Duration) -> CaptureResult<Option<RawFrame>> {
        self.refresh_bounds(false)?;
        match self.frames.recv_timeout(timeout) {
            Ok(mut frame) => {
                frame.window_rect = Some(self.bounds.rect());
                Ok(Some(frame))
            }
            // minimized and covered windows stop producing frames; only a
            // vanished window ends the stream
            Err(RecvTimeoutError::Timeout) => {
                self.refresh_bounds(true)?;
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::WindowClosed),
        }
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop_capture() {
                tracing::warn!("Failed to stop window capture {}: {}", self.window_id, e);
            }
        }
    }
}
