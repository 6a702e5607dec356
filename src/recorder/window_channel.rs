use crate::capture::input::types::SessionClock;
use crate::capture::window::{
    platform_backend, CaptureBackend, CaptureError, CaptureSession, WindowHandle,
    DEFAULT_FRAME_TIMEOUT,
};
use crate::recorder::channel::{
    ChannelHealth, ChannelType, RecordingChannel, RecordingError, RecordingResult,
};
use crate::recorder::encoder::{FfmpegSink, FrameSink, DEFAULT_FPS};
use crate::recorder::frame_index::{frame_index_name, FrameIndexWriter, FrameRecord};
use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Builds the sink for one session from the output directory and file basename
pub type SinkFactory =
    Box<dyn Fn(&Path, &str) -> RecordingResult<Box<dyn FrameSink>> + Send + Sync>;

/// Sink factory encoding to mp4 through ffmpeg
pub fn ffmpeg_sink_factory(fps: u32) -> SinkFactory {
    Box::new(move |dir: &Path, basename: &str| {
        let sink = FfmpegSink::new(dir, basename, fps)?;
        Ok(Box::new(sink) as Box<dyn FrameSink>)
    })
}

/// Records one window into a frame sink
///
/// Frames are pulled on a dedicated thread because `next_frame` blocks for
/// up to the frame timeout. Every frame the sink accepts also gets a line in
/// the `<basename>.frames.tsv` sidecar with its session time and the window's
/// screen position.
pub struct WindowCaptureChannel {
    id: String,
    window: WindowHandle,
    frame_timeout: Duration,
    backend: Box<dyn CaptureBackend>,
    sink_factory: SinkFactory,

    output_dir: Option<PathBuf>,
    session_index: usize,
    clock: Option<SessionClock>,

    is_recording: Arc<AtomicBool>,
    health: Arc<ParkingMutex<ChannelHealth>>,
    frames_written: Arc<AtomicU64>,
    output_files: Arc<ParkingMutex<Vec<String>>>,
    worker: Option<JoinHandle<()>>,
}

impl WindowCaptureChannel {
    pub fn new(window: WindowHandle) -> Self {
        Self {
            id: format!("window-{}", window),
            window,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            backend: platform_backend(),
            sink_factory: ffmpeg_sink_factory(DEFAULT_FPS),
            output_dir: None,
            session_index: 0,
            clock: None,
            is_recording: Arc::new(AtomicBool::new(false)),
            health: Arc::new(ParkingMutex::new(ChannelHealth::Healthy)),
            frames_written: Arc::new(AtomicU64::new(0)),
            output_files: Arc::new(ParkingMutex::new(Vec::new())),
            worker: None,
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn CaptureBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_sink_factory(mut self, factory: SinkFactory) -> Self {
        self.sink_factory = factory;
        self
    }

    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    pub fn window(&self) -> WindowHandle {
        self.window
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::SeqCst)
    }
}

/// Pull frames until stopped or the window goes away, then close everything
fn capture_loop(
    mut session: CaptureSession,
    mut sink: Box<dyn FrameSink>,
    mut index: FrameIndexWriter,
    is_recording: Arc<AtomicBool>,
    health: Arc<ParkingMutex<ChannelHealth>>,
    frames_written: Arc<AtomicU64>,
    output_files: Arc<ParkingMutex<Vec<String>>>,
) {
    while is_recording.load(Ordering::SeqCst) {
        match session.next_frame() {
            Ok(frame) => {
                if !sink.accepts(&frame) {
                    tracing::warn!(
                        "Skipping {}x{} frame: too small to encode",
                        frame.width,
                        frame.height
                    );
                    continue;
                }
                if let Err(e) = sink.append_frame(&frame) {
                    tracing::error!("Failed to append frame: {}", e);
                    *health.lock() = ChannelHealth::Ended(e.to_string());
                    break;
                }
                let record = FrameRecord {
                    timestamp: frame.timestamp,
                    origin: session.window_rect().map_or((0, 0), |r| r.origin()),
                    width: frame.width,
                    height: frame.height,
                };
                if let Err(e) = index.append(&record) {
                    tracing::error!("Failed to write frame index: {}", e);
                    *health.lock() = ChannelHealth::Ended(e.to_string());
                    break;
                }
                frames_written.fetch_add(1, Ordering::SeqCst);
            }
            // minimized or unchanged window; keep waiting
            Err(CaptureError::Timeout(_)) => continue,
            Err(e) => {
                tracing::warn!("Window capture ended early: {}", e);
                *health.lock() = ChannelHealth::Ended(e.to_string());
                break;
            }
        }
    }
    is_recording.store(false, Ordering::SeqCst);

    session.close();
    let finished = sink
        .finalize()
        .map(|files| output_files.lock().extend(files))
        .and_then(|_| {
            let path = index.finish()?;
            output_files.lock().push(path);
            Ok(())
        });
    if let Err(e) = finished {
        tracing::error!("Failed to finalize recording: {}", e);
        let mut health = health.lock();
        if *health == ChannelHealth::Healthy {
            *health = ChannelHealth::Ended(e.to_string());
        }
    }

    tracing::info!(
        "Window capture loop finished ({} frames)",
        frames_written.load(Ordering::SeqCst)
    );
}

#[async_trait]
impl RecordingChannel for WindowCaptureChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Window
    }

    async fn initialize(
        &mut self,
        output_dir: &Path,
        session_index: usize,
        clock: SessionClock,
    ) -> RecordingResult<()> {
        self.output_dir = Some(output_dir.to_path_buf());
        self.session_index = session_index;
        self.clock = Some(clock);

        tracing::info!(
            "Window capture channel initialized for window {} (session={})",
            self.window,
            self.session_index
        );
        Ok(())
    }

    async fn start(&mut self) -> RecordingResult<()> {
        if self.worker.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }

        let clock = self.clock.ok_or_else(|| {
            RecordingError::ConfigurationError("Channel not initialized".to_string())
        })?;
        let output_dir = self.output_dir.clone().ok_or_else(|| {
            RecordingError::ConfigurationError("Output directory not set".to_string())
        })?;

        // Open before spawning so a bad handle fails `start` itself
        let session = CaptureSession::open_with(self.backend.as_mut(), self.window, clock)?
            .with_frame_timeout(self.frame_timeout);
        let basename = format!("recording-{}", self.session_index);
        let sink = (self.sink_factory)(&output_dir, &basename)?;
        let index = FrameIndexWriter::create(&output_dir.join(frame_index_name(&basename)))?;

        *self.health.lock() = ChannelHealth::Healthy;
        self.frames_written.store(0, Ordering::SeqCst);
        self.output_files.lock().clear();
        self.is_recording.store(true, Ordering::SeqCst);

        let is_recording = self.is_recording.clone();
        let health = self.health.clone();
        let frames_written = self.frames_written.clone();
        let output_files = self.output_files.clone();
        let worker = std::thread::Builder::new()
            .name("window-capture".to_string())
            .spawn(move || {
                capture_loop(
                    session,
                    sink,
                    index,
                    is_recording,
                    health,
                    frames_written,
                    output_files,
                )
            });

        match worker {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                self.is_recording.store(false, Ordering::SeqCst);
                return Err(RecordingError::IoError(e));
            }
        }

        tracing::info!("Window capture started for window {}", self.window);
        Ok(())
    }

    async fn stop(&mut self) -> RecordingResult<()> {
        let Some(worker) = self.worker.take() else {
            return Err(RecordingError::NotRecording);
        };

        self.is_recording.store(false, Ordering::SeqCst);
        // the loop finishes its current frame wait and finalizes the sink
        tokio::task::spawn_blocking(move || worker.join())
            .await
            .map_err(|e| RecordingError::ConfigurationError(format!("Capture task failed: {}", e)))?
            .map_err(|_| RecordingError::EncodingError("Capture thread panicked".to_string()))?;

        tracing::info!(
            "Window capture stopped (frames={}, health={:?})",
            self.frames_written(),
            self.health()
        );
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    fn health(&self) -> ChannelHealth {
        self.health.lock().clone()
    }

    fn output_files(&self) -> Vec<String> {
        self.output_files.lock().clone()
    }
}
