use crate::capture::input::recorder::{InputEventRecorder, RecorderOutput, DEFAULT_QUEUE_CAPACITY};
use crate::capture::input::source::{HookInstallError, InputSource};
use crate::capture::input::types::SessionClock;
use crate::eventlog::{codec, EventLog};
use crate::recorder::channel::{
    ChannelHealth, ChannelType, RecordingChannel, RecordingError, RecordingResult,
};
use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Records keyboard and mouse input and writes it as an event log on stop
///
/// The input source is lent to the recorder for the span of a session and
/// taken back on stop, so one channel can record any number of sessions.
pub struct InputTrackingChannel {
    id: String,
    output_dir: Option<PathBuf>,
    session_index: usize,
    clock: Option<SessionClock>,
    queue_capacity: usize,
    output_files: Arc<ParkingMutex<Vec<String>>>,

    source: Option<Box<dyn InputSource>>,
    recorder: Option<InputEventRecorder>,
    degraded: Option<HookInstallError>,
    last_log: Option<EventLog>,
    dropped: u64,
}

impl InputTrackingChannel {
    pub fn new(source: Box<dyn InputSource>) -> Self {
        Self {
            id: "input".to_string(),
            output_dir: None,
            session_index: 0,
            clock: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            output_files: Arc::new(ParkingMutex::new(Vec::new())),
            source: Some(source),
            recorder: None,
            degraded: None,
            last_log: None,
            dropped: 0,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    fn session_basename(&self) -> String {
        format!("recording-{}", self.session_index)
    }

    /// Path of the event log written by `stop`
    pub fn log_path(&self) -> Option<PathBuf> {
        self.output_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.tsv", self.session_basename())))
    }

    /// Log produced by the most recent session
    pub fn last_log(&self) -> Option<&EventLog> {
        self.last_log.as_ref()
    }

    fn flush_to_disk(&mut self, log: &EventLog) -> RecordingResult<()> {
        let path = self.log_path().ok_or_else(|| {
            RecordingError::ConfigurationError("Output directory not set".to_string())
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        codec::write_file(log, &path)?;
        self.output_files
            .lock()
            .push(path.to_string_lossy().to_string());
        Ok(())
    }
}

#[async_trait]
impl RecordingChannel for InputTrackingChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Input
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
            "Input tracking channel initialized (session={})",
            self.session_index
        );
        Ok(())
    }

    async fn start(&mut self) -> RecordingResult<()> {
        if self.recorder.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }

        let clock = self.clock.ok_or_else(|| {
            RecordingError::ConfigurationError("Channel not initialized".to_string())
        })?;
        let source = self.source.take().ok_or_else(|| {
            RecordingError::ConfigurationError("Input source already consumed".to_string())
        })?;

        self.output_files.lock().clear();
        self.last_log = None;

        let recorder = InputEventRecorder::start(clock, source, self.queue_capacity);
        self.degraded = recorder.degraded().cloned();
        self.recorder = Some(recorder);

        tracing::info!("Input tracking started");
        Ok(())
    }

    async fn stop(&mut self) -> RecordingResult<()> {
        let Some(recorder) = self.recorder.take() else {
            return Err(RecordingError::NotRecording);
        };

        // joining the writer thread can take a moment on a large queue
        let output: RecorderOutput = tokio::task::spawn_blocking(move || recorder.stop())
            .await
            .map_err(|e| RecordingError::ConfigurationError(format!("Input writer task failed: {}", e)))?;

        let RecorderOutput {
            log,
            dropped,
            degraded,
            source,
        } = output;
        self.source = Some(source);
        self.dropped = dropped;
        self.degraded = degraded;
        self.flush_to_disk(&log)?;

        tracing::info!(
            "Input tracking stopped (events={}, dropped={}, degraded={})",
            log.len(),
            self.dropped,
            self.degraded.is_some()
        );
        self.last_log = Some(log);
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    fn health(&self) -> ChannelHealth {
        match &self.degraded {
            Some(e) => ChannelHealth::Degraded(e.to_string()),
            None => ChannelHealth::Healthy,
        }
    }

    fn output_files(&self) -> Vec<String> {
        self.output_files.lock().clone()
    }

    fn dropped_events(&self) -> u64 {
        self.dropped
    }
}
