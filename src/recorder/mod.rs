//! Recording coordinator
//!
//! Starts the window capture and input tracking channels against one shared
//! session clock and stops them in a fixed order: input first, so its queue
//! is flushed while the video is still running, then capture.

pub mod channel;
pub mod decoder;
pub mod encoder;
pub mod export;
pub mod frame_index;
pub mod state;
pub mod window_channel;

pub use channel::{CapturedFrame, ChannelHealth, ChannelType, RecordingChannel, RecordingError, RecordingResult};
pub use encoder::{FfmpegSink, FrameSink};
pub use export::{ExportError, ExportReport, OverlayExporter};
pub use frame_index::{FrameIndexWriter, FrameRecord};
pub use state::{RecordingConfig, RecordingState, RecordingSummary, SessionStatus};
pub use window_channel::WindowCaptureChannel;

use crate::capture::input::source::platform_source;
use crate::capture::input::types::SessionClock;
use crate::capture::input::InputTrackingChannel;
use crate::eventlog::MalformedPolicy;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

/// File the coordinator writes next to the recordings on stop
pub const SUMMARY_FILE: &str = "session.json";

struct ActiveSession {
    id: Uuid,
    started_at: DateTime<Local>,
    started: Instant,
    output_dir: PathBuf,
    malformed_policy: MalformedPolicy,
}

/// `session-<timestamp>` under `parent`, with a numeric suffix if a session
/// started within the same second already took that name
fn unique_session_dir(parent: &Path, started_at: DateTime<Local>) -> PathBuf {
    let base = format!("session-{}", started_at.format("%Y%m%d-%H%M%S"));
    let mut dir = parent.join(&base);
    let mut n = 1;
    while dir.exists() {
        dir = parent.join(format!("{base}-{n}"));
        n += 1;
    }
    dir
}

/// Coordinates all recording channels for one session at a time
pub struct RecordingCoordinator {
    channels: Vec<Box<dyn RecordingChannel>>,
    state: RecordingState,
    session: Option<ActiveSession>,
    sessions_started: usize,
    last_summary: Option<RecordingSummary>,
    /// Channels were created by `start`; they are single-use and dropped after the session
    default_channels: bool,
}

impl Default for RecordingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingCoordinator {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            state: RecordingState::Idle,
            session: None,
            sessions_started: 0,
            last_summary: None,
            default_channels: false,
        }
    }

    pub fn add_channel(&mut self, channel: Box<dyn RecordingChannel>) {
        self.channels.push(channel);
    }

    pub fn clear_channels(&mut self) {
        self.channels.clear();
    }

    /// Platform window capture plus platform input tracking
    fn add_default_channels(&mut self, config: &RecordingConfig) {
        let window = WindowCaptureChannel::new(config.window)
            .with_frame_timeout(config.frame_timeout())
            .with_sink_factory(window_channel::ffmpeg_sink_factory(config.fps));
        let input =
            InputTrackingChannel::new(platform_source()).with_queue_capacity(config.queue_capacity);
        self.add_channel(Box::new(window));
        self.add_channel(Box::new(input));
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn duration_ms(&self) -> f64 {
        self.session
            .as_ref()
            .map(|s| s.started.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    /// Summary of the most recent session, including one that failed to start
    pub fn last_summary(&self) -> Option<&RecordingSummary> {
        self.last_summary.as_ref()
    }

    /// Start recording
    ///
    /// Uses the channels added so far, or the platform defaults when none were
    /// added. If any channel fails to start, the ones already running are
    /// stopped again and the session is recorded as never started.
    pub async fn start(&mut self, config: RecordingConfig) -> RecordingResult<()> {
        if self.state != RecordingState::Idle {
            return Err(RecordingError::AlreadyRecording);
        }
        if self.channels.is_empty() {
            self.add_default_channels(&config);
            self.default_channels = true;
        }
        self.channels.sort_by_key(|c| c.channel_type());

        let id = Uuid::new_v4();
        let started_at = Local::now();
        let session_dir = unique_session_dir(&config.output_dir, started_at);
        std::fs::create_dir_all(&session_dir)?;

        let session_index = self.sessions_started;
        self.sessions_started += 1;
        let clock = SessionClock::start();

        tracing::info!(
            "Starting recording session {} for window {} in {:?}",
            id,
            config.window,
            session_dir
        );

        if let Err(e) = self.start_channels(&session_dir, session_index, clock).await {
            tracing::error!("Recording failed to start: {}", e);
            let mut summary =
                RecordingSummary::never_started(id, started_at, session_dir, e.to_string());
            summary.malformed_policy = config.malformed_policy;
            self.last_summary = Some(summary);
            self.release_default_channels();
            return Err(e);
        }

        self.session = Some(ActiveSession {
            id,
            started_at,
            started: clock.origin(),
            output_dir: session_dir,
            malformed_policy: config.malformed_policy,
        });
        self.state = RecordingState::Recording;
        tracing::info!("Recording started with {} channels", self.channels.len());
        Ok(())
    }

    async fn start_channels(
        &mut self,
        session_dir: &Path,
        session_index: usize,
        clock: SessionClock,
    ) -> RecordingResult<()> {
        for channel in &mut self.channels {
            channel.initialize(session_dir, session_index, clock).await?;
        }

        for i in 0..self.channels.len() {
            let started = self.channels[i].start().await;
            if let Err(e) = started {
                tracing::error!("Failed to start channel {}: {}", self.channels[i].id(), e);
                for started in self.channels[..i].iter_mut() {
                    if let Err(stop_err) = started.stop().await {
                        tracing::warn!("Failed to roll back channel {}: {}", started.id(), stop_err);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stop recording and return the session summary
    pub async fn stop(&mut self) -> RecordingResult<RecordingSummary> {
        if self.state != RecordingState::Recording {
            return Err(RecordingError::NotRecording);
        }
        let Some(session) = self.session.take() else {
            return Err(RecordingError::NotRecording);
        };
        self.state = RecordingState::Stopping;

        // channels are sorted by type, so input stops before capture
        let mut first_error = None;
        for channel in &mut self.channels {
            tracing::debug!("Stopping channel {}", channel.id());
            match channel.stop().await {
                Ok(()) | Err(RecordingError::NotRecording) => {}
                Err(e) => {
                    tracing::error!("Failed to stop channel {}: {}", channel.id(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        let summary = self.summarize(&session);
        self.write_summary(&summary);
        self.last_summary = Some(summary.clone());
        self.release_default_channels();
        self.state = RecordingState::Idle;

        tracing::info!(
            "Recording stopped: {:?}, {} files, {:.0}ms",
            summary.status,
            summary.outputs.len(),
            summary.duration_ms
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    fn release_default_channels(&mut self) {
        if self.default_channels {
            self.channels.clear();
            self.default_channels = false;
        }
    }

    fn summarize(&self, session: &ActiveSession) -> RecordingSummary {
        let mut outputs = Vec::new();
        let mut notes = Vec::new();
        let mut ended_early = false;
        let mut input_degraded = false;
        let mut dropped_events = 0;

        for channel in &self.channels {
            outputs.extend(channel.output_files());
            dropped_events += channel.dropped_events();
            match (channel.channel_type(), channel.health()) {
                (_, ChannelHealth::Healthy) => {}
                (ChannelType::Window, ChannelHealth::Ended(reason)) => {
                    ended_early = true;
                    notes.push(format!("{}: ended early: {}", channel.id(), reason));
                }
                (ChannelType::Input, ChannelHealth::Degraded(reason) | ChannelHealth::Ended(reason)) => {
                    input_degraded = true;
                    notes.push(format!("{}: {}", channel.id(), reason));
                }
                (_, ChannelHealth::Degraded(reason)) => {
                    notes.push(format!("{}: {}", channel.id(), reason));
                }
            }
        }

        let status = if ended_early {
            SessionStatus::StoppedEarly
        } else if input_degraded {
            SessionStatus::CompletedOverlayDegraded
        } else {
            SessionStatus::Completed
        };

        RecordingSummary {
            id: session.id,
            started_at: session.started_at,
            status,
            output_dir: session.output_dir.clone(),
            outputs,
            duration_ms: session.started.elapsed().as_secs_f64() * 1000.0,
            dropped_events,
            notes,
            malformed_policy: session.malformed_policy,
        }
    }

    fn write_summary(&self, summary: &RecordingSummary) {
        let path = summary.output_dir.join(SUMMARY_FILE);
        let written = serde_json::to_string_pretty(summary)
            .map_err(std::io::Error::from)
            .and_then(|json| std::fs::write(&path, json));
        if let Err(e) = written {
            tracing::warn!("Failed to write session summary {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::input::source::testing::{ChannelSource, CountingSource, DeniedSource};
    use crate::capture::input::types::{RawDeviceEvent, RawEventKind};
    use crate::capture::window::testing::{ScriptedBackend, Step};
    use crate::capture::window::WindowHandle;
    use crate::eventlog::{codec, MalformedPolicy};
    use crate::recorder::encoder::testing::MemorySink;
    use std::time::Duration;

    const WIN: WindowHandle = WindowHandle(7);

    fn window_channel(steps: Vec<Step>, sink: MemorySink) -> Box<WindowCaptureChannel> {
        let backend = ScriptedBackend::default().with_window(WIN, steps);
        Box::new(
            WindowCaptureChannel::new(WIN)
                .with_backend(Box::new(backend))
                .with_sink_factory(Box::new(move |_: &Path, _: &str| {
                    Ok(Box::new(sink.clone()) as Box<dyn FrameSink>)
                }))
                .with_frame_timeout(Duration::from_millis(20)),
        )
    }

    #[tokio::test]
    async fn test_full_session() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::default();
        let (tx, rx) = crossbeam_channel::unbounded();

        let mut coordinator = RecordingCoordinator::new();
        // added in the "wrong" order; stop order comes from the channel type
        coordinator.add_channel(window_channel(
            vec![Step::Frame { width: 4, height: 4 }],
            sink.clone(),
        ));
        coordinator.add_channel(Box::new(InputTrackingChannel::new(Box::new(
            ChannelSource::new(rx),
        ))));

        coordinator
            .start(RecordingConfig::new(WIN, dir.path()))
            .await
            .unwrap();
        assert_eq!(coordinator.state(), RecordingState::Recording);
        assert!(matches!(
            coordinator.start(RecordingConfig::new(WIN, dir.path())).await,
            Err(RecordingError::AlreadyRecording)
        ));

        tx.send(RawDeviceEvent::now(RawEventKind::KeyDown("s".to_string())))
            .unwrap();
        drop(tx);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let summary = coordinator.stop().await.unwrap();
        assert_eq!(coordinator.state(), RecordingState::Idle);
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.dropped_events, 0);
        assert!(*sink.finalized.lock());

        let log_path = summary.output_dir.join("recording-0.tsv");
        assert!(summary
            .outputs
            .contains(&log_path.to_string_lossy().to_string()));
        let report = codec::read_file(&log_path, MalformedPolicy::Abort).unwrap();
        assert_eq!(report.log.len(), 1);
        assert!(summary.output_dir.join(SUMMARY_FILE).exists());

        assert!(matches!(
            coordinator.stop().await,
            Err(RecordingError::NotRecording)
        ));
    }

    #[tokio::test]
    async fn test_caller_channels_record_two_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::default();
        let source = CountingSource::default();
        // one scripted stream per session
        let backend = ScriptedBackend::default()
            .with_window(WIN, vec![Step::Frame { width: 4, height: 4 }])
            .with_window(WIN, vec![Step::Frame { width: 4, height: 4 }]);

        let mut coordinator = RecordingCoordinator::new();
        coordinator.add_channel(Box::new(
            WindowCaptureChannel::new(WIN)
                .with_backend(Box::new(backend))
                .with_sink_factory(Box::new(move |_: &Path, _: &str| {
                    Ok(Box::new(sink.clone()) as Box<dyn FrameSink>)
                }))
                .with_frame_timeout(Duration::from_millis(20)),
        ));
        coordinator.add_channel(Box::new(InputTrackingChannel::new(Box::new(source.clone()))));

        let mut config = RecordingConfig::new(WIN, dir.path());
        config.malformed_policy = MalformedPolicy::Abort;

        let mut summaries = Vec::new();
        for _ in 0..2 {
            coordinator.start(config.clone()).await.unwrap();
            summaries.push(coordinator.stop().await.unwrap());
        }

        assert_eq!(source.installs(), 2);
        for summary in &summaries {
            assert_eq!(summary.status, SessionStatus::Completed);
            assert_eq!(summary.malformed_policy, MalformedPolicy::Abort);
        }
        assert_ne!(summaries[0].output_dir, summaries[1].output_dir);
        assert!(summaries[1].output_dir.join("recording-1.tsv").exists());

        let written = std::fs::read_to_string(summaries[1].output_dir.join(SUMMARY_FILE)).unwrap();
        let read_back: RecordingSummary = serde_json::from_str(&written).unwrap();
        assert_eq!(read_back.malformed_policy, MalformedPolicy::Abort);
    }

    #[tokio::test]
    async fn test_window_closed_reports_stopped_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = RecordingCoordinator::new();
        coordinator.add_channel(window_channel(
            vec![Step::Frame { width: 4, height: 4 }, Step::Destroyed],
            MemorySink::default(),
        ));
        coordinator.add_channel(Box::new(InputTrackingChannel::new(Box::new(DeniedSource))));

        coordinator
            .start(RecordingConfig::new(WIN, dir.path()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let summary = coordinator.stop().await.unwrap();
        assert_eq!(summary.status, SessionStatus::StoppedEarly);
        assert!(!summary.notes.is_empty());
    }

    #[tokio::test]
    async fn test_denied_input_completes_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = RecordingCoordinator::new();
        coordinator.add_channel(window_channel(vec![], MemorySink::default()));
        coordinator.add_channel(Box::new(InputTrackingChannel::new(Box::new(DeniedSource))));

        coordinator
            .start(RecordingConfig::new(WIN, dir.path()))
            .await
            .unwrap();
        let summary = coordinator.stop().await.unwrap();
        assert_eq!(summary.status, SessionStatus::CompletedOverlayDegraded);
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = RecordingCoordinator::new();
        // scripted backend knows no windows
        coordinator.add_channel(Box::new(
            WindowCaptureChannel::new(WIN).with_backend(Box::new(ScriptedBackend::default())),
        ));
        coordinator.add_channel(Box::new(InputTrackingChannel::new(Box::new(DeniedSource))));

        let result = coordinator.start(RecordingConfig::new(WIN, dir.path())).await;
        assert!(matches!(result, Err(RecordingError::Capture(_))));
        assert_eq!(coordinator.state(), RecordingState::Idle);
        assert_eq!(
            coordinator.last_summary().map(|s| s.status),
            Some(SessionStatus::NeverStarted)
        );
        assert!(matches!(
            coordinator.stop().await,
            Err(RecordingError::NotRecording)
        ));
    }
}
