//! Recording configuration, state and session summary

use crate::capture::input::recorder::DEFAULT_QUEUE_CAPACITY;
use crate::capture::window::{WindowHandle, DEFAULT_FRAME_TIMEOUT};
use crate::eventlog::MalformedPolicy;
use crate::recorder::encoder::DEFAULT_FPS;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Recording configuration passed from the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingConfig {
    /// Window to record, chosen by the caller's window picker
    pub window: WindowHandle,

    /// Parent directory; each session gets its own timestamped folder inside
    pub output_dir: PathBuf,

    /// How long one frame wait may block before the capture loop re-checks for stop
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,

    /// Bounded hook -> writer queue size
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Encoder frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// How export treats malformed event log records
    #[serde(default)]
    pub malformed_policy: MalformedPolicy,
}

fn default_frame_timeout_ms() -> u64 {
    DEFAULT_FRAME_TIMEOUT.as_millis() as u64
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}

impl RecordingConfig {
    pub fn new(window: WindowHandle, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            window,
            output_dir: output_dir.into(),
            frame_timeout_ms: default_frame_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            fps: default_fps(),
            malformed_policy: MalformedPolicy::default(),
        }
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms.max(1))
    }
}

/// Current state of the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingState {
    Idle,
    Recording,
    Stopping,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    /// `start` failed; nothing was recorded
    NeverStarted,
    /// The window went away (or the encoder failed) before `stop`
    StoppedEarly,
    Completed,
    /// Video is complete but input could not be recorded
    CompletedOverlayDegraded,
}

/// Result of a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub id: Uuid,
    pub started_at: DateTime<Local>,
    pub status: SessionStatus,

    /// Session folder
    pub output_dir: PathBuf,

    /// Output files (video parts, event log)
    pub outputs: Vec<String>,

    /// Total duration in milliseconds
    pub duration_ms: f64,

    /// Input events lost to a full queue
    pub dropped_events: u64,

    /// Per-channel notes for degraded or early-ended channels
    pub notes: Vec<String>,

    /// Malformed-record handling for exports of this session, from the config
    #[serde(default)]
    pub malformed_policy: MalformedPolicy,
}

impl RecordingSummary {
    pub fn never_started(id: Uuid, started_at: DateTime<Local>, output_dir: PathBuf, reason: String) -> Self {
        Self {
            id,
            started_at,
            status: SessionStatus::NeverStarted,
            output_dir,
            outputs: Vec::new(),
            duration_ms: 0.0,
            dropped_events: 0,
            notes: vec![reason],
            malformed_policy: MalformedPolicy::default(),
        }
    }
}
