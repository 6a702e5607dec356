//! Recording channel trait
//!
//! Defines the interface for the recording channels (window capture, input).

use crate::capture::input::types::{SessionClock, Timestamp};
use crate::capture::window::CaptureError;
use crate::eventlog::FormatError;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during recording
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Event log format error: {0}")]
    Format(#[from] FormatError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

/// Frame data from a capture source
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    /// Raw pixel data (BGRA format)
    pub data: Vec<u8>,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Time since the session clock origin
    pub timestamp: Timestamp,

    /// Bytes per row (may include padding)
    pub bytes_per_row: u32,
}

impl CapturedFrame {
    /// A tightly packed frame filled with one BGRA colour
    pub fn solid(width: u32, height: u32, bgra: [u8; 4], timestamp: Timestamp) -> Self {
        let data = bgra
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            data,
            width,
            height,
            timestamp,
            bytes_per_row: width * 4,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pixel rows without padding
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let stride = self.bytes_per_row.max(self.width * 4) as usize;
        let row_len = self.width as usize * 4;
        self.data
            .chunks(stride)
            .take(self.height as usize)
            .map(move |row| &row[..row_len.min(row.len())])
    }

    /// Copy with padding removed (`bytes_per_row == width * 4`)
    pub fn to_packed(&self) -> CapturedFrame {
        if self.bytes_per_row == self.width * 4 {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for row in self.rows() {
            data.extend_from_slice(row);
        }
        CapturedFrame {
            data,
            width: self.width,
            height: self.height,
            timestamp: self.timestamp,
            bytes_per_row: self.width * 4,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y as usize * self.bytes_per_row as usize + x as usize * 4;
        let px = self.data.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// How a channel's session went, as far as the orchestrator needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelHealth {
    Healthy,
    /// Running, but without part of its output
    Degraded(String),
    /// Stopped on its own before `stop` was called
    Ended(String),
}

/// Trait for recording channels
///
/// Each channel represents a capture source (window video, input).
/// Channels are managed by the RecordingCoordinator.
#[async_trait]
pub trait RecordingChannel: Send {
    /// Get the channel identifier (e.g., "window-42", "input")
    fn id(&self) -> &str;

    /// Get the channel type
    fn channel_type(&self) -> ChannelType;

    /// Initialize the channel with the output directory and the shared session clock
    async fn initialize(
        &mut self,
        output_dir: &Path,
        session_index: usize,
        clock: SessionClock,
    ) -> RecordingResult<()>;

    /// Start recording
    async fn start(&mut self) -> RecordingResult<()>;

    /// Stop recording
    async fn stop(&mut self) -> RecordingResult<()>;

    /// Check if the channel is currently recording
    fn is_recording(&self) -> bool;

    /// Current health; survives `stop` so the coordinator can report it
    fn health(&self) -> ChannelHealth;

    /// Get output files created by this channel
    fn output_files(&self) -> Vec<String>;

    /// Events lost to back-pressure in the last session
    fn dropped_events(&self) -> u64 {
        0
    }
}

/// Types of recording channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelType {
    /// Input tracking (mouse, keyboard)
    Input,
    /// Single-window capture
    Window,
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Input => write!(f, "input"),
            ChannelType::Window => write!(f, "window"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_packed_strips_padding() {
        let frame = CapturedFrame {
            data: vec![
                1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0, //
                9, 10, 11, 12, 13, 14, 15, 16, 0, 0, 0, 0,
            ],
            width: 2,
            height: 2,
            timestamp: Timestamp::ZERO,
            bytes_per_row: 12,
        };
        let packed = frame.to_packed();
        assert_eq!(packed.bytes_per_row, 8);
        assert_eq!(packed.data, (1..=16).collect::<Vec<u8>>());
        assert_eq!(frame.pixel(1, 1), Some([13, 14, 15, 16]));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn test_input_channels_sort_first() {
        let mut types = vec![ChannelType::Window, ChannelType::Input];
        types.sort();
        assert_eq!(types, vec![ChannelType::Input, ChannelType::Window]);
    }
}
