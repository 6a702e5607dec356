//! Reading a recording back as frames
//!
//! Each video part is decoded to raw BGRA by an `ffmpeg` child process. The
//! parts and their sizes are worked out from the frame index, which has one
//! line per encoded frame, so no container probing is needed.

use crate::capture::input::types::Timestamp;
use crate::recorder::channel::{CapturedFrame, RecordingError, RecordingResult};
use crate::recorder::encoder::{even_dimensions, ffmpeg_available, part_file_name};
use crate::recorder::frame_index::FrameRecord;
use std::collections::VecDeque;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

/// One encoded file and the frames it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    pub file_name: String,
    /// Encoded (even) size
    pub dimensions: (u32, u32),
    pub frames: usize,
}

/// Split the index into the parts the encoder wrote: a new part starts
/// whenever the encoded size changes
pub fn plan_parts(basename: &str, records: &[FrameRecord]) -> Vec<PartPlan> {
    let mut parts: Vec<PartPlan> = Vec::new();
    for record in records {
        let dims = even_dimensions(record.width, record.height);
        match parts.last_mut() {
            Some(part) if part.dimensions == dims => part.frames += 1,
            _ => parts.push(PartPlan {
                file_name: part_file_name(basename, parts.len()),
                dimensions: dims,
                frames: 1,
            }),
        }
    }
    parts
}

/// Decoded frames of one video file, stamped with `Timestamp::ZERO`
pub struct VideoFrames {
    process: Child,
    stdout: BufReader<ChildStdout>,
    dimensions: (u32, u32),
    path: PathBuf,
}

impl VideoFrames {
    pub fn open(path: &Path, (width, height): (u32, u32)) -> RecordingResult<Self> {
        let mut process = Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "bgra", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RecordingError::EncodingError(format!("Failed to start FFmpeg: {}", e)))?;
        let stdout = process.stdout.take().ok_or_else(|| {
            RecordingError::EncodingError("FFmpeg stdout unavailable".to_string())
        })?;

        tracing::debug!("Decoding {:?} at {}x{}", path, width, height);
        Ok(Self {
            process,
            stdout: BufReader::new(stdout),
            dimensions: (width, height),
            path: path.to_path_buf(),
        })
    }
}

impl Iterator for VideoFrames {
    type Item = CapturedFrame;

    fn next(&mut self) -> Option<CapturedFrame> {
        let (width, height) = self.dimensions;
        let mut data = vec![0u8; width as usize * height as usize * 4];
        match self.stdout.read_exact(&mut data) {
            Ok(()) => Some(CapturedFrame {
                data,
                width,
                height,
                timestamp: Timestamp::ZERO,
                bytes_per_row: width * 4,
            }),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    tracing::warn!("Failed to read decoded frame from {:?}: {}", self.path, e);
                }
                None
            }
        }
    }
}

impl Drop for VideoFrames {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Frames of every part of a recording, in capture order
pub struct RecordedFrames {
    dir: PathBuf,
    parts: VecDeque<PartPlan>,
    current: Option<VideoFrames>,
}

impl RecordedFrames {
    pub fn open(dir: &Path, basename: &str, records: &[FrameRecord]) -> RecordingResult<Self> {
        if !ffmpeg_available() {
            return Err(RecordingError::ConfigurationError(
                "FFmpeg not found. Please install FFmpeg and make sure it is on PATH".to_string(),
            ));
        }
        let parts: VecDeque<PartPlan> = plan_parts(basename, records).into();
        if let Some(missing) = parts.iter().find(|p| !dir.join(&p.file_name).exists()) {
            return Err(RecordingError::ConfigurationError(format!(
                "Recording part {} is missing",
                missing.file_name
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            parts,
            current: None,
        })
    }
}

impl Iterator for RecordedFrames {
    type Item = CapturedFrame;

    fn next(&mut self) -> Option<CapturedFrame> {
        loop {
            if let Some(frame) = self.current.as_mut().and_then(|part| part.next()) {
                return Some(frame);
            }
            let part = self.parts.pop_front()?;
            match VideoFrames::open(&self.dir.join(&part.file_name), part.dimensions) {
                Ok(frames) => self.current = Some(frames),
                Err(e) => {
                    tracing::error!("Failed to decode {}: {}", part.file_name, e);
                    self.current = None;
                    self.parts.clear();
                    return None;
                }
            }
        }
    }
}
