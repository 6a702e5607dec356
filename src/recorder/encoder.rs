//! Frame sinks
//!
//! Captured and composited frames leave the crate through [`FrameSink`].
//! [`FfmpegSink`] pipes raw BGRA into an `ffmpeg` child process; when the
//! window is resized it finishes the current file and starts a new part at
//! the new size.

use crate::recorder::channel::{CapturedFrame, RecordingError, RecordingResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

pub const DEFAULT_FPS: u32 = 30;

/// Destination for a sequence of frames
pub trait FrameSink: Send {
    /// Whether `append_frame` would store this frame rather than drop it
    fn accepts(&self, _frame: &CapturedFrame) -> bool {
        true
    }

    fn append_frame(&mut self, frame: &CapturedFrame) -> RecordingResult<()>;

    /// Flush and close; returns the files written
    fn finalize(&mut self) -> RecordingResult<Vec<String>>;
}

/// Largest even dimensions that fit `(width, height)`; yuv420p needs both even
pub fn even_dimensions(width: u32, height: u32) -> (u32, u32) {
    (width & !1, height & !1)
}

/// `<basename>.mp4` for the first part, `<basename>-<n>.mp4` after each resize
pub fn part_file_name(basename: &str, index: usize) -> String {
    match index {
        0 => format!("{basename}.mp4"),
        n => format!("{basename}-{n}.mp4"),
    }
}

pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// One ffmpeg process writing one output file
struct EncoderPart {
    process: Child,
    path: PathBuf,
    dimensions: (u32, u32),
    frames: u64,
}

impl EncoderPart {
    fn spawn(path: PathBuf, (width, height): (u32, u32), fps: u32) -> std::io::Result<Self> {
        let video_size = format!("{width}x{height}");
        let framerate = fps.to_string();
        let process = Command::new("ffmpeg")
            .args([
                "-y",
                "-f", "rawvideo",
                "-pixel_format", "bgra",
                "-video_size", video_size.as_str(),
                "-framerate", framerate.as_str(),
                "-i", "-",
                "-c:v", "libx264",
                "-preset", "ultrafast",
                "-pix_fmt", "yuv420p",
                "-crf", "23",
                "-movflags", "+faststart",
            ])
            .arg(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        tracing::info!(
            "Started FFmpeg encoder: {}x{} @ {}fps -> {:?}",
            width,
            height,
            fps,
            path
        );

        Ok(Self {
            process,
            path,
            dimensions: (width, height),
            frames: 0,
        })
    }

    /// Write rows cropped to the part's dimensions
    fn write(&mut self, frame: &CapturedFrame) -> std::io::Result<()> {
        let stdin = self
            .process
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "encoder stdin closed"))?;
        let (width, height) = self.dimensions;
        let row_len = width as usize * 4;
        for row in frame.rows().take(height as usize) {
            stdin.write_all(&row[..row_len.min(row.len())])?;
        }
        self.frames += 1;
        Ok(())
    }

    fn finish(mut self) -> std::io::Result<String> {
        // Close stdin to signal EOF
        drop(self.process.stdin.take());
        let output = self.process.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!("FFmpeg exited with status {}: {}", output.status, stderr);
        }
        tracing::info!("FFmpeg finished: {} frames -> {:?}", self.frames, self.path);
        Ok(self.path.to_string_lossy().to_string())
    }
}

/// Encodes frames to `<basename>.mp4`, then `<basename>-1.mp4` and so on
/// after each resize
pub struct FfmpegSink {
    output_dir: PathBuf,
    basename: String,
    fps: u32,
    current: Option<EncoderPart>,
    parts_started: usize,
    outputs: Vec<String>,
}

impl FfmpegSink {
    pub fn new(output_dir: &Path, basename: impl Into<String>, fps: u32) -> RecordingResult<Self> {
        if !ffmpeg_available() {
            return Err(RecordingError::ConfigurationError(
                "FFmpeg not found. Please install FFmpeg and make sure it is on PATH".to_string(),
            ));
        }
        std::fs::create_dir_all(output_dir)?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            basename: basename.into(),
            fps: fps.max(1),
            current: None,
            parts_started: 0,
            outputs: Vec::new(),
        })
    }

    fn part_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(part_file_name(&self.basename, index))
    }

    fn finish_current(&mut self) -> RecordingResult<()> {
        if let Some(part) = self.current.take() {
            let path = part
                .finish()
                .map_err(|e| RecordingError::EncodingError(format!("Failed to finish encoding: {}", e)))?;
            self.outputs.push(path);
        }
        Ok(())
    }
}

impl FrameSink for FfmpegSink {
    fn accepts(&self, frame: &CapturedFrame) -> bool {
        let (width, height) = even_dimensions(frame.width, frame.height);
        width > 0 && height > 0
    }

    fn append_frame(&mut self, frame: &CapturedFrame) -> RecordingResult<()> {
        let dims = even_dimensions(frame.width, frame.height);
        if !self.accepts(frame) {
            tracing::warn!(
                "Skipping {}x{} frame: too small to encode",
                frame.width,
                frame.height
            );
            return Ok(());
        }

        if self.current.as_ref().map(|p| p.dimensions) != Some(dims) {
            self.finish_current()?;
            let path = self.part_path(self.parts_started);
            let part = EncoderPart::spawn(path, dims, self.fps)
                .map_err(|e| RecordingError::EncodingError(format!("Failed to start FFmpeg: {}", e)))?;
            self.parts_started += 1;
            self.current = Some(part);
        }

        if let Some(part) = self.current.as_mut() {
            part.write(frame)
                .map_err(|e| RecordingError::EncodingError(format!("Failed to write frame: {}", e)))?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> RecordingResult<Vec<String>> {
        self.finish_current()?;
        Ok(std::mem::take(&mut self.outputs))
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish_current() {
            tracing::warn!("{}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Collects frames in memory
    #[derive(Clone, Default)]
    pub struct MemorySink {
        pub frames: Arc<Mutex<Vec<CapturedFrame>>>,
        pub finalized: Arc<Mutex<bool>>,
    }

    impl FrameSink for MemorySink {
        fn append_frame(&mut self, frame: &CapturedFrame) -> RecordingResult<()> {
            self.frames.lock().push(frame.clone());
            Ok(())
        }

        fn finalize(&mut self) -> RecordingResult<Vec<String>> {
            *self.finalized.lock() = true;
            Ok(vec!["memory".to_string()])
        }
    }
}
