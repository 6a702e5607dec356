//! Overlay export
//!
//! Replays a recorded event log over the recorded frames and writes the
//! annotated frames to a sink. The recording itself is never modified, so an
//! export can be repeated with a different theme.
//!
//! Frames read back from the encoded video carry no usable time: the video
//! runs at a constant rate while capture only delivers changed frames. Those
//! exports take each frame's session time and window position from the
//! frame index written alongside the recording.

use crate::eventlog::codec::{self, LoadFileError};
use crate::eventlog::{EventLog, FormatError, LoadReport, MalformedPolicy};
use crate::processing::compositor::OverlayCompositor;
use crate::processing::theme::SharedTheme;
use crate::processing::timeline::FrameRef;
use crate::recorder::channel::{CapturedFrame, RecordingError};
use crate::recorder::decoder::RecordedFrames;
use crate::recorder::encoder::FrameSink;
use crate::recorder::frame_index::{frame_index_name, read_frame_index, FrameIndexError};
use crate::recorder::state::RecordingSummary;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Frames between progress log lines
const PROGRESS_INTERVAL: u64 = 300;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Event log format error: {0}")]
    Format(#[from] FormatError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoder error: {0}")]
    Encoder(#[from] RecordingError),

    #[error("Frame index error: {0}")]
    FrameIndex(#[from] FrameIndexError),
}

impl From<LoadFileError> for ExportError {
    fn from(e: LoadFileError) -> Self {
        match e {
            LoadFileError::Io(e) => ExportError::Io(e),
            LoadFileError::Format(e) => ExportError::Format(e),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub frames_written: u64,
    /// Malformed log records dropped while loading
    pub skipped_records: usize,
    /// Log records that had to be re-sorted while loading
    pub reordered_records: usize,
    pub cancelled: bool,
    pub outputs: Vec<String>,
}

/// Composites input overlays onto recorded frames
pub struct OverlayExporter {
    compositor: OverlayCompositor,
    theme: SharedTheme,
    policy: MalformedPolicy,
    cancel: Arc<AtomicBool>,
}

impl OverlayExporter {
    pub fn new(theme: SharedTheme) -> Self {
        Self {
            compositor: OverlayCompositor::new(),
            theme,
            policy: MalformedPolicy::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Exporter for a recorded session, using the session's malformed-record policy
    pub fn for_session(summary: &RecordingSummary, theme: SharedTheme) -> Self {
        Self::new(theme).with_policy(summary.malformed_policy)
    }

    pub fn with_compositor(mut self, compositor: OverlayCompositor) -> Self {
        self.compositor = compositor;
        self
    }

    pub fn with_policy(mut self, policy: MalformedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Flag that stops the export after the frame in progress
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn load_log(&self, path: &Path) -> Result<LoadReport, ExportError> {
        let report = codec::read_file(path, self.policy)?;
        for skipped in &report.skipped {
            tracing::warn!("Skipped malformed record in {:?}: {}", path, skipped);
        }
        Ok(report)
    }

    /// Load the log at `log_path` and export `frames` with it
    pub fn export_file<I>(
        &mut self,
        log_path: &Path,
        frames: I,
        sink: &mut dyn FrameSink,
    ) -> Result<ExportReport, ExportError>
    where
        I: IntoIterator<Item = CapturedFrame>,
    {
        let loaded = self.load_log(log_path)?;
        let mut report = self.export(&loaded.log, frames, sink)?;
        report.skipped_records = loaded.skipped_count();
        report.reordered_records = loaded.reordered;
        Ok(report)
    }

    /// Export frames read back from a recording's video
    ///
    /// Frame *i* takes its timestamp and window position from line *i* of
    /// the frame index; frames beyond the end of the index are not exported.
    pub fn export_indexed<I>(
        &mut self,
        log_path: &Path,
        index_path: &Path,
        frames: I,
        sink: &mut dyn FrameSink,
    ) -> Result<ExportReport, ExportError>
    where
        I: IntoIterator<Item = CapturedFrame>,
    {
        let loaded = self.load_log(log_path)?;
        let records = read_frame_index(index_path)?;
        let expected = records.len() as u64;

        let mut records = records.into_iter();
        let placed = frames.into_iter().map_while(|mut frame| {
            let record = records.next()?;
            frame.timestamp = record.timestamp;
            Some((frame, Some(record.origin)))
        });

        let mut report = self.export_placed(&loaded.log, placed, sink)?;
        if !report.cancelled && report.frames_written < expected {
            tracing::warn!(
                "Video ended after {} of {} indexed frames",
                report.frames_written,
                expected
            );
        }
        report.skipped_records = loaded.skipped_count();
        report.reordered_records = loaded.reordered;
        Ok(report)
    }

    /// Decode `recording-<index>` from a session folder and export it
    pub fn export_session(
        &mut self,
        session_dir: &Path,
        session_index: usize,
        sink: &mut dyn FrameSink,
    ) -> Result<ExportReport, ExportError> {
        let basename = format!("recording-{session_index}");
        let index_path = session_dir.join(frame_index_name(&basename));
        let records = read_frame_index(&index_path)?;
        let frames = RecordedFrames::open(session_dir, &basename, &records)?;
        self.export_indexed(
            &session_dir.join(format!("{basename}.tsv")),
            &index_path,
            frames,
            sink,
        )
    }

    /// Render every frame in order and append it to `sink`
    ///
    /// Frames keep their own timestamps and the compositor's origin. The sink
    /// is finalized even when the export is cancelled, so the frames written
    /// so far form a playable file.
    pub fn export<I>(
        &mut self,
        log: &EventLog,
        frames: I,
        sink: &mut dyn FrameSink,
    ) -> Result<ExportReport, ExportError>
    where
        I: IntoIterator<Item = CapturedFrame>,
    {
        self.export_placed(log, frames.into_iter().map(|frame| (frame, None)), sink)
    }

    /// Frames paired with the screen origin of the window at that frame
    fn export_placed<I>(
        &mut self,
        log: &EventLog,
        frames: I,
        sink: &mut dyn FrameSink,
    ) -> Result<ExportReport, ExportError>
    where
        I: Iterator<Item = (CapturedFrame, Option<(i32, i32)>)>,
    {
        let mut report = ExportReport::default();
        let mut frames = frames;
        let mut current: Option<FrameRef> = None;

        tracing::info!("Export started ({} events)", log.len());

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::info!("Export cancelled after {} frames", report.frames_written);
                report.cancelled = true;
                break;
            }
            let Some((frame, origin)) = frames.next() else {
                break;
            };
            if let Some((x, y)) = origin {
                self.compositor.set_origin(x, y);
            }

            let at = match current {
                Some(prev) if frame.timestamp < prev.timestamp => {
                    tracing::warn!(
                        "Frame {} at {} is older than the previous frame at {}",
                        prev.index + 1,
                        frame.timestamp,
                        prev.timestamp
                    );
                    prev.next(frame.timestamp)
                }
                Some(prev) => prev.next(frame.timestamp),
                None => FrameRef::first(frame.timestamp),
            };
            current = Some(at);

            let rendered = self.compositor.render(&frame, at, log, &self.theme);
            sink.append_frame(&rendered)?;
            report.frames_written += 1;

            if report.frames_written % PROGRESS_INTERVAL == 0 {
                tracing::debug!("Exported {} frames", report.frames_written);
            }
        }

        report.outputs = sink.finalize()?;
        tracing::info!(
            "Export finished: {} frames, cancelled={}",
            report.frames_written,
            report.cancelled
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::input::types::{InputEvent, Timestamp};
    use crate::eventlog::FormatErrorKind;
    use crate::processing::theme::{MarkerShape, Rgba};
    use crate::recorder::encoder::testing::MemorySink;
    use crate::recorder::frame_index::{FrameIndexWriter, FrameRecord};
    use uuid::Uuid;

    fn frames(count: u64) -> Vec<CapturedFrame> {
        (0..count)
            .map(|i| {
                CapturedFrame::solid(320, 240, [0, 0, 0, 255], Timestamp::from_millis(i * 33))
            })
            .collect()
    }

    fn write_log(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("recording-0.tsv");
        std::fs::write(&path, format!("{}\n{}", codec::HEADER, body)).unwrap();
        path
    }

    #[test]
    fn test_export_draws_overlay() {
        let log = EventLog::from_events(vec![
            InputEvent::key(Timestamp::from_millis(10), true, "A"),
            InputEvent::key(Timestamp::from_millis(12), false, "A"),
        ]);
        let input = frames(3);
        let mut sink = MemorySink::default();
        let mut exporter = OverlayExporter::new(SharedTheme::default());

        let report = exporter.export(&log, input.clone(), &mut sink).unwrap();
        assert_eq!(report.frames_written, 3);
        assert!(!report.cancelled);
        assert_eq!(report.outputs, vec!["memory".to_string()]);

        let written = sink.frames.lock();
        // nothing has happened yet at t=0
        assert_eq!(written[0], input[0]);
        assert_ne!(written[1], input[1]);
        assert_eq!(written[1].timestamp, input[1].timestamp);
    }

    #[test]
    fn test_export_file_reports_skipped_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(
            dir.path(),
            "40\tKeyboard\tDown\tA\n120\tMouseMove\n20\tKeyboard\tDown\tB\n",
        );
        let mut sink = MemorySink::default();
        let mut exporter = OverlayExporter::new(SharedTheme::default());

        let report = exporter.export_file(&path, frames(2), &mut sink).unwrap();
        assert_eq!(report.frames_written, 2);
        assert_eq!(report.skipped_records, 1);
        assert_eq!(report.reordered_records, 1);
    }

    #[test]
    fn test_abort_policy_fails_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(dir.path(), "120\tMouseMove\n");
        let mut sink = MemorySink::default();
        let mut exporter =
            OverlayExporter::new(SharedTheme::default()).with_policy(MalformedPolicy::Abort);

        match exporter.export_file(&path, frames(2), &mut sink) {
            Err(ExportError::Format(e)) => {
                assert_eq!(e.line, 2);
                assert_eq!(e.kind, FormatErrorKind::TruncatedRecord);
            }
            other => panic!("expected format error, got {:?}", other),
        }
        assert!(sink.frames.lock().is_empty());
    }

    #[test]
    fn test_cancel_finishes_in_flight_frame() {
        let mut exporter = OverlayExporter::new(SharedTheme::default());
        let cancel = exporter.cancel_handle();
        let mut sink = MemorySink::default();

        let source = frames(5).into_iter().enumerate().map(move |(i, frame)| {
            if i == 1 {
                cancel.store(true, Ordering::SeqCst);
            }
            frame
        });

        let report = exporter.export(&EventLog::new(), source, &mut sink).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.frames_written, 2);
        assert!(*sink.finalized.lock());
    }

    #[test]
    fn test_missing_log_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = OverlayExporter::new(SharedTheme::default());
        let result = exporter.export_file(
            &dir.path().join("missing.tsv"),
            frames(1),
            &mut MemorySink::default(),
        );
        assert!(matches!(result, Err(ExportError::Io(_))));
    }

    fn write_index(dir: &Path, records: &[FrameRecord]) -> std::path::PathBuf {
        let path = dir.join("recording-0.frames.tsv");
        let mut writer = FrameIndexWriter::create(&path).unwrap();
        for record in records {
            writer.append(record).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn record(ms: u64, origin: (i32, i32)) -> FrameRecord {
        FrameRecord {
            timestamp: Timestamp::from_millis(ms),
            origin,
            width: 320,
            height: 240,
        }
    }

    #[test]
    fn test_indexed_export_uses_capture_times() {
        let dir = tempfile::tempdir().unwrap();
        // the window sat idle for three seconds between the two captures; a
        // key pressed just before the second capture belongs to it
        let log_path = write_log(dir.path(), "2990\tKeyboard\tDown\tX\n");
        let index_path = write_index(dir.path(), &[record(0, (0, 0)), record(3000, (0, 0))]);
        // decoded video frames sit 33ms apart regardless of capture time
        let decoded = frames(2);

        let mut sink = MemorySink::default();
        let mut exporter = OverlayExporter::new(SharedTheme::default());
        let report = exporter
            .export_indexed(&log_path, &index_path, decoded.clone(), &mut sink)
            .unwrap();
        assert_eq!(report.frames_written, 2);

        let written = sink.frames.lock();
        assert_eq!(written[1].timestamp, Timestamp::from_millis(3000));
        assert_eq!(written[0].data, decoded[0].data);
        assert_ne!(written[1].data, decoded[1].data);
    }

    #[test]
    fn test_indexed_export_maps_pointer_into_window() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = write_log(dir.path(), "5\tMouseMove\t810\t610\n");
        let index_path = write_index(dir.path(), &[record(16, (800, 600))]);
        let theme = SharedTheme::default();
        theme.update(|t| {
            t.input_overlay.enabled = false;
            t.mouse_overlay.pointer.shape = MarkerShape::Square;
            t.mouse_overlay.pointer.color = Some(Rgba::WHITE);
            t.mouse_overlay.pointer.fill = Some(Rgba::WHITE);
        });

        let mut sink = MemorySink::default();
        let mut exporter = OverlayExporter::new(theme);
        exporter
            .export_indexed(&log_path, &index_path, frames(1), &mut sink)
            .unwrap();

        let written = sink.frames.lock();
        let at_pointer = written[0].pixel(10, 10).unwrap();
        assert!(at_pointer[0] > 200 && at_pointer[1] > 200 && at_pointer[2] > 200);
        assert_eq!(written[0].pixel(100, 100), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_index_shorter_than_video_limits_export() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = write_log(dir.path(), "");
        let index_path = write_index(dir.path(), &[record(0, (0, 0))]);
        let mut sink = MemorySink::default();
        let mut exporter = OverlayExporter::new(SharedTheme::default());

        let report = exporter
            .export_indexed(&log_path, &index_path, frames(3), &mut sink)
            .unwrap();
        assert_eq!(report.frames_written, 1);
        assert!(matches!(
            exporter.export_indexed(&log_path, &dir.path().join("none.tsv"), frames(1), &mut sink),
            Err(ExportError::FrameIndex(_))
        ));
    }

    #[test]
    fn test_session_policy_reaches_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(dir.path(), "120\tMouseMove\n");
        let mut summary = crate::recorder::state::RecordingSummary::never_started(
            Uuid::new_v4(),
            chrono::Local::now(),
            dir.path().to_path_buf(),
            String::new(),
        );
        summary.malformed_policy = MalformedPolicy::Abort;

        let mut exporter = OverlayExporter::for_session(&summary, SharedTheme::default());
        let result = exporter.export_file(&path, frames(1), &mut MemorySink::default());
        assert!(matches!(result, Err(ExportError::Format(_))));

        summary.malformed_policy = MalformedPolicy::Skip;
        let mut exporter = OverlayExporter::for_session(&summary, SharedTheme::default());
        let report = exporter
            .export_file(&path, frames(1), &mut MemorySink::default())
            .unwrap();
        assert_eq!(report.skipped_records, 1);
    }
}
