//! Per-frame timing sidecar
//!
//! The encoded video runs at a constant frame rate, but the capture stream
//! only delivers a frame when the window changes. The sidecar written next to
//! every recording keeps what the video loses, one line per encoded frame:
//!
//! `timestamp<TAB>x<TAB>y<TAB>width<TAB>height`
//!
//! `timestamp` is session time in the event log's millisecond format, `x`
//! and `y` are the window's top-left corner in screen coordinates and
//! `width`/`height` are the captured frame's pixel size. Line *i* describes
//! frame *i* of the recording, counted across every resize part in order.

use crate::capture::input::types::Timestamp;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FRAME_INDEX_HEADER: &str = "timestamp\tx\ty\twidth\theight";

/// File name of the sidecar for the video `<basename>.mp4`
pub fn frame_index_name(basename: &str) -> String {
    format!("{basename}.frames.tsv")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    pub timestamp: Timestamp,
    /// Screen position of the frame's top-left pixel
    pub origin: (i32, i32),
    pub width: u32,
    pub height: u32,
}

#[derive(Error, Debug)]
pub enum FrameIndexError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
}

fn parse_record(line: &str) -> Result<FrameRecord, &'static str> {
    let fields: Vec<&str> = line.split('\t').collect();
    let [timestamp, x, y, width, height] = fields.as_slice() else {
        return Err("expected five fields");
    };
    Ok(FrameRecord {
        timestamp: timestamp.parse().map_err(|_| "invalid timestamp")?,
        origin: (
            x.parse().map_err(|_| "invalid x")?,
            y.parse().map_err(|_| "invalid y")?,
        ),
        width: width.parse().map_err(|_| "invalid width")?,
        height: height.parse().map_err(|_| "invalid height")?,
    })
}

pub fn read_frame_index(path: &Path) -> Result<Vec<FrameRecord>, FrameIndexError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() || (idx == 0 && line == FRAME_INDEX_HEADER) {
            continue;
        }
        let record = parse_record(line).map_err(|reason| FrameIndexError::Malformed {
            line: idx + 1,
            reason,
        })?;
        records.push(record);
    }

    tracing::debug!("Loaded {} frame records from {:?}", records.len(), path);
    Ok(records)
}

/// Appends frame records while a recording runs
pub struct FrameIndexWriter {
    path: PathBuf,
    out: BufWriter<File>,
    records: u64,
}

impl FrameIndexWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{FRAME_INDEX_HEADER}")?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
            records: 0,
        })
    }

    pub fn append(&mut self, record: &FrameRecord) -> io::Result<()> {
        let (x, y) = record.origin;
        writeln!(
            self.out,
            "{}\t{x}\t{y}\t{}\t{}",
            record.timestamp, record.width, record.height
        )?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush and return the file path
    pub fn finish(mut self) -> io::Result<String> {
        self.out.flush()?;
        Ok(self.path.to_string_lossy().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_index_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(frame_index_name("recording-0"));
        let records = vec![
            FrameRecord {
                timestamp: Timestamp::from_millis(0),
                origin: (800, 600),
                width: 320,
                height: 240,
            },
            FrameRecord {
                timestamp: Timestamp::from_micros(3_000_500),
                origin: (-40, 25),
                width: 321,
                height: 240,
            },
        ];

        let mut writer = FrameIndexWriter::create(&path).unwrap();
        for record in &records {
            writer.append(record).unwrap();
        }
        assert_eq!(writer.records(), 2);
        assert_eq!(writer.finish().unwrap(), path.to_string_lossy());

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().nth(2), Some("3000.5\t-40\t25\t321\t240"));
        assert_eq!(read_frame_index(&path).unwrap(), records);
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.frames.tsv");
        std::fs::write(&path, format!("{FRAME_INDEX_HEADER}\n0\t0\t0\t4\t4\n33\t0\t0\t4\n")).unwrap();

        match read_frame_index(&path) {
            Err(FrameIndexError::Malformed { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected malformed line, got {:?}", other),
        }
        assert!(matches!(
            read_frame_index(&dir.path().join("missing.tsv")),
            Err(FrameIndexError::Io(_))
        ));
    }
}
