//! Tab-separated event log format
//!
//! One record per line: `timestamp<TAB>device<TAB>action<TAB>payload...`.
//! The device decides how many payload fields follow:
//!
//! | device      | payload            |
//! |-------------|--------------------|
//! | Keyboard    | key                |
//! | MouseButton | button, x, y       |
//! | MouseMove   | x, y               |
//! | MouseWheel  | dx, dy             |
//!
//! Timestamps are decimal milliseconds with up to three fractional digits,
//! which is exactly the microsecond resolution of [`Timestamp`].

use super::EventLog;
use crate::capture::input::types::{Action, Device, InputEvent, MouseButton, Payload, Timestamp};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

pub const HEADER: &str = "timestamp\tdevice\taction\tpayload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatErrorKind {
    #[error("record has fewer fields than its device requires")]
    TruncatedRecord,
    #[error("timestamp is not a decimal millisecond value")]
    InvalidTimestamp,
    #[error("unknown device")]
    UnknownDevice,
    #[error("unknown action or action not valid for the device")]
    UnknownAction,
    #[error("payload field is not valid for the device")]
    InvalidPayload,
    #[error("record has more fields than its device allows")]
    ExtraFields,
    #[error("record is not valid UTF-8")]
    InvalidEncoding,
}

/// A malformed record, with its 1-based line number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct FormatError {
    pub line: usize,
    pub kind: FormatErrorKind,
}

/// What to do with a malformed record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MalformedPolicy {
    /// Fail the whole load on the first malformed record
    Abort,
    /// Drop the record, keep loading, and report it
    #[default]
    Skip,
}

/// Outcome of a load
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub log: EventLog,
    /// Records dropped under [`MalformedPolicy::Skip`]
    pub skipped: Vec<FormatError>,
    /// Records that were out of timestamp order and got moved
    pub reordered: usize,
}

impl LoadReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

pub fn serialize(log: &EventLog) -> Vec<u8> {
    let mut out = Vec::with_capacity(log.len() * 24 + HEADER.len() + 1);
    // Writing into a Vec cannot fail
    let _ = write_to(log, &mut out);
    out
}

/// Write the log; events that are not well-formed have no record form and
/// are left out
pub fn write_to<W: Write>(log: &EventLog, mut out: W) -> io::Result<()> {
    writeln!(out, "{HEADER}")?;
    let mut omitted = 0usize;
    for event in log {
        if !event.is_well_formed() {
            omitted += 1;
            continue;
        }
        write!(out, "{}\t{}\t{}", event.timestamp, event.device, event.action)?;
        match &event.payload {
            Payload::Key { name } => write!(out, "\t{}", escape(name))?,
            Payload::Button { button, x, y } => write!(out, "\t{}\t{x}\t{y}", button.as_str())?,
            Payload::Position { x, y } => write!(out, "\t{x}\t{y}")?,
            Payload::Delta { dx, dy } => write!(out, "\t{dx}\t{dy}")?,
        }
        writeln!(out)?;
    }
    if omitted > 0 {
        tracing::warn!("Left {} malformed events out of the event log", omitted);
    }
    Ok(())
}

pub fn write_file(log: &EventLog, path: &Path) -> io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = io::BufWriter::new(file);
    write_to(log, &mut writer)?;
    writer.flush()
}

/// Decode with [`MalformedPolicy::Abort`]
pub fn deserialize(bytes: &[u8]) -> Result<EventLog, FormatError> {
    decode_with(bytes, MalformedPolicy::Abort).map(|report| report.log)
}

pub fn decode_with(bytes: &[u8], policy: MalformedPolicy) -> Result<LoadReport, FormatError> {
    let mut events = Vec::new();
    let mut skipped = Vec::new();

    for (idx, raw_line) in bytes.split(|&b| b == b'\n').enumerate() {
        let line_no = idx + 1;
        let raw_line = raw_line.strip_suffix(b"\r").unwrap_or(raw_line);
        if raw_line.is_empty() {
            continue;
        }

        let parsed = std::str::from_utf8(raw_line)
            .map_err(|_| FormatErrorKind::InvalidEncoding)
            .and_then(|line| {
                if line_no == 1 && line == HEADER {
                    Ok(None)
                } else {
                    parse_record(line).map(Some)
                }
            });

        match parsed {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(kind) => {
                let err = FormatError {
                    line: line_no,
                    kind,
                };
                match policy {
                    MalformedPolicy::Abort => return Err(err),
                    MalformedPolicy::Skip => {
                        tracing::warn!("Skipping malformed event log record: {}", err);
                        skipped.push(err);
                    }
                }
            }
        }
    }

    let reordered = count_out_of_order(&events);
    if reordered > 0 {
        tracing::warn!("Event log had {} out-of-order records; re-sorted", reordered);
    }

    Ok(LoadReport {
        log: EventLog::from_events(events),
        skipped,
        reordered,
    })
}

pub fn read_file(path: &Path, policy: MalformedPolicy) -> Result<LoadReport, LoadFileError> {
    let bytes = std::fs::read(path)?;
    let report = decode_with(&bytes, policy)?;
    tracing::debug!(
        "Loaded {} events from {:?} ({} skipped)",
        report.log.len(),
        path,
        report.skipped_count()
    );
    Ok(report)
}

#[derive(Debug, Error)]
pub enum LoadFileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

/// Records that are smaller than the running maximum before them
fn count_out_of_order(events: &[InputEvent]) -> usize {
    let mut max = Timestamp::ZERO;
    let mut count = 0;
    for e in events {
        if e.timestamp < max {
            count += 1;
        } else {
            max = e.timestamp;
        }
    }
    count
}

fn parse_record(line: &str) -> Result<InputEvent, FormatErrorKind> {
    let fields: Vec<&str> = line.split('\t').collect();

    let timestamp: Timestamp = fields[0]
        .parse()
        .map_err(|_| FormatErrorKind::InvalidTimestamp)?;

    let device = match fields.get(1) {
        Some(d) => Device::parse(d).ok_or(FormatErrorKind::UnknownDevice)?,
        None => return Err(FormatErrorKind::TruncatedRecord),
    };

    let action = match fields.get(2) {
        Some(a) => Action::parse(a)
            .filter(|a| device.accepts(*a))
            .ok_or(FormatErrorKind::UnknownAction)?,
        None => return Err(FormatErrorKind::TruncatedRecord),
    };

    let payload = &fields[3..];
    let wanted = device.payload_fields();
    if payload.len() < wanted {
        return Err(FormatErrorKind::TruncatedRecord);
    }
    if payload.len() > wanted {
        return Err(FormatErrorKind::ExtraFields);
    }

    let payload = match device {
        Device::Keyboard => Payload::Key {
            name: unescape(payload[0]).ok_or(FormatErrorKind::InvalidPayload)?,
        },
        Device::MouseButton => Payload::Button {
            button: MouseButton::parse(payload[0]).ok_or(FormatErrorKind::InvalidPayload)?,
            x: int_field(payload[1])?,
            y: int_field(payload[2])?,
        },
        Device::MouseMove => Payload::Position {
            x: int_field(payload[0])?,
            y: int_field(payload[1])?,
        },
        Device::MouseWheel => Payload::Delta {
            dx: int_field(payload[0])?,
            dy: int_field(payload[1])?,
        },
    };

    Ok(InputEvent {
        timestamp,
        device,
        action,
        payload,
    })
}

fn int_field(s: &str) -> Result<i32, FormatErrorKind> {
    s.parse().map_err(|_| FormatErrorKind::InvalidPayload)
}

fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(field: &str) -> Option<String> {
    if field.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            't' => out.push('\t'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> EventLog {
        EventLog::from_events(vec![
            InputEvent::moved(Timestamp::ZERO, 10, -20),
            InputEvent::key(Timestamp::from_micros(1_001), true, "Ctrl"),
            InputEvent::key(Timestamp::from_micros(1_001), true, "Tab\there\\"),
            InputEvent::button(Timestamp::from_micros(250_250), true, MouseButton::Left, 640, 360),
            InputEvent::button(Timestamp::from_micros(300_000), false, MouseButton::Left, 641, 362),
            InputEvent::scroll(Timestamp::from_micros(999_999), 0, -120),
            InputEvent::key(Timestamp::from_millis(5_000), false, "Ctrl"),
        ])
    }

    #[test]
    fn test_round_trip() {
        let log = sample_log();
        let bytes = serialize(&log);
        let decoded = deserialize(&bytes).unwrap();
        assert_eq!(decoded, log);
        // and the encoding itself is stable
        assert_eq!(serialize(&decoded), bytes);
    }

    #[test]
    fn test_unnamed_key_is_left_out() {
        let log = EventLog::from_events(vec![
            InputEvent::key(Timestamp::from_millis(1), true, ""),
            InputEvent::key(Timestamp::from_millis(2), true, "A"),
        ]);
        let decoded = deserialize(&serialize(&log)).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.events()[0], InputEvent::key(Timestamp::from_millis(2), true, "A"));
        assert!(decoded.iter().all(|e| e.is_well_formed()));
    }

    #[test]
    fn test_record_layout() {
        let log = EventLog::from_events(vec![
            InputEvent::button(Timestamp::from_micros(120_500), true, MouseButton::Right, 3, 4),
            InputEvent::scroll(Timestamp::from_millis(121), 1, -2),
        ]);
        let text = String::from_utf8(serialize(&log)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "120.5\tMouseButton\tDown\tright\t3\t4");
        assert_eq!(lines[2], "121\tMouseWheel\tScroll\t1\t-2");
    }

    #[test]
    fn test_missing_payload_aborts() {
        let err = deserialize(b"120\tMouseMove").unwrap_err();
        assert_eq!(err.kind, FormatErrorKind::TruncatedRecord);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_missing_payload_skipped_and_counted() {
        let input = b"0\tKeyboard\tDown\tA\n120\tMouseMove\n130\tMouseMove\tMove\t1\t2\n";
        let report = decode_with(input, MalformedPolicy::Skip).unwrap();
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.skipped[0].line, 2);
        assert_eq!(report.log.len(), 2);
    }

    #[test]
    fn test_error_kinds() {
        let cases: &[(&[u8], FormatErrorKind)] = &[
            (b"abc\tKeyboard\tDown\tA", FormatErrorKind::InvalidTimestamp),
            (b"1.2345\tKeyboard\tDown\tA", FormatErrorKind::InvalidTimestamp),
            (b"10\tJoystick\tDown\tA", FormatErrorKind::UnknownDevice),
            (b"10\tKeyboard\tMove\tA", FormatErrorKind::UnknownAction),
            (b"10\tMouseButton\tDown\tthumb\t1\t2", FormatErrorKind::InvalidPayload),
            (b"10\tMouseMove\tMove\t1\tx", FormatErrorKind::InvalidPayload),
            (b"10\tMouseMove\tMove\t1\t2\t3", FormatErrorKind::ExtraFields),
            (b"10\tKeyboard\tDown", FormatErrorKind::TruncatedRecord),
            (b"10\tKeyboard\tDown\t", FormatErrorKind::InvalidPayload),
            (b"10\tKeyboard\tDown\t\xff", FormatErrorKind::InvalidEncoding),
        ];
        for (input, kind) in cases {
            let err = deserialize(input).unwrap_err();
            assert_eq!(err.kind, *kind, "input {:?}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn test_out_of_order_records_are_resorted() {
        let input = b"50\tKeyboard\tDown\tB\n10\tKeyboard\tDown\tA\n60\tKeyboard\tUp\tB\n";
        let report = decode_with(input, MalformedPolicy::Abort).unwrap();
        assert_eq!(report.reordered, 1);
        let times: Vec<_> = report.log.iter().map(|e| e.timestamp).collect();
        assert_eq!(
            times,
            vec![
                Timestamp::from_millis(10),
                Timestamp::from_millis(50),
                Timestamp::from_millis(60)
            ]
        );
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let input = b"timestamp\tdevice\taction\tpayload\r\n\r\n10\tKeyboard\tDown\tA\r\n\n";
        let log = deserialize(input).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording-0.tsv");
        let log = sample_log();
        write_file(&log, &path).unwrap();
        let report = read_file(&path, MalformedPolicy::Abort).unwrap();
        assert_eq!(report.log, log);
        assert!(report.skipped.is_empty());
    }
}
