//! Mapping of input events onto video frames
//!
//! Frame `i` owns the events in `(t[i-1], t[i]]`; the first frame owns
//! everything up to and including its own timestamp. Consecutive windows
//! therefore partition the log: no event is dropped or selected twice.

use crate::capture::input::types::{InputEvent, Timestamp};
use crate::eventlog::EventLog;

/// Position of one frame on the session timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRef {
    pub index: u64,
    pub timestamp: Timestamp,
    /// Timestamp of the preceding frame, `None` for the first frame
    pub previous: Option<Timestamp>,
}

impl FrameRef {
    pub fn first(timestamp: Timestamp) -> Self {
        Self {
            index: 0,
            timestamp,
            previous: None,
        }
    }

    /// The frame that follows this one at `timestamp`
    pub fn next(&self, timestamp: Timestamp) -> Self {
        Self {
            index: self.index + 1,
            timestamp,
            previous: Some(self.timestamp),
        }
    }

    /// Events owned by this frame
    pub fn select<'a>(&self, log: &'a EventLog) -> &'a [InputEvent] {
        log.window(self.previous, self.timestamp)
    }
}

/// Lazy iterator of per-frame event windows
///
/// Restartable: building a new `FrameWindows` over the same log and
/// timestamps yields the same windows.
pub struct FrameWindows<'a, I> {
    log: &'a EventLog,
    timestamps: I,
    current: Option<FrameRef>,
}

impl<'a, I> FrameWindows<'a, I>
where
    I: Iterator<Item = Timestamp>,
{
    pub fn new(log: &'a EventLog, timestamps: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            log,
            timestamps: timestamps.into_iter(),
            current: None,
        }
    }
}

impl<'a, I> Iterator for FrameWindows<'a, I>
where
    I: Iterator<Item = Timestamp>,
{
    type Item = (FrameRef, &'a [InputEvent]);

    fn next(&mut self) -> Option<Self::Item> {
        let ts = self.timestamps.next()?;
        let frame = match self.current {
            Some(prev) => prev.next(ts),
            None => FrameRef::first(ts),
        };
        self.current = Some(frame);
        Some((frame, frame.select(self.log)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Timestamp {
        Timestamp::from_millis(v)
    }

    fn log() -> EventLog {
        EventLog::from_events(vec![
            InputEvent::key(ms(0), true, "A"),
            InputEvent::moved(ms(10), 1, 1),
            InputEvent::moved(ms(33), 2, 2),
            InputEvent::key(ms(34), false, "A"),
            InputEvent::moved(ms(66), 3, 3),
            InputEvent::moved(ms(120), 4, 4),
        ])
    }

    #[test]
    fn test_windows_partition_the_log() {
        let log = log();
        let frames = [ms(0), ms(33), ms(66), ms(100), ms(133)];
        let windows: Vec<_> = FrameWindows::new(&log, frames).collect();

        let sizes: Vec<usize> = windows.iter().map(|(_, w)| w.len()).collect();
        assert_eq!(sizes, vec![1, 2, 2, 0, 1]);

        let flattened: Vec<&InputEvent> = windows.iter().flat_map(|(_, w)| w.iter()).collect();
        let all: Vec<&InputEvent> = log.iter().collect();
        assert_eq!(flattened, all);
    }

    #[test]
    fn test_first_frame_takes_everything_before_it() {
        let log = log();
        let (frame, window) = FrameWindows::new(&log, [ms(50)]).next().unwrap();
        assert_eq!(frame, FrameRef::first(ms(50)));
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn test_frame_refs_chain() {
        let log = EventLog::new();
        let refs: Vec<FrameRef> = FrameWindows::new(&log, [ms(0), ms(33), ms(66)])
            .map(|(f, w)| {
                assert!(w.is_empty());
                f
            })
            .collect();
        assert_eq!(refs[2].index, 2);
        assert_eq!(refs[2].previous, Some(ms(33)));
    }

    #[test]
    fn test_restart_yields_same_windows() {
        let log = log();
        let frames = vec![ms(20), ms(40), ms(200)];
        let a: Vec<_> = FrameWindows::new(&log, frames.clone()).collect();
        let b: Vec<_> = FrameWindows::new(&log, frames).collect();
        assert_eq!(a, b);
    }
}
