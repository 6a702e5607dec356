//! Input tracking (keyboard, mouse) capture
//!
//! Raw platform notifications flow from an [`InputSource`] through the
//! [`InputEventRecorder`] into an [`EventLog`](crate::eventlog::EventLog);
//! [`InputTrackingChannel`] wraps this as a `RecordingChannel` and writes the
//! log file when the session stops.

pub mod channel;
pub mod poll;
pub mod recorder;
pub mod source;
pub mod types;

pub use channel::InputTrackingChannel;
pub use recorder::{InputEventRecorder, RecorderHook, RecorderOutput};
pub use source::{platform_source, HookInstallError, InputSource, UnsupportedSource};
pub use types::{
    Action, Device, InputEvent, MouseButton, Payload, RawDeviceEvent, RawEventKind, SessionClock,
    Timestamp,
};
