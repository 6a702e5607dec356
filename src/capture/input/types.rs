use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Time since the session clock origin, in microseconds
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1000)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn saturating_sub(self, d: Duration) -> Self {
        Self(self.0.saturating_sub(micros_saturating(d)))
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(micros_saturating(d)))
    }

    /// Distance to an earlier timestamp, zero if `earlier` is actually later
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

fn micros_saturating(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        Self(micros_saturating(d))
    }
}

/// Formats as decimal milliseconds, trimming trailing fractional zeros.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0 / 1000;
        let frac = self.0 % 1000;
        if frac == 0 {
            return write!(f, "{millis}");
        }
        let digits = format!("{frac:03}");
        write!(f, "{millis}.{}", digits.trim_end_matches('0'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseTimestampError;

impl fmt::Display for ParseTimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected decimal milliseconds with at most three fractional digits")
    }
}

impl std::error::Error for ParseTimestampError {}

impl FromStr for Timestamp {
    type Err = ParseTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || !all_digits(frac) || frac.len() > 3 {
            return Err(ParseTimestampError);
        }
        if s.contains('.') && frac.is_empty() {
            return Err(ParseTimestampError);
        }
        let millis: u64 = whole.parse().map_err(|_| ParseTimestampError)?;
        let mut micros_part = 0u64;
        for (i, b) in frac.bytes().enumerate() {
            micros_part += u64::from(b - b'0') * 10u64.pow(2 - i as u32);
        }
        millis
            .checked_mul(1000)
            .and_then(|m| m.checked_add(micros_part))
            .map(Timestamp)
            .ok_or(ParseTimestampError)
    }
}

/// Shared time origin for every producer of a recording session
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn from_origin(origin: Instant) -> Self {
        Self { origin }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Stamp an instant; instants before the origin clamp to zero
    pub fn stamp(&self, at: Instant) -> Timestamp {
        at.saturating_duration_since(self.origin).into()
    }

    pub fn now(&self) -> Timestamp {
        self.stamp(Instant::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    Keyboard,
    MouseButton,
    MouseMove,
    MouseWheel,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Keyboard => "Keyboard",
            Device::MouseButton => "MouseButton",
            Device::MouseMove => "MouseMove",
            Device::MouseWheel => "MouseWheel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Keyboard" => Some(Device::Keyboard),
            "MouseButton" => Some(Device::MouseButton),
            "MouseMove" => Some(Device::MouseMove),
            "MouseWheel" => Some(Device::MouseWheel),
            _ => None,
        }
    }

    /// Whether `action` is legal for this device
    pub fn accepts(self, action: Action) -> bool {
        matches!(
            (self, action),
            (Device::Keyboard, Action::Down | Action::Up)
                | (Device::MouseButton, Action::Down | Action::Up)
                | (Device::MouseMove, Action::Move)
                | (Device::MouseWheel, Action::Scroll)
        )
    }

    /// Number of payload fields that follow the action in a log record
    pub fn payload_fields(self) -> usize {
        match self {
            Device::Keyboard => 1,
            Device::MouseButton => 3,
            Device::MouseMove | Device::MouseWheel => 2,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Down,
    Up,
    Move,
    Scroll,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Down => "Down",
            Action::Up => "Up",
            Action::Move => "Move",
            Action::Scroll => "Scroll",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Down" => Some(Action::Down),
            "Up" => Some(Action::Up),
            "Move" => Some(Action::Move),
            "Scroll" => Some(Action::Scroll),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
}

impl MouseButton {
    pub fn as_str(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
            MouseButton::Back => "back",
            MouseButton::Forward => "forward",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "left" => Some(MouseButton::Left),
            "right" => Some(MouseButton::Right),
            "middle" => Some(MouseButton::Middle),
            "back" => Some(MouseButton::Back),
            "forward" => Some(MouseButton::Forward),
            _ => None,
        }
    }

    /// Overlay label for a click of this button
    pub fn label(self) -> &'static str {
        match self {
            MouseButton::Left => "Left Click",
            MouseButton::Right => "Right Click",
            MouseButton::Middle => "Middle Click",
            MouseButton::Back => "Back Click",
            MouseButton::Forward => "Forward Click",
        }
    }
}

/// Device-specific data carried by an [`InputEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    Key { name: String },
    Button { button: MouseButton, x: i32, y: i32 },
    Position { x: i32, y: i32 },
    Delta { dx: i32, dy: i32 },
}

impl Payload {
    /// The device whose records carry this payload shape
    pub fn device(&self) -> Device {
        match self {
            Payload::Key { .. } => Device::Keyboard,
            Payload::Button { .. } => Device::MouseButton,
            Payload::Position { .. } => Device::MouseMove,
            Payload::Delta { .. } => Device::MouseWheel,
        }
    }

    /// Screen position, for payloads that have one
    pub fn position(&self) -> Option<(i32, i32)> {
        match *self {
            Payload::Button { x, y, .. } | Payload::Position { x, y } => Some((x, y)),
            _ => None,
        }
    }
}

/// One timestamped keyboard or mouse event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEvent {
    pub timestamp: Timestamp,
    pub device: Device,
    pub action: Action,
    pub payload: Payload,
}

impl InputEvent {
    pub fn key(timestamp: Timestamp, pressed: bool, name: impl Into<String>) -> Self {
        Self {
            timestamp,
            device: Device::Keyboard,
            action: if pressed { Action::Down } else { Action::Up },
            payload: Payload::Key { name: name.into() },
        }
    }

    pub fn button(timestamp: Timestamp, pressed: bool, button: MouseButton, x: i32, y: i32) -> Self {
        Self {
            timestamp,
            device: Device::MouseButton,
            action: if pressed { Action::Down } else { Action::Up },
            payload: Payload::Button { button, x, y },
        }
    }

    pub fn moved(timestamp: Timestamp, x: i32, y: i32) -> Self {
        Self {
            timestamp,
            device: Device::MouseMove,
            action: Action::Move,
            payload: Payload::Position { x, y },
        }
    }

    pub fn scroll(timestamp: Timestamp, dx: i32, dy: i32) -> Self {
        Self {
            timestamp,
            device: Device::MouseWheel,
            action: Action::Scroll,
            payload: Payload::Delta { dx, dy },
        }
    }

    /// Device, action and payload agree with each other, and key events
    /// name a key
    pub fn is_well_formed(&self) -> bool {
        let named = match &self.payload {
            Payload::Key { name } => !name.is_empty(),
            _ => true,
        };
        named && self.device.accepts(self.action) && self.payload.device() == self.device
    }
}

/// A platform notification before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawDeviceEvent {
    pub at: Instant,
    pub kind: RawEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawEventKind {
    KeyDown(String),
    KeyUp(String),
    ButtonDown { button: MouseButton, x: f64, y: f64 },
    ButtonUp { button: MouseButton, x: f64, y: f64 },
    Moved { x: f64, y: f64 },
    Wheel { dx: f64, dy: f64 },
}

impl RawDeviceEvent {
    pub fn now(kind: RawEventKind) -> Self {
        Self {
            at: Instant::now(),
            kind,
        }
    }
}

/// Map platform key symbols onto the names used in event logs.
///
/// Returns `None` for an empty symbol.
pub fn normalize_key_name(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mapped = match raw {
        "Return" => "Enter",
        "BackSpace" | "Backspace" => "BS",
        "Escape" => "Esc",
        "space" | " " => "Space",
        "Delete" => "Del",
        "Prior" => "PageUp",
        "Next" => "PageDown",
        "Control_L" | "Control_R" | "Control" => "Ctrl",
        "Shift_L" | "Shift_R" => "Shift",
        "Alt_L" | "Alt_R" | "Option" => "Alt",
        "Win_L" | "Win_R" | "Meta_L" | "Meta_R" | "Super_L" | "Super_R" | "Command" => "Win",
        other => {
            let mut chars = other.chars();
            return match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_alphabetic() => Some(c.to_uppercase().collect()),
                _ => Some(other.to_string()),
            };
        }
    };
    Some(mapped.to_string())
}

pub fn is_modifier_key(name: &str) -> bool {
    matches!(name, "Ctrl" | "Shift" | "Alt" | "Win")
}
