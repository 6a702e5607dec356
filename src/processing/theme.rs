//! Overlay theme configuration
//!
//! The theme is process-wide state: the settings UI replaces it at any time
//! and the compositor takes a fresh snapshot on every frame it draws, so a
//! change is visible on the next rendered frame.

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThemeError {
    #[error("Failed to read theme file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid theme: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Straight (non-premultiplied) RGBA colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);
    pub const WHITE: Rgba = Rgba::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    /// Scale alpha by `factor` in `[0, 1]`
    pub fn faded(self, factor: f32) -> Self {
        let a = (self.a as f32 * factor.clamp(0.0, 1.0)).round() as u8;
        self.with_alpha(a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid hex colour")]
pub struct ParseColorError;

impl FromStr for Rgba {
    type Err = ParseColorError;

    /// Accepts `#RGB`, `#RRGGBB` and `#RRGGBBAA` (leading `#` optional)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseColorError);
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ParseColorError);
        match hex.len() {
            3 => {
                let nib = |i: usize| {
                    u8::from_str_radix(&hex[i..i + 1], 16)
                        .map(|v| v * 17)
                        .map_err(|_| ParseColorError)
                };
                Ok(Rgba::rgb(nib(0)?, nib(1)?, nib(2)?))
            }
            6 => Ok(Rgba::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Ok(Rgba {
                r: byte(0)?,
                g: byte(2)?,
                b: byte(4)?,
                a: byte(6)?,
            }),
            _ => Err(ParseColorError),
        }
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02X}", self.a)?;
        }
        Ok(())
    }
}

/// Serde adapter for optional colours; the empty string means "no colour"
mod optional_hex {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<Rgba>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(c) => s.serialize_str(&c.to_string()),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Rgba>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        if raw.trim().is_empty() {
            return Ok(None);
        }
        raw.parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid hex colour {raw:?}")))
    }
}

/// Spring parameters for pointer smoothing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpringConfig {
    pub stiffness: f64,
    pub damping: f64,
    pub mass: f64,
}

impl Default for SpringConfig {
    fn default() -> Self {
        Self {
            stiffness: 470.0,
            damping: 70.0,
            mass: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HorizontalPosition {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerticalPosition {
    Top,
    Center,
    #[default]
    Bottom,
}

/// Outline shape used for the pointer, held-button rings and ripples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerShape {
    #[default]
    Circle,
    Square,
    Star,
    /// Star rotated by 36 degrees; ripples keep spinning while they expand
    RoteStar,
    /// Arrow cursor (pointer only)
    Cursor,
    /// Draw nothing
    None,
}

/// Key and click label styling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputOverlayStyle {
    pub enabled: bool,
    pub position: HorizontalPosition,
    pub v_position: VerticalPosition,
    /// TrueType/OpenType font; an installed system sans-serif when unset,
    /// and boxes without text if there is none
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    #[serde(with = "optional_hex")]
    pub font_color: Option<Rgba>,
    #[serde(with = "optional_hex")]
    pub bg_color: Option<Rgba>,
    #[serde(with = "optional_hex")]
    pub outline_color: Option<Rgba>,
    pub offset_x: f32,
    pub offset_y: f32,
    pub text_offset_y: f32,
    pub padding_y: f32,
    pub max_stack: usize,
    /// Seconds a label stays visible after its last event
    pub fade_duration: f64,
}

impl Default for InputOverlayStyle {
    fn default() -> Self {
        Self {
            enabled: true,
            position: HorizontalPosition::Center,
            v_position: VerticalPosition::Bottom,
            font_path: None,
            font_size: 24.0,
            font_color: Some(Rgba::BLACK),
            bg_color: Some(Rgba::WHITE),
            outline_color: None,
            offset_x: 0.0,
            offset_y: 0.0,
            text_offset_y: -2.0,
            padding_y: 5.0,
            max_stack: 3,
            fade_duration: 1.0,
        }
    }
}

/// Seconds from a theme value; negative and NaN become zero, anything too
/// large for a `Duration` saturates
pub fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

impl InputOverlayStyle {
    pub fn fade(&self) -> Duration {
        seconds(self.fade_duration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerStyle {
    pub shape: MarkerShape,
    #[serde(with = "optional_hex")]
    pub color: Option<Rgba>,
    #[serde(with = "optional_hex")]
    pub fill: Option<Rgba>,
    pub width: f32,
    pub radius: f32,
    /// Spring smoothing of the drawn pointer; raw positions when unset
    pub smoothing: Option<SpringConfig>,
}

impl Default for PointerStyle {
    fn default() -> Self {
        Self {
            shape: MarkerShape::Cursor,
            color: Some(Rgba::BLACK),
            fill: None,
            width: 2.0,
            radius: 6.0,
            smoothing: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickStyle {
    #[serde(with = "optional_hex")]
    pub color: Option<Rgba>,
    pub shape: MarkerShape,
    pub width: f32,
    /// Seconds the release ripple takes to fade out
    pub ripple_duration: f64,
    /// Pixels the ripple grows beyond the ring radius
    pub ripple_range: f32,
}

impl ClickStyle {
    pub fn ripple(&self) -> Duration {
        seconds(self.ripple_duration)
    }

    fn with_color(color: Rgba) -> Self {
        Self {
            color: Some(color),
            shape: MarkerShape::Circle,
            width: 3.0,
            ripple_duration: 0.5,
            ripple_range: 20.0,
        }
    }
}

impl Default for ClickStyle {
    fn default() -> Self {
        Self::with_color(Rgba::rgb(0xFF, 0xFF, 0x00))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MouseOverlayStyle {
    pub enabled: bool,
    pub pointer: PointerStyle,
    pub click_left: ClickStyle,
    pub click_right: ClickStyle,
    pub click_middle: ClickStyle,
}

impl Default for MouseOverlayStyle {
    fn default() -> Self {
        Self {
            enabled: true,
            pointer: PointerStyle::default(),
            click_left: ClickStyle::with_color(Rgba::rgb(0xFF, 0x00, 0x00)),
            click_right: ClickStyle::with_color(Rgba::rgb(0x00, 0x00, 0xFF)),
            click_middle: ClickStyle::with_color(Rgba::rgb(0x00, 0xFF, 0x00)),
        }
    }
}

impl MouseOverlayStyle {
    /// Click styling for a button; back/forward buttons have none
    pub fn click(&self, button: crate::capture::input::types::MouseButton) -> Option<&ClickStyle> {
        use crate::capture::input::types::MouseButton;
        match button {
            MouseButton::Left => Some(&self.click_left),
            MouseButton::Right => Some(&self.click_right),
            MouseButton::Middle => Some(&self.click_middle),
            MouseButton::Back | MouseButton::Forward => None,
        }
    }
}

/// Burst merging thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingPolicy {
    /// Max distance from a group's first event, in milliseconds
    pub threshold_ms: u64,
    /// Max distance between consecutive clicks of one group, in pixels
    pub collision_px: u32,
}

impl Default for StackingPolicy {
    fn default() -> Self {
        Self {
            threshold_ms: 100,
            collision_px: 24,
        }
    }
}

impl StackingPolicy {
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }
}

/// Every style key the overlay compositor reads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    pub input_overlay: InputOverlayStyle,
    pub mouse_overlay: MouseOverlayStyle,
    pub stacking: StackingPolicy,
}

impl ThemeConfig {
    /// Parse a theme document; missing keys take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ThemeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ThemeError> {
        let content = std::fs::read_to_string(path)?;
        let theme = Self::from_json_str(&content)?;
        tracing::info!("Loaded overlay theme from {:?}", path);
        Ok(theme)
    }

    pub fn to_json_string(&self) -> Result<String, ThemeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Process-wide theme handle
///
/// Readers get an `Arc` snapshot that is never torn by a concurrent update;
/// writers swap in a whole new configuration.
#[derive(Debug, Clone, Default)]
pub struct SharedTheme {
    inner: Arc<RwLock<Arc<ThemeConfig>>>,
}

impl SharedTheme {
    pub fn new(theme: ThemeConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(theme))),
        }
    }

    pub fn snapshot(&self) -> Arc<ThemeConfig> {
        self.inner.read().clone()
    }

    pub fn replace(&self, theme: ThemeConfig) {
        *self.inner.write() = Arc::new(theme);
        tracing::debug!("Overlay theme replaced");
    }

    /// Apply an in-place edit to a copy of the current theme and publish it
    pub fn update(&self, edit: impl FnOnce(&mut ThemeConfig)) {
        let mut guard = self.inner.write();
        let mut next = ThemeConfig::clone(&guard);
        edit(&mut next);
        *guard = Arc::new(next);
    }
}

static GLOBAL_THEME: OnceLock<SharedTheme> = OnceLock::new();

/// The theme shared by the whole process, created with defaults on first use
pub fn global() -> &'static SharedTheme {
    GLOBAL_THEME.get_or_init(SharedTheme::default)
}
