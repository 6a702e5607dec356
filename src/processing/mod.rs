//! Processing module for post-recording transformations
//!
//! This module contains the overlay compositor and the algorithms it is built
//! from: frame windows, burst stacking, pointer smoothing and the theme.

pub mod canvas;
pub mod compositor;
pub mod cursor_smoothing;
pub mod spring;
pub mod stacking;
pub mod theme;
pub mod timeline;

pub use compositor::{OverlayCompositor, OverlayPlan};
pub use spring::Spring2D;
pub use stacking::{groups_in_window, stack_events, GlyphClass, StackGroup};
pub use theme::{SharedTheme, ThemeConfig};
pub use timeline::{FrameRef, FrameWindows};
