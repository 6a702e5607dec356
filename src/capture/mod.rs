//! Platform-specific capture implementations
//!
//! This module provides window and input capture for each platform.

pub mod input;
pub mod window;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "windows")]
pub mod windows;

// Re-export input channel
pub use input::InputTrackingChannel;

pub use window::{CaptureBackend, CaptureError, CaptureSession, WindowHandle, WindowStream};
