//! Overlay Recorder - single-window recording with a re-stylable input overlay.
//!
//! Recording produces two independent artifacts per session: the window video
//! and an event log of keyboard and mouse input on the same clock. The overlay
//! is composited at export time, so it can be re-themed without re-recording.

pub mod capture;
pub mod eventlog;
pub mod processing;
pub mod recorder;

pub use capture::window::WindowHandle;
pub use eventlog::{EventLog, MalformedPolicy};
pub use processing::{OverlayCompositor, SharedTheme, ThemeConfig};
pub use recorder::{
    OverlayExporter, RecordingConfig, RecordingCoordinator, RecordingSummary, SessionStatus,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overlay_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
