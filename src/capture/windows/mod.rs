//! Windows capture implementations
//!
//! Windows.Graphics.Capture window capture and `GetAsyncKeyState` input
//! polling.

pub mod input;
pub mod window;

pub mod dpi {
    use std::sync::Once;
    use windows::Win32::UI::HiDpi::{
        SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
    };

    static AWARE: Once = Once::new();

    /// Report cursor positions and window bounds in physical pixels, the
    /// space captured frames are in
    pub fn ensure_per_monitor_aware() {
        AWARE.call_once(|| {
            if let Err(e) =
                unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) }
            {
                tracing::debug!("Process DPI awareness left unchanged: {}", e);
            }
        });
    }
}
