//! macOS capture implementations
//!
//! ScreenCaptureKit window capture and NSEvent input polling.

pub mod input;
pub mod window;

pub mod permissions {
    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGPreflightScreenCaptureAccess() -> bool;
        fn CGRequestScreenCaptureAccess() -> bool;
    }

    pub fn has_screen_recording_permission() -> bool {
        unsafe { CGPreflightScreenCaptureAccess() }
    }

    pub fn request_screen_recording_permission() -> bool {
        unsafe { CGRequestScreenCaptureAccess() }
    }
}

/// Primary display geometry and keyboard state from CoreGraphics
pub mod display {
    use objc2_foundation::NSRect;

    const COMBINED_SESSION_STATE: i32 = 0;

    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGMainDisplayID() -> u32;
        fn CGDisplayBounds(display: u32) -> NSRect;
        fn CGEventSourceKeyState(state_id: i32, key: u16) -> bool;
    }

    /// Height in points of the display holding the menu bar
    pub fn primary_height() -> f64 {
        unsafe { CGDisplayBounds(CGMainDisplayID()) }.size.height
    }

    pub fn key_down(keycode: u16) -> bool {
        unsafe { CGEventSourceKeyState(COMBINED_SESSION_STATE, keycode) }
    }
}
