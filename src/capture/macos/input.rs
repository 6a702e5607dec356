use crate::capture::input::poll::{flip_y, PressTracker};
use crate::capture::input::recorder::RecorderHook;
use crate::capture::input::source::{HookInstallError, InputSource};
use crate::capture::input::types::{MouseButton, RawDeviceEvent, RawEventKind};
use crate::capture::macos::display;
use objc2_app_kit::{NSEvent, NSEventModifierFlags};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Polling interval, roughly 120Hz
const POLL_INTERVAL: Duration = Duration::from_micros(8_333);

/// How often the primary display height is re-read for the y flip
const DISPLAY_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Input source that polls NSEvent and CGEventSource state (macOS)
///
/// Positions are reported with a top-left origin on the primary display so
/// they line up with window bounds from ScreenCaptureKit. Non-modifier keys
/// are read with `CGEventSourceKeyState`, which needs Input Monitoring
/// permission; without it only mouse and modifier events are recorded.
#[derive(Default)]
pub struct PollingInputSource {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InputSource for PollingInputSource {
    fn install(&mut self, hook: RecorderHook) -> Result<(), HookInstallError> {
        if self.thread.is_some() {
            return Err(HookInstallError::Platform(
                "input source already installed".to_string(),
            ));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        let handle = std::thread::Builder::new()
            .name("macos-input-poll".to_string())
            .spawn(move || poll_loop(running, hook))
            .map_err(|e| HookInstallError::Platform(e.to_string()))?;

        self.thread = Some(handle);
        Ok(())
    }

    fn uninstall(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Modifier flag masks, with the names the event log normalizes
fn modifier_keys() -> Vec<(usize, String)> {
    [
        (NSEventModifierFlags::NSEventModifierFlagShift.0, "Shift"),
        (NSEventModifierFlags::NSEventModifierFlagControl.0, "Control"),
        (NSEventModifierFlags::NSEventModifierFlagOption.0, "Option"),
        (NSEventModifierFlags::NSEventModifierFlagCommand.0, "Command"),
    ]
    .iter()
    .map(|(mask, name)| (*mask, name.to_string()))
    .collect()
}

/// ANSI virtual key codes (kVK_*) watched by the poller
fn watched_keys() -> Vec<(u16, String)> {
    [
        (0x00, "A"), (0x0B, "B"), (0x08, "C"), (0x02, "D"), (0x0E, "E"),
        (0x03, "F"), (0x05, "G"), (0x04, "H"), (0x22, "I"), (0x26, "J"),
        (0x28, "K"), (0x25, "L"), (0x2E, "M"), (0x2D, "N"), (0x1F, "O"),
        (0x23, "P"), (0x0C, "Q"), (0x0F, "R"), (0x01, "S"), (0x11, "T"),
        (0x20, "U"), (0x09, "V"), (0x0D, "W"), (0x07, "X"), (0x10, "Y"),
        (0x06, "Z"),
        (0x1D, "0"), (0x12, "1"), (0x13, "2"), (0x14, "3"), (0x15, "4"),
        (0x17, "5"), (0x16, "6"), (0x1A, "7"), (0x1C, "8"), (0x19, "9"),
        (0x24, "Return"), (0x31, "Space"), (0x35, "Escape"), (0x33, "BackSpace"),
        (0x30, "Tab"), (0x75, "Delete"), (0x74, "PageUp"), (0x79, "PageDown"),
        (0x7B, "Left"), (0x7E, "Up"), (0x7C, "Right"), (0x7D, "Down"),
        (0x7A, "F1"), (0x78, "F2"), (0x63, "F3"), (0x76, "F4"), (0x60, "F5"),
        (0x61, "F6"), (0x62, "F7"), (0x64, "F8"), (0x65, "F9"), (0x6D, "F10"),
        (0x67, "F11"), (0x6F, "F12"),
    ]
    .iter()
    .map(|(code, name)| (*code, name.to_string()))
    .collect()
}

fn poll_loop(running: Arc<AtomicBool>, hook: RecorderHook) {
    tracing::info!(
        "macOS input tracking started (poll_interval={:?})",
        POLL_INTERVAL
    );

    let mut modifiers = PressTracker::new(modifier_keys());
    let mut keys = PressTracker::new(watched_keys());
    let mut last_pos: Option<(f64, f64)> = None;
    let mut last_buttons: usize = 0;
    let mut screen_height = display::primary_height();
    let mut height_read_at = Instant::now();

    while running.load(Ordering::Relaxed) {
        let loop_start = Instant::now();

        if loop_start.duration_since(height_read_at) >= DISPLAY_REFRESH_INTERVAL {
            screen_height = display::primary_height();
            height_read_at = loop_start;
        }

        // NSEvent reports a bottom-left origin
        let pos = unsafe { NSEvent::mouseLocation() };
        let (x, y) = (pos.x, flip_y(pos.y, screen_height));

        if last_pos != Some((x, y)) {
            hook.on_raw_device_event(RawDeviceEvent::now(RawEventKind::Moved { x, y }));
            last_pos = Some((x, y));
        }

        // Bit 0 = left, bit 1 = right, bit 2 = middle
        let buttons = unsafe { NSEvent::pressedMouseButtons() };
        for (bit, button) in [
            (0usize, MouseButton::Left),
            (1, MouseButton::Right),
            (2, MouseButton::Middle),
        ] {
            let down = buttons & (1 << bit) != 0;
            let was_down = last_buttons & (1 << bit) != 0;
            if down != was_down {
                let kind = if down {
                    RawEventKind::ButtonDown { button, x, y }
                } else {
                    RawEventKind::ButtonUp { button, x, y }
                };
                hook.on_raw_device_event(RawDeviceEvent::now(kind));
            }
        }
        last_buttons = buttons;

        let flags = unsafe { NSEvent::modifierFlags_class() };
        for kind in modifiers.sample(|mask| flags.0 & mask != 0) {
            hook.on_raw_device_event(RawDeviceEvent::now(kind));
        }
        for kind in keys.sample(display::key_down) {
            hook.on_raw_device_event(RawDeviceEvent::now(kind));
        }

        let elapsed = loop_start.elapsed();
        if elapsed < POLL_INTERVAL {
            std::thread::sleep(POLL_INTERVAL - elapsed);
        }
    }

    tracing::info!("macOS input tracking thread stopped");
}
