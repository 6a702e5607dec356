use crate::capture::input::poll::PressTracker;
use crate::capture::input::recorder::RecorderHook;
use crate::capture::input::source::{HookInstallError, InputSource};
use crate::capture::input::types::{MouseButton, RawDeviceEvent, RawEventKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use windows::Win32::Foundation::POINT;
use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;
use windows::Win32::UI::WindowsAndMessaging::GetCursorPos;

const POLL_INTERVAL: Duration = Duration::from_micros(8_333);

/// Input source that polls async key state (Windows)
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
            .name("windows-input-poll".to_string())
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

/// Virtual-key codes watched by the poller, with their log names
fn watched_keys() -> Vec<(i32, String)> {
    let mut keys: Vec<(i32, String)> = [
        (0x10, "Shift"),
        (0x11, "Ctrl"),
        (0x12, "Alt"),
        (0x5B, "Win"),
        (0x0D, "Enter"),
        (0x20, "Space"),
        (0x1B, "Esc"),
        (0x08, "BS"),
        (0x09, "Tab"),
        (0x2E, "Del"),
        (0x21, "PageUp"),
        (0x22, "PageDown"),
        (0x25, "Left"),
        (0x26, "Up"),
        (0x27, "Right"),
        (0x28, "Down"),
    ]
    .iter()
    .map(|(vk, name)| (*vk, name.to_string()))
    .collect();

    keys.extend((0x41..=0x5A).map(|vk| (vk, char::from(vk as u8).to_string())));
    keys.extend((0x30..=0x39).map(|vk| (vk, char::from(vk as u8).to_string())));
    keys.extend((0..12).map(|i| (0x70 + i, format!("F{}", i + 1))));
    keys
}

fn is_down(vk: i32) -> bool {
    // high bit set means the key is currently down
    unsafe { GetAsyncKeyState(vk) } < 0
}

fn cursor_pos() -> Option<(f64, f64)> {
    let mut pt = POINT::default();
    unsafe { GetCursorPos(&mut pt) }.ok()?;
    Some((pt.x as f64, pt.y as f64))
}

fn poll_loop(running: Arc<AtomicBool>, hook: RecorderHook) {
    super::dpi::ensure_per_monitor_aware();
    tracing::info!(
        "Windows input tracking started (poll_interval={:?})",
        POLL_INTERVAL
    );

    let mut keys = PressTracker::new(watched_keys());
    let buttons = [
        (0x01, MouseButton::Left),
        (0x02, MouseButton::Right),
        (0x04, MouseButton::Middle),
        (0x05, MouseButton::Back),
        (0x06, MouseButton::Forward),
    ];
    let mut button_state = [false; 5];
    let mut last_pos: Option<(f64, f64)> = None;

    while running.load(Ordering::Relaxed) {
        let loop_start = Instant::now();

        let pos = cursor_pos();
        if let Some((x, y)) = pos {
            if last_pos != pos {
                hook.on_raw_device_event(RawDeviceEvent::now(RawEventKind::Moved { x, y }));
                last_pos = pos;
            }
        }
        let (x, y) = last_pos.unwrap_or_default();

        for (i, (vk, button)) in buttons.iter().enumerate() {
            let down = is_down(*vk);
            if down != button_state[i] {
                let button = *button;
                let kind = if down {
                    RawEventKind::ButtonDown { button, x, y }
                } else {
                    RawEventKind::ButtonUp { button, x, y }
                };
                hook.on_raw_device_event(RawDeviceEvent::now(kind));
                button_state[i] = down;
            }
        }

        for kind in keys.sample(is_down) {
            hook.on_raw_device_event(RawDeviceEvent::now(kind));
        }

        let elapsed = loop_start.elapsed();
        if elapsed < POLL_INTERVAL {
            std::thread::sleep(POLL_INTERVAL - elapsed);
        }
    }

    tracing::info!("Windows input tracking thread stopped");
}
