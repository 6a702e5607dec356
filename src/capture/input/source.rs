//! Platform input sources
//!
//! A source delivers raw keyboard/mouse notifications to a [`RecorderHook`].
//! Platform implementations live under `capture::macos` / `capture::windows`;
//! everything else gets [`UnsupportedSource`].

use super::recorder::RecorderHook;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookInstallError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Input hooks are not supported on this platform")]
    Unsupported,

    #[error("Platform error: {0}")]
    Platform(String),
}

/// Source of raw device events, installed for the span of one recording
pub trait InputSource: Send {
    /// Begin delivering events to `hook`. Must return quickly; any polling
    /// or event loop runs on the source's own thread.
    fn install(&mut self, hook: RecorderHook) -> Result<(), HookInstallError>;

    /// Stop delivering events. After this returns no further calls reach the hook.
    fn uninstall(&mut self);
}

/// Source for platforms without an input hook implementation
#[derive(Debug, Default)]
pub struct UnsupportedSource;

impl InputSource for UnsupportedSource {
    fn install(&mut self, _hook: RecorderHook) -> Result<(), HookInstallError> {
        Err(HookInstallError::Unsupported)
    }

    fn uninstall(&mut self) {}
}

/// The best input source available on this platform
pub fn platform_source() -> Box<dyn InputSource> {
    #[cfg(target_os = "macos")]
    {
        Box::new(crate::capture::macos::input::PollingInputSource::default())
    }

    #[cfg(target_os = "windows")]
    {
        Box::new(crate::capture::windows::input::PollingInputSource::default())
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        Box::new(UnsupportedSource)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::capture::input::types::RawDeviceEvent;
    use crossbeam_channel::Receiver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread::JoinHandle;

    /// Forwards events pushed through a channel, as a platform hook thread would
    pub struct ChannelSource {
        rx: Option<Receiver<RawDeviceEvent>>,
        thread: Option<JoinHandle<()>>,
    }

    impl ChannelSource {
        pub fn new(rx: Receiver<RawDeviceEvent>) -> Self {
            Self {
                rx: Some(rx),
                thread: None,
            }
        }
    }

    impl InputSource for ChannelSource {
        fn install(&mut self, hook: RecorderHook) -> Result<(), HookInstallError> {
            let rx = self
                .rx
                .take()
                .ok_or_else(|| HookInstallError::Platform("already installed".to_string()))?;
            self.thread = Some(std::thread::spawn(move || {
                for raw in rx {
                    hook.on_raw_device_event(raw);
                }
            }));
            Ok(())
        }

        fn uninstall(&mut self) {
            // the sender side is dropped by the test before stopping
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
        }
    }

    /// Installs without delivering anything and counts install/uninstall pairs
    #[derive(Clone, Default)]
    pub struct CountingSource {
        installs: Arc<AtomicUsize>,
        uninstalls: Arc<AtomicUsize>,
    }

    impl CountingSource {
        pub fn installs(&self) -> usize {
            self.installs.load(Ordering::SeqCst)
        }

        pub fn uninstalls(&self) -> usize {
            self.uninstalls.load(Ordering::SeqCst)
        }
    }

    impl InputSource for CountingSource {
        fn install(&mut self, _hook: RecorderHook) -> Result<(), HookInstallError> {
            if self.installs() > self.uninstalls() {
                return Err(HookInstallError::Platform("already installed".to_string()));
            }
            self.installs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn uninstall(&mut self) {
            self.uninstalls.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A source that refuses to install
    pub struct DeniedSource;

    impl InputSource for DeniedSource {
        fn install(&mut self, _hook: RecorderHook) -> Result<(), HookInstallError> {
            Err(HookInstallError::PermissionDenied(
                "accessibility access not granted".to_string(),
            ))
        }

        fn uninstall(&mut self) {}
    }
}
