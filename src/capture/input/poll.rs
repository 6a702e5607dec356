//! Shared pieces of the polling input sources
//!
//! Platform pollers sample "is this key/button down" once per tick; the
//! [`PressTracker`] turns those samples into press and release events.

use super::types::RawEventKind;

/// Remembers the last sampled state of a fixed set of keys
pub struct PressTracker<K> {
    keys: Vec<(K, String)>,
    down: Vec<bool>,
}

impl<K: Copy> PressTracker<K> {
    /// `keys` pairs a platform key code with the name it is logged under
    pub fn new(keys: Vec<(K, String)>) -> Self {
        let down = vec![false; keys.len()];
        Self { keys, down }
    }

    /// Sample every key and return the transitions since the last sample
    pub fn sample(&mut self, mut is_down: impl FnMut(K) -> bool) -> Vec<RawEventKind> {
        let mut changes = Vec::new();
        for ((code, name), was_down) in self.keys.iter().zip(self.down.iter_mut()) {
            let down = is_down(*code);
            if down == *was_down {
                continue;
            }
            *was_down = down;
            changes.push(if down {
                RawEventKind::KeyDown(name.clone())
            } else {
                RawEventKind::KeyUp(name.clone())
            });
        }
        changes
    }

    /// Keys currently held, in table order
    pub fn held(&self) -> impl Iterator<Item = &str> {
        self.keys
            .iter()
            .zip(&self.down)
            .filter(|(_, down)| **down)
            .map(|((_, name), _)| name.as_str())
    }
}

/// Convert a y coordinate measured upward from the bottom of the primary
/// screen (Cocoa) into one measured downward from its top
pub fn flip_y(bottom_up_y: f64, primary_screen_height: f64) -> f64 {
    primary_screen_height - bottom_up_y
}
