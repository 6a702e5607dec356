//! Pointer position lookup and spring smoothing
//!
//! Smoothing is stateless: for every requested time the spring is simulated
//! from rest over a fixed trailing window of raw positions, so any frame can
//! be rendered on its own and in any order.

use crate::capture::input::types::Timestamp;
use crate::eventlog::EventLog;
use crate::processing::spring::Spring2D;
use crate::processing::theme::SpringConfig;
use std::time::Duration;

/// History simulated before each smoothed sample
pub const SMOOTHING_WINDOW: Duration = Duration::from_secs(1);

/// Simulation step, matching the 120Hz input poll rate
const STEP: Duration = Duration::from_micros(8_333);

/// If the pointer jumps further than this between steps, the spring is reset
pub const DEFAULT_TELEPORT_THRESHOLD: f64 = 500.0;

/// Last recorded pointer position at or before `t`
pub fn raw_pointer_at(log: &EventLog, t: Timestamp) -> Option<(i32, i32)> {
    log.events()[..log.index_after(t)]
        .iter()
        .rev()
        .find_map(|e| e.payload.position())
}

/// Spring-smoothed pointer position at `t`
pub fn smoothed_pointer_at(log: &EventLog, t: Timestamp, config: &SpringConfig) -> Option<(f64, f64)> {
    smoothed_pointer_with_teleport(log, t, config, DEFAULT_TELEPORT_THRESHOLD)
}

pub fn smoothed_pointer_with_teleport(
    log: &EventLog,
    t: Timestamp,
    config: &SpringConfig,
    teleport_threshold: f64,
) -> Option<(f64, f64)> {
    let start = t.saturating_sub(SMOOTHING_WINDOW);
    let samples: Vec<(Timestamp, (f64, f64))> = log
        .window(Some(start), t)
        .iter()
        .filter_map(|e| {
            e.payload
                .position()
                .map(|(x, y)| (e.timestamp, (x as f64, y as f64)))
        })
        .collect();

    let initial = match raw_pointer_at(log, start) {
        Some((x, y)) => (x as f64, y as f64),
        None => samples.first()?.1,
    };

    let mut spring = Spring2D::at_rest(initial.0, initial.1);
    let mut target = initial;
    let mut next_sample = 0;
    let mut now = start;

    while now < t {
        let step_end = now.saturating_add(STEP).min(t);
        while let Some(&(ts, pos)) = samples.get(next_sample) {
            if ts > step_end {
                break;
            }
            if distance(target, pos) > teleport_threshold {
                spring.reset(pos.0, pos.1);
            }
            target = pos;
            next_sample += 1;
        }

        let dt = step_end.duration_since(now).as_secs_f64();
        spring.step(target, config, dt);
        now = step_end;
    }

    Some(spring.position())
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}
