//! Burst stacking of overlay glyphs
//!
//! Key downs, button downs and wheel scrolls each produce a glyph. Glyphs
//! are merged greedily in time order: an event joins the most recent group
//! when it shows the same glyph, lies within the threshold of the group's
//! first event and, for clicks, lands within the collision distance of the
//! group's previous click. Anything else opens a new group, so groups are
//! always runs of adjacent glyph events.

use crate::capture::input::types::{
    is_modifier_key, Action, InputEvent, MouseButton, Payload, Timestamp,
};
use crate::eventlog::EventLog;
use crate::processing::theme::StackingPolicy;
use std::time::Duration;

/// How far back modifier and button state is reconstructed
pub const STATE_LOOKBACK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    fn from_delta(dx: i32, dy: i32) -> Option<Self> {
        if dy.abs() >= dx.abs() {
            match dy.signum() {
                1 => Some(ScrollDirection::Up),
                -1 => Some(ScrollDirection::Down),
                _ => None,
            }
        } else if dx > 0 {
            Some(ScrollDirection::Right)
        } else {
            Some(ScrollDirection::Left)
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScrollDirection::Up => "Scroll Up",
            ScrollDirection::Down => "Scroll Down",
            ScrollDirection::Left => "Scroll Left",
            ScrollDirection::Right => "Scroll Right",
        }
    }
}

/// What a glyph depicts, independent of held modifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GlyphClass {
    Key(String),
    Button(MouseButton),
    Scroll(ScrollDirection),
}

impl GlyphClass {
    pub fn label(&self) -> &str {
        match self {
            GlyphClass::Key(name) => name,
            GlyphClass::Button(button) => button.label(),
            GlyphClass::Scroll(direction) => direction.label(),
        }
    }
}

/// Held modifier keys, in display order Ctrl, Shift, Alt, Win
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers(u8);

impl Modifiers {
    const NAMES: [&'static str; 4] = ["Ctrl", "Shift", "Alt", "Win"];

    fn bit(name: &str) -> Option<u8> {
        Self::NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| 1 << i)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .enumerate()
            .filter(move |&(i, _)| self.0 & (1 << i) != 0)
            .map(|(_, n)| n)
    }

    /// Modifiers held just before `log.events()[index]`
    pub fn held_before(log: &EventLog, index: usize) -> Self {
        let events = log.events();
        let Some(at) = events.get(index).map(|e| e.timestamp) else {
            return Self::default();
        };
        let horizon = at.saturating_sub(STATE_LOOKBACK);

        let mut held = 0u8;
        let mut resolved = 0u8;
        for event in events[..index].iter().rev() {
            if event.timestamp < horizon || resolved == 0b1111 {
                break;
            }
            let Payload::Key { name } = &event.payload else {
                continue;
            };
            let Some(bit) = Self::bit(name) else {
                continue;
            };
            if resolved & bit == 0 {
                resolved |= bit;
                if event.action == Action::Down {
                    held |= bit;
                }
            }
        }
        Self(held)
    }
}

fn modifier_slot(event: &InputEvent) -> Option<(usize, bool)> {
    let Payload::Key { name } = &event.payload else {
        return None;
    };
    let slot = Modifiers::NAMES.iter().position(|n| n == name)?;
    Some((slot, event.action == Action::Down))
}

/// Modifier state for a run of increasing event indices
///
/// Answers like [`Modifiers::held_before`] but replays the log forward, so
/// a run of lookups is one pass instead of one lookback scan per event.
pub struct ModifierReplay<'a> {
    events: &'a [InputEvent],
    next: usize,
    /// Latest event per modifier before `next`: (time, pressed)
    last: [Option<(Timestamp, bool)>; 4],
}

impl<'a> ModifierReplay<'a> {
    pub fn new(log: &'a EventLog, start: usize) -> Self {
        Self::from_events(log.events(), start)
    }

    fn from_events(events: &'a [InputEvent], start: usize) -> Self {
        let start = start.min(events.len());
        let mut last = [None; 4];
        if let Some(at) = events.get(start).map(|e| e.timestamp) {
            // older events are past the lookback for every later index too
            let horizon = at.saturating_sub(STATE_LOOKBACK);
            for event in events[..start].iter().rev() {
                if event.timestamp < horizon || last.iter().all(Option::is_some) {
                    break;
                }
                if let Some((slot, down)) = modifier_slot(event) {
                    last[slot].get_or_insert((event.timestamp, down));
                }
            }
        }
        Self {
            events,
            next: start,
            last,
        }
    }

    /// Modifiers held just before `events[index]`
    pub fn held_before(&mut self, index: usize) -> Modifiers {
        let Some(at) = self.events.get(index).map(|e| e.timestamp) else {
            return Modifiers::default();
        };
        if index < self.next {
            *self = Self::from_events(self.events, index);
        }
        while self.next < index {
            let event = &self.events[self.next];
            if let Some((slot, down)) = modifier_slot(event) {
                self.last[slot] = Some((event.timestamp, down));
            }
            self.next += 1;
        }

        let horizon = at.saturating_sub(STATE_LOOKBACK);
        let held = self
            .last
            .iter()
            .enumerate()
            .filter(|(_, last)| matches!(last, Some((t, true)) if *t >= horizon))
            .fold(0u8, |held, (slot, _)| held | 1 << slot);
        Modifiers(held)
    }
}

/// A glyph-producing event with the context needed to stack it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    pub class: GlyphClass,
    pub modifiers: Modifiers,
    pub timestamp: Timestamp,
    pub position: Option<(i32, i32)>,
}

impl Glyph {
    /// Glyph for `log.events()[index]`, if that event produces one
    pub fn at(log: &EventLog, index: usize) -> Option<Self> {
        Self::build(log, index, |i| Modifiers::held_before(log, i))
    }

    fn build(
        log: &EventLog,
        index: usize,
        held_before: impl FnOnce(usize) -> Modifiers,
    ) -> Option<Self> {
        let event = log.events().get(index)?;
        let class = glyph_class(event)?;
        let modifiers = match class {
            GlyphClass::Scroll(_) => Modifiers::default(),
            _ => held_before(index),
        };
        Some(Self {
            class,
            modifiers,
            timestamp: event.timestamp,
            position: event.payload.position(),
        })
    }
}

/// Which glyph an event shows; `None` for events that draw no label
pub fn glyph_class(event: &InputEvent) -> Option<GlyphClass> {
    match (&event.payload, event.action) {
        (Payload::Key { name }, Action::Down) if !is_modifier_key(name) => {
            Some(GlyphClass::Key(name.clone()))
        }
        (Payload::Button { button, .. }, Action::Down) => Some(GlyphClass::Button(*button)),
        (Payload::Delta { dx, dy }, Action::Scroll) => {
            ScrollDirection::from_delta(*dx, *dy).map(GlyphClass::Scroll)
        }
        _ => None,
    }
}

/// A run of merged glyph events, drawn as one label with a repeat count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackGroup {
    pub class: GlyphClass,
    pub modifiers: Modifiers,
    pub first: Timestamp,
    pub last: Timestamp,
    pub count: u32,
    /// Position of the most recent click in the group
    pub position: Option<(i32, i32)>,
}

impl StackGroup {
    fn open(glyph: Glyph) -> Self {
        Self {
            class: glyph.class,
            modifiers: glyph.modifiers,
            first: glyph.timestamp,
            last: glyph.timestamp,
            count: 1,
            position: glyph.position,
        }
    }

    /// Whether `glyph` may extend this group
    pub fn accepts(&self, glyph: &Glyph, policy: &StackingPolicy) -> bool {
        if glyph.class != self.class || glyph.modifiers != self.modifiers {
            return false;
        }
        if glyph.timestamp.duration_since(self.first) > policy.threshold() {
            return false;
        }
        if let GlyphClass::Button(_) = self.class {
            return match (self.position, glyph.position) {
                (Some(a), Some(b)) => within(a, b, policy.collision_px),
                _ => true,
            };
        }
        true
    }

    fn absorb(&mut self, glyph: Glyph) {
        self.last = glyph.timestamp;
        self.count += 1;
        if glyph.position.is_some() {
            self.position = glyph.position;
        }
    }

    /// Label text, e.g. `Ctrl + Shift + S`, with a `×n` suffix for repeats
    pub fn label(&self) -> String {
        let mut parts: Vec<&str> = self.modifiers.names().collect();
        parts.push(self.class.label());
        let base = parts.join(" + ");
        if self.count > 1 {
            format!("{} ×{}", base, self.count)
        } else {
            base
        }
    }
}

fn within(a: (i32, i32), b: (i32, i32), radius: u32) -> bool {
    let dx = (a.0 - b.0) as f64;
    let dy = (a.1 - b.1) as f64;
    dx.hypot(dy) <= radius as f64
}

fn push_glyph(groups: &mut Vec<StackGroup>, glyph: Glyph, policy: &StackingPolicy) {
    match groups.last_mut() {
        Some(open) if open.accepts(&glyph, policy) => open.absorb(glyph),
        _ => groups.push(StackGroup::open(glyph)),
    }
}

/// Greedy stacking over a whole log
pub fn stack_events(log: &EventLog, policy: &StackingPolicy) -> Vec<StackGroup> {
    stack_range(log, 0, log.len(), policy)
}

fn stack_range(log: &EventLog, start: usize, end: usize, policy: &StackingPolicy) -> Vec<StackGroup> {
    let mut groups = Vec::new();
    let mut modifiers = ModifierReplay::new(log, start);
    for index in start..end {
        if let Some(glyph) = Glyph::build(log, index, |i| modifiers.held_before(i)) {
            push_glyph(&mut groups, glyph, policy);
        }
    }
    groups
}

/// Index of the glyph event that starts the group containing the first
/// glyph at or after `from`.
///
/// A glyph that cannot join a group made of just its predecessor glyph
/// cannot join any group ending in that predecessor either, so it starts a
/// group in every full pass. Walking back to such a glyph gives a starting
/// point whose grouping matches a pass from the beginning of the log.
fn stable_anchor(log: &EventLog, from: usize, policy: &StackingPolicy) -> usize {
    let no_modifiers = |_: usize| Modifiers::default();
    let Some((first, mut glyph)) =
        (from..log.len()).find_map(|i| Glyph::build(log, i, no_modifiers).map(|g| (i, g)))
    else {
        return from;
    };

    // Walk back ignoring modifiers first: any chain that merges with
    // modifiers merges without them, so the anchor lies inside this one.
    let mut chain = vec![first];
    let mut cursor = first;
    while cursor > 0 {
        cursor -= 1;
        let Some(prev) = Glyph::build(log, cursor, no_modifiers) else {
            continue;
        };
        if !StackGroup::open(prev.clone()).accepts(&glyph, policy) {
            break;
        }
        chain.push(cursor);
        glyph = prev;
    }
    chain.reverse();

    let mut modifiers = ModifierReplay::new(log, chain[0]);
    let glyphs: Vec<(usize, Glyph)> = chain
        .iter()
        .filter_map(|&i| Glyph::build(log, i, |i| modifiers.held_before(i)).map(|g| (i, g)))
        .collect();

    let mut anchor = first;
    for pair in glyphs.windows(2).rev() {
        let [(prev_index, prev), (_, next)] = pair else {
            break;
        };
        if !StackGroup::open(prev.clone()).accepts(next, policy) {
            break;
        }
        anchor = *prev_index;
    }
    anchor
}

/// Groups with at least one event in `(after, until]`, computed as a full
/// pass from the start of the log would compute them
pub fn groups_in_window(
    log: &EventLog,
    after: Option<Timestamp>,
    until: Timestamp,
    policy: &StackingPolicy,
) -> Vec<StackGroup> {
    let start = after.map_or(0, |a| log.index_after(a));
    let end = log.index_after(until);
    if start >= end {
        return Vec::new();
    }

    let anchor = stable_anchor(log, start, policy);
    let window_start = log.events()[start].timestamp;
    stack_range(log, anchor, end, policy)
        .into_iter()
        .filter(|g| g.last >= window_start)
        .collect()
}
