//! Frame-synchronized overlay renderer
//!
//! For each frame the compositor selects the events the frame owns plus the
//! trailing fade history, stacks bursts into labelled groups and draws the
//! pointer, click rings, release ripples and labels onto a copy of the frame.
//! It keeps nothing between calls except a font cache, so frames can be
//! rendered in any order and in parallel.

use crate::capture::input::types::{Action, MouseButton, Payload, Timestamp};
use crate::eventlog::EventLog;
use crate::processing::canvas::{
    FontCache, FontMetrics, OverlayCanvas, PixmapCanvas, Shape, ShapePaint, TextMeasure,
};
use crate::processing::cursor_smoothing::{raw_pointer_at, smoothed_pointer_at};
use crate::processing::stacking::{groups_in_window, GlyphClass, StackGroup, STATE_LOOKBACK};
use crate::processing::theme::{
    ClickStyle, HorizontalPosition, MarkerShape, PointerStyle, Rgba, SharedTheme, ThemeConfig,
    VerticalPosition,
};
use crate::processing::timeline::FrameRef;
use crate::recorder::channel::CapturedFrame;
use std::time::Duration;

/// Radius of the held-button ring, and the start radius of ripples
const RING_RADIUS: f32 = 12.0;
const RING_ALPHA: u8 = 180;
const POINTER_FILL_ALPHA: f32 = 100.0 / 255.0;
/// Labels fade out over the last half second of their lifetime
const FADE_OUT_RANGE: f64 = 0.5;
const LABEL_PADDING_X: f32 = 8.0;
const LABEL_MARGIN: f32 = 8.0;
const LABEL_EDGE_MARGIN: f32 = 20.0;
const LABEL_SIDE_INSET: f32 = 50.0;
const LABEL_BG_ALPHA: f32 = 200.0 / 255.0;

/// One queued drawing operation
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Shape(Shape, ShapePaint),
    Text {
        x: f32,
        y: f32,
        text: String,
        size: f32,
        color: Rgba,
    },
}

/// Everything the compositor would draw on one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayPlan {
    pub ops: Vec<DrawOp>,
    /// Labels in draw order, newest first
    pub labels: Vec<PlannedLabel>,
    /// Pointer position in frame coordinates
    pub pointer: Option<(f32, f32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedLabel {
    pub text: String,
    pub group: StackGroup,
    pub alpha: f32,
    /// Top-left of the label text
    pub origin: (f32, f32),
}

impl OverlayPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn replay(&self, canvas: &mut dyn OverlayCanvas) {
        for op in &self.ops {
            match op {
                DrawOp::Shape(shape, paint) => canvas.draw_shape(shape, paint),
                DrawOp::Text {
                    x,
                    y,
                    text,
                    size,
                    color,
                } => canvas.draw_text(*x, *y, text, *size, *color),
            }
        }
    }

    fn shape(&mut self, shape: Shape, paint: ShapePaint) {
        if paint.is_visible() {
            self.ops.push(DrawOp::Shape(shape, paint));
        }
    }
}

fn star_points(cx: f32, cy: f32, r: f32, rotation_deg: f32) -> Vec<(f32, f32)> {
    (0..10)
        .map(|i| {
            let angle = (90.0 - 36.0 * i as f32 - rotation_deg).to_radians();
            let dist = if i % 2 == 0 { r } else { r * 0.4 };
            (cx + dist * angle.cos(), cy - dist * angle.sin())
        })
        .collect()
}

fn cursor_points(x: f32, y: f32, r: f32) -> Vec<(f32, f32)> {
    let s = r / 10.0;
    [
        (0.0, 0.0),
        (0.0, 17.0),
        (4.0, 13.0),
        (9.0, 22.0),
        (12.0, 20.0),
        (7.0, 11.0),
        (12.0, 12.0),
    ]
    .into_iter()
    .map(|(dx, dy)| (x + dx * s, y + dy * s))
    .collect()
}

/// Outline marker for rings and ripples; `None` for shapes without one
fn marker(shape: MarkerShape, cx: f32, cy: f32, r: f32, spin_deg: f32) -> Option<Shape> {
    match shape {
        MarkerShape::Circle => Some(Shape::circle(cx, cy, r)),
        MarkerShape::Square => Some(Shape::square(cx, cy, r)),
        MarkerShape::Star => Some(Shape::Polygon(star_points(cx, cy, r, 0.0))),
        MarkerShape::RoteStar => Some(Shape::Polygon(star_points(cx, cy, r, 36.0 + spin_deg))),
        MarkerShape::Cursor | MarkerShape::None => None,
    }
}

/// Most recent state of each button within the lookback, as of `t`
fn held_button(log: &EventLog, t: Timestamp) -> Option<MouseButton> {
    let horizon = t.saturating_sub(STATE_LOOKBACK);
    let mut seen: Vec<MouseButton> = Vec::new();
    let mut held: Vec<MouseButton> = Vec::new();

    for event in log.events()[..log.index_after(t)].iter().rev() {
        if event.timestamp < horizon {
            break;
        }
        let Payload::Button { button, .. } = event.payload else {
            continue;
        };
        if seen.contains(&button) {
            continue;
        }
        seen.push(button);
        if event.action == Action::Down {
            held.push(button);
        }
    }

    [MouseButton::Left, MouseButton::Right, MouseButton::Middle]
        .into_iter()
        .find(|b| held.contains(b))
}

/// Renders input overlays onto captured frames
pub struct OverlayCompositor {
    /// Screen position of the frame's top-left corner
    origin: (i32, i32),
    /// Frame pixels per screen pixel
    scale: f32,
    fonts: FontCache,
}

impl Default for OverlayCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayCompositor {
    pub fn new() -> Self {
        Self {
            origin: (0, 0),
            scale: 1.0,
            fonts: FontCache::default(),
        }
    }

    /// Map screen coordinates so that `(x, y)` lands on the frame origin
    pub fn with_origin(mut self, x: i32, y: i32) -> Self {
        self.origin = (x, y);
        self
    }

    /// Move the frame origin, e.g. when the recorded window moved
    pub fn set_origin(&mut self, x: i32, y: i32) {
        self.origin = (x, y);
    }

    pub fn origin(&self) -> (i32, i32) {
        self.origin
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    fn to_frame(&self, (x, y): (f64, f64)) -> (f32, f32) {
        let scale = if self.scale > 0.0 { self.scale } else { 1.0 };
        (
            (x - self.origin.0 as f64) as f32 * scale,
            (y - self.origin.1 as f64) as f32 * scale,
        )
    }

    /// Composite the overlay for `at` onto a copy of `frame`
    ///
    /// The theme is read once per call, so edits show up on the next frame.
    pub fn render(
        &self,
        frame: &CapturedFrame,
        at: FrameRef,
        log: &EventLog,
        theme: &SharedTheme,
    ) -> CapturedFrame {
        let theme = theme.snapshot();
        let font = self.fonts.get(theme.input_overlay.font_path.as_deref());
        let metrics = FontMetrics::new(font.clone());

        let plan = self.plan(frame.dimensions(), at, log, &theme, &metrics);
        if plan.is_empty() {
            return frame.clone();
        }

        let Some(mut canvas) = PixmapCanvas::new(frame.width, frame.height, font) else {
            return frame.clone();
        };
        plan.replay(&mut canvas);
        canvas.composite_onto(frame)
    }

    /// Work out what to draw for one frame without touching any pixels
    pub fn plan(
        &self,
        size: (u32, u32),
        at: FrameRef,
        log: &EventLog,
        theme: &ThemeConfig,
        metrics: &dyn TextMeasure,
    ) -> OverlayPlan {
        let mut plan = OverlayPlan::default();
        if log.is_empty() {
            return plan;
        }

        if theme.mouse_overlay.enabled {
            self.plan_mouse(&mut plan, at.timestamp, log, theme);
        }
        if theme.input_overlay.enabled {
            self.plan_labels(&mut plan, size, at, log, theme, metrics);
        }
        plan
    }

    fn plan_mouse(&self, plan: &mut OverlayPlan, t: Timestamp, log: &EventLog, theme: &ThemeConfig) {
        let mouse = &theme.mouse_overlay;
        let pointer = match &mouse.pointer.smoothing {
            Some(spring) => smoothed_pointer_at(log, t, spring),
            None => raw_pointer_at(log, t).map(|(x, y)| (x as f64, y as f64)),
        };
        let Some(pointer) = pointer.map(|p| self.to_frame(p)) else {
            return;
        };
        plan.pointer = Some(pointer);

        if let Some(style) = held_button(log, t).and_then(|b| mouse.click(b)) {
            if let (Some(color), Some(shape)) = (
                style.color,
                marker(style.shape, pointer.0, pointer.1, RING_RADIUS, 0.0),
            ) {
                plan.shape(shape, ShapePaint::outline(color.with_alpha(RING_ALPHA), style.width));
            }
        }

        for (button, position, age) in self.ripples(log, t, theme) {
            let Some(style) = mouse.click(button) else {
                continue;
            };
            self.plan_ripple(plan, style, position, age);
        }

        self.plan_pointer(plan, &mouse.pointer, pointer);
    }

    /// Button releases still rippling at `t`, with their age in seconds
    fn ripples(
        &self,
        log: &EventLog,
        t: Timestamp,
        theme: &ThemeConfig,
    ) -> Vec<(MouseButton, (f32, f32), f64)> {
        let mouse = &theme.mouse_overlay;
        let longest = [&mouse.click_left, &mouse.click_right, &mouse.click_middle]
            .iter()
            .map(|c| c.ripple())
            .max()
            .unwrap_or(Duration::ZERO);
        if longest.is_zero() {
            return Vec::new();
        }

        let since = t.saturating_sub(longest);
        log.window(Some(since), t)
            .iter()
            .filter_map(|e| match e.payload {
                Payload::Button { button, x, y } if e.action == Action::Up => Some((
                    button,
                    self.to_frame((x as f64, y as f64)),
                    t.duration_since(e.timestamp).as_secs_f64(),
                )),
                _ => None,
            })
            .collect()
    }

    fn plan_ripple(&self, plan: &mut OverlayPlan, style: &ClickStyle, at: (f32, f32), age: f64) {
        if style.ripple_duration <= 0.0 || age >= style.ripple_duration {
            return;
        }
        let Some(color) = style.color else {
            return;
        };
        let progress = (age / style.ripple_duration) as f32;
        let radius = RING_RADIUS + progress * style.ripple_range;
        // half a turn per second while spinning
        let spin = age as f32 * 180.0;
        if let Some(shape) = marker(style.shape, at.0, at.1, radius, spin) {
            plan.shape(shape, ShapePaint::outline(color.faded(1.0 - progress), style.width));
        }
    }

    fn plan_pointer(&self, plan: &mut OverlayPlan, style: &PointerStyle, (x, y): (f32, f32)) {
        let r = style.radius;
        let fill = style.fill.map(|c| c.faded(POINTER_FILL_ALPHA));
        let paint = ShapePaint {
            fill,
            stroke: style.color,
            stroke_width: style.width,
        };

        match style.shape {
            MarkerShape::Circle | MarkerShape::Square => {
                let (body, dot) = if style.shape == MarkerShape::Circle {
                    (Shape::circle(x, y, r), Shape::circle(x, y, 2.0))
                } else {
                    (Shape::square(x, y, r), Shape::square(x, y, 2.0))
                };
                plan.shape(body, paint);
                if let Some(color) = style.color {
                    plan.shape(dot, ShapePaint::filled(color));
                }
            }
            MarkerShape::Star => plan.shape(Shape::Polygon(star_points(x, y, r, 0.0)), paint),
            MarkerShape::RoteStar => plan.shape(Shape::Polygon(star_points(x, y, r, 36.0)), paint),
            MarkerShape::Cursor => plan.shape(
                Shape::Polygon(cursor_points(x, y, r)),
                ShapePaint {
                    fill: Some(style.fill.unwrap_or(Rgba::WHITE)),
                    stroke: Some(style.color.unwrap_or(Rgba::BLACK)),
                    stroke_width: style.width.max(1.0),
                },
            ),
            MarkerShape::None => {}
        }
    }

    /// Groups worth drawing at this frame, newest first, with their opacity
    fn visible_groups(&self, at: FrameRef, log: &EventLog, theme: &ThemeConfig) -> Vec<(StackGroup, f32)> {
        let style = &theme.input_overlay;
        let t = at.timestamp;
        let fade = style.fade();

        // lower bound of the selection; `None` reaches back to the log start
        let after = match at.previous {
            None => None,
            Some(p) if fade.is_zero() => Some(p),
            Some(p) if t.duration_since(Timestamp::ZERO) > fade => Some(p.min(t.saturating_sub(fade))),
            Some(_) => None,
        };

        let fade_out_start = (style.fade_duration - FADE_OUT_RANGE).max(0.0);
        let mut visible: Vec<(StackGroup, f32)> = groups_in_window(log, after, t, &theme.stacking)
            .into_iter()
            .filter_map(|group| {
                let in_frame = at.previous.map_or(true, |p| group.last > p);
                let age = t.duration_since(group.last).as_secs_f64();
                let alpha = if in_frame || age <= fade_out_start {
                    1.0
                } else {
                    (1.0 - (age - fade_out_start) / FADE_OUT_RANGE).max(0.0)
                };
                (alpha > 0.0).then_some((group, alpha as f32))
            })
            .collect();

        visible.reverse();
        visible.truncate(style.max_stack);
        visible
    }

    fn plan_labels(
        &self,
        plan: &mut OverlayPlan,
        (width, height): (u32, u32),
        at: FrameRef,
        log: &EventLog,
        theme: &ThemeConfig,
        metrics: &dyn TextMeasure,
    ) {
        let style = &theme.input_overlay;
        let groups = self.visible_groups(at, log, theme);
        if groups.is_empty() {
            return;
        }

        let (w, h) = (width as f32, height as f32);
        let font_size = style.font_size.max(8.0);
        let unit_h = font_size + style.padding_y * 2.0 + LABEL_MARGIN;
        // the newest label sits further inward the more labels may stack up
        let inner_margin = LABEL_EDGE_MARGIN + style.max_stack.saturating_sub(1) as f32 * unit_h;

        let mut y = match style.v_position {
            VerticalPosition::Top => inner_margin + style.offset_y,
            VerticalPosition::Center => (h - unit_h * groups.len() as f32) / 2.0 + style.offset_y,
            VerticalPosition::Bottom => h - inner_margin - unit_h + style.offset_y,
        };

        for (group, alpha) in groups {
            let text = format!(" {} ", group.label());
            let (tw, th) = metrics.measure(&text, font_size);

            let x = match style.position {
                HorizontalPosition::Left => LABEL_SIDE_INSET + style.offset_x,
                HorizontalPosition::Right => w - LABEL_SIDE_INSET - tw + style.offset_x,
                HorizontalPosition::Center => (w - tw) / 2.0 + style.offset_x,
            };

            let font_color = style.font_color.map(|c| c.faded(alpha));
            let box_outline = match &group.class {
                GlyphClass::Button(button) => theme.mouse_overlay.click(*button).and_then(|c| c.color),
                _ => None,
            }
            .or(style.outline_color)
            .or(style.font_color)
            .map(|c| c.faded(alpha));

            plan.shape(
                Shape::Rect {
                    x: x - LABEL_PADDING_X,
                    y: y - style.padding_y,
                    w: tw + LABEL_PADDING_X * 2.0,
                    h: th + style.padding_y * 2.0,
                },
                ShapePaint {
                    fill: style.bg_color.map(|c| c.faded(alpha * LABEL_BG_ALPHA)),
                    stroke: box_outline,
                    stroke_width: 1.0,
                },
            );

            let text_y = y + style.text_offset_y;
            if let Some(outline) = style.outline_color.map(|c| c.faded(alpha)) {
                for (dx, dy) in [(-1.0, 0.0), (1.0, 0.0), (0.0, -1.0), (0.0, 1.0)] {
                    plan.ops.push(DrawOp::Text {
                        x: x + dx,
                        y: text_y + dy,
                        text: text.clone(),
                        size: font_size,
                        color: outline,
                    });
                }
            }
            if let Some(color) = font_color {
                plan.ops.push(DrawOp::Text {
                    x,
                    y: text_y,
                    text: text.clone(),
                    size: font_size,
                    color,
                });
            }

            plan.labels.push(PlannedLabel {
                text: text.trim().to_string(),
                group,
                alpha,
                origin: (x, text_y),
            });

            // older labels move toward the nearest edge
            let step = th + style.padding_y * 2.0 + LABEL_MARGIN;
            y = match style.v_position {
                VerticalPosition::Top => y - step,
                _ => y + step,
            };
            if y < -unit_h || y > h + unit_h {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::input::types::InputEvent;
    use crate::processing::canvas::testing::{Drawn, RecordingCanvas};
    use crate::processing::theme::SpringConfig;

    fn ms(v: u64) -> Timestamp {
        Timestamp::from_millis(v)
    }

    fn frame_at(t: u64, previous: Option<u64>) -> FrameRef {
        FrameRef {
            index: 0,
            timestamp: ms(t),
            previous: previous.map(ms),
        }
    }

    fn labels_only() -> ThemeConfig {
        let mut theme = ThemeConfig::default();
        theme.mouse_overlay.enabled = false;
        theme
    }

    fn label_texts(plan: &OverlayPlan) -> Vec<String> {
        plan.labels.iter().map(|l| l.text.clone()).collect()
    }

    fn plan(log: &EventLog, at: FrameRef, theme: &ThemeConfig) -> OverlayPlan {
        OverlayCompositor::new().plan((640, 480), at, log, theme, &FontMetrics::default())
    }

    #[test]
    fn test_burst_is_labelled_with_count() {
        let log = EventLog::from_events(vec![
            InputEvent::key(ms(0), true, "A"),
            InputEvent::key(ms(40), true, "A"),
            InputEvent::key(ms(500), true, "A"),
        ]);
        let theme = labels_only();

        assert_eq!(label_texts(&plan(&log, frame_at(50, Some(17)), &theme)), vec!["A ×2"]);
        // newest first
        assert_eq!(
            label_texts(&plan(&log, frame_at(510, Some(493)), &theme)),
            vec!["A", "A ×2"]
        );
    }

    #[test]
    fn test_labels_fade_then_disappear() {
        let log = EventLog::from_events(vec![InputEvent::key(ms(0), true, "Q")]);
        let theme = labels_only();

        let alpha_at = |t: u64| {
            plan(&log, frame_at(t, Some(t - 16)), &theme)
                .labels
                .first()
                .map(|l| l.alpha)
        };
        assert_eq!(alpha_at(400), Some(1.0));
        let mid = alpha_at(750).unwrap();
        assert!(mid > 0.4 && mid < 0.6, "alpha = {}", mid);
        assert_eq!(alpha_at(1200), None);
    }

    #[test]
    fn test_zero_fade_shows_current_frame_only() {
        let log = EventLog::from_events(vec![
            InputEvent::key(ms(0), true, "A"),
            InputEvent::key(ms(20), true, "B"),
        ]);
        let mut theme = labels_only();
        theme.input_overlay.fade_duration = 0.0;

        assert_eq!(label_texts(&plan(&log, frame_at(16, Some(0)), &theme)), Vec::<String>::new());
        assert_eq!(label_texts(&plan(&log, frame_at(33, Some(16)), &theme)), vec!["B"]);
        assert!(plan(&log, frame_at(50, Some(33)), &theme).is_empty());
    }

    #[test]
    fn test_max_stack_keeps_newest() {
        let log = EventLog::from_events(
            ["A", "B", "C", "D", "E"]
                .iter()
                .enumerate()
                .map(|(i, k)| InputEvent::key(ms(i as u64 * 10), true, *k))
                .collect(),
        );
        let mut theme = labels_only();
        theme.input_overlay.max_stack = 2;
        assert_eq!(label_texts(&plan(&log, frame_at(60, None), &theme)), vec!["E", "D"]);
    }

    #[test]
    fn test_bottom_stack_pushes_older_downward() {
        let log = EventLog::from_events(vec![
            InputEvent::key(ms(0), true, "A"),
            InputEvent::key(ms(200), true, "B"),
        ]);
        let labels = plan(&log, frame_at(210, Some(190)), &labels_only()).labels;
        assert_eq!(labels[0].text, "B");
        assert!(labels[1].origin.1 > labels[0].origin.1);

        let mut theme = labels_only();
        theme.input_overlay.v_position = VerticalPosition::Top;
        let labels = plan(&log, frame_at(210, Some(190)), &theme).labels;
        assert!(labels[1].origin.1 < labels[0].origin.1);
    }

    #[test]
    fn test_grouping_independent_of_frame_rate() {
        let log = EventLog::from_events(
            (0..12)
                .map(|i| InputEvent::key(ms(i * 25), true, "J"))
                .collect(),
        );
        let theme = labels_only();
        let at_30fps = plan(&log, frame_at(300, Some(267)), &theme);
        let at_60fps = plan(&log, frame_at(300, Some(283)), &theme);
        let first_frame = plan(&log, frame_at(300, None), &theme);
        assert_eq!(at_30fps.labels, at_60fps.labels);
        assert_eq!(at_30fps.labels, first_frame.labels);
    }

    #[test]
    fn test_click_label_takes_button_outline() {
        let log = EventLog::from_events(vec![
            InputEvent::button(ms(0), true, MouseButton::Right, 10, 10),
            InputEvent::button(ms(30), false, MouseButton::Right, 10, 10),
        ]);
        let theme = labels_only();
        let plan = plan(&log, frame_at(40, Some(20)), &theme);
        assert_eq!(label_texts(&plan), vec!["Right Click"]);
        let outline = plan.ops.iter().find_map(|op| match op {
            DrawOp::Shape(Shape::Rect { .. }, paint) => paint.stroke,
            _ => None,
        });
        assert_eq!(outline, Some(Rgba::rgb(0, 0, 255)));
    }

    #[test]
    fn test_pointer_ring_and_ripple() {
        let log = EventLog::from_events(vec![
            InputEvent::moved(ms(0), 110, 60),
            InputEvent::button(ms(10), true, MouseButton::Left, 110, 60),
            InputEvent::button(ms(100), false, MouseButton::Left, 110, 60),
        ]);
        let mut theme = ThemeConfig::default();
        theme.input_overlay.enabled = false;
        theme.mouse_overlay.pointer.shape = MarkerShape::Circle;
        let compositor = OverlayCompositor::new().with_origin(100, 50);

        let held = compositor.plan((64, 64), frame_at(50, Some(33)), &log, &theme, &FontMetrics::default());
        assert_eq!(held.pointer, Some((10.0, 10.0)));
        let ring = Shape::circle(10.0, 10.0, RING_RADIUS);
        assert!(held.ops.iter().any(|op| matches!(op, DrawOp::Shape(s, p) if *s == ring && p.stroke.map(|c| c.a) == Some(RING_ALPHA))));

        let released = compositor.plan((64, 64), frame_at(350, Some(333)), &log, &theme, &FontMetrics::default());
        assert!(!released.ops.iter().any(|op| matches!(op, DrawOp::Shape(s, _) if *s == ring)));
        // halfway through a 0.5s ripple: radius 12 + 10, half transparent
        let ripple = Shape::circle(10.0, 10.0, RING_RADIUS + 10.0);
        let paint = released
            .ops
            .iter()
            .find_map(|op| match op {
                DrawOp::Shape(s, p) if *s == ripple => Some(*p),
                _ => None,
            })
            .unwrap();
        assert_eq!(paint.stroke.map(|c| c.a), Some(128));

        let gone = compositor.plan((64, 64), frame_at(700, Some(683)), &log, &theme, &FontMetrics::default());
        assert!(!gone.ops.iter().any(|op| matches!(op, DrawOp::Shape(Shape::Ellipse { rx, .. }, _) if *rx > RING_RADIUS)));
    }

    #[test]
    fn test_smoothed_pointer_lags_raw() {
        let log = EventLog::from_events(vec![
            InputEvent::moved(ms(0), 0, 0),
            InputEvent::moved(ms(1000), 300, 0),
        ]);
        let mut theme = ThemeConfig::default();
        theme.input_overlay.enabled = false;
        let raw = plan(&log, frame_at(1030, Some(1000)), &theme).pointer.unwrap();
        theme.mouse_overlay.pointer.smoothing = Some(SpringConfig::default());
        let smooth = plan(&log, frame_at(1030, Some(1000)), &theme).pointer.unwrap();
        assert_eq!(raw, (300.0, 0.0));
        assert!(smooth.0 < raw.0);
    }

    #[test]
    fn test_empty_log_returns_unannotated_copy() {
        let frame = CapturedFrame::solid(16, 16, [1, 2, 3, 255], ms(0));
        let out = OverlayCompositor::new().render(&frame, FrameRef::first(ms(0)), &EventLog::new(), &SharedTheme::default());
        assert_eq!(out, frame);
    }

    #[test]
    fn test_render_does_not_mutate_input_and_reads_live_theme() {
        let log = EventLog::from_events(vec![InputEvent::moved(ms(0), 8, 8)]);
        let frame = CapturedFrame::solid(16, 16, [0, 0, 0, 255], ms(16));
        let original = frame.clone();
        let theme = SharedTheme::default();
        theme.update(|t| {
            t.mouse_overlay.pointer.shape = MarkerShape::Square;
            t.mouse_overlay.pointer.color = Some(Rgba::WHITE);
            t.mouse_overlay.pointer.fill = Some(Rgba::WHITE);
        });
        let compositor = OverlayCompositor::new();
        let at = FrameRef::first(ms(16));

        let drawn = compositor.render(&frame, at, &log, &theme);
        assert_eq!(frame, original);
        assert_ne!(drawn, frame);
        let center = drawn.pixel(8, 8).unwrap();
        assert!(center[0] > 200 && center[1] > 200 && center[2] > 200);

        theme.update(|t| t.mouse_overlay.pointer.shape = MarkerShape::None);
        assert_eq!(compositor.render(&frame, at, &log, &theme), frame);
    }

    #[test]
    fn test_huge_durations_render_without_panicking() {
        let log = EventLog::from_events(vec![
            InputEvent::key(ms(0), true, "A"),
            InputEvent::button(ms(5), true, MouseButton::Left, 4, 4),
            InputEvent::button(ms(10), false, MouseButton::Left, 4, 4),
        ]);
        let theme = SharedTheme::new(
            ThemeConfig::from_json_str(
                r#"{ "input_overlay": { "fade_duration": 1e30 }, "mouse_overlay": { "click_left": { "ripple_duration": 1e300 } } }"#,
            )
            .unwrap(),
        );
        let frame = CapturedFrame::solid(32, 32, [0, 0, 0, 255], ms(5000));
        let compositor = OverlayCompositor::new();
        let drawn = compositor.render(&frame, frame_at(5000, Some(4967)), &log, &theme);
        assert_ne!(drawn, frame);

        // the label is still fully visible five seconds later
        let snapshot = theme.snapshot();
        let planned = compositor.plan((640, 480), frame_at(5000, Some(4967)), &log, &snapshot, &FontMetrics::default());
        assert_eq!(planned.labels.first().map(|l| l.alpha), Some(1.0));
    }

    #[test]
    fn test_plan_replays_onto_canvas() {
        let log = EventLog::from_events(vec![InputEvent::key(ms(0), true, "Enter")]);
        let mut theme = labels_only();
        theme.input_overlay.outline_color = Some(Rgba::rgb(9, 9, 9));
        let plan = plan(&log, FrameRef::first(ms(10)), &theme);

        let mut canvas = RecordingCanvas::new(640, 480);
        plan.replay(&mut canvas);
        let texts = canvas
            .drawn
            .iter()
            .filter(|d| matches!(d, Drawn::Text { text, .. } if text == " Enter "))
            .count();
        // four outline passes plus the text itself
        assert_eq!(texts, 5);
        assert!(matches!(canvas.drawn[0], Drawn::Shape(Shape::Rect { .. }, _)));
    }
}
