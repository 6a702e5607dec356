//! Drawing primitives for the overlay layer
//!
//! The compositor emits shapes and text through [`OverlayCanvas`];
//! [`PixmapCanvas`] rasterizes them with tiny-skia (shapes) and ab_glyph
//! (text) into a transparent layer that is then blended over a BGRA frame.

use crate::processing::theme::Rgba;
use crate::recorder::channel::CapturedFrame;
use ab_glyph::{point, Font, FontArc, GlyphId, PxScale, ScaleFont};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tiny_skia::{FillRule, LineJoin, Paint, PathBuilder, Pixmap, PremultipliedColorU8, Stroke, Transform};

/// Cubic bezier handle length for a quarter ellipse
const BEZIER_K: f32 = 0.552_284_8;

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Rect { x: f32, y: f32, w: f32, h: f32 },
    Ellipse { cx: f32, cy: f32, rx: f32, ry: f32 },
    Polygon(Vec<(f32, f32)>),
}

impl Shape {
    pub fn circle(cx: f32, cy: f32, r: f32) -> Self {
        Shape::Ellipse { cx, cy, rx: r, ry: r }
    }

    pub fn square(cx: f32, cy: f32, r: f32) -> Self {
        Shape::Rect {
            x: cx - r,
            y: cy - r,
            w: r * 2.0,
            h: r * 2.0,
        }
    }
}

/// Fill and outline of a shape; either may be absent
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShapePaint {
    pub fill: Option<Rgba>,
    pub stroke: Option<Rgba>,
    pub stroke_width: f32,
}

impl ShapePaint {
    pub fn outline(color: Rgba, width: f32) -> Self {
        Self {
            fill: None,
            stroke: Some(color),
            stroke_width: width,
        }
    }

    pub fn filled(color: Rgba) -> Self {
        Self {
            fill: Some(color),
            ..Self::default()
        }
    }

    pub fn is_visible(&self) -> bool {
        self.fill.is_some_and(|c| c.a > 0)
            || (self.stroke.is_some_and(|c| c.a > 0) && self.stroke_width > 0.0)
    }
}

pub trait TextMeasure {
    /// Width and height of `text` at `size` pixels
    fn measure(&self, text: &str, size: f32) -> (f32, f32);
}

pub trait OverlayCanvas {
    fn size(&self) -> (u32, u32);

    fn draw_shape(&mut self, shape: &Shape, paint: &ShapePaint);

    /// Draw `text` with its top-left corner at `(x, y)`
    fn draw_text(&mut self, x: f32, y: f32, text: &str, size: f32, color: Rgba);
}

/// Text metrics for an optional font
///
/// Without a font, widths are estimated so labels still get a box of
/// plausible size.
#[derive(Clone, Default)]
pub struct FontMetrics {
    font: Option<FontArc>,
}

impl FontMetrics {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    pub fn font(&self) -> Option<&FontArc> {
        self.font.as_ref()
    }
}

impl TextMeasure for FontMetrics {
    fn measure(&self, text: &str, size: f32) -> (f32, f32) {
        let Some(font) = &self.font else {
            return (text.chars().count() as f32 * size * 0.55, size);
        };

        let scaled = font.as_scaled(PxScale::from(size));
        let mut width = 0.0;
        let mut prev: Option<GlyphId> = None;
        for ch in text.chars() {
            let id = scaled.glyph_id(ch);
            if let Some(p) = prev {
                width += scaled.kern(p, id);
            }
            width += scaled.h_advance(id);
            prev = Some(id);
        }
        (width, scaled.ascent() - scaled.descent())
    }
}

/// Fonts tried in order when the theme names none
#[cfg(target_os = "macos")]
const SYSTEM_FONTS: &[&str] = &[
    "/System/Library/Fonts/Helvetica.ttc",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial Unicode.ttf",
];
#[cfg(target_os = "windows")]
const SYSTEM_FONTS: &[&str] = &[
    "C:\\Windows\\Fonts\\segoeui.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

fn first_existing(candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().map(PathBuf::from).find(|p| p.is_file())
}

/// A sans-serif font shipped with the OS, if one is installed
pub fn system_font_path() -> Option<PathBuf> {
    first_existing(SYSTEM_FONTS)
}

/// Loads the theme's font once and hands out cheap clones
///
/// Without a configured path the first installed system font is used.
#[derive(Default)]
pub struct FontCache {
    cached: Mutex<Option<(PathBuf, Option<FontArc>)>>,
    system: OnceLock<Option<PathBuf>>,
}

impl FontCache {
    pub fn get(&self, path: Option<&Path>) -> Option<FontArc> {
        let path = match path {
            Some(path) => path,
            None => self
                .system
                .get_or_init(|| {
                    let found = system_font_path();
                    match &found {
                        Some(path) => tracing::debug!("Using system overlay font {:?}", path),
                        None => tracing::warn!("No system font found; labels are drawn without text"),
                    }
                    found
                })
                .as_deref()?,
        };
        let mut cached = self.cached.lock();
        if let Some((cached_path, font)) = cached.as_ref() {
            if cached_path == path {
                return font.clone();
            }
        }

        // failures are cached too so a bad path is reported once, not per frame
        let font = match std::fs::read(path) {
            Ok(bytes) => match FontArc::try_from_vec(bytes) {
                Ok(font) => Some(font),
                Err(e) => {
                    tracing::warn!("Invalid overlay font {:?}: {}", path, e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read overlay font {:?}: {}", path, e);
                None
            }
        };
        *cached = Some((path.to_path_buf(), font.clone()));
        font
    }
}

fn ellipse_path(cx: f32, cy: f32, rx: f32, ry: f32) -> Option<tiny_skia::Path> {
    let kx = rx * BEZIER_K;
    let ky = ry * BEZIER_K;

    let mut pb = PathBuilder::new();
    pb.move_to(cx, cy - ry);
    pb.cubic_to(cx + kx, cy - ry, cx + rx, cy - ky, cx + rx, cy);
    pb.cubic_to(cx + rx, cy + ky, cx + kx, cy + ry, cx, cy + ry);
    pb.cubic_to(cx - kx, cy + ry, cx - rx, cy + ky, cx - rx, cy);
    pb.cubic_to(cx - rx, cy - ky, cx - kx, cy - ry, cx, cy - ry);
    pb.close();
    pb.finish()
}

fn shape_path(shape: &Shape) -> Option<tiny_skia::Path> {
    match shape {
        Shape::Rect { x, y, w, h } => {
            let rect = tiny_skia::Rect::from_xywh(*x, *y, *w, *h)?;
            Some(PathBuilder::from_rect(rect))
        }
        Shape::Ellipse { cx, cy, rx, ry } => ellipse_path(*cx, *cy, *rx, *ry),
        Shape::Polygon(points) => {
            let (first, rest) = points.split_first()?;
            let mut pb = PathBuilder::new();
            pb.move_to(first.0, first.1);
            for (x, y) in rest {
                pb.line_to(*x, *y);
            }
            pb.close();
            pb.finish()
        }
    }
}

fn paint_for(color: Rgba) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, color.a);
    paint.anti_alias = true;
    paint
}

/// Source-over blend of `alpha`-scaled `color` into a premultiplied pixel
fn blend_premultiplied(dst: PremultipliedColorU8, color: Rgba, coverage: f32) -> PremultipliedColorU8 {
    let sa = (color.a as f32 * coverage.clamp(0.0, 1.0)).round() as u32;
    if sa == 0 {
        return dst;
    }
    let inv = 255 - sa;
    let mix = |src: u8, dst: u8| -> u8 {
        let src = src as u32 * sa / 255;
        (src + dst as u32 * inv / 255).min(255) as u8
    };
    let a = (sa + dst.alpha() as u32 * inv / 255).min(255) as u8;
    PremultipliedColorU8::from_rgba(
        mix(color.r, dst.red()).min(a),
        mix(color.g, dst.green()).min(a),
        mix(color.b, dst.blue()).min(a),
        a,
    )
    .unwrap_or(dst)
}

/// Transparent overlay layer the size of one frame
pub struct PixmapCanvas {
    pixmap: Pixmap,
    font: Option<FontArc>,
}

impl PixmapCanvas {
    /// `None` for a zero-sized frame
    pub fn new(width: u32, height: u32, font: Option<FontArc>) -> Option<Self> {
        Some(Self {
            pixmap: Pixmap::new(width, height)?,
            font,
        })
    }

    /// Overlay pixel as straight RGBA
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        let c = self.pixmap.pixel(x, y)?.demultiply();
        Some(Rgba {
            r: c.red(),
            g: c.green(),
            b: c.blue(),
            a: c.alpha(),
        })
    }

    /// Blend the layer over a copy of `frame`; the frame itself is untouched
    pub fn composite_onto(&self, frame: &CapturedFrame) -> CapturedFrame {
        let mut out = frame.clone();
        let width = self.pixmap.width().min(frame.width) as usize;
        let height = self.pixmap.height().min(frame.height) as usize;
        let stride = frame.bytes_per_row as usize;
        let layer_width = self.pixmap.width() as usize;
        let pixels = self.pixmap.pixels();

        for y in 0..height {
            for x in 0..width {
                let src = pixels[y * layer_width + x];
                let a = src.alpha() as u32;
                if a == 0 {
                    continue;
                }
                let i = y * stride + x * 4;
                let Some(dst) = out.data.get_mut(i..i + 4) else {
                    continue;
                };
                let inv = 255 - a;
                // BGRA destination, premultiplied source
                dst[0] = (src.blue() as u32 + dst[0] as u32 * inv / 255).min(255) as u8;
                dst[1] = (src.green() as u32 + dst[1] as u32 * inv / 255).min(255) as u8;
                dst[2] = (src.red() as u32 + dst[2] as u32 * inv / 255).min(255) as u8;
                dst[3] = (a + dst[3] as u32 * inv / 255).min(255) as u8;
            }
        }
        out
    }

    fn blend_at(&mut self, x: i32, y: i32, color: Rgba, coverage: f32) {
        let (w, h) = (self.pixmap.width() as i32, self.pixmap.height() as i32);
        if x < 0 || y < 0 || x >= w || y >= h {
            return;
        }
        let idx = (y * w + x) as usize;
        let pixels = self.pixmap.pixels_mut();
        pixels[idx] = blend_premultiplied(pixels[idx], color, coverage);
    }
}

impl OverlayCanvas for PixmapCanvas {
    fn size(&self) -> (u32, u32) {
        (self.pixmap.width(), self.pixmap.height())
    }

    fn draw_shape(&mut self, shape: &Shape, paint: &ShapePaint) {
        let Some(path) = shape_path(shape) else {
            return;
        };

        if let Some(fill) = paint.fill {
            self.pixmap.fill_path(
                &path,
                &paint_for(fill),
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        }

        if let Some(color) = paint.stroke {
            if paint.stroke_width > 0.0 {
                let stroke = Stroke {
                    width: paint.stroke_width,
                    line_join: LineJoin::Round,
                    ..Default::default()
                };
                self.pixmap
                    .stroke_path(&path, &paint_for(color), &stroke, Transform::identity(), None);
            }
        }
    }

    fn draw_text(&mut self, x: f32, y: f32, text: &str, size: f32, color: Rgba) {
        let Some(font) = self.font.clone() else {
            return;
        };
        let scale = PxScale::from(size);
        let scaled = font.as_scaled(scale);
        let mut caret = point(x, y + scaled.ascent());
        let mut prev: Option<GlyphId> = None;

        for ch in text.chars() {
            let id = scaled.glyph_id(ch);
            if let Some(p) = prev {
                caret.x += scaled.kern(p, id);
            }
            let glyph = id.with_scale_and_position(scale, caret);
            caret.x += scaled.h_advance(id);
            prev = Some(id);

            let Some(outlined) = font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i32 + gx as i32;
                let py = bounds.min.y as i32 + gy as i32;
                self.blend_at(px, py, color, coverage);
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Drawn {
        Shape(Shape, ShapePaint),
        Text { text: String, x: f32, y: f32 },
    }

    /// Canvas that only records what was drawn
    pub struct RecordingCanvas {
        pub size: (u32, u32),
        pub drawn: Vec<Drawn>,
    }

    impl RecordingCanvas {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                size: (width, height),
                drawn: Vec::new(),
            }
        }
    }

    impl OverlayCanvas for RecordingCanvas {
        fn size(&self) -> (u32, u32) {
            self.size
        }

        fn draw_shape(&mut self, shape: &Shape, paint: &ShapePaint) {
            self.drawn.push(Drawn::Shape(shape.clone(), *paint));
        }

        fn draw_text(&mut self, x: f32, y: f32, text: &str, _size: f32, _color: Rgba) {
            self.drawn.push(Drawn::Text {
                text: text.to_string(),
                x,
                y,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::input::types::Timestamp;

    #[test]
    fn test_filled_square_blends_onto_frame() {
        let mut canvas = PixmapCanvas::new(8, 8, None).unwrap();
        canvas.draw_shape(
            &Shape::Rect {
                x: 2.0,
                y: 2.0,
                w: 4.0,
                h: 4.0,
            },
            &ShapePaint::filled(Rgba::rgb(255, 0, 0)),
        );

        let frame = CapturedFrame::solid(8, 8, [0, 0, 0, 255], Timestamp::ZERO);
        let out = canvas.composite_onto(&frame);

        // BGRA: red lands in byte 2
        assert_eq!(out.pixel(3, 3), Some([0, 0, 255, 255]));
        assert_eq!(out.pixel(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(frame.pixel(3, 3), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_translucent_fill_mixes() {
        let mut canvas = PixmapCanvas::new(4, 4, None).unwrap();
        canvas.draw_shape(
            &Shape::Rect {
                x: 0.0,
                y: 0.0,
                w: 4.0,
                h: 4.0,
            },
            &ShapePaint::filled(Rgba::WHITE.with_alpha(128)),
        );
        let frame = CapturedFrame::solid(4, 4, [0, 0, 0, 255], Timestamp::ZERO);
        let [b, g, r, a] = canvas.composite_onto(&frame).pixel(1, 1).unwrap();
        assert!((120..=136).contains(&b) && b == g && g == r, "{} {} {}", b, g, r);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_outline_leaves_center_clear() {
        let mut canvas = PixmapCanvas::new(40, 40, None).unwrap();
        canvas.draw_shape(
            &Shape::circle(20.0, 20.0, 12.0),
            &ShapePaint::outline(Rgba::rgb(0, 255, 0), 3.0),
        );
        assert_eq!(canvas.pixel(20, 20).map(|c| c.a), Some(0));
        assert!(canvas.pixel(32, 20).unwrap().a > 0);
    }

    #[test]
    fn test_degenerate_shapes_are_ignored() {
        let mut canvas = PixmapCanvas::new(4, 4, None).unwrap();
        canvas.draw_shape(&Shape::Polygon(vec![]), &ShapePaint::filled(Rgba::WHITE));
        canvas.draw_shape(
            &Shape::Rect {
                x: 0.0,
                y: 0.0,
                w: -1.0,
                h: 2.0,
            },
            &ShapePaint::filled(Rgba::WHITE),
        );
        canvas.draw_text(0.0, 0.0, "no font", 12.0, Rgba::WHITE);
        assert!((0..4).all(|x| canvas.pixel(x, 1).map(|c| c.a) == Some(0)));
        assert!(PixmapCanvas::new(0, 10, None).is_none());
    }

    #[test]
    fn test_measure_without_font_estimates() {
        let metrics = FontMetrics::default();
        let (w, h) = metrics.measure("abcd", 20.0);
        assert_eq!(h, 20.0);
        assert!((w - 44.0).abs() < 0.01);
    }

    #[test]
    fn test_first_existing_font_wins() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("b.ttf");
        std::fs::write(&present, b"not really a font").unwrap();
        let missing = dir.path().join("a.ttf");
        let candidates = [missing.to_str().unwrap(), present.to_str().unwrap()];

        assert_eq!(first_existing(&candidates), Some(present.clone()));
        assert_eq!(first_existing(&candidates[..1]), None);
    }

    #[test]
    fn test_unset_font_falls_back_to_system_font() {
        let cache = FontCache::default();
        let font = cache.get(None);
        let Some(path) = system_font_path() else {
            assert!(font.is_none());
            return;
        };
        let font = font.unwrap_or_else(|| panic!("{:?} did not load", path));

        let mut canvas = PixmapCanvas::new(64, 32, Some(font)).unwrap();
        canvas.draw_text(4.0, 4.0, "Ctrl", 18.0, Rgba::WHITE);
        let inked = (0..64u32)
            .flat_map(|x| (0..32u32).map(move |y| (x, y)))
            .filter(|&(x, y)| canvas.pixel(x, y).map_or(false, |c| c.a > 0))
            .count();
        assert!(inked > 0);
    }

    #[test]
    fn test_blend_keeps_premultiplied_invariant() {
        let dst = PremultipliedColorU8::from_rgba(10, 20, 30, 40).unwrap();
        let out = blend_premultiplied(dst, Rgba::rgb(250, 5, 128).with_alpha(77), 0.6);
        assert!(out.red() <= out.alpha() && out.green() <= out.alpha() && out.blue() <= out.alpha());
        assert!(out.alpha() > dst.alpha());
    }
}
