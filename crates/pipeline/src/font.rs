//! Label fonts for composite grid images.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ab_glyph::{point, Font, FontVec, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};

use gridgen_core::layout::{LabelMeasure, Rect};

const INK: [u8; 3] = [0, 0, 0];

/// Measures and draws label text.
pub trait LabelFont: LabelMeasure + Send + Sync {
    /// Draw `text` word-wrapped to `rect.width`, starting at the top-left of
    /// `rect`. Pixels outside the canvas are clipped.
    fn draw(&self, canvas: &mut RgbaImage, text: &str, rect: Rect, px: f32);
}

/// DejaVu Sans Mono, used whenever no other font is configured.
const BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

/// Load the font at `path`, or the bundled font when `path` is unset or
/// unreadable.
pub fn load_label_font(path: Option<&Path>) -> Arc<dyn LabelFont> {
    if let Some(path) = path {
        match std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| GlyphFont::from_bytes(bytes).map_err(|e| e.to_string()))
        {
            Ok(font) => {
                tracing::info!(path = %path.display(), "Loaded label font");
                return Arc::new(font);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot load label font, using the bundled font");
            }
        }
    }
    match GlyphFont::bundled() {
        Ok(font) => Arc::new(font),
        Err(e) => {
            tracing::error!(error = %e, "Bundled label font is unreadable, labels will not be drawn");
            Arc::new(FixedMetricsFont::default())
        }
    }
}

// ---------------------------------------------------------------------------
// GlyphFont
// ---------------------------------------------------------------------------

/// A TrueType/OpenType font rasterised with `ab_glyph`.
pub struct GlyphFont {
    font: FontVec,
}

impl GlyphFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ab_glyph::InvalidFont> {
        Ok(Self {
            font: FontVec::try_from_vec(bytes)?,
        })
    }

    pub fn bundled() -> Result<Self, ab_glyph::InvalidFont> {
        Self::from_bytes(BUNDLED_FONT.to_vec())
    }

    fn line_width(&self, text: &str, scale: PxScale) -> f32 {
        let scaled = self.font.as_scaled(scale);
        let mut width = 0.0;
        let mut previous = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                width += scaled.kern(prev, id);
            }
            width += scaled.h_advance(id);
            previous = Some(id);
        }
        width
    }

    /// Greedy word wrap to `max_width`. A word wider than the line stays on
    /// its own line.
    fn wrap(&self, text: &str, scale: PxScale, max_width: f32) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if !current.is_empty() && self.line_width(&candidate, scale) > max_width {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            } else {
                current = candidate;
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        lines
    }
}

impl LabelMeasure for GlyphFont {
    fn measure(&self, text: &str, px: f32) -> (f32, f32) {
        let scale = PxScale::from(px);
        let height = self.font.as_scaled(scale).height();
        (self.line_width(text, scale), height)
    }
}

impl LabelFont for GlyphFont {
    fn draw(&self, canvas: &mut RgbaImage, text: &str, rect: Rect, px: f32) {
        let scale = PxScale::from(px);
        let scaled = self.font.as_scaled(scale);
        let line_height = scaled.height() + scaled.line_gap();
        let (canvas_w, canvas_h) = canvas.dimensions();

        for (row, line) in self.wrap(text, scale, rect.width as f32).iter().enumerate() {
            let baseline = rect.y as f32 + scaled.ascent() + row as f32 * line_height;
            let mut caret = rect.x as f32;
            let mut previous = None;
            for c in line.chars() {
                let id = scaled.glyph_id(c);
                if let Some(prev) = previous {
                    caret += scaled.kern(prev, id);
                }
                let glyph = id.with_scale_and_position(scale, point(caret, baseline));
                caret += scaled.h_advance(id);
                previous = Some(id);

                let Some(outlined) = self.font.outline_glyph(glyph) else {
                    continue;
                };
                let bounds = outlined.px_bounds();
                outlined.draw(|gx, gy, coverage| {
                    let x = bounds.min.x as i64 + gx as i64;
                    let y = bounds.min.y as i64 + gy as i64;
                    if x < 0 || y < 0 || x >= canvas_w as i64 || y >= canvas_h as i64 {
                        return;
                    }
                    blend(canvas.get_pixel_mut(x as u32, y as u32), coverage);
                });
            }
        }
    }
}

fn blend(pixel: &mut Rgba<u8>, coverage: f32) {
    let coverage = coverage.clamp(0.0, 1.0);
    for (channel, ink) in pixel.0.iter_mut().take(3).zip(INK) {
        *channel = (*channel as f32 * (1.0 - coverage) + ink as f32 * coverage).round() as u8;
    }
}

// ---------------------------------------------------------------------------
// FixedMetricsFont
// ---------------------------------------------------------------------------

/// Layout-only font: every character is half an em wide and one em tall,
/// and nothing is drawn. Gives pixel-exact layouts independent of any font
/// file.
#[derive(Debug, Default)]
pub struct FixedMetricsFont {
    warned: AtomicBool,
}

impl LabelMeasure for FixedMetricsFont {
    fn measure(&self, text: &str, px: f32) -> (f32, f32) {
        (text.chars().count() as f32 * px / 2.0, px)
    }
}

impl LabelFont for FixedMetricsFont {
    fn draw(&self, _canvas: &mut RgbaImage, _text: &str, _rect: Rect, _px: f32) {
        if !self.warned.swap(true, Ordering::Relaxed) {
            tracing::warn!("No label font loaded, composite labels are left blank");
        }
    }
}
