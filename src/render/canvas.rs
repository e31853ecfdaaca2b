//! Low-level canvas drawing — glyph rasterization and pixel blending on an
//! RGBA buffer.
//!
//! Everything here is pure pixel math: identical inputs produce identical
//! buffers, which is what keeps rendered artifacts byte-stable.

use ab_glyph::{Font, FontArc, Glyph, PxScale, ScaleFont, point};
use image::{Rgba, RgbaImage};

pub type Color = [u8; 4];

pub const WHITE: Color = [255, 255, 255, 255];
pub const INK: Color = [24, 24, 28, 255];
pub const MUTED: Color = [110, 110, 120, 255];
pub const BAND: Color = [46, 52, 84, 255];
pub const BAND_TEXT: Color = [240, 240, 245, 255];

/// Fill the whole image with one color.
pub fn fill(img: &mut RgbaImage, color: Color) {
    for px in img.pixels_mut() {
        *px = Rgba(color);
    }
}

/// Fill an axis-aligned rectangle, clipped to the image.
pub fn fill_rect(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Color) {
    let x_end = (x + w).min(img.width());
    let y_end = (y + h).min(img.height());
    for py in y..y_end {
        for px in x..x_end {
            img.put_pixel(px, py, Rgba(color));
        }
    }
}

/// Draw one line of text with its top-left corner at `(x, y)`.
///
/// Glyphs the font lacks fall back to `?`; if even that is missing the
/// character is skipped with a space-width advance. Never panics on exotic
/// input.
pub fn draw_text(
    img: &mut RgbaImage,
    font: &FontArc,
    px_size: f32,
    x: f32,
    y: f32,
    color: Color,
    text: &str,
) {
    let scale = PxScale::from(px_size);
    let scaled = font.as_scaled(scale);
    let baseline = y + scaled.ascent();

    let mut cursor = x;
    let mut prev = None;

    for c in text.chars() {
        let mut id = font.glyph_id(c);
        if id.0 == 0 {
            // Missing glyph — placeholder, not a crash.
            id = font.glyph_id('?');
        }
        if id.0 == 0 {
            cursor += scaled.h_advance(font.glyph_id(' '));
            prev = None;
            continue;
        }

        if let Some(prev_id) = prev {
            cursor += scaled.kern(prev_id, id);
        }

        let glyph: Glyph = id.with_scale_and_position(scale, point(cursor, baseline));
        if let Some(outline) = font.outline_glyph(glyph) {
            let bounds = outline.px_bounds();
            outline.draw(|gx, gy, coverage| {
                let px = bounds.min.x + gx as f32;
                let py = bounds.min.y + gy as f32;
                if px >= 0.0 && py >= 0.0 {
                    blend_pixel(img, px as u32, py as u32, color, coverage);
                }
            });
        }

        cursor += scaled.h_advance(id);
        prev = Some(id);
    }
}

/// Advance width of `text` at `px_size`, for centering and wrapping.
pub fn text_width(font: &FontArc, px_size: f32, text: &str) -> f32 {
    let scaled = font.as_scaled(PxScale::from(px_size));
    let mut width = 0.0;
    let mut prev = None;
    for c in text.chars() {
        let mut id = font.glyph_id(c);
        if id.0 == 0 {
            id = font.glyph_id('?');
        }
        if id.0 == 0 {
            width += scaled.h_advance(font.glyph_id(' '));
            prev = None;
            continue;
        }
        if let Some(prev_id) = prev {
            width += scaled.kern(prev_id, id);
        }
        width += scaled.h_advance(id);
        prev = Some(id);
    }
    width
}

/// Line height (ascent − descent + gap) at `px_size`.
pub fn line_height(font: &FontArc, px_size: f32) -> f32 {
    let scaled = font.as_scaled(PxScale::from(px_size));
    scaled.ascent() - scaled.descent() + scaled.line_gap()
}

/// Greedy word-wrap against an arbitrary measure function.
///
/// The measure closure keeps this independent of any particular font, so
/// the algorithm is testable with a plain character count.
pub fn wrap_by_measure<M: Fn(&str) -> f32>(text: &str, max_width: f32, measure: M) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };

        if measure(&candidate) <= max_width || current.is_empty() {
            current = candidate;
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Alpha-blend `color` onto the pixel at `(x, y)` with `coverage` in 0..=1.
fn blend_pixel(img: &mut RgbaImage, x: u32, y: u32, color: Color, coverage: f32) {
    if x >= img.width() || y >= img.height() {
        return;
    }
    let coverage = coverage.clamp(0.0, 1.0);
    let dst = img.get_pixel_mut(x, y);
    for i in 0..3 {
        let src = f32::from(color[i]);
        let old = f32::from(dst.0[i]);
        dst.0[i] = (src * coverage + old * (1.0 - coverage)).round() as u8;
    }
    dst.0[3] = 255;
}
