//! Render engine — composes raster reply cards from resolved subject
//! records.
//!
//! # Determinism
//!
//! `render` is a pure function of the job and the loaded font set: the same
//! job renders to byte-identical PNG output. Nothing here reads clocks,
//! randomness or global state, so artifacts are safe to cache and compare
//! in tests.
//!
//! # Templates
//!
//! A small closed set of layouts ([`LayoutTemplate`]). Template strings
//! coming from config or command options are parsed up front via `FromStr`;
//! an unknown name is rejected before a [`RenderJob`] ever exists, so
//! `render` itself never sees an invalid layout.

pub mod canvas;

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use ab_glyph::FontArc;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, RgbaImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::config::RenderConfig;
use crate::lookup::SubjectRecord;
use canvas::{BAND, BAND_TEXT, INK, MUTED, WHITE};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RenderError {
    /// No candidate font file could be loaded at startup.
    #[error("no usable font found (tried: {0})")]
    FontUnavailable(String),

    /// Template string outside the recognized set — a configuration error,
    /// caught before job creation.
    #[error("unknown layout template: {0}")]
    UnknownTemplate(String),

    /// The subject record carries no schematic bitmap.
    #[error("subject has no schematic image")]
    MissingSchematic,

    /// Schematic bytes from upstream were not a decodable image.
    #[error("failed to decode schematic: {0}")]
    Decode(String),

    #[error("failed to encode artifact: {0}")]
    Encode(String),
}

// ── Job & artifact ───────────────────────────────────────────────────────────

/// Enumerated layout templates. Closed set — extending it means a new
/// variant plus a new draw arm, nothing stringly-typed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutTemplate {
    InfoCard,
    SchematicCard,
    EffectList,
}

impl LayoutTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutTemplate::InfoCard => "info_card",
            LayoutTemplate::SchematicCard => "schematic_card",
            LayoutTemplate::EffectList => "effect_list",
        }
    }
}

impl FromStr for LayoutTemplate {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info_card" => Ok(LayoutTemplate::InfoCard),
            "schematic_card" => Ok(LayoutTemplate::SchematicCard),
            "effect_list" => Ok(LayoutTemplate::EffectList),
            other => Err(RenderError::UnknownTemplate(other.to_string())),
        }
    }
}

/// One unit of render work. Created after a successful lookup, consumed
/// exactly once; never persisted.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub subject: Arc<SubjectRecord>,
    pub layout: LayoutTemplate,
}

/// A rendered binary ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Common font locations tried when the config lists none.
const DEFAULT_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial Unicode.ttf",
];

const MARGIN: u32 = 16;
const BAND_HEIGHT: u32 = 56;
const TITLE_PX: f32 = 30.0;
const BODY_PX: f32 = 18.0;
const FOOTER_PX: f32 = 13.0;

/// Fixed-canvas raster renderer. Built once at startup; clones share the
/// loaded font.
#[derive(Debug, Clone)]
pub struct RenderEngine {
    font: FontArc,
    width: u32,
    height: u32,
}

impl RenderEngine {
    /// Load the first usable font from the configured (or default) candidate
    /// paths and build the engine.
    pub fn new(config: &RenderConfig) -> Result<Self, RenderError> {
        let candidates: Vec<PathBuf> = if config.font_paths.is_empty() {
            DEFAULT_FONT_PATHS.iter().map(PathBuf::from).collect()
        } else {
            config.font_paths.clone()
        };

        for path in &candidates {
            let Ok(bytes) = fs::read(path) else { continue };
            match FontArc::try_from_vec(bytes) {
                Ok(font) => {
                    debug!(font = %path.display(), "loaded render font");
                    return Ok(Self::from_font(font, config.canvas_width, config.canvas_height));
                }
                Err(e) => {
                    debug!(font = %path.display(), error = %e, "font file rejected");
                }
            }
        }

        let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
        Err(RenderError::FontUnavailable(tried.join(", ")))
    }

    /// Build an engine from an already-loaded font. Test seam and embedding
    /// hook — no filesystem access.
    pub fn from_font(font: FontArc, width: u32, height: u32) -> Self {
        Self { font, width: width.max(64), height: height.max(64) }
    }

    /// Render `job` to a PNG artifact. Deterministic: identical job and font
    /// set yield identical bytes.
    pub fn render(&self, job: &RenderJob) -> Result<RenderedArtifact, RenderError> {
        let mut img = RgbaImage::new(self.width, self.height);
        canvas::fill(&mut img, WHITE);

        match job.layout {
            LayoutTemplate::InfoCard => self.draw_info_card(&mut img, &job.subject),
            LayoutTemplate::SchematicCard => self.draw_schematic_card(&mut img, &job.subject)?,
            LayoutTemplate::EffectList => self.draw_effect_list(&mut img, &job.subject),
        }

        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes)
            .write_image(img.as_raw(), self.width, self.height, ExtendedColorType::Rgba8)
            .map_err(|e| RenderError::Encode(e.to_string()))?;

        Ok(RenderedArtifact { bytes, mime_type: "image/png" })
    }

    // ── layouts ──────────────────────────────────────────────────────────────

    /// Title band at the top of every card.
    fn draw_band(&self, img: &mut RgbaImage, title: &str) {
        canvas::fill_rect(img, 0, 0, self.width, BAND_HEIGHT, BAND);
        let ty = (BAND_HEIGHT as f32 - canvas::line_height(&self.font, TITLE_PX)) / 2.0;
        canvas::draw_text(img, &self.font, TITLE_PX, MARGIN as f32, ty.max(0.0), BAND_TEXT, title);
    }

    /// Wrapped body lines starting below the band; returns the next free y.
    fn draw_lines(&self, img: &mut RgbaImage, lines: &[String], mut y: f32) -> f32 {
        let max_w = (self.width - 2 * MARGIN) as f32;
        let lh = canvas::line_height(&self.font, BODY_PX);
        for line in lines {
            let wrapped = canvas::wrap_by_measure(line, max_w, |s| {
                canvas::text_width(&self.font, BODY_PX, s)
            });
            for part in wrapped {
                if y + lh > (self.height - MARGIN) as f32 {
                    return y;
                }
                canvas::draw_text(img, &self.font, BODY_PX, MARGIN as f32, y, INK, &part);
                y += lh;
            }
            y += lh * 0.25;
        }
        y
    }

    fn draw_info_card(&self, img: &mut RgbaImage, subject: &SubjectRecord) {
        self.draw_band(img, &subject.name);

        let mut lines = Vec::new();
        if !subject.chemical_classes.is_empty() {
            lines.push(format!("Chemical class: {}", subject.chemical_classes.join(", ")));
        }
        if !subject.psychoactive_classes.is_empty() {
            lines.push(format!("Psychoactive class: {}", subject.psychoactive_classes.join(", ")));
        }
        if lines.is_empty() {
            lines.push("No classification data available.".to_string());
        }
        self.draw_lines(img, &lines, (BAND_HEIGHT + MARGIN) as f32);

        if let Some(url) = &subject.url {
            let y = self.height as f32 - MARGIN as f32 - canvas::line_height(&self.font, FOOTER_PX);
            canvas::draw_text(img, &self.font, FOOTER_PX, MARGIN as f32, y, MUTED, url);
        }
    }

    fn draw_effect_list(&self, img: &mut RgbaImage, subject: &SubjectRecord) {
        self.draw_band(img, &format!("{} — effects", subject.name));

        let lines: Vec<String> = if subject.summary.is_empty() {
            vec!["No effect data available.".to_string()]
        } else {
            subject.summary.iter().map(|e| format!("• {e}")).collect()
        };
        self.draw_lines(img, &lines, (BAND_HEIGHT + MARGIN) as f32);
    }

    fn draw_schematic_card(
        &self,
        img: &mut RgbaImage,
        subject: &SubjectRecord,
    ) -> Result<(), RenderError> {
        let bytes = subject.schematic.as_ref().ok_or(RenderError::MissingSchematic)?;

        let decoded = image::load_from_memory(bytes)
            .map_err(|e| RenderError::Decode(e.to_string()))?
            .to_rgba8();

        self.draw_band(img, &subject.name);

        // Flatten transparency onto white before scaling — schematics from
        // the wiki thumbnailer usually have an alpha background.
        let mut flattened = RgbaImage::new(decoded.width(), decoded.height());
        canvas::fill(&mut flattened, WHITE);
        imageops::overlay(&mut flattened, &decoded, 0, 0);

        let caption_h = canvas::line_height(&self.font, BODY_PX).ceil() as u32 + MARGIN;
        let avail_w = self.width.saturating_sub(2 * MARGIN).max(1);
        let avail_h = self
            .height
            .saturating_sub(BAND_HEIGHT + 2 * MARGIN + caption_h)
            .max(1);

        let scale = f32::min(
            avail_w as f32 / flattened.width() as f32,
            avail_h as f32 / flattened.height() as f32,
        );
        let new_w = ((flattened.width() as f32 * scale) as u32).max(1);
        let new_h = ((flattened.height() as f32 * scale) as u32).max(1);
        let resized = imageops::resize(&flattened, new_w, new_h, FilterType::Lanczos3);

        let x = i64::from((self.width - new_w) / 2);
        let y = i64::from(BAND_HEIGHT + MARGIN + (avail_h - new_h) / 2);
        imageops::overlay(img, &resized, x, y);

        if let Some(class) = subject.chemical_classes.first() {
            let cy = self.height as f32 - MARGIN as f32 - canvas::line_height(&self.font, BODY_PX);
            canvas::draw_text(img, &self.font, BODY_PX, MARGIN as f32, cy, MUTED, class);
        }
        Ok(())
    }
}
