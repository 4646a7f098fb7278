//! SVG palette extractor.
//!
//! Counts the hex colors an optimized SVG uses and takes the most frequent
//! ones. Near-white and near-black are ignored as backgrounds/outlines. Raster
//! images are not decoded; they fail extraction so the pipeline falls back.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use sitegen_core::PaletteExtractor;
use sitegen_shared::{OptimizedReference, Palette, Result, SiteGenError};

static HEX_COLOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#([0-9a-fA-F]{6}|[0-9a-fA-F]{3})\b").expect("valid regex")
});

#[derive(Debug, Clone)]
pub struct SvgPaletteExtractor {
    /// Root the optimized asset `uri`s are relative to.
    root: PathBuf,
}

impl SvgPaletteExtractor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PaletteExtractor for SvgPaletteExtractor {
    async fn extract(&self, image: &OptimizedReference) -> Result<Palette> {
        if image.content_type != "image/svg+xml" {
            return Err(SiteGenError::validation(format!(
                "cannot extract colors from {}",
                image.content_type
            )));
        }
        let path = self.root.join(&image.uri);
        let svg = std::fs::read_to_string(&path).map_err(|e| SiteGenError::io(&path, e))?;
        let palette = palette_from_svg(&svg)?;
        debug!(key = %image.key, primary = %palette.primary, "palette extracted from svg");
        Ok(palette)
    }
}

/// Rank colors by frequency (ties by value) and build a palette from the top
/// three. Missing slots are shades of the primary.
pub fn palette_from_svg(svg: &str) -> Result<Palette> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for capture in HEX_COLOR.captures_iter(svg) {
        let color = normalize(&capture[1]);
        if !is_neutral(&color) {
            *counts.entry(color).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut colors = ranked.into_iter().map(|(c, _)| c);

    let primary = colors
        .next()
        .ok_or_else(|| SiteGenError::validation("svg uses no brand colors"))?;
    let secondary = colors.next().unwrap_or_else(|| shade(&primary, 0.7));
    let accent = colors.next().unwrap_or_else(|| shade(&primary, 1.3));

    Palette::new(primary, secondary, accent)
}

/// `abc` / `AABBCC` → `#aabbcc`.
fn normalize(hex: &str) -> String {
    let hex = hex.to_ascii_lowercase();
    if hex.len() == 3 {
        let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
        format!("#{expanded}")
    } else {
        format!("#{hex}")
    }
}

fn channels(color: &str) -> [u8; 3] {
    let parse = |i: usize| u8::from_str_radix(&color[i..i + 2], 16).unwrap_or(0);
    [parse(1), parse(3), parse(5)]
}

fn is_neutral(color: &str) -> bool {
    let [r, g, b] = channels(color);
    let luma = (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000;
    luma > 240 || luma < 16
}

/// Scale each channel by `factor`, clamped.
fn shade(color: &str, factor: f32) -> String {
    let [r, g, b] = channels(color).map(|c| (f32::from(c) * factor).round().clamp(0.0, 255.0) as u8);
    format!("#{r:02x}{g:02x}{b:02x}")
}
