//! Palette resolution. Never fails: explicit palette, then extraction from the
//! logo (or hero), then the configured fallback.

use tracing::{debug, warn};

use sitegen_shared::{AssetPurpose, BusinessPayload, OptimizedReference, Palette};

use crate::stages::PaletteExtractor;

/// Where the resolved palette came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteSource {
    Explicit,
    Extracted,
    Fallback,
}

impl PaletteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Extracted => "extracted",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPalette {
    pub palette: Palette,
    pub source: PaletteSource,
}

/// Pick the image to extract colors from: the logo if there is one, else the
/// first hero image.
fn extraction_source(assets: &[OptimizedReference]) -> Option<&OptimizedReference> {
    assets
        .iter()
        .find(|a| a.purpose == AssetPurpose::Logo)
        .or_else(|| assets.iter().find(|a| a.purpose == AssetPurpose::Hero))
}

pub async fn resolve_palette(
    business: &BusinessPayload,
    assets: &[OptimizedReference],
    extractor: &dyn PaletteExtractor,
    fallback: &Palette,
) -> ResolvedPalette {
    if let Some(explicit) = &business.palette {
        match explicit.validate() {
            Ok(()) => {
                return ResolvedPalette {
                    palette: explicit.clone(),
                    source: PaletteSource::Explicit,
                };
            }
            Err(e) => warn!(error = %e, "explicit palette is invalid, ignoring it"),
        }
    }

    if let Some(image) = extraction_source(assets) {
        match extractor.extract(image).await {
            Ok(palette) => match palette.validate() {
                Ok(()) => {
                    debug!(key = %image.key, "palette extracted");
                    return ResolvedPalette {
                        palette,
                        source: PaletteSource::Extracted,
                    };
                }
                Err(e) => warn!(key = %image.key, error = %e, "extractor returned an invalid palette"),
            },
            Err(e) => warn!(key = %image.key, error = %e, "palette extraction failed, using fallback"),
        }
    }

    ResolvedPalette {
        palette: fallback.clone(),
        source: PaletteSource::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sitegen_shared::{Result, SiteGenError};
    use std::sync::Mutex;

    struct FixedExtractor {
        result: Option<Palette>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PaletteExtractor for FixedExtractor {
        async fn extract(&self, image: &OptimizedReference) -> Result<Palette> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(image.key.clone());
            }
            self.result
                .clone()
                .ok_or_else(|| SiteGenError::stage("palette_resolution", "no colors found"))
        }
    }

    fn extractor(result: Option<Palette>) -> FixedExtractor {
        FixedExtractor {
            result,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn image(key: &str, purpose: AssetPurpose) -> OptimizedReference {
        OptimizedReference {
            key: key.into(),
            purpose,
            uri: format!("r/{key}.svg"),
            content_type: "image/svg+xml".into(),
            size_bytes: 10,
            sha256: "00".into(),
        }
    }

    fn brand() -> Palette {
        Palette::new("#112233", "#445566", "#778899").unwrap()
    }

    #[tokio::test]
    async fn explicit_palette_wins() {
        let mut business = BusinessPayload::new("Acme", "a@acme.test");
        business.palette = Some(brand());
        let ex = extractor(Some(Palette::new("#000000", "#000000", "#000000").unwrap()));

        let resolved = resolve_palette(
            &business,
            &[image("logo", AssetPurpose::Logo)],
            &ex,
            &Palette::default_triple(),
        )
        .await;
        assert_eq!(resolved.source, PaletteSource::Explicit);
        assert_eq!(resolved.palette, brand());
        assert!(ex.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn extracts_from_logo_before_hero() {
        let business = BusinessPayload::new("Acme", "a@acme.test");
        let ex = extractor(Some(brand()));
        let assets = [image("hero", AssetPurpose::Hero), image("logo", AssetPurpose::Logo)];

        let resolved = resolve_palette(&business, &assets, &ex, &Palette::default_triple()).await;
        assert_eq!(resolved.source, PaletteSource::Extracted);
        assert_eq!(*ex.seen.lock().unwrap(), vec!["logo".to_string()]);
    }

    #[tokio::test]
    async fn extraction_failure_falls_back() {
        let business = BusinessPayload::new("Acme", "a@acme.test");
        let ex = extractor(None);

        let resolved = resolve_palette(
            &business,
            &[image("logo", AssetPurpose::Logo)],
            &ex,
            &Palette::default_triple(),
        )
        .await;
        assert_eq!(resolved.source, PaletteSource::Fallback);
        assert_eq!(resolved.palette, Palette::default_triple());
    }

    #[tokio::test]
    async fn no_images_uses_fallback_without_extracting() {
        let business = BusinessPayload::new("Acme", "a@acme.test");
        let ex = extractor(Some(brand()));
        let assets = [image("g1", AssetPurpose::Gallery)];

        let resolved = resolve_palette(&business, &assets, &ex, &Palette::default_triple()).await;
        assert_eq!(resolved.source, PaletteSource::Fallback);
        assert!(ex.seen.lock().unwrap().is_empty());
    }
}
