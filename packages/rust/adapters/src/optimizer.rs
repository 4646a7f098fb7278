//! Local image optimizer.
//!
//! Verifies the upload by its magic bytes (the declared content type is not
//! trusted), minifies SVG, and stores the result content-addressed under
//! `<root>/<record-id>/<sha12>.<ext>`. Raster formats are stored as-is.

use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use sitegen_artifacts::sha256_hex;
use sitegen_core::ImageOptimizer;
use sitegen_shared::{OptimizedReference, RecordId, Result, SiteGenError, UploadedAsset};

static SVG_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static SVG_INTER_TAG_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("valid regex"));
static SVG_ACTIVE_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<script|\son[a-z]+\s*=|javascript:"#).expect("valid regex")
});

/// Image formats the optimizer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Svg,
}

impl ImageFormat {
    /// Detect the format from the leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
            let head = head.trim_start_matches('\u{feff}').trim_start();
            (head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg")))
                .then_some(Self::Svg)
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Svg => "image/svg+xml",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Svg => "svg",
        }
    }
}

/// Filesystem-backed optimizer.
#[derive(Debug, Clone)]
pub struct LocalImageOptimizer {
    root: PathBuf,
    max_bytes: u64,
}

impl LocalImageOptimizer {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn optimize_bytes(&self, asset: &UploadedAsset) -> Result<(ImageFormat, Vec<u8>)> {
        if asset.bytes.is_empty() {
            return Err(SiteGenError::validation(format!("asset '{}' is empty", asset.key)));
        }
        if asset.bytes.len() as u64 > self.max_bytes {
            return Err(SiteGenError::validation(format!(
                "asset '{}' is {} bytes, limit is {}",
                asset.key,
                asset.bytes.len(),
                self.max_bytes
            )));
        }

        let format = ImageFormat::sniff(&asset.bytes).ok_or_else(|| {
            SiteGenError::validation(format!(
                "asset '{}' is not a supported image (declared {})",
                asset.key, asset.content_type
            ))
        })?;

        let bytes = match format {
            ImageFormat::Svg => minify_svg(&asset.key, &asset.bytes)?.into_bytes(),
            _ => asset.bytes.clone(),
        };
        Ok((format, bytes))
    }
}

#[async_trait]
impl ImageOptimizer for LocalImageOptimizer {
    async fn optimize(
        &self,
        record_id: &RecordId,
        asset: &UploadedAsset,
    ) -> Result<OptimizedReference> {
        let (format, bytes) = self.optimize_bytes(asset)?;
        let sha256 = sha256_hex(&bytes);
        let uri = format!("{record_id}/{}.{}", &sha256[..12], format.extension());

        let dir = self.root.join(record_id.to_string());
        std::fs::create_dir_all(&dir).map_err(|e| SiteGenError::io(&dir, e))?;
        let target = self.root.join(&uri);
        let temp = dir.join(format!(".{}.tmp", asset.key));
        std::fs::write(&temp, &bytes).map_err(|e| SiteGenError::io(&temp, e))?;
        std::fs::rename(&temp, &target).map_err(|e| SiteGenError::io(&target, e))?;

        debug!(
            key = %asset.key,
            format = format.mime(),
            before = asset.bytes.len(),
            after = bytes.len(),
            "asset optimized"
        );

        Ok(OptimizedReference {
            key: asset.key.clone(),
            purpose: asset.purpose,
            uri,
            content_type: format.mime().to_string(),
            size_bytes: bytes.len() as u64,
            sha256,
        })
    }
}

/// Strip comments and inter-tag whitespace; refuse scriptable SVG.
fn minify_svg(key: &str, bytes: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| SiteGenError::validation(format!("SVG asset '{key}' is not UTF-8")))?;
    if SVG_ACTIVE_CONTENT.is_match(text) {
        return Err(SiteGenError::validation(format!(
            "SVG asset '{key}' contains active content"
        )));
    }
    let without_comments = SVG_COMMENT.replace_all(text, "");
    Ok(SVG_INTER_TAG_SPACE
        .replace_all(&without_comments, "><")
        .trim()
        .to_string())
}
