//! Staging area for raw uploads.
//!
//! Raw bytes never go into the record store. They wait here until the
//! optimizer has produced a checkpointed reference, so a pass started by the
//! sweep after a crash can still optimize them.
//!
//! ```text
//! <root>/<record-id>/<key>.bin    raw bytes
//! <root>/<record-id>/<key>.json   key, purpose, content type
//! ```
//!
//! The `.json` sidecar is written last; an upload without one is incomplete
//! and ignored.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sitegen_shared::{AssetPurpose, RecordId, Result, SiteGenError, UploadedAsset};

static ASSET_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").expect("valid regex"));

#[derive(Debug, Serialize, Deserialize)]
struct StagedMeta {
    key: String,
    purpose: AssetPurpose,
    content_type: String,
}

/// Filesystem staging area for uploads awaiting optimization.
#[derive(Debug, Clone)]
pub struct UploadStaging {
    root: PathBuf,
}

impl UploadStaging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir(&self, id: &RecordId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Stage one upload for `id`, replacing any earlier upload with the same key.
    pub fn stage(&self, id: &RecordId, asset: &UploadedAsset) -> Result<()> {
        validate_asset_key(&asset.key)?;
        let dir = self.dir(id);
        std::fs::create_dir_all(&dir).map_err(|e| SiteGenError::io(&dir, e))?;

        write_atomic(&dir, &format!("{}.bin", asset.key), &asset.bytes)?;

        let meta = StagedMeta {
            key: asset.key.clone(),
            purpose: asset.purpose,
            content_type: asset.content_type.clone(),
        };
        let json = serde_json::to_vec(&meta)
            .map_err(|e| SiteGenError::validation(format!("staging metadata: {e}")))?;
        write_atomic(&dir, &format!("{}.json", asset.key), &json)?;

        debug!(record_id = %id, key = %asset.key, size = asset.bytes.len(), "upload staged");
        Ok(())
    }

    /// All complete staged uploads for `id`, sorted by key.
    pub fn pending(&self, id: &RecordId) -> Result<Vec<UploadedAsset>> {
        let dir = self.dir(id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SiteGenError::io(&dir, e)),
        };

        let mut assets = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| SiteGenError::io(&dir, e))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let meta: StagedMeta = match std::fs::read(&path)
                .ok()
                .and_then(|raw| serde_json::from_slice(&raw).ok())
            {
                Some(meta) => meta,
                None => {
                    warn!(path = %path.display(), "unreadable staging metadata, skipping");
                    continue;
                }
            };

            let bin = dir.join(format!("{}.bin", meta.key));
            let bytes = match std::fs::read(&bin) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %bin.display(), error = %e, "unreadable staged upload, skipping");
                    continue;
                }
            };
            assets.push(UploadedAsset {
                key: meta.key,
                purpose: meta.purpose,
                content_type: meta.content_type,
                bytes,
            });
        }

        assets.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(assets)
    }

    /// Forget one staged upload (after its optimized reference is checkpointed).
    pub fn discard(&self, id: &RecordId, key: &str) -> Result<()> {
        validate_asset_key(key)?;
        let dir = self.dir(id);
        // Sidecar first so a half-discarded upload is never picked up again.
        for name in [format!("{key}.json"), format!("{key}.bin")] {
            remove_if_exists(&dir.join(name))?;
        }
        Ok(())
    }

    /// Remove every staged upload for `id`.
    pub fn purge(&self, id: &RecordId) -> Result<()> {
        let dir = self.dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SiteGenError::io(&dir, e)),
        }
    }
}

/// Reject asset keys that could not be staged as a file name.
pub fn validate_asset_key(key: &str) -> Result<()> {
    if ASSET_KEY.is_match(key) {
        Ok(())
    } else {
        Err(SiteGenError::validation(format!(
            "asset key '{key}' must be lowercase letters, digits, '-' or '_'"
        )))
    }
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let target = dir.join(name);
    let temp = dir.join(format!(".{name}.tmp"));
    std::fs::write(&temp, bytes).map_err(|e| SiteGenError::io(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| SiteGenError::io(&target, e))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SiteGenError::io(path, e)),
    }
}
