//! Artifact store for rendered sites.
//!
//! Each record owns one directory under the store root, addressed purely by
//! record id. Files are written atomically (temp file, then rename) so a
//! concurrent preview read sees either the old or the new file, never half of one.
//!
//! ```text
//! <root>/<record-id>/
//! ├── index.html
//! ├── styles.css
//! └── script.js
//! ```

mod staging;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use sitegen_render::{FILE_SET, RenderedSite};
use sitegen_shared::{ArtifactFile, RecordId, Result, SiteGenError};

pub use staging::{UploadStaging, validate_asset_key};

/// Filesystem-backed artifact store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the file set for `id`.
    pub fn location(&self, id: &RecordId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Write (or overwrite) the file set for `id`, returning per-file checksums.
    #[instrument(skip_all, fields(record_id = %id, files = site.len()))]
    pub fn write(&self, id: &RecordId, site: &RenderedSite) -> Result<Vec<ArtifactFile>> {
        if site.is_empty() {
            return Err(SiteGenError::validation("refusing to store an empty file set"));
        }

        let dir = self.location(id);
        std::fs::create_dir_all(&dir).map_err(|e| SiteGenError::io(&dir, e))?;

        let mut files = Vec::with_capacity(site.len());
        for (filename, content) in site.iter() {
            check_filename(filename)?;

            let target = dir.join(filename);
            let temp = dir.join(format!(".{filename}.tmp"));

            // Write to temp file first
            std::fs::write(&temp, content).map_err(|e| SiteGenError::io(&temp, e))?;

            // Atomic rename
            std::fs::rename(&temp, &target).map_err(|e| SiteGenError::io(&target, e))?;

            debug!(file = %filename, size = content.len(), "wrote artifact");

            files.push(ArtifactFile {
                filename: filename.to_string(),
                sha256: sha256_hex(content.as_bytes()),
                size_bytes: content.len(),
            });
        }

        info!(count = files.len(), path = %dir.display(), "artifact set stored");
        Ok(files)
    }

    /// Read one file of a record's site. `Ok(None)` if it was never written.
    pub fn read(&self, id: &RecordId, filename: &str) -> Result<Option<String>> {
        check_filename(filename)?;
        let path = self.location(id).join(filename);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SiteGenError::io(&path, e)),
        }
    }

    /// Files currently present for `id`, in file-set order.
    pub fn list(&self, id: &RecordId) -> Vec<String> {
        let dir = self.location(id);
        FILE_SET
            .iter()
            .filter(|name| dir.join(name).is_file())
            .map(|name| name.to_string())
            .collect()
    }

    /// Whether the complete file set exists for `id`.
    pub fn exists(&self, id: &RecordId) -> bool {
        self.list(id).len() == FILE_SET.len()
    }
}

/// Only the fixed file set may be written or read.
fn check_filename(filename: &str) -> Result<()> {
    if FILE_SET.contains(&filename) {
        Ok(())
    } else {
        Err(SiteGenError::validation(format!(
            "'{filename}' is not part of the site file set"
        )))
    }
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
