//! Core domain types for sitegen intake records and generated sites.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SiteGenError};

/// `#rrggbb` hex color.
static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("valid hex color regex"));

// ---------------------------------------------------------------------------
// RecordId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for intake record identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generate a new time-sortable record identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an intake record. Owned exclusively by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Generating,
    Generated,
}

impl RecordStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Generated => "generated",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = SiteGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "generated" => Ok(Self::Generated),
            other => Err(SiteGenError::validation(format!(
                "unknown record status '{other}'"
            ))),
        }
    }
}

/// The only status a requester ever sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoarseStatus {
    Pending,
    InProgress,
    Ready,
    Failed,
}

impl CoarseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CoarseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Theme & palette
// ---------------------------------------------------------------------------

/// Closed set of site theme variants understood by the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Modern,
    Classic,
    Bold,
    Minimal,
}

impl Theme {
    pub const ALL: [Theme; 4] = [Self::Modern, Self::Classic, Self::Bold, Self::Minimal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Modern => "modern",
            Self::Classic => "classic",
            Self::Bold => "bold",
            Self::Minimal => "minimal",
        }
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Theme {
    type Err = SiteGenError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SiteGenError::validation(format!("unknown theme '{s}'")))
    }
}

/// Three-color site palette.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
}

impl Palette {
    /// Build a palette from three colors, validating and lowercasing each.
    pub fn new(
        primary: impl Into<String>,
        secondary: impl Into<String>,
        accent: impl Into<String>,
    ) -> Result<Self> {
        let palette = Self {
            primary: primary.into().to_ascii_lowercase(),
            secondary: secondary.into().to_ascii_lowercase(),
            accent: accent.into().to_ascii_lowercase(),
        };
        palette.validate()?;
        Ok(palette)
    }

    /// The fixed fallback used when no palette is supplied or extracted.
    pub fn default_triple() -> Self {
        Self {
            primary: "#6366f1".into(),
            secondary: "#8b5cf6".into(),
            accent: "#06b6d4".into(),
        }
    }

    /// Check that every color is `#rrggbb`.
    pub fn validate(&self) -> Result<()> {
        for (slot, color) in [
            ("primary", &self.primary),
            ("secondary", &self.secondary),
            ("accent", &self.accent),
        ] {
            if !HEX_COLOR.is_match(color) {
                return Err(SiteGenError::validation(format!(
                    "palette {slot} color '{color}' is not #rrggbb"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Business payload
// ---------------------------------------------------------------------------

/// A public contact channel (social profile, booking link, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Display label, e.g. `instagram`.
    pub label: String,
    pub url: String,
}

/// The intake payload. Fields the pipeline reads are typed; everything else is
/// carried through opaquely in `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessPayload {
    /// Business display name.
    pub name: String,
    /// Submitter's contact address; also the login identifier.
    pub contact_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
    /// Explicit palette; takes precedence over extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palette: Option<Palette>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    /// Everything else the intake form collected.
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl BusinessPayload {
    /// Minimal payload with only the required fields set.
    pub fn new(name: impl Into<String>, contact_email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contact_email: contact_email.into(),
            phone: None,
            address: None,
            channels: Vec::new(),
            palette: None,
            theme: None,
            attributes: serde_json::Map::new(),
        }
    }

    /// Reject payloads the pipeline can never turn into a site.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SiteGenError::validation("business name is empty"));
        }
        let email = self.contact_email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(SiteGenError::validation(format!(
                "contact address '{}' is not an email address",
                self.contact_email
            )));
        }
        if let Some(palette) = &self.palette {
            palette.validate()?;
        }
        Ok(())
    }

    /// Read a string attribute from the opaque part of the payload.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// What an uploaded image is used for on the generated site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetPurpose {
    Logo,
    Hero,
    Gallery,
}

impl AssetPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logo => "logo",
            Self::Hero => "hero",
            Self::Gallery => "gallery",
        }
    }
}

impl std::fmt::Display for AssetPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssetPurpose {
    type Err = SiteGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "logo" => Ok(Self::Logo),
            "hero" => Ok(Self::Hero),
            "gallery" => Ok(Self::Gallery),
            other => Err(SiteGenError::validation(format!(
                "unknown asset purpose '{other}'"
            ))),
        }
    }
}

/// Raw upload handed to the pipeline. Never stored in the record store.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    /// Stable key within the record (e.g. `logo`, `gallery-2`).
    pub key: String,
    pub purpose: AssetPurpose,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for UploadedAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadedAsset")
            .field("key", &self.key)
            .field("purpose", &self.purpose)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// An optimized asset, checkpointed onto the record as soon as it exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizedReference {
    /// Same key as the upload it came from.
    pub key: String,
    pub purpose: AssetPurpose,
    /// Location of the optimized file, relative to the asset root.
    pub uri: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// SHA-256 of the optimized bytes.
    pub sha256: String,
}

// ---------------------------------------------------------------------------
// Narrative content
// ---------------------------------------------------------------------------

/// One titled block of synthesized copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeSection {
    pub title: String,
    pub body: String,
}

/// Output of the content synthesizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeContent {
    pub headline: String,
    pub tagline: String,
    pub about: String,
    #[serde(default)]
    pub sections: Vec<NarrativeSection>,
    pub call_to_action: String,
}

// ---------------------------------------------------------------------------
// IntakeRecord
// ---------------------------------------------------------------------------

/// A durable intake record as stored in the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRecord {
    pub id: RecordId,
    pub status: RecordStatus,
    pub business: BusinessPayload,
    /// Optimized asset references, in key order.
    #[serde(default)]
    pub derived_assets: Vec<OptimizedReference>,
    /// Synthesized narrative, once the synthesis stage has checkpointed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_content: Option<NarrativeContent>,
    /// Number of passes started for this record.
    pub attempts: u32,
    /// Worker currently holding the generation lease.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    /// When the current lease began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generating_since: Option<DateTime<Utc>>,
    /// When the most recent failed pass ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntakeRecord {
    /// Collapse the internal status into what a requester may see.
    pub fn coarse_status(&self) -> CoarseStatus {
        match self.status {
            RecordStatus::Generating => CoarseStatus::InProgress,
            RecordStatus::Generated => CoarseStatus::Ready,
            RecordStatus::Pending if self.last_failure_at.is_some() => CoarseStatus::Failed,
            RecordStatus::Pending => CoarseStatus::Pending,
        }
    }

    /// Whether an optimized reference for `key` is already checkpointed.
    pub fn has_asset(&self, key: &str) -> bool {
        self.derived_assets.iter().any(|a| a.key == key)
    }
}

// ---------------------------------------------------------------------------
// SiteArtifact
// ---------------------------------------------------------------------------

/// Checksum entry for one rendered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub filename: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// The rendered site for a record. Exists only after a successful render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteArtifact {
    pub record_id: RecordId,
    /// Artifact store directory holding the file set.
    pub location: String,
    pub theme: Theme,
    pub palette: Palette,
    /// Provisional preview address.
    pub preview_url: String,
    pub files: Vec<ArtifactFile>,
    /// Whether the file set reached the artifact store.
    pub persisted: bool,
    pub rendered_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

/// Login principal keyed by contact address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub contact_address: String,
    /// Salted hash of the current credential. Plaintext is never stored.
    pub credential_hash: String,
    pub record_id: RecordId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
