//! Stage identities and the contracts of the external stage collaborators.
//!
//! The orchestrator only ever talks to collaborators through these traits, so
//! every implementation (local, remote, fake) is interchangeable. The renderer
//! contract lives in `sitegen-render` because it is a pure function with no
//! async surface.

use async_trait::async_trait;

use sitegen_shared::{
    BusinessPayload, NarrativeContent, OptimizedReference, Palette, RecordId, Result,
    UploadedAsset,
};

use crate::credentials::Credential;

/// One step of the generation pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    AssetOptimization,
    ContentSynthesis,
    PaletteResolution,
    Rendering,
    ArtifactPersistence,
    IdentityProvisioning,
    StatusPromotion,
    Notification,
}

impl Stage {
    /// The fixed stage sequence of a pass.
    pub const SEQUENCE: [Stage; 8] = [
        Self::AssetOptimization,
        Self::ContentSynthesis,
        Self::PaletteResolution,
        Self::Rendering,
        Self::ArtifactPersistence,
        Self::IdentityProvisioning,
        Self::StatusPromotion,
        Self::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssetOptimization => "asset_optimization",
            Self::ContentSynthesis => "content_synthesis",
            Self::PaletteResolution => "palette_resolution",
            Self::Rendering => "rendering",
            Self::ArtifactPersistence => "artifact_persistence",
            Self::IdentityProvisioning => "identity_provisioning",
            Self::StatusPromotion => "status_promotion",
            Self::Notification => "notification",
        }
    }

    /// Whether a failure in this stage aborts the pass.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ContentSynthesis
                | Self::Rendering
                | Self::IdentityProvisioning
                | Self::StatusPromotion
        )
    }

    /// Human-readable label for progress output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AssetOptimization => "Optimizing assets",
            Self::ContentSynthesis => "Synthesizing content",
            Self::PaletteResolution => "Resolving palette",
            Self::Rendering => "Rendering site",
            Self::ArtifactPersistence => "Persisting artifacts",
            Self::IdentityProvisioning => "Provisioning identity",
            Self::StatusPromotion => "Promoting status",
            Self::Notification => "Sending notifications",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Collaborator contracts
// ---------------------------------------------------------------------------

/// Produces narrative copy from the business payload.
#[async_trait]
pub trait ContentSynthesizer: Send + Sync {
    async fn synthesize(&self, business: &BusinessPayload) -> Result<NarrativeContent>;

    fn name(&self) -> &str;
}

/// Turns one raw upload into a stored, optimized reference.
#[async_trait]
pub trait ImageOptimizer: Send + Sync {
    async fn optimize(&self, record_id: &RecordId, asset: &UploadedAsset)
    -> Result<OptimizedReference>;
}

/// Derives a three-color palette from an already optimized image.
#[async_trait]
pub trait PaletteExtractor: Send + Sync {
    async fn extract(&self, image: &OptimizedReference) -> Result<Palette>;
}

/// Creates or updates the login principal for a contact address.
///
/// Implementations must upsert: calling twice with the same address yields
/// one principal carrying the second credential. Only a hash of the
/// credential may be persisted.
#[async_trait]
pub trait IdentityProvisioner: Send + Sync {
    /// Returns the principal id.
    async fn provision(
        &self,
        contact_address: &str,
        credential: &Credential,
        record_id: &RecordId,
    ) -> Result<String>;
}

/// Delivers one notification to one target. Never fails its caller; returns
/// whether delivery succeeded.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &NotificationChannel, notification: &Notification) -> bool;
}

// ---------------------------------------------------------------------------
// Notification payload
// ---------------------------------------------------------------------------

/// Where a notification goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationChannel {
    /// The submitter, by contact address.
    Email(String),
    /// An operator webhook URL.
    Webhook(String),
}

impl NotificationChannel {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Email(_) => "email",
            Self::Webhook(_) => "webhook",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::Email(addr) => addr,
            Self::Webhook(url) => url,
        }
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.target())
    }
}

/// Login details for the submitter. Only ever held in memory.
#[derive(Debug, Clone)]
pub struct LoginDetails {
    pub principal_id: String,
    pub contact_address: String,
    pub credential: Credential,
}

/// "Your site is ready" message.
#[derive(Debug, Clone)]
pub struct Notification {
    pub record_id: RecordId,
    pub business_name: String,
    pub preview_url: String,
    /// Present only on the submitter's copy.
    pub login: Option<LoginDetails>,
}

impl Notification {
    /// Copy without credential material, for operator targets.
    pub fn without_login(&self) -> Self {
        Self {
            login: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_the_fixed_order() {
        let names: Vec<&str> = Stage::SEQUENCE.iter().map(Stage::as_str).collect();
        assert_eq!(
            names,
            [
                "asset_optimization",
                "content_synthesis",
                "palette_resolution",
                "rendering",
                "artifact_persistence",
                "identity_provisioning",
                "status_promotion",
                "notification",
            ]
        );
    }

    #[test]
    fn fatal_stages() {
        let fatal: Vec<Stage> = Stage::SEQUENCE
            .into_iter()
            .filter(Stage::is_fatal)
            .collect();
        assert_eq!(
            fatal,
            [
                Stage::ContentSynthesis,
                Stage::Rendering,
                Stage::IdentityProvisioning,
                Stage::StatusPromotion,
            ]
        );
    }

    #[test]
    fn operator_copy_drops_login() {
        let notification = Notification {
            record_id: RecordId::new(),
            business_name: "Harbor Bakery".into(),
            preview_url: "http://localhost/preview/x/".into(),
            login: Some(LoginDetails {
                principal_id: "p1".into(),
                contact_address: "owner@harbor.test".into(),
                credential: Credential::from_secret("s3cret"),
            }),
        };
        let copy = notification.without_login();
        assert!(copy.login.is_none());
        assert_eq!(copy.preview_url, notification.preview_url);
        assert_eq!(
            NotificationChannel::Webhook("https://ops.test/hook".into()).to_string(),
            "webhook:https://ops.test/hook"
        );
    }
}
