//! In-crate fakes and a temp-dir harness for orchestrator and dispatcher tests.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use sitegen_artifacts::{ArtifactStore, UploadStaging, sha256_hex};
use sitegen_render::{ArtifactRenderer, ContentModel, RenderedSite, StaticRenderer};
use sitegen_shared::{
    AssetPurpose, BusinessPayload, NarrativeContent, NarrativeSection, OptimizedReference,
    Palette, RecordId, Result, SiteGenError, Theme, UploadedAsset, WorkerConfig,
};
use sitegen_storage::Storage;

use crate::credentials::Credential;
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::stages::{
    ContentSynthesizer, IdentityProvisioner, ImageOptimizer, Notification, NotificationChannel,
    Notifier, PaletteExtractor,
};

pub(crate) fn narrative(headline: &str) -> NarrativeContent {
    NarrativeContent {
        headline: headline.into(),
        tagline: "Baked fresh every morning".into(),
        about: "A family bakery on the harbor front.".into(),
        sections: vec![NarrativeSection {
            title: "Our bread".into(),
            body: "Sourdough, rye and seasonal loaves.".into(),
        }],
        call_to_action: "Visit us".into(),
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Counts calls; fails the first `failures` of them; optionally slow.
pub(crate) struct CountingSynthesizer {
    calls: AtomicUsize,
    failures: usize,
    delay: Duration,
}

impl CountingSynthesizer {
    pub fn ok() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
            delay: Duration::ZERO,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ok()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSynthesizer for CountingSynthesizer {
    async fn synthesize(&self, business: &BusinessPayload) -> Result<NarrativeContent> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.failures {
            return Err(SiteGenError::Network("synthesis backend unavailable".into()));
        }
        Ok(narrative(&format!("Welcome to {}", business.name)))
    }

    fn name(&self) -> &str {
        "counting"
    }
}

pub(crate) struct FakeOptimizer {
    calls: AtomicUsize,
    fail_keys: HashSet<String>,
}

impl FakeOptimizer {
    pub fn ok() -> Self {
        Self::failing_on(&[])
    }

    pub fn failing_on(keys: &[&str]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageOptimizer for FakeOptimizer {
    async fn optimize(
        &self,
        record_id: &RecordId,
        asset: &UploadedAsset,
    ) -> Result<OptimizedReference> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_keys.contains(&asset.key) {
            return Err(SiteGenError::validation(format!("corrupt image '{}'", asset.key)));
        }
        Ok(OptimizedReference {
            key: asset.key.clone(),
            purpose: asset.purpose,
            uri: format!("{record_id}/{}.png", asset.key),
            content_type: asset.content_type.clone(),
            size_bytes: asset.bytes.len() as u64,
            sha256: sha256_hex(&asset.bytes),
        })
    }
}

pub(crate) struct FailingExtractor;

#[async_trait]
impl PaletteExtractor for FailingExtractor {
    async fn extract(&self, _image: &OptimizedReference) -> Result<Palette> {
        Err(SiteGenError::stage("palette_resolution", "no dominant colors"))
    }
}

pub(crate) struct FailingRenderer;

impl ArtifactRenderer for FailingRenderer {
    fn render(&self, _model: &ContentModel, _theme: Theme) -> Result<RenderedSite> {
        Err(SiteGenError::Render("template exploded".into()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Upserts principals into the harness store, hashing the credential.
pub(crate) struct StoreIdentity {
    storage: Arc<Storage>,
}

#[async_trait]
impl IdentityProvisioner for StoreIdentity {
    async fn provision(
        &self,
        contact_address: &str,
        credential: &Credential,
        record_id: &RecordId,
    ) -> Result<String> {
        self.storage
            .upsert_principal(contact_address, &credential.hash(), record_id)
            .await
    }
}

pub(crate) struct FailingIdentity;

#[async_trait]
impl IdentityProvisioner for FailingIdentity {
    async fn provision(
        &self,
        _contact_address: &str,
        _credential: &Credential,
        _record_id: &RecordId,
    ) -> Result<String> {
        Err(SiteGenError::Network("identity service timed out".into()))
    }
}

/// Records `(channel, carried_login)` for every attempt.
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationChannel, bool)>>,
    fail_targets: HashSet<String>,
}

impl RecordingNotifier {
    pub fn ok() -> Self {
        Self::failing_for(&[])
    }

    pub fn failing_for(targets: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_targets: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<(NotificationChannel, bool)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, channel: &NotificationChannel, notification: &Notification) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((channel.clone(), notification.login.is_some()));
        !self.fail_targets.contains(channel.target())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Temp record store, artifact store and staging area plus swappable fakes.
pub(crate) struct Harness {
    pub root: PathBuf,
    pub storage: Arc<Storage>,
    pub artifacts: ArtifactStore,
    pub staging: UploadStaging,
    pub synth: Arc<CountingSynthesizer>,
    pub optimizer: Arc<FakeOptimizer>,
    pub extractor: Arc<dyn PaletteExtractor>,
    pub renderer: Arc<dyn ArtifactRenderer>,
    pub identity: Arc<dyn IdentityProvisioner>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub async fn new() -> Self {
        let root = std::env::temp_dir().join(format!("sg_core_{}", Uuid::now_v7()));
        let storage = Arc::new(
            Storage::open(&root.join("sitegen.db"))
                .await
                .expect("open test db"),
        );
        Self {
            artifacts: ArtifactStore::new(root.join("sites")),
            staging: UploadStaging::new(root.join("staging")),
            synth: Arc::new(CountingSynthesizer::ok()),
            optimizer: Arc::new(FakeOptimizer::ok()),
            extractor: Arc::new(FailingExtractor),
            renderer: Arc::new(StaticRenderer),
            identity: Arc::new(StoreIdentity {
                storage: Arc::clone(&storage),
            }),
            notifier: Arc::new(RecordingNotifier::ok()),
            storage,
            root,
        }
    }

    pub fn config() -> WorkerConfig {
        WorkerConfig {
            inline_delay: Duration::ZERO,
            sweep_interval: Duration::from_millis(10),
            preview_base_url: "http://preview.test".into(),
            ..WorkerConfig::default()
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            synthesizer: self.synth.clone(),
            optimizer: self.optimizer.clone(),
            palette: Arc::clone(&self.extractor),
            renderer: Arc::clone(&self.renderer),
            identity: Arc::clone(&self.identity),
            notifier: self.notifier.clone(),
        }
    }

    fn build(&self, artifacts: ArtifactStore, config: WorkerConfig) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.storage),
            artifacts,
            self.staging.clone(),
            self.collaborators(),
            config,
        )
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.build(self.artifacts.clone(), Self::config())
    }

    pub fn orchestrator_configured(
        &self,
        configure: impl FnOnce(WorkerConfig) -> WorkerConfig,
    ) -> Orchestrator {
        self.build(self.artifacts.clone(), configure(Self::config()))
    }

    pub fn orchestrator_with_artifacts(&self, artifacts: ArtifactStore) -> Orchestrator {
        self.build(artifacts, Self::config())
    }

    /// Insert a PENDING record; the contact is `owner@<slug>.test`.
    pub async fn insert(&self, name: &str) -> RecordId {
        let slug = name.to_ascii_lowercase().replace(' ', "-");
        let business = BusinessPayload::new(name, format!("owner@{slug}.test"));
        self.storage
            .insert_record(&business)
            .await
            .expect("insert record")
            .id
    }

    pub fn stage(&self, id: &RecordId, key: &str, purpose: AssetPurpose) {
        let upload = UploadedAsset {
            key: key.into(),
            purpose,
            content_type: "image/png".into(),
            bytes: format!("png:{key}").into_bytes(),
        };
        self.staging.stage(id, &upload).expect("stage upload");
    }

    /// Leave checkpointed content on a PENDING record, as an aborted pass would.
    pub async fn seed_content(&self, id: &RecordId, headline: &str) {
        assert!(
            self.storage
                .begin_generation(id, "seed-worker", Utc::now())
                .await
                .unwrap()
        );
        assert!(
            self.storage
                .set_generated_content(id, "seed-worker", &narrative(headline))
                .await
                .unwrap()
        );
        assert!(
            self.storage
                .revert_to_pending(id, "seed-worker", false)
                .await
                .unwrap()
        );
    }
}
