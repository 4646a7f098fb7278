//! Pipeline orchestrator.
//!
//! Drives one intake record through the fixed stage sequence:
//!
//! 1. Asset optimization (per asset, non-fatal, checkpointed per asset)
//! 2. Content synthesis (fatal, checkpointed)
//! 3. Palette resolution (non-fatal, falls back)
//! 4. Rendering (fatal; the site artifact row is written here)
//! 5. Artifact persistence (non-fatal, logged loudly)
//! 6. Identity provisioning (fatal)
//! 7. Status promotion to GENERATED (fatal)
//! 8. Notification (best-effort per target)
//!
//! A fatal failure aborts the pass and reverts the record to PENDING. Every
//! status and derived-field write is conditional on this worker still
//! holding the record's lease, so a pass that was reclaimed as stale cannot
//! clobber the pass that replaced it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use sitegen_artifacts::{ArtifactStore, UploadStaging, sha256_hex};
use sitegen_render::{ArtifactRenderer, RenderedSite};
use sitegen_shared::{
    ArtifactFile, IntakeRecord, NarrativeContent, OptimizedReference, Palette, RecordId,
    RecordStatus, Result, SiteArtifact, SiteGenError, WorkerConfig,
};
use sitegen_storage::Storage;

use crate::content::build_content_model;
use crate::credentials::Credential;
use crate::palette::{PaletteSource, resolve_palette};
use crate::stages::{
    ContentSynthesizer, IdentityProvisioner, ImageOptimizer, LoginDetails, Notification,
    NotificationChannel, Notifier, PaletteExtractor, Stage,
};

/// The external collaborators one orchestrator calls.
#[derive(Clone)]
pub struct Collaborators {
    pub synthesizer: Arc<dyn ContentSynthesizer>,
    pub optimizer: Arc<dyn ImageOptimizer>,
    pub palette: Arc<dyn PaletteExtractor>,
    pub renderer: Arc<dyn ArtifactRenderer>,
    pub identity: Arc<dyn IdentityProvisioner>,
    pub notifier: Arc<dyn Notifier>,
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Progress callback for pass reporting.
pub trait StageObserver: Send + Sync {
    /// Called when a stage begins.
    fn stage_started(&self, record_id: &RecordId, stage: Stage);
    /// Called once per `process` call with its outcome.
    fn pass_finished(&self, record_id: &RecordId, outcome: &PassOutcome);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl StageObserver for SilentObserver {
    fn stage_started(&self, _record_id: &RecordId, _stage: Stage) {}
    fn pass_finished(&self, _record_id: &RecordId, _outcome: &PassOutcome) {}
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a `process` call did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    /// The record was not PENDING when loaded.
    NotPending(RecordStatus),
    /// Another worker took the lease between load and claim.
    Contended,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => f.write_str("record not found"),
            Self::NotPending(status) => write!(f, "record is {status}"),
            Self::Contended => f.write_str("record claimed by another worker"),
        }
    }
}

/// What a successful pass did.
#[derive(Debug, Clone)]
pub struct PassSummary {
    pub record_id: RecordId,
    pub assets_optimized: usize,
    pub assets_lost: usize,
    pub content_reused: bool,
    pub palette_source: PaletteSource,
    pub persisted: bool,
    pub principal_id: String,
    pub preview_url: String,
    pub notifications_delivered: usize,
    pub notifications_attempted: usize,
    pub elapsed: Duration,
}

/// Result of one `process` call. Stage detail stays internal to operators.
#[derive(Debug, Clone)]
pub enum PassOutcome {
    Skipped(SkipReason),
    Generated(PassSummary),
    Failed { stage: Stage },
}

impl PassOutcome {
    pub fn is_generated(&self) -> bool {
        matches!(self, Self::Generated(_))
    }
}

/// A fatal stage error. Never leaves this module.
struct StageFailure {
    stage: Stage,
    error: SiteGenError,
}

impl StageFailure {
    fn lease_lost(stage: Stage) -> Self {
        Self {
            stage,
            error: SiteGenError::Storage("generation lease lost".into()),
        }
    }
}

impl From<StageFailure> for SiteGenError {
    fn from(failure: StageFailure) -> Self {
        SiteGenError::stage(failure.stage.as_str(), failure.error.to_string())
    }
}

fn at(stage: Stage) -> impl FnOnce(SiteGenError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

struct AssetTally {
    assets: Vec<OptimizedReference>,
    optimized: usize,
    lost: usize,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    storage: Arc<Storage>,
    artifacts: ArtifactStore,
    staging: UploadStaging,
    collaborators: Collaborators,
    config: WorkerConfig,
    operator_webhooks: Vec<String>,
    observer: Arc<dyn StageObserver>,
    worker_id: String,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<Storage>,
        artifacts: ArtifactStore,
        staging: UploadStaging,
        collaborators: Collaborators,
        config: WorkerConfig,
    ) -> Self {
        Self {
            storage,
            artifacts,
            staging,
            collaborators,
            config,
            operator_webhooks: Vec::new(),
            observer: Arc::new(SilentObserver),
            worker_id: format!("worker-{}", Uuid::now_v7()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Operator webhooks notified (without credentials) after each success.
    pub fn with_operator_webhooks(mut self, urls: Vec<String>) -> Self {
        self.operator_webhooks = urls;
        self
    }

    /// Lease owner id written into `claimed_by`.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Provisional preview address for a record.
    pub fn preview_url(&self, id: &RecordId) -> String {
        format!("{}/{id}/", self.config.preview_base_url)
    }

    fn media_base(&self) -> String {
        format!("{}/assets", self.config.preview_base_url)
    }

    /// Run one generation pass for `id`.
    ///
    /// Only infrastructure errors before the lease is taken are returned as
    /// `Err`. Stage failures are absorbed into [`PassOutcome::Failed`].
    #[instrument(skip(self), fields(record_id = %id, worker = %self.worker_id))]
    pub async fn process(&self, id: &RecordId) -> Result<PassOutcome> {
        let Some(record) = self.storage.get_record(id).await? else {
            debug!("record not found");
            return Ok(self.finish(id, PassOutcome::Skipped(SkipReason::NotFound)));
        };

        if record.status != RecordStatus::Pending {
            debug!(status = %record.status, "record not eligible");
            return Ok(self.finish(
                id,
                PassOutcome::Skipped(SkipReason::NotPending(record.status)),
            ));
        }

        if !self
            .storage
            .begin_generation(id, &self.worker_id, Utc::now())
            .await?
        {
            debug!("lost the race for the lease");
            return Ok(self.finish(id, PassOutcome::Skipped(SkipReason::Contended)));
        }

        info!(attempt = record.attempts + 1, "generation pass started");
        let started = Instant::now();

        let outcome = match self.run_pass(&record, started).await {
            Ok(summary) => {
                info!(
                    assets = summary.assets_optimized,
                    assets_lost = summary.assets_lost,
                    palette = summary.palette_source.as_str(),
                    persisted = summary.persisted,
                    notified = summary.notifications_delivered,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "record generated"
                );
                PassOutcome::Generated(summary)
            }
            Err(failure) => {
                error!(
                    record_id = %id,
                    stage = %failure.stage,
                    error = %failure.error,
                    "fatal stage error, pass aborted"
                );
                match self.storage.revert_to_pending(id, &self.worker_id, true).await {
                    Ok(true) => {}
                    Ok(false) => warn!("lease already released, leaving record to the sweep"),
                    Err(e) => error!(error = %e, "failed to revert record to pending"),
                }
                PassOutcome::Failed {
                    stage: failure.stage,
                }
            }
        };

        Ok(self.finish(id, outcome))
    }

    fn finish(&self, id: &RecordId, outcome: PassOutcome) -> PassOutcome {
        self.observer.pass_finished(id, &outcome);
        outcome
    }

    async fn run_pass(
        &self,
        record: &IntakeRecord,
        started: Instant,
    ) -> std::result::Result<PassSummary, StageFailure> {
        let id = &record.id;

        if !self.config.resume_from_checkpoints && record.generated_content.is_some() {
            debug!("full replay: dropping checkpointed content");
            self.storage
                .clear_generated_content(id, &self.worker_id)
                .await
                .map_err(at(Stage::ContentSynthesis))?;
        }

        self.observer.stage_started(id, Stage::AssetOptimization);
        let tally = self.optimize_assets(record).await?;

        self.observer.stage_started(id, Stage::ContentSynthesis);
        let (narrative, content_reused) = self.synthesize(record).await?;

        self.observer.stage_started(id, Stage::PaletteResolution);
        let resolved = resolve_palette(
            &record.business,
            &tally.assets,
            self.collaborators.palette.as_ref(),
            &self.config.fallback_palette,
        )
        .await;
        debug!(source = resolved.source.as_str(), "palette resolved");

        self.observer.stage_started(id, Stage::Rendering);
        let (site, artifact) = self
            .render(record, &narrative, &resolved.palette, &tally.assets)
            .await?;

        self.observer.stage_started(id, Stage::ArtifactPersistence);
        let persisted = self.persist(id, &site).await;

        self.observer.stage_started(id, Stage::IdentityProvisioning);
        let contact = record.business.contact_email.trim().to_string();
        let credential = Credential::generate();
        let principal_id = self
            .collaborators
            .identity
            .provision(&contact, &credential, id)
            .await
            .map_err(at(Stage::IdentityProvisioning))?;

        self.observer.stage_started(id, Stage::StatusPromotion);
        if !self
            .storage
            .promote_generated(id, &self.worker_id)
            .await
            .map_err(at(Stage::StatusPromotion))?
        {
            return Err(StageFailure::lease_lost(Stage::StatusPromotion));
        }

        // Anything still staged failed optimization and is now lost.
        if let Err(e) = self.staging.purge(id) {
            warn!(error = %e, "could not purge staged uploads");
        }

        self.observer.stage_started(id, Stage::Notification);
        let notification = Notification {
            record_id: *id,
            business_name: record.business.name.clone(),
            preview_url: artifact.preview_url.clone(),
            login: Some(LoginDetails {
                principal_id: principal_id.clone(),
                contact_address: contact.clone(),
                credential,
            }),
        };
        let (delivered, attempted) = self.notify(&contact, &notification).await;

        Ok(PassSummary {
            record_id: *id,
            assets_optimized: tally.optimized,
            assets_lost: tally.lost,
            content_reused,
            palette_source: resolved.source,
            persisted,
            principal_id,
            preview_url: artifact.preview_url,
            notifications_delivered: delivered,
            notifications_attempted: attempted,
            elapsed: started.elapsed(),
        })
    }

    /// Optimize staged uploads not yet checkpointed. Each success is written
    /// to the record before the next upload starts.
    async fn optimize_assets(
        &self,
        record: &IntakeRecord,
    ) -> std::result::Result<AssetTally, StageFailure> {
        let id = &record.id;
        let mut assets = record.derived_assets.clone();
        let (mut optimized, mut lost) = (0, 0);

        let staged = match self.staging.pending(id) {
            Ok(staged) => staged,
            Err(e) => {
                warn!(error = %e, "cannot read staged uploads, continuing with checkpointed assets");
                Vec::new()
            }
        };

        for upload in &staged {
            if record.has_asset(&upload.key) {
                debug!(key = %upload.key, "asset already checkpointed");
                self.discard_staged(id, &upload.key);
                continue;
            }

            let reference = match self.collaborators.optimizer.optimize(id, upload).await {
                Ok(reference) => reference,
                Err(e) => {
                    warn!(
                        key = %upload.key,
                        purpose = %upload.purpose,
                        error = %e,
                        "asset optimization failed, continuing without it"
                    );
                    lost += 1;
                    continue;
                }
            };

            match self
                .storage
                .upsert_derived_asset(id, &self.worker_id, &reference)
                .await
            {
                Ok(true) => {
                    self.discard_staged(id, &upload.key);
                    assets.push(reference);
                    optimized += 1;
                }
                Ok(false) => return Err(StageFailure::lease_lost(Stage::AssetOptimization)),
                Err(e) => {
                    warn!(key = %upload.key, error = %e, "could not checkpoint optimized asset");
                    lost += 1;
                }
            }
        }

        assets.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(AssetTally {
            assets,
            optimized,
            lost,
        })
    }

    fn discard_staged(&self, id: &RecordId, key: &str) {
        if let Err(e) = self.staging.discard(id, key) {
            warn!(key, error = %e, "could not discard staged upload");
        }
    }

    async fn synthesize(
        &self,
        record: &IntakeRecord,
    ) -> std::result::Result<(NarrativeContent, bool), StageFailure> {
        if self.config.resume_from_checkpoints {
            if let Some(content) = &record.generated_content {
                debug!("reusing checkpointed content");
                return Ok((content.clone(), true));
            }
        }

        let content = self
            .collaborators
            .synthesizer
            .synthesize(&record.business)
            .await
            .map_err(at(Stage::ContentSynthesis))?;

        if !self
            .storage
            .set_generated_content(&record.id, &self.worker_id, &content)
            .await
            .map_err(at(Stage::ContentSynthesis))?
        {
            return Err(StageFailure::lease_lost(Stage::ContentSynthesis));
        }
        debug!(synthesizer = self.collaborators.synthesizer.name(), "content checkpointed");
        Ok((content, false))
    }

    /// Render and record the site artifact (not yet persisted).
    async fn render(
        &self,
        record: &IntakeRecord,
        narrative: &NarrativeContent,
        palette: &Palette,
        assets: &[OptimizedReference],
    ) -> std::result::Result<(RenderedSite, SiteArtifact), StageFailure> {
        let id = &record.id;
        let model = build_content_model(
            &record.business,
            narrative,
            palette,
            assets,
            &self.media_base(),
        );
        let theme = record.business.theme.unwrap_or_default();

        let site = self
            .collaborators
            .renderer
            .render(&model, theme)
            .map_err(at(Stage::Rendering))?;
        if site.is_empty() {
            return Err(StageFailure {
                stage: Stage::Rendering,
                error: SiteGenError::Render("renderer produced no files".into()),
            });
        }
        debug!(renderer = self.collaborators.renderer.name(), files = site.len(), %theme, "rendered");

        let artifact = SiteArtifact {
            record_id: *id,
            location: self.artifacts.location(id).display().to_string(),
            theme,
            palette: palette.clone(),
            preview_url: self.preview_url(id),
            files: file_entries(&site),
            persisted: false,
            rendered_at: Utc::now(),
        };
        self.storage
            .upsert_site_artifact(&artifact)
            .await
            .map_err(at(Stage::Rendering))?;

        Ok((site, artifact))
    }

    /// Write the file set to the artifact store. Failure is reported, not raised.
    async fn persist(&self, id: &RecordId, site: &RenderedSite) -> bool {
        match self.artifacts.write(id, site) {
            Ok(files) => {
                if let Err(e) = self.storage.mark_artifact_persisted(id, true).await {
                    error!(error = %e, "artifacts written but persisted flag not recorded");
                }
                debug!(files = files.len(), "artifacts persisted");
                true
            }
            Err(e) => {
                error!(
                    record_id = %id,
                    stage = %Stage::ArtifactPersistence,
                    error = %e,
                    "ARTIFACT PERSISTENCE FAILED: site rendered but not stored, recover with rerender"
                );
                false
            }
        }
    }

    /// Notify the submitter (with login) and each operator webhook (without).
    async fn notify(&self, contact: &str, notification: &Notification) -> (usize, usize) {
        let operator_copy = notification.without_login();
        let mut targets = vec![(NotificationChannel::Email(contact.to_string()), notification)];
        targets.extend(
            self.operator_webhooks
                .iter()
                .map(|url| (NotificationChannel::Webhook(url.clone()), &operator_copy)),
        );

        let attempted = targets.len();
        let mut delivered = 0;
        for (channel, payload) in &targets {
            if self.collaborators.notifier.notify(channel, payload).await {
                delivered += 1;
            } else {
                warn!(%channel, "notification not delivered");
            }
        }
        (delivered, attempted)
    }

    /// Re-render a GENERATED record from its checkpointed content, overwriting
    /// the previous artifact. Picks up payload edits (palette, theme, contact).
    #[instrument(skip(self), fields(record_id = %id))]
    pub async fn rerender(&self, id: &RecordId) -> Result<SiteArtifact> {
        let record = self
            .storage
            .get_record(id)
            .await?
            .ok_or_else(|| SiteGenError::not_found(format!("record {id}")))?;

        if record.status != RecordStatus::Generated {
            return Err(SiteGenError::validation(format!(
                "record {id} is {}; only generated records can be re-rendered",
                record.status
            )));
        }
        let narrative = record.generated_content.as_ref().ok_or_else(|| {
            SiteGenError::validation(format!("record {id} has no checkpointed content"))
        })?;

        let resolved = resolve_palette(
            &record.business,
            &record.derived_assets,
            self.collaborators.palette.as_ref(),
            &self.config.fallback_palette,
        )
        .await;

        let (site, mut artifact) = self
            .render(&record, narrative, &resolved.palette, &record.derived_assets)
            .await?;

        self.artifacts.write(id, &site)?;
        self.storage.mark_artifact_persisted(id, true).await?;
        artifact.persisted = true;

        info!(files = artifact.files.len(), "record re-rendered");
        Ok(artifact)
    }
}

fn file_entries(site: &RenderedSite) -> Vec<ArtifactFile> {
    site.iter()
        .map(|(filename, content)| ArtifactFile {
            filename: filename.to_string(),
            sha256: sha256_hex(content.as_bytes()),
            size_bytes: content.len(),
        })
        .collect()
}
