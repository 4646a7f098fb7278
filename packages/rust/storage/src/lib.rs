//! Turso Embedded / libSQL record store.
//!
//! The [`Storage`] struct wraps a libSQL database holding intake records, their
//! derived-field checkpoints, rendered site metadata, and login principals.
//!
//! **Status rules:**
//! - Every status transition is a conditional `UPDATE` that reports whether it won.
//! - While a record is GENERATING, only the lease holder (`claimed_by`) may write
//!   its status or derived fields.

mod migrations;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use uuid::Uuid;

use sitegen_shared::{
    ArtifactFile, AssetPurpose, BusinessPayload, IntakeRecord, NarrativeContent,
    OptimizedReference, Palette, Principal, RecordId, RecordStatus, Result, SiteArtifact,
    SiteGenError, Theme,
};

const RECORD_COLUMNS: &str = "id, status, business_json, generated_content_json, attempts, \
     claimed_by, generating_since, last_failure_at, created_at, updated_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SiteGenError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (status/preview readers).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        SiteGenError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SiteGenError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Intake records
    // -----------------------------------------------------------------------

    /// Insert a new intake record in PENDING status.
    pub async fn insert_record(&self, business: &BusinessPayload) -> Result<IntakeRecord> {
        self.insert_record_with_id(RecordId::new(), business).await
    }

    /// Insert under an id chosen by the caller, so uploads can be staged
    /// before the record becomes visible to dispatch.
    pub async fn insert_record_with_id(
        &self,
        id: RecordId,
        business: &BusinessPayload,
    ) -> Result<IntakeRecord> {
        self.check_writable()?;
        business.validate()?;

        let now = Utc::now();
        let business_json = to_json(business)?;
        self.conn
            .execute(
                "INSERT INTO intake_records (id, status, business_json, attempts, created_at, updated_at)
                 VALUES (?1, 'pending', ?2, 0, ?3, ?3)",
                params![id.to_string(), business_json, timestamp(now)],
            )
            .await
            .map_err(db_err)?;

        tracing::debug!(record_id = %id, "intake record created");

        self.get_record(&id)
            .await?
            .ok_or_else(|| SiteGenError::Storage(format!("record {id} vanished after insert")))
    }

    /// Load a record with its derived assets.
    pub async fn get_record(&self, id: &RecordId) -> Result<Option<IntakeRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM intake_records WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![id.to_string()])
            .await
            .map_err(db_err)?;

        let mut record = match rows.next().await {
            Ok(Some(row)) => row_to_record(&row)?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(db_err(e)),
        };
        record.derived_assets = self.list_derived_assets(id).await?;
        Ok(Some(record))
    }

    /// List records, newest first, optionally filtered by status.
    pub async fn list_records(&self, status: Option<RecordStatus>) -> Result<Vec<IntakeRecord>> {
        let mut rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM intake_records WHERE status = ?1
                     ORDER BY created_at DESC, id DESC"
                );
                self.conn.query(&sql, params![status.as_str()]).await
            }
            None => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM intake_records ORDER BY created_at DESC, id DESC"
                );
                self.conn.query(&sql, params![]).await
            }
        }
        .map_err(db_err)?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(row_to_record(&row)?);
        }
        for record in &mut records {
            record.derived_assets = self.list_derived_assets(&record.id).await?;
        }
        Ok(records)
    }

    /// Oldest PENDING records first.
    pub async fn due_records(&self, limit: u32) -> Result<Vec<RecordId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM intake_records WHERE status = 'pending'
                 ORDER BY created_at, id LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(db_err)?;

        let mut ids = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let raw: String = row.get(0).map_err(db_err)?;
            ids.push(parse_record_id(&raw)?);
        }
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Status transitions
    // -----------------------------------------------------------------------

    /// PENDING → GENERATING. Takes the generation lease for `worker_id`.
    /// Returns `false` if the record was not PENDING.
    pub async fn begin_generation(
        &self,
        id: &RecordId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE intake_records
                 SET status = 'generating', claimed_by = ?2, generating_since = ?3,
                     attempts = attempts + 1, updated_at = ?4
                 WHERE id = ?1 AND status = 'pending'",
                params![
                    id.to_string(),
                    worker_id,
                    now.timestamp_millis(),
                    timestamp(now)
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// GENERATING → GENERATED, only for the lease holder.
    pub async fn promote_generated(&self, id: &RecordId, worker_id: &str) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE intake_records
                 SET status = 'generated', claimed_by = NULL, generating_since = NULL,
                     last_failure_at = NULL, updated_at = ?3
                 WHERE id = ?1 AND status = 'generating' AND claimed_by = ?2",
                params![id.to_string(), worker_id, timestamp(Utc::now())],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// GENERATING → PENDING, only for the lease holder. `failed` stamps
    /// `last_failure_at` so requesters see a failed attempt.
    pub async fn revert_to_pending(
        &self,
        id: &RecordId,
        worker_id: &str,
        failed: bool,
    ) -> Result<bool> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        let sql = if failed {
            "UPDATE intake_records
             SET status = 'pending', claimed_by = NULL, generating_since = NULL,
                 last_failure_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status = 'generating' AND claimed_by = ?2"
        } else {
            "UPDATE intake_records
             SET status = 'pending', claimed_by = NULL, generating_since = NULL,
                 updated_at = ?3
             WHERE id = ?1 AND status = 'generating' AND claimed_by = ?2"
        };
        let changed = self
            .conn
            .execute(sql, params![id.to_string(), worker_id, now])
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Return records stuck in GENERATING since before `cutoff` to PENDING.
    /// The abandoned pass counts as a failed attempt.
    pub async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<RecordId>> {
        self.check_writable()?;
        let cutoff_ms = cutoff.timestamp_millis();

        let mut rows = self
            .conn
            .query(
                "SELECT id FROM intake_records
                 WHERE status = 'generating' AND generating_since < ?1
                 ORDER BY generating_since",
                params![cutoff_ms],
            )
            .await
            .map_err(db_err)?;

        let mut candidates = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let raw: String = row.get(0).map_err(db_err)?;
            candidates.push(parse_record_id(&raw)?);
        }

        let now = timestamp(Utc::now());
        let mut reclaimed = Vec::new();
        for id in candidates {
            let changed = self
                .conn
                .execute(
                    "UPDATE intake_records
                     SET status = 'pending', claimed_by = NULL, generating_since = NULL,
                         last_failure_at = ?3, updated_at = ?3
                     WHERE id = ?1 AND status = 'generating' AND generating_since < ?2",
                    params![id.to_string(), cutoff_ms, now.as_str()],
                )
                .await
                .map_err(db_err)?;
            if changed == 1 {
                reclaimed.push(id);
            }
        }
        Ok(reclaimed)
    }

    /// GENERATED → PENDING so the next pass regenerates the site.
    pub async fn requeue(&self, id: &RecordId) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE intake_records SET status = 'pending', updated_at = ?2
                 WHERE id = ?1 AND status = 'generated'",
                params![id.to_string(), timestamp(Utc::now())],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    // -----------------------------------------------------------------------
    // Derived-field checkpoints (lease holder only)
    // -----------------------------------------------------------------------

    /// Checkpoint one optimized asset. Returns `false` if `worker_id` no longer
    /// holds the lease.
    pub async fn upsert_derived_asset(
        &self,
        id: &RecordId,
        worker_id: &str,
        asset: &OptimizedReference,
    ) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "INSERT INTO derived_assets
                   (record_id, asset_key, purpose, uri, content_type, size_bytes, sha256, created_at)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                 WHERE EXISTS (
                   SELECT 1 FROM intake_records
                   WHERE id = ?1 AND status = 'generating' AND claimed_by = ?9
                 )
                 ON CONFLICT(record_id, asset_key) DO UPDATE SET
                   purpose = excluded.purpose,
                   uri = excluded.uri,
                   content_type = excluded.content_type,
                   size_bytes = excluded.size_bytes,
                   sha256 = excluded.sha256",
                params![
                    id.to_string(),
                    asset.key.as_str(),
                    asset.purpose.as_str(),
                    asset.uri.as_str(),
                    asset.content_type.as_str(),
                    asset.size_bytes as i64,
                    asset.sha256.as_str(),
                    timestamp(Utc::now()),
                    worker_id,
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Optimized assets for a record, in key order.
    pub async fn list_derived_assets(&self, id: &RecordId) -> Result<Vec<OptimizedReference>> {
        let mut rows = self
            .conn
            .query(
                "SELECT asset_key, purpose, uri, content_type, size_bytes, sha256
                 FROM derived_assets WHERE record_id = ?1 ORDER BY asset_key",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut assets = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let purpose: String = row.get(1).map_err(db_err)?;
            assets.push(OptimizedReference {
                key: row.get(0).map_err(db_err)?,
                purpose: purpose.parse::<AssetPurpose>()?,
                uri: row.get(2).map_err(db_err)?,
                content_type: row.get(3).map_err(db_err)?,
                size_bytes: row.get::<i64>(4).map_err(db_err)? as u64,
                sha256: row.get(5).map_err(db_err)?,
            });
        }
        Ok(assets)
    }

    /// Checkpoint synthesized content. Returns `false` without the lease.
    pub async fn set_generated_content(
        &self,
        id: &RecordId,
        worker_id: &str,
        content: &NarrativeContent,
    ) -> Result<bool> {
        self.check_writable()?;
        let json = to_json(content)?;
        let changed = self
            .conn
            .execute(
                "UPDATE intake_records SET generated_content_json = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'generating' AND claimed_by = ?2",
                params![id.to_string(), worker_id, json, timestamp(Utc::now())],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Drop checkpointed content so the next synthesis starts fresh.
    pub async fn clear_generated_content(&self, id: &RecordId, worker_id: &str) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE intake_records SET generated_content_json = NULL, updated_at = ?3
                 WHERE id = ?1 AND status = 'generating' AND claimed_by = ?2",
                params![id.to_string(), worker_id, timestamp(Utc::now())],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    // -----------------------------------------------------------------------
    // Site artifacts
    // -----------------------------------------------------------------------

    /// Create or overwrite the site artifact for a record.
    pub async fn upsert_site_artifact(&self, artifact: &SiteArtifact) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO site_artifacts
                   (record_id, location, theme, palette_json, preview_url, files_json, persisted, rendered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(record_id) DO UPDATE SET
                   location = excluded.location,
                   theme = excluded.theme,
                   palette_json = excluded.palette_json,
                   preview_url = excluded.preview_url,
                   files_json = excluded.files_json,
                   persisted = excluded.persisted,
                   rendered_at = excluded.rendered_at",
                params![
                    artifact.record_id.to_string(),
                    artifact.location.as_str(),
                    artifact.theme.as_str(),
                    to_json(&artifact.palette)?,
                    artifact.preview_url.as_str(),
                    to_json(&artifact.files)?,
                    i64::from(artifact.persisted),
                    timestamp(artifact.rendered_at),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get the site artifact for a record, if one was rendered.
    pub async fn get_site_artifact(&self, id: &RecordId) -> Result<Option<SiteArtifact>> {
        let mut rows = self
            .conn
            .query(
                "SELECT record_id, location, theme, palette_json, preview_url, files_json,
                        persisted, rendered_at
                 FROM site_artifacts WHERE record_id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_site_artifact(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Record whether the file set reached the artifact store.
    pub async fn mark_artifact_persisted(&self, id: &RecordId, persisted: bool) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE site_artifacts SET persisted = ?2 WHERE record_id = ?1",
                params![id.to_string(), i64::from(persisted)],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Principals
    // -----------------------------------------------------------------------

    /// Insert or update the principal for `contact_address`. Returns the
    /// principal id, which is stable across repeated upserts.
    pub async fn upsert_principal(
        &self,
        contact_address: &str,
        credential_hash: &str,
        record_id: &RecordId,
    ) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO principals (id, contact_address, credential_hash, record_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(contact_address) DO UPDATE SET
                   credential_hash = excluded.credential_hash,
                   record_id = excluded.record_id,
                   updated_at = excluded.updated_at",
                params![
                    id.as_str(),
                    contact_address,
                    credential_hash,
                    record_id.to_string(),
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err)?;

        self.get_principal(contact_address)
            .await?
            .map(|p| p.id)
            .ok_or_else(|| {
                SiteGenError::Storage(format!("principal for {contact_address} missing after upsert"))
            })
    }

    /// Look up a principal by contact address.
    pub async fn get_principal(&self, contact_address: &str) -> Result<Option<Principal>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, contact_address, credential_hash, record_id, created_at, updated_at
                 FROM principals WHERE contact_address = ?1",
                params![contact_address],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record_id: String = row.get(3).map_err(db_err)?;
                let created_at: String = row.get(4).map_err(db_err)?;
                let updated_at: String = row.get(5).map_err(db_err)?;
                Ok(Some(Principal {
                    id: row.get(0).map_err(db_err)?,
                    contact_address: row.get(1).map_err(db_err)?,
                    credential_hash: row.get(2).map_err(db_err)?,
                    record_id: parse_record_id(&record_id)?,
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Total number of principals.
    pub async fn count_principals(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM principals", params![])
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(db_err)? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(db_err(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn db_err(e: libsql::Error) -> SiteGenError {
    SiteGenError::Storage(e.to_string())
}

/// Fixed-width UTC timestamp so text ordering matches time ordering.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SiteGenError::Storage(format!("invalid date '{s}': {e}")))
}

fn parse_record_id(s: &str) -> Result<RecordId> {
    s.parse()
        .map_err(|e| SiteGenError::Storage(format!("invalid record id '{s}': {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| SiteGenError::Storage(format!("JSON serialization failed: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| SiteGenError::Storage(format!("invalid {what}: {e}")))
}

/// Convert a database row to an [`IntakeRecord`] (derived assets loaded separately).
fn row_to_record(row: &libsql::Row) -> Result<IntakeRecord> {
    let id: String = row.get(0).map_err(db_err)?;
    let status: String = row.get(1).map_err(db_err)?;
    let business_json: String = row.get(2).map_err(db_err)?;
    let content_json: Option<String> = row.get::<String>(3).ok();
    let created_at: String = row.get(8).map_err(db_err)?;
    let updated_at: String = row.get(9).map_err(db_err)?;

    Ok(IntakeRecord {
        id: parse_record_id(&id)?,
        status: status.parse()?,
        business: from_json(&business_json, "business_json")?,
        derived_assets: Vec::new(),
        generated_content: content_json
            .as_deref()
            .map(|s| from_json(s, "generated_content_json"))
            .transpose()?,
        attempts: row.get::<u32>(4).map_err(db_err)?,
        claimed_by: row.get::<String>(5).ok(),
        generating_since: row
            .get::<i64>(6)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        last_failure_at: row
            .get::<String>(7)
            .ok()
            .map(|s| parse_timestamp(&s))
            .transpose()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_site_artifact(row: &libsql::Row) -> Result<SiteArtifact> {
    let record_id: String = row.get(0).map_err(db_err)?;
    let theme: String = row.get(2).map_err(db_err)?;
    let palette_json: String = row.get(3).map_err(db_err)?;
    let files_json: String = row.get(5).map_err(db_err)?;
    let rendered_at: String = row.get(7).map_err(db_err)?;

    Ok(SiteArtifact {
        record_id: parse_record_id(&record_id)?,
        location: row.get(1).map_err(db_err)?,
        theme: theme.parse::<Theme>()?,
        palette: from_json::<Palette>(&palette_json, "palette_json")?,
        preview_url: row.get(4).map_err(db_err)?,
        files: from_json::<Vec<ArtifactFile>>(&files_json, "files_json")?,
        persisted: row.get::<i64>(6).map_err(db_err)? != 0,
        rendered_at: parse_timestamp(&rendered_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("sg_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn payload() -> BusinessPayload {
        BusinessPayload::new("Harbor Bakery", "owner@harbor.test")
    }

    fn asset(key: &str) -> OptimizedReference {
        OptimizedReference {
            key: key.into(),
            purpose: AssetPurpose::Gallery,
            uri: format!("rec/{key}.png"),
            content_type: "image/png".into(),
            size_bytes: 2048,
            sha256: "abc123".into(),
        }
    }

    fn content() -> NarrativeContent {
        NarrativeContent {
            headline: "Fresh bread daily".into(),
            tagline: "Since 1998".into(),
            about: "A family bakery.".into(),
            sections: vec![],
            call_to_action: "Visit us".into(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("sg_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn insert_and_load_record() {
        let storage = test_storage().await;
        let record = storage.insert_record(&payload()).await.expect("insert");
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.attempts, 0);

        let loaded = storage.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.business.name, "Harbor Bakery");
        assert!(loaded.generated_content.is_none());
        assert!(loaded.claimed_by.is_none());

        assert!(storage.get_record(&RecordId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_with_caller_chosen_id() {
        let storage = test_storage().await;
        let id = RecordId::new();
        let record = storage
            .insert_record_with_id(id, &payload())
            .await
            .expect("insert");
        assert_eq!(record.id, id);
        assert_eq!(record.status, RecordStatus::Pending);

        assert!(storage.insert_record_with_id(id, &payload()).await.is_err());
    }

    #[tokio::test]
    async fn insert_rejects_invalid_payload() {
        let storage = test_storage().await;
        let result = storage
            .insert_record(&BusinessPayload::new("Harbor Bakery", "nobody"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn begin_generation_is_exclusive() {
        let storage = test_storage().await;
        let record = storage.insert_record(&payload()).await.unwrap();

        assert!(storage.begin_generation(&record.id, "w1", Utc::now()).await.unwrap());
        assert!(!storage.begin_generation(&record.id, "w2", Utc::now()).await.unwrap());

        let loaded = storage.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Generating);
        assert_eq!(loaded.claimed_by.as_deref(), Some("w1"));
        assert_eq!(loaded.attempts, 1);
        assert!(loaded.generating_since.is_some());
    }

    #[tokio::test]
    async fn only_lease_holder_transitions() {
        let storage = test_storage().await;
        let record = storage.insert_record(&payload()).await.unwrap();
        storage.begin_generation(&record.id, "w1", Utc::now()).await.unwrap();

        assert!(!storage.promote_generated(&record.id, "w2").await.unwrap());
        assert!(!storage.revert_to_pending(&record.id, "w2", true).await.unwrap());
        assert!(!storage.set_generated_content(&record.id, "w2", &content()).await.unwrap());
        assert!(!storage.upsert_derived_asset(&record.id, "w2", &asset("a")).await.unwrap());

        assert!(storage.promote_generated(&record.id, "w1").await.unwrap());
        let loaded = storage.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Generated);
        assert!(loaded.claimed_by.is_none());
    }

    #[tokio::test]
    async fn failed_revert_marks_failure() {
        let storage = test_storage().await;
        let record = storage.insert_record(&payload()).await.unwrap();
        storage.begin_generation(&record.id, "w1", Utc::now()).await.unwrap();

        assert!(storage.revert_to_pending(&record.id, "w1", true).await.unwrap());
        let loaded = storage.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Pending);
        assert!(loaded.last_failure_at.is_some());
        assert_eq!(loaded.coarse_status(), sitegen_shared::CoarseStatus::Failed);

        // A later success clears the failure marker.
        storage.begin_generation(&record.id, "w1", Utc::now()).await.unwrap();
        storage.promote_generated(&record.id, "w1").await.unwrap();
        let loaded = storage.get_record(&record.id).await.unwrap().unwrap();
        assert!(loaded.last_failure_at.is_none());
        assert_eq!(loaded.attempts, 2);
    }

    #[tokio::test]
    async fn reclaim_stale_generating_records() {
        let storage = test_storage().await;
        let stale = storage.insert_record(&payload()).await.unwrap();
        let fresh = storage.insert_record(&payload()).await.unwrap();

        let long_ago = Utc::now() - Duration::minutes(30);
        storage.begin_generation(&stale.id, "w1", long_ago).await.unwrap();
        storage.begin_generation(&fresh.id, "w2", Utc::now()).await.unwrap();

        let cutoff = Utc::now() - Duration::minutes(15);
        let reclaimed = storage.reclaim_stale(cutoff).await.unwrap();
        assert_eq!(reclaimed, vec![stale.id]);

        let loaded = storage.get_record(&stale.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Pending);
        assert!(loaded.claimed_by.is_none());

        // The abandoned worker can no longer write.
        assert!(!storage.promote_generated(&stale.id, "w1").await.unwrap());

        let loaded = storage.get_record(&fresh.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Generating);
    }

    #[tokio::test]
    async fn due_records_oldest_first() {
        let storage = test_storage().await;
        let first = storage.insert_record(&payload()).await.unwrap();
        let second = storage.insert_record(&payload()).await.unwrap();
        let third = storage.insert_record(&payload()).await.unwrap();
        storage.begin_generation(&second.id, "w1", Utc::now()).await.unwrap();

        let due = storage.due_records(10).await.unwrap();
        assert_eq!(due, vec![first.id, third.id]);

        let due = storage.due_records(1).await.unwrap();
        assert_eq!(due, vec![first.id]);
    }

    #[tokio::test]
    async fn derived_asset_checkpoints() {
        let storage = test_storage().await;
        let record = storage.insert_record(&payload()).await.unwrap();
        storage.begin_generation(&record.id, "w1", Utc::now()).await.unwrap();

        assert!(storage.upsert_derived_asset(&record.id, "w1", &asset("b")).await.unwrap());
        assert!(storage.upsert_derived_asset(&record.id, "w1", &asset("a")).await.unwrap());

        let updated = OptimizedReference {
            sha256: "def456".into(),
            ..asset("a")
        };
        assert!(storage.upsert_derived_asset(&record.id, "w1", &updated).await.unwrap());

        let loaded = storage.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.derived_assets.len(), 2);
        assert_eq!(loaded.derived_assets[0].key, "a");
        assert_eq!(loaded.derived_assets[0].sha256, "def456");
        assert!(loaded.has_asset("b"));
    }

    #[tokio::test]
    async fn generated_content_checkpoint() {
        let storage = test_storage().await;
        let record = storage.insert_record(&payload()).await.unwrap();
        storage.begin_generation(&record.id, "w1", Utc::now()).await.unwrap();

        assert!(storage.set_generated_content(&record.id, "w1", &content()).await.unwrap());
        let loaded = storage.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.generated_content, Some(content()));

        assert!(storage.clear_generated_content(&record.id, "w1").await.unwrap());
        let loaded = storage.get_record(&record.id).await.unwrap().unwrap();
        assert!(loaded.generated_content.is_none());
    }

    #[tokio::test]
    async fn requeue_generated_record() {
        let storage = test_storage().await;
        let record = storage.insert_record(&payload()).await.unwrap();
        assert!(!storage.requeue(&record.id).await.unwrap());

        storage.begin_generation(&record.id, "w1", Utc::now()).await.unwrap();
        storage.promote_generated(&record.id, "w1").await.unwrap();
        assert!(storage.requeue(&record.id).await.unwrap());

        let loaded = storage.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn site_artifact_upsert_overwrites() {
        let storage = test_storage().await;
        let record = storage.insert_record(&payload()).await.unwrap();

        let mut artifact = SiteArtifact {
            record_id: record.id,
            location: "/tmp/sites/x".into(),
            theme: Theme::Modern,
            palette: Palette::default_triple(),
            preview_url: "http://localhost/preview/x/index.html".into(),
            files: vec![ArtifactFile {
                filename: "index.html".into(),
                sha256: "aa".into(),
                size_bytes: 10,
            }],
            persisted: false,
            rendered_at: Utc::now(),
        };
        storage.upsert_site_artifact(&artifact).await.unwrap();

        artifact.theme = Theme::Bold;
        storage.upsert_site_artifact(&artifact).await.unwrap();
        storage.mark_artifact_persisted(&record.id, true).await.unwrap();

        let loaded = storage.get_site_artifact(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.theme, Theme::Bold);
        assert!(loaded.persisted);
        assert_eq!(loaded.files.len(), 1);

        assert!(storage.get_site_artifact(&RecordId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn principal_upsert_is_idempotent() {
        let storage = test_storage().await;
        let record = storage.insert_record(&payload()).await.unwrap();

        let first = storage
            .upsert_principal("owner@harbor.test", "hash-1", &record.id)
            .await
            .unwrap();
        let second = storage
            .upsert_principal("owner@harbor.test", "hash-2", &record.id)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(storage.count_principals().await.unwrap(), 1);
        let principal = storage.get_principal("owner@harbor.test").await.unwrap().unwrap();
        assert_eq!(principal.credential_hash, "hash-2");
    }

    #[tokio::test]
    async fn list_records_by_status() {
        let storage = test_storage().await;
        let a = storage.insert_record(&payload()).await.unwrap();
        let _b = storage.insert_record(&payload()).await.unwrap();
        storage.begin_generation(&a.id, "w1", Utc::now()).await.unwrap();

        assert_eq!(storage.list_records(None).await.unwrap().len(), 2);
        let generating = storage
            .list_records(Some(RecordStatus::Generating))
            .await
            .unwrap();
        assert_eq!(generating.len(), 1);
        assert_eq!(generating[0].id, a.id);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("sg_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_record(&payload()).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_records(None).await.unwrap().len(), 1);
        let result = ro.insert_record(&payload()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
