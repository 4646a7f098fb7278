//! SQL migration definitions for the sitegen record store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: intake_records, derived_assets, site_artifacts, principals",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per intake request; status is the single source of truth
CREATE TABLE IF NOT EXISTS intake_records (
    id                     TEXT PRIMARY KEY,
    status                 TEXT NOT NULL DEFAULT 'pending'
                           CHECK (status IN ('pending', 'generating', 'generated')),
    business_json          TEXT NOT NULL,
    generated_content_json TEXT,
    attempts               INTEGER NOT NULL DEFAULT 0,
    last_failure_at        TEXT,
    created_at             TEXT NOT NULL,
    updated_at             TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_status ON intake_records(status, created_at);

-- Optimized asset checkpoints
CREATE TABLE IF NOT EXISTS derived_assets (
    record_id    TEXT NOT NULL REFERENCES intake_records(id) ON DELETE CASCADE,
    asset_key    TEXT NOT NULL,
    purpose      TEXT NOT NULL,
    uri          TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes   INTEGER NOT NULL,
    sha256       TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    PRIMARY KEY (record_id, asset_key)
);

-- Rendered site metadata, one per record
CREATE TABLE IF NOT EXISTS site_artifacts (
    record_id    TEXT PRIMARY KEY REFERENCES intake_records(id) ON DELETE CASCADE,
    location     TEXT NOT NULL,
    theme        TEXT NOT NULL,
    palette_json TEXT NOT NULL,
    preview_url  TEXT NOT NULL,
    files_json   TEXT NOT NULL,
    persisted    INTEGER NOT NULL DEFAULT 0,
    rendered_at  TEXT NOT NULL
);

-- Login principals, unique per contact address
CREATE TABLE IF NOT EXISTS principals (
    id              TEXT PRIMARY KEY,
    contact_address TEXT NOT NULL UNIQUE,
    credential_hash TEXT NOT NULL,
    record_id       TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Generation lease: claimed_by + generating_since for stale reclaim",
            sql: r#"
ALTER TABLE intake_records ADD COLUMN claimed_by TEXT;
ALTER TABLE intake_records ADD COLUMN generating_since INTEGER;

CREATE INDEX IF NOT EXISTS idx_records_lease ON intake_records(status, generating_since);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
