//! Shared types, error model, and configuration for sitegen.
//!
//! This crate is the foundation depended on by all other sitegen crates.
//! It provides:
//! - [`SiteGenError`], the unified error type
//! - Domain types ([`IntakeRecord`], [`SiteArtifact`], [`Palette`], [`RecordId`], ...)
//! - Configuration ([`AppConfig`], [`WorkerConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, AssetsConfig, DefaultsConfig, NotifyConfig, OpenRouterConfig, PaletteConfig,
    PreviewConfig, WorkerConfig, WorkerSettings, config_dir, config_file_path, init_config,
    load_config, load_config_from, resolve_api_key,
};
pub use error::{Result, SiteGenError};
pub use types::{
    ArtifactFile, AssetPurpose, BusinessPayload, Channel, CoarseStatus, IntakeRecord,
    NarrativeContent, NarrativeSection, OptimizedReference, Palette, Principal, RecordId,
    RecordStatus, SiteArtifact, Theme, UploadedAsset,
};
