//! Generation pipeline for sitegen.
//!
//! Ties the record store, renderer and artifact store together: the stage
//! collaborator contracts, the orchestrator that drives one record through
//! them, and the dispatch triggers (inline + sweep) that decide when.

pub mod content;
pub mod credentials;
pub mod dispatch;
pub mod guard;
pub mod orchestrator;
pub mod palette;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use credentials::Credential;
pub use dispatch::{DispatchOutcome, Dispatcher, SweepReport};
pub use guard::{Claim, ClaimGuard};
pub use orchestrator::{
    Collaborators, Orchestrator, PassOutcome, PassSummary, SilentObserver, SkipReason,
    StageObserver,
};
pub use palette::{PaletteSource, ResolvedPalette};
pub use stages::{
    ContentSynthesizer, IdentityProvisioner, ImageOptimizer, LoginDetails, Notification,
    NotificationChannel, Notifier, PaletteExtractor, Stage,
};
