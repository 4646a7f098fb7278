//! Default implementations of the pipeline's stage collaborators.
//!
//! Everything here plugs into `sitegen-core` through its collaborator traits;
//! the orchestrator never depends on this crate.

pub mod identity;
pub mod notify;
pub mod optimizer;
pub mod palette;
pub mod synthesis;

pub use identity::{StoreIdentityProvisioner, normalize_contact};
pub use notify::{HttpNotifier, LogNotifier};
pub use optimizer::{ImageFormat, LocalImageOptimizer};
pub use palette::{SvgPaletteExtractor, palette_from_svg};
pub use synthesis::{OpenRouterSynthesizer, TemplateSynthesizer};
