//! Assemble the renderer's [`ContentModel`] from a record's checkpointed data.

use sitegen_render::{ContactInfo, ContentModel, MediaRef};
use sitegen_shared::{AssetPurpose, BusinessPayload, NarrativeContent, OptimizedReference, Palette};

/// Build the content model. `media_base` is the public prefix optimized
/// assets are served under.
pub fn build_content_model(
    business: &BusinessPayload,
    narrative: &NarrativeContent,
    palette: &Palette,
    assets: &[OptimizedReference],
    media_base: &str,
) -> ContentModel {
    // Stable order: logo, hero, gallery; by key within each purpose.
    let mut ordered: Vec<&OptimizedReference> = assets.iter().collect();
    ordered.sort_by(|a, b| {
        purpose_rank(a.purpose)
            .cmp(&purpose_rank(b.purpose))
            .then_with(|| a.key.cmp(&b.key))
    });

    let media = ordered
        .into_iter()
        .map(|asset| MediaRef {
            purpose: asset.purpose,
            src: format!("{}/{}", media_base.trim_end_matches('/'), asset.uri),
            alt: format!("{} {}", business.name, asset.purpose),
        })
        .collect();

    ContentModel {
        business_name: business.name.clone(),
        narrative: narrative.clone(),
        palette: palette.clone(),
        media,
        contact: ContactInfo {
            email: business.contact_email.clone(),
            phone: business.phone.clone(),
            address: business.address.clone(),
            channels: business.channels.clone(),
        },
    }
}

fn purpose_rank(purpose: AssetPurpose) -> u8 {
    match purpose {
        AssetPurpose::Logo => 0,
        AssetPurpose::Hero => 1,
        AssetPurpose::Gallery => 2,
    }
}
