//! Identity provisioner backed by the record store's principal table.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use sitegen_core::{Credential, IdentityProvisioner};
use sitegen_shared::{RecordId, Result, SiteGenError};
use sitegen_storage::Storage;

/// Upserts one principal per (normalized) contact address, storing only the
/// credential hash.
pub struct StoreIdentityProvisioner {
    storage: Arc<Storage>,
}

impl StoreIdentityProvisioner {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

/// Case-insensitive, whitespace-insensitive login identifier.
pub fn normalize_contact(contact: &str) -> Result<String> {
    let normalized = contact.trim().to_ascii_lowercase();
    match normalized.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(normalized),
        _ => Err(SiteGenError::validation(format!(
            "'{contact}' is not a usable login identifier"
        ))),
    }
}

#[async_trait]
impl IdentityProvisioner for StoreIdentityProvisioner {
    async fn provision(
        &self,
        contact_address: &str,
        credential: &Credential,
        record_id: &RecordId,
    ) -> Result<String> {
        let contact = normalize_contact(contact_address)?;
        let principal_id = self
            .storage
            .upsert_principal(&contact, &credential.hash(), record_id)
            .await?;
        info!(%principal_id, %record_id, "principal provisioned");
        Ok(principal_id)
    }
}
