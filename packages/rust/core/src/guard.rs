//! Process-local claim guard.
//!
//! Both dispatch triggers go through [`ClaimGuard`] before touching the
//! orchestrator, so two triggers firing for the same record within the same
//! instant produce one pass. Cross-process exclusion is the record store's
//! lease (`claimed_by`), not this guard.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use sitegen_shared::RecordId;

#[derive(Debug, Default)]
pub struct ClaimGuard {
    claimed: Mutex<HashSet<RecordId>>,
}

impl ClaimGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<RecordId>> {
        // The set stays consistent even if a holder panicked.
        self.claimed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically test-and-set the claim for `id`.
    pub fn try_acquire(&self, id: RecordId) -> bool {
        self.lock().insert(id)
    }

    pub fn release(&self, id: &RecordId) {
        self.lock().remove(id);
    }

    pub fn is_claimed(&self, id: &RecordId) -> bool {
        self.lock().contains(id)
    }

    /// Number of records currently claimed.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire a claim that is released when dropped, whatever the pass outcome.
    pub fn claim(self: &Arc<Self>, id: RecordId) -> Option<Claim> {
        self.try_acquire(id).then(|| Claim {
            guard: Arc::clone(self),
            id,
        })
    }
}

/// RAII claim on one record.
#[derive(Debug)]
pub struct Claim {
    guard: Arc<ClaimGuard>,
    id: RecordId,
}

impl Claim {
    pub fn record_id(&self) -> &RecordId {
        &self.id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.guard.release(&self.id);
    }
}
