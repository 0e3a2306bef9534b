//! Age-based cleanup of uploads and on-demand deletion.
//!
//! The manager never schedules itself: a driver calls [`RetentionManager::run_once`]
//! whenever [`RetentionManager::is_due`] says so.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RetentionPolicy;
use crate::models::UploadId;
use crate::registry::{SlotState, UploadRegistry};
use crate::storage::UploadStorage;
use crate::store::SymbolStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionFailure {
    pub upload_id: UploadId,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub deleted: Vec<UploadId>,
    pub failures: Vec<RetentionFailure>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// Directory removal failed; the upload is hidden and the next sweep
    /// retries.
    Deferred,
}

pub struct RetentionManager {
    policy: RetentionPolicy,
    storage: Arc<dyn UploadStorage>,
    store: Arc<dyn SymbolStore>,
    registry: Arc<UploadRegistry>,
}

impl RetentionManager {
    pub fn new(
        policy: RetentionPolicy,
        storage: Arc<dyn UploadStorage>,
        store: Arc<dyn SymbolStore>,
        registry: Arc<UploadRegistry>,
    ) -> Self {
        Self {
            policy,
            storage,
            store,
            registry,
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Whether a driver should sweep now. Always false when retention is
    /// disabled.
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        if !self.policy.enabled {
            return false;
        }
        match last_run {
            Some(last) => now - last >= self.policy.sweep_interval,
            None => true,
        }
    }

    fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - created_at > self.policy.max_age
    }

    /// One sweep: expired and previously deferred uploads, then storage
    /// roots no registry entry knows about. Failures are reported, never
    /// returned.
    pub fn run_once(&self, now: DateTime<Utc>) -> RetentionReport {
        let mut report = RetentionReport::default();

        for slot in self.registry.snapshot() {
            let eligible = match slot.state {
                SlotState::Deleting => false,
                SlotState::Doomed => true,
                SlotState::Live => self.is_expired(slot.created_at, now),
            };
            if !eligible || self.registry.claim_for_deletion(&slot.id).is_none() {
                continue;
            }
            match self.remove_claimed(&slot.id) {
                Ok(()) => report.deleted.push(slot.id),
                Err(message) => report.failures.push(RetentionFailure {
                    upload_id: slot.id,
                    message,
                }),
            }
        }

        self.sweep_orphans(now, &mut report);

        info!(
            deleted = report.deleted.len(),
            failures = report.failures.len(),
            "retention sweep finished"
        );
        report
    }

    fn sweep_orphans(&self, now: DateTime<Utc>, report: &mut RetentionReport) {
        let stored = match self.storage.uploads() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "cannot enumerate upload storage");
                return;
            }
        };
        for orphan in stored {
            if self.registry.is_registered(&orphan.id) || !self.is_expired(orphan.modified_at, now) {
                continue;
            }
            debug!(upload_id = %orphan.id, "removing unregistered upload root");
            match self.storage.remove(&orphan.id) {
                Ok(_) => {
                    if let Err(e) = self.store.remove(&orphan.id) {
                        warn!(upload_id = %orphan.id, error = %e, "orphan symbol removal failed");
                    }
                    report.deleted.push(orphan.id);
                }
                Err(e) => {
                    warn!(upload_id = %orphan.id, error = %e, "orphan removal failed");
                    report.failures.push(RetentionFailure {
                        upload_id: orphan.id,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Delete one upload now. Idempotent: an unknown or already deleted
    /// upload yields `NotFound`.
    pub fn delete(&self, upload_id: &UploadId) -> DeleteOutcome {
        if self.registry.claim_for_deletion(upload_id).is_none() {
            return DeleteOutcome::NotFound;
        }
        match self.remove_claimed(upload_id) {
            Ok(()) => DeleteOutcome::Deleted,
            Err(_) => DeleteOutcome::Deferred,
        }
    }

    /// Directory first; the symbol entry and registry slot go only after it
    /// is gone.
    fn remove_claimed(&self, upload_id: &UploadId) -> Result<(), String> {
        let outcome = self
            .storage
            .remove(upload_id)
            .and_then(|_| self.store.remove(upload_id));
        match outcome {
            Ok(_) => {
                self.registry.finish_deletion(upload_id);
                info!(upload_id = %upload_id, "upload deleted");
                Ok(())
            }
            Err(e) => {
                warn!(upload_id = %upload_id, error = %e, "upload removal failed, deferring");
                self.registry.defer_deletion(upload_id);
                Err(e.to_string())
            }
        }
    }
}
