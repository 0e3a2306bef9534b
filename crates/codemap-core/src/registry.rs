//! Table of known uploads and their lifecycle state.
//!
//! The registry is the arbiter between deletion and everything else: an
//! upload is either live (visible to readers), being deleted, or doomed
//! (deletion failed and will be retried). Only live uploads are visible.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::errors::{CodemapError, CodemapResult};
use crate::indexer::pipeline::CancelFlag;
use crate::models::{Upload, UploadId, UploadStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Live,
    Deleting,
    Doomed,
}

struct Slot {
    upload: Upload,
    state: SlotState,
    analysis: Option<CancelFlag>,
}

/// Point-in-time view of one registered upload, used by the retention sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub id: UploadId,
    pub created_at: DateTime<Utc>,
    pub state: SlotState,
}

#[derive(Default)]
pub struct UploadRegistry {
    slots: RwLock<HashMap<UploadId, Slot>>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, upload: Upload) {
        self.slots.write().insert(
            upload.id.clone(),
            Slot {
                upload,
                state: SlotState::Live,
                analysis: None,
            },
        );
    }

    pub fn get(&self, id: &UploadId) -> Option<Upload> {
        self.slots
            .read()
            .get(id)
            .filter(|slot| slot.state == SlotState::Live)
            .map(|slot| slot.upload.clone())
    }

    /// Live uploads, oldest first.
    pub fn list(&self) -> Vec<Upload> {
        let mut uploads: Vec<Upload> = self
            .slots
            .read()
            .values()
            .filter(|slot| slot.state == SlotState::Live)
            .map(|slot| slot.upload.clone())
            .collect();
        uploads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        uploads
    }

    /// Whether the id is known in any state.
    pub fn is_registered(&self, id: &UploadId) -> bool {
        self.slots.read().contains_key(id)
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        let mut snapshot: Vec<SlotSnapshot> = self
            .slots
            .read()
            .iter()
            .map(|(id, slot)| SlotSnapshot {
                id: id.clone(),
                created_at: slot.upload.created_at,
                state: slot.state,
            })
            .collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    /// Run `f` on the upload under the registry lock, only while it is live.
    pub fn with_live<T>(&self, id: &UploadId, f: impl FnOnce(&mut Upload) -> T) -> Option<T> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(id).filter(|slot| slot.state == SlotState::Live)?;
        Some(f(&mut slot.upload))
    }

    /// Mark the start of an analysis and hand out its cancel flag.
    pub fn begin_analysis(&self, id: &UploadId) -> CodemapResult<CancelFlag> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(id)
            .filter(|slot| slot.state == SlotState::Live)
            .ok_or_else(|| CodemapError::NotFound(format!("upload {id}")))?;
        if slot.upload.status == UploadStatus::Extracting {
            return Err(CodemapError::Busy(format!("upload {id} is still extracting")));
        }
        if slot.analysis.is_some() {
            return Err(CodemapError::Busy(format!("upload {id} is already being analyzed")));
        }
        let flag = CancelFlag::new();
        slot.analysis = Some(flag.clone());
        Ok(flag)
    }

    pub fn finish_analysis(&self, id: &UploadId) {
        if let Some(slot) = self.slots.write().get_mut(id) {
            slot.analysis = None;
        }
    }

    /// Cancel a running analysis. `false` when none is running.
    pub fn cancel_analysis(&self, id: &UploadId) -> bool {
        let slots = self.slots.read();
        match slots.get(id).and_then(|slot| slot.analysis.as_ref()) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    /// Atomically move a live or doomed upload into `Deleting`. Returns
    /// `None` when the upload is unknown or another deletion owns it. Any
    /// running analysis is cancelled.
    pub fn claim_for_deletion(&self, id: &UploadId) -> Option<Upload> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(id)?;
        if slot.state == SlotState::Deleting {
            return None;
        }
        slot.state = SlotState::Deleting;
        if let Some(flag) = &slot.analysis {
            flag.cancel();
        }
        Some(slot.upload.clone())
    }

    /// Deletion failed: keep the slot hidden and eligible for the next sweep.
    pub fn defer_deletion(&self, id: &UploadId) {
        if let Some(slot) = self.slots.write().get_mut(id) {
            slot.state = SlotState::Doomed;
        }
    }

    pub fn finish_deletion(&self, id: &UploadId) {
        self.slots.write().remove(id);
    }
}
