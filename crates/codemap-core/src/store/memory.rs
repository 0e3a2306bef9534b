use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::errors::CodemapResult;
use crate::models::{SymbolRecord, UploadId};
use crate::store::{normalize_records, not_analyzed, StoreEntry, SymbolStore};

/// Process-local symbol store. Readers get a shared snapshot of the record
/// vector, so a concurrent re-ingest never changes what they hold.
#[derive(Default)]
pub struct MemorySymbolStore {
    entries: RwLock<HashMap<UploadId, Arc<Vec<SymbolRecord>>>>,
}

impl MemorySymbolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SymbolStore for MemorySymbolStore {
    fn ingest(&self, upload_id: &UploadId, records: Vec<SymbolRecord>) -> CodemapResult<StoreEntry> {
        let records = Arc::new(normalize_records(records));
        debug!(upload_id = %upload_id, records = records.len(), "ingested into memory store");
        self.entries
            .write()
            .insert(upload_id.clone(), Arc::clone(&records));
        Ok(StoreEntry {
            upload_id: upload_id.clone(),
            records,
        })
    }

    fn get(&self, upload_id: &UploadId) -> CodemapResult<StoreEntry> {
        let records = self
            .entries
            .read()
            .get(upload_id)
            .cloned()
            .ok_or_else(|| not_analyzed(upload_id))?;
        Ok(StoreEntry {
            upload_id: upload_id.clone(),
            records,
        })
    }

    fn remove(&self, upload_id: &UploadId) -> CodemapResult<bool> {
        Ok(self.entries.write().remove(upload_id).is_some())
    }

    fn upload_ids(&self) -> CodemapResult<Vec<UploadId>> {
        let mut ids: Vec<UploadId> = self.entries.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn contains(&self, upload_id: &UploadId) -> bool {
        self.entries.read().contains_key(upload_id)
    }
}
