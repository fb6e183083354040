//! In-memory asset store.

use super::AssetStore;
use crate::error::{BoardError, Result};
use crate::snapshot::BoardSnapshot;
use crate::types::{AssetId, AssetInfo, AssetRecord, Clock, SystemClock};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Asset store backed by a map. Records are listed in id order.
pub struct MemoryAssetStore {
    records: RwLock<BTreeMap<AssetId, AssetRecord>>,
    snapshot: RwLock<Option<BoardSnapshot>>,
    clock: Arc<dyn Clock>,
    quota_bytes: Option<u64>,
    available: AtomicBool,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Stamp `created_at` from `clock` instead of the wall clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            snapshot: RwLock::new(None),
            clock,
            quota_bytes: None,
            available: AtomicBool::new(true),
        }
    }

    /// Limit the total payload bytes the store accepts.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Simulate the store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Insert a record verbatim, keeping its id and timestamp.
    pub fn insert_record(&self, record: AssetRecord) -> Result<()> {
        self.check_available()?;
        self.records.write().insert(record.id, record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Total payload bytes held.
    pub fn total_size(&self) -> u64 {
        self.records
            .read()
            .values()
            .map(|r| r.payload.len() as u64)
            .sum()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BoardError::StoreUnavailable("memory store is offline".into()))
        }
    }
}

impl Default for MemoryAssetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetStore for MemoryAssetStore {
    fn put(&self, payload: &[u8], mime_type: &str) -> Result<AssetId> {
        self.check_available()?;

        let mut records = self.records.write();
        if let Some(limit) = self.quota_bytes {
            let used: u64 = records.values().map(|r| r.payload.len() as u64).sum();
            let needed = used + payload.len() as u64;
            if needed > limit {
                return Err(BoardError::QuotaExceeded { needed, limit });
            }
        }

        let id = AssetId::generate();
        records.insert(
            id,
            AssetRecord {
                id,
                payload: payload.to_vec(),
                mime_type: mime_type.to_string(),
                created_at: self.clock.now(),
            },
        );
        Ok(id)
    }

    fn get(&self, id: &AssetId) -> Result<Option<AssetRecord>> {
        self.check_available()?;
        Ok(self.records.read().get(id).cloned())
    }

    fn contains(&self, id: &AssetId) -> Result<bool> {
        self.check_available()?;
        Ok(self.records.read().contains_key(id))
    }

    fn delete(&self, id: &AssetId) -> Result<bool> {
        self.check_available()?;
        Ok(self.records.write().remove(id).is_some())
    }

    fn list_all(&self) -> Result<Vec<AssetInfo>> {
        self.check_available()?;
        Ok(self.records.read().values().map(AssetRecord::info).collect())
    }

    fn save_snapshot(&self, snapshot: &BoardSnapshot) -> Result<()> {
        self.check_available()?;
        *self.snapshot.write() = Some(snapshot.clone());
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<BoardSnapshot>> {
        self.check_available()?;
        Ok(self.snapshot.read().clone())
    }
}
