//! Incremental garbage collection of unreferenced asset records.
//!
//! A pass lists every record once, then walks the listing in bounded chunks.
//! Each chunk recomputes the live-reference set from the scene, both history
//! stacks and every open batch, so a reference that appears while the pass is
//! in flight still protects its record. A record is deleted only when nothing
//! references it and it is older than the grace period. Passes are throttled:
//! a new one does not start within `min_interval` of the previous start.

use crate::assets::AssetStore;
use crate::error::Result;
use crate::history::HistoryManager;
use crate::scene::Scene;
use crate::types::{AssetId, AssetInfo, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default age an unreferenced record must reach before deletion.
pub const DEFAULT_GC_GRACE: Duration = Duration::from_secs(10 * 60);

/// Default minimum time between pass starts.
pub const DEFAULT_GC_MIN_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Default number of records examined per step.
pub const DEFAULT_GC_CHUNK_SIZE: usize = 200;

/// Collector configuration.
#[derive(Clone, Copy, Debug)]
pub struct GcConfig {
    pub grace: Duration,
    pub min_interval: Duration,
    pub chunk_size: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GC_GRACE,
            min_interval: DEFAULT_GC_MIN_INTERVAL,
            chunk_size: DEFAULT_GC_CHUNK_SIZE,
        }
    }
}

/// Counters for one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcStats {
    pub scanned: usize,
    pub deleted: usize,
    /// Kept because something references them.
    pub retained_live: usize,
    /// Unreferenced but still inside the grace period.
    pub retained_young: usize,
    /// Deletes that failed; the records stay for the next pass.
    pub failures: usize,
}

/// Result of one [`GarbageCollector::step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcProgress {
    /// No pass in flight.
    Idle,
    /// More chunks remain.
    InProgress { scanned: usize, total: usize },
    /// The pass finished.
    Completed(GcStats),
}

#[derive(Debug)]
struct GcPass {
    rows: Vec<AssetInfo>,
    cursor: usize,
    cutoff: Timestamp,
    stats: GcStats,
}

/// Every store key the board can still reach.
pub fn live_references(scene: &dyn Scene, history: &HistoryManager) -> HashSet<AssetId> {
    let mut refs: HashSet<AssetId> = scene
        .enumerate_entities(None)
        .iter()
        .filter_map(|entity| entity.asset_key().copied())
        .collect();
    refs.extend(history.referenced_assets().copied());
    refs
}

/// Drives throttled, chunked passes over the asset store.
#[derive(Debug, Default)]
pub struct GarbageCollector {
    config: GcConfig,
    last_pass_started: Option<Timestamp>,
    pass: Option<GcPass>,
}

impl GarbageCollector {
    pub fn new(config: GcConfig) -> Self {
        Self {
            config,
            last_pass_started: None,
            pass: None,
        }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn last_pass_started(&self) -> Option<Timestamp> {
        self.last_pass_started
    }

    pub fn is_running(&self) -> bool {
        self.pass.is_some()
    }

    /// Whether the throttle allows a pass to start at `now`.
    pub fn may_start(&self, now: Timestamp) -> bool {
        match self.last_pass_started {
            Some(last) => now.since(last) >= self.config.min_interval,
            None => true,
        }
    }

    /// Start a pass if none is running and the throttle allows it.
    ///
    /// The attempt counts toward the throttle even if listing fails, so a
    /// broken store is not hammered on every save.
    pub fn begin_pass(&mut self, store: &dyn AssetStore, now: Timestamp) -> Result<bool> {
        if self.pass.is_some() || !self.may_start(now) {
            debug!("gc pass throttled");
            return Ok(false);
        }
        self.start(store, now)
    }

    /// Start a pass ignoring the throttle. No-op while a pass is running.
    pub fn begin_forced_pass(&mut self, store: &dyn AssetStore, now: Timestamp) -> Result<bool> {
        if self.pass.is_some() {
            return Ok(false);
        }
        self.start(store, now)
    }

    fn start(&mut self, store: &dyn AssetStore, now: Timestamp) -> Result<bool> {
        self.last_pass_started = Some(now);
        let rows = store.list_all()?;
        info!(records = rows.len(), "gc pass started");
        self.pass = Some(GcPass {
            rows,
            cursor: 0,
            cutoff: now.before(self.config.grace),
            stats: GcStats::default(),
        });
        Ok(true)
    }

    /// Examine the next chunk of the current pass.
    pub fn step(
        &mut self,
        scene: &dyn Scene,
        history: &HistoryManager,
        store: &dyn AssetStore,
    ) -> GcProgress {
        let chunk_size = self.config.chunk_size.max(1);
        let Some(pass) = self.pass.as_mut() else {
            return GcProgress::Idle;
        };

        let refs = live_references(scene, history);
        let end = (pass.cursor + chunk_size).min(pass.rows.len());

        for row in &pass.rows[pass.cursor..end] {
            pass.stats.scanned += 1;
            if refs.contains(&row.id) {
                pass.stats.retained_live += 1;
            } else if row.created_at < pass.cutoff {
                match store.delete(&row.id) {
                    Ok(true) => {
                        debug!(asset = %row.id, "gc deleted asset");
                        pass.stats.deleted += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(asset = %row.id, error = %e, "gc delete failed");
                        pass.stats.failures += 1;
                    }
                }
            } else {
                pass.stats.retained_young += 1;
            }
        }
        pass.cursor = end;

        if pass.cursor < pass.rows.len() {
            return GcProgress::InProgress {
                scanned: pass.cursor,
                total: pass.rows.len(),
            };
        }

        let stats = pass.stats;
        self.pass = None;
        info!(
            scanned = stats.scanned,
            deleted = stats.deleted,
            retained_live = stats.retained_live,
            retained_young = stats.retained_young,
            failures = stats.failures,
            "gc pass finished"
        );
        GcProgress::Completed(stats)
    }

    /// Abandon the current pass, if any.
    pub fn abort(&mut self) {
        if self.pass.take().is_some() {
            debug!("gc pass aborted");
        }
    }

    /// Step the current pass until it completes.
    pub fn finish_pass(
        &mut self,
        scene: &dyn Scene,
        history: &HistoryManager,
        store: &dyn AssetStore,
    ) -> Option<GcStats> {
        loop {
            match self.step(scene, history, store) {
                GcProgress::Idle => return None,
                GcProgress::InProgress { .. } => continue,
                GcProgress::Completed(stats) => return Some(stats),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssetStore;
    use crate::entity::{AssetSource, EntityData, EntityDefaults, EntityRecord};
    use crate::types::AssetRecord;

    const NOW: Timestamp = Timestamp(100_000_000);

    fn old() -> Timestamp {
        NOW.before(DEFAULT_GC_GRACE + Duration::from_secs(1))
    }

    fn seed(store: &MemoryAssetStore, created_at: Timestamp) -> AssetId {
        let id = AssetId::generate();
        store
            .insert_record(AssetRecord {
                id,
                payload: vec![1, 2, 3],
                mime_type: "image/png".into(),
                created_at,
            })
            .unwrap();
        id
    }

    fn image(key: AssetId) -> EntityData {
        EntityData::image(AssetSource::StoreKey(key), 10.0, 10.0, &EntityDefaults::default())
    }

    fn run(gc: &mut GarbageCollector, scene: &dyn Scene, history: &HistoryManager, store: &MemoryAssetStore) -> GcStats {
        assert!(gc.begin_pass(store, NOW).unwrap());
        gc.finish_pass(scene, history, store).unwrap()
    }

    #[test]
    fn test_deletes_only_old_unreferenced() {
        let store = MemoryAssetStore::new();
        let mut scene = crate::scene::MemoryScene::new();
        let history = HistoryManager::default();

        let live = seed(&store, old());
        let orphan = seed(&store, old());
        let young = seed(&store, NOW.before(Duration::from_secs(60)));
        scene.insert_entity_at(image(live), 0).unwrap();

        let mut gc = GarbageCollector::default();
        let stats = run(&mut gc, &scene, &history, &store);

        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.retained_live, 1);
        assert_eq!(stats.retained_young, 1);
        assert!(store.contains(&live).unwrap());
        assert!(!store.contains(&orphan).unwrap());
        assert!(store.contains(&young).unwrap());
    }

    #[test]
    fn test_history_references_protect_records() {
        let store = MemoryAssetStore::new();
        let mut scene = crate::scene::MemoryScene::new();
        let mut history = HistoryManager::default();

        let key = seed(&store, old());
        let entity = image(key);
        scene.insert_entity_at(entity.clone(), 0).unwrap();
        history.record_add(EntityRecord::new(entity, 0), None, NOW);
        history.undo(&mut scene);
        assert!(scene.is_empty());

        let mut gc = GarbageCollector::default();
        let stats = run(&mut gc, &scene, &history, &store);
        assert_eq!(stats.deleted, 0);
        assert!(store.contains(&key).unwrap());
    }

    #[test]
    fn test_throttle() {
        let store = MemoryAssetStore::new();
        let scene = crate::scene::MemoryScene::new();
        let history = HistoryManager::default();
        let mut gc = GarbageCollector::default();

        run(&mut gc, &scene, &history, &store);
        let soon = NOW.after(Duration::from_secs(30));
        assert!(!gc.begin_pass(&store, soon).unwrap());
        assert!(gc.begin_forced_pass(&store, soon).unwrap());
        gc.abort();

        let later = soon.after(DEFAULT_GC_MIN_INTERVAL);
        assert!(gc.begin_pass(&store, later).unwrap());
    }

    #[test]
    fn test_chunked_steps() {
        let store = MemoryAssetStore::new();
        let scene = crate::scene::MemoryScene::new();
        let history = HistoryManager::default();
        for _ in 0..5 {
            seed(&store, old());
        }

        let mut gc = GarbageCollector::new(GcConfig {
            chunk_size: 2,
            ..Default::default()
        });
        assert!(gc.begin_pass(&store, NOW).unwrap());
        assert_eq!(
            gc.step(&scene, &history, &store),
            GcProgress::InProgress { scanned: 2, total: 5 }
        );
        assert_eq!(store.len(), 3);
        assert_eq!(
            gc.step(&scene, &history, &store),
            GcProgress::InProgress { scanned: 4, total: 5 }
        );
        let GcProgress::Completed(stats) = gc.step(&scene, &history, &store) else {
            panic!("expected completed pass");
        };
        assert_eq!(stats.deleted, 5);
        assert!(store.is_empty());
        assert_eq!(gc.step(&scene, &history, &store), GcProgress::Idle);
    }

    #[test]
    fn test_reference_added_mid_pass_is_honoured() {
        let store = MemoryAssetStore::new();
        let mut scene = crate::scene::MemoryScene::new();
        let history = HistoryManager::default();
        let first = seed(&store, old());
        let second = seed(&store, old());

        let mut gc = GarbageCollector::new(GcConfig {
            chunk_size: 1,
            ..Default::default()
        });
        assert!(gc.begin_pass(&store, NOW).unwrap());
        gc.step(&scene, &history, &store);

        // Whichever record the first chunk skipped gets referenced now.
        let survivor = if store.contains(&first).unwrap() { first } else { second };
        scene.insert_entity_at(image(survivor), 0).unwrap();
        gc.finish_pass(&scene, &history, &store);

        assert!(store.contains(&survivor).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_listing_failure_surfaces_and_throttles() {
        let store = MemoryAssetStore::new();
        store.set_available(false);
        let mut gc = GarbageCollector::default();

        assert!(gc.begin_pass(&store, NOW).unwrap_err().is_storage_failure());
        assert!(!gc.is_running());
        assert_eq!(gc.last_pass_started(), Some(NOW));
        assert!(!gc.may_start(NOW.after(Duration::from_secs(1))));
    }

    #[test]
    fn test_delete_failures_counted() {
        let store = MemoryAssetStore::new();
        let scene = crate::scene::MemoryScene::new();
        let history = HistoryManager::default();
        seed(&store, old());

        let mut gc = GarbageCollector::default();
        assert!(gc.begin_pass(&store, NOW).unwrap());
        store.set_available(false);
        let stats = gc.finish_pass(&scene, &history, &store).unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.deleted, 0);

        store.set_available(true);
        assert_eq!(store.len(), 1);
    }
}
