//! The board context: scene, history, persistence and garbage collection.
//!
//! [`Board`] owns every piece of engine state and is the only place where
//! they meet. Hosts drive it from their single UI thread: call the mutation
//! entry points as input arrives, and call [`Board::pump`] whenever
//! [`Board::next_deadline`] has passed. Pumping commits timed-out batches,
//! runs the debounced save, and advances garbage collection one chunk per
//! pump so long passes never block input.

use crate::assets::AssetStore;
use crate::entity::{EntityData, EntityDefaults, EntityRecord, IMAGE_KIND};
use crate::error::{BoardError, Result};
use crate::events::{BoardEvent, EventBus};
use crate::gc::{GarbageCollector, GcConfig, GcProgress, GcStats};
use crate::history::{
    capture_removal, ActionKind, HistoryConfig, HistoryManager, HistoryOutcome, TransformTracker,
};
use crate::scene::{Scene, SceneSnapshot};
use crate::schedule::{TaskHandle, TaskQueue};
use crate::snapshot::{migrate_legacy, BoardSnapshot, DecodedScene};
use crate::types::{duration_ms, AssetId, AssetRecord, BatchToken, Clock, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Board configuration. Durations are (de)serialized as milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Maximum number of image entities on the board.
    pub max_entities: usize,

    /// Capacity of each history stack.
    pub history_limit: usize,

    #[serde(with = "duration_ms")]
    pub batch_timeout: Duration,

    /// Quiet period before a requested save is written.
    #[serde(with = "duration_ms")]
    pub save_debounce: Duration,

    /// Minimum age of an unreferenced asset before GC deletes it.
    #[serde(with = "duration_ms")]
    pub gc_grace: Duration,

    /// Minimum time between GC pass starts.
    #[serde(with = "duration_ms")]
    pub gc_min_interval: Duration,

    /// Delay between a GC request and the pass starting.
    #[serde(with = "duration_ms")]
    pub gc_start_delay: Duration,

    /// Records examined per GC step.
    pub gc_chunk_size: usize,

    pub entity_defaults: EntityDefaults,
}

impl Default for BoardConfig {
    fn default() -> Self {
        let history = HistoryConfig::default();
        let gc = GcConfig::default();
        Self {
            max_entities: 8,
            history_limit: history.limit,
            batch_timeout: history.batch_timeout,
            save_debounce: Duration::from_millis(400),
            gc_grace: gc.grace,
            gc_min_interval: gc.min_interval,
            gc_start_delay: Duration::from_millis(1500),
            gc_chunk_size: gc.chunk_size,
            entity_defaults: EntityDefaults::default(),
        }
    }
}

impl BoardConfig {
    /// Parse a (possibly partial) JSON config; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| BoardError::Deserialization(e.to_string()))
    }

    pub fn history(&self) -> HistoryConfig {
        HistoryConfig {
            limit: self.history_limit,
            batch_timeout: self.batch_timeout,
        }
    }

    pub fn gc(&self) -> GcConfig {
        GcConfig {
            grace: self.gc_grace,
            min_interval: self.gc_min_interval,
            chunk_size: self.gc_chunk_size,
        }
    }
}

/// What [`Board::load`] found and fixed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Entities in the scene after loading.
    pub entities: usize,
    /// The snapshot used the legacy inline layout.
    pub migrated: bool,
    /// Inline payloads moved into the asset store.
    pub moved_to_store: usize,
    /// Entities converted to a centred origin.
    pub normalized: usize,
    /// Entities whose store key had no record.
    pub missing_assets: usize,
    /// Images removed to get back under the limit.
    pub auto_removed: usize,
    /// A save was scheduled to persist the fixes.
    pub resave_scheduled: bool,
}

/// Deferred work owned by the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BoardTask {
    Save,
    GcStart,
    GcStep,
}

/// The engine context for one board.
pub struct Board<S: Scene> {
    scene: S,
    store: Arc<dyn AssetStore>,
    clock: Arc<dyn Clock>,
    config: BoardConfig,
    history: HistoryManager,
    tracker: TransformTracker,
    gc: GarbageCollector,
    tasks: TaskQueue<BoardTask>,
    save_handle: Option<TaskHandle>,
    gc_handle: Option<TaskHandle>,
    events: EventBus,
}

impl<S: Scene> Board<S> {
    /// Wrap `scene` and `store`. Call [`Board::load`] to restore a saved board.
    pub fn open(
        scene: S,
        store: Arc<dyn AssetStore>,
        clock: Arc<dyn Clock>,
        config: BoardConfig,
    ) -> Self {
        info!(max_entities = config.max_entities, "board opened");
        Self {
            history: HistoryManager::new(config.history()),
            gc: GarbageCollector::new(config.gc()),
            scene,
            store,
            clock,
            config,
            tracker: TransformTracker::new(),
            tasks: TaskQueue::new(),
            save_handle: None,
            gc_handle: None,
            events: EventBus::new(),
        }
    }

    // --- Accessors ---

    pub fn scene(&self) -> &S {
        &self.scene
    }

    /// Direct scene access for changes that bypass history (gesture updates).
    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn gc(&self) -> &GarbageCollector {
        &self.gc
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Copy of an entity currently on the board.
    pub fn entity(&self, id: &EntityId) -> Result<EntityData> {
        self.scene
            .get_entity(id)
            .ok_or(BoardError::EntityNotFound(*id))
    }

    pub fn save_pending(&self) -> bool {
        self.save_handle
            .is_some_and(|handle| self.tasks.is_pending(handle))
    }

    pub fn gc_pending(&self) -> bool {
        self.gc.is_running() || self.gc_handle.is_some_and(|handle| self.tasks.is_pending(handle))
    }

    // --- Loading ---

    /// Restore the persisted board into the scene.
    ///
    /// Legacy snapshots are migrated, origins normalized, missing assets
    /// flagged, and excess images removed as one undoable action. Garbage
    /// collection is scheduled afterwards.
    pub fn load(&mut self) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        let snapshot = match self.store.load_snapshot() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("no saved board");
                self.schedule_gc();
                return Ok(report);
            }
            Err(e) => {
                warn!(error = %e, "failed to load board snapshot");
                return Err(e);
            }
        };

        let mut scene = match snapshot.decode()? {
            DecodedScene::Current(scene) => scene,
            DecodedScene::Legacy(legacy) => {
                let migration = migrate_legacy(legacy, self.store.as_ref())?;
                report.migrated = true;
                report.moved_to_store = migration.moved_to_store;
                migration.scene
            }
        };

        let mut needs_resave = report.migrated;
        for entity in &mut scene.entities {
            if entity.normalize_origin() {
                report.normalized += 1;
                needs_resave = true;
            }
            if entity.source.is_none() && entity.is_image() && !entity.asset_missing {
                entity.asset_missing = true;
                needs_resave = true;
            }
            if let Some(key) = entity.asset_key().copied() {
                match self.store.contains(&key) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(entity = %entity.id, asset = %key, "asset missing on load");
                        entity.source = None;
                        entity.asset_missing = true;
                        report.missing_assets += 1;
                        needs_resave = true;
                        self.events.publish(BoardEvent::AssetMissing {
                            entity: Some(entity.id),
                            asset: key,
                        });
                    }
                    Err(e) => warn!(asset = %key, error = %e, "could not verify asset"),
                }
            }
        }

        self.tracker.cancel();
        self.history.clear();
        self.scene.deserialize_all(scene)?;

        report.auto_removed = self.enforce_limit();
        if report.auto_removed > 0 {
            needs_resave = true;
        }
        report.entities = self.scene.count(None);

        if needs_resave {
            self.schedule_save();
            report.resave_scheduled = true;
        }
        self.schedule_gc();

        info!(
            entities = report.entities,
            migrated = report.migrated,
            missing = report.missing_assets,
            auto_removed = report.auto_removed,
            "board loaded"
        );
        Ok(report)
    }

    /// Remove the earliest-added images beyond the limit.
    fn enforce_limit(&mut self) -> usize {
        let images = self.scene.enumerate_entities(Some(IMAGE_KIND));
        let max = self.config.max_entities;
        if images.len() <= max {
            return 0;
        }

        let excess: Vec<EntityId> = images
            .iter()
            .take(images.len() - max)
            .map(|entity| entity.id)
            .collect();
        let removed = capture_removal(&self.scene, &excess);
        for record in &removed {
            self.scene.remove_entity(&record.id());
        }

        let count = removed.len();
        self.history.push_auto_limit_remove(removed);
        warn!(removed = count, max, "image limit enforced");
        self.events
            .publish(BoardEvent::LimitEnforced { removed: count, max });
        count
    }

    // --- Capacity & assets ---

    /// How many more images fit on the board.
    pub fn capacity_left(&self) -> usize {
        self.config
            .max_entities
            .saturating_sub(self.scene.count(Some(IMAGE_KIND)))
    }

    /// Whether `count` more images fit. Publishes a notice when they don't.
    pub fn ensure_can_add(&self, count: usize) -> bool {
        if count <= self.capacity_left() {
            return true;
        }
        self.events.publish(BoardEvent::CapacityReached {
            max: self.config.max_entities,
        });
        false
    }

    /// Store an image payload and return its key.
    pub fn import_asset(&self, payload: &[u8], mime_type: &str) -> Result<AssetId> {
        self.store.put(payload, mime_type).map_err(|e| {
            warn!(error = %e, size = payload.len(), "asset import failed");
            e
        })
    }

    /// Fetch an asset's bytes. An absent record is reported as missing.
    pub fn resolve_asset(&self, id: &AssetId) -> Result<AssetRecord> {
        match self.store.get(id) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => {
                warn!(asset = %id, "asset missing");
                self.events.publish(BoardEvent::AssetMissing {
                    entity: None,
                    asset: *id,
                });
                Err(BoardError::AssetMissing(*id))
            }
            Err(e) => {
                warn!(asset = %id, error = %e, "asset fetch failed");
                Err(e)
            }
        }
    }

    // --- Mutations ---

    /// Open a batch for a multi-item drop or paste.
    pub fn begin_batch(&mut self, expected_count: usize) -> Result<BatchToken> {
        let now = self.clock.now();
        self.history.begin_batch(ActionKind::Add, expected_count, now)
    }

    /// Commit an open batch early.
    ///
    /// Returns `Ok(false)` when the batch was already committed, either by an
    /// earlier call or by its timeout. Tokens this board never issued are an
    /// error.
    pub fn finalize_batch(&mut self, token: BatchToken) -> Result<bool> {
        if !self.history.was_issued(token) {
            return Err(BoardError::UnknownBatch(token));
        }
        Ok(self.history.finalize_batch(token))
    }

    /// Append an entity to the scene and record it.
    ///
    /// Returns `Ok(false)` without touching anything when the board is full.
    pub fn add_entity(&mut self, entity: EntityData, token: Option<BatchToken>) -> Result<bool> {
        if entity.is_image() && self.capacity_left() == 0 {
            debug!(entity = %entity.id, "add refused, board full");
            self.events.publish(BoardEvent::CapacityReached {
                max: self.config.max_entities,
            });
            return Ok(false);
        }

        let index = self.scene.count(None);
        self.scene.insert_entity_at(entity.clone(), index)?;

        let now = self.clock.now();
        self.history
            .record_add(EntityRecord::new(entity, index), token, now);
        self.schedule_save();
        Ok(true)
    }

    /// Remove entities as one undoable action. Unknown ids are ignored.
    pub fn remove_entities(&mut self, ids: &[EntityId]) -> usize {
        let removed = capture_removal(&self.scene, ids);
        for record in &removed {
            self.scene.remove_entity(&record.id());
        }

        let count = removed.len();
        if count > 0 {
            self.history.push_remove(removed);
            self.schedule_save();
        }
        count
    }

    /// Start a transform gesture over `selection`.
    pub fn begin_transform(&mut self, selection: &[EntityId]) -> usize {
        self.tracker.begin(&self.scene, selection)
    }

    /// Finish the gesture. Returns true if a change was recorded.
    pub fn end_transform(&mut self) -> bool {
        let pushed = self.tracker.end(&self.scene, &mut self.history);
        if pushed {
            self.schedule_save();
        }
        pushed
    }

    pub fn transform_active(&self) -> bool {
        self.tracker.is_active()
    }

    // --- History ---

    pub fn undo(&mut self) -> HistoryOutcome {
        self.tracker.cancel();
        let outcome = self.history.undo(&mut self.scene);
        match outcome {
            HistoryOutcome::Undone(report) => {
                self.events
                    .publish(BoardEvent::Undone { kind: report.kind });
                self.schedule_save();
            }
            _ => self.events.publish(BoardEvent::NothingToUndo),
        }
        outcome
    }

    pub fn redo(&mut self) -> HistoryOutcome {
        self.tracker.cancel();
        let outcome = self.history.redo(&mut self.scene);
        match outcome {
            HistoryOutcome::Redone(report) => {
                self.events
                    .publish(BoardEvent::Redone { kind: report.kind });
                self.schedule_save();
            }
            _ => self.events.publish(BoardEvent::NothingToRedo),
        }
        outcome
    }

    // --- Persistence ---

    /// Request a save after the debounce period. Restarts a pending request.
    pub fn schedule_save(&mut self) {
        if let Some(handle) = self.save_handle.take() {
            self.tasks.cancel(handle);
        }
        let at = self.clock.now().after(self.config.save_debounce);
        self.save_handle = Some(self.tasks.schedule(at, BoardTask::Save));
    }

    /// Write the snapshot now, then schedule garbage collection.
    ///
    /// A failed save leaves the scene and history untouched.
    pub fn save_now(&mut self) -> Result<()> {
        if let Some(handle) = self.save_handle.take() {
            self.tasks.cancel(handle);
        }
        self.persist()?;
        self.schedule_gc();
        Ok(())
    }

    fn persist(&mut self) -> Result<usize> {
        let scene: SceneSnapshot = self.scene.serialize_all();
        let entities = scene.entities.len();
        let result = BoardSnapshot::from_scene(&scene)
            .and_then(|snapshot| self.store.save_snapshot(&snapshot));

        match result {
            Ok(()) => {
                debug!(entities, "board saved");
                self.events.publish(BoardEvent::Saved { entities });
                Ok(entities)
            }
            Err(e) => {
                warn!(error = %e, "board save failed");
                self.events.publish(BoardEvent::SaveFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Commit open batches and save immediately. No GC runs.
    pub fn shutdown(&mut self) -> Result<()> {
        let committed = self.history.finalize_all();
        self.tracker.cancel();
        self.gc.abort();
        self.tasks.clear();
        self.save_handle = None;
        self.gc_handle = None;

        let entities = self.persist()?;
        info!(entities, committed, "board shut down");
        Ok(())
    }

    // --- Scheduling ---

    /// Earliest time at which [`Board::pump`] has work to do.
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        match (self.history.next_deadline(), self.tasks.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run everything due now. Returns the number of tasks run.
    ///
    /// Tasks scheduled while pumping wait for the next pump, so each GC
    /// chunk is separated from the next by a return to the host.
    pub fn pump(&mut self) -> usize {
        let now = self.clock.now();
        let mut ran = self.history.fire_due(now).len();

        let barrier = self.tasks.barrier();
        while let Some((_, task)) = self.tasks.pop_due_before(now, barrier) {
            ran += 1;
            match task {
                BoardTask::Save => {
                    self.save_handle = None;
                    // Failures are logged and published by `persist`.
                    let _ = self.save_now();
                }
                BoardTask::GcStart => {
                    self.gc_handle = None;
                    self.start_gc(now);
                }
                BoardTask::GcStep => {
                    self.gc_handle = None;
                    self.step_gc(now);
                }
            }
        }
        ran
    }

    /// Plan a GC pass unless one is pending or the throttle forbids it.
    pub fn schedule_gc(&mut self) {
        let now = self.clock.now();
        if self.gc_pending() {
            return;
        }
        if !self.gc.may_start(now) {
            debug!("gc not scheduled, ran recently");
            return;
        }
        let at = now.after(self.config.gc_start_delay);
        self.gc_handle = Some(self.tasks.schedule(at, BoardTask::GcStart));
    }

    fn start_gc(&mut self, now: Timestamp) {
        match self.gc.begin_pass(self.store.as_ref(), now) {
            Ok(true) => {
                self.gc_handle = Some(self.tasks.schedule(now, BoardTask::GcStep));
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "gc pass could not start");
                self.events.publish(BoardEvent::GcFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn step_gc(&mut self, now: Timestamp) {
        match self
            .gc
            .step(&self.scene, &self.history, self.store.as_ref())
        {
            GcProgress::Idle => {}
            GcProgress::InProgress { .. } => {
                self.gc_handle = Some(self.tasks.schedule(now, BoardTask::GcStep));
            }
            GcProgress::Completed(stats) => {
                self.events.publish(BoardEvent::GcCompleted { stats });
            }
        }
    }

    /// Run a full GC pass to completion now, ignoring the throttle.
    pub fn run_gc_now(&mut self) -> Result<GcStats> {
        if let Some(handle) = self.gc_handle.take() {
            self.tasks.cancel(handle);
        }

        let now = self.clock.now();
        if let Err(e) = self.gc.begin_forced_pass(self.store.as_ref(), now) {
            warn!(error = %e, "gc pass could not start");
            self.events.publish(BoardEvent::GcFailed {
                reason: e.to_string(),
            });
            return Err(e);
        }

        let stats = self
            .gc
            .finish_pass(&self.scene, &self.history, self.store.as_ref())
            .unwrap_or_default();
        self.events.publish(BoardEvent::GcCompleted { stats });
        Ok(stats)
    }
}
