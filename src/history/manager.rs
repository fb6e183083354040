//! Bounded undo/redo stacks and the batch commit protocol.

use super::action::{Action, ActionKind};
use crate::entity::{EntityRecord, PropsRecord};
use crate::error::{BoardError, Result};
use crate::scene::Scene;
use crate::schedule::{TaskHandle, TaskQueue};
use crate::types::{AssetId, BatchToken, EntityId, Timestamp};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of actions kept on each stack.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Default delay before an open batch commits on its own.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(4);

/// History configuration.
#[derive(Clone, Copy, Debug)]
pub struct HistoryConfig {
    /// Capacity of the undo and redo stacks.
    pub limit: usize,
    /// Auto-commit delay for open batches.
    pub batch_timeout: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_HISTORY_LIMIT,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }
}

/// A provisional add action that has not been committed yet.
#[derive(Debug)]
struct Batch {
    kind: ActionKind,
    items: Vec<EntityRecord>,
    expected: usize,
    remaining: usize,
    finalized: bool,
    timer: Option<TaskHandle>,
    deadline: Timestamp,
}

/// Read-only view of an open batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchStatus {
    pub token: BatchToken,
    pub expected: usize,
    pub remaining: usize,
    pub recorded: usize,
    pub deadline: Timestamp,
}

/// What happened to an item handed to [`HistoryManager::record_add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The batch is still waiting for more items.
    Pending { token: BatchToken, remaining: usize },
    /// The item completed a batch, which is now one undo entry.
    Committed { token: BatchToken },
}

/// Effect of one undo or redo step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayReport {
    pub kind: ActionKind,
    /// Entities removed, restored or re-transformed.
    pub affected: usize,
    /// Entities that could not be touched (already gone, or refused by the scene).
    pub skipped: usize,
}

/// Result of [`HistoryManager::undo`] / [`HistoryManager::redo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryOutcome {
    NothingToUndo,
    NothingToRedo,
    Undone(ReplayReport),
    Redone(ReplayReport),
}

impl HistoryOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, HistoryOutcome::Undone(_) | HistoryOutcome::Redone(_))
    }
}

/// Owns the undo/redo stacks and every open batch.
///
/// Stacks hold copies of entity data only. The manager mutates the scene
/// exclusively through the [`Scene`] trait during undo and redo.
#[derive(Debug)]
pub struct HistoryManager {
    config: HistoryConfig,
    undo: VecDeque<Action>,
    redo: VecDeque<Action>,
    batches: BTreeMap<BatchToken, Batch>,
    timers: TaskQueue<BatchToken>,
    next_token: u64,
}

impl HistoryManager {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            batches: BTreeMap::new(),
            timers: TaskQueue::new(),
            next_token: 1,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    // --- Batches ---

    /// Open a batch expecting `expected_count` items and arm its timeout.
    ///
    /// Only add batches exist; removals are always pushed whole.
    pub fn begin_batch(
        &mut self,
        kind: ActionKind,
        expected_count: usize,
        now: Timestamp,
    ) -> Result<BatchToken> {
        if kind != ActionKind::Add {
            return Err(BoardError::InvalidOperation(format!(
                "cannot batch {} actions",
                kind
            )));
        }

        let token = BatchToken(self.next_token);
        self.next_token += 1;

        let expected = expected_count.max(1);
        let deadline = now.after(self.config.batch_timeout);
        let timer = self.timers.schedule(deadline, token);

        self.batches.insert(
            token,
            Batch {
                kind,
                items: Vec::with_capacity(expected),
                expected,
                remaining: expected,
                finalized: false,
                timer: Some(timer),
                deadline,
            },
        );

        debug!(%token, expected, "batch opened");
        Ok(token)
    }

    /// Record an added entity.
    ///
    /// Without a token the item gets a one-item batch of its own. A token whose
    /// batch already committed (it timed out before this item arrived) also
    /// yields a standalone entry, so the add is never lost from history.
    pub fn record_add(
        &mut self,
        item: EntityRecord,
        token: Option<BatchToken>,
        now: Timestamp,
    ) -> RecordOutcome {
        let token = match token {
            Some(token) if self.batches.contains_key(&token) => token,
            Some(stale) => {
                debug!(token = %stale, entity = %item.id(), "late item for closed batch");
                self.open_add_batch(now)
            }
            None => self.open_add_batch(now),
        };

        let remaining = match self.batches.get_mut(&token) {
            Some(batch) => {
                batch.items.push(item);
                batch.remaining = batch.remaining.saturating_sub(1);
                batch.remaining
            }
            None => 0,
        };

        if remaining == 0 {
            self.finalize_batch(token);
            RecordOutcome::Committed { token }
        } else {
            RecordOutcome::Pending { token, remaining }
        }
    }

    /// Commit a batch as one `Add` action. Idempotent.
    ///
    /// Returns true if this call performed the finalization.
    pub fn finalize_batch(&mut self, token: BatchToken) -> bool {
        let Some(batch) = self.batches.get_mut(&token) else {
            return false;
        };
        if batch.finalized {
            return false;
        }
        batch.finalized = true;
        if let Some(timer) = batch.timer.take() {
            self.timers.cancel(timer);
        }

        let Some(batch) = self.batches.remove(&token) else {
            return false;
        };
        debug!(
            %token,
            recorded = batch.items.len(),
            expected = batch.expected,
            "batch finalized"
        );
        if !batch.items.is_empty() {
            debug_assert_eq!(batch.kind, ActionKind::Add);
            self.push(Action::Add { items: batch.items });
        }
        true
    }

    /// Finalize every batch whose timeout has elapsed, in timer order.
    pub fn fire_due(&mut self, now: Timestamp) -> Vec<BatchToken> {
        let mut fired = Vec::new();
        while let Some((_, token)) = self.timers.pop_due(now) {
            if let Some(batch) = self.batches.get_mut(&token) {
                // The timer already fired; nothing left to cancel.
                batch.timer = None;
            }
            if self.finalize_batch(token) {
                fired.push(token);
            }
        }
        fired
    }

    /// Earliest pending batch deadline.
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Finalize all open batches (shutdown path), oldest first.
    pub fn finalize_all(&mut self) -> usize {
        let tokens: Vec<_> = self.batches.keys().copied().collect();
        tokens
            .into_iter()
            .filter(|token| self.finalize_batch(*token))
            .count()
    }

    pub fn open_batches(&self) -> Vec<BatchStatus> {
        self.batches
            .iter()
            .map(|(token, batch)| BatchStatus {
                token: *token,
                expected: batch.expected,
                remaining: batch.remaining,
                recorded: batch.items.len(),
                deadline: batch.deadline,
            })
            .collect()
    }

    pub fn is_batch_open(&self, token: BatchToken) -> bool {
        self.batches.contains_key(&token)
    }

    /// Whether this manager ever handed out `token`, open or not.
    pub fn was_issued(&self, token: BatchToken) -> bool {
        token.0 >= 1 && token.0 < self.next_token
    }

    fn open_add_batch(&mut self, now: Timestamp) -> BatchToken {
        let token = BatchToken(self.next_token);
        self.next_token += 1;
        self.batches.insert(
            token,
            Batch {
                kind: ActionKind::Add,
                items: Vec::with_capacity(1),
                expected: 1,
                remaining: 1,
                finalized: false,
                timer: None,
                deadline: now,
            },
        );
        token
    }

    // --- Direct pushes ---

    /// Record a user removal. Empty removals are ignored.
    pub fn push_remove(&mut self, items: Vec<EntityRecord>) {
        if !items.is_empty() {
            self.push(Action::Remove { items });
        }
    }

    /// Record a removal made to enforce the entity limit.
    pub fn push_auto_limit_remove(&mut self, items: Vec<EntityRecord>) {
        if !items.is_empty() {
            self.push(Action::AutoLimitRemove { items });
        }
    }

    /// Record a transform. Empty transforms are ignored.
    pub fn push_transform(&mut self, before: Vec<PropsRecord>, after: Vec<PropsRecord>) {
        if !after.is_empty() {
            self.push(Action::Transform { before, after });
        }
    }

    /// Push a fresh action: evicts the oldest past the limit and clears redo.
    pub fn push(&mut self, action: Action) {
        self.push_undo(action);
        self.redo.clear();
    }

    fn push_undo(&mut self, action: Action) {
        self.undo.push_back(action);
        while self.undo.len() > self.config.limit {
            if let Some(evicted) = self.undo.pop_front() {
                debug!(kind = %evicted.kind(), "evicted oldest undo entry");
            }
        }
    }

    fn push_redo(&mut self, action: Action) {
        self.redo.push_back(action);
        while self.redo.len() > self.config.limit {
            self.redo.pop_front();
        }
    }

    // --- Undo / Redo ---

    /// Revert the most recent action.
    pub fn undo(&mut self, scene: &mut dyn Scene) -> HistoryOutcome {
        let Some(action) = self.undo.pop_back() else {
            return HistoryOutcome::NothingToUndo;
        };
        let kind = action.kind();

        let (affected, skipped) = match &action {
            Action::Add { items } => remove_items(scene, items),
            Action::Remove { items } | Action::AutoLimitRemove { items } => {
                restore_items(scene, items)
            }
            Action::Transform { before, .. } => apply_props(scene, before),
        };

        debug!(%kind, affected, skipped, "undo");
        self.push_redo(action);
        HistoryOutcome::Undone(ReplayReport {
            kind,
            affected,
            skipped,
        })
    }

    /// Re-apply the most recently undone action.
    pub fn redo(&mut self, scene: &mut dyn Scene) -> HistoryOutcome {
        let Some(action) = self.redo.pop_back() else {
            return HistoryOutcome::NothingToRedo;
        };
        let kind = action.kind();

        let (replayed, affected, skipped) = match action {
            Action::Add { items } => {
                let (affected, skipped) = restore_items(scene, &items);
                (Some(Action::Add { items }), affected, skipped)
            }
            Action::Remove { ref items } | Action::AutoLimitRemove { ref items } => {
                let ids: Vec<_> = items.iter().map(EntityRecord::id).collect();
                let fresh = capture_removal(&*scene, &ids);
                let skipped = ids.len() - fresh.len();
                for item in &fresh {
                    scene.remove_entity(&item.id());
                }
                let affected = fresh.len();
                let replayed = if fresh.is_empty() {
                    None
                } else if kind == ActionKind::Remove {
                    Some(Action::Remove { items: fresh })
                } else {
                    Some(Action::AutoLimitRemove { items: fresh })
                };
                (replayed, affected, skipped)
            }
            Action::Transform { before, after } => {
                let (affected, skipped) = apply_props(scene, &after);
                (Some(Action::Transform { before, after }), affected, skipped)
            }
        };

        if let Some(action) = replayed {
            self.push_undo(action);
        }

        debug!(%kind, affected, skipped, "redo");
        HistoryOutcome::Redone(ReplayReport {
            kind,
            affected,
            skipped,
        })
    }

    // --- Inspection ---

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Undo stack, oldest first.
    pub fn undo_stack(&self) -> impl Iterator<Item = &Action> + '_ {
        self.undo.iter()
    }

    /// Redo stack, oldest first.
    pub fn redo_stack(&self) -> impl Iterator<Item = &Action> + '_ {
        self.redo.iter()
    }

    /// Store keys reachable from either stack or any open batch.
    pub fn referenced_assets(&self) -> impl Iterator<Item = &AssetId> + '_ {
        let stacked = self
            .undo
            .iter()
            .chain(self.redo.iter())
            .flat_map(|action| action.asset_keys());
        let pending = self
            .batches
            .values()
            .flat_map(|batch| batch.items.iter())
            .filter_map(|item| item.entity.asset_key());
        stacked.chain(pending)
    }

    /// Drop all history and open batches.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.batches.clear();
        self.timers.clear();
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

/// Copy the entities about to be removed, ordered by their current index.
///
/// Indices are captured before anything is removed, so restoring the records
/// in order puts every entity back at its original position.
pub fn capture_removal(scene: &dyn Scene, ids: &[EntityId]) -> Vec<EntityRecord> {
    let mut records: Vec<EntityRecord> = Vec::with_capacity(ids.len());
    for id in ids {
        if records.iter().any(|r| &r.id() == id) {
            continue;
        }
        if let (Some(index), Some(entity)) = (scene.index_of(id), scene.get_entity(id)) {
            records.push(EntityRecord::new(entity, index));
        }
    }
    records.sort_by_key(|r| r.index);
    records
}

fn remove_items(scene: &mut dyn Scene, items: &[EntityRecord]) -> (usize, usize) {
    let mut affected = 0;
    for item in items {
        if scene.remove_entity(&item.id()).is_some() {
            affected += 1;
        }
    }
    (affected, items.len() - affected)
}

fn restore_items(scene: &mut dyn Scene, items: &[EntityRecord]) -> (usize, usize) {
    let mut affected = 0;
    for item in items {
        if scene.contains(&item.id()) {
            continue;
        }
        match scene.insert_entity_at(item.entity.clone(), item.index) {
            Ok(()) => affected += 1,
            Err(e) => warn!(entity = %item.id(), error = %e, "restore failed"),
        }
    }
    (affected, items.len() - affected)
}

fn apply_props(scene: &mut dyn Scene, records: &[PropsRecord]) -> (usize, usize) {
    let affected = records
        .iter()
        .filter(|r| scene.apply_properties(&r.id, &r.props))
        .count();
    (affected, records.len() - affected)
}
