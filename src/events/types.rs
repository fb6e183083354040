//! Event types published by the board.

use crate::gc::GcStats;
use crate::history::ActionKind;
use crate::types::{AssetId, EntityId};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 256
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: EventFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            filter: EventFilter::all(),
        }
    }
}

/// Coarse grouping of board events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// User-facing notices: capacity, limit enforcement, missing assets.
    Notices,
    /// Snapshot saves.
    Persistence,
    /// Undo and redo.
    History,
    /// Garbage collection passes.
    Gc,
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub include_notices: bool,
    pub include_persistence: bool,
    pub include_history: bool,
    pub include_gc: bool,
}

impl EventFilter {
    /// Subscribe to user-facing notices only.
    pub fn notices() -> Self {
        Self {
            include_notices: true,
            ..Default::default()
        }
    }

    /// Subscribe to the given categories.
    pub fn categories(categories: &[EventCategory]) -> Self {
        let mut filter = Self::default();
        for category in categories {
            match category {
                EventCategory::Notices => filter.include_notices = true,
                EventCategory::Persistence => filter.include_persistence = true,
                EventCategory::History => filter.include_history = true,
                EventCategory::Gc => filter.include_gc = true,
            }
        }
        filter
    }

    /// Subscribe to everything.
    pub fn all() -> Self {
        Self {
            include_notices: true,
            include_persistence: true,
            include_history: true,
            include_gc: true,
        }
    }

    pub fn matches(&self, category: EventCategory) -> bool {
        match category {
            EventCategory::Notices => self.include_notices,
            EventCategory::Persistence => self.include_persistence,
            EventCategory::History => self.include_history,
            EventCategory::Gc => self.include_gc,
        }
    }
}

/// Events emitted to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoardEvent {
    // --- History ---
    NothingToUndo,
    NothingToRedo,
    Undone { kind: ActionKind },
    Redone { kind: ActionKind },

    // --- Notices ---
    /// An add was refused because the board is full.
    CapacityReached { max: usize },
    /// Images were removed on load to get back under the limit.
    LimitEnforced { removed: usize, max: usize },
    /// An entity references a store key with no record behind it.
    AssetMissing { entity: Option<EntityId>, asset: AssetId },

    // --- Persistence ---
    Saved { entities: usize },
    SaveFailed { reason: String },

    // --- Garbage collection ---
    GcCompleted { stats: GcStats },
    GcFailed { reason: String },

    // --- Lifecycle ---
    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

impl BoardEvent {
    /// Category used for filtering. `Dropped` has none; it is sent directly.
    pub fn category(&self) -> Option<EventCategory> {
        match self {
            BoardEvent::NothingToUndo
            | BoardEvent::NothingToRedo
            | BoardEvent::Undone { .. }
            | BoardEvent::Redone { .. } => Some(EventCategory::History),
            BoardEvent::CapacityReached { .. }
            | BoardEvent::LimitEnforced { .. }
            | BoardEvent::AssetMissing { .. } => Some(EventCategory::Notices),
            BoardEvent::Saved { .. } | BoardEvent::SaveFailed { .. } => {
                Some(EventCategory::Persistence)
            }
            BoardEvent::GcCompleted { .. } | BoardEvent::GcFailed { .. } => {
                Some(EventCategory::Gc)
            }
            BoardEvent::Dropped { .. } => None,
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<BoardEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<BoardEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<BoardEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<BoardEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything buffered right now.
    pub fn drain(&self) -> Vec<BoardEvent> {
        self.receiver.try_iter().collect()
    }
}
