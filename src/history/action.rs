//! Committed, reversible history entries.

use crate::entity::{EntityRecord, PropsRecord};
use crate::types::{AssetId, EntityId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of an [`Action`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Add,
    Remove,
    Transform,
    AutoLimitRemove,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Add => "add",
            ActionKind::Remove => "remove",
            ActionKind::Transform => "transform",
            ActionKind::AutoLimitRemove => "auto_limit_remove",
        };
        f.write_str(name)
    }
}

/// A reversible unit of history.
///
/// Every variant owns full copies of the entity data it needs, so undo and
/// redo work without consulting the live scene or the asset store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Entities were added, in insertion order.
    Add { items: Vec<EntityRecord> },

    /// Entities were removed by the user. Items are ordered by their
    /// pre-removal index.
    Remove { items: Vec<EntityRecord> },

    /// Entities were removed to enforce the entity limit.
    AutoLimitRemove { items: Vec<EntityRecord> },

    /// Entities changed transform properties.
    Transform {
        before: Vec<PropsRecord>,
        after: Vec<PropsRecord>,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Add { .. } => ActionKind::Add,
            Action::Remove { .. } => ActionKind::Remove,
            Action::AutoLimitRemove { .. } => ActionKind::AutoLimitRemove,
            Action::Transform { .. } => ActionKind::Transform,
        }
    }

    /// Entity copies carried by add/remove variants.
    pub fn items(&self) -> &[EntityRecord] {
        match self {
            Action::Add { items }
            | Action::Remove { items }
            | Action::AutoLimitRemove { items } => items,
            Action::Transform { .. } => &[],
        }
    }

    /// Ids of every entity this action touches.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        match self {
            Action::Transform { before, .. } => before.iter().map(|r| r.id).collect(),
            _ => self.items().iter().map(EntityRecord::id).collect(),
        }
    }

    /// Store keys this action can resurrect on undo or redo.
    pub fn asset_keys(&self) -> impl Iterator<Item = &AssetId> + '_ {
        self.items().iter().filter_map(|item| item.entity.asset_key())
    }

    pub fn len(&self) -> usize {
        match self {
            Action::Transform { after, .. } => after.len(),
            _ => self.items().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
