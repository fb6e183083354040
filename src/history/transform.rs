//! Before/after capture of transform gestures.

use super::manager::HistoryManager;
use crate::entity::PropsRecord;
use crate::scene::Scene;
use crate::types::EntityId;
use tracing::debug;

/// Tracks one transform gesture at a time.
///
/// `begin` snapshots the selection, `end` compares against the scene and
/// pushes a `Transform` action holding only the entities that changed.
#[derive(Debug, Default)]
pub struct TransformTracker {
    active: Option<Vec<PropsRecord>>,
}

impl TransformTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a gesture over `selection`. Returns how many entities were captured.
    ///
    /// An empty selection (or one whose ids are all gone) leaves no gesture active.
    pub fn begin(&mut self, scene: &dyn Scene, selection: &[EntityId]) -> usize {
        let captured: Vec<PropsRecord> = selection
            .iter()
            .filter_map(|id| {
                scene
                    .get_entity(id)
                    .map(|entity| PropsRecord { id: *id, props: entity.props })
            })
            .collect();

        let count = captured.len();
        self.active = if captured.is_empty() { None } else { Some(captured) };
        count
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Entities captured by the running gesture.
    pub fn touched(&self) -> Vec<EntityId> {
        self.active
            .as_ref()
            .map(|items| items.iter().map(|r| r.id).collect())
            .unwrap_or_default()
    }

    /// Drop the running gesture without recording anything.
    pub fn cancel(&mut self) {
        self.active = None;
    }

    /// Finish the gesture. Returns true if a `Transform` action was pushed.
    pub fn end(&mut self, scene: &dyn Scene, history: &mut HistoryManager) -> bool {
        let Some(captured) = self.active.take() else {
            return false;
        };

        let mut before = Vec::new();
        let mut after = Vec::new();
        for start in captured {
            let Some(entity) = scene.get_entity(&start.id) else {
                continue;
            };
            if entity.props != start.props {
                before.push(start);
                after.push(PropsRecord { id: start.id, props: entity.props });
            }
        }

        if after.is_empty() {
            return false;
        }

        debug!(changed = after.len(), "transform recorded");
        history.push_transform(before, after);
        true
    }
}
