//! The scene adapter seam.
//!
//! The engine never builds renderable objects. It talks to the host's entity
//! collection through [`Scene`], exchanging serialized [`EntityData`] values
//! and ids. [`MemoryScene`] is a plain ordered collection implementing the
//! same contract, used headless and in tests.

use crate::entity::{EntityData, TransformProps};
use crate::error::{BoardError, Result};
use crate::types::EntityId;
use serde::{Deserialize, Serialize};

/// Serialized form of a whole scene, in stacking order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub entities: Vec<EntityData>,
}

/// Operations the engine requires from the host's editable entity collection.
pub trait Scene {
    /// Entities in stacking order, optionally filtered by kind.
    fn enumerate_entities(&self, kind: Option<&str>) -> Vec<EntityData>;

    /// Serialized copy of one entity.
    fn get_entity(&self, id: &EntityId) -> Option<EntityData>;

    /// Stacking index of an entity.
    fn index_of(&self, id: &EntityId) -> Option<usize>;

    /// Insert at `index`, clamped to the current length.
    fn insert_entity_at(&mut self, entity: EntityData, index: usize) -> Result<()>;

    /// Remove an entity, returning its last serialized state.
    fn remove_entity(&mut self, id: &EntityId) -> Option<EntityData>;

    /// Overwrite an entity's transform properties. False if it is gone.
    fn apply_properties(&mut self, id: &EntityId, props: &TransformProps) -> bool;

    fn serialize_all(&self) -> SceneSnapshot;

    /// Replace the whole collection. Completes before returning.
    fn deserialize_all(&mut self, snapshot: SceneSnapshot) -> Result<()>;

    fn count(&self, kind: Option<&str>) -> usize {
        self.enumerate_entities(kind).len()
    }

    fn contains(&self, id: &EntityId) -> bool {
        self.index_of(id).is_some()
    }
}

/// Ordered in-memory entity collection.
#[derive(Clone, Debug, Default)]
pub struct MemoryScene {
    entities: Vec<EntityData>,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|e| e.id).collect()
    }
}

impl Scene for MemoryScene {
    fn enumerate_entities(&self, kind: Option<&str>) -> Vec<EntityData> {
        self.entities
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .cloned()
            .collect()
    }

    fn get_entity(&self, id: &EntityId) -> Option<EntityData> {
        self.entities.iter().find(|e| &e.id == id).cloned()
    }

    fn index_of(&self, id: &EntityId) -> Option<usize> {
        self.entities.iter().position(|e| &e.id == id)
    }

    fn insert_entity_at(&mut self, entity: EntityData, index: usize) -> Result<()> {
        if self.contains(&entity.id) {
            return Err(BoardError::InvalidOperation(format!(
                "entity {} is already in the scene",
                entity.id
            )));
        }
        let index = index.min(self.entities.len());
        self.entities.insert(index, entity);
        Ok(())
    }

    fn remove_entity(&mut self, id: &EntityId) -> Option<EntityData> {
        let index = self.index_of(id)?;
        Some(self.entities.remove(index))
    }

    fn apply_properties(&mut self, id: &EntityId, props: &TransformProps) -> bool {
        match self.entities.iter_mut().find(|e| &e.id == id) {
            Some(entity) => {
                entity.props = *props;
                true
            }
            None => false,
        }
    }

    fn serialize_all(&self) -> SceneSnapshot {
        SceneSnapshot {
            entities: self.entities.clone(),
        }
    }

    fn deserialize_all(&mut self, snapshot: SceneSnapshot) -> Result<()> {
        self.entities = snapshot.entities;
        Ok(())
    }

    fn count(&self, kind: Option<&str>) -> usize {
        self.entities
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .count()
    }
}
