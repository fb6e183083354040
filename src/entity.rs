//! Serialized entity data: the property bags the engine copies around.
//!
//! The engine never holds live scene objects. Everything that crosses the
//! scene boundary is an owned [`EntityData`] value, so history entries can
//! outlive the entities they describe.

use crate::types::{AssetId, EntityId};
use serde::{Deserialize, Serialize};

/// Kind tag for image entities (the only kind counted against the limit).
pub const IMAGE_KIND: &str = "image";

/// Positional and transform properties compared by the transform tracker.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformProps {
    pub left: f64,
    pub top: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub angle: f64,
    pub flip_x: bool,
    pub flip_y: bool,
    pub skew_x: f64,
    pub skew_y: f64,
    pub opacity: f64,
}

impl Default for TransformProps {
    fn default() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            angle: 0.0,
            flip_x: false,
            flip_y: false,
            skew_x: 0.0,
            skew_y: 0.0,
            opacity: 1.0,
        }
    }
}

/// Anchor point that `left`/`top` refer to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[default]
    Center,
    TopLeft,
}

/// Where an entity's pixels come from. A key and a URL are mutually exclusive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AssetSource {
    /// Payload held in the asset store.
    StoreKey(AssetId),
    /// External URL referenced as-is.
    Url(String),
}

/// Construction-time defaults for new entities.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityDefaults {
    pub origin: Origin,
    pub centered_scaling: bool,
    pub selectable: bool,
}

impl Default for EntityDefaults {
    fn default() -> Self {
        Self {
            origin: Origin::Center,
            centered_scaling: true,
            selectable: true,
        }
    }
}

/// Full serialized form of one placed entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub id: EntityId,
    pub kind: String,
    /// Intrinsic (unscaled) size.
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub origin: Origin,
    #[serde(default)]
    pub centered_scaling: bool,
    #[serde(default = "default_true")]
    pub selectable: bool,
    #[serde(default)]
    pub props: TransformProps,
    #[serde(default)]
    pub source: Option<AssetSource>,
    /// Set when the source key could not be resolved at load time.
    #[serde(default, skip_serializing_if = "is_false")]
    pub asset_missing: bool,
}

fn default_true() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl EntityData {
    /// A new image entity with a fresh id and the given defaults applied.
    pub fn image(source: AssetSource, width: f64, height: f64, defaults: &EntityDefaults) -> Self {
        Self {
            id: EntityId::generate(),
            kind: IMAGE_KIND.to_string(),
            width,
            height,
            origin: defaults.origin,
            centered_scaling: defaults.centered_scaling,
            selectable: defaults.selectable,
            props: TransformProps::default(),
            source: Some(source),
            asset_missing: false,
        }
    }

    pub fn with_props(mut self, props: TransformProps) -> Self {
        self.props = props;
        self
    }

    pub fn is_image(&self) -> bool {
        self.kind == IMAGE_KIND
    }

    /// Store key this entity references, if any.
    pub fn asset_key(&self) -> Option<&AssetId> {
        match &self.source {
            Some(AssetSource::StoreKey(id)) => Some(id),
            _ => None,
        }
    }

    pub fn scaled_width(&self) -> f64 {
        self.width * self.props.scale_x
    }

    pub fn scaled_height(&self) -> f64 {
        self.height * self.props.scale_y
    }

    /// Convert to a centred origin, keeping the entity visually in place.
    ///
    /// Returns true if anything changed.
    pub fn normalize_origin(&mut self) -> bool {
        let mut changed = false;
        if self.origin != Origin::Center {
            self.props.left += self.scaled_width() / 2.0;
            self.props.top += self.scaled_height() / 2.0;
            self.origin = Origin::Center;
            changed = true;
        }
        if !self.centered_scaling {
            self.centered_scaling = true;
            changed = true;
        }
        changed
    }
}

/// Entity copy plus the index it occupied in the scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub index: usize,
    pub entity: EntityData,
}

impl EntityRecord {
    pub fn new(entity: EntityData, index: usize) -> Self {
        Self { index, entity }
    }

    pub fn id(&self) -> EntityId {
        self.entity.id
    }
}

/// Transform properties of one entity at one moment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropsRecord {
    pub id: EntityId,
    pub props: TransformProps,
}
