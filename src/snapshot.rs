//! Persisted board snapshot and legacy migration.
//!
//! A snapshot is `{ version, scene }`. Version 2 stores every image source as
//! an asset-store key or an external URL. Version 1 boards embedded the image
//! bytes inline in the scene; loading one moves those bytes into the asset
//! store and rewrites the entity to reference the new key.

use crate::assets::AssetStore;
use crate::entity::{AssetSource, EntityData, Origin, TransformProps, IMAGE_KIND};
use crate::error::{BoardError, Result};
use crate::scene::SceneSnapshot;
use crate::types::EntityId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Snapshot version written by this crate.
pub const SNAPSHOT_VERSION: u32 = 2;

/// Legacy version with inline image payloads.
pub const LEGACY_INLINE_VERSION: u32 = 1;

/// The single persisted board record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub version: u32,
    /// Serialized scene; its shape depends on `version`.
    pub scene: serde_json::Value,
}

/// A snapshot decoded according to its version.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedScene {
    Current(SceneSnapshot),
    Legacy(LegacyScene),
}

impl BoardSnapshot {
    /// Wrap a scene in a current-version snapshot.
    pub fn from_scene(scene: &SceneSnapshot) -> Result<Self> {
        Ok(Self {
            version: SNAPSHOT_VERSION,
            scene: serde_json::to_value(scene)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| BoardError::Deserialization(e.to_string()))
    }

    /// Interpret `scene` according to `version`.
    pub fn decode(self) -> Result<DecodedScene> {
        match self.version {
            SNAPSHOT_VERSION => serde_json::from_value(self.scene)
                .map(DecodedScene::Current)
                .map_err(|e| BoardError::Deserialization(e.to_string())),
            LEGACY_INLINE_VERSION => serde_json::from_value(self.scene)
                .map(DecodedScene::Legacy)
                .map_err(|e| BoardError::Deserialization(e.to_string())),
            other => Err(BoardError::UnsupportedSnapshotVersion(other)),
        }
    }
}

/// Version 1 scene layout.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyScene {
    #[serde(default)]
    pub entities: Vec<LegacyEntity>,
}

/// Version 1 entity: top-left origin by default, optional id, inline payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LegacyEntity {
    #[serde(default)]
    pub id: Option<EntityId>,
    #[serde(default = "image_kind")]
    pub kind: String,
    pub width: f64,
    pub height: f64,
    #[serde(default = "legacy_origin")]
    pub origin: Origin,
    #[serde(default)]
    pub props: TransformProps,
    /// External URL, when the image was not embedded.
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub inline: Option<InlinePayload>,
}

/// Embedded image bytes, hex encoded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InlinePayload {
    pub mime_type: String,
    pub data: String,
}

fn image_kind() -> String {
    IMAGE_KIND.to_string()
}

fn legacy_origin() -> Origin {
    Origin::TopLeft
}

/// Outcome of migrating a legacy scene.
#[derive(Clone, Debug, PartialEq)]
pub struct Migration {
    pub scene: SceneSnapshot,
    /// Inline payloads moved into the asset store.
    pub moved_to_store: usize,
    /// Entities left without any source (undecodable payloads).
    pub unresolved: usize,
}

/// Move inline payloads into `store` and convert to the current layout.
///
/// Store failures abort the migration: the legacy snapshot is the only copy
/// of those bytes, so nothing may be written back until they are safe.
pub fn migrate_legacy(legacy: LegacyScene, store: &dyn AssetStore) -> Result<Migration> {
    let mut entities = Vec::with_capacity(legacy.entities.len());
    let mut moved_to_store = 0;
    let mut unresolved = 0;

    for old in legacy.entities {
        let source = match (&old.inline, &old.src) {
            (Some(inline), _) => match hex::decode(&inline.data) {
                Ok(bytes) => {
                    let key = store.put(&bytes, &inline.mime_type)?;
                    moved_to_store += 1;
                    Some(AssetSource::StoreKey(key))
                }
                Err(e) => {
                    warn!(error = %e, "undecodable inline payload");
                    old.src.clone().map(AssetSource::Url)
                }
            },
            (None, Some(url)) => Some(AssetSource::Url(url.clone())),
            (None, None) => None,
        };
        if source.is_none() {
            unresolved += 1;
        }

        entities.push(EntityData {
            id: old.id.unwrap_or_else(EntityId::generate),
            kind: old.kind,
            width: old.width,
            height: old.height,
            origin: old.origin,
            centered_scaling: false,
            selectable: true,
            props: old.props,
            source,
            asset_missing: false,
        });
    }

    info!(
        entities = entities.len(),
        moved_to_store, unresolved, "migrated legacy board snapshot"
    );
    Ok(Migration {
        scene: SceneSnapshot { entities },
        moved_to_store,
        unresolved,
    })
}
